//! Topological solver: orders the resolved object closure for processing,
//! splitting splittable nodes to break otherwise-unbreakable cycles.
//!
//! Grounded on `original_source/koji_habitude/solver.py` (`Node`, the
//! priority-tuple emission order, `_split`/`_unlink`). See DESIGN.md for the
//! recorded deviation: this crate always wires `can_split` from
//! `Object::can_split()`, unlike the apparent dead branch in the source.

use std::collections::{HashMap, HashSet};

use crate::error::SolverError;
use crate::model::Object;
use crate::types::Key;

/// One node in the dependency graph: the object itself, its remaining
/// unresolved dependency count, and whether it may be split to break a
/// cycle.
struct Node {
    object: Object,
    depends_on: HashSet<Key>,
    dependents: HashSet<Key>,
    can_split: bool,
    /// True once a split stub for this node has already been emitted; the
    /// eventual full-definition continuation must suppress re-creating it.
    was_split: bool,
}

impl Node {
    fn priority(&self) -> (usize, i32, i32) {
        let in_degree = self.depends_on.len();
        let splittable_rank = if self.can_split { 0 } else { 1 };
        let out_degree = self.dependents.len() as i32;
        (in_degree, splittable_rank, -out_degree)
    }
}

/// One item of solved output: either a full object ready for normal
/// processing, or a split stub (identity only) followed later by its
/// continuation once the cycle it was breaking has been unwound.
pub enum Emission {
    Full(Object),
    SplitStub(Object),
}

pub struct Solver {
    nodes: HashMap<Key, Node>,
}

impl Solver {
    /// Builds a solver over the given closure of resolved objects (typically
    /// the result of one or more `Resolver::chain_resolve` calls).
    pub fn new(objects: impl IntoIterator<Item = Object>) -> Self {
        let mut nodes: HashMap<Key, Node> = HashMap::new();
        for object in objects {
            let key = object.key();
            let can_split = object.can_split();
            let depends_on: HashSet<Key> = object.dependency_keys().into_iter().collect();
            nodes.insert(
                key,
                Node {
                    object,
                    depends_on,
                    dependents: HashSet::new(),
                    can_split,
                    was_split: false,
                },
            );
        }

        let edges: Vec<(Key, Key)> = nodes
            .iter()
            .flat_map(|(key, node)| node.depends_on.iter().cloned().map(move |dep| (dep, key.clone())))
            .collect();
        for (dep, dependent) in edges {
            if let Some(dep_node) = nodes.get_mut(&dep) {
                dep_node.dependents.insert(dependent);
            }
        }

        Solver { nodes }
    }

    /// Whether a given key was emitted as a split stub (used by
    /// `ChangeReport::queue_read` to suppress a duplicate `Create`).
    pub fn was_split(&self, key: &Key) -> bool {
        self.nodes.get(key).map(|n| n.was_split).unwrap_or(false)
    }

    /// Emits every node in dependency-correct order: a node is only emitted
    /// once every key in `depends_on` has already been emitted. Ties are
    /// broken by `(in_degree, splittable_rank, -out_degree)` so that
    /// non-splittable, low-fan-out nodes go first among equals. When no
    /// zero-in-degree node remains, the lowest-priority splittable node in
    /// the remaining cycle is split (emitted as a stub with `depends_on`
    /// cleared) to unblock progress; if none is splittable, the solver
    /// fails.
    pub fn solve(mut self) -> Result<Vec<Emission>, SolverError> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut emitted: HashSet<Key> = HashSet::new();

        while !self.nodes.is_empty() {
            let ready: Vec<Key> = self
                .nodes
                .iter()
                .filter(|(_, node)| node.depends_on.is_empty())
                .map(|(key, _)| key.clone())
                .collect();

            if !ready.is_empty() {
                let mut ready = ready;
                ready.sort_by_key(|key| {
                    let node = &self.nodes[key];
                    node.priority()
                });
                for key in ready {
                    self.emit(&key, &mut out, &mut emitted);
                }
                continue;
            }

            // Cycle: every remaining node has depends_on.len() > 0. Find the
            // best splittable candidate by priority tuple.
            let mut candidates: Vec<&Key> = self
                .nodes
                .iter()
                .filter(|(_, node)| node.can_split)
                .map(|(key, _)| key)
                .collect();
            candidates.sort_by_key(|key| self.nodes[*key].priority());

            match candidates.first().cloned().cloned() {
                Some(key) => self.split(&key, &mut out),
                None => {
                    let mut keys: Vec<String> = self.nodes.keys().map(|k| k.to_string()).collect();
                    keys.sort();
                    return Err(SolverError::UnbreakableCycle { keys });
                }
            }
        }

        Ok(out)
    }

    fn emit(&mut self, key: &Key, out: &mut Vec<Emission>, emitted: &mut HashSet<Key>) {
        if emitted.contains(key) {
            return;
        }
        let Some(node) = self.nodes.remove(key) else { return };
        for dependent in &node.dependents {
            if let Some(d) = self.nodes.get_mut(dependent) {
                d.depends_on.remove(key);
            }
        }
        emitted.insert(key.clone());
        out.push(Emission::Full(node.object));
    }

    /// Splits a node: emits an identity-only stub now (unblocking its
    /// dependents that only needed its existence) and clears its own
    /// `depends_on` so it can be re-emitted as a full continuation once the
    /// rest of the cycle resolves.
    fn split(&mut self, key: &Key, out: &mut Vec<Emission>) {
        if let Some(node) = self.nodes.get_mut(key) {
            node.depends_on.clear();
            node.was_split = true;
            out.push(Emission::SplitStub(node.object.split_stub()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::kinds::{Channel, ExternalRepo, Host, Permission, Tag};

    #[test]
    fn test_linear_chain_emits_leaves_first() {
        let repo = ExternalRepo::new("epel".into(), "http://x".into()).unwrap();
        let mut tag = Tag::new("f40-build".into()).unwrap();
        tag.external_repos = vec![crate::model::kinds::PriorityEntry::Bare("epel".into())];
        let solver = Solver::new(vec![Object::ExternalRepo(repo), Object::Tag(tag)]);
        let emissions = solver.solve().unwrap();
        let keys: Vec<String> = emissions
            .iter()
            .map(|e| match e {
                Emission::Full(o) => o.key().to_string(),
                Emission::SplitStub(o) => o.key().to_string(),
            })
            .collect();
        assert_eq!(keys, vec!["external-repo epel", "tag f40-build"]);
    }

    #[test]
    fn test_unbreakable_cycle_among_non_splittable_fails() {
        // Permission::dependency_keys() is always empty in the real model --
        // no non-splittable kind naturally references another one back, so
        // there is no authored way to build this fixture through the normal
        // Object::dependency_keys() path. Wire the cycle directly on the
        // private Node map (this test module is a child of solver's own
        // module, so it can) to exercise the solver's own cycle-rejection
        // logic against two genuinely non-splittable nodes.
        let perm_a = Permission { name: "a".into(), description: None, pos: Default::default() };
        let perm_b = Permission { name: "b".into(), description: None, pos: Default::default() };
        let key_a = Key::new("permission", "a".to_string()).unwrap();
        let key_b = Key::new("permission", "b".to_string()).unwrap();

        let mut nodes = HashMap::new();
        nodes.insert(
            key_a.clone(),
            Node {
                object: Object::Permission(perm_a),
                depends_on: [key_b.clone()].into_iter().collect(),
                dependents: [key_b.clone()].into_iter().collect(),
                can_split: false,
                was_split: false,
            },
        );
        nodes.insert(
            key_b.clone(),
            Node {
                object: Object::Permission(perm_b),
                depends_on: [key_a.clone()].into_iter().collect(),
                dependents: [key_a.clone()].into_iter().collect(),
                can_split: false,
                was_split: false,
            },
        );
        let solver = Solver { nodes };
        assert!(solver.solve().is_err());
    }

    #[test]
    fn test_cycle_broken_by_splittable_host_channel() {
        let mut host = Host::new("builder1".into()).unwrap();
        host.channels = vec!["default".into()];
        let mut channel = Channel::new("default".into()).unwrap();
        channel.hosts = vec!["builder1".into()];

        // Host depends on its channels and Channel depends on its hosts, so
        // this is a genuine cycle between two splittable kinds. The solver
        // splits one of them (a stub with depends_on cleared), which then
        // frees it to be re-emitted in full next round, which in turn frees
        // the other side to be emitted in full.
        let solver = Solver::new(vec![Object::Host(host), Object::Channel(channel)]);
        let emissions = solver.solve().unwrap();
        assert_eq!(emissions.len(), 3);
        let splits = emissions.iter().filter(|e| matches!(e, Emission::SplitStub(_))).count();
        let fulls = emissions.iter().filter(|e| matches!(e, Emission::Full(_))).count();
        assert_eq!(splits, 1);
        assert_eq!(fulls, 2);
    }
}
