//! Dependency resolver: key -> object lookup over a namespace, backed by a
//! placeholder table for keys referenced but never defined.
//!
//! Grounded directly on `original_source/koji_habitude/resolver.py`
//! (`Resolver`, `Report`, placeholder/`MissingObject` handling,
//! `chain_resolve`).

use std::collections::{HashMap, HashSet};

use crate::model::{FilePos, Object, Placeholder, PlaceholderState};
use crate::types::Key;

/// Snapshot of which referenced-but-undefined keys turned out to exist on
/// the hub (discovered) versus confirmed absent (phantom).
#[derive(Debug, Clone, Default)]
pub struct Report {
    pub discovered: Vec<Key>,
    pub phantoms: Vec<Key>,
}

impl Report {
    pub fn is_clean(&self) -> bool {
        self.phantoms.is_empty()
    }
}

/// Looks up objects by key against a namespace's expanded records, tracking
/// placeholders for any key referenced but not defined there.
pub struct Resolver<'a> {
    objects: &'a HashMap<Key, Object>,
    placeholders: HashMap<Key, Placeholder>,
}

impl<'a> Resolver<'a> {
    pub fn new(objects: &'a HashMap<Key, Object>) -> Self {
        Resolver {
            objects,
            placeholders: HashMap::new(),
        }
    }

    /// Resolves a key to a live object, or records (and returns) a
    /// placeholder for it if undefined. Placeholder identity is stable: the
    /// same key always yields the same `Placeholder` instance across calls.
    pub fn resolve(&mut self, key: &Key) -> Option<&Object> {
        self.objects.get(key)
    }

    /// Ensures a placeholder exists for `key`, recording `site` as its first
    /// reference point if this is the first time it's been seen.
    pub fn ensure_placeholder(&mut self, key: &Key, site: Option<FilePos>) -> &Placeholder {
        self.placeholders.entry(key.clone()).or_insert_with(|| {
            let mut placeholder = Placeholder::new(key.clone());
            placeholder.first_reference = site;
            placeholder
        })
    }

    /// Walks the dependency closure starting at `key`: every object
    /// transitively referenced, recording a placeholder for any key not
    /// found in the namespace. Returns the set of keys in the closure
    /// (including `key` itself) that *were* found as live objects.
    pub fn chain_resolve(&mut self, key: &Key) -> HashSet<Key> {
        let mut seen: HashSet<Key> = HashSet::new();
        let mut stack = vec![key.clone()];

        while let Some(current) = stack.pop() {
            if seen.contains(&current) {
                continue;
            }
            match self.objects.get(&current) {
                Some(object) => {
                    seen.insert(current.clone());
                    for dep in object.dependency_keys() {
                        if !seen.contains(&dep) {
                            stack.push(dep);
                        }
                    }
                }
                None => {
                    self.ensure_placeholder(&current, None);
                }
            }
        }

        seen
    }

    /// Marks a placeholder's existence state, e.g. after a hub lookup during
    /// the workflow's preliminary compare-only pass.
    pub fn mark(&mut self, key: &Key, state: PlaceholderState) {
        if let Some(placeholder) = self.placeholders.get_mut(key) {
            placeholder.state = state;
        }
    }

    /// Splits the outstanding placeholder table into discovered/phantom.
    pub fn report(&self) -> Report {
        let mut report = Report::default();
        for placeholder in self.placeholders.values() {
            match placeholder.state {
                PlaceholderState::Discovered => report.discovered.push(placeholder.key.clone()),
                PlaceholderState::Phantom => report.phantoms.push(placeholder.key.clone()),
                PlaceholderState::Unchecked => {}
            }
        }
        report
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &Placeholder> {
        self.placeholders.values()
    }

    pub fn clear(&mut self) {
        self.placeholders.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::kinds::{Channel, ExternalRepo, Tag};

    fn objects_with_tag_missing_repo() -> HashMap<Key, Object> {
        let mut tag = Tag::new("f40-build".into()).unwrap();
        tag.external_repos = vec![crate::model::kinds::PriorityEntry::Bare("epel".into())];
        let mut map = HashMap::new();
        map.insert(tag.key(), Object::Tag(tag));
        map
    }

    #[test]
    fn test_resolve_known_key_returns_object() {
        let objects = objects_with_tag_missing_repo();
        let mut resolver = Resolver::new(&objects);
        let key = Key::new("tag", "f40-build").unwrap();
        assert!(resolver.resolve(&key).is_some());
    }

    #[test]
    fn test_chain_resolve_placeholders_missing_dependency() {
        let objects = objects_with_tag_missing_repo();
        let mut resolver = Resolver::new(&objects);
        let key = Key::new("tag", "f40-build").unwrap();
        resolver.chain_resolve(&key);
        let repo_key = Key::new("external-repo", "epel").unwrap();
        assert!(resolver.placeholders().any(|p| p.key == repo_key));
    }

    #[test]
    fn test_report_splits_discovered_and_phantom() {
        let objects: HashMap<Key, Object> = HashMap::new();
        let mut resolver = Resolver::new(&objects);
        let a = Key::new("tag", "a").unwrap();
        let b = Key::new("tag", "b").unwrap();
        resolver.ensure_placeholder(&a, None);
        resolver.ensure_placeholder(&b, None);
        resolver.mark(&a, PlaceholderState::Discovered);
        resolver.mark(&b, PlaceholderState::Phantom);
        let report = resolver.report();
        assert_eq!(report.discovered, vec![a]);
        assert_eq!(report.phantoms, vec![b]);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_chain_resolve_follows_channel_hosts() {
        let mut channel = Channel::new("builders".into()).unwrap();
        channel.hosts = vec!["builder1".into()];
        let mut objects = HashMap::new();
        objects.insert(channel.key(), Object::Channel(channel));
        let mut resolver = Resolver::new(&objects);
        let key = Key::new("channel", "builders").unwrap();
        let seen = resolver.chain_resolve(&key);
        assert!(seen.contains(&key));
        let host_key = Key::new("host", "builder1").unwrap();
        assert!(resolver.placeholders().any(|p| p.key == host_key));
        let _ = ExternalRepo::new("unused".into(), "http://x".into());
    }
}
