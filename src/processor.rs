//! Batched change processor: drives each solved object's `ChangeReport`
//! through read -> compare -> apply in fixed-size chunks, committing one
//! multicall round trip per phase per chunk.
//!
//! Grounded on `original_source/koji_habitude/processor.py`
//! (`ProcessorState`, `step`/`step_read`/`step_compare`/`step_apply`,
//! `ProcessorSummary`, `DiffOnlyProcessor`).

use crate::error::HubError;
use crate::hub::multicall::MulticallSession;
use crate::hub::session::HubSession;
use crate::model::change::{Change, ChangeReport, VirtualCallId};
use crate::solver::Emission;
use crate::types::Key;

const DEFAULT_CHUNK_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    ReadyChunk,
    ReadyRead,
    ReadyCompare,
    ReadyApply,
    Exhausted,
    Broken,
}

struct PendingReport {
    key: Key,
    report: Box<dyn ChangeReport>,
    was_split: bool,
    read_ids: Vec<VirtualCallId>,
    write_ids: Vec<VirtualCallId>,
}

/// Summary handed back once a processor run completes (or dies mid-way,
/// preserving whatever partial progress it made).
#[derive(Clone)]
pub struct ProcessorSummary {
    pub total_objects: usize,
    pub steps_completed: usize,
    pub state: ProcessorState,
    pub change_reports: Vec<(Key, Vec<Change>)>,
    pub read_calls: usize,
    pub write_calls: usize,
    /// One message per write call that `check_results` found unresolved
    /// after an apply commit — a partial-batch failure the hub's own error
    /// list didn't already surface per call.
    pub apply_errors: Vec<(Key, String)>,
}

impl ProcessorSummary {
    pub fn total_changes(&self) -> usize {
        self.change_reports.iter().map(|(_, changes)| changes.len()).sum()
    }

    pub fn total_read_calls(&self) -> usize {
        self.read_calls
    }

    pub fn total_write_calls(&self) -> usize {
        self.write_calls
    }
}

/// Drives the solved object order through its three-phase change-report
/// state machine in `chunk_size`-sized batches. `apply_enabled = false`
/// turns `step_apply` into a no-op state transition, for `compare`/`diff`
/// workflows (see `compare_only` below, mirroring the Python
/// `DiffOnlyProcessor`).
pub struct Processor<'a> {
    session: &'a HubSession,
    remaining: std::vec::IntoIter<Emission>,
    previously_split: std::collections::HashSet<Key>,
    chunk: Vec<PendingReport>,
    last_read_multicall: Option<MulticallSession>,
    state: ProcessorState,
    chunk_size: usize,
    apply_enabled: bool,
    total_objects: usize,
    steps_completed: usize,
    change_reports: Vec<(Key, Vec<Change>)>,
    read_calls: usize,
    write_calls: usize,
    apply_errors: Vec<(Key, String)>,
}

impl<'a> Processor<'a> {
    pub fn new(session: &'a HubSession, emissions: Vec<Emission>) -> Self {
        Self::with_chunk_size(session, emissions, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(session: &'a HubSession, emissions: Vec<Emission>, chunk_size: usize) -> Self {
        let total_objects = emissions.len();
        Processor {
            session,
            remaining: emissions.into_iter(),
            previously_split: std::collections::HashSet::new(),
            chunk: Vec::new(),
            last_read_multicall: None,
            state: ProcessorState::ReadyChunk,
            chunk_size,
            apply_enabled: true,
            total_objects,
            steps_completed: 0,
            change_reports: Vec::new(),
            read_calls: 0,
            write_calls: 0,
            apply_errors: Vec::new(),
        }
    }

    /// Builds a compare-only variant: identical pipeline, but `step_apply`
    /// never queues write calls.
    pub fn compare_only(mut self) -> Self {
        self.apply_enabled = false;
        self
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    /// Advances exactly one phase. Returns `Ok(false)` once `Exhausted`.
    pub async fn step(&mut self) -> Result<bool, HubError> {
        match self.state {
            ProcessorState::ReadyChunk => {
                self.fill_chunk();
                self.steps_completed += 1;
                Ok(true)
            }
            ProcessorState::ReadyRead => {
                self.step_read().await?;
                self.steps_completed += 1;
                Ok(true)
            }
            ProcessorState::ReadyCompare => {
                self.step_compare();
                self.steps_completed += 1;
                Ok(true)
            }
            ProcessorState::ReadyApply => {
                self.step_apply().await?;
                self.steps_completed += 1;
                Ok(true)
            }
            ProcessorState::Exhausted => Ok(false),
            ProcessorState::Broken => Ok(false),
        }
    }

    fn fill_chunk(&mut self) {
        self.chunk.clear();
        for emission in self.remaining.by_ref().take(self.chunk_size) {
            let (object, was_split) = match emission {
                Emission::Full(o) => {
                    let split_before = self.previously_split.contains(&o.key());
                    (o, split_before)
                }
                Emission::SplitStub(o) => {
                    self.previously_split.insert(o.key());
                    (o, false)
                }
            };
            let key = object.key();
            let report = object.change_report();
            self.chunk.push(PendingReport { key, report, was_split, read_ids: Vec::new(), write_ids: Vec::new() });
        }

        self.state = if self.chunk.is_empty() {
            ProcessorState::Exhausted
        } else {
            ProcessorState::ReadyRead
        };
    }

    /// Bounds the number of `Promise`-triggered follow-up read rounds a
    /// single chunk can chain (e.g. `TagChangeReport`'s getTag -> inheritance/
    /// external-repos/groups). No report in this crate chains more than one,
    /// so this is a generous backstop, not a tuned limit.
    const MAX_READ_ROUNDS: usize = 8;

    async fn step_read(&mut self) -> Result<(), HubError> {
        let mut multicall = MulticallSession::new();
        for pending in &mut self.chunk {
            multicall.associate(pending.key.clone());
            pending.read_ids = pending.report.queue_read(&mut multicall, pending.was_split);
            multicall.clear_association();
        }

        // A Promise trigger fired during commit() may queue a second round
        // of reads (e.g. a tag's inheritance data, only fetchable once its
        // existence is confirmed). Keep committing until no more calls are
        // queued so those follow-up reads land before step_compare runs.
        for _ in 0..Self::MAX_READ_ROUNDS {
            if multicall.is_empty() {
                break;
            }
            self.read_calls += multicall.queued_len();
            if let Err(e) = multicall.commit(self.session.transport().as_ref()).await {
                self.last_read_multicall = Some(multicall);
                self.state = ProcessorState::Broken;
                return Err(e);
            }
        }

        self.last_read_multicall = Some(multicall);
        self.state = ProcessorState::ReadyCompare;
        Ok(())
    }

    fn step_compare(&mut self) {
        let multicall = self
            .last_read_multicall
            .take()
            .expect("ReadyCompare is only reached after step_read populates last_read_multicall");
        for pending in &mut self.chunk {
            let changes = pending.report.compare(&multicall, &pending.read_ids);
            self.change_reports.push((pending.key.clone(), changes));
        }
        self.state = ProcessorState::ReadyApply;
    }

    async fn step_apply(&mut self) -> Result<(), HubError> {
        if !self.apply_enabled {
            self.state = self.next_after_chunk();
            return Ok(());
        }

        let mut multicall = MulticallSession::new();
        for pending in &mut self.chunk {
            multicall.associate(pending.key.clone());
            pending.write_ids = pending.report.queue_apply(&mut multicall);
            multicall.clear_association();
        }
        self.write_calls += multicall.queued_len();
        let result = multicall.commit(self.session.transport().as_ref()).await;

        match result {
            Ok(()) => {
                for pending in &self.chunk {
                    for message in pending.report.check_results(&multicall, &pending.write_ids) {
                        self.apply_errors.push((pending.key.clone(), message));
                    }
                }
                self.state = self.next_after_chunk();
                Ok(())
            }
            Err(e) => {
                self.state = ProcessorState::Broken;
                Err(e)
            }
        }
    }

    fn next_after_chunk(&self) -> ProcessorState {
        if self.remaining.as_slice().is_empty() {
            ProcessorState::Exhausted
        } else {
            ProcessorState::ReadyChunk
        }
    }

    /// Runs every remaining step, invoking `callback` after each state
    /// transition (e.g. for progress reporting). Hub errors encountered
    /// along the way are collected rather than raised immediately —
    /// partial progress stays visible in the returned summary (core spec
    /// §7's "partial progress... preserved for inspection").
    pub async fn run(mut self, mut callback: impl FnMut(ProcessorState)) -> Result<ProcessorSummary, (HubError, ProcessorSummary)> {
        let mut errors = Vec::new();
        loop {
            match self.step().await {
                Ok(true) => callback(self.state),
                Ok(false) => break,
                Err(e) => {
                    errors.push(e);
                    if self.state == ProcessorState::Broken {
                        break;
                    }
                }
            }
        }

        let summary = self.summary();
        if errors.is_empty() {
            Ok(summary)
        } else {
            Err((HubError::Batch(errors), summary))
        }
    }

    pub fn summary(&self) -> ProcessorSummary {
        ProcessorSummary {
            total_objects: self.total_objects,
            steps_completed: self.steps_completed,
            state: self.state,
            change_reports: self.change_reports.clone(),
            read_calls: self.read_calls,
            write_calls: self.write_calls,
            apply_errors: self.apply_errors.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::mock::MockTransport;
    use crate::hub::transport::HubTransport;
    use crate::model::kinds::{Channel, ExternalRepo, Host, Permission, Tag};
    use crate::model::Object;
    use crate::solver::Solver;
    use std::sync::Arc;

    fn session_with(transport: MockTransport) -> HubSession {
        HubSession::new(Arc::new(transport))
    }

    #[tokio::test]
    async fn test_processor_creates_missing_objects() {
        let transport = MockTransport::new();
        transport.queue_response("getExternalRepo", serde_json::Value::Null);
        transport.queue_response("getTag", serde_json::Value::Null);
        let session = session_with(transport);

        let repo = ExternalRepo::new("epel".into(), "http://x".into()).unwrap();
        let tag = Tag::new("f40-build".into()).unwrap();
        let emissions = vec![Emission::Full(Object::ExternalRepo(repo)), Emission::Full(Object::Tag(tag))];

        let processor = Processor::new(&session, emissions);
        let summary = processor.run(|_| {}).await.unwrap_or_else(|(_, s)| s);
        assert_eq!(summary.total_objects, 2);
        assert_eq!(summary.state, ProcessorState::Exhausted);
        assert!(summary.total_changes() >= 2);
    }

    #[tokio::test]
    async fn test_existing_tag_triggers_second_read_round_for_inheritance() {
        // Mirrors the hub sequence for an already-existing tag whose
        // inheritance needs rewriting: getTag confirms existence, which
        // triggers getInheritanceData/getTagExternalRepos/getTagGroups, and
        // only then can the mismatch against the authored inheritance list
        // be detected.
        let transport = MockTransport::new();
        transport.queue_response(
            "getTag",
            serde_json::json!({ "arches": "", "maven_support": false, "maven_include_all": false, "locked": false, "perm": null }),
        );
        transport.queue_response("getInheritanceData", serde_json::json!([]));
        transport.queue_response("getTagExternalRepos", serde_json::json!([]));
        transport.queue_response("getTagGroups", serde_json::json!([]));
        let session = session_with(transport);

        let mut tag = Tag::new("f40-build".into()).unwrap();
        tag.inherit_from = vec!["f40-base".into()];
        let emissions = vec![Emission::Full(Object::Tag(tag))];

        let processor = Processor::new(&session, emissions);
        let summary = processor.run(|_| {}).await.unwrap_or_else(|(_, s)| s);
        assert_eq!(summary.state, ProcessorState::Exhausted);
        assert!(summary.total_read_calls() >= 4);
        assert!(summary.change_reports[0].1.iter().any(|c| c.summary == "rewrite inheritance"));
        assert!(summary.apply_errors.is_empty());
    }

    #[tokio::test]
    async fn test_permission_creation_grants_then_revokes() {
        // Koji has no dedicated "create permission" call: a brand new
        // permission is created as a side effect of granting it to the
        // current user, then immediately revoked back off that user.
        let transport = Arc::new(MockTransport::new());
        transport.queue_response("getAllPerms", serde_json::json!([{"name": "admin"}]));
        let session = HubSession::new(transport.clone() as Arc<dyn HubTransport>);

        let perm = Permission { name: "build-rpm".into(), description: Some("Build RPMs".into()), pos: Default::default() };
        let emissions = vec![Emission::Full(Object::Permission(perm))];

        let processor = Processor::new(&session, emissions);
        let summary = processor.run(|_| {}).await.unwrap_or_else(|(_, s)| s);
        assert_eq!(summary.state, ProcessorState::Exhausted);
        assert!(summary.apply_errors.is_empty());

        let calls = transport.calls();
        let methods: Vec<&str> = calls.iter().map(|c| c.method.as_str()).collect();
        let grant_at = methods.iter().position(|m| *m == "grantPermission").expect("grantPermission called");
        let revoke_at = methods.iter().position(|m| *m == "revokePermission").expect("revokePermission called");
        assert!(grant_at < revoke_at, "grant must precede revoke");
    }

    #[tokio::test]
    async fn test_channel_host_cycle_adds_host_to_channel() {
        // A host and channel that reference each other: both splittable,
        // so the solver breaks the cycle with a stub before either is
        // emitted in full, and the full host/channel forms reconcile the
        // membership via addHostToChannel once both sides are known.
        let mut host = Host::new("builder1".into()).unwrap();
        host.channels = vec!["build".into()];
        let mut channel = Channel::new("build".into()).unwrap();
        channel.hosts = vec!["builder1".into()];

        let solver = Solver::new(vec![Object::Host(host), Object::Channel(channel)]);
        let emissions = solver.solve().unwrap();

        let transport = Arc::new(MockTransport::new());
        transport.queue_response("getHost", serde_json::Value::Null);
        transport.queue_response("getChannel", serde_json::json!({"hosts": []}));
        let session = HubSession::new(transport.clone() as Arc<dyn HubTransport>);

        let processor = Processor::new(&session, emissions);
        let summary = processor.run(|_| {}).await.unwrap_or_else(|(_, s)| s);
        assert_eq!(summary.state, ProcessorState::Exhausted);
        assert!(summary.apply_errors.is_empty());

        let calls = transport.calls();
        assert!(calls.iter().any(|c| c.method == "addHostToChannel"));
    }

    #[tokio::test]
    async fn test_compare_only_processor_never_writes() {
        let transport = MockTransport::new();
        transport.queue_response("getTag", serde_json::Value::Null);
        let session = session_with(transport);
        let tag = Tag::new("f40-build".into()).unwrap();
        let emissions = vec![Emission::Full(Object::Tag(tag))];

        let processor = Processor::new(&session, emissions).compare_only();
        let summary = processor.run(|_| {}).await.unwrap_or_else(|(_, s)| s);
        assert_eq!(summary.write_calls, 0);
    }
}
