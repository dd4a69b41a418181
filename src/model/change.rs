//! Change reporting: the three-phase `Init -> ReadPending -> Compared ->
//! Applied` state machine each object drives to diff itself against the hub
//! and queue the calls needed to converge it.
//!
//! Grounded on the Python reference's `models/change.py` (base `Change`/
//! `ChangeReport`) generalized using the richer per-kind dataclasses in
//! `models/channel.py`, `models/permission.py`, `models/content_generator.py`,
//! `models/archive_type.py`, `models/build_type.py`.

use std::sync::{Arc, Mutex};

use serde_json::Value;

use super::kinds::{
    assign_priorities, ArchiveType, BuildType, Channel, ContentGenerator, ExternalRepo, Group, Host, Permission,
    PriorityEntry, Tag, Target, User,
};
use crate::types::Key;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VirtualCallId(pub usize);

/// The fixed RPC method names this crate calls, reproduced here as
/// associated constants so callers never hand-type a method string. Names
/// and casing are the hub's own, not Rust convention — kept verbatim so a
/// packet capture against a real hub can be diffed against these.
///
/// Lives in `model::change` (not `hub::transport`) because `ChangeReport`
/// impls are the real call sites and `model` doesn't depend on `hub`;
/// re-exported at `hub::transport::methods` for callers that think in terms
/// of the transport.
pub mod methods {
    pub const GET_TAG: &str = "getTag";
    pub const CREATE_TAG: &str = "createTag";
    pub const EDIT_TAG2: &str = "editTag2";
    pub const GET_INHERITANCE_DATA: &str = "getInheritanceData";
    pub const SET_INHERITANCE_DATA: &str = "setInheritanceData";
    pub const GET_TAG_EXTERNAL_REPOS: &str = "getTagExternalRepos";
    pub const ADD_EXTERNAL_REPO_TO_TAG: &str = "addExternalRepoToTag";
    pub const GET_TAG_GROUPS: &str = "getTagGroups";
    pub const GROUP_LIST_ADD: &str = "groupListAdd";
    pub const GROUP_LIST_REMOVE: &str = "groupListRemove";
    pub const GROUP_PACKAGE_LIST_ADD: &str = "groupPackageListAdd";
    pub const GROUP_PACKAGE_LIST_REMOVE: &str = "groupPackageListRemove";

    pub const GET_BUILD_TARGET: &str = "getBuildTarget";
    pub const CREATE_BUILD_TARGET: &str = "createBuildTarget";
    pub const EDIT_BUILD_TARGET: &str = "editBuildTarget";

    pub const GET_USER: &str = "getUser";
    pub const CREATE_USER: &str = "createUser";
    pub const ENABLE_USER: &str = "enableUser";
    pub const DISABLE_USER: &str = "disableUser";
    pub const GET_USER_PERMS: &str = "getUserPerms";

    pub const GET_GROUP_MEMBERS: &str = "getGroupMembers";
    pub const NEW_GROUP: &str = "newGroup";
    pub const ADD_GROUP_MEMBER: &str = "addGroupMember";
    pub const DROP_GROUP_MEMBER: &str = "dropGroupMember";

    pub const GET_HOST: &str = "getHost";
    pub const CREATE_HOST: &str = "createHost";
    pub const ADD_HOST_TO_CHANNEL: &str = "addHostToChannel";
    pub const REMOVE_HOST_FROM_CHANNEL: &str = "removeHostFromChannel";

    pub const GET_CHANNEL: &str = "getChannel";
    pub const CREATE_CHANNEL: &str = "createChannel";
    pub const EDIT_CHANNEL: &str = "editChannel";
    pub const LIST_HOSTS: &str = "listHosts";

    pub const GET_EXTERNAL_REPO: &str = "getExternalRepo";
    pub const CREATE_EXTERNAL_REPO: &str = "createExternalRepo";
    pub const EDIT_EXTERNAL_REPO: &str = "editExternalRepo";

    pub const GET_ALL_PERMS: &str = "getAllPerms";
    pub const GRANT_PERMISSION: &str = "grantPermission";
    pub const REVOKE_PERMISSION: &str = "revokePermission";

    pub const LIST_CGS: &str = "listCGs";
    pub const GRANT_CG_ACCESS: &str = "grantCGAccess";
    pub const REVOKE_CG_ACCESS: &str = "revokeCGAccess";

    pub const GET_ARCHIVE_TYPES: &str = "getArchiveTypes";
    pub const ADD_ARCHIVE_TYPE: &str = "addArchiveType";
    pub const LIST_BTYPES: &str = "listBTypes";
    pub const ADD_BTYPE: &str = "addBType";
}

use methods::*;

/// Fires once a `queue_promise` call's result lands, with write access back
/// into the queue so it can issue a second round of dependent reads (e.g. a
/// tag's inheritance/external-repos/groups calls, which need the tag's
/// existence confirmed first).
pub type PromiseTrigger = Box<dyn FnOnce(Value, &mut dyn HubQueue) + Send>;

/// Transforms a call's raw result lazily, on first read, without issuing a
/// hub call of its own.
pub type ProcessorFn = Box<dyn FnOnce(Value) -> Value + Send>;

/// Narrow seam a `ChangeReport` needs from the multicall machinery: queue a
/// hub call and later read back its result. Implemented by
/// `hub::multicall::MulticallSession`; kept here (rather than depending on
/// the `hub` module from `model`) so the object model stays the lower layer.
pub trait HubQueue {
    fn queue_call(&mut self, key: &Key, method: &str, arguments: Value) -> VirtualCallId;
    fn call_result(&self, id: VirtualCallId) -> Option<&Value>;

    /// Queue a call whose result, once committed, triggers a follow-up round
    /// of calls rather than just sitting in a result slot.
    fn queue_promise(&mut self, key: &Key, method: &str, arguments: Value, trigger: PromiseTrigger) -> VirtualCallId;

    /// Queue a view onto another call's eventual result, transformed by
    /// `post` the first time it's read.
    fn queue_processor(&mut self, inner: VirtualCallId, post: ProcessorFn) -> VirtualCallId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeReportState {
    Init,
    ReadPending,
    Compared,
    Applied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Update,
    Add,
    Remove,
    Modify,
}

#[derive(Debug, Clone)]
pub enum ChangePayload {
    None,
    Fields(Value),
    Member(String),
}

#[derive(Debug, Clone)]
pub struct Change {
    pub kind: ChangeKind,
    pub subject: String,
    pub payload: ChangePayload,
    pub summary: String,
}

impl Change {
    pub fn create(subject: impl Into<String>, summary: impl Into<String>) -> Self {
        Change {
            kind: ChangeKind::Create,
            subject: subject.into(),
            payload: ChangePayload::None,
            summary: summary.into(),
        }
    }

    pub fn add(subject: impl Into<String>, member: impl Into<String>) -> Self {
        let member = member.into();
        Change {
            kind: ChangeKind::Add,
            subject: subject.into(),
            summary: format!("add {}", member),
            payload: ChangePayload::Member(member),
        }
    }

    pub fn remove(subject: impl Into<String>, member: impl Into<String>) -> Self {
        let member = member.into();
        Change {
            kind: ChangeKind::Remove,
            subject: subject.into(),
            summary: format!("remove {}", member),
            payload: ChangePayload::Member(member),
        }
    }

    pub fn update(subject: impl Into<String>, summary: impl Into<String>, fields: Value) -> Self {
        Change {
            kind: ChangeKind::Update,
            subject: subject.into(),
            payload: ChangePayload::Fields(fields),
            summary: summary.into(),
        }
    }
}

/// Driven by the processor: `queue_read` during `ReadyRead`, `compare`
/// during `ReadyCompare`, `queue_apply` during `ReadyApply`.
pub trait ChangeReport {
    fn key(&self) -> Key;
    fn state(&self) -> ChangeReportState;

    /// Queue existence/detail calls against the hub. `was_split` tells the
    /// report whether an earlier split stub already issued this object's
    /// `Create`, so a full-definition continuation doesn't re-emit it.
    fn queue_read(&mut self, queue: &mut dyn HubQueue, was_split: bool) -> Vec<VirtualCallId>;

    /// Consume the queued calls' results (now populated after a multicall
    /// commit) and compute the diff.
    fn compare(&mut self, queue: &dyn HubQueue, read_ids: &[VirtualCallId]) -> Vec<Change>;

    /// Queue the write calls needed to apply the computed changes.
    fn queue_apply(&mut self, queue: &mut dyn HubQueue) -> Vec<VirtualCallId>;

    fn changes(&self) -> &[Change];

    /// Checks that every id `queue_apply` returned actually produced a
    /// result after the apply commit, surfacing one message per write that
    /// silently fell through (a stale call that never got a response slot,
    /// or one dropped by a partial-batch failure upstream).
    fn check_results(&self, queue: &dyn HubQueue, write_ids: &[VirtualCallId]) -> Vec<String> {
        write_ids
            .iter()
            .filter(|id| queue.call_result(**id).is_none())
            .map(|id| format!("{}: write call {} produced no result", self.key(), id.0))
            .collect()
    }
}

/// Pulls member names out of a listing result in whatever shape the hub
/// handed back: a bare array of strings, an array of `{"name": ...}`
/// objects, or an array nested under `nested_key` of either of those shapes.
/// Centralizes the parsing `member_reconciling_report!`'s diff depends on —
/// previously this returned nothing for any shape but the first, which made
/// every diff see an empty remote side.
fn extract_member_names(value: Option<&Value>, nested_key: Option<&str>) -> Vec<String> {
    let array = match nested_key {
        Some(key) => value.and_then(|v| v.get(key)).and_then(|v| v.as_array()),
        None => value.and_then(|v| v.as_array()),
    };
    let Some(array) = array else { return Vec::new() };
    array
        .iter()
        .filter_map(|entry| match entry {
            Value::String(s) => Some(s.clone()),
            Value::Object(_) => entry.get("name").and_then(|n| n.as_str()).map(str::to_string),
            _ => None,
        })
        .collect()
}

macro_rules! list_membership_report {
    ($report:ident, $model:ty, $label:literal, $list_method:literal, $create_method:literal, $create_summary:expr) => {
        pub struct $report {
            model: $model,
            state: ChangeReportState,
            was_split: bool,
            existed: bool,
            changes: Vec<Change>,
        }

        impl $report {
            pub fn new(model: $model) -> Self {
                $report {
                    model,
                    state: ChangeReportState::Init,
                    was_split: false,
                    existed: false,
                    changes: Vec::new(),
                }
            }
        }

        impl ChangeReport for $report {
            fn key(&self) -> Key {
                self.model.key()
            }

            fn state(&self) -> ChangeReportState {
                self.state
            }

            fn queue_read(&mut self, queue: &mut dyn HubQueue, was_split: bool) -> Vec<VirtualCallId> {
                self.state = ChangeReportState::ReadPending;
                self.was_split = was_split;
                if was_split {
                    return Vec::new();
                }
                vec![queue.queue_call(&self.key(), $list_method, Value::Null)]
            }

            fn compare(&mut self, queue: &dyn HubQueue, read_ids: &[VirtualCallId]) -> Vec<Change> {
                self.state = ChangeReportState::Compared;
                if self.was_split {
                    return self.changes.clone();
                }
                let listed = extract_member_names(read_ids.first().and_then(|id| queue.call_result(*id)), None);
                self.existed = listed.iter().any(|n| n == &self.model.name);
                if !self.existed {
                    self.changes
                        .push(Change::create(self.model.name.clone(), $create_summary(&self.model)));
                }
                self.changes.clone()
            }

            fn queue_apply(&mut self, queue: &mut dyn HubQueue) -> Vec<VirtualCallId> {
                let mut ids = Vec::new();
                for change in &self.changes {
                    if let ChangeKind::Create = change.kind {
                        ids.push(queue.queue_call(
                            &self.key(),
                            $create_method,
                            serde_json::to_value(&self.model).unwrap_or(Value::Null),
                        ));
                    }
                }
                self.state = ChangeReportState::Applied;
                ids
            }

            fn changes(&self) -> &[Change] {
                &self.changes
            }
        }

        #[allow(dead_code)]
        const _: &str = $label;
    };
}

list_membership_report!(
    ArchiveTypeChangeReport,
    ArchiveType,
    "archive-type",
    GET_ARCHIVE_TYPES,
    ADD_ARCHIVE_TYPE,
    |m: &ArchiveType| format!("create archive type {}", m.name)
);

list_membership_report!(
    BuildTypeChangeReport,
    BuildType,
    "build-type",
    LIST_BTYPES,
    ADD_BTYPE,
    |m: &BuildType| format!("create build type {}", m.name)
);

// ============================================================================
// CHANNEL — richest worked example, grounded on channel.py
// ============================================================================

pub struct ChannelChangeReport {
    model: Channel,
    state: ChangeReportState,
    was_split: bool,
    existing_hosts: Vec<String>,
    existed: bool,
    changes: Vec<Change>,
}

impl ChannelChangeReport {
    pub fn new(model: Channel) -> Self {
        ChannelChangeReport {
            model,
            state: ChangeReportState::Init,
            was_split: false,
            existing_hosts: Vec::new(),
            existed: false,
            changes: Vec::new(),
        }
    }
}

impl ChangeReport for ChannelChangeReport {
    fn key(&self) -> Key {
        self.model.key()
    }

    fn state(&self) -> ChangeReportState {
        self.state
    }

    fn queue_read(&mut self, queue: &mut dyn HubQueue, was_split: bool) -> Vec<VirtualCallId> {
        self.state = ChangeReportState::ReadPending;
        self.was_split = was_split;
        let mut ids = Vec::new();
        if !was_split {
            ids.push(queue.queue_call(
                &self.key(),
                GET_CHANNEL,
                serde_json::json!({ "channelInfo": self.model.name }),
            ));
        }
        ids.push(queue.queue_call(
            &self.key(),
            LIST_HOSTS,
            serde_json::json!({ "channelID": self.model.name }),
        ));
        ids
    }

    fn compare(&mut self, queue: &dyn HubQueue, read_ids: &[VirtualCallId]) -> Vec<Change> {
        self.state = ChangeReportState::Compared;
        let (existence_id, hosts_id) = if read_ids.len() == 2 {
            (Some(read_ids[0]), read_ids[1])
        } else {
            (None, read_ids[0])
        };

        self.existing_hosts = extract_member_names(queue.call_result(hosts_id), None);

        if self.was_split {
            // A split stub already issued `createChannel`; this continuation
            // only needs to reconcile members against the now-settled state.
            self.existed = true;
        } else {
            self.existed = existence_id
                .and_then(|id| queue.call_result(id))
                .map(|v| !v.is_null())
                .unwrap_or(self.existed);

            if !self.existed {
                self.changes.push(Change::create(
                    self.model.name.clone(),
                    format!("create channel {}", self.model.name),
                ));
            } else if let Some(desc) = &self.model.description {
                self.changes.push(Change::update(
                    self.model.name.clone(),
                    "set description",
                    serde_json::json!({ "description": desc }),
                ));
            }
        }

        for host in &self.model.hosts {
            if !self.existing_hosts.contains(host) {
                self.changes.push(Change::add(self.model.name.clone(), host.clone()));
            }
        }
        if self.model.exact_hosts {
            for host in &self.existing_hosts {
                if !self.model.hosts.contains(host) {
                    self.changes.push(Change::remove(self.model.name.clone(), host.clone()));
                }
            }
        }

        self.changes.clone()
    }

    fn queue_apply(&mut self, queue: &mut dyn HubQueue) -> Vec<VirtualCallId> {
        let mut ids = Vec::new();
        for change in &self.changes {
            match change.kind {
                ChangeKind::Create => {
                    ids.push(queue.queue_call(
                        &self.key(),
                        CREATE_CHANNEL,
                        serde_json::json!({ "channelName": self.model.name, "description": self.model.description }),
                    ));
                }
                ChangeKind::Update => {
                    ids.push(queue.queue_call(
                        &self.key(),
                        EDIT_CHANNEL,
                        serde_json::json!({ "channelInfo": self.model.name, "description": self.model.description }),
                    ));
                }
                ChangeKind::Add => {
                    if let ChangePayload::Member(host) = &change.payload {
                        ids.push(queue.queue_call(
                            &self.key(),
                            ADD_HOST_TO_CHANNEL,
                            serde_json::json!({ "hostname": host, "channelName": self.model.name }),
                        ));
                    }
                }
                ChangeKind::Remove => {
                    if let ChangePayload::Member(host) = &change.payload {
                        ids.push(queue.queue_call(
                            &self.key(),
                            REMOVE_HOST_FROM_CHANNEL,
                            serde_json::json!({ "hostname": host, "channelName": self.model.name }),
                        ));
                    }
                }
                ChangeKind::Modify => {}
            }
        }
        self.state = ChangeReportState::Applied;
        ids
    }

    fn changes(&self) -> &[Change] {
        &self.changes
    }
}

// ============================================================================
// PERMISSION — current-user grant+revoke pattern
// ============================================================================

pub struct PermissionChangeReport {
    model: Permission,
    state: ChangeReportState,
    was_split: bool,
    existed: bool,
    changes: Vec<Change>,
}

impl PermissionChangeReport {
    pub fn new(model: Permission) -> Self {
        PermissionChangeReport {
            model,
            state: ChangeReportState::Init,
            was_split: false,
            existed: false,
            changes: Vec::new(),
        }
    }
}

impl ChangeReport for PermissionChangeReport {
    fn key(&self) -> Key {
        self.model.key()
    }

    fn state(&self) -> ChangeReportState {
        self.state
    }

    fn queue_read(&mut self, queue: &mut dyn HubQueue, was_split: bool) -> Vec<VirtualCallId> {
        self.state = ChangeReportState::ReadPending;
        self.was_split = was_split;
        if was_split {
            return Vec::new();
        }
        vec![queue.queue_call(&self.key(), GET_ALL_PERMS, Value::Null)]
    }

    fn compare(&mut self, queue: &dyn HubQueue, read_ids: &[VirtualCallId]) -> Vec<Change> {
        self.state = ChangeReportState::Compared;
        if self.was_split {
            return self.changes.clone();
        }
        self.existed = read_ids
            .first()
            .and_then(|id| queue.call_result(*id))
            .and_then(|v| v.as_array())
            .map(|perms| perms.iter().any(|p| p.get("name").and_then(|n| n.as_str()) == Some(self.model.name.as_str())))
            .unwrap_or(false);

        if !self.existed {
            self.changes.push(Change::create(
                self.model.name.clone(),
                format!("create permission {} (grant then revoke from current user)", self.model.name),
            ));
        }
        self.changes.clone()
    }

    fn queue_apply(&mut self, queue: &mut dyn HubQueue) -> Vec<VirtualCallId> {
        let mut ids = Vec::new();
        for change in &self.changes {
            if let ChangeKind::Create = change.kind {
                // Koji has no dedicated "create permission" call; it is
                // created implicitly as a side effect of granting it to the
                // current user, then immediately revoked.
                ids.push(queue.queue_call(
                    &self.key(),
                    GRANT_PERMISSION,
                    serde_json::json!({ "name": self.model.name, "create": true, "description": self.model.description }),
                ));
                ids.push(queue.queue_call(
                    &self.key(),
                    REVOKE_PERMISSION,
                    serde_json::json!({ "name": self.model.name }),
                ));
            }
        }
        self.state = ChangeReportState::Applied;
        ids
    }

    fn changes(&self) -> &[Change] {
        &self.changes
    }
}

// ============================================================================
// CONTENT GENERATOR — same grant+revoke shape, set-membership like channel
// ============================================================================

pub struct ContentGeneratorChangeReport {
    model: ContentGenerator,
    state: ChangeReportState,
    was_split: bool,
    existed: bool,
    existing_users: Vec<String>,
    changes: Vec<Change>,
}

impl ContentGeneratorChangeReport {
    pub fn new(model: ContentGenerator) -> Self {
        ContentGeneratorChangeReport {
            model,
            state: ChangeReportState::Init,
            was_split: false,
            existed: false,
            existing_users: Vec::new(),
            changes: Vec::new(),
        }
    }
}

impl ChangeReport for ContentGeneratorChangeReport {
    fn key(&self) -> Key {
        self.model.key()
    }

    fn state(&self) -> ChangeReportState {
        self.state
    }

    fn queue_read(&mut self, queue: &mut dyn HubQueue, was_split: bool) -> Vec<VirtualCallId> {
        self.state = ChangeReportState::ReadPending;
        self.was_split = was_split;
        if was_split {
            return Vec::new();
        }
        vec![queue.queue_call(&self.key(), LIST_CGS, serde_json::json!({ "cg": self.model.name }))]
    }

    fn compare(&mut self, queue: &dyn HubQueue, read_ids: &[VirtualCallId]) -> Vec<Change> {
        self.state = ChangeReportState::Compared;
        if self.was_split {
            return self.changes.clone();
        }
        let result = read_ids.first().and_then(|id| queue.call_result(*id));
        self.existed = result.map(|v| !v.is_null()).unwrap_or(false);
        self.existing_users = extract_member_names(result, Some("users"));

        if !self.existed {
            self.changes.push(Change::create(
                self.model.name.clone(),
                format!("create content generator {}", self.model.name),
            ));
        }
        for user in &self.model.users {
            if !self.existing_users.contains(user) {
                self.changes.push(Change::add(self.model.name.clone(), user.clone()));
            }
        }
        if self.model.exact_users {
            for user in &self.existing_users {
                if !self.model.users.contains(user) {
                    self.changes.push(Change::remove(self.model.name.clone(), user.clone()));
                }
            }
        }
        self.changes.clone()
    }

    fn queue_apply(&mut self, queue: &mut dyn HubQueue) -> Vec<VirtualCallId> {
        let mut ids = Vec::new();
        for change in &self.changes {
            match change.kind {
                ChangeKind::Create => {
                    ids.push(queue.queue_call(
                        &self.key(),
                        GRANT_CG_ACCESS,
                        serde_json::json!({ "cg": self.model.name, "create": true }),
                    ));
                    ids.push(queue.queue_call(
                        &self.key(),
                        REVOKE_CG_ACCESS,
                        serde_json::json!({ "cg": self.model.name }),
                    ));
                }
                ChangeKind::Add => {
                    if let ChangePayload::Member(user) = &change.payload {
                        ids.push(queue.queue_call(
                            &self.key(),
                            GRANT_CG_ACCESS,
                            serde_json::json!({ "user": user, "cg": self.model.name }),
                        ));
                    }
                }
                ChangeKind::Remove => {
                    if let ChangePayload::Member(user) = &change.payload {
                        ids.push(queue.queue_call(
                            &self.key(),
                            REVOKE_CG_ACCESS,
                            serde_json::json!({ "user": user, "cg": self.model.name }),
                        ));
                    }
                }
                ChangeKind::Update | ChangeKind::Modify => {}
            }
        }
        self.state = ChangeReportState::Applied;
        ids
    }

    fn changes(&self) -> &[Change] {
        &self.changes
    }
}

// ============================================================================
// HOST — channel membership only; a host's own fields are never re-edited
// once created (no `editHost` in the fixed vocabulary), mirroring BuildType.
// ============================================================================

macro_rules! member_reconciling_report {
    ($report:ident, $model:ty, $label:literal, $check_method:literal, $nested_key:expr, $create_method:literal, $add_method:literal, $remove_method:literal, $members:ident, $exact:ident) => {
        pub struct $report {
            model: $model,
            state: ChangeReportState,
            was_split: bool,
            existed: bool,
            existing_members: Vec<String>,
            changes: Vec<Change>,
        }

        impl $report {
            pub fn new(model: $model) -> Self {
                $report {
                    model,
                    state: ChangeReportState::Init,
                    was_split: false,
                    existed: false,
                    existing_members: Vec::new(),
                    changes: Vec::new(),
                }
            }
        }

        impl ChangeReport for $report {
            fn key(&self) -> Key {
                self.model.key()
            }

            fn state(&self) -> ChangeReportState {
                self.state
            }

            fn queue_read(&mut self, queue: &mut dyn HubQueue, was_split: bool) -> Vec<VirtualCallId> {
                self.state = ChangeReportState::ReadPending;
                self.was_split = was_split;
                if was_split {
                    return Vec::new();
                }
                vec![queue.queue_call(
                    &self.key(),
                    $check_method,
                    serde_json::json!({ "name": self.model.name }),
                )]
            }

            fn compare(&mut self, queue: &dyn HubQueue, read_ids: &[VirtualCallId]) -> Vec<Change> {
                self.state = ChangeReportState::Compared;
                if self.was_split {
                    return self.changes.clone();
                }
                let result = read_ids.first().and_then(|id| queue.call_result(*id));
                self.existed = result.map(|v| !v.is_null()).unwrap_or(false);
                self.existing_members = extract_member_names(result, $nested_key);

                if !self.existed {
                    self.changes.push(Change::create(
                        self.model.name.clone(),
                        format!("create {} {}", $label, self.model.name),
                    ));
                }
                for member in &self.model.$members {
                    if !self.existing_members.contains(member) {
                        self.changes.push(Change::add(self.model.name.clone(), member.clone()));
                    }
                }
                if self.model.$exact {
                    for member in &self.existing_members {
                        if !self.model.$members.contains(member) {
                            self.changes.push(Change::remove(self.model.name.clone(), member.clone()));
                        }
                    }
                }
                self.changes.clone()
            }

            fn queue_apply(&mut self, queue: &mut dyn HubQueue) -> Vec<VirtualCallId> {
                let mut ids = Vec::new();
                for change in &self.changes {
                    match change.kind {
                        ChangeKind::Create => {
                            ids.push(queue.queue_call(
                                &self.key(),
                                $create_method,
                                serde_json::to_value(&self.model).unwrap_or(Value::Null),
                            ));
                        }
                        ChangeKind::Add => {
                            if let ChangePayload::Member(m) = &change.payload {
                                ids.push(queue.queue_call(
                                    &self.key(),
                                    $add_method,
                                    serde_json::json!({ "hostname": self.model.name, "channelName": m }),
                                ));
                            }
                        }
                        ChangeKind::Remove => {
                            if let ChangePayload::Member(m) = &change.payload {
                                ids.push(queue.queue_call(
                                    &self.key(),
                                    $remove_method,
                                    serde_json::json!({ "hostname": self.model.name, "channelName": m }),
                                ));
                            }
                        }
                        ChangeKind::Update | ChangeKind::Modify => {}
                    }
                }
                self.state = ChangeReportState::Applied;
                ids
            }

            fn changes(&self) -> &[Change] {
                &self.changes
            }
        }
    };
}

// Koji's hub has no "list a host's channels" call of its own; `getHost`'s
// result is the only read surface, so the channel list is treated as a
// nested sub-field of it rather than a separate listing call.
member_reconciling_report!(
    HostChangeReport,
    Host,
    "host",
    GET_HOST,
    Some("channels"),
    CREATE_HOST,
    ADD_HOST_TO_CHANNEL,
    REMOVE_HOST_FROM_CHANNEL,
    channels,
    exact_channels
);

// ============================================================================
// GROUP — a Koji "group" is a row in the same user table as a User, so its
// membership and permissions are read/written with the same `*GroupMember`/
// `*Permission` calls a user would use, just keyed by group name. Dual
// reconciliation (members and permissions) means this can't fit the
// single-member-set macro shape above, so it's hand-written.
// ============================================================================

pub struct GroupChangeReport {
    model: Group,
    state: ChangeReportState,
    was_split: bool,
    existed: bool,
    existing_members: Vec<String>,
    existing_permissions: Vec<String>,
    changes: Vec<Change>,
}

impl GroupChangeReport {
    pub fn new(model: Group) -> Self {
        GroupChangeReport {
            model,
            state: ChangeReportState::Init,
            was_split: false,
            existed: false,
            existing_members: Vec::new(),
            existing_permissions: Vec::new(),
            changes: Vec::new(),
        }
    }
}

impl ChangeReport for GroupChangeReport {
    fn key(&self) -> Key {
        self.model.key()
    }

    fn state(&self) -> ChangeReportState {
        self.state
    }

    fn queue_read(&mut self, queue: &mut dyn HubQueue, was_split: bool) -> Vec<VirtualCallId> {
        self.state = ChangeReportState::ReadPending;
        self.was_split = was_split;
        if was_split {
            return Vec::new();
        }
        vec![
            queue.queue_call(&self.key(), GET_GROUP_MEMBERS, serde_json::json!({ "group": self.model.name })),
            queue.queue_call(&self.key(), GET_USER_PERMS, serde_json::json!({ "userinfo": self.model.name })),
        ]
    }

    fn compare(&mut self, queue: &dyn HubQueue, read_ids: &[VirtualCallId]) -> Vec<Change> {
        self.state = ChangeReportState::Compared;
        if self.was_split {
            return self.changes.clone();
        }

        let members_result = read_ids.first().and_then(|id| queue.call_result(*id));
        self.existed = members_result.map(|v| !v.is_null()).unwrap_or(false);
        self.existing_members = extract_member_names(members_result, None);
        self.existing_permissions = extract_member_names(read_ids.get(1).and_then(|id| queue.call_result(*id)), None);

        if !self.existed {
            self.changes.push(Change::create(
                self.model.name.clone(),
                format!("create group {}", self.model.name),
            ));
        }

        for member in &self.model.members {
            if !self.existing_members.contains(member) {
                self.changes.push(Change::add(format!("{} members", self.model.name), member.clone()));
            }
        }
        if self.model.exact_members {
            for member in &self.existing_members {
                if !self.model.members.contains(member) {
                    self.changes.push(Change::remove(format!("{} members", self.model.name), member.clone()));
                }
            }
        }

        for perm in &self.model.permissions {
            if !self.existing_permissions.contains(perm) {
                self.changes.push(Change::add(format!("{} permissions", self.model.name), perm.clone()));
            }
        }
        if self.model.exact_permissions {
            for perm in &self.existing_permissions {
                if !self.model.permissions.contains(perm) {
                    self.changes.push(Change::remove(format!("{} permissions", self.model.name), perm.clone()));
                }
            }
        }

        self.changes.clone()
    }

    fn queue_apply(&mut self, queue: &mut dyn HubQueue) -> Vec<VirtualCallId> {
        let mut ids = Vec::new();
        for change in &self.changes {
            match change.kind {
                ChangeKind::Create => {
                    ids.push(queue.queue_call(&self.key(), NEW_GROUP, serde_json::json!({ "name": self.model.name })));
                }
                ChangeKind::Add => {
                    if let ChangePayload::Member(m) = &change.payload {
                        if change.subject.ends_with("permissions") {
                            ids.push(queue.queue_call(
                                &self.key(),
                                GRANT_PERMISSION,
                                serde_json::json!({ "userinfo": self.model.name, "permission": m }),
                            ));
                        } else {
                            ids.push(queue.queue_call(
                                &self.key(),
                                ADD_GROUP_MEMBER,
                                serde_json::json!({ "group": self.model.name, "user": m }),
                            ));
                        }
                    }
                }
                ChangeKind::Remove => {
                    if let ChangePayload::Member(m) = &change.payload {
                        if change.subject.ends_with("permissions") {
                            ids.push(queue.queue_call(
                                &self.key(),
                                REVOKE_PERMISSION,
                                serde_json::json!({ "userinfo": self.model.name, "permission": m }),
                            ));
                        } else {
                            ids.push(queue.queue_call(
                                &self.key(),
                                DROP_GROUP_MEMBER,
                                serde_json::json!({ "group": self.model.name, "user": m }),
                            ));
                        }
                    }
                }
                ChangeKind::Update | ChangeKind::Modify => {}
            }
        }
        self.state = ChangeReportState::Applied;
        ids
    }

    fn changes(&self) -> &[Change] {
        &self.changes
    }
}

// ============================================================================
// USER — existence + enabled flag + permission/group membership. Spec's
// exact-set vocabulary (exact_hosts/exact_users/exact_permissions/
// exact_groups/exact_channels/exact_packages) gives Group an
// exact_permissions flag but no equivalent names a User-side exact flag for
// its own `permissions`, and the fixed RPC vocabulary has no call to list
// "every group a user belongs to" — so there is no read path to detect a
// group membership that should be removed. Both reconciliations here are
// therefore add-only; removing a user from a group or a permission from a
// user is only reachable from the Group side (`GroupChangeReport` with
// `exact_members`/`exact_permissions`).
// ============================================================================

pub struct UserChangeReport {
    model: User,
    state: ChangeReportState,
    was_split: bool,
    existed: bool,
    existing_enabled: bool,
    existing_permissions: Vec<String>,
    group_membership: Vec<(String, bool)>,
    changes: Vec<Change>,
}

impl UserChangeReport {
    pub fn new(model: User) -> Self {
        UserChangeReport {
            model,
            state: ChangeReportState::Init,
            was_split: false,
            existed: false,
            existing_enabled: true,
            existing_permissions: Vec::new(),
            group_membership: Vec::new(),
            changes: Vec::new(),
        }
    }
}

impl ChangeReport for UserChangeReport {
    fn key(&self) -> Key {
        self.model.key()
    }

    fn state(&self) -> ChangeReportState {
        self.state
    }

    fn queue_read(&mut self, queue: &mut dyn HubQueue, was_split: bool) -> Vec<VirtualCallId> {
        self.state = ChangeReportState::ReadPending;
        self.was_split = was_split;
        if was_split {
            return Vec::new();
        }
        let mut ids = vec![
            queue.queue_call(&self.key(), GET_USER, serde_json::json!({ "userInfo": self.model.name })),
            queue.queue_call(&self.key(), GET_USER_PERMS, serde_json::json!({ "userinfo": self.model.name })),
        ];
        for group in &self.model.groups {
            ids.push(queue.queue_call(&self.key(), GET_GROUP_MEMBERS, serde_json::json!({ "group": group })));
        }
        ids
    }

    fn compare(&mut self, queue: &dyn HubQueue, read_ids: &[VirtualCallId]) -> Vec<Change> {
        self.state = ChangeReportState::Compared;
        if self.was_split {
            return self.changes.clone();
        }

        let user_result = read_ids.first().and_then(|id| queue.call_result(*id));
        self.existed = user_result.map(|v| !v.is_null()).unwrap_or(false);
        self.existing_enabled = user_result
            .and_then(|v| v.get("enabled"))
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        self.existing_permissions = extract_member_names(read_ids.get(1).and_then(|id| queue.call_result(*id)), None);

        self.group_membership = self
            .model
            .groups
            .iter()
            .zip(read_ids.iter().skip(2))
            .map(|(group, id)| {
                let members = extract_member_names(queue.call_result(*id), None);
                (group.clone(), members.iter().any(|m| m == &self.model.name))
            })
            .collect();

        if !self.existed {
            self.changes.push(Change::create(
                self.model.name.clone(),
                format!("create user {}", self.model.name),
            ));
        } else if self.existing_enabled != self.model.enabled {
            self.changes.push(Change::update(
                self.model.name.clone(),
                if self.model.enabled { "enable user" } else { "disable user" },
                serde_json::json!({ "enabled": self.model.enabled }),
            ));
        }

        for perm in &self.model.permissions {
            if !self.existing_permissions.contains(perm) {
                self.changes.push(Change::add(format!("{} permissions", self.model.name), perm.clone()));
            }
        }

        for (group, is_member) in &self.group_membership {
            if !is_member {
                self.changes.push(Change::add(format!("{} groups", self.model.name), group.clone()));
            }
        }

        self.changes.clone()
    }

    fn queue_apply(&mut self, queue: &mut dyn HubQueue) -> Vec<VirtualCallId> {
        let mut ids = Vec::new();
        for change in &self.changes {
            match change.kind {
                ChangeKind::Create => {
                    ids.push(queue.queue_call(
                        &self.key(),
                        CREATE_USER,
                        serde_json::json!({ "username": self.model.name }),
                    ));
                }
                ChangeKind::Update => {
                    let method = if self.model.enabled { ENABLE_USER } else { DISABLE_USER };
                    ids.push(queue.queue_call(&self.key(), method, serde_json::json!({ "username": self.model.name })));
                }
                ChangeKind::Add => {
                    if let ChangePayload::Member(m) = &change.payload {
                        if change.subject.ends_with("permissions") {
                            ids.push(queue.queue_call(
                                &self.key(),
                                GRANT_PERMISSION,
                                serde_json::json!({ "userinfo": self.model.name, "permission": m }),
                            ));
                        } else {
                            ids.push(queue.queue_call(
                                &self.key(),
                                ADD_GROUP_MEMBER,
                                serde_json::json!({ "group": m, "user": self.model.name }),
                            ));
                        }
                    }
                }
                ChangeKind::Remove | ChangeKind::Modify => {}
            }
        }
        self.state = ChangeReportState::Applied;
        ids
    }

    fn changes(&self) -> &[Change] {
        &self.changes
    }
}

// ============================================================================
// TARGET
// ============================================================================

pub struct TargetChangeReport {
    model: Target,
    state: ChangeReportState,
    was_split: bool,
    existed: bool,
    changes: Vec<Change>,
}

impl TargetChangeReport {
    pub fn new(model: Target) -> Self {
        TargetChangeReport {
            model,
            state: ChangeReportState::Init,
            was_split: false,
            existed: false,
            changes: Vec::new(),
        }
    }
}

impl ChangeReport for TargetChangeReport {
    fn key(&self) -> Key {
        self.model.key()
    }

    fn state(&self) -> ChangeReportState {
        self.state
    }

    fn queue_read(&mut self, queue: &mut dyn HubQueue, was_split: bool) -> Vec<VirtualCallId> {
        self.state = ChangeReportState::ReadPending;
        self.was_split = was_split;
        if was_split {
            return Vec::new();
        }
        vec![queue.queue_call(&self.key(), GET_BUILD_TARGET, serde_json::json!({ "info": self.model.name }))]
    }

    fn compare(&mut self, queue: &dyn HubQueue, read_ids: &[VirtualCallId]) -> Vec<Change> {
        self.state = ChangeReportState::Compared;
        if self.was_split {
            return self.changes.clone();
        }
        let result = read_ids.first().and_then(|id| queue.call_result(*id));
        self.existed = result.map(|v| !v.is_null()).unwrap_or(false);

        if !self.existed {
            self.changes.push(Change::create(
                self.model.name.clone(),
                format!("create build target {}", self.model.name),
            ));
            return self.changes.clone();
        }

        let build_tag_current = result.and_then(|v| v.get("build_tag_name")).and_then(|v| v.as_str());
        let dest_tag_current = result.and_then(|v| v.get("dest_tag_name")).and_then(|v| v.as_str());
        if build_tag_current != Some(self.model.build_tag.as_str()) || dest_tag_current != Some(self.model.dest_tag.as_str()) {
            self.changes.push(Change::update(
                self.model.name.clone(),
                "update build target tags",
                serde_json::json!({ "buildTag": self.model.build_tag, "destTag": self.model.dest_tag }),
            ));
        }
        self.changes.clone()
    }

    fn queue_apply(&mut self, queue: &mut dyn HubQueue) -> Vec<VirtualCallId> {
        let mut ids = Vec::new();
        for change in &self.changes {
            match change.kind {
                ChangeKind::Create => {
                    ids.push(queue.queue_call(
                        &self.key(),
                        CREATE_BUILD_TARGET,
                        serde_json::json!({ "name": self.model.name, "buildTag": self.model.build_tag, "destTag": self.model.dest_tag }),
                    ));
                }
                ChangeKind::Update => {
                    ids.push(queue.queue_call(
                        &self.key(),
                        EDIT_BUILD_TARGET,
                        serde_json::json!({ "buildTargetInfo": self.model.name, "buildTag": self.model.build_tag, "destTag": self.model.dest_tag }),
                    ));
                }
                _ => {}
            }
        }
        self.state = ChangeReportState::Applied;
        ids
    }

    fn changes(&self) -> &[Change] {
        &self.changes
    }
}

// ============================================================================
// EXTERNAL REPO
// ============================================================================

pub struct ExternalRepoChangeReport {
    model: ExternalRepo,
    state: ChangeReportState,
    was_split: bool,
    existed: bool,
    changes: Vec<Change>,
}

impl ExternalRepoChangeReport {
    pub fn new(model: ExternalRepo) -> Self {
        ExternalRepoChangeReport {
            model,
            state: ChangeReportState::Init,
            was_split: false,
            existed: false,
            changes: Vec::new(),
        }
    }
}

impl ChangeReport for ExternalRepoChangeReport {
    fn key(&self) -> Key {
        self.model.key()
    }

    fn state(&self) -> ChangeReportState {
        self.state
    }

    fn queue_read(&mut self, queue: &mut dyn HubQueue, was_split: bool) -> Vec<VirtualCallId> {
        self.state = ChangeReportState::ReadPending;
        self.was_split = was_split;
        if was_split {
            return Vec::new();
        }
        vec![queue.queue_call(&self.key(), GET_EXTERNAL_REPO, serde_json::json!({ "info": self.model.name }))]
    }

    fn compare(&mut self, queue: &dyn HubQueue, read_ids: &[VirtualCallId]) -> Vec<Change> {
        self.state = ChangeReportState::Compared;
        if self.was_split {
            return self.changes.clone();
        }
        let result = read_ids.first().and_then(|id| queue.call_result(*id));
        self.existed = result.map(|v| !v.is_null()).unwrap_or(false);

        if !self.existed {
            self.changes.push(Change::create(
                self.model.name.clone(),
                format!("create external repo {}", self.model.name),
            ));
        } else {
            let current_url = result.and_then(|v| v.get("url")).and_then(|v| v.as_str());
            if current_url != Some(self.model.url.as_str()) {
                self.changes.push(Change::update(
                    self.model.name.clone(),
                    "update external repo url",
                    serde_json::json!({ "url": self.model.url }),
                ));
            }
        }
        self.changes.clone()
    }

    fn queue_apply(&mut self, queue: &mut dyn HubQueue) -> Vec<VirtualCallId> {
        let mut ids = Vec::new();
        for change in &self.changes {
            match change.kind {
                ChangeKind::Create => {
                    ids.push(queue.queue_call(
                        &self.key(),
                        CREATE_EXTERNAL_REPO,
                        serde_json::json!({ "name": self.model.name, "url": self.model.url }),
                    ));
                }
                ChangeKind::Update => {
                    ids.push(queue.queue_call(
                        &self.key(),
                        EDIT_EXTERNAL_REPO,
                        serde_json::json!({ "info": self.model.name, "url": self.model.url }),
                    ));
                }
                _ => {}
            }
        }
        self.state = ChangeReportState::Applied;
        ids
    }

    fn changes(&self) -> &[Change] {
        &self.changes
    }
}

// ============================================================================
// TAG — the one kind whose read side genuinely needs a second round: the
// inheritance/external-repo/group data calls only make sense once `getTag`
// has confirmed the tag exists, so `queue_read` issues `getTag` as a
// `Promise` whose trigger queues them and stashes their ids for `compare`
// to pick back up.
// ============================================================================

pub struct TagChangeReport {
    model: Tag,
    state: ChangeReportState,
    was_split: bool,
    existed: bool,
    round2_ids: Arc<Mutex<Vec<VirtualCallId>>>,
    changes: Vec<Change>,
}

impl TagChangeReport {
    pub fn new(model: Tag) -> Self {
        TagChangeReport {
            model,
            state: ChangeReportState::Init,
            was_split: false,
            existed: false,
            round2_ids: Arc::new(Mutex::new(Vec::new())),
            changes: Vec::new(),
        }
    }

    fn field_payload(&self) -> Value {
        serde_json::json!({
            "arches": self.model.arches.join(" "),
            "maven_support": self.model.maven_support,
            "maven_include_all": self.model.maven_include_all,
            "locked": self.model.locked,
            "perm": self.model.permission,
        })
    }

    fn field_diff(&self, current: &Value) -> Option<Value> {
        let arches_current = current.get("arches").and_then(|v| v.as_str()).unwrap_or("");
        let maven_support_current = current.get("maven_support").and_then(|v| v.as_bool()).unwrap_or(false);
        let maven_include_all_current = current.get("maven_include_all").and_then(|v| v.as_bool()).unwrap_or(false);
        let locked_current = current.get("locked").and_then(|v| v.as_bool()).unwrap_or(false);
        let perm_current = current.get("perm").and_then(|v| v.as_str()).map(str::to_string);

        if arches_current == self.model.arches.join(" ")
            && maven_support_current == self.model.maven_support
            && maven_include_all_current == self.model.maven_include_all
            && locked_current == self.model.locked
            && perm_current == self.model.permission
        {
            return None;
        }
        Some(self.field_payload())
    }

    fn diff_inheritance(&mut self, current: &Value) {
        let mut wanted: Vec<PriorityEntry> = self.model.inherit_from.iter().cloned().map(PriorityEntry::Bare).collect();
        wanted.extend(self.model.inheritance.iter().cloned());
        let Ok(assigned) = assign_priorities(&wanted) else { return };
        let wanted_json: Vec<Value> = assigned
            .iter()
            .map(|(name, priority)| serde_json::json!({ "name": name, "priority": priority }))
            .collect();

        let current_array = current.as_array().cloned().unwrap_or_default();
        let matches = current_array.len() == wanted_json.len()
            && wanted_json
                .iter()
                .all(|w| current_array.iter().any(|c| c.get("name") == w.get("name") && c.get("priority") == w.get("priority")));
        if !matches {
            self.changes.push(Change::update(
                self.model.name.clone(),
                "rewrite inheritance",
                serde_json::json!({ "data": wanted_json }),
            ));
        }
    }

    fn diff_external_repos(&mut self, current: &Value) {
        let existing: Vec<String> = current
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|e| e.get("external_repo_name").and_then(|n| n.as_str()).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        for entry in &self.model.external_repos {
            if !existing.contains(&entry.name().to_string()) {
                self.changes.push(Change::add(format!("{} external repos", self.model.name), entry.name().to_string()));
            }
        }
        // No RPC in the fixed vocabulary detaches an external repo from a
        // tag, so removal is never attempted here.
    }

    fn diff_groups(&mut self, current: &Value) {
        let existing: Vec<(String, Vec<String>)> = current
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|g| {
                        let name = g.get("name").and_then(|n| n.as_str())?.to_string();
                        let packages = g
                            .get("packagelist")
                            .and_then(|p| p.as_array())
                            .map(|p| {
                                p.iter()
                                    .filter_map(|pkg| pkg.get("package").and_then(|n| n.as_str()).map(str::to_string))
                                    .collect()
                            })
                            .unwrap_or_default();
                        Some((name, packages))
                    })
                    .collect()
            })
            .unwrap_or_default();

        for group in &self.model.groups {
            match existing.iter().find(|(n, _)| n == &group.name) {
                None => {
                    self.changes.push(Change::add(format!("{} groups", self.model.name), group.name.clone()));
                    for pkg in &group.packages {
                        self.changes
                            .push(Change::add(format!("{} group {} packages", self.model.name, group.name), pkg.clone()));
                    }
                }
                Some((_, existing_packages)) => {
                    for pkg in &group.packages {
                        if !existing_packages.contains(pkg) {
                            self.changes
                                .push(Change::add(format!("{} group {} packages", self.model.name, group.name), pkg.clone()));
                        }
                    }
                    if group.exact_packages {
                        for pkg in existing_packages {
                            if !group.packages.contains(pkg) {
                                self.changes.push(Change::remove(
                                    format!("{} group {} packages", self.model.name, group.name),
                                    pkg.clone(),
                                ));
                            }
                        }
                    }
                }
            }
        }
    }
}

impl ChangeReport for TagChangeReport {
    fn key(&self) -> Key {
        self.model.key()
    }

    fn state(&self) -> ChangeReportState {
        self.state
    }

    fn queue_read(&mut self, queue: &mut dyn HubQueue, was_split: bool) -> Vec<VirtualCallId> {
        self.state = ChangeReportState::ReadPending;
        self.was_split = was_split;
        if was_split {
            return Vec::new();
        }
        let key = self.model.key();
        let name = self.model.name.clone();
        let round2 = self.round2_ids.clone();
        let trigger: PromiseTrigger = Box::new(move |value, queue| {
            if value.is_null() {
                return;
            }
            let ids = vec![
                queue.queue_call(&key, GET_INHERITANCE_DATA, serde_json::json!({ "tagInfo": name })),
                queue.queue_call(&key, GET_TAG_EXTERNAL_REPOS, serde_json::json!({ "tag_info": name })),
                queue.queue_call(&key, GET_TAG_GROUPS, serde_json::json!({ "tag": name })),
            ];
            *round2.lock().expect("round2_ids mutex not poisoned") = ids;
        });
        vec![queue.queue_promise(&self.model.key(), GET_TAG, serde_json::json!({ "name": self.model.name }), trigger)]
    }

    fn compare(&mut self, queue: &dyn HubQueue, read_ids: &[VirtualCallId]) -> Vec<Change> {
        self.state = ChangeReportState::Compared;
        if self.was_split {
            return self.changes.clone();
        }

        let tag_result = read_ids.first().and_then(|id| queue.call_result(*id));
        self.existed = tag_result.map(|v| !v.is_null()).unwrap_or(false);

        if !self.existed {
            self.changes.push(Change::create(self.model.name.clone(), format!("create tag {}", self.model.name)));
            self.changes
                .push(Change::update(self.model.name.clone(), "set tag fields", self.field_payload()));
        } else if let Some(current) = tag_result {
            if let Some(diff) = self.field_diff(current) {
                self.changes.push(Change::update(self.model.name.clone(), "update tag fields", diff));
            }
        }

        let round2 = self.round2_ids.lock().expect("round2_ids mutex not poisoned").clone();
        if let Some(current) = round2.first().and_then(|id| queue.call_result(*id)) {
            self.diff_inheritance(current);
        }
        if let Some(current) = round2.get(1).and_then(|id| queue.call_result(*id)) {
            self.diff_external_repos(current);
        }
        if let Some(current) = round2.get(2).and_then(|id| queue.call_result(*id)) {
            self.diff_groups(current);
        }

        self.changes.clone()
    }

    fn queue_apply(&mut self, queue: &mut dyn HubQueue) -> Vec<VirtualCallId> {
        let mut ids = Vec::new();
        let key = self.key();
        let name = self.model.name.clone();
        for change in self.changes.clone() {
            match change.kind {
                ChangeKind::Create => {
                    ids.push(queue.queue_call(&key, CREATE_TAG, serde_json::json!({ "name": name })));
                }
                ChangeKind::Update => {
                    if change.summary == "rewrite inheritance" {
                        if let ChangePayload::Fields(data) = &change.payload {
                            ids.push(queue.queue_call(
                                &key,
                                SET_INHERITANCE_DATA,
                                serde_json::json!({ "tag": name, "data": data["data"] }),
                            ));
                        }
                    } else if let ChangePayload::Fields(fields) = &change.payload {
                        ids.push(queue.queue_call(&key, EDIT_TAG2, serde_json::json!({ "tagInfo": name, "changes": fields })));
                    }
                }
                ChangeKind::Add => {
                    if let ChangePayload::Member(m) = &change.payload {
                        if change.subject.ends_with("external repos") {
                            ids.push(queue.queue_call(
                                &key,
                                ADD_EXTERNAL_REPO_TO_TAG,
                                serde_json::json!({ "tag_info": name, "repo_info": m }),
                            ));
                        } else if change.subject.contains("packages") {
                            let group_name = group_name_from_subject(&name, &change.subject);
                            ids.push(queue.queue_call(
                                &key,
                                GROUP_PACKAGE_LIST_ADD,
                                serde_json::json!({ "taginfo": name, "groupinfo": group_name, "pkg_name": m }),
                            ));
                        } else if change.subject.ends_with("groups") {
                            ids.push(queue.queue_call(
                                &key,
                                GROUP_LIST_ADD,
                                serde_json::json!({ "taginfo": name, "grpinfo": m }),
                            ));
                        }
                    }
                }
                ChangeKind::Remove => {
                    if let ChangePayload::Member(m) = &change.payload {
                        if change.subject.contains("packages") {
                            let group_name = group_name_from_subject(&name, &change.subject);
                            ids.push(queue.queue_call(
                                &key,
                                GROUP_PACKAGE_LIST_REMOVE,
                                serde_json::json!({ "taginfo": name, "groupinfo": group_name, "pkg_name": m }),
                            ));
                        } else if change.subject.ends_with("groups") {
                            ids.push(queue.queue_call(
                                &key,
                                GROUP_LIST_REMOVE,
                                serde_json::json!({ "taginfo": name, "grpinfo": m }),
                            ));
                        }
                    }
                }
                ChangeKind::Modify => {}
            }
        }
        self.state = ChangeReportState::Applied;
        ids
    }

    fn changes(&self) -> &[Change] {
        &self.changes
    }
}

/// Recovers the group name `diff_groups` embedded in a "{tag} group {group}
/// packages" subject, so `queue_apply` can dispatch the per-group package
/// calls without carrying a parallel side channel alongside `Change`.
fn group_name_from_subject(tag_name: &str, subject: &str) -> String {
    subject
        .trim_start_matches(&format!("{} group ", tag_name))
        .trim_end_matches(" packages")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeQueue {
        results: HashMap<usize, Value>,
        next_id: usize,
        calls: Vec<(String, Value)>,
    }

    impl FakeQueue {
        fn new() -> Self {
            FakeQueue { results: HashMap::new(), next_id: 0, calls: Vec::new() }
        }

        fn with_result(mut self, id: usize, value: Value) -> Self {
            self.results.insert(id, value);
            self
        }
    }

    impl HubQueue for FakeQueue {
        fn queue_call(&mut self, _key: &Key, method: &str, arguments: Value) -> VirtualCallId {
            let id = self.next_id;
            self.next_id += 1;
            self.calls.push((method.to_string(), arguments));
            VirtualCallId(id)
        }

        fn call_result(&self, id: VirtualCallId) -> Option<&Value> {
            self.results.get(&id.0)
        }

        fn queue_promise(&mut self, key: &Key, method: &str, arguments: Value, trigger: PromiseTrigger) -> VirtualCallId {
            let id = self.queue_call(key, method, arguments);
            if let Some(value) = self.results.get(&id.0).cloned() {
                trigger(value, self);
            }
            id
        }

        fn queue_processor(&mut self, inner: VirtualCallId, post: ProcessorFn) -> VirtualCallId {
            let id = self.next_id;
            self.next_id += 1;
            if let Some(value) = self.results.get(&inner.0).cloned() {
                let transformed = post(value);
                self.results.insert(id, transformed);
            }
            id
        }
    }

    #[test]
    fn test_channel_create_when_missing() {
        let model = Channel::new("builders".into()).unwrap();
        let mut report = ChannelChangeReport::new(model);
        let mut queue = FakeQueue::new()
            .with_result(0, Value::Null)
            .with_result(1, serde_json::json!([]));
        let ids = report.queue_read(&mut queue, false);
        let changes = report.compare(&queue, &ids);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Create);
    }

    #[test]
    fn test_channel_exact_hosts_removes_extra() {
        let mut model = Channel::new("builders".into()).unwrap();
        model.exact_hosts = true;
        model.hosts = vec!["keep".into()];
        let mut report = ChannelChangeReport::new(model);
        let mut queue = FakeQueue::new()
            .with_result(0, serde_json::json!({ "name": "builders" }))
            .with_result(1, serde_json::json!([{ "name": "keep" }, { "name": "drop" }]));
        let ids = report.queue_read(&mut queue, false);
        let changes = report.compare(&queue, &ids);
        assert!(changes.iter().any(|c| matches!(c.kind, ChangeKind::Remove)));
        assert!(!changes.iter().any(|c| matches!(c.kind, ChangeKind::Create)));
    }

    #[test]
    fn test_channel_skips_create_when_split() {
        let model = Channel::new("builders".into()).unwrap();
        let mut report = ChannelChangeReport::new(model);
        let mut queue = FakeQueue::new().with_result(0, serde_json::json!([]));
        let ids = report.queue_read(&mut queue, true);
        assert_eq!(ids.len(), 1); // only listHosts, no existence check

        let changes = report.compare(&queue, &ids);
        assert!(!changes.iter().any(|c| matches!(c.kind, ChangeKind::Create)));

        // A subsequent compare() call (as would happen if the processor ever
        // re-ran it) must still not resurrect a Create: was_split sticks.
        let changes_again = report.compare(&queue, &ids);
        assert!(!changes_again.iter().any(|c| matches!(c.kind, ChangeKind::Create)));
    }

    #[test]
    fn test_build_type_never_updates() {
        let model = BuildType { name: "maven".into(), pos: Default::default() };
        let mut report = BuildTypeChangeReport::new(model);
        let mut queue = FakeQueue::new().with_result(0, serde_json::json!([{ "name": "maven" }]));
        let ids = report.queue_read(&mut queue, false);
        let changes = report.compare(&queue, &ids);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_build_type_creates_when_not_listed() {
        let model = BuildType { name: "image".into(), pos: Default::default() };
        let mut report = BuildTypeChangeReport::new(model);
        let mut queue = FakeQueue::new().with_result(0, serde_json::json!(["maven", "win"]));
        let ids = report.queue_read(&mut queue, false);
        let changes = report.compare(&queue, &ids);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Create);
    }

    #[test]
    fn test_host_reconciles_channels_from_nested_field() {
        let mut model = Host::new("builder1".into()).unwrap();
        model.channels = vec!["default".into(), "extra".into()];
        model.exact_channels = true;
        let mut report = HostChangeReport::new(model);
        let mut queue = FakeQueue::new().with_result(
            0,
            serde_json::json!({ "name": "builder1", "channels": [{ "name": "default" }, { "name": "stale" }] }),
        );
        let ids = report.queue_read(&mut queue, false);
        let changes = report.compare(&queue, &ids);
        assert!(changes.iter().any(|c| matches!(c.kind, ChangeKind::Add) && matches!(&c.payload, ChangePayload::Member(m) if m == "extra")));
        assert!(changes.iter().any(|c| matches!(c.kind, ChangeKind::Remove) && matches!(&c.payload, ChangePayload::Member(m) if m == "stale")));
    }

    #[test]
    fn test_host_skips_create_when_split() {
        let model = Host::new("builder1".into()).unwrap();
        let mut report = HostChangeReport::new(model);
        let mut queue = FakeQueue::new();
        let ids = report.queue_read(&mut queue, true);
        assert!(ids.is_empty());
        let changes = report.compare(&queue, &ids);
        assert!(!changes.iter().any(|c| matches!(c.kind, ChangeKind::Create)));
    }

    #[test]
    fn test_group_reconciles_members_and_permissions_independently() {
        let mut model = Group::new("release-managers".into()).unwrap();
        model.members = vec!["alice".into()];
        model.permissions = vec!["admin".into()];
        model.exact_members = true;
        model.exact_permissions = true;
        let mut report = GroupChangeReport::new(model);
        let mut queue = FakeQueue::new()
            .with_result(0, serde_json::json!(["alice", "bob"]))
            .with_result(1, serde_json::json!(["admin", "build"]));
        let ids = report.queue_read(&mut queue, false);
        let changes = report.compare(&queue, &ids);

        assert!(changes
            .iter()
            .any(|c| matches!(c.kind, ChangeKind::Remove) && matches!(&c.payload, ChangePayload::Member(m) if m == "bob")));
        assert!(changes
            .iter()
            .any(|c| matches!(c.kind, ChangeKind::Remove) && matches!(&c.payload, ChangePayload::Member(m) if m == "build")));
        assert!(!changes.iter().any(|c| matches!(c.kind, ChangeKind::Create)));
    }

    #[test]
    fn test_group_create_when_missing() {
        let model = Group::new("release-managers".into()).unwrap();
        let mut report = GroupChangeReport::new(model);
        let mut queue = FakeQueue::new().with_result(0, Value::Null).with_result(1, Value::Null);
        let ids = report.queue_read(&mut queue, false);
        let changes = report.compare(&queue, &ids);
        assert!(changes.iter().any(|c| matches!(c.kind, ChangeKind::Create)));
    }

    #[test]
    fn test_user_permission_and_group_reconciliation_is_add_only() {
        let mut model = User::new("bob".into()).unwrap();
        model.permissions = vec!["build".into()];
        model.groups = vec!["packagers".into()];
        let mut report = UserChangeReport::new(model);
        let mut queue = FakeQueue::new()
            .with_result(0, serde_json::json!({ "name": "bob", "enabled": true }))
            .with_result(1, serde_json::json!(["admin"]))
            .with_result(2, serde_json::json!(["alice"]));
        let ids = report.queue_read(&mut queue, false);
        let changes = report.compare(&queue, &ids);

        assert!(changes
            .iter()
            .any(|c| matches!(c.kind, ChangeKind::Add) && matches!(&c.payload, ChangePayload::Member(m) if m == "build")));
        assert!(changes
            .iter()
            .any(|c| matches!(c.kind, ChangeKind::Add) && matches!(&c.payload, ChangePayload::Member(m) if m == "packagers")));
        // "admin" is present remotely but absent from the authored record;
        // with no exact-permissions flag or group-listing RPC for users, it
        // must never be removed here.
        assert!(!changes.iter().any(|c| matches!(c.kind, ChangeKind::Remove)));
    }

    #[test]
    fn test_user_disables_when_enabled_flag_flips() {
        let mut model = User::new("bob".into()).unwrap();
        model.enabled = false;
        let mut report = UserChangeReport::new(model);
        let mut queue = FakeQueue::new().with_result(0, serde_json::json!({ "name": "bob", "enabled": true }));
        let ids = report.queue_read(&mut queue, false);
        let changes = report.compare(&queue, &ids);
        assert!(changes.iter().any(|c| c.summary == "disable user"));
    }

    #[test]
    fn test_target_updates_tags_on_mismatch() {
        let model = Target { name: "f40-build".into(), build_tag: "f40-build".into(), dest_tag: "f40-updates".into(), pos: Default::default() };
        let mut report = TargetChangeReport::new(model);
        let mut queue =
            FakeQueue::new().with_result(0, serde_json::json!({ "build_tag_name": "f40-build", "dest_tag_name": "f40-candidate" }));
        let ids = report.queue_read(&mut queue, false);
        let changes = report.compare(&queue, &ids);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Update);
    }

    #[test]
    fn test_external_repo_updates_url_on_mismatch() {
        let model = ExternalRepo::new("epel".into(), "http://new".into()).unwrap();
        let mut report = ExternalRepoChangeReport::new(model);
        let mut queue = FakeQueue::new().with_result(0, serde_json::json!({ "url": "http://old" }));
        let ids = report.queue_read(&mut queue, false);
        let changes = report.compare(&queue, &ids);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Update);
    }

    #[test]
    fn test_tag_fresh_create_sets_fields_in_one_pass() {
        // Mirrors the hub's literal getTag -> createTag -> editTag2 sequence
        // for a tag that doesn't exist yet.
        let mut model = Tag::new("f40-build".into()).unwrap();
        model.arches = vec!["x86_64".into()];
        let mut report = TagChangeReport::new(model);
        let mut queue = FakeQueue::new().with_result(0, Value::Null);
        let ids = report.queue_read(&mut queue, false);
        let changes = report.compare(&queue, &ids);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].kind, ChangeKind::Create);
        assert_eq!(changes[1].summary, "set tag fields");
    }

    #[test]
    fn test_tag_promise_triggers_second_round_reads() {
        let model = Tag::new("f40-build".into()).unwrap();
        let mut report = TagChangeReport::new(model);
        let mut queue = FakeQueue::new()
            .with_result(0, serde_json::json!({ "arches": "", "maven_support": false, "maven_include_all": false, "locked": false, "perm": null }))
            .with_result(1, serde_json::json!([]))
            .with_result(2, serde_json::json!([]))
            .with_result(3, serde_json::json!([]));
        let ids = report.queue_read(&mut queue, false);
        assert_eq!(ids.len(), 1);
        // Promise firing eagerly in FakeQueue means the trigger already
        // queued the three round-2 calls by the time queue_read returns.
        let changes = report.compare(&queue, &ids);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_tag_rewrites_inheritance_on_mismatch() {
        let mut model = Tag::new("f40-build".into()).unwrap();
        model.inherit_from = vec!["f40-base".into()];
        let mut report = TagChangeReport::new(model);
        let mut queue = FakeQueue::new()
            .with_result(0, serde_json::json!({ "arches": "", "maven_support": false, "maven_include_all": false, "locked": false, "perm": null }))
            .with_result(1, serde_json::json!([]))
            .with_result(2, serde_json::json!([]))
            .with_result(3, serde_json::json!([]));
        let ids = report.queue_read(&mut queue, false);
        let changes = report.compare(&queue, &ids);
        assert!(changes.iter().any(|c| c.summary == "rewrite inheritance"));
    }

    #[test]
    fn test_tag_skips_create_when_split() {
        let model = Tag::new("f40-build".into()).unwrap();
        let mut report = TagChangeReport::new(model);
        let mut queue = FakeQueue::new();
        let ids = report.queue_read(&mut queue, true);
        assert!(ids.is_empty());
        let changes = report.compare(&queue, &ids);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_check_results_reports_missing_write_result() {
        let model = Channel::new("builders".into()).unwrap();
        let report = ChannelChangeReport::new(model);
        let queue = FakeQueue::new();
        let errors = report.check_results(&queue, &[VirtualCallId(0)]);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_check_results_clean_when_all_ids_resolved() {
        let model = Channel::new("builders".into()).unwrap();
        let report = ChannelChangeReport::new(model);
        let queue = FakeQueue::new().with_result(0, serde_json::json!({}));
        let errors = report.check_results(&queue, &[VirtualCallId(0)]);
        assert!(errors.is_empty());
    }
}
