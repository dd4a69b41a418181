//! Object model: identity, provenance, per-kind data, and change reporting.
//!
//! Mirrors the Python reference's `models/base.py` (`BaseObject`,
//! `BaseKojiObject`) generalized into Rust enum dispatch instead of a class
//! hierarchy, per the per-kind modules under `models/*.py`.

pub mod change;
pub mod kinds;

use std::path::PathBuf;

pub use crate::types::{Key, ObjectName, TypeTag};
pub use change::{Change, ChangeKind, ChangePayload, ChangeReport, ChangeReportState};
pub use kinds::*;

/// File/line provenance for an authored document, mirrors Python's
/// `__file__`/`__line__` reserved keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FilePos {
    pub file: Option<PathBuf>,
    pub line: Option<usize>,
}

impl FilePos {
    pub fn new(file: impl Into<PathBuf>, line: usize) -> Self {
        FilePos {
            file: Some(file.into()),
            line: Some(line),
        }
    }
}

impl std::fmt::Display for FilePos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{}:{}", file.display(), line),
            (Some(file), None) => write!(f, "{}", file.display()),
            _ => write!(f, "<unknown>"),
        }
    }
}

/// One hop of template-expansion provenance, mirrors Python's `__trace__`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TraceEntry {
    pub template: String,
    pub pos: FilePos,
}

pub type Trace = Vec<TraceEntry>;

/// A key that has been referenced but not yet (or never) resolved to a real
/// object. Tri-state per the core spec: unchecked, discovered (exists on the
/// hub), phantom (confirmed absent).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceholderState {
    Unchecked,
    Discovered,
    Phantom,
}

#[derive(Debug, Clone)]
pub struct Placeholder {
    pub key: Key,
    pub state: PlaceholderState,
    /// First site that referenced this key, for error messages.
    pub first_reference: Option<FilePos>,
}

impl Placeholder {
    pub fn new(key: Key) -> Self {
        Placeholder {
            key,
            state: PlaceholderState::Unchecked,
            first_reference: None,
        }
    }
}

/// Every concrete object kind this crate understands, enum-dispatched rather
/// than behind a trait object so `dependency_keys`/`can_split` stay
/// exhaustively checked at compile time.
#[derive(Debug, Clone)]
pub enum Object {
    Tag(Tag),
    Target(Target),
    User(User),
    Group(Group),
    Host(Host),
    Channel(Channel),
    ExternalRepo(ExternalRepo),
    Permission(Permission),
    ContentGenerator(ContentGenerator),
    ArchiveType(ArchiveType),
    BuildType(BuildType),
}

impl Object {
    pub fn key(&self) -> Key {
        match self {
            Object::Tag(o) => o.key(),
            Object::Target(o) => o.key(),
            Object::User(o) => o.key(),
            Object::Group(o) => o.key(),
            Object::Host(o) => o.key(),
            Object::Channel(o) => o.key(),
            Object::ExternalRepo(o) => o.key(),
            Object::Permission(o) => o.key(),
            Object::ContentGenerator(o) => o.key(),
            Object::ArchiveType(o) => o.key(),
            Object::BuildType(o) => o.key(),
        }
    }

    /// Keys this object's definition references, in authored order.
    pub fn dependency_keys(&self) -> Vec<Key> {
        match self {
            Object::Tag(o) => o.dependency_keys(),
            Object::Target(o) => o.dependency_keys(),
            Object::User(o) => o.dependency_keys(),
            Object::Group(o) => o.dependency_keys(),
            Object::Host(o) => o.dependency_keys(),
            Object::Channel(o) => o.dependency_keys(),
            Object::ExternalRepo(o) => o.dependency_keys(),
            Object::Permission(o) => o.dependency_keys(),
            Object::ContentGenerator(o) => o.dependency_keys(),
            Object::ArchiveType(o) => o.dependency_keys(),
            Object::BuildType(o) => o.dependency_keys(),
        }
    }

    /// Whether this kind may be split into an identity-only stub plus a
    /// deferred full-definition continuation, to break dependency cycles.
    /// Per core spec §3: tag, user, group, host, channel.
    pub fn can_split(&self) -> bool {
        matches!(
            self,
            Object::Tag(_) | Object::User(_) | Object::Channel(_) | Object::Group(_) | Object::Host(_)
        )
    }

    /// Produces the minimal "existence-only" copy of this object a split
    /// emits: same key, no dependency edges, no settable attributes beyond
    /// identity. Panics if the kind isn't splittable — callers must check
    /// `can_split()` first (the solver only calls this on nodes it already
    /// knows are splittable).
    pub fn split_stub(&self) -> Object {
        match self {
            Object::Tag(o) => Object::Tag(Tag::new(o.name.clone()).expect("validated at construction")),
            Object::User(o) => Object::User(User::new(o.name.clone()).expect("validated at construction")),
            Object::Group(o) => Object::Group(Group::new(o.name.clone()).expect("validated at construction")),
            Object::Host(o) => Object::Host(Host::new(o.name.clone()).expect("validated at construction")),
            Object::Channel(o) => Object::Channel(Channel::new(o.name.clone()).expect("validated at construction")),
            other => panic!("{} is not splittable", other.key()),
        }
    }

    pub fn typetag(&self) -> TypeTag {
        TypeTag::from(self.key().typetag_str())
    }

    pub fn file_pos(&self) -> &FilePos {
        match self {
            Object::Tag(o) => &o.pos,
            Object::Target(o) => &o.pos,
            Object::User(o) => &o.pos,
            Object::Group(o) => &o.pos,
            Object::Host(o) => &o.pos,
            Object::Channel(o) => &o.pos,
            Object::ExternalRepo(o) => &o.pos,
            Object::Permission(o) => &o.pos,
            Object::ContentGenerator(o) => &o.pos,
            Object::ArchiveType(o) => &o.pos,
            Object::BuildType(o) => &o.pos,
        }
    }

    /// Build a change report driver for this object. The report itself only
    /// becomes populated once `impl_read`/`impl_compare` run against a live
    /// resolver/session.
    pub fn change_report(&self) -> Box<dyn ChangeReport> {
        match self {
            Object::Tag(o) => Box::new(change::TagChangeReport::new(o.clone())),
            Object::Target(o) => Box::new(change::TargetChangeReport::new(o.clone())),
            Object::User(o) => Box::new(change::UserChangeReport::new(o.clone())),
            Object::Group(o) => Box::new(change::GroupChangeReport::new(o.clone())),
            Object::Host(o) => Box::new(change::HostChangeReport::new(o.clone())),
            Object::Channel(o) => Box::new(change::ChannelChangeReport::new(o.clone())),
            Object::ExternalRepo(o) => Box::new(change::ExternalRepoChangeReport::new(o.clone())),
            Object::Permission(o) => Box::new(change::PermissionChangeReport::new(o.clone())),
            Object::ContentGenerator(o) => {
                Box::new(change::ContentGeneratorChangeReport::new(o.clone()))
            }
            Object::ArchiveType(o) => Box::new(change::ArchiveTypeChangeReport::new(o.clone())),
            Object::BuildType(o) => Box::new(change::BuildTypeChangeReport::new(o.clone())),
        }
    }
}

/// Builds the concrete `Object` variant for a namespace record, dispatching
/// on its `type` tag. Mirrors the per-kind Python classes in
/// `models/*.py` each taking the raw document dict as its constructor
/// argument.
pub fn object_from_record(
    typetag: &str,
    mapping: &serde_yaml::Mapping,
    pos: FilePos,
) -> Result<Object, crate::error::ModelError> {
    let value = serde_yaml::Value::Mapping(mapping.clone());
    let path = pos.file.clone().unwrap_or_default();
    let line = pos.line.unwrap_or(0);
    let validation_err = |message: String| crate::error::ModelError::Validation {
        path: path.clone(),
        line,
        typetag: typetag.to_string(),
        field: "<record>".to_string(),
        message,
    };

    // Every per-kind struct's `key()` assumes its name was already validated
    // (it `.expect()`s), so check that up front rather than deserializing
    // straight into a struct that can later panic.
    let name = mapping
        .get(serde_yaml::Value::String("name".to_string()))
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    Key::new(typetag.to_string(), name.to_string())?;

    let object = match typetag {
        TypeTag::TAG => {
            let mut o: Tag = serde_yaml::from_value(value).map_err(|e| validation_err(e.to_string()))?;
            o.pos = pos;
            Object::Tag(o)
        }
        TypeTag::TARGET => {
            let mut o: Target = serde_yaml::from_value(value).map_err(|e| validation_err(e.to_string()))?;
            o.pos = pos;
            Object::Target(o)
        }
        TypeTag::USER => {
            let mut o: User = serde_yaml::from_value(value).map_err(|e| validation_err(e.to_string()))?;
            o.pos = pos;
            Object::User(o)
        }
        TypeTag::GROUP => {
            let mut o: Group = serde_yaml::from_value(value).map_err(|e| validation_err(e.to_string()))?;
            o.pos = pos;
            Object::Group(o)
        }
        TypeTag::HOST => {
            let mut o: Host = serde_yaml::from_value(value).map_err(|e| validation_err(e.to_string()))?;
            o.pos = pos;
            Object::Host(o)
        }
        TypeTag::CHANNEL => {
            let mut o: Channel = serde_yaml::from_value(value).map_err(|e| validation_err(e.to_string()))?;
            o.pos = pos;
            Object::Channel(o)
        }
        TypeTag::EXTERNAL_REPO => {
            let mut o: ExternalRepo = serde_yaml::from_value(value).map_err(|e| validation_err(e.to_string()))?;
            o.pos = pos;
            Object::ExternalRepo(o)
        }
        TypeTag::PERMISSION => {
            let mut o: Permission = serde_yaml::from_value(value).map_err(|e| validation_err(e.to_string()))?;
            o.pos = pos;
            Object::Permission(o)
        }
        TypeTag::CONTENT_GENERATOR => {
            let mut o: ContentGenerator = serde_yaml::from_value(value).map_err(|e| validation_err(e.to_string()))?;
            o.pos = pos;
            Object::ContentGenerator(o)
        }
        TypeTag::ARCHIVE_TYPE => {
            let mut o: ArchiveType = serde_yaml::from_value(value).map_err(|e| validation_err(e.to_string()))?;
            o.pos = pos;
            Object::ArchiveType(o)
        }
        TypeTag::BUILD_TYPE => {
            let mut o: BuildType = serde_yaml::from_value(value).map_err(|e| validation_err(e.to_string()))?;
            o.pos = pos;
            Object::BuildType(o)
        }
        other => {
            return Err(crate::error::ModelError::Validation {
                path,
                line,
                typetag: other.to_string(),
                field: "type".to_string(),
                message: format!("unknown object kind '{other}'"),
            })
        }
    };
    Ok(object)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_from_record_builds_tag() {
        let mapping = {
            let mut m = serde_yaml::Mapping::new();
            m.insert("type".into(), "tag".into());
            m.insert("name".into(), "f40-build".into());
            m
        };
        let object = object_from_record("tag", &mapping, FilePos::new("tags.yaml", 3)).unwrap();
        assert_eq!(object.key(), Key::new("tag", "f40-build").unwrap());
    }

    #[test]
    fn test_object_from_record_rejects_unknown_type() {
        let mapping = serde_yaml::Mapping::new();
        let result = object_from_record("widget", &mapping, FilePos::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_splittable_kinds() {
        let channel = Object::Channel(Channel::new("builders".into()).unwrap());
        assert!(channel.can_split());
        let tag = Object::Tag(Tag::new("f40-build".into()).unwrap());
        assert!(tag.can_split());
        let user = Object::User(User::new("alice".into()).unwrap());
        assert!(user.can_split());
        let repo = Object::ExternalRepo(ExternalRepo::new("epel".into(), "http://x".into()).unwrap());
        assert!(!repo.can_split());
    }

    #[test]
    fn test_split_stub_strips_attributes() {
        let mut tag = Tag::new("f40-build".into()).unwrap();
        tag.arches = vec!["x86_64".into()];
        tag.locked = true;
        let stub = Object::Tag(tag).split_stub();
        match stub {
            Object::Tag(t) => {
                assert_eq!(t.name, "f40-build");
                assert!(t.arches.is_empty());
                assert!(!t.locked);
            }
            _ => panic!("expected Tag"),
        }
    }

    #[test]
    fn test_placeholder_starts_unchecked() {
        let key = Key::new("tag", "f40-build").unwrap();
        let p = Placeholder::new(key.clone());
        assert_eq!(p.state, PlaceholderState::Unchecked);
        assert_eq!(p.key, key);
    }
}
