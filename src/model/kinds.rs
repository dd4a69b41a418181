//! Per-kind object structs and their dependency-edge/split contracts.
//!
//! Field sets and `dependency_keys()` bodies are grounded directly on the
//! Python reference's `models/{tag,target,user,group,host,channel,
//! external_repo,permission,content_generator,archive_type,build_type}.py`.

use serde::{Deserialize, Serialize};

use super::FilePos;
use crate::types::{Key, KeyError};

/// A bare name or an explicit `{parent, priority}` / `{name, priority}`
/// entry in a priority-keyed list (tag inheritance, external-repo links).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PriorityEntry {
    Bare(String),
    Explicit { name: String, priority: u32 },
}

impl PriorityEntry {
    pub fn name(&self) -> &str {
        match self {
            PriorityEntry::Bare(s) => s,
            PriorityEntry::Explicit { name, .. } => name,
        }
    }
}

/// Resolves bare-string priorities against explicit ones per the core spec's
/// priority-assignment rule: bare entries get `10 * index`; once an explicit
/// priority is present, subsequent bare entries continue from
/// `max(existing) + 10`. Duplicate explicit priorities are rejected.
pub fn assign_priorities(entries: &[PriorityEntry]) -> Result<Vec<(String, u32)>, String> {
    let mut seen_explicit = std::collections::HashSet::new();
    for e in entries {
        if let PriorityEntry::Explicit { priority, .. } = e {
            if !seen_explicit.insert(*priority) {
                return Err(format!("duplicate explicit priority {}", priority));
            }
        }
    }

    let mut out = Vec::with_capacity(entries.len());
    let mut next_bare = 0u32;
    let mut max_seen = 0u32;
    for (i, e) in entries.iter().enumerate() {
        match e {
            PriorityEntry::Explicit { name, priority } => {
                out.push((name.clone(), *priority));
                max_seen = max_seen.max(*priority);
            }
            PriorityEntry::Bare(name) => {
                let assigned = if next_bare == 0 && max_seen == 0 {
                    10 * i as u32
                } else {
                    max_seen + 10
                };
                max_seen = max_seen.max(assigned);
                next_bare += 1;
                out.push((name.clone(), assigned));
            }
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Tar,
    Zip,
}

// ============================================================================
// TAG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagGroupSpec {
    pub name: String,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default, rename = "exact-packages")]
    pub exact_packages: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default, rename = "inherit-from")]
    pub inherit_from: Vec<String>,
    #[serde(default)]
    pub inheritance: Vec<PriorityEntry>,
    #[serde(default, rename = "external-repos")]
    pub external_repos: Vec<PriorityEntry>,
    #[serde(default)]
    pub arches: Vec<String>,
    #[serde(default, rename = "maven-support")]
    pub maven_support: bool,
    #[serde(default, rename = "maven-include-all")]
    pub maven_include_all: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub permission: Option<String>,
    #[serde(default)]
    pub groups: Vec<TagGroupSpec>,
    #[serde(skip)]
    pub pos: FilePos,
}

impl Tag {
    pub fn new(name: String) -> Result<Self, KeyError> {
        Key::new("tag", name.clone())?;
        Ok(Tag {
            name,
            parent: None,
            inherit_from: Vec::new(),
            inheritance: Vec::new(),
            external_repos: Vec::new(),
            arches: Vec::new(),
            maven_support: false,
            maven_include_all: false,
            locked: false,
            permission: None,
            groups: Vec::new(),
            pos: FilePos::default(),
        })
    }

    pub fn key(&self) -> Key {
        Key::new("tag", self.name.clone()).expect("validated at construction")
    }

    /// Dependency order: inheritance parents, then external-repos, then the
    /// optional permission. Mirrors `tag.py`'s `dependent_keys()`.
    pub fn dependency_keys(&self) -> Vec<Key> {
        let mut keys = Vec::new();
        if let Some(parent) = &self.parent {
            keys.push(Key::new("tag", parent.clone()).expect("validated name"));
        }
        for name in &self.inherit_from {
            keys.push(Key::new("tag", name.clone()).expect("validated name"));
        }
        for entry in &self.inheritance {
            keys.push(Key::new("tag", entry.name().to_string()).expect("validated name"));
        }
        for entry in &self.external_repos {
            keys.push(Key::new("external-repo", entry.name().to_string()).expect("validated name"));
        }
        if let Some(perm) = &self.permission {
            keys.push(Key::new("permission", perm.clone()).expect("validated name"));
        }
        keys
    }
}

// ============================================================================
// TARGET
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    #[serde(rename = "build-tag")]
    pub build_tag: String,
    #[serde(rename = "dest-tag")]
    pub dest_tag: String,
    #[serde(skip)]
    pub pos: FilePos,
}

impl Target {
    pub fn key(&self) -> Key {
        Key::new("target", self.name.clone()).expect("validated at construction")
    }

    pub fn dependency_keys(&self) -> Vec<Key> {
        vec![
            Key::new("tag", self.build_tag.clone()).expect("validated name"),
            Key::new("tag", self.dest_tag.clone()).expect("validated name"),
        ]
    }
}

// ============================================================================
// USER
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default, rename = "exact-groups")]
    pub exact_groups: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(skip)]
    pub pos: FilePos,
}

fn default_true() -> bool {
    true
}

impl User {
    pub fn new(name: String) -> Result<Self, KeyError> {
        Key::new("user", name.clone())?;
        Ok(User {
            name,
            groups: Vec::new(),
            permissions: Vec::new(),
            exact_groups: false,
            enabled: true,
            pos: FilePos::default(),
        })
    }

    pub fn key(&self) -> Key {
        Key::new("user", self.name.clone()).expect("validated at construction")
    }

    /// Depends on its groups and granted permissions, mirroring `user.py`'s
    /// `dependent_keys()`. This is what makes a user/group membership cycle
    /// (group depends on its member users, a user depends on its groups)
    /// reachable, broken by splitting either side (both kinds are
    /// splittable).
    pub fn dependency_keys(&self) -> Vec<Key> {
        let mut keys = Vec::new();
        for group in &self.groups {
            keys.push(Key::new("group", group.clone()).expect("validated name"));
        }
        for perm in &self.permissions {
            keys.push(Key::new("permission", perm.clone()).expect("validated name"));
        }
        keys
    }
}

// ============================================================================
// GROUP
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default, rename = "exact-members")]
    pub exact_members: bool,
    #[serde(default, rename = "exact-permissions")]
    pub exact_permissions: bool,
    #[serde(skip)]
    pub pos: FilePos,
}

impl Group {
    pub fn new(name: String) -> Result<Self, KeyError> {
        Key::new("group", name.clone())?;
        Ok(Group {
            name,
            tag: None,
            members: Vec::new(),
            permissions: Vec::new(),
            exact_members: false,
            exact_permissions: false,
            pos: FilePos::default(),
        })
    }

    pub fn key(&self) -> Key {
        Key::new("group", self.name.clone()).expect("validated at construction")
    }

    pub fn dependency_keys(&self) -> Vec<Key> {
        let mut keys = Vec::new();
        if let Some(tag) = &self.tag {
            keys.push(Key::new("tag", tag.clone()).expect("validated name"));
        }
        for member in &self.members {
            keys.push(Key::new("user", member.clone()).expect("validated name"));
        }
        for perm in &self.permissions {
            keys.push(Key::new("permission", perm.clone()).expect("validated name"));
        }
        keys
    }
}

// ============================================================================
// HOST
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub name: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub arches: Vec<String>,
    #[serde(default)]
    pub capacity: Option<f64>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, rename = "exact-channels")]
    pub exact_channels: bool,
    #[serde(skip)]
    pub pos: FilePos,
}

impl Host {
    pub fn new(name: String) -> Result<Self, KeyError> {
        Key::new("host", name.clone())?;
        Ok(Host {
            name,
            user: None,
            channels: Vec::new(),
            arches: Vec::new(),
            capacity: None,
            enabled: true,
            exact_channels: false,
            pos: FilePos::default(),
        })
    }

    pub fn key(&self) -> Key {
        Key::new("host", self.name.clone()).expect("validated at construction")
    }

    /// Depends on its owning user and the channels it's a member of,
    /// mirroring `host.py`'s `dependent_keys()`. The channel edge is what
    /// makes a channel/host cycle (channel lists a host, host lists the
    /// channel back) reachable — both kinds are splittable, so the solver
    /// breaks it rather than failing.
    pub fn dependency_keys(&self) -> Vec<Key> {
        let mut keys = Vec::new();
        if let Some(user) = &self.user {
            keys.push(Key::new("user", user.clone()).expect("validated name"));
        }
        for channel in &self.channels {
            keys.push(Key::new("channel", channel.clone()).expect("validated name"));
        }
        keys
    }
}

// ============================================================================
// CHANNEL
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default, rename = "exact-hosts")]
    pub exact_hosts: bool,
    #[serde(skip)]
    pub pos: FilePos,
}

impl Channel {
    pub fn new(name: String) -> Result<Self, KeyError> {
        Key::new("channel", name.clone())?;
        Ok(Channel {
            name,
            description: None,
            hosts: Vec::new(),
            exact_hosts: false,
            pos: FilePos::default(),
        })
    }

    pub fn key(&self) -> Key {
        Key::new("channel", self.name.clone()).expect("validated at construction")
    }

    /// Channels depend on the hosts they list, matching `channel.py`'s
    /// `dependency_keys()`.
    pub fn dependency_keys(&self) -> Vec<Key> {
        self.hosts
            .iter()
            .map(|h| Key::new("host", h.clone()).expect("validated name"))
            .collect()
    }
}

// ============================================================================
// EXTERNAL REPO
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalRepo {
    pub name: String,
    pub url: String,
    #[serde(skip)]
    pub pos: FilePos,
}

impl ExternalRepo {
    pub fn new(name: String, url: String) -> Result<Self, KeyError> {
        Key::new("external-repo", name.clone())?;
        Ok(ExternalRepo {
            name,
            url,
            pos: FilePos::default(),
        })
    }

    pub fn key(&self) -> Key {
        Key::new("external-repo", self.name.clone()).expect("validated at construction")
    }

    pub fn dependency_keys(&self) -> Vec<Key> {
        Vec::new()
    }
}

// ============================================================================
// PERMISSION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(skip)]
    pub pos: FilePos,
}

impl Permission {
    pub fn key(&self) -> Key {
        Key::new("permission", self.name.clone()).expect("validated at construction")
    }

    pub fn dependency_keys(&self) -> Vec<Key> {
        Vec::new()
    }
}

// ============================================================================
// CONTENT GENERATOR
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentGenerator {
    pub name: String,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default, rename = "exact-users")]
    pub exact_users: bool,
    #[serde(skip)]
    pub pos: FilePos,
}

impl ContentGenerator {
    pub fn key(&self) -> Key {
        Key::new("content-generator", self.name.clone()).expect("validated at construction")
    }

    pub fn dependency_keys(&self) -> Vec<Key> {
        self.users
            .iter()
            .map(|u| Key::new("user", u.clone()).expect("validated name"))
            .collect()
    }
}

// ============================================================================
// ARCHIVE TYPE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveType {
    pub name: String,
    pub description: String,
    #[serde(default, deserialize_with = "dedup_extensions")]
    pub extensions: Vec<String>,
    #[serde(default, rename = "compression-type")]
    pub compression: Option<Compression>,
    #[serde(skip)]
    pub pos: FilePos,
}

fn dedup_extensions<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Vec<String> = Vec::deserialize(deserializer)?;
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for ext in raw {
        let stripped = ext.trim_start_matches('.').to_string();
        if seen.insert(stripped.clone()) {
            out.push(stripped);
        }
    }
    Ok(out)
}

impl ArchiveType {
    pub fn key(&self) -> Key {
        Key::new("archive-type", self.name.clone()).expect("validated at construction")
    }

    pub fn dependency_keys(&self) -> Vec<Key> {
        Vec::new()
    }
}

// ============================================================================
// BUILD TYPE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildType {
    pub name: String,
    #[serde(skip)]
    pub pos: FilePos,
}

impl BuildType {
    pub fn key(&self) -> Key {
        Key::new("build-type", self.name.clone()).expect("validated at construction")
    }

    /// Koji never supports editing build types once created.
    pub fn dependency_keys(&self) -> Vec<Key> {
        Vec::new()
    }
}
