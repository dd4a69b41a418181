//! NewType wrappers for identity and configuration values.
//!
//! Mirrors the validated-newtype idiom used throughout this crate: a thin
//! wrapper, a `::new` constructor that validates, and a paired `thiserror`
//! error enum.

use std::fmt;
use std::str::FromStr;

use crate::smart_string::SmartString;

// ============================================================================
// TYPE TAG
// ============================================================================

/// Short string naming an object kind (`tag`, `user`, `target`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeTag(SmartString);

impl TypeTag {
    pub const TAG: &'static str = "tag";
    pub const TARGET: &'static str = "target";
    pub const USER: &'static str = "user";
    pub const GROUP: &'static str = "group";
    pub const HOST: &'static str = "host";
    pub const CHANNEL: &'static str = "channel";
    pub const EXTERNAL_REPO: &'static str = "external-repo";
    pub const PERMISSION: &'static str = "permission";
    pub const CONTENT_GENERATOR: &'static str = "content-generator";
    pub const ARCHIVE_TYPE: &'static str = "archive-type";
    pub const BUILD_TYPE: &'static str = "build-type";
    pub const TEMPLATE: &'static str = "template";

    pub fn new(tag: impl AsRef<str>) -> Result<Self, TypeTagError> {
        let tag = tag.as_ref();
        if tag.trim().is_empty() {
            return Err(TypeTagError::Empty);
        }
        Ok(TypeTag(SmartString::from(tag)))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_core_kind(&self) -> bool {
        matches!(
            self.as_str(),
            "tag" | "target" | "user" | "group" | "host" | "channel"
                | "external-repo" | "permission" | "content-generator"
                | "archive-type" | "build-type"
        )
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TypeTag {
    type Err = TypeTagError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TypeTag::new(s)
    }
}

impl From<&str> for TypeTag {
    fn from(s: &str) -> Self {
        TypeTag(SmartString::from(s))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TypeTagError {
    #[error("type tag cannot be empty")]
    Empty,
}

// ============================================================================
// OBJECT NAME
// ============================================================================

/// Non-empty, trimmed object name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectName(String);

impl ObjectName {
    pub fn new(name: impl AsRef<str>) -> Result<Self, ObjectNameError> {
        let trimmed = name.as_ref().trim();
        if trimmed.is_empty() {
            return Err(ObjectNameError::Empty);
        }
        Ok(ObjectName(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ObjectNameError {
    #[error("object name cannot be empty after trimming")]
    Empty,
}

// ============================================================================
// KEY
// ============================================================================

/// Identity tuple `(type-tag, name)` uniquely identifying every object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    pub typetag: TypeTag,
    pub name: ObjectName,
}

impl Key {
    pub fn new(typetag: impl Into<String>, name: impl Into<String>) -> Result<Self, KeyError> {
        let typetag = TypeTag::new(typetag.into()).map_err(KeyError::TypeTag)?;
        let name = ObjectName::new(name.into()).map_err(KeyError::Name)?;
        Ok(Key { typetag, name })
    }

    pub fn typetag_str(&self) -> &str {
        self.typetag.as_str()
    }

    pub fn name_str(&self) -> &str {
        self.name.as_str()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.typetag, self.name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error(transparent)]
    TypeTag(#[from] TypeTagError),
    #[error(transparent)]
    Name(#[from] ObjectNameError),
}

// ============================================================================
// PROFILE NAME
// ============================================================================

/// Hub connection profile selector (`--profile`, `KOJI_SYNC_PROFILE`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileName(String);

impl ProfileName {
    pub fn new(name: impl Into<String>) -> Result<Self, ProfileNameError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ProfileNameError::Empty);
        }
        Ok(ProfileName(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ProfileName {
    fn default() -> Self {
        ProfileName("koji".to_string())
    }
}

impl fmt::Display for ProfileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProfileNameError {
    #[error("profile name cannot be empty")]
    Empty,
}

// ============================================================================
// TEMPLATE NAME
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateName(String);

impl TemplateName {
    pub fn new(name: impl Into<String>) -> Result<Self, TemplateNameError> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(TemplateNameError::Empty);
        }
        Ok(TemplateName(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TemplateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateNameError {
    #[error("template name cannot be empty")]
    Empty,
}

// ============================================================================
// TESTS
// ============================================================================
