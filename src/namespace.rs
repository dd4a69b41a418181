//! Deferred-expansion namespace: the fixed-point loop that turns authored
//! YAML documents (objects, template invocations, template definitions)
//! into fully-expanded objects.
//!
//! Grounded almost directly on `original_source/koji_habitude/namespace.py`
//! — same states, same loop shape, translated from Python's dict/list feed
//! line to an explicit `VecDeque`.

use std::collections::{HashMap, VecDeque};

use serde_yaml::{Mapping, Value};

use crate::error::{NamespaceError, TemplateError};
use crate::model::FilePos;
use crate::template::{record_to_template, Template};
use crate::types::{Key, TypeTag};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redefine {
    Error,
    Ignore,
    IgnoreWarn,
    Allow,
    AllowWarn,
}

impl Default for Redefine {
    fn default() -> Self {
        Redefine::Error
    }
}

/// One item waiting to be expanded: either a ready-to-emit object record or
/// a template invocation that still needs rendering.
enum FeedItem {
    Record(Mapping, FilePos),
    Invocation { template_name: String, params: Mapping, pos: FilePos },
}

/// Holds fully-expanded object records keyed by identity, plus known
/// template definitions. `expand()` runs the documents fed in through
/// `feed()` to a fixed point.
pub struct Namespace {
    redefine: Redefine,
    max_depth: usize,
    /// When set, fed documents that classify as core objects are discarded
    /// rather than recorded — used while scanning a template-only directory,
    /// mirrors `TemplateNamespace`'s no-op `add()`.
    template_only: bool,
    templates: HashMap<String, Template>,
    records: HashMap<Key, Mapping>,
    record_order: Vec<Key>,
    defined_at: HashMap<Key, FilePos>,
    feed: VecDeque<FeedItem>,
    /// Invocations that couldn't resolve a template this round; re-queued
    /// next round. If a round makes no progress, it's a deadlock.
    deferred: Vec<(String, Mapping, FilePos)>,
}

impl Namespace {
    pub fn new(redefine: Redefine) -> Self {
        Namespace {
            redefine,
            max_depth: 100,
            template_only: false,
            templates: HashMap::new(),
            records: HashMap::new(),
            record_order: Vec::new(),
            defined_at: HashMap::new(),
            feed: VecDeque::new(),
            deferred: Vec::new(),
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Collects only template definitions from whatever is fed in; object
    /// records (direct or from a rendered invocation) are silently dropped.
    /// Used for loading a templates-only directory ahead of the real run.
    pub fn with_template_only(mut self) -> Self {
        self.template_only = true;
        self
    }

    pub fn define_template(&mut self, template: Template) {
        self.templates.insert(template.name.clone(), template);
    }

    /// Hands template definitions out so the caller can seed another
    /// namespace with them (used to move template-directory definitions
    /// into the namespace that actually expands data documents).
    pub fn take_templates(&mut self) -> Vec<Template> {
        std::mem::take(&mut self.templates).into_values().collect()
    }

    pub fn templates_ref(&self) -> impl Iterator<Item = &Template> {
        self.templates.values()
    }

    pub fn feed_record(&mut self, record: Mapping, pos: FilePos) {
        self.feed.push_back(FeedItem::Record(record, pos));
    }

    pub fn feed_invocation(&mut self, template_name: impl Into<String>, params: Mapping, pos: FilePos) {
        self.feed.push_back(FeedItem::Invocation {
            template_name: template_name.into(),
            params,
            pos,
        });
    }

    /// Classifies a raw document by its `type` field and routes it:
    /// `type: template` defines a template immediately, a recognized core
    /// kind feeds as an object record, anything else is a template
    /// invocation naming that template. Mirrors the Python reference's
    /// `Namespace.to_object()` / `typemap` dispatch, where an unrecognized
    /// type falls through to `TemplateCall`.
    pub fn feed_document(&mut self, mapping: Mapping, pos: FilePos) -> Result<(), NamespaceError> {
        let typetag = mapping
            .get(Value::String("type".to_string()))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        if typetag == TypeTag::TEMPLATE {
            let template = record_to_template(&mapping, pos).map_err(NamespaceError::Template)?;
            self.define_template(template);
            return Ok(());
        }

        if TypeTag::from(typetag.as_str()).is_core_kind() {
            if !self.template_only {
                self.feed_record(mapping, pos);
            }
            return Ok(());
        }

        self.feed_invocation(typetag, mapping, pos);
        Ok(())
    }

    /// Runs the fixed-point loop: drain the feed line, rendering
    /// invocations (which may enqueue more items) until empty, retrying
    /// deferred invocations whose template became known mid-run. Declares
    /// deadlock if a full pass over the deferred set makes no progress.
    pub fn expand(&mut self) -> Result<(), NamespaceError> {
        self.expand_inner(0)
    }

    fn expand_inner(&mut self, depth: usize) -> Result<(), NamespaceError> {
        if depth > self.max_depth {
            return Err(NamespaceError::MaxDepthExceeded {
                site: "<namespace>".to_string(),
                max_depth: self.max_depth,
            });
        }

        while let Some(item) = self.feed.pop_front() {
            match item {
                FeedItem::Record(record, pos) => self.ingest_record(record, pos)?,
                FeedItem::Invocation { template_name, params, pos } => {
                    self.expand_invocation(template_name, params, pos)?;
                }
            }
        }

        if self.deferred.is_empty() {
            return Ok(());
        }

        let pending = std::mem::take(&mut self.deferred);
        let mut progressed = false;
        for (template_name, params, pos) in pending {
            if self.templates.contains_key(&template_name) {
                progressed = true;
                self.feed.push_back(FeedItem::Invocation { template_name, params, pos });
            } else {
                self.deferred.push((template_name, params, pos));
            }
        }

        if !progressed {
            let (template_name, _, pos) = self.deferred.remove(0);
            return Err(NamespaceError::ExpansionDeadlock {
                site: pos.to_string(),
                template_name,
            });
        }

        self.expand_inner(depth + 1)
    }

    fn expand_invocation(&mut self, template_name: String, params: Mapping, pos: FilePos) -> Result<(), NamespaceError> {
        let Some(template) = self.templates.get(&template_name) else {
            self.deferred.push((template_name, params, pos));
            return Ok(());
        };

        let records = template.render(&params).map_err(NamespaceError::Template)?;
        for mut record in records {
            crate::template::stamp_provenance(&mut record, &pos, &mut Vec::new(), &template_name);
            // A rendered record might itself be a template definition or a
            // further invocation (e.g. a template that emits template
            // calls), so it gets reclassified rather than assumed to be a
            // plain object record.
            self.feed_document(record, pos.clone())?;
        }
        Ok(())
    }

    fn ingest_record(&mut self, record: Mapping, pos: FilePos) -> Result<(), NamespaceError> {
        let typetag = record
            .get(Value::String("type".to_string()))
            .and_then(|v| v.as_str())
            .unwrap_or("object")
            .to_string();
        let name = record
            .get(Value::String("name".to_string()))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let key = Key::new(typetag, name).map_err(|e| {
            NamespaceError::Template(TemplateError::InvalidDefinition {
                template: "<record>".to_string(),
                message: e.to_string(),
            })
        })?;

        if let Some(first) = self.defined_at.get(&key) {
            match self.redefine {
                Redefine::Error => {
                    return Err(NamespaceError::Redefined {
                        key_or_name: key.to_string(),
                        first: first.to_string(),
                        second: pos.to_string(),
                    })
                }
                Redefine::Ignore | Redefine::IgnoreWarn => return Ok(()),
                Redefine::Allow | Redefine::AllowWarn => {}
            }
        }

        self.defined_at.insert(key.clone(), pos);
        if !self.records.contains_key(&key) {
            self.record_order.push(key.clone());
        }
        self.records.insert(key, record);
        Ok(())
    }

    pub fn records(&self) -> impl Iterator<Item = (&Key, &Mapping)> {
        self.record_order.iter().map(move |k| (k, &self.records[k]))
    }

    pub fn get(&self, key: &Key) -> Option<&Mapping> {
        self.records.get(key)
    }

    /// Where a record's authoritative definition was read from (the site
    /// kept on redefinition per `redefine`), for provenance once it's
    /// converted into an `Object`.
    pub fn defined_at(&self, key: &Key) -> Option<&FilePos> {
        self.defined_at.get(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
