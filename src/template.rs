//! Template engine: opaque rendering contract plus a bundled
//! `${name}`-substitution renderer.
//!
//! A real Jinja2-style engine is out of core scope (see SPEC_FULL.md §4.2);
//! `Template::render` is the seam a caller plugs a real engine into. The
//! bundled `simple` renderer generalizes this crate's earlier single-pass
//! `${name}` tokenizer from single-string interpolation to whole-document
//! substitution, grounded structurally (trace/file/line propagation) on
//! `original_source/koji_habitude/templates.py`'s `render_and_load`.

use std::collections::HashMap;
use std::ops::Range;

use serde::Deserialize as _;
use serde_yaml::{Mapping, Value};

use crate::error::TemplateError;
use crate::model::{FilePos, TraceEntry};

/// A `${name}` placeholder token found while scanning a template body.
#[derive(Debug, Clone)]
enum Token {
    Literal(Range<usize>),
    Placeholder(String),
}

fn tokenize(body: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = body.char_indices().peekable();
    let mut literal_start = 0;

    while let Some((i, ch)) = chars.next() {
        if ch == '$' && chars.peek().map(|(_, c)| *c) == Some('{') {
            if i > literal_start {
                tokens.push(Token::Literal(literal_start..i));
            }
            chars.next(); // consume '{'
            let name_start = i + 2;
            let mut name_end = name_start;
            while let Some((j, c)) = chars.peek().copied() {
                if c == '}' {
                    name_end = j;
                    chars.next();
                    break;
                }
                chars.next();
                name_end = j + c.len_utf8();
            }
            tokens.push(Token::Placeholder(body[name_start..name_end].trim().to_string()));
            literal_start = name_end + 1;
        }
    }
    if literal_start < body.len() {
        tokens.push(Token::Literal(literal_start..body.len()));
    }
    tokens
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
    }
}

/// Substitutes every `${name}` in `body` using `params`, falling back to
/// `defaults`, erroring on any name in `required` absent from both.
pub fn substitute(
    body: &str,
    params: &Mapping,
    defaults: &HashMap<String, Value>,
    required: &[String],
    template_name: &str,
    site: &str,
) -> Result<String, TemplateError> {
    for name in required {
        let key = Value::String(name.clone());
        if !params.contains_key(&key) && !defaults.contains_key(name) {
            return Err(TemplateError::MissingParameter {
                template: template_name.to_string(),
                parameter: name.clone(),
                site: site.to_string(),
            });
        }
    }

    let mut out = String::with_capacity(body.len());
    for token in tokenize(body) {
        match token {
            Token::Literal(range) => out.push_str(&body[range]),
            Token::Placeholder(name) => {
                let key = Value::String(name.clone());
                let value = params
                    .get(&key)
                    .or_else(|| defaults.get(&name))
                    .cloned()
                    .unwrap_or(Value::Null);
                out.push_str(&value_to_text(&value));
            }
        }
    }
    Ok(out)
}

/// Opaque render function every `Template` carries: takes the invocation's
/// parameter mapping, returns zero, one, or many rendered records.
pub type RenderFn = Box<dyn Fn(&Mapping) -> Result<Vec<Mapping>, TemplateError> + Send + Sync>;

pub struct Template {
    pub name: String,
    pub defaults: HashMap<String, Value>,
    pub required: Vec<String>,
    pub pos: FilePos,
    render: RenderFn,
}

impl Template {
    pub fn new(name: impl Into<String>, pos: FilePos, render: RenderFn) -> Self {
        Template {
            name: name.into(),
            defaults: HashMap::new(),
            required: Vec::new(),
            pos,
            render,
        }
    }

    pub fn render(&self, params: &Mapping) -> Result<Vec<Mapping>, TemplateError> {
        (self.render)(params)
    }

    /// Builds the bundled `${name}`-substitution renderer over a raw
    /// multi-document YAML body.
    pub fn simple(name: impl Into<String>, pos: FilePos, body: impl Into<String>) -> Self {
        Self::simple_with_schema(name, pos, body, HashMap::new(), Vec::new())
    }

    /// Same as `simple`, but captures `defaults`/`required` for validation.
    pub fn simple_with_schema(
        name: impl Into<String>,
        pos: FilePos,
        body: impl Into<String>,
        defaults: HashMap<String, Value>,
        required: Vec<String>,
    ) -> Self {
        let name = name.into();
        let body = body.into();
        let name_for_render = name.clone();
        let defaults_for_render = defaults.clone();
        let required_for_render = required.clone();
        let render: RenderFn = Box::new(move |params: &Mapping| {
            simple_render(&name_for_render, &body, params, &defaults_for_render, &required_for_render)
        });
        Template {
            name,
            defaults,
            required,
            pos,
            render,
        }
    }
}

fn simple_render(
    name: &str,
    body: &str,
    params: &Mapping,
    defaults: &HashMap<String, Value>,
    required: &[String],
) -> Result<Vec<Mapping>, TemplateError> {
    let rendered_text = substitute(body, params, defaults, required, name, "<invocation>")?;
    let mut records = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(&rendered_text) {
        let value = Value::deserialize(doc).map_err(|e| TemplateError::RenderFailed {
            template: name.to_string(),
            message: e.to_string(),
        })?;
        if value.is_null() {
            continue;
        }
        match value {
            Value::Mapping(m) => records.push(m),
            _ => {
                return Err(TemplateError::RenderFailed {
                    template: name.to_string(),
                    message: "rendered document is not a mapping".to_string(),
                })
            }
        }
    }
    Ok(records)
}

/// Builds a `Template` from a `type: template` document: `name` plus
/// either a `template:` inline body or a `template_file:` path relative to
/// the document's own directory, mirroring
/// `original_source/koji_habitude/templates.py`'s `Template.__init__`
/// (`template_content` vs `template_file`, mutually exclusive).
pub fn record_to_template(record: &Mapping, pos: FilePos) -> Result<Template, TemplateError> {
    let get_str = |key: &str| record.get(Value::String(key.to_string())).and_then(|v| v.as_str());

    let name = get_str("name").ok_or_else(|| TemplateError::InvalidDefinition {
        template: "<unnamed>".to_string(),
        message: "template document missing 'name'".to_string(),
    })?;

    let body = if let Some(inline) = get_str("template") {
        inline.to_string()
    } else if let Some(file) = get_str("template_file") {
        let base = pos.file.as_ref().and_then(|f| f.parent()).map(|p| p.to_path_buf()).unwrap_or_default();
        std::fs::read_to_string(base.join(file)).map_err(|e| TemplateError::InvalidDefinition {
            template: name.to_string(),
            message: format!("reading template_file '{file}': {e}"),
        })?
    } else {
        return Err(TemplateError::InvalidDefinition {
            template: name.to_string(),
            message: "template document needs 'template' or 'template_file'".to_string(),
        });
    };

    Ok(Template::simple(name.to_string(), pos, body))
}

/// Stamps provenance onto a freshly rendered record: file/line from the
/// invocation site, plus an appended trace hop naming the template.
pub fn stamp_provenance(record: &mut Mapping, pos: &FilePos, trace: &mut Vec<TraceEntry>, template_name: &str) {
    record.insert(
        Value::String("__file__".to_string()),
        pos.file
            .as_ref()
            .map(|f| Value::String(f.display().to_string()))
            .unwrap_or(Value::Null),
    );
    record.insert(
        Value::String("__line__".to_string()),
        pos.line.map(|l| Value::Number(l.into())).unwrap_or(Value::Null),
    );
    trace.push(TraceEntry {
        template: template_name.to_string(),
        pos: pos.clone(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(pairs: &[(&str, &str)]) -> Mapping {
        let mut m = Mapping::new();
        for (k, v) in pairs {
            m.insert(Value::String(k.to_string()), Value::String(v.to_string()));
        }
        m
    }

    #[test]
    fn test_substitute_replaces_placeholder() {
        let out = substitute("name: ${who}", &mapping(&[("who", "world")]), &HashMap::new(), &[], "t", "site").unwrap();
        assert_eq!(out, "name: world");
    }

    #[test]
    fn test_substitute_falls_back_to_default() {
        let defaults = HashMap::from([("who".to_string(), Value::String("default".to_string()))]);
        let out = substitute("name: ${who}", &Mapping::new(), &defaults, &[], "t", "site").unwrap();
        assert_eq!(out, "name: default");
    }

    #[test]
    fn test_missing_required_parameter_errors() {
        let required = vec!["who".to_string()];
        let err = substitute("name: ${who}", &Mapping::new(), &HashMap::new(), &required, "greet", "file.yaml:3");
        assert!(matches!(err, Err(TemplateError::MissingParameter { .. })));
    }

    #[test]
    fn test_simple_render_produces_multiple_records() {
        let body = "---\nname: ${n}-a\n---\nname: ${n}-b\n";
        let tpl = Template::simple("two-tags", FilePos::default(), body);
        let records = tpl.render(&mapping(&[("n", "f40")])).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_record_to_template_from_inline_body() {
        let record = mapping(&[("name", "make-tag"), ("template", "type: tag\nname: ${n}\n")]);
        let tpl = record_to_template(&record, FilePos::default()).unwrap();
        assert_eq!(tpl.name, "make-tag");
        let records = tpl.render(&mapping(&[("n", "f40")])).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_record_to_template_requires_name() {
        let record = mapping(&[("template", "type: tag\n")]);
        assert!(record_to_template(&record, FilePos::default()).is_err());
    }

    #[test]
    fn test_stamp_provenance_appends_trace() {
        let mut record = Mapping::new();
        let mut trace = Vec::new();
        let pos = FilePos::new("tags.yaml", 10);
        stamp_provenance(&mut record, &pos, &mut trace, "make-tag");
        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0].template, "make-tag");
    }
}
