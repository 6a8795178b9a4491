//! `<% ... %>` substitution against a JSON context.
//!
//! This is a trust boundary. Values from the context are inserted verbatim,
//! with no HTML or JSON escaping, and a placeholder can only name a dotted
//! path into the context. It must not grow into an expression language
//! without revisiting who controls the templates and the payloads.

use serde_json::Value;
use thiserror::Error;

const OPEN: &str = "<%";
const CLOSE: &str = "%>";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unclosed tag at byte {0}")]
    Unclosed(usize),
}

/// Renders a single template.
///
/// Missing paths and `null` render as the empty string, strings verbatim,
/// and every other value as compact JSON. `<%! ... %>` is a comment and
/// `<%& name %>` is accepted as a synonym for `<% name %>`.
pub fn render(template: &str, context: &Value) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut offset = 0;

    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);

        let tag_start = start + OPEN.len();
        let Some(len) = rest[tag_start..].find(CLOSE) else {
            return Err(TemplateError::Unclosed(offset + start));
        };

        render_tag(rest[tag_start..tag_start + len].trim(), context, &mut out);

        let consumed = tag_start + len + CLOSE.len();
        offset += consumed;
        rest = &rest[consumed..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Resolves a dotted path. `.` is the context itself; numeric segments
/// index into arrays.
pub fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    if path == "." {
        return Some(context);
    }
    if path.is_empty() {
        return None;
    }

    path.split('.')
        .try_fold(context, |value, segment| match value {
            Value::Object(fields) => fields.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

fn render_tag(tag: &str, context: &Value, out: &mut String) {
    if tag.starts_with('!') {
        return;
    }

    let path = tag.strip_prefix('&').map_or(tag, str::trim);
    match lookup(context, path) {
        None | Some(Value::Null) => {}
        Some(Value::String(s)) => out.push_str(s),
        Some(other) => out.push_str(&other.to_string()),
    }
}
