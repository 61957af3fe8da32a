//! `{{path}}` substitution engine used by `skein render --placeholders`

use regex::{Captures, Regex};
use serde_json::Value;
use skein_runtime::TemplateEngine;
use std::sync::OnceLock;

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_$]+(?:\.[A-Za-z0-9_$]+)*)\s*\}\}")
            .expect("valid placeholder regex")
    })
}

/// Replaces `{{a.b.0}}` with the value at that path in the model
///
/// Strings are inserted as-is, other values as JSON. Paths missing from
/// the model are an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct Placeholders;

impl Placeholders {
    fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
        path.split('.').try_fold(data, |value, key| match value {
            Value::Object(map) => map.get(key),
            Value::Array(items) => items.get(key.parse::<usize>().ok()?),
            _ => None,
        })
    }
}

impl TemplateEngine for Placeholders {
    fn render(&self, template: &str, data: &Value) -> anyhow::Result<String> {
        let mut missing = None;
        let html = placeholder().replace_all(template, |caps: &Captures<'_>| {
            let path = &caps[1];
            match Self::lookup(data, path) {
                Some(Value::String(text)) => text.clone(),
                Some(value) => value.to_string(),
                None => {
                    if missing.is_none() {
                        missing = Some(path.to_string());
                    }
                    String::new()
                }
            }
        });
        match missing {
            Some(path) => anyhow::bail!("no value for placeholder `{path}`"),
            None => Ok(html.into_owned()),
        }
    }
}
