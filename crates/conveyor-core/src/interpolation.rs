//! Property interpolation for command templates.
//!
//! Templates reference build-time properties as `${{ name }}`. Unlike
//! shell-style expansion, a reference to an unknown property is an error:
//! command lines are resolved once when a job is constructed and must never
//! silently lose an argument.

use crate::{Error, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static PROPERTY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("valid regex"));

/// Named build properties available to templates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    values: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Resolve every `${{ name }}` in `template`.
    ///
    /// `context` names the template owner in the error message.
    pub fn interpolate(&self, template: &str, context: &str) -> Result<String> {
        let mut output = String::with_capacity(template.len());
        let mut last = 0;

        for caps in PROPERTY_RE.captures_iter(template) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let value = self
                .values
                .get(name.as_str())
                .ok_or_else(|| Error::UnresolvedProperty {
                    property: name.as_str().to_string(),
                    context: context.to_string(),
                })?;
            output.push_str(&template[last..whole.start()]);
            output.push_str(value);
            last = whole.end();
        }

        output.push_str(&template[last..]);
        Ok(output)
    }
}
