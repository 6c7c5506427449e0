//! Declarative nested-wildcard format descriptors
//!
//! Each blob schema declares its shape as a `Format` tree and documents
//! are validated by a small recursive matcher over the generic JSON value.
//! Kept data-driven since schema versions are added over time.
//!
//! Rules:
//! - a `Map` accepts a key if the descriptor names it, or if the map
//!   carries a wildcard entry (any key name accepted, value validated
//!   against the wildcard sub-descriptor);
//! - a `List` requires a non-empty array, each element validated against
//!   the single element descriptor;
//! - `Any` accepts every value.

use std::collections::BTreeMap;

use serde_json::Value;

use super::errors::{BlobError, BlobResult};

/// A format descriptor node.
#[derive(Debug, Clone)]
pub enum Format {
    /// Any value is accepted here.
    Any,
    /// An object with named and/or wildcard keys.
    Map(FormatMap),
    /// A non-empty list, each element matching the inner descriptor.
    List(Box<Format>),
}

/// Descriptor for an object: named keys plus an optional wildcard.
#[derive(Debug, Clone, Default)]
pub struct FormatMap {
    keys: BTreeMap<&'static str, Format>,
    wildcard: Option<Box<Format>>,
}

impl FormatMap {
    /// An object descriptor with no accepted keys yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts a named key with the given sub-descriptor.
    pub fn key(mut self, name: &'static str, format: Format) -> Self {
        self.keys.insert(name, format);
        self
    }

    /// Accepts a named key with any value.
    pub fn field(self, name: &'static str) -> Self {
        self.key(name, Format::Any)
    }

    /// Accepts any key name, validating values against `format`.
    pub fn wildcard(mut self, format: Format) -> Self {
        self.wildcard = Some(Box::new(format));
        self
    }
}

impl From<FormatMap> for Format {
    fn from(map: FormatMap) -> Self {
        Format::Map(map)
    }
}

/// Validates `value` against `format`, reporting the offending key path on
/// failure.
pub fn validate(value: &Value, format: &Format) -> BlobResult<()> {
    validate_at(value, format, &mut Vec::new())
}

fn validate_at(value: &Value, format: &Format, path: &mut Vec<String>) -> BlobResult<()> {
    match format {
        Format::Any => Ok(()),
        Format::Map(map) => {
            let obj = value
                .as_object()
                .ok_or_else(|| BlobError::invalid(render_path(path), "expected an object"))?;
            for (key, sub_value) in obj {
                path.push(key.clone());
                let result = match map.keys.get(key.as_str()) {
                    Some(sub_format) => validate_at(sub_value, sub_format, path),
                    None => match &map.wildcard {
                        Some(sub_format) => validate_at(sub_value, sub_format, path),
                        None => Err(BlobError::invalid(render_path(path), "key not allowed")),
                    },
                };
                path.pop();
                result?;
            }
            Ok(())
        }
        Format::List(element) => {
            let list = value
                .as_array()
                .ok_or_else(|| BlobError::invalid(render_path(path), "expected a list"))?;
            if list.is_empty() {
                return Err(BlobError::invalid(render_path(path), "list must not be empty"));
            }
            for (idx, item) in list.iter().enumerate() {
                path.push(idx.to_string());
                let result = validate_at(item, element, path);
                path.pop();
                result?;
            }
            Ok(())
        }
    }
}

fn render_path(path: &[String]) -> String {
    if path.is_empty() {
        "$".to_string()
    } else {
        path.join(".")
    }
}
