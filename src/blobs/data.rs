//! Shared blob document core
//!
//! All schema generations store the same platforms/locales tree shape;
//! the accessors here implement the lookup rules they share: one-hop
//! platform alias resolution, and locale-level fields falling back to the
//! corresponding top-level field.

use serde_json::{Map, Value};

use super::errors::{BlobError, BlobResult};

/// Renders a JSON scalar the way it appears in responses: strings
/// unquoted, everything else via its JSON form.
pub(crate) fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The generic JSON document a release blob wraps.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobData {
    doc: Map<String, Value>,
}

impl BlobData {
    pub(crate) fn new(doc: Map<String, Value>) -> Self {
        Self { doc }
    }

    /// The underlying document.
    pub fn document(&self) -> &Map<String, Value> {
        &self.doc
    }

    /// A top-level field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.doc.get(key)
    }

    /// A top-level string field.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.doc.get(key).and_then(Value::as_str)
    }

    /// The release name.
    pub fn name(&self) -> Option<&str> {
        self.str_field("name")
    }

    fn platforms(&self) -> Option<&Map<String, Value>> {
        self.doc.get("platforms").and_then(Value::as_object)
    }

    /// True if the blob declares the platform at all (alias or not).
    pub fn has_platform(&self, platform: &str) -> bool {
        self.platforms()
            .map(|p| p.contains_key(platform))
            .unwrap_or(false)
    }

    /// Resolves a platform alias one hop. A platform without an alias
    /// resolves to itself; aliases do not chain.
    pub fn resolved_platform(&self, platform: &str) -> String {
        self.platforms()
            .and_then(|platforms| platforms.get(platform))
            .and_then(Value::as_object)
            .and_then(|data| data.get("alias"))
            .and_then(Value::as_str)
            .unwrap_or(platform)
            .to_string()
    }

    /// The platform object after alias resolution.
    pub fn platform_data(&self, platform: &str) -> BlobResult<&Map<String, Value>> {
        let resolved = self.resolved_platform(platform);
        self.platforms()
            .and_then(|platforms| platforms.get(&resolved))
            .and_then(Value::as_object)
            .ok_or_else(|| BlobError::NotFound(format!("platform '{}'", resolved)))
    }

    /// The locale object under a platform.
    pub fn locale_data(&self, platform: &str, locale: &str) -> BlobResult<&Map<String, Value>> {
        let platform_data = self.platform_data(platform)?;
        platform_data
            .get("locales")
            .and_then(Value::as_object)
            .and_then(|locales| locales.get(locale))
            .and_then(Value::as_object)
            .ok_or_else(|| {
                BlobError::NotFound(format!(
                    "locale '{}' in platform '{}'",
                    locale,
                    self.resolved_platform(platform)
                ))
            })
    }

    /// A locale-level field, falling back to the corresponding top-level
    /// field if absent at locale level.
    pub fn locale_or_top_level(&self, platform: &str, locale: &str, param: &str) -> Option<&Value> {
        if let Ok(locale_data) = self.locale_data(platform, locale) {
            if let Some(value) = locale_data.get(param) {
                return Some(value);
            }
        }
        self.doc.get(param)
    }

    /// The buildID at (platform, locale).
    ///
    /// Fails if the platform has no such locale at all; falls back to the
    /// platform-level buildID if the locale has no locale-specific one.
    pub fn build_id(&self, platform: &str, locale: &str) -> BlobResult<String> {
        let locale_data = self.locale_data(platform, locale)?;
        if let Some(value) = locale_data.get("buildID") {
            return Ok(value_as_string(value));
        }
        let platform_data = self.platform_data(platform)?;
        platform_data
            .get("buildID")
            .map(value_as_string)
            .ok_or_else(|| {
                BlobError::NotFound(format!(
                    "buildID for locale '{}' in platform '{}'",
                    locale, platform
                ))
            })
    }
}
