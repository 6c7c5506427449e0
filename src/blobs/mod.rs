//! Release blobs: versioned, polymorphic update metadata
//!
//! A blob is the schema-versioned document describing a release's
//! platforms, locales and patches. Schema generations form a closed set of
//! tagged variants sharing the same document core; dispatch is by the
//! integer `schema_version` tag. Later generations are additive supersets:
//! version 2 renames the version fields and adds prompt/billboard
//! attributes, version 3 adds multiple-partial support.

mod data;
mod errors;
mod format;
mod render;
mod versions;

use serde_json::{Map, Value};

pub use data::BlobData;
pub use errors::{BlobError, BlobResult};
pub use format::{validate, Format, FormatMap};
pub use render::{
    contains_forbidden_domain, BlobSource, NoBlobs, RenderContext, UrlOutcome,
};
pub use versions::{PreRelease, ProductVersion};

use crate::rules::UpdateQuery;

/// Patch entry shape shared by every schema generation.
fn patch_format() -> Format {
    FormatMap::new()
        .field("filesize")
        .field("from")
        .field("hashValue")
        .field("fileUrl")
        .into()
}

fn wildcard_map() -> Format {
    FormatMap::new().wildcard(Format::Any).into()
}

fn format_v1() -> Format {
    FormatMap::new()
        .field("name")
        .field("schema_version")
        .field("extv")
        .field("appv")
        .key("fileUrls", wildcard_map())
        .key("ftpFilenames", wildcard_map())
        .key("bouncerProducts", wildcard_map())
        .field("hashFunction")
        .field("detailsUrl")
        .field("licenseUrl")
        .field("fakePartials")
        .key(
            "platforms",
            FormatMap::new()
                .wildcard(
                    FormatMap::new()
                        .field("alias")
                        .field("buildID")
                        .field("OS_BOUNCER")
                        .field("OS_FTP")
                        .key(
                            "locales",
                            FormatMap::new()
                                .wildcard(
                                    FormatMap::new()
                                        .field("buildID")
                                        .field("extv")
                                        .field("appv")
                                        .key("partial", patch_format())
                                        .key("complete", patch_format())
                                        .into(),
                                )
                                .into(),
                        )
                        .into(),
                )
                .into(),
        )
        .into()
}

/// Optional `<update>` attributes introduced with schema version 2.
const OPTIONAL_UPDATE_ATTRS: &[&str] = &[
    "billboardURL",
    "showPrompt",
    "showNeverForVersion",
    "showSurvey",
    "actions",
    "openURL",
    "notificationURL",
    "alertURL",
];

fn new_style_top_level(map: FormatMap) -> FormatMap {
    map.field("name")
        .field("schema_version")
        .field("appVersion")
        .field("displayVersion")
        .field("platformVersion")
        .field("hashFunction")
        .field("detailsUrl")
        .field("licenseUrl")
        .field("actions")
        .field("billboardURL")
        .field("openURL")
        .field("notificationURL")
        .field("alertURL")
        .field("showPrompt")
        .field("showNeverForVersion")
        .field("showSurvey")
}

fn new_style_locale(map: FormatMap) -> FormatMap {
    map.field("isOSUpdate")
        .field("buildID")
        .field("appVersion")
        .field("displayVersion")
        .field("platformVersion")
}

fn platforms_format(locale: Format) -> Format {
    FormatMap::new()
        .wildcard(
            FormatMap::new()
                .field("alias")
                .field("buildID")
                .field("OS_BOUNCER")
                .field("OS_FTP")
                .key("locales", FormatMap::new().wildcard(locale).into())
                .into(),
        )
        .into()
}

fn format_v2() -> Format {
    new_style_top_level(FormatMap::new())
        .key("fileUrls", wildcard_map())
        .key("ftpFilenames", wildcard_map())
        .key("bouncerProducts", wildcard_map())
        .key(
            "platforms",
            platforms_format(
                new_style_locale(FormatMap::new())
                    .key("partial", patch_format())
                    .key("complete", patch_format())
                    .into(),
            ),
        )
        .into()
}

fn format_v3() -> Format {
    let per_patch_kind: Format = FormatMap::new()
        .key("partials", wildcard_map())
        .key("completes", wildcard_map())
        .into();

    new_style_top_level(FormatMap::new())
        .key("fileUrls", wildcard_map())
        .key("ftpFilenames", per_patch_kind.clone())
        .key("bouncerProducts", per_patch_kind)
        .key(
            "platforms",
            platforms_format(
                new_style_locale(FormatMap::new())
                    .key("partials", Format::List(Box::new(patch_format())))
                    .key("completes", Format::List(Box::new(patch_format())))
                    .into(),
            ),
        )
        .into()
}

/// A decoded release blob of one of the supported schema generations.
#[derive(Debug, Clone, PartialEq)]
pub enum ReleaseBlob {
    /// Schema version 1: extv/appv version fields, single partial.
    V1(BlobData),
    /// Schema version 2: appVersion/displayVersion/platformVersion,
    /// prompt and billboard attributes.
    V2(BlobData),
    /// Schema version 3: multiple partials and completes per locale.
    V3(BlobData),
}

impl ReleaseBlob {
    /// Decodes a document, dispatching on its `schema_version` field and
    /// validating against the matching format descriptor.
    pub fn decode(value: &Value) -> BlobResult<Self> {
        let doc = value
            .as_object()
            .ok_or_else(|| BlobError::invalid("$", "blob must be an object"))?;
        let schema_version = match doc.get("schema_version") {
            None => return Err(BlobError::MissingSchemaVersion),
            Some(v) => v
                .as_u64()
                .ok_or_else(|| BlobError::invalid("schema_version", "must be an integer"))?,
        };

        let format = match schema_version {
            1 => format_v1(),
            2 => format_v2(),
            3 => format_v3(),
            other => return Err(BlobError::UnknownSchema(other)),
        };
        validate(value, &format)?;

        let data = BlobData::new(doc.clone());
        Ok(match schema_version {
            1 => ReleaseBlob::V1(data),
            2 => ReleaseBlob::V2(data),
            _ => ReleaseBlob::V3(data),
        })
    }

    /// Re-encodes the blob into its document form. Decoding keeps the full
    /// document, so this is semantically lossless.
    pub fn encode(&self) -> Value {
        Value::Object(self.data().document().clone())
    }

    /// The blob's schema version tag.
    pub fn schema_version(&self) -> u64 {
        match self {
            ReleaseBlob::V1(_) => 1,
            ReleaseBlob::V2(_) => 2,
            ReleaseBlob::V3(_) => 3,
        }
    }

    /// The shared document core.
    pub fn data(&self) -> &BlobData {
        match self {
            ReleaseBlob::V1(data) | ReleaseBlob::V2(data) | ReleaseBlob::V3(data) => data,
        }
    }

    /// The release name stored in the blob.
    pub fn name(&self) -> Option<&str> {
        self.data().name()
    }

    /// The comparable application version at (platform, locale).
    ///
    /// Schema 1 used `extv` as the real application version (`appv` was a
    /// display string); later schemas use `appVersion`.
    pub fn application_version(&self, platform: &str, locale: &str) -> Option<String> {
        let param = match self {
            ReleaseBlob::V1(_) => "extv",
            _ => "appVersion",
        };
        self.data()
            .locale_or_top_level(platform, locale, param)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Whether the client described by `query` is exactly the build this
    /// release ships at the query's platform/locale. Used to decide if a
    /// delta patch computed from this release applies to the client.
    pub fn matches_update_query(&self, query: &UpdateQuery) -> bool {
        if !self.data().has_platform(&query.build_target) {
            return false;
        }
        match self.data().build_id(&query.build_target, &query.locale) {
            Ok(build_id) => build_id == query.build_id,
            Err(_) => false,
        }
    }

    /// Whether serving this release to the querying client is an actual
    /// update: never a downgrade, and never a no-op at equal versions.
    pub fn should_serve_update(&self, query: &UpdateQuery) -> bool {
        let release_version = match self
            .application_version(&query.build_target, &query.locale)
            .as_deref()
            .and_then(ProductVersion::parse)
        {
            Some(v) => v,
            None => return false,
        };
        let query_version = match ProductVersion::parse(&query.version) {
            Some(v) => v,
            None => return false,
        };

        if query_version > release_version {
            return false;
        }
        if query_version == release_version {
            let release_build_id =
                match self.data().build_id(&query.build_target, &query.locale) {
                    Ok(id) => id,
                    Err(_) => return false,
                };
            if query.build_id.as_str() >= release_build_id.as_str() {
                return false;
            }
        }
        true
    }

    pub(crate) fn optional_update_attrs(&self) -> &'static [&'static str] {
        match self {
            ReleaseBlob::V1(_) => &[],
            _ => OPTIONAL_UPDATE_ATTRS,
        }
    }

    pub(crate) fn doc(&self) -> &Map<String, Value> {
        self.data().document()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v1_doc() -> Value {
        json!({
            "name": "Firefox-4.0",
            "schema_version": 1,
            "extv": "4.0",
            "appv": "4.0",
            "hashFunction": "sha512",
            "platforms": {
                "p": {
                    "buildID": "30",
                    "locales": {
                        "l": {
                            "complete": {
                                "filesize": "22",
                                "from": "*",
                                "hashValue": "5",
                                "fileUrl": "http://a.com/z"
                            }
                        }
                    }
                }
            }
        })
    }

    #[test]
    fn test_decode_dispatches_on_schema_version() {
        let blob = ReleaseBlob::decode(&v1_doc()).unwrap();
        assert_eq!(blob.schema_version(), 1);

        let mut doc = v1_doc();
        doc["schema_version"] = json!(2);
        doc.as_object_mut().unwrap().remove("extv");
        doc.as_object_mut().unwrap().remove("appv");
        let blob = ReleaseBlob::decode(&doc).unwrap();
        assert_eq!(blob.schema_version(), 2);
    }

    #[test]
    fn test_decode_missing_schema_version() {
        let mut doc = v1_doc();
        doc.as_object_mut().unwrap().remove("schema_version");
        let err = ReleaseBlob::decode(&doc).unwrap_err();
        assert!(matches!(err, BlobError::MissingSchemaVersion));
    }

    #[test]
    fn test_decode_unknown_schema_version() {
        let mut doc = v1_doc();
        doc["schema_version"] = json!(99);
        let err = ReleaseBlob::decode(&doc).unwrap_err();
        assert!(matches!(err, BlobError::UnknownSchema(99)));
    }

    #[test]
    fn test_decode_rejects_stray_keys_with_path() {
        let mut doc = v1_doc();
        doc["platforms"]["p"]["bogus"] = json!(1);
        let err = ReleaseBlob::decode(&doc).unwrap_err();
        match err {
            BlobError::Invalid { path, .. } => assert_eq!(path, "platforms.p.bogus"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_round_trip_is_lossless() {
        let doc = v1_doc();
        let blob = ReleaseBlob::decode(&doc).unwrap();
        assert_eq!(blob.encode(), doc);
    }

    #[test]
    fn test_v3_requires_patch_lists() {
        let doc = json!({
            "name": "c",
            "schema_version": 3,
            "hashFunction": "sha512",
            "platforms": {
                "p": {
                    "buildID": "29",
                    "locales": {
                        "l": {
                            "partials": [
                                {"filesize": "3", "from": "b", "hashValue": "4", "fileUrl": "http://a.com/p"}
                            ],
                            "completes": [
                                {"filesize": "22", "from": "*", "hashValue": "5", "fileUrl": "http://a.com/c"}
                            ]
                        }
                    }
                }
            }
        });
        assert!(ReleaseBlob::decode(&doc).is_ok());

        let mut bad = doc.clone();
        bad["platforms"]["p"]["locales"]["l"]["completes"] = json!([]);
        assert!(ReleaseBlob::decode(&bad).is_err());
    }

    #[test]
    fn test_should_serve_update_version_rules() {
        let blob = ReleaseBlob::decode(&v1_doc()).unwrap();

        let mut query = UpdateQuery {
            build_target: "p".into(),
            locale: "l".into(),
            ..Default::default()
        };

        // Older client gets the update
        query.version = "3.5".into();
        query.build_id = "25".into();
        assert!(blob.should_serve_update(&query));

        // Newer client never downgraded
        query.version = "5.0".into();
        assert!(!blob.should_serve_update(&query));

        // Same version: only served if the release build is strictly newer
        query.version = "4.0".into();
        query.build_id = "30".into();
        assert!(!blob.should_serve_update(&query));
        query.build_id = "31".into();
        assert!(!blob.should_serve_update(&query));
        query.build_id = "29".into();
        assert!(blob.should_serve_update(&query));
    }

    #[test]
    fn test_should_serve_update_without_version_is_false() {
        let mut doc = v1_doc();
        doc.as_object_mut().unwrap().remove("extv");
        let blob = ReleaseBlob::decode(&doc).unwrap();

        let query = UpdateQuery {
            version: "3.5".into(),
            build_target: "p".into(),
            locale: "l".into(),
            ..Default::default()
        };
        assert!(!blob.should_serve_update(&query));
    }

    #[test]
    fn test_matches_update_query_on_exact_build() {
        let blob = ReleaseBlob::decode(&v1_doc()).unwrap();
        let mut query = UpdateQuery {
            build_target: "p".into(),
            locale: "l".into(),
            build_id: "30".into(),
            ..Default::default()
        };
        assert!(blob.matches_update_query(&query));

        query.build_id = "29".into();
        assert!(!blob.matches_update_query(&query));

        query.build_target = "unknown".into();
        assert!(!blob.matches_update_query(&query));
    }
}
