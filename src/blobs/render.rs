//! Response rendering: update XML and key=value snippets
//!
//! Rendering needs more than the blob itself: delta patches name the
//! release they were computed from, and URL templates are filled per
//! query. `BlobSource` supplies other blobs by name and `RenderContext`
//! carries the domain allow-list and force-host configuration.
//!
//! A patch URL landing outside the allow-list is not an error; the patch
//! is omitted and the remaining patch types still render.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::data::value_as_string;
use super::errors::{BlobError, BlobResult};
use super::ReleaseBlob;
use crate::rules::{fallback_channel, UpdateQuery};

/// Looks up release blobs by name, for resolving `from` references.
pub trait BlobSource {
    /// The blob stored under `name`, if any.
    fn blob(&self, name: &str) -> Option<ReleaseBlob>;
}

/// A source with no blobs at all.
pub struct NoBlobs;

impl BlobSource for NoBlobs {
    fn blob(&self, _name: &str) -> Option<ReleaseBlob> {
        None
    }
}

/// Everything rendering needs besides the blob and the query.
pub struct RenderContext<'a> {
    /// Domains update URLs may point at. An empty list forbids everything.
    pub whitelisted_domains: &'a [String],
    /// URL prefixes that honor a `force=1` query argument.
    pub special_force_hosts: &'a [String],
    /// Where `from` releases are looked up.
    pub source: &'a dyn BlobSource,
}

/// The host part of a URL, or `None` if the URL has no recognizable
/// `scheme://host` form.
fn url_host(url: &str) -> Option<&str> {
    let rest = url.split_once("://")?.1;
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let host = &rest[..end];
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// True when the URL's host is not on the allow-list. Unparsable URLs are
/// forbidden too.
pub fn contains_forbidden_domain(url: &str, whitelisted_domains: &[String]) -> bool {
    match url_host(url) {
        Some(host) => !whitelisted_domains.iter().any(|d| d == host),
        None => true,
    }
}

fn is_special_url(url: &str, special_force_hosts: &[String]) -> bool {
    special_force_hosts.iter().any(|h| url.starts_with(h.as_str()))
}

fn append_force(url: String) -> String {
    if url.contains('?') {
        format!("{}&force=1", url)
    } else {
        format!("{}?force=1", url)
    }
}

/// The outcome of resolving a patch URL against the allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlOutcome {
    /// A servable URL.
    Url(String),
    /// The URL resolved but points at a forbidden domain.
    Forbidden(String),
}

fn patch_str(patch: &Map<String, Value>, key: &str) -> BlobResult<String> {
    patch
        .get(key)
        .map(value_as_string)
        .ok_or_else(|| BlobError::NotFound(format!("patch field '{}'", key)))
}

impl ReleaseBlob {
    fn required_param(&self, platform: &str, locale: &str, param: &str) -> BlobResult<String> {
        self.data()
            .locale_or_top_level(platform, locale, param)
            .map(value_as_string)
            .ok_or_else(|| BlobError::NotFound(format!("'{}'", param)))
    }

    fn top_level_with_locale(&self, key: &str, locale: &str) -> Option<String> {
        self.data()
            .str_field(key)
            .map(|v| v.replace("%LOCALE%", locale))
    }

    /// The template name for a patch kind. Flat for single-update schemas,
    /// keyed by the `from` release for multiple-partial ones.
    fn ftp_filename(&self, patch_key: &str, from: &str) -> String {
        self.lookup_template("ftpFilenames", patch_key, from)
    }

    fn bouncer_product(&self, patch_key: &str, from: &str) -> String {
        self.lookup_template("bouncerProducts", patch_key, from)
    }

    fn lookup_template(&self, table: &str, patch_key: &str, from: &str) -> String {
        let entry = self
            .doc()
            .get(table)
            .and_then(Value::as_object)
            .and_then(|t| t.get(patch_key));
        let value = match self {
            ReleaseBlob::V1(_) | ReleaseBlob::V2(_) => entry,
            ReleaseBlob::V3(_) => entry.and_then(Value::as_object).and_then(|e| e.get(from)),
        };
        value.and_then(Value::as_str).unwrap_or("").to_string()
    }

    /// Resolves the download URL for one patch: a literal `fileUrl` wins,
    /// otherwise the per-channel template is filled in. The fallback
    /// channel is tried when the query's channel has no template.
    fn patch_url(
        &self,
        query: &UpdateQuery,
        patch: &Map<String, Value>,
        ctx: &RenderContext<'_>,
        ftp_filename: &str,
        bouncer_product: &str,
    ) -> BlobResult<UrlOutcome> {
        let mut url = match patch.get("fileUrl").and_then(Value::as_str) {
            Some(literal) => literal.to_string(),
            None => {
                let file_urls = self
                    .doc()
                    .get("fileUrls")
                    .and_then(Value::as_object)
                    .ok_or_else(|| BlobError::NotFound("'fileUrls'".to_string()))?;
                let template = file_urls
                    .get(&query.channel)
                    .or_else(|| file_urls.get(fallback_channel(&query.channel)))
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        BlobError::NotFound(format!("fileUrl for channel '{}'", query.channel))
                    })?;
                let platform_data = self.data().platform_data(&query.build_target)?;
                let os_ftp = platform_data
                    .get("OS_FTP")
                    .map(value_as_string)
                    .unwrap_or_default();
                let os_bouncer = platform_data
                    .get("OS_BOUNCER")
                    .map(value_as_string)
                    .unwrap_or_default();
                template
                    .replace("%LOCALE%", &query.locale)
                    .replace("%OS_FTP%", &os_ftp)
                    .replace("%FILENAME%", ftp_filename)
                    .replace("%PRODUCT%", bouncer_product)
                    .replace("%OS_BOUNCER%", &os_bouncer)
            }
        };

        if query.force && is_special_url(&url, ctx.special_force_hosts) {
            url = append_force(url);
        }

        if contains_forbidden_domain(&url, ctx.whitelisted_domains) {
            Ok(UrlOutcome::Forbidden(url))
        } else {
            Ok(UrlOutcome::Url(url))
        }
    }

    /// One `<patch>` line, or `None` when this patch does not apply to the
    /// querying client or its URL is forbidden.
    fn patch_xml(
        &self,
        patch_key: &str,
        patch_type: &str,
        patch: &Map<String, Value>,
        query: &UpdateQuery,
        ctx: &RenderContext<'_>,
    ) -> BlobResult<Option<String>> {
        let from = patch_str(patch, "from")?;
        if from != "*" {
            match ctx.source.blob(&from) {
                Some(from_release) => {
                    if !from_release.matches_update_query(query) {
                        return Ok(None);
                    }
                }
                // A delta whose source release is gone cannot be verified
                // against the client, so it is never served.
                None => return Ok(None),
            }
        }

        let ftp_filename = self.ftp_filename(patch_key, &from);
        let bouncer_product = self.bouncer_product(patch_key, &from);
        let url = match self.patch_url(query, patch, ctx, &ftp_filename, &bouncer_product)? {
            UrlOutcome::Url(url) => url,
            UrlOutcome::Forbidden(_) => return Ok(None),
        };

        let hash_function = self
            .data()
            .str_field("hashFunction")
            .ok_or_else(|| BlobError::NotFound("'hashFunction'".to_string()))?;
        Ok(Some(format!(
            "        <patch type=\"{}\" URL=\"{}\" hashFunction=\"{}\" hashValue=\"{}\" size=\"{}\"/>",
            patch_type,
            url,
            hash_function,
            patch_str(patch, "hashValue")?,
            patch_str(patch, "filesize")?,
        )))
    }

    fn patches_xml(
        &self,
        locale_data: &Map<String, Value>,
        query: &UpdateQuery,
        ctx: &RenderContext<'_>,
    ) -> BlobResult<Vec<String>> {
        let mut patches = Vec::new();
        match self {
            ReleaseBlob::V1(_) | ReleaseBlob::V2(_) => {
                for patch_key in ["partial", "complete"] {
                    let patch = match locale_data.get(patch_key).and_then(Value::as_object) {
                        Some(p) => p,
                        None => continue,
                    };
                    if let Some(xml) = self.patch_xml(patch_key, patch_key, patch, query, ctx)? {
                        patches.push(xml);
                    }
                }
            }
            ReleaseBlob::V3(_) => {
                // Entries are ordered by expected frequency; the first one
                // that applies to the client wins.
                for (patch_key, patch_type) in [("partials", "partial"), ("completes", "complete")]
                {
                    let entries = locale_data
                        .get(patch_key)
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default();
                    for entry in &entries {
                        let patch = match entry.as_object() {
                            Some(p) => p,
                            None => continue,
                        };
                        if let Some(xml) =
                            self.patch_xml(patch_key, patch_type, patch, query, ctx)?
                        {
                            patches.push(xml);
                            break;
                        }
                    }
                }
            }
        }
        Ok(patches)
    }

    fn update_line(
        &self,
        build_target: &str,
        locale: &str,
        update_type: &str,
    ) -> BlobResult<String> {
        let build_id = self.data().build_id(build_target, locale)?;
        let mut line = match self {
            ReleaseBlob::V1(_) => {
                let appv = self.required_param(build_target, locale, "appv")?;
                let extv = self.required_param(build_target, locale, "extv")?;
                format!(
                    "    <update type=\"{}\" version=\"{}\" extensionVersion=\"{}\" buildID=\"{}\"",
                    update_type, appv, extv, build_id
                )
            }
            _ => {
                let display = self.required_param(build_target, locale, "displayVersion")?;
                let app = self.required_param(build_target, locale, "appVersion")?;
                let platform = self.required_param(build_target, locale, "platformVersion")?;
                format!(
                    "    <update type=\"{}\" displayVersion=\"{}\" appVersion=\"{}\" platformVersion=\"{}\" buildID=\"{}\"",
                    update_type, display, app, platform, build_id
                )
            }
        };

        if let Some(details) = self.top_level_with_locale("detailsUrl", locale) {
            line.push_str(&format!(" detailsURL=\"{}\"", details));
        }
        if let Some(license) = self.top_level_with_locale("licenseUrl", locale) {
            line.push_str(&format!(" licenseURL=\"{}\"", license));
        }
        if !matches!(self, ReleaseBlob::V1(_)) {
            let is_os_update = self
                .data()
                .locale_data(build_target, locale)?
                .get("isOSUpdate")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if is_os_update {
                line.push_str(" isOSUpdate=\"true\"");
            }
            for attr in self.optional_update_attrs() {
                if let Some(value) = self.doc().get(*attr) {
                    line.push_str(&format!(" {}=\"{}\"", attr, value_as_string(value)));
                }
            }
        }
        line.push('>');
        Ok(line)
    }

    /// Renders the full update document for a query. No applicable patches
    /// yields an empty `<updates/>` body rather than an error.
    pub fn create_xml(
        &self,
        query: &UpdateQuery,
        update_type: &str,
        ctx: &RenderContext<'_>,
    ) -> BlobResult<String> {
        let locale_data = self
            .data()
            .locale_data(&query.build_target, &query.locale)?
            .clone();
        let patches = self.patches_xml(&locale_data, query, ctx)?;

        let mut xml = vec!["<?xml version=\"1.0\"?>".to_string(), "<updates>".to_string()];
        if !patches.is_empty() {
            xml.push(self.update_line(&query.build_target, &query.locale, update_type)?);
            xml.extend(patches);
            xml.push("    </update>".to_string());
        }
        xml.push("</updates>".to_string());
        Ok(xml.join("\n"))
    }

    /// Renders legacy key=value snippets, one per patch type. Multiple
    /// partial schemas have no snippet form and return an empty map.
    pub fn create_snippets(
        &self,
        query: &UpdateQuery,
        update_type: &str,
        ctx: &RenderContext<'_>,
    ) -> BlobResult<BTreeMap<String, String>> {
        let snippet_version = match self {
            ReleaseBlob::V1(_) => 1,
            ReleaseBlob::V2(_) => 2,
            ReleaseBlob::V3(_) => return Ok(BTreeMap::new()),
        };

        let build_target = &query.build_target;
        let locale = &query.locale;
        let locale_data = self.data().locale_data(build_target, locale)?.clone();

        let mut snippets = BTreeMap::new();
        for patch_key in ["partial", "complete"] {
            let patch = match locale_data.get(patch_key).and_then(Value::as_object) {
                Some(p) => p,
                None => continue,
            };
            let from = patch_str(patch, "from")?;
            if from != "*" {
                match ctx.source.blob(&from) {
                    Some(from_release) => {
                        if !from_release.matches_update_query(query) {
                            continue;
                        }
                    }
                    None => continue,
                }
            }

            let ftp_filename = self.ftp_filename(patch_key, &from);
            let bouncer_product = self.bouncer_product(patch_key, &from);
            let url = match self.patch_url(query, patch, ctx, &ftp_filename, &bouncer_product)? {
                UrlOutcome::Url(url) => url,
                UrlOutcome::Forbidden(_) => break,
            };

            let hash_function = self
                .data()
                .str_field("hashFunction")
                .ok_or_else(|| BlobError::NotFound("'hashFunction'".to_string()))?;
            let mut lines = vec![
                format!("version={}", snippet_version),
                format!("type={}", patch_key),
                format!("url={}", url),
                format!("hashFunction={}", hash_function),
                format!("hashValue={}", patch_str(patch, "hashValue")?),
                format!("size={}", patch_str(patch, "filesize")?),
                format!("build={}", self.data().build_id(build_target, locale)?),
            ];
            match self {
                ReleaseBlob::V1(_) => {
                    lines.push(format!(
                        "appv={}",
                        self.required_param(build_target, locale, "appv")?
                    ));
                    lines.push(format!(
                        "extv={}",
                        self.required_param(build_target, locale, "extv")?
                    ));
                }
                _ => {
                    lines.push(format!(
                        "displayVersion={}",
                        self.required_param(build_target, locale, "displayVersion")?
                    ));
                    lines.push(format!(
                        "appVersion={}",
                        self.required_param(build_target, locale, "appVersion")?
                    ));
                    lines.push(format!(
                        "platformVersion={}",
                        self.required_param(build_target, locale, "platformVersion")?
                    ));
                }
            }
            if let Some(details) = self.top_level_with_locale("detailsUrl", locale) {
                lines.push(format!("detailsUrl={}", details));
            }
            if let Some(license) = self.top_level_with_locale("licenseUrl", locale) {
                lines.push(format!("licenseUrl={}", license));
            }
            if update_type == "major" {
                lines.push("updateType=major".to_string());
            }
            if !matches!(self, ReleaseBlob::V1(_)) {
                for attr in self.optional_update_attrs() {
                    if let Some(value) = self.doc().get(*attr) {
                        lines.push(format!("{}={}", attr, value_as_string(value)));
                    }
                }
            }
            snippets.insert(patch_key.to_string(), lines.join("\n") + "\n");
        }

        // Old clients always expect a partial; some releases fake one from
        // the complete.
        if matches!(self, ReleaseBlob::V1(_))
            && self
                .doc()
                .get("fakePartials")
                .and_then(Value::as_bool)
                .unwrap_or(false)
            && snippets.contains_key("complete")
            && !snippets.contains_key("partial")
        {
            let partial = snippets["complete"].replace("type=complete", "type=partial");
            snippets.insert("partial".to_string(), partial);
        }

        Ok(snippets)
    }
}
