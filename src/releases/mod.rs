//! Release storage: named, versioned blob documents
//!
//! A release row pairs a name with its blob document plus the product it
//! belongs to and a read-only flag. Blob data is validated on every write
//! so the table never holds a document that fails its schema. Multi-step
//! paths that read a release and write it back conditionally go through
//! the bounded retry helper, since a concurrent writer may bump the
//! data_version in between.

mod errors;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::blobs::{BlobError, BlobSource, ReleaseBlob};
use crate::store::{with_retry, Clock, RetryPolicy};
use crate::versioned::{Record, VersionedTable};

pub use errors::{ReleasesError, ReleasesResult};

/// One stored release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    /// Unique release name, e.g. "Firefox-4.0-build1"
    pub name: String,
    /// Product this release belongs to
    pub product: String,
    /// Human-facing version string
    pub version: String,
    /// The blob document
    pub data: Value,
    /// Read-only releases reject every mutation
    pub read_only: bool,
    /// Optimistic-concurrency counter
    pub data_version: u64,
}

impl Record for Release {
    type Key = String;

    fn key(&self) -> String {
        self.name.clone()
    }

    fn data_version(&self) -> u64 {
        self.data_version
    }

    fn set_data_version(&mut self, version: u64) {
        self.data_version = version;
    }
}

/// The releases table and its blob-aware operations.
pub struct ReleasesTable {
    table: Arc<VersionedTable<Release>>,
    retry: RetryPolicy,
}

impl ReleasesTable {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_table(Arc::new(VersionedTable::new("releases", clock)))
    }

    pub fn with_table(table: Arc<VersionedTable<Release>>) -> Self {
        Self {
            table,
            retry: RetryPolicy::default(),
        }
    }

    /// Overrides the retry policy, mainly to drop the backoff in tests.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The underlying versioned table, for history queries.
    pub fn table(&self) -> &VersionedTable<Release> {
        &self.table
    }

    /// Validates and stores a new release.
    pub fn add_release(
        &self,
        name: &str,
        product: &str,
        version: &str,
        data: Value,
        changed_by: &str,
    ) -> ReleasesResult<Release> {
        ReleaseBlob::decode(&data)?;
        let row = Release {
            name: name.to_string(),
            product: product.to_string(),
            version: version.to_string(),
            data,
            read_only: false,
            data_version: 0,
        };
        Ok(self.table.insert(row, changed_by)?)
    }

    pub fn get_release(&self, name: &str) -> ReleasesResult<Release> {
        Ok(self.table.get_required(&name.to_string())?)
    }

    /// Decodes the stored document into its blob form.
    pub fn get_release_blob(&self, name: &str) -> ReleasesResult<ReleaseBlob> {
        let release = self.get_release(name)?;
        Ok(ReleaseBlob::decode(&release.data)?)
    }

    /// Replaces a release's blob document, version-checked.
    pub fn update_release(
        &self,
        name: &str,
        old_data_version: u64,
        changed_by: &str,
        data: Value,
    ) -> ReleasesResult<u64> {
        self.ensure_writable(name)?;
        ReleaseBlob::decode(&data)?;
        Ok(self
            .table
            .update(&name.to_string(), old_data_version, changed_by, |row| {
                row.data = data;
            })?)
    }

    /// Flips the read-only flag. Clearing it is itself allowed on a
    /// read-only release; nothing else is.
    pub fn set_read_only(
        &self,
        name: &str,
        read_only: bool,
        old_data_version: u64,
        changed_by: &str,
    ) -> ReleasesResult<u64> {
        Ok(self
            .table
            .update(&name.to_string(), old_data_version, changed_by, |row| {
                row.read_only = read_only;
            })?)
    }

    /// Deletes a release, version-checked. Read-only releases refuse.
    pub fn delete_release(
        &self,
        name: &str,
        old_data_version: u64,
        changed_by: &str,
    ) -> ReleasesResult<()> {
        self.ensure_writable(name)?;
        Ok(self
            .table
            .delete(&name.to_string(), old_data_version, changed_by)?)
    }

    /// Writes one locale's patch data into the blob, creating the
    /// platform and locales scaffolding when absent. An existing locale
    /// entry is replaced wholesale. Platform aliases are followed so the
    /// data lands on the aliased platform.
    pub fn add_locale_to_release(
        &self,
        name: &str,
        platform: &str,
        locale: &str,
        locale_data: Value,
        old_data_version: u64,
        changed_by: &str,
    ) -> ReleasesResult<u64> {
        self.ensure_writable(name)?;
        let release = self.get_release(name)?;

        let blob = ReleaseBlob::decode(&release.data)?;
        let target_platform = blob.data().resolved_platform(platform);

        // The blob decoded above, so the document and every node on this
        // path is an object when present.
        let mut data = release.data;
        let mut node = &mut data;
        for step in ["platforms", target_platform.as_str(), "locales"] {
            node = node
                .as_object_mut()
                .ok_or_else(|| BlobError::invalid(step, "expected an object"))?
                .entry(step)
                .or_insert_with(|| json!({}));
        }
        node.as_object_mut()
            .ok_or_else(|| BlobError::invalid("locales", "expected an object"))?
            .insert(locale.to_string(), locale_data);

        // The merged document must still be a valid blob
        ReleaseBlob::decode(&data)?;
        Ok(self
            .table
            .update(&name.to_string(), old_data_version, changed_by, |row| {
                row.data = data;
            })?)
    }

    /// [`add_locale_to_release`](Self::add_locale_to_release) against the
    /// current data_version, retried on conflicts.
    pub fn add_locale_retrying(
        &self,
        name: &str,
        platform: &str,
        locale: &str,
        locale_data: Value,
        changed_by: &str,
    ) -> ReleasesResult<u64> {
        with_retry(self.retry, ReleasesError::is_retryable, || {
            let release = self.get_release(name)?;
            self.add_locale_to_release(
                name,
                platform,
                locale,
                locale_data.clone(),
                release.data_version,
                changed_by,
            )
        })
    }

    fn ensure_writable(&self, name: &str) -> ReleasesResult<()> {
        let release = self.get_release(name)?;
        if release.read_only {
            return Err(ReleasesError::ReadOnly(name.to_string()));
        }
        Ok(())
    }
}

impl BlobSource for ReleasesTable {
    fn blob(&self, name: &str) -> Option<ReleaseBlob> {
        self.get_release_blob(name).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ManualClock;
    use crate::versioned::VersionedError;
    use serde_json::json;

    fn table() -> ReleasesTable {
        ReleasesTable::new(Arc::new(ManualClock::new(1_000)))
            .with_retry_policy(RetryPolicy::immediate(3))
    }

    fn blob_doc(name: &str) -> Value {
        json!({
            "name": name,
            "schema_version": 1,
            "extv": "2.0",
            "appv": "2.0",
            "hashFunction": "sha512",
            "platforms": {
                "p": {
                    "buildID": "20",
                    "locales": {
                        "l": {
                            "complete": {
                                "filesize": "22", "from": "*", "hashValue": "5",
                                "fileUrl": "http://a.com/z"
                            }
                        }
                    }
                },
                "p2": {"alias": "p"}
            }
        })
    }

    #[test]
    fn test_add_and_get_release() {
        let releases = table();
        let row = releases
            .add_release("b-2.0", "b", "2.0", blob_doc("b-2.0"), "bob")
            .unwrap();
        assert_eq!(row.data_version, 1);

        let blob = releases.get_release_blob("b-2.0").unwrap();
        assert_eq!(blob.name(), Some("b-2.0"));
        assert_eq!(blob.schema_version(), 1);
    }

    #[test]
    fn test_add_release_rejects_invalid_blob() {
        let releases = table();
        let err = releases
            .add_release("bad", "b", "1.0", json!({"name": "bad"}), "bob")
            .unwrap_err();
        assert!(matches!(
            err,
            ReleasesError::Blob(crate::blobs::BlobError::MissingSchemaVersion)
        ));
        assert!(releases.get_release("bad").is_err());
    }

    #[test]
    fn test_update_release_version_checked() {
        let releases = table();
        releases
            .add_release("b-2.0", "b", "2.0", blob_doc("b-2.0"), "bob")
            .unwrap();

        let mut data = blob_doc("b-2.0");
        data["appv"] = json!("2.0.1");
        assert_eq!(
            releases.update_release("b-2.0", 1, "bob", data.clone()).unwrap(),
            2
        );

        let err = releases.update_release("b-2.0", 1, "bob", data).unwrap_err();
        assert!(matches!(
            err,
            ReleasesError::Versioned(VersionedError::OutdatedData { .. })
        ));
    }

    #[test]
    fn test_read_only_rejects_mutation() {
        let releases = table();
        releases
            .add_release("b-2.0", "b", "2.0", blob_doc("b-2.0"), "bob")
            .unwrap();
        releases.set_read_only("b-2.0", true, 1, "bob").unwrap();

        let err = releases
            .update_release("b-2.0", 2, "bob", blob_doc("b-2.0"))
            .unwrap_err();
        assert!(matches!(err, ReleasesError::ReadOnly(_)));
        let err = releases.delete_release("b-2.0", 2, "bob").unwrap_err();
        assert!(matches!(err, ReleasesError::ReadOnly(_)));

        // Flipping the flag back is the one allowed write
        releases.set_read_only("b-2.0", false, 2, "bob").unwrap();
        releases
            .update_release("b-2.0", 3, "bob", blob_doc("b-2.0"))
            .unwrap();
    }

    #[test]
    fn test_add_locale_creates_scaffolding() {
        let releases = table();
        let mut doc = blob_doc("b-2.0");
        doc.as_object_mut().unwrap().remove("platforms");
        releases.add_release("b-2.0", "b", "2.0", doc, "bob").unwrap();

        releases
            .add_locale_to_release(
                "b-2.0",
                "q",
                "de",
                json!({"complete": {"filesize": "9", "from": "*", "hashValue": "1",
                                     "fileUrl": "http://a.com/de"}}),
                1,
                "bob",
            )
            .unwrap();

        let blob = releases.get_release_blob("b-2.0").unwrap();
        let locale = blob.data().locale_data("q", "de").unwrap();
        assert!(locale.contains_key("complete"));
    }

    #[test]
    fn test_add_locale_follows_alias() {
        let releases = table();
        releases
            .add_release("b-2.0", "b", "2.0", blob_doc("b-2.0"), "bob")
            .unwrap();

        releases
            .add_locale_to_release("b-2.0", "p2", "de", json!({"buildID": "21"}), 1, "bob")
            .unwrap();

        let blob = releases.get_release_blob("b-2.0").unwrap();
        // Landed on the aliased platform, not a new "p2" locale tree
        assert_eq!(blob.data().build_id("p", "de").unwrap(), "21");
    }

    #[test]
    fn test_add_locale_replaces_existing_entry() {
        let releases = table();
        releases
            .add_release("b-2.0", "b", "2.0", blob_doc("b-2.0"), "bob")
            .unwrap();

        releases
            .add_locale_to_release("b-2.0", "p", "l", json!({"buildID": "99"}), 1, "bob")
            .unwrap();

        let blob = releases.get_release_blob("b-2.0").unwrap();
        let locale = blob.data().locale_data("p", "l").unwrap();
        assert_eq!(locale.len(), 1);
        assert_eq!(blob.data().build_id("p", "l").unwrap(), "99");
    }

    #[test]
    fn test_add_locale_rejects_invalid_payload() {
        let releases = table();
        releases
            .add_release("b-2.0", "b", "2.0", blob_doc("b-2.0"), "bob")
            .unwrap();

        let err = releases
            .add_locale_to_release("b-2.0", "p", "l", json!({"bogus": 1}), 1, "bob")
            .unwrap_err();
        assert!(matches!(err, ReleasesError::Blob(_)));

        // Original data untouched
        let blob = releases.get_release_blob("b-2.0").unwrap();
        assert_eq!(blob.data().build_id("p", "l").unwrap(), "20");
    }

    #[test]
    fn test_add_locale_retrying_uses_current_version() {
        let releases = table();
        releases
            .add_release("b-2.0", "b", "2.0", blob_doc("b-2.0"), "bob")
            .unwrap();
        // Bump the version behind the caller's back
        releases.set_read_only("b-2.0", false, 1, "bob").unwrap();

        releases
            .add_locale_retrying("b-2.0", "p", "de", json!({"buildID": "21"}), "bob")
            .unwrap();
        let blob = releases.get_release_blob("b-2.0").unwrap();
        assert_eq!(blob.data().build_id("p", "de").unwrap(), "21");
    }

    #[test]
    fn test_blob_source_impl() {
        let releases = table();
        releases
            .add_release("b-2.0", "b", "2.0", blob_doc("b-2.0"), "bob")
            .unwrap();
        assert!(releases.blob("b-2.0").is_some());
        assert!(releases.blob("missing").is_none());
    }
}
