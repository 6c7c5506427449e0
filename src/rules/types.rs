//! Rule and query row types

use serde::{Deserialize, Serialize};

use crate::versioned::Record;

/// A routing predicate mapping a class of update queries to a release.
///
/// Every predicate field is nullable; a `None` predicate matches all
/// queries. `rule_id` is immutable for the row's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Immutable row id
    pub rule_id: u64,
    /// Higher priority wins
    pub priority: i32,
    /// Name of the release to serve
    pub mapping: Option<String>,
    /// Release served when the mapped release declines the request
    pub fallback_mapping: Option<String>,
    /// Percent (0-100) of matching traffic this rule is eligible for
    pub throttle: u8,
    /// Update type stamped on the response (e.g. "minor")
    pub update_type: String,
    /// Product predicate
    pub product: Option<String>,
    /// Version predicate; exact, or prefix glob with a trailing `*`
    pub version: Option<String>,
    /// Channel predicate; exact, prefix glob, or matched via the fallback
    /// channel
    pub channel: Option<String>,
    /// Build target (platform) predicate
    pub build_target: Option<String>,
    /// Build id predicate
    pub build_id: Option<String>,
    /// Locale predicate
    pub locale: Option<String>,
    /// OS version predicate
    pub os_version: Option<String>,
    /// Distribution predicate
    pub distribution: Option<String>,
    /// Distribution version predicate
    pub dist_version: Option<String>,
    /// Header architecture predicate
    pub header_architecture: Option<String>,
    /// Optimistic-concurrency counter
    pub data_version: u64,
}

impl Rule {
    /// A rule with the given id and priority that matches everything.
    pub fn wildcard(rule_id: u64, priority: i32) -> Self {
        Self {
            rule_id,
            priority,
            mapping: None,
            fallback_mapping: None,
            throttle: 100,
            update_type: "minor".to_string(),
            product: None,
            version: None,
            channel: None,
            build_target: None,
            build_id: None,
            locale: None,
            os_version: None,
            distribution: None,
            dist_version: None,
            header_architecture: None,
            data_version: 0,
        }
    }

    /// Count of non-null predicate fields. More constraints means a more
    /// specific rule, which wins ties between equal priorities.
    pub fn specificity(&self) -> usize {
        [
            &self.product,
            &self.version,
            &self.channel,
            &self.build_target,
            &self.build_id,
            &self.locale,
            &self.os_version,
            &self.distribution,
            &self.dist_version,
            &self.header_architecture,
        ]
        .iter()
        .filter(|field| field.is_some())
        .count()
    }
}

impl Record for Rule {
    type Key = u64;

    fn key(&self) -> u64 {
        self.rule_id
    }

    fn data_version(&self) -> u64 {
        self.data_version
    }

    fn set_data_version(&mut self, version: u64) {
        self.data_version = version;
    }
}

/// An inbound update query, as handed over verbatim by the HTTP layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateQuery {
    /// Product name
    pub product: String,
    /// Application version the client is running
    pub version: String,
    /// Update channel, possibly carrying a customization suffix
    pub channel: String,
    /// Platform identifier
    pub build_target: String,
    /// Build id the client is running
    pub build_id: String,
    /// Client locale
    pub locale: String,
    /// OS version string
    pub os_version: String,
    /// Distribution name
    pub distribution: String,
    /// Distribution version
    pub dist_version: String,
    /// Architecture advertised in request headers
    pub header_architecture: String,
    /// Whether the client asked to bypass download throttling
    pub force: bool,
}
