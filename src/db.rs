//! Top-level wiring of tables, managers and shared services
//!
//! One `Db` owns every table the update service needs, all sharing a
//! clock and an audit sink. It exists so embedders and tests construct
//! the whole data layer in one call instead of threading Arcs by hand.

use std::sync::Arc;

use crate::blobs::RenderContext;
use crate::config::AusConfig;
use crate::observability::{AuditLog, MemoryAuditLog};
use crate::permissions::PermissionsTable;
use crate::releases::{Release, ReleasesTable};
use crate::resolver::ReleaseResolver;
use crate::rules::{Rule, RuleMatcher};
use crate::scheduled::{RequiredSignoff, ScheduledChangeManager};
use crate::store::{Clock, ManualClock, SystemClock};
use crate::versioned::VersionedTable;

fn rule_scope(rule: &Rule) -> Option<(String, String)> {
    match (&rule.product, &rule.channel) {
        (Some(product), Some(channel)) => Some((product.clone(), channel.clone())),
        _ => None,
    }
}

/// The full data layer: rules, releases, permissions, signoff policy and
/// scheduled changes over one shared clock and audit sink.
pub struct Db {
    clock: Arc<dyn Clock>,
    rules: Arc<VersionedTable<Rule>>,
    releases: Arc<ReleasesTable>,
    permissions: Arc<PermissionsTable>,
    required_signoffs: Arc<VersionedTable<RequiredSignoff>>,
    rule_changes: ScheduledChangeManager<Rule>,
    release_changes: ScheduledChangeManager<Release>,
}

impl Db {
    pub fn new(clock: Arc<dyn Clock>, audit: Arc<dyn AuditLog>) -> Self {
        let rules = Arc::new(VersionedTable::with_audit(
            "rules",
            clock.clone(),
            audit.clone(),
        ));
        let releases_table = Arc::new(VersionedTable::with_audit(
            "releases",
            clock.clone(),
            audit.clone(),
        ));
        let releases = Arc::new(ReleasesTable::with_table(releases_table.clone()));
        let permissions = Arc::new(PermissionsTable::new(clock.clone()));
        let required_signoffs = Arc::new(VersionedTable::with_audit(
            "required_signoffs",
            clock.clone(),
            audit.clone(),
        ));
        let rule_changes = ScheduledChangeManager::new(
            "rules_scheduled_changes",
            rules.clone(),
            required_signoffs.clone(),
            permissions.clone(),
            clock.clone(),
            rule_scope,
        )
        .with_audit(audit.clone());
        // Releases have no channel of their own; their changes are gated
        // by time and version checks only.
        let release_changes = ScheduledChangeManager::new(
            "releases_scheduled_changes",
            releases_table,
            required_signoffs.clone(),
            permissions.clone(),
            clock.clone(),
            |_| None,
        )
        .with_audit(audit);

        Self {
            clock,
            rules,
            releases,
            permissions,
            required_signoffs,
            rule_changes,
            release_changes,
        }
    }

    /// A fully in-memory instance on the system clock, audit kept in
    /// memory. The embedded and test default.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(SystemClock), Arc::new(MemoryAuditLog::new()))
    }

    /// An instance on a caller-controlled clock, for deterministic tests.
    pub fn with_manual_clock(start_millis: i64) -> Self {
        Self::new(
            Arc::new(ManualClock::new(start_millis)),
            Arc::new(MemoryAuditLog::new()),
        )
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn rules(&self) -> &VersionedTable<Rule> {
        &self.rules
    }

    pub fn releases(&self) -> &ReleasesTable {
        &self.releases
    }

    pub fn permissions(&self) -> &PermissionsTable {
        &self.permissions
    }

    pub fn required_signoffs(&self) -> &VersionedTable<RequiredSignoff> {
        &self.required_signoffs
    }

    pub fn rule_changes(&self) -> &ScheduledChangeManager<Rule> {
        &self.rule_changes
    }

    pub fn release_changes(&self) -> &ScheduledChangeManager<Release> {
        &self.release_changes
    }

    /// A matcher over the live rules table.
    pub fn matcher(&self) -> RuleMatcher {
        RuleMatcher::new(self.rules.clone())
    }

    /// A resolver answering queries from the live rules and releases.
    pub fn resolver(&self) -> ReleaseResolver<ReleasesTable> {
        ReleaseResolver::new(self.matcher(), self.releases.clone())
    }

    /// A render context over this database's releases.
    pub fn render_context<'a>(&'a self, config: &'a AusConfig) -> RenderContext<'a> {
        RenderContext {
            whitelisted_domains: &config.whitelisted_domains,
            special_force_hosts: &config.special_force_hosts,
            source: self.releases.as_ref(),
        }
    }
}
