//! Scheduled changes: propose now, enact later, with signoffs
//!
//! A scheduled change stages a mutation against a target table until its
//! scheduled time arrives and enough humans have signed off. Changes live
//! in their own versioned table, so proposals have the same history and
//! concurrency semantics as the rows they will eventually touch.
//!
//! Lifecycle: a pending change may be updated (which resets its
//! signoffs), deleted, or enacted. Enacting performs the target mutation
//! through the ordinary versioned-table path, attributed to the original
//! proposer, and marks the change complete. Complete is terminal.

mod errors;
mod types;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

pub use errors::{ScheduledError, ScheduledResult};
pub use types::{ChangeType, RequiredSignoff, ScheduledChange};

use crate::observability::{AuditAction, AuditLog, AuditRecord, Logger, NullAuditLog};
use crate::permissions::PermissionsTable;
use crate::store::Clock;
use crate::versioned::{Record, VersionedTable};

/// Maps a target row to the (product, channel) scope its signoff policy
/// lives under. Rows outside any scope need no signoffs.
pub type ScopeFn<R> = fn(&R) -> Option<(String, String)>;

/// Stages and enacts changes against one target table.
pub struct ScheduledChangeManager<R: Record> {
    target: Arc<VersionedTable<R>>,
    changes: Arc<VersionedTable<ScheduledChange<R>>>,
    required_signoffs: Arc<VersionedTable<RequiredSignoff>>,
    permissions: Arc<PermissionsTable>,
    // sc_id -> username -> role
    signoffs: RwLock<BTreeMap<u64, BTreeMap<String, String>>>,
    // Serializes lifecycle mutations: enact must see a stable change row
    // and signoff set across the signoff check, the target write and the
    // completion mark.
    gate: Mutex<()>,
    scope: ScopeFn<R>,
    next_sc_id: AtomicU64,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditLog>,
}

impl<R: Record> ScheduledChangeManager<R> {
    pub fn new(
        changes_table: &'static str,
        target: Arc<VersionedTable<R>>,
        required_signoffs: Arc<VersionedTable<RequiredSignoff>>,
        permissions: Arc<PermissionsTable>,
        clock: Arc<dyn Clock>,
        scope: ScopeFn<R>,
    ) -> Self {
        Self {
            target,
            changes: Arc::new(VersionedTable::new(changes_table, clock.clone())),
            required_signoffs,
            permissions,
            signoffs: RwLock::new(BTreeMap::new()),
            gate: Mutex::new(()),
            scope,
            next_sc_id: AtomicU64::new(1),
            clock,
            audit: Arc::new(NullAuditLog),
        }
    }

    /// Wires lifecycle events (proposed, signoffs, enacted) to an audit
    /// sink.
    pub fn with_audit(mut self, audit: Arc<dyn AuditLog>) -> Self {
        self.audit = audit;
        self
    }

    /// The target table changes are enacted against.
    pub fn target(&self) -> &VersionedTable<R> {
        &self.target
    }

    /// The scheduled-changes table itself, for history queries.
    pub fn changes(&self) -> &VersionedTable<ScheduledChange<R>> {
        &self.changes
    }

    pub fn get_change(&self, sc_id: u64) -> ScheduledResult<ScheduledChange<R>> {
        Ok(self.changes.get_required(&sc_id)?)
    }

    /// All changes not yet enacted.
    pub fn pending_changes(&self) -> Vec<ScheduledChange<R>> {
        self.changes.select_where(|c| !c.complete)
    }

    /// Current signoffs on a change, username to role.
    pub fn signoffs(&self, sc_id: u64) -> BTreeMap<String, String> {
        self.signoffs
            .read()
            .expect("signoff lock poisoned")
            .get(&sc_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Stages a change. Inserts carry the full new row and no expected
    /// version; updates carry both; deletes carry only the expected
    /// version. Updates and deletes require the target row to exist now,
    /// inserts require it not to, and a proposed row must be keyed by
    /// `base_key`.
    pub fn propose(
        &self,
        change_type: ChangeType,
        when: i64,
        base_key: R::Key,
        base: Option<R>,
        base_data_version: Option<u64>,
        scheduled_by: &str,
    ) -> ScheduledResult<ScheduledChange<R>> {
        match change_type {
            ChangeType::Insert => {
                if base.is_none() || base_data_version.is_some() {
                    return Err(ScheduledError::InvalidChange(
                        "an insert carries a row and no base data_version".to_string(),
                    ));
                }
                if self.target.get(&base_key).is_some() {
                    return Err(ScheduledError::InvalidChange(format!(
                        "target row {:?} already exists",
                        base_key
                    )));
                }
            }
            ChangeType::Update => {
                if base.is_none() || base_data_version.is_none() {
                    return Err(ScheduledError::InvalidChange(
                        "an update carries a row and a base data_version".to_string(),
                    ));
                }
                self.target.get_required(&base_key)?;
            }
            ChangeType::Delete => {
                if base.is_some() || base_data_version.is_none() {
                    return Err(ScheduledError::InvalidChange(
                        "a delete carries a base data_version and no row".to_string(),
                    ));
                }
                self.target.get_required(&base_key)?;
            }
        }
        if let Some(row) = &base {
            if row.key() != base_key {
                return Err(ScheduledError::InvalidChange(format!(
                    "proposed row is keyed {:?}, not {:?}",
                    row.key(),
                    base_key
                )));
            }
        }

        let sc_id = self.next_sc_id.fetch_add(1, Ordering::SeqCst);
        let change = ScheduledChange {
            sc_id,
            scheduled_by: scheduled_by.to_string(),
            change_type,
            when,
            complete: false,
            base_key,
            base,
            base_data_version,
            data_version: 0,
        };
        let inserted = self.changes.insert(change, scheduled_by)?;
        self.record_event(AuditAction::ChangeProposed, scheduled_by, sc_id);
        Ok(inserted)
    }

    /// Adds a signoff in one of the signer's roles. Signing the same
    /// change twice in the same role is a no-op; a user gets one signoff,
    /// so a second role is rejected.
    pub fn signoff(&self, sc_id: u64, username: &str, role: &str) -> ScheduledResult<()> {
        let _gate = self.gate.lock().expect("lifecycle lock poisoned");
        let change = self.get_change(sc_id)?;
        if change.complete {
            return Err(ScheduledError::AlreadyComplete(sc_id));
        }
        if !self.permissions.has_role(username, role) {
            return Err(ScheduledError::RoleNotHeld {
                username: username.to_string(),
                role: role.to_string(),
            });
        }

        let mut signoffs = self.signoffs.write().expect("signoff lock poisoned");
        let entry = signoffs.entry(sc_id).or_default();
        if let Some(held) = entry.get(username) {
            if held == role {
                return Ok(());
            }
            return Err(ScheduledError::SignoffRoleConflict {
                sc_id,
                username: username.to_string(),
                held: held.clone(),
            });
        }
        entry.insert(username.to_string(), role.to_string());
        drop(signoffs);

        self.record_event(AuditAction::SignoffAdded, username, sc_id);
        Ok(())
    }

    /// Withdraws a user's signoff.
    pub fn revoke_signoff(&self, sc_id: u64, username: &str) -> ScheduledResult<()> {
        let _gate = self.gate.lock().expect("lifecycle lock poisoned");
        let change = self.get_change(sc_id)?;
        if change.complete {
            return Err(ScheduledError::AlreadyComplete(sc_id));
        }

        let mut signoffs = self.signoffs.write().expect("signoff lock poisoned");
        let removed = signoffs
            .get_mut(&sc_id)
            .and_then(|entry| entry.remove(username));
        drop(signoffs);
        if removed.is_none() {
            return Err(ScheduledError::SignoffNotFound {
                sc_id,
                username: username.to_string(),
            });
        }

        self.record_event(AuditAction::SignoffRevoked, username, sc_id);
        Ok(())
    }

    /// Rewrites a pending change, version-checked. Existing signoffs no
    /// longer apply to the new content and are cleared.
    pub fn update_change<F>(
        &self,
        sc_id: u64,
        old_data_version: u64,
        changed_by: &str,
        edit: F,
    ) -> ScheduledResult<u64>
    where
        F: FnOnce(&mut ScheduledChange<R>),
    {
        let _gate = self.gate.lock().expect("lifecycle lock poisoned");
        let change = self.get_change(sc_id)?;
        if change.complete {
            return Err(ScheduledError::AlreadyComplete(sc_id));
        }
        let new_version = self
            .changes
            .update(&sc_id, old_data_version, changed_by, edit)?;
        self.signoffs
            .write()
            .expect("signoff lock poisoned")
            .remove(&sc_id);
        Ok(new_version)
    }

    /// Removes a pending change and its signoffs, version-checked.
    pub fn delete_change(
        &self,
        sc_id: u64,
        old_data_version: u64,
        changed_by: &str,
    ) -> ScheduledResult<()> {
        let _gate = self.gate.lock().expect("lifecycle lock poisoned");
        let change = self.get_change(sc_id)?;
        if change.complete {
            return Err(ScheduledError::AlreadyComplete(sc_id));
        }
        self.changes.delete(&sc_id, old_data_version, changed_by)?;
        self.signoffs
            .write()
            .expect("signoff lock poisoned")
            .remove(&sc_id);
        Ok(())
    }

    /// Applies a due change to the target table and marks it complete.
    ///
    /// Fails with `NotReady` before the scheduled time, `AlreadyComplete`
    /// on a second enactment, and `SignoffRequired` while any required
    /// role is short of signoffs. The target mutation runs version-checked
    /// and is attributed to the original proposer; a conflicting direct
    /// write in the meantime surfaces as `OutdatedData`. Lifecycle calls
    /// on the same manager are serialized, so a concurrent edit or
    /// revocation cannot interleave with an enactment in progress.
    pub fn enact(&self, sc_id: u64, enacted_by: &str, now: i64) -> ScheduledResult<()> {
        let _gate = self.gate.lock().expect("lifecycle lock poisoned");
        let change = self.get_change(sc_id)?;
        if change.complete {
            return Err(ScheduledError::AlreadyComplete(sc_id));
        }
        if now < change.when {
            return Err(ScheduledError::NotReady {
                sc_id,
                when: change.when,
                now,
            });
        }
        self.check_signoffs(&change)?;

        match change.change_type {
            ChangeType::Insert => {
                let base = change
                    .base
                    .clone()
                    .ok_or_else(|| ScheduledError::InvalidChange("insert without a row".into()))?;
                self.target.insert(base, &change.scheduled_by)?;
            }
            ChangeType::Update => {
                let base = change
                    .base
                    .clone()
                    .ok_or_else(|| ScheduledError::InvalidChange("update without a row".into()))?;
                let base_data_version = change.base_data_version.ok_or_else(|| {
                    ScheduledError::InvalidChange("update without a base data_version".into())
                })?;
                self.target.update(
                    &change.base_key,
                    base_data_version,
                    &change.scheduled_by,
                    |row| *row = base,
                )?;
            }
            ChangeType::Delete => {
                let base_data_version = change.base_data_version.ok_or_else(|| {
                    ScheduledError::InvalidChange("delete without a base data_version".into())
                })?;
                self.target
                    .delete(&change.base_key, base_data_version, &change.scheduled_by)?;
            }
        }

        self.changes
            .update(&sc_id, change.data_version, enacted_by, |c| {
                c.complete = true;
            })?;
        self.record_event(AuditAction::ChangeEnacted, enacted_by, sc_id);
        Logger::info(
            "CHANGE_ENACTED",
            &[
                ("table", self.target.name()),
                ("sc_id", &sc_id.to_string()),
                ("enacted_by", enacted_by),
            ],
        );
        Ok(())
    }

    /// The row whose scope decides the signoff policy: the proposed row
    /// for inserts and updates, the current row for deletes.
    fn check_signoffs(&self, change: &ScheduledChange<R>) -> ScheduledResult<()> {
        let scope_row = match &change.base {
            Some(base) => base.clone(),
            None => self.target.get_required(&change.base_key)?,
        };
        let (product, channel) = match (self.scope)(&scope_row) {
            Some(scope) => scope,
            None => return Ok(()),
        };

        let policy = self
            .required_signoffs
            .select_where(|rs: &RequiredSignoff| rs.product == product && rs.channel == channel);
        if policy.is_empty() {
            return Ok(());
        }

        let signoffs = self.signoffs(change.sc_id);
        for required in policy {
            let have = signoffs
                .values()
                .filter(|role| **role == required.role)
                .count() as u32;
            if have < required.signoffs_required {
                return Err(ScheduledError::SignoffRequired {
                    role: required.role,
                    required: required.signoffs_required,
                    have,
                });
            }
        }
        Ok(())
    }

    fn record_event(&self, action: AuditAction, changed_by: &str, sc_id: u64) {
        let record = AuditRecord::new(
            self.clock.now_millis(),
            self.changes.name(),
            action,
            changed_by,
            sc_id.to_string(),
        );
        if let Err(err) = self.audit.record(record) {
            Logger::warn(
                "AUDIT_WRITE_FAILED",
                &[
                    ("table", self.changes.name()),
                    ("action", action.as_str()),
                    ("error", &err.to_string()),
                ],
            );
        }
    }
}
