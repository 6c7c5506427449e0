//! Versioned Table Invariant Tests
//!
//! Tests for the optimistic-concurrency data layer:
//! - History shape per mutation kind
//! - Stale-version rejection leaves state untouched
//! - At most one winner between racing writers

use std::sync::Arc;
use std::thread;

use skylift::observability::{AuditAction, MemoryAuditLog};
use skylift::rules::Rule;
use skylift::store::{with_retry, ManualClock, RetryPolicy};
use skylift::versioned::{VersionedError, VersionedTable};

fn table() -> (Arc<VersionedTable<Rule>>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(1_000_000));
    (
        Arc::new(VersionedTable::new("rules", clock.clone())),
        clock,
    )
}

// =============================================================================
// History Shape
// =============================================================================

/// Every insert produces exactly two history rows: the absent snapshot one
/// millisecond earlier, then the full row.
#[test]
fn test_insert_writes_absent_then_full_snapshot() {
    let (table, _clock) = table();
    table.insert(Rule::wildcard(1, 100), "bob").unwrap();

    let history = table.history_for(&1);
    assert_eq!(history.len(), 2);
    assert!(history[0].is_absent());
    assert!(!history[1].is_absent());
    assert_eq!(history[0].timestamp, history[1].timestamp - 1);
}

/// Updates and deletes each append exactly one pre-image row, so the full
/// lifecycle of a row leaves a complete before-state trail.
#[test]
fn test_update_and_delete_append_pre_images() {
    let (table, _clock) = table();
    table.insert(Rule::wildcard(1, 100), "bob").unwrap();
    table.update(&1, 1, "jan", |r| r.priority = 50).unwrap();
    table.delete(&1, 2, "kim").unwrap();

    let history = table.history_for(&1);
    assert_eq!(history.len(), 4);

    // The update's snapshot is the state before the update
    let update_row = &history[2];
    assert_eq!(update_row.changed_by, "jan");
    let snapshot: Rule =
        serde_json::from_value(update_row.snapshot.clone().unwrap()).unwrap();
    assert_eq!(snapshot.priority, 100);
    assert_eq!(snapshot.data_version, 1);

    // The delete's snapshot is the state before the delete
    let delete_row = &history[3];
    let snapshot: Rule =
        serde_json::from_value(delete_row.snapshot.clone().unwrap()).unwrap();
    assert_eq!(snapshot.priority, 50);
    assert_eq!(snapshot.data_version, 2);
}

/// change_ids are strictly increasing across the whole table.
#[test]
fn test_change_ids_strictly_increase() {
    let (table, _clock) = table();
    table.insert(Rule::wildcard(1, 100), "bob").unwrap();
    table.insert(Rule::wildcard(2, 90), "bob").unwrap();
    table.update(&1, 1, "bob", |r| r.priority = 10).unwrap();

    let ids: Vec<u64> = table.history().iter().map(|h| h.change_id).collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(ids, sorted);
}

// =============================================================================
// Version Checking
// =============================================================================

/// A stale expected version always fails and changes nothing, not even
/// history.
#[test]
fn test_stale_version_rejected_without_side_effects() {
    let (table, _clock) = table();
    table.insert(Rule::wildcard(1, 100), "bob").unwrap();
    table.update(&1, 1, "bob", |r| r.priority = 50).unwrap();

    let history_before = table.history().len();
    let err = table.update(&1, 1, "jan", |r| r.priority = 1).unwrap_err();
    assert!(matches!(
        err,
        VersionedError::OutdatedData { expected: 1, actual: 2, .. }
    ));
    let err = table.delete(&1, 1, "jan").unwrap_err();
    assert!(matches!(err, VersionedError::OutdatedData { .. }));

    assert_eq!(table.get(&1).unwrap().priority, 50);
    assert_eq!(table.history().len(), history_before);
}

/// Duplicate inserts collide on the primary key.
#[test]
fn test_duplicate_insert_rejected() {
    let (table, _clock) = table();
    table.insert(Rule::wildcard(1, 100), "bob").unwrap();
    let err = table.insert(Rule::wildcard(1, 50), "jan").unwrap_err();
    assert!(matches!(err, VersionedError::AlreadyExists { .. }));
    assert_eq!(table.get(&1).unwrap().priority, 100);
}

// =============================================================================
// Concurrency
// =============================================================================

/// Two writers racing from the same read: exactly one wins, the other
/// observes OutdatedData.
#[test]
fn test_racing_writers_one_winner() {
    let (table, _clock) = table();
    table.insert(Rule::wildcard(1, 100), "bob").unwrap();

    let handles: Vec<_> = (0..2)
        .map(|i| {
            let table = table.clone();
            thread::spawn(move || table.update(&1, 1, "racer", move |r| r.priority = i))
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, VersionedError::OutdatedData { .. })));
    assert_eq!(table.get(&1).unwrap().data_version, 2);
}

/// The loser of a race succeeds after a fresh read inside the retry
/// helper.
#[test]
fn test_conflict_resolved_by_reread_and_retry() {
    let (table, _clock) = table();
    table.insert(Rule::wildcard(1, 100), "bob").unwrap();
    // Another writer already bumped the version
    table.update(&1, 1, "jan", |r| r.priority = 50).unwrap();

    let result = with_retry(
        RetryPolicy::immediate(3),
        VersionedError::is_retryable,
        || {
            let current = table.get_required(&1)?;
            table.update(&1, current.data_version, "kim", |r| r.priority = 25)
        },
    );
    assert!(result.is_ok());
    assert_eq!(table.get(&1).unwrap().priority, 25);
}

// =============================================================================
// Audit Wiring
// =============================================================================

/// Every mutation kind lands in the audit log with its actor.
#[test]
fn test_mutations_audited() {
    let clock = Arc::new(ManualClock::new(5_000));
    let audit = Arc::new(MemoryAuditLog::new());
    let table: VersionedTable<Rule> =
        VersionedTable::with_audit("rules", clock, audit.clone());

    table.insert(Rule::wildcard(1, 100), "bob").unwrap();
    table.update(&1, 1, "jan", |r| r.priority = 10).unwrap();
    table.delete(&1, 2, "kim").unwrap();

    let records = audit.records();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].action, AuditAction::Insert);
    assert_eq!(records[1].action, AuditAction::Update);
    assert_eq!(records[1].changed_by, "jan");
    assert_eq!(records[2].action, AuditAction::Delete);
    assert!(records.iter().all(|r| r.table == "rules"));
}
