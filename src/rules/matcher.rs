//! Rule matching and winner selection
//!
//! Resolves an update query to the single best-matching rule. Matching is
//! read-only against a snapshot of the rules table, so any number of
//! requests can evaluate concurrently.

use std::sync::Arc;

use rand::Rng;

use crate::versioned::VersionedTable;

use super::types::{Rule, UpdateQuery};

/// Reserved separator that marks a channel customization. Everything after
/// the first occurrence is stripped to obtain the fallback channel.
pub const FALLBACK_CHANNEL_MARKER: &str = "-cck-";

/// Returns the base channel a customized channel falls back to.
///
/// `"releasetest-cck-partner"` falls back to `"releasetest"`; a channel
/// without the marker falls back to itself.
pub fn fallback_channel(channel: &str) -> &str {
    match channel.find(FALLBACK_CHANNEL_MARKER) {
        Some(idx) => &channel[..idx],
        None => channel,
    }
}

/// Matches one predicate against a query value. A null predicate matches
/// anything; a trailing `*` matches any value starting with the literal
/// prefix; otherwise the match is exact.
fn matches_predicate(predicate: Option<&str>, value: &str) -> bool {
    match predicate {
        None => true,
        Some(pred) => match pred.strip_suffix('*') {
            Some(prefix) => value.starts_with(prefix),
            None => pred == value,
        },
    }
}

/// Channel predicates additionally try the query's fallback channel, so a
/// customized channel still matches rules written for its base channel.
fn matches_channel(predicate: Option<&str>, channel: &str) -> bool {
    matches_predicate(predicate, channel) || matches_predicate(predicate, fallback_channel(channel))
}

impl Rule {
    /// Whether this rule's predicates accept the query. Throttling is not
    /// part of this check.
    pub fn matches(&self, query: &UpdateQuery) -> bool {
        matches_predicate(self.product.as_deref(), &query.product)
            && matches_predicate(self.version.as_deref(), &query.version)
            && matches_channel(self.channel.as_deref(), &query.channel)
            && matches_predicate(self.build_target.as_deref(), &query.build_target)
            && matches_predicate(self.build_id.as_deref(), &query.build_id)
            && matches_predicate(self.locale.as_deref(), &query.locale)
            && matches_predicate(self.os_version.as_deref(), &query.os_version)
            && matches_predicate(self.distribution.as_deref(), &query.distribution)
            && matches_predicate(self.dist_version.as_deref(), &query.dist_version)
            && matches_predicate(self.header_architecture.as_deref(), &query.header_architecture)
    }
}

/// Resolves update queries to their winning rule.
pub struct RuleMatcher {
    rules: Arc<VersionedTable<Rule>>,
}

impl RuleMatcher {
    /// Creates a matcher over the given rules table.
    pub fn new(rules: Arc<VersionedTable<Rule>>) -> Self {
        Self { rules }
    }

    /// The rules table this matcher reads.
    pub fn rules(&self) -> &VersionedTable<Rule> {
        &self.rules
    }

    /// All rules whose predicates accept `query` and which survive the
    /// throttle dice, best match first.
    ///
    /// A rule with `throttle < 100` is a candidate only `throttle` percent
    /// of the time, evaluated independently per request with no persisted
    /// assignment.
    pub fn matching_rules(&self, query: &UpdateQuery) -> Vec<Rule> {
        let mut rng = rand::thread_rng();
        self.matching_rules_with(query, || rng.gen_range(0..100))
    }

    /// Like `matching_rules`, with the throttle dice injected. `roll` must
    /// return a value in `0..100`; a rule survives when its throttle is 100
    /// or the roll is strictly below it.
    pub fn matching_rules_with<F>(&self, query: &UpdateQuery, mut roll: F) -> Vec<Rule>
    where
        F: FnMut() -> u8,
    {
        let mut candidates: Vec<Rule> = self
            .rules
            .select_where(|rule| rule.matches(query))
            .into_iter()
            .filter(|rule| rule.throttle >= 100 || roll() < rule.throttle)
            .collect();

        // priority desc, specificity desc, rule id asc
        candidates.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.specificity().cmp(&a.specificity()))
                .then_with(|| a.rule_id.cmp(&b.rule_id))
        });
        candidates
    }

    /// The single best-matching rule for `query`, or `None` if nothing
    /// matches. An empty candidate set is not an error.
    pub fn winning_rule(&self, query: &UpdateQuery) -> Option<Rule> {
        self.matching_rules(query).into_iter().next()
    }

    /// Like `winning_rule`, with the throttle dice injected.
    pub fn winning_rule_with<F>(&self, query: &UpdateQuery, roll: F) -> Option<Rule>
    where
        F: FnMut() -> u8,
    {
        self.matching_rules_with(query, roll).into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ManualClock;

    fn matcher_with(rules: Vec<Rule>) -> RuleMatcher {
        let table = Arc::new(VersionedTable::new("rules", Arc::new(ManualClock::new(0))));
        for rule in rules {
            table.insert(rule, "test").unwrap();
        }
        RuleMatcher::new(table)
    }

    fn query() -> UpdateQuery {
        UpdateQuery::default()
    }

    #[test]
    fn test_fallback_channel_strips_customization() {
        assert_eq!(fallback_channel("releasetest-cck-partner"), "releasetest");
        assert_eq!(fallback_channel("releasetest"), "releasetest");
        assert_eq!(fallback_channel("release-cck-a-cck-b"), "release");
    }

    #[test]
    fn test_version_globbing() {
        let mut rule = Rule::wildcard(1, 100);
        rule.version = Some("4.0*".into());

        for version in ["4.0", "4.0b2", "4.0.1"] {
            let mut q = query();
            q.version = version.into();
            assert!(rule.matches(&q), "4.0* should match {}", version);
        }

        let mut q = query();
        q.version = "3.9".into();
        assert!(!rule.matches(&q));
    }

    #[test]
    fn test_channel_glob_with_fallback() {
        let mut rule = Rule::wildcard(2, 100);
        rule.channel = Some("release*".into());

        for channel in ["releasetest", "releasetest-cck-custom"] {
            let mut q = query();
            q.channel = channel.into();
            assert!(rule.matches(&q), "release* should match {}", channel);
        }

        let mut q = query();
        q.channel = "beta".into();
        assert!(!rule.matches(&q));
    }

    #[test]
    fn test_exact_channel_matches_customized_query() {
        let mut rule = Rule::wildcard(1, 100);
        rule.channel = Some("release".into());

        let mut q = query();
        q.channel = "release-cck-partner".into();
        assert!(rule.matches(&q));
    }

    #[test]
    fn test_null_predicates_match_everything() {
        let rule = Rule::wildcard(1, 100);
        let mut q = query();
        q.product = "Firefox".into();
        q.version = "99.0".into();
        assert!(rule.matches(&q));
    }

    #[test]
    fn test_higher_priority_wins() {
        let mut low = Rule::wildcard(1, 80);
        low.mapping = Some("low".into());
        let mut high = Rule::wildcard(2, 100);
        high.mapping = Some("high".into());

        let matcher = matcher_with(vec![low, high]);
        let winner = matcher.winning_rule_with(&query(), || 0).unwrap();
        assert_eq!(winner.mapping.as_deref(), Some("high"));
    }

    #[test]
    fn test_equal_priority_more_specific_wins() {
        let generic = Rule::wildcard(1, 100);
        let mut specific = Rule::wildcard(2, 100);
        specific.version = Some("3.5".into());
        specific.build_target = Some("a".into());

        let mut q = query();
        q.version = "3.5".into();
        q.build_target = "a".into();

        let matcher = matcher_with(vec![generic, specific]);
        let winner = matcher.winning_rule_with(&q, || 0).unwrap();
        assert_eq!(winner.rule_id, 2);
    }

    #[test]
    fn test_full_tie_breaks_on_rule_id() {
        let a = Rule::wildcard(7, 100);
        let b = Rule::wildcard(3, 100);

        let matcher = matcher_with(vec![a, b]);
        let winner = matcher.winning_rule_with(&query(), || 0).unwrap();
        assert_eq!(winner.rule_id, 3);
    }

    #[test]
    fn test_throttled_rule_excluded_on_high_roll() {
        let mut rule = Rule::wildcard(1, 100);
        rule.throttle = 25;

        let matcher = matcher_with(vec![rule]);
        assert!(matcher.winning_rule_with(&query(), || 25).is_none());
        assert!(matcher.winning_rule_with(&query(), || 99).is_none());
        assert!(matcher.winning_rule_with(&query(), || 24).is_some());
    }

    #[test]
    fn test_zero_throttle_never_matches() {
        let mut rule = Rule::wildcard(1, 100);
        rule.throttle = 0;

        let matcher = matcher_with(vec![rule]);
        assert!(matcher.winning_rule_with(&query(), || 0).is_none());
    }

    #[test]
    fn test_empty_candidate_set_is_no_winner() {
        let mut rule = Rule::wildcard(1, 100);
        rule.product = Some("Thunderbird".into());

        let matcher = matcher_with(vec![rule]);
        let mut q = query();
        q.product = "Firefox".into();
        assert!(matcher.winning_rule_with(&q, || 0).is_none());
    }

    #[test]
    fn test_worked_example() {
        // {priority:100, throttle:100, version:"3.5", buildTarget:"a"} -> "a"
        // {priority:80, buildTarget:"d"} -> "c"
        let mut r1 = Rule::wildcard(1, 100);
        r1.version = Some("3.5".into());
        r1.build_target = Some("a".into());
        r1.mapping = Some("a".into());
        let mut r2 = Rule::wildcard(2, 80);
        r2.build_target = Some("d".into());
        r2.mapping = Some("c".into());

        let matcher = matcher_with(vec![r1, r2]);
        let mut q = query();
        q.version = "3.5".into();
        q.build_target = "a".into();

        let winner = matcher.winning_rule_with(&q, || 0).unwrap();
        assert_eq!(winner.mapping.as_deref(), Some("a"));
    }
}
