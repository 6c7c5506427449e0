//! The end-to-end update decision
//!
//! Ties rule matching to release blobs: find the winning rule for a
//! query, load its mapped release, and decide whether that release is a
//! real update for the client. Read-only and side-effect free apart from
//! the throttle dice roll.

use std::sync::Arc;

use crate::blobs::{BlobSource, ReleaseBlob};
use crate::rules::{Rule, RuleMatcher, UpdateQuery};

/// The answer for one update query: which rule won and which release, if
/// any, should be served.
#[derive(Debug, Clone)]
pub struct UpdateDecision {
    /// The winning rule's id.
    pub rule_id: u64,
    /// The name of the release to serve.
    pub release_name: String,
    /// The blob to render the response from.
    pub blob: ReleaseBlob,
    /// The rule's update type, passed through to rendering.
    pub update_type: String,
}

/// Resolves update queries to a served release.
pub struct ReleaseResolver<S> {
    matcher: RuleMatcher,
    source: Arc<S>,
}

impl<S: BlobSource> ReleaseResolver<S> {
    pub fn new(matcher: RuleMatcher, source: Arc<S>) -> Self {
        Self { matcher, source }
    }

    pub fn matcher(&self) -> &RuleMatcher {
        &self.matcher
    }

    /// Decides the update for a query, throttled rules rolling real dice.
    pub fn evaluate(&self, query: &UpdateQuery) -> Option<UpdateDecision> {
        let rule = self.matcher.winning_rule(query)?;
        self.decide(&rule, query)
    }

    /// Like [`evaluate`](Self::evaluate) with an injected dice roll.
    pub fn evaluate_with<F>(&self, query: &UpdateQuery, roll: F) -> Option<UpdateDecision>
    where
        F: FnMut() -> u8,
    {
        let rule = self.matcher.winning_rule_with(query, roll)?;
        self.decide(&rule, query)
    }

    /// Serves the rule's mapping when it is a genuine update for the
    /// client, else the fallback mapping, else nothing. A missing or
    /// unservable release is "no update", never an error.
    fn decide(&self, rule: &Rule, query: &UpdateQuery) -> Option<UpdateDecision> {
        let candidates = [rule.mapping.as_deref(), rule.fallback_mapping.as_deref()];
        for name in candidates.into_iter().flatten() {
            let blob = match self.source.blob(name) {
                Some(blob) => blob,
                None => continue,
            };
            if blob.should_serve_update(query) {
                return Some(UpdateDecision {
                    rule_id: rule.rule_id,
                    release_name: name.to_string(),
                    blob,
                    update_type: rule.update_type.clone(),
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobs::BlobSource;
    use crate::rules::Rule;
    use crate::store::ManualClock;
    use crate::versioned::VersionedTable;
    use serde_json::{json, Value};
    use std::collections::HashMap;

    struct MapSource(HashMap<String, ReleaseBlob>);

    impl BlobSource for MapSource {
        fn blob(&self, name: &str) -> Option<ReleaseBlob> {
            self.0.get(name).cloned()
        }
    }

    fn release(name: &str, version: &str, build_id: &str) -> Value {
        json!({
            "name": name,
            "schema_version": 1,
            "extv": version,
            "appv": version,
            "hashFunction": "sha512",
            "platforms": {
                "p": {
                    "buildID": build_id,
                    "locales": {
                        "l": {
                            "complete": {
                                "filesize": "22", "from": "*", "hashValue": "5",
                                "fileUrl": "http://a.com/z"
                            }
                        }
                    }
                }
            }
        })
    }

    fn source_with(releases: &[Value]) -> Arc<MapSource> {
        let mut map = HashMap::new();
        for doc in releases {
            let blob = ReleaseBlob::decode(doc).unwrap();
            map.insert(blob.name().unwrap().to_string(), blob);
        }
        Arc::new(MapSource(map))
    }

    fn resolver_with(rules: Vec<Rule>, releases: &[Value]) -> ReleaseResolver<MapSource> {
        let table = Arc::new(VersionedTable::new("rules", Arc::new(ManualClock::new(0))));
        for rule in rules {
            table.insert(rule, "setup").unwrap();
        }
        ReleaseResolver::new(RuleMatcher::new(table), source_with(releases))
    }

    fn query() -> UpdateQuery {
        UpdateQuery {
            product: "b".into(),
            version: "1.0".into(),
            build_id: "1".into(),
            build_target: "p".into(),
            locale: "l".into(),
            channel: "release".into(),
            ..Default::default()
        }
    }

    fn mapped_rule(rule_id: u64, mapping: &str) -> Rule {
        let mut rule = Rule::wildcard(rule_id, 100);
        rule.mapping = Some(mapping.to_string());
        rule
    }

    #[test]
    fn test_serves_mapping_when_newer() {
        let resolver = resolver_with(
            vec![mapped_rule(1, "b-2.0")],
            &[release("b-2.0", "2.0", "20")],
        );
        let decision = resolver.evaluate(&query()).unwrap();
        assert_eq!(decision.rule_id, 1);
        assert_eq!(decision.release_name, "b-2.0");
        assert_eq!(decision.update_type, "minor");
    }

    #[test]
    fn test_no_rule_means_no_update() {
        let resolver = resolver_with(vec![], &[release("b-2.0", "2.0", "20")]);
        assert!(resolver.evaluate(&query()).is_none());
    }

    #[test]
    fn test_unservable_mapping_falls_back() {
        let mut rule = mapped_rule(1, "b-0.9");
        rule.fallback_mapping = Some("b-2.0".to_string());
        let resolver = resolver_with(
            vec![rule],
            &[release("b-0.9", "0.9", "1"), release("b-2.0", "2.0", "20")],
        );
        let decision = resolver.evaluate(&query()).unwrap();
        assert_eq!(decision.release_name, "b-2.0");
    }

    #[test]
    fn test_missing_release_falls_back() {
        let mut rule = mapped_rule(1, "gone");
        rule.fallback_mapping = Some("b-2.0".to_string());
        let resolver = resolver_with(vec![rule], &[release("b-2.0", "2.0", "20")]);
        let decision = resolver.evaluate(&query()).unwrap();
        assert_eq!(decision.release_name, "b-2.0");
    }

    #[test]
    fn test_same_release_is_not_an_update() {
        let resolver = resolver_with(
            vec![mapped_rule(1, "b-1.0")],
            &[release("b-1.0", "1.0", "1")],
        );
        assert!(resolver.evaluate(&query()).is_none());
    }

    #[test]
    fn test_rule_without_mapping_serves_nothing() {
        let resolver = resolver_with(
            vec![Rule::wildcard(1, 100)],
            &[release("b-2.0", "2.0", "20")],
        );
        assert!(resolver.evaluate(&query()).is_none());
    }

    #[test]
    fn test_throttle_roll_injected() {
        let mut rule = mapped_rule(1, "b-2.0");
        rule.throttle = 25;
        let resolver = resolver_with(vec![rule], &[release("b-2.0", "2.0", "20")]);

        assert!(resolver.evaluate_with(&query(), || 10).is_some());
        assert!(resolver.evaluate_with(&query(), || 90).is_none());
    }
}
