//! Rules: routing predicates and the matching resolver
//!
//! A rule maps a class of update queries to a target release. The matcher
//! picks the single best-matching rule per query, honoring wildcards,
//! prefix globs, fallback channels and partial-throttled rollout.

mod matcher;
mod types;

pub use matcher::{fallback_channel, RuleMatcher, FALLBACK_CHANNEL_MARKER};
pub use types::{Rule, UpdateQuery};
