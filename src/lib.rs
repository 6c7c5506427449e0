//! skylift - a software-update distribution backend
//!
//! Routes client update queries through prioritized rules to versioned
//! release blobs, with optimistic-concurrency storage, full row history,
//! and signoff-gated scheduled changes.

pub mod blobs;
pub mod config;
pub mod db;
pub mod observability;
pub mod permissions;
pub mod releases;
pub mod resolver;
pub mod rules;
pub mod scheduled;
pub mod store;
pub mod versioned;
