// kyc-realtime-kit/src/cache/mod.rs

//! Scope-keyed query caching and the coordinator that keeps it in step with
//! server-pushed events.

pub mod coordinator;
pub mod key;
pub mod store;
