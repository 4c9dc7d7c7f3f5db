//! Domain logic for interaction ingestion and aggregation
//!
//! - `stats` - Welford-style running statistics shared by every profile
//! - `interaction` - the `Interaction` input record, validation, fingerprinting
//! - `dimensions` - Endpoint/Origin/Entity/Property dedup registries
//! - `interval` - calendar intervals and the generic bucket store
//! - `profile` - per-dimension interval-stats payloads
//! - `session` - per-user session state and cache
//! - `summary` - global per-interval roll-ups
//! - `storage` - the persistence contract and filesystem implementation
//! - `pipeline` - ordering buffer, batch worker, and event fan-out

pub mod dimensions;
pub mod interaction;
pub mod interval;
pub mod pipeline;
pub mod profile;
pub mod session;
pub mod stats;
pub mod storage;
pub mod summary;
