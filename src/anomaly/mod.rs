//! Pattern detectors producing severity-tagged findings.
//!
//! Each detector is deterministic given its inputs and yields zero or one
//! finding. Only the ownership detector touches shared state: it reads and
//! rewrites the cache entry it compares against.

pub mod gopatterns;
pub mod growth;
pub mod namespace;
pub mod ownership;
pub mod similarity;
