//! Explicitly constructed caches handed to the orchestrator at build time.

mod binary;
mod ttl;

pub use binary::BinaryResolver;
pub use ttl::TtlCache;
