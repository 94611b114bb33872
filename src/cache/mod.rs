//! Cache instrumentation for perfwatch

pub mod statistics;
pub mod ttl_cache;

pub use statistics::{CacheObserver, CacheStatistics, CacheStatisticsAggregator};
pub use ttl_cache::TtlCache;
