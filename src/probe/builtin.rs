//! Built-in probe suite
//!
//! Each probe does a bounded amount of real work, checks the integrity of
//! what it produced, and fails if it ran over its wall-clock budget.

use super::{PerformanceProbe, ProbeFailure};
use crate::cache::{CacheStatisticsAggregator, TtlCache};
use crate::config::ProbeConfig;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};

const MIB: usize = 1024 * 1024;
const PAGE: usize = 4096;

/// The default suite, in execution order
pub fn default_suite(config: &ProbeConfig) -> Vec<Arc<dyn PerformanceProbe>> {
    let budget = config.per_probe_budget;
    vec![
        Arc::new(MemoryAllocationProbe {
            megabytes: config.memory_allocation_mb,
            budget,
        }),
        Arc::new(CpuHashingProbe {
            rounds: config.hashing_rounds,
            budget,
        }),
        Arc::new(CacheThroughputProbe {
            operations: config.cache_operations,
            budget,
        }),
        Arc::new(SerializationProbe {
            records: config.serialization_records,
            budget,
        }),
        Arc::new(CompressionProbe {
            bytes: config.compression_bytes,
            budget,
        }),
    ]
}

fn within_budget(started: Instant, budget: Duration) -> Result<(), ProbeFailure> {
    let elapsed = started.elapsed();
    if elapsed > budget {
        return Err(ProbeFailure::new(format!(
            "exceeded budget of {:?} ({:?} elapsed)",
            budget, elapsed
        )));
    }
    Ok(())
}

/// Allocates a buffer and touches every page of it
#[derive(Debug, Clone)]
pub struct MemoryAllocationProbe {
    pub megabytes: usize,
    pub budget: Duration,
}

impl PerformanceProbe for MemoryAllocationProbe {
    fn name(&self) -> &str {
        "memory_allocation"
    }

    fn run(&self) -> Result<(), ProbeFailure> {
        let started = Instant::now();
        let len = self.megabytes * MIB;

        let mut buffer: Vec<u8> = Vec::new();
        buffer
            .try_reserve_exact(len)
            .map_err(|e| ProbeFailure::new(format!("could not allocate {} MiB: {}", self.megabytes, e)))?;
        buffer.resize(len, 0);

        for (page, chunk) in buffer.chunks_mut(PAGE).enumerate() {
            chunk[0] = (page % 251) as u8;
        }

        let checksum: u64 = buffer.iter().step_by(PAGE).map(|b| *b as u64).sum();
        let expected: u64 = (0..len.div_ceil(PAGE)).map(|page| (page % 251) as u64).sum();
        if checksum != expected {
            return Err(ProbeFailure::new("page checksum mismatch"));
        }

        within_budget(started, self.budget)
    }
}

/// Iterated SHA-256
#[derive(Debug, Clone)]
pub struct CpuHashingProbe {
    pub rounds: u32,
    pub budget: Duration,
}

impl CpuHashingProbe {
    fn chain(&self, seed: &[u8]) -> [u8; 32] {
        let mut digest: [u8; 32] = Sha256::digest(seed).into();
        for _ in 1..self.rounds {
            digest = Sha256::digest(digest).into();
        }
        digest
    }
}

impl PerformanceProbe for CpuHashingProbe {
    fn name(&self) -> &str {
        "cpu_hashing"
    }

    fn run(&self) -> Result<(), ProbeFailure> {
        let started = Instant::now();
        let first = self.chain(b"perfwatch");
        let second = self.chain(b"perfwatch");
        if first != second {
            return Err(ProbeFailure::new("hash chain is not deterministic"));
        }
        within_budget(started, self.budget)
    }
}

/// Fills a private cache past capacity and reads every key back
#[derive(Debug, Clone)]
pub struct CacheThroughputProbe {
    pub operations: usize,
    pub budget: Duration,
}

impl PerformanceProbe for CacheThroughputProbe {
    fn name(&self) -> &str {
        "cache_throughput"
    }

    fn run(&self) -> Result<(), ProbeFailure> {
        let started = Instant::now();
        let capacity = (self.operations / 2).max(1);
        let stats = Arc::new(CacheStatisticsAggregator::new());
        let cache: TtlCache<usize, usize> =
            TtlCache::new("probe", capacity, Duration::from_secs(60), stats.clone());

        for key in 0..self.operations {
            cache.insert(key, key * 2);
        }
        for key in 0..self.operations {
            if let Some(value) = cache.get(&key) {
                if value != key * 2 {
                    return Err(ProbeFailure::new(format!("corrupt value for key {}", key)));
                }
            }
        }

        let expected_hits = self.operations.min(capacity) as u64;
        let snapshot = stats.snapshot();
        if snapshot.hit_count != expected_hits {
            return Err(ProbeFailure::new(format!(
                "expected {} hits, observed {}",
                expected_hits, snapshot.hit_count
            )));
        }

        within_budget(started, self.budget)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ProbeRecord {
    id: u64,
    label: String,
    samples: Vec<f64>,
    active: bool,
}

/// JSON round trip of a batch of records
#[derive(Debug, Clone)]
pub struct SerializationProbe {
    pub records: usize,
    pub budget: Duration,
}

impl PerformanceProbe for SerializationProbe {
    fn name(&self) -> &str {
        "serialization"
    }

    fn run(&self) -> Result<(), ProbeFailure> {
        let started = Instant::now();
        let records: Vec<ProbeRecord> = (0..self.records as u64)
            .map(|id| ProbeRecord {
                id,
                label: format!("record-{}", id),
                samples: (0..8).map(|i| (id * 8 + i) as f64 * 0.5).collect(),
                active: id % 3 == 0,
            })
            .collect();

        let encoded = serde_json::to_vec(&records)
            .map_err(|e| ProbeFailure::new(format!("encode failed: {}", e)))?;
        let decoded: Vec<ProbeRecord> = serde_json::from_slice(&encoded)
            .map_err(|e| ProbeFailure::new(format!("decode failed: {}", e)))?;

        if decoded != records {
            return Err(ProbeFailure::new("round trip altered records"));
        }
        within_budget(started, self.budget)
    }
}

/// LZ4 round trip of a semi-repetitive payload
#[derive(Debug, Clone)]
pub struct CompressionProbe {
    pub bytes: usize,
    pub budget: Duration,
}

impl PerformanceProbe for CompressionProbe {
    fn name(&self) -> &str {
        "compression"
    }

    fn run(&self) -> Result<(), ProbeFailure> {
        let started = Instant::now();
        let payload: Vec<u8> = (0..self.bytes)
            .map(|i| ((i / 64) as u8).wrapping_mul(31) ^ (i % 7) as u8)
            .collect();

        let compressed = lz4_flex::compress_prepend_size(&payload);
        let restored = lz4_flex::decompress_size_prepended(&compressed)
            .map_err(|e| ProbeFailure::new(format!("decompress failed: {}", e)))?;

        if restored != payload {
            return Err(ProbeFailure::new("round trip altered payload"));
        }
        within_budget(started, self.budget)
    }
}
