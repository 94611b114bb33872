//! Optimization suggestion rules
//!
//! [`derive_suggestions`] is a pure function of its inputs. Rules are
//! evaluated in a fixed order so identical inputs give identical lists.

use super::AdaptiveConfigState;
use crate::cache::CacheStatistics;
use crate::config::SuggestionConfig;
use crate::memory::MemoryStatistics;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Suggestion {
    EnableLowMemoryBehaviors,
    TuneCacheSize,
    ReviewEvictionPolicy,
    DisableAnimationOptimization,
    DisablePreloading,
}

impl fmt::Display for Suggestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Suggestion::EnableLowMemoryBehaviors => {
                "Memory usage is high: enable low-memory behaviors and release cached resources"
            }
            Suggestion::TuneCacheSize => {
                "Cache hit rate is low: increase the cache size or lengthen entry TTLs"
            }
            Suggestion::ReviewEvictionPolicy => {
                "Expired entries are lingering in the cache: review the eviction policy"
            }
            Suggestion::DisableAnimationOptimization => {
                "Performance score is low: consider disabling animation optimization"
            }
            Suggestion::DisablePreloading => {
                "Performance score is low: consider disabling preloading"
            }
        };
        f.write_str(text)
    }
}

/// Everything a suggestion depends on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuggestionInputs {
    pub memory: MemoryStatistics,
    pub cache: CacheStatistics,
    pub toggles: AdaptiveConfigState,
    /// Score of the last finished run, if one produced results
    pub last_score: Option<f64>,
}

pub fn derive_suggestions(inputs: &SuggestionInputs, config: &SuggestionConfig) -> Vec<Suggestion> {
    let mut suggestions = Vec::new();

    if inputs.memory.usage_percentage() > config.high_memory_percent && inputs.toggles.memory_warnings {
        suggestions.push(Suggestion::EnableLowMemoryBehaviors);
    }

    if inputs.cache.hit_rate < config.low_hit_rate
        && inputs.cache.total_requests > config.min_cache_requests
    {
        suggestions.push(Suggestion::TuneCacheSize);
    }

    if inputs.cache.expired_items > 0 && inputs.cache.expired_items >= config.min_expired_items {
        suggestions.push(Suggestion::ReviewEvictionPolicy);
    }

    if let Some(score) = inputs.last_score {
        if score < config.min_overall_score {
            if inputs.toggles.animation_optimization {
                suggestions.push(Suggestion::DisableAnimationOptimization);
            }
            if inputs.toggles.preloading {
                suggestions.push(Suggestion::DisablePreloading);
            }
        }
    }

    suggestions
}
