#![forbid(unsafe_code)]

//! Runtime configuration.
//!
//! A [`RuntimeConfig`] is handed to `Runtime::new` and sanitized on
//! the way in, so a zero or absurd capacity never reaches the caches.

/// How an `each` location decides how many live nodes one array item spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChunkSizing {
    /// Count the template's top-level elements when the template allows it,
    /// falling back to inference otherwise.
    #[default]
    Declared,
    /// Always infer `round(live child count / array length)`.
    Inferred,
}

/// Tunables for a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RuntimeConfig {
    /// Raise debug-channel events from `debug` to `warn` level.
    pub debug: bool,
    pub chunk_sizing: ChunkSizing,
    /// Collect element records of detached nodes after array removals.
    pub collect_garbage_after_remove: bool,
    /// Maximum number of cached query plans before the cache is flushed.
    pub plan_cache_capacity: usize,
    /// Maximum number of cached compiled expressions before the cache is
    /// flushed.
    pub expression_cache_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            debug: false,
            chunk_sizing: ChunkSizing::Declared,
            collect_garbage_after_remove: true,
            plan_cache_capacity: 512,
            expression_cache_capacity: 1024,
        }
    }
}

const MIN_CACHE_CAPACITY: usize = 16;

impl RuntimeConfig {
    /// Turn on debug-level reporting.
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub fn with_chunk_sizing(mut self, sizing: ChunkSizing) -> Self {
        self.chunk_sizing = sizing;
        self
    }

    /// Clamp cache capacities to a usable minimum.
    #[must_use]
    pub fn sanitized(&self) -> Self {
        Self {
            plan_cache_capacity: self.plan_cache_capacity.max(MIN_CACHE_CAPACITY),
            expression_cache_capacity: self.expression_cache_capacity.max(MIN_CACHE_CAPACITY),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_prefer_declared_chunks() {
        let config = RuntimeConfig::default();
        assert_eq!(config.chunk_sizing, ChunkSizing::Declared);
        assert!(config.collect_garbage_after_remove);
        assert!(!config.debug);
    }

    #[test]
    fn sanitized_clamps_capacities() {
        let config = RuntimeConfig {
            plan_cache_capacity: 0,
            expression_cache_capacity: 3,
            ..RuntimeConfig::default()
        }
        .sanitized();
        assert_eq!(config.plan_cache_capacity, MIN_CACHE_CAPACITY);
        assert_eq!(config.expression_cache_capacity, MIN_CACHE_CAPACITY);
    }

    #[test]
    fn sanitized_keeps_sane_values() {
        let config = RuntimeConfig::default().with_debug(true);
        assert_eq!(config.sanitized(), config);
    }
}
