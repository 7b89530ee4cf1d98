//! Layered configuration for a queue.

/// Hard upper bound on the number of reliable (slot-holding) consumers a
/// single queue can register. Mirrors the compile-time default used by the
/// back-pressure core's slot table.
pub const MAX_NO_DROP_CONSUMERS: usize = 4;

/// Configuration for a `Source`/`Sink` pair sharing one ring.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Ring capacity as a power of two (default: 20 = 1 MiB).
    pub capacity_bits: u8,
    /// Maximum number of reliable consumers this queue accepts. Must not
    /// exceed [`MAX_NO_DROP_CONSUMERS`].
    pub max_no_drop_consumers: usize,
    /// Size, in bytes, of each consumer's optional prefetch cache. Zero
    /// disables the cache.
    pub prefetch_cache_size: usize,
    /// Enable the relaxed-atomic counters in `Metrics` (slight overhead).
    pub enable_metrics: bool,
}

impl Config {
    /// Creates a new configuration with custom settings.
    ///
    /// # Panics
    ///
    /// Panics if `capacity_bits` is 0 or greater than 32, or if
    /// `max_no_drop_consumers` is 0 or exceeds [`MAX_NO_DROP_CONSUMERS`].
    pub const fn new(
        capacity_bits: u8,
        max_no_drop_consumers: usize,
        prefetch_cache_size: usize,
        enable_metrics: bool,
    ) -> Self {
        assert!(
            capacity_bits > 0 && capacity_bits <= 32,
            "capacity_bits must be between 1 and 32"
        );
        assert!(
            max_no_drop_consumers > 0 && max_no_drop_consumers <= MAX_NO_DROP_CONSUMERS,
            "max_no_drop_consumers must be between 1 and MAX_NO_DROP_CONSUMERS"
        );

        Self {
            capacity_bits,
            max_no_drop_consumers,
            prefetch_cache_size,
            enable_metrics,
        }
    }

    /// Returns the ring capacity in bytes.
    #[inline]
    pub const fn capacity(&self) -> usize {
        1 << self.capacity_bits
    }

    /// Returns the mask used for wrapping byte offsets into the ring.
    #[inline]
    pub const fn mask(&self) -> usize {
        self.capacity() - 1
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capacity_bits: 20, // 1 MiB
            max_no_drop_consumers: MAX_NO_DROP_CONSUMERS,
            prefetch_cache_size: 0,
            enable_metrics: false,
        }
    }
}

/// Low-latency preset: a small ring that fits comfortably in L2, no prefetch
/// cache (every pop goes straight to the ring), metrics off.
pub const LOW_LATENCY_CONFIG: Config = Config::new(16, MAX_NO_DROP_CONSUMERS, 0, false);

/// High-throughput preset: a large ring plus a prefetch cache sized to
/// amortize shared-memory traffic across many small records.
pub const HIGH_THROUGHPUT_CONFIG: Config = Config::new(24, MAX_NO_DROP_CONSUMERS, 64 * 1024, false);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_and_mask_match_bits() {
        let cfg = Config::new(10, 2, 0, false);
        assert_eq!(cfg.capacity(), 1024);
        assert_eq!(cfg.mask(), 1023);
    }

    #[test]
    #[should_panic(expected = "max_no_drop_consumers")]
    fn rejects_too_many_consumers() {
        let _ = Config::new(10, MAX_NO_DROP_CONSUMERS + 1, 0, false);
    }

    #[test]
    fn presets_are_internally_consistent() {
        assert!(LOW_LATENCY_CONFIG.capacity() < HIGH_THROUGHPUT_CONFIG.capacity());
        assert_eq!(HIGH_THROUGHPUT_CONFIG.prefetch_cache_size, 64 * 1024);
    }
}
