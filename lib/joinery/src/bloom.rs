//! Seeded-hash Bloom filter used by the semi-join mapper.
//!
//! Each of the k hash slots runs xxh32 over the item with its own seed and
//! reduces the result modulo the bit count. Seeds are drawn once when the
//! filter is built, so `add` and `contains` always agree for a given filter.
//!
//! - No false negatives: every added item reports `contains == true`.
//! - False positives are bounded by roughly `(1 - e^(-k*n/m))^k`.

use rand::Rng;
use xxhash_rust::xxh32::xxh32;

use crate::constants::{DEFAULT_BLOOM_BITS, DEFAULT_BLOOM_HASHES, ENV_BLOOM_BITS, ENV_BLOOM_HASHES};
use crate::error::JoinError;
use crate::utils::env_parse;

/// A hash produces 32 bits, so larger arrays would leave bits unreachable.
pub const MAX_BITS: u64 = 1 << 32;

/// Filter sizing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BloomConfig {
    pub num_bits: usize,
    pub num_hashes: usize,
}

impl Default for BloomConfig {
    fn default() -> Self { Self { num_bits: DEFAULT_BLOOM_BITS, num_hashes: DEFAULT_BLOOM_HASHES } }
}

impl BloomConfig {
    pub fn from_env() -> Self {
        Self {
            num_bits: env_parse(ENV_BLOOM_BITS).unwrap_or(DEFAULT_BLOOM_BITS),
            num_hashes: env_parse(ENV_BLOOM_HASHES).unwrap_or(DEFAULT_BLOOM_HASHES),
        }
    }

    /// Optimal sizing for `expected` items at false-positive rate `fp_rate`:
    /// m = -n ln p / ln²2, k = m/n ln 2.
    pub fn for_capacity(expected: usize, fp_rate: f64) -> Result<Self, JoinError> {
        if expected == 0 || !(fp_rate > 0.0 && fp_rate < 1.0) {
            return Err(JoinError::Config(format!(
                "bloom capacity needs expected > 0 and 0 < fp_rate < 1, got {expected} / {fp_rate}"
            )));
        }
        let n = expected as f64;
        let ln2 = std::f64::consts::LN_2;
        let num_bits = ((-n * fp_rate.ln()) / (ln2 * ln2)).ceil().clamp(64.0, MAX_BITS as f64) as usize;
        let num_hashes = ((num_bits as f64 / n) * ln2).round().max(1.0) as usize;
        Ok(Self { num_bits, num_hashes })
    }

    fn validate(&self) -> Result<(), JoinError> {
        if self.num_bits == 0 || self.num_bits as u64 > MAX_BITS {
            return Err(JoinError::Config(format!("bloom num_bits must be in 1..={MAX_BITS}, got {}", self.num_bits)));
        }
        if self.num_hashes == 0 {
            return Err(JoinError::Config("bloom num_hashes must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: usize,
    seeds: Vec<u32>,
}

impl BloomFilter {
    /// Builds an empty filter with seeds drawn from the thread RNG.
    pub fn new(num_bits: usize, num_hashes: usize) -> Result<Self, JoinError> {
        Self::with_rng(num_bits, num_hashes, &mut rand::rng())
    }

    pub fn from_config(config: BloomConfig) -> Result<Self, JoinError> { Self::new(config.num_bits, config.num_hashes) }

    pub fn with_rng<R: Rng + ?Sized>(num_bits: usize, num_hashes: usize, rng: &mut R) -> Result<Self, JoinError> {
        BloomConfig { num_bits, num_hashes }.validate()?;
        let seeds = (0..num_hashes).map(|_| rng.random::<u32>()).collect();
        Self::with_seeds(num_bits, seeds)
    }

    /// Builds a filter with caller-chosen seeds; one hash slot per seed.
    pub fn with_seeds(num_bits: usize, seeds: Vec<u32>) -> Result<Self, JoinError> {
        BloomConfig { num_bits, num_hashes: seeds.len() }.validate()?;
        Ok(Self { bits: vec![0u64; num_bits.div_ceil(64)], num_bits, seeds })
    }

    pub fn add(&mut self, item: &[u8]) {
        for &seed in &self.seeds {
            let idx = self.bit_index(item, seed);
            self.bits[idx / 64] |= 1u64 << (idx % 64);
        }
    }

    /// True iff every derived bit is set.
    pub fn contains(&self, item: &[u8]) -> bool {
        self.seeds.iter().all(|&seed| {
            let idx = self.bit_index(item, seed);
            self.bits[idx / 64] & (1u64 << (idx % 64)) != 0
        })
    }

    pub fn num_bits(&self) -> usize { self.num_bits }
    pub fn num_hashes(&self) -> usize { self.seeds.len() }

    pub fn bits_set(&self) -> u64 { self.bits.iter().map(|w| w.count_ones() as u64).sum() }

    /// Expected false-positive rate after `inserted` distinct items.
    pub fn estimated_fp_rate(&self, inserted: usize) -> f64 {
        let k = self.seeds.len() as f64;
        let m = self.num_bits as f64;
        (1.0 - (-k * inserted as f64 / m).exp()).powf(k)
    }

    fn bit_index(&self, item: &[u8], seed: u32) -> usize {
        (xxh32(item, seed) as usize) % self.num_bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn rejects_zero_sizes() {
        assert!(matches!(BloomFilter::new(0, 3), Err(JoinError::Config(_))));
        assert!(matches!(BloomFilter::new(64, 0), Err(JoinError::Config(_))));
        assert!(matches!(BloomFilter::with_seeds(64, vec![]), Err(JoinError::Config(_))));
    }

    #[test]
    fn empty_filter_contains_nothing() {
        let filter = BloomFilter::new(1024, 4).unwrap();
        assert!(!filter.contains(b"anything"));
        assert!(!filter.contains(b""));
        assert_eq!(filter.bits_set(), 0);
    }

    #[test]
    fn add_is_idempotent() {
        let mut filter = BloomFilter::with_seeds(4096, vec![1, 2, 3]).unwrap();
        filter.add(b"x");
        let after_one = filter.bits_set();
        filter.add(b"x");
        assert_eq!(filter.bits_set(), after_one);
        assert!(after_one >= 1 && after_one <= 3);
    }

    #[test]
    fn same_seeds_same_bits() {
        let mut a = BloomFilter::with_seeds(999, vec![7, 11]).unwrap();
        let mut b = BloomFilter::with_seeds(999, vec![7, 11]).unwrap();
        a.add(b"url");
        b.add(b"url");
        assert_eq!(a.bits, b.bits);
    }

    #[test]
    fn capacity_sizing_matches_textbook() {
        let cfg = BloomConfig::for_capacity(10_000, 0.01).unwrap();
        assert!((95_000..=96_000).contains(&cfg.num_bits), "{cfg:?}");
        assert_eq!(cfg.num_hashes, 7);
        assert!(BloomConfig::for_capacity(0, 0.01).is_err());
        assert!(BloomConfig::for_capacity(10, 1.5).is_err());
    }

    #[test]
    fn default_sizing_stays_under_one_percent() {
        let mut rng = StdRng::seed_from_u64(7);
        for trial in 0..2u64 {
            let config = BloomConfig::default();
            let mut filter = BloomFilter::with_rng(config.num_bits, config.num_hashes, &mut rng).unwrap();
            for i in 0..50_000u64 {
                filter.add(format!("https://ref-{trial}-{i}.example").as_bytes());
            }
            let lookups = 50_000u64;
            let hits = (0..lookups)
                .filter(|i| filter.contains(format!("https://other-{trial}-{i}.example").as_bytes()))
                .count();
            let rate = hits as f64 / lookups as f64;
            assert!(rate < 0.01, "trial {trial}: rate {rate}");
            assert!(filter.estimated_fp_rate(50_000) < 0.01);
        }
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn bit_count_capped_at_hash_range() {
        assert!(BloomFilter::new(MAX_BITS as usize + 1, 1).is_err());
        let cfg = BloomConfig::for_capacity(usize::MAX / 2, 1e-9).unwrap();
        assert_eq!(cfg.num_bits as u64, MAX_BITS);
    }

    #[test]
    fn false_positive_rate_within_bound() {
        // 20k members in a 1 Mi-bit filter with 10 hashes: theoretical rate ~0.02%
        let mut rng = StdRng::seed_from_u64(42);
        for trial in 0..3u64 {
            let mut filter = BloomFilter::with_rng(1 << 20, 10, &mut rng).unwrap();
            for i in 0..20_000u64 {
                filter.add(format!("member-{trial}-{i}").as_bytes());
            }
            let lookups = 50_000u64;
            let hits = (0..lookups)
                .filter(|i| filter.contains(format!("absent-{trial}-{i}").as_bytes()))
                .count();
            let rate = hits as f64 / lookups as f64;
            assert!(rate < 0.01, "trial {trial}: rate {rate}");
            assert!(rate <= filter.estimated_fp_rate(20_000) * 5.0 + 0.001, "trial {trial}: rate {rate}");
        }
    }

    proptest! {
        #[test]
        fn no_false_negatives(items in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..32), 1..200),
                              seed in any::<u64>()) {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut filter = BloomFilter::with_rng(2048, 5, &mut rng).unwrap();
            for (i, item) in items.iter().enumerate() {
                filter.add(item);
                prop_assert!(filter.contains(item));
                for earlier in &items[..i] {
                    prop_assert!(filter.contains(earlier));
                }
            }
        }
    }
}
