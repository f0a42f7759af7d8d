//! CINDER - Filter Policies
//! Probabilistic membership tests attached to each table so that point
//! lookups can skip tables that definitely do not hold a key.
//!
//! False positives are possible, but false negatives are not.

use xxhash_rust::xxh3::xxh3_128;

/// A named strategy for building and probing per-table filters.
///
/// The name is persisted with the database at creation; reopening with a
/// policy of a different name is an identity mismatch.
pub trait FilterPolicy: Send + Sync {
    /// Identity recorded with the database at creation.
    fn name(&self) -> &str;

    /// Build a filter summarizing `keys`.
    fn create_filter(&self, keys: &[&[u8]]) -> Vec<u8>;

    /// Returns `false` only if `key` was definitely not among the keys the
    /// filter was built from.
    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool;
}

/// Bloom filter policy with a fixed number of bits per key.
///
/// ## Layout
/// ```text
/// [bit array: ceil(n * bits_per_key / 8) bytes][num_probes: 1 byte]
/// ```
///
/// ## False Positive Rate
/// With `k` probes and `m` bits for `n` keys: `FPR ≈ (1 - e^(-kn/m))^k`.
/// 10 bits per key gives roughly 1%.
#[derive(Debug, Clone)]
pub struct BloomFilterPolicy {
    bits_per_key: usize,
    num_probes: u8,
}

impl BloomFilterPolicy {
    /// Create a policy using `bits_per_key` bits for every inserted key.
    /// Optimal probes: `k = bits_per_key * ln(2)`, clamped to 1..=30.
    pub fn new(bits_per_key: usize) -> Self {
        let bits_per_key = bits_per_key.max(1);
        let num_probes = ((bits_per_key as f64) * std::f64::consts::LN_2) as usize;
        Self {
            bits_per_key,
            num_probes: num_probes.clamp(1, 30) as u8,
        }
    }

    pub fn bits_per_key(&self) -> usize {
        self.bits_per_key
    }

    pub fn num_probes(&self) -> u8 {
        self.num_probes
    }

    /// Split a 128-bit hash into two halves for double hashing:
    /// `h(i) = h1 + i * h2 (mod m)`.
    fn hash_key(key: &[u8]) -> (u64, u64) {
        let hash = xxh3_128(key);
        (hash as u64, (hash >> 64) as u64 | 1)
    }
}

impl FilterPolicy for BloomFilterPolicy {
    fn name(&self) -> &str {
        "cinder.BuiltinBloomFilter"
    }

    fn create_filter(&self, keys: &[&[u8]]) -> Vec<u8> {
        // minimum 64 bits to keep tiny tables from saturating
        let num_bits = (keys.len() * self.bits_per_key).max(64);
        let num_bytes = num_bits.div_ceil(8);
        let num_bits = num_bytes * 8;

        let mut filter = vec![0u8; num_bytes + 1];
        for key in keys {
            let (h1, h2) = Self::hash_key(key);
            for i in 0..self.num_probes as u64 {
                let bit = (h1.wrapping_add(i.wrapping_mul(h2)) % num_bits as u64) as usize;
                filter[bit / 8] |= 1 << (bit % 8);
            }
        }
        filter[num_bytes] = self.num_probes;
        filter
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        if filter.len() < 2 {
            return true;
        }
        let num_bytes = filter.len() - 1;
        let num_bits = (num_bytes * 8) as u64;
        let num_probes = filter[num_bytes];
        if num_probes == 0 || num_probes > 30 {
            // Unknown encoding; treat as a match.
            return true;
        }

        let (h1, h2) = Self::hash_key(key);
        for i in 0..num_probes as u64 {
            let bit = (h1.wrapping_add(i.wrapping_mul(h2)) % num_bits) as usize;
            if filter[bit / 8] & (1 << (bit % 8)) == 0 {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(policy: &BloomFilterPolicy, keys: &[Vec<u8>]) -> Vec<u8> {
        let refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
        policy.create_filter(&refs)
    }

    #[test]
    fn test_insert_and_contains() {
        let policy = BloomFilterPolicy::new(10);
        let filter = build(&policy, &[b"hello".to_vec(), b"world".to_vec()]);
        assert!(policy.key_may_match(b"hello", &filter));
        assert!(policy.key_may_match(b"world", &filter));
    }

    #[test]
    fn test_no_false_negatives() {
        let policy = BloomFilterPolicy::new(10);
        let keys: Vec<Vec<u8>> = (0..500).map(|i| format!("key_{}", i).into_bytes()).collect();
        let filter = build(&policy, &keys);

        // ALL inserted keys must be found (zero false negatives)
        for key in &keys {
            assert!(
                policy.key_may_match(key, &filter),
                "False negative for key: {}",
                String::from_utf8_lossy(key)
            );
        }
    }

    #[test]
    fn test_false_positive_rate_is_bounded() {
        let policy = BloomFilterPolicy::new(10);
        let keys: Vec<Vec<u8>> = (0..1000).map(|i| format!("key_{}", i).into_bytes()).collect();
        let filter = build(&policy, &keys);

        let mut false_positives = 0;
        for i in 0..10_000 {
            let key = format!("nonexistent_key_{}", i);
            if policy.key_may_match(key.as_bytes(), &filter) {
                false_positives += 1;
            }
        }

        // ~1% expected at 10 bits/key
        assert!(
            false_positives < 300,
            "Too many false positives: {}",
            false_positives
        );
    }

    #[test]
    fn test_empty_or_malformed_filter_matches() {
        let policy = BloomFilterPolicy::new(10);
        assert!(policy.key_may_match(b"anything", &[]));
        assert!(policy.key_may_match(b"anything", &[0xff, 0xff, 0]));
    }

    #[test]
    fn test_probe_count() {
        assert_eq!(BloomFilterPolicy::new(10).num_probes(), 6);
        assert_eq!(BloomFilterPolicy::new(1).num_probes(), 1);
        assert_eq!(BloomFilterPolicy::new(100).num_probes(), 30);
        let filter = BloomFilterPolicy::new(10).create_filter(&[b"k".as_slice()]);
        assert_eq!(*filter.last().unwrap(), 6);
    }
}
