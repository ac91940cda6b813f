use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

/// Keys must be reducible to a machine word for the multiply-shift hash.
pub(crate) trait MapKey: Copy + Eq {
    fn key_word(&self) -> usize;
}

impl MapKey for crate::type_info::TypeId {
    fn key_word(&self) -> usize {
        crate::type_info::TypeId::key_word(self)
    }
}

const BETA: usize = 4;
const REROLLS_PER_SIZE: usize = 32;
const OVERLAY_BIT: u32 = 1 << 31;

#[derive(Clone, Copy)]
struct HashFunction {
    a: usize,
    shift: u32,
}

impl HashFunction {
    fn hash(&self, word: usize) -> usize {
        self.a.wrapping_mul(word) >> self.shift
    }
}

#[derive(Clone, Copy)]
struct BucketRange {
    // High bit of `begin` selects the overlay storage.
    begin: u32,
    len: u32,
}

impl BucketRange {
    const EMPTY: BucketRange = BucketRange { begin: 0, len: 0 };
}

/// A map built once from a known set of `(K, V)` pairs, with amortized-O(1)
/// lookup through a multiply-shift hash whose parameters are re-rolled until
/// every bucket holds fewer than `BETA` entries.
///
/// `extended` produces a new map that shares the base value storage and keeps
/// additional pairs in an overlay, so extending by O(1) pairs keeps lookups
/// O(1). Iteration order is not meaningful.
pub(crate) struct SemistaticMap<K, V> {
    hash: HashFunction,
    table: Vec<BucketRange>,
    base: Arc<[(K, V)]>,
    overlay: Vec<(K, V)>,
}

impl<K: Copy, V: Copy> Clone for SemistaticMap<K, V> {
    fn clone(&self) -> Self {
        SemistaticMap {
            hash: self.hash,
            table: self.table.clone(),
            base: Arc::clone(&self.base),
            overlay: self.overlay.clone(),
        }
    }
}

impl<K: MapKey, V: Copy> SemistaticMap<K, V> {
    pub(crate) fn new(pairs: Vec<(K, V)>) -> Self {
        let n = pairs.len();
        let mut num_bits = pick_num_bits(n);
        let mut rng = SmallRng::from_entropy();
        let hash = loop {
            match pick_hash(&pairs, num_bits, &mut rng) {
                Some(hash) => break hash,
                // The bucket bound failed for every roll at this size; a
                // larger table always succeeds eventually.
                None => num_bits += 1,
            }
        };

        let num_buckets = 1usize << num_bits;
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by_key(|&i| hash.hash(pairs[i].0.key_word()));

        let mut table = vec![BucketRange::EMPTY; num_buckets];
        let base: Vec<(K, V)> = order.iter().map(|&i| pairs[i]).collect();
        let mut start = 0usize;
        while start < base.len() {
            let h = hash.hash(base[start].0.key_word());
            let mut end = start;
            while end < base.len() && hash.hash(base[end].0.key_word()) == h {
                end += 1;
            }
            table[h] = BucketRange {
                begin: start as u32,
                len: (end - start) as u32,
            };
            start = end;
        }

        SemistaticMap {
            hash,
            table,
            base: base.into(),
            overlay: Vec::new(),
        }
    }

    /// New map sharing this map's storage, with `new_pairs` added. Keys must
    /// not already be present. Displaced buckets are re-homed in the overlay;
    /// the abandoned base ranges are simply no longer referenced.
    pub(crate) fn extended(&self, new_pairs: Vec<(K, V)>) -> Self {
        let mut result = SemistaticMap {
            hash: self.hash,
            table: self.table.clone(),
            base: Arc::clone(&self.base),
            overlay: self.overlay.clone(),
        };
        let mut by_hash: Vec<(usize, (K, V))> = new_pairs
            .into_iter()
            .map(|pair| (self.hash.hash(pair.0.key_word()), pair))
            .collect();
        by_hash.sort_by_key(|(h, _)| *h);

        let mut i = 0usize;
        while i < by_hash.len() {
            let h = by_hash[i].0;
            let begin = result.overlay.len() as u32;
            // Re-insert the existing bucket first, then the new pairs.
            let existing: Vec<(K, V)> = result.bucket(result.table[h]).to_vec();
            result.overlay.extend(existing);
            while i < by_hash.len() && by_hash[i].0 == h {
                result.overlay.push(by_hash[i].1);
                i += 1;
            }
            result.table[h] = BucketRange {
                begin: begin | OVERLAY_BIT,
                len: result.overlay.len() as u32 - begin,
            };
        }
        result
    }

    fn bucket(&self, range: BucketRange) -> &[(K, V)] {
        let begin = (range.begin & !OVERLAY_BIT) as usize;
        let end = begin + range.len as usize;
        if range.begin & OVERLAY_BIT != 0 {
            &self.overlay[begin..end]
        } else {
            &self.base[begin..end]
        }
    }

    pub(crate) fn find(&self, key: K) -> Option<V> {
        let h = self.hash.hash(key.key_word());
        self.bucket(self.table[h])
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
    }

    /// Like `find`, but the key must be present.
    pub(crate) fn at(&self, key: K) -> V {
        self.find(key)
            .expect("semistatic map lookup for a key that was never inserted")
    }

    pub(crate) fn len(&self) -> usize {
        self.table.iter().map(|r| r.len as usize).sum()
    }
}

fn pick_num_bits(n: usize) -> u32 {
    let mut bits = 1;
    while (1usize << bits) < n.max(1) {
        bits += 1;
    }
    bits
}

fn pick_hash<K: MapKey, V>(
    pairs: &[(K, V)],
    num_bits: u32,
    rng: &mut SmallRng,
) -> Option<HashFunction> {
    let num_buckets = 1usize << num_bits;
    let shift = usize::BITS - num_bits;
    let mut counts = vec![0usize; num_buckets];
    'roll: for _ in 0..REROLLS_PER_SIZE {
        // An odd multiplier keeps the map a bijection on words.
        let hash = HashFunction {
            a: rng.gen::<usize>() | 1,
            shift,
        };
        counts.iter_mut().for_each(|c| *c = 0);
        for (key, _) in pairs {
            let h = hash.hash(key.key_word());
            counts[h] += 1;
            if counts[h] == BETA {
                continue 'roll;
            }
        }
        return Some(hash);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    impl MapKey for usize {
        fn key_word(&self) -> usize {
            *self
        }
    }

    #[test]
    fn empty_map() {
        let map: SemistaticMap<usize, u32> = SemistaticMap::new(vec![]);
        assert_eq!(map.find(7), None);
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn find_and_at() {
        let pairs: Vec<(usize, u32)> = (0..100).map(|i| (i * 8 + 16, i as u32)).collect();
        let map = SemistaticMap::new(pairs.clone());
        assert_eq!(map.len(), 100);
        for (k, v) in pairs {
            assert_eq!(map.find(k), Some(v));
            assert_eq!(map.at(k), v);
        }
        assert_eq!(map.find(3), None);
    }

    #[test]
    #[should_panic]
    fn at_on_missing_key_panics() {
        let map: SemistaticMap<usize, u32> = SemistaticMap::new(vec![(8, 1)]);
        map.at(16);
    }

    #[test]
    fn hash_selection_with_aligned_keys() {
        // Pointer-like keys: shared low zero bits and a narrow range, the
        // worst case for a multiplicative hash picked without re-rolls.
        let pairs: Vec<(usize, u32)> = (0..512)
            .map(|i| (0x7f00_0000_0000 + i * 64, i as u32))
            .collect();
        let map = SemistaticMap::new(pairs.clone());
        for (k, v) in pairs {
            assert_eq!(map.find(k), Some(v));
        }
    }

    #[test]
    fn extended_map_sees_old_and_new_pairs() {
        let pairs: Vec<(usize, u32)> = (0..64).map(|i| (i * 8 + 8, i as u32)).collect();
        let map = SemistaticMap::new(pairs.clone());
        let extended = map.extended(vec![(10_000, 500), (20_000, 600)]);

        for (k, v) in &pairs {
            assert_eq!(extended.find(*k), Some(*v));
        }
        assert_eq!(extended.find(10_000), Some(500));
        assert_eq!(extended.find(20_000), Some(600));
        // The base map is untouched.
        assert_eq!(map.find(10_000), None);
        assert_eq!(map.len(), 64);
        assert_eq!(extended.len(), 66);
    }

    #[test]
    fn extending_twice_keeps_earlier_extension() {
        let map = SemistaticMap::new(vec![(8usize, 1u32), (16, 2)]);
        let once = map.extended(vec![(24, 3)]);
        let twice = once.extended(vec![(32, 4)]);
        for (k, v) in [(8usize, 1u32), (16, 2), (24, 3), (32, 4)] {
            assert_eq!(twice.find(k), Some(v));
        }
    }
}
