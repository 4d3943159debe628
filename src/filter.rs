use bit_vec::BitVec;
use seahash::hash;

use crate::model::RecordId;

/// Probabilistic set of record ids used to skip index lookups for ids that
/// were never written.
pub struct BloomFilter {
    bits: BitVec,
    num_hashes: u32,
}

impl BloomFilter {
    /// Sized for `expected_items` at the given false positive rate (e.g. 0.01).
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let ln2 = 2.0f64.ln();

        // m = -(n * ln(p)) / (ln(2)^2), k = (m / n) * ln(2)
        let m = (-(n * false_positive_rate.ln()) / (ln2 * ln2)).ceil().max(8.0);
        let k = ((m / n) * ln2).ceil().max(1.0);

        Self {
            bits: BitVec::from_elem(m as usize, false),
            num_hashes: k as u32,
        }
    }

    pub fn insert(&mut self, id: RecordId) {
        let m = self.bits.len() as u64;
        for idx in bit_positions(id, self.num_hashes, m) {
            self.bits.set(idx, true);
        }
    }

    /// `false` means the id was definitely never inserted.
    pub fn might_contain(&self, id: RecordId) -> bool {
        let m = self.bits.len() as u64;
        bit_positions(id, self.num_hashes, m).all(|idx| self.bits.get(idx).unwrap_or(false))
    }
}

// Double hashing: g_i(x) = h1(x) + i * h2(x)
fn bit_positions(id: RecordId, rounds: u32, m: u64) -> impl Iterator<Item = usize> {
    let h1 = hash(&id.as_u128().to_le_bytes());
    let h2 = h1.wrapping_add(0x9E3779B97F4A7C15);
    (0..rounds).map(move |i| (h1.wrapping_add((i as u64).wrapping_mul(h2)) % m) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_ids_are_reported() {
        let mut filter = BloomFilter::new(1_000, 0.01);
        let ids: Vec<RecordId> = (0..100).map(|_| RecordId::new()).collect();
        for id in &ids {
            filter.insert(*id);
        }
        assert!(ids.iter().all(|id| filter.might_contain(*id)));
    }

    #[test]
    fn empty_filter_rejects_everything() {
        let filter = BloomFilter::new(10, 0.01);
        assert!(!filter.might_contain(RecordId::new()));
    }
}
