//! Decoy (ring member) selection using a gamma distribution.
//!
//! Samples output ages from the gamma distribution of Miller et al. over the
//! daemon's cumulative output distribution. Short chains (where most gamma
//! samples land before genesis) fall back to uniform picks over the usable
//! range once the gamma attempts run out.

use crate::TxError;
use beldex_types::constants::{DEFAULT_TX_SPENDABLE_AGE, DIFFICULTY_TARGET};
use rand::Rng;
use std::collections::HashSet;

/// Gamma distribution shape parameter (Miller et al.).
const GAMMA_SHAPE: f64 = 19.28;

/// Gamma distribution scale parameter (1 / 1.61).
const GAMMA_SCALE: f64 = 1.0 / 1.61;

/// Recent spend window in seconds.
const RECENT_SPEND_WINDOW: f64 = 1800.0;

/// Gamma samples tried per wanted decoy before falling back to uniform.
const GAMMA_ATTEMPTS_PER_DECOY: usize = 20;

/// Selects decoy ring members from the global output distribution.
pub struct DecoySelector {
    /// Cumulative output counts per block.
    offsets: Vec<u64>,
    /// Number of usable outputs (excluding recent locked ones).
    num_usable: u64,
    /// Average seconds per output.
    average_output_time: f64,
}

impl DecoySelector {
    /// `offsets` is the cumulative output count per block, from genesis.
    pub fn new(offsets: Vec<u64>) -> Result<Self, TxError> {
        let spendable_age = DEFAULT_TX_SPENDABLE_AGE as usize;
        if offsets.len() < spendable_age + 1 {
            return Err(TxError::DecoySelection("insufficient output distribution data".into()));
        }

        let usable_len = offsets.len() - spendable_age;
        let num_usable = offsets[usable_len - 1];
        if num_usable == 0 {
            return Err(TxError::DecoySelection("no usable outputs".into()));
        }

        let total_time = (usable_len as f64) * DIFFICULTY_TARGET as f64;
        Ok(Self { offsets, num_usable, average_output_time: total_time / num_usable as f64 })
    }

    pub fn num_usable(&self) -> u64 {
        self.num_usable
    }

    /// Pick `ring_size - 1` decoys, never returning `real_index` or anything
    /// in `exclude`.
    pub fn pick_decoys(&self, real_index: u64, ring_size: usize, exclude: &HashSet<u64>) -> Result<Vec<u64>, TxError> {
        let num_decoys = ring_size.saturating_sub(1);
        let rejected = |idx: u64, picked: &[u64]| {
            idx == real_index || idx >= self.num_usable || exclude.contains(&idx) || picked.contains(&idx)
        };

        let available = (0..self.num_usable).filter(|i| *i != real_index && !exclude.contains(i)).count();
        if available < num_decoys {
            return Err(TxError::DecoySelection(format!(
                "need {num_decoys} decoys, only {available} eligible outputs"
            )));
        }

        let mut rng = rand::thread_rng();
        let mut decoys = Vec::with_capacity(num_decoys);
        let mut attempts = 0;
        while decoys.len() < num_decoys && attempts < num_decoys * GAMMA_ATTEMPTS_PER_DECOY {
            attempts += 1;
            let idx = self.sample_output_index(&mut rng);
            if !rejected(idx, &decoys) {
                decoys.push(idx);
            }
        }

        while decoys.len() < num_decoys {
            let idx = rng.gen_range(0..self.num_usable);
            if !rejected(idx, &decoys) {
                decoys.push(idx);
            }
        }

        Ok(decoys)
    }

    /// Build a complete sorted ring for one input.
    ///
    /// Returns `(ring_indices, real_position)`.
    pub fn build_ring(&self, real_index: u64, ring_size: usize, exclude: &HashSet<u64>) -> Result<(Vec<u64>, usize), TxError> {
        let mut ring = self.pick_decoys(real_index, ring_size, exclude)?;
        ring.push(real_index);
        ring.sort_unstable();
        let real_pos = ring
            .iter()
            .position(|&x| x == real_index)
            .ok_or_else(|| TxError::DecoySelection("real output missing from ring".into()))?;
        Ok((ring, real_pos))
    }

    fn sample_output_index<R: Rng>(&self, rng: &mut R) -> u64 {
        let x = gamma_sample(GAMMA_SHAPE, GAMMA_SCALE, rng);
        let y = x.exp();

        let time_offset = if y > RECENT_SPEND_WINDOW {
            y - RECENT_SPEND_WINDOW
        } else {
            rng.gen::<f64>() * RECENT_SPEND_WINDOW
        };

        let output_offset = (time_offset / self.average_output_time) as u64;
        if output_offset >= self.num_usable {
            return self.num_usable;
        }

        // "time ago" to ascending index
        let idx = self.num_usable - 1 - output_offset;
        self.localize_output(idx, rng)
    }

    /// Random output index within the block holding `target`.
    fn localize_output<R: Rng>(&self, target: u64, rng: &mut R) -> u64 {
        let usable_len = self.offsets.len() - DEFAULT_TX_SPENDABLE_AGE as usize;
        let block = match self.offsets[..usable_len].binary_search(&target) {
            // offsets[i] is the first index *after* block i
            Ok(pos) => pos + 1,
            Err(pos) => pos,
        }
        .min(usable_len - 1);

        let block_start = if block == 0 { 0 } else { self.offsets[block - 1] };
        let block_end = self.offsets[block];
        if block_end <= block_start {
            return target;
        }
        block_start + rng.gen_range(0..block_end - block_start)
    }
}

// ─── Gamma Distribution Sampler (Marsaglia & Tsang) ──────────────────────────

fn gamma_sample<R: Rng>(shape: f64, scale: f64, rng: &mut R) -> f64 {
    if shape < 1.0 {
        let g = gamma_sample(shape + 1.0, 1.0, rng);
        let u: f64 = rng.gen();
        return g * u.powf(1.0 / shape) * scale;
    }

    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();

    loop {
        let x = standard_normal(rng);
        let v = 1.0 + c * x;
        if v <= 0.0 {
            continue;
        }

        let v = v * v * v;
        let u: f64 = rng.gen();
        let x2 = x * x;

        if u < 1.0 - 0.0331 * x2 * x2 {
            return d * v * scale;
        }
        if u.ln() < 0.5 * x2 + d * (1.0 - v + v.ln()) {
            return d * v * scale;
        }
    }
}

/// Box-Muller.
fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_offsets(num_blocks: usize, outputs_per_block: u64) -> Vec<u64> {
        (0..num_blocks).map(|i| (i as u64 + 1) * outputs_per_block).collect()
    }

    #[test]
    fn test_decoy_selector_creation() {
        let sel = DecoySelector::new(make_offsets(100, 10)).unwrap();
        assert_eq!(sel.num_usable(), 90 * 10);
    }

    #[test]
    fn test_insufficient_offsets() {
        assert!(DecoySelector::new(make_offsets(5, 10)).is_err());
        assert!(DecoySelector::new(vec![0; 20]).is_err());
    }

    #[test]
    fn test_build_ring_sorted_and_unique() {
        let sel = DecoySelector::new(make_offsets(200, 100)).unwrap();
        let (ring, real_pos) = sel.build_ring(500, 10, &HashSet::new()).unwrap();
        assert_eq!(ring.len(), 10);
        assert_eq!(ring[real_pos], 500);
        for i in 1..ring.len() {
            assert!(ring[i] > ring[i - 1], "ring should be strictly ascending");
        }
    }

    #[test]
    fn test_short_chain_falls_back_to_uniform() {
        // 40 blocks of 4 outputs: gamma samples almost all predate genesis.
        let sel = DecoySelector::new(make_offsets(40, 4)).unwrap();
        let decoys = sel.pick_decoys(3, 10, &HashSet::new()).unwrap();
        assert_eq!(decoys.len(), 9);
        assert!(decoys.iter().all(|&d| d < sel.num_usable() && d != 3));
    }

    #[test]
    fn test_excluded_outputs_never_picked() {
        let sel = DecoySelector::new(make_offsets(30, 2)).unwrap();
        let exclude: HashSet<u64> = (0..20).collect();
        for _ in 0..20 {
            let decoys = sel.pick_decoys(25, 10, &exclude).unwrap();
            assert!(decoys.iter().all(|d| !exclude.contains(d)));
        }
    }

    #[test]
    fn test_not_enough_eligible_outputs() {
        let sel = DecoySelector::new(make_offsets(15, 1)).unwrap();
        // 5 usable outputs, need 9 decoys.
        assert!(sel.pick_decoys(0, 10, &HashSet::new()).is_err());
    }

    #[test]
    fn test_gamma_distribution_positive() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            assert!(gamma_sample(GAMMA_SHAPE, GAMMA_SCALE, &mut rng) > 0.0);
        }
        for _ in 0..50 {
            assert!(gamma_sample(0.5, 1.0, &mut rng) > 0.0);
        }
    }
}
