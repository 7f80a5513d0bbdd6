use alphabet::{State, STATE_UNKNOWN};

use crate::distributions::IndelDistribution;
use crate::error::SimError;

/// Indel process configuration, shared by every branch of a dataset.
#[derive(Debug, Clone)]
pub struct IndelParams {
    /// Per-unit-time insertion rate α_I.
    pub insertion_rate: f64,
    /// Per-unit-time deletion rate α_D.
    pub deletion_rate: f64,
    pub insertion_dist: IndelDistribution,
    pub deletion_dist: IndelDistribution,
    /// Empirical mean deletion size ⟨D⟩, estimated once per dataset.
    mean_deletion_size: f64,
}

impl IndelParams {
    pub fn new(
        insertion_rate: f64,
        deletion_rate: f64,
        insertion_dist: IndelDistribution,
        deletion_dist: IndelDistribution,
    ) -> Self {
        Self {
            insertion_rate,
            deletion_rate,
            insertion_dist,
            deletion_dist,
            mean_deletion_size: 0.0,
        }
    }

    /// Estimate ⟨D⟩ from `draws` samples of the deletion size distribution.
    pub fn estimate_mean_deletion(&mut self, draws: usize, rng: &mut fastrand::Rng) {
        if self.deletion_rate > 0.0 {
            self.mean_deletion_size = self.deletion_dist.empirical_mean(draws, rng);
        }
    }

    pub fn mean_deletion_size(&self) -> f64 { self.mean_deletion_size }

    /// Total insertion rate `α_I·(L + 1 − G)` of a sequence with `len`
    /// sites of which `gaps` are unknown.
    pub fn total_insertion_rate(&self, len: usize, gaps: usize) -> f64 {
        self.insertion_rate * (len as f64 + 1.0 - gaps as f64).max(0.0)
    }

    /// Total deletion rate `α_D·(L − 1 − G + ⟨D⟩)`.
    pub fn total_deletion_rate(&self, len: usize, gaps: usize) -> f64 {
        self.deletion_rate
            * (len as f64 - 1.0 - gaps as f64 + self.mean_deletion_size).max(0.0)
    }
}

/// Pick an insertion point: uniform over `[0, L]`, where `L` means
/// "append at the tail". Gap landing sites scan forward to the next real
/// site; a fully gapped suffix retries.
pub fn insertion_position(
    seq: &[State],
    rng: &mut fastrand::Rng,
) -> Result<(usize, bool), SimError> {
    let len = seq.len();
    let attempts = len.max(1);
    for _ in 0..attempts {
        let u = rng.usize(0..=len);
        if u == len {
            return Ok((len, true))
        }
        if seq[u] != STATE_UNKNOWN {
            return Ok((u, false))
        }
        if let Some(offset) = seq[u + 1..].iter().position(|&s| s != STATE_UNKNOWN) {
            return Ok((u + 1 + offset, false))
        }
    }
    Err(SimError::NoGaplessSite(attempts))
}

/// Pick a deletion start within `[0, L − k]`, skipping gaps with the same
/// forward-scan-then-retry rule.
pub fn deletion_start(
    seq: &[State],
    size: usize,
    rng: &mut fastrand::Rng,
) -> Result<usize, SimError> {
    let bound = seq.len().saturating_sub(size) + 1;
    let attempts = bound.max(1);
    for _ in 0..attempts {
        let u = rng.usize(0..bound);
        if seq[u] != STATE_UNKNOWN {
            return Ok(u)
        }
        if let Some(offset) = seq[u + 1..bound].iter().position(|&s| s != STATE_UNKNOWN) {
            return Ok(u + 1 + offset)
        }
    }
    Err(SimError::NoGaplessSite(attempts))
}

/// Replace up to `size` real sites with the unknown state, walking forward
/// from `start` and skipping already-gapped columns. Returns the removed
/// positions (the sequence tail may cut the walk short).
pub fn apply_deletion(seq: &mut [State], start: usize, size: usize) -> Vec<usize> {
    let mut removed = Vec::with_capacity(size);
    for (offset, state) in seq[start..].iter_mut().enumerate() {
        if removed.len() == size {
            break
        }
        if *state != STATE_UNKNOWN {
            *state = STATE_UNKNOWN;
            removed.push(start + offset);
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    const U: State = STATE_UNKNOWN;

    fn params(ins: f64, del: f64) -> IndelParams {
        IndelParams::new(
            ins,
            del,
            "GEO{0.5}".parse().unwrap(),
            "GEO{0.5}".parse().unwrap(),
        )
    }

    #[test]
    fn total_rates_track_length_and_gaps() {
        let mut p = params(0.1, 0.05);
        assert!((p.total_insertion_rate(100, 0) - 10.1).abs() < 1e-12);
        assert!((p.total_insertion_rate(100, 20) - 8.1).abs() < 1e-12);

        let mut rng = fastrand::Rng::with_seed(1);
        p.estimate_mean_deletion(10_000, &mut rng);
        let mean = p.mean_deletion_size();
        assert!((mean - 2.0).abs() < 0.1, "mean={mean}"); // GEO{0.5} mean = 2
        let want = 0.05 * (100.0 - 1.0 - 0.0 + mean);
        assert!((p.total_deletion_rate(100, 0) - want).abs() < 1e-12);
    }

    #[test]
    fn insertion_position_skips_gaps() {
        let seq = vec![U, U, 2, 3];
        let mut rng = fastrand::Rng::with_seed(2);
        for _ in 0..1000 {
            let (pos, appended) = insertion_position(&seq, &mut rng).unwrap();
            assert!(pos == 2 || pos == 3 || pos == 4);
            assert_eq!(appended, pos == 4);
        }
    }

    #[test]
    fn insertion_into_all_gap_sequence_fails_or_appends() {
        let seq = vec![U, U, U];
        let mut rng = fastrand::Rng::with_seed(3);
        // Only the tail position is ever legal.
        for _ in 0..100 {
            if let Ok((pos, appended)) = insertion_position(&seq, &mut rng) {
                assert_eq!((pos, appended), (3, true));
            }
        }
    }

    #[test]
    fn deletion_start_respects_the_upper_bound() {
        let seq = vec![0, 1, 2, 3, 0, 1];
        let mut rng = fastrand::Rng::with_seed(4);
        for _ in 0..1000 {
            let start = deletion_start(&seq, 4, &mut rng).unwrap();
            assert!(start <= 2);
        }
    }

    #[test]
    fn deletion_walks_over_existing_gaps() {
        let mut seq = vec![0, U, 1, U, 2, 3];
        let removed = apply_deletion(&mut seq, 0, 3);
        assert_eq!(removed, vec![0, 2, 4]);
        assert_eq!(seq, vec![U, U, U, U, U, 3]);
    }

    #[test]
    fn deletion_is_truncated_by_the_tail() {
        let mut seq = vec![0, 1];
        let removed = apply_deletion(&mut seq, 1, 5);
        assert_eq!(removed, vec![1]);
        assert_eq!(seq, vec![0, U]);
    }
}
