use alphabet::State;

/// Functional divergence settings: the taxa whose sequences are permuted,
/// and the proportion of sites involved.
#[derive(Debug, Clone)]
pub struct FunDiConfig {
    pub taxa: Vec<String>,
    pub proportion: f64,
}

/// A sampled site permutation: `⌈f·L⌉` distinct sites paired with shuffled
/// target positions. The same permutation is applied to every taxon of the
/// FunDi set, after standard evolution has completed.
#[derive(Debug, Clone)]
pub struct FunDiPermutation {
    pairs: Vec<(usize, usize)>,
}

impl FunDiPermutation {
    pub fn sample(len: usize, proportion: f64, rng: &mut fastrand::Rng) -> Self {
        let count = ((proportion * len as f64).ceil() as usize).min(len);

        // Partial Fisher-Yates: the first `count` entries are a uniform
        // draw of distinct sites.
        let mut indices: Vec<usize> = (0..len).collect();
        for i in 0..count {
            let j = rng.usize(i..len);
            indices.swap(i, j);
        }
        indices.truncate(count);

        let mut targets = indices.clone();
        rng.shuffle(&mut targets);
        Self { pairs: indices.into_iter().zip(targets).collect() }
    }

    pub fn num_sites(&self) -> usize { self.pairs.len() }

    pub fn pairs(&self) -> &[(usize, usize)] { &self.pairs }

    /// Permute the selected sites in place: values are read out first, then
    /// written to their target positions.
    pub fn apply(&self, seq: &mut [State]) {
        let values: Vec<State> = self.pairs.iter().map(|&(site, _)| seq[site]).collect();
        for (&(_, target), value) in self.pairs.iter().zip(values) {
            seq[target] = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_the_requested_number_of_distinct_sites() {
        let mut rng = fastrand::Rng::with_seed(12);
        let permutation = FunDiPermutation::sample(100, 0.1, &mut rng);
        assert_eq!(permutation.num_sites(), 10);

        let mut sites: Vec<usize> = permutation.pairs().iter().map(|&(s, _)| s).collect();
        sites.sort_unstable();
        sites.dedup();
        assert_eq!(sites.len(), 10);

        // Targets are a permutation of the selected sites.
        let mut targets: Vec<usize> = permutation.pairs().iter().map(|&(_, t)| t).collect();
        targets.sort_unstable();
        assert_eq!(sites, targets);
    }

    #[test]
    fn apply_is_a_permutation_of_the_selected_values() {
        let mut rng = fastrand::Rng::with_seed(13);
        let permutation = FunDiPermutation::sample(50, 0.2, &mut rng);

        let original: Vec<State> = (0..50).collect();
        let mut permuted = original.clone();
        permutation.apply(&mut permuted);

        // Multiset of states is preserved.
        let mut a = original.clone();
        let mut b = permuted.clone();
        a.sort_unstable();
        b.sort_unstable();
        assert_eq!(a, b);

        // Untouched positions are identical.
        let touched: Vec<usize> = permutation.pairs().iter().map(|&(_, t)| t).collect();
        for (i, (&o, &p)) in original.iter().zip(&permuted).enumerate() {
            if !touched.contains(&i) {
                assert_eq!(o, p);
            }
        }
    }

    #[test]
    fn full_proportion_is_clamped() {
        let mut rng = fastrand::Rng::with_seed(14);
        let permutation = FunDiPermutation::sample(10, 1.5, &mut rng);
        assert_eq!(permutation.num_sites(), 10);
    }
}
