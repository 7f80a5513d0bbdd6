use std::sync::Once;

use log::{debug, warn};
use phylotree::Tree;
use submodels::{constant_pattern_prob, Model};

/// Fallback multiplier when the estimate is numerically unusable.
const FALLBACK_RATIO: f64 = 2.1;

static PATHOLOGY_WARNING: Once = Once::new();

/// Over-simulation multiplier `ρ ≥ 1` for ascertainment-biased models:
/// simulating `⌈L·ρ⌉` sites yields at least `L` variant sites with high
/// probability.
///
/// `ρ = 1/(1 − p_const) + 0.1`, with `p_const` the model probability of a
/// constant site. The ascertainment flag is switched off around the
/// likelihood evaluation and restored afterwards. A user-supplied override
/// is returned verbatim.
pub fn estimate_length_ratio(
    model: &mut Model,
    tree: &Tree,
    branch_scale: f64,
    user_override: Option<f64>,
) -> f64 {
    if let Some(ratio) = user_override {
        debug!("Using user-supplied length ratio {ratio}");
        return ratio
    }

    let was_enabled = model.ascertainment();
    model.set_ascertainment(false);
    let p_const = constant_pattern_prob(model, tree, branch_scale);
    model.set_ascertainment(was_enabled);

    let ratio = 1.0 / (1.0 - p_const) + 0.1;
    if !ratio.is_finite() || p_const <= 0.0 || p_const >= 1.0 {
        PATHOLOGY_WARNING.call_once(|| {
            warn!("Constant-site probability estimate {p_const} is unusable. Falling back to a length ratio of {FALLBACK_RATIO}");
        });
        return FALLBACK_RATIO
    }
    debug!("Estimated constant-site probability {p_const:.6}, length ratio {ratio:.4}");
    ratio
}

#[cfg(test)]
mod tests {
    use super::*;
    use alphabet::AlphabetKind;

    fn asc_model() -> Model {
        Model::parse("JC+ASC", AlphabetKind::Dna).unwrap()
    }

    #[test]
    fn override_is_used_verbatim() {
        let mut model = asc_model();
        let tree = Tree::from_newick("(A:0.1,B:0.1);").unwrap();
        let ratio = estimate_length_ratio(&mut model, &tree, 1.0, Some(3.5));
        assert_eq!(ratio, 3.5);
    }

    #[test]
    fn estimate_exceeds_one_and_restores_the_flag() {
        let mut model = asc_model();
        let tree = Tree::from_newick("(A:0.1,B:0.1);").unwrap();
        let ratio = estimate_length_ratio(&mut model, &tree, 1.0, None);
        assert!(model.ascertainment(), "flag must be restored");
        assert!(ratio > 1.0);

        // Short branches leave most sites constant, so the ratio is large.
        let p_same = 0.25 + 0.75 * (-4.0 * 0.2 / 3.0_f64).exp();
        let want = 1.0 / (1.0 - p_same) + 0.1;
        assert!((ratio - want).abs() < 1e-6, "ratio={ratio} want={want}");
    }

    #[test]
    fn saturated_trees_need_little_oversampling() {
        let mut model = asc_model();
        let tree = Tree::from_newick("(A:50.0,B:50.0);").unwrap();
        let ratio = estimate_length_ratio(&mut model, &tree, 1.0, None);
        // p_const -> 0.25, so rho -> 1/0.75 + 0.1.
        assert!((ratio - (4.0 / 3.0 + 0.1)).abs() < 1e-3, "ratio={ratio}");
    }

    #[test]
    fn degenerate_estimates_fall_back() {
        let mut model = asc_model();
        // A zero-length tree is always constant: p_const = 1.
        let tree = Tree::from_newick("(A:0.0,B:0.0);").unwrap();
        let ratio = estimate_length_ratio(&mut model, &tree, 1.0, None);
        assert_eq!(ratio, FALLBACK_RATIO);
        assert!(model.ascertainment());
    }
}
