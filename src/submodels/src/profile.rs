use alphabet::State;

use crate::model::Model;
use crate::rates::{discrete_gamma_rates, sample_gamma_mean_one, RateHetero};

/// Per-site rate multipliers and mixture-class indices, drawn once before
/// simulation. Both vectors stay empty when the model has no corresponding
/// heterogeneity, and grow in place when insertions extend the alignment.
#[derive(Debug, Clone, Default)]
pub struct RateProfile {
    rates: Vec<f64>,
    classes: Vec<usize>,
}

impl RateProfile {
    pub fn sample(model: &Model, len: usize, rng: &mut fastrand::Rng) -> Self {
        let mut profile = Self::default();
        if !model.rate_model().is_uniform() {
            profile.rates.reserve(len);
        }
        if model.is_mixture() {
            profile.classes.reserve(len);
        }
        profile.splice(model, 0, len, rng);
        profile
    }

    /// Multiplier of site `i` (1 when the model is rate-homogeneous).
    pub fn rate(&self, i: usize) -> f64 {
        self.rates.get(i).copied().unwrap_or(1.0)
    }

    /// Mixture class of site `i` (0 when the model is not a mixture).
    pub fn class(&self, i: usize) -> usize {
        self.classes.get(i).copied().unwrap_or(0)
    }

    pub fn has_rates(&self) -> bool { !self.rates.is_empty() }

    pub fn has_classes(&self) -> bool { !self.classes.is_empty() }

    /// Draw `count` fresh sites and insert them before position `pos`,
    /// mirroring an insertion into the alignment.
    pub fn splice(&mut self, model: &Model, pos: usize, count: usize, rng: &mut fastrand::Rng) {
        if !model.rate_model().is_uniform() {
            // Category table computed once per splice, not per site.
            let table = match &model.rate_model().hetero {
                RateHetero::GammaDiscrete { ncat, alpha } => Some(discrete_gamma_rates(*alpha, *ncat)),
                _ => None,
            };
            let fresh: Vec<f64> = (0..count)
                .map(|_| draw_rate(model, table.as_deref(), rng))
                .collect();
            self.rates.splice(pos..pos, fresh);
        }
        if model.is_mixture() {
            let fresh: Vec<usize> = (0..count).map(|_| draw_class(model, rng)).collect();
            self.classes.splice(pos..pos, fresh);
        }
    }
}

fn draw_rate(model: &Model, gamma_table: Option<&[f64]>, rng: &mut fastrand::Rng) -> f64 {
    let rate_model = model.rate_model();
    if rate_model.p_inv > 0.0 && rng.f64() < rate_model.p_inv {
        return 0.0
    }
    let scale = 1.0 / (1.0 - rate_model.p_inv);
    let raw = match &rate_model.hetero {
        RateHetero::Uniform => 1.0,
        RateHetero::GammaDiscrete { ncat, .. } => match gamma_table {
            Some(rates) => rates[rng.usize(0..*ncat)],
            None        => 1.0,
        },
        RateHetero::GammaContinuous { alpha } => sample_gamma_mean_one(*alpha, rng),
        RateHetero::FreeRates { rates, weights } => categorical(rates, weights, rng),
    };
    raw * scale
}

fn draw_class(model: &Model, rng: &mut fastrand::Rng) -> usize {
    let weights = model.class_weights();
    let mut u = rng.f64();
    for (class, &w) in weights.iter().enumerate() {
        if u < w {
            return class
        }
        u -= w;
    }
    weights.len() - 1
}

fn categorical(values: &[f64], weights: &[f64], rng: &mut fastrand::Rng) -> f64 {
    let mut u = rng.f64();
    for (&v, &w) in values.iter().zip(weights) {
        if u < w {
            return v
        }
        u -= w;
    }
    values[values.len() - 1]
}

/// Convenience used by tests and the root-sequence builder: draw `len`
/// states from the stationary distribution.
pub fn sample_root_sequence(model: &Model, len: usize, rng: &mut fastrand::Rng) -> Vec<State> {
    (0..len).map(|_| model.sample_stationary(rng)).collect()
}
