use crate::error::ModelError;
use crate::numerics::{inv_reg_lower_gamma, reg_lower_gamma};

/// Among-site rate heterogeneity flavor.
#[derive(Debug, Clone, PartialEq)]
pub enum RateHetero {
    /// Single rate class.
    Uniform,
    /// Discrete gamma with `ncat` equiprobable mean-rate categories.
    GammaDiscrete { ncat: usize, alpha: f64 },
    /// Per-site rates drawn from a continuous Gamma(alpha, alpha).
    GammaContinuous { alpha: f64 },
    /// Explicit rate/weight categories.
    FreeRates { rates: Vec<f64>, weights: Vec<f64> },
}

/// Rate model: heterogeneity flavor plus an invariant-site proportion.
/// Non-invariant rates are rescaled by `1/(1 - p_inv)` so the expected
/// per-site rate stays 1.
#[derive(Debug, Clone, PartialEq)]
pub struct RateModel {
    pub hetero: RateHetero,
    pub p_inv: f64,
}

impl Default for RateModel {
    fn default() -> Self {
        Self { hetero: RateHetero::Uniform, p_inv: 0.0 }
    }
}

impl RateModel {
    pub fn is_continuous(&self) -> bool {
        matches!(self.hetero, RateHetero::GammaContinuous { .. })
    }

    pub fn is_uniform(&self) -> bool {
        matches!(self.hetero, RateHetero::Uniform) && self.p_inv == 0.0
    }

    /// Discrete `(rates, weights)` of this model, with the invariant class
    /// prepended when `p_inv > 0`. Continuous gamma is approximated by four
    /// mean-rate categories (used only by the likelihood kernel; simulation
    /// samples the continuous law directly).
    pub fn category_rates(&self) -> (Vec<f64>, Vec<f64>) {
        let (mut rates, mut weights) = match &self.hetero {
            RateHetero::Uniform => (vec![1.0], vec![1.0]),
            RateHetero::GammaDiscrete { ncat, alpha } => {
                let rates = discrete_gamma_rates(*alpha, *ncat);
                let weights = vec![1.0 / *ncat as f64; *ncat];
                (rates, weights)
            },
            RateHetero::GammaContinuous { alpha } => {
                let rates = discrete_gamma_rates(*alpha, 4);
                (rates, vec![0.25; 4])
            },
            RateHetero::FreeRates { rates, weights } => (rates.clone(), weights.clone()),
        };
        if self.p_inv > 0.0 {
            let scale = 1.0 / (1.0 - self.p_inv);
            for r in &mut rates { *r *= scale }
            for w in &mut weights { *w *= 1.0 - self.p_inv }
            rates.insert(0, 0.0);
            weights.insert(0, self.p_inv);
        }
        (rates, weights)
    }

}

/// Mean rates of `ncat` equiprobable categories of a Gamma(alpha, alpha)
/// law (mean 1): category `i` spans quantiles `[i/k, (i+1)/k)` and is
/// assigned its conditional mean `k·[P(α+1, α·q_hi) − P(α+1, α·q_lo)]`.
pub fn discrete_gamma_rates(alpha: f64, ncat: usize) -> Vec<f64> {
    let k = ncat as f64;
    let cuts: Vec<f64> = (1..ncat)
        .map(|i| inv_reg_lower_gamma(alpha, i as f64 / k) / alpha)
        .collect();

    let mut rates = Vec::with_capacity(ncat);
    let mut prev_mass = 0.0;
    for i in 0..ncat {
        let upper_mass = match i + 1 == ncat {
            true  => 1.0,
            false => reg_lower_gamma(alpha + 1.0, alpha * cuts[i]),
        };
        rates.push(k * (upper_mass - prev_mass));
        prev_mass = upper_mass;
    }
    rates
}

/// Marsaglia–Tsang draw from Gamma(alpha, alpha), i.e. mean 1.
pub fn sample_gamma_mean_one(alpha: f64, rng: &mut fastrand::Rng) -> f64 {
    sample_std_gamma(alpha, rng) / alpha
}

fn sample_std_gamma(shape: f64, rng: &mut fastrand::Rng) -> f64 {
    if shape < 1.0 {
        // Boost: Gamma(a) = Gamma(a+1) · U^{1/a}
        let boost = rng.f64().max(f64::MIN_POSITIVE).powf(1.0 / shape);
        return sample_std_gamma(shape + 1.0, rng) * boost
    }
    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();
    loop {
        let x = sample_std_normal(rng);
        let v = 1.0 + c * x;
        if v <= 0.0 {
            continue
        }
        let v = v * v * v;
        let u = rng.f64().max(f64::MIN_POSITIVE);
        if u.ln() < 0.5 * x * x + d - d * v + d * v.ln() {
            return d * v
        }
    }
}

/// Box–Muller standard normal draw.
fn sample_std_normal(rng: &mut fastrand::Rng) -> f64 {
    let u1 = rng.f64().max(f64::MIN_POSITIVE);
    let u2 = rng.f64();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Parse a rate specifier body: `G{alpha}` / `G{n,alpha}` / `GC{alpha}` /
/// `R{r1,w1,r2,w2,...}` (handled by the model-string parser; this validates
/// and normalizes the numeric payloads).
pub fn parse_free_rates(params: &[f64], spec: &str) -> Result<RateHetero, ModelError> {
    if params.len() < 2 || params.len() % 2 != 0 {
        return Err(ModelError::InvalidRateSpec(spec.to_string()))
    }
    let (mut rates, mut weights) = (Vec::new(), Vec::new());
    for pair in params.chunks_exact(2) {
        if pair[0] < 0.0 || pair[1] <= 0.0 {
            return Err(ModelError::InvalidRateSpec(spec.to_string()))
        }
        rates.push(pair[0]);
        weights.push(pair[1]);
    }
    // Normalize weights to sum 1 and rates to mean 1.
    let wsum: f64 = weights.iter().sum();
    for w in &mut weights { *w /= wsum }
    let mean: f64 = rates.iter().zip(&weights).map(|(r, w)| r * w).sum();
    if mean <= 0.0 {
        return Err(ModelError::InvalidRateSpec(spec.to_string()))
    }
    for r in &mut rates { *r /= mean }
    Ok(RateHetero::FreeRates { rates, weights })
}
