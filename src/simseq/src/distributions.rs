use std::str::FromStr;

use submodels::sample_gamma_mean_one;

use crate::error::SimError;

/// Maximum attempts at drawing a strictly positive indel size before the
/// simulation gives up.
pub const MAX_SIZE_ATTEMPTS: usize = 1000;

/// Size cap applied when a bounded distribution is requested without an
/// explicit maximum.
const DEFAULT_POW_MAX: usize = 100;

#[derive(Debug, Clone, PartialEq)]
enum DistKind {
    NegBin { r: f64, p: f64 },
    Zipf { a: f64, max: usize },
    Lavalette { a: f64, max: usize },
    Geometric { p: f64 },
    User,
}

/// An indel size distribution. Bounded families (POW, LAV, USER) sample by
/// binary search over a precomputed CDF table; GEO inverts its CDF in closed
/// form and NB samples through its gamma-Poisson mixture.
#[derive(Debug, Clone, PartialEq)]
pub struct IndelDistribution {
    kind: DistKind,
    /// Cumulative probabilities of sizes `1..=cum.len()`; empty for the
    /// unbounded families.
    cum: Vec<f64>,
}

impl FromStr for IndelDistribution {
    type Err = SimError;

    /// Parse specifiers of the form `NAME{p1,p2,...}`, e.g. `POW{1.7,100}`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let spec = s.trim();
        let (name, body) = match spec.find('{') {
            Some(open) => (
                spec[..open].trim().to_ascii_uppercase(),
                spec[open + 1..].trim_end_matches('}').trim(),
            ),
            None => (spec.to_ascii_uppercase(), ""),
        };
        let params: Vec<f64> = match body.is_empty() {
            true  => Vec::new(),
            false => body.split(',')
                .map(|p| p.trim().parse::<f64>())
                .collect::<Result<_, _>>()
                .map_err(|_| SimError::InvalidDistribution(spec.to_string()))?,
        };
        let invalid = || SimError::InvalidDistribution(spec.to_string());

        let kind = match name.as_str() {
            "NB" | "NEGBIN" => {
                let [r, p] = params[..] else { return Err(invalid()) };
                if r <= 0.0 || !(0.0..1.0).contains(&p) {
                    return Err(invalid())
                }
                DistKind::NegBin { r, p }
            },
            "POW" | "ZIPF" => {
                let (a, max) = match params[..] {
                    [a]      => (a, DEFAULT_POW_MAX),
                    [a, max] => (a, max as usize),
                    _ => return Err(invalid()),
                };
                if a <= 0.0 || max < 1 {
                    return Err(invalid())
                }
                DistKind::Zipf { a, max }
            },
            "LAV" => {
                let [a, max] = params[..] else { return Err(invalid()) };
                let max = max as usize;
                if a <= 0.0 || max < 1 {
                    return Err(invalid())
                }
                DistKind::Lavalette { a, max }
            },
            "GEO" => {
                let [p] = params[..] else { return Err(invalid()) };
                if !(0.0..1.0).contains(&p) || p == 0.0 {
                    return Err(invalid())
                }
                DistKind::Geometric { p }
            },
            "USER" => {
                if params.is_empty() || params.iter().any(|&p| p < 0.0) || params.iter().sum::<f64>() <= 0.0 {
                    return Err(invalid())
                }
                DistKind::User
            },
            _ => return Err(SimError::UnknownDistribution(spec.to_string())),
        };

        let cum = match &kind {
            DistKind::Zipf { a, max } => cumulative(
                (1..=*max).map(|i| (i as f64).powf(-a)),
            ),
            DistKind::Lavalette { a, max } => cumulative(
                (1..=*max).map(|i| {
                    let m = *max as f64;
                    (i as f64 * m / (m - i as f64 + 1.0)).powf(-a)
                }),
            ),
            DistKind::User => cumulative(params.iter().copied()),
            _ => Vec::new(),
        };
        Ok(Self { kind, cum })
    }
}

fn cumulative(weights: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut cum: Vec<f64> = weights
        .scan(0.0, |acc, w| { *acc += w; Some(*acc) })
        .collect();
    let total = cum.last().copied().unwrap_or(1.0);
    for c in &mut cum { *c /= total }
    cum
}

impl IndelDistribution {
    /// Draw one size (may be zero for NB).
    pub fn sample(&self, rng: &mut fastrand::Rng) -> usize {
        match &self.kind {
            DistKind::Geometric { p } => {
                // Inverse CDF of the size-biased geometric law (support >= 1).
                let u = 1.0 - rng.f64();
                (u.ln() / (1.0 - p).ln()).floor() as usize + 1
            },
            DistKind::NegBin { r, p } => {
                // Gamma-Poisson mixture; exact for non-integral r.
                let lambda = sample_gamma_mean_one(*r, rng) * r * p / (1.0 - p);
                sample_poisson(lambda, rng)
            },
            _ => {
                // Bounded families: binary search the CDF table.
                let u = rng.f64();
                self.cum.partition_point(|&c| c < u).min(self.cum.len() - 1) + 1
            },
        }
    }

    /// Draw one strictly positive size, rejecting zeros for up to
    /// [`MAX_SIZE_ATTEMPTS`] attempts.
    pub fn sample_positive(&self, rng: &mut fastrand::Rng) -> Result<usize, SimError> {
        for _ in 0..MAX_SIZE_ATTEMPTS {
            let size = self.sample(rng);
            if size > 0 {
                return Ok(size)
            }
        }
        Err(SimError::IndelSizeExhausted(MAX_SIZE_ATTEMPTS))
    }

    /// Empirical mean of `n` draws.
    pub fn empirical_mean(&self, n: usize, rng: &mut fastrand::Rng) -> f64 {
        let n = n.max(1);
        (0..n).map(|_| self.sample(rng) as f64).sum::<f64>() / n as f64
    }
}

fn sample_poisson(lambda: f64, rng: &mut fastrand::Rng) -> usize {
    if lambda <= 0.0 {
        return 0
    }
    if lambda < 30.0 {
        // Knuth multiplication.
        let threshold = (-lambda).exp();
        let mut k = 0usize;
        let mut product = rng.f64();
        while product > threshold {
            k += 1;
            product *= rng.f64();
        }
        k
    } else {
        // Normal approximation for large means.
        let u1 = rng.f64().max(f64::MIN_POSITIVE);
        let u2 = rng.f64();
        let gauss = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        (lambda + lambda.sqrt() * gauss).round().max(0.0) as usize
    }
}
