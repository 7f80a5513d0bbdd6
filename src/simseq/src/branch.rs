use ahash::AHashMap;
use alphabet::{State, STATE_UNKNOWN};
use submodels::{Model, RateProfile};

/// Per-branch sequence evolution algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchMethod {
    /// Sample every site from the row-cumulative transition matrix `P(t)`.
    TransProb,
    /// Replay individual substitution events along the branch.
    RateMatrix,
}

/// Per-unit-length threshold `τ(L) = a/L` above which matrix sampling beats
/// event replay. The piecewise constant `a` depends on whether per-site
/// rates are continuous.
pub fn switching_threshold(len: usize, continuous_rates: bool, user_override: Option<f64>) -> f64 {
    if let Some(thresh) = user_override {
        return thresh
    }
    let a = match (continuous_rates, len) {
        (false, 0..=99_999)           => 2.226,
        (false, 100_000..=499_999)    => 1.4,
        (false, 500_000..=999_999)    => 1.1,
        (false, _)                    => 1.0,
        (true, 0..=99_999)            => 13.307,
        (true, 100_000..=499_999)     => 9.1,
        (true, 500_000..=999_999)     => 7.0,
        (true, _)                     => 6.0,
    };
    a / len.max(1) as f64
}

/// Pick the evolution algorithm for one branch of scaled length `dist`.
pub fn select_method(
    model: &Model,
    dist: f64,
    len: usize,
    user_override: Option<f64>,
) -> BranchMethod {
    let forced = model.is_heterotachy() || model.mixture_at_substitution();
    let threshold = switching_threshold(len, model.rate_model().is_continuous(), user_override);
    match forced || dist > threshold {
        true  => BranchMethod::TransProb,
        false => BranchMethod::RateMatrix,
    }
}

/// Row-cumulative `P(βℓ·r)` sampler with a per-`(class, rate)` matrix cache.
/// Continuous-rate models disable the cache (every site draws a distinct
/// rate) and compute their per-site matrix on the fly.
pub struct TransProbSampler<'m> {
    model: &'m Model,
    dist: f64,
    cache: AHashMap<(usize, u64), Vec<f64>>,
    cache_enabled: bool,
}

impl<'m> TransProbSampler<'m> {
    pub fn new(model: &'m Model, dist: f64) -> Self {
        Self {
            model,
            dist,
            cache: AHashMap::new(),
            cache_enabled: !model.rate_model().is_continuous(),
        }
    }

    /// Sample a child sequence site-wise from the parent.
    pub fn evolve(
        &mut self,
        parent: &[State],
        profile: &RateProfile,
        rng: &mut fastrand::Rng,
    ) -> Vec<State> {
        let s = self.model.num_states();
        let mut child = Vec::with_capacity(parent.len());
        for (i, &state) in parent.iter().enumerate() {
            if state == STATE_UNKNOWN {
                child.push(STATE_UNKNOWN);
                continue
            }
            let rate = profile.rate(i);
            if rate == 0.0 {
                child.push(state);
                continue
            }
            let class = profile.class(i);
            let u = rng.f64();
            let next = match self.cache_enabled {
                true => {
                    let (model, dist) = (self.model, self.dist);
                    let cum = self.cache
                        .entry((class, rate.to_bits()))
                        .or_insert_with(|| cumulative_p_rows(model, dist * rate, class));
                    sample_from_cum_row(cum, s, state as usize, u)
                },
                false => {
                    let cum = cumulative_p_rows(self.model, self.dist * rate, class);
                    sample_from_cum_row(&cum, s, state as usize, u)
                },
            };
            child.push(next);
        }
        child
    }
}

/// Flattened row-cumulative transition matrix.
fn cumulative_p_rows(model: &Model, t: f64, class: usize) -> Vec<f64> {
    let s = model.num_states();
    let p = model.p_matrix(t, class);
    let mut cum = Vec::with_capacity(s * s);
    for i in 0..s {
        let mut acc = 0.0;
        for j in 0..s {
            acc += p[(i, j)];
            cum.push(acc);
        }
    }
    cum
}

/// Draw from a cumulative row, probing the unchanged-state cell first
/// (overwhelmingly the hit for short branches) before binary searching.
fn sample_from_cum_row(cum: &[f64], s: usize, parent: usize, u: f64) -> State {
    let row = &cum[parent * s..(parent + 1) * s];
    let below = match parent {
        0 => 0.0,
        p => row[p - 1],
    };
    if u >= below && u < row[parent] {
        return parent as State
    }
    row.partition_point(|&c| c <= u).min(s - 1) as State
}

/// Transient per-branch state of the event-replay method: the cumulative
/// J-matrices and the per-site substitution rate bookkeeping.
pub struct RateMatrixState {
    /// Per mixture class: flattened row-cumulative `J[i,j] = Q[i,j]/(-Q[i,i])`
    /// for `j != i`, zero on the diagonal.
    jmatrices: Vec<Vec<f64>>,
    site_rates: Vec<f64>,
    total_rate: f64,
    s: usize,
}

impl RateMatrixState {
    pub fn init(model: &Model, profile: &RateProfile, seq: &[State]) -> Self {
        let s = model.num_states();
        let jmatrices = (0..model.n_mixtures())
            .map(|mix| cumulative_j_rows(model, mix))
            .collect();
        let site_rates: Vec<f64> = seq.iter().enumerate()
            .map(|(i, &state)| site_rate(model, profile, i, state))
            .collect();
        let total_rate = site_rates.iter().sum();
        Self { jmatrices, site_rates, total_rate, s }
    }

    pub fn total_rate(&self) -> f64 { self.total_rate }

    /// Zero out a NaN total (all-gap pathologies); the caller warns.
    pub fn is_total_nan(&self) -> bool { self.total_rate.is_nan() }

    pub fn clear_total(&mut self) { self.total_rate = 0.0 }

    /// Update one site's rate contribution.
    pub fn set_site(&mut self, i: usize, rate: f64) {
        self.total_rate += rate - self.site_rates[i];
        self.site_rates[i] = rate;
    }

    /// Splice freshly inserted site rates in.
    pub fn splice(&mut self, pos: usize, rates: Vec<f64>) {
        self.total_rate += rates.iter().sum::<f64>();
        self.site_rates.splice(pos..pos, rates);
    }

    /// Sample a substitution position proportional to per-site rates.
    pub fn sample_position(&self, rng: &mut fastrand::Rng) -> usize {
        let mut target = rng.f64() * self.total_rate;
        let mut last_active = 0;
        for (i, &rate) in self.site_rates.iter().enumerate() {
            if rate <= 0.0 {
                continue
            }
            last_active = i;
            if target < rate {
                return i
            }
            target -= rate;
        }
        last_active
    }

    /// Sample the replacement state of a substitution event at a site of
    /// class `mix` currently in `cur`.
    pub fn sample_substitution(&self, mix: usize, cur: State, rng: &mut fastrand::Rng) -> State {
        let cum = &self.jmatrices[mix];
        let row = &cum[cur as usize * self.s..(cur as usize + 1) * self.s];
        let u = rng.f64();
        row.partition_point(|&c| c <= u).min(self.s - 1) as State
    }
}

/// Substitution rate of one site: rate multiplier × total leaving rate of
/// its current state. Gap sites contribute nothing.
pub fn site_rate(model: &Model, profile: &RateProfile, i: usize, state: State) -> f64 {
    if state == STATE_UNKNOWN {
        return 0.0
    }
    let q = model.q_matrix(profile.class(i));
    profile.rate(i) * -q[(state as usize, state as usize)]
}

/// Flattened row-cumulative J-matrix of one mixture class.
fn cumulative_j_rows(model: &Model, mix: usize) -> Vec<f64> {
    let s = model.num_states();
    let q = model.q_matrix(mix);
    let mut cum = Vec::with_capacity(s * s);
    for i in 0..s {
        let leaving = -q[(i, i)];
        let mut acc = 0.0;
        for j in 0..s {
            if i != j {
                acc += q[(i, j)] / leaving;
            }
            cum.push(acc);
        }
    }
    cum
}
