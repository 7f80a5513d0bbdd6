use alphabet::{Alphabet, AlphabetKind, State};
use anyhow::Result;
use located_error::LocatedError;
use log::{debug, warn};

use crate::error::ModelError;
use crate::matrix::{Eigen, SquareMatrix};
use crate::rates::{parse_free_rates, RateHetero, RateModel};

/// Default transition/transversion ratio when a kappa-parameterized model
/// is requested without parameters.
const DEFAULT_KAPPA: f64 = 2.0;

/// One mixture component: exchangeabilities, the normalized rate matrix
/// they induce under the shared frequencies, and its spectral form.
#[derive(Debug, Clone)]
struct ModelClass {
    name: String,
    exch: SquareMatrix,
    q: SquareMatrix,
    eigen: Eigen,
}

/// A parsed substitution model: one or more mixture classes over a shared
/// stationary distribution, an among-site rate model, and the optional
/// modifiers (`+ASC` ascertainment, `+E` sequencing error).
///
/// Model strings follow `BASE{params}[+MOD{params}]...`, e.g.
/// `HKY{2.0}+G{4,0.5}+I{0.1}+F{0.1,0.4,0.4,0.1}+ASC`.
#[derive(Debug, Clone)]
pub struct Model {
    alphabet: Alphabet,
    spec: String,
    classes: Vec<ModelClass>,
    weights: Vec<f64>,
    freqs: Vec<f64>,
    rate_model: RateModel,
    ascertainment: bool,
    dna_error: Option<f64>,
    heterotachy: bool,
    mixture_at_substitution: bool,
}

impl Model {
    /// Parse a model string against an alphabet.
    pub fn parse(spec: &str, kind: AlphabetKind) -> Result<Self> {
        let alphabet = Alphabet::new(kind);
        let num_states = alphabet.num_states();
        let components = split_top_level(spec, '+');
        let (base, modifiers) = components.split_first()
            .filter(|(base, _)| !base.is_empty())
            .ok_or_else(|| ModelError::UnknownModel(spec.to_string()))
            .loc("While parsing model string")?;

        // ---- Base model: either a single component or a MIX{...} list.
        let (base_name, base_body) = split_name_body(base);
        let class_specs: Vec<String> = match base_name.eq_ignore_ascii_case("MIX") {
            true => {
                let members = split_top_level(&base_body, ',');
                if members.is_empty() || members.iter().all(String::is_empty) {
                    return Err(ModelError::EmptyMixture).loc("While parsing mixture model")
                }
                members
            },
            false => vec![base.clone()],
        };

        // ---- Modifiers.
        let mut freqs: Option<Vec<f64>> = None;
        let mut rate_model = RateModel::default();
        let mut ascertainment = false;
        let mut dna_error = None;
        for modifier in modifiers {
            let (name, body) = split_name_body(modifier);
            let params = parse_params(&body, modifier)?;
            match name.to_ascii_uppercase().as_str() {
                "ASC" => ascertainment = true,
                "FQ"  => freqs = Some(vec![1.0 / num_states as f64; num_states]),
                "F"   => {
                    if params.len() != num_states || params.iter().any(|&f| f <= 0.0) {
                        return Err(ModelError::InvalidFrequencies {
                            expected: num_states, got: params.len(),
                        }).loc("While parsing +F modifier")
                    }
                    let total: f64 = params.iter().sum();
                    freqs = Some(params.iter().map(|f| f / total).collect());
                },
                "GC" => {
                    let [alpha] = params[..] else {
                        return Err(ModelError::InvalidRateSpec(modifier.clone()))
                            .loc("While parsing +GC modifier")
                    };
                    if alpha <= 0.0 {
                        return Err(ModelError::InvalidRateSpec(modifier.clone()))
                            .loc("While parsing +GC modifier")
                    }
                    rate_model.hetero = RateHetero::GammaContinuous { alpha };
                },
                "I" => {
                    let [p_inv] = params[..] else {
                        return Err(ModelError::InvalidPinv(body.clone()))
                            .loc("While parsing +I modifier")
                    };
                    if !(0.0..1.0).contains(&p_inv) {
                        return Err(ModelError::InvalidPinv(body.clone()))
                            .loc("While parsing +I modifier")
                    }
                    rate_model.p_inv = p_inv;
                },
                "E" => {
                    let [prob] = params[..] else {
                        return Err(ModelError::InvalidErrorProb(body.clone()))
                            .loc("While parsing +E modifier")
                    };
                    if !(0.0..=1.0).contains(&prob) {
                        return Err(ModelError::InvalidErrorProb(body.clone()))
                            .loc("While parsing +E modifier")
                    }
                    dna_error = Some(prob);
                },
                other if other.starts_with('G') => {
                    let ncat = parse_category_count(other.strip_prefix('G').unwrap_or(""), 4)
                        .ok_or_else(|| ModelError::InvalidRateSpec(modifier.clone()))
                        .loc("While parsing +G modifier")?;
                    let (ncat, alpha) = match params[..] {
                        [alpha]       => (ncat, alpha),
                        [n, alpha]    => (n as usize, alpha),
                        _ => return Err(ModelError::InvalidRateSpec(modifier.clone()))
                            .loc("While parsing +G modifier"),
                    };
                    if alpha <= 0.0 || ncat < 2 {
                        return Err(ModelError::InvalidRateSpec(modifier.clone()))
                            .loc("While parsing +G modifier")
                    }
                    rate_model.hetero = RateHetero::GammaDiscrete { ncat, alpha };
                },
                other if other.starts_with('R') => {
                    rate_model.hetero = parse_free_rates(&params, modifier)
                        .loc("While parsing +R modifier")?;
                },
                other => return Err(ModelError::UnknownModifier(other.to_string()))
                    .loc("While parsing model modifiers"),
            }
        }

        // ---- Frequencies default to uniform, with a warning for the
        //      unequal-frequency families.
        let freqs = match freqs {
            Some(freqs) => freqs,
            None => {
                let unequal_family = class_specs.iter().any(|spec| {
                    let (name, _) = split_name_body(spec);
                    matches!(name.to_ascii_uppercase().as_str(), "F81" | "HKY" | "HKY85" | "TN93" | "GTR")
                });
                if unequal_family {
                    warn!("No base frequencies supplied for '{spec}'. Defaulting to uniform frequencies (see +F{{...}})");
                }
                vec![1.0 / num_states as f64; num_states]
            }
        };

        // ---- Build each mixture class under the shared frequencies.
        let mut classes = Vec::with_capacity(class_specs.len());
        for class_spec in &class_specs {
            let exch = build_exchangeabilities(class_spec, num_states)
                .with_loc(|| format!("While building model component '{class_spec}'"))?;
            let (q, eigen) = assemble_q(&exch, &freqs)?;
            classes.push(ModelClass { name: class_spec.clone(), exch, q, eigen });
        }
        let weights = vec![1.0 / classes.len() as f64; classes.len()];

        debug!("Parsed model '{spec}': {} class(es), {:?}", classes.len(), rate_model);
        Ok(Self {
            alphabet,
            spec: spec.to_string(),
            classes,
            weights,
            freqs,
            rate_model,
            ascertainment,
            dna_error,
            heterotachy: false,
            mixture_at_substitution: false,
        })
    }

    pub fn alphabet(&self) -> &Alphabet { &self.alphabet }

    pub fn spec(&self) -> &str { &self.spec }

    pub fn num_states(&self) -> usize { self.alphabet.num_states() }

    /// Shared stationary state frequencies.
    pub fn freqs(&self) -> &[f64] { &self.freqs }

    /// Replace the stationary frequencies and rebuild every class.
    pub fn set_state_frequency(&mut self, freqs: &[f64]) -> Result<()> {
        let expected = self.num_states();
        if freqs.len() != expected || freqs.iter().any(|&f| f <= 0.0) {
            return Err(ModelError::InvalidFrequencies { expected, got: freqs.len() })
                .loc("While overriding state frequencies")
        }
        let total: f64 = freqs.iter().sum();
        self.freqs = freqs.iter().map(|f| f / total).collect();
        for class in &mut self.classes {
            let (q, eigen) = assemble_q(&class.exch, &self.freqs)?;
            class.q = q;
            class.eigen = eigen;
        }
        Ok(())
    }

    pub fn n_mixtures(&self) -> usize { self.classes.len() }

    pub fn is_mixture(&self) -> bool { self.classes.len() > 1 }

    /// Per-class mixture weights.
    pub fn class_weights(&self) -> &[f64] { &self.weights }

    /// Branch-specific multi-length models. Never set by this catalog, but
    /// honored by the simulation method selection.
    pub fn is_heterotachy(&self) -> bool { self.heterotachy }

    /// True when mixture components must be resampled at every substitution
    /// event rather than fixed per site.
    pub fn mixture_at_substitution(&self) -> bool { self.mixture_at_substitution }

    pub fn contains_dna_error(&self) -> bool { self.dna_error.is_some() }

    /// Sequencing-error probability. Uniform across mixture classes within
    /// this catalog.
    pub fn dna_err_prob(&self, _mix: usize) -> Option<f64> { self.dna_error }

    pub fn ascertainment(&self) -> bool { self.ascertainment }

    pub fn set_ascertainment(&mut self, on: bool) { self.ascertainment = on }

    pub fn rate_model(&self) -> &RateModel { &self.rate_model }

    /// Normalized instantaneous rate matrix of mixture class `mix`.
    pub fn q_matrix(&self, mix: usize) -> &SquareMatrix { &self.classes[mix].q }

    /// Transition probability matrix `P(t)` of mixture class `mix`.
    pub fn p_matrix(&self, t: f64, mix: usize) -> SquareMatrix {
        self.classes[mix].eigen.p_matrix(t)
    }

    pub fn class_name(&self, mix: usize) -> &str { &self.classes[mix].name }

    /// Draw a state from the stationary distribution.
    pub fn sample_stationary(&self, rng: &mut fastrand::Rng) -> State {
        let mut u = rng.f64();
        for (state, &f) in self.freqs.iter().enumerate() {
            if u < f {
                return state as State
            }
            u -= f;
        }
        (self.num_states() - 1) as State
    }
}

/// `Q[i,j] = exch[i,j]·π[j]`, diagonal filled, scaled to unit expected rate.
fn assemble_q(exch: &SquareMatrix, freqs: &[f64]) -> Result<(SquareMatrix, Eigen), ModelError> {
    let n = freqs.len();
    let mut q = SquareMatrix::zeros(n);
    for i in 0..n {
        let mut row_sum = 0.0;
        for j in 0..n {
            if i == j { continue }
            let rate = exch[(i, j)] * freqs[j];
            q[(i, j)] = rate;
            row_sum += rate;
        }
        q[(i, i)] = -row_sum;
    }
    let mu: f64 = (0..n).map(|i| -freqs[i] * q[(i, i)]).sum();
    for i in 0..n {
        for j in 0..n {
            q[(i, j)] /= mu;
        }
    }
    let eigen = Eigen::decompose(&q, freqs)?;
    Ok((q, eigen))
}

/// Exchangeability matrix of a single model component.
fn build_exchangeabilities(spec: &str, num_states: usize) -> Result<SquareMatrix, ModelError> {
    let (name, body) = split_name_body(spec);
    let params = parse_params(&body, spec)?;
    let upper = name.to_ascii_uppercase();

    let expect_dna = |model: &str| match num_states {
        4 => Ok(()),
        got => Err(ModelError::WrongStateCount { model: model.to_string(), expected: 4, got }),
    };

    let mut exch = SquareMatrix::zeros(num_states);
    let mut fill = |f: &dyn Fn(usize, usize) -> f64| {
        for i in 0..num_states {
            for j in 0..num_states {
                if i != j {
                    exch[(i, j)] = f(i, j);
                }
            }
        }
    };

    // A=0, C=1, G=2, T=3; transitions are A<->G and C<->T.
    let is_transition = |i: usize, j: usize| (i + 2) % 4 == j;

    match upper.as_str() {
        "JC" | "JC69" | "POISSON" | "MK" | "JC2" | "F81" => {
            if !params.is_empty() {
                return Err(ModelError::WrongParamCount { model: upper, expected: 0, got: params.len() })
            }
            fill(&|_, _| 1.0);
        },
        "K80" | "K2P" | "HKY" | "HKY85" => {
            expect_dna(&upper)?;
            let kappa = match params[..] {
                []      => DEFAULT_KAPPA,
                [kappa] => kappa,
                _ => return Err(ModelError::WrongParamCount { model: upper, expected: 1, got: params.len() }),
            };
            if kappa <= 0.0 {
                return Err(ModelError::InvalidParam(kappa.to_string()))
            }
            fill(&|i, j| if is_transition(i, j) { kappa } else { 1.0 });
        },
        "TN93" => {
            expect_dna(&upper)?;
            let (k1, k2) = match params[..] {
                []         => (DEFAULT_KAPPA, DEFAULT_KAPPA),
                [k1, k2]   => (k1, k2),
                _ => return Err(ModelError::WrongParamCount { model: upper, expected: 2, got: params.len() }),
            };
            if k1 <= 0.0 || k2 <= 0.0 {
                return Err(ModelError::InvalidParam(format!("{k1},{k2}")))
            }
            // Purine transition (A<->G) vs pyrimidine transition (C<->T).
            fill(&|i, j| match (i.min(j), i.max(j)) {
                (0, 2) => k1,
                (1, 3) => k2,
                _      => 1.0,
            });
        },
        "GTR" => {
            expect_dna(&upper)?;
            if params.len() != 6 {
                return Err(ModelError::WrongParamCount { model: upper, expected: 6, got: params.len() })
            }
            if params.iter().any(|&p| p <= 0.0) {
                return Err(ModelError::InvalidParam(format!("{params:?}")))
            }
            // Upper-triangle order: AC, AG, AT, CG, CT, GT.
            fill(&|i, j| match (i.min(j), i.max(j)) {
                (0, 1) => params[0],
                (0, 2) => params[1],
                (0, 3) => params[2],
                (1, 2) => params[3],
                (1, 3) => params[4],
                _      => params[5],
            });
        },
        _ => return Err(ModelError::UnknownModel(name)),
    }
    Ok(exch)
}

/// Split `s` on `sep`, ignoring separators nested inside `{}`.
fn split_top_level(s: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in s.trim().chars() {
        match c {
            '{' => { depth += 1; current.push(c) },
            '}' => { depth = depth.saturating_sub(1); current.push(c) },
            c if c == sep && depth == 0 => parts.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    parts.push(current);
    parts.into_iter().map(|p| p.trim().to_string()).collect()
}

/// Split `NAME{body}` into `(NAME, body)`; body is empty when absent.
fn split_name_body(s: &str) -> (String, String) {
    match s.find('{') {
        Some(open) => {
            let name = s[..open].trim().to_string();
            let body = s[open + 1..].trim_end_matches('}').trim().to_string();
            (name, body)
        },
        None => (s.trim().to_string(), String::new()),
    }
}

fn parse_params(body: &str, context: &str) -> Result<Vec<f64>, ModelError> {
    if body.is_empty() {
        return Ok(Vec::new())
    }
    body.split(',')
        .map(|p| p.trim().parse::<f64>()
            .map_err(|_| ModelError::InvalidParam(format!("{p} (in {context})"))))
        .collect()
}

/// `+G4` style category-count suffix; `default` when absent.
fn parse_category_count(suffix: &str, default: usize) -> Option<usize> {
    match suffix.is_empty() {
        true  => Some(default),
        false => suffix.parse::<usize>().ok().filter(|&n| n >= 2),
    }
}
