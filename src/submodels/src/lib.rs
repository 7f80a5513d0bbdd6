mod error;
pub use error::ModelError;

mod matrix;
pub use matrix::{Eigen, SquareMatrix};

mod numerics;

mod rates;
pub use rates::{discrete_gamma_rates, sample_gamma_mean_one, RateHetero, RateModel};

mod model;
pub use model::Model;

mod profile;
pub use profile::{sample_root_sequence, RateProfile};

mod likelihood;
pub use likelihood::constant_pattern_prob;
