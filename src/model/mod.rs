//! Model module
//!
//! The regressor is an external collaborator as far as the pipeline is concerned:
//! an opaque differentiable function with a known input shape [N, 3, H, W] and a
//! fixed-length coefficient output [N, 27].

pub mod regressor;

pub use regressor::{ShRegressor, ShRegressorConfig};
