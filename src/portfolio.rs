//! # Portfolio
//!
//! $$
//! \sigma_p^2 = \mathbf{w}^\top \Sigma \mathbf{w},\qquad
//! RC_i = w_i(\Sigma\mathbf{w})_i
//! $$
//!
//! Moment estimation, risk parity, relaxed risk parity, mean-variance
//! optimization and the efficient frontier.

pub mod data;
pub mod engine;
pub mod frontier;
pub mod optimizers;
pub mod risk_parity;
pub(crate) mod solver;
pub mod types;

pub use data::MomentEstimate;
pub use data::ReturnsMatrix;
pub use data::estimate_moments;
pub use engine::PortfolioEngine;
pub use engine::PortfolioReport;
pub use frontier::efficient_frontier;
pub use optimizers::optimize_mean_variance;
pub use risk_parity::optimize_relaxed_risk_parity;
pub use risk_parity::optimize_risk_parity;
pub use types::FrontierPoint;
pub use types::Objective;
pub use types::OptimizationConfig;
pub use types::PortfolioWeights;
pub use types::RiskMeasure;
pub use types::RrpVersion;
pub use types::SolverSettings;

pub use crate::error::Result;
