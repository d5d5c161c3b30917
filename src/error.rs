//! # Errors
//!
//! Failure taxonomy shared by the estimator and every optimizer. Errors are
//! returned from the failing call unchanged; nothing is retried and no
//! approximate answer is substituted.

use thiserror::Error;

/// Errors raised by moment estimation and portfolio optimization.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PortfolioError {
  /// Too few observations to identify the covariance matrix.
  #[error("insufficient data: {observations} observations for {assets} assets")]
  InsufficientData { observations: usize, assets: usize },

  /// The solver failed to converge, or a target is mathematically unreachable.
  #[error("infeasible problem: {0}")]
  Infeasible(String),

  /// Relaxed risk parity version tag outside {A, B, C}.
  #[error("invalid relaxed risk parity version: {0:?}")]
  InvalidVersion(String),

  /// Unrecognized mean-variance objective.
  #[error("invalid objective: {0:?}")]
  InvalidObjective(String),

  /// Shape, range or finiteness violation in caller-supplied inputs.
  #[error("invalid input: {0}")]
  InvalidInput(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PortfolioError>;
