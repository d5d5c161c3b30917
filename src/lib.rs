//! # parity-rs
//!
//! $$
//! \min_{\mathbf{w}\in\Delta} \ \mathbf{w}^\top \Sigma \mathbf{w}
//! \quad \text{s.t.} \quad \sum_i b_i \ln w_i \ge c
//! $$
//!
//! Portfolio allocation under several risk-allocation models: vanilla risk
//! parity, relaxed risk parity (versions A, B and C), classical mean-variance
//! objectives and the efficient frontier. Moments are estimated once from a
//! [`portfolio::ReturnsMatrix`] and shared read-only by every solve.

pub mod error;
pub mod portfolio;

pub use error::PortfolioError;
pub use error::Result;
