//! # Portfolio Data
//!
//! $$
//! \hat\mu = \frac{\sum_t \omega_t r_t}{V_1},\qquad
//! \hat\Sigma = \frac{\sum_t \omega_t (r_t-\hat\mu)(r_t-\hat\mu)^\top}{V_1 - V_2/V_1},
//! \qquad \omega_t = d^{\,T-1-t}
//! $$
//!
//! Returns history, moment estimates and the estimator connecting them.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::io::Read;

use chrono::NaiveDate;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::Axis;
use ndarray_stats::CorrelationExt;
use tracing::debug;

use super::types::RiskMeasure;
use crate::error::PortfolioError;
use crate::error::Result;

/// Time-ordered matrix of period returns, one row per observation and one
/// column per asset.
#[derive(Clone, Debug)]
pub struct ReturnsMatrix {
  assets: Vec<String>,
  dates: Option<Vec<NaiveDate>>,
  values: Array2<f64>,
}

impl ReturnsMatrix {
  /// Build from a `T x N` array. Every value must be finite and asset ids unique.
  pub fn new(assets: Vec<String>, values: Array2<f64>) -> Result<Self> {
    if assets.is_empty() {
      return Err(PortfolioError::InvalidInput(
        "returns matrix needs at least one asset".to_string(),
      ));
    }
    if values.ncols() != assets.len() {
      return Err(PortfolioError::InvalidInput(format!(
        "returns matrix has {} columns for {} assets",
        values.ncols(),
        assets.len()
      )));
    }

    let mut seen = HashSet::with_capacity(assets.len());
    for a in &assets {
      if !seen.insert(a.as_str()) {
        return Err(PortfolioError::InvalidInput(format!(
          "duplicate asset identifier {a:?}"
        )));
      }
    }

    if values.iter().any(|v| !v.is_finite()) {
      return Err(PortfolioError::InvalidInput(
        "returns matrix contains missing or non-finite values".to_string(),
      ));
    }

    Ok(Self {
      assets,
      dates: None,
      values,
    })
  }

  /// Attach observation dates, one per row, strictly increasing.
  pub fn with_dates(mut self, dates: Vec<NaiveDate>) -> Result<Self> {
    if dates.len() != self.values.nrows() {
      return Err(PortfolioError::InvalidInput(format!(
        "{} dates for {} observations",
        dates.len(),
        self.values.nrows()
      )));
    }
    if dates.windows(2).any(|w| w[0] >= w[1]) {
      return Err(PortfolioError::InvalidInput(
        "observation dates must be strictly increasing".to_string(),
      ));
    }
    self.dates = Some(dates);
    Ok(self)
  }

  /// Build from dated rows mapping asset id to return. All rows must carry
  /// the same asset set; columns follow the sorted asset ids.
  pub fn from_observations(rows: Vec<(NaiveDate, BTreeMap<String, f64>)>) -> Result<Self> {
    let Some((_, first)) = rows.first() else {
      return Err(PortfolioError::InvalidInput(
        "no observations supplied".to_string(),
      ));
    };

    let assets: Vec<String> = first.keys().cloned().collect();
    let mut values = Array2::zeros((rows.len(), assets.len()));
    let mut dates = Vec::with_capacity(rows.len());

    for (t, (date, row)) in rows.into_iter().enumerate() {
      if row.len() != assets.len() || !assets.iter().all(|a| row.contains_key(a)) {
        return Err(PortfolioError::InvalidInput(format!(
          "observation {date} does not cover the asset set"
        )));
      }
      for (j, a) in assets.iter().enumerate() {
        values[[t, j]] = row[a];
      }
      dates.push(date);
    }

    Self::new(assets, values)?.with_dates(dates)
  }

  /// Convert a `T x N` price table to simple returns `p_t / p_{t-1} - 1`.
  ///
  /// Rows holding any non-finite price are dropped before differencing, so a
  /// return spans two consecutive complete rows.
  pub fn from_prices(
    assets: Vec<String>,
    dates: Option<Vec<NaiveDate>>,
    prices: &Array2<f64>,
  ) -> Result<Self> {
    if let Some(d) = &dates {
      if d.len() != prices.nrows() {
        return Err(PortfolioError::InvalidInput(format!(
          "{} dates for {} price rows",
          d.len(),
          prices.nrows()
        )));
      }
    }

    let complete: Vec<usize> = prices
      .outer_iter()
      .enumerate()
      .filter(|(_, row)| row.iter().all(|p| p.is_finite()))
      .map(|(t, _)| t)
      .collect();

    let dropped = prices.nrows() - complete.len();
    if dropped > 0 {
      debug!(dropped, "dropped price rows with gaps");
    }

    if complete.len() < 2 {
      return Err(PortfolioError::InsufficientData {
        observations: complete.len().saturating_sub(1),
        assets: prices.ncols(),
      });
    }

    if complete
      .iter()
      .any(|&t| prices.row(t).iter().any(|&p| p <= 0.0))
    {
      return Err(PortfolioError::InvalidInput(
        "prices must be strictly positive".to_string(),
      ));
    }

    let mut values = Array2::zeros((complete.len() - 1, prices.ncols()));
    for (k, pair) in complete.windows(2).enumerate() {
      let prev = prices.row(pair[0]);
      let curr = prices.row(pair[1]);
      for j in 0..prices.ncols() {
        values[[k, j]] = curr[j] / prev[j] - 1.0;
      }
    }

    let matrix = Self::new(assets, values)?;
    match dates {
      Some(d) => matrix.with_dates(complete[1..].iter().map(|&t| d[t]).collect()),
      None => Ok(matrix),
    }
  }

  /// Read a price CSV: a date column (`%Y-%m-%d`) followed by one price
  /// column per asset, named in the header. Empty cells are gaps handled by
  /// [`ReturnsMatrix::from_prices`]; rows of the wrong width are rejected.
  pub fn from_price_csv<R: Read>(reader: R) -> Result<Self> {
    let mut reader = csv::ReaderBuilder::new()
      .has_headers(true)
      .trim(csv::Trim::All)
      .from_reader(reader);

    let headers = reader
      .headers()
      .map_err(|e| PortfolioError::InvalidInput(format!("unreadable header: {e}")))?
      .clone();
    if headers.len() < 2 {
      return Err(PortfolioError::InvalidInput(
        "price table needs a date column and at least one asset".to_string(),
      ));
    }
    let assets: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();

    let mut dates = Vec::new();
    let mut cells = Vec::new();
    for (k, record) in reader.records().enumerate() {
      let line = k + 2;
      let record = record
        .map_err(|e| PortfolioError::InvalidInput(format!("malformed row {line}: {e}")))?;

      let raw_date = record.get(0).unwrap_or_default();
      let date = NaiveDate::parse_from_str(raw_date, "%Y-%m-%d").map_err(|e| {
        PortfolioError::InvalidInput(format!("bad date {raw_date:?} on row {line}: {e}"))
      })?;
      dates.push(date);

      for field in record.iter().skip(1) {
        let price = if field.is_empty() {
          f64::NAN
        } else {
          field.parse::<f64>().map_err(|e| {
            PortfolioError::InvalidInput(format!("bad price {field:?} on row {line}: {e}"))
          })?
        };
        cells.push(price);
      }
    }

    let prices = Array2::from_shape_vec((dates.len(), assets.len()), cells)
      .map_err(|e| PortfolioError::InvalidInput(e.to_string()))?;
    Self::from_prices(assets, Some(dates), &prices)
  }

  /// Asset identifiers in column order.
  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  /// Observation dates, if attached.
  pub fn dates(&self) -> Option<&[NaiveDate]> {
    self.dates.as_deref()
  }

  /// Raw `T x N` values.
  pub fn values(&self) -> &Array2<f64> {
    &self.values
  }

  /// Number of observations `T`.
  pub fn observations(&self) -> usize {
    self.values.nrows()
  }

  /// Number of assets `N`.
  pub fn n_assets(&self) -> usize {
    self.values.ncols()
  }
}

/// Expected returns and covariance for one run. Immutable once built.
#[derive(Clone, Debug)]
pub struct MomentEstimate {
  assets: Vec<String>,
  mu: Array1<f64>,
  cov: Array2<f64>,
  observations: usize,
}

impl MomentEstimate {
  /// Build from caller-supplied moments. `cov` must be square, symmetric,
  /// finite and carry a non-negative diagonal.
  pub fn new(assets: Vec<String>, mu: Array1<f64>, cov: Array2<f64>) -> Result<Self> {
    Self::checked(assets, mu, cov, 0)
  }

  fn checked(
    assets: Vec<String>,
    mu: Array1<f64>,
    cov: Array2<f64>,
    observations: usize,
  ) -> Result<Self> {
    let n = assets.len();
    if n == 0 {
      return Err(PortfolioError::InvalidInput(
        "moment estimate needs at least one asset".to_string(),
      ));
    }
    if mu.len() != n || cov.dim() != (n, n) {
      return Err(PortfolioError::InvalidInput(format!(
        "moments shaped mu={} cov={:?} for {} assets",
        mu.len(),
        cov.dim(),
        n
      )));
    }
    if mu.iter().chain(cov.iter()).any(|v| !v.is_finite()) {
      return Err(PortfolioError::InvalidInput(
        "moments must be finite".to_string(),
      ));
    }

    for i in 0..n {
      if cov[[i, i]] < 0.0 {
        return Err(PortfolioError::InvalidInput(format!(
          "negative variance for {:?}",
          assets[i]
        )));
      }
      for j in (i + 1)..n {
        let scale = cov[[i, i]].abs().max(cov[[j, j]].abs()).max(1e-300);
        if (cov[[i, j]] - cov[[j, i]]).abs() > 1e-10 * scale {
          return Err(PortfolioError::InvalidInput(
            "covariance matrix must be symmetric".to_string(),
          ));
        }
      }
    }

    Ok(Self {
      assets,
      mu,
      cov,
      observations,
    })
  }

  /// Asset identifiers.
  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  /// Expected-return vector.
  pub fn mu(&self) -> &Array1<f64> {
    &self.mu
  }

  /// Covariance matrix.
  pub fn cov(&self) -> &Array2<f64> {
    &self.cov
  }

  /// Matrix behind the quadratic risk term for `measure`.
  pub fn risk_matrix(&self, measure: RiskMeasure) -> &Array2<f64> {
    match measure {
      RiskMeasure::Variance => &self.cov,
    }
  }

  /// Observations the estimate was built from; zero for supplied moments.
  pub fn observations(&self) -> usize {
    self.observations
  }

  pub fn n_assets(&self) -> usize {
    self.mu.len()
  }

  /// Per-asset standard deviations.
  pub fn volatilities(&self) -> Array1<f64> {
    self.cov.diag().mapv(|v| v.max(0.0).sqrt())
  }

  /// Same covariance with a different return vector.
  pub fn with_mu(&self, mu: Array1<f64>) -> Result<Self> {
    Self::checked(self.assets.clone(), mu, self.cov.clone(), self.observations)
  }
}

/// Estimate mean returns and covariance from a returns history.
///
/// `decay == 1.0` gives the historical mean and sample covariance. Below one,
/// the newest row has weight one and older rows decay geometrically; the
/// covariance uses the reliability-weights bias correction so both branches
/// agree in the limit.
pub fn estimate_moments(returns: &ReturnsMatrix, decay: f64) -> Result<MomentEstimate> {
  if !(decay > 0.0 && decay <= 1.0) {
    return Err(PortfolioError::InvalidInput(format!(
      "decay factor must lie in (0, 1], got {decay}"
    )));
  }

  let t = returns.observations();
  let n = returns.n_assets();
  if t < n || t < 2 {
    return Err(PortfolioError::InsufficientData {
      observations: t,
      assets: n,
    });
  }

  let x = returns.values();
  let (mu, cov) = if decay == 1.0 {
    let mu = x
      .mean_axis(Axis(0))
      .ok_or_else(|| PortfolioError::InvalidInput("empty returns matrix".to_string()))?;
    let cov = x
      .t()
      .cov(1.0)
      .map_err(|e| PortfolioError::InvalidInput(e.to_string()))?;
    (mu, cov)
  } else {
    weighted_moments(x, decay)?
  };

  let cov = symmetrize(cov);
  debug!(observations = t, assets = n, decay, "estimated moments");

  MomentEstimate::checked(returns.assets().to_vec(), mu, cov, t)
}

fn weighted_moments(x: &Array2<f64>, decay: f64) -> Result<(Array1<f64>, Array2<f64>)> {
  let t = x.nrows();
  let omega: Array1<f64> = (0..t).map(|k| decay.powi((t - 1 - k) as i32)).collect();
  let v1 = omega.sum();
  let v2 = omega.dot(&omega);

  let denom = v1 - v2 / v1;
  if !(denom > 0.0) {
    return Err(PortfolioError::InsufficientData {
      observations: t,
      assets: x.ncols(),
    });
  }

  let mu = omega.dot(x) / v1;
  let centered = x - &mu;
  let weighted = &centered * &omega.view().insert_axis(Axis(1));
  let cov = weighted.t().dot(&centered) / denom;

  Ok((mu, cov))
}

fn symmetrize(cov: Array2<f64>) -> Array2<f64> {
  (&cov + &cov.t()) * 0.5
}
