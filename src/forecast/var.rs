//! Vector autoregression
//!
//! Small VAR(p) estimator for the per-cluster snapshot series. Lag order is
//! capped at `max_lags` (1 in this pipeline) and selected by AIC over a
//! common effective sample; coefficients come from an SVD least-squares
//! solve, so near-collinear regressors degrade gracefully instead of
//! erroring. A lag of zero degenerates to the sample mean, which is the
//! right forecast for flat series.

use nalgebra::DMatrix;

/// Forecaster-side model failure. One cluster failing must not abort the
/// batch, so this surfaces as a logged skip upstream.
#[derive(Debug, thiserror::Error)]
pub enum VarError {
    #[error("series too short: {rows} rows, need at least {min}")]
    TooShort { rows: usize, min: usize },
    #[error("least-squares solve failed: {0}")]
    Solve(String),
}

/// A fitted VAR model.
#[derive(Debug, Clone)]
pub struct VarFit {
    /// Selected lag order (0 or 1 in practice).
    pub lag: usize,
    /// Coefficient matrix, `(1 + dim * lag) x dim`; first row is the
    /// intercept.
    coef: DMatrix<f64>,
    dim: usize,
}

/// Fit a VAR to `series` (one row per time step, equal-width rows),
/// choosing the lag in `0..=max_lags` that minimizes AIC.
pub fn fit_var(series: &[Vec<f64>], max_lags: usize) -> Result<VarFit, VarError> {
    let rows = series.len();
    if rows < max_lags + 2 {
        return Err(VarError::TooShort {
            rows,
            min: max_lags + 2,
        });
    }
    let dim = series[0].len();

    let mut best: Option<(f64, VarFit)> = None;
    for lag in 0..=max_lags {
        let fit = fit_with_lag(series, lag, max_lags, dim)?;
        let aic = fit.0;
        let candidate = fit.1;
        let better = match &best {
            Some((best_aic, _)) => aic < *best_aic,
            None => true,
        };
        if better {
            best = Some((aic, candidate));
        }
    }

    best.map(|(_, fit)| fit)
        .ok_or_else(|| VarError::Solve("no candidate lag produced a fit".to_string()))
}

/// Fit one candidate lag over the common effective sample (the first
/// `max_lags` rows are dropped for every candidate so AIC values are
/// comparable). Returns `(aic, fit)`.
fn fit_with_lag(
    series: &[Vec<f64>],
    lag: usize,
    max_lags: usize,
    dim: usize,
) -> Result<(f64, VarFit), VarError> {
    let n_eff = series.len() - max_lags;
    let n_params = 1 + dim * lag;

    let mut z = DMatrix::zeros(n_eff, n_params);
    let mut y = DMatrix::zeros(n_eff, dim);
    for (row, t) in (max_lags..series.len()).enumerate() {
        z[(row, 0)] = 1.0;
        for l in 0..lag {
            for j in 0..dim {
                z[(row, 1 + l * dim + j)] = series[t - l - 1][j];
            }
        }
        for j in 0..dim {
            y[(row, j)] = series[t][j];
        }
    }

    let svd = z.clone().svd(true, true);
    let coef = svd
        .solve(&y, 1e-12)
        .map_err(|e| VarError::Solve(e.to_string()))?;

    let residuals = &y - &z * &coef;
    let sigma = residuals.transpose() * &residuals / n_eff as f64;
    let det = sigma.determinant();
    // Singular residual covariance means an exact in-sample fit; its
    // log-determinant is -inf, so such a lag wins selection outright.
    // Candidates are compared strictly, so when every lag fits exactly
    // (constant series) the smallest lag is kept.
    let aic = if det.is_nan() {
        f64::INFINITY
    } else if det <= 0.0 {
        f64::NEG_INFINITY
    } else {
        det.ln() + 2.0 * (dim * n_params) as f64 / n_eff as f64
    };

    Ok((aic, VarFit { lag, coef, dim }))
}

impl VarFit {
    /// Forecast `steps` rows past the end of `history` by iterating the
    /// fitted recursion.
    pub fn forecast(&self, history: &[Vec<f64>], steps: usize) -> Vec<Vec<f64>> {
        let mut window: Vec<Vec<f64>> = history
            .iter()
            .rev()
            .take(self.lag.max(1))
            .rev()
            .cloned()
            .collect();

        let mut out = Vec::with_capacity(steps);
        for _ in 0..steps {
            let mut next = vec![0.0; self.dim];
            for (j, value) in next.iter_mut().enumerate() {
                *value = self.coef[(0, j)];
                for l in 0..self.lag {
                    let prev = &window[window.len() - 1 - l];
                    for (k, &p) in prev.iter().enumerate() {
                        *value += self.coef[(1 + l * self.dim + k, j)] * p;
                    }
                }
            }
            window.push(next.clone());
            out.push(next);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_too_short_series_errors() {
        let series = vec![vec![1.0, 2.0]];
        assert!(matches!(
            fit_var(&series, 1),
            Err(VarError::TooShort { .. })
        ));
    }

    #[test]
    fn test_constant_series_forecasts_constant() {
        let series: Vec<Vec<f64>> = (0..8).map(|_| vec![3.0, -1.0]).collect();
        let fit = fit_var(&series, 1).unwrap();
        let forecast = fit.forecast(&series, 2);
        assert_eq!(forecast.len(), 2);
        for row in forecast {
            assert!((row[0] - 3.0).abs() < 1e-6, "row[0] = {}", row[0]);
            assert!((row[1] - -1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_linear_trend_is_extrapolated() {
        // y_t = y_{t-1} + 1 is exactly representable at lag 1.
        let series: Vec<Vec<f64>> = (0..10)
            .map(|t| vec![f64::from(t), f64::from(2 * t)])
            .collect();
        let fit = fit_var(&series, 1).unwrap();
        assert_eq!(fit.lag, 1);
        let forecast = fit.forecast(&series, 3);
        assert!((forecast[0][0] - 10.0).abs() < 1e-4);
        assert!((forecast[1][0] - 11.0).abs() < 1e-4);
        assert!((forecast[2][1] - 24.0).abs() < 1e-3);
    }

    #[test]
    fn test_ar1_recovery() {
        // y_t = 0.5 * y_{t-1} + 2.0, fixed point at 4.0.
        let mut series = vec![vec![0.0]];
        for t in 1..30 {
            let prev: f64 = series[t - 1][0];
            series.push(vec![0.5 * prev + 2.0]);
        }
        let fit = fit_var(&series, 1).unwrap();
        let forecast = fit.forecast(&series, 1);
        let last: f64 = series[29][0];
        assert!((forecast[0][0] - (0.5 * last + 2.0)).abs() < 1e-3);
    }

    #[test]
    fn test_forecast_length_matches_steps() {
        let series: Vec<Vec<f64>> = (0..6).map(|t| vec![f64::from(t)]).collect();
        let fit = fit_var(&series, 1).unwrap();
        assert_eq!(fit.forecast(&series, 5).len(), 5);
    }
}
