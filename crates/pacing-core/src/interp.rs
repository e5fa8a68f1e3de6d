//! Signal smoothing and spline interpolation over route distance.

use crate::error::{PacingError, Result};

/// Gaussian low-pass filter with mirrored ("reflect") edges.
///
/// The kernel is truncated at four standard deviations. `sigma <= 0`
/// returns the input unchanged.
pub fn gaussian_filter(data: &[f64], sigma: f64) -> Vec<f64> {
    if sigma <= 0.0 || data.len() < 2 {
        return data.to_vec();
    }

    let radius = (4.0 * sigma + 0.5) as isize;
    let mut kernel: Vec<f64> = (-radius..=radius)
        .map(|i| (-0.5 * (i as f64 / sigma).powi(2)).exp())
        .collect();
    let norm: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|w| *w /= norm);

    let n = data.len() as isize;
    (0..n)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * data[reflect_index(i + k as isize - radius, n)])
                .sum()
        })
        .collect()
}

// d c b a | a b c d | d c b a
fn reflect_index(mut i: isize, n: isize) -> usize {
    let period = 2 * n;
    i = i.rem_euclid(period);
    if i >= n {
        i = period - 1 - i;
    }
    i as usize
}

/// Natural cubic spline through `(x[i], y[i])`.
#[derive(Debug, Clone)]
pub struct CubicSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    /// Second derivatives at the knots.
    m: Vec<f64>,
}

impl CubicSpline {
    pub fn new(x: &[f64], y: &[f64]) -> Result<Self> {
        if x.len() != y.len() {
            return Err(PacingError::RouteData(format!(
                "spline knots ({}) and values ({}) differ in length",
                x.len(),
                y.len()
            )));
        }
        if x.len() < 2 {
            return Err(PacingError::RouteData(
                "spline needs at least two knots".to_string(),
            ));
        }
        if x.windows(2).any(|w| w[1] <= w[0]) {
            return Err(PacingError::RouteData(
                "spline knots must be strictly increasing".to_string(),
            ));
        }

        let n = x.len();
        let mut m = vec![0.0; n];
        if n > 2 {
            // Tridiagonal system for interior second derivatives (Thomas algorithm).
            let mut diag = vec![0.0; n];
            let mut rhs = vec![0.0; n];
            let mut upper = vec![0.0; n];
            for i in 1..n - 1 {
                let h0 = x[i] - x[i - 1];
                let h1 = x[i + 1] - x[i];
                diag[i] = 2.0 * (h0 + h1);
                upper[i] = h1;
                rhs[i] = 6.0 * ((y[i + 1] - y[i]) / h1 - (y[i] - y[i - 1]) / h0);
            }
            for i in 2..n - 1 {
                let lower = x[i] - x[i - 1];
                let factor = lower / diag[i - 1];
                diag[i] -= factor * upper[i - 1];
                rhs[i] -= factor * rhs[i - 1];
            }
            for i in (1..n - 1).rev() {
                m[i] = (rhs[i] - upper[i] * m[i + 1]) / diag[i];
            }
        }

        Ok(Self {
            x: x.to_vec(),
            y: y.to_vec(),
            m,
        })
    }

    pub fn domain(&self) -> (f64, f64) {
        (self.x[0], self.x[self.x.len() - 1])
    }

    pub fn contains(&self, t: f64) -> bool {
        let (lo, hi) = self.domain();
        t >= lo && t <= hi
    }

    /// Value at `t`; fails outside the knot range.
    pub fn eval(&self, t: f64) -> Result<f64> {
        self.check(t)?;
        Ok(self.eval_unchecked(t))
    }

    /// First derivative at `t`; fails outside the knot range.
    pub fn derivative(&self, t: f64) -> Result<f64> {
        self.check(t)?;
        Ok(self.derivative_unchecked(t))
    }

    /// Value with a constant run-out beyond either end.
    pub fn eval_clamped(&self, t: f64) -> f64 {
        let (lo, hi) = self.domain();
        self.eval_unchecked(t.clamp(lo, hi))
    }

    /// Derivative of [`Self::eval_clamped`]; zero beyond either end.
    pub fn derivative_clamped(&self, t: f64) -> f64 {
        if self.contains(t) {
            self.derivative_unchecked(t)
        } else {
            0.0
        }
    }

    fn check(&self, t: f64) -> Result<()> {
        if self.contains(t) {
            Ok(())
        } else {
            let (lo, hi) = self.domain();
            Err(PacingError::OutOfRange { x: t, lo, hi })
        }
    }

    fn segment(&self, t: f64) -> usize {
        let idx = self.x.partition_point(|&k| k <= t);
        idx.saturating_sub(1).min(self.x.len() - 2)
    }

    fn eval_unchecked(&self, t: f64) -> f64 {
        let i = self.segment(t);
        let h = self.x[i + 1] - self.x[i];
        let a = (self.x[i + 1] - t) / h;
        let b = (t - self.x[i]) / h;
        a * self.y[i]
            + b * self.y[i + 1]
            + ((a.powi(3) - a) * self.m[i] + (b.powi(3) - b) * self.m[i + 1]) * h * h / 6.0
    }

    fn derivative_unchecked(&self, t: f64) -> f64 {
        let i = self.segment(t);
        let h = self.x[i + 1] - self.x[i];
        let a = (self.x[i + 1] - t) / h;
        let b = (t - self.x[i]) / h;
        (self.y[i + 1] - self.y[i]) / h
            + ((1.0 - 3.0 * a * a) * self.m[i] + (3.0 * b * b - 1.0) * self.m[i + 1]) * h / 6.0
    }
}
