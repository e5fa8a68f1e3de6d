//! Envelope (skyline) storage and `L D Lᵀ` factorization for symmetric
//! matrices whose nonzeros hug the diagonal.
//!
//! Row `i` keeps columns `first[i]..=i`. Fill-in never leaves the envelope,
//! so a banded matrix with a few dense trailing rows factors in time linear
//! in its dimension.

use crate::solver::Triplet;

#[derive(Debug, Clone)]
pub struct SkylineMatrix {
    first: Vec<usize>,
    offsets: Vec<usize>,
    values: Vec<f64>,
}

impl SkylineMatrix {
    /// Envelope spanning every lower-triangle entry of `entries`, with the
    /// entries summed in. Entries above the diagonal or outside `n` are
    /// ignored.
    pub fn from_lower_triplets(n: usize, entries: &[Triplet]) -> Self {
        let mut first: Vec<usize> = (0..n).collect();
        for &(row, col, _) in entries {
            if row < n && col <= row {
                first[row] = first[row].min(col);
            }
        }
        let mut offsets = Vec::with_capacity(n + 1);
        offsets.push(0);
        for (i, &f) in first.iter().enumerate() {
            offsets.push(offsets[i] + i - f + 1);
        }

        let mut matrix = Self {
            values: vec![0.0; offsets[n]],
            first,
            offsets,
        };
        for &(row, col, value) in entries {
            if row < n && col <= row {
                matrix.add(row, col, value);
            }
        }
        matrix
    }

    pub fn dim(&self) -> usize {
        self.first.len()
    }

    /// Stored entries, diagonal included.
    pub fn stored(&self) -> usize {
        self.values.len()
    }

    /// Add `value` at `(row, col)`; the position must lie in the envelope.
    pub fn add(&mut self, row: usize, col: usize, value: f64) {
        debug_assert!(self.first[row] <= col && col <= row);
        let i = self.offsets[row] + col - self.first[row];
        self.values[i] += value;
    }

    /// Factor as `L D Lᵀ` with unit lower-triangular `L`. On failure returns
    /// the index of the first pivot not above `min_pivot`.
    pub fn factor(&self, min_pivot: f64) -> Result<LdlFactor, usize> {
        let n = self.dim();
        let mut lower = self.values.clone();
        let mut diagonal = vec![0.0; n];

        for i in 0..n {
            let fi = self.first[i];
            let (done, rest) = lower.split_at_mut(self.offsets[i]);
            let row_i = &mut rest[..=i - fi];

            for j in fi..i {
                let fj = self.first[j];
                let row_j = &done[self.offsets[j]..self.offsets[j + 1]];
                let mut sum = row_i[j - fi];
                for k in fi.max(fj)..j {
                    sum -= row_i[k - fi] * diagonal[k] * row_j[k - fj];
                }
                row_i[j - fi] = sum / diagonal[j];
            }

            let mut pivot = row_i[i - fi];
            for k in fi..i {
                pivot -= row_i[k - fi] * row_i[k - fi] * diagonal[k];
            }
            if !(pivot > min_pivot) {
                return Err(i);
            }
            diagonal[i] = pivot;
            row_i[i - fi] = 1.0;
        }

        Ok(LdlFactor {
            first: self.first.clone(),
            offsets: self.offsets.clone(),
            lower,
            diagonal,
        })
    }
}

#[derive(Debug, Clone)]
pub struct LdlFactor {
    first: Vec<usize>,
    offsets: Vec<usize>,
    lower: Vec<f64>,
    diagonal: Vec<f64>,
}

impl LdlFactor {
    fn row(&self, i: usize) -> &[f64] {
        &self.lower[self.offsets[i]..self.offsets[i + 1]]
    }

    pub fn solve(&self, rhs: &[f64]) -> Vec<f64> {
        let n = self.diagonal.len();
        let mut x = rhs.to_vec();

        for i in 0..n {
            let fi = self.first[i];
            let row = self.row(i);
            let sum: f64 = (fi..i).map(|k| row[k - fi] * x[k]).sum();
            x[i] -= sum;
        }
        for (xi, d) in x.iter_mut().zip(&self.diagonal) {
            *xi /= d;
        }
        for i in (0..n).rev() {
            let fi = self.first[i];
            let xi = x[i];
            for (k, l) in (fi..i).zip(self.row(i)) {
                x[k] -= l * xi;
            }
        }
        x
    }
}
