//! Sparse matrix storage and LU factorization with partial pivoting.
//!
//! Matrices are stored row-wise as ordered maps, which keeps the sparsity
//! pattern deterministic and lets fill-in appear naturally during
//! elimination. Factors are kept in a reusable [`LuFactors`] so a system
//! whose matrix has not changed is solved again without refactoring.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

use num_complex::Complex64;

use crate::error::{Result, SimError};

use super::DEFAULT_PIVOT_TOLERANCE;

/// Numeric element type of a linear system (real or complex).
pub trait Scalar:
    Copy
    + Debug
    + PartialEq
    + Send
    + Sync
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
    + 'static
{
    /// Additive identity.
    fn zero() -> Self;
    /// Multiplicative identity.
    fn one() -> Self;
    /// Embed a real number.
    fn from_real(value: f64) -> Self;
    /// Magnitude used for pivot selection.
    fn modulus(&self) -> f64;
}

impl Scalar for f64 {
    fn zero() -> Self {
        0.0
    }

    fn one() -> Self {
        1.0
    }

    fn from_real(value: f64) -> Self {
        value
    }

    fn modulus(&self) -> f64 {
        self.abs()
    }
}

impl Scalar for Complex64 {
    fn zero() -> Self {
        Complex64::new(0.0, 0.0)
    }

    fn one() -> Self {
        Complex64::new(1.0, 0.0)
    }

    fn from_real(value: f64) -> Self {
        Complex64::new(value, 0.0)
    }

    fn modulus(&self) -> f64 {
        self.norm()
    }
}

/// Square sparse matrix with row-wise ordered storage.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix<T> {
    size: usize,
    rows: Vec<BTreeMap<usize, T>>,
}

impl<T: Scalar> SparseMatrix<T> {
    /// Create an all-zero matrix of dimension `size`.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            rows: vec![BTreeMap::new(); size],
        }
    }

    /// Matrix dimension.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Add to matrix element at (row, col), creating it if absent.
    pub fn add(&mut self, row: usize, col: usize, value: T) {
        *self.rows[row].entry(col).or_insert_with(T::zero) += value;
    }

    /// Get matrix element at (row, col).
    pub fn get(&self, row: usize, col: usize) -> T {
        self.rows[row].get(&col).copied().unwrap_or_else(T::zero)
    }

    /// Stored entries of one row in column order.
    pub fn row(&self, row: usize) -> impl Iterator<Item = (usize, T)> + '_ {
        self.rows[row].iter().map(|(&c, &v)| (c, v))
    }

    /// Structural nonzeros in row-major order.
    pub fn pattern(&self) -> Vec<(usize, usize)> {
        self.rows
            .iter()
            .enumerate()
            .flat_map(|(r, row)| row.keys().map(move |&c| (r, c)))
            .collect()
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.rows.iter().map(BTreeMap::len).sum()
    }

    /// Compute `A * x`.
    pub fn mul_vec(&self, x: &[T]) -> Vec<T> {
        self.rows
            .iter()
            .map(|row| {
                row.iter()
                    .fold(T::zero(), |acc, (&c, &v)| acc + v * x[c])
            })
            .collect()
    }

    /// Largest entry magnitude.
    pub fn max_modulus(&self) -> f64 {
        self.rows
            .iter()
            .flat_map(|row| row.values())
            .map(Scalar::modulus)
            .fold(0.0, f64::max)
    }

    /// Factorize with partial pivoting.
    pub fn factor(&self, pivot_tolerance: f64) -> Result<LuFactors<T>> {
        LuFactors::factor(self, pivot_tolerance)
    }
}

/// LU factors of a row-permuted matrix, `P A = L U`.
///
/// Row `i` of the stored factors holds L entries for columns `< i`
/// (unit diagonal implied) and U entries for columns `>= i`.
#[derive(Debug, Clone)]
pub struct LuFactors<T> {
    rows: Vec<BTreeMap<usize, T>>,
    /// `perm[i]` is the original row placed at position `i`
    perm: Vec<usize>,
}

impl<T: Scalar> LuFactors<T> {
    /// Perform LU decomposition with partial pivoting.
    pub fn factor(matrix: &SparseMatrix<T>, pivot_tolerance: f64) -> Result<Self> {
        let n = matrix.size;
        let mut rows = matrix.rows.clone();
        let mut perm: Vec<usize> = (0..n).collect();
        let threshold = pivot_tolerance * matrix.max_modulus();

        for k in 0..n {
            // Find pivot
            let mut max_val = 0.0;
            let mut max_row = k;
            for (i, row) in rows.iter().enumerate().skip(k) {
                if let Some(v) = row.get(&k) {
                    let val = v.modulus();
                    if val > max_val {
                        max_val = val;
                        max_row = i;
                    }
                }
            }

            if max_val <= threshold || max_val == 0.0 {
                return Err(SimError::SingularMatrix { row: perm[max_row] });
            }

            // Swap rows if needed
            if max_row != k {
                rows.swap(k, max_row);
                perm.swap(k, max_row);
            }

            // Eliminate
            let pivot = rows[k][&k];
            let upper: Vec<(usize, T)> = rows[k].range(k + 1..).map(|(&c, &v)| (c, v)).collect();
            for row in rows.iter_mut().skip(k + 1) {
                let Some(&a_ik) = row.get(&k) else {
                    continue;
                };
                let factor = a_ik / pivot;
                row.insert(k, factor);
                for &(c, u) in &upper {
                    *row.entry(c).or_insert_with(T::zero) -= factor * u;
                }
            }
        }

        Ok(Self { rows, perm })
    }

    /// Matrix dimension.
    pub fn size(&self) -> usize {
        self.rows.len()
    }

    /// Solve the system using the pre-computed LU decomposition.
    pub fn solve(&self, rhs: &[T]) -> Result<Vec<T>> {
        let n = self.rows.len();
        if rhs.len() != n {
            return Err(SimError::invalid_analysis(format!(
                "right-hand side has length {}, expected {}",
                rhs.len(),
                n
            )));
        }

        // Apply pivot permutation
        let mut x: Vec<T> = self.perm.iter().map(|&p| rhs[p]).collect();

        // Forward substitution (L * y = Pb)
        for i in 0..n {
            let mut acc = x[i];
            for (&c, &v) in self.rows[i].range(..i) {
                acc -= v * x[c];
            }
            x[i] = acc;
        }

        // Back substitution (U * x = y)
        for i in (0..n).rev() {
            let mut acc = x[i];
            for (&c, &v) in self.rows[i].range(i + 1..) {
                acc -= v * x[c];
            }
            let diag = self.rows[i][&i];
            x[i] = acc / diag;
        }

        Ok(x)
    }
}

/// Linear solver that caches its last factorization.
///
/// The factorization is private to one solver instance; each analysis run
/// owns its own.
#[derive(Debug, Clone)]
pub struct SparseLuSolver<T> {
    pivot_tolerance: f64,
    matrix: Option<SparseMatrix<T>>,
    factors: Option<LuFactors<T>>,
    factorizations: usize,
    solves: usize,
}

impl<T: Scalar> Default for SparseLuSolver<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scalar> SparseLuSolver<T> {
    /// Create a solver with the default pivot tolerance.
    pub fn new() -> Self {
        Self::with_pivot_tolerance(DEFAULT_PIVOT_TOLERANCE)
    }

    /// Create a solver with a custom relative pivot tolerance.
    pub fn with_pivot_tolerance(pivot_tolerance: f64) -> Self {
        Self {
            pivot_tolerance,
            matrix: None,
            factors: None,
            factorizations: 0,
            solves: 0,
        }
    }

    /// Factorize `matrix` unless it equals the cached one.
    ///
    /// Returns `true` when a new factorization was computed.
    pub fn factor(&mut self, matrix: &SparseMatrix<T>) -> Result<bool> {
        if self.factors.is_some() && self.matrix.as_ref() == Some(matrix) {
            return Ok(false);
        }
        self.factors = None;
        let factors = matrix.factor(self.pivot_tolerance)?;
        self.factors = Some(factors);
        self.matrix = Some(matrix.clone());
        self.factorizations += 1;
        Ok(true)
    }

    /// Solve with the cached factorization.
    pub fn solve(&mut self, rhs: &[T]) -> Result<Vec<T>> {
        let factors = self
            .factors
            .as_ref()
            .ok_or_else(|| SimError::InvalidState {
                operation: "solve".to_string(),
                state: "unfactored".to_string(),
            })?;
        self.solves += 1;
        factors.solve(rhs)
    }

    /// Factorize (if needed) and solve in one call.
    pub fn factor_and_solve(&mut self, matrix: &SparseMatrix<T>, rhs: &[T]) -> Result<Vec<T>> {
        self.factor(matrix)?;
        self.solve(rhs)
    }

    /// Solve for several right-hand sides with one factorization.
    pub fn solve_many(&mut self, rhs: &[Vec<T>]) -> Result<Vec<Vec<T>>> {
        rhs.iter().map(|b| self.solve(b)).collect()
    }

    /// Drop the cached factorization.
    pub fn invalidate(&mut self) {
        self.matrix = None;
        self.factors = None;
    }

    /// Number of factorizations performed.
    pub fn factorizations(&self) -> usize {
        self.factorizations
    }

    /// Number of solves performed.
    pub fn solves(&self) -> usize {
        self.solves
    }
}
