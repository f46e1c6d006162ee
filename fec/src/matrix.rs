//! Dense matrices over GF(2^8), stored row-major.

use std::fmt::{Debug, Formatter};

use crate::error::{FecError, FecResult};
use crate::galois;

#[derive(Clone, Eq, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<u8>,
}

impl Debug for Matrix {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Matrix {}x{}", self.rows, self.cols)?;
        for r in 0..self.rows {
            writeln!(f, "  {:02x?}", self.row(r))?;
        }
        Ok(())
    }
}

impl Matrix {
    pub fn zero(rows: usize, cols: usize) -> Matrix {
        Matrix {
            rows,
            cols,
            data: vec![0; rows * cols],
        }
    }

    pub fn identity(size: usize) -> Matrix {
        let mut result = Matrix::zero(size, size);
        for i in 0..size {
            result.set(i, i, 1);
        }
        result
    }

    /// `rows x cols` Vandermonde matrix for the evaluation points `α^0 .. α^(rows-1)`, i.e.
    ///  `V[i][j] = (α^i)^j`
    pub fn vandermonde(rows: usize, cols: usize) -> Matrix {
        let mut result = Matrix::zero(rows, cols);
        for i in 0..rows {
            let point = galois::exp(i);
            for j in 0..cols {
                result.set(i, j, galois::pow(point, j));
            }
        }
        result
    }

    #[cfg(test)]
    pub fn from_rows(rows: &[&[u8]]) -> Matrix {
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut result = Matrix::zero(rows.len(), cols);
        for (i, r) in rows.iter().enumerate() {
            assert_eq!(r.len(), cols);
            result.row_mut(i).copy_from_slice(r);
        }
        result
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> u8 {
        self.data[row * self.cols + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: u8) {
        self.data[row * self.cols + col] = value;
    }

    pub fn row(&self, row: usize) -> &[u8] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    fn row_mut(&mut self, row: usize) -> &mut [u8] {
        &mut self.data[row * self.cols..(row + 1) * self.cols]
    }

    /// a new matrix consisting of the given rows of self, in the order they are listed
    pub fn select_rows(&self, row_indices: &[usize]) -> Matrix {
        let mut result = Matrix::zero(row_indices.len(), self.cols);
        for (i, &r) in row_indices.iter().enumerate() {
            result.row_mut(i).copy_from_slice(self.row(r));
        }
        result
    }

    pub fn multiply(&self, rhs: &Matrix) -> Matrix {
        assert_eq!(self.cols, rhs.rows, "incompatible matrix dimensions");

        let mut result = Matrix::zero(self.rows, rhs.cols);
        for i in 0..self.rows {
            for l in 0..self.cols {
                let factor = self.get(i, l);
                if factor == 0 {
                    continue;
                }
                galois::mul_add_region(
                    &mut result.data[i * rhs.cols..(i + 1) * rhs.cols],
                    rhs.row(l),
                    factor,
                );
            }
        }
        result
    }

    fn swap_rows(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        let (a, b) = (a.min(b), a.max(b));
        let (head, tail) = self.data.split_at_mut(b * self.cols);
        head[a * self.cols..(a + 1) * self.cols].swap_with_slice(&mut tail[..self.cols]);
    }

    /// `row[target] ^= factor * row[source]`
    fn add_scaled_row(&mut self, target: usize, source: usize, factor: u8) {
        debug_assert_ne!(target, source);
        let cols = self.cols;
        let (src, dst) = if source < target {
            let (head, tail) = self.data.split_at_mut(target * cols);
            (&head[source * cols..(source + 1) * cols], &mut tail[..cols])
        }
        else {
            let (head, tail) = self.data.split_at_mut(source * cols);
            (&tail[..cols], &mut head[target * cols..(target + 1) * cols])
        };
        galois::mul_add_region(dst, src, factor);
    }

    fn scale_row(&mut self, row: usize, factor: u8) {
        for x in self.row_mut(row) {
            *x = galois::mul(*x, factor);
        }
    }

    /// Gauss-Jordan elimination on `[self | I]`. In a finite field, every non-zero element is
    ///  as good a pivot as any other, so pivoting only searches for a non-zero entry.
    pub fn invert(&self) -> FecResult<Matrix> {
        assert_eq!(self.rows, self.cols, "only square matrices can be inverted");
        let size = self.rows;

        let mut work = self.clone();
        let mut result = Matrix::identity(size);

        for col in 0..size {
            let pivot_row = (col..size)
                .find(|&r| work.get(r, col) != 0)
                .ok_or(FecError::SingularMatrix)?;
            work.swap_rows(col, pivot_row);
            result.swap_rows(col, pivot_row);

            let pivot_inverse = galois::inv(work.get(col, col))?;
            work.scale_row(col, pivot_inverse);
            result.scale_row(col, pivot_inverse);

            for r in 0..size {
                if r == col {
                    continue;
                }
                let factor = work.get(r, col);
                if factor != 0 {
                    work.add_scaled_row(r, col, factor);
                    result.add_scaled_row(r, col, factor);
                }
            }
        }

        Ok(result)
    }
}
