//! Shared embedding storage with a relaxed, race-tolerant access contract.
//!
//! During training every worker thread reads and writes the same two
//! matrices with no locking (asynchronous SGD). Concurrent updates usually
//! touch different rows; when they collide, a lost update is acceptable
//! numeric noise. `Real::add` is therefore a plain load/store pair, not a
//! compare-and-swap.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use aligned_box::AlignedBox;

use crate::{real, Rng};

/// One shared `f32` cell, stored as atomic bits.
#[derive(Default)]
#[repr(transparent)]
pub struct Real {
    bits: AtomicU32,
}

impl Real {
    pub fn get(&self) -> real {
        real::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: real) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn add(&self, x: real) {
        let a = self.get();
        self.set(a + x);
    }
}

/// A dense `rows x cols` matrix of `Real` cells, one row per vocabulary id.
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: AlignedBox<[Real]>,
}

impl Matrix {
    pub fn new(rows: usize, cols: usize) -> Matrix {
        // an empty vocabulary still needs a non-empty slab behind the box
        let len = (rows * cols).max(1);
        Matrix {
            rows,
            cols,
            data: AlignedBox::slice_from_default(128, len).expect("Memory allocation failed"),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row(&self, i: usize) -> &[Real] {
        assert!(i < self.rows, "row {i} out of range ({} rows)", self.rows);
        &self.data[i * self.cols..][..self.cols]
    }

    /// Fill every cell with a value drawn uniformly from `[-bound, bound]`.
    pub fn uniform(&self, bound: real, rng: &mut Rng) {
        for cell in self.data.iter() {
            cell.set((2.0 * rng.rand_real() - 1.0) * bound);
        }
    }

    pub fn zero(&self) {
        for cell in self.data.iter() {
            cell.set(0.0);
        }
    }

    pub fn dot_row(&self, vec: &[real], i: usize) -> real {
        assert_eq!(vec.len(), self.cols);
        self.row(i)
            .iter()
            .zip(vec.iter())
            .map(|(cell, &v)| cell.get() * v)
            .sum()
    }

    /// `row[i] += a * vec`, cell by cell, without locking.
    pub fn add_row(&self, vec: &[real], i: usize, a: real) {
        assert_eq!(vec.len(), self.cols);
        for (cell, &v) in self.row(i).iter().zip(vec.iter()) {
            cell.add(a * v);
        }
    }
}

/// A private dense vector: gradient scratch space and export staging.
pub struct Vector {
    data: Vec<real>,
}

impl Vector {
    pub fn new(dim: usize) -> Vector {
        Vector {
            data: vec![0.0; dim],
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn zero(&mut self) {
        self.data.fill(0.0);
    }

    pub fn mul(&mut self, a: real) {
        for v in &mut self.data {
            *v *= a;
        }
    }

    pub fn add_row(&mut self, m: &Matrix, i: usize) {
        self.add_row_scaled(m, i, 1.0);
    }

    pub fn add_row_scaled(&mut self, m: &Matrix, i: usize, a: real) {
        for (v, cell) in self.data.iter_mut().zip(m.row(i).iter()) {
            *v += a * cell.get();
        }
    }

    pub fn as_slice(&self) -> &[real] {
        &self.data
    }
}

impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sep = "";
        for v in &self.data {
            write!(f, "{sep}{v}")?;
            sep = " ";
        }
        Ok(())
    }
}
