//! Per-worker gradient model. Each worker thread owns one `Model`, bound
//! to the two shared matrices; every update reads and writes them without
//! locking (see `matrix`).

use crate::config::{Config, LossKind};
use crate::matrix::{Matrix, Vector};
use crate::{real, Rng};

const SIGMOID_TABLE_SIZE: usize = 1000;
const MAX_SIGMOID: real = 6.0;
const LOG_TABLE_SIZE: usize = 512;
const NEGATIVE_TABLE_SIZE: usize = 10_000_000;

pub struct Model<'a> {
    input: &'a Matrix,
    output: &'a Matrix,
    loss_kind: LossKind,
    neg: usize,

    hidden: Vector,
    grad: Vector,

    /// Unigram^0.5 sampling table for negative sampling.
    negatives: Vec<u32>,
    negpos: usize,

    /// Per-target Huffman root paths and code bits for hierarchical softmax,
    /// ordered leaf to root.
    paths: Vec<Vec<u32>>,
    codes: Vec<Vec<bool>>,

    loss: f64,
    nexamples: u64,

    sigmoid_table: Vec<real>,
    log_table: Vec<real>,

    pub rng: Rng,
}

impl<'a> Model<'a> {
    pub fn new(input: &'a Matrix, output: &'a Matrix, config: &Config, seed: u64) -> Model<'a> {
        let sigmoid_table = (0..SIGMOID_TABLE_SIZE)
            .map(|i| {
                let x = (i as real / SIGMOID_TABLE_SIZE as real * 2.0 - 1.0) * MAX_SIGMOID;
                let e = x.exp();
                e / (e + 1.0)
            })
            .collect();
        let log_table = (0..LOG_TABLE_SIZE)
            .map(|i| ((i as real + 1e-5) / LOG_TABLE_SIZE as real).ln())
            .collect();

        Model {
            input,
            output,
            loss_kind: config.loss,
            neg: config.neg,
            hidden: Vector::new(config.dim),
            grad: Vector::new(config.dim),
            negatives: vec![],
            negpos: 0,
            paths: vec![],
            codes: vec![],
            loss: 0.0,
            nexamples: 1,
            sigmoid_table,
            log_table,
            rng: Rng::new(seed),
        }
    }

    /// Build the sampling structures for the target distribution; must be
    /// called once before the first `update`.
    pub fn set_target_counts(&mut self, counts: &[u64]) {
        match self.loss_kind {
            LossKind::Ns => self.init_negatives(counts),
            LossKind::Hs => self.build_tree(counts),
        }
    }

    /// One gradient step for a (source group, target) pair: project the
    /// group's input rows to the hidden vector, push the target loss
    /// gradient through the output rows, then apply the accumulated input
    /// gradient back to every row of the group.
    pub fn update(&mut self, source: &[u32], target: u32, lr: real) {
        assert!(!source.is_empty());
        self.hidden.zero();
        for &id in source {
            self.hidden.add_row(self.input, id as usize);
        }
        self.hidden.mul(1.0 / source.len() as real);

        self.grad.zero();
        self.loss += match self.loss_kind {
            LossKind::Ns => self.negative_sampling(target, lr),
            LossKind::Hs => self.hierarchical_softmax(target, lr),
        };
        self.nexamples += 1;

        for &id in source {
            self.input.add_row(self.grad.as_slice(), id as usize, 1.0);
        }
    }

    /// Mean loss per example so far.
    pub fn loss(&self) -> real {
        (self.loss / self.nexamples as f64) as real
    }

    fn negative_sampling(&mut self, target: u32, lr: real) -> f64 {
        let mut loss = self.binary_logistic(target, true, lr);
        if self.negatives.is_empty() {
            return loss;
        }
        for _ in 0..self.neg {
            let negative = self.get_negative(target);
            loss += self.binary_logistic(negative, false, lr);
        }
        loss
    }

    fn hierarchical_softmax(&mut self, target: u32, lr: real) -> f64 {
        let mut loss = 0.0;
        for i in 0..self.codes[target as usize].len() {
            let node = self.paths[target as usize][i];
            let label = self.codes[target as usize][i];
            loss += self.binary_logistic(node, label, lr);
        }
        loss
    }

    fn binary_logistic(&mut self, target: u32, label: bool, lr: real) -> f64 {
        let score = self.sigmoid(self.output.dot_row(self.hidden.as_slice(), target as usize));
        let alpha = lr * (label as u32 as real - score);
        self.grad.add_row_scaled(self.output, target as usize, alpha);
        self.output
            .add_row(self.hidden.as_slice(), target as usize, alpha);
        if label {
            -self.log(score)
        } else {
            -self.log(1.0 - score)
        }
    }

    fn get_negative(&mut self, target: u32) -> u32 {
        loop {
            let negative = self.negatives[self.negpos];
            self.negpos = (self.negpos + 1) % self.negatives.len();
            if negative != target {
                return negative;
            }
        }
    }

    fn init_negatives(&mut self, counts: &[u64]) {
        // a lone target has no valid negatives; leave the table empty so
        // its updates take the positive step only
        if counts.len() < 2 {
            return;
        }
        let z: f64 = counts.iter().map(|&c| (c as f64).sqrt()).sum();
        for (id, &count) in counts.iter().enumerate() {
            let n = ((count as f64).sqrt() / z * NEGATIVE_TABLE_SIZE as f64) as usize;
            for _ in 0..n {
                self.negatives.push(id as u32);
            }
        }
        // Fisher-Yates with the model's own generator
        for i in (1..self.negatives.len()).rev() {
            let j = self.rng.rand_u64() as usize % (i + 1);
            self.negatives.swap(i, j);
        }
    }

    // Huffman-code the targets by frequency; `counts` must be sorted
    // descending, which is how the dictionary orders its entries.
    fn build_tree(&mut self, counts: &[u64]) {
        let n = counts.len();
        if n == 0 {
            return;
        }
        let mut count = vec![1_000_000_000_000_000u64; 2 * n - 1];
        let mut parent = vec![usize::MAX; 2 * n - 1];
        let mut binary = vec![false; 2 * n - 1];
        count[..n].copy_from_slice(counts);

        let mut leaf = n as isize - 1;
        let mut node = n;
        for i in n..2 * n - 1 {
            let mut mini = [0usize; 2];
            for m in mini.iter_mut() {
                if leaf >= 0 && count[leaf as usize] < count[node] {
                    *m = leaf as usize;
                    leaf -= 1;
                } else {
                    *m = node;
                    node += 1;
                }
            }
            count[i] = count[mini[0]] + count[mini[1]];
            parent[mini[0]] = i;
            parent[mini[1]] = i;
            binary[mini[1]] = true;
        }

        for i in 0..n {
            let mut path = vec![];
            let mut code = vec![];
            let mut j = i;
            while parent[j] != usize::MAX {
                path.push((parent[j] - n) as u32);
                code.push(binary[j]);
                j = parent[j];
            }
            self.paths.push(path);
            self.codes.push(code);
        }
    }

    fn sigmoid(&self, x: real) -> real {
        if x >= MAX_SIGMOID {
            1.0
        } else if x <= -MAX_SIGMOID {
            0.0
        } else {
            // just below MAX_SIGMOID, `x + MAX_SIGMOID` can round up and
            // index one past the table
            let i = ((x + MAX_SIGMOID) * (SIGMOID_TABLE_SIZE as real / MAX_SIGMOID / 2.0)) as usize;
            self.sigmoid_table[i.min(SIGMOID_TABLE_SIZE - 1)]
        }
    }

    fn log(&self, x: real) -> f64 {
        let i = ((x * LOG_TABLE_SIZE as real) as usize).min(LOG_TABLE_SIZE - 1);
        self.log_table[i] as f64
    }
}
