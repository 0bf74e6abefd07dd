use std::fs::File;
use std::io::{BufRead, BufReader};
use std::ops::Index;
use std::path::Path;

use anyhow::{anyhow, Context, Result};

pub mod config;
pub mod dictionary;
pub mod matrix;
pub mod model;
pub mod trainer;

#[allow(non_camel_case_types)]
pub type real = f32; // Precision of float numbers

/// The linear-congruential generator used throughout word2vec.
///
/// Worker threads each own one of these, seeded by thread index, so a
/// single-threaded run is fully deterministic.
pub struct Rng(pub u64);

impl Rng {
    pub fn new(seed: u64) -> Self {
        Rng(seed)
    }

    pub fn rand_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(25214903917).wrapping_add(11);
        self.0
    }

    /// A value in `[0, 1)`.
    pub fn rand_real(&mut self) -> real {
        (self.rand_u64() & 0xFFFF) as real / 65536.0
    }

    /// A value in `[lo, hi]`, inclusive at both ends.
    pub fn rand_range(&mut self, lo: usize, hi: usize) -> usize {
        lo + self.rand_u64() as usize % (hi - lo + 1)
    }
}

pub fn norm(v: &[real]) -> real {
    v.iter().copied().map(|e| e * e).sum::<real>().sqrt()
}

pub fn normalize(v: &mut [real]) {
    let len = norm(v);
    for e in v {
        *e /= len;
    }
}

pub fn dot(a: &[real], b: &[real]) -> real {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(&a, &b)| a * b).sum()
}

/// Trained vectors loaded back from a `.source` or `.target` file,
/// one row per word, normalized to unit length.
pub struct Vectors {
    size: usize,
    vocab: Vec<String>,
    embeddings: Vec<real>,
}

impl Index<usize> for Vectors {
    type Output = [real];

    fn index(&self, i: usize) -> &[real] {
        &self.embeddings[i * self.size..][..self.size]
    }
}

impl Vectors {
    pub fn load(file_name: &Path) -> Result<Self> {
        let f = BufReader::new(File::open(file_name).context("error opening vector file")?);

        let mut size = 0;
        let mut vocab: Vec<String> = vec![];
        let mut embeddings: Vec<real> = vec![];
        for (line_num, line) in f.lines().enumerate() {
            let line = line.context("error reading vector file")?;
            let mut fields = line.split_whitespace();
            let word = fields
                .next()
                .ok_or_else(|| anyhow!("vector file: empty line {}", line_num + 1))?;
            let start = embeddings.len();
            for field in fields {
                embeddings.push(
                    field.parse().with_context(|| {
                        format!("vector file: bad value on line {}", line_num + 1)
                    })?,
                );
            }
            if line_num == 0 {
                size = embeddings.len();
            } else if embeddings.len() - start != size {
                return Err(anyhow!(
                    "vector file: line {} has {} values, expected {}",
                    line_num + 1,
                    embeddings.len() - start,
                    size
                ));
            }
            normalize(&mut embeddings[start..]);
            vocab.push(word.to_string());
        }

        Ok(Vectors {
            size,
            vocab,
            embeddings,
        })
    }

    pub fn num_words(&self) -> usize {
        self.vocab.len()
    }

    /// Returns the vector size.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get the index for a word as string. Exact match only, case-sensitive.
    pub fn lookup_word(&self, word: &str) -> Option<usize> {
        self.vocab.iter().position(|v| v == word)
    }

    /// Get the word for a word-index. Panics if `word` is out of range.
    pub fn word(&self, word: usize) -> &str {
        &self.vocab[word]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rng_range_is_inclusive() {
        let mut rng = Rng::new(3);
        let mut seen = [false; 5];
        for _ in 0..1000 {
            let b = rng.rand_range(1, 5);
            assert!((1..=5).contains(&b));
            seen[b - 1] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn rng_is_deterministic() {
        let mut a = Rng::new(7);
        let mut b = Rng::new(7);
        for _ in 0..100 {
            assert_eq!(a.rand_u64(), b.rand_u64());
        }
    }
}
