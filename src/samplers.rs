//! Samplers over the expanded operation matrix.
//!
//! A sweep with dimensions of sizes `[s0, s1, ..]` spans the full cartesian
//! product of value choices. The cartesian sampler walks all of them in
//! lexicographic order; the hypercube samplers pick `n_samples` well-spread
//! combinations instead, deterministically for a given seed. Points are
//! produced in the unit hypercube and mapped to value indices by uniform
//! binning.
//!
//! Sobol points follow the Joe and Kuo direction numbers (the `new-joe-kuo-6`
//! set), Halton uses one prime base per dimension, and both decorrelate runs
//! with a seeded Cranley-Patterson rotation.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::SamplerError;

/// Sampling method over the expanded operation matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum Sampler {
    #[default]
    CartesianProduct,
    LatinHypercube {
        n_samples: usize,
        #[serde(default)]
        seed: u64,
    },
    Sobol {
        n_samples: usize,
        #[serde(default)]
        seed: u64,
    },
    Halton {
        n_samples: usize,
        #[serde(default)]
        seed: u64,
    },
}

impl Sampler {
    /// Requested sample count, if the method takes one.
    pub fn n_samples(&self) -> Option<usize> {
        match *self {
            Sampler::CartesianProduct => None,
            Sampler::LatinHypercube { n_samples, .. }
            | Sampler::Sobol { n_samples, .. }
            | Sampler::Halton { n_samples, .. } => Some(n_samples),
        }
    }

    /// Draw index combinations over dimensions of the given sizes.
    pub fn sample(&self, sizes: &[usize]) -> Result<SampleSet, SamplerError> {
        if sizes.is_empty() || sizes.iter().any(|&s| s == 0) {
            return Err(SamplerError::EmptySpace);
        }
        match *self {
            Sampler::CartesianProduct => Ok(SampleSet {
                kind: Kind::Product {
                    sizes: sizes.to_vec(),
                },
            }),
            Sampler::LatinHypercube { n_samples, seed } => Ok(SampleSet::explicit(
                latin_hypercube(sizes, n_samples, seed),
            )),
            Sampler::Sobol { n_samples, seed } => {
                Ok(SampleSet::explicit(sobol(sizes, n_samples, seed)?))
            }
            Sampler::Halton { n_samples, seed } => {
                Ok(SampleSet::explicit(halton(sizes, n_samples, seed)))
            }
        }
    }
}

/// A finite sequence of index combinations. Iteration is lazy and can be
/// restarted by calling [`SampleSet::iter`] again.
#[derive(Debug, Clone)]
pub struct SampleSet {
    kind: Kind,
}

#[derive(Debug, Clone)]
enum Kind {
    Product { sizes: Vec<usize> },
    Explicit { combos: Vec<Vec<usize>> },
}

impl SampleSet {
    fn explicit(combos: Vec<Vec<usize>>) -> Self {
        SampleSet {
            kind: Kind::Explicit { combos },
        }
    }

    pub fn len(&self) -> usize {
        match &self.kind {
            Kind::Product { sizes } => sizes.iter().product(),
            Kind::Explicit { combos } => combos.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> Combinations<'_> {
        Combinations { set: self, pos: 0 }
    }
}

impl<'a> IntoIterator for &'a SampleSet {
    type Item = Vec<usize>;
    type IntoIter = Combinations<'a>;

    fn into_iter(self) -> Combinations<'a> {
        self.iter()
    }
}

pub struct Combinations<'a> {
    set: &'a SampleSet,
    pos: usize,
}

impl Iterator for Combinations<'_> {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        if self.pos >= self.set.len() {
            return None;
        }
        let combo = match &self.set.kind {
            Kind::Product { sizes } => decode(self.pos, sizes),
            Kind::Explicit { combos } => combos[self.pos].clone(),
        };
        self.pos += 1;
        Some(combo)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.set.len() - self.pos;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Combinations<'_> {}

/// Decode an ordinal into a combination, rightmost dimension fastest.
fn decode(mut ordinal: usize, sizes: &[usize]) -> Vec<usize> {
    let mut combo = vec![0; sizes.len()];
    for (slot, &size) in combo.iter_mut().zip(sizes).rev() {
        *slot = ordinal % size;
        ordinal /= size;
    }
    combo
}

/// Map a unit-interval coordinate onto one of `size` bins.
fn cell(u: f64, size: usize) -> usize {
    ((u * size as f64) as usize).min(size - 1)
}

fn unit_shift(dims: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..dims).map(|_| rng.gen::<f64>()).collect()
}

fn latin_hypercube(sizes: &[usize], n: usize, seed: u64) -> Vec<Vec<usize>> {
    let mut rng = StdRng::seed_from_u64(seed);
    // one shuffled stratum order per dimension
    let strata: Vec<Vec<usize>> = sizes
        .iter()
        .map(|_| {
            let mut order: Vec<usize> = (0..n).collect();
            order.shuffle(&mut rng);
            order
        })
        .collect();
    (0..n)
        .map(|k| {
            sizes
                .iter()
                .zip(&strata)
                .map(|(&size, order)| cell((order[k] as f64 + rng.gen::<f64>()) / n as f64, size))
                .collect()
        })
        .collect()
}

fn first_primes(count: usize) -> Vec<usize> {
    let mut primes: Vec<usize> = Vec::with_capacity(count);
    let mut candidate = 2;
    while primes.len() < count {
        if primes.iter().all(|&p| candidate % p != 0) {
            primes.push(candidate);
        }
        candidate += 1;
    }
    primes
}

fn radical_inverse(mut i: usize, base: usize) -> f64 {
    let mut digit = 1.0;
    let mut inverse = 0.0;
    while i > 0 {
        digit /= base as f64;
        inverse += digit * (i % base) as f64;
        i /= base;
    }
    inverse
}

fn halton(sizes: &[usize], n: usize, seed: u64) -> Vec<Vec<usize>> {
    let bases = first_primes(sizes.len());
    let shift = unit_shift(sizes.len(), seed);
    // index 0 would put every dimension at the origin, skip it
    (1..=n)
        .map(|i| {
            sizes
                .iter()
                .zip(&bases)
                .zip(&shift)
                .map(|((&size, &base), &s)| cell((radical_inverse(i, base) + s).fract(), size))
                .collect()
        })
        .collect()
}

pub const SOBOL_MAX_DIMS: usize = 21;

// Primitive polynomial degree, coefficients and initial direction numbers
// for dimensions 2..=21. Dimension 1 is the van der Corput sequence.
const SOBOL_TABLE: [(u32, u32, &[u32]); 20] = [
    (1, 0, &[1]),
    (2, 1, &[1, 3]),
    (3, 1, &[1, 3, 1]),
    (3, 2, &[1, 1, 1]),
    (4, 1, &[1, 1, 3, 3]),
    (4, 4, &[1, 3, 5, 13]),
    (5, 2, &[1, 1, 5, 5, 17]),
    (5, 4, &[1, 1, 5, 5, 5]),
    (5, 7, &[1, 1, 7, 11, 19]),
    (5, 11, &[1, 1, 5, 1, 1]),
    (5, 13, &[1, 1, 1, 3, 11]),
    (5, 14, &[1, 3, 5, 5, 31]),
    (6, 1, &[1, 3, 3, 9, 7, 49]),
    (6, 13, &[1, 1, 1, 15, 21, 21]),
    (6, 16, &[1, 3, 1, 13, 27, 49]),
    (6, 19, &[1, 1, 1, 15, 7, 5]),
    (6, 22, &[1, 3, 1, 15, 13, 25]),
    (6, 25, &[1, 1, 5, 5, 19, 61]),
    (7, 1, &[1, 3, 7, 11, 23, 15, 103]),
    (7, 4, &[1, 3, 7, 13, 13, 15, 69]),
];

fn sobol_directions(dim: usize) -> Vec<u32> {
    const BITS: usize = 32;
    if dim == 0 {
        return (0..BITS).map(|k| 1u32 << (31 - k)).collect();
    }
    let (degree, coefficients, seed_values) = SOBOL_TABLE[dim - 1];
    let s = degree as usize;
    let mut m = seed_values.to_vec();
    for k in s..BITS {
        let mut next = m[k - s] ^ (m[k - s] << s);
        for i in 1..s {
            if (coefficients >> (s - 1 - i)) & 1 == 1 {
                next ^= m[k - i] << i;
            }
        }
        m.push(next);
    }
    (0..BITS).map(|k| m[k] << (31 - k)).collect()
}

fn sobol(sizes: &[usize], n: usize, seed: u64) -> Result<Vec<Vec<usize>>, SamplerError> {
    const TWO32: f64 = 4294967296.0;
    let dims = sizes.len();
    if dims > SOBOL_MAX_DIMS {
        return Err(SamplerError::DimensionLimit {
            max: SOBOL_MAX_DIMS,
            got: dims,
        });
    }
    let directions: Vec<Vec<u32>> = (0..dims).map(sobol_directions).collect();
    let shift = unit_shift(dims, seed);
    let mut state = vec![0u32; dims];
    let mut combos = Vec::with_capacity(n);
    // gray-code stepping; the origin point at index 0 is skipped
    for i in 1..=n {
        let bit = (i - 1).trailing_ones() as usize;
        for (x, dirs) in state.iter_mut().zip(&directions) {
            *x ^= dirs[bit];
        }
        combos.push(
            sizes
                .iter()
                .zip(&state)
                .zip(&shift)
                .map(|((&size, &x), &s)| cell((f64::from(x) / TWO32 + s).fract(), size))
                .collect(),
        );
    }
    Ok(combos)
}
