use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of randomness threaded explicitly through every tree operation.
///
/// Nothing in this crate reaches for a process-wide generator, so two runs that
/// start from the same seed and issue the same calls produce the same trees.
pub trait RandomSource {
    /// Uniform integer in `[min, max]` (both bounds inclusive).
    fn randint(&mut self, min: i64, max: i64) -> i64;

    /// Uniform float in `[min, max)`.
    fn random_float(&mut self, min: f64, max: f64) -> f64;

    fn random_bool(&mut self) -> bool {
        self.randint(0, 1) == 1
    }

    /// Gaussian sample via Box-Muller on top of `random_float`.
    fn normalvariate(&mut self, mean: f64, sigma: f64) -> f64 {
        let u1 = self.random_float(0.0, 1.0).max(f64::MIN_POSITIVE);
        let u2 = self.random_float(0.0, 1.0);
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + sigma * z
    }
}

/// Default `RandomSource`, backed by a seeded `StdRng`.
#[derive(Debug, Clone)]
pub struct StdRandomSource {
    rng: StdRng,
}

impl StdRandomSource {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl RandomSource for StdRandomSource {
    fn randint(&mut self, min: i64, max: i64) -> i64 {
        if min >= max {
            return min;
        }
        self.rng.random_range(min..=max)
    }

    fn random_float(&mut self, min: f64, max: f64) -> f64 {
        if !(min < max) {
            return min;
        }
        self.rng.random_range(min..max)
    }
}

/// Index in `[0, len)`. `len` must be positive.
pub fn index<R: RandomSource + ?Sized>(r: &mut R, len: usize) -> usize {
    debug_assert!(len > 0);
    r.randint(0, len as i64 - 1) as usize
}

pub fn choice<'a, T, R: RandomSource + ?Sized>(r: &mut R, items: &'a [T]) -> Option<&'a T> {
    if items.is_empty() {
        None
    } else {
        Some(&items[index(r, items.len())])
    }
}

/// Weighted pick. Falls back to a uniform pick when the weights do not sum to
/// a positive finite total.
pub fn choice_weighted<'a, T, R: RandomSource + ?Sized>(
    r: &mut R,
    items: &'a [T],
    weights: &[f64],
) -> Option<&'a T> {
    if items.is_empty() {
        return None;
    }
    debug_assert_eq!(items.len(), weights.len());
    let total: f64 = weights.iter().take(items.len()).sum();
    if !total.is_finite() || total <= 0.0 {
        return choice(r, items);
    }

    let mut target = r.random_float(0.0, total);
    for (item, weight) in items.iter().zip(weights) {
        if target < *weight {
            return Some(item);
        }
        target -= weight;
    }
    items.last()
}

pub fn shuffle<T, R: RandomSource + ?Sized>(r: &mut R, values: &mut [T]) {
    if values.len() <= 1 {
        return;
    }
    for i in (1..values.len()).rev() {
        let j = r.randint(0, i as i64) as usize;
        values.swap(i, j);
    }
}
