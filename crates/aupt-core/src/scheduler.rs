//! Test ordering.
//!
//! A [`Scheduler`] turns the registered test cases into a [`Schedule`], a lazy
//! and finite sequence of `cases.len() * iterations` references. The shuffled
//! variant walks the indices with `(a * i + b) mod n` where `a` is coprime to
//! `n`, so every block of `n` consecutive emissions visits each case exactly
//! once without materialising a shuffled copy of the list.

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;

use crate::numeric::{gcd, smallest_prime_above};

const COPRIME_ATTEMPTS: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scheduler {
    Sequential { iterations: u64 },
    Shuffled { seed: u64, iterations: u64 },
}

impl Scheduler {
    pub fn sequential(iterations: u64) -> Self {
        Scheduler::Sequential { iterations }
    }

    pub fn shuffled(seed: u64, iterations: u64) -> Self {
        Scheduler::Shuffled { seed, iterations }
    }

    pub fn iterations(&self) -> u64 {
        match self {
            Scheduler::Sequential { iterations } | Scheduler::Shuffled { iterations, .. } => {
                *iterations
            }
        }
    }

    /// Starts a fresh traversal over `cases`. Calling this twice yields two
    /// independent, identical schedules.
    pub fn apply<'a, T>(&self, cases: &'a [T]) -> Schedule<'a, T> {
        let n = cases.len() as u64;
        let (multiplier, offset) = match self {
            Scheduler::Sequential { .. } => (1, 0),
            Scheduler::Shuffled { seed, .. } => permutation_params(*seed, n),
        };
        Schedule {
            cases,
            multiplier,
            offset,
            next: 0,
            total: n.saturating_mul(self.iterations()),
        }
    }
}

fn permutation_params(seed: u64, n: u64) -> (u64, u64) {
    if n <= 1 {
        return (1, 0);
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let offset = rng.gen_range(0..n);
    for _ in 0..COPRIME_ATTEMPTS {
        let candidate = rng.gen_range(1..n);
        if gcd(candidate, n) == 1 {
            return (candidate, offset);
        }
    }
    (smallest_prime_above(n), offset)
}

#[derive(Clone, Debug)]
pub struct Schedule<'a, T> {
    cases: &'a [T],
    multiplier: u64,
    offset: u64,
    next: u64,
    total: u64,
}

impl<'a, T> Schedule<'a, T> {
    pub fn len(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn remaining(&self) -> u64 {
        self.total - self.next
    }
}

impl<'a, T> Iterator for Schedule<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total {
            return None;
        }
        let n = self.cases.len() as u128;
        let position = (self.multiplier as u128 * self.next as u128 + self.offset as u128) % n;
        self.next += 1;
        self.cases.get(position as usize)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match usize::try_from(self.remaining()) {
            Ok(remaining) => (remaining, Some(remaining)),
            Err(_) => (usize::MAX, None),
        }
    }
}
