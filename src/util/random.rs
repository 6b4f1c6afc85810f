use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::ops::Range;


/// Source of randomness for tokens, initial message ids and jitter. The engine owns exactly one
///  instance and is its only user, so implementations need no synchronization.
#[cfg_attr(test, mockall::automock)]
pub trait Random {
    fn fill_bytes(&mut self, buf: &mut [u8]);

    /// uniformly distributed in `range`, which must not be empty
    fn gen_u64_range(&mut self, range: Range<u64>) -> u64;

    fn gen_f64_range(&mut self, range: Range<f64>) -> f64;
}

pub struct RngRandom {}
impl Random for RngRandom {
    fn fill_bytes(&mut self, buf: &mut [u8]) {
        rand::thread_rng().fill_bytes(buf)
    }

    fn gen_u64_range(&mut self, range: Range<u64>) -> u64 {
        rand::thread_rng().gen_range(range)
    }

    fn gen_f64_range(&mut self, range: Range<f64>) -> f64 {
        rand::thread_rng().gen_range(range)
    }
}

/// deterministic random source, e.g. for reproducing token sequences in tests
pub struct SeededRandom {
    rng: StdRng,
}
impl SeededRandom {
    pub fn new(seed: u64) -> SeededRandom {
        SeededRandom {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}
impl Random for SeededRandom {
    fn fill_bytes(&mut self, buf: &mut [u8]) {
        self.rng.fill_bytes(buf)
    }

    fn gen_u64_range(&mut self, range: Range<u64>) -> u64 {
        self.rng.gen_range(range)
    }

    fn gen_f64_range(&mut self, range: Range<f64>) -> f64 {
        self.rng.gen_range(range)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_seeded_random_is_reproducible() {
        let mut a = SeededRandom::new(17);
        let mut b = SeededRandom::new(17);

        let mut buf_a = [0u8; 8];
        let mut buf_b = [0u8; 8];
        a.fill_bytes(&mut buf_a);
        b.fill_bytes(&mut buf_b);
        assert_eq!(buf_a, buf_b);
        assert_eq!(a.gen_u64_range(10..20), b.gen_u64_range(10..20));
    }

    #[test]
    fn test_gen_range_stays_in_range() {
        let mut random = RngRandom {};
        for _ in 0..100 {
            let n = random.gen_u64_range(5..7);
            assert!(n == 5 || n == 6);
        }
    }
}
