use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Gets a random number generator for a specific entity, e.g. a van or a rider.
/// The hash parameter should uniquely identify the entity. The same base seed and hash always yield
/// the same sequence, which makes simulation runs reproducible.
pub fn get_rnd<H: Hash>(base_seed: u64, hash: H) -> SmallRng {
    let mut hasher = DefaultHasher::new();
    hash.hash(&mut hasher);
    base_seed.hash(&mut hasher);
    let combined_seed = hasher.finish();

    SmallRng::seed_from_u64(combined_seed)
}

/// Draws a duration in milliseconds from `[min_ms, max_ms]`. A reversed range yields `min_ms`.
pub fn travel_time_ms<R: Rng>(rng: &mut R, min_ms: u64, max_ms: u64) -> u64 {
    if max_ms <= min_ms {
        return min_ms;
    }
    rng.random_range(min_ms..=max_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_hash_same_sequence() {
        let mut rng1 = get_rnd(42, "van-0");
        let mut rng2 = get_rnd(42, "van-0");

        for _ in 0..10 {
            assert_eq!(rng1.random::<u32>(), rng2.random::<u32>());
        }
    }

    #[test]
    fn different_hashes_differ() {
        let mut rng1 = get_rnd(42, 123);
        let mut rng2 = get_rnd(42, 456);

        let a: Vec<u64> = (0..4).map(|_| rng1.random()).collect();
        let b: Vec<u64> = (0..4).map(|_| rng2.random()).collect();
        assert_ne!(a, b);
    }

    #[test]
    fn travel_time_stays_in_range() {
        let mut rng = get_rnd(7, 0);
        for _ in 0..100 {
            let t = travel_time_ms(&mut rng, 100, 250);
            assert!((100..=250).contains(&t));
        }
    }

    #[test]
    fn degenerate_range() {
        let mut rng = get_rnd(7, 0);
        assert_eq!(travel_time_ms(&mut rng, 30, 30), 30);
        assert_eq!(travel_time_ms(&mut rng, 30, 10), 30);
    }
}
