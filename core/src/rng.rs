use rand::{rngs::StdRng, SeedableRng};

/// Construct a deterministic RNG from a fixed seed.
pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Seed for one repeat of an experiment, so repeats of the same run differ
/// while each stays reproducible.
pub fn repeat_seed(base: u64, repeat: u32) -> u64 {
    base.wrapping_add(u64::from(repeat).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;

    #[test]
    fn repeat_zero_keeps_base_seed() {
        assert_eq!(repeat_seed(1337, 0), 1337);
        assert_ne!(repeat_seed(1337, 1), repeat_seed(1337, 2));
    }

    #[test]
    fn same_seed_same_stream() {
        let a: Vec<u32> = seeded_rng(9).sample_iter(rand::distributions::Standard).take(4).collect();
        let b: Vec<u32> = seeded_rng(9).sample_iter(rand::distributions::Standard).take(4).collect();
        assert_eq!(a, b);
    }
}
