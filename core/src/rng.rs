use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

/// Construct a deterministic RNG from a fixed seed.
pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Sample order for one pass over `len` items, permuted in place when `shuffle` is set.
pub fn epoch_order(len: usize, shuffle: bool, rng: &mut StdRng) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    if shuffle {
        order.shuffle(rng);
    }
    order
}
