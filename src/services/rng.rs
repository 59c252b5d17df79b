use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Random number generator of chain `chain` for a run seeded with `seed`.
///
/// Every chain gets its own stream of the same seed, so chains are
/// independent and each of them is reproducible.
pub fn create_rng(seed: u64, chain: u64) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(chain);
    rng
}
