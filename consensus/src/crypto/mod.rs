/// Hashing for the consensus boundary
///
/// Block identities and state hashes handed back to the engine are BLAKE3.

pub mod hash;

pub use hash::{hash_data, Hash, HashError, HASH_SIZE};

// Convenience re-exports
pub use hash::hash_data as hash;
