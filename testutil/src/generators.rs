/// Test data generators

use proptest::prelude::*;
use rand::Rng;

/// Largest key the extended store accepts
pub const MAX_EXT_KEY_LEN: usize = 256;

/// Largest value the extended store accepts
pub const MAX_EXT_VALUE_LEN: usize = 24 * 1024;

/// Generate random bytes
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen()).collect()
}

/// Generate random message for testing
pub fn random_message() -> Vec<u8> {
    random_bytes(32)
}

/// Generate a random 20-byte account address
pub fn random_address_bytes() -> [u8; 20] {
    let mut rng = rand::thread_rng();
    rng.gen()
}

/// Keys inside the accepted bounds
pub fn ext_key_strategy() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 1..=MAX_EXT_KEY_LEN)
}

/// Values inside the accepted bounds, capped at `max_len` to keep cases fast
pub fn ext_value_strategy(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 0..=max_len.min(MAX_EXT_VALUE_LEN))
}

/// Keys the extended store must reject: empty or longer than the maximum
pub fn invalid_ext_key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        Just(Vec::new()),
        proptest::collection::vec(any::<u8>(), MAX_EXT_KEY_LEN + 1..MAX_EXT_KEY_LEN + 64),
    ]
}

/// Address bytes as a strategy
pub fn address_bytes_strategy() -> impl Strategy<Value = [u8; 20]> {
    any::<[u8; 20]>()
}
