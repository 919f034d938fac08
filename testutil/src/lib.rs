/// Testing utilities for Sepnode
///
/// Provides:
/// - Random data generators and proptest strategies
/// - Contract bytecode fixtures for end-to-end execution tests

pub mod fixtures;
pub mod generators;

pub use generators::*;
