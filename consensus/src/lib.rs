/// Sepnode consensus boundary
///
/// The BFT engine itself lives outside this workspace. This crate carries the
/// pieces the execution layer shares with it:
/// - Block hashing (BLAKE3)
/// - The ordered block the engine hands over for execution
/// - The StateMachine interface (apply / query / commit / rollback)

pub mod block;
pub mod crypto;
pub mod storage;

pub use block::Block;
pub use crypto::Hash;
