//! Cryptographic layers of the tunnel: the handshake-only outer cipher
//! and the per-tunnel fuzz chain layered on top of it (§4.1-4.2).

pub mod fuzz;
pub mod outer;

pub use fuzz::FuzzChain;
pub use outer::OuterCipher;
