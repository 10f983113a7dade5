//! Cryptographic composition for the RA2 security type.
//!
//! Only the composition lives here; the block primitives (AES, RSA, SHA-1)
//! come from their crates and are treated as opaque.

pub mod eax;

pub use eax::AesEax;
