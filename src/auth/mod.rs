//! Authentication security types.

pub mod ra2;

pub use ra2::{Credentials, Ra2Cipher, Ra2Handshake, Ra2Status};
