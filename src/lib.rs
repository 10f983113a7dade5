//! # rfb-core
//!
//! Protocol core for an RFB (VNC) client: a buffered socket layer, the
//! rectangle decoder family, and the RA2 authentication handshake.
//!
//! Everything here is built around one discipline: **suspend on partial
//! data, resume without loss**. The receive queue can roll its read
//! cursor back when a structure is incomplete, so decoders and the
//! handshake re-enter cleanly when the next transport frame arrives —
//! no thread ever blocks on the network.
//!
//! ## Sub-modules
//!
//! | Module     | Purpose                                               |
//! |------------|-------------------------------------------------------|
//! | `socket`   | Receive/send queues + transport ownership             |
//! | `zlib`     | Persistent DEFLATE stream wrappers                    |
//! | `decoders` | Rect decoders: Raw, CopyRect, RRE, Hextile, Tight,    |
//! |            | TightPNG, ZRLE, JPEG, H.264                           |
//! | `update`   | Framebuffer-update rectangle dispatch                 |
//! | `display`  | Drawing surface the decoders blit into                |
//! | `video`    | Seam to the external H.264 bulk decoder               |
//! | `crypto`   | AES-EAX composed from block primitives                |
//! | `auth`     | RA2 (RSA + AES) handshake state machine               |
//! | `config`   | Connection configuration                              |
//! | `testing`  | Shared test doubles (transport, display, video)       |
//! | `error`    | `RfbError` — typed, `thiserror`-based error hierarchy |
//!
//! Rendering, input handling and session UI live in the embedding
//! application; this crate stops at the [`display::Display`] and
//! [`video::VideoBackend`] seams.

pub mod auth;
pub mod config;
pub mod crypto;
pub mod decoders;
pub mod display;
pub mod error;
pub mod socket;
pub mod testing;
pub mod update;
pub mod video;
pub mod zlib;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use auth::{Credentials, Ra2Handshake, Ra2Status};
pub use config::ConnectionConfig;
pub use decoders::{Decoder, DecoderRegistry};
pub use display::Display;
pub use error::RfbError;
pub use socket::{Socket, SocketEvent, SocketState, Transport, TransportEvent};
pub use update::{RectHeader, UpdateEngine};
pub use video::{VideoBackend, VideoConfig, VideoFrame};
pub use zlib::{Deflator, Inflator};
