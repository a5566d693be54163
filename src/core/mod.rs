//! # Core Protocol Components
//!
//! Framing, stream reassembly and the transform pipeline.
//!
//! ## Components
//! - **Frame**: header layout and the base-255 length codec
//! - **Reassembler**: turns arbitrary read chunks back into whole frames
//! - **Codec**: Tokio codec wrapping the reassembler for `FramedRead`/`FramedWrite`
//! - **Serialization**: pluggable strategies with a bincode fallback
//! - **Pipeline**: serialize → compress → encrypt and back
//!
//! ## Wire Format
//! ```text
//! [Serialization(1)] [Compression(1)] [Encryption(1)] [Length(3), base 255, LSB first] [Payload(N)]
//! ```
//!
//! ## Security
//! - Maximum payload: 16,646,655 bytes (all three length digits saturated)
//! - Id 0 in any header byte is treated as stream corruption
//! - Length validation before allocation

pub mod codec;
pub mod frame;
pub mod pipeline;
pub mod reassembler;
pub mod serialization;
