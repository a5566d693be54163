//! # Utility Modules
//!
//! Supporting utilities for cryptography, compression, logging, and timing.
//!
//! ## Components
//! - **Crypto**: XChaCha20-Poly1305 session keys and X25519 sealed boxes
//! - **Compression**: LZ4 and Zstd with size limits and thresholds
//! - **Logging**: `tracing-subscriber` setup from configuration
//! - **Metrics**: Thread-safe observability counters
//! - **Time**: Millisecond timestamps for messages
//!
//! ## Security
//! - Cryptographically secure RNG (getrandom)
//! - Decompression bomb protection (64MB limit)
//! - Memory zeroing for sensitive data (zeroize crate)

pub mod compression;
pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod time;
