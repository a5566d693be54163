use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionKind {
    /// Identity copy
    #[default]
    None,
    Lz4,
    Zstd,
}

impl CompressionKind {
    pub const ALL: [CompressionKind; 3] = [
        CompressionKind::None,
        CompressionKind::Lz4,
        CompressionKind::Zstd,
    ];

    pub fn id(self) -> u8 {
        match self {
            CompressionKind::None => 0x01,
            CompressionKind::Lz4 => 0x02,
            CompressionKind::Zstd => 0x03,
        }
    }

    pub fn from_id(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(CompressionKind::None),
            0x02 => Some(CompressionKind::Lz4),
            0x03 => Some(CompressionKind::Zstd),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CompressionKind::None => "none",
            CompressionKind::Lz4 => "lz4",
            CompressionKind::Zstd => "zstd",
        }
    }
}

/// Maximum output size for decompression
pub const MAX_DECOMPRESSION_SIZE: usize = 64 * 1024 * 1024;

/// Zstd level used when none is configured
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Compresses data using the specified compression algorithm
///
/// # Errors
/// Returns `ProtocolError::CompressionFailure` if compression fails
pub fn compress(data: &[u8], kind: CompressionKind) -> Result<Vec<u8>> {
    compress_with_level(data, kind, DEFAULT_ZSTD_LEVEL)
}

/// Like [`compress`], with an explicit zstd level. LZ4 ignores the level.
pub fn compress_with_level(data: &[u8], kind: CompressionKind, level: i32) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::None => Ok(data.to_vec()),
        CompressionKind::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        CompressionKind::Zstd => {
            let mut out = Vec::new();
            zstd::stream::copy_encode(data, &mut out, level)
                .map_err(|_| ProtocolError::CompressionFailure)?;
            Ok(out)
        }
    }
}

/// Decompresses data that was compressed with the specified algorithm
///
/// Output is capped at `MAX_DECOMPRESSION_SIZE` to stop decompression bombs.
///
/// # Errors
/// Returns `ProtocolError::DecompressionFailure` if:
/// - Decompression fails
/// - Output size exceeds MAX_DECOMPRESSION_SIZE
pub fn decompress(data: &[u8], kind: CompressionKind) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::None => Ok(data.to_vec()),
        CompressionKind::Lz4 => {
            // lz4_flex prepends the uncompressed size as 4 little-endian bytes;
            // check it before the library allocates.
            if data.len() < 4 {
                return Err(ProtocolError::DecompressionFailure);
            }
            let claimed_size = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
            if claimed_size > MAX_DECOMPRESSION_SIZE {
                return Err(ProtocolError::DecompressionFailure);
            }

            lz4_flex::decompress_size_prepended(data)
                .map_err(|_| ProtocolError::DecompressionFailure)
        }
        CompressionKind::Zstd => {
            let mut out = Vec::new();
            decompress_stream(data, &mut out, kind)?;
            Ok(out)
        }
    }
}

/// Compress everything `reader` yields into `writer`. Returns bytes written.
///
/// Zstd streams; LZ4 uses the size-prefixed block format and therefore buffers
/// the input so the output matches [`compress`].
pub fn compress_stream<R: Read, W: Write>(
    mut reader: R,
    mut writer: W,
    kind: CompressionKind,
    level: i32,
) -> Result<u64> {
    match kind {
        CompressionKind::None => {
            std::io::copy(&mut reader, &mut writer).map_err(|_| ProtocolError::CompressionFailure)
        }
        CompressionKind::Lz4 => {
            let mut input = Vec::new();
            reader
                .read_to_end(&mut input)
                .map_err(|_| ProtocolError::CompressionFailure)?;
            let out = lz4_flex::compress_prepend_size(&input);
            writer
                .write_all(&out)
                .map_err(|_| ProtocolError::CompressionFailure)?;
            Ok(out.len() as u64)
        }
        CompressionKind::Zstd => {
            let mut counter = CountingWriter::new(&mut writer);
            zstd::stream::copy_encode(reader, &mut counter, level)
                .map_err(|_| ProtocolError::CompressionFailure)?;
            Ok(counter.written)
        }
    }
}

/// Decompress everything `reader` yields into `writer`, bounded by `MAX_DECOMPRESSION_SIZE`.
/// Returns bytes written.
pub fn decompress_stream<R: Read, W: Write>(
    mut reader: R,
    mut writer: W,
    kind: CompressionKind,
) -> Result<u64> {
    match kind {
        CompressionKind::None => copy_bounded(&mut reader, &mut writer),
        CompressionKind::Lz4 => {
            let mut input = Vec::new();
            reader
                .read_to_end(&mut input)
                .map_err(|_| ProtocolError::DecompressionFailure)?;
            let out = decompress(&input, kind)?;
            writer
                .write_all(&out)
                .map_err(|_| ProtocolError::DecompressionFailure)?;
            Ok(out.len() as u64)
        }
        CompressionKind::Zstd => {
            let mut decoder = zstd::stream::Decoder::new(reader)
                .map_err(|_| ProtocolError::DecompressionFailure)?;
            copy_bounded(&mut decoder, &mut writer)
        }
    }
}

/// Compress only when the data reaches `threshold_bytes`.
/// Returns the output bytes and the kind actually applied.
pub fn maybe_compress(
    data: &[u8],
    kind: CompressionKind,
    threshold_bytes: usize,
    level: i32,
) -> Result<(Vec<u8>, CompressionKind)> {
    if kind == CompressionKind::None || data.len() < threshold_bytes {
        Ok((data.to_vec(), CompressionKind::None))
    } else {
        Ok((compress_with_level(data, kind, level)?, kind))
    }
}

fn copy_bounded<R: Read, W: Write>(reader: &mut R, writer: &mut W) -> Result<u64> {
    let mut buffer = [0u8; 8192];
    let mut total = 0usize;
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                total += n;
                if total > MAX_DECOMPRESSION_SIZE {
                    return Err(ProtocolError::DecompressionFailure);
                }
                writer
                    .write_all(&buffer[..n])
                    .map_err(|_| ProtocolError::DecompressionFailure)?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => return Err(ProtocolError::DecompressionFailure),
        }
    }
    Ok(total as u64)
}

struct CountingWriter<W> {
    inner: W,
    written: u64,
}

impl<W> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
