//! Size-triggered payload compression.

use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;

use bytes::Bytes;
use flate2::Compression;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use super::config::CompressionConfig;

/// Deflate-family algorithm used for large payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    Gzip,
    Zlib,
    Deflate,
}

impl CompressionAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Zlib => "zlib",
            Self::Deflate => "deflate",
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionAlgorithm {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gzip" => Ok(Self::Gzip),
            "zlib" => Ok(Self::Zlib),
            "deflate" => Ok(Self::Deflate),
            other => Err(format!("unknown algorithm `{other}`; expected gzip, zlib or deflate")),
        }
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("{algorithm} encoding failed: {source}")]
    Encode {
        algorithm: CompressionAlgorithm,
        #[source]
        source: io::Error,
    },
    #[error("{algorithm} decoding failed: {source}")]
    Decode {
        algorithm: CompressionAlgorithm,
        #[source]
        source: io::Error,
    },
    #[error("decoded {actual} bytes, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },
}

/// Result of preparing a payload for storage.
#[derive(Debug, Clone)]
pub struct Encoded {
    pub payload: Bytes,
    /// Set only when `payload` holds compressed bytes.
    pub algorithm: Option<CompressionAlgorithm>,
}

#[derive(Debug, Clone)]
pub struct Codec {
    enabled: bool,
    algorithm: CompressionAlgorithm,
    threshold_bytes: usize,
    level: Compression,
}

impl Codec {
    pub fn new(config: &CompressionConfig) -> Self {
        Self {
            enabled: config.enabled,
            algorithm: config.algorithm,
            threshold_bytes: config.threshold_bytes,
            level: Compression::new(config.level),
        }
    }

    pub fn should_compress(&self, len: usize) -> bool {
        self.enabled && len > self.threshold_bytes
    }

    /// Compress `payload` when it crosses the threshold.
    ///
    /// Falls back to the raw bytes when encoding fails or does not shrink the
    /// payload, so `algorithm` is `None` in both cases.
    pub fn encode(&self, payload: &Bytes) -> Encoded {
        if !self.should_compress(payload.len()) {
            return Encoded {
                payload: payload.clone(),
                algorithm: None,
            };
        }

        match compress(self.algorithm, self.level, payload) {
            Ok(compressed) if compressed.len() < payload.len() => Encoded {
                payload: Bytes::from(compressed),
                algorithm: Some(self.algorithm),
            },
            Ok(_) => Encoded {
                payload: payload.clone(),
                algorithm: None,
            },
            Err(err) => {
                warn!(
                    error = %err,
                    original_size = payload.len(),
                    "Compression failed; storing payload uncompressed"
                );
                Encoded {
                    payload: payload.clone(),
                    algorithm: None,
                }
            }
        }
    }
}

pub fn compress(
    algorithm: CompressionAlgorithm,
    level: Compression,
    payload: &[u8],
) -> Result<Vec<u8>, CodecError> {
    let encode_err = |source| CodecError::Encode { algorithm, source };
    let capacity = payload.len() / 2;
    match algorithm {
        CompressionAlgorithm::Gzip => {
            let mut encoder = GzEncoder::new(Vec::with_capacity(capacity), level);
            encoder.write_all(payload).map_err(encode_err)?;
            encoder.finish().map_err(encode_err)
        }
        CompressionAlgorithm::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::with_capacity(capacity), level);
            encoder.write_all(payload).map_err(encode_err)?;
            encoder.finish().map_err(encode_err)
        }
        CompressionAlgorithm::Deflate => {
            let mut encoder = DeflateEncoder::new(Vec::with_capacity(capacity), level);
            encoder.write_all(payload).map_err(encode_err)?;
            encoder.finish().map_err(encode_err)
        }
    }
}

/// Upper bound on how far DEFLATE can expand its input.
pub const MAX_INFLATE_RATIO: u64 = 1032;

/// Whether `original_size` bytes could have been deflated into
/// `compressed_len` bytes.
pub fn plausible_original_size(compressed_len: usize, original_size: u64) -> bool {
    let compressed_len = u64::try_from(compressed_len).unwrap_or(u64::MAX);
    original_size <= compressed_len.saturating_mul(MAX_INFLATE_RATIO)
}

/// Inflate `data`, refusing to produce more than `expected_len` bytes.
pub fn decompress(
    algorithm: CompressionAlgorithm,
    data: &[u8],
    expected_len: usize,
) -> Result<Vec<u8>, CodecError> {
    let limit = u64::try_from(expected_len)
        .ok()
        .and_then(|len| len.checked_add(1))
        .unwrap_or(u64::MAX);
    // `expected_len` comes from stored metadata; never reserve more than the
    // input could inflate to.
    let ceiling = data
        .len()
        .saturating_mul(usize::try_from(MAX_INFLATE_RATIO).unwrap_or(usize::MAX));
    let mut out = Vec::with_capacity(expected_len.min(ceiling));
    let read = match algorithm {
        CompressionAlgorithm::Gzip => GzDecoder::new(data).take(limit).read_to_end(&mut out),
        CompressionAlgorithm::Zlib => ZlibDecoder::new(data).take(limit).read_to_end(&mut out),
        CompressionAlgorithm::Deflate => {
            DeflateDecoder::new(data).take(limit).read_to_end(&mut out)
        }
    };
    read.map_err(|source| CodecError::Decode { algorithm, source })?;

    if out.len() != expected_len {
        return Err(CodecError::SizeMismatch {
            expected: expected_len,
            actual: out.len(),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec(threshold_bytes: usize) -> Codec {
        Codec::new(&CompressionConfig {
            threshold_bytes,
            ..Default::default()
        })
    }

    fn markdown(len: usize) -> Bytes {
        let line = "## useEffect\nRuns after render. Return a cleanup function.\n";
        Bytes::from(line.repeat(len / line.len() + 1)[..len].to_string())
    }

    #[test]
    fn small_payloads_pass_through() {
        let payload = markdown(500);
        let encoded = codec(1024).encode(&payload);
        assert!(encoded.algorithm.is_none());
        assert_eq!(encoded.payload, payload);
    }

    #[test]
    fn payload_at_threshold_is_not_compressed() {
        let payload = markdown(1024);
        assert!(codec(1024).encode(&payload).algorithm.is_none());
    }

    #[test]
    fn large_payloads_shrink_and_inflate_back() {
        let payload = markdown(8 * 1024);
        for algorithm in [
            CompressionAlgorithm::Gzip,
            CompressionAlgorithm::Zlib,
            CompressionAlgorithm::Deflate,
        ] {
            let codec = Codec::new(&CompressionConfig {
                algorithm,
                ..Default::default()
            });
            let encoded = codec.encode(&payload);
            assert_eq!(encoded.algorithm, Some(algorithm));
            assert!(encoded.payload.len() < payload.len());

            let inflated =
                decompress(algorithm, &encoded.payload, payload.len()).expect("inflate");
            assert_eq!(inflated, payload.as_ref());
        }
    }

    #[test]
    fn disabled_codec_never_compresses() {
        let codec = Codec::new(&CompressionConfig {
            enabled: false,
            ..Default::default()
        });
        assert!(codec.encode(&markdown(64 * 1024)).algorithm.is_none());
    }

    #[test]
    fn garbage_fails_to_decode() {
        let err = decompress(CompressionAlgorithm::Gzip, b"definitely not gzip", 100)
            .expect_err("garbage");
        assert!(matches!(err, CodecError::Decode { .. }));
    }

    #[test]
    fn size_mismatch_is_reported() {
        let payload = markdown(4096);
        let compressed =
            compress(CompressionAlgorithm::Gzip, Compression::default(), &payload).expect("gzip");
        let err = decompress(CompressionAlgorithm::Gzip, &compressed, 100).expect_err("too long");
        assert!(matches!(
            err,
            CodecError::SizeMismatch {
                expected: 100,
                actual: 101
            }
        ));
    }

    #[test]
    fn oversized_expected_length_is_a_mismatch() {
        let payload = markdown(4096);
        let compressed =
            compress(CompressionAlgorithm::Zlib, Compression::default(), &payload).expect("zlib");
        let err = decompress(CompressionAlgorithm::Zlib, &compressed, usize::MAX)
            .expect_err("metadata lies about the size");
        assert!(matches!(
            err,
            CodecError::SizeMismatch { actual: 4096, .. }
        ));
    }

    #[test]
    fn original_size_must_fit_the_inflate_ratio() {
        assert!(plausible_original_size(100, 100 * MAX_INFLATE_RATIO));
        assert!(!plausible_original_size(100, 100 * MAX_INFLATE_RATIO + 1));
        assert!(!plausible_original_size(5000, i64::MAX as u64));
    }
}
