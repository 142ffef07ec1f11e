// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Payload compression.
//!
//! CLS accepts LZ4 raw blocks (no frame, no size prefix) or zstd frames, advertised through
//! the `x-cls-compress-type` header. Both transforms are stateless: every call compresses its
//! input independently.

use crate::errors::ShipError;
use serde::Deserialize;
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;
use zstd::stream::{read::Decoder, write::Encoder};

/// LZ4 never expands by more than this factor, which bounds the search for the output size.
const LZ4_MAX_RATIO: usize = 255;
const LZ4_MIN_OUTPUT: usize = 64;
const DEFAULT_ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    #[default]
    Lz4,
    Zstd,
    None,
}

impl CompressionType {
    /// Value for the `x-cls-compress-type` header, if any.
    #[must_use]
    pub fn header_value(self) -> Option<&'static str> {
        match self {
            CompressionType::Lz4 => Some("lz4"),
            CompressionType::Zstd => Some("zstd"),
            CompressionType::None => None,
        }
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header_value().unwrap_or("none"))
    }
}

impl FromStr for CompressionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lz4" => Ok(CompressionType::Lz4),
            "zstd" => Ok(CompressionType::Zstd),
            "none" | "" => Ok(CompressionType::None),
            other => Err(format!("unsupported compression type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Compressor {
    kind: CompressionType,
    zstd_level: i32,
}

impl Compressor {
    #[must_use]
    pub fn new(kind: CompressionType) -> Self {
        Self {
            kind,
            zstd_level: DEFAULT_ZSTD_LEVEL,
        }
    }

    #[must_use]
    pub fn kind(&self) -> CompressionType {
        self.kind
    }

    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>, ShipError> {
        match self.kind {
            CompressionType::Lz4 => Ok(lz4_flex::block::compress(data)),
            CompressionType::Zstd => {
                let mut encoder =
                    Encoder::new(Vec::new(), self.zstd_level).map_err(ShipError::Compress)?;
                encoder.write_all(data).map_err(ShipError::Compress)?;
                encoder.finish().map_err(ShipError::Compress)
            }
            CompressionType::None => Ok(data.to_vec()),
        }
    }

    /// Inverse of [`Compressor::compress`].
    ///
    /// LZ4 raw blocks do not carry their decompressed length, so the output buffer is grown
    /// until the block fits or the maximum LZ4 expansion ratio is exceeded.
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, ShipError> {
        match self.kind {
            CompressionType::Lz4 => {
                let limit = data
                    .len()
                    .saturating_mul(LZ4_MAX_RATIO)
                    .max(LZ4_MIN_OUTPUT);
                let mut capacity = data.len().saturating_mul(4).max(LZ4_MIN_OUTPUT);
                loop {
                    match lz4_flex::block::decompress(data, capacity) {
                        Ok(decompressed) => return Ok(decompressed),
                        Err(_) if capacity < limit => {
                            capacity = capacity.saturating_mul(2).min(limit);
                        }
                        Err(e) => return Err(ShipError::Decompress(e.to_string())),
                    }
                }
            }
            CompressionType::Zstd => {
                let mut decoder =
                    Decoder::new(data).map_err(|e| ShipError::Decompress(e.to_string()))?;
                let mut decompressed = Vec::new();
                decoder
                    .read_to_end(&mut decompressed)
                    .map_err(|e| ShipError::Decompress(e.to_string()))?;
                Ok(decompressed)
            }
            CompressionType::None => Ok(data.to_vec()),
        }
    }
}
