//! FlateDecode (zlib/deflate) implementation.

use crate::decoders::StreamDecoder;
use crate::error::{Error, Result};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use std::io::Read;

/// FlateDecode filter implementation.
pub struct FlateDecoder {
    /// Output cap; decoding beyond it is treated as a decompression bomb.
    pub max_output: u64,
}

impl Default for FlateDecoder {
    fn default() -> Self {
        Self {
            max_output: super::DEFAULT_MAX_DECOMPRESSED_SIZE as u64,
        }
    }
}

impl StreamDecoder for FlateDecoder {
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        let zlib = ZlibDecoder::new(input)
            .take(self.max_output + 1)
            .read_to_end(&mut output);

        match zlib {
            Ok(_) => {},
            Err(e) if !output.is_empty() => {
                log::warn!(
                    "FlateDecode partial recovery: extracted {} bytes before corruption: {}",
                    output.len(),
                    e
                );
            },
            Err(e) => {
                // Some producers emit raw deflate without the zlib wrapper.
                log::debug!("Zlib decode failed ({}), trying raw deflate", e);
                output.clear();
                DeflateDecoder::new(input)
                    .take(self.max_output + 1)
                    .read_to_end(&mut output)
                    .map_err(|e| Error::Decode(format!("FlateDecode failed: {}", e)))?;
            },
        }

        if output.len() as u64 > self.max_output {
            return Err(Error::Decode(format!(
                "Decompressed size exceeds limit of {} bytes",
                self.max_output
            )));
        }
        Ok(output)
    }

    fn name(&self) -> &str {
        "FlateDecode"
    }
}
