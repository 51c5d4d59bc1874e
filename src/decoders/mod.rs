//! Stream decoders for the filters found in document structure streams.
//!
//! Only the filters that carry cross-reference and object streams are
//! supported: FlateDecode (with PNG/TIFF predictors) and ASCIIHexDecode.

use crate::error::{Error, Result};

mod flate;
mod predictor;

pub use flate::FlateDecoder;
pub use predictor::{decode_predictor, DecodeParams};

const DEFAULT_MAX_DECOMPRESSED_SIZE: usize = 100 * 1024 * 1024;

/// Trait for PDF stream decoders.
pub trait StreamDecoder {
    /// Decode the input data.
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>>;

    /// Get the name of this decoder (e.g., "FlateDecode").
    fn name(&self) -> &str;
}

/// ASCIIHexDecode filter implementation.
pub struct AsciiHexDecoder;

impl StreamDecoder for AsciiHexDecoder {
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>> {
        let digits: Vec<u8> = input
            .iter()
            .copied()
            .take_while(|&c| c != b'>')
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        let mut padded = digits;
        if padded.len() % 2 == 1 {
            padded.push(b'0');
        }
        hex::decode(&padded).map_err(|e| Error::Decode(format!("ASCIIHexDecode: {}", e)))
    }

    fn name(&self) -> &str {
        "ASCIIHexDecode"
    }
}

/// Decode stream data through its filter pipeline, then reverse any predictor.
pub fn decode_stream_with_params(
    data: &[u8],
    filters: &[String],
    params: Option<&DecodeParams>,
) -> Result<Vec<u8>> {
    let mut current = data.to_vec();

    for filter_name in filters {
        let decoder: Box<dyn StreamDecoder> = match filter_name.as_str() {
            "FlateDecode" | "Fl" => Box::new(FlateDecoder::default()),
            "ASCIIHexDecode" | "AHx" => Box::new(AsciiHexDecoder),
            other => {
                return Err(Error::UnsupportedFeature(format!("stream filter /{}", other)));
            },
        };
        current = decoder.decode(&current)?;
        log::trace!("{} produced {} bytes", decoder.name(), current.len());
    }

    if let Some(params) = params {
        if params.predictor != 1 {
            current = decode_predictor(&current, params)?;
        }
    }

    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_stream_no_filters() {
        assert_eq!(decode_stream_with_params(b"abc", &[], None).unwrap(), b"abc");
    }

    #[test]
    fn test_unsupported_filter() {
        let result = decode_stream_with_params(b"x", &["DCTDecode".to_string()], None);
        assert!(matches!(result, Err(Error::UnsupportedFeature(_))));
    }

    #[test]
    fn test_ascii_hex() {
        let filters = vec!["ASCIIHexDecode".to_string()];
        assert_eq!(decode_stream_with_params(b"48 65 6C6C 6F>", &filters, None).unwrap(), b"Hello");
        assert_eq!(AsciiHexDecoder.decode(b"7").unwrap(), vec![0x70]);
    }
}
