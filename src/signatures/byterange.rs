//! ByteRange handling for PDF signatures.
//!
//! A signature covers everything except its own `/Contents` hex string. The
//! ByteRange array `[0 len1 off2 len2]` names the two covered spans:
//!
//! ```text
//! 0 ............ len1 | <hex placeholder> | off2 ............ off2+len2 (EOF)
//! ```
//!
//! Signing is two-pass: both the ByteRange array and the `/Contents` hex
//! string are first written as fixed-width placeholders, the file is
//! finalized, and then both are overwritten in place without moving a byte.

use crate::error::{Error, Result};

/// Digits reserved for each ByteRange number.
const BYTE_RANGE_DIGITS: usize = 10;

/// Fixed-width writer for the `/ByteRange` and `/Contents` placeholders.
#[derive(Debug, Clone)]
pub struct ByteRangeCalculator {
    /// Size of the `/Contents` value in the file (hex digits + 2 for angle brackets)
    placeholder_size: usize,
}

impl ByteRangeCalculator {
    /// Reserve room for a CMS blob of up to `estimated_signature_size` bytes.
    pub fn new(estimated_signature_size: usize) -> Self {
        Self {
            placeholder_size: estimated_signature_size * 2 + 2,
        }
    }

    /// Get the placeholder size (for the /Contents value).
    pub fn placeholder_size(&self) -> usize {
        self.placeholder_size
    }

    /// Largest CMS blob in bytes that fits the placeholder.
    pub fn capacity(&self) -> usize {
        (self.placeholder_size - 2) / 2
    }

    /// `<000...0>` of exactly [`placeholder_size`](Self::placeholder_size) bytes.
    pub fn generate_placeholder(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.placeholder_size);
        out.push(b'<');
        out.resize(self.placeholder_size - 1, b'0');
        out.push(b'>');
        out
    }

    /// Placeholder for the ByteRange array, as wide as any formatted value.
    pub fn byte_range_placeholder() -> Vec<u8> {
        Self::format_byte_range(&[0; 4])
    }

    /// ByteRange for a file of `file_size` bytes whose `/Contents` value starts at `contents_offset`.
    pub fn calculate_byte_range(&self, file_size: usize, contents_offset: usize) -> [i64; 4] {
        let after = contents_offset + self.placeholder_size;
        [0, contents_offset as i64, after as i64, file_size as i64 - after as i64]
    }

    /// Format a ByteRange as a fixed-width PDF array.
    ///
    /// Every number after the first is left-aligned in a ten-character slot, so
    /// the text has the same length whatever the values are.
    pub fn format_byte_range(byte_range: &[i64; 4]) -> Vec<u8> {
        let mut out = format!("[{}", byte_range[0]).into_bytes();
        for value in &byte_range[1..] {
            out.extend_from_slice(format!(" {:<width$}", value, width = BYTE_RANGE_DIGITS).as_bytes());
        }
        out.push(b']');
        out
    }

    /// Overwrite the ByteRange placeholder at `offset`.
    pub fn write_byte_range(pdf_data: &mut [u8], offset: usize, byte_range: &[i64; 4]) -> Result<()> {
        let text = Self::format_byte_range(byte_range);
        let placeholder = Self::byte_range_placeholder();
        let end = offset + placeholder.len();
        if text.len() != placeholder.len() || end > pdf_data.len() {
            return Err(Error::structural("ByteRange does not fit its placeholder"));
        }
        if pdf_data[offset] != b'[' || pdf_data[end - 1] != b']' {
            return Err(Error::structural("ByteRange placeholder not found at expected offset"));
        }
        pdf_data[offset..end].copy_from_slice(&text);
        Ok(())
    }

    /// The two covered spans of `pdf_data`.
    pub fn signed_slices<'a>(pdf_data: &'a [u8], byte_range: &[i64; 4]) -> Result<(&'a [u8], &'a [u8])> {
        let span = |start: i64, len: i64| -> Result<&'a [u8]> {
            let start = usize::try_from(start).map_err(|_| Error::structural("negative ByteRange offset"))?;
            let len = usize::try_from(len).map_err(|_| Error::structural("negative ByteRange length"))?;
            start
                .checked_add(len)
                .and_then(|end| pdf_data.get(start..end))
                .ok_or_else(|| {
                    Error::structural(format!(
                        "ByteRange span {}+{} exceeds file size {}",
                        start,
                        len,
                        pdf_data.len()
                    ))
                })
        };
        Ok((span(byte_range[0], byte_range[1])?, span(byte_range[2], byte_range[3])?))
    }

    /// Concatenation of the covered spans.
    pub fn extract_signed_bytes(pdf_data: &[u8], byte_range: &[i64; 4]) -> Result<Vec<u8>> {
        let (first, second) = Self::signed_slices(pdf_data, byte_range)?;
        let mut signed = Vec::with_capacity(first.len() + second.len());
        signed.extend_from_slice(first);
        signed.extend_from_slice(second);
        Ok(signed)
    }

    /// Check the ByteRange shape: starts at 0, leaves exactly one gap, and
    /// stays within the file. Returns whether it reaches the end of the file.
    pub fn validate_byte_range(byte_range: &[i64; 4], file_size: usize) -> Result<bool> {
        let [offset1, length1, offset2, length2] = *byte_range;
        if offset1 != 0 {
            return Err(Error::structural(format!("ByteRange must start at 0, got {}", offset1)));
        }
        if length1 < 0 || length2 < 0 || offset2 <= length1 {
            return Err(Error::structural(format!(
                "ByteRange spans overlap or are negative: {:?}",
                byte_range
            )));
        }
        let end = offset2 + length2;
        if end > file_size as i64 {
            return Err(Error::structural(format!(
                "ByteRange ends at {} beyond file size {}",
                end, file_size
            )));
        }
        Ok(end == file_size as i64)
    }

    /// Decode the CMS blob sitting in the ByteRange gap.
    ///
    /// The gap must be exactly one hex string. Trailing zero padding is kept;
    /// DER parsing stops at the end of the outer structure.
    pub fn read_gap(pdf_data: &[u8], byte_range: &[i64; 4]) -> Result<Vec<u8>> {
        let start = byte_range[1] as usize;
        let end = byte_range[2] as usize;
        let gap = pdf_data
            .get(start..end)
            .ok_or_else(|| Error::structural("ByteRange gap outside the file"))?;
        match gap {
            [b'<', hex @ .., b'>'] => crate::parser::decode_hex(hex),
            _ => Err(Error::structural("ByteRange gap is not a single hex string")),
        }
    }

    /// Overwrite the `/Contents` placeholder at `contents_offset` with `cms`,
    /// hex-encoded and zero-padded. Never truncates.
    pub fn insert_signature(&self, pdf_data: &mut [u8], contents_offset: usize, cms: &[u8]) -> Result<()> {
        let required = cms.len() * 2;
        let reserved = self.placeholder_size - 2;
        if required > reserved {
            return Err(Error::ContentsOverflow { required, reserved });
        }

        let end = contents_offset + self.placeholder_size;
        if end > pdf_data.len() || pdf_data[contents_offset] != b'<' || pdf_data[end - 1] != b'>' {
            return Err(Error::structural("/Contents placeholder not found at expected offset"));
        }

        let hex = hex::encode_upper(cms);
        let body = &mut pdf_data[contents_offset + 1..end - 1];
        body[..required].copy_from_slice(hex.as_bytes());
        body[required..].fill(b'0');
        Ok(())
    }
}

impl Default for ByteRangeCalculator {
    fn default() -> Self {
        Self::new(8192)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_size() {
        let calc = ByteRangeCalculator::new(1024);
        assert_eq!(calc.placeholder_size(), 2050);
        assert_eq!(calc.capacity(), 1024);
    }

    #[test]
    fn test_generate_placeholder() {
        let calc = ByteRangeCalculator::new(4);
        assert_eq!(calc.generate_placeholder(), b"<00000000>");
    }

    #[test]
    fn test_calculate_byte_range() {
        let calc = ByteRangeCalculator::new(49);
        assert_eq!(calc.calculate_byte_range(1000, 400), [0, 400, 500, 500]);
    }

    #[test]
    fn test_byte_range_text_is_fixed_width() {
        let placeholder = ByteRangeCalculator::byte_range_placeholder();
        let formatted = ByteRangeCalculator::format_byte_range(&[0, 1234, 99999, 4_000_000_000]);
        assert_eq!(placeholder.len(), formatted.len());
        assert!(formatted.starts_with(b"[0 1234       99999"));
    }

    #[test]
    fn test_write_byte_range_in_place() {
        let mut data = b"/ByteRange ".to_vec();
        data.extend_from_slice(&ByteRangeCalculator::byte_range_placeholder());
        let before = data.len();
        ByteRangeCalculator::write_byte_range(&mut data, 11, &[0, 10, 20, 30]).unwrap();
        assert_eq!(data.len(), before);
        let (_, obj) = crate::parser::parse_object(&data[11..]).unwrap();
        let values: Vec<i64> = obj.as_array().unwrap().iter().filter_map(|o| o.as_integer()).collect();
        assert_eq!(values, vec![0, 10, 20, 30]);
    }

    #[test]
    fn test_extract_signed_bytes() {
        let signed = ByteRangeCalculator::extract_signed_bytes(b"AAABBBCCC", &[0, 3, 6, 3]).unwrap();
        assert_eq!(signed, b"AAACCC");
        assert!(ByteRangeCalculator::extract_signed_bytes(b"AAA", &[0, 3, 6, 3]).is_err());
        assert!(ByteRangeCalculator::extract_signed_bytes(b"AAA", &[0, -1, 2, 1]).is_err());
    }

    #[test]
    fn test_validate_byte_range() {
        assert!(ByteRangeCalculator::validate_byte_range(&[0, 100, 150, 50], 200).unwrap());
        assert!(!ByteRangeCalculator::validate_byte_range(&[0, 100, 150, 20], 200).unwrap());
        assert!(ByteRangeCalculator::validate_byte_range(&[10, 100, 150, 50], 200).is_err());
        assert!(ByteRangeCalculator::validate_byte_range(&[0, 100, 150, 100], 200).is_err());
        assert!(ByteRangeCalculator::validate_byte_range(&[0, 160, 150, 50], 200).is_err());
    }

    #[test]
    fn test_insert_signature_and_read_back() {
        let calc = ByteRangeCalculator::new(4);
        let mut pdf_data = b"XX<00000000>YY".to_vec();
        calc.insert_signature(&mut pdf_data, 2, &[0xAB, 0xCD]).unwrap();
        assert_eq!(&pdf_data, b"XX<ABCD0000>YY");

        let gap = ByteRangeCalculator::read_gap(&pdf_data, &[0, 2, 12, 2]).unwrap();
        assert_eq!(gap, vec![0xAB, 0xCD, 0x00, 0x00]);
    }

    #[test]
    fn test_insert_signature_overflow() {
        let calc = ByteRangeCalculator::new(4);
        let mut pdf_data = b"XX<00000000>YY".to_vec();
        let original = pdf_data.clone();
        let err = calc.insert_signature(&mut pdf_data, 2, &[1, 2, 3, 4, 5]).unwrap_err();
        assert!(matches!(err, Error::ContentsOverflow { required: 10, reserved: 8 }));
        assert_eq!(pdf_data, original);
    }

    #[test]
    fn test_read_gap_rejects_non_hex_gap() {
        assert!(ByteRangeCalculator::read_gap(b"XX(abc)YY", &[0, 2, 7, 2]).is_err());
    }
}
