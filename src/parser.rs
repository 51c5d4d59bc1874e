//! PDF object parser.
//!
//! Recursive descent over lexer tokens into [`Object`] values, plus the
//! `N G obj ... endobj` envelope used for indirect objects.

use crate::error::{Error, Result};
use crate::lexer::{token, Token};
use crate::object::{Dictionary, Object, ObjectRef};
use nom::IResult;

/// Decode escape sequences in PDF literal strings.
///
/// ```
/// # use pdf_seal::parser::decode_literal_string_escapes;
/// let decoded = decode_literal_string_escapes(b"Section \\247 (a\\)b)");
/// assert_eq!(decoded, b"Section \xa7 (a)b)");
/// ```
pub fn decode_literal_string_escapes(raw: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(raw.len());
    let mut i = 0;

    while i < raw.len() {
        if raw[i] != b'\\' || i + 1 >= raw.len() {
            result.push(raw[i]);
            i += 1;
            continue;
        }

        let escaped = raw[i + 1];
        i += 2;
        match escaped {
            b'n' => result.push(b'\n'),
            b'r' => result.push(b'\r'),
            b't' => result.push(b'\t'),
            b'b' => result.push(8),
            b'f' => result.push(12),
            b'(' | b')' | b'\\' => result.push(escaped),
            // line continuation
            b'\n' => {},
            b'\r' => {
                if i < raw.len() && raw[i] == b'\n' {
                    i += 1;
                }
            },
            b'0'..=b'7' => {
                let mut value = (escaped - b'0') as u32;
                let mut digits = 1;
                while digits < 3 && i < raw.len() && (b'0'..=b'7').contains(&raw[i]) {
                    value = value * 8 + (raw[i] - b'0') as u32;
                    i += 1;
                    digits += 1;
                }
                result.push((value & 0xFF) as u8);
            },
            other => result.push(other),
        }
    }

    result
}

/// Parse a PDF object from input bytes.
///
/// ```
/// use pdf_seal::parser::parse_object;
///
/// let (_, obj) = parse_object(b"<< /Type /Sig /ByteRange [0 10 20 30] /V 4 0 R >>").unwrap();
/// assert_eq!(obj.as_dict().unwrap()["Type"].as_name(), Some("Sig"));
/// ```
pub fn parse_object(input: &[u8]) -> IResult<&[u8], Object> {
    let (input, tok) = token(input)?;

    match tok {
        Token::Null => Ok((input, Object::Null)),
        Token::True => Ok((input, Object::Boolean(true))),
        Token::False => Ok((input, Object::Boolean(false))),

        Token::Integer(i) => {
            // `obj gen R` lookahead
            if let Ok((after_gen, Token::Integer(gen))) = token(input) {
                if let Ok((after_r, Token::R)) = token(after_gen) {
                    if i >= 0 && (0..=u16::MAX as i64).contains(&gen) {
                        return Ok((after_r, Object::Reference(ObjectRef::new(i as u32, gen as u16))));
                    }
                }
            }
            Ok((input, Object::Integer(i)))
        },

        Token::Real(r) => Ok((input, Object::Real(r))),
        Token::LiteralString(bytes) => Ok((input, Object::String(decode_literal_string_escapes(bytes)))),
        Token::HexString(hex_bytes) => match decode_hex(hex_bytes) {
            Ok(decoded) => Ok((input, Object::String(decoded))),
            Err(_) => Err(nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::Fail))),
        },
        Token::Name(name) => Ok((input, Object::Name(name))),
        Token::ArrayStart => parse_array(input),

        Token::DictStart => {
            let (remaining, dict) = parse_dictionary(input)?;

            if let Ok((stream_input, Token::StreamStart)) = token(remaining) {
                let (rest, data) = parse_stream_data(stream_input, &dict)?;
                return Ok((
                    rest,
                    Object::Stream {
                        dict,
                        data: bytes::Bytes::from(data),
                    },
                ));
            }

            Ok((remaining, Object::Dictionary(dict)))
        },

        _ => Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag))),
    }
}

/// Parse stream data after the `stream` keyword, using /Length when it is a
/// direct integer that lands on `endstream`, otherwise scanning for `endstream`.
fn parse_stream_data<'a>(input: &'a [u8], dict: &Dictionary) -> IResult<&'a [u8], Vec<u8>> {
    let input = if input.starts_with(b"\r\n") {
        &input[2..]
    } else if input.starts_with(b"\n") || input.starts_with(b"\r") {
        &input[1..]
    } else {
        input
    };

    if let Some(length) = dict.get("Length").and_then(|o| o.as_integer()) {
        let length = length.max(0) as usize;
        if length <= input.len() {
            if let Ok((rest, Token::StreamEnd)) = token(&input[length..]) {
                return Ok((rest, input[..length].to_vec()));
            }
        }
        log::debug!("Stream /Length {} does not reach endstream, scanning", length);
    }

    match find_endstream(input) {
        Some(pos) => {
            let mut end = pos;
            // EOL before endstream is not data
            if end > 0 && input[end - 1] == b'\n' {
                end -= 1;
            }
            if end > 0 && input[end - 1] == b'\r' {
                end -= 1;
            }
            Ok((&input[pos + b"endstream".len()..], input[..end].to_vec()))
        },
        None => Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Eof))),
    }
}

fn find_endstream(input: &[u8]) -> Option<usize> {
    let keyword = b"endstream";
    input.windows(keyword.len()).position(|window| window == keyword)
}

/// Parse a PDF array: `[ obj1 obj2 ... objN ]`
fn parse_array(input: &[u8]) -> IResult<&[u8], Object> {
    let mut objects = Vec::new();
    let mut remaining = input;

    loop {
        if let (inp, Token::ArrayEnd) = token(remaining)? {
            return Ok((inp, Object::Array(objects)));
        }
        let (inp, obj) = parse_object(remaining)?;
        objects.push(obj);
        remaining = inp;
    }
}

/// Parse a PDF dictionary: `<< /Key1 value1 /Key2 value2 ... >>`
fn parse_dictionary(input: &[u8]) -> IResult<&[u8], Dictionary> {
    let mut dict = Dictionary::new();
    let mut remaining = input;

    loop {
        let (inp, tok) = token(remaining)?;
        match tok {
            Token::DictEnd => return Ok((inp, dict)),
            Token::Name(key) => {
                let (inp, value) = parse_object(inp)?;
                dict.insert(key, value);
                remaining = inp;
            },
            _ => {
                return Err(nom::Err::Error(nom::error::Error::new(
                    remaining,
                    nom::error::ErrorKind::Tag,
                )));
            },
        }
    }
}

/// Parse an indirect object `N G obj <object> endobj` starting at `offset`.
///
/// Returns the reference, the object and the offset just past `endobj`
/// (or past the object when `endobj` is missing).
pub fn parse_indirect_object(data: &[u8], offset: usize) -> Result<(ObjectRef, Object, usize)> {
    let err = |reason: &str| Error::ParseError {
        offset,
        reason: reason.to_string(),
    };
    let input = data.get(offset..).ok_or_else(|| err("offset beyond end of file"))?;

    let (input, id) = match token(input) {
        Ok((rest, Token::Integer(id))) if id >= 0 => (rest, id as u32),
        _ => return Err(err("expected object number")),
    };
    let (input, gen) = match token(input) {
        Ok((rest, Token::Integer(gen))) if (0..=u16::MAX as i64).contains(&gen) => (rest, gen as u16),
        _ => return Err(err("expected generation number")),
    };
    let input = match token(input) {
        Ok((rest, Token::ObjStart)) => rest,
        _ => return Err(err("expected 'obj' keyword")),
    };

    let (rest, object) = parse_object(input).map_err(|e| err(&format!("invalid object body: {:?}", e.map(|e| e.code))))?;
    let rest = match token(rest) {
        Ok((after, Token::ObjEnd)) => after,
        _ => rest,
    };

    Ok((ObjectRef::new(id, gen), object, data.len() - rest.len()))
}

/// Decode a hex string to bytes; whitespace is ignored and an odd final digit is padded with 0.
///
/// ```
/// use pdf_seal::parser::decode_hex;
/// assert_eq!(decode_hex(b"48656C6C6F").unwrap(), b"Hello");
/// ```
pub fn decode_hex(hex_bytes: &[u8]) -> Result<Vec<u8>> {
    let mut digits: Vec<u8> = hex_bytes
        .iter()
        .filter(|c| !c.is_ascii_whitespace())
        .copied()
        .collect();
    if digits.len() % 2 == 1 {
        digits.push(b'0');
    }
    hex::decode(&digits).map_err(|e| Error::ParseError {
        offset: 0,
        reason: format!("Invalid hex string: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_lookahead() {
        let (_, obj) = parse_object(b"[1 0 R 2 5]").unwrap();
        let arr = obj.as_array().unwrap();
        assert_eq!(arr[0], Object::Reference(ObjectRef::new(1, 0)));
        assert_eq!(arr[1], Object::Integer(2));
        assert_eq!(arr[2], Object::Integer(5));
    }

    #[test]
    fn test_nested_dictionary() {
        let (_, obj) = parse_object(b"<</Perms<</DocMDP 7 0 R>>/Type/Catalog>>").unwrap();
        let dict = obj.as_dict().unwrap();
        let perms = dict["Perms"].as_dict().unwrap();
        assert_eq!(perms["DocMDP"].as_reference(), Some(ObjectRef::new(7, 0)));
    }

    #[test]
    fn test_stream_with_length() {
        let input = b"<< /Length 5 >>\nstream\nHello\nendstream";
        let (_, obj) = parse_object(input).unwrap();
        match obj {
            Object::Stream { data, .. } => assert_eq!(&data[..], b"Hello"),
            other => panic!("expected stream, got {}", other.type_name()),
        }
    }

    #[test]
    fn test_stream_with_indirect_length_scans() {
        let input = b"<< /Length 9 0 R >>\r\nstream\r\nabc\r\nendstream";
        let (_, obj) = parse_object(input).unwrap();
        match obj {
            Object::Stream { data, .. } => assert_eq!(&data[..], b"abc"),
            other => panic!("expected stream, got {}", other.type_name()),
        }
    }

    #[test]
    fn test_indirect_object_envelope() {
        let data = b"junk 12 0 obj\n<< /Type /Sig >>\nendobj\n";
        let (r, obj, end) = parse_indirect_object(data, 5).unwrap();
        assert_eq!(r, ObjectRef::new(12, 0));
        assert_eq!(obj.as_dict().unwrap()["Type"].as_name(), Some("Sig"));
        assert_eq!(&data[end..], b"\n");
    }

    #[test]
    fn test_indirect_object_bad_offset() {
        assert!(matches!(parse_indirect_object(b"<< >>", 0), Err(Error::ParseError { .. })));
    }

    #[test]
    fn test_unclosed_dictionary_is_error() {
        assert!(parse_object(b"<< /Type /Page").is_err());
    }

    #[test]
    fn test_hex_and_escapes() {
        assert_eq!(decode_hex(b"4 8 6").unwrap(), vec![0x48, 0x60]);
        assert_eq!(decode_literal_string_escapes(b"a\\\nb\\101"), b"abA");
    }
}
