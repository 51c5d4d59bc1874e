//! Object stream parsing (PDF 1.5+).
//!
//! An object stream (`/Type /ObjStm`) starts with `/N` pairs of integers
//! `(object number, offset relative to /First)` followed by the objects
//! themselves, without `obj`/`endobj` envelopes.

use crate::error::{Error, Result};
use crate::lexer::{token, Token};
use crate::object::Object;
use crate::parser::parse_object;
use std::collections::HashMap;

/// Parse an object stream and extract all objects, keyed by object number.
pub fn parse_object_stream(stream_obj: &Object) -> Result<HashMap<u32, Object>> {
    let dict = match stream_obj {
        Object::Stream { dict, .. } => dict,
        other => {
            return Err(Error::structural(format!(
                "object stream must be a Stream, found {}",
                other.type_name()
            )));
        },
    };

    if dict.get("Type").and_then(|o| o.as_name()) != Some("ObjStm") {
        return Err(Error::structural("object stream lacks /Type /ObjStm"));
    }
    let count = dict
        .get("N")
        .and_then(|o| o.as_integer())
        .filter(|&n| n >= 0)
        .ok_or_else(|| Error::structural("object stream lacks a valid /N"))? as usize;
    let first = dict
        .get("First")
        .and_then(|o| o.as_integer())
        .filter(|&n| n >= 0)
        .ok_or_else(|| Error::structural("object stream lacks a valid /First"))? as usize;

    let data = stream_obj.decode_stream_data()?;
    if first > data.len() {
        return Err(Error::structural("object stream /First beyond decoded data"));
    }

    let pairs = parse_object_number_pairs(&data[..first], count)?;
    let mut objects = HashMap::with_capacity(count);

    for (obj_num, rel_offset) in pairs {
        let start = first + rel_offset;
        let Some(slice) = data.get(start..) else {
            log::warn!("Object {} offset {} outside object stream", obj_num, start);
            continue;
        };
        match parse_object(slice) {
            Ok((_, obj)) => {
                objects.insert(obj_num, obj);
            },
            Err(e) => log::warn!("Failed to parse object {} in object stream: {:?}", obj_num, e),
        }
    }

    Ok(objects)
}

fn parse_object_number_pairs(header: &[u8], count: usize) -> Result<Vec<(u32, usize)>> {
    let mut pairs = Vec::with_capacity(count.min(4096));
    let mut input = header;

    for _ in 0..count {
        let (rest, num) = match token(input) {
            Ok((rest, Token::Integer(n))) if n >= 0 => (rest, n as u32),
            _ => return Err(Error::structural("malformed object stream header")),
        };
        let (rest, offset) = match token(rest) {
            Ok((rest, Token::Integer(o))) if o >= 0 => (rest, o as usize),
            _ => return Err(Error::structural("malformed object stream header")),
        };
        pairs.push((num, offset));
        input = rest;
    }

    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Dictionary;

    fn objstm(n: i64, first: i64, body: &'static [u8]) -> Object {
        let mut dict = Dictionary::new();
        dict.insert("Type".into(), Object::name("ObjStm"));
        dict.insert("N".into(), Object::Integer(n));
        dict.insert("First".into(), Object::Integer(first));
        Object::Stream {
            dict,
            data: bytes::Bytes::from_static(body),
        }
    }

    #[test]
    fn test_parse_object_stream_basic() {
        let body = b"10 0 11 20 << /Type /Catalog >>   [1 2 3]";
        let objects = parse_object_stream(&objstm(2, 11, body)).unwrap();
        assert_eq!(objects[&10].as_dict().unwrap()["Type"].as_name(), Some("Catalog"));
        assert_eq!(objects[&11].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_parse_object_stream_not_stream() {
        assert!(parse_object_stream(&Object::Integer(1)).is_err());
    }

    #[test]
    fn test_parse_object_stream_short_header() {
        assert!(parse_object_stream(&objstm(3, 5, b"10 0 <<>>")).is_err());
    }
}
