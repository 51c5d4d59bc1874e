//! PDF object serialization.
//!
//! Dictionaries are written in insertion order, so a dictionary read from
//! the source and written back keeps its key layout.

use crate::object::{Dictionary, Object};

/// Serializer for PDF objects.
#[derive(Debug, Clone, Default)]
pub struct ObjectSerializer {
    /// Whether to use compact formatting (minimal whitespace)
    compact: bool,
}

impl ObjectSerializer {
    /// Create a new object serializer with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a compact serializer (minimal whitespace).
    pub fn compact() -> Self {
        Self { compact: true }
    }

    /// Serialize an object to bytes.
    pub fn serialize(&self, obj: &Object) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_object(&mut buf, obj);
        buf
    }

    /// Serialize an indirect object definition: `{id} {gen} obj\n{object}\nendobj\n`.
    pub fn serialize_indirect(&self, id: u32, gen: u16, obj: &Object) -> Vec<u8> {
        let mut buf = format!("{} {} obj\n", id, gen).into_bytes();
        self.write_object(&mut buf, obj);
        buf.extend_from_slice(b"\nendobj\n");
        buf
    }

    /// Write an object to a buffer.
    pub fn write_object(&self, w: &mut Vec<u8>, obj: &Object) {
        match obj {
            Object::Null => w.extend_from_slice(b"null"),
            Object::Boolean(b) => w.extend_from_slice(if *b { b"true" } else { b"false" }),
            Object::Integer(i) => w.extend_from_slice(i.to_string().as_bytes()),
            Object::Real(r) => write_real(w, *r),
            Object::String(s) => write_string(w, s),
            Object::Name(n) => write_name(w, n),
            Object::Array(arr) => self.write_array(w, arr),
            Object::Dictionary(dict) => self.write_dictionary(w, dict),
            Object::Stream { dict, data } => self.write_stream(w, dict, data),
            Object::Reference(r) => w.extend_from_slice(format!("{} {} R", r.id, r.gen).as_bytes()),
        }
    }

    fn write_array(&self, w: &mut Vec<u8>, arr: &[Object]) {
        w.push(b'[');
        for (i, obj) in arr.iter().enumerate() {
            if i > 0 {
                w.push(b' ');
            }
            self.write_object(w, obj);
        }
        w.push(b']');
    }

    /// Write the `/Key value` pairs of a dictionary without the `<<` `>>` brackets.
    pub fn write_dictionary_entries(&self, w: &mut Vec<u8>, dict: &Dictionary) {
        for (key, value) in dict {
            if !self.compact {
                w.extend_from_slice(b"\n  ");
            }
            write_name(w, key);
            w.push(b' ');
            self.write_object(w, value);
        }
    }

    fn write_dictionary(&self, w: &mut Vec<u8>, dict: &Dictionary) {
        w.extend_from_slice(b"<<");
        self.write_dictionary_entries(w, dict);
        if !self.compact && !dict.is_empty() {
            w.push(b'\n');
        }
        w.extend_from_slice(b">>");
    }

    fn write_stream(&self, w: &mut Vec<u8>, dict: &Dictionary, data: &[u8]) {
        let mut dict = dict.clone();
        dict.insert("Length".to_string(), Object::Integer(data.len() as i64));
        self.write_dictionary(w, &dict);
        w.extend_from_slice(b"\nstream\n");
        w.extend_from_slice(data);
        w.extend_from_slice(b"\nendstream");
    }
}

fn write_real(w: &mut Vec<u8>, value: f64) {
    if value.fract() == 0.0 {
        w.extend_from_slice((value as i64).to_string().as_bytes());
    } else {
        let formatted = format!("{:.5}", value);
        let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
        w.extend_from_slice(trimmed.as_bytes());
    }
}

/// Write a PDF string: literal `(...)` for printable ASCII, hex `<...>` otherwise.
fn write_string(w: &mut Vec<u8>, data: &[u8]) {
    let is_printable = data
        .iter()
        .all(|&b| b == b'\n' || b == b'\r' || b == b'\t' || (0x20..=0x7E).contains(&b));

    if is_printable {
        w.push(b'(');
        for &byte in data {
            match byte {
                b'(' => w.extend_from_slice(b"\\("),
                b')' => w.extend_from_slice(b"\\)"),
                b'\\' => w.extend_from_slice(b"\\\\"),
                b'\n' => w.extend_from_slice(b"\\n"),
                b'\r' => w.extend_from_slice(b"\\r"),
                b'\t' => w.extend_from_slice(b"\\t"),
                _ => w.push(byte),
            }
        }
        w.push(b')');
    } else {
        w.push(b'<');
        w.extend_from_slice(hex::encode_upper(data).as_bytes());
        w.push(b'>');
    }
}

/// Write a PDF name, escaping delimiters, whitespace and non-ASCII as `#xx`.
fn write_name(w: &mut Vec<u8>, name: &str) {
    w.push(b'/');
    for byte in name.bytes() {
        match byte {
            b'!'..=b'~' if !crate::lexer::is_delimiter(byte) && byte != b'#' => w.push(byte),
            _ => w.extend_from_slice(format!("#{:02X}", byte).as_bytes()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectRef;
    use crate::parser::parse_object;

    fn ser(obj: &Object) -> String {
        ObjectSerializer::compact().serialize_to_string(obj)
    }

    impl ObjectSerializer {
        fn serialize_to_string(&self, obj: &Object) -> String {
            String::from_utf8_lossy(&self.serialize(obj)).to_string()
        }
    }

    #[test]
    fn test_primitives() {
        assert_eq!(ser(&Object::Null), "null");
        assert_eq!(ser(&Object::Integer(-7)), "-7");
        assert_eq!(ser(&Object::Real(0.25)), "0.25");
        assert_eq!(ser(&Object::Real(3.0)), "3");
        assert_eq!(ser(&Object::Reference(ObjectRef::new(4, 0))), "4 0 R");
    }

    #[test]
    fn test_strings_and_names() {
        assert_eq!(ser(&Object::string("a(b)\\")), "(a\\(b\\)\\\\)");
        assert_eq!(ser(&Object::String(vec![0xFE, 0xFF, 0x00, 0x41])), "<FEFF0041>");
        assert_eq!(ser(&Object::name("adbe.pkcs7.detached")), "/adbe.pkcs7.detached");
        assert_eq!(ser(&Object::name("A B")), "/A#20B");
        assert_eq!(ser(&Object::name("1.2")), "/1.2");
    }

    #[test]
    fn test_dictionary_order_is_preserved() {
        let mut dict = Dictionary::new();
        dict.insert("Type".into(), Object::name("Sig"));
        dict.insert("Filter".into(), Object::name("Adobe.PPKLite"));
        assert_eq!(ser(&Object::Dictionary(dict)), "<</Type /Sig/Filter /Adobe.PPKLite>>");
    }

    #[test]
    fn test_serialized_objects_parse_back() {
        let mut inner = Dictionary::new();
        inner.insert("P".into(), Object::Integer(2));
        inner.insert("V".into(), Object::name("1.2"));
        let mut dict = Dictionary::new();
        dict.insert("TransformParams".into(), Object::Dictionary(inner));
        dict.insert("Name".into(), Object::string("Jane (QA)"));
        let obj = Object::Dictionary(dict);

        for serializer in [ObjectSerializer::new(), ObjectSerializer::compact()] {
            let bytes = serializer.serialize(&obj);
            let (_, parsed) = parse_object(&bytes).unwrap();
            assert_eq!(parsed, obj);
        }
    }

    #[test]
    fn test_indirect_envelope() {
        let bytes = ObjectSerializer::compact().serialize_indirect(9, 0, &Object::Integer(1));
        assert_eq!(bytes, b"9 0 obj\n1\nendobj\n");
    }
}
