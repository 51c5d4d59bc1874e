//! Cross-reference parsing.
//!
//! Reads classic `xref` tables, cross-reference streams (PDF 1.5+) and hybrid
//! files whose trailer carries `/XRefStm`, following `/Prev` through every
//! incremental update. The flavour of the newest section is recorded so that
//! a further update can be written in the same flavour.

use crate::error::{Error, Result};
use crate::lexer::{token, Token};
use crate::object::{Dictionary, Object};
use crate::parser::{parse_indirect_object, parse_object};
use std::collections::{HashMap, HashSet};

const MAX_PREV_DEPTH: u32 = 100;
const MAX_SUBSECTION_COUNT: i64 = 10_000_000;

/// Cross-reference table entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefEntryType {
    /// Entry for a free object
    Free,
    /// Entry for an uncompressed object at a byte offset
    Uncompressed,
    /// Entry for an object inside an object stream
    Compressed,
}

/// Cross-reference table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XRefEntry {
    /// Type of entry
    pub entry_type: XRefEntryType,
    /// Byte offset (uncompressed) or object stream number (compressed)
    pub offset: u64,
    /// Generation number (uncompressed) or index within stream (compressed)
    pub generation: u16,
}

impl XRefEntry {
    /// Create a new uncompressed entry.
    pub fn uncompressed(offset: u64, generation: u16) -> Self {
        Self {
            entry_type: XRefEntryType::Uncompressed,
            offset,
            generation,
        }
    }

    /// Create a new compressed entry (object in object stream).
    pub fn compressed(stream_obj_num: u64, index_in_stream: u16) -> Self {
        Self {
            entry_type: XRefEntryType::Compressed,
            offset: stream_obj_num,
            generation: index_in_stream,
        }
    }

    /// Create a new free entry.
    pub fn free(next_free: u64, generation: u16) -> Self {
        Self {
            entry_type: XRefEntryType::Free,
            offset: next_free,
            generation,
        }
    }

    /// Whether the entry describes a live object.
    pub fn in_use(&self) -> bool {
        self.entry_type != XRefEntryType::Free
    }
}

/// Flavour of a cross-reference section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum XrefKind {
    /// Classic `xref` table followed by a `trailer` dictionary
    Table,
    /// Cross-reference stream (`/Type /XRef`)
    Stream,
}

/// Cross-reference table that maps object numbers to their locations.
#[derive(Debug, Clone)]
pub struct CrossRefTable {
    entries: HashMap<u32, XRefEntry>,
    trailer: Option<Dictionary>,
    kind: XrefKind,
    section_count: usize,
}

impl CrossRefTable {
    /// Create a new empty cross-reference table.
    pub fn new(kind: XrefKind) -> Self {
        Self {
            entries: HashMap::new(),
            trailer: None,
            kind,
            section_count: 1,
        }
    }

    /// Trailer of the newest section (for xref streams, the stream dictionary).
    pub fn trailer(&self) -> Option<&Dictionary> {
        self.trailer.as_ref()
    }

    /// Flavour of the newest section.
    pub fn kind(&self) -> XrefKind {
        self.kind
    }

    /// Number of sections merged (1 + number of incremental updates seen).
    pub fn section_count(&self) -> usize {
        self.section_count
    }

    /// Add an entry, replacing any previous one.
    pub fn add_entry(&mut self, object_number: u32, entry: XRefEntry) {
        self.entries.insert(object_number, entry);
    }

    /// Get an entry by object number.
    pub fn get(&self, object_number: u32) -> Option<&XRefEntry> {
        self.entries.get(&object_number)
    }

    /// All object numbers with in-use entries, ascending.
    pub fn live_object_numbers(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .entries
            .iter()
            .filter(|(_, e)| e.in_use())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Largest object number present (free or not).
    pub fn max_object_number(&self) -> u32 {
        self.entries.keys().copied().max().unwrap_or(0)
    }

    /// Merge an older section; entries already present win.
    fn merge_older(&mut self, older: CrossRefTable) {
        for (obj_num, entry) in older.entries {
            self.entries.entry(obj_num).or_insert(entry);
        }
        if self.trailer.is_none() {
            self.trailer = older.trailer;
        }
        self.section_count += older.section_count;
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Find the offset recorded after the last `startxref` keyword.
pub fn find_xref_offset(data: &[u8]) -> Result<u64> {
    let tail_start = data.len().saturating_sub(2048);
    let tail = &data[tail_start..];
    let keyword = b"startxref";
    let pos = tail
        .windows(keyword.len())
        .rposition(|w| w == keyword)
        .ok_or(Error::InvalidXref)?;

    match token(&tail[pos + keyword.len()..]) {
        Ok((_, Token::Integer(offset))) if offset >= 0 => Ok(offset as u64),
        _ => Err(Error::InvalidXref),
    }
}

/// Parse the cross-reference chain starting at `offset`.
pub fn parse_xref(data: &[u8], offset: u64) -> Result<CrossRefTable> {
    let mut visited = HashSet::new();
    parse_xref_recursive(data, offset, 0, &mut visited)
}

fn parse_xref_recursive(
    data: &[u8],
    offset: u64,
    depth: u32,
    visited: &mut HashSet<u64>,
) -> Result<CrossRefTable> {
    if depth > MAX_PREV_DEPTH || !visited.insert(offset) {
        return Err(Error::structural("circular or excessively deep /Prev chain"));
    }

    let start = usize::try_from(offset)
        .ok()
        .filter(|&o| o < data.len())
        .ok_or(Error::InvalidXref)?;
    let mut at = start;
    while at < data.len() && crate::lexer::is_whitespace(data[at]) {
        at += 1;
    }

    let mut xref = if data[at..].starts_with(b"xref") {
        log::debug!("Classic xref table at offset {}", offset);
        let mut table = parse_traditional_xref(data, at)?;
        // hybrid-reference file
        if let Some(stm) = table
            .trailer()
            .and_then(|t| t.get("XRefStm"))
            .and_then(|o| o.as_integer())
        {
            match parse_xref_stream(data, stm as usize) {
                Ok(stream) => {
                    for (id, entry) in stream.entries {
                        table.entries.entry(id).or_insert(entry);
                    }
                },
                Err(e) => log::warn!("Ignoring unreadable /XRefStm at {}: {}", stm, e),
            }
        }
        table
    } else {
        log::debug!("Cross-reference stream at offset {}", offset);
        parse_xref_stream(data, at)?
    };

    let prev = xref
        .trailer()
        .and_then(|t| t.get("Prev"))
        .and_then(|o| o.as_integer());
    if let Some(prev) = prev {
        if prev < 0 {
            return Err(Error::InvalidXref);
        }
        let older = parse_xref_recursive(data, prev as u64, depth + 1, visited)?;
        xref.merge_older(older);
    }

    Ok(xref)
}

/// Parse a classic `xref` table and its trailer.
fn parse_traditional_xref(data: &[u8], at: usize) -> Result<CrossRefTable> {
    let mut xref = CrossRefTable::new(XrefKind::Table);
    let mut input = &data[at + b"xref".len()..];

    let int = |input: &[u8]| -> Result<(usize, i64)> {
        match token(input) {
            Ok((rest, Token::Integer(v))) => Ok((input.len() - rest.len(), v)),
            _ => Err(Error::InvalidXref),
        }
    };

    loop {
        match token(input) {
            Ok((rest, Token::Keyword(b"trailer"))) => {
                let (_, trailer) = parse_object(rest).map_err(|_| Error::structural("unreadable trailer dictionary"))?;
                match trailer {
                    Object::Dictionary(d) => xref.trailer = Some(d),
                    _ => return Err(Error::structural("trailer is not a dictionary")),
                }
                return Ok(xref);
            },
            Ok((_, Token::Integer(_))) => {},
            _ => return Err(Error::InvalidXref),
        }

        let (used, first) = int(input)?;
        input = &input[used..];
        let (used, count) = int(input)?;
        input = &input[used..];
        if !(0..=MAX_SUBSECTION_COUNT).contains(&count) || first < 0 {
            return Err(Error::InvalidXref);
        }

        for i in 0..count {
            let (used, offset) = int(input)?;
            input = &input[used..];
            let (used, gen) = int(input)?;
            input = &input[used..];
            let (rest, flag) = token(input).map_err(|_| Error::InvalidXref)?;
            input = rest;

            let entry = match flag {
                Token::Keyword(b"n") => XRefEntry::uncompressed(offset as u64, gen as u16),
                Token::Keyword(b"f") => XRefEntry::free(offset as u64, gen as u16),
                _ => return Err(Error::InvalidXref),
            };
            xref.add_entry((first + i) as u32, entry);
        }
    }
}

/// Parse a cross-reference stream object at `at`.
fn parse_xref_stream(data: &[u8], at: usize) -> Result<CrossRefTable> {
    let (_, obj, _) = parse_indirect_object(data, at)?;
    let (dict, _) = match &obj {
        Object::Stream { dict, data } => (dict, data),
        _ => return Err(Error::structural("xref stream is not a stream object")),
    };

    if dict.get("Type").and_then(|o| o.as_name()) != Some("XRef") {
        return Err(Error::structural("expected /Type /XRef"));
    }

    let widths: Vec<usize> = dict
        .get("W")
        .and_then(|o| o.as_array())
        .map(|w| w.iter().filter_map(|o| o.as_integer()).map(|i| i.max(0) as usize).collect())
        .unwrap_or_default();
    if widths.len() != 3 || widths.iter().any(|&w| w > 8) {
        return Err(Error::structural("invalid /W array in xref stream"));
    }
    let entry_size: usize = widths.iter().sum();
    if entry_size == 0 {
        return Err(Error::structural("zero-width xref stream entries"));
    }

    let size = dict
        .get("Size")
        .and_then(|o| o.as_integer())
        .ok_or_else(|| Error::structural("missing /Size in xref stream"))?;

    let ranges: Vec<(i64, i64)> = match dict.get("Index").and_then(|o| o.as_array()) {
        Some(index) => index
            .chunks(2)
            .filter_map(|pair| Some((pair.first()?.as_integer()?, pair.get(1)?.as_integer()?)))
            .collect(),
        None => vec![(0, size)],
    };

    let decoded = obj.decode_stream_data()?;
    let mut xref = CrossRefTable::new(XrefKind::Stream);
    let mut rows = decoded.chunks_exact(entry_size);

    for (first, count) in ranges {
        if first < 0 || !(0..=MAX_SUBSECTION_COUNT).contains(&count) {
            return Err(Error::InvalidXref);
        }
        for i in 0..count {
            let row = rows.next().ok_or_else(|| Error::structural("truncated xref stream data"))?;
            let (f1, rest) = row.split_at(widths[0]);
            let (f2, f3) = rest.split_at(widths[1]);
            let entry_type = if widths[0] == 0 { 1 } else { read_int(f1) };
            let field2 = read_int(f2);
            let field3 = read_int(f3);

            let entry = match entry_type {
                0 => XRefEntry::free(field2, field3 as u16),
                1 => XRefEntry::uncompressed(field2, field3 as u16),
                2 => XRefEntry::compressed(field2, field3 as u16),
                // unknown types are treated as null references
                _ => continue,
            };
            xref.add_entry((first + i) as u32, entry);
        }
    }

    xref.trailer = Some(dict.clone());
    Ok(xref)
}

/// Read a big-endian integer from a byte slice.
fn read_int(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLASSIC: &[u8] = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\nxref\n0 2\n0000000000 65535 f \n0000000009 00000 n \ntrailer\n<< /Size 2 /Root 1 0 R >>\nstartxref\n45\n%%EOF\n";

    #[test]
    fn test_find_xref_offset() {
        assert_eq!(find_xref_offset(CLASSIC).unwrap(), 45);
        assert!(matches!(find_xref_offset(b"%PDF-1.4\n%%EOF"), Err(Error::InvalidXref)));
    }

    #[test]
    fn test_parse_classic_table() {
        let xref = parse_xref(CLASSIC, 45).unwrap();
        assert_eq!(xref.kind(), XrefKind::Table);
        assert_eq!(xref.get(1), Some(&XRefEntry::uncompressed(9, 0)));
        assert!(!xref.get(0).unwrap().in_use());
        assert_eq!(xref.trailer().unwrap()["Size"].as_integer(), Some(2));
        assert_eq!(xref.live_object_numbers(), vec![1]);
    }

    #[test]
    fn test_parse_xref_stream() {
        // W [1 2 1]: obj 0 free, obj 1 at 9, obj 2 in objstm 5 index 0
        let mut data = b"%PDF-1.5\n".to_vec();
        let rows: Vec<u8> = vec![0, 0, 0, 255, 1, 0, 9, 0, 2, 0, 5, 0];
        let offset = data.len();
        data.extend_from_slice(
            format!("7 0 obj\n<< /Type /XRef /Size 3 /W [1 2 1] /Length {} >>\nstream\n", rows.len()).as_bytes(),
        );
        data.extend_from_slice(&rows);
        data.extend_from_slice(b"\nendstream\nendobj\n");

        let xref = parse_xref(&data, offset as u64).unwrap();
        assert_eq!(xref.kind(), XrefKind::Stream);
        assert_eq!(xref.get(1), Some(&XRefEntry::uncompressed(9, 0)));
        assert_eq!(xref.get(2), Some(&XRefEntry::compressed(5, 0)));
    }

    #[test]
    fn test_circular_prev_is_rejected() {
        let data = b"xref\n0 1\n0000000000 65535 f \ntrailer\n<< /Size 1 /Prev 0 >>\n";
        assert!(parse_xref(data, 0).is_err());
    }

    #[test]
    fn test_bad_flag_is_invalid() {
        let data = b"xref\n0 1\n0000000000 65535 x \ntrailer\n<< /Size 1 >>\n";
        assert!(matches!(parse_xref(data, 0), Err(Error::InvalidXref)));
    }
}
