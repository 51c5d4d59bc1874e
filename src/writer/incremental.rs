//! Incremental-update writer.
//!
//! Appends new or replaced objects after the original bytes, followed by a
//! cross-reference section in the same flavour as the source's newest one
//! (classic table or `/Type /XRef` stream) whose trailer links back through
//! `/Prev`. The original bytes are never touched.

use crate::document::PdfStructure;
use crate::error::{Error, Result};
use crate::object::{Dictionary, Object, ObjectRef};
use crate::writer::ObjectSerializer;
use crate::xref::XrefKind;
use rand::RngCore;
use std::collections::BTreeMap;

/// Trailer keys that describe a specific xref section and are never copied forward.
const SECTION_KEYS: &[&str] = &[
    "Prev", "XRefStm", "Size", "Root", "Info", "ID", "Type", "W", "Index", "Filter", "DecodeParms",
    "Length",
];

/// Where an appended object landed in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectPlacement {
    /// Offset of the `N G obj` line
    pub offset: usize,
    /// Offset of the first byte of the object body
    pub body_offset: usize,
}

/// The assembled file.
#[derive(Debug, Clone)]
pub struct UpdatedDocument {
    /// Original bytes followed by the update section
    pub bytes: Vec<u8>,
    /// Placement of every appended object, by object number
    pub placements: BTreeMap<u32, ObjectPlacement>,
    /// Offset of the new cross-reference section
    pub xref_offset: usize,
}

/// Builder for one incremental-update section.
pub struct IncrementalUpdate<'a> {
    base: &'a [u8],
    kind: XrefKind,
    prev_startxref: u64,
    source_trailer: Dictionary,
    objects: Vec<(ObjectRef, Vec<u8>)>,
    serializer: ObjectSerializer,
}

impl<'a> IncrementalUpdate<'a> {
    /// Start an update on top of `doc`.
    pub fn new(doc: &PdfStructure<'a>) -> Self {
        Self {
            base: doc.data(),
            kind: doc.xref_kind(),
            prev_startxref: doc.startxref(),
            source_trailer: doc.trailer().clone(),
            objects: Vec::new(),
            serializer: ObjectSerializer::compact(),
        }
    }

    /// Cross-reference flavour the update will be written in.
    pub fn kind(&self) -> XrefKind {
        self.kind
    }

    /// Append (or replace) an object.
    pub fn add_object(&mut self, obj_ref: ObjectRef, obj: &Object) {
        let body = self.serializer.serialize(obj);
        self.add_raw(obj_ref, body);
    }

    /// Append an object whose body is already serialized.
    pub fn add_raw(&mut self, obj_ref: ObjectRef, body: Vec<u8>) {
        self.objects.retain(|(r, _)| r.id != obj_ref.id);
        self.objects.push((obj_ref, body));
    }

    /// Write the objects, the cross-reference section and the trailer.
    ///
    /// `size` is one past the highest object number in use, including every
    /// appended object. In xref-stream mode the stream itself takes `size` and
    /// the written `/Size` becomes `size + 1`.
    pub fn finish(self, size: u32, root: ObjectRef, info: Option<ObjectRef>) -> Result<UpdatedDocument> {
        if let Some((r, _)) = self.objects.iter().find(|(r, _)| r.id >= size) {
            return Err(Error::structural(format!("object {} is outside /Size {}", r, size)));
        }

        let mut bytes = Vec::with_capacity(self.base.len() + 4096);
        bytes.extend_from_slice(self.base);
        if !matches!(self.base.last(), Some(b'\n') | Some(b'\r')) {
            bytes.push(b'\n');
        }

        let mut placements = BTreeMap::new();
        for (obj_ref, body) in &self.objects {
            let offset = bytes.len();
            bytes.extend_from_slice(format!("{} {} obj\n", obj_ref.id, obj_ref.gen).as_bytes());
            let body_offset = bytes.len();
            bytes.extend_from_slice(body);
            bytes.extend_from_slice(b"\nendobj\n");
            placements.insert(obj_ref.id, ObjectPlacement { offset, body_offset });
        }

        let trailer = self.trailer_dictionary(root, info);
        let xref_offset = bytes.len();
        let mut entries: BTreeMap<u32, (usize, u16)> = self
            .objects
            .iter()
            .map(|(r, _)| (r.id, (placements[&r.id].offset, r.gen)))
            .collect();

        match self.kind {
            XrefKind::Table => {
                write_xref_table(&mut bytes, &entries);
                let mut trailer = trailer;
                trailer.insert("Size".into(), Object::Integer(size as i64));
                bytes.extend_from_slice(b"trailer\n");
                self.serializer.write_object(&mut bytes, &Object::Dictionary(reorder(trailer)));
                bytes.push(b'\n');
            },
            XrefKind::Stream => {
                let stream_id = size;
                entries.insert(stream_id, (xref_offset, 0));
                let (w, rows, index) = encode_xref_stream(&entries);

                let mut dict = Dictionary::new();
                dict.insert("Type".into(), Object::name("XRef"));
                dict.insert("Size".into(), Object::Integer(size as i64 + 1));
                dict.insert("Index".into(), Object::Array(index.into_iter().map(Object::Integer).collect()));
                dict.insert("W".into(), Object::Array(w.iter().map(|&n| Object::Integer(n as i64)).collect()));
                for (k, v) in reorder(trailer) {
                    dict.insert(k, v);
                }
                let stream = Object::Stream {
                    dict,
                    data: bytes::Bytes::from(rows),
                };
                bytes.extend_from_slice(&self.serializer.serialize_indirect(stream_id, 0, &stream));
                placements.insert(
                    stream_id,
                    ObjectPlacement {
                        offset: xref_offset,
                        body_offset: xref_offset + format!("{} 0 obj\n", stream_id).len(),
                    },
                );
            },
        }

        bytes.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref_offset).as_bytes());
        log::debug!(
            "Incremental update: {} object(s), {:?} xref at {}, {} bytes total",
            self.objects.len(),
            self.kind,
            xref_offset,
            bytes.len()
        );

        Ok(UpdatedDocument {
            bytes,
            placements,
            xref_offset,
        })
    }

    fn trailer_dictionary(&self, root: ObjectRef, info: Option<ObjectRef>) -> Dictionary {
        let mut trailer: Dictionary = self
            .source_trailer
            .iter()
            .filter(|(k, _)| !SECTION_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        trailer.insert("Root".into(), root.into());
        if let Some(info) = info.or_else(|| self.source_trailer.get("Info").and_then(|o| o.as_reference())) {
            trailer.insert("Info".into(), info.into());
        }
        trailer.insert("Prev".into(), Object::Integer(self.prev_startxref as i64));
        trailer.insert("ID".into(), updated_file_id(self.source_trailer.get("ID")));
        trailer
    }
}

/// Put `/Size` (when present) first, then the usual trailer keys, then the rest.
fn reorder(trailer: Dictionary) -> Dictionary {
    let order = ["Size", "Root", "Info", "Prev", "ID"];
    let mut out = Dictionary::new();
    for key in order {
        if let Some(v) = trailer.get(key) {
            out.insert(key.to_string(), v.clone());
        }
    }
    for (k, v) in trailer {
        if !out.contains_key(&k) {
            out.insert(k, v);
        }
    }
    out
}

/// Keep the permanent identifier, refresh the changing one.
fn updated_file_id(existing: Option<&Object>) -> Object {
    let mut fresh = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut fresh);

    let permanent = existing
        .and_then(|o| o.as_array())
        .and_then(|a| a.first())
        .and_then(|o| o.as_string())
        .map(|s| s.to_vec())
        .unwrap_or_else(|| fresh.to_vec());

    Object::Array(vec![Object::String(permanent), Object::String(fresh.to_vec())])
}

/// Split ascending object numbers into contiguous `(first, count)` runs.
fn subsections(entries: &BTreeMap<u32, (usize, u16)>) -> Vec<(u32, Vec<(usize, u16)>)> {
    let mut runs: Vec<(u32, Vec<(usize, u16)>)> = Vec::new();
    for (&id, &entry) in entries {
        match runs.last_mut() {
            Some((first, run)) if *first + run.len() as u32 == id => run.push(entry),
            _ => runs.push((id, vec![entry])),
        }
    }
    runs
}

fn write_xref_table(out: &mut Vec<u8>, entries: &BTreeMap<u32, (usize, u16)>) {
    out.extend_from_slice(b"xref\n");
    for (first, run) in subsections(entries) {
        out.extend_from_slice(format!("{} {}\n", first, run.len()).as_bytes());
        for (offset, gen) in run {
            out.extend_from_slice(format!("{:010} {:05} n\r\n", offset, gen).as_bytes());
        }
    }
}

/// Rows, `/W` and `/Index` for an unfiltered xref stream.
fn encode_xref_stream(entries: &BTreeMap<u32, (usize, u16)>) -> ([usize; 3], Vec<u8>, Vec<i64>) {
    let max_offset = entries.values().map(|(o, _)| *o).max().unwrap_or(0) as u64;
    let offset_width = (((64 - max_offset.leading_zeros()) as usize).div_ceil(8)).max(1);
    let w = [1, offset_width, 2];

    let mut rows = Vec::with_capacity(entries.len() * (3 + offset_width));
    let mut index = Vec::new();
    for (first, run) in subsections(entries) {
        index.push(first as i64);
        index.push(run.len() as i64);
        for (offset, gen) in run {
            rows.push(1);
            rows.extend_from_slice(&(offset as u64).to_be_bytes()[8 - offset_width..]);
            rows.extend_from_slice(&gen.to_be_bytes());
        }
    }
    (w, rows, index)
}
