//! PDF structure reader.
//!
//! [`PdfStructure`] borrows the raw bytes of a document and exposes what the
//! signer and verifier need: the merged cross-reference table, the trailer,
//! object loading (plain and from object streams), the catalog, the first
//! page, the AcroForm signature fields and the DocMDP permission.

use crate::error::{Error, Result};
use crate::object::{Dictionary, Object, ObjectRef};
use crate::objstm::parse_object_stream;
use crate::parser::parse_indirect_object;
use crate::signatures::DocMdpPermission;
use crate::xref::{find_xref_offset, parse_xref, CrossRefTable, XRefEntryType, XrefKind};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

/// Maximum depth when following references, page trees and field kids.
const MAX_RECURSION_DEPTH: usize = 64;

/// A signature dictionary found in a document.
#[derive(Debug, Clone)]
pub struct SignatureDictionary {
    /// Indirect reference of the signature dictionary, when it is not inline.
    pub sig_ref: Option<ObjectRef>,
    /// Signature field that points at it, when one exists.
    pub field_ref: Option<ObjectRef>,
    /// Fully qualified field name (`/T` values joined by '.').
    pub field_name: Option<String>,
    /// The signature dictionary itself.
    pub dict: Dictionary,
}

impl SignatureDictionary {
    /// The `/ByteRange` array as integers, when well-formed.
    pub fn byte_range(&self) -> Option<Vec<i64>> {
        self.dict
            .get("ByteRange")
            .and_then(|o| o.as_array())
            .map(|arr| arr.iter().filter_map(|o| o.as_integer()).collect())
    }
}

/// Read-only view of a PDF's object graph.
pub struct PdfStructure<'a> {
    data: &'a [u8],
    version: (u8, u8),
    xref: CrossRefTable,
    trailer: Dictionary,
    startxref: u64,
    objstm_cache: RefCell<HashMap<u32, HashMap<u32, Object>>>,
}

impl<'a> std::fmt::Debug for PdfStructure<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfStructure")
            .field("len", &self.data.len())
            .field("version", &self.version)
            .field("xref_kind", &self.xref.kind())
            .field("objects", &self.xref.len())
            .field("startxref", &self.startxref)
            .finish()
    }
}

impl<'a> PdfStructure<'a> {
    /// Parse header, xref chain and trailer.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let version = parse_header(data)?;
        let startxref = find_xref_offset(data)?;
        let xref = parse_xref(data, startxref)?;
        let trailer = xref
            .trailer()
            .cloned()
            .ok_or_else(|| Error::structural("missing trailer dictionary"))?;

        if trailer.get("Root").and_then(|o| o.as_reference()).is_none() {
            return Err(Error::structural("trailer has no /Root reference"));
        }

        log::debug!(
            "Parsed PDF {}.{}: {} xref entries, {} section(s), newest is {:?}",
            version.0,
            version.1,
            xref.len(),
            xref.section_count(),
            xref.kind()
        );

        Ok(Self {
            data,
            version,
            xref,
            trailer,
            startxref,
            objstm_cache: RefCell::new(HashMap::new()),
        })
    }

    /// Raw document bytes.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Header version (major, minor).
    pub fn version(&self) -> (u8, u8) {
        self.version
    }

    /// Trailer of the newest cross-reference section.
    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    /// Offset of the newest cross-reference section.
    pub fn startxref(&self) -> u64 {
        self.startxref
    }

    /// Flavour of the newest cross-reference section.
    pub fn xref_kind(&self) -> XrefKind {
        self.xref.kind()
    }

    /// Merged cross-reference table.
    pub fn xref(&self) -> &CrossRefTable {
        &self.xref
    }

    /// Whether the trailer carries an `/Encrypt` entry.
    pub fn is_encrypted(&self) -> bool {
        self.trailer.contains_key("Encrypt")
    }

    /// First object number not used by the document.
    pub fn next_object_number(&self) -> u32 {
        let size = self
            .trailer
            .get("Size")
            .and_then(|o| o.as_integer())
            .unwrap_or(0)
            .max(0) as u32;
        size.max(self.xref.max_object_number() + 1)
    }

    /// `/Root` reference.
    pub fn root_ref(&self) -> Result<ObjectRef> {
        self.trailer
            .get("Root")
            .and_then(|o| o.as_reference())
            .ok_or_else(|| Error::structural("trailer has no /Root reference"))
    }

    /// `/Info` reference, if any.
    pub fn info_ref(&self) -> Option<ObjectRef> {
        self.trailer.get("Info").and_then(|o| o.as_reference())
    }

    /// Document information dictionary, empty when absent or unreadable.
    pub fn info(&self) -> Dictionary {
        self.trailer
            .get("Info")
            .and_then(|o| self.resolve(o).ok())
            .and_then(|o| o.as_dict().cloned())
            .unwrap_or_default()
    }

    /// Document catalog.
    pub fn catalog(&self) -> Result<Dictionary> {
        let root = self.root_ref()?;
        match self.load_object(root)? {
            Object::Dictionary(d) => Ok(d),
            other => Err(Error::structural(format!(
                "catalog {} is a {}, not a dictionary",
                root,
                other.type_name()
            ))),
        }
    }

    /// Load an indirect object through the cross-reference table.
    pub fn load_object(&self, obj_ref: ObjectRef) -> Result<Object> {
        let entry = self
            .xref
            .get(obj_ref.id)
            .filter(|e| e.in_use())
            .ok_or(Error::ObjectNotFound(obj_ref.id, obj_ref.gen))?;

        match entry.entry_type {
            XRefEntryType::Uncompressed => {
                let offset = usize::try_from(entry.offset)
                    .map_err(|_| Error::ObjectNotFound(obj_ref.id, obj_ref.gen))?;
                let (found, object, _) = parse_indirect_object(self.data, offset)?;
                if found.id != obj_ref.id {
                    return Err(Error::ParseError {
                        offset,
                        reason: format!("expected object {}, found {}", obj_ref, found),
                    });
                }
                Ok(object)
            },
            XRefEntryType::Compressed => self.load_compressed(obj_ref, entry.offset as u32),
            XRefEntryType::Free => Err(Error::ObjectNotFound(obj_ref.id, obj_ref.gen)),
        }
    }

    fn load_compressed(&self, obj_ref: ObjectRef, stream_id: u32) -> Result<Object> {
        if let Some(objects) = self.objstm_cache.borrow().get(&stream_id) {
            return objects
                .get(&obj_ref.id)
                .cloned()
                .ok_or(Error::ObjectNotFound(obj_ref.id, obj_ref.gen));
        }

        let stream_ref = ObjectRef::new(stream_id, 0);
        let stream_entry = self.xref.get(stream_id);
        if stream_entry.map(|e| e.entry_type) != Some(XRefEntryType::Uncompressed) {
            return Err(Error::structural(format!(
                "object stream {} is not an uncompressed object",
                stream_ref
            )));
        }

        let objects = parse_object_stream(&self.load_object(stream_ref)?)?;
        let result = objects
            .get(&obj_ref.id)
            .cloned()
            .ok_or(Error::ObjectNotFound(obj_ref.id, obj_ref.gen));
        self.objstm_cache.borrow_mut().insert(stream_id, objects);
        result
    }

    /// Follow references until a direct object is reached.
    pub fn resolve(&self, obj: &Object) -> Result<Object> {
        let mut current = obj.clone();
        for _ in 0..MAX_RECURSION_DEPTH {
            match current {
                Object::Reference(r) => current = self.load_object(r)?,
                other => return Ok(other),
            }
        }
        Err(Error::structural("reference chain too deep"))
    }

    /// Resolve `key` in `dict` to a dictionary, if present.
    pub fn resolve_dict(&self, dict: &Dictionary, key: &str) -> Result<Option<Dictionary>> {
        match dict.get(key) {
            None => Ok(None),
            Some(value) => Ok(self.resolve(value)?.as_dict().cloned()),
        }
    }

    /// First page of the page tree, with its reference.
    pub fn first_page(&self) -> Result<(ObjectRef, Dictionary)> {
        let catalog = self.catalog()?;
        let mut node_ref = catalog
            .get("Pages")
            .and_then(|o| o.as_reference())
            .ok_or_else(|| Error::structural("catalog has no /Pages reference"))?;

        for _ in 0..MAX_RECURSION_DEPTH {
            let node = self
                .load_object(node_ref)?
                .as_dict()
                .cloned()
                .ok_or_else(|| Error::structural("page tree node is not a dictionary"))?;

            let is_leaf = match node.get("Type").and_then(|o| o.as_name()) {
                Some("Page") => true,
                Some("Pages") => false,
                _ => !node.contains_key("Kids"),
            };
            if is_leaf {
                return Ok((node_ref, node));
            }

            let kids = match node.get("Kids") {
                Some(kids) => self.resolve(kids)?,
                None => return Err(Error::structural("page tree node has no /Kids")),
            };
            node_ref = kids
                .as_array()
                .and_then(|k| k.first())
                .and_then(|o| o.as_reference())
                .ok_or_else(|| Error::structural("document has no pages"))?;
        }

        Err(Error::structural("page tree too deep"))
    }

    /// The AcroForm dictionary and, if it is indirect, its reference.
    pub fn acroform(&self) -> Result<Option<(Option<ObjectRef>, Dictionary)>> {
        let catalog = self.catalog()?;
        match catalog.get("AcroForm") {
            None => Ok(None),
            Some(Object::Reference(r)) => {
                let dict = self
                    .load_object(*r)?
                    .as_dict()
                    .cloned()
                    .ok_or_else(|| Error::structural("/AcroForm is not a dictionary"))?;
                Ok(Some((Some(*r), dict)))
            },
            Some(Object::Dictionary(d)) => Ok(Some((None, d.clone()))),
            Some(other) => Err(Error::structural(format!("/AcroForm is a {}", other.type_name()))),
        }
    }

    /// Signature fields reachable from `/AcroForm /Fields`, depth first.
    pub fn signature_fields(&self) -> Result<Vec<SignatureDictionary>> {
        let mut found = Vec::new();
        let Some((_, acroform)) = self.acroform()? else {
            return Ok(found);
        };
        let fields = match acroform.get("Fields") {
            Some(f) => self.resolve(f)?,
            None => return Ok(found),
        };

        let mut seen = HashSet::new();
        if let Some(fields) = fields.as_array() {
            for field in fields {
                self.collect_signature_fields(field, None, None, 0, &mut seen, &mut found)?;
            }
        }
        Ok(found)
    }

    fn collect_signature_fields(
        &self,
        field: &Object,
        parent_name: Option<&str>,
        inherited_ft: Option<&str>,
        depth: usize,
        seen: &mut HashSet<ObjectRef>,
        found: &mut Vec<SignatureDictionary>,
    ) -> Result<()> {
        if depth > MAX_RECURSION_DEPTH {
            return Err(Error::structural("form field tree too deep"));
        }
        let field_ref = field.as_reference();
        if let Some(r) = field_ref {
            if !seen.insert(r) {
                return Ok(());
            }
        }
        let resolved = self.resolve(field)?;
        let Some(dict) = resolved.as_dict() else {
            return Ok(());
        };

        let partial = dict.get("T").and_then(|o| o.as_text());
        let name = match (parent_name, partial) {
            (Some(p), Some(t)) => Some(format!("{}.{}", p, t)),
            (None, Some(t)) => Some(t),
            (Some(p), None) => Some(p.to_string()),
            (None, None) => None,
        };
        let ft = dict.get("FT").and_then(|o| o.as_name()).or(inherited_ft);

        if ft == Some("Sig") {
            if let Some(value) = dict.get("V") {
                let sig_ref = value.as_reference();
                if let Some(sig) = self.resolve(value)?.as_dict() {
                    found.push(SignatureDictionary {
                        sig_ref,
                        field_ref,
                        field_name: name.clone(),
                        dict: sig.clone(),
                    });
                }
            }
        }

        if let Some(kids) = dict.get("Kids") {
            let kids = self.resolve(kids)?;
            if let Some(kids) = kids.as_array() {
                for kid in kids {
                    self.collect_signature_fields(kid, name.as_deref(), ft, depth + 1, seen, found)?;
                }
            }
        }
        Ok(())
    }

    /// Every signature dictionary in the document: AcroForm signature fields
    /// plus any live `/Type /Sig` object not referenced from a field.
    pub fn signature_dictionaries(&self) -> Result<Vec<SignatureDictionary>> {
        let mut signatures = self.signature_fields()?;
        let known: HashSet<ObjectRef> = signatures.iter().filter_map(|s| s.sig_ref).collect();

        for id in self.xref.live_object_numbers() {
            let entry = match self.xref.get(id) {
                Some(e) => e,
                None => continue,
            };
            let obj_ref = ObjectRef::new(id, if entry.entry_type == XRefEntryType::Compressed { 0 } else { entry.generation });
            if known.contains(&obj_ref) {
                continue;
            }
            // A damaged object elsewhere must not hide the signatures.
            let Ok(Object::Dictionary(dict)) = self.load_object(obj_ref) else {
                continue;
            };
            let is_sig = matches!(dict.get("Type").and_then(|o| o.as_name()), Some("Sig") | Some("DocTimeStamp"))
                && dict.contains_key("ByteRange")
                && dict.contains_key("Contents");
            if is_sig {
                log::debug!("Found signature dictionary {} outside the form tree", obj_ref);
                signatures.push(SignatureDictionary {
                    sig_ref: Some(obj_ref),
                    field_ref: None,
                    field_name: None,
                    dict,
                });
            }
        }

        signatures.sort_by_key(|s| s.byte_range().and_then(|br| br.get(1).copied()).unwrap_or(i64::MAX));
        Ok(signatures)
    }

    /// DocMDP permission recorded in `/Perms /DocMDP`, if the document is certified.
    pub fn docmdp_permission(&self) -> Result<Option<DocMdpPermission>> {
        let catalog = self.catalog()?;
        let Some(perms) = self.resolve_dict(&catalog, "Perms")? else {
            return Ok(None);
        };
        let Some(sig) = self.resolve_dict(&perms, "DocMDP")? else {
            return Ok(None);
        };

        let references = match sig.get("Reference") {
            Some(r) => self.resolve(r)?,
            None => return Ok(Some(DocMdpPermission::default())),
        };
        for sig_ref in references.as_array().into_iter().flatten() {
            let sig_ref = self.resolve(sig_ref)?;
            let Some(sig_ref) = sig_ref.as_dict() else {
                continue;
            };
            if sig_ref.get("TransformMethod").and_then(|o| o.as_name()) != Some("DocMDP") {
                continue;
            }
            let p = self
                .resolve_dict(sig_ref, "TransformParams")?
                .and_then(|params| params.get("P").and_then(|o| o.as_integer()));
            return Ok(Some(p.map(DocMdpPermission::from_p).unwrap_or_default()));
        }
        Ok(Some(DocMdpPermission::default()))
    }

    /// Look up an embedded file by name in the `/Names /EmbeddedFiles` tree.
    pub fn embedded_file(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let catalog = self.catalog()?;
        let Some(names) = self.resolve_dict(&catalog, "Names")? else {
            return Ok(None);
        };
        let Some(tree) = self.resolve_dict(&names, "EmbeddedFiles")? else {
            return Ok(None);
        };
        let Some(filespec) = self.find_in_name_tree(&tree, name.as_bytes(), 0)? else {
            return Ok(None);
        };
        let Some(filespec) = self.resolve(&filespec)?.as_dict().cloned() else {
            return Ok(None);
        };
        let Some(ef) = self.resolve_dict(&filespec, "EF")? else {
            return Ok(None);
        };
        let Some(stream) = ef.get("F").or_else(|| ef.get("UF")) else {
            return Ok(None);
        };
        self.resolve(stream)?.decode_stream_data().map(Some)
    }

    fn find_in_name_tree(&self, node: &Dictionary, key: &[u8], depth: usize) -> Result<Option<Object>> {
        if depth > MAX_RECURSION_DEPTH {
            return Err(Error::structural("name tree too deep"));
        }
        if let Some(names) = node.get("Names") {
            let names = self.resolve(names)?;
            for pair in names.as_array().map(|a| a.chunks(2)).into_iter().flatten() {
                if let [k, v] = pair {
                    if self.resolve(k)?.as_string() == Some(key) {
                        return Ok(Some(v.clone()));
                    }
                }
            }
        }
        if let Some(kids) = node.get("Kids") {
            let kids = self.resolve(kids)?;
            for kid in kids.as_array().into_iter().flatten() {
                if let Some(kid) = self.resolve(kid)?.as_dict() {
                    if let Some(found) = self.find_in_name_tree(kid, key, depth + 1)? {
                        return Ok(Some(found));
                    }
                }
            }
        }
        Ok(None)
    }
}

/// Parse the `%PDF-M.m` header, tolerating leading garbage within the first KiB.
pub fn parse_header(data: &[u8]) -> Result<(u8, u8)> {
    let window = &data[..data.len().min(1024)];
    let pos = window
        .windows(5)
        .position(|w| w == b"%PDF-")
        .ok_or_else(|| Error::structural("missing %PDF- header"))?;
    let version = &data[pos + 5..data.len().min(pos + 8)];

    match version {
        [major, b'.', minor] if major.is_ascii_digit() && minor.is_ascii_digit() => {
            Ok((major - b'0', minor - b'0'))
        },
        _ => Err(Error::structural("invalid PDF version in header")),
    }
}
