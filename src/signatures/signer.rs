//! PDF signing.
//!
//! A signature is added as one incremental update holding the signature
//! dictionary, an invisible widget/field, the updated page annotations and
//! AcroForm, and (for certification) the catalog `/Perms` entry. The
//! `/ByteRange` and `/Contents` values are written as fixed-width
//! placeholders, the digest is taken over the finished file, and both
//! placeholders are then overwritten in place.

use super::byterange::ByteRangeCalculator;
use super::certificate::ParsedCertificate;
use super::cms::DetachedSignature;
use super::types::{CertificationType, DigestAlgorithm, SignedDocument, SigningRequest};
use crate::document::PdfStructure;
use crate::error::{Error, Result};
use crate::object::{encode_text_string, Dictionary, Object, ObjectRef};
use crate::timestamp::{TimestampClient, TimestampProvider};
use crate::writer::{IncrementalUpdate, ObjectSerializer};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;

const BYTE_RANGE_KEY: &[u8] = b"<</ByteRange ";
const CONTENTS_KEY: &[u8] = b"/Contents ";

/// Smallest `/Contents` reservation, in bytes of CMS.
const MIN_CONTENTS_SIZE: usize = 8192;
/// Extra room reserved for a timestamp token.
const TIMESTAMP_ALLOWANCE: usize = 8192;

/// Widget annotation flags: Print | Locked.
const WIDGET_FLAGS: i64 = 132;

/// Applies one signature to a PDF.
pub struct PdfSigner {
    request: SigningRequest,
    timestamp_provider: Option<Box<dyn TimestampProvider>>,
}

impl std::fmt::Debug for PdfSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfSigner")
            .field("request", &self.request)
            .field("timestamp_provider", &self.timestamp_provider.is_some())
            .finish()
    }
}

impl PdfSigner {
    /// Create a signer for `request`.
    pub fn new(request: SigningRequest) -> Self {
        Self {
            request,
            timestamp_provider: None,
        }
    }

    /// Obtain timestamps from `provider` instead of the request's HTTP authority.
    ///
    /// Without a [`TimestampAuthority`](super::TimestampAuthority) in the
    /// request the timestamp is treated as required.
    pub fn with_timestamp_provider(mut self, provider: impl TimestampProvider + 'static) -> Self {
        self.timestamp_provider = Some(Box::new(provider));
        self
    }

    /// The signing request.
    pub fn request(&self) -> &SigningRequest {
        &self.request
    }

    /// Sign `source` and return the complete signed file.
    ///
    /// Nothing is produced on error; a timestamp failure only aborts when
    /// the timestamp is required.
    pub fn sign(&self, source: &[u8]) -> Result<SignedDocument> {
        let request = &self.request;
        self.validate()?;

        let doc = PdfStructure::parse(source)?;
        if doc.is_encrypted() {
            return Err(Error::UnsupportedFeature("signing encrypted documents".to_string()));
        }
        check_permissions(&doc, request.certification)?;

        let root = doc.root_ref()?;
        let mut catalog = doc.catalog()?;
        let mut catalog_changed = false;
        let (page_ref, mut page) = doc.first_page()?;
        let acroform = doc.acroform()?;

        let sig_ref = ObjectRef::new(doc.next_object_number(), 0);
        let widget_ref = ObjectRef::new(sig_ref.id + 1, 0);
        let mut next_id = sig_ref.id + 2;
        log::debug!("Allocating signature {} and widget {}", sig_ref, widget_ref);

        let mut update = IncrementalUpdate::new(&doc);

        let field_name = unique_field_name(&doc, acroform.as_ref().map(|(_, d)| d))?;
        let mut widget = Dictionary::new();
        widget.insert("Type".into(), Object::name("Annot"));
        widget.insert("Subtype".into(), Object::name("Widget"));
        widget.insert("FT".into(), Object::name("Sig"));
        widget.insert("T".into(), Object::String(encode_text_string(&field_name)));
        widget.insert("V".into(), sig_ref.into());
        widget.insert("F".into(), Object::Integer(WIDGET_FLAGS));
        widget.insert("Rect".into(), Object::Array(vec![Object::Integer(0); 4]));
        widget.insert("P".into(), page_ref.into());
        update.add_object(widget_ref, &Object::Dictionary(widget));

        if append_reference(&doc, &mut update, &mut page, "Annots", widget_ref)? {
            update.add_object(page_ref, &Object::Dictionary(page));
        }

        let (acroform_ref, mut acroform) = acroform.unwrap_or((None, Dictionary::new()));
        append_reference(&doc, &mut update, &mut acroform, "Fields", widget_ref)?;
        acroform.insert("SigFlags".into(), Object::Integer(3));
        match acroform_ref {
            Some(r) => update.add_object(r, &Object::Dictionary(acroform)),
            None => {
                catalog.insert("AcroForm".into(), Object::Dictionary(acroform));
                catalog_changed = true;
            },
        }

        if request.certification.is_certification() {
            let mut perms = doc.resolve_dict(&catalog, "Perms")?.unwrap_or_default();
            perms.insert("DocMDP".into(), sig_ref.into());
            match catalog.get("Perms").and_then(|o| o.as_reference()) {
                Some(r) => update.add_object(r, &Object::Dictionary(perms)),
                None => {
                    catalog.insert("Perms".into(), Object::Dictionary(perms));
                    catalog_changed = true;
                },
            }
        }
        if catalog_changed {
            update.add_object(root, &Object::Dictionary(catalog));
        }

        let mut info_ref = doc.info_ref();
        if request.update_info {
            let mut info = doc.info();
            info.insert("ModDate".into(), Object::string(format_pdf_date(request.metadata.signing_time)));
            let r = match info_ref {
                Some(r) => r,
                None => {
                    let r = ObjectRef::new(next_id, 0);
                    next_id += 1;
                    r
                },
            };
            update.add_object(r, &Object::Dictionary(info));
            info_ref = Some(r);
        }

        let calculator = ByteRangeCalculator::new(self.contents_size()?);
        update.add_raw(sig_ref, self.signature_dictionary_body(&calculator));

        let updated = update.finish(next_id, root, info_ref)?;
        let placement = updated
            .placements
            .get(&sig_ref.id)
            .copied()
            .ok_or_else(|| Error::structural("signature dictionary missing from update"))?;
        let byte_range_offset = placement.body_offset + BYTE_RANGE_KEY.len();
        let contents_offset = byte_range_offset + ByteRangeCalculator::byte_range_placeholder().len() + CONTENTS_KEY.len();

        let mut bytes = updated.bytes;
        let byte_range = calculator.calculate_byte_range(bytes.len(), contents_offset);
        ByteRangeCalculator::write_byte_range(&mut bytes, byte_range_offset, &byte_range)?;

        let (head, tail) = ByteRangeCalculator::signed_slices(&bytes, &byte_range)?;
        let digest = request.digest_algorithm.digest_parts(&[head, tail]);
        let mut cms = DetachedSignature::create(
            &request.credentials,
            request.digest_algorithm,
            &digest,
            request.metadata.signing_time,
            request.sub_filter,
        )?;

        let timestamped = match self.fetch_timestamp(request.digest_algorithm, cms.signature_value())? {
            Some(token) => {
                cms.attach_timestamp(&token)?;
                true
            },
            None => false,
        };

        let der = cms.to_der()?;
        calculator.insert_signature(&mut bytes, contents_offset, &der)?;

        log::info!(
            "Signed document as {} ({} bytes, CMS {} of {} bytes, timestamped: {})",
            field_name,
            bytes.len(),
            der.len(),
            calculator.capacity(),
            timestamped
        );
        Ok(SignedDocument {
            bytes,
            byte_range,
            timestamped,
        })
    }

    /// Sign the file at `source` and write the result to `target`.
    ///
    /// The output is written to a temporary file next to `target` and
    /// renamed into place, so `target` is either untouched or complete.
    pub fn sign_file(&self, source: impl AsRef<Path>, target: impl AsRef<Path>) -> Result<SignedDocument> {
        self.validate()?;
        let data = std::fs::read(source.as_ref())?;
        let signed = self.sign(&data)?;

        let target = target.as_ref();
        let dir = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&signed.bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(target).map_err(|e| Error::Io(e.error))?;
        log::debug!("Wrote signed document to {}", target.display());
        Ok(signed)
    }

    /// Reject requests that would produce a non-compliant signature.
    fn validate(&self) -> Result<ParsedCertificate> {
        let request = &self.request;
        if !request.sub_filter.is_signable() {
            return Err(Error::UnsupportedFeature(format!(
                "signing with SubFilter {}",
                request.sub_filter.as_pdf_name()
            )));
        }
        if request.digest_algorithm == DigestAlgorithm::Sha1 {
            return Err(Error::UnsupportedFeature("SHA-1 signatures".to_string()));
        }
        let certificate = ParsedCertificate::from_der(&request.credentials.certificate)?;
        if !request.credentials.key().matches_public_key(certificate.spki_der()) {
            return Err(Error::KeyMismatch);
        }
        Ok(certificate)
    }

    fn wants_timestamp(&self) -> bool {
        self.timestamp_provider.is_some() || self.request.timestamp.is_some()
    }

    /// Reserved CMS size in bytes.
    fn contents_size(&self) -> Result<usize> {
        if let Some(size) = self.request.contents_size {
            if size == 0 {
                return Err(Error::Config("contents_size must be positive".to_string()));
            }
            return Ok(size);
        }
        let credentials = &self.request.credentials;
        let mut estimate = credentials.certificate.len()
            + credentials.chain.iter().map(Vec::len).sum::<usize>()
            + credentials.key().max_signature_len()
            + 1024;
        if self.wants_timestamp() {
            estimate += TIMESTAMP_ALLOWANCE;
        }
        Ok(estimate.div_ceil(1024).max(MIN_CONTENTS_SIZE / 1024) * 1024)
    }

    /// `<</ByteRange [..] /Contents <..> ...>>` with both placeholders first.
    fn signature_dictionary_body(&self, calculator: &ByteRangeCalculator) -> Vec<u8> {
        let request = &self.request;
        let metadata = &request.metadata;

        let mut dict = Dictionary::new();
        dict.insert("Type".into(), Object::name("Sig"));
        dict.insert("Filter".into(), Object::name("Adobe.PPKLite"));
        dict.insert("SubFilter".into(), Object::name(request.sub_filter.as_pdf_name()));
        let text_fields = [
            ("Name", &metadata.name),
            ("Reason", &metadata.reason),
            ("Location", &metadata.location),
            ("ContactInfo", &metadata.contact_info),
        ];
        for (key, value) in text_fields {
            if let Some(value) = value {
                dict.insert(key.into(), Object::String(encode_text_string(value)));
            }
        }
        dict.insert("M".into(), Object::string(format_pdf_date(metadata.signing_time)));

        if let CertificationType::Certification { permission } = request.certification {
            let mut params = Dictionary::new();
            params.insert("Type".into(), Object::name("TransformParams"));
            params.insert("P".into(), Object::Integer(permission.p_value()));
            params.insert("V".into(), Object::name("1.2"));

            let mut reference = Dictionary::new();
            reference.insert("Type".into(), Object::name("SigRef"));
            reference.insert("TransformMethod".into(), Object::name("DocMDP"));
            reference.insert("TransformParams".into(), Object::Dictionary(params));
            dict.insert("Reference".into(), Object::Array(vec![Object::Dictionary(reference)]));
        }

        let mut body = BYTE_RANGE_KEY.to_vec();
        body.extend_from_slice(&ByteRangeCalculator::byte_range_placeholder());
        body.extend_from_slice(CONTENTS_KEY);
        body.extend_from_slice(&calculator.generate_placeholder());
        ObjectSerializer::compact().write_dictionary_entries(&mut body, &dict);
        body.extend_from_slice(b">>");
        body
    }

    /// Token over `signature_value`, or `None` when not requested or optional and unavailable.
    fn fetch_timestamp(&self, digest_algorithm: DigestAlgorithm, signature_value: &[u8]) -> Result<Option<Vec<u8>>> {
        let required = self.request.timestamp.as_ref().map_or(true, |tsa| tsa.required);
        let imprint = digest_algorithm.digest(signature_value);
        let outcome = match (&self.timestamp_provider, &self.request.timestamp) {
            (Some(provider), _) => provider.timestamp(digest_algorithm, &imprint),
            (None, Some(tsa)) => {
                TimestampClient::from_authority(tsa).and_then(|client| client.timestamp(digest_algorithm, &imprint))
            },
            (None, None) => return Ok(None),
        };

        match outcome {
            Ok(token) => Ok(Some(token)),
            Err(e) if required => Err(Error::TsaUnavailable(e.to_string())),
            Err(e) => {
                log::warn!("Signing without timestamp: {}", e);
                Ok(None)
            },
        }
    }
}

/// Sign the file at `source` into `target` (see [`PdfSigner::sign_file`]).
pub fn sign_file(source: impl AsRef<Path>, target: impl AsRef<Path>, request: SigningRequest) -> Result<SignedDocument> {
    PdfSigner::new(request).sign_file(source, target)
}

/// DocMDP and certification ordering rules.
fn check_permissions(doc: &PdfStructure<'_>, certification: CertificationType) -> Result<()> {
    let existing = doc.signature_dictionaries()?;
    let docmdp = doc.docmdp_permission()?;

    if certification.is_certification() {
        if docmdp.is_some() {
            return Err(Error::PermissionViolation("document is already certified".to_string()));
        }
        if !existing.is_empty() {
            return Err(Error::PermissionViolation(format!(
                "a certification signature must come first, document already has {} signature(s)",
                existing.len()
            )));
        }
    }
    if let Some(permission) = docmdp {
        if !permission.allows_signatures() {
            return Err(Error::PermissionViolation(
                "certification level P=1 forbids further signatures".to_string(),
            ));
        }
    }
    Ok(())
}

/// Append `item` to the array under `key`, which may be inline, indirect or
/// missing. Returns whether `container` itself changed.
fn append_reference(
    doc: &PdfStructure<'_>,
    update: &mut IncrementalUpdate<'_>,
    container: &mut Dictionary,
    key: &str,
    item: ObjectRef,
) -> Result<bool> {
    if let Some(array_ref) = container.get(key).and_then(|o| o.as_reference()) {
        let mut items = doc
            .load_object(array_ref)?
            .as_array()
            .cloned()
            .ok_or_else(|| Error::structural(format!("/{} {} is not an array", key, array_ref)))?;
        items.push(item.into());
        update.add_object(array_ref, &Object::Array(items));
        return Ok(false);
    }

    let mut items = container.get(key).and_then(|o| o.as_array()).cloned().unwrap_or_default();
    items.push(item.into());
    container.insert(key.to_string(), Object::Array(items));
    Ok(true)
}

/// First `SignatureN` not used by a top-level form field.
fn unique_field_name(doc: &PdfStructure<'_>, acroform: Option<&Dictionary>) -> Result<String> {
    let mut taken = HashSet::new();
    if let Some(fields) = acroform.and_then(|a| a.get("Fields")) {
        for field in doc.resolve(fields)?.as_array().into_iter().flatten() {
            let field = doc.resolve(field)?;
            if let Some(name) = field.as_dict().and_then(|d| d.get("T")).and_then(|o| o.as_text()) {
                taken.insert(name);
            }
        }
    }

    let mut n = 1;
    loop {
        let name = format!("Signature{}", n);
        if !taken.contains(&name) {
            return Ok(name);
        }
        n += 1;
    }
}

/// PDF date string in UTC: `D:YYYYMMDDHHmmSS+00'00'`.
pub fn format_pdf_date(time: DateTime<Utc>) -> String {
    time.format("D:%Y%m%d%H%M%S+00'00'").to_string()
}
