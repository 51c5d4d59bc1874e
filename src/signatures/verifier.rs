//! PDF signature verification.
//!
//! Every signature dictionary is checked independently against the raw file
//! bytes. Problems with one signature are recorded in its [`SignerResult`]
//! and never abort the others; only an unreadable document is an error.

use super::byterange::ByteRangeCalculator;
use super::certificate::ParsedCertificate;
use super::chain::{build_chain, CertificateChain};
use super::cms::CmsSignature;
use super::keys;
use super::revocation::{NoRevocationCheck, RevocationChecker, RevocationStatus};
use super::types::{DigestAlgorithm, SignatureSubFilter, SignerResult, TimestampInfo, VerificationResult};
use crate::document::{PdfStructure, SignatureDictionary};
use crate::error::{Error, Result};
use crate::object::Dictionary;
use crate::timestamp::TimestampToken;
use crate::trust::{TrustAnchor, TrustStore};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Verifier for PDF digital signatures.
pub struct SignatureVerifier<'a> {
    trust_store: &'a TrustStore,
    revocation: Box<dyn RevocationChecker>,
    at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for SignatureVerifier<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("trust_store", &self.trust_store)
            .field("at", &self.at)
            .finish_non_exhaustive()
    }
}

impl<'a> SignatureVerifier<'a> {
    /// Verifier deciding trust with `trust_store` and skipping revocation.
    pub fn new(trust_store: &'a TrustStore) -> Self {
        Self {
            trust_store,
            revocation: Box::new(NoRevocationCheck),
            at: None,
        }
    }

    /// Consult `checker` for the signer certificate's revocation status.
    pub fn with_revocation_checker(mut self, checker: impl RevocationChecker + 'static) -> Self {
        self.revocation = Box::new(checker);
        self
    }

    /// Validate certificates at `at` instead of now when no trusted timestamp exists.
    pub fn at_time(mut self, at: DateTime<Utc>) -> Self {
        self.at = Some(at);
        self
    }

    /// Verify every signature in `data`.
    pub fn verify(&self, data: &[u8]) -> Result<VerificationResult> {
        let doc = PdfStructure::parse(data)?;
        if doc.is_encrypted() {
            return Err(Error::UnsupportedFeature("verifying encrypted documents".to_string()));
        }

        let info = doc.info();
        let mut result = VerificationResult {
            signers: Vec::new(),
            document_hash: hex::encode(Sha256::digest(data)),
            creator: text(&info, "Creator"),
            producer: text(&info, "Producer"),
        };

        let now = self.at.unwrap_or_else(Utc::now);
        for signature in doc.signature_dictionaries()? {
            result.signers.push(self.verify_signature(data, &signature, now));
        }

        log::info!(
            "Verified {} signature(s): all valid {}, all trusted {}",
            result.signers.len(),
            result.all_valid(),
            result.all_trusted()
        );
        Ok(result)
    }

    /// Read and verify the file at `path`.
    pub fn verify_file(&self, path: impl AsRef<Path>) -> Result<VerificationResult> {
        let data = std::fs::read(path.as_ref())?;
        self.verify(&data)
    }

    fn verify_signature(&self, data: &[u8], signature: &SignatureDictionary, now: DateTime<Utc>) -> SignerResult {
        let dict = &signature.dict;
        let mut report = SignerResult {
            field_name: signature.field_name.clone(),
            name: text(dict, "Name"),
            reason: text(dict, "Reason"),
            location: text(dict, "Location"),
            contact_info: text(dict, "ContactInfo"),
            signing_time: text(dict, "M").and_then(|m| parse_pdf_date(&m)),
            signature_format: dict
                .get("SubFilter")
                .and_then(|o| o.as_name())
                .and_then(SignatureSubFilter::from_pdf_name),
            ..SignerResult::default()
        };

        if let Err(e) = self.evaluate(data, signature, now, &mut report) {
            log::debug!("Signature {:?} failed verification: {}", report.field_name, e);
            report.errors.push(e.to_string());
        }
        report
    }

    /// Fill in `report`; an `Err` marks the signature as not valid.
    fn evaluate(
        &self,
        data: &[u8],
        signature: &SignatureDictionary,
        now: DateTime<Utc>,
        report: &mut SignerResult,
    ) -> Result<()> {
        let dict = &signature.dict;
        let byte_range: [i64; 4] = signature
            .byte_range()
            .and_then(|br| br.try_into().ok())
            .ok_or_else(|| Error::structural("/ByteRange is not an array of four integers"))?;
        report.covers_whole_document = ByteRangeCalculator::validate_byte_range(&byte_range, data.len())?;

        let contents = ByteRangeCalculator::read_gap(data, &byte_range)?;
        if let Some(declared) = dict.get("Contents").and_then(|o| o.as_string()) {
            if declared != contents.as_slice() {
                return Err(Error::structural("/Contents does not sit in the ByteRange gap"));
            }
        }

        let is_doc_timestamp = report.signature_format == Some(SignatureSubFilter::Rfc3161)
            || dict.get("Type").and_then(|o| o.as_name()) == Some("DocTimeStamp");
        if is_doc_timestamp {
            return self.evaluate_document_timestamp(data, &byte_range, &contents, now, report);
        }

        let cms = CmsSignature::from_der(&contents)?;
        let digest_algorithm = cms
            .digest_algorithm()
            .ok_or_else(|| Error::UnsupportedFeature("unknown digest algorithm in signer info".to_string()))?;
        report.digest_algorithm = Some(digest_algorithm);
        if report.signing_time.is_none() {
            report.signing_time = cms.signing_time();
        }

        let (head, tail) = ByteRangeCalculator::signed_slices(data, &byte_range)?;
        let mut digest_ok = true;
        let (content, content_digest) = if report.signature_format == Some(SignatureSubFilter::Pkcs7Sha1) {
            let econtent = cms
                .encapsulated_content()?
                .ok_or_else(|| Error::structural("adbe.pkcs7.sha1 signature without encapsulated digest"))?;
            if econtent != DigestAlgorithm::Sha1.digest_parts(&[head, tail]) {
                digest_ok = false;
                report.errors.push("encapsulated SHA-1 digest does not match the signed bytes".to_string());
            }
            let digest = digest_algorithm.digest(&econtent);
            (econtent, digest)
        } else {
            let mut signed = Vec::with_capacity(head.len() + tail.len());
            signed.extend_from_slice(head);
            signed.extend_from_slice(tail);
            let digest = digest_algorithm.digest(&signed);
            (signed, digest)
        };

        let message = match cms.signed_attributes_der()? {
            Some(attrs) => {
                let declared = cms
                    .message_digest()?
                    .ok_or_else(|| Error::Crypto("signed attributes lack messageDigest".to_string()))?;
                if declared != content_digest {
                    digest_ok = false;
                    report.errors.push("messageDigest does not match the signed bytes".to_string());
                }
                attrs
            },
            None => content,
        };

        let signer_der = cms
            .signer_certificate()?
            .ok_or_else(|| Error::Certificate("signer certificate not included".to_string()))?;
        let signer = ParsedCertificate::from_der(&signer_der)?;
        describe_signer(&signer, report);

        let signature_ok = match keys::verify_signature(
            signer.spki_der(),
            &cms.signature_algorithm(),
            Some(digest_algorithm),
            &message,
            cms.signature_value(),
        ) {
            Ok(true) => true,
            Ok(false) => {
                report.errors.push("signature value does not verify".to_string());
                false
            },
            Err(e) => {
                report.errors.push(format!("signature value cannot be checked: {}", e));
                false
            },
        };

        let chain = build_chain(signer.clone(), &parse_pool(cms.certificates()));
        self.record_trust(&chain, report);

        if let Some(token) = cms.timestamp_token()? {
            report.timestamp = self.evaluate_timestamp(&token, cms.signature_value(), report);
        }
        let trusted_time = report.timestamp.as_ref().filter(|t| t.trusted).map(|t| t.time);
        let reference_time = trusted_time.unwrap_or(now);

        let cert_ok = signer.is_valid_at(reference_time);
        if !cert_ok {
            report.errors.push(format!(
                "signer certificate not valid at {} (valid {} to {})",
                reference_time,
                signer.not_before(),
                signer.not_after()
            ));
        }
        report.valid_signature = digest_ok && signature_ok && cert_ok;
        if !issuers_valid_at(&chain, reference_time, &mut report.errors) {
            report.trusted_issuer = false;
            report.trust_anchor = None;
        }

        report.revoked_certificate = self.revocation_status(&signer, &chain, cms.crls(), trusted_time, report);
        Ok(())
    }

    /// An `ETSI.RFC3161` document timestamp: the token's imprint covers the ByteRange.
    fn evaluate_document_timestamp(
        &self,
        data: &[u8],
        byte_range: &[i64; 4],
        contents: &[u8],
        now: DateTime<Utc>,
        report: &mut SignerResult,
    ) -> Result<()> {
        let token = TimestampToken::parse(contents)?;
        report.digest_algorithm = token.imprint_algorithm();

        let signed = ByteRangeCalculator::extract_signed_bytes(data, byte_range)?;
        let digest_ok = token.matches_imprint(&signed);
        if !digest_ok {
            report.errors.push("timestamp imprint does not match the signed bytes".to_string());
        }

        let tsa = match token.verify_signature() {
            Ok(tsa) => tsa,
            Err(e) => {
                report.errors.push(format!("timestamp signature: {}", e));
                return Ok(());
            },
        };
        describe_signer(&tsa, report);

        let chain = build_chain(tsa.clone(), &parse_pool(token.certificates()));
        self.record_trust(&chain, report);

        let time = token.gen_time()?;
        report.signing_time = report.signing_time.or(Some(time));
        if !issuers_valid_at(&chain, time, &mut report.errors) {
            report.trusted_issuer = false;
            report.trust_anchor = None;
        }
        let trusted = digest_ok && report.trusted_issuer && tsa.has_time_stamping_usage();
        report.timestamp = Some(TimestampInfo {
            time,
            trusted,
            authority: Some(tsa.subject().to_string()),
        });

        let cert_ok = tsa.is_valid_at(if trusted { time } else { now });
        if !cert_ok {
            report.errors.push("timestamp authority certificate not valid".to_string());
        }
        report.valid_signature = digest_ok && cert_ok;
        report.revoked_certificate = self.revocation_status(&tsa, &chain, &[], None, report);
        Ok(())
    }

    /// Time attested by a signature timestamp; `trusted` only when the imprint,
    /// the token signature, the TSA usage and the TSA chain all check out.
    fn evaluate_timestamp(&self, token: &[u8], signature_value: &[u8], report: &mut SignerResult) -> Option<TimestampInfo> {
        let token = match TimestampToken::parse(token) {
            Ok(t) => t,
            Err(e) => {
                report.errors.push(format!("unreadable timestamp token: {}", e));
                return None;
            },
        };
        let time = match token.gen_time() {
            Ok(t) => t,
            Err(e) => {
                report.errors.push(format!("timestamp genTime: {}", e));
                return None;
            },
        };

        let mut trusted = token.matches_imprint(signature_value);
        if !trusted {
            report.errors.push("timestamp imprint does not match the signature value".to_string());
        }

        let authority = match token.verify_signature() {
            Ok(tsa) => {
                if !tsa.has_time_stamping_usage() {
                    trusted = false;
                    report.errors.push("timestamp certificate lacks the timeStamping usage".to_string());
                }
                if !tsa.is_valid_at(time) {
                    trusted = false;
                    report.errors.push(format!("timestamp certificate not valid at {}", time));
                }
                let chain = build_chain(tsa.clone(), &parse_pool(token.certificates()));
                if !issuers_valid_at(&chain, time, &mut report.errors) {
                    trusted = false;
                }
                match self.find_anchor(&chain) {
                    Ok(Some(_)) => {},
                    Ok(None) => {
                        trusted = false;
                        report.errors.push("timestamp authority is not trusted".to_string());
                    },
                    Err(e) => {
                        trusted = false;
                        report.errors.push(format!("timestamp trust lookup failed: {}", e));
                    },
                }
                Some(tsa.subject().to_string())
            },
            Err(e) => {
                trusted = false;
                report.errors.push(format!("timestamp signature: {}", e));
                None
            },
        };

        Some(TimestampInfo {
            time,
            trusted,
            authority,
        })
    }

    fn record_trust(&self, chain: &CertificateChain, report: &mut SignerResult) {
        report.certificate_chain = chain.certificates.iter().map(|c| c.summary()).collect();
        match self.find_anchor(chain) {
            Ok(Some(anchor)) => {
                log::debug!("Chain anchored in trust list '{}'", anchor.list_name);
                report.trusted_issuer = true;
                report.trust_anchor = Some(anchor);
            },
            Ok(None) => {
                report.errors.push("no certificate in the chain matches a trust anchor".to_string());
                report.errors.extend(chain.errors.iter().cloned());
            },
            Err(e) => report.errors.push(format!("trust lookup failed: {}", e)),
        }
    }

    /// First chain certificate that is itself a stored anchor, else the
    /// anchor whose key signed the top certificate.
    fn find_anchor(&self, chain: &CertificateChain) -> Result<Option<TrustAnchor>> {
        for cert in &chain.certificates {
            if let Some(anchor) = self.trust_store.check_certificate(cert)? {
                return Ok(Some(anchor));
            }
        }
        match chain.top() {
            Some(top) => self.trust_store.check_issuer_of(top),
            None => Ok(None),
        }
    }

    fn revocation_status(
        &self,
        cert: &ParsedCertificate,
        chain: &CertificateChain,
        crls: &[Vec<u8>],
        trusted_time: Option<DateTime<Utc>>,
        report: &mut SignerResult,
    ) -> Option<bool> {
        match self.revocation.check(cert, chain.certificates.get(1), crls) {
            Ok(RevocationStatus::Revoked { at: Some(at) }) if trusted_time.is_some_and(|t| at > t) => {
                log::debug!("Certificate revoked at {} after the timestamped signing time", at);
                Some(false)
            },
            Ok(status) => status.as_report(),
            Err(e) => {
                log::warn!("Revocation status unknown for '{}': {}", cert.subject(), e);
                report.errors.push(format!("revocation unknown: {}", e));
                None
            },
        }
    }
}

/// Records every issuer outside its validity window at `at`.
fn issuers_valid_at(chain: &CertificateChain, at: DateTime<Utc>, errors: &mut Vec<String>) -> bool {
    let invalid = chain.invalid_issuers_at(at);
    for cert in &invalid {
        errors.push(format!(
            "issuer certificate '{}' not valid at {} (valid {} to {})",
            cert.subject(),
            at,
            cert.not_before(),
            cert.not_after()
        ));
    }
    invalid.is_empty()
}

fn describe_signer(cert: &ParsedCertificate, report: &mut SignerResult) {
    report.signer_common_name = cert.common_name().map(str::to_string);
    report.signer_organization = cert.organization().map(str::to_string);
    if report.name.is_none() {
        report.name = report.signer_common_name.clone();
    }
}

fn parse_pool(certificates: &[Vec<u8>]) -> Vec<ParsedCertificate> {
    certificates
        .iter()
        .filter_map(|der| match ParsedCertificate::from_der(der) {
            Ok(cert) => Some(cert),
            Err(e) => {
                log::warn!("Ignoring unparsable embedded certificate: {}", e);
                None
            },
        })
        .collect()
}

fn text(dict: &Dictionary, key: &str) -> Option<String> {
    dict.get(key).and_then(|o| o.as_text())
}

/// Parse a PDF date (`D:YYYYMMDDHHmmSSOHH'mm'`); every part after the year
/// is optional and a missing offset means UTC.
pub fn parse_pdf_date(text: &str) -> Option<DateTime<Utc>> {
    let trimmed = text.trim();
    let s = trimmed.strip_prefix("D:").unwrap_or(trimmed);
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.len() < 4 {
        return None;
    }

    let field = |start: usize, default: u32| -> Option<u32> {
        match digits.get(start..start + 2) {
            Some(v) => v.parse().ok(),
            None => Some(default),
        }
    };
    let year: i32 = digits[..4].parse().ok()?;
    let naive = NaiveDate::from_ymd_opt(year, field(4, 1)?, field(6, 1)?)?.and_hms_opt(
        field(8, 0)?,
        field(10, 0)?,
        field(12, 0)?,
    )?;

    let rest = &s[digits.len()..];
    let offset = match rest.chars().next() {
        Some(sign @ ('+' | '-')) => {
            let tz: String = rest[1..].chars().filter(|c| c.is_ascii_digit()).collect();
            let hours: i64 = tz.get(..2).and_then(|v| v.parse().ok()).unwrap_or(0);
            let minutes: i64 = tz.get(2..4).and_then(|v| v.parse().ok()).unwrap_or(0);
            let seconds = hours * 3600 + minutes * 60;
            if sign == '-' {
                -seconds
            } else {
                seconds
            }
        },
        _ => 0,
    };
    Some(Utc.from_utc_datetime(&naive) - chrono::Duration::seconds(offset))
}
