//! Digital signature types and data structures.
//!
//! This module defines the request and result types shared by the signer
//! and the verifier.

use super::certificate::CertificateSummary;
use super::keys::SignatureKey;
use crate::error::{Error, Result};
use crate::trust::TrustAnchor;
use chrono::{DateTime, Utc};
use der::oid::ObjectIdentifier;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::sync::Arc;
use std::time::Duration;

/// Digest algorithm used for signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// SHA-1 (accepted when verifying legacy PDFs, never used for signing)
    Sha1,
    /// SHA-256 (recommended)
    #[default]
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

impl DigestAlgorithm {
    const SHA1_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.14.3.2.26");
    const SHA256_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1");
    const SHA384_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.2");
    const SHA512_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.3");

    /// Get the OID for this digest algorithm.
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            DigestAlgorithm::Sha1 => Self::SHA1_OID,
            DigestAlgorithm::Sha256 => Self::SHA256_OID,
            DigestAlgorithm::Sha384 => Self::SHA384_OID,
            DigestAlgorithm::Sha512 => Self::SHA512_OID,
        }
    }

    /// Look up a digest algorithm by OID.
    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        [Self::Sha1, Self::Sha256, Self::Sha384, Self::Sha512]
            .into_iter()
            .find(|alg| alg.oid() == *oid)
    }

    /// Get the name of this algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "SHA-1",
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha384 => "SHA-384",
            DigestAlgorithm::Sha512 => "SHA-512",
        }
    }

    /// Digest length in bytes.
    pub fn output_size(&self) -> usize {
        match self {
            DigestAlgorithm::Sha1 => 20,
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha384 => 48,
            DigestAlgorithm::Sha512 => 64,
        }
    }

    /// Hash `data` in one go.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        self.digest_parts(&[data])
    }

    /// Hash the concatenation of `parts` without copying them together.
    pub fn digest_parts(&self, parts: &[&[u8]]) -> Vec<u8> {
        fn run<D: Digest>(parts: &[&[u8]]) -> Vec<u8> {
            let mut hasher = D::new();
            for part in parts {
                hasher.update(part);
            }
            hasher.finalize().to_vec()
        }
        match self {
            DigestAlgorithm::Sha1 => run::<Sha1>(parts),
            DigestAlgorithm::Sha256 => run::<Sha256>(parts),
            DigestAlgorithm::Sha384 => run::<Sha384>(parts),
            DigestAlgorithm::Sha512 => run::<Sha512>(parts),
        }
    }
}

/// Signature sub-filter type (signature format).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SignatureSubFilter {
    /// adbe.pkcs7.detached - PKCS#7 detached signature
    #[default]
    #[serde(rename = "adbe.pkcs7.detached")]
    Pkcs7Detached,
    /// adbe.pkcs7.sha1 - PKCS#7 over a SHA-1 digest of the byte range
    #[serde(rename = "adbe.pkcs7.sha1")]
    Pkcs7Sha1,
    /// ETSI.CAdES.detached - PAdES CAdES signature
    #[serde(rename = "ETSI.CAdES.detached")]
    CadesDetached,
    /// ETSI.RFC3161 - Document timestamp token
    #[serde(rename = "ETSI.RFC3161")]
    Rfc3161,
}

impl SignatureSubFilter {
    /// Get the PDF name for this sub-filter.
    pub fn as_pdf_name(&self) -> &'static str {
        match self {
            SignatureSubFilter::Pkcs7Detached => "adbe.pkcs7.detached",
            SignatureSubFilter::Pkcs7Sha1 => "adbe.pkcs7.sha1",
            SignatureSubFilter::CadesDetached => "ETSI.CAdES.detached",
            SignatureSubFilter::Rfc3161 => "ETSI.RFC3161",
        }
    }

    /// Parse a PDF name into a sub-filter type.
    pub fn from_pdf_name(name: &str) -> Option<Self> {
        match name {
            "adbe.pkcs7.detached" => Some(SignatureSubFilter::Pkcs7Detached),
            "adbe.pkcs7.sha1" => Some(SignatureSubFilter::Pkcs7Sha1),
            "ETSI.CAdES.detached" => Some(SignatureSubFilter::CadesDetached),
            "ETSI.RFC3161" => Some(SignatureSubFilter::Rfc3161),
            _ => None,
        }
    }

    /// Whether new signatures may be produced in this format.
    pub fn is_signable(&self) -> bool {
        matches!(self, SignatureSubFilter::Pkcs7Detached | SignatureSubFilter::CadesDetached)
    }
}

/// DocMDP permission level recorded by a certification signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocMdpPermission {
    /// P=1: no changes at all, not even further signatures.
    NoChanges,
    /// P=2: filling in forms and signing.
    #[default]
    FillFormsOnly,
    /// P=3: form filling, signing and annotation changes.
    FillFormsAndAnnotations,
    /// Everything P=3 allows; written as P=3 since the format has no higher level.
    FillFormsAnnotationsAndFree,
}

impl DocMdpPermission {
    /// The `/P` value written into the transform parameters.
    pub fn p_value(&self) -> i64 {
        match self {
            DocMdpPermission::NoChanges => 1,
            DocMdpPermission::FillFormsOnly => 2,
            DocMdpPermission::FillFormsAndAnnotations | DocMdpPermission::FillFormsAnnotationsAndFree => 3,
        }
    }

    /// Interpret a `/P` value. Out-of-range values fall back to P=2.
    pub fn from_p(p: i64) -> Self {
        match p {
            1 => DocMdpPermission::NoChanges,
            3 => DocMdpPermission::FillFormsAndAnnotations,
            _ => DocMdpPermission::FillFormsOnly,
        }
    }

    /// Whether further approval signatures may be added.
    pub fn allows_signatures(&self) -> bool {
        !matches!(self, DocMdpPermission::NoChanges)
    }
}

/// Kind of signature to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CertificationType {
    /// Ordinary approval signature.
    #[default]
    Approval,
    /// Certification (author) signature carrying a DocMDP permission.
    Certification {
        /// Permitted changes after certification
        permission: DocMdpPermission,
    },
}

impl CertificationType {
    /// Whether this is a certification signature.
    pub fn is_certification(&self) -> bool {
        matches!(self, CertificationType::Certification { .. })
    }
}

/// Human-readable details written into the signature dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureMetadata {
    /// Name of the signer (if different from certificate CN)
    pub name: Option<String>,
    /// Reason for signing
    pub reason: Option<String>,
    /// Location where the document was signed
    pub location: Option<String>,
    /// Contact information
    pub contact_info: Option<String>,
    /// Claimed signing time, written as `/M`
    pub signing_time: DateTime<Utc>,
}

impl Default for SignatureMetadata {
    fn default() -> Self {
        Self {
            name: None,
            reason: None,
            location: None,
            contact_info: None,
            signing_time: Utc::now(),
        }
    }
}

/// Signing credentials: certificate, chain and private key.
#[derive(Clone)]
pub struct SigningCredentials {
    /// DER-encoded signer certificate
    pub certificate: Vec<u8>,
    /// Intermediate certificates, signer's issuer first (DER-encoded)
    pub chain: Vec<Vec<u8>>,
    key: Arc<dyn SignatureKey>,
}

impl SigningCredentials {
    /// Create credentials from a DER certificate and a key handle.
    pub fn new(certificate: Vec<u8>, key: impl SignatureKey + 'static) -> Self {
        Self {
            certificate,
            chain: Vec::new(),
            key: Arc::new(key),
        }
    }

    /// Create credentials with a certificate chain.
    pub fn with_chain(mut self, chain: Vec<Vec<u8>>) -> Self {
        self.chain = chain;
        self
    }

    /// Load credentials from PEM text.
    ///
    /// The first certificate in `cert_pem` is the signer; any following ones
    /// become the chain. The key may be PKCS#8, PKCS#1 (RSA) or SEC1 (EC).
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let mut certs = super::certificate::pem_certificates(cert_pem.as_bytes())?.into_iter();
        let certificate = certs
            .next()
            .ok_or_else(|| Error::Certificate("no CERTIFICATE block in PEM input".to_string()))?;
        let key = super::keys::SigningKey::from_pem(key_pem)?;
        Ok(Self::new(certificate, key).with_chain(certs.collect()))
    }

    /// Load credentials from PEM files on disk, with an optional separate chain file.
    pub fn from_pem_files(
        cert_path: impl AsRef<std::path::Path>,
        key_path: impl AsRef<std::path::Path>,
        chain_path: Option<&std::path::Path>,
    ) -> Result<Self> {
        let cert_pem = std::fs::read_to_string(cert_path)?;
        let key_pem = std::fs::read_to_string(key_path)?;
        let mut credentials = Self::from_pem(&cert_pem, &key_pem)?;
        if let Some(path) = chain_path {
            let chain = super::certificate::pem_certificates(&std::fs::read(path)?)?;
            credentials.chain.extend(chain);
        }
        Ok(credentials)
    }

    /// The private key handle.
    pub fn key(&self) -> &dyn SignatureKey {
        self.key.as_ref()
    }
}

impl std::fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("certificate", &format!("{} bytes", self.certificate.len()))
            .field("private_key", &"[REDACTED]")
            .field("chain", &format!("{} certificates", self.chain.len()))
            .finish()
    }
}

/// HTTP Basic credentials for a time-stamp authority.
#[derive(Clone, PartialEq, Eq)]
pub struct TsaCredentials {
    /// User name
    pub username: String,
    /// Password
    pub password: String,
}

impl std::fmt::Debug for TsaCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TsaCredentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Time-stamp authority to request an RFC 3161 token from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampAuthority {
    /// Endpoint URL
    pub url: String,
    /// Optional Basic authentication
    pub credentials: Option<TsaCredentials>,
    /// Requested TSA policy OID (dotted form)
    pub policy_oid: Option<String>,
    /// Fail signing when no token can be obtained
    pub required: bool,
    /// Upper bound for the whole exchange
    pub timeout: Duration,
}

impl TimestampAuthority {
    /// Default deadline for one TSA round trip.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// An optional TSA at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            credentials: None,
            policy_oid: None,
            required: false,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Use HTTP Basic authentication.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(TsaCredentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Request a specific TSA policy.
    pub fn with_policy(mut self, oid: impl Into<String>) -> Self {
        self.policy_oid = Some(oid.into());
        self
    }

    /// Make the timestamp mandatory (or optional again).
    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// Override the network deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Everything needed to apply one signature.
#[derive(Debug, Clone)]
pub struct SigningRequest {
    /// Dictionary metadata
    pub metadata: SignatureMetadata,
    /// Approval or certification
    pub certification: CertificationType,
    /// Digest algorithm for the byte range and signed attributes
    pub digest_algorithm: DigestAlgorithm,
    /// Signature format
    pub sub_filter: SignatureSubFilter,
    /// Signer identity
    pub credentials: SigningCredentials,
    /// Optional time-stamp authority
    pub timestamp: Option<TimestampAuthority>,
    /// Reserved size of the CMS blob in bytes; estimated when `None`
    pub contents_size: Option<usize>,
    /// Append a refreshed Info dictionary with a new `/ModDate`
    pub update_info: bool,
}

impl SigningRequest {
    /// A SHA-256 PKCS#7 approval signature with default metadata.
    pub fn new(credentials: SigningCredentials) -> Self {
        Self {
            metadata: SignatureMetadata::default(),
            certification: CertificationType::Approval,
            digest_algorithm: DigestAlgorithm::Sha256,
            sub_filter: SignatureSubFilter::Pkcs7Detached,
            credentials,
            timestamp: None,
            contents_size: None,
            update_info: true,
        }
    }

    /// Set the signer name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = Some(name.into());
        self
    }

    /// Set the reason for signing.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.metadata.reason = Some(reason.into());
        self
    }

    /// Set the signing location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.metadata.location = Some(location.into());
        self
    }

    /// Set the contact information.
    pub fn with_contact_info(mut self, contact: impl Into<String>) -> Self {
        self.metadata.contact_info = Some(contact.into());
        self
    }

    /// Set the claimed signing time.
    pub fn with_signing_time(mut self, time: DateTime<Utc>) -> Self {
        self.metadata.signing_time = time;
        self
    }

    /// Make this a certification signature.
    pub fn certify(mut self, permission: DocMdpPermission) -> Self {
        self.certification = CertificationType::Certification { permission };
        self
    }

    /// Choose the digest algorithm.
    pub fn with_digest_algorithm(mut self, alg: DigestAlgorithm) -> Self {
        self.digest_algorithm = alg;
        self
    }

    /// Choose the signature format.
    pub fn with_sub_filter(mut self, sub_filter: SignatureSubFilter) -> Self {
        self.sub_filter = sub_filter;
        self
    }

    /// Request a timestamp.
    pub fn with_timestamp(mut self, tsa: TimestampAuthority) -> Self {
        self.timestamp = Some(tsa);
        self
    }

    /// Reserve an explicit CMS size in bytes.
    pub fn with_contents_size(mut self, size: usize) -> Self {
        self.contents_size = Some(size);
        self
    }

    /// Skip the refreshed Info dictionary.
    pub fn without_info_update(mut self) -> Self {
        self.update_info = false;
        self
    }
}

/// Output of a successful signing run.
#[derive(Debug, Clone)]
pub struct SignedDocument {
    /// Complete signed file
    pub bytes: Vec<u8>,
    /// ByteRange written into the new signature dictionary
    pub byte_range: [i64; 4],
    /// Whether a timestamp token was embedded
    pub timestamped: bool,
}

/// Time attested by an embedded timestamp token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampInfo {
    /// Generation time from the token
    pub time: DateTime<Utc>,
    /// Token signature valid, imprint matching and TSA chain trusted
    pub trusted: bool,
    /// TSA certificate subject, when present
    pub authority: Option<String>,
}

/// Outcome for one embedded signature.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignerResult {
    /// Fully qualified field name
    pub field_name: Option<String>,
    /// `/Name`, else the signer certificate CN
    pub name: Option<String>,
    /// `/Reason`
    pub reason: Option<String>,
    /// `/Location`
    pub location: Option<String>,
    /// `/ContactInfo`
    pub contact_info: Option<String>,
    /// `/M`, else the signingTime attribute
    pub signing_time: Option<DateTime<Utc>>,
    /// Digest, signature value and certificate validity all check out
    pub valid_signature: bool,
    /// An unbroken chain reaches a stored trust anchor
    pub trusted_issuer: bool,
    /// The anchor that made the chain trusted
    pub trust_anchor: Option<TrustAnchor>,
    /// `Some(true)` revoked, `Some(false)` good, `None` unknown
    pub revoked_certificate: Option<bool>,
    /// `/SubFilter`
    pub signature_format: Option<SignatureSubFilter>,
    /// Digest algorithm declared by the signer
    pub digest_algorithm: Option<DigestAlgorithm>,
    /// Signer first, then each issuer found
    pub certificate_chain: Vec<CertificateSummary>,
    /// Embedded timestamp, if any
    pub timestamp: Option<TimestampInfo>,
    /// ByteRange reaches the end of the file
    pub covers_whole_document: bool,
    /// Signer subject CN
    pub signer_common_name: Option<String>,
    /// Signer subject O
    pub signer_organization: Option<String>,
    /// Reasons behind any negative field
    pub errors: Vec<String>,
}

/// Result of verifying every signature in a document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationResult {
    /// One entry per signature, in file order
    pub signers: Vec<SignerResult>,
    /// Hex SHA-256 of the whole file
    pub document_hash: String,
    /// Info `/Creator`
    pub creator: Option<String>,
    /// Info `/Producer`
    pub producer: Option<String>,
}

impl VerificationResult {
    /// Whether the document carries at least one signature.
    pub fn is_signed(&self) -> bool {
        !self.signers.is_empty()
    }

    /// Conjunction of every signer's `valid_signature`; false for unsigned documents.
    pub fn all_valid(&self) -> bool {
        self.is_signed() && self.signers.iter().all(|s| s.valid_signature)
    }

    /// Whether every signer is valid and chains to a trust anchor.
    pub fn all_trusted(&self) -> bool {
        self.all_valid() && self.signers.iter().all(|s| s.trusted_issuer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_algorithm_names() {
        assert_eq!(DigestAlgorithm::Sha256.name(), "SHA-256");
        assert_eq!(DigestAlgorithm::Sha1.name(), "SHA-1");
    }

    #[test]
    fn test_digest_oid_lookup() {
        for alg in [DigestAlgorithm::Sha1, DigestAlgorithm::Sha256, DigestAlgorithm::Sha384, DigestAlgorithm::Sha512] {
            assert_eq!(DigestAlgorithm::from_oid(&alg.oid()), Some(alg));
            assert_eq!(alg.digest(b"abc").len(), alg.output_size());
        }
    }

    #[test]
    fn test_digest_parts_matches_whole() {
        let alg = DigestAlgorithm::Sha384;
        assert_eq!(alg.digest_parts(&[b"hello ", b"world"]), alg.digest(b"hello world"));
    }

    #[test]
    fn test_sub_filter_names() {
        assert_eq!(SignatureSubFilter::Pkcs7Detached.as_pdf_name(), "adbe.pkcs7.detached");
        assert_eq!(
            SignatureSubFilter::from_pdf_name("ETSI.CAdES.detached"),
            Some(SignatureSubFilter::CadesDetached)
        );
        assert_eq!(SignatureSubFilter::from_pdf_name("x.unknown"), None);
        assert!(!SignatureSubFilter::Rfc3161.is_signable());
    }

    #[test]
    fn test_docmdp_p_values() {
        assert_eq!(DocMdpPermission::from_p(1), DocMdpPermission::NoChanges);
        assert_eq!(DocMdpPermission::from_p(7), DocMdpPermission::FillFormsOnly);
        assert_eq!(DocMdpPermission::FillFormsAnnotationsAndFree.p_value(), 3);
        assert!(!DocMdpPermission::NoChanges.allows_signatures());
        assert!(DocMdpPermission::default().allows_signatures());
    }

    #[test]
    fn test_timestamp_authority_builder() {
        let tsa = TimestampAuthority::new("http://tsa.example")
            .with_credentials("user", "secret")
            .required(true);
        assert!(tsa.required);
        assert_eq!(tsa.timeout, Duration::from_secs(10));
        assert!(!format!("{:?}", tsa).contains("secret"));
    }

    #[test]
    fn test_verification_result_conjunction() {
        let mut result = VerificationResult::default();
        assert!(!result.all_valid());
        result.signers.push(SignerResult {
            valid_signature: true,
            ..Default::default()
        });
        assert!(result.all_valid());
        assert!(!result.all_trusted());
        result.signers.push(SignerResult::default());
        assert!(!result.all_valid());
    }
}
