//! PDF digital signatures.
//!
//! Signing ([`PdfSigner`]) appends an incremental update whose signature
//! dictionary carries a detached CMS container over the file's ByteRange.
//! Verification ([`SignatureVerifier`]) recomputes every digest from the raw
//! bytes, checks the CMS signature, rebuilds the certificate chain and asks
//! the [`TrustStore`](crate::trust::TrustStore) whether it ends at an anchor.
//!
//! ## Signature formats
//!
//! - `adbe.pkcs7.detached` (signing and verification)
//! - `ETSI.CAdES.detached` (signing and verification)
//! - `adbe.pkcs7.sha1` (verification only)
//! - `ETSI.RFC3161` document timestamps (verification only)
//!
//! ## Example
//!
//! ```ignore
//! use pdf_seal::signatures::{PdfSigner, SigningCredentials, SigningRequest};
//!
//! let credentials = SigningCredentials::from_pem_files("cert.pem", "key.pem", None)?;
//! let request = SigningRequest::new(credentials).with_reason("Approved");
//! PdfSigner::new(request).sign_file("document.pdf", "signed.pdf")?;
//! ```
//!
//! ## PDF Specification Reference
//!
//! - ISO 32000-1:2008 Section 12.8 - Digital Signatures
//! - ISO 32000-2:2020 Section 12.8 - Digital Signatures
//! - ETSI EN 319 142 - PAdES

mod byterange;
mod certificate;
mod chain;
mod cms;
pub mod keys;
mod revocation;
mod signer;
mod types;
mod verifier;

pub use byterange::ByteRangeCalculator;
pub use certificate::{pem_certificates, CertificateSummary, ParsedCertificate};
pub use chain::{build_chain, CertificateChain, MAX_CHAIN_DEPTH};
pub use cms::{CmsSignature, DetachedSignature};
pub use keys::{KeyAlgorithm, SignatureKey, SigningKey};
pub use revocation::{CrlRevocationChecker, NoRevocationCheck, RevocationChecker, RevocationStatus};
pub use signer::{format_pdf_date, sign_file, PdfSigner};
pub use types::{
    CertificationType, DigestAlgorithm, DocMdpPermission, SignatureMetadata, SignatureSubFilter, SignedDocument,
    SignerResult, SigningCredentials, SigningRequest, TimestampAuthority, TimestampInfo, TsaCredentials,
    VerificationResult,
};
pub use verifier::{parse_pdf_date, SignatureVerifier};
