// Allow some clippy lints that are too pedantic for this project
#![allow(clippy::too_many_arguments)]
#![allow(clippy::new_without_default)]
// Allow unused for tests
#![cfg_attr(test, allow(dead_code))]

//! # PDF Seal
//!
//! Digital signatures for PDF documents, in pure Rust.
//!
//! ## Core Features
//!
//! - **Structure access**: classic and cross-reference-stream files, object
//!   streams, hybrid references and `/Prev` chains
//! - **Incremental updates**: append-only revisions that leave every earlier
//!   byte untouched
//! - **Signing**: `adbe.pkcs7.detached` and `ETSI.CAdES.detached` with RSA or
//!   ECDSA keys, approval and DocMDP certification signatures
//! - **Timestamps**: RFC 3161 client, signature timestamps and verification
//!   of document timestamps
//! - **Verification**: ByteRange digests, CMS signatures, certificate chains,
//!   CRL revocation and trust decisions per signature
//! - **Trust store**: anchors keyed by Subject Key Identifier, refreshed from
//!   AATL/EUTL feeds and persisted as JSON
//!
//! ## Quick Start
//!
//! ```ignore
//! use pdf_seal::signatures::{SigningCredentials, SigningRequest};
//! use pdf_seal::trust::TrustStore;
//!
//! # fn main() -> pdf_seal::Result<()> {
//! let credentials = SigningCredentials::from_pem_files("cert.pem", "key.pem", None)?;
//! let request = SigningRequest::new(credentials).with_reason("Approved");
//! pdf_seal::sign_file("contract.pdf", "contract-signed.pdf", request)?;
//!
//! let store = TrustStore::open("trust.json")?;
//! let report = pdf_seal::verify(&std::fs::read("contract-signed.pdf")?, &store)?;
//! for signer in &report.signers {
//!     println!("{:?}: valid {} trusted {}", signer.name, signer.valid_signature, signer.trusted_issuer);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## License
//!
//! Licensed under either of:
//!
//! * Apache License, Version 2.0 ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
//! * MIT license ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)
//!
//! at your option.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Error handling
pub mod error;

// Configuration
pub mod config;

// Core PDF parsing
pub mod document;
pub mod lexer;
pub mod object;
pub mod objstm;
pub mod parser;
pub mod xref;

// Stream decoders
pub mod decoders;

// Incremental writing
pub mod writer;

// Signing, verification, timestamps and trust
pub mod signatures;
pub mod timestamp;
pub mod trust;

pub use config::SealConfig;
pub use document::PdfStructure;
pub use error::{Error, Result};
pub use signatures::{sign_file, PdfSigner, SignatureVerifier, SignedDocument, SigningRequest, VerificationResult};
pub use trust::TrustStore;

/// Sign `data` with `request`, returning the updated file.
pub fn sign(data: &[u8], request: SigningRequest) -> Result<SignedDocument> {
    PdfSigner::new(request).sign(data)
}

/// Verify every signature in `data` against `trust_store`.
pub fn verify(data: &[u8], trust_store: &TrustStore) -> Result<VerificationResult> {
    SignatureVerifier::new(trust_store).verify(data)
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    #[test]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
    }
}
