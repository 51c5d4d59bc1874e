//! Error types for PDF signing and verification.
//!
//! The first group of variants is the signing/verification taxonomy that
//! callers branch on; the rest is plumbing from parsing, ASN.1 and I/O.

use crate::timestamp::TimestampError;

/// Result type alias for pdf_seal operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while reading, signing or verifying a PDF.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The source PDF could not be parsed (bad header, trailer, xref or object graph).
    #[error("Structural error: {0}")]
    Structural(String),

    /// A feature the signer/verifier does not handle (encryption, unknown SubFilter, ...).
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// The signer certificate's public key does not belong to the supplied private key.
    #[error("Signer certificate does not match the private key")]
    KeyMismatch,

    /// DocMDP rules forbid the requested signature.
    #[error("Permission violation: {0}")]
    PermissionViolation(String),

    /// The CMS blob does not fit into the reserved /Contents placeholder.
    #[error("Signature ({required} bytes) exceeds the reserved /Contents size ({reserved} bytes)")]
    ContentsOverflow {
        /// Hex characters needed
        required: usize,
        /// Hex characters reserved
        reserved: usize,
    },

    /// The time-stamp authority could not deliver a token.
    #[error("Time-stamp authority unavailable: {0}")]
    TsaUnavailable(String),

    /// No certificate path reaches a trust anchor.
    #[error("Certificate chain error: {0}")]
    ChainBuild(String),

    /// Revocation status could not be determined.
    #[error("Revocation check unavailable: {0}")]
    RevocationCheckUnavailable(String),

    /// Parse error at a specific byte offset
    #[error("Failed to parse object at byte {offset}: {reason}")]
    ParseError {
        /// Byte offset where the error occurred
        offset: usize,
        /// Reason for the parse failure
        reason: String,
    },

    /// Invalid cross-reference table
    #[error("Invalid cross-reference table")]
    InvalidXref,

    /// Referenced object not found in the cross-reference table
    #[error("Object not found: {0} {1} R")]
    ObjectNotFound(u32, u16),

    /// Stream decoding error
    #[error("Stream decoding error: {0}")]
    Decode(String),

    /// DER encoding/decoding error
    #[error("ASN.1 error: {0}")]
    Asn1(#[from] der::Error),

    /// Certificate could not be parsed or used
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Key loading, signing or signature verification failure
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// RFC 3161 protocol error
    #[error(transparent)]
    Timestamp(#[from] TimestampError),

    /// Trust store persistence error
    #[error("Trust store error: {0}")]
    TrustStore(String),

    /// HTTP transport error (trust-list feeds, CRL downloads)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a structural error.
    pub(crate) fn structural(msg: impl Into<String>) -> Self {
        Error::Structural(msg.into())
    }

    /// Whether this error describes a malformed source document.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::Structural(_)
                | Error::ParseError { .. }
                | Error::InvalidXref
                | Error::ObjectNotFound(..)
                | Error::Decode(_)
        )
    }
}

impl From<ureq::Error> for Error {
    fn from(err: ureq::Error) -> Self {
        Error::Http(err.to_string())
    }
}

impl From<x509_parser::nom::Err<x509_parser::error::X509Error>> for Error {
    fn from(err: x509_parser::nom::Err<x509_parser::error::X509Error>) -> Self {
        Error::Certificate(err.to_string())
    }
}
