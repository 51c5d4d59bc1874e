use thiserror::Error;

/// Errors that can occur when requesting or checking an [RFC 3161] time stamp.
///
/// [RFC 3161]: https://www.ietf.org/rfc/rfc3161.txt
#[derive(Debug, Error)]
pub enum TimestampError {
    /// No response was received from the time-stamp service.
    #[error("unable to complete HTTP request ({0})")]
    HttpConnectionError(String),

    /// The service answered with an HTTP error.
    #[error("service responded with an HTTP error (status = {0}, content-type = {1})")]
    HttpErrorResponse(u16, String),

    /// The response or token could not be decoded.
    #[error("decode error ({0})")]
    DecodeError(String),

    /// The service refused to issue a token.
    #[error("time stamp request rejected (status {status}: {text})")]
    Rejected {
        /// PKIStatus value
        status: u32,
        /// statusString, joined
        text: String,
    },

    /// The token does not echo the request nonce.
    #[error("nonce mismatch")]
    NonceMismatch,

    /// The token's message imprint does not match the stamped data.
    #[error("time stamp does not match data")]
    InvalidData,

    /// The token's signature does not verify.
    #[error("time stamp signature is invalid ({0})")]
    InvalidSignature(String),

    /// The token uses an unsupported hash or signature algorithm.
    #[error("time stamp contains an unsupported algorithm")]
    UnsupportedAlgorithm,

    /// An I/O error occurred while reading the response.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Building the request or a token failed.
    #[error("internal error ({0})")]
    InternalError(String),
}

impl From<ureq::Error> for TimestampError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(status, response) => {
                TimestampError::HttpErrorResponse(status, response.content_type().to_string())
            },
            other => TimestampError::HttpConnectionError(other.to_string()),
        }
    }
}

impl From<der::Error> for TimestampError {
    fn from(err: der::Error) -> Self {
        TimestampError::DecodeError(err.to_string())
    }
}
