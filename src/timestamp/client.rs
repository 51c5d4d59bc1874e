//! Time-stamp providers: the RFC 3161 HTTP client and a local authority.

use super::asn1::{MessageImprint, TimeStampReq, TimeStampResp, TstInfo, ID_CT_TST_INFO};
use super::error::TimestampError;
use super::token::TimestampToken;
use crate::signatures::{DetachedSignature, DigestAlgorithm, SigningCredentials, TimestampAuthority, TsaCredentials};
use base64::Engine;
use chrono::{DateTime, Utc};
use der::asn1::{Any, GeneralizedTime, ObjectIdentifier, OctetString, Uint};
use der::{Decode, Encode};
use rand::RngCore;
use spki::AlgorithmIdentifierOwned;
use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const HTTP_CONTENT_TYPE_REQUEST: &str = "application/timestamp-query";
const HTTP_CONTENT_TYPE_RESPONSE: &str = "application/timestamp-reply";

/// Largest response body read from a TSA.
const MAX_RESPONSE_SIZE: u64 = 1_000_000;

/// Something that can time-stamp a digest.
pub trait TimestampProvider: Send + Sync {
    /// Return a DER TimeStampToken whose imprint is `digest`.
    fn timestamp(&self, digest_algorithm: DigestAlgorithm, digest: &[u8]) -> Result<Vec<u8>, TimestampError>;
}

/// RFC 3161 client over HTTP(S).
#[derive(Debug, Clone)]
pub struct TimestampClient {
    url: String,
    credentials: Option<TsaCredentials>,
    policy: Option<ObjectIdentifier>,
    timeout: Duration,
}

impl TimestampClient {
    /// Client for `url` with the default timeout and no credentials.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            credentials: None,
            policy: None,
            timeout: TimestampAuthority::DEFAULT_TIMEOUT,
        }
    }

    /// Client configured from a [`TimestampAuthority`].
    pub fn from_authority(tsa: &TimestampAuthority) -> Result<Self, TimestampError> {
        let policy = tsa
            .policy_oid
            .as_deref()
            .map(ObjectIdentifier::new)
            .transpose()
            .map_err(|e| TimestampError::InternalError(format!("invalid policy OID: {}", e)))?;
        Ok(Self {
            url: tsa.url.clone(),
            credentials: tsa.credentials.clone(),
            policy,
            timeout: tsa.timeout,
        })
    }

    /// Endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn post(&self, body: &[u8]) -> Result<Vec<u8>, TimestampError> {
        let agent = ureq::AgentBuilder::new().timeout(self.timeout).build();
        let mut request = agent.post(&self.url).set("Content-Type", HTTP_CONTENT_TYPE_REQUEST);
        if let Some(creds) = &self.credentials {
            let token = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", creds.username, creds.password));
            request = request.set("Authorization", &format!("Basic {}", token));
        }

        let response = request.send_bytes(body)?;
        if response.content_type() != HTTP_CONTENT_TYPE_RESPONSE {
            log::debug!("TSA {} answered with content type {}", self.url, response.content_type());
        }

        let mut bytes = Vec::new();
        response.into_reader().take(MAX_RESPONSE_SIZE).read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

impl TimestampProvider for TimestampClient {
    fn timestamp(&self, digest_algorithm: DigestAlgorithm, digest: &[u8]) -> Result<Vec<u8>, TimestampError> {
        let mut nonce = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut nonce);
        nonce[0] &= 0x7F;

        let request = build_request(digest_algorithm, digest, self.policy, &nonce)?;
        log::debug!("Requesting {} timestamp from {}", digest_algorithm.name(), self.url);
        let response = self.post(&request.to_der()?)?;
        process_response(&response, &request)
    }
}

/// A TimeStampReq asking for the TSA certificate to be included.
pub fn build_request(
    digest_algorithm: DigestAlgorithm,
    digest: &[u8],
    policy: Option<ObjectIdentifier>,
    nonce: &[u8],
) -> Result<TimeStampReq, TimestampError> {
    Ok(TimeStampReq {
        version: 1,
        message_imprint: imprint(digest_algorithm, digest)?,
        req_policy: policy,
        nonce: Some(Uint::new(nonce)?),
        cert_req: true,
        extensions: None,
    })
}

fn imprint(digest_algorithm: DigestAlgorithm, digest: &[u8]) -> Result<MessageImprint, TimestampError> {
    Ok(MessageImprint {
        hash_algorithm: AlgorithmIdentifierOwned {
            oid: digest_algorithm.oid(),
            parameters: None,
        },
        hashed_message: OctetString::new(digest)?,
    })
}

/// Check a TimeStampResp against the request it answers and return the token.
pub fn process_response(response: &[u8], request: &TimeStampReq) -> Result<Vec<u8>, TimestampError> {
    let response = TimeStampResp::from_der(response)?;
    if !response.status.is_granted() {
        return Err(TimestampError::Rejected {
            status: response.status.status,
            text: response.status.text(),
        });
    }
    let token = response
        .time_stamp_token
        .ok_or_else(|| TimestampError::DecodeError("granted response without a token".to_string()))?
        .to_der()?;

    let parsed = TimestampToken::parse(&token)?;
    if parsed.info().nonce != request.nonce {
        return Err(TimestampError::NonceMismatch);
    }
    if parsed.info().message_imprint != request.message_imprint {
        return Err(TimestampError::InvalidData);
    }
    Ok(token)
}

/// Issues tokens locally with a given key, for offline signing and tests.
pub struct LocalTimestampAuthority {
    credentials: SigningCredentials,
    policy: ObjectIdentifier,
    fixed_time: Option<DateTime<Utc>>,
    serial: AtomicU64,
}

impl LocalTimestampAuthority {
    /// Policy OID used when none is set.
    pub const DEFAULT_POLICY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.1");

    /// Authority signing with `credentials`; its certificate should carry
    /// the timeStamping extended key usage.
    pub fn new(credentials: SigningCredentials) -> Self {
        Self {
            credentials,
            policy: Self::DEFAULT_POLICY,
            fixed_time: None,
            serial: AtomicU64::new(1),
        }
    }

    /// Stamp every token with `time` instead of the current time.
    pub fn at_time(mut self, time: DateTime<Utc>) -> Self {
        self.fixed_time = Some(time);
        self
    }

    /// TSA policy OID.
    pub fn with_policy(mut self, policy: ObjectIdentifier) -> Self {
        self.policy = policy;
        self
    }

    fn issue(&self, digest_algorithm: DigestAlgorithm, digest: &[u8]) -> crate::Result<Vec<u8>> {
        let time = self.fixed_time.unwrap_or_else(Utc::now);
        let since_epoch = Duration::from_secs(time.timestamp().max(0) as u64);
        let serial = self.serial.fetch_add(1, Ordering::Relaxed);

        let info = TstInfo {
            version: 1,
            policy: self.policy,
            message_imprint: imprint(digest_algorithm, digest)?,
            serial_number: Uint::new(&serial.to_be_bytes())?,
            gen_time: Any::encode_from(&GeneralizedTime::from_unix_duration(since_epoch)?)?,
            accuracy: None,
            ordering: false,
            nonce: None,
            tsa: None,
            extensions: None,
        };
        let token = DetachedSignature::encapsulating(
            &self.credentials,
            DigestAlgorithm::Sha256,
            ID_CT_TST_INFO,
            info.to_der()?,
            time,
        )?;
        token.to_der()
    }
}

impl TimestampProvider for LocalTimestampAuthority {
    fn timestamp(&self, digest_algorithm: DigestAlgorithm, digest: &[u8]) -> Result<Vec<u8>, TimestampError> {
        self.issue(digest_algorithm, digest)
            .map_err(|e| TimestampError::InternalError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_carries_nonce_and_cert_req() {
        let digest = DigestAlgorithm::Sha256.digest(b"signature value");
        let req = build_request(DigestAlgorithm::Sha256, &digest, None, &[0x01, 0x02]).unwrap();
        assert!(req.cert_req);
        assert_eq!(req.nonce.unwrap().as_bytes(), &[0x01, 0x02]);
        assert_eq!(req.message_imprint.hashed_message.as_bytes(), digest.as_slice());
    }

    #[test]
    fn test_rejected_response() {
        let digest = [0u8; 32];
        let req = build_request(DigestAlgorithm::Sha256, &digest, None, &[1]).unwrap();
        // SEQUENCE { SEQUENCE { INTEGER 2 } }
        let err = process_response(&[0x30, 0x05, 0x30, 0x03, 0x02, 0x01, 0x02], &req).unwrap_err();
        assert!(matches!(err, TimestampError::Rejected { status: 2, .. }));
    }

    #[test]
    fn test_granted_response_without_token() {
        let req = build_request(DigestAlgorithm::Sha256, &[0u8; 32], None, &[1]).unwrap();
        let err = process_response(&[0x30, 0x05, 0x30, 0x03, 0x02, 0x01, 0x00], &req).unwrap_err();
        assert!(matches!(err, TimestampError::DecodeError(_)));
    }

    #[test]
    fn test_unreachable_tsa() {
        let client = TimestampClient {
            timeout: Duration::from_secs(2),
            ..TimestampClient::new("http://127.0.0.1:1/")
        };
        let err = client.timestamp(DigestAlgorithm::Sha256, &[0u8; 32]).unwrap_err();
        assert!(matches!(err, TimestampError::HttpConnectionError(_)));
    }
}
