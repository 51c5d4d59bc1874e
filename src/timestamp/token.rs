//! Parsed RFC 3161 time-stamp tokens.

use super::asn1::{TstInfo, ID_CT_TST_INFO};
use super::error::TimestampError;
use crate::signatures::{keys, CmsSignature, DigestAlgorithm, ParsedCertificate};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use der::{Decode, Tag, Tagged};

/// A TimeStampToken: CMS SignedData over a TSTInfo.
#[derive(Debug, Clone)]
pub struct TimestampToken {
    der: Vec<u8>,
    cms: CmsSignature,
    content: Vec<u8>,
    info: TstInfo,
}

impl TimestampToken {
    /// Parse a DER token.
    pub fn parse(der: &[u8]) -> Result<Self, TimestampError> {
        let cms = CmsSignature::from_der(der).map_err(|e| TimestampError::DecodeError(e.to_string()))?;
        if cms.content_type() != ID_CT_TST_INFO {
            return Err(TimestampError::DecodeError(format!(
                "token content type {} is not TSTInfo",
                cms.content_type()
            )));
        }
        let content = cms
            .encapsulated_content()
            .map_err(|e| TimestampError::DecodeError(e.to_string()))?
            .ok_or_else(|| TimestampError::DecodeError("token carries no TSTInfo".to_string()))?;
        let info = TstInfo::from_der(&content)?;
        Ok(Self {
            der: der.to_vec(),
            cms,
            content,
            info,
        })
    }

    /// DER encoding as received.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// The decoded TSTInfo.
    pub fn info(&self) -> &TstInfo {
        &self.info
    }

    /// Certificates carried in the token, DER.
    pub fn certificates(&self) -> &[Vec<u8>] {
        self.cms.certificates()
    }

    /// `genTime`.
    pub fn gen_time(&self) -> Result<DateTime<Utc>, TimestampError> {
        parse_generalized_time(&self.info.gen_time)
    }

    /// Hash algorithm of the message imprint.
    pub fn imprint_algorithm(&self) -> Option<DigestAlgorithm> {
        DigestAlgorithm::from_oid(&self.info.message_imprint.hash_algorithm.oid)
    }

    /// Whether the imprint is the hash of `data`.
    pub fn matches_imprint(&self, data: &[u8]) -> bool {
        self.imprint_algorithm()
            .is_some_and(|alg| alg.digest(data) == self.info.message_imprint.hashed_message.as_bytes())
    }

    /// Check the token's own signature and return the TSA certificate.
    pub fn verify_signature(&self) -> Result<ParsedCertificate, TimestampError> {
        let signer_der = self
            .cms
            .signer_certificate()
            .map_err(|e| TimestampError::DecodeError(e.to_string()))?
            .ok_or_else(|| TimestampError::InvalidSignature("TSA certificate not included".to_string()))?;
        let signer = ParsedCertificate::from_der(&signer_der).map_err(|e| TimestampError::DecodeError(e.to_string()))?;
        let digest_algorithm = self.cms.digest_algorithm().ok_or(TimestampError::UnsupportedAlgorithm)?;

        let signed_attrs = self
            .cms
            .signed_attributes_der()
            .map_err(|e| TimestampError::DecodeError(e.to_string()))?;
        let message = match signed_attrs {
            Some(attrs) => {
                let digest = self
                    .cms
                    .message_digest()
                    .map_err(|e| TimestampError::DecodeError(e.to_string()))?
                    .ok_or_else(|| TimestampError::InvalidSignature("no messageDigest attribute".to_string()))?;
                if digest != digest_algorithm.digest(&self.content) {
                    return Err(TimestampError::InvalidSignature("messageDigest does not match TSTInfo".to_string()));
                }
                attrs
            },
            None => self.content.clone(),
        };

        match keys::verify_signature(
            signer.spki_der(),
            &self.cms.signature_algorithm(),
            Some(digest_algorithm),
            &message,
            self.cms.signature_value(),
        ) {
            Ok(true) => Ok(signer),
            Ok(false) => Err(TimestampError::InvalidSignature("signature does not verify".to_string())),
            Err(crate::Error::UnsupportedFeature(_)) => Err(TimestampError::UnsupportedAlgorithm),
            Err(e) => Err(TimestampError::InvalidSignature(e.to_string())),
        }
    }
}

/// `YYYYMMDDHHMMSS[.f+]Z`
fn parse_generalized_time(value: &der::asn1::Any) -> Result<DateTime<Utc>, TimestampError> {
    if value.tag() != Tag::GeneralizedTime {
        return Err(TimestampError::DecodeError(format!("genTime has tag {}", value.tag())));
    }
    let text = std::str::from_utf8(value.value())
        .map_err(|_| TimestampError::DecodeError("genTime is not ASCII".to_string()))?;
    let text = text
        .strip_suffix('Z')
        .ok_or_else(|| TimestampError::DecodeError(format!("genTime '{}' is not UTC", text)))?;
    let (whole, fraction) = text.split_once('.').unwrap_or((text, ""));

    let naive = NaiveDateTime::parse_from_str(whole, "%Y%m%d%H%M%S")
        .map_err(|e| TimestampError::DecodeError(format!("genTime '{}': {}", text, e)))?;
    let mut time = Utc.from_utc_datetime(&naive);
    if !fraction.is_empty() {
        if !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TimestampError::DecodeError(format!("genTime fraction '{}'", fraction)));
        }
        let nanos: String = fraction.chars().chain(std::iter::repeat('0')).take(9).collect();
        let nanos: i64 = nanos
            .parse()
            .map_err(|_| TimestampError::DecodeError(format!("genTime fraction '{}'", fraction)))?;
        time += chrono::Duration::nanoseconds(nanos);
    }
    Ok(time)
}
