use crate::error::Result;
use crate::signatures::ParsedCertificate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A trusted issuer, indexed by its Subject Key Identifier.
///
/// Key identifiers and the fingerprint are uppercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustAnchor {
    /// Trust list the anchor came from
    pub list_name: String,
    /// Subject CN of the anchor certificate
    pub issuer_common_name: String,
    /// SKI extension, else SHA-1 of the public key bits
    pub subject_key_id: String,
    /// AKI extension of the anchor certificate, when present
    pub authority_key_id: Option<String>,
    /// SHA-1 of the certificate DER
    pub fingerprint: String,
    /// DER SubjectPublicKeyInfo, for certificates issued by the anchor
    /// but embedded without it
    #[serde(default)]
    pub public_key: Option<String>,
    /// When the row was stored
    pub created_at: DateTime<Utc>,
}

impl TrustAnchor {
    /// Normalized form of a hex key identifier.
    pub fn normalize_key_id(key_id: &str) -> String {
        key_id
            .chars()
            .filter(|c| !c.is_whitespace() && *c != ':')
            .collect::<String>()
            .to_ascii_uppercase()
    }
}

/// Derive the anchor row for a DER certificate.
pub fn anchor_from_certificate(list_name: &str, der: &[u8]) -> Result<TrustAnchor> {
    let cert = ParsedCertificate::from_der(der)?;
    Ok(TrustAnchor {
        list_name: list_name.to_string(),
        issuer_common_name: cert.common_name().unwrap_or_else(|| cert.subject()).to_string(),
        subject_key_id: cert.key_id_hex(),
        authority_key_id: cert.authority_key_id().map(hex::encode_upper),
        fingerprint: cert.fingerprint(),
        public_key: Some(hex::encode_upper(cert.spki_der())),
        created_at: Utc::now(),
    })
}
