//! Certificate revocation checking.
//!
//! Revocation never changes whether a signature is cryptographically valid;
//! the verifier reports it separately. Every failure to obtain or use a CRL
//! degrades to [`RevocationStatus::Unknown`].

use super::certificate::{strip_leading_zeros, ParsedCertificate};
use super::cms::decode_time;
use super::keys;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use der::{Decode, Encode};
use std::io::Read;
use std::time::Duration;
use x509_cert::crl::CertificateList;

/// Largest CRL accepted from a distribution point.
const MAX_CRL_SIZE: u64 = 10 * 1024 * 1024;

/// Outcome of a revocation lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationStatus {
    /// Listed as not revoked by an authentic CRL
    Good,
    /// Revoked at the given time
    Revoked {
        /// `revocationDate` of the CRL entry
        at: Option<DateTime<Utc>>,
    },
    /// No usable revocation information
    Unknown,
}

impl RevocationStatus {
    /// Map onto the report field: `Some(true)` revoked, `Some(false)` good.
    pub fn as_report(&self) -> Option<bool> {
        match self {
            RevocationStatus::Good => Some(false),
            RevocationStatus::Revoked { .. } => Some(true),
            RevocationStatus::Unknown => None,
        }
    }
}

/// Source of revocation information.
pub trait RevocationChecker: Send + Sync {
    /// Status of `cert`, issued by `issuer` when known. `embedded` holds CRLs
    /// (DER) that travelled inside the signature.
    fn check(
        &self,
        cert: &ParsedCertificate,
        issuer: Option<&ParsedCertificate>,
        embedded: &[Vec<u8>],
    ) -> Result<RevocationStatus>;
}

/// Never consults anything; everything is unknown.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRevocationCheck;

impl RevocationChecker for NoRevocationCheck {
    fn check(&self, _: &ParsedCertificate, _: Option<&ParsedCertificate>, _: &[Vec<u8>]) -> Result<RevocationStatus> {
        Ok(RevocationStatus::Unknown)
    }
}

/// CRL-based checker: embedded CRLs first, then the certificate's HTTP
/// distribution points.
#[derive(Debug, Clone)]
pub struct CrlRevocationChecker {
    timeout: Duration,
    fetch: bool,
}

impl Default for CrlRevocationChecker {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            fetch: true,
        }
    }
}

impl CrlRevocationChecker {
    /// Checker with a 10 s download timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Download timeout per distribution point.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use only CRLs embedded in the signature.
    pub fn offline(mut self) -> Self {
        self.fetch = false;
        self
    }

    fn download(&self, url: &str) -> Result<Vec<u8>> {
        let agent = ureq::AgentBuilder::new().timeout(self.timeout).build();
        let response = agent.get(url).call()?;
        let mut body = Vec::new();
        response.into_reader().take(MAX_CRL_SIZE).read_to_end(&mut body)?;
        Ok(body)
    }

    /// Look `cert` up in one CRL. `None` when the CRL does not apply or cannot be trusted.
    fn consult(&self, crl_der: &[u8], cert: &ParsedCertificate, issuer: &ParsedCertificate) -> Option<RevocationStatus> {
        let crl = match CertificateList::from_der(crl_der) {
            Ok(crl) => crl,
            Err(e) => {
                log::warn!("Ignoring unparsable CRL: {}", e);
                return None;
            },
        };

        let crl_issuer = crl.tbs_cert_list.issuer.to_der().ok()?;
        if crl_issuer != issuer.subject_raw() {
            return None;
        }
        let tbs = crl.tbs_cert_list.to_der().ok()?;
        let signature = crl.signature.as_bytes()?;
        match keys::verify_signature(issuer.spki_der(), &crl.signature_algorithm.oid, None, &tbs, signature) {
            Ok(true) => {},
            Ok(false) => {
                log::warn!("CRL from '{}' has an invalid signature", issuer.subject());
                return None;
            },
            Err(e) => {
                log::warn!("Cannot check CRL signature from '{}': {}", issuer.subject(), e);
                return None;
            },
        }

        let revoked = crl
            .tbs_cert_list
            .revoked_certificates
            .iter()
            .flatten()
            .find(|entry| strip_leading_zeros(entry.serial_number.as_bytes()) == cert.serial());
        Some(match revoked {
            Some(entry) => RevocationStatus::Revoked {
                at: decode_time(&entry.revocation_date),
            },
            None => RevocationStatus::Good,
        })
    }
}

impl RevocationChecker for CrlRevocationChecker {
    fn check(
        &self,
        cert: &ParsedCertificate,
        issuer: Option<&ParsedCertificate>,
        embedded: &[Vec<u8>],
    ) -> Result<RevocationStatus> {
        // A CRL is only as good as the key that signed it.
        let Some(issuer) = issuer else {
            return Ok(RevocationStatus::Unknown);
        };

        for crl in embedded {
            if let Some(status) = self.consult(crl, cert, issuer) {
                return Ok(status);
            }
        }

        if !self.fetch {
            return Ok(RevocationStatus::Unknown);
        }
        let mut last_error = None;
        for url in cert.crl_urls() {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                continue;
            }
            match self.download(url) {
                Ok(crl) => {
                    if let Some(status) = self.consult(&crl, cert, issuer) {
                        return Ok(status);
                    }
                },
                Err(e) => {
                    log::warn!("CRL download from {} failed: {}", url, e);
                    last_error = Some(e);
                },
            }
        }
        match last_error {
            Some(e) => Err(Error::RevocationCheckUnavailable(e.to_string())),
            None => Ok(RevocationStatus::Unknown),
        }
    }
}
