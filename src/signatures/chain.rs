//! Certificate path building over the certificates embedded in a signature.

use super::certificate::ParsedCertificate;

/// Longest path followed before giving up.
pub const MAX_CHAIN_DEPTH: usize = 10;

/// Signer first, then each issuer found.
#[derive(Debug, Clone)]
pub struct CertificateChain {
    /// Certificates in path order
    pub certificates: Vec<ParsedCertificate>,
    /// Why the path stopped early, if it did
    pub errors: Vec<String>,
}

impl CertificateChain {
    /// Last certificate of the path.
    pub fn top(&self) -> Option<&ParsedCertificate> {
        self.certificates.last()
    }

    /// Whether the path ends at a self-issued certificate.
    pub fn is_complete(&self) -> bool {
        self.top().is_some_and(|c| c.is_self_issued())
    }

    /// Issuer certificates (everything above the signer) outside their
    /// validity window at `at`.
    pub fn invalid_issuers_at(&self, at: chrono::DateTime<chrono::Utc>) -> Vec<&ParsedCertificate> {
        self.certificates.iter().skip(1).filter(|c| !c.is_valid_at(at)).collect()
    }
}

/// Walk from `signer` through `pool`, choosing at each step a candidate that
/// names itself as the issuer and whose key verifies the child's signature.
///
/// Stops at a self-issued certificate, when no issuer is found, or at
/// [`MAX_CHAIN_DEPTH`].
pub fn build_chain(signer: ParsedCertificate, pool: &[ParsedCertificate]) -> CertificateChain {
    let mut chain = CertificateChain {
        certificates: vec![signer],
        errors: Vec::new(),
    };

    while chain.certificates.len() < MAX_CHAIN_DEPTH {
        let current = &chain.certificates[chain.certificates.len() - 1];
        if current.is_self_issued() {
            return chain;
        }

        let mut next = None;
        for candidate in pool {
            if chain.certificates.iter().any(|c| c.der() == candidate.der()) || !current.names_issuer(candidate) {
                continue;
            }
            match current.is_signed_by(candidate) {
                Ok(true) => {
                    next = Some(candidate.clone());
                    break;
                },
                Ok(false) => chain
                    .errors
                    .push(format!("'{}' names '{}' but its signature does not verify", current.subject(), candidate.subject())),
                Err(e) => chain
                    .errors
                    .push(format!("cannot check '{}' against '{}': {}", current.subject(), candidate.subject(), e)),
            }
        }

        match next {
            Some(issuer) => {
                log::trace!("Chain step: '{}' issued by '{}'", current.subject(), issuer.subject());
                chain.certificates.push(issuer);
            },
            None => {
                chain
                    .errors
                    .push(format!("issuer '{}' not found among embedded certificates", current.issuer()));
                return chain;
            },
        }
    }

    if !chain.is_complete() {
        chain
            .errors
            .push(format!("certificate path longer than {} certificates", MAX_CHAIN_DEPTH));
    }
    chain
}
