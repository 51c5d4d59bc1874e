//! Signing keys and raw signature verification.
//!
//! RSA (PKCS#1 v1.5) and ECDSA over P-256/P-384 are supported on both sides.
//! Keys sign a precomputed digest; verification hashes the message itself.

use super::types::DigestAlgorithm;
use crate::error::{Error, Result};
use der::oid::ObjectIdentifier;
use pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use signature::hazmat::{PrehashSigner, PrehashVerifier};

/// rsaEncryption
pub const RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
/// sha1WithRSAEncryption
pub const SHA1_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.5");
/// sha256WithRSAEncryption
pub const SHA256_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");
/// sha384WithRSAEncryption
pub const SHA384_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.12");
/// sha512WithRSAEncryption
pub const SHA512_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.13");
/// RSASSA-PSS (recognized, not supported)
pub const RSA_PSS: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.10");
/// id-ecPublicKey
pub const EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
/// ecdsa-with-SHA1
pub const ECDSA_WITH_SHA1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.1");
/// ecdsa-with-SHA256
pub const ECDSA_WITH_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
/// ecdsa-with-SHA384
pub const ECDSA_WITH_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.3");
/// ecdsa-with-SHA512
pub const ECDSA_WITH_SHA512: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.4");

/// Public-key algorithm family of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    /// RSA, PKCS#1 v1.5 signatures
    Rsa,
    /// ECDSA on NIST P-256
    EcdsaP256,
    /// ECDSA on NIST P-384
    EcdsaP384,
}

impl KeyAlgorithm {
    /// SignerInfo `signatureAlgorithm` for this key and digest.
    pub fn signature_algorithm_oid(&self, digest: DigestAlgorithm) -> ObjectIdentifier {
        match self {
            KeyAlgorithm::Rsa => RSA_ENCRYPTION,
            KeyAlgorithm::EcdsaP256 | KeyAlgorithm::EcdsaP384 => match digest {
                DigestAlgorithm::Sha1 => ECDSA_WITH_SHA1,
                DigestAlgorithm::Sha256 => ECDSA_WITH_SHA256,
                DigestAlgorithm::Sha384 => ECDSA_WITH_SHA384,
                DigestAlgorithm::Sha512 => ECDSA_WITH_SHA512,
            },
        }
    }
}

/// A private key able to sign a digest.
///
/// Implement this to keep keys in external custody (HSM, KMS); the signer
/// only ever hands over digests.
pub trait SignatureKey: Send + Sync {
    /// Key family.
    fn algorithm(&self) -> KeyAlgorithm;

    /// Whether the DER SubjectPublicKeyInfo is this key's public half.
    fn matches_public_key(&self, spki_der: &[u8]) -> bool;

    /// Sign a digest produced with `digest_algorithm`.
    fn sign_digest(&self, digest_algorithm: DigestAlgorithm, digest: &[u8]) -> Result<Vec<u8>>;

    /// Upper bound of an encoded signature, in bytes.
    fn max_signature_len(&self) -> usize;
}

/// In-memory private key.
pub enum SigningKey {
    /// RSA key
    Rsa(RsaPrivateKey),
    /// P-256 key
    P256(p256::ecdsa::SigningKey),
    /// P-384 key
    P384(p384::ecdsa::SigningKey),
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SigningKey").field(&self.algorithm()).field(&"[REDACTED]").finish()
    }
}

impl SigningKey {
    /// Load the first private key block of a PEM buffer
    /// (`PRIVATE KEY`, `RSA PRIVATE KEY` or `EC PRIVATE KEY`).
    pub fn from_pem(pem: &str) -> Result<Self> {
        for block in x509_parser::pem::Pem::iter_from_buffer(pem.as_bytes()) {
            let block = block.map_err(|e| Error::Crypto(format!("invalid PEM: {}", e)))?;
            match block.label.as_str() {
                "PRIVATE KEY" => return Self::from_pkcs8_der(&block.contents),
                "RSA PRIVATE KEY" => {
                    return RsaPrivateKey::from_pkcs1_der(&block.contents)
                        .map(SigningKey::Rsa)
                        .map_err(|e| Error::Crypto(format!("invalid PKCS#1 key: {}", e)));
                },
                "EC PRIVATE KEY" => return Self::from_sec1_der(&block.contents),
                _ => continue,
            }
        }
        Err(Error::Crypto("no private key block in PEM input".to_string()))
    }

    /// Load a PKCS#8 DER private key.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        if let Ok(key) = RsaPrivateKey::from_pkcs8_der(der) {
            return Ok(SigningKey::Rsa(key));
        }
        if let Ok(key) = p256::ecdsa::SigningKey::from_pkcs8_der(der) {
            return Ok(SigningKey::P256(key));
        }
        if let Ok(key) = p384::ecdsa::SigningKey::from_pkcs8_der(der) {
            return Ok(SigningKey::P384(key));
        }
        Err(Error::Crypto("unsupported PKCS#8 key (expected RSA, P-256 or P-384)".to_string()))
    }

    /// Load a SEC1 DER EC private key.
    pub fn from_sec1_der(der: &[u8]) -> Result<Self> {
        if let Ok(key) = p256::SecretKey::from_sec1_der(der) {
            return Ok(SigningKey::P256(key.into()));
        }
        if let Ok(key) = p384::SecretKey::from_sec1_der(der) {
            return Ok(SigningKey::P384(key.into()));
        }
        Err(Error::Crypto("unsupported EC key (expected P-256 or P-384)".to_string()))
    }
}

impl SignatureKey for SigningKey {
    fn algorithm(&self) -> KeyAlgorithm {
        match self {
            SigningKey::Rsa(_) => KeyAlgorithm::Rsa,
            SigningKey::P256(_) => KeyAlgorithm::EcdsaP256,
            SigningKey::P384(_) => KeyAlgorithm::EcdsaP384,
        }
    }

    fn matches_public_key(&self, spki_der: &[u8]) -> bool {
        match self {
            SigningKey::Rsa(key) => {
                RsaPublicKey::from_public_key_der(spki_der).is_ok_and(|public| public == key.to_public_key())
            },
            SigningKey::P256(key) => p256::PublicKey::from_public_key_der(spki_der)
                .is_ok_and(|public| public == p256::PublicKey::from(key.verifying_key())),
            SigningKey::P384(key) => p384::PublicKey::from_public_key_der(spki_der)
                .is_ok_and(|public| public == p384::PublicKey::from(key.verifying_key())),
        }
    }

    fn sign_digest(&self, digest_algorithm: DigestAlgorithm, digest: &[u8]) -> Result<Vec<u8>> {
        if digest.len() != digest_algorithm.output_size() {
            return Err(Error::Crypto(format!(
                "{} digest must be {} bytes, got {}",
                digest_algorithm.name(),
                digest_algorithm.output_size(),
                digest.len()
            )));
        }
        match self {
            SigningKey::Rsa(key) => key
                .sign(pkcs1v15(digest_algorithm), digest)
                .map_err(|e| Error::Crypto(format!("RSA signing failed: {}", e))),
            SigningKey::P256(key) => {
                let sig: p256::ecdsa::Signature = key
                    .sign_prehash(digest)
                    .map_err(|e| Error::Crypto(format!("ECDSA signing failed: {}", e)))?;
                Ok(sig.to_der().as_bytes().to_vec())
            },
            SigningKey::P384(key) => {
                let sig: p384::ecdsa::Signature = key
                    .sign_prehash(digest)
                    .map_err(|e| Error::Crypto(format!("ECDSA signing failed: {}", e)))?;
                Ok(sig.to_der().as_bytes().to_vec())
            },
        }
    }

    fn max_signature_len(&self) -> usize {
        match self {
            SigningKey::Rsa(key) => rsa::traits::PublicKeyParts::size(key),
            SigningKey::P256(_) => 72,
            SigningKey::P384(_) => 104,
        }
    }
}

fn pkcs1v15(digest_algorithm: DigestAlgorithm) -> Pkcs1v15Sign {
    match digest_algorithm {
        DigestAlgorithm::Sha1 => Pkcs1v15Sign::new::<sha1::Sha1>(),
        DigestAlgorithm::Sha256 => Pkcs1v15Sign::new::<sha2::Sha256>(),
        DigestAlgorithm::Sha384 => Pkcs1v15Sign::new::<sha2::Sha384>(),
        DigestAlgorithm::Sha512 => Pkcs1v15Sign::new::<sha2::Sha512>(),
    }
}

/// Resolve a signature algorithm OID to (is_rsa, digest). Bare key OIDs
/// (`rsaEncryption`, `id-ecPublicKey`) take the digest from `digest_hint`.
fn resolve_algorithm(
    signature_algorithm: &ObjectIdentifier,
    digest_hint: Option<DigestAlgorithm>,
) -> Result<(bool, DigestAlgorithm)> {
    const TABLE: [(ObjectIdentifier, bool, Option<DigestAlgorithm>); 10] = [
        (SHA1_WITH_RSA, true, Some(DigestAlgorithm::Sha1)),
        (SHA256_WITH_RSA, true, Some(DigestAlgorithm::Sha256)),
        (SHA384_WITH_RSA, true, Some(DigestAlgorithm::Sha384)),
        (SHA512_WITH_RSA, true, Some(DigestAlgorithm::Sha512)),
        (RSA_ENCRYPTION, true, None),
        (ECDSA_WITH_SHA1, false, Some(DigestAlgorithm::Sha1)),
        (ECDSA_WITH_SHA256, false, Some(DigestAlgorithm::Sha256)),
        (ECDSA_WITH_SHA384, false, Some(DigestAlgorithm::Sha384)),
        (ECDSA_WITH_SHA512, false, Some(DigestAlgorithm::Sha512)),
        (EC_PUBLIC_KEY, false, None),
    ];

    if *signature_algorithm == RSA_PSS {
        return Err(Error::UnsupportedFeature("RSASSA-PSS signatures".to_string()));
    }
    let (_, is_rsa, digest) = TABLE
        .iter()
        .find(|(oid, _, _)| oid == signature_algorithm)
        .ok_or_else(|| Error::UnsupportedFeature(format!("signature algorithm {}", signature_algorithm)))?;
    let digest = digest
        .or(digest_hint)
        .ok_or_else(|| Error::Crypto(format!("no digest algorithm given for {}", signature_algorithm)))?;
    Ok((*is_rsa, digest))
}

/// Verify `signature` over `message` with the key in `spki_der`.
///
/// `Ok(false)` means the signature does not match; `Err` means it could not
/// be checked at all (unknown algorithm, unreadable key).
pub fn verify_signature(
    spki_der: &[u8],
    signature_algorithm: &ObjectIdentifier,
    digest_hint: Option<DigestAlgorithm>,
    message: &[u8],
    signature: &[u8],
) -> Result<bool> {
    let (is_rsa, digest_algorithm) = resolve_algorithm(signature_algorithm, digest_hint)?;
    let digest = digest_algorithm.digest(message);

    if is_rsa {
        let public = RsaPublicKey::from_public_key_der(spki_der)
            .map_err(|e| Error::Crypto(format!("invalid RSA public key: {}", e)))?;
        return Ok(public.verify(pkcs1v15(digest_algorithm), &digest, signature).is_ok());
    }

    if let Ok(key) = p256::ecdsa::VerifyingKey::from_public_key_der(spki_der) {
        let Ok(sig) = p256::ecdsa::Signature::from_der(signature) else {
            return Ok(false);
        };
        return Ok(key.verify_prehash(&digest, &sig).is_ok());
    }
    if let Ok(key) = p384::ecdsa::VerifyingKey::from_public_key_der(spki_der) {
        let Ok(sig) = p384::ecdsa::Signature::from_der(signature) else {
            return Ok(false);
        };
        return Ok(key.verify_prehash(&digest, &sig).is_ok());
    }
    Err(Error::UnsupportedFeature("EC public key on an unsupported curve".to_string()))
}
