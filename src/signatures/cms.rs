//! CMS SignedData for detached PDF signatures.
//!
//! Building is two-phase so a timestamp can be requested over the finished
//! signature value before the container is serialized:
//!
//! ```text
//! DetachedSignature::create  (signed attributes + signature value)
//!     ↓
//! attach_timestamp           (optional unsigned attribute)
//!     ↓
//! to_der                     (ContentInfo { SignedData })
//! ```

use super::keys::RSA_ENCRYPTION;
use super::types::{DigestAlgorithm, SignatureSubFilter, SigningCredentials};
use crate::error::{Error, Result};
use chrono::{DateTime, Datelike, TimeZone, Utc};
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::revocation::{RevocationInfoChoice, RevocationInfoChoices};
use cms::signed_data::{
    CertificateSet, EncapsulatedContentInfo, SignedAttributes, SignedData, SignerIdentifier, SignerInfo, SignerInfos,
    UnsignedAttributes,
};
use der::asn1::{Any, GeneralizedTime, ObjectIdentifier, OctetString, SetOfVec, UtcTime};
use der::{Decode, Encode, Sequence, SliceReader};
use spki::AlgorithmIdentifierOwned;
use x509_cert::attr::Attribute;
use x509_cert::time::Time;
use x509_cert::Certificate;

/// id-data
pub const ID_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");
/// id-signedData
pub const ID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
/// id-contentType
pub const ID_CONTENT_TYPE: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.3");
/// id-messageDigest
pub const ID_MESSAGE_DIGEST: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");
/// id-signingTime
pub const ID_SIGNING_TIME: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.5");
/// id-aa-signingCertificateV2
pub const ID_SIGNING_CERTIFICATE_V2: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.47");
/// id-aa-timeStampToken
pub const ID_TIMESTAMP_TOKEN: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.14");

/// ESSCertIDv2 with the default (SHA-256) hash algorithm left implicit.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct EssCertIdV2 {
    /// Absent means SHA-256
    #[asn1(optional = "true")]
    pub hash_algorithm: Option<AlgorithmIdentifierOwned>,
    /// Hash of the whole certificate
    pub cert_hash: OctetString,
}

/// SigningCertificateV2 without policies.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct SigningCertificateV2 {
    /// Signer certificate first
    pub certs: Vec<EssCertIdV2>,
}

fn attribute(oid: ObjectIdentifier, value: Any) -> Result<Attribute> {
    Ok(Attribute {
        oid,
        values: SetOfVec::try_from(vec![value])?,
    })
}

fn digest_algorithm_identifier(alg: DigestAlgorithm) -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: alg.oid(),
        parameters: None,
    }
}

fn encode_time(time: DateTime<Utc>) -> Result<Time> {
    let since_epoch = std::time::Duration::from_secs(time.timestamp().max(0) as u64);
    // UTCTime covers 1950..2049; later dates must use GeneralizedTime.
    if time.year() < 2050 {
        Ok(Time::UtcTime(UtcTime::from_unix_duration(since_epoch)?))
    } else {
        Ok(Time::GeneralTime(GeneralizedTime::from_unix_duration(since_epoch)?))
    }
}

pub(crate) fn decode_time(time: &Time) -> Option<DateTime<Utc>> {
    let secs = time.to_unix_duration().as_secs();
    Utc.timestamp_opt(secs as i64, 0).single()
}

/// A signer info under construction, plus what the container needs around it.
#[derive(Debug, Clone)]
pub struct DetachedSignature {
    signer_info: SignerInfo,
    certificates: Vec<Certificate>,
    digest_algorithm: DigestAlgorithm,
    content_type: ObjectIdentifier,
    encapsulated: Option<Vec<u8>>,
}

impl DetachedSignature {
    /// Sign `content_digest` (the digest of the ByteRange) with `credentials`.
    ///
    /// PKCS#7 output carries content-type, signing-time and message-digest;
    /// CAdES output carries content-type, message-digest and
    /// signing-certificate-v2 (the time then lives only in `/M`).
    pub fn create(
        credentials: &SigningCredentials,
        digest_algorithm: DigestAlgorithm,
        content_digest: &[u8],
        signing_time: DateTime<Utc>,
        format: SignatureSubFilter,
    ) -> Result<Self> {
        Self::build(credentials, digest_algorithm, ID_DATA, content_digest, signing_time, format)
    }

    /// Sign `content` of type `content_type` and carry it inside the
    /// container, as a time-stamp authority does with TSTInfo.
    pub fn encapsulating(
        credentials: &SigningCredentials,
        digest_algorithm: DigestAlgorithm,
        content_type: ObjectIdentifier,
        content: Vec<u8>,
        signing_time: DateTime<Utc>,
    ) -> Result<Self> {
        let digest = digest_algorithm.digest(&content);
        let mut signature = Self::build(
            credentials,
            digest_algorithm,
            content_type,
            &digest,
            signing_time,
            SignatureSubFilter::CadesDetached,
        )?;
        signature.encapsulated = Some(content);
        Ok(signature)
    }

    fn build(
        credentials: &SigningCredentials,
        digest_algorithm: DigestAlgorithm,
        content_type: ObjectIdentifier,
        content_digest: &[u8],
        signing_time: DateTime<Utc>,
        format: SignatureSubFilter,
    ) -> Result<Self> {
        let signer_cert = Certificate::from_der(&credentials.certificate)?;
        let mut certificates = vec![signer_cert.clone()];
        for der in &credentials.chain {
            certificates.push(Certificate::from_der(der)?);
        }

        let mut attrs = vec![
            attribute(ID_CONTENT_TYPE, Any::encode_from(&content_type)?)?,
            attribute(ID_MESSAGE_DIGEST, Any::encode_from(&OctetString::new(content_digest)?)?)?,
        ];
        match format {
            SignatureSubFilter::CadesDetached => {
                let ess = SigningCertificateV2 {
                    certs: vec![EssCertIdV2 {
                        hash_algorithm: None,
                        cert_hash: OctetString::new(DigestAlgorithm::Sha256.digest(&credentials.certificate))?,
                    }],
                };
                attrs.push(attribute(ID_SIGNING_CERTIFICATE_V2, Any::encode_from(&ess)?)?);
            },
            _ => {
                let time = encode_time(signing_time)?.to_der()?;
                attrs.push(attribute(ID_SIGNING_TIME, Any::from_der(&time)?)?);
            },
        }
        let signed_attrs: SignedAttributes = SetOfVec::try_from(attrs)?;

        // The signature covers the attributes encoded as an explicit SET.
        let attrs_der = signed_attrs.to_der()?;
        let key = credentials.key();
        let signature = key.sign_digest(digest_algorithm, &digest_algorithm.digest(&attrs_der))?;

        let signature_algorithm = key.algorithm().signature_algorithm_oid(digest_algorithm);
        let parameters = if signature_algorithm == RSA_ENCRYPTION {
            Some(Any::null())
        } else {
            None
        };

        let signer_info = SignerInfo {
            version: CmsVersion::V1,
            sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
                issuer: signer_cert.tbs_certificate.issuer.clone(),
                serial_number: signer_cert.tbs_certificate.serial_number.clone(),
            }),
            digest_alg: digest_algorithm_identifier(digest_algorithm),
            signed_attrs: Some(signed_attrs),
            signature_algorithm: AlgorithmIdentifierOwned {
                oid: signature_algorithm,
                parameters,
            },
            signature: OctetString::new(signature)?,
            unsigned_attrs: None,
        };

        Ok(Self {
            signer_info,
            certificates,
            digest_algorithm,
            content_type,
            encapsulated: None,
        })
    }

    /// The raw signature value, which a timestamp imprint is computed over.
    pub fn signature_value(&self) -> &[u8] {
        self.signer_info.signature.as_bytes()
    }

    /// Attach an RFC 3161 token (DER ContentInfo) as an unsigned attribute.
    pub fn attach_timestamp(&mut self, token: &[u8]) -> Result<()> {
        let value = Any::from_der(token)?;
        let attrs: UnsignedAttributes = SetOfVec::try_from(vec![attribute(ID_TIMESTAMP_TOKEN, value)?])?;
        self.signer_info.unsigned_attrs = Some(attrs);
        Ok(())
    }

    /// Serialize as a DER ContentInfo.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        let certificates = self
            .certificates
            .iter()
            .cloned()
            .map(CertificateChoices::Certificate)
            .collect::<Vec<_>>();
        let econtent = match &self.encapsulated {
            Some(content) => Some(Any::encode_from(&OctetString::new(content.clone())?)?),
            None => None,
        };

        let signed_data = SignedData {
            version: if self.content_type == ID_DATA {
                CmsVersion::V1
            } else {
                CmsVersion::V3
            },
            digest_algorithms: SetOfVec::try_from(vec![digest_algorithm_identifier(self.digest_algorithm)])?,
            encap_content_info: EncapsulatedContentInfo {
                econtent_type: self.content_type,
                econtent,
            },
            certificates: Some(CertificateSet(SetOfVec::try_from(certificates)?)),
            crls: None,
            signer_infos: SignerInfos(SetOfVec::try_from(vec![self.signer_info.clone()])?),
        };

        let content_info = ContentInfo {
            content_type: ID_SIGNED_DATA,
            content: Any::encode_from(&signed_data)?,
        };
        Ok(content_info.to_der()?)
    }
}

/// A parsed SignedData with its first signer.
#[derive(Debug, Clone)]
pub struct CmsSignature {
    signed_data: SignedData,
    signer: SignerInfo,
    certificates: Vec<Vec<u8>>,
    crls: Vec<Vec<u8>>,
}

impl CmsSignature {
    /// Parse a ContentInfo. Bytes after the outer structure (placeholder
    /// padding) are ignored.
    pub fn from_der(bytes: &[u8]) -> Result<Self> {
        let mut reader = SliceReader::new(bytes)?;
        let content_info = ContentInfo::decode(&mut reader)?;
        if content_info.content_type != ID_SIGNED_DATA {
            return Err(Error::UnsupportedFeature(format!(
                "CMS content type {} is not signedData",
                content_info.content_type
            )));
        }
        let signed_data: SignedData = content_info.content.decode_as()?;
        let signer = signed_data
            .signer_infos
            .0
            .iter()
            .next()
            .cloned()
            .ok_or_else(|| Error::Crypto("SignedData has no SignerInfo".to_string()))?;

        let mut certificates = Vec::new();
        if let Some(set) = &signed_data.certificates {
            for choice in set.0.iter() {
                if let CertificateChoices::Certificate(cert) = choice {
                    certificates.push(cert.to_der()?);
                }
            }
        }
        let mut crls = Vec::new();
        if let Some(RevocationInfoChoices(set)) = &signed_data.crls {
            for choice in set.iter() {
                if let RevocationInfoChoice::Crl(crl) = choice {
                    crls.push(crl.to_der()?);
                }
            }
        }

        Ok(Self {
            signed_data,
            signer,
            certificates,
            crls,
        })
    }

    /// Embedded certificates, DER.
    pub fn certificates(&self) -> &[Vec<u8>] {
        &self.certificates
    }

    /// Embedded CRLs, DER.
    pub fn crls(&self) -> &[Vec<u8>] {
        &self.crls
    }

    /// Digest algorithm of the signer, when recognized.
    pub fn digest_algorithm(&self) -> Option<DigestAlgorithm> {
        DigestAlgorithm::from_oid(&self.signer.digest_alg.oid)
    }

    /// SignerInfo signatureAlgorithm.
    pub fn signature_algorithm(&self) -> ObjectIdentifier {
        self.signer.signature_algorithm.oid
    }

    /// Raw signature value.
    pub fn signature_value(&self) -> &[u8] {
        self.signer.signature.as_bytes()
    }

    /// eContentType.
    pub fn content_type(&self) -> ObjectIdentifier {
        self.signed_data.encap_content_info.econtent_type
    }

    /// eContent octets, when the content is encapsulated.
    pub fn encapsulated_content(&self) -> Result<Option<Vec<u8>>> {
        match &self.signed_data.encap_content_info.econtent {
            None => Ok(None),
            Some(any) => Ok(Some(any.decode_as::<OctetString>()?.into_bytes())),
        }
    }

    /// DER of the signed attributes as signed (explicit SET), if present.
    pub fn signed_attributes_der(&self) -> Result<Option<Vec<u8>>> {
        match &self.signer.signed_attrs {
            None => Ok(None),
            Some(attrs) => Ok(Some(attrs.to_der()?)),
        }
    }

    fn signed_attribute(&self, oid: ObjectIdentifier) -> Option<&Any> {
        find_attribute(self.signer.signed_attrs.as_ref()?, oid)
    }

    /// messageDigest signed attribute.
    pub fn message_digest(&self) -> Result<Option<Vec<u8>>> {
        match self.signed_attribute(ID_MESSAGE_DIGEST) {
            None => Ok(None),
            Some(any) => Ok(Some(any.decode_as::<OctetString>()?.into_bytes())),
        }
    }

    /// signingTime signed attribute.
    pub fn signing_time(&self) -> Option<DateTime<Utc>> {
        let der = self.signed_attribute(ID_SIGNING_TIME)?.to_der().ok()?;
        decode_time(&Time::from_der(&der).ok()?)
    }

    /// The timeStampToken unsigned attribute, DER.
    pub fn timestamp_token(&self) -> Result<Option<Vec<u8>>> {
        let Some(attrs) = &self.signer.unsigned_attrs else {
            return Ok(None);
        };
        match find_attribute(attrs, ID_TIMESTAMP_TOKEN) {
            None => Ok(None),
            Some(any) => Ok(Some(any.to_der()?)),
        }
    }

    /// The certificate named by the SignerIdentifier, DER.
    pub fn signer_certificate(&self) -> Result<Option<Vec<u8>>> {
        for der in &self.certificates {
            let cert = Certificate::from_der(der)?;
            let matches = match &self.signer.sid {
                SignerIdentifier::IssuerAndSerialNumber(isn) => {
                    cert.tbs_certificate.issuer == isn.issuer
                        && cert.tbs_certificate.serial_number == isn.serial_number
                },
                SignerIdentifier::SubjectKeyIdentifier(ski) => {
                    super::certificate::ParsedCertificate::from_der(der)?.subject_key_id()
                        == Some(ski.0.as_bytes())
                },
            };
            if matches {
                return Ok(Some(der.clone()));
            }
        }
        Ok(None)
    }
}

fn find_attribute(attrs: &SetOfVec<Attribute>, oid: ObjectIdentifier) -> Option<&Any> {
    attrs.iter().find(|a| a.oid == oid).and_then(|a| a.values.iter().next())
}
