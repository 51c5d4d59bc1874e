//! Shared fixtures: small PDFs in every cross-reference flavour and a test PKI.

#![allow(dead_code)]

use pdf_seal::signatures::{ParsedCertificate, SigningCredentials, SigningKey};
use pdf_seal::timestamp::LocalTimestampAuthority;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyIdMethod, KeyPair,
    KeyUsagePurpose,
};

/// PKCS#8 RSA-2048 key used where an RSA signer is needed.
pub const RSA_KEY_PEM: &str = include_str!("../fixtures/rsa2048.key.pem");

const PAGE_OBJECTS: [&str; 4] = [
    "<< /Type /Catalog /Pages 2 0 R >>",
    "<< /Type /Pages /Kids [3 0 R] /Count 1 >>",
    "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>",
    "<< /Producer (pdf_seal tests) /Creator (fixtures) >>",
];

fn write_objects(pdf: &mut Vec<u8>, bodies: &[&str]) -> Vec<usize> {
    let mut offsets = Vec::new();
    for (i, body) in bodies.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }
    offsets
}

/// One-page document with a classic xref table.
pub fn classic_pdf() -> Vec<u8> {
    let mut pdf = b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n".to_vec();
    let offsets = write_objects(&mut pdf, &PAGE_OBJECTS);
    let xref = pdf.len();
    pdf.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", offsets.len() + 1).as_bytes());
    for offset in &offsets {
        pdf.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    pdf.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R /Info 4 0 R >>\nstartxref\n{}\n%%EOF\n",
            offsets.len() + 1,
            xref
        )
        .as_bytes(),
    );
    pdf
}

/// Row of an uncompressed `W [1 4 2]` xref stream.
fn xref_row(kind: u8, field2: u32, field3: u16) -> Vec<u8> {
    let mut row = vec![kind];
    row.extend_from_slice(&field2.to_be_bytes());
    row.extend_from_slice(&field3.to_be_bytes());
    row
}

fn finish_xref_stream(pdf: &mut Vec<u8>, mut rows: Vec<u8>, stream_id: u32) {
    let xref = pdf.len();
    rows.extend_from_slice(&xref_row(1, xref as u32, 0));
    pdf.extend_from_slice(
        format!(
            "{} 0 obj\n<< /Type /XRef /Size {} /W [1 4 2] /Root 1 0 R /Info 4 0 R /Length {} >>\nstream\n",
            stream_id,
            stream_id + 1,
            rows.len()
        )
        .as_bytes(),
    );
    pdf.extend_from_slice(&rows);
    pdf.extend_from_slice(format!("\nendstream\nendobj\nstartxref\n{}\n%%EOF\n", xref).as_bytes());
}

/// One-page document indexed by a cross-reference stream.
pub fn xref_stream_pdf() -> Vec<u8> {
    let mut pdf = b"%PDF-1.7\n".to_vec();
    let offsets = write_objects(&mut pdf, &PAGE_OBJECTS);
    let mut rows = xref_row(0, 0, 0xFFFF);
    for offset in offsets {
        rows.extend_from_slice(&xref_row(1, offset as u32, 0));
    }
    finish_xref_stream(&mut pdf, rows, 5);
    pdf
}

/// Catalog, page tree and page packed in an object stream (object 5).
pub fn object_stream_pdf() -> Vec<u8> {
    let mut pdf = b"%PDF-1.7\n".to_vec();

    let mut header = String::new();
    let mut body = String::new();
    for (i, obj) in PAGE_OBJECTS[..3].iter().enumerate() {
        header.push_str(&format!("{} {} ", i + 1, body.len()));
        body.push_str(obj);
        body.push(' ');
    }
    let content = format!("{}{}", header, body);

    let info_offset = pdf.len();
    pdf.extend_from_slice(format!("4 0 obj\n{}\nendobj\n", PAGE_OBJECTS[3]).as_bytes());
    let objstm_offset = pdf.len();
    pdf.extend_from_slice(
        format!(
            "5 0 obj\n<< /Type /ObjStm /N 3 /First {} /Length {} >>\nstream\n{}\nendstream\nendobj\n",
            header.len(),
            content.len(),
            content
        )
        .as_bytes(),
    );

    let mut rows = xref_row(0, 0, 0xFFFF);
    for index in 0..3 {
        rows.extend_from_slice(&xref_row(2, 5, index));
    }
    rows.extend_from_slice(&xref_row(1, info_offset as u32, 0));
    rows.extend_from_slice(&xref_row(1, objstm_offset as u32, 0));
    finish_xref_stream(&mut pdf, rows, 6);
    pdf
}

/// A certificate with its key, as DER and PEM.
pub struct TestIdentity {
    pub certificate: Vec<u8>,
    pub key_pem: String,
    cert: Certificate,
    key: KeyPair,
}

impl TestIdentity {
    pub fn signing_key(&self) -> SigningKey {
        SigningKey::from_pem(&self.key_pem).unwrap()
    }

    pub fn credentials(&self) -> SigningCredentials {
        SigningCredentials::new(self.certificate.clone(), self.signing_key())
    }
}

/// Root, intermediate, document signer and TSA.
pub struct TestPki {
    pub root: TestIdentity,
    pub intermediate: TestIdentity,
    pub signer: TestIdentity,
    pub tsa: TestIdentity,
}

fn params(common_name: &str) -> CertificateParams {
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    params.distinguished_name.push(DnType::CommonName, common_name);
    params.distinguished_name.push(DnType::OrganizationName, "PDF Seal Test");
    params.not_before = rcgen::date_time_ymd(2020, 1, 1);
    params.not_after = rcgen::date_time_ymd(2060, 1, 1);
    params.use_authority_key_identifier_extension = true;
    params
}

fn ca_params(common_name: &str) -> CertificateParams {
    let mut params = params(common_name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    params
}

fn issue(params: CertificateParams, key: KeyPair, issuer: Option<&TestIdentity>) -> TestIdentity {
    let cert = match issuer {
        Some(issuer) => params.signed_by(&key, &issuer.cert, &issuer.key).unwrap(),
        None => params.self_signed(&key).unwrap(),
    };
    TestIdentity {
        certificate: cert.der().to_vec(),
        key_pem: key.serialize_pem(),
        cert,
        key,
    }
}

fn signer_params(common_name: &str) -> CertificateParams {
    let mut params = params(common_name);
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::ContentCommitment];
    params
}

fn tsa_params() -> CertificateParams {
    let mut params = params("Test Time Stamping Authority");
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::TimeStamping];
    params
}

impl TestPki {
    /// ECDSA P-256 signer.
    pub fn new() -> Self {
        Self::with_signer_key(KeyPair::generate().unwrap())
    }

    /// RSA-2048 signer.
    pub fn rsa() -> Self {
        Self::with_signer_key(KeyPair::from_pem(RSA_KEY_PEM).unwrap())
    }

    fn with_signer_key(signer_key: KeyPair) -> Self {
        let root = issue(ca_params("Test Root CA"), KeyPair::generate().unwrap(), None);
        let intermediate = issue(ca_params("Test Issuing CA"), KeyPair::generate().unwrap(), Some(&root));
        let signer = issue(signer_params("Alice Signer"), signer_key, Some(&intermediate));
        let tsa = issue(tsa_params(), KeyPair::generate().unwrap(), Some(&intermediate));

        Self {
            root,
            intermediate,
            signer,
            tsa,
        }
    }

    /// Signer credentials carrying the full chain.
    pub fn signer_credentials(&self) -> SigningCredentials {
        self.signer
            .credentials()
            .with_chain(vec![self.intermediate.certificate.clone(), self.root.certificate.clone()])
    }

    /// Signer whose certificate expired on 2021-01-01.
    pub fn expired_signer(&self) -> TestIdentity {
        let mut expired = params("Expired Signer");
        expired.not_before = rcgen::date_time_ymd(2020, 1, 1);
        expired.not_after = rcgen::date_time_ymd(2021, 1, 1);
        expired.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        issue(expired, KeyPair::generate().unwrap(), Some(&self.intermediate))
    }

    /// Issuing CA under the root whose certificate expired on 2021-01-01.
    pub fn expired_intermediate(&self) -> TestIdentity {
        let mut expired = ca_params("Expired Issuing CA");
        expired.not_after = rcgen::date_time_ymd(2021, 1, 1);
        issue(expired, KeyPair::generate().unwrap(), Some(&self.root))
    }

    /// Document signer valid 2020 to 2060 issued by `issuer`.
    pub fn signer_issued_by(&self, common_name: &str, issuer: &TestIdentity) -> TestIdentity {
        issue(signer_params(common_name), KeyPair::generate().unwrap(), Some(issuer))
    }

    /// TSA certificate issued by `issuer`.
    pub fn tsa_issued_by(&self, issuer: &TestIdentity) -> TestIdentity {
        issue(tsa_params(), KeyPair::generate().unwrap(), Some(issuer))
    }

    /// Self-signed root with this root's subject and Subject Key Identifier
    /// but a key of its own.
    pub fn impersonated_root(&self) -> TestIdentity {
        let root = ParsedCertificate::from_der(&self.root.certificate).unwrap();
        let mut params = ca_params("Test Root CA");
        params.key_identifier_method = KeyIdMethod::PreSpecified(root.subject_key_id().unwrap().to_vec());
        issue(params, KeyPair::generate().unwrap(), None)
    }

    /// Local TSA whose tokens carry the TSA certificate and its chain.
    pub fn timestamp_authority(&self) -> LocalTimestampAuthority {
        let credentials = self
            .tsa
            .credentials()
            .with_chain(vec![self.intermediate.certificate.clone(), self.root.certificate.clone()]);
        LocalTimestampAuthority::new(credentials)
    }
}
