//! End-to-end signing and verification.

mod common;

use chrono::{TimeZone, Utc};
use common::{classic_pdf, object_stream_pdf, xref_stream_pdf, TestPki};
use pdf_seal::document::PdfStructure;
use pdf_seal::signatures::{
    DigestAlgorithm, DocMdpPermission, ParsedCertificate, PdfSigner, RevocationChecker, RevocationStatus,
    SignatureSubFilter, SignatureVerifier, SigningCredentials, SigningRequest,
};
use pdf_seal::trust::{anchor_from_certificate, TrustStore};
use pdf_seal::xref::XrefKind;
use pdf_seal::Error;
use proptest::prelude::*;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

fn trusting(pki: &TestPki) -> TrustStore {
    let store = TrustStore::in_memory();
    store
        .ingest("test", vec![anchor_from_certificate("test", &pki.root.certificate).unwrap()])
        .unwrap();
    store
}

fn request(pki: &TestPki) -> SigningRequest {
    SigningRequest::new(pki.signer_credentials())
        .with_reason("Approved")
        .with_location("Berlin")
        .with_contact_info("alice@example.com")
        .with_signing_time(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
}

#[test]
fn test_round_trip_is_valid_and_trusted() {
    let pki = TestPki::new();
    let original = classic_pdf();
    let signed = PdfSigner::new(request(&pki)).sign(&original).unwrap();

    assert_eq!(&signed.bytes[..original.len()], original.as_slice());
    assert_eq!(signed.byte_range[0], 0);
    assert_eq!((signed.byte_range[2] + signed.byte_range[3]) as usize, signed.bytes.len());

    let store = trusting(&pki);
    let report = SignatureVerifier::new(&store).verify(&signed.bytes).unwrap();
    assert!(report.all_trusted());
    assert_eq!(report.document_hash, hex::encode(Sha256::digest(&signed.bytes)));
    assert_eq!(report.producer.as_deref(), Some("pdf_seal tests"));
    assert_eq!(report.creator.as_deref(), Some("fixtures"));

    let signer = &report.signers[0];
    assert!(signer.valid_signature, "{:?}", signer.errors);
    assert!(signer.trusted_issuer);
    assert!(signer.covers_whole_document);
    assert_eq!(signer.field_name.as_deref(), Some("Signature1"));
    assert_eq!(signer.name.as_deref(), Some("Alice Signer"));
    assert_eq!(signer.signer_common_name.as_deref(), Some("Alice Signer"));
    assert_eq!(signer.signer_organization.as_deref(), Some("PDF Seal Test"));
    assert_eq!(signer.reason.as_deref(), Some("Approved"));
    assert_eq!(signer.location.as_deref(), Some("Berlin"));
    assert_eq!(signer.contact_info.as_deref(), Some("alice@example.com"));
    assert_eq!(signer.signing_time, Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()));
    assert_eq!(signer.signature_format, Some(SignatureSubFilter::Pkcs7Detached));
    assert_eq!(signer.digest_algorithm, Some(DigestAlgorithm::Sha256));
    assert_eq!(signer.certificate_chain.len(), 3);
    assert_eq!(signer.trust_anchor.as_ref().unwrap().list_name, "test");
    assert_eq!(signer.revoked_certificate, None);
    assert!(signer.timestamp.is_none());
}

#[test]
fn test_digests_and_formats() {
    let pki = TestPki::new();
    let store = trusting(&pki);
    let cases = [
        (DigestAlgorithm::Sha256, SignatureSubFilter::CadesDetached),
        (DigestAlgorithm::Sha384, SignatureSubFilter::Pkcs7Detached),
        (DigestAlgorithm::Sha512, SignatureSubFilter::CadesDetached),
    ];
    for (digest, format) in cases {
        let signed = PdfSigner::new(request(&pki).with_digest_algorithm(digest).with_sub_filter(format))
            .sign(&classic_pdf())
            .unwrap();
        let report = SignatureVerifier::new(&store).verify(&signed.bytes).unwrap();
        let signer = &report.signers[0];
        assert!(signer.valid_signature, "{:?} {:?}: {:?}", digest, format, signer.errors);
        assert!(signer.trusted_issuer);
        assert_eq!(signer.digest_algorithm, Some(digest));
        assert_eq!(signer.signature_format, Some(format));
    }
}

#[test]
fn test_rsa_signer() {
    let pki = TestPki::rsa();
    let signed = PdfSigner::new(request(&pki)).sign(&classic_pdf()).unwrap();
    let report = SignatureVerifier::new(&trusting(&pki)).verify(&signed.bytes).unwrap();
    assert!(report.all_trusted(), "{:?}", report.signers[0].errors);
}

#[test]
fn test_xref_stream_sources() {
    let pki = TestPki::new();
    let store = trusting(&pki);
    for original in [xref_stream_pdf(), object_stream_pdf()] {
        let signed = PdfSigner::new(request(&pki)).sign(&original).unwrap();
        assert_eq!(&signed.bytes[..original.len()], original.as_slice());

        let doc = PdfStructure::parse(&signed.bytes).unwrap();
        assert_eq!(doc.xref_kind(), XrefKind::Stream);
        assert_eq!(doc.signature_dictionaries().unwrap().len(), 1);

        let report = SignatureVerifier::new(&store).verify(&signed.bytes).unwrap();
        assert!(report.all_trusted(), "{:?}", report.signers[0].errors);
    }
}

#[test]
fn test_untrusted_issuer() {
    let pki = TestPki::new();
    let signed = PdfSigner::new(request(&pki)).sign(&classic_pdf()).unwrap();

    let other = TestPki::new();
    let report = SignatureVerifier::new(&trusting(&other)).verify(&signed.bytes).unwrap();
    let signer = &report.signers[0];
    assert!(signer.valid_signature);
    assert!(!signer.trusted_issuer);
    assert!(signer.trust_anchor.is_none());
    assert!(!signer.errors.is_empty());
    assert!(report.all_valid());
    assert!(!report.all_trusted());
}

#[test]
fn test_intermediate_anchor() {
    let pki = TestPki::new();
    let signed = PdfSigner::new(request(&pki)).sign(&classic_pdf()).unwrap();
    let store = TrustStore::in_memory();
    store
        .ingest("corp", vec![anchor_from_certificate("corp", &pki.intermediate.certificate).unwrap()])
        .unwrap();
    let report = SignatureVerifier::new(&store).verify(&signed.bytes).unwrap();
    assert_eq!(report.signers[0].trust_anchor.as_ref().unwrap().issuer_common_name, "Test Issuing CA");
}

#[test]
fn test_root_not_embedded_is_trusted_through_its_key() {
    let pki = TestPki::new();
    let credentials = pki.signer.credentials().with_chain(vec![pki.intermediate.certificate.clone()]);
    let signed = PdfSigner::new(SigningRequest::new(credentials)).sign(&classic_pdf()).unwrap();

    let report = SignatureVerifier::new(&trusting(&pki)).verify(&signed.bytes).unwrap();
    let signer = &report.signers[0];
    assert!(signer.trusted_issuer, "{:?}", signer.errors);
    assert_eq!(signer.trust_anchor.as_ref().unwrap().issuer_common_name, "Test Root CA");
}

#[test]
fn test_copied_key_identifier_is_not_trusted() {
    let pki = TestPki::new();
    let store = trusting(&pki);
    let impostor = pki.impersonated_root();
    let mallory = pki.signer_issued_by("Mallory", &impostor);

    // impostor root embedded
    let credentials = mallory.credentials().with_chain(vec![impostor.certificate.clone()]);
    let signed = PdfSigner::new(SigningRequest::new(credentials)).sign(&classic_pdf()).unwrap();
    let report = SignatureVerifier::new(&store).verify(&signed.bytes).unwrap();
    let signer = &report.signers[0];
    assert!(signer.valid_signature);
    assert!(!signer.trusted_issuer);
    assert!(signer.trust_anchor.is_none());

    // leaf alone, naming the real root through its Authority Key Identifier
    let signed = PdfSigner::new(SigningRequest::new(mallory.credentials()))
        .sign(&classic_pdf())
        .unwrap();
    let report = SignatureVerifier::new(&store).verify(&signed.bytes).unwrap();
    assert!(!report.signers[0].trusted_issuer);
    assert!(report.signers[0].trust_anchor.is_none());
}

#[test]
fn test_expired_intermediate_is_not_trusted() {
    let pki = TestPki::new();
    let intermediate = pki.expired_intermediate();
    let signer = pki.signer_issued_by("Bob Signer", &intermediate);
    let credentials = signer
        .credentials()
        .with_chain(vec![intermediate.certificate.clone(), pki.root.certificate.clone()]);
    let signed = PdfSigner::new(SigningRequest::new(credentials)).sign(&classic_pdf()).unwrap();
    let store = trusting(&pki);

    let report = SignatureVerifier::new(&store).verify(&signed.bytes).unwrap();
    let result = &report.signers[0];
    assert!(result.valid_signature);
    assert!(!result.trusted_issuer);
    assert!(result.trust_anchor.is_none());
    assert!(result.errors.iter().any(|e| e.contains("Expired Issuing CA")));
    assert_eq!(result.certificate_chain.len(), 3);

    // within the intermediate's validity the chain holds
    let report = SignatureVerifier::new(&store)
        .at_time(Utc.with_ymd_and_hms(2020, 7, 1, 0, 0, 0).unwrap())
        .verify(&signed.bytes)
        .unwrap();
    assert!(report.signers[0].trusted_issuer, "{:?}", report.signers[0].errors);
}

#[test]
fn test_two_approval_signatures() {
    let pki = TestPki::new();
    let first = PdfSigner::new(request(&pki)).sign(&classic_pdf()).unwrap();
    let second = PdfSigner::new(request(&pki).with_reason("Countersigned"))
        .sign(&first.bytes)
        .unwrap();

    let report = SignatureVerifier::new(&trusting(&pki)).verify(&second.bytes).unwrap();
    assert_eq!(report.signers.len(), 2);
    assert!(report.all_trusted());
    assert!(!report.signers[0].covers_whole_document);
    assert!(report.signers[1].covers_whole_document);
    assert_eq!(report.signers[0].field_name.as_deref(), Some("Signature1"));
    assert_eq!(report.signers[1].field_name.as_deref(), Some("Signature2"));
    assert_eq!(report.signers[1].reason.as_deref(), Some("Countersigned"));
}

#[test]
fn test_certification_writes_single_docmdp() {
    let pki = TestPki::new();
    let signed = PdfSigner::new(request(&pki).certify(DocMdpPermission::FillFormsOnly))
        .sign(&classic_pdf())
        .unwrap();

    let doc = PdfStructure::parse(&signed.bytes).unwrap();
    let signatures = doc.signature_dictionaries().unwrap();
    assert_eq!(signatures.len(), 1);
    assert_eq!(doc.docmdp_permission().unwrap(), Some(DocMdpPermission::FillFormsOnly));

    let catalog = doc.catalog().unwrap();
    let perms = doc.resolve_dict(&catalog, "Perms").unwrap().unwrap();
    assert_eq!(perms.len(), 1);
    assert_eq!(perms["DocMDP"].as_reference(), signatures[0].sig_ref);

    let report = SignatureVerifier::new(&trusting(&pki)).verify(&signed.bytes).unwrap();
    assert!(report.all_trusted());
}

#[test]
fn test_certification_rules() {
    let pki = TestPki::new();
    let certified = PdfSigner::new(request(&pki).certify(DocMdpPermission::FillFormsOnly))
        .sign(&classic_pdf())
        .unwrap();

    let again = PdfSigner::new(request(&pki).certify(DocMdpPermission::FillFormsOnly)).sign(&certified.bytes);
    assert!(matches!(again, Err(Error::PermissionViolation(_))));

    // P=2 still allows approval signatures
    assert!(PdfSigner::new(request(&pki)).sign(&certified.bytes).is_ok());

    let locked = PdfSigner::new(request(&pki).certify(DocMdpPermission::NoChanges))
        .sign(&classic_pdf())
        .unwrap();
    let approval = PdfSigner::new(request(&pki)).sign(&locked.bytes);
    assert!(matches!(approval, Err(Error::PermissionViolation(_))));

    let approved = PdfSigner::new(request(&pki)).sign(&classic_pdf()).unwrap();
    let late = PdfSigner::new(request(&pki).certify(DocMdpPermission::FillFormsOnly)).sign(&approved.bytes);
    assert!(matches!(late, Err(Error::PermissionViolation(_))));
}

#[test]
fn test_key_mismatch() {
    let pki = TestPki::new();
    let credentials = SigningCredentials::new(pki.signer.certificate.clone(), pki.tsa.signing_key());
    let signer = PdfSigner::new(SigningRequest::new(credentials));
    assert!(matches!(signer.sign(&classic_pdf()), Err(Error::KeyMismatch)));

    // reported before the source is opened
    let dir = tempfile::tempdir().unwrap();
    let result = signer.sign_file(dir.path().join("missing.pdf"), dir.path().join("out.pdf"));
    assert!(matches!(result, Err(Error::KeyMismatch)));
}

#[test]
fn test_contents_overflow_writes_nothing() {
    let pki = TestPki::new();
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("in.pdf");
    let target = dir.path().join("out.pdf");
    std::fs::write(&source, classic_pdf()).unwrap();

    let result = PdfSigner::new(request(&pki).with_contents_size(64)).sign_file(&source, &target);
    match result {
        Err(Error::ContentsOverflow { required, reserved }) => {
            assert_eq!(reserved, 64);
            assert!(required > reserved);
        },
        other => panic!("expected ContentsOverflow, got {:?}", other.map(|s| s.byte_range)),
    }
    assert!(!target.exists());
}

#[test]
fn test_sign_file_round_trip() {
    let pki = TestPki::new();
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("in.pdf");
    let target = dir.path().join("out.pdf");
    std::fs::write(&source, classic_pdf()).unwrap();

    pdf_seal::sign_file(&source, &target, request(&pki)).unwrap();
    let report = SignatureVerifier::new(&trusting(&pki)).verify_file(&target).unwrap();
    assert!(report.all_trusted());
}

#[test]
fn test_encrypted_documents_are_refused() {
    let pki = TestPki::new();
    let mut pdf = classic_pdf();
    let marker = b"/Info 4 0 R >>";
    let at = pdf.windows(marker.len()).position(|w| w == marker).unwrap() + b"/Info 4 0 R ".len();
    pdf.splice(at..at, b"/Encrypt << /Filter /Standard /V 2 >> ".iter().copied());
    let sign = PdfSigner::new(request(&pki)).sign(&pdf);
    assert!(matches!(sign, Err(Error::UnsupportedFeature(_))));
    let verify = SignatureVerifier::new(&TrustStore::in_memory()).verify(&pdf);
    assert!(matches!(verify, Err(Error::UnsupportedFeature(_))));
}

#[test]
fn test_expired_signer_without_timestamp() {
    let pki = TestPki::new();
    let expired = pki.expired_signer();
    let credentials = expired
        .credentials()
        .with_chain(vec![pki.intermediate.certificate.clone(), pki.root.certificate.clone()]);
    let request = SigningRequest::new(credentials).with_signing_time(Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap());
    let signed = PdfSigner::new(request).sign(&classic_pdf()).unwrap();

    let store = trusting(&pki);
    let report = SignatureVerifier::new(&store).verify(&signed.bytes).unwrap();
    assert!(!report.signers[0].valid_signature);
    assert!(report.signers[0].errors.iter().any(|e| e.contains("not valid at")));

    // the same document checked as of mid-2020
    let report = SignatureVerifier::new(&store)
        .at_time(Utc.with_ymd_and_hms(2020, 7, 1, 0, 0, 0).unwrap())
        .verify(&signed.bytes)
        .unwrap();
    assert!(report.signers[0].valid_signature);
}

struct RevokedAt(chrono::DateTime<Utc>);

impl RevocationChecker for RevokedAt {
    fn check(
        &self,
        _cert: &ParsedCertificate,
        _issuer: Option<&ParsedCertificate>,
        _embedded: &[Vec<u8>],
    ) -> pdf_seal::Result<RevocationStatus> {
        Ok(RevocationStatus::Revoked { at: Some(self.0) })
    }
}

struct Unreachable;

impl RevocationChecker for Unreachable {
    fn check(
        &self,
        _cert: &ParsedCertificate,
        _issuer: Option<&ParsedCertificate>,
        _embedded: &[Vec<u8>],
    ) -> pdf_seal::Result<RevocationStatus> {
        Err(Error::RevocationCheckUnavailable("responder offline".to_string()))
    }
}

#[test]
fn test_revocation_outcomes() {
    let pki = TestPki::new();
    let store = trusting(&pki);
    let signed = PdfSigner::new(request(&pki)).sign(&classic_pdf()).unwrap();

    let report = SignatureVerifier::new(&store)
        .with_revocation_checker(RevokedAt(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()))
        .verify(&signed.bytes)
        .unwrap();
    assert_eq!(report.signers[0].revoked_certificate, Some(true));

    let report = SignatureVerifier::new(&store)
        .with_revocation_checker(Unreachable)
        .verify(&signed.bytes)
        .unwrap();
    assert_eq!(report.signers[0].revoked_certificate, None);
    assert!(report.signers[0].valid_signature);
}

#[test]
fn test_revocation_after_trusted_timestamp() {
    let pki = TestPki::new();
    let store = trusting(&pki);
    let stamped_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 5).unwrap();
    let signed = PdfSigner::new(request(&pki))
        .with_timestamp_provider(pki.timestamp_authority().at_time(stamped_at))
        .sign(&classic_pdf())
        .unwrap();

    let report = SignatureVerifier::new(&store)
        .with_revocation_checker(RevokedAt(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()))
        .verify(&signed.bytes)
        .unwrap();
    let signer = &report.signers[0];
    assert!(signer.timestamp.as_ref().unwrap().trusted, "{:?}", signer.errors);
    assert_eq!(signer.revoked_certificate, Some(false));

    let report = SignatureVerifier::new(&store)
        .with_revocation_checker(RevokedAt(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()))
        .verify(&signed.bytes)
        .unwrap();
    assert_eq!(report.signers[0].revoked_certificate, Some(true));
}

/// Signed bytes, their ByteRange and the root certificate.
fn signed_fixture() -> &'static (Vec<u8>, [i64; 4], Vec<u8>) {
    static FIXTURE: OnceLock<(Vec<u8>, [i64; 4], Vec<u8>)> = OnceLock::new();
    FIXTURE.get_or_init(|| {
        let pki = TestPki::new();
        let signed = PdfSigner::new(request(&pki)).sign(&classic_pdf()).unwrap();
        (signed.bytes, signed.byte_range, pki.root.certificate.clone())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_tampering_signed_bytes_breaks_validity(position in any::<prop::sample::Index>(), mask in 1u8..=255) {
        let (bytes, byte_range, root) = signed_fixture();
        let head = byte_range[1] as usize;
        let tail_start = byte_range[2] as usize;
        let signed_len = head + byte_range[3] as usize;

        let index = position.index(signed_len);
        let offset = if index < head { index } else { tail_start + (index - head) };
        let mut tampered = bytes.clone();
        tampered[offset] ^= mask;

        let store = TrustStore::in_memory();
        store.ingest("test", vec![anchor_from_certificate("test", root).unwrap()]).unwrap();
        match SignatureVerifier::new(&store).verify(&tampered) {
            Ok(report) => prop_assert!(!report.all_valid()),
            Err(_) => {},
        }
    }
}
