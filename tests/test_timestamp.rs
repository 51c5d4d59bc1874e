//! Signature timestamps: optional and required authorities, trust and precedence.

mod common;

use chrono::{TimeZone, Utc};
use common::{classic_pdf, TestPki};
use pdf_seal::signatures::{DigestAlgorithm, PdfSigner, SignatureVerifier, SigningRequest, TimestampAuthority};
use pdf_seal::timestamp::{LocalTimestampAuthority, TimestampProvider, TimestampToken};
use pdf_seal::trust::{anchor_from_certificate, TrustStore};
use pdf_seal::Error;
use std::time::Duration;

const UNREACHABLE_TSA: &str = "http://127.0.0.1:1/tsa";

fn trusting(pki: &TestPki) -> TrustStore {
    let store = TrustStore::in_memory();
    store
        .ingest("test", vec![anchor_from_certificate("test", &pki.root.certificate).unwrap()])
        .unwrap();
    store
}

fn unreachable(required: bool) -> TimestampAuthority {
    TimestampAuthority::new(UNREACHABLE_TSA)
        .required(required)
        .with_timeout(Duration::from_secs(2))
}

#[test]
fn test_optional_tsa_failure_still_signs() {
    let pki = TestPki::new();
    let request = SigningRequest::new(pki.signer_credentials()).with_timestamp(unreachable(false));
    let signed = PdfSigner::new(request).sign(&classic_pdf()).unwrap();
    assert!(!signed.timestamped);

    let report = SignatureVerifier::new(&trusting(&pki)).verify(&signed.bytes).unwrap();
    assert!(report.all_trusted());
    assert!(report.signers[0].timestamp.is_none());
}

#[test]
fn test_required_tsa_failure_aborts() {
    let pki = TestPki::new();
    let request = SigningRequest::new(pki.signer_credentials()).with_timestamp(unreachable(true));
    let result = PdfSigner::new(request).sign(&classic_pdf());
    assert!(matches!(result, Err(Error::TsaUnavailable(_))));
}

#[test]
fn test_local_authority_token() {
    let pki = TestPki::new();
    let time = Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap();
    let tsa = pki.timestamp_authority().at_time(time);

    let imprint = DigestAlgorithm::Sha256.digest(b"signature value");
    let der = tsa.timestamp(DigestAlgorithm::Sha256, &imprint).unwrap();
    let token = TimestampToken::parse(&der).unwrap();

    assert_eq!(token.gen_time().unwrap(), time);
    assert_eq!(token.imprint_algorithm(), Some(DigestAlgorithm::Sha256));
    assert!(token.matches_imprint(b"signature value"));
    assert!(!token.matches_imprint(b"another value"));
    assert_eq!(token.certificates().len(), 3);

    let cert = token.verify_signature().unwrap();
    assert!(cert.has_time_stamping_usage());
    assert_eq!(cert.common_name(), Some("Test Time Stamping Authority"));
}

#[test]
fn test_timestamped_signature_reports_trusted_time() {
    let pki = TestPki::new();
    let time = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 5).unwrap();
    let signed = PdfSigner::new(SigningRequest::new(pki.signer_credentials()))
        .with_timestamp_provider(pki.timestamp_authority().at_time(time))
        .sign(&classic_pdf())
        .unwrap();
    assert!(signed.timestamped);

    let report = SignatureVerifier::new(&trusting(&pki)).verify(&signed.bytes).unwrap();
    let signer = &report.signers[0];
    assert!(signer.valid_signature, "{:?}", signer.errors);
    let timestamp = signer.timestamp.as_ref().unwrap();
    assert!(timestamp.trusted);
    assert_eq!(timestamp.time, time);
    assert!(timestamp.authority.as_deref().unwrap().contains("Test Time Stamping Authority"));
}

#[test]
fn test_timestamp_rescues_expired_signer() {
    let pki = TestPki::new();
    let expired = pki.expired_signer();
    let credentials = expired
        .credentials()
        .with_chain(vec![pki.intermediate.certificate.clone(), pki.root.certificate.clone()]);
    let during_validity = Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap();
    let request = SigningRequest::new(credentials).with_signing_time(during_validity);

    let signed = PdfSigner::new(request)
        .with_timestamp_provider(pki.timestamp_authority().at_time(during_validity))
        .sign(&classic_pdf())
        .unwrap();

    let report = SignatureVerifier::new(&trusting(&pki)).verify(&signed.bytes).unwrap();
    let signer = &report.signers[0];
    assert!(signer.timestamp.as_ref().unwrap().trusted);
    assert!(signer.valid_signature, "{:?}", signer.errors);
    assert!(signer.trusted_issuer);
}

#[test]
fn test_untrusted_timestamp_is_not_used_as_reference() {
    let pki = TestPki::new();
    let rogue = TestPki::new();
    let expired = pki.expired_signer();
    let credentials = expired
        .credentials()
        .with_chain(vec![pki.intermediate.certificate.clone(), pki.root.certificate.clone()]);
    let during_validity = Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap();

    let signed = PdfSigner::new(SigningRequest::new(credentials).with_signing_time(during_validity))
        .with_timestamp_provider(rogue.timestamp_authority().at_time(during_validity))
        .sign(&classic_pdf())
        .unwrap();

    let report = SignatureVerifier::new(&trusting(&pki)).verify(&signed.bytes).unwrap();
    let signer = &report.signers[0];
    assert!(!signer.timestamp.as_ref().unwrap().trusted);
    assert!(!signer.valid_signature);
    assert!(signer.trusted_issuer);
}

#[test]
fn test_timestamp_through_expired_issuer_is_not_trusted() {
    let pki = TestPki::new();
    let intermediate = pki.expired_intermediate();
    let tsa = pki.tsa_issued_by(&intermediate);
    let authority = LocalTimestampAuthority::new(
        tsa.credentials()
            .with_chain(vec![intermediate.certificate.clone(), pki.root.certificate.clone()]),
    )
    .at_time(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());

    let signed = PdfSigner::new(SigningRequest::new(pki.signer_credentials()))
        .with_timestamp_provider(authority)
        .sign(&classic_pdf())
        .unwrap();

    let report = SignatureVerifier::new(&trusting(&pki)).verify(&signed.bytes).unwrap();
    let signer = &report.signers[0];
    assert!(!signer.timestamp.as_ref().unwrap().trusted);
    assert!(signer.errors.iter().any(|e| e.contains("Expired Issuing CA")));
    // the signer's own chain is unaffected
    assert!(signer.valid_signature);
    assert!(signer.trusted_issuer);
}
