//! PDF Seal command line
//!
//! Usage:
//!   pdf-seal sign <input.pdf> <output.pdf> --cert cert.pem --key key.pem [options]
//!   pdf-seal verify <input.pdf> [--store trust.json] [--crl]
//!   pdf-seal trust-update [--store trust.json] [--force]
//!   pdf-seal trust-add <list> <certs.pem>... [--store trust.json]
//!   pdf-seal trust-list [--store trust.json]
//!
//! Common options:
//!   --config <file.toml>   Load settings (timestamp authority, trust lists, defaults)
//!   --store <file.json>    Trust store location (overrides the config)
//!
//! Sign options:
//!   --chain <chain.pem>    Extra certificates to embed
//!   --name, --reason, --location, --contact <text>
//!   --certify <1|2|3>      Certification signature with the given DocMDP level
//!   --digest <sha256|sha384|sha512>
//!   --cades                Use ETSI.CAdES.detached
//!   --tsa <url>            Request a timestamp (optional unless --tsa-required)
//!   --tsa-required
//!   --contents-size <bytes>

use pdf_seal::config::{SealConfig, TimestampConfig};
use pdf_seal::signatures::{
    pem_certificates, CrlRevocationChecker, DigestAlgorithm, DocMdpPermission, SignatureSubFilter, SignatureVerifier,
    SigningCredentials, SigningRequest,
};
use pdf_seal::trust::{anchor_from_certificate, TrustListUpdater, TrustStore};
use pdf_seal::{Error, Result};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Default)]
struct Args {
    command: String,
    positional: Vec<String>,
    options: Vec<(String, Option<String>)>,
}

/// Options that take no value.
const FLAGS: &[&str] = &["--cades", "--tsa-required", "--crl", "--force"];

impl Args {
    fn from_env() -> Self {
        let mut args = Args::default();
        let mut iter = std::env::args().skip(1);
        args.command = iter.next().unwrap_or_default();
        while let Some(arg) = iter.next() {
            if arg.starts_with("--") {
                if FLAGS.contains(&arg.as_str()) {
                    args.options.push((arg, None));
                } else {
                    let value = iter.next();
                    args.options.push((arg, value));
                }
            } else {
                args.positional.push(arg);
            }
        }
        args
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.options
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .and_then(|(_, value)| value.as_deref())
    }

    fn flag(&self, name: &str) -> bool {
        self.options.iter().any(|(key, _)| key == name)
    }

    fn required(&self, name: &str) -> Result<&str> {
        self.get(name)
            .ok_or_else(|| Error::Config(format!("missing required option {}", name)))
    }

    fn positional(&self, index: usize, what: &str) -> Result<&str> {
        self.positional
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| Error::Config(format!("missing {}", what)))
    }

    fn config(&self) -> Result<SealConfig> {
        let mut config = match self.get("--config") {
            Some(path) => SealConfig::from_file(path)?,
            None => SealConfig::default(),
        };
        if let Some(store) = self.get("--store") {
            config.trust.store_path = Some(PathBuf::from(store));
        }
        Ok(config)
    }
}

fn open_store(config: &SealConfig) -> Result<TrustStore> {
    let store = match &config.trust.store_path {
        Some(path) => TrustStore::open(path)?,
        None => {
            log::warn!("No trust store path configured, using an empty in-memory store");
            TrustStore::in_memory()
        },
    };
    Ok(store.with_protected_list(config.trust.protected_list.clone()))
}

fn sign(args: &Args) -> Result<()> {
    let input = args.positional(0, "input PDF")?;
    let output = args.positional(1, "output PDF")?;
    let config = args.config()?;

    let chain_path = args.get("--chain").map(PathBuf::from);
    let credentials =
        SigningCredentials::from_pem_files(args.required("--cert")?, args.required("--key")?, chain_path.as_deref())?;

    let mut request = SigningRequest::new(credentials)
        .with_digest_algorithm(config.signature.digest_algorithm)
        .with_sub_filter(config.signature.sub_filter);
    if let Some(size) = config.signature.contents_size {
        request = request.with_contents_size(size);
    }
    if let Some(name) = args.get("--name") {
        request = request.with_name(name);
    }
    if let Some(reason) = args.get("--reason") {
        request = request.with_reason(reason);
    }
    if let Some(location) = args.get("--location") {
        request = request.with_location(location);
    }
    if let Some(contact) = args.get("--contact") {
        request = request.with_contact_info(contact);
    }
    if let Some(level) = args.get("--certify") {
        let p: i64 = level
            .parse()
            .map_err(|_| Error::Config(format!("invalid DocMDP level '{}'", level)))?;
        request = request.certify(DocMdpPermission::from_p(p));
    }
    if let Some(digest) = args.get("--digest") {
        request = request.with_digest_algorithm(parse_digest(digest)?);
    }
    if args.flag("--cades") {
        request = request.with_sub_filter(SignatureSubFilter::CadesDetached);
    }
    if let Some(size) = args.get("--contents-size") {
        let size = size
            .parse()
            .map_err(|_| Error::Config(format!("invalid contents size '{}'", size)))?;
        request = request.with_contents_size(size);
    }

    let timestamp = match args.get("--tsa") {
        Some(url) => Some(TimestampConfig::new(url).with_required(args.flag("--tsa-required"))),
        None => config.timestamp.clone(),
    };
    if let Some(tsa) = timestamp {
        request = request.with_timestamp(tsa.to_authority());
    }

    let signed = pdf_seal::sign_file(input, output, request)?;
    println!(
        "Signed {} -> {} (ByteRange {:?}, timestamped: {})",
        input, output, signed.byte_range, signed.timestamped
    );
    Ok(())
}

fn parse_digest(name: &str) -> Result<DigestAlgorithm> {
    match name.to_ascii_lowercase().as_str() {
        "sha256" => Ok(DigestAlgorithm::Sha256),
        "sha384" => Ok(DigestAlgorithm::Sha384),
        "sha512" => Ok(DigestAlgorithm::Sha512),
        other => Err(Error::Config(format!("unsupported digest '{}'", other))),
    }
}

/// Prints the JSON report; returns whether every signature is valid.
fn verify(args: &Args) -> Result<bool> {
    let input = args.positional(0, "input PDF")?;
    let config = args.config()?;
    let store = open_store(&config)?;

    let mut verifier = SignatureVerifier::new(&store);
    if args.flag("--crl") {
        verifier = verifier.with_revocation_checker(CrlRevocationChecker::new());
    }
    let report = verifier.verify_file(input)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(report.all_valid())
}

fn trust_update(args: &Args) -> Result<()> {
    let config = args.config()?;
    let store = open_store(&config)?;
    let updater = TrustListUpdater::new(&store, config.trust.clone());

    let report = if args.flag("--force") {
        let mut report = pdf_seal::trust::UpdateReport::default();
        for list in &config.trust.lists {
            match updater.update_list(list) {
                Ok(count) => {
                    report.inserted.insert(list.clone(), count);
                },
                Err(e) => {
                    report.failed.insert(list.clone(), e.to_string());
                },
            }
        }
        report
    } else {
        updater.update()?
    };

    if report.skipped {
        println!("Trust store is up to date");
    }
    for (list, count) in &report.inserted {
        println!("{}: {} anchors", list, count);
    }
    for (list, reason) in &report.failed {
        eprintln!("{}: failed: {}", list, reason);
    }
    Ok(())
}

fn trust_add(args: &Args) -> Result<()> {
    let list = args.positional(0, "trust list name")?;
    if args.positional.len() < 2 {
        return Err(Error::Config("no certificate files given".to_string()));
    }
    let config = args.config()?;
    let store = open_store(&config)?;

    let mut anchors = Vec::new();
    for path in &args.positional[1..] {
        let pem = std::fs::read(path)?;
        for der in pem_certificates(&pem)? {
            anchors.push(anchor_from_certificate(list, &der)?);
        }
    }
    let inserted = store.ingest(list, anchors)?;
    println!("{}: {} new anchors", list, inserted);
    Ok(())
}

fn trust_list(args: &Args) -> Result<()> {
    let config = args.config()?;
    let store = open_store(&config)?;
    println!("{}", serde_json::to_string_pretty(&store.anchors()?)?);
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::from_env();

    let outcome = match args.command.as_str() {
        "sign" => sign(&args).map(|_| true),
        "verify" => verify(&args),
        "trust-update" => trust_update(&args).map(|_| true),
        "trust-add" => trust_add(&args).map(|_| true),
        "trust-list" => trust_list(&args).map(|_| true),
        _ => {
            eprintln!("Usage: pdf-seal <sign|verify|trust-update|trust-add|trust-list> [args]");
            return ExitCode::from(2);
        },
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(2)
        },
    }
}
