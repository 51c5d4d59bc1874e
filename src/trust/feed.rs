//! Adobe security-settings trust list parsing.
//!
//! An AATL distribution is a PDF carrying an embedded `SecuritySettings.xml`:
//!
//! ```xml
//! <SecuritySettings>
//!   <TrustedIdentities>
//!     <Identity>
//!       <Certificate>MIIF...</Certificate>
//!       <ImportAction>3</ImportAction>
//!     </Identity>
//!   </TrustedIdentities>
//! </SecuritySettings>
//! ```

use base64::Engine;
use quick_xml::events::Event;
use quick_xml::Reader;

/// Name of the embedded file holding the trust list.
pub const SECURITY_SETTINGS_FILE: &str = "SecuritySettings.xml";

/// DER certificates listed under `TrustedIdentities/Identity/Certificate`.
///
/// Entries that are not valid base64 are skipped.
pub fn parse_security_settings(xml: &str) -> Vec<Vec<u8>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut element_stack: Vec<String> = Vec::new();
    let mut certificates = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                element_stack.push(name);
            },
            Ok(Event::Text(e)) => {
                if !in_certificate(&element_stack) {
                    continue;
                }
                let text = e.unescape().unwrap_or_default();
                if let Some(der) = decode_certificate(&text) {
                    certificates.push(der);
                }
            },
            Ok(Event::CData(e)) => {
                if !in_certificate(&element_stack) {
                    continue;
                }
                let text = String::from_utf8_lossy(&e.into_inner()).to_string();
                if let Some(der) = decode_certificate(&text) {
                    certificates.push(der);
                }
            },
            Ok(Event::End(_)) => {
                element_stack.pop();
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                log::warn!("Trust list XML parsing error: {:?}", e);
                break;
            },
            _ => {},
        }
    }

    log::debug!("Trust list lists {} certificate(s)", certificates.len());
    certificates
}

fn in_certificate(stack: &[String]) -> bool {
    let n = stack.len();
    n >= 3
        && stack[n - 1] == "Certificate"
        && stack[n - 2] == "Identity"
        && stack[n - 3] == "TrustedIdentities"
}

fn decode_certificate(text: &str) -> Option<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }
    match base64::engine::general_purpose::STANDARD.decode(compact.as_bytes()) {
        Ok(der) => Some(der),
        Err(e) => {
            log::warn!("Skipping trust list certificate with bad base64: {}", e);
            None
        },
    }
}
