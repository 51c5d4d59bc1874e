//! Self-contained trust anchors.
//!
//! Trust decisions never consult the operating system's root store. A
//! signer is trusted only when its chain reaches an anchor held here; anchors
//! are keyed by Subject Key Identifier and grouped into named lists that can
//! be refreshed from AATL feeds ([`TrustListUpdater`]) or seeded by hand
//! ([`anchor_from_certificate`]).

mod anchor;
mod feed;
mod repository;
mod store;
mod updater;

pub use anchor::{anchor_from_certificate, TrustAnchor};
pub use feed::{parse_security_settings, SECURITY_SETTINGS_FILE};
pub use repository::{JsonFileTrustRepository, MemoryTrustRepository, TrustRepository};
pub use store::{TrustStore, PROTECTED_TRUST_LIST};
pub use updater::{anchors_from_feed, TrustListUpdater, UpdateReport};
