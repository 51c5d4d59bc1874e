//! Periodic refresh of trust lists from AATL-style feeds.

use super::anchor::{anchor_from_certificate, TrustAnchor};
use super::feed::{parse_security_settings, SECURITY_SETTINGS_FILE};
use super::store::TrustStore;
use crate::config::TrustConfig;
use crate::document::PdfStructure;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::io::Read;
use std::time::Duration;

/// Largest feed document downloaded.
const MAX_FEED_SIZE: u64 = 64 * 1024 * 1024;

/// Outcome of one [`TrustListUpdater::update`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// No download was needed
    pub skipped: bool,
    /// Inserted anchors per list
    pub inserted: BTreeMap<String, usize>,
    /// Lists that failed, with the reason
    pub failed: BTreeMap<String, String>,
}

/// Downloads configured feeds and replaces their lists in a [`TrustStore`].
pub struct TrustListUpdater<'a> {
    store: &'a TrustStore,
    config: TrustConfig,
    timeout: Duration,
}

impl<'a> TrustListUpdater<'a> {
    /// Updater writing into `store`.
    pub fn new(store: &'a TrustStore, config: TrustConfig) -> Self {
        Self {
            store,
            config,
            timeout: Duration::from_secs(10),
        }
    }

    /// Per-download deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Refresh every configured list unless the store is younger than the
    /// update frequency. A failing list does not stop the others.
    pub fn update(&self) -> Result<UpdateReport> {
        self.update_at(Utc::now())
    }

    /// [`update`](Self::update) with an explicit current time.
    pub fn update_at(&self, now: DateTime<Utc>) -> Result<UpdateReport> {
        let mut report = UpdateReport::default();
        if !self.store.refresh_due(self.config.update_frequency(), now)? {
            log::info!(
                "Trust store refreshed less than {} day(s) ago, skipping",
                self.config.update_frequency_days
            );
            report.skipped = true;
            return Ok(report);
        }

        for list in &self.config.lists {
            match self.update_list(list) {
                Ok(count) => {
                    report.inserted.insert(list.clone(), count);
                },
                Err(e) => {
                    log::warn!("Failed to refresh trust list '{}': {}", list, e);
                    report.failed.insert(list.clone(), e.to_string());
                },
            }
        }
        Ok(report)
    }

    /// Download and replace a single list.
    pub fn update_list(&self, list: &str) -> Result<usize> {
        let url = self
            .config
            .feeds
            .get(list)
            .ok_or_else(|| Error::Config(format!("no feed URL configured for trust list '{}'", list)))?;
        log::debug!("Downloading trust list '{}' from {}", list, url);
        let feed = self.download(url)?;
        let anchors = anchors_from_feed(list, &feed)?;
        self.store.refresh_list(list, anchors)
    }

    fn download(&self, url: &str) -> Result<Vec<u8>> {
        let agent = ureq::AgentBuilder::new().timeout(self.timeout).build();
        let response = agent.get(url).call()?;
        let mut bytes = Vec::new();
        response.into_reader().take(MAX_FEED_SIZE).read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

/// Anchors listed in a `.acrobatsecuritysettings` PDF.
///
/// Certificates that fail to parse are skipped.
pub fn anchors_from_feed(list: &str, feed_pdf: &[u8]) -> Result<Vec<TrustAnchor>> {
    let structure = PdfStructure::parse(feed_pdf)?;
    let xml = structure.embedded_file(SECURITY_SETTINGS_FILE)?.ok_or_else(|| {
        Error::TrustStore(format!("trust list feed has no embedded {}", SECURITY_SETTINGS_FILE))
    })?;
    let xml = String::from_utf8_lossy(&xml);

    let mut anchors = Vec::new();
    for der in parse_security_settings(&xml) {
        match anchor_from_certificate(list, &der) {
            Ok(anchor) => anchors.push(anchor),
            Err(e) => log::warn!("Skipping unparsable certificate in trust list '{}': {}", list, e),
        }
    }
    Ok(anchors)
}
