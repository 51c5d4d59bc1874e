use super::anchor::TrustAnchor;
use super::repository::{JsonFileTrustRepository, MemoryTrustRepository, TrustRepository};
use crate::error::{Error, Result};
use crate::signatures::ParsedCertificate;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, RwLock};

/// List that [`TrustStore::clear_all`] never removes.
pub const PROTECTED_TRUST_LIST: &str = "pdf_seal";

/// Trust anchors behind a read cache, with serialized writes.
pub struct TrustStore {
    repository: Box<dyn TrustRepository>,
    cache: RwLock<Option<HashMap<String, TrustAnchor>>>,
    write_lock: Mutex<()>,
    protected_list: String,
}

impl std::fmt::Debug for TrustStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustStore")
            .field("protected_list", &self.protected_list)
            .finish_non_exhaustive()
    }
}

impl TrustStore {
    /// Store over any repository.
    pub fn new(repository: impl TrustRepository + 'static) -> Self {
        Self {
            repository: Box::new(repository),
            cache: RwLock::new(None),
            write_lock: Mutex::new(()),
            protected_list: PROTECTED_TRUST_LIST.to_string(),
        }
    }

    /// Empty in-memory store.
    pub fn in_memory() -> Self {
        Self::new(MemoryTrustRepository::new())
    }

    /// Store persisted as JSON at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(JsonFileTrustRepository::open(path)?))
    }

    /// Use another name for the list that survives [`clear_all`](Self::clear_all).
    pub fn with_protected_list(mut self, list: impl Into<String>) -> Self {
        self.protected_list = list.into();
        self
    }

    /// Name of the protected list.
    pub fn protected_list(&self) -> &str {
        &self.protected_list
    }

    /// Anchor whose Subject Key Identifier is `subject_key_id` (hex, any case).
    pub fn check(&self, subject_key_id: &str) -> Result<Option<TrustAnchor>> {
        let key = TrustAnchor::normalize_key_id(subject_key_id);
        if key.is_empty() {
            return Ok(None);
        }

        if let Some(cache) = self.cache.read().map_err(|_| poisoned())?.as_ref() {
            return Ok(cache.get(&key).cloned());
        }

        let index: HashMap<String, TrustAnchor> = self
            .repository
            .all()?
            .into_iter()
            .map(|a| (a.subject_key_id.clone(), a))
            .collect();
        let found = index.get(&key).cloned();
        *self.cache.write().map_err(|_| poisoned())? = Some(index);
        Ok(found)
    }

    /// Anchor that is this very certificate: the key identifier selects the
    /// row and the DER fingerprint must match it.
    pub fn check_certificate(&self, cert: &ParsedCertificate) -> Result<Option<TrustAnchor>> {
        let Some(anchor) = self.check(&cert.key_id_hex())? else {
            return Ok(None);
        };
        if TrustAnchor::normalize_key_id(&anchor.fingerprint) == cert.fingerprint() {
            return Ok(Some(anchor));
        }
        log::warn!(
            "'{}' carries the key identifier of anchor '{}' but is a different certificate",
            cert.subject(),
            anchor.issuer_common_name
        );
        Ok(None)
    }

    /// Anchor that issued `cert`: named by its Authority Key Identifier and
    /// holding the key that verifies its signature.
    pub fn check_issuer_of(&self, cert: &ParsedCertificate) -> Result<Option<TrustAnchor>> {
        let Some(aki) = cert.authority_key_id() else {
            return Ok(None);
        };
        let Some(anchor) = self.check(&hex::encode_upper(aki))? else {
            return Ok(None);
        };
        let Some(spki) = anchor.public_key.as_deref().and_then(|k| hex::decode(k).ok()) else {
            log::debug!("Anchor '{}' has no stored public key", anchor.issuer_common_name);
            return Ok(None);
        };
        match cert.is_signed_by_key(&spki) {
            Ok(true) => Ok(Some(anchor)),
            Ok(false) => {
                log::warn!(
                    "'{}' names anchor '{}' as issuer but its signature does not verify",
                    cert.subject(),
                    anchor.issuer_common_name
                );
                Ok(None)
            },
            Err(e) => {
                log::debug!("Cannot check '{}' against anchor '{}': {}", cert.subject(), anchor.issuer_common_name, e);
                Ok(None)
            },
        }
    }

    /// Add `entries` under `list`; SKIs already stored (in any list) or
    /// repeated within the batch are skipped. Returns the number inserted.
    pub fn ingest(&self, list: &str, entries: Vec<TrustAnchor>) -> Result<usize> {
        let _guard = self.write_lock.lock().map_err(|_| poisoned())?;
        let inserted = self.repository.insert(&prepare(list, entries))?;
        self.invalidate()?;
        log::info!("Ingested {} new anchor(s) into trust list '{}'", inserted, list);
        Ok(inserted)
    }

    /// Replace the whole content of `list` with `entries`.
    pub fn refresh_list(&self, list: &str, entries: Vec<TrustAnchor>) -> Result<usize> {
        let _guard = self.write_lock.lock().map_err(|_| poisoned())?;
        let removed = self.repository.remove_where(&|a| a.list_name == list)?;
        let inserted = self.repository.insert(&prepare(list, entries))?;
        self.invalidate()?;
        log::info!(
            "Refreshed trust list '{}': {} removed, {} inserted",
            list,
            removed,
            inserted
        );
        Ok(inserted)
    }

    /// Remove every anchor of `list`.
    pub fn delete_list(&self, list: &str) -> Result<usize> {
        let _guard = self.write_lock.lock().map_err(|_| poisoned())?;
        let removed = self.repository.remove_where(&|a| a.list_name == list)?;
        self.invalidate()?;
        log::info!("Deleted trust list '{}' ({} anchor(s))", list, removed);
        Ok(removed)
    }

    /// Remove every list except the protected one.
    pub fn clear_all(&self) -> Result<usize> {
        self.clear_all_except(&self.protected_list.clone())
    }

    /// Remove every list except `keep`. The protected list is kept as well.
    pub fn clear_all_except(&self, keep: &str) -> Result<usize> {
        let _guard = self.write_lock.lock().map_err(|_| poisoned())?;
        let protected = self.protected_list.as_str();
        let removed = self
            .repository
            .remove_where(&|a| a.list_name != keep && a.list_name != protected)?;
        self.invalidate()?;
        log::info!("Cleared {} anchor(s), kept '{}' and '{}'", removed, keep, protected);
        Ok(removed)
    }

    /// Every stored anchor.
    pub fn anchors(&self) -> Result<Vec<TrustAnchor>> {
        self.repository.all()
    }

    /// Number of stored anchors.
    pub fn len(&self) -> Result<usize> {
        Ok(self.repository.all()?.len())
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Oldest insertion time among stored anchors.
    pub fn earliest_created_at(&self) -> Result<Option<DateTime<Utc>>> {
        self.repository.earliest_created_at()
    }

    /// Whether the oldest row is at least `frequency` old at `now` (or the store is empty).
    pub fn refresh_due(&self, frequency: Duration, now: DateTime<Utc>) -> Result<bool> {
        Ok(match self.earliest_created_at()? {
            Some(earliest) => now - earliest >= frequency,
            None => true,
        })
    }

    fn invalidate(&self) -> Result<()> {
        *self.cache.write().map_err(|_| poisoned())? = None;
        Ok(())
    }
}

fn poisoned() -> Error {
    Error::TrustStore("trust store lock poisoned".to_string())
}

/// Stamp `list` on every entry, normalize key ids, drop duplicate SKIs.
fn prepare(list: &str, entries: Vec<TrustAnchor>) -> Vec<TrustAnchor> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter_map(|mut a| {
            a.list_name = list.to_string();
            a.subject_key_id = TrustAnchor::normalize_key_id(&a.subject_key_id);
            a.authority_key_id = a.authority_key_id.as_deref().map(TrustAnchor::normalize_key_id);
            seen.insert(a.subject_key_id.clone()).then_some(a)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchor(ski: &str) -> TrustAnchor {
        TrustAnchor {
            list_name: String::new(),
            issuer_common_name: "Test CA".to_string(),
            subject_key_id: ski.to_string(),
            authority_key_id: None,
            fingerprint: String::new(),
            public_key: None,
            created_at: Utc::now() - Duration::days(10),
        }
    }

    #[test]
    fn test_check_is_case_insensitive() {
        let store = TrustStore::in_memory();
        store.ingest("eutl12", vec![anchor("ab01")]).unwrap();
        assert_eq!(store.check("AB01").unwrap().unwrap().list_name, "eutl12");
        assert!(store.check("").unwrap().is_none());
    }

    #[test]
    fn test_cache_invalidated_by_writes() {
        let store = TrustStore::in_memory();
        assert!(store.check("01").unwrap().is_none());
        store.ingest("tl12", vec![anchor("01")]).unwrap();
        assert!(store.check("01").unwrap().is_some());
        store.delete_list("tl12").unwrap();
        assert!(store.check("01").unwrap().is_none());
    }

    #[test]
    fn test_clear_all_keeps_protected_list() {
        let store = TrustStore::in_memory();
        store.ingest(PROTECTED_TRUST_LIST, vec![anchor("01")]).unwrap();
        store.ingest("eutl12", vec![anchor("02")]).unwrap();
        store.ingest("tl12", vec![anchor("03")]).unwrap();

        assert_eq!(store.clear_all_except("tl12").unwrap(), 1);
        assert!(store.check("03").unwrap().is_some());
        assert_eq!(store.clear_all().unwrap(), 1);
        assert!(store.check("01").unwrap().is_some());
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_refresh_replaces_list() {
        let store = TrustStore::in_memory();
        store.ingest("tl12", vec![anchor("01"), anchor("02")]).unwrap();
        assert_eq!(store.refresh_list("tl12", vec![anchor("02"), anchor("03")]).unwrap(), 2);
        assert!(store.check("01").unwrap().is_none());
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn test_refresh_due() {
        let store = TrustStore::in_memory();
        assert!(store.refresh_due(Duration::days(7), Utc::now()).unwrap());
        store.ingest("tl12", vec![anchor("01")]).unwrap();
        assert!(store.refresh_due(Duration::days(7), Utc::now()).unwrap());
        assert!(!store.refresh_due(Duration::days(30), Utc::now()).unwrap());
    }
}
