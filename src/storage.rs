//! Persistence of the whole chain as one JSON blob under a fixed key.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::StorageError;
use crate::ledger::create_first_record;
use crate::model::Record;

/// Key under which the chain is stored.
pub const LEDGER_KEY: &str = "medichain_ledger";

/// Opaque key-value blob store.
pub trait BlobStore: Send + Sync {
    fn get(&self, key: &str) -> io::Result<Option<String>>;
    fn put(&self, key: &str, value: &str) -> io::Result<()>;
    fn remove(&self, key: &str) -> io::Result<()>;
}

/// Ensure that the given directory exists (create recursively if needed).
pub fn ensure_dir(dir: &Path) -> io::Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// One `<key>.json` file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        ensure_dir(&dir)?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl BlobStore for FileStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        let p = self.path_for(key);
        if !p.exists() {
            return Ok(None);
        }
        let mut buf = String::new();
        File::open(&p)?.read_to_string(&mut buf)?;
        Ok(Some(buf))
    }

    fn put(&self, key: &str, value: &str) -> io::Result<()> {
        ensure_dir(&self.dir)?;
        let p = self.path_for(key);
        let tmp = p.with_extension("json.tmp");
        let mut f = File::create(&tmp)?;
        f.write_all(value.as_bytes())?;
        f.sync_all()?;
        fs::rename(&tmp, &p)
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.blobs
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "memory store poisoned"))
    }
}

impl BlobStore for MemoryStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> io::Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// Load the stored chain.
///
/// A missing key, unreadable blob, parse failure or empty array all mean
/// "no chain exists" and yield `None`.
pub fn load_chain(store: &dyn BlobStore) -> Option<Vec<Record>> {
    let raw = match store.get(LEDGER_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!(error = %e, "failed to read stored chain");
            return None;
        }
    };
    match serde_json::from_str::<Vec<Record>>(&raw) {
        Ok(chain) if !chain.is_empty() => Some(chain),
        Ok(_) => None,
        Err(e) => {
            tracing::error!(error = %e, "failed to parse chain from storage");
            None
        }
    }
}

/// Stored chain, or a fresh genesis chain when none exists.
///
/// The loaded chain is not verified here; callers report integrity so a
/// tampered chain stays in place for inspection.
pub fn load_or_init(store: &dyn BlobStore) -> Vec<Record> {
    match load_chain(store) {
        Some(chain) => {
            tracing::info!(records = chain.len(), "loaded chain from storage");
            chain
        }
        None => {
            tracing::info!("no stored chain; starting from genesis");
            vec![create_first_record()]
        }
    }
}

/// Serialise and store the full chain.
pub fn save_chain(store: &dyn BlobStore, chain: &[Record]) -> Result<(), StorageError> {
    let json = serde_json::to_string(chain)?;
    store.put(LEDGER_KEY, &json)?;
    Ok(())
}

/// Drop the stored chain and replace it with a fresh genesis chain.
pub fn reset_chain(store: &dyn BlobStore) -> Result<Vec<Record>, StorageError> {
    store.remove(LEDGER_KEY)?;
    let chain = vec![create_first_record()];
    save_chain(store, &chain)?;
    tracing::warn!("ledger reset to a fresh genesis record");
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{append, create_first_record_at, verify};
    use crate::model::{Payload, Priority, PATIENT_ISSUER};

    fn sample_chain() -> Vec<Record> {
        let g = create_first_record();
        let p = Payload::booking("123", "CF", Priority::U, "TAC").unwrap();
        let r = append(&g, p, PATIENT_ISSUER).unwrap();
        vec![g, r]
    }

    #[test]
    fn missing_key_is_no_chain() {
        let store = MemoryStore::default();
        assert!(load_chain(&store).is_none());
        let chain = load_or_init(&store);
        assert_eq!(chain.len(), 1);
        assert!(chain[0].is_genesis());
    }

    #[test]
    fn corrupt_or_empty_blob_is_no_chain() {
        let store = MemoryStore::default();
        store.put(LEDGER_KEY, "{not json").unwrap();
        assert!(load_chain(&store).is_none());
        store.put(LEDGER_KEY, "{\"a\":1}").unwrap();
        assert!(load_chain(&store).is_none());
        store.put(LEDGER_KEY, "[]").unwrap();
        assert!(load_chain(&store).is_none());
        assert_eq!(load_or_init(&store).len(), 1);
    }

    #[test]
    fn round_trip_keeps_chain_valid() {
        let store = MemoryStore::default();
        let chain = sample_chain();
        save_chain(&store, &chain).unwrap();
        let loaded = load_chain(&store).unwrap();
        assert_eq!(loaded, chain);
        assert!(verify(&loaded));
    }

    #[test]
    fn file_store_persists_and_resets() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("data")).unwrap();
        let chain = sample_chain();
        save_chain(&store, &chain).unwrap();
        assert!(store.path_for(LEDGER_KEY).exists());

        let reopened = FileStore::new(dir.path().join("data")).unwrap();
        assert_eq!(load_chain(&reopened).unwrap(), chain);

        let fresh = reset_chain(&reopened).unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(load_chain(&reopened).unwrap(), fresh);
    }

    #[test]
    fn file_store_remove_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        assert!(store.remove("nothing").is_ok());
        assert!(store.get("nothing").unwrap().is_none());
    }

    #[test]
    fn loads_chain_written_by_browser_demo() {
        let g = create_first_record_at(1_717_000_000_000);
        let json = format!(
            concat!(
                "[{{\"index\":0,\"timestamp\":{},\"data\":{},",
                "\"previousHash\":\"0\",\"hash\":\"{}\",\"validator\":\"SYSTEM_NODE\"}}]"
            ),
            g.created_at,
            serde_json::to_string(&g.payload).unwrap(),
            g.digest
        );
        let store = MemoryStore::default();
        store.put(LEDGER_KEY, &json).unwrap();
        let loaded = load_chain(&store).unwrap();
        assert!(verify(&loaded));
        assert_eq!(loaded[0], g);
    }
}
