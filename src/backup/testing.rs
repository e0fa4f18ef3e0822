// dbbackup/src/backup/testing.rs
//! Fakes for the pipeline's two external capabilities: the dump producer
//! and the object store.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::backup::db_dump::{ActiveDump, DumpSource};
use crate::backup::retention::parse_key_timestamp;
use crate::backup::s3_upload::{ObjectStore, RemoteObjectDescriptor};
use crate::errors::{BackupError, Result, StorageError};

/// In-memory dump source: yields fixed bytes, then an optional scripted
/// failure from `finish()` (simulating a non-zero client exit).
pub struct FakeDumpSource {
    name: String,
    data: Vec<u8>,
    failure: Option<String>,
}

impl FakeDumpSource {
    pub fn new(name: &str, data: Vec<u8>) -> Self {
        FakeDumpSource { name: name.to_string(), data, failure: None }
    }

    pub fn failing(name: &str, diagnostics: &str) -> Self {
        FakeDumpSource {
            name: name.to_string(),
            data: b"-- truncated".to_vec(),
            failure: Some(diagnostics.to_string()),
        }
    }
}

impl DumpSource for FakeDumpSource {
    fn open(&self) -> Result<ActiveDump> {
        let failure = self.failure.clone();
        Ok(ActiveDump::new(
            self.name.clone(),
            Box::new(Cursor::new(self.data.clone())),
            Box::new(move || match failure {
                Some(diagnostics) => Err(BackupError::Dump(diagnostics)),
                None => Ok(()),
            }),
        ))
    }
}

pub struct FakeObject {
    pub size: u64,
    pub sha256_base64: Option<String>,
    pub last_modified: DateTime<Utc>,
}

/// In-memory object store with scripted upload failures, a head-checksum
/// override for integrity tests, and per-key delete failures.
pub struct FakeStore {
    pub objects: Mutex<BTreeMap<String, FakeObject>>,
    pub upload_failures: Mutex<VecDeque<StorageError>>,
    pub head_checksum_override: Mutex<Option<String>>,
    pub undeletable: Mutex<HashSet<String>>,
    pub upload_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
}

impl FakeStore {
    pub fn new() -> Self {
        FakeStore {
            objects: Mutex::new(BTreeMap::new()),
            upload_failures: Mutex::new(VecDeque::new()),
            head_checksum_override: Mutex::new(None),
            undeletable: Mutex::new(HashSet::new()),
            upload_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
        }
    }

    /// Inserts a pre-existing backup object, dated from its key.
    pub fn seed(&self, key: &str) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            FakeObject {
                size: 1024,
                sha256_base64: None,
                last_modified: parse_key_timestamp(key).unwrap_or_else(Utc::now),
            },
        );
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn upload(
        &self,
        key: &str,
        source: &Path,
        sha256_base64: &str,
    ) -> std::result::Result<RemoteObjectDescriptor, StorageError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = self.upload_failures.lock().unwrap().pop_front() {
            return Err(failure);
        }

        let size = std::fs::metadata(source)
            .map_err(|e| StorageError::permanent(format!("cannot stat spool file: {e}")))?
            .len();
        self.objects.lock().unwrap().insert(
            key.to_string(),
            FakeObject {
                size,
                sha256_base64: Some(sha256_base64.to_string()),
                last_modified: Utc::now(),
            },
        );
        Ok(RemoteObjectDescriptor {
            bucket: "fake".to_string(),
            key: key.to_string(),
            size,
            sha256_base64: Some(sha256_base64.to_string()),
            last_modified: None,
        })
    }

    async fn head(&self, key: &str) -> std::result::Result<RemoteObjectDescriptor, StorageError> {
        let objects = self.objects.lock().unwrap();
        let object = objects
            .get(key)
            .ok_or_else(|| StorageError::permanent(format!("no such key: {key}")))?;
        let sha256_base64 = match self.head_checksum_override.lock().unwrap().clone() {
            Some(forced) => Some(forced),
            None => object.sha256_base64.clone(),
        };
        Ok(RemoteObjectDescriptor {
            bucket: "fake".to_string(),
            key: key.to_string(),
            size: object.size,
            sha256_base64,
            last_modified: Some(object.last_modified),
        })
    }

    async fn list(
        &self,
        prefix: &str,
    ) -> std::result::Result<Vec<RemoteObjectDescriptor>, StorageError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| RemoteObjectDescriptor {
                bucket: "fake".to_string(),
                key: key.clone(),
                size: object.size,
                sha256_base64: None,
                last_modified: Some(object.last_modified),
            })
            .collect())
    }

    async fn delete(&self, key: &str) -> std::result::Result<(), StorageError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.undeletable.lock().unwrap().contains(key) {
            return Err(StorageError::permanent(format!("access denied deleting {key}")));
        }
        self.objects
            .lock()
            .unwrap()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::permanent(format!("no such key: {key}")))
    }
}
