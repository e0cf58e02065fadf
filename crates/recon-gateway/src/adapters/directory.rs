//! User directory backed by a write-through cache.
//!
//! Reads are served from memory. Writes are serialized, applied to the
//! cache, then persisted; a failed persist reverts the cache before the error
//! is returned.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use crate::domain::Credential;
use crate::ports::{DirectoryError, UserDirectory};

/// Durable backend for the credential set.
#[async_trait]
pub trait UserStorage: Send + Sync {
    /// Short name for logs
    fn backend_name(&self) -> &'static str;
    /// Read every stored credential
    async fn load_all(&self) -> Result<Vec<Credential>, DirectoryError>;
    /// Replace the stored set
    async fn save_all(&self, credentials: &[Credential]) -> Result<(), DirectoryError>;
}

// =============================================================================
// JSON FILE BACKEND
// =============================================================================

/// One JSON array of credentials in a single file.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl UserStorage for JsonFileStorage {
    fn backend_name(&self) -> &'static str {
        "json-file"
    }

    async fn load_all(&self) -> Result<Vec<Credential>, DirectoryError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "User file missing, starting empty");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save_all(&self, credentials: &[Credential]) -> Result<(), DirectoryError> {
        write_atomically(&self.path, &serde_json::to_vec_pretty(credentials)?).await?;
        Ok(())
    }
}

/// Write to a sibling temp file unique to this call, then rename over
/// `path`. The temp file is removed if the rename never happens.
pub(crate) async fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
    let tmp = PathBuf::from(tmp);

    let written = match tokio::fs::write(&tmp, bytes).await {
        Ok(()) => tokio::fs::rename(&tmp, path).await,
        Err(e) => Err(e),
    };
    if written.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    written
}

// =============================================================================
// MEMORY BACKEND
// =============================================================================

/// Volatile backend for tests and throwaway deployments.
#[derive(Default)]
pub struct MemoryStorage {
    credentials: Mutex<Vec<Credential>>,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(credentials: Vec<Credential>) -> Self {
        Self {
            credentials: Mutex::new(credentials),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent save fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Last successfully saved set
    pub fn stored(&self) -> Vec<Credential> {
        self.credentials.lock().clone()
    }
}

#[async_trait]
impl UserStorage for MemoryStorage {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn load_all(&self) -> Result<Vec<Credential>, DirectoryError> {
        Ok(self.credentials.lock().clone())
    }

    async fn save_all(&self, credentials: &[Credential]) -> Result<(), DirectoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unavailable("writes disabled".to_string()));
        }
        *self.credentials.lock() = credentials.to_vec();
        Ok(())
    }
}

// =============================================================================
// CACHED DIRECTORY
// =============================================================================

/// [`UserDirectory`] over any [`UserStorage`].
pub struct CachedUserDirectory<S> {
    storage: S,
    cache: RwLock<HashMap<String, Credential>>,
    writes: tokio::sync::Mutex<()>,
}

impl<S: UserStorage> CachedUserDirectory<S> {
    /// Load `storage` into a fresh cache.
    pub async fn open(storage: S) -> Result<Self, DirectoryError> {
        let directory = Self {
            storage,
            cache: RwLock::new(HashMap::new()),
            writes: tokio::sync::Mutex::new(()),
        };
        directory.reload().await?;
        Ok(directory)
    }

    /// Replace the cache with the backend's current contents.
    pub async fn reload(&self) -> Result<usize, DirectoryError> {
        let _write = self.writes.lock().await;
        let loaded = self.storage.load_all().await?;

        let mut fresh = HashMap::with_capacity(loaded.len());
        for credential in loaded {
            validate(&credential)?;
            if fresh.contains_key(&credential.identity) {
                warn!(identity = %credential.identity, "Duplicate identity in storage, keeping the last");
            }
            fresh.insert(credential.identity.clone(), credential);
        }

        let count = fresh.len();
        *self.cache.write() = fresh;
        info!(backend = self.storage.backend_name(), users = count, "User directory loaded");
        Ok(count)
    }

    /// Number of cached credentials
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }

    /// Sorted identities
    pub fn identities(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.cache.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn snapshot(&self) -> Vec<Credential> {
        let mut all: Vec<Credential> = self.cache.read().values().cloned().collect();
        all.sort_by(|a, b| a.identity.cmp(&b.identity));
        all
    }

    fn revert(&self, identity: &str, previous: Option<Credential>) {
        let mut cache = self.cache.write();
        match previous {
            Some(previous) => {
                cache.insert(identity.to_string(), previous);
            }
            None => {
                cache.remove(identity);
            }
        }
    }
}

fn validate(credential: &Credential) -> Result<(), DirectoryError> {
    if credential.identity.trim().is_empty() {
        return Err(DirectoryError::InvalidCredential(
            "identity must not be empty".to_string(),
        ));
    }
    if credential.secret.is_empty() {
        return Err(DirectoryError::InvalidCredential(format!(
            "secret for {} must not be empty",
            credential.identity
        )));
    }
    Ok(())
}

#[async_trait]
impl<S: UserStorage> UserDirectory for CachedUserDirectory<S> {
    async fn lookup(&self, identity: &str) -> Option<Credential> {
        self.cache.read().get(identity).cloned()
    }

    async fn upsert(&self, credential: Credential) -> Result<(), DirectoryError> {
        validate(&credential)?;
        let _write = self.writes.lock().await;

        let identity = credential.identity.clone();
        let previous = self.cache.write().insert(identity.clone(), credential);

        if let Err(e) = self.storage.save_all(&self.snapshot()).await {
            self.revert(&identity, previous);
            warn!(identity = %identity, error = %e, "Persisting credential failed, cache reverted");
            return Err(e);
        }
        debug!(identity = %identity, "Credential stored");
        Ok(())
    }

    async fn remove(&self, identity: &str) -> Result<bool, DirectoryError> {
        let _write = self.writes.lock().await;

        let previous = self.cache.write().remove(identity);
        if previous.is_none() {
            return Ok(false);
        }

        if let Err(e) = self.storage.save_all(&self.snapshot()).await {
            self.revert(identity, previous);
            warn!(identity = %identity, error = %e, "Persisting removal failed, cache reverted");
            return Err(e);
        }
        debug!(identity = %identity, "Credential removed");
        Ok(true)
    }

    async fn exists(&self, identity: &str) -> bool {
        self.cache.read().contains_key(identity)
    }

    async fn find_by_actor(&self, actor: &str) -> Option<Credential> {
        let cache = self.cache.read();
        let mut matches: Vec<&Credential> = cache
            .values()
            .filter(|c| c.execution_context().actor() == Some(actor))
            .collect();
        matches.sort_by(|a, b| a.identity.cmp(&b.identity));
        matches.first().map(|c| (*c).clone())
    }
}
