//! ObjectStore: streaming blob storage namespaced per application.
//!
//! Objects are plain files under `{root}/{app}/{key}`. Writes stream through
//! a fixed buffer into a hidden partial file that is renamed into place once
//! complete, so readers never observe a half-written object and memory use
//! does not grow with object size.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use keel_core::{ObjectInfo, ObjectStoreOptions};
use sha2::{Digest, Sha256};
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::key::normalize_key;

const COPY_BUFFER: usize = 64 * 1024;
const PARTIAL_SUFFIX: &str = ".partial";

static PARTIAL_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn app_dir(&self, app: &str) -> StateResult<PathBuf> {
        if app.contains('/') {
            return Err(StateError::InvalidKey(app.to_string()));
        }
        Ok(self.root.join(normalize_key(app)?))
    }

    fn object_path(&self, app: &str, key: &str) -> StateResult<PathBuf> {
        let key = normalize_key(key)?;
        Ok(self.app_dir(app)?.join(key))
    }

    /// Open the object for streaming reads.
    pub async fn fetch(&self, app: &str, key: &str) -> StateResult<File> {
        let path = self.object_path(app, key)?;
        match File::open(&path).await {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StateError::NotFound(format!("{app}/{key}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stream `reader` into the object at `(app, key)`, replacing any
    /// previous content.
    pub async fn store<R>(
        &self,
        app: &str,
        key: &str,
        mut reader: R,
        opts: &ObjectStoreOptions,
    ) -> StateResult<ObjectInfo>
    where
        R: AsyncRead + Unpin,
    {
        let path = self.object_path(app, key)?;
        let parent = path
            .parent()
            .ok_or_else(|| StateError::InvalidKey(key.to_string()))?;
        fs::create_dir_all(parent).await?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StateError::InvalidKey(key.to_string()))?;
        let seq = PARTIAL_SEQ.fetch_add(1, Ordering::Relaxed);
        let partial = parent.join(format!(".{file_name}.{seq}{PARTIAL_SUFFIX}"));

        let result = copy_hashed(&mut reader, &partial).await;
        let (size, checksum) = match result {
            Ok(done) => done,
            Err(e) => {
                let _ = fs::remove_file(&partial).await;
                return Err(e);
            }
        };
        fs::rename(&partial, &path).await?;

        debug!(%app, %key, size, "object stored");
        Ok(ObjectInfo {
            key: normalize_key(key)?,
            size,
            checksum,
            public: opts.public,
        })
    }

    pub async fn exists(&self, app: &str, key: &str) -> StateResult<bool> {
        let path = self.object_path(app, key)?;
        Ok(fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false))
    }

    pub async fn delete(&self, app: &str, key: &str) -> StateResult<()> {
        let path = self.object_path(app, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(%app, %key, "object deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StateError::NotFound(format!("{app}/{key}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Keys of every object of `app` starting with `prefix`, sorted.
    pub async fn list(&self, app: &str, prefix: &str) -> StateResult<Vec<String>> {
        let dir = self.app_dir(app)?;
        let prefix = prefix.trim_start_matches('/').to_string();
        let keys = tokio::task::spawn_blocking(move || walk_keys(&dir, &prefix))
            .await
            .map_err(|e| StateError::Io(std::io::Error::other(e)))??;
        Ok(keys)
    }

    /// Remove every object belonging to `app`.
    pub async fn delete_app(&self, app: &str) -> StateResult<()> {
        let dir = self.app_dir(app)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

async fn copy_hashed<R>(reader: &mut R, dest: &Path) -> StateResult<(u64, String)>
where
    R: AsyncRead + Unpin,
{
    let mut file = File::create(dest).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; COPY_BUFFER];
    let mut size = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        file.write_all(&buf[..n]).await?;
        size += n as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok((size, hex::encode(hasher.finalize())))
}

fn walk_keys(dir: &Path, prefix: &str) -> StateResult<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut keys = Vec::new();
    for entry in walkdir::WalkDir::new(dir).min_depth(1) {
        let entry = entry.map_err(|e| StateError::Io(std::io::Error::other(e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') && name.ends_with(PARTIAL_SUFFIX) {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let key = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if key.starts_with(prefix) {
            keys.push(key);
        }
    }
    keys.sort();
    Ok(keys)
}
