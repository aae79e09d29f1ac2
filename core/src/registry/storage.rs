//! Object storage for run artifacts and registered model files.

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{RegistryError, RegistryResult};

/// Minimal object store surface the registry needs
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Every key in `bucket` starting with `prefix`
    async fn list_keys(&self, bucket: &str, prefix: &str) -> RegistryResult<Vec<String>>;

    async fn get_object(&self, bucket: &str, key: &str) -> RegistryResult<Vec<u8>>;

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> RegistryResult<()>;
}

fn storage_error<E>(err: E) -> RegistryError
where
    E: std::error::Error,
{
    RegistryError::Storage(DisplayErrorContext(err).to_string())
}

/// Amazon S3 (or any S3-compatible endpoint picked up from the AWS env)
#[derive(Clone)]
pub struct S3Store {
    client: aws_sdk_s3::Client,
}

impl S3Store {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }

    /// Build a client from the standard AWS environment and profile chain
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(aws_sdk_s3::Client::new(&config))
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list_keys(&self, bucket: &str, prefix: &str) -> RegistryResult<Vec<String>> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(storage_error)?;
            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(str::to_string)),
            );
        }
        Ok(keys)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> RegistryResult<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(storage_error)?;
        let bytes = output.body.collect().await.map_err(storage_error)?;
        Ok(bytes.into_bytes().to_vec())
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> RegistryResult<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(storage_error)?;
        Ok(())
    }
}

/// Process-local store, used by tests and offline runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<(String, String), Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_keys(&self, bucket: &str, prefix: &str) -> RegistryResult<Vec<String>> {
        let objects = self.objects.read().await;
        Ok(objects
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> RegistryResult<Vec<u8>> {
        let objects = self.objects.read().await;
        objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(format!("s3://{bucket}/{key}")))
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> RegistryResult<()> {
        let mut objects = self.objects.write().await;
        objects.insert((bucket.to_string(), key.to_string()), body);
        Ok(())
    }
}

/// Split `s3://bucket/folder/...` into bucket and folder.
///
/// The bucket must be followed by `/`; the folder may be empty.
pub fn parse_s3_uri(uri: &str) -> RegistryResult<(String, String)> {
    let rest = uri
        .strip_prefix("s3://")
        .ok_or_else(|| RegistryError::InvalidUri(uri.to_string()))?;
    match rest.split_once('/') {
        Some((bucket, folder)) if !bucket.is_empty() => {
            Ok((bucket.to_string(), folder.to_string()))
        }
        _ => Err(RegistryError::InvalidUri(uri.to_string())),
    }
}

/// Local path for `key` under the mirrored `folder`, or `None` when the key
/// is a directory marker or lies outside the folder
fn local_target(local_dir: &Path, folder: &str, key: &str) -> Option<PathBuf> {
    if key.ends_with('/') {
        return None;
    }
    let folder = folder.trim_end_matches('/');
    let relative = if folder.is_empty() {
        key
    } else if key == folder {
        // the prefix names a single object
        key.rsplit('/').next()?
    } else {
        key.strip_prefix(folder)?.strip_prefix('/')?
    };

    let relative = Path::new(relative);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }
    Some(local_dir.join(relative))
}

/// Mirror every object under `s3_uri` into a fresh `local_dir`
pub async fn download_folder(
    store: &dyn ObjectStore,
    s3_uri: &str,
    local_dir: &Path,
) -> RegistryResult<Vec<PathBuf>> {
    let (bucket, folder) = parse_s3_uri(s3_uri)?;
    if local_dir.exists() {
        fs::remove_dir_all(local_dir)?;
    }
    fs::create_dir_all(local_dir)?;

    let mut written = Vec::new();
    for key in store.list_keys(&bucket, &folder).await? {
        let Some(target) = local_target(local_dir, &folder, &key) else {
            if !key.ends_with('/') {
                warn!("Skipping {key}: outside {folder}");
            }
            continue;
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let body = store.get_object(&bucket, &key).await?;
        fs::write(&target, body)?;
        debug!("Downloaded s3://{bucket}/{key} -> {}", target.display());
        written.push(target);
    }

    info!(
        "Downloaded {} objects from {s3_uri} into {}",
        written.len(),
        local_dir.display()
    );
    Ok(written)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

/// Upload every file under `local_dir` to the prefix named by `s3_uri`
pub async fn upload_folder(
    store: &dyn ObjectStore,
    local_dir: &Path,
    s3_uri: &str,
) -> RegistryResult<Vec<String>> {
    let (bucket, folder) = parse_s3_uri(s3_uri)?;
    let folder = folder.trim_end_matches('/');

    let mut files = Vec::new();
    collect_files(local_dir, &mut files)?;
    files.sort();

    let mut keys = Vec::with_capacity(files.len());
    for file in files {
        let relative = file
            .strip_prefix(local_dir)
            .map_err(|e| RegistryError::Storage(e.to_string()))?;
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let key = if folder.is_empty() {
            relative
        } else {
            format!("{folder}/{relative}")
        };
        store.put_object(&bucket, &key, fs::read(&file)?).await?;
        debug!("Uploaded {} -> s3://{bucket}/{key}", file.display());
        keys.push(key);
    }

    info!("Uploaded {} files to {s3_uri}", keys.len());
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_s3_uri() {
        assert_eq!(
            parse_s3_uri("s3://bucket/1/abc/artifacts/model").unwrap(),
            ("bucket".to_string(), "1/abc/artifacts/model".to_string())
        );
        assert_eq!(
            parse_s3_uri("s3://bucket/").unwrap(),
            ("bucket".to_string(), String::new())
        );
        assert!(parse_s3_uri("s3://bucket").is_err());
        assert!(parse_s3_uri("s3:///key").is_err());
        assert!(parse_s3_uri("https://bucket/key").is_err());
    }

    #[test]
    fn test_local_target() {
        let dir = Path::new("/tmp/out");
        assert_eq!(
            local_target(dir, "run/model", "run/model/model.bin"),
            Some(dir.join("model.bin"))
        );
        assert_eq!(local_target(dir, "run/model", "run/model/"), None);
        assert_eq!(local_target(dir, "run/model", "run/model_v2/model.bin"), None);
        assert_eq!(
            local_target(dir, "run/model.bin", "run/model.bin"),
            Some(dir.join("model.bin"))
        );
        assert_eq!(local_target(dir, "", "a/../b"), None);
    }

    #[tokio::test]
    async fn test_upload_then_download_mirrors_folder() {
        let store = MemoryStore::new();
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("model.bin"), b"model").unwrap();
        fs::create_dir_all(src.path().join("nested")).unwrap();
        fs::write(src.path().join("nested/meta.bin"), b"meta").unwrap();

        let keys = upload_folder(&store, src.path(), "s3://bucket/1/run/artifacts/model")
            .await
            .unwrap();
        assert_eq!(
            keys,
            vec![
                "1/run/artifacts/model/model.bin",
                "1/run/artifacts/model/nested/meta.bin"
            ]
        );
        // directory marker and a sibling folder are not mirrored
        store
            .put_object("bucket", "1/run/artifacts/model/", Vec::new())
            .await
            .unwrap();
        store
            .put_object("bucket", "1/run/artifacts/model_old/x.bin", b"x".to_vec())
            .await
            .unwrap();

        let dst = tempfile::tempdir().unwrap();
        let out = dst.path().join("model");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("stale.bin"), b"old").unwrap();

        let written = download_folder(&store, "s3://bucket/1/run/artifacts/model", &out)
            .await
            .unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(fs::read(out.join("model.bin")).unwrap(), b"model");
        assert_eq!(fs::read(out.join("nested/meta.bin")).unwrap(), b"meta");
        assert!(!out.join("stale.bin").exists());
    }

    #[tokio::test]
    async fn test_memory_store_missing_object() {
        let store = MemoryStore::new();
        assert!(store.is_empty().await);
        assert!(matches!(
            store.get_object("bucket", "nope").await,
            Err(RegistryError::NotFound(_))
        ));
    }
}
