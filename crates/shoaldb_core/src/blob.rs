//! Blob buckets.
//!
//! Objects live under `blobs/<bucket>/` as a metadata file and a payload
//! file. Metadata is kept in memory; payloads are read on demand. Objects
//! with a textual content type are also fed to a full-text index that
//! backs the `search` verb.

use crate::dir::{encode_hex, DatabaseDir, DATA_EXT, META_EXT};
use crate::error::{CoreError, CoreResult};
use crate::index::TextIndex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

/// Content type used when a caller gives none.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Metadata of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Owning bucket.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Payload size in bytes.
    pub size: u64,
    /// MIME type.
    pub content_type: String,
    /// Hex SHA-256 of the payload.
    pub etag: String,
    /// Creation time, Unix milliseconds.
    pub created_at: u64,
    /// User metadata.
    pub metadata: BTreeMap<String, String>,
}

/// A ranked blob search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlobHit {
    /// Bucket of the matching object.
    pub bucket: String,
    /// Key of the matching object.
    pub key: String,
    /// Relevance score.
    pub score: f64,
}

fn is_text(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence.starts_with("text/") || essence == "application/json" || essence == "application/xml"
}

fn check_name(what: &str, name: &str) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::validation(format!("{what} must not be empty")));
    }
    Ok(())
}

fn roles(bucket: &str, key: &str) -> (String, String) {
    let id = format!(
        "{}:{}",
        encode_hex(bucket.as_bytes()),
        encode_hex(key.as_bytes())
    );
    (format!("blob-meta:{id}"), format!("blob-data:{id}"))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

/// All buckets of a database.
#[derive(Debug, Default)]
pub struct BlobStore {
    buckets: BTreeMap<String, BTreeMap<String, ObjectMeta>>,
    search: TextIndex<(String, String)>,
}

impl BlobStore {
    /// Loads bucket listings and rebuilds the search index.
    pub fn load(dir: &DatabaseDir) -> CoreResult<Self> {
        let mut store = BlobStore::default();
        for bucket in dir.bucket_names()? {
            let mut objects = BTreeMap::new();
            for key in dir.object_keys(&bucket)? {
                let (meta_role, data_role) = roles(&bucket, &key);
                let Some(bytes) =
                    dir.read_sealed(&dir.object_path(&bucket, &key, META_EXT), &meta_role)?
                else {
                    continue;
                };
                let meta: ObjectMeta = serde_json::from_slice(&bytes)?;
                if is_text(&meta.content_type) {
                    if let Some(data) =
                        dir.read_sealed(&dir.object_path(&bucket, &key, DATA_EXT), &data_role)?
                    {
                        store.index_text(&bucket, &key, &data);
                    }
                }
                objects.insert(key, meta);
            }
            store.buckets.insert(bucket, objects);
        }
        Ok(store)
    }

    fn index_text(&mut self, bucket: &str, key: &str, data: &[u8]) {
        if let Ok(text) = std::str::from_utf8(data) {
            self.search
                .insert((bucket.to_string(), key.to_string()), text);
        }
    }

    /// Creates a bucket. Returns whether it already existed.
    pub fn create_bucket(&mut self, dir: &DatabaseDir, bucket: &str) -> CoreResult<bool> {
        check_name("bucket name", bucket)?;
        if self.buckets.contains_key(bucket) {
            return Ok(true);
        }
        fs::create_dir_all(dir.bucket_dir(bucket))?;
        self.buckets.insert(bucket.to_string(), BTreeMap::new());
        Ok(false)
    }

    /// Bucket names in order.
    pub fn list_buckets(&self) -> Vec<String> {
        self.buckets.keys().cloned().collect()
    }

    /// Deletes a bucket with all its objects. Returns whether it existed.
    pub fn delete_bucket(&mut self, dir: &DatabaseDir, bucket: &str) -> CoreResult<bool> {
        check_name("bucket name", bucket)?;
        let Some(objects) = self.buckets.get(bucket) else {
            return Ok(false);
        };
        for key in objects.keys() {
            self.search.remove(&(bucket.to_string(), key.clone()));
        }
        dir.remove_dir(&dir.bucket_dir(bucket))?;
        self.buckets.remove(bucket);
        Ok(true)
    }

    /// Stores an object, creating the bucket if needed and replacing any
    /// object under the same key.
    pub fn put_object(
        &mut self,
        dir: &DatabaseDir,
        bucket: &str,
        key: &str,
        data: &[u8],
        content_type: Option<String>,
        metadata: BTreeMap<String, String>,
    ) -> CoreResult<ObjectMeta> {
        check_name("bucket name", bucket)?;
        check_name("object key", key)?;
        self.create_bucket(dir, bucket)?;

        let meta = ObjectMeta {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: data.len() as u64,
            content_type: content_type
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            etag: encode_hex(&Sha256::digest(data)),
            created_at: now_millis(),
            metadata,
        };

        let (meta_role, data_role) = roles(bucket, key);
        dir.write_sealed(&dir.object_path(bucket, key, DATA_EXT), &data_role, data)?;
        dir.write_sealed(
            &dir.object_path(bucket, key, META_EXT),
            &meta_role,
            &serde_json::to_vec(&meta)?,
        )?;

        let id = (bucket.to_string(), key.to_string());
        if is_text(&meta.content_type) {
            self.index_text(bucket, key, data);
        } else {
            self.search.remove(&id);
        }
        if let Some(objects) = self.buckets.get_mut(bucket) {
            objects.insert(key.to_string(), meta.clone());
        }
        Ok(meta)
    }

    /// Metadata of an object.
    pub fn head_object(&self, bucket: &str, key: &str) -> CoreResult<ObjectMeta> {
        let objects = self
            .buckets
            .get(bucket)
            .ok_or_else(|| CoreError::not_found("bucket", bucket))?;
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| CoreError::not_found("object", format!("{bucket}/{key}")))
    }

    /// Metadata and payload of an object.
    pub fn get_object(
        &self,
        dir: &DatabaseDir,
        bucket: &str,
        key: &str,
    ) -> CoreResult<(ObjectMeta, Vec<u8>)> {
        let meta = self.head_object(bucket, key)?;
        let (_, data_role) = roles(bucket, key);
        let data = dir
            .read_sealed(&dir.object_path(bucket, key, DATA_EXT), &data_role)?
            .ok_or_else(|| CoreError::internal(format!("payload of {bucket}/{key} is missing")))?;
        Ok((meta, data))
    }

    /// Deletes an object. Returns whether it existed.
    pub fn delete_object(&mut self, dir: &DatabaseDir, bucket: &str, key: &str) -> CoreResult<bool> {
        let Some(objects) = self.buckets.get_mut(bucket) else {
            return Ok(false);
        };
        if objects.remove(key).is_none() {
            return Ok(false);
        }
        dir.remove_file(&dir.object_path(bucket, key, META_EXT))?;
        dir.remove_file(&dir.object_path(bucket, key, DATA_EXT))?;
        self.search.remove(&(bucket.to_string(), key.to_string()));
        Ok(true)
    }

    /// Objects of a bucket in key order.
    pub fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        limit: usize,
    ) -> CoreResult<Vec<ObjectMeta>> {
        let objects = self
            .buckets
            .get(bucket)
            .ok_or_else(|| CoreError::not_found("bucket", bucket))?;
        let prefix = prefix.unwrap_or_default();
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .take(limit)
            .map(|(_, meta)| meta.clone())
            .collect())
    }

    /// Ranked search over textual objects.
    pub fn search(&self, query: &str, bucket: Option<&str>, limit: usize) -> Vec<BlobHit> {
        self.search
            .search_filtered(query, limit, |(b, _)| bucket.map_or(true, |want| b == want))
            .into_iter()
            .map(|((bucket, key), score)| BlobHit { bucket, key, score })
            .collect()
    }
}
