//! Database directory management.
//!
//! This module handles the file system layout for ShoalDB:
//!
//! ```text
//! <db_path>/
//! ├─ MANIFEST                      # Format version, encryption flag (plain JSON)
//! ├─ LOCK                          # Advisory lock for single-writer
//! ├─ COMMITS                       # Markers of multi-collection commits
//! ├─ collections/
//! │  ├─ <hex(name)>.col            # Collection snapshot
//! │  └─ <hex(name)>.log            # Journal of writes since the snapshot
//! └─ blobs/
//!    └─ <hex(bucket)>/
//!       ├─ <hex(key)>.meta         # Object metadata
//!       └─ <hex(key)>.data         # Object payload
//! ```
//!
//! Names are hex-encoded so any UTF-8 collection, bucket or key maps to a
//! portable file name. With a key, every file except MANIFEST and LOCK is
//! sealed by [`CryptoManager`].

use crate::crypto::CryptoManager;
use crate::error::{CoreError, CoreResult};
use crate::manifest::Manifest;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const MANIFEST_FILE: &str = "MANIFEST";
const LOCK_FILE: &str = "LOCK";
const COMMIT_LOG_FILE: &str = "COMMITS";
const COLLECTIONS_DIR: &str = "collections";
const BLOBS_DIR: &str = "blobs";
const TEMP_SUFFIX: &str = "tmp";

/// Extension of collection snapshot files.
pub const SNAPSHOT_EXT: &str = "col";
/// Extension of collection journal files.
pub const JOURNAL_EXT: &str = "log";
/// Extension of blob metadata files.
pub const META_EXT: &str = "meta";
/// Extension of blob payload files.
pub const DATA_EXT: &str = "data";

/// Encodes bytes as lowercase hex.
pub fn encode_hex(bytes: &[u8]) -> String {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(DIGITS[(b >> 4) as usize] as char);
        out.push(DIGITS[(b & 0x0f) as usize] as char);
    }
    out
}

/// Decodes lowercase or uppercase hex.
pub fn decode_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    text.as_bytes()
        .chunks(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16)?;
            let lo = (pair[1] as char).to_digit(16)?;
            Some((hi * 16 + lo) as u8)
        })
        .collect()
}

/// Decodes a hex-encoded file stem back into a name.
pub fn decode_name(stem: &str) -> Option<String> {
    decode_hex(stem).and_then(|bytes| String::from_utf8(bytes).ok())
}

/// Owns the database directory, its lock and the sealing key.
///
/// Only one `DatabaseDir` can exist per directory at a time.
#[derive(Debug)]
pub struct DatabaseDir {
    path: PathBuf,
    _lock_file: File,
    crypto: Option<CryptoManager>,
    sync: bool,
}

impl DatabaseDir {
    /// Opens or creates a database directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `DatabaseLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool, sync: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::not_found(
                    "database directory",
                    path.display().to_string(),
                ));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        fs::create_dir_all(path.join(COLLECTIONS_DIR))?;
        fs::create_dir_all(path.join(BLOBS_DIR))?;

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
            crypto: None,
            sync,
        })
    }

    /// Installs the key used to seal and open data files.
    pub fn set_crypto(&mut self, crypto: Option<CryptoManager>) {
        self.crypto = crypto;
    }

    /// Returns the installed crypto manager.
    pub fn crypto(&self) -> Option<&CryptoManager> {
        self.crypto.as_ref()
    }

    /// Returns the path to the database directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the manifest. `None` for a new store.
    pub fn load_manifest(&self) -> CoreResult<Option<Manifest>> {
        let path = self.path.join(MANIFEST_FILE);
        match fs::read(&path) {
            Ok(data) if data.is_empty() => Ok(None),
            Ok(data) => Manifest::decode(&data).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Saves the manifest atomically.
    pub fn save_manifest(&self, manifest: &Manifest) -> CoreResult<()> {
        self.write_atomic(&self.path.join(MANIFEST_FILE), &manifest.encode()?)
    }

    /// Returns the path of the commit log.
    pub fn commit_log_path(&self) -> PathBuf {
        self.path.join(COMMIT_LOG_FILE)
    }

    /// Returns the collections directory.
    pub fn collections_dir(&self) -> PathBuf {
        self.path.join(COLLECTIONS_DIR)
    }

    /// Returns the path of a collection file with the given extension.
    pub fn collection_path(&self, name: &str, ext: &str) -> PathBuf {
        self.collections_dir()
            .join(format!("{}.{ext}", encode_hex(name.as_bytes())))
    }

    /// Returns the blobs directory.
    pub fn blobs_dir(&self) -> PathBuf {
        self.path.join(BLOBS_DIR)
    }

    /// Returns the directory of a bucket.
    pub fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.blobs_dir().join(encode_hex(bucket.as_bytes()))
    }

    /// Returns the path of an object file with the given extension.
    pub fn object_path(&self, bucket: &str, key: &str, ext: &str) -> PathBuf {
        self.bucket_dir(bucket)
            .join(format!("{}.{ext}", encode_hex(key.as_bytes())))
    }

    /// Lists the names of collections with files on disk.
    pub fn collection_names(&self) -> CoreResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.collections_dir())? {
            let path = entry?.path();
            let ext = path.extension().and_then(|e| e.to_str());
            if ext != Some(SNAPSHOT_EXT) && ext != Some(JOURNAL_EXT) {
                continue;
            }
            if let Some(name) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(decode_name)
            {
                names.push(name);
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Lists bucket names on disk.
    pub fn bucket_names(&self) -> CoreResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.blobs_dir())? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str().and_then(decode_name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Lists the object keys stored in a bucket directory.
    pub fn object_keys(&self, bucket: &str) -> CoreResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(self.bucket_dir(bucket))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(META_EXT) {
                continue;
            }
            if let Some(key) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(decode_name)
            {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Seals plaintext for the file playing `role`. Identity without a key.
    pub fn seal(&self, role: &str, plain: &[u8]) -> CoreResult<Vec<u8>> {
        match &self.crypto {
            Some(crypto) => crypto.seal(plain, role.as_bytes()),
            None => Ok(plain.to_vec()),
        }
    }

    /// Opens data sealed for `role`.
    pub fn unseal(&self, role: &str, data: &[u8]) -> CoreResult<Vec<u8>> {
        match &self.crypto {
            Some(crypto) => crypto.open(data, role.as_bytes()),
            None => Ok(data.to_vec()),
        }
    }

    /// Seals and atomically writes a whole file.
    pub fn write_sealed(&self, path: &Path, role: &str, plain: &[u8]) -> CoreResult<u64> {
        let sealed = self.seal(role, plain)?;
        self.write_atomic(path, &sealed)?;
        Ok(sealed.len() as u64)
    }

    /// Reads and opens a whole file. `None` if it does not exist.
    pub fn read_sealed(&self, path: &Path, role: &str) -> CoreResult<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(data) => self.unseal(role, &data).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Appends raw bytes to a file, creating it if needed.
    pub fn append(&self, path: &Path, bytes: &[u8]) -> CoreResult<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(bytes)?;
        if self.sync {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Writes a file using write-then-rename.
    ///
    /// 1. Write to a temporary sibling
    /// 2. Sync it (when durable writes are on)
    /// 3. Rename over the target
    /// 4. Fsync the parent directory
    pub fn write_atomic(&self, path: &Path, bytes: &[u8]) -> CoreResult<()> {
        let temp_path = path.with_extension(TEMP_SUFFIX);
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        if self.sync {
            file.sync_all()?;
        }
        drop(file);

        fs::rename(&temp_path, path)?;
        if self.sync {
            if let Some(parent) = path.parent() {
                sync_directory(parent)?;
            }
        }
        Ok(())
    }

    /// Removes a file if present. Returns whether it existed.
    pub fn remove_file(&self, path: &Path) -> CoreResult<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes a directory tree if present. Returns whether it existed.
    pub fn remove_dir(&self, path: &Path) -> CoreResult<bool> {
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns a file's size, 0 if absent.
    pub fn file_size(&self, path: &Path) -> u64 {
        fs::metadata(path).map(|m| m.len()).unwrap_or(0)
    }
}

/// Syncs a directory so created, renamed or deleted entries are durable.
///
/// NTFS journals metadata itself, so this is a no-op off Unix.
#[cfg(unix)]
fn sync_directory(path: &Path) -> CoreResult<()> {
    File::open(path)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_path: &Path) -> CoreResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EncryptionKey;
    use tempfile::tempdir;

    #[test]
    fn open_creates_layout() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("new_db");

        let _dir = DatabaseDir::open(&db_path, true, true).unwrap();
        assert!(db_path.join("LOCK").exists());
        assert!(db_path.join("collections").is_dir());
        assert!(db_path.join("blobs").is_dir());
    }

    #[test]
    fn open_fails_if_not_exists_and_no_create() {
        let temp = tempdir().unwrap();
        let result = DatabaseDir::open(&temp.path().join("nonexistent"), false, true);
        assert!(matches!(result, Err(CoreError::NotFound { .. })));
    }

    #[test]
    fn lock_prevents_second_open() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("locked_db");

        let _dir1 = DatabaseDir::open(&db_path, true, true).unwrap();
        let result = DatabaseDir::open(&db_path, true, true);
        assert!(matches!(result, Err(CoreError::DatabaseLocked)));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("reopen_db");
        {
            let _dir = DatabaseDir::open(&db_path, true, true).unwrap();
        }
        let _dir2 = DatabaseDir::open(&db_path, true, true).unwrap();
    }

    #[test]
    fn manifest_round_trip() {
        let temp = tempdir().unwrap();
        let dir = DatabaseDir::open(temp.path(), true, true).unwrap();
        assert!(dir.load_manifest().unwrap().is_none());

        let manifest = Manifest::create(None).unwrap();
        dir.save_manifest(&manifest).unwrap();
        assert_eq!(dir.load_manifest().unwrap(), Some(manifest));
    }

    #[test]
    fn hex_names() {
        assert_eq!(encode_hex("users".as_bytes()), "7573657273");
        assert_eq!(decode_name("7573657273").as_deref(), Some("users"));
        assert_eq!(decode_hex("ABff"), Some(vec![0xab, 0xff]));
        assert_eq!(decode_hex("abc"), None);
        assert_eq!(decode_hex("zz"), None);
    }

    #[test]
    fn collection_names_are_listed() {
        let temp = tempdir().unwrap();
        let dir = DatabaseDir::open(temp.path(), true, false).unwrap();
        dir.write_atomic(&dir.collection_path("b/c", SNAPSHOT_EXT), b"{}")
            .unwrap();
        dir.append(&dir.collection_path("b/c", JOURNAL_EXT), b"x")
            .unwrap();
        dir.append(&dir.collection_path("a", JOURNAL_EXT), b"x")
            .unwrap();
        assert_eq!(dir.collection_names().unwrap(), vec!["a", "b/c"]);
    }

    #[test]
    fn sealed_files_need_the_key() {
        let temp = tempdir().unwrap();
        let mut dir = DatabaseDir::open(temp.path(), true, false).unwrap();
        dir.set_crypto(Some(CryptoManager::new(&EncryptionKey::generate())));

        let path = dir.collection_path("users", SNAPSHOT_EXT);
        dir.write_sealed(&path, "collection:users", b"secret docs")
            .unwrap();
        assert_ne!(fs::read(&path).unwrap(), b"secret docs");
        assert_eq!(
            dir.read_sealed(&path, "collection:users").unwrap().unwrap(),
            b"secret docs"
        );
        assert!(dir.read_sealed(&path, "collection:other").is_err());
        assert!(dir
            .read_sealed(&dir.collection_path("none", SNAPSHOT_EXT), "x")
            .unwrap()
            .is_none());
    }

    #[test]
    fn remove_reports_existence() {
        let temp = tempdir().unwrap();
        let dir = DatabaseDir::open(temp.path(), true, false).unwrap();
        let path = temp.path().join("f");
        dir.write_atomic(&path, b"1").unwrap();
        assert!(dir.remove_file(&path).unwrap());
        assert!(!dir.remove_file(&path).unwrap());
    }
}
