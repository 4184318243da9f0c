//! Password logins for sessions.
//!
//! Passwords are never kept. Each user holds a random salt and
//! `SHA-256(salt || password)`; a login recomputes the digest and compares
//! it in constant time.
//!
//! A users file has one `name:password` entry per line. Blank lines and
//! lines starting with `#` are skipped. The password is everything after the
//! first colon.

use crate::error::{CoreError, CoreResult};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use zeroize::Zeroizing;

const SALT_SIZE: usize = 16;

struct Secret {
    salt: [u8; SALT_SIZE],
    digest: [u8; 32],
}

impl Secret {
    fn new(password: &str) -> Self {
        let mut salt = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);
        let digest = digest(&salt, password);
        Self { salt, digest }
    }

    fn matches(&self, password: &str) -> bool {
        let candidate = digest(&self.salt, password);
        candidate
            .iter()
            .zip(self.digest.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

fn digest(salt: &[u8], password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}

/// The users allowed to log in to a session.
#[derive(Default)]
pub struct Credentials {
    users: BTreeMap<String, Secret>,
}

impl Credentials {
    /// Creates an empty user table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a user, replacing any previous password.
    pub fn add_user(&mut self, user: impl Into<String>, password: &str) -> CoreResult<()> {
        let user = user.into();
        if user.is_empty() || user.contains(':') {
            return Err(CoreError::validation(format!("invalid user name: {user:?}")));
        }
        if password.is_empty() {
            return Err(CoreError::validation(format!("empty password for user {user}")));
        }
        self.users.insert(user, Secret::new(password));
        Ok(())
    }

    /// Reads a users file.
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let text = Zeroizing::new(fs::read_to_string(path).map_err(|e| {
            CoreError::auth(format!("cannot read users file {}: {e}", path.display()))
        })?);
        let mut credentials = Self::new();
        for (number, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let (user, password) = line.split_once(':').ok_or_else(|| {
                CoreError::validation(format!(
                    "{}:{}: expected name:password",
                    path.display(),
                    number + 1
                ))
            })?;
            credentials.add_user(user.trim(), password)?;
        }
        if credentials.is_empty() {
            return Err(CoreError::validation(format!(
                "users file {} lists no users",
                path.display()
            )));
        }
        Ok(credentials)
    }

    /// Checks a login.
    pub fn verify(&self, user: &str, password: &str) -> bool {
        match self.users.get(user) {
            Some(secret) => secret.matches(password),
            None => {
                // Same work as a wrong password.
                std::hint::black_box(digest(&[0u8; SALT_SIZE], password));
                false
            }
        }
    }

    /// Number of users.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Returns true if no user can log in.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("users", &self.users.keys().collect::<Vec<_>>())
            .finish()
    }
}
