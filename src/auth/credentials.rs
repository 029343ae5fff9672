//! Credential Gate (C1, §4.1).
//!
//! Verifies `(user, pass)`, confirms user existence, and handles
//! registration/authentication by email. Grounded in the teacher's
//! `StaticCredentials` (`credentials.rs`): an `RwLock`-guarded map, with the
//! static, config-supplied entries from `[auth]` checked first exactly as
//! the teacher's `Observer::get_password` tries static auth before falling
//! back to an external store — here the "external store" is the in-memory
//! registered-account table, since the spec treats the account store itself
//! as external (§3) but the verification contract as something this crate
//! owns.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use parking_lot::RwLock;
use serde::Serialize;
use subtle::ConstantTimeEq;

use crate::error::NexusError;

#[derive(Clone, Serialize, Debug)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub email: String,
    pub created_at: u64,
}

struct StoredUser {
    user: User,
    password_hash: String,
}

pub struct CredentialGate {
    by_username: RwLock<HashMap<String, StoredUser>>,
    email_index: RwLock<HashMap<String, String>>,
    static_users: HashMap<String, String>,
    next_id: AtomicU64,
}

impl CredentialGate {
    pub fn new(static_users: HashMap<String, String>) -> Self {
        Self {
            by_username: RwLock::new(HashMap::new()),
            email_index: RwLock::new(HashMap::new()),
            static_users,
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a new account. Enforces email/username uniqueness and the
    /// length bounds from §6 (name 3-40, password >= 6).
    pub fn register(&self, email: &str, name: &str, password: &str) -> Result<User, NexusError> {
        if !(3..=40).contains(&name.len()) {
            return Err(NexusError::Protocol("name must be 3-40 characters".into()));
        }
        if password.len() < 6 {
            return Err(NexusError::Protocol("password must be at least 6 characters".into()));
        }
        if name.contains(':') {
            return Err(NexusError::Protocol("username cannot contain ':'".into()));
        }

        let mut by_username = self.by_username.write();
        let mut email_index = self.email_index.write();

        if by_username.contains_key(name) {
            return Err(NexusError::State("username already registered".into()));
        }
        if email_index.contains_key(email) {
            return Err(NexusError::State("email already registered".into()));
        }

        let password_hash = hash_password(password)?;
        let user = User {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            username: name.to_string(),
            email: email.to_string(),
            created_at: now_secs(),
        };

        email_index.insert(email.to_string(), name.to_string());
        by_username.insert(
            name.to_string(),
            StoredUser {
                user: user.clone(),
                password_hash,
            },
        );

        Ok(user)
    }

    /// Looks a user up by email and verifies the password.
    pub fn authenticate(&self, email: &str, password: &str) -> Result<User, NexusError> {
        let username = self
            .email_index
            .read()
            .get(email)
            .cloned()
            .ok_or_else(|| NexusError::Authentication("invalid credentials".into()))?;

        if self.verify(&username, password) {
            self.by_username
                .read()
                .get(&username)
                .map(|s| s.user.clone())
                .ok_or_else(|| NexusError::Authentication("invalid credentials".into()))
        } else {
            Err(NexusError::Authentication("invalid credentials".into()))
        }
    }

    /// Constant-time-verified `(user, pass)` check used directly by the TCP
    /// `LOGIN` frame (§4.4). Static users configured via `[auth]` win first.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        if let Some(expected) = self.static_users.get(username) {
            return constant_time_eq(expected.as_bytes(), password.as_bytes());
        }

        let by_username = self.by_username.read();
        match by_username.get(username) {
            Some(stored) => verify_password(password, &stored.password_hash),
            None => false,
        }
    }

    pub fn exists(&self, username: &str) -> bool {
        self.static_users.contains_key(username) || self.by_username.read().contains_key(username)
    }

    pub fn get_by_username(&self, username: &str) -> Option<User> {
        self.by_username.read().get(username).map(|s| s.user.clone())
    }
}

fn hash_password(password: &str) -> Result<String, NexusError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| NexusError::State(format!("failed to hash password: {e}")))
}

/// Constant-time comparison for the static-credential path (§4.1: "comparisons
/// are constant-time"). The length check is a necessary, accepted leak —
/// `subtle::ConstantTimeEq` requires equal-length slices.
fn constant_time_eq(expected: &[u8], actual: &[u8]) -> bool {
    expected.len() == actual.len() && bool::from(expected.ct_eq(actual))
}

fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_authenticate() {
        let gate = CredentialGate::new(HashMap::new());
        let user = gate.register("alice@example.com", "alice", "hunter22").unwrap();
        assert_eq!(user.username, "alice");

        let authed = gate.authenticate("alice@example.com", "hunter22").unwrap();
        assert_eq!(authed.id, user.id);

        assert!(gate.authenticate("alice@example.com", "wrong").is_err());
    }

    #[test]
    fn rejects_duplicate_username_and_email() {
        let gate = CredentialGate::new(HashMap::new());
        gate.register("alice@example.com", "alice", "hunter22").unwrap();
        assert!(gate.register("other@example.com", "alice", "hunter22").is_err());
        assert!(gate.register("alice@example.com", "alice2", "hunter22").is_err());
    }

    #[test]
    fn static_users_win_over_registered() {
        let mut statics = HashMap::new();
        statics.insert("alice".to_string(), "static-pw".to_string());
        let gate = CredentialGate::new(statics);
        assert!(gate.verify("alice", "static-pw"));
        assert!(!gate.verify("alice", "anything-else"));
        assert!(gate.exists("alice"));
    }

    #[test]
    fn usernames_with_colons_are_rejected() {
        let gate = CredentialGate::new(HashMap::new());
        assert!(gate.register("x@example.com", "bad:name", "hunter22").is_err());
    }
}
