//! UsernameToken key derivation.
//!
//! Two schemes are supported:
//!
//! - the WSS UsernameToken Profile 1.1 password key: SHA-1 over
//!   `password ∥ salt`, re-hashed `iterations - 1` times, yielding 20 bytes;
//! - the P_SHA1 pseudo-random function (RFC 2246 P_hash with HMAC-SHA1) over
//!   `label ∥ nonce ∥ created`, yielding any requested length.
//!
//! Everything here is a pure function of its inputs.

use crate::bsp::{BspRule, BspRuleHandler};
use crate::error::WssError;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha1::{Digest, Sha1};
use std::fmt;

type HmacSha1 = Hmac<Sha1>;

/// Iteration count used when a token does not specify one.
pub const DEFAULT_ITERATIONS: u32 = 1000;

/// Length of the password-derived key.
pub const DERIVED_KEY_LEN: usize = 20;

/// Default label for the P_SHA1 secret key.
pub const DEFAULT_LABEL: &str = "WS-SecureConversation";

/// A parsed `wsse:UsernameToken`. Immutable once built.
#[derive(Clone, PartialEq, Eq)]
pub struct UsernameToken {
    id: Option<String>,
    username: String,
    password: String,
    created: Option<String>,
    nonce: Option<Vec<u8>>,
    salt: Option<Vec<u8>>,
    iteration: Option<u32>,
}

impl UsernameToken {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            id: None,
            username: username.into(),
            password: password.into(),
            created: None,
            nonce: None,
            salt: None,
            iteration: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_created(mut self, created: impl Into<String>) -> Self {
        self.created = Some(created.into());
        self
    }

    pub fn with_nonce(mut self, nonce: impl Into<Vec<u8>>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    pub fn with_salt(mut self, salt: impl Into<Vec<u8>>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    pub fn with_iteration(mut self, iteration: u32) -> Self {
        self.iteration = Some(iteration);
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn created(&self) -> Option<&str> {
        self.created.as_deref()
    }

    /// `wsu:Created` as a timestamp, if present and well-formed.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created
            .as_deref()
            .and_then(|c| DateTime::parse_from_rfc3339(c).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn nonce(&self) -> Option<&[u8]> {
        self.nonce.as_deref()
    }

    pub fn salt(&self) -> Option<&[u8]> {
        self.salt.as_deref()
    }

    pub fn iteration(&self) -> Option<u32> {
        self.iteration
    }

    /// Derive the 20-byte password key.
    ///
    /// With a BSP handler, a missing salt reports R4217 and a missing or weak
    /// iteration count reports R4218; the handler decides whether to fail.
    pub fn derive_key(
        &self,
        bsp: Option<&dyn BspRuleHandler>,
    ) -> Result<[u8; DERIVED_KEY_LEN], WssError> {
        if let Some(handler) = bsp {
            if self.salt.as_deref().map_or(true, <[u8]>::is_empty) {
                handler.handle_bsp_rule(BspRule::R4217)?;
            }
            if self.iteration.map_or(true, |i| i < DEFAULT_ITERATIONS) {
                handler.handle_bsp_rule(BspRule::R4218)?;
            }
        }

        Ok(derive_key_from_password(
            &self.password,
            self.salt.as_deref().unwrap_or_default(),
            self.iteration.unwrap_or(DEFAULT_ITERATIONS),
        ))
    }

    /// Derive a P_SHA1 key of `keylen` bytes from the password, nonce and created.
    pub fn secret_key(&self, keylen: usize, label: &str) -> Result<Vec<u8>, WssError> {
        derive_secret_key(
            self.password.as_bytes(),
            label,
            self.nonce.as_deref().unwrap_or_default(),
            self.created.as_deref().unwrap_or_default(),
            keylen,
        )
    }
}

impl fmt::Debug for UsernameToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsernameToken")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("created", &self.created)
            .field("nonce", &self.nonce.as_ref().map(hex::encode))
            .field("salt", &self.salt.as_ref().map(hex::encode))
            .field("iteration", &self.iteration)
            .finish()
    }
}

/// SHA-1 of `password ∥ salt`, re-hashed until `iterations` digests were
/// computed. An iteration count of 0 means [`DEFAULT_ITERATIONS`].
pub fn derive_key_from_password(
    password: &str,
    salt: &[u8],
    iterations: u32,
) -> [u8; DERIVED_KEY_LEN] {
    let iterations = if iterations == 0 {
        DEFAULT_ITERATIONS
    } else {
        iterations
    };

    let mut hasher = Sha1::new();
    hasher.update(password.as_bytes());
    hasher.update(salt);

    let mut key = [0u8; DERIVED_KEY_LEN];
    key.copy_from_slice(&hasher.finalize());
    for _ in 1..iterations {
        let digest = Sha1::digest(key);
        key.copy_from_slice(&digest);
    }
    key
}

/// RFC 2246 P_hash with HMAC-SHA1.
///
/// `A(0) = seed`, `A(i) = HMAC(secret, A(i-1))`, output is
/// `HMAC(secret, A(1) ∥ seed) ∥ HMAC(secret, A(2) ∥ seed) ∥ ...` truncated to
/// `keylen` bytes. Shorter outputs are prefixes of longer ones.
pub fn p_sha1(secret: &[u8], seed: &[u8], keylen: usize) -> Result<Vec<u8>, WssError> {
    let mac = HmacSha1::new_from_slice(secret)
        .map_err(|e| WssError::Crypto(format!("HMAC-SHA1 rejected key: {}", e)))?;

    let mut output = Vec::with_capacity(keylen);
    let mut a = seed.to_vec();
    while output.len() < keylen {
        a = hmac_sha1(&mac, &[&a]);
        let chunk = hmac_sha1(&mac, &[&a, seed]);
        let take = (keylen - output.len()).min(chunk.len());
        output.extend_from_slice(&chunk[..take]);
    }
    Ok(output)
}

/// P_SHA1 over `label ∥ nonce ∥ created`.
pub fn derive_secret_key(
    secret: &[u8],
    label: &str,
    nonce: &[u8],
    created: &str,
    keylen: usize,
) -> Result<Vec<u8>, WssError> {
    let mut seed = Vec::with_capacity(label.len() + nonce.len() + created.len());
    seed.extend_from_slice(label.as_bytes());
    seed.extend_from_slice(nonce);
    seed.extend_from_slice(created.as_bytes());
    p_sha1(secret, &seed, keylen)
}

fn hmac_sha1(keyed: &HmacSha1, parts: &[&[u8]]) -> Vec<u8> {
    let mut mac = keyed.clone();
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().to_vec()
}
