//! Access tokens for uploaded tables.
//!
//! Tokens are HS256-signed JSON Web Tokens. The signed claims only say who the
//! token belongs to and when it expires; the uploaded data itself stays in a
//! [`TokenStore`] on the server.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{error::Error, settings::TokenSettings};

type HmacSha256 = Hmac<Sha256>;

/// JOSE header shared by every token
const HEADER_JSON: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Claims {
    pub sub: String,
    /// Expiry as seconds since the Unix epoch
    pub exp: i64,
}

#[derive(Deserialize)]
struct Header {
    alg: String,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
}

/// Creates and checks tokens with a shared secret.
#[derive(Clone)]
pub struct TokenIssuer {
    secret: Vec<u8>,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(settings: &TokenSettings) -> Self {
        TokenIssuer {
            secret: settings.secret_key.as_bytes().to_vec(),
            ttl: Duration::minutes(settings.expire_minutes as i64),
        }
    }

    fn mac(&self) -> Result<HmacSha256, Error> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| Error::from(format!("Could not create HMAC: {e:?}")))
    }

    /// Issues a token for a fresh random subject, expiring one TTL from now.
    pub fn issue(&self) -> Result<IssuedToken, Error> {
        self.issue_at(Utc::now())
    }

    pub fn issue_at(&self, now: DateTime<Utc>) -> Result<IssuedToken, Error> {
        let subject: [u8; 16] = rand::random();
        let claims = Claims {
            sub: URL_SAFE_NO_PAD.encode(subject),
            exp: (now + self.ttl).timestamp(),
        };

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(HEADER_JSON),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?)
        );
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(IssuedToken {
            token: format!("{signing_input}.{signature}"),
            claims,
        })
    }

    /// Checks the structure, algorithm, signature and expiry of `token`.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, Error> {
        let mut parts = token.split('.');
        let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::InvalidToken("malformed token"));
        };

        let header: Header = URL_SAFE_NO_PAD
            .decode(header_b64)
            .ok()
            .and_then(|h| serde_json::from_slice(&h).ok())
            .ok_or(Error::InvalidToken("malformed header"))?;
        if header.alg != "HS256" {
            return Err(Error::InvalidToken("unsupported algorithm"));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| Error::InvalidToken("malformed signature"))?;
        let mut mac = self.mac()?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| Error::InvalidToken("invalid signature"))?;

        let claims: Claims = URL_SAFE_NO_PAD
            .decode(claims_b64)
            .ok()
            .and_then(|c| serde_json::from_slice(&c).ok())
            .ok_or(Error::InvalidToken("malformed claims"))?;
        if claims.exp <= now.timestamp() {
            return Err(Error::InvalidToken("token expired"));
        }
        Ok(claims)
    }
}

struct Entry<T> {
    expires: i64,
    value: Arc<T>,
}

/// In-memory map from token to the data uploaded with it. Entries disappear
/// once their token has expired.
pub struct TokenStore<T> {
    entries: Mutex<HashMap<String, Entry<T>>>,
}

impl<T> Default for TokenStore<T> {
    fn default() -> Self {
        TokenStore {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> TokenStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry<T>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stores `value` under `token` until `expires` (Unix seconds). Expired
    /// entries are dropped on the way.
    pub fn insert(&self, token: String, expires: i64, value: T, now: DateTime<Utc>) {
        let mut entries = self.lock();
        let now = now.timestamp();
        let before = entries.len();
        entries.retain(|_, e| e.expires > now);
        if entries.len() < before {
            log::debug!("Dropped {} expired tokens", before - entries.len());
        }
        entries.insert(
            token,
            Entry {
                expires,
                value: Arc::new(value),
            },
        );
    }

    pub fn get(&self, token: &str, now: DateTime<Utc>) -> Option<Arc<T>> {
        let mut entries = self.lock();
        match entries.get(token) {
            Some(e) if e.expires > now.timestamp() => Some(Arc::clone(&e.value)),
            Some(_) => {
                entries.remove(token);
                None
            }
            None => None,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
