//! Session tokens.
//!
//! [`verify`](TokenBroker::verify) turns an identity assertion into a
//! session token; every later call presents the token and the engine asks
//! its broker to [`authorize`](TokenBroker::authorize) it.
//!
//! ## Token Format
//!
//! `<session_id>.<mac>` where:
//! - `session_id` is 16 random bytes, base64url without padding
//! - `mac` is hex HMAC-SHA256 over `session_id 0x00 email 0x00 audience`
//!
//! The session itself (email, audience, expiry) lives server-side in a
//! [`CacheClient`] under `<prefix>:session:<session_id>`, so a token stops
//! working as soon as its session entry expires or is revoked.

use crate::cache::{CacheClient, CacheError};
use crate::config::SessionConfig;
use crate::error::{StorageError, StorageResult};
use crate::timestamp::Timestamp;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Verifies identity assertions on behalf of the engine.
///
/// Production deployments delegate to a remote verifier; tests use
/// [`DummyVerifier`].
pub trait AssertionVerifier: Send + Sync {
    /// Returns the email the assertion vouches for.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Auth`] if the assertion is invalid or was
    /// issued for another audience.
    fn verify(&self, assertion: &str, audience: &str) -> StorageResult<String>;
}

/// Issues and checks session tokens.
pub trait TokenBroker: Send + Sync {
    /// Verifies an assertion and opens a session. Returns `(email, token)`.
    fn verify(&self, assertion: &str, audience: &str) -> StorageResult<(String, String)>;

    /// Checks that `token` belongs to an active session of `user`.
    fn authorize(&self, user: &str, token: &str) -> StorageResult<()>;

    /// Ends the session behind `token`.
    fn revoke(&self, token: &str) -> StorageResult<()>;
}

/// Server-side state of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Session {
    email: String,
    audience: String,
    expires_at: Timestamp,
}

/// A [`TokenBroker`] backed by a cache-resident session store.
pub struct SessionTokenBroker {
    verifier: Arc<dyn AssertionVerifier>,
    sessions: Arc<dyn CacheClient>,
    config: SessionConfig,
}

impl SessionTokenBroker {
    /// Creates a broker.
    pub fn new(
        verifier: Arc<dyn AssertionVerifier>,
        sessions: Arc<dyn CacheClient>,
        config: SessionConfig,
    ) -> Self {
        Self {
            verifier,
            sessions,
            config,
        }
    }

    fn session_key(&self, session_id: &str) -> String {
        format!("{}:session:{}", self.config.prefix, session_id)
    }

    fn mac(&self, session_id: &str, email: &str, audience: &str) -> StorageResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| StorageError::Server(format!("invalid session secret: {e}")))?;
        mac.update(session_id.as_bytes());
        mac.update(&[0]);
        mac.update(email.as_bytes());
        mac.update(&[0]);
        mac.update(audience.as_bytes());
        Ok(mac)
    }

    fn load_session(&self, session_id: &str) -> StorageResult<Option<Session>> {
        let bytes = self
            .sessions
            .get(&self.session_key(session_id))
            .map_err(session_store_error)?;
        match bytes {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

fn session_store_error(err: CacheError) -> StorageError {
    StorageError::Connection(format!("session store: {err}"))
}

fn split_token(token: &str) -> StorageResult<(&str, &str)> {
    token
        .split_once('.')
        .filter(|(id, mac)| !id.is_empty() && !mac.is_empty())
        .ok_or_else(|| StorageError::Auth("malformed token".into()))
}

impl TokenBroker for SessionTokenBroker {
    fn verify(&self, assertion: &str, audience: &str) -> StorageResult<(String, String)> {
        let email = self.verifier.verify(assertion, audience)?;

        let mut raw = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut raw);
        let session_id = URL_SAFE_NO_PAD.encode(raw);

        let session = Session {
            email: email.clone(),
            audience: audience.to_string(),
            expires_at: Timestamp::from_centis(
                Timestamp::now().as_centis() + self.config.ttl().as_millis() as i64 / 10,
            ),
        };
        self.sessions
            .set(
                &self.session_key(&session_id),
                &serde_json::to_vec(&session)?,
                self.config.ttl(),
            )
            .map_err(session_store_error)?;

        let signature = self.mac(&session_id, &email, audience)?.finalize().into_bytes();
        debug!(%email, %audience, "session started");
        Ok((email, format!("{session_id}.{}", hex::encode(signature))))
    }

    fn authorize(&self, user: &str, token: &str) -> StorageResult<()> {
        let (session_id, signature) = split_token(token)?;
        let signature =
            hex::decode(signature).map_err(|_| StorageError::Auth("malformed token".into()))?;

        let session = self
            .load_session(session_id)?
            .ok_or_else(|| StorageError::Auth("unknown or expired session".into()))?;
        if session.expires_at < Timestamp::now() {
            return Err(StorageError::Auth("session expired".into()));
        }

        self.mac(session_id, &session.email, &session.audience)?
            .verify_slice(&signature)
            .map_err(|_| StorageError::Auth("invalid token signature".into()))?;

        if session.email != user {
            return Err(StorageError::Auth(format!(
                "token does not belong to {user}"
            )));
        }
        Ok(())
    }

    fn revoke(&self, token: &str) -> StorageResult<()> {
        let (session_id, _) = split_token(token)?;
        self.sessions
            .delete(&self.session_key(session_id))
            .map_err(session_store_error)
    }
}

/// A [`TokenBroker`] for engines running without authentication.
///
/// Every token is accepted. Without a verifier, `verify` is unsupported;
/// this is the broker of the write-only side of a mirrored engine, which is
/// fed tokens issued by its primary.
#[derive(Clone, Default)]
pub struct PassThroughBroker {
    verifier: Option<Arc<dyn AssertionVerifier>>,
}

impl PassThroughBroker {
    /// Creates a broker that accepts any token and cannot verify.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a broker that verifies assertions but accepts any token.
    pub fn with_verifier(verifier: Arc<dyn AssertionVerifier>) -> Self {
        Self {
            verifier: Some(verifier),
        }
    }
}

impl TokenBroker for PassThroughBroker {
    fn verify(&self, assertion: &str, audience: &str) -> StorageResult<(String, String)> {
        let verifier = self.verifier.as_ref().ok_or_else(|| {
            StorageError::Auth("identity verification is not available on this engine".into())
        })?;
        let email = verifier.verify(assertion, audience)?;
        Ok((email, uuid::Uuid::new_v4().simple().to_string()))
    }

    fn authorize(&self, _user: &str, _token: &str) -> StorageResult<()> {
        Ok(())
    }

    fn revoke(&self, _token: &str) -> StorageResult<()> {
        Ok(())
    }
}

/// Claims carried by a [`DummyVerifier`] assertion.
#[derive(Serialize, Deserialize)]
struct DummyClaims {
    email: String,
    audience: String,
}

/// Accepts locally minted assertions. Useful for testing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyVerifier;

impl DummyVerifier {
    /// Mints an assertion for `email` valid for `audience`.
    pub fn make_assertion(email: &str, audience: &str) -> String {
        let claims = DummyClaims {
            email: email.to_string(),
            audience: audience.to_string(),
        };
        // Serializing two strings cannot fail.
        let json = serde_json::to_vec(&claims).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }
}

impl AssertionVerifier for DummyVerifier {
    fn verify(&self, assertion: &str, audience: &str) -> StorageResult<String> {
        let malformed = || StorageError::Auth("malformed assertion".into());
        let json = URL_SAFE_NO_PAD.decode(assertion).map_err(|_| malformed())?;
        let claims: DummyClaims = serde_json::from_slice(&json).map_err(|_| malformed())?;

        if claims.audience != audience {
            return Err(StorageError::Auth("audience does not match".into()));
        }
        if claims.email.is_empty() {
            return Err(malformed());
        }
        Ok(claims.email)
    }
}
