use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use ulid::Ulid;

use crate::model::{Ms, Role};

/// bcrypt work factor for new hashes.
pub const BCRYPT_COST: u32 = 8;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug)]
pub enum AuthError {
    Malformed,
    BadSignature,
    Expired,
    Hash(String),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::Malformed => write!(f, "malformed session token"),
            AuthError::BadSignature => write!(f, "invalid session signature"),
            AuthError::Expired => write!(f, "session expired"),
            AuthError::Hash(e) => write!(f, "password hashing failed: {e}"),
        }
    }
}

impl std::error::Error for AuthError {}

impl AuthError {
    /// Short metric label.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::Malformed => "malformed",
            AuthError::BadSignature => "bad signature",
            AuthError::Expired => "expired",
            AuthError::Hash(_) => "hash",
        }
    }
}

// ── Passwords ────────────────────────────────────────────

/// bcrypt on the blocking pool.
pub async fn hash_password(password: String) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, BCRYPT_COST))
        .await
        .map_err(|e| AuthError::Hash(e.to_string()))?
        .map_err(|e| AuthError::Hash(e.to_string()))
}

/// A malformed stored hash counts as a mismatch.
pub async fn verify_password(password: String, hash: String) -> bool {
    match tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await {
        Ok(Ok(matches)) => matches,
        Ok(Err(e)) => {
            tracing::warn!("stored password hash unreadable: {e}");
            false
        }
        Err(e) => {
            tracing::error!("password check task failed: {e}");
            false
        }
    }
}

// ── Sessions ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub user_id: Ulid,
    pub role: Role,
    pub expires_ms: Ms,
}

/// Issues and checks `"{user_id}.{role}.{expires_ms}.{hex hmac-sha256}"` tokens.
pub struct SessionKeys {
    secret: Vec<u8>,
    ttl_ms: Ms,
}

impl SessionKeys {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            secret: secret.to_vec(),
            ttl_ms: Ms::try_from(ttl.as_millis()).unwrap_or(Ms::MAX),
        }
    }

    /// Per-process secret: sessions do not survive a restart.
    pub fn random(ttl: Duration) -> Self {
        let mut secret = Vec::with_capacity(32);
        for _ in 0..2 {
            secret.extend_from_slice(&Ulid::new().to_bytes());
        }
        Self::new(&secret, ttl)
    }

    fn mac(&self, payload: &str) -> HmacSha256 {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret)
            .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
        mac.update(payload.as_bytes());
        mac
    }

    pub fn issue(&self, user_id: Ulid, role: Role, now: Ms) -> String {
        let payload = format!("{user_id}.{}.{}", role.as_str(), now.saturating_add(self.ttl_ms));
        let sig = hex::encode(self.mac(&payload).finalize().into_bytes());
        format!("{payload}.{sig}")
    }

    pub fn verify(&self, token: &str, now: Ms) -> Result<Session, AuthError> {
        let (payload, sig) = token.rsplit_once('.').ok_or(AuthError::Malformed)?;
        let sig = hex::decode(sig).map_err(|_| AuthError::Malformed)?;
        self.mac(payload)
            .verify_slice(&sig)
            .map_err(|_| AuthError::BadSignature)?;

        let mut parts = payload.splitn(3, '.');
        let (Some(user_id), Some(role), Some(expires)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::Malformed);
        };
        let user_id = Ulid::from_string(user_id).map_err(|_| AuthError::Malformed)?;
        let role = Role::parse(role).ok_or(AuthError::Malformed)?;
        let expires_ms: Ms = expires.parse().map_err(|_| AuthError::Malformed)?;
        if expires_ms <= now {
            return Err(AuthError::Expired);
        }
        Ok(Session {
            user_id,
            role,
            expires_ms,
        })
    }
}

/// Token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
