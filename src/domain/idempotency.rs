use crate::error::{PaymentError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The remembered outcome of a mutating call, keyed by idempotency key.
///
/// A record without a snapshot is a reservation held by a call that has not
/// finished yet.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct IdempotencyRecord {
    pub key: String,
    pub fingerprint: String,
    pub result_snapshot: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// What a caller holding a key should do next.
#[derive(Debug, PartialEq, Clone)]
pub enum Reservation {
    /// The key is now held by this call; execute and then complete or release.
    Acquired,
    /// The call already ran; hand back its stored result.
    Replay(serde_json::Value),
}

impl IdempotencyRecord {
    pub fn pending(key: &str, fingerprint: &str, now: DateTime<Utc>) -> Self {
        Self {
            key: key.to_string(),
            fingerprint: fingerprint.to_string(),
            result_snapshot: None,
            created_at: now,
        }
    }

    /// Decides a reservation attempt against the record currently stored
    /// under the key. Stores run this under their write guard so the
    /// check-then-insert is atomic; `Ok(Some(record))` must be written back.
    pub fn claim(
        existing: Option<&IdempotencyRecord>,
        key: &str,
        fingerprint: &str,
        now: DateTime<Utc>,
        pending_ttl: Duration,
    ) -> Result<(Reservation, Option<IdempotencyRecord>)> {
        let Some(record) = existing else {
            return Ok((
                Reservation::Acquired,
                Some(Self::pending(key, fingerprint, now)),
            ));
        };

        if record.fingerprint != fingerprint {
            return Err(PaymentError::IdempotencyConflict(key.to_string()));
        }
        match &record.result_snapshot {
            Some(snapshot) => Ok((Reservation::Replay(snapshot.clone()), None)),
            // Abandoned reservation, reclaim it.
            None if now - record.created_at >= pending_ttl => Ok((
                Reservation::Acquired,
                Some(Self::pending(key, fingerprint, now)),
            )),
            None => Err(PaymentError::RequestInProgress(key.to_string())),
        }
    }
}

/// SHA-256 over the call name and the canonical JSON of the request body.
///
/// `serde_json` maps keep their keys sorted, so equal bodies always encode
/// to the same bytes.
pub fn fingerprint(call: &str, body: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(call.as_bytes());
    hasher.update(b"\n");
    hasher.update(body.to_string().as_bytes());
    hex::encode(hasher.finalize())
}
