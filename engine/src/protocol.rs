//! Relay wire protocol types.
//!
//! The relay sees only these shapes: timestamps for ordering and opaque
//! hex-encoded ciphertext. Entry plaintext (record, field, value) never
//! appears on the wire.

use crate::{crypto, error::Result, ChangeEntry, Error, Key, ReplicaId, Timestamp};
use serde::{Deserialize, Serialize};

/// One sealed change entry as it travels through the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedEntry {
    /// Authoring replica (redundant with the timestamp, kept for fan-out
    /// filtering without decryption)
    pub replica_id: ReplicaId,
    /// Entry identity and ordering key
    pub timestamp: Timestamp,
    #[serde(with = "hex")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "hex")]
    pub nonce: Vec<u8>,
}

/// Body of `POST /sync/{datasetId}/push`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    /// Sender's last-acknowledged position, for relay-side diagnostics
    pub cursor: Option<Timestamp>,
    pub entries: Vec<EncryptedEntry>,
}

/// Response of a push: the highest timestamp durably stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub ack: Option<Timestamp>,
}

/// Response of `GET /sync/{datasetId}/pull?since=...`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    pub entries: Vec<EncryptedEntry>,
    /// Cursor to resume from; equals `since` when nothing new arrived
    pub next_cursor: Option<Timestamp>,
    pub has_more: bool,
}

/// Seal a change entry for transit.
pub fn seal_entry(key: &Key, entry: &ChangeEntry) -> Result<EncryptedEntry> {
    let plaintext = serde_json::to_vec(entry)?;
    let sealed = crypto::encrypt(key, &plaintext)?;
    Ok(EncryptedEntry {
        replica_id: entry.replica_id(),
        timestamp: entry.timestamp,
        ciphertext: sealed.ciphertext,
        nonce: sealed.nonce.to_vec(),
    })
}

/// Open a sealed entry. Fails with [`Error::Decryption`] on key mismatch,
/// corruption, or an envelope whose cleartext timestamp disagrees with the
/// sealed payload (a tampering signal).
pub fn open_entry(key: &Key, sealed: &EncryptedEntry) -> Result<ChangeEntry> {
    let nonce: [u8; crypto::NONCE_LEN] = sealed
        .nonce
        .as_slice()
        .try_into()
        .map_err(|_| Error::Decryption)?;
    let plaintext = crypto::decrypt(
        key,
        &crypto::Sealed {
            ciphertext: sealed.ciphertext.clone(),
            nonce,
        },
    )?;
    let entry: ChangeEntry =
        serde_json::from_slice(&plaintext).map_err(|_| Error::Decryption)?;
    if entry.timestamp != sealed.timestamp {
        return Err(Error::Decryption);
    }
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DatasetId, Value};

    fn sample_entry() -> ChangeEntry {
        ChangeEntry::new(
            Timestamp::new(1706745600000, 3, ReplicaId::from_bytes([1; 16])),
            DatasetId::from_bytes([9; 16]),
            "txn-1",
            "amount",
            Value::Number(75.0),
        )
    }

    #[test]
    fn seal_and_open() {
        let key = Key::generate();
        let entry = sample_entry();
        let sealed = seal_entry(&key, &entry).unwrap();

        assert_eq!(sealed.timestamp, entry.timestamp);
        assert_eq!(sealed.replica_id, entry.replica_id());
        // Plaintext does not leak into the envelope
        let wire = serde_json::to_string(&sealed).unwrap();
        assert!(!wire.contains("amount"));
        assert!(!wire.contains("txn-1"));

        let opened = open_entry(&key, &sealed).unwrap();
        assert_eq!(opened, entry);
    }

    #[test]
    fn open_with_wrong_key_fails() {
        let sealed = seal_entry(&Key::generate(), &sample_entry()).unwrap();
        assert!(matches!(
            open_entry(&Key::generate(), &sealed),
            Err(Error::Decryption)
        ));
    }

    #[test]
    fn tampered_envelope_timestamp_fails() {
        let key = Key::generate();
        let mut sealed = seal_entry(&key, &sample_entry()).unwrap();
        sealed.timestamp.physical_millis += 1;
        assert!(matches!(open_entry(&key, &sealed), Err(Error::Decryption)));
    }

    #[test]
    fn wire_format_is_camel_case_hex() {
        let key = Key::generate();
        let sealed = seal_entry(&key, &sample_entry()).unwrap();
        let json = serde_json::to_value(&sealed).unwrap();
        assert!(json.get("replicaId").is_some());
        assert!(json.get("ciphertext").unwrap().is_string());
        assert!(json.get("nonce").unwrap().is_string());

        let parsed: EncryptedEntry = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, sealed);
    }

    #[test]
    fn push_request_shape() {
        let req = PushRequest {
            cursor: None,
            entries: vec![],
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"cursor\":null"));
        assert!(json.contains("\"entries\":[]"));
    }
}
