//! Key encoding utilities for `RocksDB`.
//!
//! Time-ordered keys start with an 8-byte big-endian timestamp whose sign bit
//! is flipped, so that byte order equals chronological order for any instant
//! `chrono` can represent.

use chrono::{DateTime, Utc};
use fleetwatch_core::{CommandId, InstanceUid};

use crate::error::{Result, StoreError};

const ID_LEN: usize = 16;
const TIME_LEN: usize = 8;
const SIGN_BIT: u64 = 1 << 63;

/// Encode a timestamp so that byte order matches time order.
#[must_use]
pub fn time_bytes(at: DateTime<Utc>) -> [u8; TIME_LEN] {
    let micros = u64::from_be_bytes(at.timestamp_micros().to_be_bytes());
    (micros ^ SIGN_BIT).to_be_bytes()
}

/// Encode a command key (just the command ID bytes).
#[must_use]
pub fn command_key(command_id: &CommandId) -> Vec<u8> {
    command_id.as_bytes().to_vec()
}

/// Encode a command time index key: `created_at || command_id`.
#[must_use]
pub fn command_time_key(created_at: DateTime<Utc>, command_id: &CommandId) -> Vec<u8> {
    let mut key = Vec::with_capacity(TIME_LEN + ID_LEN);
    key.extend_from_slice(&time_bytes(created_at));
    key.extend_from_slice(command_id.as_bytes());
    key
}

/// Encode a per-agent command index key: `instance_uid || created_at || command_id`.
///
/// This allows efficient prefix scans for all commands addressed to an agent.
#[must_use]
pub fn instance_command_key(
    instance_uid: &InstanceUid,
    created_at: DateTime<Utc>,
    command_id: &CommandId,
) -> Vec<u8> {
    let mut key = Vec::with_capacity(ID_LEN + TIME_LEN + ID_LEN);
    key.extend_from_slice(instance_uid.as_bytes());
    key.extend_from_slice(&time_bytes(created_at));
    key.extend_from_slice(command_id.as_bytes());
    key
}

/// Encode an instance prefix for scanning all commands of one agent.
#[must_use]
pub fn instance_prefix(instance_uid: &InstanceUid) -> Vec<u8> {
    instance_uid.as_bytes().to_vec()
}

/// Extract the command ID from the tail of a time-ordered index key.
///
/// # Errors
///
/// Returns `StoreError::Database` if the key is shorter than an ID.
pub fn command_id_from_index_key(key: &[u8]) -> Result<CommandId> {
    let start = key
        .len()
        .checked_sub(ID_LEN)
        .ok_or_else(|| StoreError::Database(format!("index key too short: {}", key.len())))?;
    key.get(start..)
        .map(CommandId::from_slice)
        .transpose()
        .map_err(|e| StoreError::Database(e.to_string()))?
        .ok_or_else(|| StoreError::Database("index key too short".to_string()))
}

/// Encode an agent group key (the UTF-8 name).
#[must_use]
pub fn agent_group_key(name: &str) -> Vec<u8> {
    name.as_bytes().to_vec()
}

/// Encode an agent key (just the instance UID bytes).
#[must_use]
pub fn agent_key(instance_uid: &InstanceUid) -> Vec<u8> {
    instance_uid.as_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_bytes_preserve_order() {
        let early = DateTime::<Utc>::UNIX_EPOCH - chrono::Duration::days(1);
        let epoch = DateTime::<Utc>::UNIX_EPOCH;
        let late = epoch + chrono::Duration::microseconds(1);

        assert!(time_bytes(early) < time_bytes(epoch));
        assert!(time_bytes(epoch) < time_bytes(late));
    }

    #[test]
    fn command_time_key_roundtrip() {
        let id = CommandId::generate();
        let key = command_time_key(Utc::now(), &id);
        assert_eq!(key.len(), 24);
        assert_eq!(command_id_from_index_key(&key).unwrap(), id);
    }

    #[test]
    fn instance_command_key_roundtrip() {
        let uid = InstanceUid::from_bytes([1u8; 16]);
        let id = CommandId::generate();

        let key = instance_command_key(&uid, Utc::now(), &id);
        assert_eq!(key.len(), 40);
        assert!(key.starts_with(&instance_prefix(&uid)));
        assert_eq!(command_id_from_index_key(&key).unwrap(), id);
    }

    #[test]
    fn same_instant_orders_by_id() {
        let now = Utc::now();
        let low = CommandId::from_bytes([0u8; 16]);
        let high = CommandId::from_bytes([0xff; 16]);
        assert!(command_time_key(now, &low) < command_time_key(now, &high));
    }

    #[test]
    fn short_key_is_an_error() {
        assert!(command_id_from_index_key(&[1, 2, 3]).is_err());
    }
}
