//! Data handlers - authority reads and writes over HTTP.

use crate::error::{AppError, Result};
use replimap_engine::{Entry, RecordKey, RecordValue, ReplicatedMap, Version};
use serde::{Deserialize, Serialize};

/// Body of a write.
#[derive(Debug, Deserialize)]
pub struct SetDataRequest {
    pub key: RecordKey,
    pub value: RecordValue,
}

/// Body of a lookup or removal.
#[derive(Debug, Deserialize)]
pub struct KeyRequest {
    pub key: RecordKey,
}

/// Response for a write.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetDataResponse {
    /// Version stamped on the entry
    pub version: Version,
}

/// Response for a removal.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveDataResponse {
    pub removed: bool,
    pub current_version: Version,
}

/// Response for a lookup.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FindResponse {
    pub key: RecordKey,
    pub value: RecordValue,
    pub version: Version,
}

#[derive(Debug, Serialize)]
pub struct KeysResponse {
    pub keys: Vec<RecordKey>,
}

/// Full contents of the map.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataResponse {
    pub current_version: Version,
    pub entries: Vec<Entry>,
}

/// Insert or replace an entry.
pub fn handle_set(map: &mut ReplicatedMap, request: SetDataRequest) -> Result<SetDataResponse> {
    map.set_data(request.key, request.value)?;
    Ok(SetDataResponse {
        version: map.store().current_version(),
    })
}

/// Remove an entry. Removing an absent key is not an error.
pub fn handle_remove(map: &mut ReplicatedMap, request: KeyRequest) -> Result<RemoveDataResponse> {
    let removed = map.remove_data(&request.key)?;
    Ok(RemoveDataResponse {
        removed,
        current_version: map.store().current_version(),
    })
}

/// Look up one entry.
pub fn handle_find(map: &ReplicatedMap, request: KeyRequest) -> Result<FindResponse> {
    let entry = map
        .store()
        .entry(&request.key)
        .ok_or_else(|| AppError::NotFound(format!("key {}", request.key)))?;
    Ok(FindResponse {
        key: entry.key.clone(),
        value: entry.value.clone(),
        version: entry.replication_version,
    })
}

pub fn handle_keys(map: &ReplicatedMap) -> KeysResponse {
    KeysResponse {
        keys: map.get_keys(),
    }
}

pub fn handle_all(map: &ReplicatedMap) -> DataResponse {
    DataResponse {
        current_version: map.store().current_version(),
        entries: map.store().entries().to_vec(),
    }
}
