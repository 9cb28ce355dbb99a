//! Per-extension bookkeeping the host keeps for itself.
//!
//! Stored under a reserved ID in the host's storage, or in the page's
//! `localStorage` when running in debug mode.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{state::HostState, Result};

/// The ID internal messages and storage are filed under.
pub const RESERVED_ID: &str = "150ea6ee-2b0a-4587-9879-0ca5dfc1d046";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InternalStorage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<String>,
    pub dynamic_requested_permissions: DynamicPermissions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_mode_storage: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicPermissions {
    pub origins: Vec<String>,
    pub permissions: Vec<String>,
}

impl DynamicPermissions {
    pub fn extend(&mut self, origins: &[String], permissions: &[String]) {
        for origin in origins {
            if !self.origins.contains(origin) {
                self.origins.push(origin.clone());
            }
        }
        for permission in permissions {
            if !self.permissions.contains(permission) {
                self.permissions.push(permission.clone());
            }
        }
    }
}

fn debug_key(extension_id: &str) -> String {
    format!("{RESERVED_ID}:{extension_id}")
}

pub fn load(state: &HostState, extension_id: &str) -> Result<InternalStorage> {
    if state.is_debug() {
        let stored = state.page().local_storage().get(&debug_key(extension_id));
        return Ok(match stored {
            Some(text) => serde_json::from_str(&text)?,
            None => InternalStorage::default(),
        });
    }
    let stored = state.rpc().storage_get(RESERVED_ID, json!([extension_id]))?;
    Ok(match stored.get(extension_id) {
        Some(value) => serde_json::from_value(value.clone())?,
        None => InternalStorage::default(),
    })
}

pub fn save(state: &HostState, extension_id: &str, storage: &InternalStorage) -> Result<()> {
    if state.is_debug() {
        let text = serde_json::to_string(storage)?;
        state.page().local_storage().set(&debug_key(extension_id), &text);
        return Ok(());
    }
    let mut items = serde_json::Map::new();
    items.insert(extension_id.to_string(), serde_json::to_value(storage)?);
    state.rpc().storage_set(RESERVED_ID, Value::Object(items))?;
    Ok(())
}

/// Loads, changes and saves the record of `extension_id`.
pub fn update(
    state: &HostState,
    extension_id: &str,
    change: impl FnOnce(&mut InternalStorage),
) -> Result<InternalStorage> {
    let mut storage = load(state, extension_id)?;
    change(&mut storage);
    save(state, extension_id, &storage)?;
    Ok(storage)
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn uses_the_camel_case_wire_names() {
        let mut storage = InternalStorage {
            previous_version: Some("1.0".to_string()),
            ..Default::default()
        };
        storage
            .dynamic_requested_permissions
            .extend(&["https://a.com/*".to_string()], &["tabs".to_string(), "tabs".to_string()]);

        assert_eq!(
            serde_json::to_value(&storage).unwrap(),
            json!({
                "previousVersion": "1.0",
                "dynamicRequestedPermissions": { "origins": ["https://a.com/*"], "permissions": ["tabs"] }
            })
        );
        let parsed: InternalStorage = serde_json::from_value(json!({})).unwrap();
        assert_eq!(parsed, InternalStorage::default());
    }
}
