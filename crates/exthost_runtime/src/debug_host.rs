//! An in-process host for tests and `localhost` debugging.
//!
//! Messages are looped back to the page that sent them, storage lives in
//! memory and `fetch` serves the resources inserted with
//! [`DebugHost::insert_resource`].

use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap, VecDeque},
};

use serde_json::{json, Map, Value};

use crate::{
    envelope::Envelope,
    resources::extension_url,
    rpc::{HostEvent, HostRpc, RpcError},
};

#[derive(Debug, Default)]
pub struct DebugHost {
    tab_id: u32,
    storage: RefCell<BTreeMap<String, Map<String, Value>>>,
    resources: RefCell<HashMap<String, String>>,
    events: RefCell<VecDeque<HostEvent>>,
    calls: RefCell<Vec<(String, Vec<Value>)>>,
}

fn param(params: &[Value], index: usize) -> Value {
    params.get(index).cloned().unwrap_or(Value::Null)
}

fn string_param(params: &[Value], index: usize) -> String {
    match params.get(index) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn key_list(keys: &Value) -> Option<Vec<String>> {
    match keys {
        Value::Null => None,
        Value::String(key) => Some(vec![key.clone()]),
        Value::Array(keys) => Some(
            keys.iter()
                .filter_map(|key| key.as_str().map(str::to_string))
                .collect(),
        ),
        Value::Object(keys) => Some(keys.keys().cloned().collect()),
        _ => Some(Vec::new()),
    }
}

impl DebugHost {
    pub fn new() -> Self {
        Self {
            tab_id: 1,
            ..Default::default()
        }
    }

    /// The tab the page pretends to live in.
    pub fn tab_id(&self) -> u32 {
        self.tab_id
    }

    /// Serves `content` for `path` of `extension_id` through `fetch`.
    pub fn insert_resource(&self, extension_id: &str, path: &str, content: &str) {
        self.resources
            .borrow_mut()
            .insert(extension_url(extension_id, path), content.to_string());
    }

    /// Queues an event as if the native host had sent it.
    pub fn push_event(&self, event: HostEvent) {
        self.events.borrow_mut().push_back(event);
    }

    /// Every call received so far, oldest first.
    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.calls.borrow().clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<Vec<Value>> {
        self.calls
            .borrow()
            .iter()
            .filter(|(name, _)| name == method)
            .map(|(_, params)| params.clone())
            .collect()
    }

    fn storage_get(&self, extension_id: &str, keys: &Value) -> Value {
        let storage = self.storage.borrow();
        let Some(items) = storage.get(extension_id) else {
            return json!({});
        };
        match key_list(keys) {
            None => Value::Object(items.clone()),
            Some(keys) => Value::Object(
                keys.into_iter()
                    .filter_map(|key| items.get(&key).map(|value| (key, value.clone())))
                    .collect(),
            ),
        }
    }

    fn storage_set(&self, extension_id: &str, items: Value) -> Result<Value, RpcError> {
        let Value::Object(items) = items else {
            return Err(RpcError::Failed {
                method: "browser.storage.local.set".to_string(),
                message: "items must be an object".to_string(),
            });
        };
        let mut storage = self.storage.borrow_mut();
        let stored = storage.entry(extension_id.to_string()).or_default();
        // One level only: a key is replaced as a whole.
        stored.extend(items);
        Ok(Value::Null)
    }

    fn storage_remove(&self, extension_id: &str, keys: &Value) {
        if let Some(stored) = self.storage.borrow_mut().get_mut(extension_id) {
            for key in key_list(keys).unwrap_or_default() {
                stored.remove(&key);
            }
        }
    }

    fn fetch(&self, extension_id: &str, request: &Value) -> Value {
        let url = request
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let key = extension_url(extension_id, url);
        match self.resources.borrow().get(&key) {
            Some(content) => json!({
                "status": 200,
                "statusText": "ok",
                "data": Envelope::text(content.clone()).to_json(),
            }),
            None => json!({
                "status": 404,
                "statusText": "Not found",
                "data": Envelope::text("").to_json(),
            }),
        }
    }
}

impl HostRpc for DebugHost {
    fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        log::debug!("Mocked Host {method} {params:?}");
        self.calls
            .borrow_mut()
            .push((method.to_string(), params.clone()));
        let extension_id = string_param(&params, 0);

        match method {
            "URL.createObjectURL"
            | "URL.revokeObjectURL"
            | "browser.downloads.download"
            | "browser.tabs.remove"
            | "browser.tabs.update" => Ok(Value::Null),
            "browser.tabs.query" => Ok(json!([])),
            "browser.tabs.create" => {
                let options = param(&params, 1);
                if options.get("url").and_then(Value::as_str).is_none() {
                    return Err(RpcError::Failed {
                        method: method.to_string(),
                        message: "need a url".to_string(),
                    });
                }
                Ok(json!({ "id": fastrand::u32(..) }))
            }
            "browser.storage.local.get" => Ok(self.storage_get(&extension_id, &param(&params, 1))),
            "browser.storage.local.set" => self.storage_set(&extension_id, param(&params, 1)),
            "browser.storage.local.remove" => {
                self.storage_remove(&extension_id, &param(&params, 1));
                Ok(Value::Null)
            }
            "browser.storage.local.clear" => {
                self.storage.borrow_mut().remove(&extension_id);
                Ok(Value::Null)
            }
            "sendMessage" => {
                let tab_id = match param(&params, 2) {
                    Value::Null => json!(self.tab_id),
                    tab_id => tab_id,
                };
                self.push_event(HostEvent::Message {
                    extension_id: extension_id.clone(),
                    to_extension_id: string_param(&params, 1),
                    message_id: string_param(&params, 3),
                    message: param(&params, 4),
                    sender: json!({ "id": extension_id, "tab": { "id": tab_id } }),
                });
                Ok(Value::Null)
            }
            "fetch" => Ok(self.fetch(&extension_id, &param(&params, 1))),
            _ => Err(RpcError::NotImplemented {
                method: method.to_string(),
            }),
        }
    }

    fn poll_events(&self) -> Vec<HostEvent> {
        self.events.borrow_mut().drain(..).collect()
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn storage_merges_one_level() {
        let host = DebugHost::new();
        let set = |items: Value| host.call("browser.storage.local.set", vec!["ext".into(), items]);

        set(json!({ "a": { "value": 1 }, "b": { "name": "x" } })).unwrap();
        set(json!({ "a": { "value": 2 } })).unwrap();

        let everything = host
            .call("browser.storage.local.get", vec!["ext".into(), Value::Null])
            .unwrap();
        assert_eq!(everything, json!({ "a": { "value": 2 }, "b": { "name": "x" } }));
        let some = host
            .call("browser.storage.local.get", vec!["ext".into(), json!(["b", "c"])])
            .unwrap();
        assert_eq!(some, json!({ "b": { "name": "x" } }));
    }

    #[test]
    fn loops_messages_back() {
        let host = DebugHost::new();

        host.call(
            "sendMessage",
            vec!["a".into(), "b".into(), Value::Null, "42".into(), json!({ "type": "message" })],
        )
        .unwrap();

        let events = host.poll_events();
        assert_eq!(events.len(), 1);
        let HostEvent::Message { to_extension_id, sender, .. } = &events[0] else {
            panic!("expected a message");
        };
        assert_eq!(to_extension_id, "b");
        assert_eq!(sender["tab"]["id"], 1);
        assert!(host.poll_events().is_empty());
    }

    #[test]
    fn serves_inserted_resources() {
        let host = DebugHost::new();
        host.insert_resource("ext", "/js/a.js", "a()");

        let found = host
            .call("fetch", vec!["ext".into(), json!({ "method": "GET", "url": "holoflows-extension://ext/js/a.js" })])
            .unwrap();
        let missing = host
            .call("fetch", vec!["ext".into(), json!({ "method": "GET", "url": "js/b.js" })])
            .unwrap();

        assert_eq!(found["status"], 200);
        assert_eq!(found["data"]["content"], "a()");
        assert_eq!(missing["status"], 404);
    }
}
