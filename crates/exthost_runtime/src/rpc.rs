//! The boundary to the native host.
//!
//! Calls go out through [`HostRpc::call`] with JSON parameters, events come
//! back through [`HostRpc::poll_events`]. [`FrameworkRpc`] wraps the raw
//! channel with one typed method per host API.

use std::rc::Rc;

use serde_json::{json, Value};

use crate::envelope::Envelope;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    #[error("{method} is not implemented by the host")]
    NotImplemented { method: String },
    #[error("{method} failed: {message}")]
    Failed { method: String, message: String },
}

/// What the host pushes into the page.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// `browser.webNavigation.onCommitted(toExtensionID, { tabId, url })`
    WebNavigationCommitted {
        to_extension_id: String,
        tab_id: Value,
        url: String,
    },
    /// `onMessage(extensionID, toExtensionID, messageID, message, sender)`
    Message {
        extension_id: String,
        to_extension_id: String,
        message_id: String,
        message: Value,
        sender: Value,
    },
}

pub trait HostRpc {
    /// Invokes the host method `method` with positional `params`. The first
    /// parameter is always the calling extension ID.
    fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError>;

    /// Drains the events the host queued for this page.
    fn poll_events(&self) -> Vec<HostEvent>;
}

/// Typed access to the host methods.
#[derive(Clone)]
pub struct FrameworkRpc {
    inner: Rc<dyn HostRpc>,
}

impl FrameworkRpc {
    pub fn new(inner: Rc<dyn HostRpc>) -> Self {
        Self { inner }
    }

    pub fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        log::trace!("rpc {method} {params:?}");
        self.inner.call(method, params)
    }

    pub fn poll_events(&self) -> Vec<HostEvent> {
        self.inner.poll_events()
    }

    pub fn create_object_url(
        &self,
        extension_id: &str,
        uuid: &str,
        envelope: &Envelope,
    ) -> Result<Value, RpcError> {
        self.call(
            "URL.createObjectURL",
            vec![extension_id.into(), uuid.into(), envelope.to_json()],
        )
    }

    pub fn revoke_object_url(&self, extension_id: &str, uuid: &str) -> Result<Value, RpcError> {
        self.call("URL.revokeObjectURL", vec![extension_id.into(), uuid.into()])
    }

    pub fn storage_get(&self, extension_id: &str, keys: Value) -> Result<Value, RpcError> {
        self.call("browser.storage.local.get", vec![extension_id.into(), keys])
    }

    pub fn storage_set(&self, extension_id: &str, items: Value) -> Result<Value, RpcError> {
        self.call("browser.storage.local.set", vec![extension_id.into(), items])
    }

    pub fn tabs_create(&self, extension_id: &str, options: Value) -> Result<Value, RpcError> {
        self.call("browser.tabs.create", vec![extension_id.into(), options])
    }

    pub fn tabs_query(&self, extension_id: &str, query: Value) -> Result<Value, RpcError> {
        self.call("browser.tabs.query", vec![extension_id.into(), query])
    }

    pub fn tabs_remove(&self, extension_id: &str, tab_id: Value) -> Result<Value, RpcError> {
        self.call("browser.tabs.remove", vec![extension_id.into(), tab_id])
    }

    pub fn send_message(
        &self,
        extension_id: &str,
        to_extension_id: &str,
        tab_id: Option<Value>,
        message_id: &str,
        message: Value,
    ) -> Result<Value, RpcError> {
        self.call(
            "sendMessage",
            vec![
                extension_id.into(),
                to_extension_id.into(),
                tab_id.unwrap_or(Value::Null),
                message_id.into(),
                message,
            ],
        )
    }

    /// `fetch(extensionID, { method, url })`, answered with
    /// `{ status, statusText, data: <envelope> }`.
    pub fn fetch(&self, extension_id: &str, method: &str, url: &str) -> Result<Value, RpcError> {
        self.call(
            "fetch",
            vec![extension_id.into(), json!({ "method": method, "url": url })],
        )
    }
}
