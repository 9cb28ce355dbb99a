//! Message routing between extensions, through the host.
//!
//! Every message goes out through the host's `sendMessage` and comes back
//! as a [`HostEvent`]. Two-way messages are matched to their response by
//! message ID; ports are message pairs tagged with the sending end.

use boa_engine::{
    js_string,
    object::{builtins::JsPromise, ObjectInitializer},
    property::Attribute,
    Context, JsArgs, JsError, JsNativeError, JsObject, JsResult, JsValue, NativeFunction,
};
use boa_gc::{Finalize, Gc, GcRefCell, Trace};
use exthost_api::url::random_uuid;
use exthost_core::{
    promise,
    value::{js_to_json, json_to_js},
    Realm,
};
use serde_json::{json, Value};

use crate::{
    controller,
    events::event_object,
    internal_storage::RESERVED_ID,
    rpc::HostEvent,
    state::{HostState, Target},
    Error,
};

fn rpc_error(err: crate::rpc::RpcError) -> JsError {
    Error::from(err).into()
}

/// Sends `message` from `extension_id` to `to_extension_id` and returns a
/// promise of the response.
pub fn send_message_with_response(
    state: &HostState,
    extension_id: &str,
    to_extension_id: &str,
    tab_id: Option<Value>,
    message: &JsValue,
    context: &mut Context,
) -> JsResult<JsValue> {
    let data = js_to_json(message, context)?;
    let message_id = random_uuid();
    let (promise, resolvers) = JsPromise::new_pending(context);
    state.insert_pending(&message_id, resolvers.resolve.clone(), resolvers.reject.clone());

    let sent = state.rpc().send_message(
        extension_id,
        to_extension_id,
        tab_id,
        &message_id,
        json!({ "type": "message", "data": data, "response": false }),
    );
    if let Err(err) = sent {
        state.take_pending(&message_id);
        let reason = rpc_error(err).to_opaque(context);
        resolvers.reject.call(&JsValue::undefined(), &[reason], context)?;
    }
    Ok(promise.into())
}

/// Sends one of the page's own notifications (navigation, internal RPC).
pub fn send_internal(state: &HostState, tab_id: Option<Value>, message: Value) {
    if let Err(err) = state
        .rpc()
        .send_message(RESERVED_ID, RESERVED_ID, tab_id, &random_uuid(), message)
    {
        log::error!("{err}");
    }
}

/// Delivers an event the host pushed into the page.
pub fn handle_host_event(state: &HostState, event: HostEvent, context: &mut Context) {
    let result = match event {
        HostEvent::WebNavigationCommitted {
            to_extension_id,
            tab_id,
            url,
        } => {
            let details = json!({ "tabId": tab_id, "url": url });
            state.dispatch(
                "webNavigation.onCommitted",
                &Target::One(to_extension_id),
                context,
                &|context| Ok(vec![json_to_js(&details, context)?]),
            );
            Ok(())
        }
        HostEvent::Message {
            extension_id,
            to_extension_id,
            message_id,
            message,
            sender,
        } => on_message(
            state,
            &Inbound {
                extension_id,
                to_extension_id,
                message_id,
                message,
                sender,
            },
            context,
        ),
    };
    if let Err(err) = result {
        log::error!("Failed to handle a host event: {err}");
    }
}

struct Inbound {
    extension_id: String,
    to_extension_id: String,
    message_id: String,
    message: Value,
    sender: Value,
}

impl Inbound {
    fn field(&self, name: &str) -> &Value {
        self.message.get(name).unwrap_or(&Value::Null)
    }

    fn tab_id(&self) -> Value {
        self.sender
            .get("tab")
            .and_then(|tab| tab.get("id"))
            .cloned()
            .unwrap_or(Value::Null)
    }
}

fn on_message(state: &HostState, inbound: &Inbound, context: &mut Context) -> JsResult<()> {
    let realm = match state.extension(&inbound.to_extension_id) {
        Some(extension) => extension.realm().clone(),
        None => Realm::current(context),
    };
    let context = &mut realm.context_handle(context);

    match inbound.field("type").as_str().unwrap_or_default() {
        "message" => {
            let response = inbound.field("response");
            if response == &Value::Bool(true) {
                if let Some((resolve, _)) = state.take_pending(&inbound.message_id) {
                    let data = json_to_js(inbound.field("data"), context)?;
                    resolve.call(&JsValue::undefined(), &[data], context)?;
                }
            } else if response == &Value::Bool(false) {
                on_normal_message(state, inbound, context)?;
            }
        }
        "onWebNavigationChanged" => {
            let Some(status) = inbound.field("status").as_str() else {
                return Ok(());
            };
            let details = json!({ "tabId": inbound.tab_id(), "url": inbound.field("location") });
            state.dispatch(
                &format!("webNavigation.{status}"),
                &Target::All,
                context,
                &|context| Ok(vec![json_to_js(&details, context)?]),
            );
        }
        "onPortCreate" => on_port_create(state, inbound, context)?,
        "onPortMessage" => {
            let key = port_key(inbound.field("portID"), opposite(inbound.field("from")));
            let message = inbound.field("message").clone();
            state.dispatch("port.onMessage", &Target::One(key), context, &|context| {
                Ok(vec![json_to_js(&message, context)?])
            });
        }
        "onPortDisconnect" => {
            let key = port_key(inbound.field("portID"), opposite(inbound.field("from")));
            state.dispatch("port.onDisconnect", &Target::One(key.clone()), context, &|_| Ok(vec![]));
            clear_port(state, &key);
        }
        "internal-rpc" => {
            let call = inbound.field("message");
            match call.get("method").and_then(Value::as_str) {
                Some("executeContentScript") => {
                    let params = call
                        .get("params")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default();
                    controller::execute_content_script(state, &params, context);
                }
                method => log::warn!("Unknown internal call {method:?}"),
            }
        }
        other => log::debug!("Ignoring message of type {other:?}"),
    }
    Ok(())
}

/// Answers one two-way message, once.
#[derive(Trace, Finalize, Clone)]
struct Responder {
    state: HostState,
    /// The extension that received the message.
    from: String,
    /// The extension that asked.
    to: String,
    #[unsafe_ignore_trace]
    tab_id: Value,
    message_id: String,
    sent: Gc<GcRefCell<bool>>,
}

impl Responder {
    fn send(&self, value: &JsValue, context: &mut Context) -> JsResult<()> {
        if *self.sent.borrow() {
            return Ok(());
        }
        *self.sent.borrow_mut() = true;
        let data = js_to_json(value, context)?;
        self.state
            .rpc()
            .send_message(
                &self.from,
                &self.to,
                Some(self.tab_id.clone()),
                &self.message_id,
                json!({ "data": data, "response": true, "type": "message" }),
            )
            .map_err(rpc_error)?;
        Ok(())
    }
}

fn on_normal_message(state: &HostState, inbound: &Inbound, context: &mut Context) -> JsResult<()> {
    let responder = Responder {
        state: state.clone(),
        from: inbound.to_extension_id.clone(),
        to: inbound.extension_id.clone(),
        tab_id: inbound.tab_id(),
        message_id: inbound.message_id.clone(),
        sent: Gc::new(GcRefCell::new(false)),
    };
    let send_response = promise::callback(
        "sendResponse",
        1,
        responder.clone(),
        |_, args, responder: &Responder, context| {
            responder.send(args.get_or_undefined(0), context)?;
            Ok(JsValue::undefined())
        },
        context,
    );

    let data = inbound.field("data").clone();
    let sender = inbound.sender.clone();
    let results = state.dispatch(
        "runtime.onMessage",
        &Target::One(inbound.to_extension_id.clone()),
        context,
        &|context| {
            Ok(vec![
                json_to_js(&data, context)?,
                json_to_js(&sender, context)?,
                send_response.clone().into(),
            ])
        },
    );

    for result in results {
        if !promise::is_thenable(&result, context)? {
            continue;
        }
        promise::when_settled(
            result,
            responder.clone(),
            |outcome, responder: &Responder, context| {
                match outcome {
                    Ok(value) if !value.is_undefined() => responder.send(&value, context)?,
                    Ok(_) => {}
                    Err(reason) => log::error!(
                        "onMessage listener rejected: {}",
                        reason.display()
                    ),
                }
                Ok(JsValue::undefined())
            },
            context,
        )?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortEnd {
    Connector,
    Receiver,
}

impl PortEnd {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortEnd::Connector => "connector",
            PortEnd::Receiver => "receiver",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            PortEnd::Connector => PortEnd::Receiver,
            PortEnd::Receiver => PortEnd::Connector,
        }
    }
}

fn opposite(from: &Value) -> PortEnd {
    match from.as_str() {
        Some("receiver") => PortEnd::Connector,
        _ => PortEnd::Receiver,
    }
}

fn port_key(port_id: &Value, end: PortEnd) -> String {
    format!("{}:{}", port_id.as_str().unwrap_or_default(), end.as_str())
}

fn clear_port(state: &HostState, key: &str) {
    state.clear_listeners("port.onMessage", key);
    state.clear_listeners("port.onDisconnect", key);
}

#[derive(Trace, Finalize, Clone)]
struct PortHandle {
    state: HostState,
    extension_id: String,
    port_id: String,
    #[unsafe_ignore_trace]
    end: PortEnd,
}

impl PortHandle {
    fn key(&self) -> String {
        format!("{}:{}", self.port_id, self.end.as_str())
    }

    fn send(&self, message: Value) -> JsResult<()> {
        self.state
            .rpc()
            .send_message(&self.extension_id, &self.extension_id, None, "", message)
            .map_err(rpc_error)?;
        Ok(())
    }
}

/// A `runtime.Port` for one end of the port `port_id`.
pub fn create_port(
    state: &HostState,
    extension_id: &str,
    port_id: &str,
    end: PortEnd,
    name: &str,
    sender: JsValue,
    context: &mut Context,
) -> JsObject {
    let handle = PortHandle {
        state: state.clone(),
        extension_id: extension_id.to_string(),
        port_id: port_id.to_string(),
        end,
    };
    let key = handle.key();
    let on_message = event_object(state, "port.onMessage", &key, context);
    let on_disconnect = event_object(state, "port.onDisconnect", &key, context);
    ObjectInitializer::new(context)
        .property(js_string!("name"), js_string!(name), Attribute::all())
        .property(js_string!("sender"), sender, Attribute::all())
        .property(js_string!("onMessage"), on_message, Attribute::all())
        .property(js_string!("onDisconnect"), on_disconnect, Attribute::all())
        .function(
            NativeFunction::from_copy_closure_with_captures(
                |_, args, handle: &PortHandle, context| {
                    let message = js_to_json(args.get_or_undefined(0), context)?;
                    handle.send(json!({
                        "type": "onPortMessage",
                        "portID": handle.port_id,
                        "message": message,
                        "from": handle.end.as_str(),
                    }))?;
                    Ok(JsValue::undefined())
                },
                handle.clone(),
            ),
            js_string!("postMessage"),
            1,
        )
        .function(
            NativeFunction::from_copy_closure_with_captures(
                |_, _, handle: &PortHandle, _| {
                    clear_port(&handle.state, &handle.key());
                    handle.send(json!({
                        "type": "onPortDisconnect",
                        "portID": handle.port_id,
                        "from": handle.end.as_str(),
                    }))?;
                    Ok(JsValue::undefined())
                },
                handle,
            ),
            js_string!("disconnect"),
            0,
        )
        .build()
}

/// `runtime.connect(connectInfo)` of `extension_id`: the connector end of a
/// new port, announced to the extension's own `onConnect` listeners.
pub fn connect(state: &HostState, extension_id: &str, name: &str, context: &mut Context) -> JsResult<JsObject> {
    let port_id = random_uuid();
    let port = create_port(
        state,
        extension_id,
        &port_id,
        PortEnd::Connector,
        name,
        JsValue::undefined(),
        context,
    );
    state
        .rpc()
        .send_message(
            extension_id,
            extension_id,
            None,
            "",
            json!({ "type": "onPortCreate", "name": name, "portID": port_id }),
        )
        .map_err(rpc_error)?;
    Ok(port)
}

fn on_port_create(state: &HostState, inbound: &Inbound, context: &mut Context) -> JsResult<()> {
    let Some(port_id) = inbound.field("portID").as_str() else {
        return Err(JsNativeError::typ().with_message("onPortCreate without a portID").into());
    };
    let name = inbound.field("name").as_str().unwrap_or_default();
    let sender = json_to_js(&inbound.sender, context)?;
    let port = create_port(
        state,
        &inbound.to_extension_id,
        port_id,
        PortEnd::Receiver,
        name,
        sender,
        context,
    );
    state.dispatch(
        "runtime.onConnect",
        &Target::One(inbound.to_extension_id.clone()),
        context,
        &|_| Ok(vec![port.clone().into()]),
    );
    Ok(())
}
