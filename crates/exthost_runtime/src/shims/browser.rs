//! The `browser` object of one extension.
//!
//! Implemented namespaces translate their arguments into host calls. Every
//! namespace, and `browser` itself, sits behind a proxy that answers
//! unknown keys with stand-ins throwing `Error: Not implemented!`, so code
//! probing for an API fails at the call rather than at the lookup.

use std::rc::Rc;

use boa_engine::{
    js_string,
    object::{
        builtins::{JsArray, JsFunction, JsProxyBuilder},
        FunctionObjectBuilder,
    },
    property::PropertyKey,
    Context, JsArgs, JsNativeError, JsObject, JsResult, JsValue, NativeFunction,
};
use boa_gc::{Finalize, Trace};
use exthost_api::url::blob_url_uuid;
use exthost_core::{
    promise,
    value::{get_string, js_to_json, json_to_js},
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    environment::Environment,
    events::event_object,
    extension::Extension,
    internal_storage,
    manifest::Manifest,
    messaging,
    resources::extension_url,
    state::HostState,
    Error,
};

/// What every `browser` method closes over.
#[derive(Trace, Finalize, Clone)]
pub(crate) struct ExtensionApi {
    pub(crate) state: HostState,
    pub(crate) id: String,
    #[unsafe_ignore_trace]
    manifest: Rc<Manifest>,
}

impl ExtensionApi {
    pub(crate) fn new(state: &HostState, extension: &Extension) -> Self {
        Self {
            state: state.clone(),
            id: extension.id().to_string(),
            manifest: Rc::new(extension.manifest().clone()),
        }
    }

    /// Calls the host method `method` on behalf of this extension.
    pub(crate) fn call(&self, method: &str, params: Vec<Value>) -> JsResult<Value> {
        let mut all = Vec::with_capacity(params.len() + 1);
        all.push(Value::from(self.id.as_str()));
        all.extend(params);
        Ok(self.state.rpc().call(method, all).map_err(Error::from)?)
    }
}

type Method = fn(&ExtensionApi, &[JsValue], &mut Context) -> JsResult<JsValue>;

/// A method returning a promise of what `f` produces.
fn async_method(name: &str, length: usize, api: &ExtensionApi, f: Method, context: &mut Context) -> JsValue {
    promise::callback(
        name,
        length,
        api.clone(),
        move |_, args, api: &ExtensionApi, context| {
            let result = f(api, args, context);
            Ok(promise::settled(result, context).into())
        },
        context,
    )
    .into()
}

fn sync_method(name: &str, length: usize, api: &ExtensionApi, f: Method, context: &mut Context) -> JsValue {
    promise::callback(
        name,
        length,
        api.clone(),
        move |_, args, api: &ExtensionApi, context| f(api, args, context),
        context,
    )
    .into()
}

fn not_implemented(_: &JsValue, _: &[JsValue], _: &mut Context) -> JsResult<JsValue> {
    Err(JsNativeError::error()
        .with_message("Not implemented!")
        .into())
}

fn not_implemented_function(context: &mut Context) -> JsFunction {
    FunctionObjectBuilder::new(context.realm(), NativeFunction::from_fn_ptr(not_implemented))
        .name(js_string!("NotImplemented"))
        .length(0)
        .build()
}

fn is_key(key: &PropertyKey, name: &str) -> bool {
    matches!(key, PropertyKey::String(key) if key.to_std_string_escaped() == name)
}

/// The value of an existing key, `None` when the proxy has to make one up.
/// Symbols and `then` are never made up, so the proxies are not mistaken
/// for thenables.
fn existing(args: &[JsValue], context: &mut Context) -> JsResult<Option<JsValue>> {
    let Some(target) = args.get_or_undefined(0).as_object().cloned() else {
        return Ok(Some(JsValue::undefined()));
    };
    let key = args.get_or_undefined(1).to_property_key(context)?;
    if target.has_property(key.clone(), context)?
        || matches!(key, PropertyKey::Symbol(_))
        || is_key(&key, "then")
    {
        return Ok(Some(target.get(key, context)?));
    }
    Ok(None)
}

fn final_get(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    match existing(args, context)? {
        Some(value) => Ok(value),
        None => Ok(not_implemented_function(context).into()),
    }
}

fn nested_get(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    match existing(args, context)? {
        Some(value) => Ok(value),
        None => {
            let empty = JsObject::with_object_proto(context.intrinsics());
            Ok(not_implemented_proxy(empty, true, context).into())
        }
    }
}

/// Wraps `target`. Unknown keys of a final proxy are throwing functions;
/// unknown keys of a non-final proxy are final proxies.
pub fn not_implemented_proxy(target: JsObject, is_final: bool, context: &mut Context) -> JsObject {
    let builder = JsProxyBuilder::new(target);
    let builder = if is_final {
        builder.get(final_get)
    } else {
        builder.get(nested_get)
    };
    builder.build(context).into()
}

fn plain_object(entries: Vec<(&str, JsValue)>, context: &mut Context) -> JsResult<JsObject> {
    let object = JsObject::with_object_proto(context.intrinsics());
    for (name, value) in entries {
        object.create_data_property_or_throw(js_string!(name), value, context)?;
    }
    Ok(object)
}

fn namespace(entries: Vec<(&str, JsValue)>, context: &mut Context) -> JsResult<JsValue> {
    let target = plain_object(entries, context)?;
    Ok(not_implemented_proxy(target, true, context).into())
}

/// Warns about the keys of `options` outside `supported`.
fn partially_implemented(what: &str, options: &Value, supported: &[&str]) {
    let Value::Object(options) = options else {
        return;
    };
    let ignored: Vec<&str> = options
        .iter()
        .filter(|(key, value)| !supported.contains(&key.as_str()) && !value.is_null())
        .map(|(key, _)| key.as_str())
        .collect();
    if !ignored.is_empty() {
        log::warn!("Not implemented options of {what}: {}", ignored.join(", "));
    }
}

fn arg_json(args: &[JsValue], index: usize, context: &mut Context) -> JsResult<Value> {
    js_to_json(args.get_or_undefined(index), context)
}

// downloads

fn download(api: &ExtensionApi, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let options = arg_json(args, 0, context)?;
    partially_implemented("downloads.download", &options, &["url", "filename"]);
    let url = options.get("url").and_then(Value::as_str).unwrap_or_default();
    let url = match blob_url_uuid(url) {
        Some(uuid) => format!("holoflows-blob://{}/{uuid}", api.id),
        None => url.to_string(),
    };
    let filename = options
        .get("filename")
        .and_then(Value::as_str)
        .unwrap_or_default();
    api.call(
        "browser.downloads.download",
        vec![json!({ "url": url, "filename": filename })],
    )?;
    Ok(0.into())
}

// runtime

fn get_url(api: &ExtensionApi, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let path = args.get_or_undefined(0).to_string(context)?.to_std_string_escaped();
    Ok(js_string!(extension_url(&api.id, &path)).into())
}

fn get_manifest(api: &ExtensionApi, _: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    json_to_js(&api.manifest.to_json(), context)
}

fn runtime_send_message(api: &ExtensionApi, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let (to, message) = match args {
        [message] => (api.id.clone(), message.clone()),
        [to, message] => (to.to_string(context)?.to_std_string_escaped(), message.clone()),
        _ => (String::new(), JsValue::undefined()),
    };
    messaging::send_message_with_response(&api.state, &api.id, &to, None, &message, context)
}

fn runtime_connect(api: &ExtensionApi, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let first = args.get_or_undefined(0);
    let info = if first.is_string() {
        log::warn!("Cross-extension connect is not implemented yet.");
        args.get_or_undefined(1)
    } else {
        first
    };
    let name = match info.as_object() {
        Some(info) => {
            if info.get(js_string!("includeTlsChannelId"), context)?.to_boolean() {
                log::warn!("includeTlsChannelId is not implemented yet.");
            }
            get_string(info, "name", context)?.unwrap_or_default()
        }
        None => String::new(),
    };
    Ok(messaging::connect(&api.state, &api.id, &name, context)?.into())
}

// tabs

fn tabs_create(api: &ExtensionApi, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let options = arg_json(args, 0, context)?;
    json_to_js(&api.call("browser.tabs.create", vec![options])?, context)
}

fn tabs_remove(api: &ExtensionApi, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let tabs = match arg_json(args, 0, context)? {
        Value::Array(tabs) => tabs,
        tab => vec![tab],
    };
    for tab in tabs {
        api.call("browser.tabs.remove", vec![tab])?;
    }
    Ok(JsValue::undefined())
}

fn tabs_query(api: &ExtensionApi, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let query = arg_json(args, 0, context)?;
    json_to_js(&api.call("browser.tabs.query", vec![query])?, context)
}

fn tabs_update(api: &ExtensionApi, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let tab = arg_json(args, 0, context)?;
    let properties = arg_json(args, 1, context)?;
    json_to_js(&api.call("browser.tabs.update", vec![tab, properties])?, context)
}

fn tabs_send_message(api: &ExtensionApi, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let tab = arg_json(args, 0, context)?;
    let options = arg_json(args, 2, context)?;
    partially_implemented("tabs.sendMessage", &options, &[]);
    messaging::send_message_with_response(
        &api.state,
        &api.id,
        &api.id,
        Some(tab),
        args.get_or_undefined(1),
        context,
    )
}

fn tabs_execute_script(api: &ExtensionApi, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let tab = arg_json(args, 0, context)?;
    let details = arg_json(args, 1, context)?;
    partially_implemented("tabs.executeScript", &details, &["code", "file", "runAt"]);
    messaging::send_internal(
        &api.state,
        Some(tab.clone()),
        json!({
            "type": "internal-rpc",
            "message": {
                "method": "executeContentScript",
                "params": [tab, api.id, api.manifest.to_json(), details],
            },
        }),
    );
    Ok(JsArray::new(context).into())
}

// storage.local

fn storage_get(api: &ExtensionApi, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let keys = args.get_or_undefined(0);
    let mut defaults = None;
    let wire = match keys.as_object() {
        _ if keys.is_null_or_undefined() => Value::Null,
        _ if keys.is_string() => json!([keys.to_string(context)?.to_std_string_escaped()]),
        Some(list) if list.is_array() => js_to_json(keys, context)?,
        Some(_) => {
            let given = js_to_json(keys, context)?;
            let names: Vec<Value> = given
                .as_object()
                .map(|given| given.keys().cloned().map(Value::from).collect())
                .unwrap_or_default();
            defaults = Some(given);
            Value::Array(names)
        }
        None => Value::Null,
    };
    let result = api.call("browser.storage.local.get", vec![wire])?;
    let result = match (defaults, result) {
        (Some(Value::Object(mut defaults)), Value::Object(found)) => {
            defaults.extend(found);
            Value::Object(defaults)
        }
        (_, result) => result,
    };
    json_to_js(&result, context)
}

fn storage_set(api: &ExtensionApi, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let items = arg_json(args, 0, context)?;
    api.call("browser.storage.local.set", vec![items])?;
    Ok(JsValue::undefined())
}

fn storage_remove(api: &ExtensionApi, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let keys = arg_json(args, 0, context)?;
    api.call("browser.storage.local.remove", vec![keys])?;
    Ok(JsValue::undefined())
}

fn storage_clear(api: &ExtensionApi, _: &[JsValue], _: &mut Context) -> JsResult<JsValue> {
    api.call("browser.storage.local.clear", vec![])?;
    Ok(JsValue::undefined())
}

// extension

fn background_page_get(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let Some(target) = args.get_or_undefined(0).as_object().cloned() else {
        return Ok(JsValue::undefined());
    };
    let key = args.get_or_undefined(1).to_property_key(context)?;
    if matches!(key, PropertyKey::Symbol(_)) || target.has_own_property(key.clone(), context)? {
        return target.get(key, context);
    }
    Err(JsNativeError::typ().with_message("Not supported").into())
}

fn get_background_page(api: &ExtensionApi, _: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    if let Some(extension) = api.state.extension(&api.id) {
        if extension.environment() == Environment::BackgroundScript {
            return Ok(extension.global().clone().into());
        }
    }
    let href = extension_url(&api.id, api.manifest.background_page());
    let url_class = context.global_object().get(js_string!("URL"), context)?;
    let location: JsValue = match url_class.as_constructor() {
        Some(url_class) => url_class
            .construct(&[js_string!(href).into()], None, context)?
            .into(),
        None => js_string!(href).into(),
    };
    let target = plain_object(vec![("location", location)], context)?;
    let proxy = JsProxyBuilder::new(target)
        .get(background_page_get)
        .build(context);
    Ok(JsObject::from(proxy).into())
}

// permissions

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PermissionsQuery {
    origins: Vec<String>,
    permissions: Vec<String>,
}

fn permissions_query(args: &[JsValue], context: &mut Context) -> JsResult<PermissionsQuery> {
    let query = arg_json(args, 0, context)?;
    if query.is_null() {
        return Ok(PermissionsQuery::default());
    }
    serde_json::from_value(query).map_err(|err| {
        JsNativeError::typ()
            .with_message(format!("Invalid permissions: {err}"))
            .into()
    })
}

fn permissions_request(api: &ExtensionApi, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let query = permissions_query(args, context)?;
    let message = format!(
        "{} is going to request the following permissions:\n{}\n{}",
        api.manifest.name,
        query.permissions.join("\n"),
        query.origins.join("\n")
    );
    let approved = api
        .state
        .dialogs()
        .map_or(false, |dialogs| dialogs.confirm(&message));
    if approved {
        internal_storage::update(&api.state, &api.id, |storage| {
            storage
                .dynamic_requested_permissions
                .extend(&query.origins, &query.permissions)
        })?;
    }
    Ok(approved.into())
}

fn permissions_contains(api: &ExtensionApi, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let query = permissions_query(args, context)?;
    let stored = internal_storage::load(&api.state, &api.id)?;
    let granted = &stored.dynamic_requested_permissions;
    // the manifest does not tell permissions from origins
    let declared = &api.manifest.permissions;
    let has_origin = |origin: &String| granted.origins.contains(origin) || declared.contains(origin);
    let has_permission =
        |permission: &String| granted.permissions.contains(permission) || declared.contains(permission);
    let contains = query.origins.iter().all(has_origin) && query.permissions.iter().all(has_permission);
    Ok(contains.into())
}

fn permissions_remove(_: &ExtensionApi, _: &[JsValue], _: &mut Context) -> JsResult<JsValue> {
    log::warn!("permissions.remove is not implemented yet.");
    Ok(false.into())
}

fn permissions_get_all(api: &ExtensionApi, _: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let stored = internal_storage::load(&api.state, &api.id)?;
    let all = serde_json::to_value(&stored.dynamic_requested_permissions)
        .map_err(|err| JsNativeError::typ().with_message(err.to_string()))?;
    json_to_js(&all, context)
}

/// Builds the `browser` object of `extension` in the realm `context` has
/// entered.
pub fn create(state: &HostState, extension: &Extension, context: &mut Context) -> JsResult<JsObject> {
    let api = ExtensionApi::new(state, extension);
    let id = api.id.as_str();
    let event = |kind: &str, context: &mut Context| -> JsValue { event_object(state, kind, id, context).into() };

    let downloads = namespace(
        vec![("download", async_method("download", 1, &api, download, context))],
        context,
    )?;
    let runtime = namespace(
        vec![
            ("getURL", sync_method("getURL", 1, &api, get_url, context)),
            ("getManifest", sync_method("getManifest", 0, &api, get_manifest, context)),
            ("sendMessage", sync_method("sendMessage", 2, &api, runtime_send_message, context)),
            ("onMessage", event("runtime.onMessage", context)),
            ("onInstalled", event("runtime.onInstalled", context)),
            ("connect", sync_method("connect", 2, &api, runtime_connect, context)),
            ("onConnect", event("runtime.onConnect", context)),
            ("id", js_string!(id).into()),
        ],
        context,
    )?;
    let tabs = namespace(
        vec![
            ("create", async_method("create", 1, &api, tabs_create, context)),
            ("remove", async_method("remove", 1, &api, tabs_remove, context)),
            ("query", async_method("query", 1, &api, tabs_query, context)),
            ("update", async_method("update", 2, &api, tabs_update, context)),
            ("sendMessage", sync_method("sendMessage", 3, &api, tabs_send_message, context)),
            ("executeScript", async_method("executeScript", 2, &api, tabs_execute_script, context)),
        ],
        context,
    )?;
    let local = plain_object(
        vec![
            ("get", async_method("get", 1, &api, storage_get, context)),
            ("set", async_method("set", 1, &api, storage_set, context)),
            ("remove", async_method("remove", 1, &api, storage_remove, context)),
            ("clear", async_method("clear", 0, &api, storage_clear, context)),
        ],
        context,
    )?;
    let sync = not_implemented_proxy(JsObject::with_object_proto(context.intrinsics()), true, context);
    let on_changed = not_implemented_proxy(JsObject::with_object_proto(context.intrinsics()), true, context);
    let storage = plain_object(
        vec![
            ("local", local.into()),
            ("sync", sync.into()),
            ("onChanged", on_changed.into()),
        ],
        context,
    )?;
    let web_navigation = namespace(
        vec![
            ("onCommitted", event("webNavigation.onCommitted", context)),
            ("onCompleted", event("webNavigation.onCompleted", context)),
            ("onDOMContentLoaded", event("webNavigation.onDOMContentLoaded", context)),
        ],
        context,
    )?;
    let extension_namespace = namespace(
        vec![(
            "getBackgroundPage",
            sync_method("getBackgroundPage", 0, &api, get_background_page, context),
        )],
        context,
    )?;
    let permissions = namespace(
        vec![
            ("request", async_method("request", 1, &api, permissions_request, context)),
            ("contains", async_method("contains", 1, &api, permissions_contains, context)),
            ("remove", async_method("remove", 1, &api, permissions_remove, context)),
            ("getAll", async_method("getAll", 0, &api, permissions_get_all, context)),
        ],
        context,
    )?;

    let browser = plain_object(
        vec![
            ("downloads", downloads),
            ("runtime", runtime),
            ("tabs", tabs),
            ("storage", storage.into()),
            ("webNavigation", web_navigation),
            ("extension", extension_namespace),
            ("permissions", permissions),
        ],
        context,
    )?;
    Ok(not_implemented_proxy(browser, false, context))
}
