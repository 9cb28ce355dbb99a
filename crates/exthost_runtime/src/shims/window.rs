//! `open`, `close` and `Worker` of extension code.
//!
//! `open` and `close` work only shortly after a click, the way popup
//! blockers let them; they turn into tab operations on the host.

use boa_engine::{
    js_string,
    object::{builtins::JsFunction, FunctionObjectBuilder},
    Context, JsArgs, JsObject, JsResult, JsValue, NativeFunction,
};
use exthost_core::value::to_rust_string;
use serde_json::json;

use crate::{environment::debug_mode_url_rewrite, shims::browser::ExtensionApi};

fn has_user_interaction(api: &ExtensionApi) -> bool {
    let window_ms = api.state.config().user_interaction_window_ms;
    api.state.page().has_recent_interaction(window_ms)
}

fn open(_: &JsValue, args: &[JsValue], api: &ExtensionApi, context: &mut Context) -> JsResult<JsValue> {
    if !has_user_interaction(api) {
        log::debug!("open() without a recent click is blocked");
        return Ok(JsValue::null());
    }
    let url = match args.get_or_undefined(0) {
        url if url.is_undefined() => "about:blank".to_string(),
        url => to_rust_string(url, context)?,
    };
    let target = args.get_or_undefined(1);
    let unsupported_target = !target.is_undefined() && to_rust_string(target, context)? != "_blank";
    if unsupported_target || args.get_or_undefined(2).to_boolean() || args.get_or_undefined(3).to_boolean() {
        let rest: Vec<String> = args.iter().skip(1).map(|arg| arg.display().to_string()).collect();
        log::warn!("Unsupported open {url} {}", rest.join(" "));
    }
    if let Err(err) = api.call("browser.tabs.create", vec![json!({ "active": true, "url": url })]) {
        log::error!("{err}");
    }
    Ok(JsValue::null())
}

fn close(_: &JsValue, _: &[JsValue], api: &ExtensionApi, _: &mut Context) -> JsResult<JsValue> {
    if !has_user_interaction(api) {
        log::debug!("close() without a recent click is blocked");
        return Ok(JsValue::undefined());
    }
    let active = api.call("browser.tabs.query", vec![json!({ "active": true })])?;
    match active.get(0).and_then(|tab| tab.get("id")) {
        Some(id) => {
            api.call("browser.tabs.remove", vec![id.clone()])?;
        }
        None => log::warn!("close() found no active tab"),
    }
    Ok(JsValue::undefined())
}

fn construct_worker(this: &JsValue, args: &[JsValue], (api, original): &(ExtensionApi, JsObject), context: &mut Context) -> JsResult<JsValue> {
    let mut args = args.to_vec();
    if let (Some(first), Some(page)) = (args.first_mut(), api.state.page().url()) {
        let url = to_rust_string(first, context)?;
        let rewritten = debug_mode_url_rewrite(&page, &api.id, &url);
        log::debug!("Worker {url} -> {rewritten}");
        *first = js_string!(rewritten).into();
    }
    let new_target = this.as_object().filter(|target| target.is_constructor()).cloned();
    Ok(original.construct(&args, new_target.as_ref(), context)?.into())
}

/// Points `Worker` scripts at the debug server. Only installed in debug
/// mode.
fn worker(api: &ExtensionApi, original: JsObject, context: &mut Context) -> JsFunction {
    FunctionObjectBuilder::new(
        context.realm(),
        NativeFunction::from_copy_closure_with_captures(construct_worker, (api.clone(), original)),
    )
    .name(js_string!("Worker"))
    .length(1)
    .constructor(true)
    .build()
}

/// Installs `open`, `close` and, in debug mode, `Worker` on `global`.
pub fn install(api: &ExtensionApi, global: &JsObject, context: &mut Context) -> JsResult<()> {
    let open = exthost_core::promise::callback("open", 0, api.clone(), open, context);
    let close = exthost_core::promise::callback("close", 0, api.clone(), close, context);
    global.set(js_string!("open"), open, false, context)?;
    global.set(js_string!("close"), close, false, context)?;

    if api.state.is_debug() {
        let original = global.get(js_string!("Worker"), context)?;
        if let Some(original) = original.as_object().filter(|original| original.is_constructor()).cloned() {
            let prototype = original.get(js_string!("prototype"), context)?;
            let enhanced = worker(api, original, context);
            enhanced.set(js_string!("prototype"), prototype, false, context)?;
            global.set(js_string!("Worker"), enhanced, false, context)?;
        }
    }
    Ok(())
}
