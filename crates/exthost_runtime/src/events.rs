//! `browser.*.onX` event objects backed by the host's listener pools.

use boa_engine::{
    js_string, object::ObjectInitializer, Context, JsArgs, JsNativeError, JsObject, JsResult,
    JsValue, NativeFunction,
};

use crate::state::HostState;

type Captures = (HostState, String, String);

fn listener(args: &[JsValue]) -> JsResult<JsObject> {
    match args.get_or_undefined(0).as_object() {
        Some(callback) if callback.is_callable() => Ok(callback.clone()),
        _ => Err(JsNativeError::typ()
            .with_message("Listener must be function")
            .into()),
    }
}

fn add_listener(_: &JsValue, args: &[JsValue], (state, kind, id): &Captures, _: &mut Context) -> JsResult<JsValue> {
    state.add_listener(kind, id, listener(args)?);
    Ok(JsValue::undefined())
}

fn remove_listener(_: &JsValue, args: &[JsValue], (state, kind, id): &Captures, _: &mut Context) -> JsResult<JsValue> {
    state.remove_listener(kind, id, &listener(args)?);
    Ok(JsValue::undefined())
}

fn has_listener(_: &JsValue, args: &[JsValue], (state, kind, id): &Captures, _: &mut Context) -> JsResult<JsValue> {
    Ok(state.has_listener(kind, id, &listener(args)?).into())
}

/// `{ addListener, removeListener, hasListener }` over the pool `kind` of
/// `id`, built in the realm `context` has entered.
pub fn event_object(state: &HostState, kind: &str, id: &str, context: &mut Context) -> JsObject {
    let captures: Captures = (state.clone(), kind.to_string(), id.to_string());
    ObjectInitializer::new(context)
        .function(
            NativeFunction::from_copy_closure_with_captures(add_listener, captures.clone()),
            js_string!("addListener"),
            1,
        )
        .function(
            NativeFunction::from_copy_closure_with_captures(remove_listener, captures.clone()),
            js_string!("removeListener"),
            1,
        )
        .function(
            NativeFunction::from_copy_closure_with_captures(has_listener, captures),
            js_string!("hasListener"),
            1,
        )
        .build()
}
