//! `chrome`: the callback flavour of `browser`.
//!
//! `downloads`, `permissions`, `storage.local` and `tabs` take a trailing
//! callback instead of returning a promise. A failure is reported through
//! `chrome.runtime.lastError` while the callback runs; when the callback
//! never reads it the failure is thrown.

use boa_engine::{
    js_string,
    object::builtins::JsPromise,
    property::PropertyDescriptor,
    Context, JsArgs, JsError, JsObject, JsResult, JsValue,
};
use boa_gc::{Finalize, Gc, GcRefCell, Trace};
use exthost_core::{
    promise,
    reflect,
    value::to_rust_string,
};

/// Namespaces converted to callbacks, as paths into `browser`.
const CALLBACK_NAMESPACES: [&[&str]; 4] = [&["downloads"], &["permissions"], &["storage", "local"], &["tabs"]];

/// Namespaces shared with `browser` as they are.
const SHARED_NAMESPACES: [&str; 3] = ["runtime", "webNavigation", "extension"];

#[derive(Trace, Finalize, Clone)]
struct Settle {
    runtime: JsObject,
    callback: Option<JsObject>,
}

impl Settle {
    fn clear_last_error(&self, context: &mut Context) -> JsResult<()> {
        self.runtime.define_property_or_throw(
            js_string!("lastError"),
            PropertyDescriptor::builder()
                .value(JsValue::undefined())
                .writable(true)
                .enumerable(false)
                .configurable(true),
            context,
        )?;
        Ok(())
    }

    fn call(&self, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        match &self.callback {
            Some(callback) => callback.call(&JsValue::undefined(), args, context),
            None => Ok(JsValue::undefined()),
        }
    }
}

fn on_success(_: &JsValue, args: &[JsValue], settle: &Settle, context: &mut Context) -> JsResult<JsValue> {
    settle.clear_last_error(context)?;
    settle.call(&[args.get_or_undefined(0).clone()], context)
}

fn on_error(_: &JsValue, args: &[JsValue], settle: &Settle, context: &mut Context) -> JsResult<JsValue> {
    let message = to_rust_string(args.get_or_undefined(0), context)?;
    let checked = Gc::new(GcRefCell::new(false));
    let getter = promise::callback(
        "lastError",
        0,
        (checked.clone(), message.clone()),
        |_, _, (checked, message): &(Gc<GcRefCell<bool>>, String), context| {
            *checked.borrow_mut() = true;
            let error = JsObject::with_object_proto(context.intrinsics());
            error.create_data_property_or_throw(js_string!("message"), js_string!(message.as_str()), context)?;
            Ok(error.into())
        },
        context,
    );
    let setter = promise::callback("lastError", 1, (), |_, _, _: &(), _| Ok(JsValue::undefined()), context);
    settle.runtime.define_property_or_throw(
        js_string!("lastError"),
        PropertyDescriptor::builder()
            .get(getter)
            .set(setter)
            .enumerable(true)
            .configurable(true),
        context,
    )?;

    let result = settle.call(&[], context);
    let read = *checked.borrow();
    settle.clear_last_error(context)?;
    result?;
    if !read {
        return Err(JsError::from_opaque(js_string!(message).into()));
    }
    Ok(JsValue::undefined())
}

fn callback_style(_: &JsValue, args: &[JsValue], (runtime, method): &(JsObject, JsObject), context: &mut Context) -> JsResult<JsValue> {
    let (callback, rest) = match args.split_last() {
        Some((last, rest)) if last.is_callable() => (last.as_object().cloned(), rest),
        _ => (None, args),
    };
    let result = match method.call(&JsValue::undefined(), rest, context) {
        Ok(value) => JsPromise::resolve(value, context),
        Err(err) => JsPromise::reject(err, context),
    };
    let settle = Settle {
        runtime: runtime.clone(),
        callback,
    };
    let fulfilled = promise::callback("", 1, settle.clone(), on_success, context);
    let rejected = promise::callback("", 1, settle, on_error, context);
    promise::then(&result.into(), Some(fulfilled), Some(rejected), context)?;
    Ok(JsValue::undefined())
}

fn lookup(root: &JsObject, path: &[&str], context: &mut Context) -> JsResult<Option<JsObject>> {
    let mut current = root.clone();
    for name in path {
        let next = current.get(js_string!(*name), context)?;
        let Some(next) = next.as_object().cloned() else {
            return Ok(None);
        };
        current = next;
    }
    Ok(Some(current))
}

fn convert_all(from: &JsObject, to: &JsObject, runtime: &JsObject, context: &mut Context) -> JsResult<()> {
    for key in reflect::own_keys(from, context)? {
        let value = from.get(key.clone(), context)?;
        let value = match value.as_object() {
            Some(method) if method.is_callable() => promise::callback(
                &key.to_string(),
                0,
                (runtime.clone(), method.clone()),
                callback_style,
                context,
            )
            .into(),
            _ => value,
        };
        to.create_data_property_or_throw(key, value, context)?;
    }
    Ok(())
}

/// Builds `chrome` over `browser` in the realm `context` has entered.
pub fn create(browser: &JsObject, context: &mut Context) -> JsResult<JsObject> {
    let chrome = JsObject::with_object_proto(context.intrinsics());
    for key in reflect::own_keys(browser, context)? {
        let namespace = JsObject::with_object_proto(context.intrinsics());
        chrome.create_data_property_or_throw(key, namespace, context)?;
    }

    let Some(runtime) = lookup(browser, &["runtime"], context)? else {
        return Ok(chrome);
    };
    for name in SHARED_NAMESPACES {
        let shared = browser.get(js_string!(name), context)?;
        chrome.create_data_property_or_throw(js_string!(name), shared, context)?;
    }
    Settle {
        runtime: runtime.clone(),
        callback: None,
    }
    .clear_last_error(context)?;

    for path in CALLBACK_NAMESPACES {
        let Some(from) = lookup(browser, path, context)? else {
            continue;
        };
        let (parent, name) = match path {
            [name] => (chrome.clone(), *name),
            [parent, name] => {
                let Some(parent) = lookup(&chrome, &[*parent], context)? else {
                    continue;
                };
                (parent, *name)
            }
            _ => continue,
        };
        let to = JsObject::with_object_proto(context.intrinsics());
        convert_all(&from, &to, &runtime, context)?;
        parent.create_data_property_or_throw(js_string!(name), to, context)?;
    }
    Ok(chrome)
}
