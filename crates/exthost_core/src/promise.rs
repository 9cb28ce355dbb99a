//! Promise plumbing for native code.
//!
//! Chaining goes through the promise's own `then`, the way script would, so
//! thenables from any realm are handled alike.

use boa_engine::{
    builtins::promise::PromiseState,
    js_string,
    object::builtins::{JsArray, JsFunction, JsPromise},
    Context, JsError, JsNativeError, JsObject, JsResult, JsValue, NativeFunction,
};
use boa_gc::Trace;

/// `value.then(on_fulfilled, on_rejected)`.
pub fn then(
    value: &JsValue,
    on_fulfilled: Option<JsFunction>,
    on_rejected: Option<JsFunction>,
    context: &mut Context,
) -> JsResult<JsValue> {
    let Some(object) = value.as_object() else {
        return Err(JsNativeError::typ()
            .with_message("not a thenable")
            .into());
    };
    let then = object.get(js_string!("then"), context)?;
    let Some(then) = then.as_callable() else {
        return Err(JsNativeError::typ()
            .with_message("not a thenable")
            .into());
    };
    let on_fulfilled = on_fulfilled.map_or_else(JsValue::undefined, JsValue::from);
    let on_rejected = on_rejected.map_or_else(JsValue::undefined, JsValue::from);
    then.call(value, &[on_fulfilled, on_rejected], context)
}

/// Whether `value` is an object with a callable `then`.
pub fn is_thenable(value: &JsValue, context: &mut Context) -> JsResult<bool> {
    match value.as_object() {
        Some(object) => Ok(object.get(js_string!("then"), context)?.is_callable()),
        None => Ok(false),
    }
}

/// `Promise.all(values)` with the current realm's `Promise`.
pub fn all(values: Vec<JsValue>, context: &mut Context) -> JsResult<JsValue> {
    let promise = context.intrinsics().constructors().promise().constructor();
    let all = promise.get(js_string!("all"), context)?;
    let Some(all) = all.as_callable() else {
        return Err(JsNativeError::typ()
            .with_message("Promise.all is not callable")
            .into());
    };
    let values = JsArray::from_iter(values, context);
    all.call(&promise.into(), &[values.into()], context)
}

/// A promise settled with `result`.
pub fn settled(result: JsResult<JsValue>, context: &mut Context) -> JsPromise {
    match result {
        Ok(value) => JsPromise::resolve(value, context),
        Err(err) => JsPromise::reject(err, context),
    }
}

/// The settled outcome of `value`: non-promises count as fulfilled, pending
/// promises yield `None`.
pub fn state(value: &JsValue) -> Option<Result<JsValue, JsValue>> {
    let Some(object) = value.as_promise() else {
        return Some(Ok(value.clone()));
    };
    let promise = JsPromise::from_object(object.clone()).ok()?;
    match promise.state() {
        PromiseState::Pending => None,
        PromiseState::Fulfilled(value) => Some(Ok(value)),
        PromiseState::Rejected(reason) => Some(Err(reason)),
    }
}

/// A callable built from a capturing native closure.
pub fn callback<T, F>(name: &str, length: usize, captures: T, f: F, context: &mut Context) -> JsFunction
where
    T: Trace + 'static,
    F: Fn(&JsValue, &[JsValue], &T, &mut Context) -> JsResult<JsValue> + Copy + 'static,
{
    boa_engine::object::FunctionObjectBuilder::new(
        context.realm(),
        NativeFunction::from_copy_closure_with_captures(f, captures),
    )
    .name(js_string!(name))
    .length(length)
    .build()
}

/// Converts a rejection reason back into an error.
pub fn reason_to_error(reason: JsValue) -> JsError {
    JsError::from_opaque(reason)
}

/// Invokes `callback` once `value` settles, or right away when it already
/// has. Returns whatever the callback (or the chained promise) produced.
pub fn when_settled<T>(
    value: JsValue,
    captures: T,
    on_settled: fn(Result<JsValue, JsValue>, &T, &mut Context) -> JsResult<JsValue>,
    context: &mut Context,
) -> JsResult<JsValue>
where
    T: Trace + Clone + 'static,
{
    if let Some(outcome) = state(&value) {
        return on_settled(outcome, &captures, context);
    }
    let fulfilled = callback(
        "",
        1,
        (captures.clone(), Handler(on_settled)),
        |_, args, (captures, handler), context| {
            let value = args.first().cloned().unwrap_or_default();
            (handler.0)(Ok(value), captures, context)
        },
        context,
    );
    let rejected = callback(
        "",
        1,
        (captures, Handler(on_settled)),
        |_, args, (captures, handler), context| {
            let reason = args.first().cloned().unwrap_or_default();
            (handler.0)(Err(reason), captures, context)
        },
        context,
    );
    then(&value, Some(fulfilled), Some(rejected), context)
}

/// A plain function pointer carried inside GC captures.
#[derive(boa_gc::Finalize)]
struct Handler<T>(fn(Result<JsValue, JsValue>, &T, &mut Context) -> JsResult<JsValue>);

impl<T> Clone for Handler<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handler<T> {}

// SAFETY: a function pointer holds no GC pointers.
unsafe impl<T> Trace for Handler<T> {
    boa_gc::empty_trace!();
}

/// Unwraps `object` into a promise when it is one.
pub fn as_promise(object: &JsObject) -> Option<JsPromise> {
    JsPromise::from_object(object.clone()).ok()
}

#[cfg(test)]
mod test {
    use boa_engine::{Context, Source};

    use super::*;

    #[test]
    fn reads_settled_states() {
        let context = &mut Context::default();
        let fulfilled = context.eval(Source::from_bytes("Promise.resolve(1)")).unwrap();
        let pending = context.eval(Source::from_bytes("new Promise(() => {})")).unwrap();

        assert_eq!(state(&fulfilled), Some(Ok(JsValue::from(1))));
        assert_eq!(state(&pending), None);
        assert_eq!(state(&JsValue::from(2)), Some(Ok(JsValue::from(2))));
    }

    #[test]
    fn runs_callbacks_on_settlement() {
        let context = &mut Context::default();
        let value = context
            .eval(Source::from_bytes("globalThis.p = new Promise(r => globalThis.resolve = r); p"))
            .unwrap();

        when_settled(
            value,
            (),
            |outcome, _, context| {
                let value = outcome.unwrap_or_default();
                context
                    .global_object()
                    .set(js_string!("seen"), value, true, context)?;
                Ok(JsValue::undefined())
            },
            context,
        )
        .unwrap();
        context.eval(Source::from_bytes("resolve(7)")).unwrap();
        context.run_jobs();

        let seen = context.eval(Source::from_bytes("seen")).unwrap();
        assert_eq!(seen, JsValue::from(7));
    }
}
