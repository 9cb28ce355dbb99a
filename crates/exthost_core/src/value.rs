use boa_engine::{
    object::builtins::{JsArray, JsArrayBuffer, JsFunction, JsPromise},
    Context, JsObject, JsResult, JsString,
};

pub use boa_engine::value::*;

pub trait IntoJs {
    /// Converts a Rust value into a JavaScript value.
    fn into_js(self, context: &mut Context) -> JsValue;
}

macro_rules! impl_into_js_from_into {
    ($($T: ty), *) => {
        $(
            impl IntoJs for $T {
                #[inline]
                fn into_js(self, _context: &mut Context) -> JsValue {
                    self.into()
                }
            }
        )*
    };
}

impl_into_js_from_into!(
    JsValue,
    JsArray,
    JsArrayBuffer,
    JsFunction,
    JsObject,
    JsPromise,
    JsString,
    (),
    f64,
    i32,
    u32,
    bool
);

impl IntoJs for String {
    fn into_js(self, _context: &mut Context) -> JsValue {
        JsString::from(self).into()
    }
}

impl IntoJs for &str {
    fn into_js(self, _context: &mut Context) -> JsValue {
        JsString::from(self).into()
    }
}

impl<T: IntoJs> IntoJs for Option<T> {
    fn into_js(self, context: &mut Context) -> JsValue {
        match self {
            Some(value) => value.into_js(context),
            None => JsValue::null(),
        }
    }
}

impl<T: IntoJs> IntoJs for Vec<T> {
    fn into_js(self, context: &mut Context) -> JsValue {
        let values: Vec<JsValue> = self.into_iter().map(|v| v.into_js(context)).collect();
        JsArray::from_iter(values, context).into()
    }
}

/// Converts a JSON value into its JavaScript counterpart, `undefined` for
/// values the engine rejects.
pub fn json_to_js(value: &serde_json::Value, context: &mut Context) -> JsResult<JsValue> {
    JsValue::from_json(value, context)
}

/// Converts a JavaScript value to JSON; `undefined` becomes `null`.
pub fn js_to_json(value: &JsValue, context: &mut Context) -> JsResult<serde_json::Value> {
    if value.is_undefined() {
        return Ok(serde_json::Value::Null);
    }
    value.to_json(context)
}

/// `String(value)`, as a Rust string.
pub fn to_rust_string(value: &JsValue, context: &mut Context) -> JsResult<String> {
    Ok(value.to_string(context)?.to_std_string_escaped())
}

/// Reads `object[key]` as a Rust string, `None` when the property is
/// `undefined` or `null`.
pub fn get_string(object: &JsObject, key: &str, context: &mut Context) -> JsResult<Option<String>> {
    let value = object.get(JsString::from(key), context)?;
    if value.is_null_or_undefined() {
        return Ok(None);
    }
    to_rust_string(&value, context).map(Some)
}
