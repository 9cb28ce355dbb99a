//! `atob` and `btoa`.

use base64::{engine::general_purpose::STANDARD, Engine};
use boa_engine::{
    js_string, Context, JsArgs, JsError, JsNativeError, JsResult, JsString, JsValue,
    NativeFunction,
};

fn invalid_character(method: &str, reason: &str) -> JsError {
    JsNativeError::error()
        .with_message(format!(
            "InvalidCharacterError: Failed to execute '{method}' on 'Window': {reason}"
        ))
        .into()
}

/// Base64 of a binary string: every code unit must fit in one byte.
pub fn btoa(input: &[u16]) -> JsResult<String> {
    let bytes = input
        .iter()
        .map(|unit| u8::try_from(*unit))
        .collect::<Result<Vec<u8>, _>>()
        .map_err(|_| {
            invalid_character("btoa", "The string to be encoded contains characters outside of the Latin1 range.")
        })?;
    Ok(STANDARD.encode(bytes))
}

/// Decodes forgiving base64 into a binary string (one code unit per byte).
pub fn atob(input: &str) -> JsResult<Vec<u16>> {
    let mut cleaned: String = input.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if cleaned.len() % 4 == 0 {
        while cleaned.ends_with('=') {
            cleaned.pop();
        }
    }
    while cleaned.len() % 4 != 0 {
        cleaned.push('=');
    }
    let bytes = STANDARD
        .decode(cleaned)
        .map_err(|_| invalid_character("atob", "The string to be decoded is not correctly encoded."))?;
    Ok(bytes.into_iter().map(u16::from).collect())
}

pub struct EncodingApi;

impl EncodingApi {
    fn btoa(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        let input = args.get_or_undefined(0).to_string(context)?;
        Ok(JsString::from(btoa(input.as_slice())?).into())
    }

    fn atob(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        let input = args.get_or_undefined(0).to_string(context)?;
        let units = atob(&input.to_std_string_escaped())?;
        Ok(JsString::from(units.as_slice()).into())
    }
}

impl exthost_core::Api for EncodingApi {
    fn init(self, context: &mut Context) -> JsResult<()> {
        context.register_global_builtin_callable(
            js_string!("btoa"),
            1,
            NativeFunction::from_fn_ptr(Self::btoa),
        )?;
        context.register_global_builtin_callable(
            js_string!("atob"),
            1,
            NativeFunction::from_fn_ptr(Self::atob),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn units(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    #[test]
    fn encodes_binary_strings() {
        assert_eq!(btoa(&units("hello")).unwrap(), "aGVsbG8=");
        assert!(btoa(&units("€")).is_err());
    }

    #[test]
    fn decodes_without_padding() {
        assert_eq!(atob("aGVsbG8").unwrap(), units("hello"));
        assert_eq!(atob(" aGVs bG8= ").unwrap(), units("hello"));
        assert!(atob("a").is_err());
    }
}
