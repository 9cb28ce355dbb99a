//! JavaScript's `Blob` API.
//!
//! Besides the script-facing class, [`Blob`] is what object URLs point at
//! and what the host bridge serializes when a blob crosses to the native
//! side, so its bytes and MIME type are reachable from Rust.
//!
//! More information:
//!  - [MDN documentation][mdn]
//!  - [W3C `File` specification][spec]
//!
//! [mdn]: https://developer.mozilla.org/en-US/docs/Web/API/Blob
//! [spec]: https://w3c.github.io/FileAPI/

use std::cmp::{max, min};

use boa_engine::{
    js_string,
    object::builtins::{JsArray, JsArrayBuffer, JsPromise, JsTypedArray},
    property::Attribute,
    value::TryFromJs,
    Context, JsArgs, JsData, JsError, JsNativeError, JsObject, JsResult, JsString, JsValue,
    NativeFunction,
};
use boa_gc::{Finalize, Trace};
use exthost_core::{
    accessor,
    native::{register_global_class, Accessor, ClassBuilder, JsNativeObject, NativeClass},
    value::IntoJs,
};

#[derive(Trace, Finalize, JsData, Clone, Debug, PartialEq, Eq, Default)]
pub struct Blob {
    bytes: Vec<u8>,
    type_: String,
}

fn normalize_type(t: &str) -> String {
    // A type with characters outside U+0020..U+007E is dropped entirely.
    if t.chars().any(|c| !('\u{0020}'..='\u{007E}').contains(&c)) {
        return String::new();
    }
    t.to_ascii_lowercase()
}

// https://w3c.github.io/FileAPI/#convert-line-endings-to-native
fn convert_line_endings_to_native(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n")
}

/// Copies the bytes viewed by an `ArrayBuffer` or a typed array.
pub fn buffer_source_bytes(object: &JsObject, context: &mut Context) -> JsResult<Option<Vec<u8>>> {
    if let Ok(buffer) = JsArrayBuffer::from_object(object.clone()) {
        return Ok(buffer.data().map(|data| data.to_vec()));
    }
    if let Ok(array) = JsTypedArray::from_object(object.clone()) {
        let offset = array.byte_offset(context)?;
        let length = array.byte_length(context)?;
        let Some(buffer) = array.buffer(context)?.as_object().cloned() else {
            return Ok(None);
        };
        let buffer = JsArrayBuffer::from_object(buffer)?;
        return Ok(buffer
            .data()
            .and_then(|data| data.get(offset..offset + length).map(<[u8]>::to_vec)));
    }
    Ok(None)
}

pub enum BlobPart {
    Bytes(Vec<u8>),
    Blob(Blob),
    String(String),
}

impl TryFromJs for BlobPart {
    fn try_from_js(value: &JsValue, context: &mut Context) -> JsResult<Self> {
        let Some(object) = value.as_object() else {
            return Ok(Self::String(value.to_string(context)?.to_std_string_escaped()));
        };
        if let Some(blob) = object.downcast_ref::<Blob>() {
            return Ok(Self::Blob(blob.clone()));
        }
        if let Some(bytes) = buffer_source_bytes(object, context)? {
            return Ok(Self::Bytes(bytes));
        }
        Ok(Self::String(value.to_string(context)?.to_std_string_escaped()))
    }
}

pub struct BlobParts(Vec<BlobPart>);

impl TryFromJs for BlobParts {
    fn try_from_js(value: &JsValue, context: &mut Context) -> JsResult<Self> {
        let Some(object) = value.as_object() else {
            return Err(JsNativeError::typ()
                .with_message("Failed to construct 'Blob': The provided value cannot be converted to a sequence.")
                .into());
        };
        let array = JsArray::from_object(object.clone())?;
        let mut parts = Vec::new();
        for i in 0..array.length(context)? {
            parts.push(array.get(i, context)?.try_js_into(context)?);
        }
        Ok(Self(parts))
    }
}

#[derive(Default, Clone, Copy, PartialEq, Eq)]
pub enum Endings {
    #[default]
    Transparent,
    Native,
}

#[derive(Default, Clone)]
pub struct BlobPropertyBag {
    type_: Option<String>,
    endings: Endings,
}

impl TryFromJs for BlobPropertyBag {
    fn try_from_js(value: &JsValue, context: &mut Context) -> JsResult<Self> {
        let Some(obj) = value.as_object() else {
            return Ok(Self::default());
        };

        let type_ = exthost_core::value::get_string(obj, "type", context)?;
        let endings = match exthost_core::value::get_string(obj, "endings", context)?.as_deref() {
            None | Some("transparent") => Endings::Transparent,
            Some("native") => Endings::Native,
            Some(_) => {
                return Err(JsError::from_native(
                    JsNativeError::typ().with_message("Expected either 'transparent' or 'native'"),
                ))
            }
        };

        Ok(Self { type_, endings })
    }
}

impl Blob {
    pub fn from_bytes(bytes: Vec<u8>, type_: &str) -> Self {
        Self {
            bytes,
            type_: normalize_type(type_),
        }
    }

    // https://w3c.github.io/FileAPI/#constructorBlob
    pub fn new(parts: Option<BlobParts>, options: BlobPropertyBag) -> Self {
        let mut bytes = Vec::new();
        for part in parts.map(|BlobParts(parts)| parts).unwrap_or_default() {
            match part {
                BlobPart::String(s) if options.endings == Endings::Native => {
                    bytes.extend(convert_line_endings_to_native(&s).into_bytes())
                }
                BlobPart::String(s) => bytes.extend(s.into_bytes()),
                BlobPart::Bytes(b) => bytes.extend(b),
                BlobPart::Blob(blob) => bytes.extend(blob.bytes),
            }
        }
        let type_ = options.type_.as_deref().map(normalize_type).unwrap_or_default();
        Self { bytes, type_ }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn type_(&self) -> &str {
        &self.type_
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    // https://w3c.github.io/FileAPI/#slice-blob
    pub fn slice(&self, start: Option<i64>, end: Option<i64>, content_type: Option<String>) -> Blob {
        let size = self.bytes.len() as i64;
        let relative = |position: i64| {
            if position < 0 {
                max(size + position, 0)
            } else {
                min(position, size)
            }
        };
        let start = start.map_or(0, relative);
        let end = end.map_or(size, relative);
        let span = max(end - start, 0) as usize;
        let start = start as usize;

        Blob {
            bytes: self.bytes[start..start + span].to_vec(),
            type_: content_type.as_deref().map(normalize_type).unwrap_or_default(),
        }
    }

    /// Wraps `self` in a `Blob` instance of the current realm.
    pub fn into_object(self, context: &mut Context) -> JsResult<JsNativeObject<Blob>> {
        JsNativeObject::new::<BlobClass>(self, context)
    }
}

pub struct BlobClass;

fn to_i64(value: &JsValue, context: &mut Context) -> JsResult<Option<i64>> {
    if value.is_undefined() {
        return Ok(None);
    }
    let number = value.to_integer_or_infinity(context)?;
    Ok(Some(number.clamp_finite(-(1 << 53), 1 << 53)))
}

impl BlobClass {
    fn size(context: &mut Context) -> Accessor {
        accessor!(context, Blob, "size", get:((blob, _context) => Ok((blob.size() as f64).into())))
    }

    fn type_(context: &mut Context) -> Accessor {
        accessor!(context, Blob, "type", get:((blob, context) => Ok(blob.type_().into_js(context))))
    }

    fn text(this: &JsValue, _: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        let blob = JsNativeObject::<Blob>::try_from(this.clone())?;
        let text = JsString::from(blob.deref().text());
        Ok(JsPromise::resolve(text, context).into())
    }

    fn array_buffer(this: &JsValue, _: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        let blob = JsNativeObject::<Blob>::try_from(this.clone())?;
        let bytes = blob.deref().bytes.clone();
        let buffer = JsArrayBuffer::from_byte_block(bytes, context)?;
        Ok(JsPromise::resolve(buffer, context).into())
    }

    fn slice(this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        let blob = JsNativeObject::<Blob>::try_from(this.clone())?;
        let start = to_i64(args.get_or_undefined(0), context)?;
        let end = to_i64(args.get_or_undefined(1), context)?;
        let content_type = match args.get_or_undefined(2) {
            value if value.is_undefined() => None,
            value => Some(value.to_string(context)?.to_std_string_escaped()),
        };
        let slice = blob.deref().slice(start, end, content_type);
        Ok(slice.into_object(context)?.to_inner())
    }
}

impl NativeClass for BlobClass {
    type Instance = Blob;

    const NAME: &'static str = "Blob";

    fn data_constructor(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<Blob> {
        let parts: Option<BlobParts> = args.get_or_undefined(0).try_js_into(context)?;
        let options: BlobPropertyBag = args.get_or_undefined(1).try_js_into(context)?;
        Ok(Blob::new(parts, options))
    }

    fn init(class: &mut ClassBuilder<'_>) -> JsResult<()> {
        let size = Self::size(class.context());
        let type_ = Self::type_(class.context());

        class
            .accessor(js_string!("size"), size, Attribute::CONFIGURABLE)
            .accessor(js_string!("type"), type_, Attribute::CONFIGURABLE)
            .method(js_string!("text"), 0, NativeFunction::from_fn_ptr(Self::text))
            .method(
                js_string!("arrayBuffer"),
                0,
                NativeFunction::from_fn_ptr(Self::array_buffer),
            )
            .method(js_string!("slice"), 0, NativeFunction::from_fn_ptr(Self::slice));

        Ok(())
    }
}

pub struct BlobApi;

impl exthost_core::Api for BlobApi {
    fn init(self, context: &mut Context) -> JsResult<()> {
        register_global_class::<BlobClass>(context)
    }
}

#[cfg(test)]
mod test {
    use boa_engine::{js_string, Context, JsValue, Source};
    use exthost_core::{native::JsNativeObject, Api};

    use super::*;

    fn context() -> Context {
        let mut context = Context::default();
        BlobApi.init(&mut context).unwrap();
        context
    }

    #[test]
    fn concatenates_parts() {
        let context = &mut context();
        let blob = context
            .eval(Source::from_bytes(
                "new Blob(['ab', new Uint8Array([99, 100]), new Blob(['e'])], { type: 'Text/Plain' })",
            ))
            .unwrap();
        let blob = JsNativeObject::<Blob>::try_from(blob).unwrap();

        assert_eq!(blob.deref().bytes(), b"abcde");
        assert_eq!(blob.deref().type_(), "text/plain");
    }

    #[test]
    fn slices_with_negative_offsets() {
        let blob = Blob::from_bytes(b"hello world".to_vec(), "");

        assert_eq!(blob.slice(Some(-5), None, None).bytes(), b"world");
        assert_eq!(blob.slice(Some(3), Some(1), None).size(), 0);
    }

    #[test]
    fn text_resolves_to_the_content() {
        let context = &mut context();
        let value = context
            .eval(Source::from_bytes(
                "let out; new Blob(['a\\r\\nb'], { endings: 'native' }).text().then(t => out = t); out",
            ))
            .unwrap();
        assert!(value.is_undefined());
        context.run_jobs();

        let out = context.eval(Source::from_bytes("out")).unwrap();
        assert_eq!(out, JsValue::from(js_string!("a\nb")));
    }
}
