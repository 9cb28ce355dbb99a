//! JavaScript's `Response` Web API class, as produced by `fetch`.
//!
//! Bodies are fully buffered: every response the host hands out already
//! carries its bytes, so the body mixin only has to decode them once.
//!
//! More information:
//!  - [MDN documentation][mdn]
//!  - [WHATWG `Response` specification][spec]
//!
//! [mdn]: https://developer.mozilla.org/en-US/docs/Web/API/Response
//! [spec]: https://fetch.spec.whatwg.org/#response-class

use boa_engine::{
    js_string,
    object::builtins::{JsArrayBuffer, JsPromise},
    property::Attribute,
    Context, JsArgs, JsData, JsError, JsNativeError, JsObject, JsResult, JsValue,
    NativeFunction,
};
use boa_gc::{Finalize, Trace};
use exthost_core::{
    accessor,
    native::{register_global_class, Accessor, ClassBuilder, JsNativeObject, NativeClass},
    value::{get_string, IntoJs},
};
use http::StatusCode;

use crate::blob::{Blob, BlobClass, BlobPart};

#[derive(Trace, Finalize, JsData, Clone, Debug)]
pub struct Response {
    status: u16,
    status_text: String,
    url: String,
    body: Blob,
    body_used: bool,
}

impl Response {
    /// Creates a response. `status_text` defaults to the canonical reason
    /// phrase of `status`.
    pub fn new(status: u16, status_text: Option<String>, body: Blob) -> JsResult<Self> {
        let code = StatusCode::from_u16(status).map_err(|_| {
            JsError::from_native(JsNativeError::range().with_message(format!(
                "Failed to construct 'Response': The status provided ({status}) is outside the range [200, 599]."
            )))
        })?;
        let status_text = status_text
            .unwrap_or_else(|| code.canonical_reason().unwrap_or_default().to_string());
        Ok(Self {
            status,
            status_text,
            url: String::new(),
            body,
            body_used: false,
        })
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// Returns a boolean indicating whether the status is in the range 200 – 299.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn body(&self) -> &Blob {
        &self.body
    }

    /// Wraps `self` in a `Response` instance, using `prototype` when given
    /// (responses handed to a sandbox carry the sandbox's prototype).
    pub fn into_object(
        self,
        prototype: Option<JsObject>,
        context: &mut Context,
    ) -> JsResult<JsNativeObject<Response>> {
        JsNativeObject::new_with_proto::<ResponseClass, _>(prototype, self, context)
    }

    /// Marks the body as consumed, failing when it already was.
    fn consume(&mut self) -> JsResult<Blob> {
        if self.body_used {
            return Err(JsNativeError::typ()
                .with_message("Failed to execute on 'Response': body stream already read")
                .into());
        }
        self.body_used = true;
        Ok(self.body.clone())
    }
}

pub struct ResponseClass;

fn body_promise(
    this: &JsValue,
    context: &mut Context,
    read: fn(Blob, &mut Context) -> JsResult<JsValue>,
) -> JsResult<JsValue> {
    let response = JsNativeObject::<Response>::try_from(this.clone())?;
    let body = response.deref_mut().consume();
    let promise = match body.and_then(|body| read(body, context)) {
        Ok(value) => JsPromise::resolve(value, context),
        Err(err) => JsPromise::reject(err, context),
    };
    Ok(promise.into())
}

impl ResponseClass {
    fn status(context: &mut Context) -> Accessor {
        accessor!(context, Response, "status", get:((response, _context) => Ok(u32::from(response.status()).into())))
    }

    fn status_text(context: &mut Context) -> Accessor {
        accessor!(context, Response, "statusText", get:((response, context) => Ok(response.status_text().into_js(context))))
    }

    fn ok(context: &mut Context) -> Accessor {
        accessor!(context, Response, "ok", get:((response, _context) => Ok(response.ok().into())))
    }

    fn url(context: &mut Context) -> Accessor {
        accessor!(context, Response, "url", get:((response, context) => Ok(response.url().into_js(context))))
    }

    fn body_used(context: &mut Context) -> Accessor {
        accessor!(context, Response, "bodyUsed", get:((response, _context) => Ok(response.body_used.into())))
    }

    fn text(this: &JsValue, _: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        body_promise(this, context, |body, context| Ok(body.text().into_js(context)))
    }

    fn json(this: &JsValue, _: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        body_promise(this, context, |body, context| {
            let value: serde_json::Value = serde_json::from_slice(body.bytes()).map_err(|err| {
                JsError::from_native(
                    JsNativeError::syntax().with_message(format!("Unexpected token in JSON: {err}")),
                )
            })?;
            JsValue::from_json(&value, context)
        })
    }

    fn array_buffer(this: &JsValue, _: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        body_promise(this, context, |body, context| {
            Ok(JsArrayBuffer::from_byte_block(body.bytes().to_vec(), context)?.into())
        })
    }

    fn blob(this: &JsValue, _: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        body_promise(this, context, |body, context| {
            Ok(JsNativeObject::new::<BlobClass>(body, context)?.to_inner())
        })
    }
}

impl NativeClass for ResponseClass {
    type Instance = Response;

    const NAME: &'static str = "Response";

    fn data_constructor(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<Response> {
        let body = match args.get_or_undefined(0) {
            value if value.is_null_or_undefined() => Blob::default(),
            value => match value.try_js_into::<BlobPart>(context)? {
                BlobPart::Blob(blob) => blob,
                BlobPart::Bytes(bytes) => Blob::from_bytes(bytes, ""),
                BlobPart::String(text) => Blob::from_bytes(text.into_bytes(), "text/plain;charset=UTF-8"),
            },
        };
        let (status, status_text) = match args.get_or_undefined(1).as_object() {
            Some(init) => {
                let status = init.get(js_string!("status"), context)?;
                let status = if status.is_undefined() {
                    200
                } else {
                    status.to_u32(context)?
                };
                (status, get_string(init, "statusText", context)?)
            }
            None => (200, None),
        };
        let status = u16::try_from(status).unwrap_or(0);
        if !(200..=599).contains(&status) {
            return Err(JsNativeError::range()
                .with_message(format!(
                    "Failed to construct 'Response': The status provided ({status}) is outside the range [200, 599]."
                ))
                .into());
        }
        Response::new(status, Some(status_text.unwrap_or_default()), body)
    }

    fn init(class: &mut ClassBuilder<'_>) -> JsResult<()> {
        let status = Self::status(class.context());
        let status_text = Self::status_text(class.context());
        let ok = Self::ok(class.context());
        let url = Self::url(class.context());
        let body_used = Self::body_used(class.context());

        class
            .accessor(js_string!("status"), status, Attribute::CONFIGURABLE)
            .accessor(js_string!("statusText"), status_text, Attribute::CONFIGURABLE)
            .accessor(js_string!("ok"), ok, Attribute::CONFIGURABLE)
            .accessor(js_string!("url"), url, Attribute::CONFIGURABLE)
            .accessor(js_string!("bodyUsed"), body_used, Attribute::CONFIGURABLE)
            .method(js_string!("text"), 0, NativeFunction::from_fn_ptr(Self::text))
            .method(js_string!("json"), 0, NativeFunction::from_fn_ptr(Self::json))
            .method(
                js_string!("arrayBuffer"),
                0,
                NativeFunction::from_fn_ptr(Self::array_buffer),
            )
            .method(js_string!("blob"), 0, NativeFunction::from_fn_ptr(Self::blob));
        Ok(())
    }
}

pub struct ResponseApi;

impl exthost_core::Api for ResponseApi {
    fn init(self, context: &mut Context) -> JsResult<()> {
        register_global_class::<ResponseClass>(context)
    }
}

#[cfg(test)]
mod test {
    use boa_engine::{js_string, Context, JsValue, Source};
    use exthost_core::Api;

    use super::*;
    use crate::blob::BlobApi;

    fn context() -> Context {
        let mut context = Context::default();
        BlobApi.init(&mut context).unwrap();
        ResponseApi.init(&mut context).unwrap();
        context
    }

    #[test]
    fn fills_in_the_reason_phrase() {
        let response = Response::new(404, None, Blob::default()).unwrap();

        assert_eq!(response.status_text(), "Not Found");
        assert!(!response.ok());
    }

    #[test]
    fn parses_json_bodies_once() {
        let context = &mut context();
        context
            .eval(Source::from_bytes(
                "globalThis.r = new Response('{\"a\": [1, 2]}', { status: 201 });
                 globalThis.out = [];
                 r.json().then(v => out.push(v.a[1]));
                 r.text().catch(e => out.push(e instanceof TypeError));",
            ))
            .unwrap();
        context.run_jobs();

        let out = context
            .eval(Source::from_bytes("[r.status, r.ok, r.bodyUsed, ...out].join()"))
            .unwrap();
        assert_eq!(out, JsValue::from(js_string!("201,true,true,2,true")));
    }

    #[test]
    fn rejects_out_of_range_status() {
        let context = &mut context();

        assert!(context
            .eval(Source::from_bytes("new Response('', { status: 99 })"))
            .is_err());
    }
}
