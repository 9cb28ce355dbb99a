//! `fetch` for extension code.
//!
//! Extension URLs are answered from the extension's resources; anything
//! else is fetched by the host, outside the page's same-origin rules.

use boa_engine::{js_string, object::builtins::JsFunction, Context, JsArgs, JsObject, JsResult, JsValue};
use exthost_api::{blob::Blob, response::Response, url::parse_url};
use exthost_core::{
    promise,
    value::{get_string, to_rust_string},
};
use serde_json::Value;

use crate::{
    envelope::Envelope,
    resources::is_extension_url,
    shims::browser::ExtensionApi,
    Error,
};

struct Request {
    method: String,
    url: String,
}

fn request(args: &[JsValue], context: &mut Context) -> JsResult<Request> {
    let input = args.get_or_undefined(0);
    let url = match input.as_object() {
        Some(input) if !input.is_callable() => match get_string(input, "url", context)? {
            Some(url) => url,
            None => to_rust_string(&input.clone().into(), context)?,
        },
        _ => to_rust_string(input, context)?,
    };
    let method = match args.get_or_undefined(1).as_object() {
        Some(init) => get_string(init, "method", context)?,
        None => None,
    };
    let base = match context.global_object().get(js_string!("location"), context)?.as_object() {
        Some(location) => get_string(location, "href", context)?,
        None => None,
    };
    let url = parse_url(&url, base.as_deref())
        .map(|url| url.to_string())
        .unwrap_or(url);
    Ok(Request {
        method: method.unwrap_or_else(|| "GET".to_string()).to_uppercase(),
        url,
    })
}

/// `Response.prototype` of the realm `context` has entered, so responses
/// pass `instanceof Response` on the caller's side.
fn response_prototype(context: &mut Context) -> JsResult<Option<JsObject>> {
    let class = context.global_object().get(js_string!("Response"), context)?;
    let Some(class) = class.as_object() else {
        return Ok(None);
    };
    Ok(class.get(js_string!("prototype"), context)?.as_object().cloned())
}

fn respond(response: Response, context: &mut Context) -> JsResult<JsValue> {
    let prototype = response_prototype(context)?;
    Ok(response.into_object(prototype, context)?.to_inner())
}

fn local(api: &ExtensionApi, request: &Request, context: &mut Context) -> JsResult<JsValue> {
    let Some(extension) = api.state.extension(&api.id) else {
        return respond(Response::new(404, None, Blob::from_bytes(b"Not found".to_vec(), ""))?, context);
    };
    let response = match extension.resources().get(&request.url)? {
        Some(text) => Response::new(200, None, Blob::from_bytes(text.into_bytes(), "text/plain;charset=utf-8"))?,
        None => Response::new(404, None, Blob::from_bytes(b"Not found".to_vec(), "text/plain;charset=utf-8"))?,
    };
    respond(response.with_url(request.url.clone()), context)
}

fn remote(api: &ExtensionApi, request: &Request, context: &mut Context) -> JsResult<JsValue> {
    let result = api
        .state
        .rpc()
        .fetch(&api.id, &request.method, &request.url)
        .map_err(Error::from)?;
    let status = result.get("status").and_then(Value::as_u64).unwrap_or(200);
    let status_text = result
        .get("statusText")
        .and_then(Value::as_str)
        .map(str::to_string);
    let body = match result.get("data") {
        Some(data) => Envelope::from_json(data)?.decode()?.into_blob(),
        None => Blob::from_bytes(Vec::new(), ""),
    };
    let status = u16::try_from(status).unwrap_or(500);
    let response = Response::new(status, status_text, body)?.with_url(request.url.clone());
    respond(response, context)
}

fn fetch(_: &JsValue, args: &[JsValue], api: &ExtensionApi, context: &mut Context) -> JsResult<JsValue> {
    let result = request(args, context).and_then(|request| {
        log::debug!("fetch {} {}", request.method, request.url);
        if is_extension_url(&request.url) {
            local(api, &request, context)
        } else {
            remote(api, &request, context)
        }
    });
    Ok(promise::settled(result, context).into())
}

/// The `fetch` function of an extension.
pub fn create(api: &ExtensionApi, context: &mut Context) -> JsFunction {
    promise::callback("fetch", 1, api.clone(), fetch, context)
}
