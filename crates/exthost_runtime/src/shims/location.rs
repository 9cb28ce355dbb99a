//! A `location` that reports the address a debug page stands in for.
//!
//! URL components read and write the overridden address; every write is
//! mirrored into the real page's `?url=` parameter so a reload lands on the
//! same target. Anything else falls through to the real `location`.

use boa_engine::{
    js_string,
    object::builtins::JsProxyBuilder,
    Context, JsArgs, JsData, JsNativeError, JsObject, JsResult, JsValue,
};
use boa_gc::{Finalize, Trace};
use exthost_api::{
    location::Location,
    url::{get_component, parse_url, set_component, UrlData},
};
use exthost_core::{
    promise,
    value::{to_rust_string, IntoJs},
};
use url::Url;

#[derive(Trace, Finalize, JsData)]
struct LocationOverride {
    #[unsafe_ignore_trace]
    url: Url,
    real: JsObject,
}

fn with_override<R>(target: &JsValue, f: impl FnOnce(&mut LocationOverride) -> R) -> JsResult<R> {
    let object = target.as_object().ok_or_else(|| {
        JsNativeError::typ().with_message("location proxy lost its target")
    })?;
    let mut data = object.downcast_mut::<LocationOverride>().ok_or_else(|| {
        JsNativeError::typ().with_message("location proxy lost its target")
    })?;
    Ok(f(&mut *data))
}

fn mirror_into_page(real: &JsObject, target: &Url) {
    if let Some(mut location) = real.downcast_mut::<Location>() {
        let url = location.url_mut();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| key != "url")
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(pairs)
            .append_pair("url", target.as_str());
    }
}

fn navigate(target: &JsObject, href: &str) -> JsResult<()> {
    let mut data = target
        .downcast_mut::<LocationOverride>()
        .ok_or_else(|| JsNativeError::typ().with_message("location proxy lost its target"))?;
    let url = parse_url(href, Some(data.url.as_str())).ok_or_else(|| {
        JsNativeError::syntax().with_message(format!("'{href}' is not a valid URL."))
    })?;
    log::info!("navigate {} -> {url}", data.url);
    mirror_into_page(&data.real, &url);
    data.url = url;
    Ok(())
}

fn get_trap(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let target = args.get_or_undefined(0);
    let key = args.get_or_undefined(1);
    let Some(name) = key.as_string().map(|name| name.to_std_string_escaped()) else {
        let real = with_override(target, |data| data.real.clone())?;
        return real.get(key.to_property_key(context)?, context);
    };
    let (url, real) = with_override(target, |data| (data.url.clone(), data.real.clone()))?;
    if let Some(value) = get_component(&url, &name) {
        return Ok(value.into_js(context));
    }
    let Some(target) = target.as_object().cloned() else {
        return Ok(JsValue::undefined());
    };
    let method = match name.as_str() {
        "toString" | "valueOf" => promise::callback(
            "toString",
            0,
            target,
            |_, _, target: &JsObject, context| {
                let href = with_override(&target.clone().into(), |data| data.url.to_string())?;
                Ok(href.into_js(context))
            },
            context,
        ),
        "assign" | "replace" => promise::callback(
            &name,
            1,
            target,
            |_, args, target: &JsObject, context| {
                let href = to_rust_string(args.get_or_undefined(0), context)?;
                navigate(target, &href)?;
                Ok(JsValue::undefined())
            },
            context,
        ),
        _ => {
            let value = real.get(js_string!(name.as_str()), context)?;
            let Some(function) = value.as_object().filter(|value| value.is_callable()).cloned() else {
                return Ok(value);
            };
            // methods of the real location only accept the real location
            promise::callback(
                &name,
                0,
                (real, function),
                |_, args, (real, function): &(JsObject, JsObject), context| {
                    function.call(&real.clone().into(), args, context)
                },
                context,
            )
        }
    };
    Ok(method.into())
}

fn set_trap(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let target = args.get_or_undefined(0);
    let name = to_rust_string(args.get_or_undefined(1), context)?;
    let value = args.get_or_undefined(2).clone();
    if name == "origin" {
        return Err(JsNativeError::typ()
            .with_message("Cannot set location.origin")
            .into());
    }
    let text = to_rust_string(&value, context)?;
    let (mut url, real) = with_override(target, |data| (data.url.clone(), data.real.clone()))?;
    if set_component(&mut url, &name, &text)? {
        mirror_into_page(&real, &url);
        with_override(target, |data| data.url = url)?;
        return Ok(true.into());
    }
    log::warn!("location.{name} is not emulated, writing it to the real location");
    real.set(js_string!(name.as_str()), value, false, context)?;
    Ok(true.into())
}

/// A `location` object reporting `url`, backed by the page's `real`
/// location.
pub fn location_proxy(url: Url, real: JsObject, context: &mut Context) -> JsResult<JsObject> {
    let target = JsObject::from_proto_and_data(None, LocationOverride { url, real });
    let proxy = JsProxyBuilder::new(target)
        .get(get_trap)
        .set(set_trap)
        .build(context);
    Ok(proxy.into())
}
