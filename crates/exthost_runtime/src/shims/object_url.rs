//! `URL.createObjectURL` / `URL.revokeObjectURL` that also tell the host,
//! so `blob:` URLs minted by an extension can be downloaded or opened
//! outside the page.

use boa_engine::{js_string, Context, JsArgs, JsObject, JsResult, JsValue};
use exthost_api::url::blob_url_uuid;
use exthost_core::value::to_rust_string;

use crate::{envelope::Envelope, shims::browser::ExtensionApi};

type Captures = (ExtensionApi, JsObject);

fn create_object_url(this: &JsValue, args: &[JsValue], (api, original): &Captures, context: &mut Context) -> JsResult<JsValue> {
    let url = original.call(this, args, context)?;
    let text = to_rust_string(&url, context)?;
    let Some(uuid) = blob_url_uuid(&text) else {
        return Ok(url);
    };
    match Envelope::from_js(args.get_or_undefined(0), context) {
        Ok(envelope) => {
            if let Err(err) = api.state.rpc().create_object_url(&api.id, uuid, &envelope) {
                log::error!("{err}");
            }
        }
        Err(_) => log::debug!("{text} does not hold a Blob, the host is not told"),
    }
    Ok(url)
}

fn revoke_object_url(this: &JsValue, args: &[JsValue], (api, original): &Captures, context: &mut Context) -> JsResult<JsValue> {
    original.call(this, args, context)?;
    let url = to_rust_string(args.get_or_undefined(0), context)?;
    if let Some(uuid) = blob_url_uuid(&url) {
        if let Err(err) = api.state.rpc().revoke_object_url(&api.id, uuid) {
            log::error!("{err}");
        }
    }
    Ok(JsValue::undefined())
}

/// Replaces the two statics of the `URL` constructor on `global`.
pub fn install(api: &ExtensionApi, global: &JsObject, context: &mut Context) -> JsResult<()> {
    let url_class = global.get(js_string!("URL"), context)?;
    let Some(url_class) = url_class.as_object().cloned() else {
        log::warn!("No URL constructor to enhance");
        return Ok(());
    };
    let methods: [(&str, fn(&JsValue, &[JsValue], &Captures, &mut Context) -> JsResult<JsValue>); 2] = [
        ("createObjectURL", create_object_url),
        ("revokeObjectURL", revoke_object_url),
    ];
    for (name, method) in methods {
        let original = url_class.get(js_string!(name), context)?;
        let Some(original) = original.as_object().filter(|original| original.is_callable()).cloned() else {
            continue;
        };
        let enhanced = exthost_core::promise::callback(name, 1, (api.clone(), original), method, context);
        url_class.set(js_string!(name), enhanced, true, context)?;
    }
    Ok(())
}
