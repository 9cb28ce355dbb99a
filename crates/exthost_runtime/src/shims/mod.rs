//! What extension code finds on its global object besides the page's own
//! APIs: `browser`, `chrome`, and the Web APIs that behave differently for
//! extensions.

pub mod browser;
pub mod chrome;
pub mod fetch;
pub mod location;
pub mod object_url;
pub mod window;

use boa_engine::{js_string, property::PropertyDescriptor, Context, JsObject, JsResult, JsValue};
use exthost_core::promise;

use crate::{extension::Extension, state::HostState};

use self::browser::ExtensionApi;

/// Installs the extension APIs on the global of `extension`, inside its
/// realm.
pub fn install(state: &HostState, extension: &Extension, context: &mut Context) -> JsResult<()> {
    let context = &mut extension.realm().context_handle(context);
    let global = extension.global().clone();
    let api = ExtensionApi::new(state, extension);

    let browser = browser::create(state, extension, context)?;
    let chrome = chrome::create(&browser, context)?;

    let getter = promise::callback(
        "browser",
        0,
        browser,
        |_, _, browser: &JsObject, _| Ok(browser.clone().into()),
        context,
    );
    // writes are ignored
    let setter = promise::callback("browser", 1, (), |_, _, _: &(), _| Ok(JsValue::undefined()), context);
    global.define_property_or_throw(
        js_string!("browser"),
        PropertyDescriptor::builder()
            .get(getter)
            .set(setter)
            .enumerable(false)
            .configurable(false),
        context,
    )?;
    global.define_property_or_throw(
        js_string!("chrome"),
        PropertyDescriptor::builder()
            .value(chrome)
            .writable(true)
            .enumerable(true)
            .configurable(true),
        context,
    )?;

    object_url::install(&api, &global, context)?;
    let fetch = fetch::create(&api, context);
    global.set(js_string!("fetch"), fetch, false, context)?;
    window::install(&api, &global, context)?;
    log::debug!("extension APIs installed for {}", extension.id());
    Ok(())
}
