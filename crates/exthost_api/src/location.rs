//! The page's `location`.
//!
//! The emulated page never really navigates: `assign`/`replace` and
//! component writes only move the address, `reload` is counted. Both are
//! logged so embedders can see what a script asked for.

use boa_engine::{
    js_string, Context, JsArgs, JsData, JsNativeError, JsResult, JsValue, NativeFunction,
};
use boa_gc::{Finalize, Trace};
use exthost_core::{
    native::{ClassBuilder, JsNativeObject, NativeClass},
    value::{to_rust_string, IntoJs},
};
use url::Url;

use crate::url::{define_components, parse_url, UrlData, COMPONENTS};

#[derive(Trace, Finalize, JsData, Clone, Debug)]
pub struct Location {
    #[unsafe_ignore_trace]
    url: Url,
    reloads: u32,
}

impl Location {
    pub fn new(url: Url) -> Self {
        Self { url, reloads: 0 }
    }

    pub fn reloads(&self) -> u32 {
        self.reloads
    }

    /// Resolves `target` against the current address and moves there.
    pub fn navigate(&mut self, target: &str) -> JsResult<()> {
        let url = parse_url(target, Some(self.url.as_str())).ok_or_else(|| {
            JsNativeError::syntax().with_message(format!("'{target}' is not a valid URL."))
        })?;
        log::info!("navigate {} -> {url}", self.url);
        self.url = url;
        Ok(())
    }
}

impl UrlData for Location {
    fn url(&self) -> &Url {
        &self.url
    }

    fn url_mut(&mut self) -> &mut Url {
        &mut self.url
    }
}

pub struct LocationClass;

impl LocationClass {
    fn to_string(this: &JsValue, _: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        let location = JsNativeObject::<Location>::try_from(this.clone())?;
        let href = location.deref().url.to_string();
        Ok(href.into_js(context))
    }

    fn reload(this: &JsValue, _: &[JsValue], _: &mut Context) -> JsResult<JsValue> {
        let location = JsNativeObject::<Location>::try_from(this.clone())?;
        let mut location = location.deref_mut();
        location.reloads += 1;
        log::info!("reload {}", location.url);
        Ok(JsValue::undefined())
    }

    fn assign(this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        let location = JsNativeObject::<Location>::try_from(this.clone())?;
        let target = to_rust_string(args.get_or_undefined(0), context)?;
        location.deref_mut().navigate(&target)?;
        Ok(JsValue::undefined())
    }
}

impl NativeClass for LocationClass {
    type Instance = Location;

    const NAME: &'static str = "Location";
    const CONSTRUCTIBLE: bool = false;

    fn data_constructor(_: &JsValue, _: &[JsValue], _: &mut Context) -> JsResult<Location> {
        Err(JsNativeError::typ().with_message("Illegal constructor").into())
    }

    fn init(class: &mut ClassBuilder<'_>) -> JsResult<()> {
        define_components::<Location>(class, &COMPONENTS);
        class
            .method(js_string!("toString"), 0, NativeFunction::from_fn_ptr(Self::to_string))
            .method(js_string!("reload"), 0, NativeFunction::from_fn_ptr(Self::reload))
            .method(js_string!("assign"), 1, NativeFunction::from_fn_ptr(Self::assign))
            .method(js_string!("replace"), 1, NativeFunction::from_fn_ptr(Self::assign));
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use boa_engine::{js_string, Context, JsValue, Source};
    use exthost_core::native::{register_global_class, JsNativeObject};

    use super::*;

    fn context_with_location(href: &str) -> Context {
        let mut context = Context::default();
        register_global_class::<LocationClass>(&mut context).unwrap();
        let location = JsNativeObject::new::<LocationClass>(
            Location::new(Url::parse(href).unwrap()),
            &mut context,
        )
        .unwrap();
        context
            .register_global_property(
                js_string!("location"),
                location,
                boa_engine::property::Attribute::all(),
            )
            .unwrap();
        context
    }

    #[test]
    fn reads_and_writes_components() {
        let context = &mut context_with_location("https://example.com:8080/a/b?x=1#top");

        let read = context
            .eval(Source::from_bytes(
                "[location.origin, location.port, location.pathname, location.search, location.hash].join(' ')",
            ))
            .unwrap();
        assert_eq!(
            read,
            JsValue::from(js_string!("https://example.com:8080 8080 /a/b ?x=1 #top"))
        );

        let href = context
            .eval(Source::from_bytes("location.hash = 'bottom'; location.href"))
            .unwrap();
        assert_eq!(href, JsValue::from(js_string!("https://example.com:8080/a/b?x=1#bottom")));
    }

    #[test]
    fn assign_resolves_relative_targets() {
        let context = &mut context_with_location("https://example.com/a/b");

        let href = context
            .eval(Source::from_bytes("location.assign('../c'); String(location)"))
            .unwrap();

        assert_eq!(href, JsValue::from(js_string!("https://example.com/c")));
    }

    #[test]
    fn rejects_foreign_receivers() {
        let context = &mut context_with_location("https://example.com/");

        let result = context.eval(Source::from_bytes("location.reload.call({})"));

        assert!(result.is_err());

        let location = context.eval(Source::from_bytes("location.reload(); location")).unwrap();
        let location = JsNativeObject::<Location>::try_from(location).unwrap();
        assert_eq!(location.deref().reloads(), 1);
    }
}
