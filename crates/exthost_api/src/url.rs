//! `URL` and `Location`, both views over a parsed [`url::Url`].
//!
//! `URL.createObjectURL`/`URL.revokeObjectURL` keep a realm-wide table of
//! `blob:` URLs so later readers (downloads, fetches) can dereference them.
//!
//! More information:
//!  - [MDN documentation][mdn]
//!  - [WHATWG `URL` specification][spec]
//!
//! [mdn]: https://developer.mozilla.org/en-US/docs/Web/API/URL_API
//! [spec]: https://url.spec.whatwg.org/

use std::collections::HashMap;

use boa_engine::{
    js_string, object::NativeObject, property::Attribute, Context, JsArgs, JsData, JsError,
    JsNativeError, JsResult, JsValue, NativeFunction,
};
use boa_gc::{Finalize, Gc, GcRefCell, Trace};
use exthost_core::{
    host_defined,
    native::{register_global_class, Accessor, ClassBuilder, JsNativeObject, NativeClass},
    value::{to_rust_string, IntoJs},
};
use url::Url;

use crate::blob::Blob;

fn type_error(message: impl Into<String>) -> JsError {
    JsNativeError::typ().with_message(message.into()).into()
}

/// Parses `input` against an optional `base`, the way `new URL(input, base)` does.
pub fn parse_url(input: &str, base: Option<&str>) -> Option<Url> {
    let base = match base {
        Some(base) => Some(Url::parse(base).ok()?),
        None => None,
    };
    Url::options().base_url(base.as_ref()).parse(input).ok()
}

/// Native data that exposes URL components to script.
pub trait UrlData: NativeObject {
    fn url(&self) -> &Url;

    fn url_mut(&mut self) -> &mut Url;
}

/// The components shared by `URL` and `Location`, as the getters return them.
pub mod components {
    use url::Url;

    pub fn protocol(url: &Url) -> String {
        format!("{}:", url.scheme())
    }

    pub fn host(url: &Url) -> String {
        match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => String::new(),
        }
    }

    pub fn hostname(url: &Url) -> String {
        url.host_str().unwrap_or_default().to_string()
    }

    pub fn port(url: &Url) -> String {
        url.port().map(|port| port.to_string()).unwrap_or_default()
    }

    pub fn search(url: &Url) -> String {
        match url.query() {
            Some(query) if !query.is_empty() => format!("?{query}"),
            _ => String::new(),
        }
    }

    pub fn hash(url: &Url) -> String {
        match url.fragment() {
            Some(fragment) if !fragment.is_empty() => format!("#{fragment}"),
            _ => String::new(),
        }
    }

    /// Origins of opaque URLs (custom schemes included) serialize as `null`.
    pub fn origin(url: &Url) -> String {
        url.origin().ascii_serialization()
    }
}

/// Applies a component write. Invalid values are ignored, matching the
/// URL standard's setters, except `href` which throws.
pub fn set_component(url: &mut Url, key: &str, value: &str) -> JsResult<bool> {
    match key {
        "href" => *url = Url::parse(value).map_err(|_| type_error(format!("Invalid URL '{value}'")))?,
        "protocol" => {
            let _ = url.set_scheme(value.trim_end_matches(':'));
        }
        "host" => {
            let (host, port) = match value.rsplit_once(':') {
                Some((host, port)) => (host, port.parse::<u16>().ok()),
                None => (value, None),
            };
            if url.set_host(Some(host)).is_ok() {
                let _ = url.set_port(port);
            }
        }
        "hostname" => {
            let _ = url.set_host(Some(value));
        }
        "port" => {
            let _ = url.set_port(value.parse::<u16>().ok());
        }
        "pathname" => url.set_path(value),
        "search" => {
            let query = value.trim_start_matches('?');
            url.set_query((!query.is_empty()).then_some(query));
        }
        "hash" => {
            let fragment = value.trim_start_matches('#');
            url.set_fragment((!fragment.is_empty()).then_some(fragment));
        }
        "username" => {
            let _ = url.set_username(value);
        }
        "password" => {
            let _ = url.set_password((!value.is_empty()).then_some(value));
        }
        _ => return Ok(false),
    }
    Ok(true)
}

/// Reads a component by its property name.
pub fn get_component(url: &Url, key: &str) -> Option<String> {
    Some(match key {
        "href" => url.to_string(),
        "origin" => components::origin(url),
        "protocol" => components::protocol(url),
        "host" => components::host(url),
        "hostname" => components::hostname(url),
        "port" => components::port(url),
        "pathname" => url.path().to_string(),
        "search" => components::search(url),
        "hash" => components::hash(url),
        "username" => url.username().to_string(),
        "password" => url.password().unwrap_or_default().to_string(),
        _ => return None,
    })
}

pub const COMPONENTS: [&str; 9] = [
    "href", "protocol", "host", "hostname", "port", "pathname", "search", "hash", "origin",
];

fn component_accessor<T: UrlData>(name: &'static str, context: &mut Context) -> Accessor {
    fn getter<T: UrlData>(this: &JsValue, name: &str, context: &mut Context) -> JsResult<JsValue> {
        let object = JsNativeObject::<T>::try_from(this.clone())?;
        let value = get_component(object.deref().url(), name).unwrap_or_default();
        Ok(value.into_js(context))
    }

    fn setter<T: UrlData>(
        this: &JsValue,
        name: &str,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let object = JsNativeObject::<T>::try_from(this.clone())?;
        let value = to_rust_string(args.get_or_undefined(0), context)?;
        set_component(object.deref_mut().url_mut(), name, &value)?;
        Ok(JsValue::undefined())
    }

    // One pair of plain functions per component keeps the natives capture free.
    macro_rules! dispatch {
        ($($key:literal),*) => {
            match name {
                $($key => (
                    NativeFunction::from_fn_ptr(|this, _, context| getter::<T>(this, $key, context)),
                    NativeFunction::from_fn_ptr(|this, args, context| setter::<T>(this, $key, args, context)),
                ),)*
                _ => unreachable!("unknown URL component"),
            }
        };
    }

    let (get, set) = dispatch!(
        "href", "protocol", "host", "hostname", "port", "pathname", "search", "hash", "origin",
        "username", "password"
    );
    let accessor = Accessor::new(name).get(get, context);
    if name == "origin" {
        accessor
    } else {
        accessor.set(set, context)
    }
}

/// Adds the component accessors of `T` to `class`.
pub fn define_components<T: UrlData>(class: &mut ClassBuilder<'_>, names: &[&'static str]) {
    for name in names {
        let accessor = component_accessor::<T>(name, class.context());
        class.accessor(js_string!(*name), accessor, Attribute::CONFIGURABLE | Attribute::ENUMERABLE);
    }
}

/// `blob:` URLs minted by `URL.createObjectURL`, per realm.
#[derive(Trace, Finalize, JsData, Clone, Default)]
pub struct ObjectUrls {
    inner: Gc<GcRefCell<HashMap<String, Blob>>>,
}

impl ObjectUrls {
    pub fn insert(&self, url: String, blob: Blob) {
        self.inner.borrow_mut().insert(url, blob);
    }

    pub fn revoke(&self, url: &str) -> Option<Blob> {
        self.inner.borrow_mut().remove(url)
    }

    pub fn resolve(&self, url: &str) -> Option<Blob> {
        self.inner.borrow().get(url).cloned()
    }
}

/// A random RFC 4122 version 4 identifier.
pub fn random_uuid() -> String {
    let mut bytes = [0u8; 16];
    bytes.iter_mut().for_each(|b| *b = fastrand::u8(..));
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// The uuid segment of a `blob:<origin>/<uuid>` URL.
pub fn blob_url_uuid(url: &str) -> Option<&str> {
    let rest = url.strip_prefix("blob:")?;
    rest.rsplit('/').next().filter(|uuid| !uuid.is_empty())
}

#[derive(Trace, Finalize, JsData, Clone, Debug)]
pub struct UrlObject {
    #[unsafe_ignore_trace]
    url: Url,
}

impl UrlObject {
    pub fn new(url: Url) -> Self {
        Self { url }
    }
}

impl UrlData for UrlObject {
    fn url(&self) -> &Url {
        &self.url
    }

    fn url_mut(&mut self) -> &mut Url {
        &mut self.url
    }
}

pub struct UrlClass;

impl UrlClass {
    fn to_string(this: &JsValue, _: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        let url = JsNativeObject::<UrlObject>::try_from(this.clone())?;
        let href = url.deref().url.to_string();
        Ok(href.into_js(context))
    }

    fn can_parse(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        let input = to_rust_string(args.get_or_undefined(0), context)?;
        let base = match args.get_or_undefined(1) {
            base if base.is_undefined() => None,
            base => Some(to_rust_string(base, context)?),
        };
        Ok(parse_url(&input, base.as_deref()).is_some().into())
    }

    fn create_object_url(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        host_defined!(context, urls: ObjectUrls);
        let blob = JsNativeObject::<Blob>::try_from(args.get_or_undefined(0).clone()).map_err(|_| {
            type_error("Failed to execute 'createObjectURL' on 'URL': Overload resolution failed.")
        })?;

        let origin = match context
            .global_object()
            .get(js_string!("location"), context)?
            .as_object()
        {
            Some(location) => exthost_core::value::get_string(location, "origin", context)?,
            None => None,
        }
        .unwrap_or_else(|| "null".to_string());

        let url = format!("blob:{origin}/{}", random_uuid());
        urls.insert(url.clone(), blob.deref().clone());
        log::trace!("created object URL {url}");
        Ok(url.into_js(context))
    }

    fn revoke_object_url(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        host_defined!(context, urls: ObjectUrls);
        let url = to_rust_string(args.get_or_undefined(0), context)?;
        urls.revoke(&url);
        Ok(JsValue::undefined())
    }
}

impl NativeClass for UrlClass {
    type Instance = UrlObject;

    const NAME: &'static str = "URL";
    const LENGTH: usize = 1;

    fn data_constructor(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<UrlObject> {
        let input = to_rust_string(args.get_or_undefined(0), context)?;
        let base = match args.get_or_undefined(1) {
            base if base.is_undefined() => None,
            base => Some(to_rust_string(base, context)?),
        };
        let url = parse_url(&input, base.as_deref()).ok_or_else(|| {
            type_error(format!("Failed to construct 'URL': Invalid URL '{input}'"))
        })?;
        Ok(UrlObject::new(url))
    }

    fn init(class: &mut ClassBuilder<'_>) -> JsResult<()> {
        define_components::<UrlObject>(class, &COMPONENTS);
        define_components::<UrlObject>(class, &["username", "password"]);
        class
            .method(js_string!("toString"), 0, NativeFunction::from_fn_ptr(Self::to_string))
            .method(js_string!("toJSON"), 0, NativeFunction::from_fn_ptr(Self::to_string))
            .static_method(js_string!("canParse"), 1, NativeFunction::from_fn_ptr(Self::can_parse))
            .static_method(
                js_string!("createObjectURL"),
                1,
                NativeFunction::from_fn_ptr(Self::create_object_url),
            )
            .static_method(
                js_string!("revokeObjectURL"),
                1,
                NativeFunction::from_fn_ptr(Self::revoke_object_url),
            );
        Ok(())
    }
}

pub struct UrlApi;

impl exthost_core::Api for UrlApi {
    fn init(self, context: &mut Context) -> JsResult<()> {
        exthost_core::Realm::current(context).insert_host_defined(ObjectUrls::default());
        register_global_class::<UrlClass>(context)
    }
}

#[cfg(test)]
mod test {
    use boa_engine::{js_string, Context, JsValue, Source};
    use exthost_core::{Api, Runtime};

    use super::*;
    use crate::blob::BlobApi;

    #[test]
    fn exposes_components() {
        let mut rt = Runtime::new().unwrap();
        UrlApi.init(rt.context()).unwrap();

        let value = rt
            .eval(
                "const u = new URL('../b?x=1#top', 'https://example.com:8443/a/c');
                 [u.href, u.protocol, u.host, u.hostname, u.port, u.pathname, u.search, u.hash, u.origin].join(' ')",
            )
            .unwrap();

        assert_eq!(
            value,
            JsValue::from(js_string!(
                "https://example.com:8443/b?x=1#top https: example.com:8443 example.com 8443 /b ?x=1 #top https://example.com:8443"
            ))
        );
    }

    #[test]
    fn setters_update_the_url() {
        let mut rt = Runtime::new().unwrap();
        UrlApi.init(rt.context()).unwrap();

        let value = rt
            .eval("const u = new URL('https://a.com/'); u.pathname = '/p'; u.search = 'q=1'; u.hash = ''; String(u)")
            .unwrap();

        assert_eq!(value, JsValue::from(js_string!("https://a.com/p?q=1")));
        assert!(rt.eval("new URL('not a url')").is_err());
    }

    #[test]
    fn object_urls_resolve_until_revoked() {
        let mut rt = Runtime::new().unwrap();
        UrlApi.init(rt.context()).unwrap();
        BlobApi.init(rt.context()).unwrap();

        let url = rt
            .eval("URL.createObjectURL(new Blob(['hi'], { type: 'text/plain' }))")
            .unwrap();
        let url = url.as_string().unwrap().to_std_string_escaped();
        let urls = rt.realm().host_defined::<ObjectUrls>().unwrap();

        assert!(url.starts_with("blob:null/"));
        assert_eq!(blob_url_uuid(&url).map(str::len), Some(36));
        assert_eq!(urls.resolve(&url).unwrap().bytes(), b"hi");

        rt.eval(&format!("URL.revokeObjectURL({url:?})")).unwrap();
        assert!(urls.resolve(&url).is_none());
    }

    #[test]
    fn can_parse_checks_without_throwing() {
        let context = &mut Context::default();
        UrlApi.init(context).unwrap();

        let value = context
            .eval(Source::from_bytes("[URL.canParse('/x'), URL.canParse('/x', 'https://a.com')].join()"))
            .unwrap();
        assert_eq!(value, JsValue::from(js_string!("false,true")));
    }
}
