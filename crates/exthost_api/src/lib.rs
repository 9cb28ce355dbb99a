//! The Web APIs of the emulated host page.
//!
//! Each API is an [`exthost_core::Api`] that installs itself on the realm
//! the context has entered. [`install_page`] assembles all of them into a
//! page: a `window` with a document, a location, `localStorage` and the
//! usual globals.

pub mod blob;
pub mod console;
pub mod dialogs;
pub mod dom;
pub mod encoding;
pub mod location;
pub mod response;
pub mod storage;
pub mod timers;
pub mod url;
pub mod worker;

use std::rc::Rc;

use boa_engine::{js_string, property::Attribute, Context, JsResult};
use exthost_core::{
    host_defined,
    native::{global_prototype, register_global_class, JsNativeObject},
    Api, Realm, Timers,
};

use crate::{
    dialogs::{Dialogs, DialogsApi, LogDialogs},
    dom::{
        append_child, CustomEventClass, DocumentClass, ElementClass, EventClass, EventTargetClass,
        Node, NodeClass, Page, WindowClass,
    },
    location::{Location, LocationClass},
    storage::{Storage, StorageClass},
};

pub use dom::ReadyState;

/// What the page looks like before any script runs.
pub struct PageOptions {
    pub url: ::url::Url,
    pub dialogs: Rc<dyn Dialogs>,
}

impl PageOptions {
    pub fn new(url: ::url::Url) -> Self {
        Self {
            url,
            dialogs: Rc::new(LogDialogs::default()),
        }
    }
}

/// Installs the page APIs on the realm `context` has entered, builds the
/// initial document and returns the page handle. The document starts in
/// the `loading` state.
pub fn install_page(context: &mut Context, options: PageOptions) -> JsResult<Page> {
    host_defined!(context, timers: Timers);

    console::ConsoleApi.init(context)?;
    timers::TimersApi.init(context)?;
    encoding::EncodingApi.init(context)?;
    blob::BlobApi.init(context)?;
    url::UrlApi.init(context)?;
    register_global_class::<EventTargetClass>(context)?;
    register_global_class::<NodeClass>(context)?;
    register_global_class::<ElementClass>(context)?;
    register_global_class::<DocumentClass>(context)?;
    register_global_class::<WindowClass>(context)?;
    register_global_class::<EventClass>(context)?;
    register_global_class::<CustomEventClass>(context)?;
    register_global_class::<LocationClass>(context)?;
    register_global_class::<StorageClass>(context)?;
    worker::WorkerApi.init(context)?;
    response::ResponseApi.init(context)?;
    DialogsApi {
        dialogs: options.dialogs,
    }
    .init(context)?;

    let window = context.global_object();
    let window_prototype = global_prototype("Window", context)?;
    window.set_prototype(Some(window_prototype));

    let document = JsNativeObject::new::<DocumentClass>(Node::document(), context)?;
    let html = JsNativeObject::new::<ElementClass>(Node::element("html"), context)?;
    let head = JsNativeObject::new::<ElementClass>(Node::element("head"), context)?;
    let body = JsNativeObject::new::<ElementClass>(Node::element("body"), context)?;
    append_child(document.object(), html.object())?;
    append_child(html.object(), head.object())?;
    append_child(html.object(), body.object())?;

    log::debug!("page created at {}", options.url);
    let location = JsNativeObject::new::<LocationClass>(Location::new(options.url), context)?;
    let storage = Storage::default();
    let local_storage = JsNativeObject::new::<StorageClass>(storage.clone(), context)?;

    for name in ["window", "self"] {
        context.register_global_property(js_string!(name), window.clone(), Attribute::ENUMERABLE)?;
    }
    context.register_global_property(
        js_string!("document"),
        document.object().clone(),
        Attribute::ENUMERABLE,
    )?;
    context.register_global_property(
        js_string!("location"),
        location.object().clone(),
        Attribute::ENUMERABLE,
    )?;
    context.register_global_property(
        js_string!("localStorage"),
        local_storage.object().clone(),
        Attribute::ENUMERABLE | Attribute::CONFIGURABLE,
    )?;

    let page = Page::new(
        window,
        document.object().clone(),
        location.object().clone(),
        storage,
        timers.clock(),
    );
    Realm::current(context).insert_host_defined(page.clone());
    Ok(page)
}

#[cfg(test)]
mod test {
    use std::rc::Rc;

    use boa_engine::JsValue;
    use exthost_core::{ManualClock, Runtime};
    use pretty_assertions::assert_eq;

    use super::*;

    fn page() -> (Runtime, Page, Rc<ManualClock>) {
        let clock = Rc::new(ManualClock::default());
        let mut rt = Runtime::with_clock(clock.clone()).unwrap();
        let url = ::url::Url::parse("https://example.com/index.html").unwrap();
        let page = install_page(rt.context(), PageOptions::new(url)).unwrap();
        (rt, page, clock)
    }

    fn eval_string(rt: &mut Runtime, src: &str) -> String {
        rt.eval(src)
            .unwrap()
            .as_string()
            .map(|s| s.to_std_string_escaped())
            .unwrap_or_default()
    }

    #[test]
    fn window_is_the_global_object() {
        let (mut rt, _, _) = page();

        let checks = rt
            .eval(
                "window === globalThis && self === window && window instanceof Window \
                 && window instanceof EventTarget && document instanceof Node",
            )
            .unwrap();

        assert_eq!(checks, JsValue::from(true));
    }

    #[test]
    fn builds_and_queries_the_tree() {
        let (mut rt, _, _) = page();

        let text = eval_string(
            &mut rt,
            "const p = document.createElement('p');
             p.id = 'greeting';
             p.textContent = 'hello';
             document.body.appendChild(p);
             const found = document.getElementById('greeting');
             [found === p, found.tagName, p.parentNode === document.body,
              document.documentElement.textContent, document.body.contains(p)].join()",
        );

        assert_eq!(text, "true,P,true,hello,true");
    }

    #[test]
    fn rejects_cycles_and_foreign_receivers() {
        let (mut rt, _, _) = page();

        assert!(rt.eval("document.body.appendChild(document.documentElement)").is_err());
        assert!(rt.eval("document.createElement.call({}, 'a')").is_err());
        assert!(rt.eval("EventTarget.prototype.addEventListener.call({}, 'x', () => {})").is_err());
    }

    #[test]
    fn events_capture_then_bubble() {
        let (mut rt, _, _) = page();

        let order = eval_string(
            &mut rt,
            "const log = [];
             const child = document.body.appendChild(document.createElement('div'));
             window.addEventListener('ping', () => log.push('window-capture'), true);
             document.body.addEventListener('ping', () => log.push('body-bubble'));
             child.addEventListener('ping', e => log.push('target:' + (e.target === child)));
             window.addEventListener('ping', { handleEvent() { log.push('window-bubble') } });
             child.dispatchEvent(new Event('ping', { bubbles: true }));
             child.dispatchEvent(new Event('ping'));
             log.join()",
        );

        assert_eq!(
            order,
            "window-capture,target:true,body-bubble,window-bubble,window-capture,target:true"
        );
    }

    #[test]
    fn once_listeners_and_cancellation() {
        let (mut rt, page, _) = page();

        let result = eval_string(
            &mut rt,
            "let calls = 0;
             document.addEventListener('x', e => { calls++; e.preventDefault() }, { once: true });
             const first = document.dispatchEvent(new Event('x', { cancelable: true }));
             const second = document.dispatchEvent(new Event('x', { cancelable: true }));
             [calls, first, second].join()",
        );

        assert_eq!(result, "1,false,true");
        assert_eq!(page.listener_count(&page.document(), "x"), 0);
    }

    #[test]
    fn finishes_loading_in_order() {
        let (mut rt, page, _) = page();
        rt.eval(
            "globalThis.states = [document.readyState];
             document.addEventListener('readystatechange', () => states.push(document.readyState));
             document.addEventListener('DOMContentLoaded', () => states.push('DOMContentLoaded'));
             window.addEventListener('load', () => states.push('load'));",
        )
        .unwrap();

        page.finish_loading(rt.context()).unwrap();

        assert_eq!(page.ready_state(), ReadyState::Complete);
        assert_eq!(page.ready_state().to_string(), "complete");
        assert_eq!(
            eval_string(&mut rt, "states.join()"),
            "loading,interactive,DOMContentLoaded,complete,load"
        );
    }

    #[test]
    fn clicks_record_user_interaction() {
        let (mut rt, page, clock) = page();
        assert!(!page.has_recent_interaction(3000));

        rt.eval("document.body.click()").unwrap();
        clock.advance(1000);
        assert!(page.has_recent_interaction(3000));

        clock.advance(5000);
        assert!(!page.has_recent_interaction(3000));

        let target = rt.eval("new EventTarget()").unwrap();
        page.click(target.as_object().unwrap(), rt.context()).unwrap();
        assert!(!page.has_recent_interaction(3000));
    }

    #[test]
    fn custom_events_carry_detail() {
        let (mut rt, _, _) = page();

        let detail = rt
            .eval(
                "let seen; document.addEventListener('c', e => seen = e.detail);
                 document.dispatchEvent(new CustomEvent('c', { detail: 7 }));
                 seen",
            )
            .unwrap();

        assert_eq!(detail, JsValue::from(7));
    }
}
