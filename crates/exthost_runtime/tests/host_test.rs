use std::{collections::HashMap, rc::Rc};

use boa_engine::JsValue;
use exthost_core::ManualClock;
use exthost_runtime::{
    config::HostConfig,
    debug_host::DebugHost,
    environment::Environment,
    manifest::Manifest,
    rpc::{HostEvent, HostRpc, RpcError},
    ExtensionHost, HostOptions,
};
use pretty_assertions::assert_eq;
use serde_json::Value;
use url::Url;

const CONTENT_SCRIPTS: &str = r#"{
    "name": "demo",
    "version": "1.0",
    "manifest_version": 2,
    "content_scripts": [{ "matches": ["<all_urls>"], "js": ["a.js", "b.js"] }]
}"#;

struct Fixture {
    host: ExtensionHost,
    rpc: Rc<DebugHost>,
    clock: Rc<ManualClock>,
}

fn fixture(url: &str, debug: bool) -> Fixture {
    let rpc = Rc::new(DebugHost::new());
    let clock = Rc::new(ManualClock::default());
    let mut options = HostOptions::new(Url::parse(url).unwrap(), rpc.clone());
    options.clock = clock.clone();
    options.config = HostConfig {
        debug: Some(debug),
        ..HostConfig::default()
    };
    Fixture {
        host: ExtensionHost::new(options).unwrap(),
        rpc,
        clock,
    }
}

fn files(entries: &[(&str, &str)]) -> HashMap<String, String> {
    entries
        .iter()
        .map(|(path, text)| (path.to_string(), text.to_string()))
        .collect()
}

fn string(value: JsValue) -> String {
    value
        .as_string()
        .map(|s| s.to_std_string_escaped())
        .unwrap_or_else(|| value.display().to_string())
}

/// A loaded page with `a.js` and `b.js` injected as content scripts of `ext`.
fn content_page(a: &str, b: &str) -> Fixture {
    let mut fx = fixture("https://example.com/index.html", false);
    let manifest = Manifest::from_json(CONTENT_SCRIPTS).unwrap();
    fx.host
        .register_web_extension("ext", manifest, files(&[("a.js", a), ("b.js", b)]))
        .unwrap();
    fx.host.finish_loading().unwrap();
    fx.host.run_until_stalled();
    fx
}

#[test]
fn content_scripts_are_isolated_from_the_page() {
    let mut fx = content_page("window.hello = 'ok'", "");

    let on_page = fx.host.eval("typeof hello").unwrap();
    let in_extension = fx.host.eval_in_extension("ext", "hello").unwrap();

    assert_eq!(string(on_page), "undefined");
    assert_eq!(string(in_extension), "ok");
    assert_eq!(
        fx.host.extension("ext").unwrap().environment(),
        Environment::ContentScript
    );
}

#[test]
fn content_scripts_run_in_manifest_order() {
    let mut fx = content_page("var shared = 41", "window.result = shared + 1");

    let result = fx.host.eval_in_extension("ext", "String(result)").unwrap();

    assert_eq!(string(result), "42");
}

#[test]
fn sandbox_prototypes_are_its_own() {
    let mut fx = content_page("Array.prototype.extra = 1", "");

    let on_page = fx.host.eval("typeof [].extra").unwrap();
    let in_extension = fx
        .host
        .eval_in_extension("ext", "typeof [].extra")
        .unwrap();

    assert_eq!(string(on_page), "undefined");
    assert_eq!(string(in_extension), "number");
}

#[test]
fn sandbox_document_calls_reach_the_page() {
    let mut fx = content_page("", "");

    let id = fx
        .host
        .eval_in_extension(
            "ext",
            "const div = document.createElement('div');
             div.setAttribute('id', 'made');
             document.body.appendChild(div);
             document.getElementById('made').getAttribute('id')",
        )
        .unwrap();
    let on_page = fx
        .host
        .eval("document.getElementById('made').parentNode === document.body")
        .unwrap();

    assert_eq!(string(id), "made");
    assert_eq!(on_page, JsValue::from(true));
}

#[test]
fn sandbox_classes_match_page_objects() {
    let mut fx = content_page("", "");

    let checks = fx
        .host
        .eval_in_extension(
            "ext",
            "[
                Object.getPrototypeOf(document) === Document.prototype,
                document instanceof EventTarget,
                new Event('x') instanceof Event,
                document.body instanceof Node,
                Object.getPrototypeOf(window) === Window.prototype,
            ].join()",
        )
        .unwrap();

    assert_eq!(string(checks), "true,true,true,true,true");
}

#[test]
fn vendor_globals_are_read_from_the_page_once() {
    let mut fx = content_page("", "");
    fx.host.eval("window.webkit = { n: 1 }").unwrap();

    let first = fx.host.eval_in_extension("ext", "webkit.n").unwrap();
    fx.host.eval("window.webkit = { n: 2 }").unwrap();
    let second = fx.host.eval_in_extension("ext", "webkit.n").unwrap();

    assert_eq!(first, JsValue::from(1));
    assert_eq!(second, JsValue::from(1));
}

#[test]
fn throwing_listeners_do_not_stop_the_others() {
    let mut fx = content_page(
        "browser.runtime.onMessage.addListener(() => { throw new Error('boom') });
         browser.runtime.onMessage.addListener(message => { globalThis.got = message.n });",
        "",
    );

    fx.host
        .eval_in_extension("ext", "browser.runtime.sendMessage({ n: 5 }); undefined")
        .unwrap();
    fx.host.run_until_stalled();
    let got = fx.host.eval_in_extension("ext", "got").unwrap();

    assert_eq!(got, JsValue::from(5));
}

/// A host whose message channel is down.
struct Unreachable(DebugHost);

impl HostRpc for Unreachable {
    fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        if method == "sendMessage" {
            return Err(RpcError::Failed {
                method: method.to_string(),
                message: "host is gone".to_string(),
            });
        }
        self.0.call(method, params)
    }

    fn poll_events(&self) -> Vec<HostEvent> {
        self.0.poll_events()
    }
}

#[test]
fn failed_sends_reject_and_forget_the_message() {
    let rpc = Rc::new(Unreachable(DebugHost::new()));
    let mut options = HostOptions::new(Url::parse("https://example.com/").unwrap(), rpc);
    options.clock = Rc::new(ManualClock::default());
    options.config = HostConfig {
        debug: Some(false),
        ..HostConfig::default()
    };
    let mut host = ExtensionHost::new(options).unwrap();
    host.register_web_extension(
        "ext",
        Manifest::from_json(CONTENT_SCRIPTS).unwrap(),
        files(&[("a.js", ""), ("b.js", "")]),
    )
    .unwrap();
    host.finish_loading().unwrap();
    host.run_until_stalled();

    let outcome = host
        .eval_in_extension(
            "ext",
            "browser.runtime.sendMessage({}).then(() => 'sent', e => String(e.message ?? e))",
        )
        .unwrap();

    assert!(string(outcome).contains("host is gone"));
    assert_eq!(host.state().pending_messages(), 0);
}

#[test]
fn second_registration_returns_the_first_record() {
    let mut fx = content_page("", "");
    let manifest = Manifest::from_json(CONTENT_SCRIPTS).unwrap();

    let again = fx
        .host
        .register_web_extension("ext", manifest, HashMap::new())
        .unwrap()
        .unwrap();

    let first = fx.host.extension("ext").unwrap();
    assert!(boa_engine::JsObject::equals(first.global(), again.global()));
    assert_eq!(fx.host.state().extensions().len(), 1);
}

#[test]
fn top_level_this_is_the_sandbox_global() {
    let mut fx = content_page("", "");

    fx.host
        .eval_in_extension(
            "ext",
            "globalThis.same = this === globalThis; if (false) import('./never.js');",
        )
        .unwrap();
    let same = fx.host.eval_in_extension("ext", "same").unwrap();

    assert_eq!(same, JsValue::from(true));
}

#[test]
fn storage_merges_one_level_deep() {
    let mut fx = content_page("", "");

    let stored = fx
        .host
        .eval_in_extension(
            "ext",
            "const local = browser.storage.local;
             local.set({ a: { value: 1 }, b: { name: 'x' } })
               .then(() => local.set({ a: { value: 2 } }))
               .then(() => local.get(null))
               .then(JSON.stringify)",
        )
        .unwrap();
    let defaults = fx
        .host
        .eval_in_extension(
            "ext",
            "browser.storage.local.get({ b: 0, c: 'fallback' }).then(JSON.stringify)",
        )
        .unwrap();

    assert_eq!(string(stored), r#"{"a":{"value":2},"b":{"name":"x"}}"#);
    assert_eq!(string(defaults), r#"{"b":{"name":"x"},"c":"fallback"}"#);
}

#[test]
fn messages_round_trip_through_the_host() {
    let mut fx = content_page(
        "browser.runtime.onMessage.addListener(message => Promise.resolve(message.n + 1))",
        "",
    );

    let response = fx
        .host
        .eval_in_extension("ext", "browser.runtime.sendMessage({ n: 1 }).then(String)")
        .unwrap();

    assert_eq!(string(response), "2");
    assert_eq!(fx.host.state().pending_messages(), 0);
    assert!(!fx.rpc.calls_to("sendMessage").is_empty());
}

#[test]
fn open_needs_a_recent_click() {
    let mut fx = content_page("", "");

    fx.host
        .eval_in_extension("ext", "open('https://a.com/')")
        .unwrap();
    assert!(fx.rpc.calls_to("browser.tabs.create").is_empty());

    fx.host.click().unwrap();
    fx.clock.advance(1000);
    fx.host
        .eval_in_extension("ext", "open('https://a.com/')")
        .unwrap();
    let created = fx.rpc.calls_to("browser.tabs.create");
    assert_eq!(created.len(), 1);
    assert_eq!(created[0][1]["url"], "https://a.com/");
    assert_eq!(created[0][1]["active"], true);

    fx.clock.advance(5000);
    fx.host
        .eval_in_extension("ext", "open('https://b.com/')")
        .unwrap();
    assert_eq!(fx.rpc.calls_to("browser.tabs.create").len(), 1);
}

#[test]
fn chrome_reports_failures_through_last_error() {
    let mut fx = content_page("", "");

    fx.host
        .eval_in_extension(
            "ext",
            "chrome.tabs.create({}, () => { globalThis.seen = chrome.runtime.lastError.message })",
        )
        .unwrap();
    fx.host.run_until_stalled();
    let seen = fx.host.eval_in_extension("ext", "seen").unwrap();
    let after = fx
        .host
        .eval_in_extension("ext", "typeof chrome.runtime.lastError")
        .unwrap();

    assert!(string(seen).contains("need a url"));
    assert_eq!(string(after), "undefined");
}

#[test]
fn unread_last_error_is_thrown() {
    let mut fx = content_page("", "");
    fx.host.take_unhandled_rejections();

    fx.host
        .eval_in_extension("ext", "chrome.tabs.create({}, () => {})")
        .unwrap();
    fx.host.run_until_stalled();
    let rejections = fx.host.take_unhandled_rejections();

    assert_eq!(rejections.len(), 1);
    assert!(string(rejections[0].clone()).contains("need a url"));
}

#[test]
fn unknown_apis_throw_not_implemented() {
    let mut fx = content_page("", "");

    let message = fx
        .host
        .eval_in_extension(
            "ext",
            "try { browser.bookmarks.create({}) } catch (e) { e.message }",
        )
        .unwrap();
    let thenable = fx
        .host
        .eval_in_extension("ext", "typeof browser.runtime.then")
        .unwrap();

    assert_eq!(string(message), "Not implemented!");
    assert_eq!(string(thenable), "undefined");
}

#[test]
fn page_reports_its_navigation() {
    let mut fx = fixture("https://example.com/", false);
    fx.host.finish_loading().unwrap();

    let statuses: Vec<String> = fx
        .rpc
        .calls_to("sendMessage")
        .iter()
        .filter_map(|params| params[4]["status"].as_str().map(str::to_string))
        .collect();

    assert_eq!(statuses, vec!["onCommitted", "onDOMContentLoaded", "onCompleted"]);
}

#[test]
fn extensions_hear_navigation_of_the_page() {
    let mut fx = fixture("https://example.com/", false);
    let manifest = Manifest::from_json(CONTENT_SCRIPTS).unwrap();
    fx.host
        .register_web_extension(
            "ext",
            manifest,
            files(&[(
                "a.js",
                "globalThis.urls = []; browser.webNavigation.onCompleted.addListener(d => urls.push(d.url))",
            ), ("b.js", "")]),
        )
        .unwrap();
    fx.host.finish_loading().unwrap();
    fx.host.run_until_stalled();

    let urls = fx.host.eval_in_extension("ext", "urls.join()").unwrap();

    assert_eq!(string(urls), "https://example.com/");
}

#[test]
fn debug_pages_pretend_to_be_elsewhere() {
    let mut fx = fixture("http://localhost:8080/?type=m&url=https://example.com/app", true);
    let manifest = Manifest::from_json(CONTENT_SCRIPTS).unwrap();
    fx.host
        .register_web_extension(
            "ext",
            manifest,
            files(&[("a.js", "window.seen = location.href"), ("b.js", "")]),
        )
        .unwrap();
    fx.host.finish_loading().unwrap();
    fx.host.run_until_stalled();

    let seen = fx.host.eval_in_extension("ext", "seen").unwrap();
    let page = fx.host.eval("location.href").unwrap();

    assert_eq!(
        fx.host.extension("ext").unwrap().environment(),
        Environment::DebugModeManagedPage
    );
    assert_eq!(string(seen), "https://example.com/app");
    assert_eq!(string(page), "http://localhost:8080/?type=m&url=https://example.com/app");
}

#[test]
fn debug_mode_propagates_registration_errors() {
    let mut fx = fixture("http://localhost:8080/?type=m", true);
    let manifest = Manifest::from_json(CONTENT_SCRIPTS).unwrap();

    let err = fx
        .host
        .register_web_extension("ext", manifest, HashMap::new())
        .unwrap_err();

    assert_eq!(err.to_string(), "Need a url");
}

#[test]
fn background_page_gets_install_event() {
    let mut fx = fixture("holoflows-extension://ext/_generated_background_page.html", false);
    let manifest = Manifest::from_json(
        r#"{ "name": "demo", "version": "2.0", "manifest_version": 2,
             "background": { "scripts": ["bg.js"] } }"#,
    )
    .unwrap();
    fx.host
        .register_web_extension(
            "ext",
            manifest,
            files(&[(
                "bg.js",
                "globalThis.installs = []; browser.runtime.onInstalled.addListener(d => installs.push(d.reason))",
            )]),
        )
        .unwrap();

    fx.host.run_for(1000);
    assert_eq!(string(fx.host.eval("installs.join()").unwrap()), "");
    fx.host.run_for(1000);
    assert_eq!(string(fx.host.eval("installs.join()").unwrap()), "install");
    assert!(fx.rpc.calls_to("sendMessage").is_empty());
}
