//! Registering extensions and running their scripts.
//!
//! Registration decides which [`Environment`] the page is for the
//! extension, builds the realm its code runs in, installs the extension
//! APIs and starts the scripts the manifest lists for that environment.

use std::{collections::HashMap, rc::Rc};

use boa_engine::{Context, JsResult, JsValue};
use boa_gc::{Finalize, Trace};
use exthost_api::ReadyState;
use exthost_core::{promise, value::json_to_js};
use serde_json::{json, Value};
use url::Url;

use crate::{
    environment::{classify, is_debug_request, parse_debug_mode_url, Environment},
    extension::Extension,
    internal_storage,
    loader::{Loader, ModuleFetcher},
    manifest::{ContentScript, Manifest},
    resources::{extension_prefix, Resources},
    sandbox::{Sandbox, SandboxOptions},
    shims,
    state::{HostState, Target},
    url_matcher::matches_content_script,
    Error, Result,
};

/// Registers `manifest` under `id` for the current page.
///
/// Registering an ID twice returns the first record. Failures are logged and
/// yield `None`, except in debug mode where they are returned.
pub fn register_web_extension(
    state: &HostState,
    id: &str,
    manifest: Manifest,
    preloaded: HashMap<String, String>,
    context: &mut Context,
) -> Result<Option<Extension>> {
    log::debug!(
        "Loading extension {}({id}) with {} preloaded resources",
        manifest.name,
        preloaded.len()
    );
    match register(state, id, manifest, preloaded, context) {
        Ok(extension) => Ok(Some(extension)),
        Err(err) if state.is_debug() => Err(err),
        Err(err) => {
            log::error!("Failed to load extension {id}: {err}");
            Ok(state.extension(id))
        }
    }
}

/// The environment of the page for `id`, and the address the extension
/// should believe it is at when that differs from the page's.
fn resolve_environment(
    state: &HostState,
    page: &Url,
    id: &str,
    manifest: &Manifest,
) -> Result<(Environment, Option<Url>)> {
    if state.is_debug() && is_debug_request(page) {
        let target = parse_debug_mode_url(page, id, manifest)?;
        log::debug!("debug page stands in for {} ({:?})", target.url, target.environment);
        let environment = match target.environment {
            Environment::ContentScript => Environment::DebugModeManagedPage,
            other => other,
        };
        return Ok((environment, Some(target.url)));
    }
    Ok((classify(page, id, manifest), None))
}

fn register(
    state: &HostState,
    id: &str,
    manifest: Manifest,
    preloaded: HashMap<String, String>,
    context: &mut Context,
) -> Result<Extension> {
    if let Some(existing) = state.extension(id) {
        log::debug!("{id} is already registered");
        return Ok(existing);
    }
    let page_url = state.page().url().ok_or_else(|| Error::InvalidEnvironment {
        message: "The page has no URL".to_string(),
    })?;
    let (environment, location) = resolve_environment(state, &page_url, id, &manifest)?;
    log::info!("{}({id}) runs as {environment:?}", manifest.name);

    let resources = Rc::new(Resources::new(
        id,
        preloaded,
        state.rpc().clone(),
        state.transformer(),
        state.config().prebuilt_version,
    ));
    let (realm, global, sandbox) = match environment {
        Environment::ContentScript | Environment::DebugModeManagedPage => {
            let options = SandboxOptions {
                lazy_globals: state.config().lazy_globals.clone(),
                location: location.clone(),
            };
            let sandbox = Sandbox::create(state, options, context)?;
            (sandbox.realm().clone(), sandbox.global(), Some(sandbox))
        }
        Environment::BackgroundScript | Environment::ProtocolPage => {
            (state.page_realm(), state.page().window(), None)
        }
    };
    let fetcher: Rc<dyn ModuleFetcher> = resources.clone();
    let loader = Loader::new(realm, id, fetcher, state.transformer());
    let extension = Extension::new(
        id,
        Rc::new(manifest),
        environment,
        global,
        loader,
        resources,
        sandbox,
    );
    state.insert_extension(extension.clone());
    shims::install(state, &extension, context)?;

    match environment {
        Environment::ContentScript | Environment::DebugModeManagedPage => {
            let location = location.unwrap_or(page_url);
            load_content_scripts(state, &extension, &location, context)?;
        }
        Environment::BackgroundScript => start_background(state, &extension, context)?,
        Environment::ProtocolPage => {}
    }
    Ok(extension)
}

fn load_content_scripts(
    state: &HostState,
    extension: &Extension,
    location: &Url,
    context: &mut Context,
) -> JsResult<()> {
    for (index, rule) in extension.manifest().content_scripts.iter().enumerate() {
        for warning in rule.unsupported_keys(index) {
            log::warn!("{warning}");
        }
        if !matches_content_script(location, rule) {
            log::debug!("{location} does not match content script #{index} of {}", extension.id());
            continue;
        }
        load_content_script(state, extension, rule, context)?;
    }
    Ok(())
}

/// Runs the scripts of `rule` once the page has finished loading.
fn load_content_script(
    state: &HostState,
    extension: &Extension,
    rule: &ContentScript,
    context: &mut Context,
) -> JsResult<()> {
    let queue = ScriptQueue::new(extension.clone(), rule.js.clone());
    let page = state.page();
    if page.ready_state() == ReadyState::Complete {
        queue.run(context)?;
        return Ok(());
    }
    log::debug!("{} waits for the page to load", extension.id());
    let on_load = promise::callback(
        "",
        0,
        queue,
        |_, _, queue: &ScriptQueue, context| queue.run(context),
        context,
    );
    page.add_listener(&page.window(), "load", on_load.into(), false, true);
    Ok(())
}

/// Scripts evaluated one after another. A script starts only after the
/// previous one (and whatever it awaited) has settled; failures are logged
/// and do not stop the rest.
#[derive(Trace, Finalize, Clone)]
struct ScriptQueue {
    extension: Extension,
    scripts: Vec<String>,
    next: usize,
}

impl ScriptQueue {
    fn new(extension: Extension, scripts: Vec<String>) -> Self {
        Self {
            extension,
            scripts,
            next: 0,
        }
    }

    fn run(&self, context: &mut Context) -> JsResult<JsValue> {
        let Some(path) = self.scripts.get(self.next) else {
            return Ok(JsValue::undefined());
        };
        let rest = Self {
            next: self.next + 1,
            ..self.clone()
        };
        let parent = extension_prefix(self.extension.id());
        log::debug!("running {path} of {}", self.extension.id());
        let evaluation = match self
            .extension
            .loader()
            .evaluate_script(path, Some(&parent), context)
        {
            Ok(evaluation) => evaluation,
            Err(err) => {
                log::error!("Failed to run {path} of {}: {err}", self.extension.id());
                return rest.run(context);
            }
        };
        promise::when_settled(
            evaluation,
            (rest, path.clone()),
            |outcome, (rest, path), context| {
                if let Err(reason) = outcome {
                    log::error!(
                        "Failed to run {path} of {}: {}",
                        rest.extension.id(),
                        reason.display()
                    );
                }
                rest.run(context)
            },
            context,
        )
    }
}

fn start_background(state: &HostState, extension: &Extension, context: &mut Context) -> JsResult<()> {
    match state.timers() {
        Some(timers) => {
            let install = promise::callback(
                "",
                0,
                (state.clone(), extension.id().to_string()),
                |_, _, (state, id): &(HostState, String), context| {
                    if let Err(err) = fire_install_event(state, id, context) {
                        log::error!("Failed to fire runtime.onInstalled of {id}: {err}");
                    }
                    Ok(JsValue::undefined())
                },
                context,
            );
            timers.schedule(install, state.config().install_settle_delay_ms, Vec::new(), false);
        }
        None => log::warn!("No timers on the page, runtime.onInstalled of {} never fires", extension.id()),
    }
    let scripts = extension.manifest().background_scripts().to_vec();
    ScriptQueue::new(extension.clone(), scripts).run(context)?;
    Ok(())
}

/// Tells `runtime.onInstalled` listeners about a first start or a new
/// version, then remembers the version.
fn fire_install_event(state: &HostState, id: &str, context: &mut Context) -> Result<()> {
    let Some(extension) = state.extension(id) else {
        return Ok(());
    };
    let version = extension.manifest().version.clone();
    let stored = internal_storage::load(state, id)?;
    let details = match stored.previous_version.as_deref() {
        None => json!({ "reason": "install" }),
        Some(previous) if previous != version => {
            json!({ "reason": "update", "previousVersion": previous })
        }
        Some(_) => return Ok(()),
    };
    log::debug!("{id} fires runtime.onInstalled {details}");
    state.dispatch(
        "runtime.onInstalled",
        &Target::One(id.to_string()),
        context,
        &|context| Ok(vec![json_to_js(&details, context)?]),
    );
    internal_storage::update(state, id, |storage| storage.previous_version = Some(version))?;
    Ok(())
}

fn malformed(message: &str) -> Error {
    Error::MalformedMessage {
        message: message.to_string(),
    }
}

/// Serves `tabs.executeScript` requests sent to this page:
/// `[tabID, extensionID, manifest, { code | file }]`.
pub fn execute_content_script(state: &HostState, params: &[Value], context: &mut Context) {
    if let Err(err) = try_execute_content_script(state, params, context) {
        log::error!("executeContentScript failed: {err}");
    }
}

fn try_execute_content_script(state: &HostState, params: &[Value], context: &mut Context) -> Result<()> {
    let id = params
        .get(1)
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("executeContentScript needs an extension ID"))?;
    let details = params.get(3).cloned().unwrap_or(Value::Null);
    log::debug!("{id} requested to inject {details}");

    let extension = match state.extension(id) {
        Some(extension) => extension,
        None => {
            let manifest = params
                .get(2)
                .cloned()
                .ok_or_else(|| malformed("executeContentScript needs a manifest"))?;
            let manifest: Manifest = serde_json::from_value(manifest)?;
            register_web_extension(state, id, manifest, HashMap::new(), context)?
                .ok_or_else(|| malformed("the extension could not be registered"))?
        }
    };

    if let Some(code) = details.get("code").and_then(Value::as_str) {
        let evaluation = extension.loader().evaluate_inline_script(code, context)?;
        promise::when_settled(
            evaluation,
            id.to_string(),
            |outcome, id, _| {
                if let Err(reason) = outcome {
                    log::error!("Injected code of {id} failed: {}", reason.display());
                }
                Ok(JsValue::undefined())
            },
            context,
        )?;
    } else if let Some(file) = details.get("file").and_then(Value::as_str) {
        let rule = ContentScript::all_urls(vec![file.to_string()]);
        load_content_script(state, &extension, &rule, context)?;
    } else {
        log::warn!("executeScript of {id} has neither code nor file");
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use exthost_api::{install_page, PageOptions};
    use exthost_core::{ManualClock, Runtime};
    use exthost_transform::Transformer;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        config::HostConfig,
        debug_host::DebugHost,
        rpc::FrameworkRpc,
        state::Services,
    };

    struct Fixture {
        runtime: Runtime,
        state: HostState,
        host: Rc<DebugHost>,
        clock: Rc<ManualClock>,
    }

    fn fixture(url: &str) -> Fixture {
        let clock = Rc::new(ManualClock::default());
        let mut runtime = Runtime::with_clock(clock.clone()).unwrap();
        let page = install_page(runtime.context(), PageOptions::new(Url::parse(url).unwrap())).unwrap();
        let host = Rc::new(DebugHost::new());
        let state = HostState::new(
            page,
            runtime.realm().clone(),
            Services {
                rpc: FrameworkRpc::new(host.clone()),
                transformer: Rc::new(Transformer::new()),
                config: HostConfig {
                    debug: Some(false),
                    ..HostConfig::default()
                },
                debug: false,
            },
        );
        Fixture {
            runtime,
            state,
            host,
            clock,
        }
    }

    fn manifest(json: &str) -> Manifest {
        Manifest::from_json(json).unwrap()
    }

    fn preloaded(files: &[(&str, &str)]) -> HashMap<String, String> {
        files
            .iter()
            .map(|(path, text)| (path.to_string(), text.to_string()))
            .collect()
    }

    fn page_log(runtime: &mut Runtime) -> String {
        runtime
            .eval("String(globalThis.log)")
            .unwrap()
            .as_string()
            .map(|s| s.to_std_string_escaped())
            .unwrap_or_default()
    }

    #[test]
    fn content_scripts_wait_for_load_and_run_in_order() {
        let mut fx = fixture("https://example.com/");
        fx.runtime.eval("globalThis.log = []").unwrap();
        let manifest = manifest(
            r#"{ "name": "demo", "version": "1.0", "manifest_version": 2,
                 "content_scripts": [{ "matches": ["<all_urls>"], "js": ["a.js", "b.js"] }] }"#,
        );
        let files = preloaded(&[
            ("a.js", "window.log.push('a')"),
            ("b.js", "window.log.push('b')"),
        ]);

        let extension = register_web_extension(&fx.state, "ext", manifest, files, fx.runtime.context())
            .unwrap()
            .unwrap();
        assert_eq!(extension.environment(), Environment::ContentScript);
        assert!(extension.sandbox().is_some());
        fx.runtime.run_until_stalled();
        assert_eq!(page_log(&mut fx.runtime), "");

        fx.state.page().finish_loading(fx.runtime.context()).unwrap();
        fx.runtime.run_until_stalled();
        assert_eq!(page_log(&mut fx.runtime), "a,b");
    }

    #[test]
    fn failing_script_does_not_stop_the_queue() {
        let mut fx = fixture("https://example.com/");
        fx.runtime.eval("globalThis.log = []").unwrap();
        fx.state.page().finish_loading(fx.runtime.context()).unwrap();
        let manifest = manifest(
            r#"{ "name": "demo", "version": "1.0", "manifest_version": 2,
                 "content_scripts": [{ "matches": ["https://example.com/*"], "js": ["a.js", "missing.js", "b.js"] }] }"#,
        );
        let files = preloaded(&[
            ("a.js", "throw new Error('boom')"),
            ("b.js", "window.log.push('b')"),
        ]);

        register_web_extension(&fx.state, "ext", manifest, files, fx.runtime.context()).unwrap();
        fx.runtime.run_until_stalled();

        assert_eq!(page_log(&mut fx.runtime), "b");
    }

    #[test]
    fn unmatched_pages_get_no_scripts() {
        let mut fx = fixture("https://other.org/");
        fx.runtime.eval("globalThis.log = []").unwrap();
        fx.state.page().finish_loading(fx.runtime.context()).unwrap();
        let manifest = manifest(
            r#"{ "name": "demo", "version": "1.0", "manifest_version": 2,
                 "content_scripts": [{ "matches": ["https://example.com/*"], "js": ["a.js"] }] }"#,
        );

        register_web_extension(
            &fx.state,
            "ext",
            manifest,
            preloaded(&[("a.js", "window.log.push('a')")]),
            fx.runtime.context(),
        )
        .unwrap();
        fx.runtime.run_until_stalled();

        assert_eq!(page_log(&mut fx.runtime), "");
    }

    #[test]
    fn registration_is_idempotent() {
        let mut fx = fixture("https://example.com/");
        let json = r#"{ "name": "demo", "version": "1.0", "manifest_version": 2 }"#;

        let first = register_web_extension(&fx.state, "ext", manifest(json), HashMap::new(), fx.runtime.context())
            .unwrap()
            .unwrap();
        let second = register_web_extension(&fx.state, "ext", manifest(json), HashMap::new(), fx.runtime.context())
            .unwrap()
            .unwrap();

        assert!(boa_engine::JsObject::equals(first.global(), second.global()));
        assert_eq!(fx.state.extensions().len(), 1);
    }

    #[test]
    fn background_fires_install_then_update() {
        let json = |version: &str| {
            format!(
                r#"{{ "name": "demo", "version": "{version}", "manifest_version": 2,
                     "background": {{ "scripts": ["bg.js"] }} }}"#
            )
        };
        let script = "globalThis.reasons = globalThis.reasons || [];
             browser.runtime.onInstalled.addListener(d => reasons.push(d.reason + ':' + (d.previousVersion || '')))";
        let mut fx = fixture("holoflows-extension://ext/_generated_background_page.html");

        let extension = register_web_extension(
            &fx.state,
            "ext",
            manifest(&json("1.0")),
            preloaded(&[("bg.js", script)]),
            fx.runtime.context(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(extension.environment(), Environment::BackgroundScript);
        fx.runtime.run_until_stalled();
        fx.clock.advance(2000);
        fx.runtime.run_until_stalled();

        let reasons = fx.runtime.eval("reasons.join()").unwrap();
        assert_eq!(reasons.as_string().unwrap().to_std_string_escaped(), "install:");
        let stored = internal_storage::load(&fx.state, "ext").unwrap();
        assert_eq!(stored.previous_version.as_deref(), Some("1.0"));

        internal_storage::update(&fx.state, "ext", |storage| {
            storage.previous_version = Some("0.9".to_string())
        })
        .unwrap();
        fire_install_event(&fx.state, "ext", fx.runtime.context()).unwrap();
        let reasons = fx.runtime.eval("reasons.join()").unwrap();
        assert_eq!(
            reasons.as_string().unwrap().to_std_string_escaped(),
            "install:,update:0.9"
        );
    }

    #[test]
    fn execute_script_registers_and_runs_code() {
        let mut fx = fixture("https://example.com/");
        fx.runtime.eval("globalThis.log = []").unwrap();
        let params = vec![
            json!(1),
            json!("ext"),
            json!({ "name": "demo", "version": "1.0", "manifest_version": 2 }),
            json!({ "code": "window.log.push(typeof browser)" }),
        ];

        execute_content_script(&fx.state, &params, fx.runtime.context());
        fx.runtime.run_until_stalled();

        assert!(fx.state.extension("ext").is_some());
        assert_eq!(page_log(&mut fx.runtime), "object");
        assert!(fx.host.calls_to("fetch").is_empty());
    }

    #[test]
    fn execute_script_without_an_id_is_ignored() {
        let mut fx = fixture("https://example.com/");

        execute_content_script(&fx.state, &[json!(1)], fx.runtime.context());

        assert!(fx.state.extensions().is_empty());
    }
}
