//! Runs WebExtensions inside an emulated host page.
//!
//! An [`ExtensionHost`] owns the engine, the page and the connection to the
//! native host. Extensions are registered with
//! [`ExtensionHost::register_web_extension`]; their code then runs in a
//! content-script sandbox or directly on the page, depending on where the
//! page is.

pub mod config;
pub mod controller;
pub mod debug_host;
pub mod envelope;
pub mod environment;
mod error;
pub mod events;
pub mod extension;
pub mod internal_storage;
pub mod loader;
pub mod manifest;
pub mod messaging;
pub mod resources;
pub mod rpc;
pub mod sandbox;
pub mod shims;
pub mod state;
pub mod url_matcher;

use std::{collections::HashMap, rc::Rc};

use boa_engine::{Context, JsError, JsValue};
use exthost_api::{
    dialogs::{Dialogs, LogDialogs},
    install_page, PageOptions,
};
use exthost_core::{promise, Clock, Runtime, SystemClock};
use exthost_transform::Transformer;
use serde_json::json;
use url::Url;

pub use error::{Error, Result};

use crate::{
    config::HostConfig,
    extension::Extension,
    manifest::Manifest,
    resources::is_extension_url,
    rpc::{FrameworkRpc, HostRpc},
    state::{HostState, Services},
};

/// Everything needed to bring up a host page.
pub struct HostOptions {
    pub url: Url,
    pub rpc: Rc<dyn HostRpc>,
    pub config: HostConfig,
    pub clock: Rc<dyn Clock>,
    pub dialogs: Rc<dyn Dialogs>,
}

impl HostOptions {
    pub fn new(url: Url, rpc: Rc<dyn HostRpc>) -> Self {
        Self {
            url,
            rpc,
            config: HostConfig::default(),
            clock: Rc::new(SystemClock::default()),
            dialogs: Rc::new(LogDialogs::default()),
        }
    }
}

pub struct ExtensionHost {
    runtime: Runtime,
    state: HostState,
}

impl ExtensionHost {
    pub fn new(options: HostOptions) -> Result<Self> {
        let mut runtime = Runtime::with_clock(options.clock)?;
        let debug = options.config.is_debug(options.url.host_str());
        let page = install_page(
            runtime.context(),
            PageOptions {
                url: options.url.clone(),
                dialogs: options.dialogs,
            },
        )?;
        let state = HostState::new(
            page,
            runtime.realm().clone(),
            Services {
                rpc: FrameworkRpc::new(options.rpc),
                transformer: Rc::new(Transformer::new()),
                config: options.config,
                debug,
            },
        );
        log::info!("host page at {} (debug: {debug})", options.url);

        if !is_extension_url(options.url.as_str()) {
            report_navigation(&state, runtime.context());
        }
        Ok(Self { runtime, state })
    }

    /// Registers an extension for this page. See
    /// [`controller::register_web_extension`].
    pub fn register_web_extension(
        &mut self,
        id: &str,
        manifest: Manifest,
        preloaded: HashMap<String, String>,
    ) -> Result<Option<Extension>> {
        controller::register_web_extension(&self.state, id, manifest, preloaded, self.runtime.context())
    }

    pub fn extension(&self, id: &str) -> Option<Extension> {
        self.state.extension(id)
    }

    pub fn state(&self) -> &HostState {
        &self.state
    }

    pub fn runtime(&mut self) -> &mut Runtime {
        &mut self.runtime
    }

    pub fn context(&mut self) -> &mut Context {
        self.runtime.context()
    }

    /// Lets the page finish loading (`DOMContentLoaded`, then `load`).
    pub fn finish_loading(&mut self) -> Result<()> {
        self.state.page().finish_loading(self.runtime.context())?;
        Ok(())
    }

    /// Simulates a user click on the page's document.
    pub fn click(&mut self) -> Result<()> {
        let page = self.state.page();
        page.click(&page.document(), self.runtime.context())?;
        Ok(())
    }

    /// Runs jobs, due timers and host events until none is left.
    pub fn run_until_stalled(&mut self) {
        loop {
            self.runtime.run_until_stalled();
            let events = self.state.rpc().poll_events();
            if events.is_empty() {
                break;
            }
            for event in events {
                messaging::handle_host_event(&self.state, event, self.runtime.context());
            }
        }
    }

    /// Like [`ExtensionHost::run_until_stalled`] while `ms` milliseconds of
    /// timer time pass.
    pub fn run_for(&mut self, ms: u64) {
        let timers = self.runtime.timers().clone();
        let clock = timers.clock();
        let deadline = clock.now() + ms;
        loop {
            self.run_until_stalled();
            match timers.next_deadline() {
                Some(next) if next <= deadline => clock.sleep_until(next),
                _ => break,
            }
        }
        clock.sleep_until(deadline);
        self.run_until_stalled();
    }

    /// Drives the page until `value` settles. Non-promises are returned as
    /// they are.
    pub fn block_on(&mut self, value: &JsValue) -> Result<JsValue> {
        let timers = self.runtime.timers().clone();
        loop {
            self.run_until_stalled();
            match promise::state(value) {
                Some(Ok(value)) => return Ok(value),
                Some(Err(reason)) => return Err(JsError::from_opaque(reason).into()),
                None => {}
            }
            match timers.next_deadline() {
                Some(next) => timers.clock().sleep_until(next),
                None => {
                    return Err(exthost_core::Error::Unsettled {
                        description: "the page is idle".to_string(),
                    }
                    .into())
                }
            }
        }
    }

    /// Evaluates `src` on the page itself.
    pub fn eval(&mut self, src: &str) -> Result<JsValue> {
        Ok(self.runtime.eval(src)?)
    }

    /// Evaluates `src` as an inline script of extension `id` and waits for
    /// its completion value.
    pub fn eval_in_extension(&mut self, id: &str, src: &str) -> Result<JsValue> {
        let extension = self.state.extension(id).ok_or_else(|| Error::InvalidEnvironment {
            message: format!("{id} is not registered"),
        })?;
        let evaluation = extension
            .loader()
            .evaluate_inline_script(src, self.runtime.context())?;
        self.block_on(&evaluation)
    }

    /// Rejections nobody handled since the last call.
    pub fn take_unhandled_rejections(&mut self) -> Vec<JsValue> {
        self.runtime.take_unhandled_rejections()
    }
}

fn notify_navigation(state: &HostState, status: &str) {
    let location = state.page().url().map(|url| url.to_string()).unwrap_or_default();
    messaging::send_internal(
        state,
        None,
        json!({ "type": "onWebNavigationChanged", "status": status, "location": location }),
    );
}

/// Tells the host about the page's own navigation: committed now,
/// `DOMContentLoaded` and `load` as they happen.
fn report_navigation(state: &HostState, context: &mut Context) {
    notify_navigation(state, "onCommitted");
    let page = state.page();
    for (target, event, status) in [
        (page.document(), "DOMContentLoaded", "onDOMContentLoaded"),
        (page.window(), "load", "onCompleted"),
    ] {
        let listener = promise::callback(
            "",
            1,
            (state.clone(), status.to_string()),
            |_, _, (state, status): &(HostState, String), _| {
                notify_navigation(state, status);
                Ok(JsValue::undefined())
            },
            context,
        );
        page.add_listener(&target, event, listener.into(), false, true);
    }
}
