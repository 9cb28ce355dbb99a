use std::rc::Rc;

use boa_engine::JsObject;
use boa_gc::{Finalize, Trace};
use exthost_core::Realm;

use crate::{
    environment::Environment, loader::Loader, manifest::Manifest, resources::Resources,
    sandbox::Sandbox,
};

/// One registered extension: where its code runs and how it loads.
#[derive(Trace, Finalize, Clone)]
pub struct Extension {
    id: String,
    #[unsafe_ignore_trace]
    manifest: Rc<Manifest>,
    #[unsafe_ignore_trace]
    environment: Environment,
    realm: Realm,
    /// The global object the extension's code sees.
    global: JsObject,
    loader: Loader,
    #[unsafe_ignore_trace]
    resources: Rc<Resources>,
    sandbox: Option<Sandbox>,
}

impl Extension {
    pub(crate) fn new(
        id: &str,
        manifest: Rc<Manifest>,
        environment: Environment,
        global: JsObject,
        loader: Loader,
        resources: Rc<Resources>,
        sandbox: Option<Sandbox>,
    ) -> Self {
        Self {
            id: id.to_string(),
            manifest,
            environment,
            realm: loader.realm().clone(),
            global,
            loader,
            resources,
            sandbox,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn realm(&self) -> &Realm {
        &self.realm
    }

    pub fn global(&self) -> &JsObject {
        &self.global
    }

    pub fn loader(&self) -> &Loader {
        &self.loader
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    /// The content-script sandbox, `None` for extension pages.
    pub fn sandbox(&self) -> Option<&Sandbox> {
        self.sandbox.as_ref()
    }
}
