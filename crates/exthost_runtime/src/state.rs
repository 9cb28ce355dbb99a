//! Process-scoped state of one host page.
//!
//! Everything that lives exactly as long as the page does (listener pools,
//! pending two-way messages, the registered extensions, the global snapshot)
//! sits behind one [`HostState`] handle. The handle is cheap to clone and is
//! captured by every native function the shims install.

use std::{collections::BTreeMap, rc::Rc};

use boa_engine::{object::builtins::JsFunction, Context, JsData, JsObject, JsResult, JsValue};
use boa_gc::{Finalize, Gc, GcRefCell, Trace};
use exthost_api::{dialogs::DialogsHandle, dom::Page};
use exthost_core::{reflect, Realm, Timers};
use exthost_transform::Transformer;

use crate::{config::HostConfig, extension::Extension, rpc::FrameworkRpc};

/// Services shared by every extension of the page.
pub struct Services {
    pub rpc: FrameworkRpc,
    pub transformer: Rc<Transformer>,
    pub config: HostConfig,
    pub debug: bool,
}

/// Who an event is delivered to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Every registered ID (`'*'`).
    All,
    One(String),
    Many(Vec<String>),
}

impl Target {
    fn includes(&self, id: &str) -> bool {
        match self {
            Target::All => true,
            Target::One(target) => target == id,
            Target::Many(targets) => targets.iter().any(|target| target == id),
        }
    }
}

#[derive(Trace, Finalize)]
struct Shared {
    page: Page,
    page_realm: Realm,
    /// event kind -> extension (or port end) ID -> listeners, in insertion order
    pools: BTreeMap<String, BTreeMap<String, Vec<JsObject>>>,
    /// message ID -> (resolve, reject)
    pending: BTreeMap<String, (JsFunction, JsFunction)>,
    extensions: BTreeMap<String, Extension>,
    /// Own property descriptors of the real window, copied onto a
    /// null-prototype object the first time a sandbox needs them.
    snapshot: Option<JsObject>,
}

#[derive(Trace, Finalize, JsData, Clone)]
pub struct HostState {
    shared: Gc<GcRefCell<Shared>>,
    #[unsafe_ignore_trace]
    services: Rc<Services>,
}

impl HostState {
    pub fn new(page: Page, page_realm: Realm, services: Services) -> Self {
        Self {
            shared: Gc::new(GcRefCell::new(Shared {
                page,
                page_realm,
                pools: BTreeMap::new(),
                pending: BTreeMap::new(),
                extensions: BTreeMap::new(),
                snapshot: None,
            })),
            services: Rc::new(services),
        }
    }

    pub fn rpc(&self) -> &FrameworkRpc {
        &self.services.rpc
    }

    pub fn transformer(&self) -> Rc<Transformer> {
        self.services.transformer.clone()
    }

    pub fn config(&self) -> &HostConfig {
        &self.services.config
    }

    pub fn is_debug(&self) -> bool {
        self.services.debug
    }

    pub fn page(&self) -> Page {
        self.shared.borrow().page.clone()
    }

    /// The realm whose global object is the real `window`.
    pub fn page_realm(&self) -> Realm {
        self.shared.borrow().page_realm.clone()
    }

    pub fn timers(&self) -> Option<Timers> {
        self.page_realm().host_defined::<Timers>()
    }

    pub fn dialogs(&self) -> Option<DialogsHandle> {
        self.page_realm().host_defined::<DialogsHandle>()
    }

    pub fn extension(&self, id: &str) -> Option<Extension> {
        self.shared.borrow().extensions.get(id).cloned()
    }

    pub fn extensions(&self) -> Vec<Extension> {
        self.shared.borrow().extensions.values().cloned().collect()
    }

    pub(crate) fn insert_extension(&self, extension: Extension) {
        self.shared
            .borrow_mut()
            .extensions
            .insert(extension.id().to_string(), extension);
    }

    /// The real window's own property descriptors, taken once per page.
    pub(crate) fn global_snapshot(&self, context: &mut Context) -> JsResult<JsObject> {
        if let Some(snapshot) = self.shared.borrow().snapshot.clone() {
            return Ok(snapshot);
        }
        let window = self.page().window();
        let snapshot = JsObject::with_null_proto();
        for (key, descriptor) in reflect::own_properties(&window, context)? {
            snapshot.define_property_or_throw(key, descriptor, context)?;
        }
        log::trace!("global snapshot taken");
        self.shared.borrow_mut().snapshot = Some(snapshot.clone());
        Ok(snapshot)
    }

    pub fn add_listener(&self, kind: &str, id: &str, listener: JsObject) {
        let mut shared = self.shared.borrow_mut();
        let pool = shared
            .pools
            .entry(kind.to_string())
            .or_default()
            .entry(id.to_string())
            .or_default();
        if !pool.iter().any(|known| JsObject::equals(known, &listener)) {
            pool.push(listener);
        }
    }

    pub fn remove_listener(&self, kind: &str, id: &str, listener: &JsObject) {
        if let Some(pool) = self
            .shared
            .borrow_mut()
            .pools
            .get_mut(kind)
            .and_then(|ids| ids.get_mut(id))
        {
            pool.retain(|known| !JsObject::equals(known, listener));
        }
    }

    pub fn has_listener(&self, kind: &str, id: &str, listener: &JsObject) -> bool {
        self.shared
            .borrow()
            .pools
            .get(kind)
            .and_then(|ids| ids.get(id))
            .map_or(false, |pool| pool.iter().any(|known| JsObject::equals(known, listener)))
    }

    pub fn clear_listeners(&self, kind: &str, id: &str) {
        if let Some(ids) = self.shared.borrow_mut().pools.get_mut(kind) {
            ids.remove(id);
        }
    }

    pub fn listener_count(&self, kind: &str, id: &str) -> usize {
        self.shared
            .borrow()
            .pools
            .get(kind)
            .and_then(|ids| ids.get(id))
            .map_or(0, Vec::len)
    }

    fn listeners(&self, kind: &str, target: &Target) -> Vec<(String, Vec<JsObject>)> {
        self.shared
            .borrow()
            .pools
            .get(kind)
            .map(|ids| {
                ids.iter()
                    .filter(|(id, _)| target.includes(id))
                    .map(|(id, pool)| (id.clone(), pool.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Calls every listener of `kind` registered under an ID in `target`.
    ///
    /// Arguments are built per ID by `args`, inside the realm of the
    /// extension the ID belongs to, so every listener gets its own copy.
    /// Listener exceptions are logged and do not stop delivery. Returns the
    /// listeners' results.
    pub fn dispatch(
        &self,
        kind: &str,
        target: &Target,
        context: &mut Context,
        args: &dyn Fn(&mut Context) -> JsResult<Vec<JsValue>>,
    ) -> Vec<JsValue> {
        let mut results = Vec::new();
        for (id, listeners) in self.listeners(kind, target) {
            let realm = match self.extension(&id) {
                Some(extension) => extension.realm().clone(),
                None => Realm::current(context),
            };
            let context = &mut realm.context_handle(context);
            for listener in listeners {
                let result = args(context).and_then(|args| {
                    listener.call(&JsValue::undefined(), &args, context)
                });
                match result {
                    Ok(value) => results.push(value),
                    Err(err) => log::error!("Uncaught {err} (in {kind} listener of {id})"),
                }
            }
        }
        results
    }

    pub(crate) fn insert_pending(&self, message_id: &str, resolve: JsFunction, reject: JsFunction) {
        self.shared
            .borrow_mut()
            .pending
            .insert(message_id.to_string(), (resolve, reject));
    }

    pub(crate) fn take_pending(&self, message_id: &str) -> Option<(JsFunction, JsFunction)> {
        self.shared.borrow_mut().pending.remove(message_id)
    }

    pub fn pending_messages(&self) -> usize {
        self.shared.borrow().pending.len()
    }
}
