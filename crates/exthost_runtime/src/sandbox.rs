//! Content-script sandboxes.
//!
//! A sandbox is a fresh realm whose global object stands in for the page's
//! `window`. Everything the page offers that the realm lacks is copied over
//! from a snapshot of the window's own descriptors, with functions replaced
//! by forwarding wrappers: the wrapper runs the page's function with its
//! receiver and arguments mapped from sandbox objects to their real
//! counterparts, and maps the result back. Constructors keep working with
//! `new`, `instanceof` and `extends`, and their prototypes are cloned into
//! chains that end at the sandbox's own `Object.prototype`.

use boa_engine::{
    js_string,
    object::FunctionObjectBuilder,
    property::{PropertyDescriptor, PropertyKey},
    Context, JsArgs, JsObject, JsResult, JsSymbol, JsValue, NativeFunction,
};
use boa_gc::{Finalize, Gc, GcRefCell, Trace};
use exthost_core::{reflect, value::get_string, Realm, Timers, WeakTable};
use url::Url;

use crate::{shims::location::location_proxy, state::HostState};

pub struct SandboxOptions {
    /// Globals read from the page on first access instead of copied.
    pub lazy_globals: Vec<String>,
    /// The address the sandbox's `location` reports, when it differs from
    /// the page's own.
    pub location: Option<Url>,
}

#[derive(Trace, Finalize)]
struct SandboxState {
    real_window: JsObject,
    root: JsObject,
    /// sandbox stand-in -> real object
    real_of: WeakTable,
    /// real object -> sandbox stand-in
    stand_ins: WeakTable,
    /// real function -> wrapper
    wrappers: WeakTable,
    /// wrapper -> real function
    wrapped: WeakTable,
    /// real prototype -> clone
    prototypes: WeakTable,
    real_object_prototype: JsObject,
    object_prototype: JsObject,
}

#[derive(Trace, Finalize, Clone)]
pub struct Sandbox {
    state: Gc<GcRefCell<SandboxState>>,
    realm: Realm,
}

fn is_name(key: &PropertyKey, name: &str) -> bool {
    matches!(key, PropertyKey::String(s) if s.to_std_string_escaped() == name)
}

impl Sandbox {
    /// Builds a sandbox over the page of `host`.
    pub fn create(host: &HostState, options: SandboxOptions, context: &mut Context) -> JsResult<Self> {
        let page = host.page();
        let page_realm = host.page_realm();
        let real_window = page.window();
        let real_document = page.document();
        let real_object_prototype = page_realm
            .context_handle(context)
            .intrinsics()
            .constructors()
            .object()
            .prototype();
        let snapshot = host.global_snapshot(context)?;

        let realm = Realm::new(context)?;
        if let Some(timers) = page_realm.host_defined::<Timers>() {
            realm.insert_host_defined(timers);
        }
        let context = &mut realm.context_handle(context);
        let root = context.global_object();
        let object_prototype = context.intrinsics().constructors().object().prototype();

        let sandbox = Self {
            state: Gc::new(GcRefCell::new(SandboxState {
                real_window: real_window.clone(),
                root: root.clone(),
                real_of: WeakTable::new(context)?,
                stand_ins: WeakTable::new(context)?,
                wrappers: WeakTable::new(context)?,
                wrapped: WeakTable::new(context)?,
                prototypes: WeakTable::new(context)?,
                real_object_prototype,
                object_prototype,
            })),
            realm: realm.clone(),
        };
        sandbox.stand_in(&root, &real_window, context)?;

        if let Some(prototype) = real_window.prototype() {
            let clone = sandbox.clone_prototype(&prototype, context)?;
            root.set_prototype(Some(clone));
        }
        let document = sandbox.clone_object(&real_document, context)?;
        let location = match options.location {
            Some(url) => location_proxy(url, page.location(), context)?,
            None => page.location(),
        };

        for (key, descriptor) in reflect::own_properties(&snapshot, context)? {
            if reflect::own_property(&root, &key, context)?.is_some() {
                continue;
            }
            if options
                .lazy_globals
                .iter()
                .any(|name| is_name(&key, name))
            {
                continue;
            }
            let descriptor = if is_name(&key, "window") || is_name(&key, "self") {
                PropertyDescriptor::builder()
                    .value(root.clone())
                    .writable(false)
                    .enumerable(true)
                    .configurable(false)
                    .build()
            } else if is_name(&key, "document") {
                PropertyDescriptor::builder()
                    .value(document.clone())
                    .writable(false)
                    .enumerable(true)
                    .configurable(false)
                    .build()
            } else if is_name(&key, "location") {
                PropertyDescriptor::builder()
                    .value(location.clone())
                    .writable(false)
                    .enumerable(true)
                    .configurable(false)
                    .build()
            } else {
                sandbox.map_descriptor(&descriptor, context)?
            };
            root.define_property_or_throw(key, descriptor, context)?;
        }

        for name in &options.lazy_globals {
            sandbox.define_lazy_global(name, context)?;
        }
        log::debug!("sandbox created over {:?}", page.url().map(|url| url.to_string()));
        Ok(sandbox)
    }

    pub fn realm(&self) -> &Realm {
        &self.realm
    }

    /// The sandbox's global object.
    pub fn global(&self) -> JsObject {
        self.state.borrow().root.clone()
    }

    fn define_lazy_global(&self, name: &str, context: &mut Context) -> JsResult<()> {
        let getter = FunctionObjectBuilder::new(
            context.realm(),
            NativeFunction::from_copy_closure_with_captures(
                |_, _, (sandbox, name): &(Sandbox, String), context| {
                    let (real_window, root) = {
                        let state = sandbox.state.borrow();
                        (state.real_window.clone(), state.root.clone())
                    };
                    let value = real_window.get(js_string!(name.as_str()), context)?;
                    let value = sandbox.to_sandbox(value, context)?;
                    root.define_property_or_throw(
                        js_string!(name.as_str()),
                        PropertyDescriptor::builder()
                            .value(value.clone())
                            .writable(true)
                            .enumerable(true)
                            .configurable(true),
                        context,
                    )?;
                    Ok(value)
                },
                (self.clone(), name.to_string()),
            ),
        )
        .name(js_string!(name))
        .build();
        let root = self.global();
        root.define_property_or_throw(
            js_string!(name),
            PropertyDescriptor::builder()
                .get(getter)
                .enumerable(true)
                .configurable(true),
            context,
        )?;
        Ok(())
    }

    fn map_descriptor(&self, descriptor: &PropertyDescriptor, context: &mut Context) -> JsResult<PropertyDescriptor> {
        let mut builder = PropertyDescriptor::builder();
        if let Some(enumerable) = descriptor.enumerable() {
            builder = builder.enumerable(enumerable);
        }
        if let Some(configurable) = descriptor.configurable() {
            builder = builder.configurable(configurable);
        }
        if descriptor.is_accessor_descriptor() {
            if let Some(get) = descriptor.get() {
                builder = builder.get(self.to_sandbox(get.clone(), context)?);
            }
            if let Some(set) = descriptor.set() {
                builder = builder.set(self.to_sandbox(set.clone(), context)?);
            }
        } else {
            if let Some(value) = descriptor.value() {
                builder = builder.value(self.to_sandbox(value.clone(), context)?);
            }
            if let Some(writable) = descriptor.writable() {
                builder = builder.writable(writable);
            }
        }
        Ok(builder.build())
    }

    /// Maps a page value into the sandbox: functions become wrappers, the
    /// window becomes the sandbox global.
    fn to_sandbox(&self, value: JsValue, context: &mut Context) -> JsResult<JsValue> {
        let Some(object) = value.as_object() else {
            return Ok(value);
        };
        let (stand_ins, wrapped) = {
            let state = self.state.borrow();
            (state.stand_ins.clone(), state.wrapped.clone())
        };
        if let Some(stand_in) = stand_ins.get(object, context)? {
            return Ok(stand_in.into());
        }
        if wrapped.contains(object, context)? {
            return Ok(value);
        }
        if object.is_callable() {
            return Ok(self.wrap_function(object, context)?.into());
        }
        Ok(value)
    }

    /// Registers `stand_in` as the sandbox side of `real`.
    fn stand_in(&self, stand_in: &JsObject, real: &JsObject, context: &mut Context) -> JsResult<()> {
        let (real_of, stand_ins) = {
            let state = self.state.borrow();
            (state.real_of.clone(), state.stand_ins.clone())
        };
        real_of.insert(stand_in, real, context)?;
        stand_ins.insert(real, stand_in, context)
    }

    /// Maps a sandbox value to what the page's functions expect.
    fn to_real(&self, value: &JsValue, context: &mut Context) -> JsResult<JsValue> {
        let Some(object) = value.as_object() else {
            return Ok(value.clone());
        };
        let real_of = self.state.borrow().real_of.clone();
        Ok(real_of
            .get(object, context)?
            .map_or_else(|| value.clone(), JsValue::from))
    }

    fn to_real_all(&self, args: &[JsValue], context: &mut Context) -> JsResult<Vec<JsValue>> {
        args.iter().map(|arg| self.to_real(arg, context)).collect()
    }

    fn receiver_to_real(&self, this: &JsValue, context: &mut Context) -> JsResult<JsValue> {
        if this.is_null_or_undefined() {
            return Ok(self.state.borrow().real_window.clone().into());
        }
        self.to_real(this, context)
    }

    fn forward_call(&self, real: &JsObject, this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        let this = self.receiver_to_real(this, context)?;
        let args = self.to_real_all(args, context)?;
        let result = real.call(&this, &args, context)?;
        self.to_sandbox(result, context)
    }

    fn wrap_function(&self, real: &JsObject, context: &mut Context) -> JsResult<JsObject> {
        let (wrappers, wrapped) = {
            let state = self.state.borrow();
            (state.wrappers.clone(), state.wrapped.clone())
        };
        if let Some(wrapper) = wrappers.get(real, context)? {
            return Ok(wrapper);
        }
        let name = get_string(real, "name", context)?.unwrap_or_default();
        let length = real
            .get(js_string!("length"), context)?
            .to_length(context)
            .unwrap_or(0);
        let constructor = real.is_constructor();
        let captures = (self.clone(), real.clone());
        let function = if constructor {
            // constructible natives see `undefined` when called and the
            // new target when constructed
            NativeFunction::from_copy_closure_with_captures(
                |this, args, (sandbox, real): &(Sandbox, JsObject), context| match this.as_object() {
                    Some(new_target) => {
                        let args = sandbox.to_real_all(args, context)?;
                        let object = real.construct(&args, Some(new_target), context)?;
                        sandbox.to_sandbox(object.into(), context)
                    }
                    None => sandbox.forward_call(real, this, args, context),
                },
                captures,
            )
        } else {
            NativeFunction::from_copy_closure_with_captures(
                |this, args, (sandbox, real): &(Sandbox, JsObject), context| {
                    sandbox.forward_call(real, this, args, context)
                },
                captures,
            )
        };
        let wrapper = FunctionObjectBuilder::new(&self.realm.inner, function)
            .name(js_string!(name.as_str()))
            .length(length as usize)
            .constructor(constructor)
            .build();
        let wrapper = JsObject::from(wrapper);
        wrappers.insert(real, &wrapper, context)?;
        wrapped.insert(&wrapper, real, context)?;

        if constructor {
            self.mirror_constructor(real, &wrapper, context)?;
        }
        Ok(wrapper)
    }

    /// Gives a constructor wrapper the statics, the cloned `prototype` and
    /// an `instanceof` that accepts both sandbox and page instances.
    fn mirror_constructor(&self, real: &JsObject, wrapper: &JsObject, context: &mut Context) -> JsResult<()> {
        for (key, descriptor) in reflect::own_properties(real, context)? {
            if ["prototype", "name", "length"]
                .iter()
                .any(|name| is_name(&key, name))
            {
                continue;
            }
            let descriptor = self.map_descriptor(&descriptor, context)?;
            wrapper.define_property_or_throw(key, descriptor, context)?;
        }

        let Some(real_prototype) = real.get(js_string!("prototype"), context)?.as_object().cloned() else {
            return Ok(());
        };
        let prototype = self.clone_prototype(&real_prototype, context)?;
        wrapper.define_property_or_throw(
            js_string!("prototype"),
            PropertyDescriptor::builder()
                .value(prototype.clone())
                .writable(false)
                .enumerable(false)
                .configurable(false),
            context,
        )?;

        let has_instance = FunctionObjectBuilder::new(
            &self.realm.inner,
            NativeFunction::from_copy_closure_with_captures(
                |_, args, (prototype, real_prototype): &(JsObject, JsObject), _| {
                    let Some(mut object) = args.get_or_undefined(0).as_object().cloned() else {
                        return Ok(false.into());
                    };
                    while let Some(parent) = object.prototype() {
                        if JsObject::equals(&parent, prototype) || JsObject::equals(&parent, real_prototype) {
                            return Ok(true.into());
                        }
                        object = parent;
                    }
                    Ok(false.into())
                },
                (prototype, real_prototype),
            ),
        )
        .name(js_string!("[Symbol.hasInstance]"))
        .length(1)
        .build();
        wrapper.define_property_or_throw(
            JsSymbol::has_instance(),
            PropertyDescriptor::builder()
                .value(has_instance)
                .writable(false)
                .enumerable(false)
                .configurable(true),
            context,
        )?;
        Ok(())
    }

    /// Clones a page prototype (and its chain) into the sandbox.
    fn clone_prototype(&self, real: &JsObject, context: &mut Context) -> JsResult<JsObject> {
        let prototypes = {
            let state = self.state.borrow();
            if JsObject::equals(real, &state.real_object_prototype) {
                return Ok(state.object_prototype.clone());
            }
            state.prototypes.clone()
        };
        if let Some(clone) = prototypes.get(real, context)? {
            return Ok(clone);
        }
        let clone = JsObject::with_null_proto();
        prototypes.insert(real, &clone, context)?;

        let parent = match real.prototype() {
            Some(parent) => Some(self.clone_prototype(&parent, context)?),
            None => None,
        };
        clone.set_prototype(parent);
        for (key, descriptor) in reflect::own_properties(real, context)? {
            let descriptor = self.map_descriptor(&descriptor, context)?;
            clone.define_property_or_throw(key, descriptor, context)?;
        }
        Ok(clone)
    }

    /// A sandbox stand-in for a page object: same shape, cloned prototype
    /// chain, and registered so wrappers map it back.
    fn clone_object(&self, real: &JsObject, context: &mut Context) -> JsResult<JsObject> {
        let clone = JsObject::with_null_proto();
        self.stand_in(&clone, real, context)?;
        let prototype = match real.prototype() {
            Some(prototype) => Some(self.clone_prototype(&prototype, context)?),
            None => None,
        };
        clone.set_prototype(prototype);
        for (key, descriptor) in reflect::own_properties(real, context)? {
            let descriptor = self.map_descriptor(&descriptor, context)?;
            clone.define_property_or_throw(key, descriptor, context)?;
        }
        Ok(clone)
    }
}
