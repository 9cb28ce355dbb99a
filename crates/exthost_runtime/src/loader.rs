//! System-style module loader, one per realm.
//!
//! Every compiled module is an executor `(function () { arguments[0].register(deps, declare) })`.
//! The loader hands the executor a registrar, links the declared module
//! against its dependencies (namespaces flow into the dependant through its
//! setters) and evaluates the graph in post-order. Module records are keyed
//! by absolute URL and instantiated at most once per realm.

use std::{collections::BTreeMap, rc::Rc};

use boa_engine::{
    js_string,
    object::{builtins::JsPromise, FunctionObjectBuilder, ObjectInitializer},
    property::{Attribute, PropertyDescriptor, PropertyKey},
    Context, JsArgs, JsError, JsNativeError, JsObject, JsResult, JsSymbol, JsValue,
    NativeFunction,
};
use boa_gc::{Finalize, Gc, GcRefCell, Trace};
use exthost_api::url::{parse_url, random_uuid};
use exthost_core::{promise, reflect, value::to_rust_string, Realm};
use exthost_transform::{parse_prebuilt_script, Mode, Transformer};

use crate::{Error, Result};

/// Key prefix of modules that have no URL of their own (inline text).
pub const INLINE_PREFIX: &str = "script:";

/// Where module text comes from.
pub trait ModuleFetcher {
    /// The source of the module at `url`, `None` when there is none.
    fn fetch_source_text(&self, url: &str) -> Result<Option<String>>;

    /// A prebuilt transform of the module at `url` for `mode`, if one was
    /// shipped.
    fn fetch_prebuilt(&self, mode: Mode, url: &str) -> Result<Option<String>>;
}

#[derive(Trace, Finalize)]
struct ModuleRecord {
    deps: Vec<String>,
    setters: Vec<JsValue>,
    execute: JsValue,
    namespace: JsObject,
    evaluation: Option<JsValue>,
    evaluating: bool,
    /// Setters of the modules that import this one.
    importers: Vec<JsValue>,
}

impl ModuleRecord {
    fn new(namespace: JsObject) -> Self {
        Self {
            deps: Vec::new(),
            setters: Vec::new(),
            execute: JsValue::undefined(),
            namespace,
            evaluation: None,
            evaluating: false,
            importers: Vec::new(),
        }
    }
}

#[derive(Trace, Finalize)]
struct InlineSource {
    text: String,
    #[unsafe_ignore_trace]
    mode: Mode,
}

#[derive(Trace, Finalize, Default)]
struct LoaderState {
    records: BTreeMap<String, ModuleRecord>,
    inline: BTreeMap<String, InlineSource>,
    registration: Option<(JsObject, JsObject)>,
    register_calls: u32,
    vm_counter: u32,
    sentinel: Option<JsObject>,
}

#[derive(Trace, Finalize, Clone)]
pub struct Loader {
    state: Gc<GcRefCell<LoaderState>>,
    realm: Realm,
    /// Names anonymous scripts `debugger://<name>/VM<n>`.
    name: String,
    #[unsafe_ignore_trace]
    fetcher: Rc<dyn ModuleFetcher>,
    #[unsafe_ignore_trace]
    transformer: Rc<Transformer>,
}

fn type_error(message: impl Into<String>) -> JsError {
    JsNativeError::typ().with_message(message.into()).into()
}

fn array_values(value: &JsValue, context: &mut Context) -> JsResult<Vec<JsValue>> {
    let Some(array) = value.as_object() else {
        return Ok(Vec::new());
    };
    let length = array.get(js_string!("length"), context)?.to_length(context)?;
    (0..length).map(|index| array.get(index, context)).collect()
}

fn define_value(object: &JsObject, key: PropertyKey, value: JsValue, context: &mut Context) -> JsResult<()> {
    object.define_property_or_throw(
        key,
        PropertyDescriptor::builder()
            .value(value)
            .writable(true)
            .enumerable(true)
            .configurable(true),
        context,
    )?;
    Ok(())
}

impl Loader {
    pub fn new(
        realm: Realm,
        name: &str,
        fetcher: Rc<dyn ModuleFetcher>,
        transformer: Rc<Transformer>,
    ) -> Self {
        Self {
            state: Gc::new(GcRefCell::new(LoaderState::default())),
            realm,
            name: name.to_string(),
            fetcher,
            transformer,
        }
    }

    pub fn realm(&self) -> &Realm {
        &self.realm
    }

    /// The namespace of an instantiated module.
    pub fn namespace(&self, url: &str) -> Option<JsObject> {
        self.state
            .borrow()
            .records
            .get(url)
            .map(|record| record.namespace.clone())
    }

    pub fn is_instantiated(&self, url: &str) -> bool {
        self.state.borrow().records.contains_key(url)
    }

    fn is_inline_key(&self, specifier: &str) -> bool {
        if !specifier.starts_with(INLINE_PREFIX) {
            return false;
        }
        let state = self.state.borrow();
        state.inline.contains_key(specifier) || state.records.contains_key(specifier)
    }

    fn location_href(&self, context: &mut Context) -> JsResult<String> {
        let global = self.realm.global_object(context);
        let location = global.get(js_string!("location"), context)?;
        match location.as_object() {
            Some(location) => {
                let href = location.get(js_string!("href"), context)?;
                to_rust_string(&href, context)
            }
            None => Ok("about:blank".to_string()),
        }
    }

    /// Resolves `specifier` against `parent`, or against the realm's
    /// `location` for top-level requests.
    pub fn resolve(&self, specifier: &str, parent: Option<&str>, context: &mut Context) -> JsResult<String> {
        if self.is_inline_key(specifier) {
            return Ok(specifier.to_string());
        }
        let base = match parent {
            Some(parent) if !parent.starts_with(INLINE_PREFIX) => parent.to_string(),
            _ => self.location_href(context)?,
        };
        parse_url(specifier, Some(&base))
            .map(|url| url.to_string())
            .ok_or_else(|| {
                type_error(format!(
                    "Failed to resolve module specifier '{specifier}' from '{base}'"
                ))
            })
    }

    fn next_vm_name(&self) -> String {
        let mut state = self.state.borrow_mut();
        state.vm_counter += 1;
        format!("debugger://{}/VM{}", self.name, state.vm_counter)
    }

    /// The frozen, prototype-less object every `execute` runs with as `this`.
    fn sentinel(&self, context: &mut Context) -> JsResult<JsObject> {
        if let Some(sentinel) = self.state.borrow().sentinel.clone() {
            return Ok(sentinel);
        }
        let sentinel = JsObject::with_null_proto();
        reflect::freeze(&sentinel, context)?;
        self.state.borrow_mut().sentinel = Some(sentinel.clone());
        Ok(sentinel)
    }

    fn registrar(&self, context: &mut Context) -> JsObject {
        ObjectInitializer::new(context)
            .function(
                NativeFunction::from_copy_closure_with_captures(
                    |_, args, loader: &Loader, _| {
                        let deps = match args.get_or_undefined(0).as_object() {
                            Some(deps) if deps.is_array() => deps.clone(),
                            _ => return Err(type_error("register: dependencies must be an array")),
                        };
                        let declare = match args.get_or_undefined(1).as_object() {
                            Some(declare) if declare.is_callable() => declare.clone(),
                            _ => return Err(type_error("register: declare must be a function")),
                        };
                        let mut state = loader.state.borrow_mut();
                        state.register_calls += 1;
                        state.registration = Some((deps, declare));
                        Ok(JsValue::undefined())
                    },
                    self.clone(),
                ),
                js_string!("register"),
                2,
            )
            .build()
    }

    /// Runs a compiled executor and returns what it registered. Exactly one
    /// `register` call is accepted.
    fn run_executor(&self, compiled: &str, name: &str, context: &mut Context) -> JsResult<(JsObject, JsObject)> {
        {
            let mut state = self.state.borrow_mut();
            state.registration = None;
            state.register_calls = 0;
        }
        let executor = self.realm.eval_named(compiled, Some(name), context)?;
        let Some(executor) = executor.as_callable() else {
            return Err(type_error(format!("{name} did not compile to a module executor")));
        };
        let registrar = {
            let context = &mut self.realm.context_handle(context);
            self.registrar(context)
        };
        executor.call(&JsValue::undefined(), &[registrar.into()], context)?;

        let mut state = self.state.borrow_mut();
        let calls = state.register_calls;
        match (calls, state.registration.take()) {
            (1, Some(registration)) => Ok(registration),
            (0, _) => Err(type_error(format!("{name} never called register"))),
            _ => Err(type_error(format!("{name} called register {calls} times"))),
        }
    }

    fn compiled_module(&self, url: &str) -> JsResult<(String, bool)> {
        let inline = self
            .state
            .borrow()
            .inline
            .get(url)
            .map(|inline| (inline.text.clone(), inline.mode));
        if let Some((text, mode)) = inline {
            let compiled = self.transformer.transform(&text, mode, url).map_err(Error::from)?;
            return Ok((compiled, mode == Mode::Script));
        }
        if let Some(artifact) = self.fetcher.fetch_prebuilt(Mode::Module, url)? {
            log::trace!("using prebuilt module {url}");
            return Ok((artifact, false));
        }
        let source = self
            .fetcher
            .fetch_source_text(url)?
            .ok_or_else(|| type_error(format!("Failed to fetch dynamically imported module: {url}")))?;
        let compiled = self
            .transformer
            .transform(&source, Mode::Module, url)
            .map_err(Error::from)?;
        Ok((compiled, false))
    }

    fn instantiate(&self, url: &str, context: &mut Context) -> JsResult<()> {
        if self.is_instantiated(url) {
            return Ok(());
        }
        log::debug!("instantiating {url}");
        let (compiled, script) = self.compiled_module(url)?;
        let (deps, declare) = self.run_executor(&compiled, url, context)?;
        self.link(url, deps, declare, script, context)
    }

    fn link(
        &self,
        url: &str,
        deps: JsObject,
        declare: JsObject,
        script: bool,
        context: &mut Context,
    ) -> JsResult<()> {
        let context = &mut self.realm.context_handle(context);
        let namespace = JsObject::with_null_proto();
        namespace.define_property_or_throw(
            JsSymbol::to_string_tag(),
            PropertyDescriptor::builder()
                .value(js_string!("Module"))
                .writable(false)
                .enumerable(false)
                .configurable(false),
            context,
        )?;
        // the record exists before `declare` runs: hoisted exports land in it
        self.state
            .borrow_mut()
            .records
            .insert(url.to_string(), ModuleRecord::new(namespace));

        let result = self.declare(url, &deps, &declare, script, context);
        if result.is_err() {
            self.state.borrow_mut().records.remove(url);
        }
        result
    }

    fn declare(
        &self,
        url: &str,
        deps: &JsObject,
        declare: &JsObject,
        script: bool,
        context: &mut Context,
    ) -> JsResult<()> {
        let export = promise::callback("_export", 2, (self.clone(), url.to_string()), Self::export, context);
        let module_context = self.module_context(url, script, context)?;
        let declared = declare.call(
            &JsValue::undefined(),
            &[export.into(), module_context.into()],
            context,
        )?;
        let Some(declared) = declared.as_object() else {
            return Err(type_error("register: declare must return { setters, execute }"));
        };
        let setters = declared.get(js_string!("setters"), context)?;
        let setters = array_values(&setters, context)?;
        let execute = declared.get(js_string!("execute"), context)?;

        let mut resolved = Vec::new();
        for specifier in array_values(&JsValue::from(deps.clone()), context)? {
            let specifier = to_rust_string(&specifier, context)?;
            resolved.push(self.resolve(&specifier, Some(url), context)?);
        }
        if let Some(record) = self.state.borrow_mut().records.get_mut(url) {
            record.deps = resolved.clone();
            record.setters = setters.clone();
            record.execute = execute;
        }

        for (index, dep) in resolved.iter().enumerate() {
            self.instantiate(dep, context)?;
            let Some(setter) = setters.get(index).filter(|setter| setter.is_callable()) else {
                continue;
            };
            let namespace = {
                let mut state = self.state.borrow_mut();
                match state.records.get_mut(dep) {
                    Some(record) => {
                        record.importers.push(setter.clone());
                        record.namespace.clone()
                    }
                    None => continue,
                }
            };
            if let Some(setter) = setter.as_callable() {
                setter.call(&JsValue::undefined(), &[namespace.into()], context)?;
            }
        }
        Ok(())
    }

    /// `_export(name, value)` or `_export({ name: value, ... })`.
    fn export(
        _: &JsValue,
        args: &[JsValue],
        (loader, url): &(Loader, String),
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let (namespace, importers) = {
            let state = loader.state.borrow();
            let Some(record) = state.records.get(url) else {
                return Err(type_error(format!("{url} is not instantiated")));
            };
            (record.namespace.clone(), record.importers.clone())
        };
        let first = args.get_or_undefined(0);
        let returned = match first.as_object() {
            Some(exports) if args.len() == 1 => {
                for (key, descriptor) in reflect::own_properties(exports, context)? {
                    if descriptor.enumerable() == Some(true) {
                        let value = exports.get(key.clone(), context)?;
                        define_value(&namespace, key, value, context)?;
                    }
                }
                first.clone()
            }
            _ => {
                let key = first.to_property_key(context)?;
                let value = args.get_or_undefined(1).clone();
                define_value(&namespace, key, value.clone(), context)?;
                value
            }
        };
        for setter in importers {
            if let Some(setter) = setter.as_callable() {
                setter.call(&JsValue::undefined(), &[namespace.clone().into()], context)?;
            }
        }
        Ok(returned)
    }

    fn module_context(&self, url: &str, script: bool, context: &mut Context) -> JsResult<JsObject> {
        let captures = (self.clone(), url.to_string());
        let module_context = ObjectInitializer::new(context)
            .function(
                NativeFunction::from_copy_closure_with_captures(
                    |_, args, (loader, url): &(Loader, String), context| {
                        let specifier = to_rust_string(args.get_or_undefined(0), context);
                        Ok(match specifier {
                            Ok(specifier) => loader.import(&specifier, Some(url), context),
                            Err(err) => JsPromise::reject(err, context).into(),
                        })
                    },
                    captures.clone(),
                ),
                js_string!("import"),
                1,
            )
            .function(
                NativeFunction::from_copy_closure_with_captures(Self::live, captures.clone()),
                js_string!("live"),
                1,
            )
            .function(
                NativeFunction::from_copy_closure_with_captures(Self::reexport, captures),
                js_string!("reexport"),
                1,
            )
            .build();

        if script || url.starts_with(INLINE_PREFIX) {
            let getter = FunctionObjectBuilder::new(
                context.realm(),
                NativeFunction::from_fn_ptr(|_, _, _| {
                    Err(JsNativeError::syntax()
                        .with_message("Cannot use 'import.meta' outside a module")
                        .into())
                }),
            )
            .name(js_string!("meta"))
            .build();
            module_context.define_property_or_throw(
                js_string!("meta"),
                PropertyDescriptor::builder()
                    .get(getter)
                    .enumerable(true)
                    .configurable(false),
                context,
            )?;
        } else {
            let meta = ObjectInitializer::new(context)
                .property(js_string!("url"), js_string!(url), Attribute::all())
                .build();
            module_context.set(js_string!("meta"), meta, true, context)?;
        }
        Ok(module_context)
    }

    /// `_context.live({ name: getter })`: exports read through getters.
    fn live(
        _: &JsValue,
        args: &[JsValue],
        (loader, url): &(Loader, String),
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let Some(getters) = args.get_or_undefined(0).as_object().cloned() else {
            return Ok(JsValue::undefined());
        };
        let Some(namespace) = loader.namespace(url) else {
            return Err(type_error(format!("{url} is not instantiated")));
        };
        for key in reflect::own_keys(&getters, context)? {
            let getter = getters.get(key.clone(), context)?;
            namespace.define_property_or_throw(
                key,
                PropertyDescriptor::builder()
                    .get(getter)
                    .enumerable(true)
                    .configurable(true),
                context,
            )?;
        }
        Ok(JsValue::undefined())
    }

    /// `_context.reexport(namespace)`: `export * from`, minus `default` and
    /// names the module already exports.
    fn reexport(
        _: &JsValue,
        args: &[JsValue],
        (loader, url): &(Loader, String),
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let Some(source) = args.get_or_undefined(0).as_object().cloned() else {
            return Ok(JsValue::undefined());
        };
        let Some(namespace) = loader.namespace(url) else {
            return Err(type_error(format!("{url} is not instantiated")));
        };
        for key in reflect::own_keys(&source, context)? {
            let name = match &key {
                PropertyKey::Symbol(_) => continue,
                key => key.to_string(),
            };
            if name == "default" || reflect::own_property(&namespace, &key, context)?.is_some() {
                continue;
            }
            let getter = promise::callback(
                &name,
                0,
                (source.clone(), name.clone()),
                |_, _, (source, name): &(JsObject, String), context| {
                    source.get(js_string!(name.as_str()), context)
                },
                context,
            );
            namespace.define_property_or_throw(
                key,
                PropertyDescriptor::builder()
                    .get(getter)
                    .enumerable(true)
                    .configurable(true),
                context,
            )?;
        }
        Ok(JsValue::undefined())
    }

    /// Runs `execute` of `url` after its dependencies, at most once.
    /// Returns the evaluation promise.
    fn evaluate(&self, url: &str, context: &mut Context) -> JsResult<JsValue> {
        let deps = {
            let mut state = self.state.borrow_mut();
            let Some(record) = state.records.get_mut(url) else {
                return Err(type_error(format!("{url} is not instantiated")));
            };
            if let Some(evaluation) = &record.evaluation {
                return Ok(evaluation.clone());
            }
            if record.evaluating {
                // cycle: the module upstream is already running
                return Ok(JsPromise::resolve(JsValue::undefined(), context).into());
            }
            record.evaluating = true;
            record.deps.clone()
        };

        let mut pending = Vec::new();
        let mut failed = None;
        for dep in deps {
            let evaluation = self.evaluate(&dep, context)?;
            match promise::state(&evaluation) {
                Some(Ok(_)) => {}
                Some(Err(reason)) => {
                    failed = Some(reason);
                    break;
                }
                None => pending.push(evaluation),
            }
        }

        let evaluation = match failed {
            Some(reason) => JsPromise::reject(JsError::from_opaque(reason), context).into(),
            None if pending.is_empty() => self.run_execute(url, context)?,
            None => {
                let all = promise::all(pending, context)?;
                promise::when_settled(
                    all,
                    (self.clone(), url.to_string()),
                    |outcome, (loader, url): &(Loader, String), context| match outcome {
                        Ok(_) => loader.run_execute(url, context),
                        Err(reason) => Err(JsError::from_opaque(reason)),
                    },
                    context,
                )?
            }
        };

        if let Some(record) = self.state.borrow_mut().records.get_mut(url) {
            record.evaluation = Some(evaluation.clone());
            record.evaluating = false;
        }
        Ok(evaluation)
    }

    /// Calls `execute` with the sentinel receiver and returns a promise of
    /// its completion.
    fn run_execute(&self, url: &str, context: &mut Context) -> JsResult<JsValue> {
        let execute = match self.state.borrow().records.get(url) {
            Some(record) => record.execute.clone(),
            None => return Err(type_error(format!("{url} is not instantiated"))),
        };
        let sentinel = self.sentinel(context)?;
        let result = match execute.as_callable() {
            Some(execute) => execute.call(&sentinel.into(), &[], context),
            None => Ok(JsValue::undefined()),
        };
        Ok(match result {
            Ok(value) if value.as_promise().is_some() => value,
            Ok(_) => JsPromise::resolve(JsValue::undefined(), context).into(),
            Err(err) => JsPromise::reject(err, context).into(),
        })
    }

    fn try_import(&self, specifier: &str, parent: Option<&str>, context: &mut Context) -> JsResult<JsValue> {
        let url = self.resolve(specifier, parent, context)?;
        self.instantiate(&url, context)?;
        let evaluation = self.evaluate(&url, context)?;
        let namespace = self
            .namespace(&url)
            .ok_or_else(|| type_error(format!("{url} is not instantiated")))?;
        promise::when_settled(
            evaluation,
            namespace,
            |outcome, namespace: &JsObject, _| match outcome {
                Ok(_) => Ok(namespace.clone().into()),
                Err(reason) => Err(JsError::from_opaque(reason)),
            },
            context,
        )
    }

    /// `import(specifier)` from `parent`: a promise of the namespace.
    pub fn import(&self, specifier: &str, parent: Option<&str>, context: &mut Context) -> JsValue {
        let context = &mut self.realm.context_handle(context);
        let result = self.try_import(specifier, parent, context);
        if let Err(err) = &result {
            log::debug!("import of {specifier} failed: {err}");
        }
        promise::settled(result, context).into()
    }

    /// Loads `path` and evaluates it as a classic script. Scripts with a
    /// dynamic `import()` take the register path. Returns a promise that
    /// settles once the script (and anything it awaits) has run.
    pub fn evaluate_script(&self, path: &str, parent: Option<&str>, context: &mut Context) -> JsResult<JsValue> {
        let context = &mut self.realm.context_handle(context);
        let url = self.resolve(path, parent, context)?;

        if let Some(artifact) = self.fetcher.fetch_prebuilt(Mode::Script, &url)? {
            match parse_prebuilt_script(&artifact) {
                Some((true, body)) => return self.run_script_module(&url, body, context),
                Some((false, body)) => {
                    self.realm.eval_named(body, Some(&url), context)?;
                    return Ok(JsPromise::resolve(JsValue::undefined(), context).into());
                }
                None => log::warn!("Ignoring malformed prebuilt script for {url}"),
            }
        }

        let source = self
            .fetcher
            .fetch_source_text(&url)?
            .ok_or_else(|| Error::ResourceNotFound { path: url.clone() })?;
        let compiled = self
            .transformer
            .transform(&source, Mode::Script, &url)
            .map_err(Error::from)?;
        if self.transformer.has_dynamic_import(&source) {
            self.run_script_module(&url, &compiled, context)
        } else {
            self.realm.eval_named(&compiled, Some(&url), context)?;
            Ok(JsPromise::resolve(JsValue::undefined(), context).into())
        }
    }

    /// Registers script text compiled with its register wrapper under
    /// `key`, replacing any earlier record, and evaluates it.
    fn run_script_module(&self, key: &str, compiled: &str, context: &mut Context) -> JsResult<JsValue> {
        self.state.borrow_mut().records.remove(key);
        let (deps, declare) = self.run_executor(compiled, key, context)?;
        self.link(key, deps, declare, true, context)?;
        self.evaluate(key, context)
    }

    /// Loads `path` as a module: a promise of its namespace.
    pub fn evaluate_module(&self, path: &str, parent: Option<&str>, context: &mut Context) -> JsValue {
        self.import(path, parent, context)
    }

    /// Evaluates script text that has no file behind it. The result is a
    /// promise of the completion value (register-path scripts complete with
    /// `undefined`).
    pub fn evaluate_inline_script(&self, text: &str, context: &mut Context) -> JsResult<JsValue> {
        let context = &mut self.realm.context_handle(context);
        if self.transformer.has_dynamic_import(text) {
            let key = format!("{INLINE_PREFIX}{}", random_uuid());
            let compiled = self
                .transformer
                .transform(text, Mode::Script, &key)
                .map_err(Error::from)?;
            let evaluation = match self.run_script_module(&key, &compiled, context) {
                Ok(evaluation) => evaluation,
                Err(err) => {
                    self.state.borrow_mut().records.remove(&key);
                    return Err(err);
                }
            };
            // one-off keys are never imported again
            return promise::when_settled(
                evaluation,
                (self.clone(), key),
                |outcome, (loader, key), _| {
                    loader.state.borrow_mut().records.remove(key);
                    match outcome {
                        Ok(value) => Ok(value),
                        Err(reason) => Err(JsError::from_opaque(reason)),
                    }
                },
                context,
            );
        }
        let name = self.next_vm_name();
        let compiled = self
            .transformer
            .transform(text, Mode::Script, &name)
            .map_err(Error::from)?;
        let value = self.realm.eval_named(&compiled, Some(&name), context)?;
        Ok(JsPromise::resolve(value, context).into())
    }

    /// Evaluates module text under a one-off key: a promise of its namespace.
    pub fn evaluate_inline_module(&self, text: &str, context: &mut Context) -> JsValue {
        let key = format!("{INLINE_PREFIX}{}", random_uuid());
        self.state.borrow_mut().inline.insert(
            key.clone(),
            InlineSource {
                text: text.to_string(),
                mode: Mode::Module,
            },
        );
        let result = self.import(&key, None, context);
        self.state.borrow_mut().inline.remove(&key);
        result
    }
}

#[cfg(test)]
mod test {
    use std::{cell::RefCell, collections::HashMap};

    use exthost_core::Runtime;
    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Default)]
    struct Files {
        files: HashMap<String, String>,
        fetched: RefCell<Vec<String>>,
    }

    impl Files {
        fn with(files: &[(&str, &str)]) -> Self {
            Self {
                files: files
                    .iter()
                    .map(|(url, text)| (url.to_string(), text.to_string()))
                    .collect(),
                ..Default::default()
            }
        }
    }

    impl ModuleFetcher for Files {
        fn fetch_source_text(&self, url: &str) -> Result<Option<String>> {
            self.fetched.borrow_mut().push(url.to_string());
            Ok(self.files.get(url).cloned())
        }

        fn fetch_prebuilt(&self, mode: Mode, url: &str) -> Result<Option<String>> {
            Ok(self
                .files
                .get(&exthost_transform::prebuilt_path(url, 1, mode))
                .cloned())
        }
    }

    fn loader(rt: &mut Runtime, files: Files) -> (Loader, Rc<Files>) {
        let realm = rt.create_realm().unwrap();
        realm
            .eval(
                "globalThis.location = { href: 'https://example.com/dir/page.html' }",
                rt.context(),
            )
            .unwrap();
        let files = Rc::new(files);
        let loader = Loader::new(realm, "test", files.clone(), Rc::new(Transformer::new()));
        (loader, files)
    }

    fn settle(rt: &mut Runtime, value: &JsValue) -> JsResult<JsValue> {
        rt.run_until_stalled();
        match promise::state(value) {
            Some(Ok(value)) => Ok(value),
            Some(Err(reason)) => Err(JsError::from_opaque(reason)),
            None => panic!("promise still pending"),
        }
    }

    fn get(rt: &mut Runtime, object: &JsValue, key: &str) -> JsValue {
        object
            .as_object()
            .unwrap()
            .get(js_string!(key), rt.context())
            .unwrap()
    }

    #[test]
    fn links_and_evaluates_a_graph_once() {
        let mut rt = Runtime::new().unwrap();
        let (loader, _) = loader(
            &mut rt,
            Files::with(&[
                (
                    "https://example.com/dir/main.js",
                    "import { count, bump } from './counter.js'; bump(); export const seen = count;",
                ),
                (
                    "https://example.com/dir/counter.js",
                    "globalThis.runs = (globalThis.runs || 0) + 1; export let count = 0; export function bump() { count++ }",
                ),
            ]),
        );

        let first = loader.import("./main.js", None, rt.context());
        let namespace = settle(&mut rt, &first).unwrap();
        let again = loader.import("https://example.com/dir/counter.js", None, rt.context());
        let counter = settle(&mut rt, &again).unwrap();

        assert_eq!(get(&mut rt, &namespace, "seen"), JsValue::from(1));
        assert_eq!(get(&mut rt, &counter, "count"), JsValue::from(1));
        let runs = loader.realm().eval("runs", rt.context()).unwrap();
        assert_eq!(runs, JsValue::from(1));
    }

    #[test]
    fn missing_modules_reject() {
        let mut rt = Runtime::new().unwrap();
        let (loader, _) = loader(&mut rt, Files::default());

        let result = loader.import("./nope.js", None, rt.context());
        let err = settle(&mut rt, &result).unwrap_err();

        assert!(err
            .to_string()
            .contains("Failed to fetch dynamically imported module: https://example.com/dir/nope.js"));
    }

    #[test]
    fn cycles_instantiate_once() {
        let mut rt = Runtime::new().unwrap();
        let (loader, files) = loader(
            &mut rt,
            Files::with(&[
                ("https://example.com/dir/a.js", "import './b.js'; export const a = 'a';"),
                ("https://example.com/dir/b.js", "import './a.js'; export const b = 'b';"),
            ]),
        );

        let result = loader.import("./a.js", None, rt.context());
        let namespace = settle(&mut rt, &result).unwrap();

        assert_eq!(get(&mut rt, &namespace, "a").as_string().unwrap().to_std_string_escaped(), "a");
        assert_eq!(files.fetched.borrow().len(), 2);
    }

    #[test]
    fn scripts_with_dynamic_import_use_the_register_path() {
        let mut rt = Runtime::new().unwrap();
        let (loader, _) = loader(
            &mut rt,
            Files::with(&[
                (
                    "https://example.com/dir/app.js",
                    "import('./lib.js').then(m => globalThis.answer = m.answer);",
                ),
                ("https://example.com/dir/lib.js", "export const answer = 42;"),
            ]),
        );

        let result = loader.evaluate_script("app.js", None, rt.context()).unwrap();
        settle(&mut rt, &result).unwrap();

        let answer = loader.realm().eval("answer", rt.context()).unwrap();
        assert_eq!(answer, JsValue::from(42));
    }

    #[test]
    fn prebuilt_scripts_skip_the_transform() {
        let mut rt = Runtime::new().unwrap();
        let (loader, files) = loader(
            &mut rt,
            Files::with(&[(
                "https://example.com/dir/pre.js.prebuilt-1-script",
                "//s\nglobalThis.prebuilt = true;",
            )]),
        );

        let result = loader.evaluate_script("pre.js", None, rt.context()).unwrap();
        settle(&mut rt, &result).unwrap();

        assert_eq!(
            loader.realm().eval("prebuilt", rt.context()).unwrap(),
            JsValue::from(true)
        );
        assert!(files.fetched.borrow().is_empty());
    }

    #[test]
    fn missing_scripts_fail() {
        let mut rt = Runtime::new().unwrap();
        let (loader, _) = loader(&mut rt, Files::default());

        assert!(loader.evaluate_script("gone.js", None, rt.context()).is_err());
    }

    #[test]
    fn inline_modules_are_not_kept() {
        let mut rt = Runtime::new().unwrap();
        let (loader, _) = loader(&mut rt, Files::default());

        let result = loader.evaluate_inline_module("export default 1 + 1;", rt.context());
        let namespace = settle(&mut rt, &result).unwrap();

        assert_eq!(get(&mut rt, &namespace, "default"), JsValue::from(2));
        assert!(loader.state.borrow().inline.is_empty());
    }

    #[test]
    fn inline_scripts_with_dynamic_import_leave_no_record() {
        let mut rt = Runtime::new().unwrap();
        let (loader, _) = loader(
            &mut rt,
            Files::with(&[("https://example.com/dir/lib.js", "export const answer = 42;")]),
        );

        for _ in 0..3 {
            let result = loader
                .evaluate_inline_script("import('./lib.js').then(m => globalThis.answer = m.answer);", rt.context())
                .unwrap();
            settle(&mut rt, &result).unwrap();
        }

        let keys: Vec<String> = loader.state.borrow().records.keys().cloned().collect();
        assert_eq!(keys, vec!["https://example.com/dir/lib.js".to_string()]);
        assert_eq!(loader.realm().eval("answer", rt.context()).unwrap(), JsValue::from(42));
    }

    #[test]
    fn import_meta_carries_the_module_url() {
        let mut rt = Runtime::new().unwrap();
        let (loader, _) = loader(
            &mut rt,
            Files::with(&[("https://example.com/dir/m.js", "export const url = import.meta.url;")]),
        );

        let module = loader.import("./m.js", None, rt.context());
        let namespace = settle(&mut rt, &module).unwrap();

        assert_eq!(
            get(&mut rt, &namespace, "url").as_string().unwrap().to_std_string_escaped(),
            "https://example.com/dir/m.js"
        );
    }

    #[test]
    fn import_meta_fails_in_scripts() {
        let mut rt = Runtime::new().unwrap();
        let (loader, _) = loader(&mut rt, Files::default());

        let failed = match loader.evaluate_inline_script(
            "import('./never.js').catch(() => {}); import.meta.url;",
            rt.context(),
        ) {
            Ok(result) => settle(&mut rt, &result).is_err(),
            Err(_) => true,
        };

        assert!(failed);
    }

    #[test]
    fn module_this_is_the_realm_global() {
        let mut rt = Runtime::new().unwrap();
        let (loader, _) = loader(&mut rt, Files::default());

        let result = loader.evaluate_inline_module("export const same = this === globalThis;", rt.context());
        let namespace = settle(&mut rt, &result).unwrap();

        assert_eq!(get(&mut rt, &namespace, "same"), JsValue::from(true));
    }

    #[test]
    fn execute_receiver_is_a_frozen_null_prototype_object() {
        let mut rt = Runtime::new().unwrap();
        let (loader, _) = loader(&mut rt, Files::default());

        let sentinel = loader.sentinel(rt.context()).unwrap();
        let check = loader
            .realm()
            .eval(
                "(s) => Object.isFrozen(s) && Object.getPrototypeOf(s) === null",
                rt.context(),
            )
            .unwrap();
        let holds = check
            .as_callable()
            .unwrap()
            .call(&JsValue::undefined(), &[sentinel.clone().into()], rt.context())
            .unwrap();

        assert_eq!(holds, JsValue::from(true));
        assert!(JsObject::equals(&sentinel, &loader.sentinel(rt.context()).unwrap()));
    }
}
