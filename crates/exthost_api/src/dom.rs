//! The page's document object model.
//!
//! Just enough of DOM to host extension code: an event target hierarchy
//! (`EventTarget` -> `Node` -> `Element`/`Document`, `Window`), `Event`
//! objects with capture and bubble phases, and the page life cycle
//! (`loading` -> `interactive` -> `complete`).
//!
//! Every method checks its receiver: host objects only accept receivers that
//! carry their native data (or the page's own window), and throw
//! `TypeError: Illegal invocation` otherwise, just as browsers do.

use std::rc::Rc;

use boa_engine::{
    js_string,
    object::builtins::JsArray,
    property::Attribute,
    Context, JsArgs, JsData, JsError, JsNativeError, JsObject, JsResult, JsValue, NativeFunction,
};
use boa_gc::{Finalize, Gc, GcRefCell, Trace};
use derive_more::Display;
use exthost_core::{
    host_defined,
    native::{
        global_prototype, illegal_invocation, Accessor, ClassBuilder, JsNativeObject, NativeClass,
    },
    value::{to_rust_string, IntoJs},
    Clock,
};

use crate::{location::Location, storage::Storage};

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    #[display(fmt = "loading")]
    Loading,
    #[display(fmt = "interactive")]
    Interactive,
    #[display(fmt = "complete")]
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Document,
    Element(String),
    Text,
}

/// Native data of every DOM node.
#[derive(Trace, Finalize, JsData)]
pub struct Node {
    #[unsafe_ignore_trace]
    kind: NodeKind,
    attributes: Vec<(String, String)>,
    text: String,
    parent: Option<JsObject>,
    children: Vec<JsObject>,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            attributes: Vec::new(),
            text: String::new(),
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn document() -> Self {
        Self::new(NodeKind::Document)
    }

    pub fn element(tag: &str) -> Self {
        Self::new(NodeKind::Element(tag.to_ascii_lowercase()))
    }

    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Self::new(NodeKind::Text)
        }
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn node_name(&self) -> String {
        match &self.kind {
            NodeKind::Document => "#document".to_string(),
            NodeKind::Element(tag) => tag.to_ascii_uppercase(),
            NodeKind::Text => "#text".to_string(),
        }
    }

    pub fn node_type(&self) -> u32 {
        match self.kind {
            NodeKind::Element(_) => 1,
            NodeKind::Text => 3,
            NodeKind::Document => 9,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn set_attribute(&mut self, name: &str, value: String) {
        match self.attributes.iter_mut().find(|(key, _)| key == name) {
            Some((_, old)) => *old = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    fn remove_attribute(&mut self, name: &str) {
        self.attributes.retain(|(key, _)| key != name);
    }
}

/// Native data of plain `new EventTarget()` objects.
#[derive(Trace, Finalize, JsData, Default)]
pub struct EventTargetData;

fn node_of(value: &JsValue) -> JsResult<JsNativeObject<Node>> {
    JsNativeObject::<Node>::try_from(value.clone())
}

fn element_of(value: &JsValue) -> JsResult<JsNativeObject<Node>> {
    let node = node_of(value)?;
    if !matches!(node.deref().kind, NodeKind::Element(_)) {
        return Err(illegal_invocation());
    }
    Ok(node)
}

fn document_of(value: &JsValue) -> JsResult<JsNativeObject<Node>> {
    let node = node_of(value)?;
    if node.deref().kind != NodeKind::Document {
        return Err(illegal_invocation());
    }
    Ok(node)
}

fn dom_exception(name: &str, message: &str) -> JsError {
    JsNativeError::error()
        .with_message(format!("{name}: {message}"))
        .into()
}

/// Whether `ancestor` is `node` or one of its ancestors.
fn is_inclusive_ancestor(ancestor: &JsObject, node: &JsObject) -> bool {
    let mut current = Some(node.clone());
    while let Some(object) = current {
        if JsObject::equals(&object, ancestor) {
            return true;
        }
        current = object
            .downcast_ref::<Node>()
            .and_then(|node| node.parent.clone());
    }
    false
}

fn detach(child: &JsObject) {
    let parent = child.downcast_mut::<Node>().and_then(|mut node| node.parent.take());
    if let Some(parent) = parent {
        if let Some(mut parent) = parent.downcast_mut::<Node>() {
            parent.children.retain(|c| !JsObject::equals(c, child));
        }
    }
}

pub fn append_child(parent: &JsObject, child: &JsObject) -> JsResult<()> {
    if !child.is::<Node>() || !parent.is::<Node>() {
        return Err(JsNativeError::typ()
            .with_message("Failed to execute 'appendChild' on 'Node': parameter 1 is not of type 'Node'.")
            .into());
    }
    if is_inclusive_ancestor(child, parent) {
        return Err(dom_exception(
            "HierarchyRequestError",
            "The new child element contains the parent.",
        ));
    }

    detach(child);
    if let Some(mut node) = child.downcast_mut::<Node>() {
        node.parent = Some(parent.clone());
    }
    if let Some(mut node) = parent.downcast_mut::<Node>() {
        node.children.push(child.clone());
    }
    Ok(())
}

pub fn remove_child(parent: &JsObject, child: &JsObject) -> JsResult<()> {
    let is_child = child
        .downcast_ref::<Node>()
        .and_then(|node| node.parent.clone())
        .map_or(false, |p| JsObject::equals(&p, parent));
    if !is_child {
        return Err(dom_exception(
            "NotFoundError",
            "The node to be removed is not a child of this node.",
        ));
    }
    detach(child);
    Ok(())
}

fn children(node: &JsObject) -> Vec<JsObject> {
    node.downcast_ref::<Node>()
        .map(|node| node.children.clone())
        .unwrap_or_default()
}

pub fn text_content(node: &JsObject) -> String {
    if let Some(data) = node.downcast_ref::<Node>() {
        if data.kind == NodeKind::Text {
            return data.text.clone();
        }
    }
    children(node).iter().map(text_content).collect()
}

/// Depth-first search below `root`.
pub fn find_descendant(root: &JsObject, predicate: &dyn Fn(&Node) -> bool) -> Option<JsObject> {
    for child in children(root) {
        let matched = child.downcast_ref::<Node>().map_or(false, |node| predicate(&node));
        if matched {
            return Some(child);
        }
        if let Some(found) = find_descendant(&child, predicate) {
            return Some(found);
        }
    }
    None
}

/// Native data of `Event` (and `CustomEvent`) objects.
#[derive(Trace, Finalize, JsData)]
pub struct Event {
    type_: String,
    bubbles: bool,
    cancelable: bool,
    default_prevented: bool,
    stopped: bool,
    detail: JsValue,
    target: Option<JsObject>,
    current_target: Option<JsObject>,
}

impl Event {
    pub fn new(type_: &str, bubbles: bool) -> Self {
        Self {
            type_: type_.to_string(),
            bubbles,
            cancelable: false,
            default_prevented: false,
            stopped: false,
            detail: JsValue::null(),
            target: None,
            current_target: None,
        }
    }

    pub fn type_(&self) -> &str {
        &self.type_
    }

    fn from_init(args: &[JsValue], context: &mut Context) -> JsResult<Self> {
        if args.is_empty() {
            return Err(JsNativeError::typ()
                .with_message("Failed to construct 'Event': 1 argument required, but only 0 present.")
                .into());
        }
        let type_ = to_rust_string(args.get_or_undefined(0), context)?;
        let mut event = Self::new(&type_, false);
        if let Some(init) = args.get_or_undefined(1).as_object() {
            event.bubbles = init.get(js_string!("bubbles"), context)?.to_boolean();
            event.cancelable = init.get(js_string!("cancelable"), context)?.to_boolean();
            let detail = init.get(js_string!("detail"), context)?;
            if !detail.is_undefined() {
                event.detail = detail;
            }
        }
        Ok(event)
    }
}

#[derive(Trace, Finalize)]
struct Listener {
    target: JsObject,
    type_: String,
    callback: JsObject,
    capture: bool,
    once: bool,
}

#[derive(Trace, Finalize)]
struct PageState {
    window: JsObject,
    document: JsObject,
    location: JsObject,
    #[unsafe_ignore_trace]
    ready_state: ReadyState,
    listeners: Vec<Listener>,
    #[unsafe_ignore_trace]
    last_interaction: Option<u64>,
    title: String,
    storage: Storage,
    #[unsafe_ignore_trace]
    clock: Rc<dyn Clock>,
}

/// Handle to the emulated page: its window, document and life cycle.
///
/// Stored in the page realm's host-defined slot so DOM natives can reach it.
#[derive(Trace, Finalize, JsData, Clone)]
pub struct Page {
    inner: Gc<GcRefCell<PageState>>,
}

impl Page {
    pub(crate) fn new(
        window: JsObject,
        document: JsObject,
        location: JsObject,
        storage: Storage,
        clock: Rc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Gc::new(GcRefCell::new(PageState {
                window,
                document,
                location,
                ready_state: ReadyState::Loading,
                listeners: Vec::new(),
                last_interaction: None,
                title: String::new(),
                storage,
                clock,
            })),
        }
    }

    /// The real global object of the page.
    pub fn window(&self) -> JsObject {
        self.inner.borrow().window.clone()
    }

    pub fn document(&self) -> JsObject {
        self.inner.borrow().document.clone()
    }

    pub fn location(&self) -> JsObject {
        self.inner.borrow().location.clone()
    }

    pub fn local_storage(&self) -> Storage {
        self.inner.borrow().storage.clone()
    }

    /// The page's current address.
    pub fn url(&self) -> Option<url::Url> {
        let location = self.location();
        let location = location.downcast_ref::<Location>()?;
        Some(location.url().clone())
    }

    pub fn ready_state(&self) -> ReadyState {
        self.inner.borrow().ready_state
    }

    pub fn now(&self) -> u64 {
        self.inner.borrow().clock.now()
    }

    /// Milliseconds since the last click reached the document, if any.
    pub fn since_last_interaction(&self) -> Option<u64> {
        let state = self.inner.borrow();
        let last = state.last_interaction?;
        Some(state.clock.now().saturating_sub(last))
    }

    /// Whether a click reached the document less than `window_ms` ago.
    pub fn has_recent_interaction(&self, window_ms: u64) -> bool {
        self.since_last_interaction()
            .map_or(false, |elapsed| elapsed < window_ms)
    }

    fn is_event_target(&self, object: &JsObject) -> bool {
        object.is::<Node>()
            || object.is::<EventTargetData>()
            || JsObject::equals(object, &self.inner.borrow().window)
    }

    fn target_of(&self, this: &JsValue) -> JsResult<JsObject> {
        match this.as_object() {
            Some(object) if self.is_event_target(object) => Ok(object.clone()),
            _ => Err(illegal_invocation()),
        }
    }

    pub fn add_listener(&self, target: &JsObject, type_: &str, callback: JsObject, capture: bool, once: bool) {
        let mut state = self.inner.borrow_mut();
        let exists = state.listeners.iter().any(|l| {
            JsObject::equals(&l.target, target)
                && l.type_ == type_
                && JsObject::equals(&l.callback, &callback)
                && l.capture == capture
        });
        if !exists {
            state.listeners.push(Listener {
                target: target.clone(),
                type_: type_.to_string(),
                callback,
                capture,
                once,
            });
        }
    }

    pub fn remove_listener(&self, target: &JsObject, type_: &str, callback: &JsObject, capture: bool) {
        self.inner.borrow_mut().listeners.retain(|l| {
            !(JsObject::equals(&l.target, target)
                && l.type_ == type_
                && JsObject::equals(&l.callback, callback)
                && l.capture == capture)
        });
    }

    /// Number of listeners registered for `type_` on `target`.
    pub fn listener_count(&self, target: &JsObject, type_: &str) -> usize {
        self.inner
            .borrow()
            .listeners
            .iter()
            .filter(|l| JsObject::equals(&l.target, target) && l.type_ == type_)
            .count()
    }

    /// Target, its ancestors, and the window when the chain reaches the document.
    fn event_path(&self, target: &JsObject) -> Vec<JsObject> {
        let mut path = vec![target.clone()];
        let mut current = target.downcast_ref::<Node>().and_then(|n| n.parent.clone());
        while let Some(node) = current {
            current = node.downcast_ref::<Node>().and_then(|n| n.parent.clone());
            path.push(node);
        }
        let document = self.document();
        if path.last().map_or(false, |last| JsObject::equals(last, &document)) {
            path.push(self.window());
        }
        path
    }

    fn invoke(
        &self,
        target: &JsObject,
        event: &JsNativeObject<Event>,
        phase: Option<bool>,
        context: &mut Context,
    ) {
        let type_ = event.deref().type_.clone();
        let callbacks: Vec<(JsObject, bool, bool)> = self
            .inner
            .borrow()
            .listeners
            .iter()
            .filter(|l| {
                JsObject::equals(&l.target, target)
                    && l.type_ == type_
                    && phase.map_or(true, |capture| capture == l.capture)
            })
            .map(|l| (l.callback.clone(), l.capture, l.once))
            .collect();

        event.deref_mut().current_target = Some(target.clone());
        for (callback, capture, once) in callbacks {
            if event.deref().stopped {
                break;
            }
            if once {
                self.remove_listener(target, &type_, &callback, capture);
            }
            let result = if callback.is_callable() {
                callback.call(&target.clone().into(), &[event.to_inner()], context)
            } else {
                callback
                    .get(js_string!("handleEvent"), context)
                    .and_then(|handle| match handle.as_callable() {
                        Some(handle) => handle.call(&callback.clone().into(), &[event.to_inner()], context),
                        None => Ok(JsValue::undefined()),
                    })
            };
            if let Err(err) = result {
                log::error!("Uncaught {err} (in '{type_}' listener)");
            }
        }
    }

    /// Dispatches `event` at `target` through capture, target and bubble
    /// phases. Returns `false` when a listener cancelled the event.
    pub fn dispatch(
        &self,
        target: &JsObject,
        event: &JsNativeObject<Event>,
        context: &mut Context,
    ) -> bool {
        let path = self.event_path(target);
        let (type_, bubbles) = {
            let mut data = event.deref_mut();
            data.target = Some(target.clone());
            data.stopped = false;
            (data.type_.clone(), data.bubbles)
        };

        let document = self.document();
        if type_ == "click" && path.iter().any(|node| JsObject::equals(node, &document)) {
            let mut state = self.inner.borrow_mut();
            state.last_interaction = Some(state.clock.now());
        }

        for node in path.iter().skip(1).rev() {
            self.invoke(node, event, Some(true), context);
        }
        self.invoke(target, event, None, context);
        if bubbles {
            for node in path.iter().skip(1) {
                self.invoke(node, event, Some(false), context);
            }
        }

        let mut data = event.deref_mut();
        data.current_target = None;
        !data.default_prevented
    }

    /// Creates and dispatches a fresh event of `type_`.
    pub fn fire(&self, target: &JsObject, type_: &str, bubbles: bool, context: &mut Context) -> JsResult<bool> {
        let event = JsNativeObject::new::<EventClass>(Event::new(type_, bubbles), context)?;
        Ok(self.dispatch(target, &event, context))
    }

    /// Simulates a user click on `target`.
    pub fn click(&self, target: &JsObject, context: &mut Context) -> JsResult<bool> {
        self.fire(target, "click", true, context)
    }

    /// Moves the document to `interactive` then `complete`, firing
    /// `readystatechange`, `DOMContentLoaded` and `load` on the way.
    pub fn finish_loading(&self, context: &mut Context) -> JsResult<()> {
        let document = self.document();
        let window = self.window();
        if self.ready_state() == ReadyState::Loading {
            self.inner.borrow_mut().ready_state = ReadyState::Interactive;
            self.fire(&document, "readystatechange", false, context)?;
            self.fire(&document, "DOMContentLoaded", true, context)?;
        }
        if self.ready_state() == ReadyState::Interactive {
            self.inner.borrow_mut().ready_state = ReadyState::Complete;
            self.fire(&document, "readystatechange", false, context)?;
            self.fire(&window, "load", false, context)?;
        }
        Ok(())
    }
}

fn listener_options(value: &JsValue, context: &mut Context) -> JsResult<(bool, bool)> {
    match value.as_object() {
        Some(options) => Ok((
            options.get(js_string!("capture"), context)?.to_boolean(),
            options.get(js_string!("once"), context)?.to_boolean(),
        )),
        None => Ok((value.to_boolean(), false)),
    }
}

pub struct EventTargetClass;

impl EventTargetClass {
    fn add_event_listener(this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        host_defined!(context, page: Page);
        let target = page.target_of(this)?;
        let type_ = to_rust_string(args.get_or_undefined(0), context)?;
        let Some(callback) = args.get_or_undefined(1).as_object().cloned() else {
            return Ok(JsValue::undefined());
        };
        let (capture, once) = listener_options(args.get_or_undefined(2), context)?;
        page.add_listener(&target, &type_, callback, capture, once);
        Ok(JsValue::undefined())
    }

    fn remove_event_listener(this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        host_defined!(context, page: Page);
        let target = page.target_of(this)?;
        let type_ = to_rust_string(args.get_or_undefined(0), context)?;
        let Some(callback) = args.get_or_undefined(1).as_object().cloned() else {
            return Ok(JsValue::undefined());
        };
        let (capture, _) = listener_options(args.get_or_undefined(2), context)?;
        page.remove_listener(&target, &type_, &callback, capture);
        Ok(JsValue::undefined())
    }

    fn dispatch_event(this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        host_defined!(context, page: Page);
        let target = page.target_of(this)?;
        let event = JsNativeObject::<Event>::try_from(args.get_or_undefined(0).clone()).map_err(|_| {
            JsError::from(JsNativeError::typ().with_message(
                "Failed to execute 'dispatchEvent' on 'EventTarget': parameter 1 is not of type 'Event'.",
            ))
        })?;
        Ok(page.dispatch(&target, &event, context).into())
    }
}

impl NativeClass for EventTargetClass {
    type Instance = EventTargetData;

    const NAME: &'static str = "EventTarget";

    fn data_constructor(_: &JsValue, _: &[JsValue], _: &mut Context) -> JsResult<EventTargetData> {
        Ok(EventTargetData)
    }

    fn init(class: &mut ClassBuilder<'_>) -> JsResult<()> {
        class
            .method(
                js_string!("addEventListener"),
                2,
                NativeFunction::from_fn_ptr(Self::add_event_listener),
            )
            .method(
                js_string!("removeEventListener"),
                2,
                NativeFunction::from_fn_ptr(Self::remove_event_listener),
            )
            .method(
                js_string!("dispatchEvent"),
                1,
                NativeFunction::from_fn_ptr(Self::dispatch_event),
            );
        Ok(())
    }
}

pub struct NodeClass;

impl NodeClass {
    fn node_name(this: &JsValue, _: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        Ok(node_of(this)?.deref().node_name().into_js(context))
    }

    fn node_type(this: &JsValue, _: &[JsValue], _: &mut Context) -> JsResult<JsValue> {
        Ok(node_of(this)?.deref().node_type().into())
    }

    fn parent_node(this: &JsValue, _: &[JsValue], _: &mut Context) -> JsResult<JsValue> {
        let parent = node_of(this)?.deref().parent.clone();
        Ok(parent.map_or(JsValue::null(), JsValue::from))
    }

    fn child_nodes(this: &JsValue, _: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        let node = node_of(this)?;
        let children = children(node.object());
        Ok(JsArray::from_iter(children.into_iter().map(JsValue::from), context).into())
    }

    fn first_child(this: &JsValue, _: &[JsValue], _: &mut Context) -> JsResult<JsValue> {
        let node = node_of(this)?;
        let first = node.deref().children.first().cloned();
        Ok(first.map_or(JsValue::null(), JsValue::from))
    }

    fn get_text_content(this: &JsValue, _: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        let node = node_of(this)?;
        if node.deref().kind == NodeKind::Document {
            return Ok(JsValue::null());
        }
        Ok(text_content(node.object()).into_js(context))
    }

    fn set_text_content(this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        let node = node_of(this)?;
        let text = match args.get_or_undefined(0) {
            value if value.is_null_or_undefined() => String::new(),
            value => to_rust_string(value, context)?,
        };
        if node.deref().kind == NodeKind::Text {
            node.deref_mut().text = text;
            return Ok(JsValue::undefined());
        }
        for child in children(node.object()) {
            detach(&child);
        }
        if !text.is_empty() {
            let text = JsNativeObject::new::<NodeClass>(Node::text(&text), context)?;
            append_child(node.object(), text.object())?;
        }
        Ok(JsValue::undefined())
    }

    fn append_child(this: &JsValue, args: &[JsValue], _: &mut Context) -> JsResult<JsValue> {
        let node = node_of(this)?;
        let child = node_of(args.get_or_undefined(0)).map_err(|_| {
            JsError::from(JsNativeError::typ().with_message(
                "Failed to execute 'appendChild' on 'Node': parameter 1 is not of type 'Node'.",
            ))
        })?;
        append_child(node.object(), child.object())?;
        Ok(child.to_inner())
    }

    fn remove_child(this: &JsValue, args: &[JsValue], _: &mut Context) -> JsResult<JsValue> {
        let node = node_of(this)?;
        let child = node_of(args.get_or_undefined(0)).map_err(|_| {
            JsError::from(JsNativeError::typ().with_message(
                "Failed to execute 'removeChild' on 'Node': parameter 1 is not of type 'Node'.",
            ))
        })?;
        remove_child(node.object(), child.object())?;
        Ok(child.to_inner())
    }

    fn contains(this: &JsValue, args: &[JsValue], _: &mut Context) -> JsResult<JsValue> {
        let node = node_of(this)?;
        let Some(other) = args.get_or_undefined(0).as_object() else {
            return Ok(false.into());
        };
        Ok(is_inclusive_ancestor(node.object(), other).into())
    }
}

impl NativeClass for NodeClass {
    type Instance = Node;

    const NAME: &'static str = "Node";
    const CONSTRUCTIBLE: bool = false;

    fn data_constructor(_: &JsValue, _: &[JsValue], _: &mut Context) -> JsResult<Node> {
        Err(JsNativeError::typ().with_message("Illegal constructor").into())
    }

    fn init(class: &mut ClassBuilder<'_>) -> JsResult<()> {
        let parent = global_prototype(EventTargetClass::NAME, class.context())?;
        class.inherit(parent);

        let getters: [(&'static str, fn(&JsValue, &[JsValue], &mut Context) -> JsResult<JsValue>); 5] = [
            ("nodeName", Self::node_name),
            ("nodeType", Self::node_type),
            ("parentNode", Self::parent_node),
            ("childNodes", Self::child_nodes),
            ("firstChild", Self::first_child),
        ];
        for (name, getter) in getters {
            let accessor = Accessor::new(name).get(NativeFunction::from_fn_ptr(getter), class.context());
            class.accessor(js_string!(name), accessor, Attribute::CONFIGURABLE | Attribute::ENUMERABLE);
        }
        let text_content = Accessor::new("textContent")
            .get(NativeFunction::from_fn_ptr(Self::get_text_content), class.context())
            .set(NativeFunction::from_fn_ptr(Self::set_text_content), class.context());

        class
            .accessor(
                js_string!("textContent"),
                text_content,
                Attribute::CONFIGURABLE | Attribute::ENUMERABLE,
            )
            .method(js_string!("appendChild"), 1, NativeFunction::from_fn_ptr(Self::append_child))
            .method(js_string!("removeChild"), 1, NativeFunction::from_fn_ptr(Self::remove_child))
            .method(js_string!("contains"), 1, NativeFunction::from_fn_ptr(Self::contains))
            .static_property(js_string!("ELEMENT_NODE"), 1, Attribute::empty())
            .static_property(js_string!("TEXT_NODE"), 3, Attribute::empty())
            .static_property(js_string!("DOCUMENT_NODE"), 9, Attribute::empty());
        Ok(())
    }
}

pub struct ElementClass;

impl ElementClass {
    fn tag_name(this: &JsValue, _: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        Ok(element_of(this)?.deref().node_name().into_js(context))
    }

    fn get_id(this: &JsValue, _: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        let element = element_of(this)?;
        let id = element.deref().attribute("id").unwrap_or_default().to_string();
        Ok(id.into_js(context))
    }

    fn set_id(this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        let element = element_of(this)?;
        let id = to_rust_string(args.get_or_undefined(0), context)?;
        element.deref_mut().set_attribute("id", id);
        Ok(JsValue::undefined())
    }

    fn get_attribute(this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        let element = element_of(this)?;
        let name = to_rust_string(args.get_or_undefined(0), context)?.to_ascii_lowercase();
        let value = element.deref().attribute(&name).map(str::to_string);
        Ok(value.into_js(context))
    }

    fn set_attribute(this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        let element = element_of(this)?;
        let name = to_rust_string(args.get_or_undefined(0), context)?.to_ascii_lowercase();
        let value = to_rust_string(args.get_or_undefined(1), context)?;
        element.deref_mut().set_attribute(&name, value);
        Ok(JsValue::undefined())
    }

    fn remove_attribute(this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        let element = element_of(this)?;
        let name = to_rust_string(args.get_or_undefined(0), context)?.to_ascii_lowercase();
        element.deref_mut().remove_attribute(&name);
        Ok(JsValue::undefined())
    }

    fn has_attribute(this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        let element = element_of(this)?;
        let name = to_rust_string(args.get_or_undefined(0), context)?.to_ascii_lowercase();
        let has = element.deref().attribute(&name).is_some();
        Ok(has.into())
    }

    fn click(this: &JsValue, _: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        host_defined!(context, page: Page);
        let element = element_of(this)?;
        page.click(element.object(), context)?;
        Ok(JsValue::undefined())
    }
}

impl NativeClass for ElementClass {
    type Instance = Node;

    const NAME: &'static str = "Element";
    const CONSTRUCTIBLE: bool = false;

    fn data_constructor(_: &JsValue, _: &[JsValue], _: &mut Context) -> JsResult<Node> {
        Err(JsNativeError::typ().with_message("Illegal constructor").into())
    }

    fn init(class: &mut ClassBuilder<'_>) -> JsResult<()> {
        let parent = global_prototype(NodeClass::NAME, class.context())?;
        class.inherit(parent);

        let tag_name = Accessor::new("tagName")
            .get(NativeFunction::from_fn_ptr(Self::tag_name), class.context());
        let id = Accessor::new("id")
            .get(NativeFunction::from_fn_ptr(Self::get_id), class.context())
            .set(NativeFunction::from_fn_ptr(Self::set_id), class.context());

        class
            .accessor(js_string!("tagName"), tag_name, Attribute::CONFIGURABLE | Attribute::ENUMERABLE)
            .accessor(js_string!("id"), id, Attribute::CONFIGURABLE | Attribute::ENUMERABLE)
            .method(js_string!("getAttribute"), 1, NativeFunction::from_fn_ptr(Self::get_attribute))
            .method(js_string!("setAttribute"), 2, NativeFunction::from_fn_ptr(Self::set_attribute))
            .method(
                js_string!("removeAttribute"),
                1,
                NativeFunction::from_fn_ptr(Self::remove_attribute),
            )
            .method(js_string!("hasAttribute"), 1, NativeFunction::from_fn_ptr(Self::has_attribute))
            .method(js_string!("click"), 0, NativeFunction::from_fn_ptr(Self::click));
        Ok(())
    }
}

pub struct DocumentClass;

impl DocumentClass {
    fn ready_state(this: &JsValue, _: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        host_defined!(context, page: Page);
        document_of(this)?;
        Ok(page.ready_state().to_string().into_js(context))
    }

    fn url(this: &JsValue, _: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        host_defined!(context, page: Page);
        document_of(this)?;
        let href = page.url().map(|url| url.to_string()).unwrap_or_else(|| "about:blank".into());
        Ok(href.into_js(context))
    }

    fn location(this: &JsValue, _: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        host_defined!(context, page: Page);
        document_of(this)?;
        Ok(page.location().into())
    }

    fn get_title(this: &JsValue, _: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        host_defined!(context, page: Page);
        document_of(this)?;
        let title = page.inner.borrow().title.clone();
        Ok(title.into_js(context))
    }

    fn set_title(this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        host_defined!(context, page: Page);
        document_of(this)?;
        let title = to_rust_string(args.get_or_undefined(0), context)?;
        page.inner.borrow_mut().title = title;
        Ok(JsValue::undefined())
    }

    fn by_tag(this: &JsValue, tag: &str) -> JsResult<JsValue> {
        let document = document_of(this)?;
        let found = find_descendant(document.object(), &|node| {
            node.kind == NodeKind::Element(tag.to_string())
        });
        Ok(found.map_or(JsValue::null(), JsValue::from))
    }

    fn document_element(this: &JsValue, _: &[JsValue], _: &mut Context) -> JsResult<JsValue> {
        Self::by_tag(this, "html")
    }

    fn head(this: &JsValue, _: &[JsValue], _: &mut Context) -> JsResult<JsValue> {
        Self::by_tag(this, "head")
    }

    fn body(this: &JsValue, _: &[JsValue], _: &mut Context) -> JsResult<JsValue> {
        Self::by_tag(this, "body")
    }

    fn create_element(this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        document_of(this)?;
        let tag = to_rust_string(args.get_or_undefined(0), context)?;
        Ok(JsNativeObject::new::<ElementClass>(Node::element(&tag), context)?.to_inner())
    }

    fn create_text_node(this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        document_of(this)?;
        let text = to_rust_string(args.get_or_undefined(0), context)?;
        Ok(JsNativeObject::new::<NodeClass>(Node::text(&text), context)?.to_inner())
    }

    fn get_element_by_id(this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        let document = document_of(this)?;
        let id = to_rust_string(args.get_or_undefined(0), context)?;
        let found = find_descendant(document.object(), &|node| node.attribute("id") == Some(id.as_str()));
        Ok(found.map_or(JsValue::null(), JsValue::from))
    }
}

impl NativeClass for DocumentClass {
    type Instance = Node;

    const NAME: &'static str = "Document";
    const CONSTRUCTIBLE: bool = false;

    fn data_constructor(_: &JsValue, _: &[JsValue], _: &mut Context) -> JsResult<Node> {
        Err(JsNativeError::typ().with_message("Illegal constructor").into())
    }

    fn init(class: &mut ClassBuilder<'_>) -> JsResult<()> {
        let parent = global_prototype(NodeClass::NAME, class.context())?;
        class.inherit(parent);

        let getters: [(&'static str, fn(&JsValue, &[JsValue], &mut Context) -> JsResult<JsValue>); 6] = [
            ("readyState", Self::ready_state),
            ("URL", Self::url),
            ("location", Self::location),
            ("documentElement", Self::document_element),
            ("head", Self::head),
            ("body", Self::body),
        ];
        for (name, getter) in getters {
            let accessor = Accessor::new(name).get(NativeFunction::from_fn_ptr(getter), class.context());
            class.accessor(js_string!(name), accessor, Attribute::CONFIGURABLE | Attribute::ENUMERABLE);
        }
        let title = Accessor::new("title")
            .get(NativeFunction::from_fn_ptr(Self::get_title), class.context())
            .set(NativeFunction::from_fn_ptr(Self::set_title), class.context());

        class
            .accessor(js_string!("title"), title, Attribute::CONFIGURABLE | Attribute::ENUMERABLE)
            .method(js_string!("createElement"), 1, NativeFunction::from_fn_ptr(Self::create_element))
            .method(
                js_string!("createTextNode"),
                1,
                NativeFunction::from_fn_ptr(Self::create_text_node),
            )
            .method(
                js_string!("getElementById"),
                1,
                NativeFunction::from_fn_ptr(Self::get_element_by_id),
            );
        Ok(())
    }
}

/// `Window` only exists to give the global object its prototype chain.
#[derive(Trace, Finalize, JsData)]
pub struct WindowData;

pub struct WindowClass;

impl NativeClass for WindowClass {
    type Instance = WindowData;

    const NAME: &'static str = "Window";
    const CONSTRUCTIBLE: bool = false;

    fn data_constructor(_: &JsValue, _: &[JsValue], _: &mut Context) -> JsResult<WindowData> {
        Err(JsNativeError::typ().with_message("Illegal constructor").into())
    }

    fn init(class: &mut ClassBuilder<'_>) -> JsResult<()> {
        let parent = global_prototype(EventTargetClass::NAME, class.context())?;
        class.inherit(parent);
        Ok(())
    }
}

fn event_of(value: &JsValue) -> JsResult<JsNativeObject<Event>> {
    JsNativeObject::<Event>::try_from(value.clone())
}

pub struct EventClass;

impl EventClass {
    fn type_(this: &JsValue, _: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        Ok(event_of(this)?.deref().type_.clone().into_js(context))
    }

    fn target(this: &JsValue, _: &[JsValue], _: &mut Context) -> JsResult<JsValue> {
        let target = event_of(this)?.deref().target.clone();
        Ok(target.map_or(JsValue::null(), JsValue::from))
    }

    fn current_target(this: &JsValue, _: &[JsValue], _: &mut Context) -> JsResult<JsValue> {
        let target = event_of(this)?.deref().current_target.clone();
        Ok(target.map_or(JsValue::null(), JsValue::from))
    }

    fn bubbles(this: &JsValue, _: &[JsValue], _: &mut Context) -> JsResult<JsValue> {
        Ok(event_of(this)?.deref().bubbles.into())
    }

    fn default_prevented(this: &JsValue, _: &[JsValue], _: &mut Context) -> JsResult<JsValue> {
        Ok(event_of(this)?.deref().default_prevented.into())
    }

    fn detail(this: &JsValue, _: &[JsValue], _: &mut Context) -> JsResult<JsValue> {
        Ok(event_of(this)?.deref().detail.clone())
    }

    fn prevent_default(this: &JsValue, _: &[JsValue], _: &mut Context) -> JsResult<JsValue> {
        let event = event_of(this)?;
        let mut event = event.deref_mut();
        if event.cancelable {
            event.default_prevented = true;
        }
        Ok(JsValue::undefined())
    }

    fn stop_propagation(this: &JsValue, _: &[JsValue], _: &mut Context) -> JsResult<JsValue> {
        event_of(this)?.deref_mut().stopped = true;
        Ok(JsValue::undefined())
    }
}

impl NativeClass for EventClass {
    type Instance = Event;

    const NAME: &'static str = "Event";
    const LENGTH: usize = 1;

    fn data_constructor(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<Event> {
        Event::from_init(args, context)
    }

    fn init(class: &mut ClassBuilder<'_>) -> JsResult<()> {
        let getters: [(&'static str, fn(&JsValue, &[JsValue], &mut Context) -> JsResult<JsValue>); 5] = [
            ("type", Self::type_),
            ("target", Self::target),
            ("currentTarget", Self::current_target),
            ("bubbles", Self::bubbles),
            ("defaultPrevented", Self::default_prevented),
        ];
        for (name, getter) in getters {
            let accessor = Accessor::new(name).get(NativeFunction::from_fn_ptr(getter), class.context());
            class.accessor(js_string!(name), accessor, Attribute::CONFIGURABLE | Attribute::ENUMERABLE);
        }
        class
            .method(js_string!("preventDefault"), 0, NativeFunction::from_fn_ptr(Self::prevent_default))
            .method(
                js_string!("stopPropagation"),
                0,
                NativeFunction::from_fn_ptr(Self::stop_propagation),
            );
        Ok(())
    }
}

/// `CustomEvent`: an `Event` carrying `detail`.
pub struct CustomEventClass;

impl NativeClass for CustomEventClass {
    type Instance = Event;

    const NAME: &'static str = "CustomEvent";
    const LENGTH: usize = 1;

    fn data_constructor(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<Event> {
        Event::from_init(args, context)
    }

    fn init(class: &mut ClassBuilder<'_>) -> JsResult<()> {
        let parent = global_prototype(EventClass::NAME, class.context())?;
        class.inherit(parent);
        let detail = Accessor::new("detail")
            .get(NativeFunction::from_fn_ptr(EventClass::detail), class.context());
        class.accessor(js_string!("detail"), detail, Attribute::CONFIGURABLE | Attribute::ENUMERABLE);
        Ok(())
    }
}
