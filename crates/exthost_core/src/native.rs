use std::marker::PhantomData;

use boa_engine::{
    context::intrinsics::StandardConstructor,
    js_string,
    object::{
        builtins::JsFunction, ConstructorBuilder, ErasedObject, FunctionBinding,
        FunctionObjectBuilder, JsPrototype,
    },
    property::{Attribute, PropertyDescriptor, PropertyKey},
    Context, JsData, JsError, JsNativeError, JsObject, JsResult, JsValue,
};
use boa_gc::{Finalize, GcRef, GcRefMut, Trace};

pub use boa_engine::{object::NativeObject, NativeFunction};

use crate::value::IntoJs;

/// A JavaScript object known to carry native data of type `T`.
#[derive(Trace, Finalize, JsData, Debug)]
pub struct JsNativeObject<T: NativeObject> {
    inner: JsObject,
    _phantom: PhantomData<T>,
}

impl<T: NativeObject> Clone for JsNativeObject<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<T: NativeObject> JsNativeObject<T> {
    pub fn is(value: &JsValue) -> bool {
        value.as_object().map_or(false, JsObject::is::<T>)
    }

    /// Wraps `native_object` in a new object. Without an explicit prototype the
    /// class prototype registered on the current global is used.
    pub fn new_with_proto<C, P>(
        prototype: P,
        native_object: T,
        context: &mut Context,
    ) -> JsResult<Self>
    where
        C: NativeClass<Instance = T>,
        P: Into<Option<JsObject>>,
    {
        let prototype = match prototype.into() {
            Some(prototype) => prototype,
            None => class_prototype::<C>(context)?,
        };

        Ok(Self {
            inner: JsObject::from_proto_and_data(prototype, native_object),
            _phantom: PhantomData,
        })
    }

    pub fn new<C>(native_object: T, context: &mut Context) -> JsResult<Self>
    where
        C: NativeClass<Instance = T>,
    {
        Self::new_with_proto::<C, _>(None, native_object, context)
    }

    pub fn object(&self) -> &JsObject {
        &self.inner
    }

    pub fn to_inner(&self) -> JsValue {
        self.inner.clone().into()
    }

    pub fn deref(&self) -> GcRef<'_, T> {
        // `inner` is only ever constructed from a `T` (see `try_from`/`new`)
        match self.inner.downcast_ref::<T>() {
            Some(data) => data,
            None => unreachable!("native object lost its data"),
        }
    }

    pub fn deref_mut(&self) -> GcRefMut<'_, ErasedObject, T> {
        match self.inner.downcast_mut::<T>() {
            Some(data) => data,
            None => unreachable!("native object lost its data"),
        }
    }
}

impl<T: NativeObject> From<JsNativeObject<T>> for JsValue {
    fn from(val: JsNativeObject<T>) -> Self {
        val.to_inner()
    }
}

impl<T: NativeObject> IntoJs for JsNativeObject<T> {
    #[inline]
    fn into_js(self, _context: &mut Context) -> JsValue {
        self.into()
    }
}

impl<T: NativeObject> TryFrom<JsValue> for JsNativeObject<T> {
    type Error = JsError;

    fn try_from(value: JsValue) -> Result<Self, Self::Error> {
        match value.as_object() {
            Some(obj) if obj.is::<T>() => Ok(Self {
                inner: obj.clone(),
                _phantom: PhantomData,
            }),
            _ => Err(illegal_invocation()),
        }
    }
}

/// The error browsers throw when a host method is applied to the wrong receiver.
pub fn illegal_invocation() -> JsError {
    JsNativeError::typ()
        .with_message("Illegal invocation")
        .into()
}

fn class_prototype<C: NativeClass>(context: &mut Context) -> JsResult<JsObject> {
    global_prototype(C::NAME, context)
}

/// The `prototype` of the global constructor `name` in the current realm.
pub fn global_prototype(name: &str, context: &mut Context) -> JsResult<JsObject> {
    let class = context.global_object().get(js_string!(name), context)?;
    let Some(constructor) = class.as_object() else {
        return Err(JsNativeError::typ()
            .with_message(format!("invalid constructor for native class `{name}`"))
            .into());
    };

    match constructor.get(js_string!("prototype"), context)?.as_object() {
        Some(prototype) => Ok(prototype.clone()),
        None => Err(JsNativeError::typ()
            .with_message(format!("invalid prototype for native class `{name}`"))
            .into()),
    }
}

pub struct Accessor {
    pub name: &'static str,
    pub get: Option<JsFunction>,
    pub set: Option<JsFunction>,
}

impl Accessor {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            get: None,
            set: None,
        }
    }

    pub fn get(mut self, function: NativeFunction, context: &mut Context) -> Self {
        self.get = Some(
            FunctionObjectBuilder::new(context.realm(), function)
                .name(format!("get {}", self.name))
                .length(0)
                .build(),
        );
        self
    }

    pub fn set(mut self, function: NativeFunction, context: &mut Context) -> Self {
        self.set = Some(
            FunctionObjectBuilder::new(context.realm(), function)
                .name(format!("set {}", self.name))
                .length(1)
                .build(),
        );
        self
    }
}

/// Builds a getter (and optional setter) over the native data of `$instance`.
#[macro_export]
macro_rules! accessor {
    ($context:expr, $instance:ty, $name:expr, get:(($gthis:ident, $gcontext:ident) => $get:expr) $(, set:(($sthis:ident, $sarg:ident : $sty:ty, $scontext:ident) => $set:expr) )?) => {
        $crate::native::Accessor::new($name)
            .get(
                ::boa_engine::NativeFunction::from_fn_ptr(|this, _args, $gcontext| {
                    let object = $crate::native::JsNativeObject::<$instance>::try_from(this.clone())?;
                    let $gthis = object.deref();
                    $get
                }),
                $context,
            )
            $(
                .set(
                    ::boa_engine::NativeFunction::from_fn_ptr(|this, args, $scontext| {
                        let object = $crate::native::JsNativeObject::<$instance>::try_from(this.clone())?;
                        let $sarg: $sty = ::boa_engine::value::TryFromJs::try_from_js(
                            ::boa_engine::JsArgs::get_or_undefined(args, 0),
                            $scontext,
                        )?;
                        #[allow(unused_mut)]
                        let mut $sthis = object.deref_mut();
                        $set;
                        Ok(::boa_engine::JsValue::undefined())
                    }),
                    $context,
                )
            )?
    };
}

/// Class builder which allows adding methods and static methods to the class.
#[derive(Debug)]
pub struct ClassBuilder<'ctx> {
    builder: ConstructorBuilder<'ctx>,
}

impl<'ctx> ClassBuilder<'ctx> {
    fn new<T: NativeClass>(context: &'ctx mut Context) -> Self {
        let mut builder = ConstructorBuilder::new(
            context,
            NativeFunction::from_fn_ptr(raw_constructor::<T>),
        );
        builder.name(T::NAME);
        builder.length(T::LENGTH);
        Self { builder }
    }

    fn build(self) -> StandardConstructor {
        self.builder.build()
    }

    /// Adds a method to `prototype`.
    pub fn method<N>(&mut self, name: N, length: usize, function: NativeFunction) -> &mut Self
    where
        N: Into<FunctionBinding>,
    {
        self.builder.method(function, name, length);
        self
    }

    /// Adds a method to the constructor itself.
    pub fn static_method<N>(
        &mut self,
        name: N,
        length: usize,
        function: NativeFunction,
    ) -> &mut Self
    where
        N: Into<FunctionBinding>,
    {
        self.builder.static_method(function, name, length);
        self
    }

    pub fn property<K, V>(&mut self, key: K, value: V, attribute: Attribute) -> &mut Self
    where
        K: Into<PropertyKey>,
        V: Into<JsValue>,
    {
        self.builder.property(key, value, attribute);
        self
    }

    pub fn static_property<K, V>(
        &mut self,
        key: K,
        value: V,
        attribute: Attribute,
    ) -> &mut Self
    where
        K: Into<PropertyKey>,
        V: Into<JsValue>,
    {
        self.builder.static_property(key, value, attribute);
        self
    }

    pub fn accessor<K>(&mut self, key: K, accessor: Accessor, attribute: Attribute) -> &mut Self
    where
        K: Into<PropertyKey>,
    {
        self.builder
            .accessor(key, accessor.get, accessor.set, attribute);
        self
    }

    /// Specifies the parent prototype for the class.
    pub fn inherit<O: Into<JsPrototype>>(&mut self, prototype: O) -> &mut Self {
        self.builder.inherit(prototype);
        self
    }

    #[inline]
    pub fn context(&mut self) -> &mut Context {
        self.builder.context()
    }
}

fn raw_constructor<T: NativeClass>(
    target: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    if target.is_undefined() || !T::CONSTRUCTIBLE {
        return Err(JsNativeError::typ()
            .with_message(format!("Illegal constructor `{}`", T::NAME))
            .into());
    }

    let prototype = match target.as_object() {
        Some(new_target) => new_target
            .get(js_string!("prototype"), context)?
            .as_object()
            .cloned(),
        None => None,
    };

    let native_object = T::data_constructor(target, args, context)?;
    let object = JsNativeObject::new_with_proto::<T, _>(prototype, native_object, context)?;
    T::object_constructor(&object, args, context)?;

    Ok(object.to_inner())
}

pub trait NativeClass {
    /// The Rust type of the class's instances.
    type Instance: NativeObject + Sized;

    /// The binding name of the class.
    const NAME: &'static str;

    /// The amount of arguments the class `constructor` takes, default is `0`.
    const LENGTH: usize = 0usize;

    /// Host interfaces such as `Node` exist as globals but cannot be
    /// constructed from script.
    const CONSTRUCTIBLE: bool = true;

    /// The attributes the class will be bound with, default is writable and configurable.
    const ATTRIBUTES: Attribute = Attribute::WRITABLE.union(Attribute::CONFIGURABLE);

    /// Creates the internal data for an instance of this class.
    fn data_constructor(
        target: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<Self::Instance>;

    /// Initializes the properties of the constructed object that depend on
    /// the object itself rather than only on its data.
    fn object_constructor(
        _this: &JsNativeObject<Self::Instance>,
        _args: &[JsValue],
        _context: &mut Context,
    ) -> JsResult<()> {
        Ok(())
    }

    /// Initializes the methods and accessors of the class.
    fn init(class: &mut ClassBuilder<'_>) -> JsResult<()>;
}

/// Registers `T` as a global binding of the current realm and returns its
/// constructor.
pub fn register_global_class<T: NativeClass>(context: &mut Context) -> JsResult<()> {
    register_class::<T>(context).map(|_| ())
}

/// Same as [`register_global_class`] but hands back the class constructor,
/// so subclasses can `inherit` from its prototype.
pub fn register_class<T: NativeClass>(context: &mut Context) -> JsResult<StandardConstructor> {
    let mut class_builder = ClassBuilder::new::<T>(context);
    T::init(&mut class_builder)?;

    let class = class_builder.build();
    let property = PropertyDescriptor::builder()
        .value(class.constructor())
        .writable(T::ATTRIBUTES.writable())
        .enumerable(T::ATTRIBUTES.enumerable())
        .configurable(T::ATTRIBUTES.configurable());

    context.global_object().define_property_or_throw(
        js_string!(T::NAME),
        property,
        context,
    )?;

    Ok(class)
}
