use std::{
    ops::{Deref, DerefMut},
    path::Path,
};

pub use boa_engine::realm;
use boa_engine::{object::NativeObject, Context, JsObject, JsResult, JsValue, Source};
use boa_gc::{Finalize, Trace};
use derive_more::{Deref, DerefMut, From};

use crate::{
    native::{register_global_class, NativeClass},
    Api,
};

/// A context handle enters a realm for as long as it lives and restores the
/// previously active realm when dropped.
pub struct ContextHandle<'s> {
    outer: realm::Realm,
    context: &'s mut Context,
}

impl<'s> Deref for ContextHandle<'s> {
    type Target = Context;

    fn deref(&self) -> &Self::Target {
        self.context
    }
}

impl<'s> DerefMut for ContextHandle<'s> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.context
    }
}

impl<'s> Drop for ContextHandle<'s> {
    fn drop(&mut self) {
        self.context.enter_realm(self.outer.clone());
    }
}

/// An engine realm: its own intrinsics, its own global object.
#[derive(Debug, PartialEq, Eq, Clone, Trace, Finalize, Deref, DerefMut, From)]
pub struct Realm {
    pub inner: realm::Realm,
}

impl Realm {
    /// Creates a fresh realm with its own set of intrinsics.
    pub fn new(context: &mut Context) -> JsResult<Self> {
        Ok(Self {
            inner: context.create_realm()?,
        })
    }

    /// The realm currently entered by `context`.
    pub fn current(context: &Context) -> Self {
        Self {
            inner: context.realm().clone(),
        }
    }

    pub fn inner_realm(&self) -> realm::Realm {
        self.inner.clone()
    }

    pub fn context_handle<'s>(&self, context: &'s mut Context) -> ContextHandle<'s> {
        let outer = context.enter_realm(self.inner.clone());
        ContextHandle { outer, context }
    }

    pub fn global_object(&self, context: &mut Context) -> JsObject {
        self.context_handle(context).global_object()
    }

    pub fn register_global_class<T: NativeClass>(&self, context: &mut Context) -> JsResult<()> {
        let context = &mut self.context_handle(context);
        register_global_class::<T>(context)
    }

    pub fn register_api<T: Api>(&self, api: T, context: &mut Context) -> JsResult<()> {
        let context = &mut self.context_handle(context);
        api.init(context)
    }

    /// Parses, compiles and evaluates the script `src` inside this realm.
    pub fn eval(&self, src: &str, context: &mut Context) -> JsResult<JsValue> {
        self.eval_named(src, None, context)
    }

    /// Same as [`Realm::eval`], tagging the script with `name` so stack
    /// traces point at something meaningful.
    pub fn eval_named(
        &self,
        src: &str,
        name: Option<&str>,
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let path = name.map(Path::new);
        self.context_handle(context)
            .eval(Source::from_reader(src.as_bytes(), path))
    }

    /// Stores `value` in the realm's host-defined slot, replacing any
    /// value of the same type.
    pub fn insert_host_defined<T: NativeObject>(&self, value: T) {
        self.inner.host_defined_mut().insert(value);
    }

    /// Returns a clone of the host-defined value of type `T`.
    ///
    /// Values are cloned out so the borrow on the realm is released before
    /// any JavaScript runs again.
    pub fn host_defined<T: NativeObject + Clone>(&self) -> Option<T> {
        self.inner.host_defined().get::<T>().cloned()
    }
}

/// Binds `$name` to a clone of the host-defined `$ty` of the realm that is
/// currently entered by `$context`, or returns a `TypeError` from the
/// enclosing function.
#[macro_export]
macro_rules! host_defined {
    ($context:expr, $name:ident : $ty:ty) => {
        let $name: $ty = $crate::realm::Realm::current($context)
            .host_defined::<$ty>()
            .ok_or_else(|| {
                ::boa_engine::JsError::from(
                    ::boa_engine::JsNativeError::typ().with_message(format!(
                        "`{}` is not defined in this realm",
                        ::std::any::type_name::<$ty>()
                    )),
                )
            })?;
    };
}
