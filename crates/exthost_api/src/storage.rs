//! `localStorage`, kept in memory for the lifetime of the page.
//!
//! Only the method interface is provided; named property access
//! (`localStorage.key = value`) is not intercepted.

use std::collections::BTreeMap;

use boa_engine::{
    js_string, property::Attribute, Context, JsArgs, JsData, JsNativeError, JsResult, JsValue,
    NativeFunction,
};
use boa_gc::{Finalize, Gc, GcRefCell, Trace};
use exthost_core::{
    accessor,
    native::{Accessor, ClassBuilder, JsNativeObject, NativeClass},
    value::{to_rust_string, IntoJs},
};

/// Shared handle to the items of one storage area.
#[derive(Trace, Finalize, JsData, Clone, Default)]
pub struct Storage {
    items: Gc<GcRefCell<BTreeMap<String, String>>>,
}

impl Storage {
    pub fn get(&self, key: &str) -> Option<String> {
        self.items.borrow().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: &str) {
        self.items
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
    }

    pub fn remove(&self, key: &str) {
        self.items.borrow_mut().remove(key);
    }

    pub fn clear(&self) {
        self.items.borrow_mut().clear();
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn key(&self, index: usize) -> Option<String> {
        self.items.borrow().keys().nth(index).cloned()
    }
}

pub struct StorageClass;

fn storage_of(this: &JsValue) -> JsResult<Storage> {
    Ok(JsNativeObject::<Storage>::try_from(this.clone())?.deref().clone())
}

fn key_arg(args: &[JsValue], method: &str, arity: usize, context: &mut Context) -> JsResult<String> {
    if args.len() < arity {
        return Err(JsNativeError::typ()
            .with_message(format!(
                "Failed to execute '{method}' on 'Storage': {arity} argument(s) required, but only {} present.",
                args.len()
            ))
            .into());
    }
    to_rust_string(args.get_or_undefined(0), context)
}

impl StorageClass {
    fn length(context: &mut Context) -> Accessor {
        accessor!(context, Storage, "length", get:((storage, _context) => Ok((storage.len() as u32).into())))
    }

    fn get_item(this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        let storage = storage_of(this)?;
        let key = key_arg(args, "getItem", 1, context)?;
        Ok(storage.get(&key).into_js(context))
    }

    fn set_item(this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        let storage = storage_of(this)?;
        let key = key_arg(args, "setItem", 2, context)?;
        let value = to_rust_string(args.get_or_undefined(1), context)?;
        storage.set(&key, &value);
        Ok(JsValue::undefined())
    }

    fn remove_item(this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        let storage = storage_of(this)?;
        let key = key_arg(args, "removeItem", 1, context)?;
        storage.remove(&key);
        Ok(JsValue::undefined())
    }

    fn clear(this: &JsValue, _: &[JsValue], _: &mut Context) -> JsResult<JsValue> {
        storage_of(this)?.clear();
        Ok(JsValue::undefined())
    }

    fn key(this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        let storage = storage_of(this)?;
        let index = args.get_or_undefined(0).to_u32(context)?;
        Ok(storage.key(index as usize).into_js(context))
    }
}

impl NativeClass for StorageClass {
    type Instance = Storage;

    const NAME: &'static str = "Storage";
    const CONSTRUCTIBLE: bool = false;

    fn data_constructor(_: &JsValue, _: &[JsValue], _: &mut Context) -> JsResult<Storage> {
        Err(JsNativeError::typ().with_message("Illegal constructor").into())
    }

    fn init(class: &mut ClassBuilder<'_>) -> JsResult<()> {
        let length = Self::length(class.context());
        class
            .accessor(js_string!("length"), length, Attribute::CONFIGURABLE)
            .method(js_string!("getItem"), 1, NativeFunction::from_fn_ptr(Self::get_item))
            .method(js_string!("setItem"), 2, NativeFunction::from_fn_ptr(Self::set_item))
            .method(js_string!("removeItem"), 1, NativeFunction::from_fn_ptr(Self::remove_item))
            .method(js_string!("clear"), 0, NativeFunction::from_fn_ptr(Self::clear))
            .method(js_string!("key"), 1, NativeFunction::from_fn_ptr(Self::key));
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use boa_engine::{js_string, property::Attribute, Context, JsValue, Source};
    use exthost_core::native::{register_global_class, JsNativeObject};

    use super::*;

    #[test]
    fn items_are_visible_from_both_sides() {
        let context = &mut Context::default();
        register_global_class::<StorageClass>(context).unwrap();
        let storage = Storage::default();
        let object = JsNativeObject::new::<StorageClass>(storage.clone(), context).unwrap();
        context
            .register_global_property(js_string!("localStorage"), object, Attribute::all())
            .unwrap();

        storage.set("from-rust", "1");
        let value = context
            .eval(Source::from_bytes(
                "localStorage.setItem('n', 42);
                 [localStorage.getItem('from-rust'), localStorage.getItem('missing'), localStorage.length].join()",
            ))
            .unwrap();

        assert_eq!(value, JsValue::from(js_string!("1,,2")));
        assert_eq!(storage.get("n").as_deref(), Some("42"));
        assert!(context
            .eval(Source::from_bytes("localStorage.setItem('only-key')"))
            .is_err());
    }
}
