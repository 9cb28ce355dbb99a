//! Identity-keyed tables that do not keep their keys alive.
//!
//! Backed by the engine's own `WeakMap`, so entries go away with their key
//! objects. The methods are taken from the intrinsic when the table is made;
//! later patches of `WeakMap.prototype` by script do not reach it.

use boa_engine::{js_string, Context, JsNativeError, JsObject, JsResult, JsValue};
use boa_gc::{Finalize, Trace};

#[derive(Trace, Finalize, Clone)]
pub struct WeakTable {
    map: JsObject,
    get: JsObject,
    set: JsObject,
    has: JsObject,
}

fn method(prototype: &JsObject, name: &str, context: &mut Context) -> JsResult<JsObject> {
    prototype
        .get(js_string!(name), context)?
        .as_callable()
        .cloned()
        .ok_or_else(|| {
            JsNativeError::typ()
                .with_message(format!("WeakMap.prototype.{name} is not callable"))
                .into()
        })
}

impl WeakTable {
    /// A table in the realm `context` has entered.
    pub fn new(context: &mut Context) -> JsResult<Self> {
        let constructor = context.intrinsics().constructors().weak_map().constructor();
        let prototype = context.intrinsics().constructors().weak_map().prototype();
        let map = constructor.construct(&[], None, context)?;
        Ok(Self {
            map,
            get: method(&prototype, "get", context)?,
            set: method(&prototype, "set", context)?,
            has: method(&prototype, "has", context)?,
        })
    }

    pub fn get(&self, key: &JsObject, context: &mut Context) -> JsResult<Option<JsObject>> {
        let value = self
            .get
            .call(&self.map.clone().into(), &[key.clone().into()], context)?;
        Ok(value.as_object().cloned())
    }

    pub fn insert(&self, key: &JsObject, value: &JsObject, context: &mut Context) -> JsResult<()> {
        self.set.call(
            &self.map.clone().into(),
            &[key.clone().into(), value.clone().into()],
            context,
        )?;
        Ok(())
    }

    pub fn contains(&self, key: &JsObject, context: &mut Context) -> JsResult<bool> {
        let value = self
            .has
            .call(&self.map.clone().into(), &[key.clone().into()], context)?;
        Ok(value.to_boolean())
    }
}

#[cfg(test)]
mod test {
    use boa_engine::{Context, Source};

    use super::*;

    #[test]
    fn keys_by_identity() {
        let context = &mut Context::default();
        let table = WeakTable::new(context).unwrap();
        let key = JsObject::with_null_proto();
        let lookalike = JsObject::with_null_proto();
        let value = JsObject::with_null_proto();

        table.insert(&key, &value, context).unwrap();

        assert!(JsObject::equals(&table.get(&key, context).unwrap().unwrap(), &value));
        assert!(table.get(&lookalike, context).unwrap().is_none());
        assert!(table.contains(&key, context).unwrap());
        assert!(!table.contains(&lookalike, context).unwrap());
    }

    #[test]
    fn ignores_patched_prototypes() {
        let context = &mut Context::default();
        let table = WeakTable::new(context).unwrap();
        context
            .eval(Source::from_bytes("WeakMap.prototype.get = () => null"))
            .unwrap();
        let key = JsObject::with_null_proto();
        let value = JsObject::with_null_proto();

        table.insert(&key, &value, context).unwrap();

        assert!(table.get(&key, context).unwrap().is_some());
    }
}
