//! Object introspection through the realm's own `Reflect` intrinsic.
//!
//! The engine keeps `[[OwnPropertyKeys]]` and `[[GetOwnProperty]]` internal, so
//! descriptor-level copies go through the same path script code would use.

use boa_engine::{
    js_string,
    property::{PropertyDescriptor, PropertyKey},
    Context, JsNativeError, JsObject, JsResult, JsValue,
};

fn reflect_call(
    name: &str,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let reflect = context.intrinsics().objects().reflect();
    let function = reflect.get(js_string!(name), context)?;
    let Some(function) = function.as_callable() else {
        return Err(JsNativeError::typ()
            .with_message(format!("Reflect.{name} is not callable"))
            .into());
    };
    function.call(&JsValue::undefined(), args, context)
}

/// Own string and symbol keys of `object`, in property order.
pub fn own_keys(object: &JsObject, context: &mut Context) -> JsResult<Vec<PropertyKey>> {
    let keys = reflect_call("ownKeys", &[object.clone().into()], context)?;
    let Some(keys) = keys.as_object() else {
        return Ok(Vec::new());
    };

    let length = keys.get(js_string!("length"), context)?.to_length(context)?;
    let mut result = Vec::with_capacity(length as usize);
    for index in 0..length {
        let key = keys.get(index, context)?;
        result.push(key.to_property_key(context)?);
    }
    Ok(result)
}

/// The own property descriptor of `object` at `key`, if any.
pub fn own_property(
    object: &JsObject,
    key: &PropertyKey,
    context: &mut Context,
) -> JsResult<Option<PropertyDescriptor>> {
    let descriptor = reflect_call(
        "getOwnPropertyDescriptor",
        &[object.clone().into(), key.into()],
        context,
    )?;
    if descriptor.is_undefined() {
        return Ok(None);
    }
    descriptor.to_property_descriptor(context).map(Some)
}

/// Own property descriptors of `object`, keyed in property order.
pub fn own_properties(
    object: &JsObject,
    context: &mut Context,
) -> JsResult<Vec<(PropertyKey, PropertyDescriptor)>> {
    let mut result = Vec::new();
    for key in own_keys(object, context)? {
        if let Some(descriptor) = own_property(object, &key, context)? {
            result.push((key, descriptor));
        }
    }
    Ok(result)
}

/// Freezes `object` (`Object.freeze`).
pub fn freeze(object: &JsObject, context: &mut Context) -> JsResult<()> {
    object.set_integrity_level(boa_engine::object::IntegrityLevel::Frozen, context)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use boa_engine::{js_string, Context, Source};

    use super::*;

    #[test]
    fn lists_own_keys_in_order() {
        let context = &mut Context::default();
        let object = context
            .eval(Source::from_bytes("({ b: 1, a: 2, [Symbol.iterator]: 3 })"))
            .unwrap();
        let object = object.as_object().unwrap();

        let keys = own_keys(object, context).unwrap();

        assert_eq!(keys.len(), 3);
        assert_eq!(keys[0], PropertyKey::from(js_string!("b")));
        assert_eq!(keys[1], PropertyKey::from(js_string!("a")));
    }

    #[test]
    fn reads_accessor_descriptors() {
        let context = &mut Context::default();
        let object = context
            .eval(Source::from_bytes("({ get x() { return 1 } })"))
            .unwrap();
        let object = object.as_object().unwrap();

        let descriptor = own_property(object, &js_string!("x").into(), context)
            .unwrap()
            .unwrap();

        assert!(descriptor.is_accessor_descriptor());
        assert!(own_property(object, &js_string!("y").into(), context)
            .unwrap()
            .is_none());
    }
}
