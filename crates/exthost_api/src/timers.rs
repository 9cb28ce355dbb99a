//! `setTimeout`, `setInterval`, their `clear*` counterparts and
//! `queueMicrotask`, backed by the runtime's [`Timers`] queue.

use boa_engine::{
    js_string, job::NativeJob, object::builtins::JsFunction, Context, JsArgs, JsNativeError,
    JsResult, JsValue, NativeFunction,
};
use exthost_core::{host_defined, Timers};

fn callback_arg(args: &[JsValue], name: &str) -> JsResult<JsFunction> {
    args.get_or_undefined(0)
        .as_callable()
        .cloned()
        .and_then(JsFunction::from_object)
        .ok_or_else(|| {
            JsNativeError::typ()
                .with_message(format!("{name}: the callback must be a function"))
                .into()
        })
}

fn delay_arg(args: &[JsValue], context: &mut Context) -> JsResult<u64> {
    let delay = args.get_or_undefined(1).to_number(context)?;
    if delay.is_finite() && delay > 0.0 {
        Ok(delay as u64)
    } else {
        Ok(0)
    }
}

fn schedule(args: &[JsValue], repeat: bool, name: &str, context: &mut Context) -> JsResult<JsValue> {
    host_defined!(context, timers: Timers);
    let callback = callback_arg(args, name)?;
    let delay = delay_arg(args, context)?;
    let rest = args.get(2..).unwrap_or(&[]).to_vec();
    Ok(timers.schedule(callback, delay, rest, repeat).into())
}

fn cancel(args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    host_defined!(context, timers: Timers);
    let id = args.get_or_undefined(0).to_u32(context)?;
    timers.cancel(id);
    Ok(JsValue::undefined())
}

pub struct TimersApi;

impl TimersApi {
    fn set_timeout(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        schedule(args, false, "setTimeout", context)
    }

    fn set_interval(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        schedule(args, true, "setInterval", context)
    }

    fn clear(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        cancel(args, context)
    }

    fn queue_microtask(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        let callback = callback_arg(args, "queueMicrotask")?;
        context.enqueue_job(NativeJob::new(move |context| {
            callback.call(&JsValue::undefined(), &[], context)
        }));
        Ok(JsValue::undefined())
    }
}

impl exthost_core::Api for TimersApi {
    fn init(self, context: &mut Context) -> JsResult<()> {
        context.register_global_builtin_callable(
            js_string!("setTimeout"),
            2,
            NativeFunction::from_fn_ptr(Self::set_timeout),
        )?;
        context.register_global_builtin_callable(
            js_string!("setInterval"),
            2,
            NativeFunction::from_fn_ptr(Self::set_interval),
        )?;
        context.register_global_builtin_callable(
            js_string!("clearTimeout"),
            1,
            NativeFunction::from_fn_ptr(Self::clear),
        )?;
        context.register_global_builtin_callable(
            js_string!("clearInterval"),
            1,
            NativeFunction::from_fn_ptr(Self::clear),
        )?;
        context.register_global_builtin_callable(
            js_string!("queueMicrotask"),
            1,
            NativeFunction::from_fn_ptr(Self::queue_microtask),
        )
    }
}

#[cfg(test)]
mod test {
    use std::rc::Rc;

    use boa_engine::JsValue;
    use exthost_core::{Api, ManualClock, Runtime};

    use super::TimersApi;

    fn runtime() -> Runtime {
        let mut rt = Runtime::with_clock(Rc::new(ManualClock::default())).unwrap();
        TimersApi.init(rt.context()).unwrap();
        rt
    }

    #[test]
    fn timeouts_run_after_microtasks() {
        let mut rt = runtime();
        rt.eval(
            "globalThis.order = [];
             setTimeout((tag) => order.push(tag), 10, 'timeout');
             queueMicrotask(() => order.push('microtask'));
             const cancelled = setTimeout(() => order.push('cancelled'), 5);
             clearTimeout(cancelled);",
        )
        .unwrap();

        rt.run_for(20);

        let order = rt.eval("order.join()").unwrap();
        assert_eq!(order, JsValue::from(boa_engine::js_string!("microtask,timeout")));
    }

    #[test]
    fn intervals_repeat_until_cleared() {
        let mut rt = runtime();
        rt.eval(
            "globalThis.ticks = 0;
             const id = setInterval(() => { if (++ticks === 3) clearInterval(id) }, 10);",
        )
        .unwrap();

        rt.run_for(100);

        assert_eq!(rt.eval("ticks").unwrap(), JsValue::from(3));
    }
}
