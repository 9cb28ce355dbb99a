//! A placeholder `Worker`: the page cannot spawn threads, so a worker only
//! remembers its script URL and logs what it is sent.

use boa_engine::{
    js_string, Context, JsArgs, JsData, JsNativeError, JsResult, JsValue, NativeFunction,
};
use boa_gc::{Finalize, Trace};
use exthost_core::{
    accessor,
    native::{register_global_class, Accessor, ClassBuilder, JsNativeObject, NativeClass},
    value::{to_rust_string, IntoJs},
};

#[derive(Trace, Finalize, JsData, Debug, Clone)]
pub struct Worker {
    url: String,
    terminated: bool,
}

impl Worker {
    pub fn url(&self) -> &str {
        &self.url
    }
}

pub struct WorkerClass;

impl WorkerClass {
    fn url(context: &mut Context) -> Accessor {
        accessor!(context, Worker, "url", get:((worker, context) => Ok(worker.url().into_js(context))))
    }

    fn post_message(this: &JsValue, args: &[JsValue], _: &mut Context) -> JsResult<JsValue> {
        let worker = JsNativeObject::<Worker>::try_from(this.clone())?;
        let worker = worker.deref();
        if !worker.terminated {
            log::debug!(
                "message to worker {}: {}",
                worker.url,
                args.get_or_undefined(0).display()
            );
        }
        Ok(JsValue::undefined())
    }

    fn terminate(this: &JsValue, _: &[JsValue], _: &mut Context) -> JsResult<JsValue> {
        let worker = JsNativeObject::<Worker>::try_from(this.clone())?;
        worker.deref_mut().terminated = true;
        Ok(JsValue::undefined())
    }
}

impl NativeClass for WorkerClass {
    type Instance = Worker;

    const NAME: &'static str = "Worker";
    const LENGTH: usize = 1;

    fn data_constructor(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<Worker> {
        if args.is_empty() {
            return Err(JsNativeError::typ()
                .with_message("Failed to construct 'Worker': 1 argument required, but only 0 present.")
                .into());
        }
        let url = to_rust_string(args.get_or_undefined(0), context)?;
        log::debug!("worker created for {url}");
        Ok(Worker {
            url,
            terminated: false,
        })
    }

    fn init(class: &mut ClassBuilder<'_>) -> JsResult<()> {
        let url = Self::url(class.context());
        class
            .accessor(js_string!("url"), url, boa_engine::property::Attribute::CONFIGURABLE)
            .method(js_string!("postMessage"), 1, NativeFunction::from_fn_ptr(Self::post_message))
            .method(js_string!("terminate"), 0, NativeFunction::from_fn_ptr(Self::terminate));
        Ok(())
    }
}

pub struct WorkerApi;

impl exthost_core::Api for WorkerApi {
    fn init(self, context: &mut Context) -> JsResult<()> {
        register_global_class::<WorkerClass>(context)
    }
}
