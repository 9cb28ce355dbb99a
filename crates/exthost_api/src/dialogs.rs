//! Modal dialogs (`alert`, `confirm`) and the page's own `open`/`close`.
//!
//! There is no user to ask, so dialogs go through a [`Dialogs`]
//! implementation chosen by the embedder. The default one logs and answers
//! `confirm` with a fixed value.

use std::rc::Rc;

use boa_engine::{js_string, Context, JsArgs, JsData, JsResult, JsValue, NativeFunction};
use boa_gc::{Finalize, Trace};
use exthost_core::{host_defined, value::to_rust_string, Realm};

pub trait Dialogs {
    fn alert(&self, message: &str);

    fn confirm(&self, message: &str) -> bool;
}

/// Logs every dialog and answers `confirm` with `answer`.
#[derive(Debug, Clone, Copy)]
pub struct LogDialogs {
    pub answer: bool,
}

impl Default for LogDialogs {
    fn default() -> Self {
        Self { answer: true }
    }
}

impl Dialogs for LogDialogs {
    fn alert(&self, message: &str) {
        log::info!("alert: {message}");
    }

    fn confirm(&self, message: &str) -> bool {
        log::info!("confirm: {message} -> {}", self.answer);
        self.answer
    }
}

#[derive(Trace, Finalize, JsData, Clone)]
pub struct DialogsHandle {
    #[unsafe_ignore_trace]
    inner: Rc<dyn Dialogs>,
}

impl DialogsHandle {
    pub fn new(inner: Rc<dyn Dialogs>) -> Self {
        Self { inner }
    }

    pub fn alert(&self, message: &str) {
        self.inner.alert(message)
    }

    pub fn confirm(&self, message: &str) -> bool {
        self.inner.confirm(message)
    }
}

fn message_arg(args: &[JsValue], context: &mut Context) -> JsResult<String> {
    match args.first() {
        None => Ok(String::new()),
        Some(value) => to_rust_string(value, context),
    }
}

pub struct DialogsApi {
    pub dialogs: Rc<dyn Dialogs>,
}

impl DialogsApi {
    fn alert(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        host_defined!(context, dialogs: DialogsHandle);
        let message = message_arg(args, context)?;
        dialogs.alert(&message);
        Ok(JsValue::undefined())
    }

    fn confirm(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        host_defined!(context, dialogs: DialogsHandle);
        let message = message_arg(args, context)?;
        Ok(dialogs.confirm(&message).into())
    }

    fn open(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        let url = match args.get_or_undefined(0) {
            value if value.is_undefined() => "about:blank".to_string(),
            value => to_rust_string(value, context)?,
        };
        log::warn!("window.open({url}) is blocked on this page");
        Ok(JsValue::null())
    }

    fn close(_: &JsValue, _: &[JsValue], _: &mut Context) -> JsResult<JsValue> {
        log::warn!("Scripts may not close windows that were not opened by script.");
        Ok(JsValue::undefined())
    }
}

impl exthost_core::Api for DialogsApi {
    fn init(self, context: &mut Context) -> JsResult<()> {
        Realm::current(context).insert_host_defined(DialogsHandle::new(self.dialogs));
        context.register_global_builtin_callable(
            js_string!("alert"),
            0,
            NativeFunction::from_fn_ptr(Self::alert),
        )?;
        context.register_global_builtin_callable(
            js_string!("confirm"),
            0,
            NativeFunction::from_fn_ptr(Self::confirm),
        )?;
        context.register_global_builtin_callable(
            js_string!("open"),
            0,
            NativeFunction::from_fn_ptr(Self::open),
        )?;
        context.register_global_builtin_callable(
            js_string!("close"),
            0,
            NativeFunction::from_fn_ptr(Self::close),
        )
    }
}

#[cfg(test)]
mod test {
    use std::{cell::RefCell, rc::Rc};

    use boa_engine::JsValue;
    use exthost_core::{Api, Runtime};

    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: RefCell<Vec<String>>,
    }

    impl Dialogs for Recorder {
        fn alert(&self, message: &str) {
            self.seen.borrow_mut().push(format!("alert {message}"));
        }

        fn confirm(&self, message: &str) -> bool {
            self.seen.borrow_mut().push(format!("confirm {message}"));
            false
        }
    }

    #[test]
    fn routes_dialogs_to_the_embedder() {
        let recorder = Rc::new(Recorder::default());
        let mut rt = Runtime::new().unwrap();
        DialogsApi {
            dialogs: recorder.clone(),
        }
        .init(rt.context())
        .unwrap();

        let answer = rt.eval("alert('hi'); confirm('sure?')").unwrap();

        assert_eq!(answer, JsValue::from(false));
        assert_eq!(
            *recorder.seen.borrow(),
            vec!["alert hi".to_string(), "confirm sure?".to_string()]
        );
        assert_eq!(rt.eval("open()").unwrap(), JsValue::null());
    }
}
