//! The page's `console` object.
//!
//! Every message goes through the `log` facade, so whatever logger the
//! embedder installed decides where extension output ends up. Groups only
//! affect indentation.
//!
//! More information:
//!  - [MDN documentation][mdn]
//!  - [WHATWG `console` specification][spec]
//!
//! [spec]: https://console.spec.whatwg.org/
//! [mdn]: https://developer.mozilla.org/en-US/docs/Web/API/Console

use boa_engine::{
    js_string,
    object::{ErasedObject, ObjectInitializer},
    property::Attribute,
    value::Numeric,
    Context, JsArgs, JsData, JsNativeError, JsResult, JsValue, NativeFunction,
};
use boa_gc::{Finalize, GcRefMut, Trace};
use log::Level;

const TARGET: &str = "console";

fn display_js(value: &JsValue) -> String {
    match value.as_string() {
        Some(value) => value.to_std_string_escaped(),
        None => value.display().to_string(),
    }
}

/// The console formatter: `%s %d %i %f %o %O %c`, remaining arguments
/// appended with a space.
///
/// More information:
///  - [WHATWG `formatter` specification](https://console.spec.whatwg.org/#formatter)
pub fn formatter(data: &[JsValue], context: &mut Context) -> JsResult<String> {
    match data {
        [] => Ok(String::new()),
        [val] => Ok(display_js(val)),
        data => {
            let mut formatted = String::new();
            let mut arg_index = 0;
            if let Some(target) = data
                .get_or_undefined(0)
                .as_string()
                .map(|x| x.to_std_string_escaped())
            {
                arg_index = 1;
                let mut chars = target.chars();
                while let Some(c) = chars.next() {
                    if c != '%' {
                        formatted.push(c);
                        continue;
                    }
                    match chars.next().unwrap_or('%') {
                        'd' | 'i' => {
                            let arg = match data.get_or_undefined(arg_index).to_numeric(context)? {
                                Numeric::Number(r) => (r.floor() + 0.0).to_string(),
                                Numeric::BigInt(int) => int.to_string(),
                            };
                            formatted.push_str(&arg);
                            arg_index += 1;
                        }
                        'f' => {
                            let arg = data.get_or_undefined(arg_index).to_number(context)?;
                            formatted.push_str(&format!("{arg:.6}"));
                            arg_index += 1;
                        }
                        'o' | 'O' => {
                            let arg = data.get_or_undefined(arg_index);
                            formatted.push_str(&arg.display().to_string());
                            arg_index += 1;
                        }
                        's' => {
                            let arg = data
                                .get_or_undefined(arg_index)
                                .to_string(context)?
                                .to_std_string_escaped();
                            formatted.push_str(&arg);
                            arg_index += 1;
                        }
                        // styling has no meaning outside a devtools console
                        'c' => arg_index += 1,
                        '%' => formatted.push('%'),
                        c => {
                            formatted.push('%');
                            formatted.push(c);
                        }
                    }
                }
            }

            for rest in data.iter().skip(arg_index) {
                if !formatted.is_empty() {
                    formatted.push(' ');
                }
                formatted.push_str(&display_js(rest));
            }

            Ok(formatted)
        }
    }
}

#[derive(Trace, Finalize, JsData, Default)]
struct Console {
    groups: Vec<String>,
}

impl Console {
    fn from_js_value(value: &JsValue) -> JsResult<GcRefMut<'_, ErasedObject, Self>> {
        value
            .as_object()
            .and_then(|obj| obj.downcast_mut::<Self>())
            .ok_or_else(|| {
                JsNativeError::typ()
                    .with_message("Illegal invocation")
                    .into()
            })
    }

    fn emit(&self, level: Level, text: &str) {
        let indent = "  ".repeat(self.groups.len());
        for line in text.lines() {
            log::log!(target: TARGET, level, "{indent}{line}");
        }
        if text.is_empty() {
            log::log!(target: TARGET, level, "{indent}");
        }
    }

    fn print(&self, level: Level, data: &[JsValue], context: &mut Context) -> JsResult<()> {
        let text = formatter(data, context)?;
        self.emit(level, &text);
        Ok(())
    }

    /// `console.assert(condition, ...data)`
    fn assert(&self, assertion: bool, data: &[JsValue], context: &mut Context) -> JsResult<()> {
        if assertion {
            return Ok(());
        }

        let message = "Assertion failed";
        let mut args: Vec<JsValue> = Vec::from(data);
        match args.first().map(|first| (first.is_string(), display_js(first))) {
            None => args.push(js_string!(message).into()),
            Some((false, _)) => args.insert(0, js_string!(message).into()),
            Some((true, first)) => args[0] = js_string!(format!("{message}: {first}")).into(),
        }
        self.print(Level::Error, &args, context)
    }

    /// `console.group(...data)`
    fn group(&mut self, data: &[JsValue], context: &mut Context) -> JsResult<()> {
        let label = formatter(data, context)?;
        self.emit(Level::Info, &label);
        self.groups.push(label);
        Ok(())
    }

    fn group_end(&mut self) {
        self.groups.pop();
    }

    fn clear(&mut self) {
        self.groups.clear()
    }
}

/// Registers `console` on the global object of the current realm.
pub struct ConsoleApi;

macro_rules! leveled_console_function {
    ($name:ident, $level:expr) => {
        fn $name(this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
            let console = Console::from_js_value(this)?;
            console.print($level, args, context)?;
            Ok(JsValue::undefined())
        }
    };
}

impl ConsoleApi {
    const NAME: &'static str = "console";

    leveled_console_function!(log, Level::Info);
    leveled_console_function!(info, Level::Info);
    leveled_console_function!(debug, Level::Debug);
    leveled_console_function!(trace, Level::Trace);
    leveled_console_function!(warn, Level::Warn);
    leveled_console_function!(error, Level::Error);

    fn assert(this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        let console = Console::from_js_value(this)?;
        let assertion = args.get_or_undefined(0).to_boolean();
        let data = args.get(1..).unwrap_or(&[]);
        console.assert(assertion, data, context)?;
        Ok(JsValue::undefined())
    }

    fn group(this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        let mut console = Console::from_js_value(this)?;
        console.group(args, context)?;
        Ok(JsValue::undefined())
    }

    fn group_end(this: &JsValue, _: &[JsValue], _: &mut Context) -> JsResult<JsValue> {
        Console::from_js_value(this)?.group_end();
        Ok(JsValue::undefined())
    }

    fn clear(this: &JsValue, _: &[JsValue], _: &mut Context) -> JsResult<JsValue> {
        Console::from_js_value(this)?.clear();
        Ok(JsValue::undefined())
    }
}

impl exthost_core::Api for ConsoleApi {
    fn init(self, context: &mut Context) -> JsResult<()> {
        let console = ObjectInitializer::with_native_data(Console::default(), context)
            .function(NativeFunction::from_fn_ptr(Self::log), js_string!("log"), 0)
            .function(NativeFunction::from_fn_ptr(Self::info), js_string!("info"), 0)
            .function(NativeFunction::from_fn_ptr(Self::debug), js_string!("debug"), 0)
            .function(NativeFunction::from_fn_ptr(Self::trace), js_string!("trace"), 0)
            .function(NativeFunction::from_fn_ptr(Self::warn), js_string!("warn"), 0)
            .function(NativeFunction::from_fn_ptr(Self::error), js_string!("error"), 0)
            .function(NativeFunction::from_fn_ptr(Self::assert), js_string!("assert"), 0)
            .function(NativeFunction::from_fn_ptr(Self::group), js_string!("group"), 0)
            .function(
                NativeFunction::from_fn_ptr(Self::group),
                js_string!("groupCollapsed"),
                0,
            )
            .function(
                NativeFunction::from_fn_ptr(Self::group_end),
                js_string!("groupEnd"),
                0,
            )
            .function(NativeFunction::from_fn_ptr(Self::clear), js_string!("clear"), 0)
            .build();

        context.register_global_property(js_string!(Self::NAME), console, Attribute::all())
    }
}

#[cfg(test)]
mod test {
    use boa_engine::{Context, Source};

    use super::formatter;

    fn format(src: &str) -> String {
        let context = &mut Context::default();
        let args = context.eval(Source::from_bytes(src)).unwrap();
        let args = args.as_object().unwrap().clone();
        let array = boa_engine::object::builtins::JsArray::from_object(args).unwrap();
        let length = array.length(context).unwrap();
        let values: Vec<_> = (0..length).map(|i| array.get(i, context).unwrap()).collect();
        formatter(&values, context).unwrap()
    }

    #[test]
    fn substitutes_format_specifiers() {
        assert_eq!(format("['%s is %d years', 'Ann', 42.7]"), "Ann is 42 years");
        assert_eq!(format("['%f', 1.5]"), "1.500000");
        assert_eq!(format("['100%% of %s', 'it']"), "100% of it");
        assert_eq!(format("['%cstyled', 'color: red']"), "styled");
    }

    #[test]
    fn appends_extra_arguments() {
        assert_eq!(format("['a', 'b', 3]"), "a b 3");
        assert_eq!(format("[1, 2]"), "1 2");
    }
}
