//! Source-to-source transforms for extension code.
//!
//! Every source goes through the same pipeline: parse (TypeScript superset),
//! erase types, rebind sloppy `this`, then either emit plain script text or
//! compile to the register format understood by the loader. Results are
//! cached per exact source text and mode for the lifetime of the
//! [`Transformer`].

mod diagnostic;
mod dynamic_import;
mod edit;
mod system;
mod this_rewrite;
mod typescript;

use std::{
    collections::HashMap,
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};

use log::{debug, trace};
use oxc_allocator::Allocator;
use oxc_ast::ast::{Program, Statement};
use oxc_ast_visit::Visit;
use oxc_parser::Parser;
use oxc_semantic::SemanticBuilder;
use oxc_span::{SourceType, Span};
use parking_lot::RwLock;

pub use diagnostic::with_snippet;
pub use system::REGISTER_CALLEE;
pub use this_rewrite::THIS_REPLACEMENT;

use edit::Edits;
use system::ModuleCompiler;
use this_rewrite::ThisRewriter;
use typescript::TypeStripper;

/// Bumped whenever the output format changes, so stale prebuilt artifacts
/// are never picked up.
pub const PREBUILT_VERSION: u32 = 1;

/// Prefix of a prebuilt script that must run through the register path.
pub const PREBUILT_DYNAMIC_PREFIX: &str = "//d\n";
/// Prefix of a prebuilt script that can be evaluated directly.
pub const PREBUILT_STATIC_PREFIX: &str = "//s\n";

const IMPORT_OUTSIDE_MODULE: &str = "Cannot use import statement outside a module";
const EXPORT_OUTSIDE_MODULE: &str = "Unexpected token 'export'";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Script,
    Module,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Script => "script",
            Mode::Module => "module",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    /// Parse failure or syntax the transform cannot express, with a source
    /// excerpt already rendered into the message.
    #[error("{0}")]
    Syntax(String),
}

pub type Result<T> = std::result::Result<T, TransformError>;

/// `<path>.prebuilt-<version>-<mode>`
pub fn prebuilt_path(path: &str, version: u32, mode: Mode) -> String {
    format!("{path}.prebuilt-{version}-{mode}")
}

/// Splits a prebuilt script artifact into its "needs the register path"
/// flag and the script text. `None` for text without a known prefix.
pub fn parse_prebuilt_script(artifact: &str) -> Option<(bool, &str)> {
    if let Some(body) = artifact.strip_prefix(PREBUILT_DYNAMIC_PREFIX) {
        Some((true, body))
    } else {
        artifact
            .strip_prefix(PREBUILT_STATIC_PREFIX)
            .map(|body| (false, body))
    }
}

/// Caching source transformer shared by every realm of a host.
#[derive(Default)]
pub struct Transformer {
    script_cache: RwLock<HashMap<String, String>>,
    module_cache: RwLock<HashMap<String, String>>,
    dynamic_import_cache: RwLock<HashMap<String, bool>>,
    compilations: AtomicUsize,
}

impl fmt::Debug for Transformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transformer")
            .field("scripts", &self.script_cache.read().len())
            .field("modules", &self.module_cache.read().len())
            .field("compilations", &self.compilations())
            .finish()
    }
}

impl Transformer {
    pub fn new() -> Self {
        Self::default()
    }

    fn cache(&self, mode: Mode) -> &RwLock<HashMap<String, String>> {
        match mode {
            Mode::Script => &self.script_cache,
            Mode::Module => &self.module_cache,
        }
    }

    /// How many times the compiler actually ran (cache misses).
    pub fn compilations(&self) -> usize {
        self.compilations.load(Ordering::Relaxed)
    }

    /// Transforms `source` for `mode`. `path` only labels log output.
    pub fn transform(&self, source: &str, mode: Mode, path: &str) -> Result<String> {
        if let Some(cached) = self.cache(mode).read().get(source) {
            trace!("transform cache hit for {mode} {path}");
            return Ok(cached.clone());
        }

        debug!("transforming {mode} {path}");
        self.compilations.fetch_add(1, Ordering::Relaxed);
        let output = compile(source, mode)?;
        self.cache(mode)
            .write()
            .insert(source.to_string(), output.clone());
        Ok(output)
    }

    /// Whether `source` calls `import()` anywhere. Comments and strings
    /// never count; unparsable sources report `false`.
    pub fn has_dynamic_import(&self, source: &str) -> bool {
        if let Some(found) = self.dynamic_import_cache.read().get(source) {
            return *found;
        }
        let found = detect_dynamic_import(source);
        self.dynamic_import_cache
            .write()
            .insert(source.to_string(), found);
        found
    }

    /// Seeds the caches with a precompiled `output` for `source`.
    pub fn seed(&self, source: &str, mode: Mode, output: &str) {
        self.cache(mode)
            .write()
            .insert(source.to_string(), output.to_string());
    }

    /// Seeds the dynamic-import cache, e.g. from a prebuilt script prefix.
    pub fn seed_dynamic_import(&self, source: &str, found: bool) {
        self.dynamic_import_cache
            .write()
            .insert(source.to_string(), found);
    }

    /// The prebuilt artifact for `source`: the module transform as is, or
    /// the script transform behind its one-line register-path flag.
    pub fn prebuilt(&self, source: &str, mode: Mode, path: &str) -> Result<String> {
        let output = self.transform(source, mode, path)?;
        Ok(match mode {
            Mode::Module => output,
            Mode::Script if self.has_dynamic_import(source) => {
                format!("{PREBUILT_DYNAMIC_PREFIX}{output}")
            }
            Mode::Script => format!("{PREBUILT_STATIC_PREFIX}{output}"),
        })
    }
}

fn source_type(mode: Mode) -> SourceType {
    match mode {
        Mode::Script => SourceType::ts().with_script(true),
        Mode::Module => SourceType::ts().with_module(true),
    }
}

fn detect_dynamic_import(source: &str) -> bool {
    [Mode::Module, Mode::Script].into_iter().any(|mode| {
        let allocator = Allocator::default();
        let parsed = Parser::new(&allocator, source, source_type(mode)).parse();
        parsed.errors.is_empty() && dynamic_import::contains_dynamic_import(&parsed.program)
    })
}

fn syntax_error(message: &str, source: &str, span: Span) -> TransformError {
    TransformError::Syntax(with_snippet(message, source, Some(span)))
}

/// The first module declaration of a script, which makes it unrunnable.
fn module_syntax_in_script(program: &Program<'_>) -> Option<&'static str> {
    program.body.iter().find_map(|statement| match statement {
        Statement::ImportDeclaration(import) if !import.import_kind.is_type() => {
            Some(IMPORT_OUTSIDE_MODULE)
        }
        Statement::ExportNamedDeclaration(export) if !export.export_kind.is_type() => {
            Some(EXPORT_OUTSIDE_MODULE)
        }
        Statement::ExportDefaultDeclaration(_)
        | Statement::ExportAllDeclaration(_)
        | Statement::TSExportAssignment(_) => Some(EXPORT_OUTSIDE_MODULE),
        _ => None,
    })
}

fn compile(source: &str, mode: Mode) -> Result<String> {
    let allocator = Allocator::default();
    let parsed = Parser::new(&allocator, source, source_type(mode)).parse();
    if let Some(error) = parsed.errors.first() {
        return Err(TransformError::Syntax(diagnostic::render(error, source)));
    }
    let program = parsed.program;

    if let Some(callee) = system::find_register_call(&program) {
        return Ok(system::wrap_register_bundle(source, callee));
    }

    if mode == Mode::Script {
        if let Some(message) = module_syntax_in_script(&program) {
            // Same as a browser: the script fails when it runs, not when it loads.
            return Ok(format!("throw new SyntaxError({});", serde_json::Value::from(message)));
        }
    }

    let mut stripper = TypeStripper::new(source);
    stripper.visit_program(&program);
    if let Some((message, span)) = stripper.unsupported.take() {
        return Err(syntax_error(&message, source, span));
    }

    let mut rewriter = ThisRewriter::new();
    rewriter.visit_program(&program);

    let mut edits = Edits::new();
    edits.extend(stripper.edits);
    edits.extend(rewriter.edits);

    let needs_register = match mode {
        Mode::Module => true,
        Mode::Script => dynamic_import::contains_dynamic_import(&program),
    };
    if !needs_register {
        return Ok(edits.apply(source));
    }

    let semantic = SemanticBuilder::new().build(&program).semantic;
    let mut compiler = ModuleCompiler::new(source);
    compiler.compile(&program, &semantic);
    let mut module_edits = std::mem::take(&mut compiler.edits);
    module_edits.extend(edits);
    let body = module_edits.apply(source);

    Ok(compiler.finish(&body, mode == Mode::Script))
}

#[cfg(test)]
mod test {
    use expect_test::expect;
    use pretty_assertions::assert_eq;

    use super::*;

    fn transform(source: &str, mode: Mode) -> String {
        Transformer::new()
            .transform(source, mode, "test.js")
            .unwrap()
            .replace(THIS_REPLACEMENT, "THIS")
    }

    #[test]
    fn caches_per_source_and_mode() {
        let transformer = Transformer::new();
        let first = transformer.transform("let a = 1", Mode::Script, "a.js").unwrap();
        let second = transformer.transform("let a = 1", Mode::Script, "a.js").unwrap();

        assert_eq!(first, second);
        assert_eq!(transformer.compilations(), 1);

        transformer.transform("let a = 1", Mode::Module, "a.js").unwrap();
        assert_eq!(transformer.compilations(), 2);
    }

    #[test]
    fn detects_dynamic_import() {
        let transformer = Transformer::new();

        assert!(transformer.has_dynamic_import("import('x')"));
        assert!(!transformer.has_dynamic_import("import x from 'x'"));
        assert!(!transformer.has_dynamic_import("// import('x')"));
        assert!(!transformer.has_dynamic_import("const s = \"import('x')\""));
    }

    #[test]
    fn plain_scripts_stay_scripts() {
        assert_eq!(
            transform("var a: number = this.b;", Mode::Script),
            "var a = THIS.b;"
        );
    }

    #[test]
    fn scripts_reject_module_syntax_at_run_time() {
        assert_eq!(
            transform("import a from './a.js'; a();", Mode::Script),
            "throw new SyntaxError(\"Cannot use import statement outside a module\");"
        );
        assert_eq!(
            transform("export const a = 1;", Mode::Script),
            "throw new SyntaxError(\"Unexpected token 'export'\");"
        );
    }

    #[test]
    fn compiles_modules_to_register_format() {
        let source = "import def, { a as b, c } from './dep.js';\nimport * as ns from './ns.js';\nexport const x = b + ns.y;\nexport function f() { return c({ def }); }\nexport default 42;\nexport { b as z };\nexport * from './all.js';\n";

        expect![[r#"
            (function () {
            arguments[0].register(["./dep.js", "./ns.js", "./all.js"], function (_export, _context) {
            "use strict";
            var _m0, _m1, _m2;
            return {
            setters: [function (m) { _m0 = m; }, function (m) { _m1 = m; }, function (m) { _m2 = m; }],
            execute: function () {
            _context.live({ "x": function () { return x; }, "f": function () { return f; }, "default": function () { return __default; }, "z": function () { return _m0.a; } });


            const x = _m0.a + _m1.y;
            function f() { return (0, _m0.c)({ def: _m0.default }); }
            const __default = 42;

            _context.reexport(_m2);

            }
            };
            });
            })"#]]
        .assert_eq(&transform(source, Mode::Module));
    }

    #[test]
    fn top_level_await_makes_execute_async() {
        let output = transform("const m = await import('./m.js');\nconsole.log(import.meta.url);", Mode::Module);

        assert!(output.contains("execute: async function () {"));
        assert!(output.contains("const m = await _context.import('./m.js');"));
        assert!(output.contains("console.log(_context.meta.url);"));
    }

    #[test]
    fn scripts_with_dynamic_import_use_the_register_wrapper() {
        let output = transform("import('./a.js').then(a => a.run())", Mode::Script);

        assert!(output.starts_with("(function () {\narguments[0].register([], function (_export, _context) {\nreturn {"));
        assert!(output.contains("_context.import('./a.js').then(a => a.run())"));
        assert!(!output.contains("use strict"));
    }

    #[test]
    fn register_bundles_are_wrapped_not_recompiled() {
        let source = "System.register([], function (exports_1) { return { setters: [], execute: function () {} }; });";

        assert_eq!(
            transform(source, Mode::Module),
            "(function () {\narguments[0].register([], function (exports_1) { return { setters: [], execute: function () {} }; });\n})"
        );
    }

    #[test]
    fn reports_syntax_errors_with_context() {
        let error = Transformer::new()
            .transform("let a = 1;\nlet b = ;\n", Mode::Script, "broken.js")
            .unwrap_err();

        let TransformError::Syntax(message) = error else {
            panic!("expected a syntax error");
        };
        assert!(message.contains("Line 2 |  let b = ;"));
        assert!(message.contains("~~~~~~~~~"));
    }

    #[test]
    fn rejects_runtime_typescript_features() {
        let error = Transformer::new()
            .transform("namespace N { export const a = 1 }", Mode::Script, "n.ts")
            .unwrap_err();

        assert!(error.to_string().starts_with("`namespace` is not supported\n"));
    }

    #[test]
    fn prebuilt_artifacts_carry_the_register_flag() {
        let transformer = Transformer::new();

        let dynamic = transformer.prebuilt("import('./a.js')", Mode::Script, "a.js").unwrap();
        let plain = transformer.prebuilt("a()", Mode::Script, "b.js").unwrap();

        assert_eq!(parse_prebuilt_script(&dynamic).map(|(flag, _)| flag), Some(true));
        assert_eq!(parse_prebuilt_script(&plain), Some((false, "a()")));
        assert_eq!(parse_prebuilt_script("a()"), None);
        assert_eq!(
            prebuilt_path("js/index.js", PREBUILT_VERSION, Mode::Module),
            "js/index.js.prebuilt-1-module"
        );
    }
}
