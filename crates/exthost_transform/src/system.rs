//! Compiles an ES module into the register format the loader executes:
//!
//! ```text
//! (function () {
//! arguments[0].register(["./dep.js"], function (_export, _context) {
//! "use strict";
//! var _m0;
//! return {
//! setters: [function (m) { _m0 = m; }],
//! execute: function () {
//! _context.live({ ... });
//! ...module body...
//! }
//! };
//! });
//! })
//! ```
//!
//! The registration function arrives as the first argument of the wrapper,
//! so no global `System` is needed. Imported bindings are read through the
//! dependency namespace objects (`_m0.name`), which keeps them live; exports
//! are published as getters through `_context.live`.

use std::collections::{HashMap, HashSet};

use oxc_ast::ast::*;
use oxc_ast_visit::{walk, Visit};
use oxc_semantic::Semantic;
use oxc_span::{GetSpan, Span};
use oxc_syntax::{scope::ScopeFlags, symbol::SymbolId};

use crate::{edit::Edits, typescript::is_type_only_declaration};

/// The callee rewritten in prebuilt `System.register(...)` bundles.
pub const REGISTER_CALLEE: &str = "arguments[0].register";

const DEFAULT_LOCAL: &str = "__default";

/// Finds a top-level `System.register(...)` statement and returns its callee.
pub fn find_register_call(program: &Program<'_>) -> Option<Span> {
    program.body.iter().find_map(|statement| {
        let Statement::ExpressionStatement(statement) = statement else {
            return None;
        };
        let Expression::CallExpression(call) = &statement.expression else {
            return None;
        };
        let Expression::StaticMemberExpression(callee) = &call.callee else {
            return None;
        };
        match &callee.object {
            Expression::Identifier(object)
                if object.name == "System" && callee.property.name == "register" =>
            {
                Some(callee.span)
            }
            _ => None,
        }
    })
}

/// Wraps a prebuilt register bundle so its registration goes through the
/// wrapper's first argument.
pub fn wrap_register_bundle(source: &str, callee: Span) -> String {
    let mut edits = Edits::new();
    edits.replace_span(callee, REGISTER_CALLEE);
    format!("(function () {{\n{}\n}})", edits.apply(source))
}

/// `name` as a property access on `object`.
fn member(object: &str, name: &str) -> String {
    let is_identifier = name
        .chars()
        .enumerate()
        .all(|(index, ch)| ch == '_' || ch == '$' || ch.is_alphabetic() || (index > 0 && ch.is_numeric()))
        && !name.is_empty();
    if is_identifier {
        format!("{object}.{name}")
    } else {
        format!("{object}[{}]", quote(name))
    }
}

fn quote(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

fn export_name(name: &ModuleExportName<'_>) -> String {
    match name {
        ModuleExportName::StringLiteral(literal) => literal.value.to_string(),
        other => other.name().to_string(),
    }
}

/// Syntax positions the reference rewrite must treat specially.
#[derive(Default)]
struct ModuleScan {
    /// `{ x }` properties whose value is an identifier.
    shorthand: HashSet<Span>,
    /// Identifiers called directly, `x()` or x`...`.
    callees: HashSet<Span>,
    dynamic_imports: Vec<Span>,
    import_metas: Vec<Span>,
    function_depth: usize,
    top_level_await: bool,
}

impl<'a> Visit<'a> for ModuleScan {
    fn visit_object_property(&mut self, it: &ObjectProperty<'a>) {
        if it.shorthand {
            if let Expression::Identifier(identifier) = &it.value {
                self.shorthand.insert(identifier.span);
            }
        }
        walk::walk_object_property(self, it)
    }

    fn visit_call_expression(&mut self, it: &CallExpression<'a>) {
        if let Expression::Identifier(identifier) = &it.callee {
            self.callees.insert(identifier.span);
        }
        walk::walk_call_expression(self, it)
    }

    fn visit_tagged_template_expression(&mut self, it: &TaggedTemplateExpression<'a>) {
        if let Expression::Identifier(identifier) = &it.tag {
            self.callees.insert(identifier.span);
        }
        walk::walk_tagged_template_expression(self, it)
    }

    fn visit_import_expression(&mut self, it: &ImportExpression<'a>) {
        self.dynamic_imports.push(it.span);
        walk::walk_import_expression(self, it)
    }

    fn visit_meta_property(&mut self, it: &MetaProperty<'a>) {
        if it.meta.name == "import" && it.property.name == "meta" {
            self.import_metas.push(it.span);
        }
    }

    fn visit_function(&mut self, it: &Function<'a>, flags: ScopeFlags) {
        self.function_depth += 1;
        walk::walk_function(self, it, flags);
        self.function_depth -= 1;
    }

    fn visit_arrow_function_expression(&mut self, it: &ArrowFunctionExpression<'a>) {
        self.function_depth += 1;
        walk::walk_arrow_function_expression(self, it);
        self.function_depth -= 1;
    }

    fn visit_await_expression(&mut self, it: &AwaitExpression<'a>) {
        if self.function_depth == 0 {
            self.top_level_await = true;
        }
        walk::walk_await_expression(self, it)
    }

    fn visit_for_of_statement(&mut self, it: &ForOfStatement<'a>) {
        if it.r#await && self.function_depth == 0 {
            self.top_level_await = true;
        }
        walk::walk_for_of_statement(self, it)
    }

    fn visit_ts_type_annotation(&mut self, _it: &TSTypeAnnotation<'a>) {}
}

/// Builds the register wrapper around one module body.
pub struct ModuleCompiler<'s> {
    source: &'s str,
    pub edits: Edits,
    dependencies: Vec<String>,
    /// Exported name and the expression that reads it.
    exports: Vec<(String, String)>,
    imports: HashMap<SymbolId, String>,
    import_names: HashMap<String, String>,
    top_level_await: bool,
}

impl<'s> ModuleCompiler<'s> {
    pub fn new(source: &'s str) -> Self {
        Self {
            source,
            edits: Edits::new(),
            dependencies: Vec::new(),
            exports: Vec::new(),
            imports: HashMap::new(),
            import_names: HashMap::new(),
            top_level_await: false,
        }
    }

    fn dependency(&mut self, specifier: &str) -> String {
        let index = match self.dependencies.iter().position(|dep| dep == specifier) {
            Some(index) => index,
            None => {
                self.dependencies.push(specifier.to_string());
                self.dependencies.len() - 1
            }
        };
        format!("_m{index}")
    }

    fn export(&mut self, name: impl Into<String>, expression: impl Into<String>) {
        self.exports.push((name.into(), expression.into()));
    }

    fn bind_import(&mut self, local: &BindingIdentifier<'_>, expression: String) {
        if let Some(symbol) = local.symbol_id.get() {
            self.imports.insert(symbol, expression.clone());
        }
        self.import_names.insert(local.name.to_string(), expression);
    }

    fn local_expression(&self, local: &str) -> String {
        self.import_names
            .get(local)
            .cloned()
            .unwrap_or_else(|| local.to_string())
    }

    /// Rewrites the module syntax of `program` and the reads of its imports.
    pub fn compile(&mut self, program: &Program<'_>, semantic: &Semantic<'_>) {
        if let Some(hashbang) = &program.hashbang {
            self.edits.delete_span(hashbang.span);
        }

        for statement in &program.body {
            self.compile_statement(statement);
        }

        let mut scan = ModuleScan::default();
        scan.visit_program(program);
        self.top_level_await = scan.top_level_await;

        for span in &scan.dynamic_imports {
            self.edits
                .replace(span.start, span.start + "import".len() as u32, "_context.import");
        }
        for span in &scan.import_metas {
            self.edits.replace_span(*span, "_context.meta");
        }

        let scoping = semantic.scoping();
        for (symbol, expression) in &self.imports {
            for reference_id in scoping.get_resolved_reference_ids(*symbol) {
                let reference = scoping.get_reference(*reference_id);
                if reference.flags().is_type_only() {
                    continue;
                }
                let span = semantic.reference_span(reference);
                let name = &self.source[span.start as usize..span.end as usize];
                let replacement = if scan.shorthand.contains(&span) {
                    format!("{name}: {expression}")
                } else if scan.callees.contains(&span) {
                    format!("(0, {expression})")
                } else {
                    expression.clone()
                };
                self.edits.replace_span(span, replacement);
            }
        }
    }

    fn compile_statement(&mut self, statement: &Statement<'_>) {
        match statement {
            Statement::ImportDeclaration(import) => {
                self.edits.delete_span(import.span);
                if import.import_kind.is_type() {
                    return;
                }
                let specifiers: Vec<_> = import
                    .specifiers
                    .iter()
                    .flatten()
                    .filter(|specifier| match specifier {
                        ImportDeclarationSpecifier::ImportSpecifier(specifier) => {
                            !specifier.import_kind.is_type()
                        }
                        _ => true,
                    })
                    .collect();
                let type_only = import
                    .specifiers
                    .as_ref()
                    .map_or(false, |all| !all.is_empty() && specifiers.is_empty());
                if type_only {
                    return;
                }

                let namespace = self.dependency(&import.source.value);
                for specifier in specifiers {
                    match specifier {
                        ImportDeclarationSpecifier::ImportSpecifier(specifier) => {
                            let expression = member(&namespace, &export_name(&specifier.imported));
                            self.bind_import(&specifier.local, expression);
                        }
                        ImportDeclarationSpecifier::ImportDefaultSpecifier(specifier) => {
                            self.bind_import(&specifier.local, member(&namespace, "default"));
                        }
                        ImportDeclarationSpecifier::ImportNamespaceSpecifier(specifier) => {
                            self.bind_import(&specifier.local, namespace.clone());
                        }
                    }
                }
            }
            Statement::ExportNamedDeclaration(export) => self.compile_named_export(export),
            Statement::ExportDefaultDeclaration(export) => self.compile_default_export(export),
            Statement::ExportAllDeclaration(export) => {
                if export.export_kind.is_type() {
                    self.edits.delete_span(export.span);
                    return;
                }
                let namespace = self.dependency(&export.source.value);
                match &export.exported {
                    Some(exported) => {
                        self.edits.delete_span(export.span);
                        self.export(export_name(exported), namespace);
                    }
                    None => self
                        .edits
                        .replace_span(export.span, format!("_context.reexport({namespace});")),
                }
            }
            _ => {}
        }
    }

    fn compile_named_export(&mut self, export: &ExportNamedDeclaration<'_>) {
        if export.export_kind.is_type() {
            self.edits.delete_span(export.span);
            return;
        }

        if let Some(declaration) = &export.declaration {
            if is_type_only_declaration(declaration) {
                self.edits.delete_span(export.span);
                return;
            }
            self.edits.delete(export.span.start, declaration.span().start);
            match declaration {
                Declaration::VariableDeclaration(variable) => {
                    for declarator in &variable.declarations {
                        for identifier in declarator.id.get_binding_identifiers() {
                            self.export(identifier.name.to_string(), identifier.name.to_string());
                        }
                    }
                }
                Declaration::FunctionDeclaration(function) => {
                    if let Some(id) = &function.id {
                        self.export(id.name.to_string(), id.name.to_string());
                    }
                }
                Declaration::ClassDeclaration(class) => {
                    if let Some(id) = &class.id {
                        self.export(id.name.to_string(), id.name.to_string());
                    }
                }
                _ => {}
            }
            return;
        }

        self.edits.delete_span(export.span);
        let specifiers = export
            .specifiers
            .iter()
            .filter(|specifier| !specifier.export_kind.is_type());
        match &export.source {
            Some(source) => {
                let specifiers: Vec<_> = specifiers.collect();
                if specifiers.is_empty() && !export.specifiers.is_empty() {
                    return;
                }
                let namespace = self.dependency(&source.value);
                for specifier in specifiers {
                    let expression = member(&namespace, &export_name(&specifier.local));
                    self.export(export_name(&specifier.exported), expression);
                }
            }
            None => {
                for specifier in specifiers {
                    let expression = self.local_expression(&export_name(&specifier.local));
                    self.export(export_name(&specifier.exported), expression);
                }
            }
        }
    }

    fn compile_default_export(&mut self, export: &ExportDefaultDeclaration<'_>) {
        let prefix_end = export.declaration.span().start;
        match &export.declaration {
            ExportDefaultDeclarationKind::TSInterfaceDeclaration(_) => {
                self.edits.delete_span(export.span)
            }
            ExportDefaultDeclarationKind::FunctionDeclaration(function)
                if function.body.is_none() =>
            {
                self.edits.delete_span(export.span)
            }
            ExportDefaultDeclarationKind::FunctionDeclaration(function) => {
                self.export_default_declaration(export.span, prefix_end, function.id.as_ref(), function.span)
            }
            ExportDefaultDeclarationKind::ClassDeclaration(class) => {
                self.export_default_declaration(export.span, prefix_end, class.id.as_ref(), class.span)
            }
            _ => {
                self.edits.replace(
                    export.span.start,
                    prefix_end,
                    format!("const {DEFAULT_LOCAL} = "),
                );
                self.export("default", DEFAULT_LOCAL);
            }
        }
    }

    fn export_default_declaration(
        &mut self,
        span: Span,
        prefix_end: u32,
        id: Option<&BindingIdentifier<'_>>,
        declaration: Span,
    ) {
        match id {
            Some(id) => {
                self.edits.delete(span.start, prefix_end);
                self.export("default", id.name.to_string());
            }
            None => {
                self.edits
                    .replace(span.start, prefix_end, format!("const {DEFAULT_LOCAL} = "));
                self.edits.insert(declaration.end, ";");
                self.export("default", DEFAULT_LOCAL);
            }
        }
    }

    /// Wraps `body` (the module text with every edit applied).
    ///
    /// Script bodies keep sloppy mode and never expose exports; they only
    /// need the wrapper for `_context.import`.
    pub fn finish(self, body: &str, script: bool) -> String {
        let dependencies = self
            .dependencies
            .iter()
            .map(|dep| quote(dep))
            .collect::<Vec<_>>()
            .join(", ");
        let namespaces = (0..self.dependencies.len())
            .map(|index| format!("_m{index}"))
            .collect::<Vec<_>>();
        let setters = namespaces
            .iter()
            .map(|namespace| format!("function (m) {{ {namespace} = m; }}"))
            .collect::<Vec<_>>()
            .join(", ");

        let mut output = String::new();
        output.push_str("(function () {\n");
        output.push_str(&format!(
            "{REGISTER_CALLEE}([{dependencies}], function (_export, _context) {{\n"
        ));
        if !script {
            output.push_str("\"use strict\";\n");
        }
        if !namespaces.is_empty() {
            output.push_str(&format!("var {};\n", namespaces.join(", ")));
        }
        output.push_str("return {\n");
        output.push_str(&format!("setters: [{setters}],\n"));
        let asynchronous = if self.top_level_await { "async " } else { "" };
        output.push_str(&format!("execute: {asynchronous}function () {{\n"));
        if !self.exports.is_empty() {
            let getters = self
                .exports
                .iter()
                .map(|(name, expression)| {
                    format!("{}: function () {{ return {expression}; }}", quote(name))
                })
                .collect::<Vec<_>>()
                .join(", ");
            output.push_str(&format!("_context.live({{ {getters} }});\n"));
        }
        output.push_str(body);
        output.push_str("\n}\n};\n});\n})");
        output
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn quotes_non_identifier_members() {
        assert_eq!(member("_m0", "default"), "_m0.default");
        assert_eq!(member("_m0", "a-b"), "_m0[\"a-b\"]");
        assert_eq!(member("_m0", "1a"), "_m0[\"1a\"]");
    }
}
