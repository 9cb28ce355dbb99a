//! Erases TypeScript-only syntax so the remaining text is plain JavaScript.
//!
//! Type positions are deleted by span; nothing is re-printed, so the output
//! keeps the author's formatting and line numbers.

use oxc_ast::ast::*;
use oxc_ast_visit::{walk, Visit};
use oxc_span::{GetSpan, Span};
use oxc_syntax::scope::ScopeFlags;

use crate::edit::Edits;

/// Member modifiers that have no runtime meaning.
const TS_MODIFIERS: [&str; 7] = [
    "public",
    "private",
    "protected",
    "readonly",
    "override",
    "declare",
    "abstract",
];

/// Collects the deletions that turn `program` into JavaScript.
pub struct TypeStripper<'s> {
    source: &'s str,
    pub edits: Edits,
    /// First construct that cannot be erased (it has runtime semantics).
    pub unsupported: Option<(String, Span)>,
}

/// Declarations that only exist in the type system.
pub fn is_type_only_declaration(declaration: &Declaration<'_>) -> bool {
    match declaration {
        Declaration::TSTypeAliasDeclaration(_)
        | Declaration::TSInterfaceDeclaration(_)
        | Declaration::TSGlobalDeclaration(_) => true,
        Declaration::TSModuleDeclaration(module) => module.declare,
        Declaration::TSEnumDeclaration(enumeration) => enumeration.declare,
        Declaration::TSImportEqualsDeclaration(import) => import.import_kind.is_type(),
        Declaration::VariableDeclaration(variable) => variable.declare,
        Declaration::FunctionDeclaration(function) => function.declare || function.body.is_none(),
        Declaration::ClassDeclaration(class) => class.declare,
    }
}

impl<'s> TypeStripper<'s> {
    pub fn new(source: &'s str) -> Self {
        Self {
            source,
            edits: Edits::new(),
            unsupported: None,
        }
    }

    fn unsupported(&mut self, what: &str, span: Span) {
        if self.unsupported.is_none() {
            self.unsupported = Some((format!("{what} is not supported"), span));
        }
    }

    /// Deletes the first `ch` found in `start..end`.
    fn delete_char(&mut self, start: u32, end: u32, ch: char) {
        let end = (end as usize).min(self.source.len());
        let start = (start as usize).min(end);
        if let Some(offset) = self.source[start..end].find(ch) {
            let at = (start + offset) as u32;
            self.edits.delete(at, at + ch.len_utf8() as u32);
        }
    }

    /// Deletes modifier keywords in `start..end` (the text before a member key).
    fn delete_modifiers(&mut self, start: u32, end: u32) {
        let text = &self.source[start as usize..end as usize];
        let mut words = Vec::new();
        let mut word_start = None;
        for (index, ch) in text.char_indices().chain(std::iter::once((text.len(), ' '))) {
            match (ch.is_ascii_alphabetic(), word_start) {
                (true, None) => word_start = Some(index),
                (false, Some(from)) => {
                    words.push((from, index));
                    word_start = None;
                }
                _ => {}
            }
        }

        for (from, to) in words {
            if !TS_MODIFIERS.contains(&&text[from..to]) {
                continue;
            }
            let trailing = text[to..].len() - text[to..].trim_start().len();
            self.edits
                .delete(start + from as u32, start + (to + trailing) as u32);
        }
    }

    fn strip_declaration(&mut self, declaration: &Declaration<'_>) -> bool {
        if is_type_only_declaration(declaration) {
            self.edits.delete_span(declaration.span());
            return true;
        }
        match declaration {
            Declaration::TSEnumDeclaration(enumeration) => {
                self.unsupported("`enum`", enumeration.span);
                true
            }
            Declaration::TSModuleDeclaration(module) => {
                self.unsupported("`namespace`", module.span);
                true
            }
            Declaration::TSImportEqualsDeclaration(import) => {
                self.unsupported("`import =`", import.span);
                true
            }
            _ => false,
        }
    }

    fn members_start(decorators: &[Decorator<'_>], span: Span) -> u32 {
        decorators.last().map_or(span.start, |decorator| decorator.span.end)
    }
}

impl<'a, 's> Visit<'a> for TypeStripper<'s> {
    fn visit_statement(&mut self, it: &Statement<'a>) {
        match it {
            Statement::TSExportAssignment(assignment) => {
                self.unsupported("`export =`", assignment.span)
            }
            Statement::TSNamespaceExportDeclaration(declaration) => {
                self.edits.delete_span(declaration.span)
            }
            Statement::ImportDeclaration(import) if import.import_kind.is_type() => {
                self.edits.delete_span(import.span)
            }
            Statement::ExportNamedDeclaration(export) if export.export_kind.is_type() => {
                self.edits.delete_span(export.span)
            }
            _ => {
                if let Some(declaration) = it.as_declaration() {
                    if self.strip_declaration(declaration) {
                        return;
                    }
                }
                walk::walk_statement(self, it)
            }
        }
    }

    fn visit_declaration(&mut self, it: &Declaration<'a>) {
        if !self.strip_declaration(it) {
            walk::walk_declaration(self, it)
        }
    }

    fn visit_ts_type_annotation(&mut self, it: &TSTypeAnnotation<'a>) {
        self.edits.delete_span(it.span);
    }

    fn visit_ts_type_parameter_declaration(&mut self, it: &TSTypeParameterDeclaration<'a>) {
        self.edits.delete_span(it.span);
    }

    fn visit_ts_type_parameter_instantiation(&mut self, it: &TSTypeParameterInstantiation<'a>) {
        self.edits.delete_span(it.span);
    }

    fn visit_ts_this_parameter(&mut self, _it: &TSThisParameter<'a>) {}

    fn visit_ts_class_implements_list(&mut self, _it: &oxc_allocator::Vec<'a, TSClassImplements<'a>>) {}

    fn visit_ts_as_expression(&mut self, it: &TSAsExpression<'a>) {
        self.edits.delete(it.expression.span().end, it.span.end);
        self.visit_expression(&it.expression);
    }

    fn visit_ts_satisfies_expression(&mut self, it: &TSSatisfiesExpression<'a>) {
        self.edits.delete(it.expression.span().end, it.span.end);
        self.visit_expression(&it.expression);
    }

    fn visit_ts_non_null_expression(&mut self, it: &TSNonNullExpression<'a>) {
        self.edits.delete(it.expression.span().end, it.span.end);
        self.visit_expression(&it.expression);
    }

    fn visit_ts_type_assertion(&mut self, it: &TSTypeAssertion<'a>) {
        self.edits.delete(it.span.start, it.expression.span().start);
        self.visit_expression(&it.expression);
    }

    fn visit_ts_instantiation_expression(&mut self, it: &TSInstantiationExpression<'a>) {
        self.edits.delete_span(it.type_arguments.span);
        self.visit_expression(&it.expression);
    }

    fn visit_function(&mut self, it: &Function<'a>, flags: ScopeFlags) {
        if let Some(this_param) = &it.this_param {
            let next = it
                .params
                .items
                .first()
                .map(|param| param.span.start)
                .or_else(|| it.params.rest.as_ref().map(|rest| rest.span.start));
            match next {
                Some(next) => self.edits.delete(this_param.span.start, next),
                None => {
                    let rest = &self.source[this_param.span.end as usize..];
                    let trimmed = rest.trim_start();
                    let end = if trimmed.starts_with(',') {
                        this_param.span.end + (rest.len() - trimmed.len()) as u32 + 1
                    } else {
                        this_param.span.end
                    };
                    self.edits.delete(this_param.span.start, end);
                }
            }
        }
        walk::walk_function(self, it, flags)
    }

    fn visit_formal_parameter(&mut self, it: &FormalParameter<'a>) {
        if it.accessibility.is_some() || it.readonly || it.r#override {
            self.unsupported("Parameter property", it.span);
            return;
        }
        if it.optional {
            let limit = it
                .type_annotation
                .as_ref()
                .map(|annotation| annotation.span.start)
                .or_else(|| it.initializer.as_ref().map(|init| init.span().start))
                .unwrap_or(it.span.end);
            self.delete_char(it.pattern.span().end, limit, '?');
        }
        walk::walk_formal_parameter(self, it)
    }

    fn visit_variable_declarator(&mut self, it: &VariableDeclarator<'a>) {
        if it.definite {
            let limit = it
                .type_annotation
                .as_ref()
                .map_or(it.span.end, |annotation| annotation.span.start);
            self.delete_char(it.id.span().end, limit, '!');
        }
        walk::walk_variable_declarator(self, it)
    }

    fn visit_class(&mut self, it: &Class<'a>) {
        if it.r#abstract {
            let head = &self.source[it.span.start as usize..];
            if head.starts_with("abstract") {
                if let Some(keyword) = head.find("class") {
                    self.edits.delete(it.span.start, it.span.start + keyword as u32);
                }
            } else {
                let before = self.source[..it.span.start as usize].trim_end();
                if before.ends_with("abstract") {
                    let at = (before.len() - "abstract".len()) as u32;
                    self.delete_modifiers(at, it.span.start);
                }
            }
        }

        if let (Some(first), Some(last)) = (it.implements.first(), it.implements.last()) {
            let head = &self.source[it.span.start as usize..first.span.start as usize];
            if let Some(keyword) = head.rfind("implements") {
                self.edits
                    .delete(it.span.start + keyword as u32, last.span.end);
            }
        }

        walk::walk_class(self, it)
    }

    fn visit_class_element(&mut self, it: &ClassElement<'a>) {
        match it {
            ClassElement::TSIndexSignature(signature) => self.edits.delete_span(signature.span),
            ClassElement::MethodDefinition(method) => {
                if matches!(method.r#type, MethodDefinitionType::TSAbstractMethodDefinition)
                    || method.value.body.is_none()
                {
                    self.edits.delete_span(method.span);
                    return;
                }
                let key = method.key.span();
                self.delete_modifiers(Self::members_start(&method.decorators, method.span), key.start);
                if method.optional {
                    self.delete_char(key.end, method.value.params.span.start, '?');
                }
                walk::walk_method_definition(self, method)
            }
            ClassElement::PropertyDefinition(property) => {
                if matches!(property.r#type, PropertyDefinitionType::TSAbstractPropertyDefinition)
                    || property.declare
                {
                    self.edits.delete_span(property.span);
                    return;
                }
                let key = property.key.span();
                self.delete_modifiers(
                    Self::members_start(&property.decorators, property.span),
                    key.start,
                );
                let limit = property
                    .type_annotation
                    .as_ref()
                    .map(|annotation| annotation.span.start)
                    .or_else(|| property.value.as_ref().map(|value| value.span().start))
                    .unwrap_or(property.span.end);
                if property.optional {
                    self.delete_char(key.end, limit, '?');
                }
                if property.definite {
                    self.delete_char(key.end, limit, '!');
                }
                walk::walk_property_definition(self, property)
            }
            ClassElement::AccessorProperty(accessor) => {
                if matches!(accessor.r#type, AccessorPropertyType::TSAbstractAccessorProperty) {
                    self.edits.delete_span(accessor.span);
                    return;
                }
                let key = accessor.key.span();
                self.delete_modifiers(
                    Self::members_start(&accessor.decorators, accessor.span),
                    key.start,
                );
                walk::walk_accessor_property(self, accessor)
            }
            ClassElement::StaticBlock(block) => self.visit_static_block(block),
        }
    }
}

#[cfg(test)]
mod test {
    use oxc_allocator::Allocator;
    use oxc_parser::Parser;
    use oxc_span::SourceType;
    use pretty_assertions::assert_eq;

    use super::*;

    fn strip(source: &str) -> String {
        let allocator = Allocator::default();
        let parsed = Parser::new(&allocator, source, SourceType::ts()).parse();
        assert!(parsed.errors.is_empty(), "{:?}", parsed.errors);
        let mut stripper = TypeStripper::new(source);
        stripper.visit_program(&parsed.program);
        assert!(stripper.unsupported.is_none());
        stripper.edits.apply(source)
    }

    #[test]
    fn erases_annotations_and_declarations() {
        let source = "interface A { x: number }\ntype B = string;\nlet a: number = 1;\nfunction f<T>(x: T, y?: number): T { return x as T; }\n";

        assert_eq!(
            strip(source),
            "\n\nlet a = 1;\nfunction f(x, y) { return x; }\n"
        );
    }

    #[test]
    fn erases_class_modifiers() {
        let source = "abstract class A<T> extends B<T> implements C, D {\n  private readonly x!: number;\n  abstract m(): void;\n  public static y?: string = 'a';\n  protected run(): void {}\n}";

        assert_eq!(
            strip(source),
            "class A extends B  {\n  x;\n  \n  static y = 'a';\n  run() {}\n}"
        );
    }

    #[test]
    fn erases_expression_level_types() {
        let source = "const x = <any>y;\nconst z = w!.v satisfies Q;\nf<string>(this_param);\nfunction g(this: Window, a: number) {}";

        assert_eq!(
            strip(source),
            "const x = y;\nconst z = w.v;\nf(this_param);\nfunction g(a) {}"
        );
    }

    #[test]
    fn rejects_enums() {
        let source = "enum E { A }";
        let allocator = Allocator::default();
        let parsed = Parser::new(&allocator, source, SourceType::ts()).parse();
        let mut stripper = TypeStripper::new(source);
        stripper.visit_program(&parsed.program);

        let (message, span) = stripper.unsupported.unwrap();
        assert_eq!(message, "`enum` is not supported");
        assert_eq!(span, Span::new(0, 12));
    }
}
