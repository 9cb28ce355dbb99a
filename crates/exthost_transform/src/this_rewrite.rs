use oxc_ast::ast::*;
use oxc_ast_visit::{walk, Visit};
use oxc_syntax::scope::ScopeFlags;

use crate::edit::Edits;

/// What a sloppy-mode `this` becomes.
///
/// Module bodies run with a frozen null-prototype receiver; that receiver and
/// `undefined` both stand for "no receiver", which sloppy code reads as the
/// global object.
pub const THIS_REPLACEMENT: &str = "(typeof this === \"undefined\" || (this !== null && typeof this === \"object\" && Object.getPrototypeOf(this) === null && Object.isFrozen(this)) ? globalThis : this)";

/// Rewrites every `this` that is not in strict code.
///
/// Strictness is decided by `"use strict"` directives only (program and
/// function bodies) plus class bodies; the module goal alone does not make
/// code strict here, since module sources are written against sloppy
/// top-level `this`.
pub struct ThisRewriter {
    pub edits: Edits,
    strict: Vec<bool>,
}

impl ThisRewriter {
    pub fn new() -> Self {
        Self {
            edits: Edits::new(),
            strict: Vec::new(),
        }
    }

    fn is_strict(&self) -> bool {
        self.strict.last().copied().unwrap_or(false)
    }

    fn with_strictness(&mut self, strict: bool, f: impl FnOnce(&mut Self)) {
        let strict = strict || self.is_strict();
        self.strict.push(strict);
        f(self);
        self.strict.pop();
    }
}

impl Default for ThisRewriter {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Visit<'a> for ThisRewriter {
    fn visit_program(&mut self, it: &Program<'a>) {
        self.with_strictness(it.has_use_strict_directive(), |this| {
            walk::walk_program(this, it)
        })
    }

    fn visit_function(&mut self, it: &Function<'a>, flags: ScopeFlags) {
        self.with_strictness(it.has_use_strict_directive(), |this| {
            walk::walk_function(this, it, flags)
        })
    }

    fn visit_arrow_function_expression(&mut self, it: &ArrowFunctionExpression<'a>) {
        self.with_strictness(it.has_use_strict_directive(), |this| {
            walk::walk_arrow_function_expression(this, it)
        })
    }

    fn visit_class(&mut self, it: &Class<'a>) {
        self.with_strictness(true, |this| walk::walk_class(this, it))
    }

    fn visit_this_expression(&mut self, it: &ThisExpression) {
        if !self.is_strict() {
            self.edits.replace_span(it.span, THIS_REPLACEMENT);
        }
    }

    // Types never evaluate `this`.
    fn visit_ts_type_annotation(&mut self, _it: &TSTypeAnnotation<'a>) {}
}

#[cfg(test)]
mod test {
    use oxc_allocator::Allocator;
    use oxc_parser::Parser;
    use oxc_span::SourceType;

    use super::*;

    fn rewrite(source: &str) -> String {
        let allocator = Allocator::default();
        let parsed = Parser::new(&allocator, source, SourceType::ts()).parse();
        let mut rewriter = ThisRewriter::new();
        rewriter.visit_program(&parsed.program);
        rewriter.edits.apply(source).replace(THIS_REPLACEMENT, "THIS")
    }

    #[test]
    fn rewrites_sloppy_this() {
        assert_eq!(rewrite("this.a = 1; (() => this)();"), "THIS.a = 1; (() => THIS)();");
    }

    #[test]
    fn keeps_strict_this() {
        assert_eq!(rewrite("'use strict'; this.a = 1;"), "'use strict'; this.a = 1;");
        assert_eq!(
            rewrite("function f() { 'use strict'; return () => this } this"),
            "function f() { 'use strict'; return () => this } THIS"
        );
        assert_eq!(
            rewrite("class A { m() { return this } }"),
            "class A { m() { return this } }"
        );
    }
}
