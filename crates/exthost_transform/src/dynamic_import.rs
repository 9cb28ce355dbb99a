use oxc_ast::ast::*;
use oxc_ast_visit::{walk, Visit};

/// Stops at the first `import(...)` call.
#[derive(Default)]
pub struct DynamicImportFinder {
    pub found: bool,
}

impl<'a> Visit<'a> for DynamicImportFinder {
    fn visit_statement(&mut self, it: &Statement<'a>) {
        if !self.found {
            walk::walk_statement(self, it)
        }
    }

    fn visit_expression(&mut self, it: &Expression<'a>) {
        if !self.found {
            walk::walk_expression(self, it)
        }
    }

    fn visit_import_expression(&mut self, _it: &ImportExpression<'a>) {
        self.found = true;
    }
}

/// Whether `program` contains a dynamic `import()`.
pub fn contains_dynamic_import(program: &Program<'_>) -> bool {
    let mut finder = DynamicImportFinder::default();
    finder.visit_program(program);
    finder.found
}
