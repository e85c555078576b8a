use crate::ast::{Expr, Module, Parameter, Stmt};

/// Read-only traversal over the syntax tree.
///
/// Implementors decide how deep to walk; the trait only fixes the entry
/// points so tree consumers (the formatter, debugging printers) share one
/// shape.
pub trait Visitor<'ast, T> {
    fn visit_module(&mut self, module: &'ast Module) -> T;
    fn visit_stmt(&mut self, stmt: &'ast Stmt) -> T;
    fn visit_expr(&mut self, expr: &'ast Expr) -> T;

    fn visit_parameter(&mut self, param: &'ast Parameter) -> T;
}
