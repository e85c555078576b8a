//! The rewriter: turns every function marked `@unstack` into a cache
//! declaration, a restartable step function, and a memoizing wrapper.
//!
//! The wrapper keeps the original name and signature, so callers are
//! unaffected. The step function is the original body with every recursive
//! self-call lifted into a dependency guard: compute the callee's argument
//! key, bail out with `("need", key)` if it is not cached yet, otherwise
//! read the cached value into a placeholder variable and continue. The
//! driver (see `crate::driver`) replays the step function until it stops
//! asking for dependencies.

use std::collections::HashSet;

use thiserror::Error;

use crate::ast::{
    BoolOperator, CmpOperator, Expr, Module, NameConstant, Number, Parameter, Stmt,
};
use crate::lexer::Lexer;
use crate::parser;

/// Decorator that selects a function for transformation.
pub const MARKER: &str = "unstack";

/// Name of the shared trampoline routine in transformed programs.
pub const DRIVER_NAME: &str = "_unstack_drive";

/// Surface-language definition of the driver, spliced once into transformed
/// output so the emitted program is self-contained.
const DRIVER_SOURCE: &str = r#"def _unstack_drive(step, key, cache):
    frontier = [key]
    while len(frontier) > 0:
        current = frontier.pop()
        if current in cache:
            continue
        outcome = step(current)
        if outcome[0] == "need":
            frontier.append(current)
            frontier.append(outcome[1])
        else:
            cache[current] = outcome[1]
    return cache[key]
"#;

#[derive(Debug, Clone, Error)]
pub enum RewriteError {
    #[error("line {line}: transforming '{func}' would generate the name '{name}', which the program already uses")]
    ReservedNameClash {
        func: String,
        name: String,
        line: usize,
    },

    #[error("line {line}: recursive call to '{func}' {reason}")]
    UnsupportedCallSite {
        func: String,
        reason: String,
        line: usize,
    },

    #[error("line {line}: function '{func}' {reason}")]
    UnsupportedSignature {
        func: String,
        reason: String,
        line: usize,
    },

    #[error("line {line}: call to '{func}' {reason}")]
    BadCallArguments {
        func: String,
        reason: String,
        line: usize,
    },
}

#[derive(Debug, Clone)]
pub struct RewriteOptions {
    /// Splice the surface-language driver definition into the output. The
    /// `run` pipeline turns this off and binds the driver name to the
    /// native trampoline instead.
    pub emit_driver: bool,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        RewriteOptions { emit_driver: true }
    }
}

/// Rewrites every marked function definition in the module, at any
/// statement depth. Unmarked definitions pass through untouched.
pub fn rewrite_module(module: &Module, options: &RewriteOptions) -> Result<Module, RewriteError> {
    let identifiers = collect_identifiers(module);

    let mut marked = 0;
    let body = rewrite_statements(&module.body, &identifiers, &mut marked)?;

    let mut result = Vec::new();
    if marked > 0 && options.emit_driver {
        result.extend(driver_definition());
    }
    result.extend(body);

    Ok(Module { body: result })
}

/// Counts the definitions carrying the transformation marker.
pub fn count_marked(module: &Module) -> usize {
    fn walk(stmts: &[Box<Stmt>], count: &mut usize) {
        for stmt in stmts {
            match stmt.as_ref() {
                Stmt::FunctionDef {
                    body,
                    decorator_list,
                    ..
                } => {
                    if decorator_list.iter().any(|d| d == MARKER) {
                        *count += 1;
                    }
                    walk(body, count);
                }
                Stmt::If { body, orelse, .. } => {
                    walk(body, count);
                    walk(orelse, count);
                }
                Stmt::While { body, .. } | Stmt::For { body, .. } => walk(body, count),
                _ => {}
            }
        }
    }

    let mut count = 0;
    walk(&module.body, &mut count);
    count
}

fn driver_definition() -> Vec<Box<Stmt>> {
    let mut lexer = Lexer::new(DRIVER_SOURCE);
    let tokens = lexer.tokenize();
    // The template is part of this crate; it always lexes and parses.
    let module = parser::parse(tokens).expect("driver template must parse");
    module.body
}

fn rewrite_statements(
    stmts: &[Box<Stmt>],
    identifiers: &HashSet<String>,
    marked: &mut usize,
) -> Result<Vec<Box<Stmt>>, RewriteError> {
    let mut out = Vec::new();

    for stmt in stmts {
        match stmt.as_ref() {
            Stmt::FunctionDef {
                name,
                params,
                body,
                decorator_list,
                line,
                column,
            } => {
                // Inner definitions first, so a marked function nested in
                // another (marked or not) is expanded in place.
                let new_body = rewrite_statements(body, identifiers, marked)?;

                if decorator_list.iter().any(|d| d == MARKER) {
                    *marked += 1;
                    let kept_decorators: Vec<String> = decorator_list
                        .iter()
                        .filter(|d| *d != MARKER)
                        .cloned()
                        .collect();
                    out.extend(transform_marked(
                        name,
                        params,
                        &new_body,
                        kept_decorators,
                        *line,
                        *column,
                        identifiers,
                    )?);
                } else {
                    out.push(Box::new(Stmt::FunctionDef {
                        name: name.clone(),
                        params: params.clone(),
                        body: new_body,
                        decorator_list: decorator_list.clone(),
                        line: *line,
                        column: *column,
                    }));
                }
            }
            Stmt::If {
                test,
                body,
                orelse,
                line,
                column,
            } => {
                out.push(Box::new(Stmt::If {
                    test: test.clone(),
                    body: rewrite_statements(body, identifiers, marked)?,
                    orelse: rewrite_statements(orelse, identifiers, marked)?,
                    line: *line,
                    column: *column,
                }));
            }
            Stmt::While {
                test,
                body,
                line,
                column,
            } => {
                out.push(Box::new(Stmt::While {
                    test: test.clone(),
                    body: rewrite_statements(body, identifiers, marked)?,
                    line: *line,
                    column: *column,
                }));
            }
            Stmt::For {
                target,
                iter,
                body,
                line,
                column,
            } => {
                out.push(Box::new(Stmt::For {
                    target: target.clone(),
                    iter: iter.clone(),
                    body: rewrite_statements(body, identifiers, marked)?,
                    line: *line,
                    column: *column,
                }));
            }
            other => out.push(Box::new(other.clone())),
        }
    }

    Ok(out)
}

/// Expands one marked definition into {cache, step function, wrapper}.
fn transform_marked(
    name: &str,
    params: &[Parameter],
    body: &[Box<Stmt>],
    decorators: Vec<String>,
    line: usize,
    column: usize,
    identifiers: &HashSet<String>,
) -> Result<Vec<Box<Stmt>>, RewriteError> {
    for param in params {
        if let Some(default) = &param.default {
            if contains_call_to(default, name) {
                return Err(RewriteError::UnsupportedSignature {
                    func: name.to_string(),
                    reason: "uses its own name in a parameter default".to_string(),
                    line,
                });
            }
        }
    }

    let mut rewriter = FunctionRewriter::new(name, params);
    let rewritten = rewriter.rewrite_suite(body)?;

    let mut reserved = vec![
        rewriter.cache_name.clone(),
        rewriter.step_name.clone(),
        rewriter.key_name.clone(),
        DRIVER_NAME.to_string(),
    ];
    reserved.extend(rewriter.generated.iter().cloned());
    for generated in &reserved {
        if identifiers.contains(generated) {
            return Err(RewriteError::ReservedNameClash {
                func: name.to_string(),
                name: generated.clone(),
                line,
            });
        }
    }

    // Step function: rebind the parameters from the key tuple, then run the
    // rewritten body; a fall-through off the end yields ("done", None).
    let mut step_body = Vec::new();
    for (index, param) in params.iter().enumerate() {
        step_body.push(assign(
            name_expr(&param.name, line),
            subscript(
                name_expr(&rewriter.key_name, line),
                int_expr(index as i64, line),
                line,
            ),
            line,
        ));
    }
    step_body.extend(rewritten);
    let ends_with_return = matches!(step_body.last().map(|s| s.as_ref()), Some(Stmt::Return { .. }));
    if !ends_with_return {
        step_body.push(tagged_return("done", none_expr(line), line));
    }

    let step_def = Box::new(Stmt::FunctionDef {
        name: rewriter.step_name.clone(),
        params: vec![Parameter {
            name: rewriter.key_name.clone(),
            default: None,
        }],
        body: step_body,
        decorator_list: Vec::new(),
        line,
        column,
    });

    // Wrapper: canonicalize the call into a key, short-circuit on a cache
    // hit, otherwise hand the step function to the driver.
    let key_tuple = tuple_expr(
        params.iter().map(|p| name_expr(&p.name, line)).collect(),
        line,
    );
    let wrapper_body = vec![
        assign(name_expr(&rewriter.key_name, line), key_tuple, line),
        Box::new(Stmt::If {
            test: Box::new(Expr::Compare {
                left: name_expr(&rewriter.key_name, line),
                ops: vec![CmpOperator::In],
                comparators: vec![name_expr(&rewriter.cache_name, line)],
                line,
                column: 0,
            }),
            body: vec![Box::new(Stmt::Return {
                value: Some(subscript(
                    name_expr(&rewriter.cache_name, line),
                    name_expr(&rewriter.key_name, line),
                    line,
                )),
                line,
                column: 0,
            })],
            orelse: Vec::new(),
            line,
            column: 0,
        }),
        Box::new(Stmt::Return {
            value: Some(Box::new(Expr::Call {
                func: name_expr(DRIVER_NAME, line),
                args: vec![
                    name_expr(&rewriter.step_name, line),
                    name_expr(&rewriter.key_name, line),
                    name_expr(&rewriter.cache_name, line),
                ],
                keywords: Vec::new(),
                line,
                column: 0,
            })),
            line,
            column: 0,
        }),
    ];

    let wrapper_def = Box::new(Stmt::FunctionDef {
        name: name.to_string(),
        params: params.to_vec(),
        body: wrapper_body,
        decorator_list: decorators,
        line,
        column,
    });

    let cache_decl = assign(
        name_expr(&rewriter.cache_name, line),
        Box::new(Expr::Dict {
            keys: Vec::new(),
            values: Vec::new(),
            line,
            column: 0,
        }),
        line,
    );

    Ok(vec![cache_decl, step_def, wrapper_def])
}

/// Per-function rewrite state: the placeholder counter and the names
/// generated so far.
struct FunctionRewriter<'a> {
    func: &'a str,
    params: &'a [Parameter],
    cache_name: String,
    step_name: String,
    key_name: String,
    counter: usize,
    generated: Vec<String>,
}

impl<'a> FunctionRewriter<'a> {
    fn new(func: &'a str, params: &'a [Parameter]) -> Self {
        FunctionRewriter {
            func,
            params,
            cache_name: format!("_{}_cache", func),
            step_name: format!("_{}_step", func),
            key_name: format!("_{}_key", func),
            counter: 0,
            generated: Vec::new(),
        }
    }

    fn rewrite_suite(&mut self, stmts: &[Box<Stmt>]) -> Result<Vec<Box<Stmt>>, RewriteError> {
        let mut out = Vec::new();

        for stmt in stmts {
            match stmt.as_ref() {
                Stmt::Return {
                    value,
                    line,
                    column: _,
                } => {
                    let mut guards = Vec::new();
                    let new_value = match value {
                        Some(value) => self.lift_expr(value, &mut guards)?,
                        None => none_expr(*line),
                    };
                    out.extend(guards);
                    out.push(tagged_return("done", new_value, *line));
                }
                Stmt::Assign {
                    target,
                    value,
                    line,
                    column,
                } => {
                    let mut guards = Vec::new();
                    let new_value = self.lift_expr(value, &mut guards)?;
                    let new_target = self.lift_expr(target, &mut guards)?;
                    out.extend(guards);
                    out.push(Box::new(Stmt::Assign {
                        target: new_target,
                        value: new_value,
                        line: *line,
                        column: *column,
                    }));
                }
                Stmt::AugAssign {
                    target,
                    op,
                    value,
                    line,
                    column,
                } => {
                    let mut guards = Vec::new();
                    let new_target = self.lift_expr(target, &mut guards)?;
                    let new_value = self.lift_expr(value, &mut guards)?;
                    out.extend(guards);
                    out.push(Box::new(Stmt::AugAssign {
                        target: new_target,
                        op: *op,
                        value: new_value,
                        line: *line,
                        column: *column,
                    }));
                }
                Stmt::Expr {
                    value,
                    line,
                    column,
                } => {
                    let mut guards = Vec::new();
                    let new_value = self.lift_expr(value, &mut guards)?;
                    out.extend(guards);
                    out.push(Box::new(Stmt::Expr {
                        value: new_value,
                        line: *line,
                        column: *column,
                    }));
                }
                Stmt::If {
                    test,
                    body,
                    orelse,
                    line,
                    column,
                } => {
                    let mut guards = Vec::new();
                    let new_test = self.lift_expr(test, &mut guards)?;
                    let new_body = self.rewrite_suite(body)?;
                    let new_orelse = self.rewrite_suite(orelse)?;
                    out.extend(guards);
                    out.push(Box::new(Stmt::If {
                        test: new_test,
                        body: new_body,
                        orelse: new_orelse,
                        line: *line,
                        column: *column,
                    }));
                }
                Stmt::While {
                    test,
                    body,
                    line,
                    column,
                } => {
                    if contains_call_to(test, self.func) {
                        return Err(RewriteError::UnsupportedCallSite {
                            func: self.func.to_string(),
                            reason: "cannot appear in a while condition (the dependency guard \
                                     would run once for a test that re-evaluates every iteration)"
                                .to_string(),
                            line: *line,
                        });
                    }
                    out.push(Box::new(Stmt::While {
                        test: test.clone(),
                        body: self.rewrite_suite(body)?,
                        line: *line,
                        column: *column,
                    }));
                }
                Stmt::For {
                    target,
                    iter,
                    body,
                    line,
                    column,
                } => {
                    if contains_call_to(target, self.func) {
                        return Err(RewriteError::UnsupportedCallSite {
                            func: self.func.to_string(),
                            reason: "cannot appear in a for-loop target".to_string(),
                            line: *line,
                        });
                    }
                    let mut guards = Vec::new();
                    let new_iter = self.lift_expr(iter, &mut guards)?;
                    let new_body = self.rewrite_suite(body)?;
                    out.extend(guards);
                    out.push(Box::new(Stmt::For {
                        target: target.clone(),
                        iter: new_iter,
                        body: new_body,
                        line: *line,
                        column: *column,
                    }));
                }
                Stmt::FunctionDef { line, .. } => {
                    if stmt_contains_call_to(stmt, self.func) {
                        return Err(RewriteError::UnsupportedCallSite {
                            func: self.func.to_string(),
                            reason: "cannot appear inside a nested function".to_string(),
                            line: *line,
                        });
                    }
                    out.push(stmt.clone());
                }
                Stmt::Global { .. }
                | Stmt::Pass { .. }
                | Stmt::Break { .. }
                | Stmt::Continue { .. } => out.push(stmt.clone()),
            }
        }

        Ok(out)
    }

    /// Rewrites one expression, replacing self-calls by placeholder reads
    /// and pushing their dependency guards. Children are processed before
    /// parents and left to right, so guards appear in evaluation order.
    fn lift_expr(
        &mut self,
        expr: &Expr,
        guards: &mut Vec<Box<Stmt>>,
    ) -> Result<Box<Expr>, RewriteError> {
        match expr {
            Expr::Call {
                func,
                args,
                keywords,
                line,
                column,
            } => {
                let is_self_call =
                    matches!(func.as_ref(), Expr::Name { id, .. } if id == self.func);

                let new_func = if is_self_call {
                    func.clone()
                } else {
                    self.lift_expr(func, guards)?
                };
                let mut new_args = Vec::with_capacity(args.len());
                for arg in args {
                    new_args.push(self.lift_expr(arg, guards)?);
                }
                let mut new_keywords = Vec::with_capacity(keywords.len());
                for (keyword, value) in keywords {
                    new_keywords.push((keyword.clone(), self.lift_expr(value, guards)?));
                }

                if is_self_call {
                    let canonical = self.canonicalize_args(new_args, new_keywords, *line)?;
                    Ok(self.emit_guard(canonical, *line, guards))
                } else {
                    Ok(Box::new(Expr::Call {
                        func: new_func,
                        args: new_args,
                        keywords: new_keywords,
                        line: *line,
                        column: *column,
                    }))
                }
            }
            Expr::BoolOp {
                op,
                values,
                line,
                column,
            } => {
                // Only the first operand is evaluated unconditionally;
                // lifting a call out of a later operand would defeat the
                // short-circuit and can break well-foundedness.
                let mut new_values = vec![self.lift_expr(&values[0], guards)?];
                for value in &values[1..] {
                    if contains_call_to(value, self.func) {
                        return Err(RewriteError::UnsupportedCallSite {
                            func: self.func.to_string(),
                            reason: format!(
                                "cannot appear in a short-circuit '{}' operand",
                                match op {
                                    BoolOperator::And => "and",
                                    BoolOperator::Or => "or",
                                }
                            ),
                            line: *line,
                        });
                    }
                    new_values.push(value.clone());
                }
                Ok(Box::new(Expr::BoolOp {
                    op: *op,
                    values: new_values,
                    line: *line,
                    column: *column,
                }))
            }
            Expr::IfExp { line, .. } => {
                if contains_call_to(expr, self.func) {
                    return Err(RewriteError::UnsupportedCallSite {
                        func: self.func.to_string(),
                        reason: "cannot appear inside a conditional expression".to_string(),
                        line: *line,
                    });
                }
                Ok(Box::new(expr.clone()))
            }
            Expr::BinOp {
                left,
                op,
                right,
                line,
                column,
            } => Ok(Box::new(Expr::BinOp {
                left: self.lift_expr(left, guards)?,
                op: *op,
                right: self.lift_expr(right, guards)?,
                line: *line,
                column: *column,
            })),
            Expr::UnaryOp {
                op,
                operand,
                line,
                column,
            } => Ok(Box::new(Expr::UnaryOp {
                op: *op,
                operand: self.lift_expr(operand, guards)?,
                line: *line,
                column: *column,
            })),
            Expr::Compare {
                left,
                ops,
                comparators,
                line,
                column,
            } => {
                let new_left = self.lift_expr(left, guards)?;
                let mut new_comparators = vec![self.lift_expr(&comparators[0], guards)?];
                // Later links of a chain are evaluated only when the
                // earlier ones held, same hazard as `and`.
                for comparator in &comparators[1..] {
                    if contains_call_to(comparator, self.func) {
                        return Err(RewriteError::UnsupportedCallSite {
                            func: self.func.to_string(),
                            reason: "cannot appear past the first link of a comparison chain"
                                .to_string(),
                            line: *line,
                        });
                    }
                    new_comparators.push(comparator.clone());
                }
                Ok(Box::new(Expr::Compare {
                    left: new_left,
                    ops: ops.clone(),
                    comparators: new_comparators,
                    line: *line,
                    column: *column,
                }))
            }
            Expr::Subscript {
                value,
                index,
                line,
                column,
            } => Ok(Box::new(Expr::Subscript {
                value: self.lift_expr(value, guards)?,
                index: self.lift_expr(index, guards)?,
                line: *line,
                column: *column,
            })),
            Expr::Attribute {
                value,
                attr,
                line,
                column,
            } => Ok(Box::new(Expr::Attribute {
                value: self.lift_expr(value, guards)?,
                attr: attr.clone(),
                line: *line,
                column: *column,
            })),
            Expr::Tuple { elts, line, column } => Ok(Box::new(Expr::Tuple {
                elts: self.lift_each(elts, guards)?,
                line: *line,
                column: *column,
            })),
            Expr::List { elts, line, column } => Ok(Box::new(Expr::List {
                elts: self.lift_each(elts, guards)?,
                line: *line,
                column: *column,
            })),
            Expr::Dict {
                keys,
                values,
                line,
                column,
            } => Ok(Box::new(Expr::Dict {
                keys: self.lift_each(keys, guards)?,
                values: self.lift_each(values, guards)?,
                line: *line,
                column: *column,
            })),
            Expr::Num { .. }
            | Expr::Str { .. }
            | Expr::NameConstant { .. }
            | Expr::Name { .. } => Ok(Box::new(expr.clone())),
        }
    }

    fn lift_each(
        &mut self,
        exprs: &[Box<Expr>],
        guards: &mut Vec<Box<Stmt>>,
    ) -> Result<Vec<Box<Expr>>, RewriteError> {
        let mut out = Vec::with_capacity(exprs.len());
        for expr in exprs {
            out.push(self.lift_expr(expr, guards)?);
        }
        Ok(out)
    }

    /// Reorders a self-call's arguments into parameter-declaration order,
    /// filling omitted parameters from their defaults.
    fn canonicalize_args(
        &self,
        args: Vec<Box<Expr>>,
        keywords: Vec<(String, Box<Expr>)>,
        line: usize,
    ) -> Result<Vec<Box<Expr>>, RewriteError> {
        if args.len() > self.params.len() {
            return Err(RewriteError::BadCallArguments {
                func: self.func.to_string(),
                reason: format!(
                    "takes {} arguments but {} were given",
                    self.params.len(),
                    args.len()
                ),
                line,
            });
        }

        let mut slots: Vec<Option<Box<Expr>>> = args.into_iter().map(Some).collect();
        slots.resize(self.params.len(), None);

        for (keyword, value) in keywords {
            match self.params.iter().position(|p| p.name == keyword) {
                Some(index) => {
                    if slots[index].is_some() {
                        return Err(RewriteError::BadCallArguments {
                            func: self.func.to_string(),
                            reason: format!("got multiple values for argument '{}'", keyword),
                            line,
                        });
                    }
                    slots[index] = Some(value);
                }
                None => {
                    return Err(RewriteError::BadCallArguments {
                        func: self.func.to_string(),
                        reason: format!("got an unexpected keyword argument '{}'", keyword),
                        line,
                    });
                }
            }
        }

        let mut canonical = Vec::with_capacity(self.params.len());
        for (slot, param) in slots.into_iter().zip(self.params.iter()) {
            match slot.or_else(|| param.default.clone()) {
                Some(expr) => canonical.push(expr),
                None => {
                    return Err(RewriteError::BadCallArguments {
                        func: self.func.to_string(),
                        reason: format!("missing required argument '{}'", param.name),
                        line,
                    });
                }
            }
        }

        Ok(canonical)
    }

    /// Emits the dependency guard for one call site and returns the
    /// placeholder that replaces the call.
    fn emit_guard(
        &mut self,
        canonical_args: Vec<Box<Expr>>,
        line: usize,
        guards: &mut Vec<Box<Stmt>>,
    ) -> Box<Expr> {
        let index = self.counter;
        self.counter += 1;
        let key_name = format!("_{}_k{}", self.func, index);
        let var_name = format!("_{}_v{}", self.func, index);
        self.generated.push(key_name.clone());
        self.generated.push(var_name.clone());

        guards.push(assign(
            name_expr(&key_name, line),
            tuple_expr(canonical_args, line),
            line,
        ));
        guards.push(Box::new(Stmt::If {
            test: Box::new(Expr::Compare {
                left: name_expr(&key_name, line),
                ops: vec![CmpOperator::NotIn],
                comparators: vec![name_expr(&self.cache_name, line)],
                line,
                column: 0,
            }),
            body: vec![tagged_return("need", name_expr(&key_name, line), line)],
            orelse: Vec::new(),
            line,
            column: 0,
        }));
        guards.push(assign(
            name_expr(&var_name, line),
            subscript(
                name_expr(&self.cache_name, line),
                name_expr(&key_name, line),
                line,
            ),
            line,
        ));

        name_expr(&var_name, line)
    }
}

// ---- self-call scanning -------------------------------------------------

fn contains_call_to(expr: &Expr, func: &str) -> bool {
    match expr {
        Expr::Call {
            func: callee,
            args,
            keywords,
            ..
        } => {
            if matches!(callee.as_ref(), Expr::Name { id, .. } if id == func) {
                return true;
            }
            contains_call_to(callee, func)
                || args.iter().any(|a| contains_call_to(a, func))
                || keywords.iter().any(|(_, v)| contains_call_to(v, func))
        }
        Expr::BoolOp { values, .. } => values.iter().any(|v| contains_call_to(v, func)),
        Expr::BinOp { left, right, .. } => {
            contains_call_to(left, func) || contains_call_to(right, func)
        }
        Expr::UnaryOp { operand, .. } => contains_call_to(operand, func),
        Expr::IfExp {
            test, body, orelse, ..
        } => {
            contains_call_to(test, func)
                || contains_call_to(body, func)
                || contains_call_to(orelse, func)
        }
        Expr::Compare {
            left, comparators, ..
        } => contains_call_to(left, func) || comparators.iter().any(|c| contains_call_to(c, func)),
        Expr::Subscript { value, index, .. } => {
            contains_call_to(value, func) || contains_call_to(index, func)
        }
        Expr::Attribute { value, .. } => contains_call_to(value, func),
        Expr::Tuple { elts, .. } | Expr::List { elts, .. } => {
            elts.iter().any(|e| contains_call_to(e, func))
        }
        Expr::Dict { keys, values, .. } => {
            keys.iter().any(|k| contains_call_to(k, func))
                || values.iter().any(|v| contains_call_to(v, func))
        }
        Expr::Num { .. } | Expr::Str { .. } | Expr::NameConstant { .. } | Expr::Name { .. } => {
            false
        }
    }
}

fn stmt_contains_call_to(stmt: &Stmt, func: &str) -> bool {
    match stmt {
        Stmt::FunctionDef { params, body, .. } => {
            params.iter().any(|p| {
                p.default
                    .as_ref()
                    .is_some_and(|d| contains_call_to(d, func))
            }) || body.iter().any(|s| stmt_contains_call_to(s, func))
        }
        Stmt::Return { value, .. } => value
            .as_ref()
            .is_some_and(|v| contains_call_to(v, func)),
        Stmt::Assign { target, value, .. } => {
            contains_call_to(target, func) || contains_call_to(value, func)
        }
        Stmt::AugAssign { target, value, .. } => {
            contains_call_to(target, func) || contains_call_to(value, func)
        }
        Stmt::If {
            test, body, orelse, ..
        } => {
            contains_call_to(test, func)
                || body.iter().any(|s| stmt_contains_call_to(s, func))
                || orelse.iter().any(|s| stmt_contains_call_to(s, func))
        }
        Stmt::While { test, body, .. } => {
            contains_call_to(test, func) || body.iter().any(|s| stmt_contains_call_to(s, func))
        }
        Stmt::For {
            target, iter, body, ..
        } => {
            contains_call_to(target, func)
                || contains_call_to(iter, func)
                || body.iter().any(|s| stmt_contains_call_to(s, func))
        }
        Stmt::Expr { value, .. } => contains_call_to(value, func),
        Stmt::Global { .. } | Stmt::Pass { .. } | Stmt::Break { .. } | Stmt::Continue { .. } => {
            false
        }
    }
}

// ---- identifier scanning ------------------------------------------------

/// Every identifier the program defines or reads. Used for the
/// reserved-name collision check; conservative on purpose.
fn collect_identifiers(module: &Module) -> HashSet<String> {
    let mut names = HashSet::new();
    for stmt in &module.body {
        collect_stmt_identifiers(stmt, &mut names);
    }
    names
}

fn collect_stmt_identifiers(stmt: &Stmt, names: &mut HashSet<String>) {
    match stmt {
        Stmt::FunctionDef {
            name,
            params,
            body,
            decorator_list,
            ..
        } => {
            names.insert(name.clone());
            for decorator in decorator_list {
                names.insert(decorator.clone());
            }
            for param in params {
                names.insert(param.name.clone());
                if let Some(default) = &param.default {
                    collect_expr_identifiers(default, names);
                }
            }
            for stmt in body {
                collect_stmt_identifiers(stmt, names);
            }
        }
        Stmt::Return { value, .. } => {
            if let Some(value) = value {
                collect_expr_identifiers(value, names);
            }
        }
        Stmt::Assign { target, value, .. } => {
            collect_expr_identifiers(target, names);
            collect_expr_identifiers(value, names);
        }
        Stmt::AugAssign { target, value, .. } => {
            collect_expr_identifiers(target, names);
            collect_expr_identifiers(value, names);
        }
        Stmt::If {
            test, body, orelse, ..
        } => {
            collect_expr_identifiers(test, names);
            for stmt in body.iter().chain(orelse.iter()) {
                collect_stmt_identifiers(stmt, names);
            }
        }
        Stmt::While { test, body, .. } => {
            collect_expr_identifiers(test, names);
            for stmt in body {
                collect_stmt_identifiers(stmt, names);
            }
        }
        Stmt::For {
            target, iter, body, ..
        } => {
            collect_expr_identifiers(target, names);
            collect_expr_identifiers(iter, names);
            for stmt in body {
                collect_stmt_identifiers(stmt, names);
            }
        }
        Stmt::Global {
            names: declared, ..
        } => {
            for name in declared {
                names.insert(name.clone());
            }
        }
        Stmt::Expr { value, .. } => collect_expr_identifiers(value, names),
        Stmt::Pass { .. } | Stmt::Break { .. } | Stmt::Continue { .. } => {}
    }
}

fn collect_expr_identifiers(expr: &Expr, names: &mut HashSet<String>) {
    match expr {
        Expr::Name { id, .. } => {
            names.insert(id.clone());
        }
        Expr::BoolOp { values, .. } => {
            for value in values {
                collect_expr_identifiers(value, names);
            }
        }
        Expr::BinOp { left, right, .. } => {
            collect_expr_identifiers(left, names);
            collect_expr_identifiers(right, names);
        }
        Expr::UnaryOp { operand, .. } => collect_expr_identifiers(operand, names),
        Expr::IfExp {
            test, body, orelse, ..
        } => {
            collect_expr_identifiers(test, names);
            collect_expr_identifiers(body, names);
            collect_expr_identifiers(orelse, names);
        }
        Expr::Compare {
            left, comparators, ..
        } => {
            collect_expr_identifiers(left, names);
            for comparator in comparators {
                collect_expr_identifiers(comparator, names);
            }
        }
        Expr::Call {
            func,
            args,
            keywords,
            ..
        } => {
            collect_expr_identifiers(func, names);
            for arg in args {
                collect_expr_identifiers(arg, names);
            }
            for (_, value) in keywords {
                collect_expr_identifiers(value, names);
            }
        }
        Expr::Subscript { value, index, .. } => {
            collect_expr_identifiers(value, names);
            collect_expr_identifiers(index, names);
        }
        Expr::Attribute { value, .. } => collect_expr_identifiers(value, names),
        Expr::Tuple { elts, .. } | Expr::List { elts, .. } => {
            for elt in elts {
                collect_expr_identifiers(elt, names);
            }
        }
        Expr::Dict { keys, values, .. } => {
            for expr in keys.iter().chain(values.iter()) {
                collect_expr_identifiers(expr, names);
            }
        }
        Expr::Num { .. } | Expr::Str { .. } | Expr::NameConstant { .. } => {}
    }
}

// ---- node constructors --------------------------------------------------

fn name_expr(id: &str, line: usize) -> Box<Expr> {
    Box::new(Expr::Name {
        id: id.to_string(),
        line,
        column: 0,
    })
}

fn int_expr(value: i64, line: usize) -> Box<Expr> {
    Box::new(Expr::Num {
        value: Number::Integer(value),
        line,
        column: 0,
    })
}

fn none_expr(line: usize) -> Box<Expr> {
    Box::new(Expr::NameConstant {
        value: NameConstant::None,
        line,
        column: 0,
    })
}

fn tuple_expr(elts: Vec<Box<Expr>>, line: usize) -> Box<Expr> {
    Box::new(Expr::Tuple {
        elts,
        line,
        column: 0,
    })
}

fn subscript(value: Box<Expr>, index: Box<Expr>, line: usize) -> Box<Expr> {
    Box::new(Expr::Subscript {
        value,
        index,
        line,
        column: 0,
    })
}

fn assign(target: Box<Expr>, value: Box<Expr>, line: usize) -> Box<Stmt> {
    Box::new(Stmt::Assign {
        target,
        value,
        line,
        column: 0,
    })
}

/// `return ("<tag>", <value>)`
fn tagged_return(tag: &str, value: Box<Expr>, line: usize) -> Box<Stmt> {
    Box::new(Stmt::Return {
        value: Some(tuple_expr(
            vec![
                Box::new(Expr::Str {
                    value: tag.to_string(),
                    line,
                    column: 0,
                }),
                value,
            ],
            line,
        )),
        line,
        column: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse_source(source: &str) -> Module {
        let mut lexer = Lexer::new(source);
        let tokens = lexer.tokenize();
        assert!(lexer.get_errors().is_empty(), "lexer errors in test input");
        parser::parse(tokens).expect("test input must parse")
    }

    fn rewrite_source(source: &str) -> Result<Module, RewriteError> {
        rewrite_module(&parse_source(source), &RewriteOptions::default())
    }

    #[test]
    fn unmarked_functions_pass_through() {
        let module = rewrite_source("def f(n):\n    return n\n").unwrap();
        assert_eq!(module.body.len(), 1);
        assert!(matches!(
            module.body[0].as_ref(),
            Stmt::FunctionDef { name, .. } if name == "f"
        ));
    }

    #[test]
    fn marked_function_expands_to_cache_step_wrapper_and_driver() {
        let module = rewrite_source(
            "@unstack\ndef fib(n):\n    if n <= 1:\n        return n\n    return fib(n - 1) + fib(n - 2)\n",
        )
        .unwrap();

        let names: Vec<String> = module
            .body
            .iter()
            .map(|stmt| match stmt.as_ref() {
                Stmt::FunctionDef { name, .. } => name.clone(),
                Stmt::Assign { target, .. } => match target.as_ref() {
                    Expr::Name { id, .. } => id.clone(),
                    _ => String::new(),
                },
                other => format!("{}", other),
            })
            .collect();
        assert_eq!(names, vec![DRIVER_NAME, "_fib_cache", "_fib_step", "fib"]);
    }

    #[test]
    fn wrapper_keeps_signature_and_drops_marker() {
        let module =
            rewrite_source("@unstack\ndef f(a, b=3):\n    return f(a - 1, b) if a > 0 else b\n");
        // the conditional-expression call site is refused...
        assert!(matches!(
            module,
            Err(RewriteError::UnsupportedCallSite { .. })
        ));

        // ...but the plain form keeps the parameter list on the wrapper.
        let module = rewrite_source(
            "@unstack\ndef f(a, b=3):\n    if a <= 0:\n        return b\n    return f(a - 1, b)\n",
        )
        .unwrap();
        let wrapper = module
            .body
            .iter()
            .find_map(|stmt| match stmt.as_ref() {
                Stmt::FunctionDef {
                    name,
                    params,
                    decorator_list,
                    ..
                } if name == "f" => Some((params.clone(), decorator_list.clone())),
                _ => None,
            })
            .expect("wrapper definition");
        assert_eq!(wrapper.0.len(), 2);
        assert!(wrapper.0[1].default.is_some());
        assert!(wrapper.1.is_empty());
    }

    #[test]
    fn guards_precede_their_anchor_in_call_order() {
        let module = rewrite_source(
            "@unstack\ndef fib(n):\n    if n <= 1:\n        return n\n    return fib(n - 1) + fib(n - 2)\n",
        )
        .unwrap();

        let step_body = module
            .body
            .iter()
            .find_map(|stmt| match stmt.as_ref() {
                Stmt::FunctionDef { name, body, .. } if name == "_fib_step" => Some(body.clone()),
                _ => None,
            })
            .expect("step definition");

        // prologue, tagged base-case branch, then two guard triplets and the
        // final tagged return
        let kinds: Vec<String> = step_body.iter().map(|s| format!("{}", s)).collect();
        assert_eq!(
            kinds,
            vec![
                "Assign", "If", "Assign", "If", "Assign", "Assign", "If", "Assign", "Return",
            ]
        );
    }

    #[test]
    fn keyword_call_sites_are_canonicalized_into_parameter_order() {
        let module = rewrite_source(
            "@unstack\ndef ack(m, n):\n    if m == 0:\n        return n + 1\n    return ack(n=1, m=m - 1)\n",
        )
        .unwrap();
        let text = crate::formatter::format_module(&module);
        assert!(text.contains("_ack_k0 = ((m - 1), 1)"));
    }

    #[test]
    fn self_call_in_while_condition_is_refused() {
        let err = rewrite_source(
            "@unstack\ndef f(n):\n    while f(n - 1):\n        n = n - 1\n    return n\n",
        )
        .unwrap_err();
        assert!(matches!(err, RewriteError::UnsupportedCallSite { .. }));
    }

    #[test]
    fn self_call_in_short_circuit_operand_is_refused() {
        let err = rewrite_source(
            "@unstack\ndef f(n):\n    return n == 0 or f(n - 1)\n",
        )
        .unwrap_err();
        assert!(matches!(err, RewriteError::UnsupportedCallSite { .. }));
    }

    #[test]
    fn reserved_name_collision_is_refused() {
        let err = rewrite_source(
            "_fib_cache = 1\n\n@unstack\ndef fib(n):\n    if n <= 1:\n        return n\n    return fib(n - 1)\n",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RewriteError::ReservedNameClash { name, .. } if name == "_fib_cache"
        ));
    }

    #[test]
    fn driver_name_collision_is_refused() {
        let err = rewrite_source(
            "def _unstack_drive(a, b, c):\n    return a\n\n@unstack\ndef f(n):\n    return 0\n",
        )
        .unwrap_err();
        assert!(matches!(err, RewriteError::ReservedNameClash { .. }));
    }

    #[test]
    fn non_recursive_marked_function_degenerates_to_memoization() {
        let module = rewrite_module(
            &parse_source("@unstack\ndef f(n):\n    return n * 2\n"),
            &RewriteOptions { emit_driver: false },
        )
        .unwrap();
        let text = crate::formatter::format_module(&module);
        assert!(text.contains("def _f_step(_f_key):"));
        // no self-calls, so the step function can never suspend
        assert!(!text.contains("\"need\""));
    }

    #[test]
    fn bad_keyword_on_self_call_is_refused() {
        let err = rewrite_source(
            "@unstack\ndef f(n):\n    if n == 0:\n        return 0\n    return f(m=n - 1)\n",
        )
        .unwrap_err();
        assert!(matches!(err, RewriteError::BadCallArguments { .. }));
    }

    #[test]
    fn driver_is_emitted_once_for_two_marked_functions() {
        let module = rewrite_source(
            "@unstack\ndef f(n):\n    if n == 0:\n        return 0\n    return f(n - 1)\n\n@unstack\ndef g(n):\n    if n == 0:\n        return 0\n    return g(n - 1)\n",
        )
        .unwrap();
        let text = crate::formatter::format_module(&module);
        assert_eq!(text.matches("def _unstack_drive(").count(), 1);
    }

    #[test]
    fn run_mode_omits_the_driver_definition() {
        let module = rewrite_module(
            &parse_source("@unstack\ndef f(n):\n    return 0\n"),
            &RewriteOptions { emit_driver: false },
        )
        .unwrap();
        let text = crate::formatter::format_module(&module);
        assert!(!text.contains("def _unstack_drive("));
        assert!(text.contains(DRIVER_NAME));
    }
}
