//! Tree-walking evaluator for the surface language.
//!
//! Executes transformed programs: closures capture their defining scope,
//! assignment is innermost-frame unless declared `global`, and the reserved
//! driver name is pre-bound to the native trampoline so `run`-mode programs
//! need no spliced driver definition.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;

use thiserror::Error;

use crate::ast::{
    BoolOperator, CmpOperator, Expr, Module, NameConstant, Number, Operator, Stmt, UnaryOperator,
};
use crate::driver::{self, DepCache, Outcome};
use crate::key::{self, ArgKey, KeyError, KeyValue};
use crate::value::{
    BoundParameter, Builtin, DictRef, FunctionValue, Scope, ScopeRef, Value,
};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("name '{0}' is not defined")]
    UndefinedName(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow in '{0}'")]
    IntegerOverflow(&'static str),

    #[error("index {index} out of range for {kind} of length {len}")]
    IndexOutOfRange {
        kind: &'static str,
        index: i64,
        len: usize,
    },

    #[error("key {0} is not present")]
    MissingKey(String),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("step function returned a malformed outcome: {0}")]
    MalformedOutcome(String),

    #[error("'{0}' outside loop")]
    ControlFlowOutsideLoop(&'static str),

    #[error("output error: {0}")]
    Output(String),
}

/// Statement-level control flow.
enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

pub struct Interpreter {
    globals: ScopeRef,
    out: Box<dyn Write>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Interpreter::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Interpreter::with_output(Box::new(std::io::stdout()))
    }

    pub fn with_output(out: Box<dyn Write>) -> Self {
        let globals = Scope::root();
        for builtin in [
            Builtin::Print,
            Builtin::Len,
            Builtin::Range,
            Builtin::Abs,
            Builtin::Min,
            Builtin::Max,
            Builtin::Drive,
        ] {
            globals.assign(builtin.name(), Value::Builtin(builtin));
        }
        Interpreter { globals, out }
    }

    pub fn interpret(&mut self, module: &Module) -> Result<(), RuntimeError> {
        let globals = Rc::clone(&self.globals);
        match self.exec_suite(&module.body, &globals)? {
            Flow::Normal => Ok(()),
            Flow::Break => Err(RuntimeError::ControlFlowOutsideLoop("break")),
            Flow::Continue => Err(RuntimeError::ControlFlowOutsideLoop("continue")),
            Flow::Return(_) => Err(RuntimeError::Type(
                "'return' outside function".to_string(),
            )),
        }
    }

    // ---- statements ------------------------------------------------------

    fn exec_suite(&mut self, stmts: &[Box<Stmt>], scope: &ScopeRef) -> Result<Flow, RuntimeError> {
        for stmt in stmts {
            match self.exec_stmt(stmt, scope)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, scope: &ScopeRef) -> Result<Flow, RuntimeError> {
        match stmt {
            Stmt::FunctionDef {
                name,
                params,
                body,
                decorator_list,
                ..
            } => {
                // Defaults are evaluated once, at definition time.
                let mut bound_params = Vec::with_capacity(params.len());
                for param in params {
                    let default = match &param.default {
                        Some(expr) => Some(self.eval_expr(expr, scope)?),
                        None => None,
                    };
                    bound_params.push(BoundParameter {
                        name: param.name.clone(),
                        default,
                    });
                }

                let mut value = Value::Function(Rc::new(FunctionValue {
                    name: name.clone(),
                    params: bound_params,
                    body: body.clone(),
                    env: Rc::clone(scope),
                }));

                for decorator in decorator_list.iter().rev() {
                    let decorator_value = scope
                        .get(decorator)
                        .ok_or_else(|| RuntimeError::UndefinedName(decorator.clone()))?;
                    value = self.call_function(decorator_value, vec![value], Vec::new())?;
                }

                scope.assign(name, value);
                Ok(Flow::Normal)
            }
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.eval_expr(expr, scope)?,
                    None => Value::None,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Assign { target, value, .. } => {
                let value = self.eval_expr(value, scope)?;
                self.assign_target(target, value, scope)?;
                Ok(Flow::Normal)
            }
            Stmt::AugAssign {
                target, op, value, ..
            } => {
                let current = self.eval_expr(target, scope)?;
                let operand = self.eval_expr(value, scope)?;
                let updated = binary_op(&current, *op, &operand)?;
                self.assign_target(target, updated, scope)?;
                Ok(Flow::Normal)
            }
            Stmt::If {
                test, body, orelse, ..
            } => {
                if self.eval_expr(test, scope)?.is_truthy() {
                    self.exec_suite(body, scope)
                } else {
                    self.exec_suite(orelse, scope)
                }
            }
            Stmt::While { test, body, .. } => {
                while self.eval_expr(test, scope)?.is_truthy() {
                    match self.exec_suite(body, scope)? {
                        Flow::Normal | Flow::Continue => {}
                        Flow::Break => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For {
                target, iter, body, ..
            } => {
                let iterable = self.eval_expr(iter, scope)?;
                let items = self.iterable_items(&iterable)?;
                for item in items {
                    self.assign_target(target, item, scope)?;
                    match self.exec_suite(body, scope)? {
                        Flow::Normal | Flow::Continue => {}
                        Flow::Break => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Global { names, .. } => {
                for name in names {
                    scope.declare_global(name);
                }
                Ok(Flow::Normal)
            }
            Stmt::Expr { value, .. } => {
                self.eval_expr(value, scope)?;
                Ok(Flow::Normal)
            }
            Stmt::Pass { .. } => Ok(Flow::Normal),
            Stmt::Break { .. } => Ok(Flow::Break),
            Stmt::Continue { .. } => Ok(Flow::Continue),
        }
    }

    fn iterable_items(&self, value: &Value) -> Result<Vec<Value>, RuntimeError> {
        match value {
            Value::List(items) => Ok(items.borrow().clone()),
            Value::Tuple(items) => Ok(items.as_ref().clone()),
            other => Err(RuntimeError::Type(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }

    fn assign_target(
        &mut self,
        target: &Expr,
        value: Value,
        scope: &ScopeRef,
    ) -> Result<(), RuntimeError> {
        match target {
            Expr::Name { id, .. } => {
                scope.assign(id, value);
                Ok(())
            }
            Expr::Subscript {
                value: container,
                index,
                ..
            } => {
                let container = self.eval_expr(container, scope)?;
                let index = self.eval_expr(index, scope)?;
                match container {
                    Value::List(items) => {
                        let mut items = items.borrow_mut();
                        let position = normalize_index(&index, items.len(), "list")?;
                        items[position] = value;
                        Ok(())
                    }
                    Value::Dict(entries) => {
                        let key = KeyValue::from_value(&index)?;
                        entries.borrow_mut().insert(key, value);
                        Ok(())
                    }
                    other => Err(RuntimeError::Type(format!(
                        "'{}' object does not support item assignment",
                        other.type_name()
                    ))),
                }
            }
            other => Err(RuntimeError::Type(format!(
                "cannot assign to {}",
                other
            ))),
        }
    }

    // ---- expressions -----------------------------------------------------

    fn eval_expr(&mut self, expr: &Expr, scope: &ScopeRef) -> Result<Value, RuntimeError> {
        match expr {
            Expr::Num { value, .. } => Ok(match value {
                Number::Integer(i) => Value::Int(*i),
                Number::Float(f) => Value::Float(*f),
            }),
            Expr::Str { value, .. } => Ok(Value::str(value)),
            Expr::NameConstant { value, .. } => Ok(match value {
                NameConstant::None => Value::None,
                NameConstant::True => Value::Bool(true),
                NameConstant::False => Value::Bool(false),
            }),
            Expr::Name { id, .. } => scope
                .get(id)
                .ok_or_else(|| RuntimeError::UndefinedName(id.clone())),
            Expr::BoolOp { op, values, .. } => {
                // Short-circuit, yielding the last evaluated operand.
                let mut result = self.eval_expr(&values[0], scope)?;
                for value in &values[1..] {
                    let keep_going = match op {
                        BoolOperator::And => result.is_truthy(),
                        BoolOperator::Or => !result.is_truthy(),
                    };
                    if !keep_going {
                        break;
                    }
                    result = self.eval_expr(value, scope)?;
                }
                Ok(result)
            }
            Expr::UnaryOp { op, operand, .. } => {
                let operand = self.eval_expr(operand, scope)?;
                match op {
                    UnaryOperator::Not => Ok(Value::Bool(!operand.is_truthy())),
                    UnaryOperator::UAdd => match operand {
                        Value::Int(_) | Value::Float(_) => Ok(operand),
                        other => Err(RuntimeError::Type(format!(
                            "bad operand type for unary +: '{}'",
                            other.type_name()
                        ))),
                    },
                    UnaryOperator::USub => match operand {
                        Value::Int(i) => i
                            .checked_neg()
                            .map(Value::Int)
                            .ok_or(RuntimeError::IntegerOverflow("-")),
                        Value::Float(f) => Ok(Value::Float(-f)),
                        other => Err(RuntimeError::Type(format!(
                            "bad operand type for unary -: '{}'",
                            other.type_name()
                        ))),
                    },
                }
            }
            Expr::BinOp {
                left, op, right, ..
            } => {
                let left = self.eval_expr(left, scope)?;
                let right = self.eval_expr(right, scope)?;
                binary_op(&left, *op, &right)
            }
            Expr::Compare {
                left,
                ops,
                comparators,
                ..
            } => {
                let mut current = self.eval_expr(left, scope)?;
                for (op, comparator) in ops.iter().zip(comparators.iter()) {
                    let next = self.eval_expr(comparator, scope)?;
                    if !compare_op(&current, *op, &next)? {
                        return Ok(Value::Bool(false));
                    }
                    current = next;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfExp {
                test, body, orelse, ..
            } => {
                if self.eval_expr(test, scope)?.is_truthy() {
                    self.eval_expr(body, scope)
                } else {
                    self.eval_expr(orelse, scope)
                }
            }
            Expr::Call {
                func,
                args,
                keywords,
                ..
            } => {
                // Attribute calls are method dispatch on the receiver.
                if let Expr::Attribute { value, attr, .. } = func.as_ref() {
                    let receiver = self.eval_expr(value, scope)?;
                    let mut arg_values = Vec::with_capacity(args.len());
                    for arg in args {
                        arg_values.push(self.eval_expr(arg, scope)?);
                    }
                    if !keywords.is_empty() {
                        return Err(RuntimeError::Type(format!(
                            "{}() takes no keyword arguments",
                            attr
                        )));
                    }
                    return self.call_method(receiver, attr, arg_values);
                }

                let callee = self.eval_expr(func, scope)?;
                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args {
                    arg_values.push(self.eval_expr(arg, scope)?);
                }
                let mut keyword_values = Vec::with_capacity(keywords.len());
                for (name, value) in keywords {
                    keyword_values.push((name.clone(), self.eval_expr(value, scope)?));
                }
                self.call_function(callee, arg_values, keyword_values)
            }
            Expr::Attribute { value, attr, .. } => {
                let receiver = self.eval_expr(value, scope)?;
                Err(RuntimeError::Type(format!(
                    "'{}' object has no attribute '{}'",
                    receiver.type_name(),
                    attr
                )))
            }
            Expr::Subscript { value, index, .. } => {
                let container = self.eval_expr(value, scope)?;
                let index = self.eval_expr(index, scope)?;
                subscript_get(&container, &index)
            }
            Expr::Tuple { elts, .. } => {
                let mut items = Vec::with_capacity(elts.len());
                for elt in elts {
                    items.push(self.eval_expr(elt, scope)?);
                }
                Ok(Value::tuple(items))
            }
            Expr::List { elts, .. } => {
                let mut items = Vec::with_capacity(elts.len());
                for elt in elts {
                    items.push(self.eval_expr(elt, scope)?);
                }
                Ok(Value::List(Rc::new(RefCell::new(items))))
            }
            Expr::Dict { keys, values, .. } => {
                let mut entries = HashMap::with_capacity(keys.len());
                for (key, value) in keys.iter().zip(values.iter()) {
                    let key = KeyValue::from_value(&self.eval_expr(key, scope)?)?;
                    entries.insert(key, self.eval_expr(value, scope)?);
                }
                Ok(Value::Dict(Rc::new(RefCell::new(entries))))
            }
        }
    }

    // ---- calls -----------------------------------------------------------

    pub fn call_function(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        keywords: Vec<(String, Value)>,
    ) -> Result<Value, RuntimeError> {
        match callee {
            Value::Function(func) => {
                let bound = key::bind_arguments(&func.name, &func.params, args, keywords)?;
                let frame = Scope::child(&func.env);
                for (param, value) in func.params.iter().zip(bound) {
                    frame.assign(&param.name, value);
                }
                match self.exec_suite(&func.body, &frame)? {
                    Flow::Return(value) => Ok(value),
                    Flow::Normal => Ok(Value::None),
                    Flow::Break => Err(RuntimeError::ControlFlowOutsideLoop("break")),
                    Flow::Continue => Err(RuntimeError::ControlFlowOutsideLoop("continue")),
                }
            }
            Value::Builtin(builtin) => {
                if !keywords.is_empty() {
                    return Err(RuntimeError::Type(format!(
                        "{}() takes no keyword arguments",
                        builtin.name()
                    )));
                }
                self.call_builtin(builtin, args)
            }
            other => Err(RuntimeError::Type(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_method(
        &mut self,
        receiver: Value,
        attr: &str,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        match (&receiver, attr) {
            (Value::List(items), "append") => {
                expect_arity("append", &args, 1)?;
                items.borrow_mut().push(args.into_iter().next().expect("checked arity"));
                Ok(Value::None)
            }
            (Value::List(items), "pop") => {
                expect_arity("pop", &args, 0)?;
                items
                    .borrow_mut()
                    .pop()
                    .ok_or_else(|| RuntimeError::Type("pop from empty list".to_string()))
            }
            _ => Err(RuntimeError::Type(format!(
                "'{}' object has no method '{}'",
                receiver.type_name(),
                attr
            ))),
        }
    }

    fn call_builtin(&mut self, builtin: Builtin, args: Vec<Value>) -> Result<Value, RuntimeError> {
        match builtin {
            Builtin::Print => {
                let mut text = String::new();
                for (i, value) in args.iter().enumerate() {
                    if i > 0 {
                        text.push(' ');
                    }
                    text.push_str(&value.to_string());
                }
                text.push('\n');
                self.out
                    .write_all(text.as_bytes())
                    .map_err(|e| RuntimeError::Output(e.to_string()))?;
                Ok(Value::None)
            }
            Builtin::Len => {
                expect_arity("len", &args, 1)?;
                let length = match &args[0] {
                    Value::Str(s) => s.chars().count(),
                    Value::Tuple(items) => items.len(),
                    Value::List(items) => items.borrow().len(),
                    Value::Dict(entries) => entries.borrow().len(),
                    other => {
                        return Err(RuntimeError::Type(format!(
                            "object of type '{}' has no len()",
                            other.type_name()
                        )))
                    }
                };
                Ok(Value::Int(length as i64))
            }
            Builtin::Range => {
                let (start, stop, step) = match args.len() {
                    1 => (0, int_arg("range", &args[0])?, 1),
                    2 => (int_arg("range", &args[0])?, int_arg("range", &args[1])?, 1),
                    3 => (
                        int_arg("range", &args[0])?,
                        int_arg("range", &args[1])?,
                        int_arg("range", &args[2])?,
                    ),
                    n => {
                        return Err(RuntimeError::Type(format!(
                            "range() takes 1 to 3 arguments, got {}",
                            n
                        )))
                    }
                };
                if step == 0 {
                    return Err(RuntimeError::Type(
                        "range() step must not be zero".to_string(),
                    ));
                }
                let mut items = Vec::new();
                let mut i = start;
                while if step > 0 { i < stop } else { i > stop } {
                    items.push(Value::Int(i));
                    i += step;
                }
                Ok(Value::List(Rc::new(RefCell::new(items))))
            }
            Builtin::Abs => {
                expect_arity("abs", &args, 1)?;
                match &args[0] {
                    Value::Int(i) => i
                        .checked_abs()
                        .map(Value::Int)
                        .ok_or(RuntimeError::IntegerOverflow("abs")),
                    Value::Float(f) => Ok(Value::Float(f.abs())),
                    other => Err(RuntimeError::Type(format!(
                        "bad operand type for abs(): '{}'",
                        other.type_name()
                    ))),
                }
            }
            Builtin::Min => self.fold_extremum("min", args, Ordering::Less),
            Builtin::Max => self.fold_extremum("max", args, Ordering::Greater),
            Builtin::Drive => self.builtin_drive(args),
        }
    }

    fn fold_extremum(
        &self,
        name: &'static str,
        args: Vec<Value>,
        keep: Ordering,
    ) -> Result<Value, RuntimeError> {
        let items = match args.len() {
            0 => {
                return Err(RuntimeError::Type(format!(
                    "{}() expected at least 1 argument",
                    name
                )))
            }
            1 => self.iterable_items(&args[0])?,
            _ => args,
        };
        let mut items = items.into_iter();
        let mut best = items.next().ok_or_else(|| {
            RuntimeError::Type(format!("{}() argument is an empty sequence", name))
        })?;
        for item in items {
            if order_values(&item, &best)? == keep {
                best = item;
            }
        }
        Ok(best)
    }

    // ---- the native driver binding ---------------------------------------

    /// `_unstack_drive(step, key, cache)` backed by the generic trampoline.
    fn builtin_drive(&mut self, args: Vec<Value>) -> Result<Value, RuntimeError> {
        expect_arity(crate::rewrite::DRIVER_NAME, &args, 3)?;
        let mut args = args.into_iter();
        let step = args.next().expect("checked arity");
        let key = ArgKey::from_value(&args.next().expect("checked arity"))?;
        let cache = match args.next().expect("checked arity") {
            Value::Dict(entries) => entries,
            other => {
                return Err(RuntimeError::Type(format!(
                    "{}() cache must be a dict, not '{}'",
                    crate::rewrite::DRIVER_NAME,
                    other.type_name()
                )))
            }
        };

        let mut dict_cache = DictCache(cache);
        driver::drive(
            |k: &ArgKey| {
                let outcome = self.call_function(step.clone(), vec![k.to_value()], Vec::new())?;
                outcome_from_value(outcome)
            },
            key,
            &mut dict_cache,
        )
    }
}

/// Adapter exposing an interpreter dict as a write-once driver cache. Each
/// lookup/store borrows the `RefCell` only briefly, so the interpreted step
/// function is free to read the same dict mid-drive.
struct DictCache(DictRef);

impl DepCache<ArgKey, Value> for DictCache {
    fn lookup(&self, key: &ArgKey) -> Option<Value> {
        self.0.borrow().get(&key.as_key_value()).cloned()
    }

    fn store(&mut self, key: ArgKey, value: Value) -> bool {
        let key = key.as_key_value();
        let mut entries = self.0.borrow_mut();
        if entries.contains_key(&key) {
            return false;
        }
        entries.insert(key, value);
        true
    }
}

/// Decodes a step function's surface outcome: `("done", value)` or
/// `("need", key)`.
fn outcome_from_value(value: Value) -> Result<Outcome<ArgKey, Value>, RuntimeError> {
    let items = match &value {
        Value::Tuple(items) if items.len() == 2 => items,
        other => {
            return Err(RuntimeError::MalformedOutcome(format!(
                "expected a 2-tuple, got {}",
                other.repr()
            )))
        }
    };
    let tag = match &items[0] {
        Value::Str(s) => s.as_str(),
        other => {
            return Err(RuntimeError::MalformedOutcome(format!(
                "tag must be a string, got {}",
                other.repr()
            )))
        }
    };
    match tag {
        "done" => Ok(Outcome::Done(items[1].clone())),
        "need" => Ok(Outcome::Need(ArgKey::from_value(&items[1])?)),
        other => Err(RuntimeError::MalformedOutcome(format!(
            "unknown tag '{}'",
            other
        ))),
    }
}

// ---- operators -----------------------------------------------------------

fn binary_op(left: &Value, op: Operator, right: &Value) -> Result<Value, RuntimeError> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => int_binary_op(*a, op, *b),
        (Value::Float(a), Value::Float(b)) => float_binary_op(*a, op, *b),
        (Value::Int(a), Value::Float(b)) => float_binary_op(*a as f64, op, *b),
        (Value::Float(a), Value::Int(b)) => float_binary_op(*a, op, *b as f64),
        (Value::Str(a), Value::Str(b)) if op == Operator::Add => {
            Ok(Value::Str(Rc::new(format!("{}{}", a, b))))
        }
        (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s))
            if op == Operator::Mult =>
        {
            let count = (*n).max(0) as usize;
            Ok(Value::Str(Rc::new(s.repeat(count))))
        }
        (Value::List(a), Value::List(b)) if op == Operator::Add => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::List(Rc::new(RefCell::new(items))))
        }
        (Value::Tuple(a), Value::Tuple(b)) if op == Operator::Add => {
            let mut items = a.as_ref().clone();
            items.extend(b.iter().cloned());
            Ok(Value::tuple(items))
        }
        (left, right) => Err(RuntimeError::Type(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op_symbol(op),
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn int_binary_op(a: i64, op: Operator, b: i64) -> Result<Value, RuntimeError> {
    match op {
        Operator::Add => a
            .checked_add(b)
            .map(Value::Int)
            .ok_or(RuntimeError::IntegerOverflow("+")),
        Operator::Sub => a
            .checked_sub(b)
            .map(Value::Int)
            .ok_or(RuntimeError::IntegerOverflow("-")),
        Operator::Mult => a
            .checked_mul(b)
            .map(Value::Int)
            .ok_or(RuntimeError::IntegerOverflow("*")),
        Operator::Div => {
            if b == 0 {
                Err(RuntimeError::DivisionByZero)
            } else {
                Ok(Value::Float(a as f64 / b as f64))
            }
        }
        Operator::FloorDiv => {
            if b == 0 {
                return Err(RuntimeError::DivisionByZero);
            }
            // Floored quotient, matching the surface language's semantics
            // for negative operands.
            let quotient = a.checked_div(b).ok_or(RuntimeError::IntegerOverflow("//"))?;
            let remainder = a % b;
            if remainder != 0 && (remainder < 0) != (b < 0) {
                Ok(Value::Int(quotient - 1))
            } else {
                Ok(Value::Int(quotient))
            }
        }
        Operator::Mod => {
            if b == 0 {
                return Err(RuntimeError::DivisionByZero);
            }
            let remainder = a.checked_rem(b).ok_or(RuntimeError::IntegerOverflow("%"))?;
            if remainder != 0 && (remainder < 0) != (b < 0) {
                Ok(Value::Int(remainder + b))
            } else {
                Ok(Value::Int(remainder))
            }
        }
        Operator::Pow => {
            if b < 0 {
                Ok(Value::Float((a as f64).powf(b as f64)))
            } else {
                let exponent =
                    u32::try_from(b).map_err(|_| RuntimeError::IntegerOverflow("**"))?;
                a.checked_pow(exponent)
                    .map(Value::Int)
                    .ok_or(RuntimeError::IntegerOverflow("**"))
            }
        }
    }
}

fn float_binary_op(a: f64, op: Operator, b: f64) -> Result<Value, RuntimeError> {
    match op {
        Operator::Add => Ok(Value::Float(a + b)),
        Operator::Sub => Ok(Value::Float(a - b)),
        Operator::Mult => Ok(Value::Float(a * b)),
        Operator::Div => {
            if b == 0.0 {
                Err(RuntimeError::DivisionByZero)
            } else {
                Ok(Value::Float(a / b))
            }
        }
        Operator::FloorDiv => {
            if b == 0.0 {
                Err(RuntimeError::DivisionByZero)
            } else {
                Ok(Value::Float((a / b).floor()))
            }
        }
        Operator::Mod => {
            if b == 0.0 {
                Err(RuntimeError::DivisionByZero)
            } else {
                Ok(Value::Float(a - b * (a / b).floor()))
            }
        }
        Operator::Pow => Ok(Value::Float(a.powf(b))),
    }
}

fn op_symbol(op: Operator) -> &'static str {
    match op {
        Operator::Add => "+",
        Operator::Sub => "-",
        Operator::Mult => "*",
        Operator::Div => "/",
        Operator::FloorDiv => "//",
        Operator::Mod => "%",
        Operator::Pow => "**",
    }
}

fn compare_op(left: &Value, op: CmpOperator, right: &Value) -> Result<bool, RuntimeError> {
    match op {
        CmpOperator::Eq => Ok(left.equals(right)),
        CmpOperator::NotEq => Ok(!left.equals(right)),
        CmpOperator::Lt => Ok(order_values(left, right)? == Ordering::Less),
        CmpOperator::LtE => Ok(order_values(left, right)? != Ordering::Greater),
        CmpOperator::Gt => Ok(order_values(left, right)? == Ordering::Greater),
        CmpOperator::GtE => Ok(order_values(left, right)? != Ordering::Less),
        CmpOperator::In => contains(right, left),
        CmpOperator::NotIn => contains(right, left).map(|found| !found),
    }
}

fn order_values(left: &Value, right: &Value) -> Result<Ordering, RuntimeError> {
    let ordering = match (left, right) {
        (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => None,
    };
    ordering.ok_or_else(|| {
        RuntimeError::Type(format!(
            "'{}' and '{}' are not orderable",
            left.type_name(),
            right.type_name()
        ))
    })
}

fn contains(container: &Value, item: &Value) -> Result<bool, RuntimeError> {
    match container {
        Value::List(items) => Ok(items.borrow().iter().any(|v| v.equals(item))),
        Value::Tuple(items) => Ok(items.iter().any(|v| v.equals(item))),
        Value::Dict(entries) => {
            let key = KeyValue::from_value(item)?;
            Ok(entries.borrow().contains_key(&key))
        }
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(needle.as_str())),
            other => Err(RuntimeError::Type(format!(
                "'in <str>' requires a string operand, not '{}'",
                other.type_name()
            ))),
        },
        other => Err(RuntimeError::Type(format!(
            "argument of type '{}' is not a container",
            other.type_name()
        ))),
    }
}

fn subscript_get(container: &Value, index: &Value) -> Result<Value, RuntimeError> {
    match container {
        Value::List(items) => {
            let items = items.borrow();
            let position = normalize_index(index, items.len(), "list")?;
            Ok(items[position].clone())
        }
        Value::Tuple(items) => {
            let position = normalize_index(index, items.len(), "tuple")?;
            Ok(items[position].clone())
        }
        Value::Dict(entries) => {
            let key = KeyValue::from_value(index)?;
            entries
                .borrow()
                .get(&key)
                .cloned()
                .ok_or_else(|| RuntimeError::MissingKey(key.to_string()))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let position = normalize_index(index, chars.len(), "str")?;
            Ok(Value::str(&chars[position].to_string()))
        }
        other => Err(RuntimeError::Type(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn normalize_index(index: &Value, len: usize, kind: &'static str) -> Result<usize, RuntimeError> {
    let raw = match index {
        Value::Int(i) => *i,
        other => {
            return Err(RuntimeError::Type(format!(
                "{} indices must be integers, not '{}'",
                kind,
                other.type_name()
            )))
        }
    };
    let adjusted = if raw < 0 { raw + len as i64 } else { raw };
    if adjusted < 0 || adjusted as usize >= len {
        return Err(RuntimeError::IndexOutOfRange {
            kind,
            index: raw,
            len,
        });
    }
    Ok(adjusted as usize)
}

fn int_arg(func: &'static str, value: &Value) -> Result<i64, RuntimeError> {
    match value {
        Value::Int(i) => Ok(*i),
        other => Err(RuntimeError::Type(format!(
            "{}() argument must be an integer, not '{}'",
            func,
            other.type_name()
        ))),
    }
}

fn expect_arity(name: &str, args: &[Value], expected: usize) -> Result<(), RuntimeError> {
    if args.len() != expected {
        return Err(RuntimeError::Type(format!(
            "{}() takes {} arguments but {} were given",
            name,
            expected,
            args.len()
        )));
    }
    Ok(())
}
