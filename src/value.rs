use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use crate::ast::Stmt;
use crate::key::KeyValue;

/// Shared handle to a mutable dict payload.
pub type DictRef = Rc<RefCell<HashMap<KeyValue, Value>>>;

/// Shared handle to a mutable list payload.
pub type ListRef = Rc<RefCell<Vec<Value>>>;

/// Runtime value of the evaluator.
#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<String>),
    Tuple(Rc<Vec<Value>>),
    List(ListRef),
    Dict(DictRef),
    Function(Rc<FunctionValue>),
    Builtin(Builtin),
}

/// A user-defined function together with the environment it closed over.
pub struct FunctionValue {
    pub name: String,
    pub params: Vec<BoundParameter>,
    pub body: Vec<Box<Stmt>>,
    pub env: ScopeRef,
}

/// A parameter with its default already evaluated (defaults are evaluated
/// once, at definition time).
#[derive(Clone)]
pub struct BoundParameter {
    pub name: String,
    pub default: Option<Value>,
}

/// Natively implemented functions available in every program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Print,
    Len,
    Range,
    Abs,
    Min,
    Max,
    Drive,
}

impl Builtin {
    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::Len => "len",
            Builtin::Range => "range",
            Builtin::Abs => "abs",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Drive => crate::rewrite::DRIVER_NAME,
        }
    }
}

/// Lexical scope: a frame of variables plus a link to the defining scope.
///
/// Reads walk the chain outward; writes always land in the innermost frame
/// unless the name was declared `global` there, in which case they land in
/// the root frame.
pub struct Scope {
    vars: RefCell<HashMap<String, Value>>,
    global_names: RefCell<HashSet<String>>,
    parent: Option<ScopeRef>,
}

pub type ScopeRef = Rc<Scope>;

impl Scope {
    pub fn root() -> ScopeRef {
        Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            global_names: RefCell::new(HashSet::new()),
            parent: None,
        })
    }

    pub fn child(parent: &ScopeRef) -> ScopeRef {
        Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            global_names: RefCell::new(HashSet::new()),
            parent: Some(Rc::clone(parent)),
        })
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.vars.borrow().get(name) {
            return Some(value.clone());
        }
        match &self.parent {
            Some(parent) => parent.get(name),
            None => None,
        }
    }

    pub fn assign(&self, name: &str, value: Value) {
        if self.global_names.borrow().contains(name) {
            self.root_scope_assign(name, value);
        } else {
            self.vars.borrow_mut().insert(name.to_string(), value);
        }
    }

    pub fn declare_global(&self, name: &str) {
        self.global_names.borrow_mut().insert(name.to_string());
    }

    fn root_scope_assign(&self, name: &str, value: Value) {
        match &self.parent {
            Some(parent) => parent.root_scope_assign(name, value),
            None => {
                self.vars.borrow_mut().insert(name.to_string(), value);
            }
        }
    }
}

impl Value {
    pub fn str(text: &str) -> Value {
        Value::Str(Rc::new(text.to_string()))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(items))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Tuple(_) => "tuple",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Dict(entries) => !entries.borrow().is_empty(),
            Value::Function(_) | Value::Builtin(_) => true,
        }
    }

    /// Structural equality with int/float cross-comparison, matching the
    /// surface language's `==`.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
            }
            (Value::List(a), Value::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
            }
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            _ => false,
        }
    }

    /// Source-style rendering, used for elements inside containers.
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(fl) => {
                if fl.fract() == 0.0 && fl.is_finite() {
                    write!(f, "{:.1}", fl)
                } else {
                    write!(f, "{}", fl)
                }
            }
            Value::Str(s) => write!(f, "{}", s),
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item.repr())?;
                }
                if items.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item.repr())?;
                }
                write!(f, "]")
            }
            Value::Dict(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value.repr())?;
                }
                write!(f, "}}")
            }
            Value::Function(func) => write!(f, "<function {}>", func.name),
            Value::Builtin(builtin) => write!(f, "<builtin {}>", builtin.name()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repr())
    }
}
