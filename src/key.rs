//! Argument-key canonicalization.
//!
//! A memoized function's cache is indexed by the full tuple of its parameter
//! values in declaration order. Keyword arguments are folded into their
//! parameter positions by [`bind_arguments`], so `f(1, 2)` and `f(1, b=2)`
//! produce the same key. Only hashable values may appear in a key; anything
//! else is rejected up front with a [`KeyError`].

use std::fmt;

use thiserror::Error;

use crate::value::{BoundParameter, Value};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum KeyError {
    #[error("unhashable value of type '{0}' cannot be used in an argument key")]
    Unhashable(&'static str),

    #[error("{func}() takes {expected} arguments but {given} were given")]
    ArityMismatch {
        func: String,
        expected: usize,
        given: usize,
    },

    #[error("{func}() got an unexpected keyword argument '{keyword}'")]
    UnknownKeyword { func: String, keyword: String },

    #[error("{func}() got multiple values for argument '{name}'")]
    DuplicateBinding { func: String, name: String },

    #[error("{func}() missing required argument '{name}'")]
    MissingArgument { func: String, name: String },
}

/// The hashable subset of runtime values.
///
/// Floats are keyed by their bit pattern with `-0.0` folded onto `0.0`, so
/// numerically equal floats share a key while NaN still keys consistently
/// with itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyValue {
    None,
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(String),
    Tuple(Vec<KeyValue>),
}

impl KeyValue {
    pub fn from_value(value: &Value) -> Result<KeyValue, KeyError> {
        match value {
            Value::None => Ok(KeyValue::None),
            Value::Bool(b) => Ok(KeyValue::Bool(*b)),
            Value::Int(i) => Ok(KeyValue::Int(*i)),
            Value::Float(f) => {
                let normalized = if *f == 0.0 { 0.0 } else { *f };
                Ok(KeyValue::Float(normalized.to_bits()))
            }
            Value::Str(s) => Ok(KeyValue::Str(s.as_ref().clone())),
            Value::Tuple(items) => {
                let mut keys = Vec::with_capacity(items.len());
                for item in items.iter() {
                    keys.push(KeyValue::from_value(item)?);
                }
                Ok(KeyValue::Tuple(keys))
            }
            other => Err(KeyError::Unhashable(other.type_name())),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            KeyValue::None => Value::None,
            KeyValue::Bool(b) => Value::Bool(*b),
            KeyValue::Int(i) => Value::Int(*i),
            KeyValue::Float(bits) => Value::Float(f64::from_bits(*bits)),
            KeyValue::Str(s) => Value::str(s),
            KeyValue::Tuple(items) => Value::tuple(items.iter().map(|k| k.to_value()).collect()),
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value().repr())
    }
}

/// Canonical cache index for one call: the bound argument values in
/// parameter-declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArgKey(pub Vec<KeyValue>);

impl ArgKey {
    pub fn from_values(values: &[Value]) -> Result<ArgKey, KeyError> {
        let mut keys = Vec::with_capacity(values.len());
        for value in values {
            keys.push(KeyValue::from_value(value)?);
        }
        Ok(ArgKey(keys))
    }

    /// Reads a key back out of its surface representation (a tuple value),
    /// as produced by a step function's `("need", key)` outcome.
    pub fn from_value(value: &Value) -> Result<ArgKey, KeyError> {
        match KeyValue::from_value(value)? {
            KeyValue::Tuple(items) => Ok(ArgKey(items)),
            single => Ok(ArgKey(vec![single])),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::tuple(self.0.iter().map(|k| k.to_value()).collect())
    }

    pub fn as_key_value(&self) -> KeyValue {
        KeyValue::Tuple(self.0.clone())
    }
}

impl fmt::Display for ArgKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value().repr())
    }
}

/// Binds a call's positional and keyword arguments against a parameter
/// list, filling omitted parameters from their (already evaluated)
/// defaults. The result is one value per parameter, in declaration order.
pub fn bind_arguments(
    func: &str,
    params: &[BoundParameter],
    args: Vec<Value>,
    keywords: Vec<(String, Value)>,
) -> Result<Vec<Value>, KeyError> {
    if args.len() > params.len() {
        return Err(KeyError::ArityMismatch {
            func: func.to_string(),
            expected: params.len(),
            given: args.len(),
        });
    }

    let mut slots: Vec<Option<Value>> = args.into_iter().map(Some).collect();
    slots.resize(params.len(), None);

    for (keyword, value) in keywords {
        match params.iter().position(|p| p.name == keyword) {
            Some(index) => {
                if slots[index].is_some() {
                    return Err(KeyError::DuplicateBinding {
                        func: func.to_string(),
                        name: keyword,
                    });
                }
                slots[index] = Some(value);
            }
            None => {
                return Err(KeyError::UnknownKeyword {
                    func: func.to_string(),
                    keyword,
                });
            }
        }
    }

    let mut bound = Vec::with_capacity(params.len());
    for (slot, param) in slots.into_iter().zip(params.iter()) {
        match slot.or_else(|| param.default.clone()) {
            Some(value) => bound.push(value),
            None => {
                return Err(KeyError::MissingArgument {
                    func: func.to_string(),
                    name: param.name.clone(),
                });
            }
        }
    }

    Ok(bound)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(name: &str) -> BoundParameter {
        BoundParameter {
            name: name.to_string(),
            default: None,
        }
    }

    fn param_with_default(name: &str, default: Value) -> BoundParameter {
        BoundParameter {
            name: name.to_string(),
            default: Some(default),
        }
    }

    #[test]
    fn positional_and_keyword_calls_share_a_key() {
        let params = [param("a"), param("b")];
        let positional = bind_arguments(
            "f",
            &params,
            vec![Value::Int(1), Value::Int(2)],
            Vec::new(),
        )
        .unwrap();
        let keyword = bind_arguments(
            "f",
            &params,
            vec![Value::Int(1)],
            vec![("b".to_string(), Value::Int(2))],
        )
        .unwrap();

        assert_eq!(
            ArgKey::from_values(&positional).unwrap(),
            ArgKey::from_values(&keyword).unwrap()
        );
    }

    #[test]
    fn defaults_fill_omitted_parameters() {
        let params = [param("a"), param_with_default("b", Value::Int(10))];
        let bound = bind_arguments("f", &params, vec![Value::Int(1)], Vec::new()).unwrap();
        assert!(bound[1].equals(&Value::Int(10)));
    }

    #[test]
    fn unknown_keyword_is_rejected() {
        let params = [param("a")];
        let err = bind_arguments(
            "f",
            &params,
            Vec::new(),
            vec![("c".to_string(), Value::Int(1))],
        )
        .unwrap_err();
        assert_eq!(
            err,
            KeyError::UnknownKeyword {
                func: "f".to_string(),
                keyword: "c".to_string()
            }
        );
    }

    #[test]
    fn duplicate_binding_is_rejected() {
        let params = [param("a")];
        let err = bind_arguments(
            "f",
            &params,
            vec![Value::Int(1)],
            vec![("a".to_string(), Value::Int(2))],
        )
        .unwrap_err();
        assert!(matches!(err, KeyError::DuplicateBinding { .. }));
    }

    #[test]
    fn unhashable_arguments_fail_fast() {
        let list = Value::List(std::rc::Rc::new(std::cell::RefCell::new(vec![])));
        let err = ArgKey::from_values(&[list]).unwrap_err();
        assert_eq!(err, KeyError::Unhashable("list"));
    }

    #[test]
    fn negative_zero_folds_onto_zero() {
        let a = KeyValue::from_value(&Value::Float(0.0)).unwrap();
        let b = KeyValue::from_value(&Value::Float(-0.0)).unwrap();
        assert_eq!(a, b);
    }
}
