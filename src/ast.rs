//! Core expression-tree and runtime value types.
//!
//! [`Expr`] is what the parser produces: an [`Atom`] or an ordered list of
//! sub-expressions, never mutated after parsing. [`Value`] is what evaluation
//! produces: numbers, quoted symbols, lists, booleans from predicates, and
//! procedures. Lists are shared immutable sequences (`Rc<[Value]>`), so
//! cloning a value never deep-copies and `eq?` can compare list identity.
//!
//! Conversion traits cover the common Rust types, making it easy to build
//! values and expressions from literals, arrays and vectors in code and tests.

use std::fmt;
use std::rc::Rc;

use crate::Error;
use crate::builtinops::OpKind;
use crate::evaluator::{Arity, Environment};

/// An indivisible literal: integer, floating-point number, or symbol
#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    Integer(i64),
    Float(f64),
    Symbol(String),
}

impl Atom {
    /// Resolve a token: integer first, then float, else a symbol
    pub fn from_token(token: &str) -> Self {
        if let Ok(n) = token.parse::<i64>() {
            Atom::Integer(n)
        } else if let Ok(x) = token.parse::<f64>() {
            Atom::Float(x)
        } else {
            Atom::Symbol(token.to_owned())
        }
    }
}

/// AST node produced by the parser
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Atom(Atom),
    List(Vec<Expr>),
}

impl Expr {
    pub fn symbol<S: AsRef<str>>(name: S) -> Self {
        Expr::Atom(Atom::Symbol(name.as_ref().to_owned()))
    }

    /// The symbol name, if this expression is a symbol atom
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Expr::Atom(Atom::Symbol(name)) => Some(name),
            _ => None,
        }
    }
}

impl From<i64> for Expr {
    fn from(n: i64) -> Self {
        Expr::Atom(Atom::Integer(n))
    }
}

impl From<i32> for Expr {
    fn from(n: i32) -> Self {
        Expr::Atom(Atom::Integer(i64::from(n)))
    }
}

impl From<f64> for Expr {
    fn from(x: f64) -> Self {
        Expr::Atom(Atom::Float(x))
    }
}

impl From<Vec<Expr>> for Expr {
    fn from(items: Vec<Expr>) -> Self {
        Expr::List(items)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Atom(Atom::Integer(n)) => write!(f, "{n}"),
            Expr::Atom(Atom::Float(x)) => write_float(f, *x),
            Expr::Atom(Atom::Symbol(s)) => write!(f, "{s}"),
            Expr::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Numeric view of a value used by the arithmetic builtins
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Integer(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Integer(n) => n as f64,
            Number::Float(x) => x,
        }
    }
}

/// A user-defined closure: parameters, one body expression and the
/// environment that was active when the `lambda` was evaluated
pub struct Procedure {
    pub params: Vec<String>,
    pub body: Expr,
    pub env: Rc<Environment>,
}

// The captured environment is omitted: it can contain this very closure.
impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Procedure")
            .field("params", &self.params)
            .field("body", &format_args!("{}", self.body))
            .finish_non_exhaustive()
    }
}

/// Runtime value produced by evaluation
#[derive(Clone)]
pub enum Value {
    Integer(i64),
    Float(f64),
    /// Symbols appear as values only when quoted
    Symbol(String),
    /// Produced by comparisons and predicates; there is no literal syntax
    Bool(bool),
    /// Immutable shared list; the empty list is nil
    List(Rc<[Value]>),
    /// Built-in procedure. Compared by id, not by function pointer
    BuiltinFunction {
        id: Rc<str>,
        arity: Arity,
        op: OpKind,
    },
    /// User-defined closure
    Procedure(Rc<Procedure>),
    /// Result of `define`, `set!` and `print`; never equal to anything
    Unspecified,
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "Integer({n})"),
            Value::Float(x) => write!(f, "Float({x:?})"),
            Value::Symbol(s) => write!(f, "Symbol({s})"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::List(items) => {
                write!(f, "List(")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v:?}")?;
                }
                write!(f, ")")
            }
            Value::BuiltinFunction { id, .. } => write!(f, "BuiltinFunction({id})"),
            Value::Procedure(proc) => write!(f, "{proc:?}"),
            Value::Unspecified => write!(f, "Unspecified"),
        }
    }
}

impl Value {
    /// Build a list value from owned elements
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::from(items))
    }

    /// Check if a value represents nil (empty list)
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::List(items) if items.is_empty())
    }

    /// Everything except boolean false and the empty list counts as true
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Bool(false)) && !self.is_nil()
    }

    pub fn is_procedure(&self) -> bool {
        matches!(self, Value::BuiltinFunction { .. } | Value::Procedure(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Symbol(_) => "symbol",
            Value::Bool(_) => "boolean",
            Value::List(_) => "list",
            Value::BuiltinFunction { .. } | Value::Procedure(_) => "procedure",
            Value::Unspecified => "unspecified",
        }
    }

    /// Identity comparison backing `eq?`.
    ///
    /// Numbers must share a subtype and value, symbols and booleans compare by
    /// value, any two empty lists are identical, and non-empty lists and
    /// procedures compare by allocation.
    pub fn is_identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                (a.is_empty() && b.is_empty()) || std::ptr::eq(a.as_ptr(), b.as_ptr())
            }
            (Value::BuiltinFunction { id: a, .. }, Value::BuiltinFunction { id: b, .. }) => a == b,
            (Value::Procedure(a), Value::Procedure(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Quoting turns an expression into data without evaluating it
impl From<&Expr> for Value {
    fn from(expr: &Expr) -> Self {
        match expr {
            Expr::Atom(Atom::Integer(n)) => Value::Integer(*n),
            Expr::Atom(Atom::Float(x)) => Value::Float(*x),
            Expr::Atom(Atom::Symbol(s)) => Value::Symbol(s.clone()),
            Expr::List(items) => Value::list(items.iter().map(Value::from).collect()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        match n {
            Number::Integer(n) => Value::Integer(n),
            Number::Float(x) => Value::Float(x),
        }
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Value {
            fn from(n: $int_type) -> Self {
                Value::Integer(i64::from(n))
            }
        }
    };
}

impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(i32);
impl_from_integer!(i64);
impl_from_integer!(u8);
impl_from_integer!(u16);
impl_from_integer!(u32);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::list(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        Value::list(arr.into_iter().map(Into::into).collect())
    }
}

// Fallible conversions from `Value` back into primitive Rust types.

impl TryFrom<Value> for Number {
    type Error = Error;

    fn try_from(value: Value) -> Result<Number, Error> {
        match value {
            Value::Integer(n) => Ok(Number::Integer(n)),
            Value::Float(x) => Ok(Number::Float(x)),
            other => Err(Error::TypeError(format!(
                "expected number, got {}: {other}",
                other.type_name()
            ))),
        }
    }
}

impl TryFrom<Value> for i64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<i64, Error> {
        match value {
            Value::Integer(n) => Ok(n),
            other => Err(Error::TypeError(format!(
                "expected integer, got {}: {other}",
                other.type_name()
            ))),
        }
    }
}

/// Integers widen to floats; anything else is a type error
impl TryFrom<Value> for f64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<f64, Error> {
        Number::try_from(value).map(Number::as_f64)
    }
}

/// Helper function for creating symbol values
#[cfg(test)]
pub(crate) fn sym<S: AsRef<str>>(name: S) -> Value {
    Value::Symbol(name.as_ref().to_owned())
}

/// Helper function for creating Values from anything convertible
#[cfg(test)]
pub(crate) fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

/// Helper function for creating empty lists (nil)
#[cfg(test)]
pub(crate) fn nil() -> Value {
    Value::list(vec![])
}

fn write_float(f: &mut fmt::Formatter<'_>, x: f64) -> fmt::Result {
    if x.is_nan() {
        write!(f, "nan")
    } else if x.is_infinite() {
        write!(f, "{}", if x > 0.0 { "inf" } else { "-inf" })
    } else {
        // Debug keeps the trailing ".0" so floats stay distinguishable from integers
        write!(f, "{x:?}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(x) => write_float(f, *x),
            Value::Symbol(s) => write!(f, "{s}"),
            Value::Bool(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
            Value::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            Value::BuiltinFunction { id, .. } => write!(f, "#<builtin-function:{id}>"),
            Value::Procedure(_) => write!(f, "#<procedure>"),
            Value::Unspecified => write!(f, "#<unspecified>"),
        }
    }
}

/// Structural equality backing `equal?` and `=`.
///
/// Integers and floats compare by numeric value across subtypes.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Integer(a), Value::Float(b)) | (Value::Float(b), Value::Integer(a)) => {
                *a as f64 == *b
            }
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::BuiltinFunction { id: id1, .. }, Value::BuiltinFunction { id: id2, .. }) => {
                id1 == id2
            }
            (Value::Procedure(a), Value::Procedure(b)) => Rc::ptr_eq(a, b),
            (Value::Unspecified, _) | (_, Value::Unspecified) => false,
            _ => false,
        }
    }
}
