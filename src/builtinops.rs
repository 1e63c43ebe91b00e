//! Built-in procedure registry.
//!
//! Every procedure in the standard environment is described once here as a
//! [`BuiltinOp`]: its name, its declared [`Arity`] and its implementation.
//! [`crate::evaluator::standard_env`] binds each entry into a fresh global
//! frame, where it behaves like any other value: it can be passed around,
//! stored, or shadowed by a user definition.
//!
//! ```text
//! (+ 1 2)                  ; arithmetic, exactly two operands
//! (car (quote (1 2 3)))    ; list access
//! (map (lambda (x) (* x x)) (list 1 2 3))
//! (sqrt 2)                 ; math suite, see `builtinops::math`
//! ```
//!
//! ## Functions vs Special Forms
//!
//! Everything here receives evaluated arguments. Forms that control the
//! evaluation of their operands (`quote`, `if`, `define`, `set!`, `lambda`)
//! belong to the evaluator and are not in this registry.
//!
//! ## Numbers
//!
//! Integers stay integers under `+`, `-`, `*` and `abs`; overflow is reported
//! as `ArithmeticError` instead of wrapping. Mixing in a float produces a
//! float. `/` always produces a float.
//!
//! ## Adding New Operations
//!
//! 1. **Implement the function** with typed parameters (`Number`, `i64`,
//!    `f64`, `Value`, or the list views `ValueIter` / `NumIter`)
//! 2. **Add it to BUILTIN_OPS** via `fixed`, `variadic` or `higher_order`
//! 3. **Add table-driven tests** covering edge cases and error conditions

use crate::Error;
use crate::ast::{Number, Value};
use crate::evaluator::intooperation::{IntoOperation, IntoVariadicOperation, OperationFn};
use crate::evaluator::{Arity, NumIter, NumRest, ValueIter, ValuesRest, apply_with_depth};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

pub mod math;

pub use math::MATH_CONSTANTS;

/// Signature of builtins that call back into procedure application.
/// The second argument is the current evaluation depth.
pub type HigherOrderFn = fn(Vec<Value>, usize) -> Result<Value, Error>;

/// Represents the implementation of a built-in procedure
#[derive(Clone)]
pub enum OpKind {
    /// Regular function that takes evaluated arguments and returns a value
    /// via the canonical erased builtin signature used by the evaluator.
    Function(Arc<OperationFn>),
    /// Function that applies procedure arguments (`apply`, `map`)
    HigherOrder(HigherOrderFn),
}

impl std::fmt::Debug for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::Function(_) => write!(f, "Function(<fn>)"),
            OpKind::HigherOrder(_) => write!(f, "HigherOrder(<fn>)"),
        }
    }
}

/// Definition of a built-in operation
#[derive(Debug, Clone)]
pub struct BuiltinOp {
    /// The identifier this operation is bound to
    pub scheme_id: &'static str,
    /// The implementation of this operation
    pub op_kind: OpKind,
    /// Expected number of arguments
    pub arity: Arity,
}

impl PartialEq for BuiltinOp {
    fn eq(&self, other: &Self) -> bool {
        // Operations are uniquely identified by name
        self.scheme_id == other.scheme_id
    }
}

/// Entry whose arity is derived from the Rust signature
fn fixed<Args, F>(scheme_id: &'static str, f: F) -> BuiltinOp
where
    F: IntoOperation<Args>,
{
    BuiltinOp {
        scheme_id,
        op_kind: OpKind::Function(f.into_operation()),
        arity: F::ARITY,
    }
}

/// Entry with a rest parameter and explicitly declared arity
fn variadic<Args, F>(scheme_id: &'static str, arity: Arity, f: F) -> BuiltinOp
where
    F: IntoVariadicOperation<Args>,
{
    BuiltinOp {
        scheme_id,
        op_kind: OpKind::Function(f.into_variadic_operation()),
        arity,
    }
}

fn higher_order(scheme_id: &'static str, arity: Arity, f: HigherOrderFn) -> BuiltinOp {
    BuiltinOp {
        scheme_id,
        op_kind: OpKind::HigherOrder(f),
        arity,
    }
}

//
// Builtin Function Implementations
//

/// Numeric ordering: integers compare exactly, anything involving a float
/// compares as floats (NaN is unordered)
fn compare(a: Number, b: Number) -> Option<Ordering> {
    match (a, b) {
        (Number::Integer(x), Number::Integer(y)) => Some(x.cmp(&y)),
        _ => a.as_f64().partial_cmp(&b.as_f64()),
    }
}

// Macro to generate integer-preserving arithmetic
macro_rules! numeric_binop {
    ($name:ident, $checked:ident, $op:tt, $what:literal) => {
        fn $name(a: Number, b: Number) -> Result<Number, Error> {
            match (a, b) {
                (Number::Integer(x), Number::Integer(y)) => {
                    x.$checked(y).map(Number::Integer).ok_or_else(|| {
                        Error::ArithmeticError(concat!("integer overflow in ", $what).to_owned())
                    })
                }
                _ => Ok(Number::Float(a.as_f64() $op b.as_f64())),
            }
        }
    };
}

numeric_binop!(builtin_add, checked_add, +, "addition");
numeric_binop!(builtin_sub, checked_sub, -, "subtraction");
numeric_binop!(builtin_mul, checked_mul, *, "multiplication");

fn builtin_div(a: Number, b: Number) -> Result<f64, Error> {
    let divisor = b.as_f64();
    if divisor == 0.0 {
        return Err(Error::ArithmeticError("division by zero".into()));
    }
    Ok(a.as_f64() / divisor)
}

// Macro to generate numeric comparison functions
macro_rules! numeric_comparison {
    ($name:ident, $ordering:pat) => {
        fn $name(a: Number, b: Number) -> bool {
            matches!(compare(a, b), Some($ordering))
        }
    };
}

numeric_comparison!(builtin_gt, Ordering::Greater);
numeric_comparison!(builtin_lt, Ordering::Less);
numeric_comparison!(builtin_ge, Ordering::Greater | Ordering::Equal);
numeric_comparison!(builtin_le, Ordering::Less | Ordering::Equal);

fn builtin_abs(n: Number) -> Result<Number, Error> {
    match n {
        Number::Integer(x) => x
            .checked_abs()
            .map(Number::Integer)
            .ok_or_else(|| Error::ArithmeticError("integer overflow in abs".into())),
        Number::Float(x) => Ok(Number::Float(x.abs())),
    }
}

fn as_number(value: &Value) -> Result<Number, Error> {
    match value {
        Value::Integer(n) => Ok(Number::Integer(*n)),
        Value::Float(x) => Ok(Number::Float(*x)),
        other => Err(Error::TypeError(format!(
            "expected number, got {}: {other}",
            other.type_name()
        ))),
    }
}

/// Shared body of `min` and `max`: two or more arguments, or the elements
/// of a single list argument. Returns the original element.
fn extremum(args: ValueIter<'_>, name: &str, wanted: Ordering) -> Result<Value, Error> {
    let candidates = match args.as_slice() {
        [Value::List(items)] => &items[..],
        [single] => {
            return Err(Error::TypeError(format!(
                "{name} expects a list or at least two arguments, got {}: {single}",
                single.type_name()
            )));
        }
        all => all,
    };

    let mut best: Option<(&Value, Number)> = None;
    for candidate in candidates {
        let n = as_number(candidate)?;
        match best {
            Some((_, current)) if compare(n, current) != Some(wanted) => {}
            _ => best = Some((candidate, n)),
        }
    }

    best.map(|(value, _)| value.clone())
        .ok_or_else(|| Error::IndexError(format!("{name}() arg is an empty sequence")))
}

fn builtin_min(args: ValueIter<'_>) -> Result<Value, Error> {
    extremum(args, "min", Ordering::Less)
}

fn builtin_max(args: ValueIter<'_>) -> Result<Value, Error> {
    extremum(args, "max", Ordering::Greater)
}

/// `(round x)` rounds half to even and yields an integer;
/// `(round x n)` keeps the subtype and rounds to n decimal digits
fn builtin_round(x: Number, mut digits: NumIter<'_>) -> Result<Number, Error> {
    match (x, digits.next()) {
        (Number::Integer(n), None) => Ok(Number::Integer(n)),
        (Number::Float(f), None) => {
            math::float_to_integer("round", f.round_ties_even()).map(Number::Integer)
        }
        (Number::Integer(n), Some(Number::Integer(nd))) => round_integer(n, nd).map(Number::Integer),
        (Number::Float(f), Some(Number::Integer(nd))) => Ok(Number::Float(round_float(f, nd))),
        (_, Some(Number::Float(_))) => Err(Error::TypeError(
            "round() digit count must be an integer".into(),
        )),
    }
}

fn round_integer(n: i64, digits: i64) -> Result<i64, Error> {
    if digits >= 0 {
        return Ok(n);
    }
    let Some(scale) = u32::try_from(digits.unsigned_abs())
        .ok()
        .and_then(|power| 10_i64.checked_pow(power))
    else {
        // 10^-digits exceeds every i64
        return Ok(0);
    };

    let (quotient, remainder) = (n.div_euclid(scale), n.rem_euclid(scale));
    let twice = remainder * 2;
    let rounded = if twice > scale || (twice == scale && quotient % 2 != 0) {
        quotient + 1
    } else {
        quotient
    };
    rounded
        .checked_mul(scale)
        .ok_or_else(|| Error::ArithmeticError("integer overflow in round".into()))
}

fn round_float(x: f64, digits: i64) -> f64 {
    if !x.is_finite() {
        return x;
    }
    let exponent = digits.clamp(-308, 308) as i32;
    if exponent >= 0 {
        let scale = 10_f64.powi(exponent);
        let rounded = (x * scale).round_ties_even() / scale;
        if rounded.is_finite() { rounded } else { x }
    } else {
        let scale = 10_f64.powi(-exponent);
        (x / scale).round_ties_even() * scale
    }
}

fn builtin_car(mut list: ValueIter<'_>) -> Result<Value, Error> {
    match list.next() {
        Some(first) => Ok(first.clone()),
        None => Err(Error::IndexError("car of empty list".into())),
    }
}

fn builtin_cdr(mut list: ValueIter<'_>) -> Result<Value, Error> {
    let Some(_) = list.next() else {
        return Err(Error::IndexError("cdr of empty list".into()));
    };

    Ok(Value::list(list.cloned().collect()))
}

fn builtin_cons(first: Value, rest: Value) -> Result<Value, Error> {
    match rest {
        Value::List(tail) => {
            let mut new_list = Vec::with_capacity(tail.len() + 1);
            new_list.push(first);
            new_list.extend_from_slice(&tail);
            Ok(Value::list(new_list))
        }
        other => Err(Error::TypeError(format!(
            "cons requires a list as second argument, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_list(args: ValueIter<'_>) -> Value {
    Value::list(args.cloned().collect())
}

fn builtin_length(list: ValueIter<'_>) -> i64 {
    list.len() as i64
}

fn builtin_is_number(value: Value) -> bool {
    matches!(value, Value::Integer(_) | Value::Float(_))
}

fn builtin_is_symbol(value: Value) -> bool {
    matches!(value, Value::Symbol(_))
}

fn builtin_is_list(value: Value) -> bool {
    matches!(value, Value::List(_))
}

fn builtin_is_procedure(value: Value) -> bool {
    value.is_procedure()
}

fn builtin_null(value: Value) -> bool {
    value.is_nil()
}

fn builtin_not(value: Value) -> bool {
    !value.is_truthy()
}

/// Structural equality, shared by `=` and `equal?`
fn builtin_equal(first: Value, second: Value) -> bool {
    first == second
}

fn builtin_eq(first: Value, second: Value) -> bool {
    first.is_identical(&second)
}

fn builtin_print(args: ValueIter<'_>) -> Value {
    let parts: Vec<String> = args.map(ToString::to_string).collect();
    println!("{}", parts.join(" "));
    Value::Unspecified
}

fn builtin_begin(args: ValueIter<'_>) -> Result<Value, Error> {
    let count = args.len();
    args.last()
        .cloned()
        .ok_or_else(|| Error::arity_error(Arity::AtLeast(1), count))
}

fn builtin_apply(args: Vec<Value>, depth: usize) -> Result<Value, Error> {
    match args.as_slice() {
        [procedure, Value::List(items)] => apply_with_depth(procedure, items.to_vec(), depth),
        [_, other] => Err(Error::TypeError(format!(
            "apply requires a list of arguments, got {}",
            other.type_name()
        ))),
        _ => Err(Error::arity_error(Arity::Exact(2), args.len())),
    }
}

/// `(map proc list...)`: calls `proc` with the i-th element of every list,
/// stopping at the end of the shortest one
fn builtin_map(args: Vec<Value>, depth: usize) -> Result<Value, Error> {
    let [procedure, lists @ ..] = args.as_slice() else {
        return Err(Error::arity_error(Arity::AtLeast(2), 0));
    };
    if !procedure.is_procedure() {
        return Err(Error::TypeError(format!(
            "map requires a procedure, got {}",
            procedure.type_name()
        )));
    }

    let lists = lists
        .iter()
        .map(|value| match value {
            Value::List(items) => Ok(&items[..]),
            other => Err(Error::TypeError(format!(
                "map requires list arguments, got {}",
                other.type_name()
            ))),
        })
        .collect::<Result<Vec<&[Value]>, Error>>()?;

    let shortest = lists.iter().map(|list| list.len()).min().unwrap_or(0);
    let results = (0..shortest)
        .map(|i| {
            let call_args = lists.iter().map(|list| list[i].clone()).collect();
            apply_with_depth(procedure, call_args, depth)
        })
        .collect::<Result<Vec<Value>, Error>>()?;

    Ok(Value::list(results))
}

/// Global registry of all built-in operations.
///
/// The registry is a single contiguous collection of `BuiltinOp` values for
/// ease of auditing; each typed implementation is wired through the same
/// adapter layer used for custom builtin registration, once, at
/// initialization time via a `LazyLock`.
static BUILTIN_OPS: LazyLock<Vec<BuiltinOp>> = LazyLock::new(|| {
    let mut ops = vec![
        // Arithmetic operations
        fixed::<(Number, Number), _>("+", builtin_add),
        fixed::<(Number, Number), _>("-", builtin_sub),
        fixed::<(Number, Number), _>("*", builtin_mul),
        fixed::<(Number, Number), _>("/", builtin_div),
        fixed::<(Number,), _>("abs", builtin_abs),
        fixed::<(f64, f64), _>("expt", math::math_pow),
        variadic::<(ValuesRest,), _>("min", Arity::AtLeast(1), builtin_min),
        variadic::<(ValuesRest,), _>("max", Arity::AtLeast(1), builtin_max),
        variadic::<(Number, NumRest), _>("round", Arity::Range(1, 2), builtin_round),
        // Comparison operations
        fixed::<(Number, Number), _>(">", builtin_gt),
        fixed::<(Number, Number), _>("<", builtin_lt),
        fixed::<(Number, Number), _>(">=", builtin_ge),
        fixed::<(Number, Number), _>("<=", builtin_le),
        fixed::<(Value, Value), _>("=", builtin_equal),
        // Equality and logic
        fixed::<(Value, Value), _>("equal?", builtin_equal),
        fixed::<(Value, Value), _>("eq?", builtin_eq),
        fixed::<(Value,), _>("not", builtin_not),
        // List operations
        fixed::<(ValuesRest,), _>("car", builtin_car),
        fixed::<(ValuesRest,), _>("cdr", builtin_cdr),
        fixed::<(Value, Value), _>("cons", builtin_cons),
        variadic::<(ValuesRest,), _>("list", Arity::Any, builtin_list),
        fixed::<(ValuesRest,), _>("length", builtin_length),
        // Type predicates
        fixed::<(Value,), _>("number?", builtin_is_number),
        fixed::<(Value,), _>("symbol?", builtin_is_symbol),
        fixed::<(Value,), _>("list?", builtin_is_list),
        fixed::<(Value,), _>("procedure?", builtin_is_procedure),
        fixed::<(Value,), _>("null?", builtin_null),
        // Procedure application
        higher_order("apply", Arity::Exact(2), builtin_apply),
        higher_order("map", Arity::AtLeast(2), builtin_map),
        // Sequencing and output
        variadic::<(ValuesRest,), _>("begin", Arity::AtLeast(1), builtin_begin),
        variadic::<(ValuesRest,), _>("print", Arity::Any, builtin_print),
    ];
    ops.extend(math::math_ops());
    ops
});

/// Lazy static map from identifier to BuiltinOp (private - use find_scheme_op)
static BUILTIN_SCHEME: LazyLock<HashMap<&'static str, &'static BuiltinOp>> = LazyLock::new(|| {
    let ops: &'static [BuiltinOp] = BUILTIN_OPS.as_slice();
    ops.iter().map(|op| (op.scheme_id, op)).collect()
});

/// Get all builtin operations (for internal use by evaluator)
pub(crate) fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS.as_slice()
}

/// Find a builtin operation by the identifier it is bound to
pub fn find_scheme_op(id: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_SCHEME.get(id).copied()
}
