//! Floating-point math library.
//!
//! Float functions accept integers (widened) and floats. A NaN result from
//! non-NaN input is a domain error and an infinite result from finite input
//! is a range error; both surface as `ArithmeticError` rather than leaking
//! NaN or infinity into a computation.

use super::{BuiltinOp, fixed, variadic};
use crate::Error;
use crate::ast::Number;
use crate::evaluator::{Arity, NumIter, NumRest};
use std::f64::consts;

/// Named constants bound as floats in the standard environment.
///
/// `inf` and `nan` are absent: the parser reads those tokens as float
/// literals, so a binding could never be looked up.
pub const MATH_CONSTANTS: &[(&str, f64)] = &[
    ("pi", consts::PI),
    ("e", consts::E),
    ("tau", consts::TAU),
];

/// 2^63, the first float past the i64 range
const I64_LIMIT: f64 = 9_223_372_036_854_775_808.0;

fn checked(name: &str, inputs: &[f64], result: f64) -> Result<f64, Error> {
    if result.is_nan() && !inputs.iter().any(|x| x.is_nan()) {
        Err(Error::ArithmeticError(format!("math domain error in {name}")))
    } else if result.is_infinite() && inputs.iter().all(|x| x.is_finite()) {
        Err(Error::ArithmeticError(format!("math range error in {name}")))
    } else {
        Ok(result)
    }
}

/// Convert an already-rounded float to an integer, rejecting NaN and
/// values outside the i64 range
pub(super) fn float_to_integer(name: &str, x: f64) -> Result<i64, Error> {
    if x.is_nan() {
        Err(Error::ArithmeticError(format!(
            "{name}: cannot convert NaN to integer"
        )))
    } else if (-I64_LIMIT..I64_LIMIT).contains(&x) {
        Ok(x as i64)
    } else {
        Err(Error::ArithmeticError(format!(
            "{name}: {x} is out of integer range"
        )))
    }
}

macro_rules! float_function {
    ($name:ident, $scheme:literal, $method:ident) => {
        fn $name(x: f64) -> Result<f64, Error> {
            checked($scheme, &[x], x.$method())
        }
    };
}

float_function!(math_sqrt, "sqrt", sqrt);
float_function!(math_exp, "exp", exp);
float_function!(math_log10, "log10", log10);
float_function!(math_log2, "log2", log2);
float_function!(math_log1p, "log1p", ln_1p);
float_function!(math_expm1, "expm1", exp_m1);
float_function!(math_sin, "sin", sin);
float_function!(math_cos, "cos", cos);
float_function!(math_tan, "tan", tan);
float_function!(math_asin, "asin", asin);
float_function!(math_acos, "acos", acos);
float_function!(math_atan, "atan", atan);
float_function!(math_sinh, "sinh", sinh);
float_function!(math_cosh, "cosh", cosh);
float_function!(math_tanh, "tanh", tanh);
float_function!(math_asinh, "asinh", asinh);
float_function!(math_acosh, "acosh", acosh);
float_function!(math_atanh, "atanh", atanh);
float_function!(math_degrees, "degrees", to_degrees);
float_function!(math_radians, "radians", to_radians);
float_function!(math_fabs, "fabs", abs);

/// `(log x)` is the natural logarithm, `(log x base)` any other base
fn math_log(x: f64, mut base: NumIter<'_>) -> Result<f64, Error> {
    match base.next() {
        None => checked("log", &[x], x.ln()),
        Some(base) => {
            let base = base.as_f64();
            checked("log", &[x, base], x.ln() / base.ln())
        }
    }
}

macro_rules! integer_rounding {
    ($name:ident, $scheme:literal, $method:ident) => {
        fn $name(x: Number) -> Result<i64, Error> {
            match x {
                Number::Integer(n) => Ok(n),
                Number::Float(f) => float_to_integer($scheme, f.$method()),
            }
        }
    };
}

integer_rounding!(math_floor, "floor", floor);
integer_rounding!(math_ceil, "ceil", ceil);
integer_rounding!(math_trunc, "trunc", trunc);

fn math_atan2(y: f64, x: f64) -> Result<f64, Error> {
    checked("atan2", &[y, x], y.atan2(x))
}

fn math_hypot(x: f64, y: f64) -> Result<f64, Error> {
    checked("hypot", &[x, y], x.hypot(y))
}

/// Float power, shared by `pow` and `expt`
pub(super) fn math_pow(x: f64, y: f64) -> Result<f64, Error> {
    checked("pow", &[x, y], x.powf(y))
}

fn math_fmod(x: f64, y: f64) -> Result<f64, Error> {
    checked("fmod", &[x, y], x % y)
}

fn math_copysign(x: f64, y: f64) -> f64 {
    x.copysign(y)
}

fn math_factorial(n: i64) -> Result<i64, Error> {
    if n < 0 {
        return Err(Error::ArithmeticError(
            "factorial() not defined for negative values".into(),
        ));
    }
    (2..=n)
        .try_fold(1_i64, i64::checked_mul)
        .ok_or_else(|| Error::ArithmeticError("integer overflow in factorial".into()))
}

fn math_gcd(a: i64, b: i64) -> Result<i64, Error> {
    let (mut x, mut y) = (a.unsigned_abs(), b.unsigned_abs());
    while y != 0 {
        (x, y) = (y, x % y);
    }
    i64::try_from(x).map_err(|_| Error::ArithmeticError("integer overflow in gcd".into()))
}

fn math_isnan(x: f64) -> bool {
    x.is_nan()
}

fn math_isinf(x: f64) -> bool {
    x.is_infinite()
}

fn math_isfinite(x: f64) -> bool {
    x.is_finite()
}

pub(super) fn math_ops() -> Vec<BuiltinOp> {
    vec![
        fixed::<(f64,), _>("sqrt", math_sqrt),
        fixed::<(f64,), _>("exp", math_exp),
        variadic::<(f64, NumRest), _>("log", Arity::Range(1, 2), math_log),
        fixed::<(f64,), _>("log10", math_log10),
        fixed::<(f64,), _>("log2", math_log2),
        fixed::<(f64,), _>("log1p", math_log1p),
        fixed::<(f64,), _>("expm1", math_expm1),
        fixed::<(f64,), _>("sin", math_sin),
        fixed::<(f64,), _>("cos", math_cos),
        fixed::<(f64,), _>("tan", math_tan),
        fixed::<(f64,), _>("asin", math_asin),
        fixed::<(f64,), _>("acos", math_acos),
        fixed::<(f64,), _>("atan", math_atan),
        fixed::<(f64,), _>("sinh", math_sinh),
        fixed::<(f64,), _>("cosh", math_cosh),
        fixed::<(f64,), _>("tanh", math_tanh),
        fixed::<(f64,), _>("asinh", math_asinh),
        fixed::<(f64,), _>("acosh", math_acosh),
        fixed::<(f64,), _>("atanh", math_atanh),
        fixed::<(f64,), _>("degrees", math_degrees),
        fixed::<(f64,), _>("radians", math_radians),
        fixed::<(f64,), _>("fabs", math_fabs),
        fixed::<(Number,), _>("floor", math_floor),
        fixed::<(Number,), _>("ceil", math_ceil),
        fixed::<(Number,), _>("trunc", math_trunc),
        fixed::<(f64, f64), _>("atan2", math_atan2),
        fixed::<(f64, f64), _>("hypot", math_hypot),
        fixed::<(f64, f64), _>("pow", math_pow),
        fixed::<(f64, f64), _>("fmod", math_fmod),
        fixed::<(f64, f64), _>("copysign", math_copysign),
        fixed::<(i64,), _>("factorial", math_factorial),
        fixed::<(i64, i64), _>("gcd", math_gcd),
        fixed::<(f64,), _>("isnan", math_isnan),
        fixed::<(f64,), _>("isinf", math_isinf),
        fixed::<(f64,), _>("isfinite", math_isfinite),
    ]
}
