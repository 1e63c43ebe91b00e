use crate::Error;
use crate::ast::{Number, Value};
use crate::evaluator::Arity;
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::sync::Arc;

// NOTE: This module is internal plumbing for the evaluator.
// It defines the adapter layer that turns strongly-typed Rust
// functions into the erased `OperationFn` used at runtime.
//
// Callers should go through the registration methods on
// `Environment`; the traits here are public only because they
// appear in those method bounds.

/// Canonical erased builtin function type used by the evaluator.
///
/// Builtins receive ownership of their argument vector, enabling
/// implementations that consume or rearrange arguments if desired.
pub type OperationFn = dyn Fn(Vec<Value>) -> Result<Value, Error> + Send + Sync;

/// Take ownership of an argument slot, leaving a placeholder behind.
fn take(value: &mut Value) -> Value {
    std::mem::replace(value, Value::Unspecified)
}

// =====================================================================
// Fixed-parameter conversion
// =====================================================================

/// Turns a single `Value` argument into a strongly-typed parameter.
///
/// The associated `Param<'a>` type is the parameter type as seen by
/// the builtin for a given lifetime of the local argument slot, so
/// list parameters can borrow instead of cloning.
pub trait FromParam {
    type Param<'a>;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error>;
}

impl FromParam for Value {
    type Param<'a> = Value;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error> {
        Ok(take(value))
    }
}

macro_rules! impl_from_param_via_try_from {
    ($($t:ty),+) => {
        $(
            impl FromParam for $t {
                type Param<'a> = $t;

                fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error> {
                    <$t>::try_from(take(value))
                }
            }
        )+
    };
}

impl_from_param_via_try_from!(Number, i64, f64);

impl<K> FromParam for TypedValueIter<'static, K>
where
    K: ValueElementKind,
{
    type Param<'a> = TypedValueIter<'a, K>;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error> {
        match value {
            Value::List(items) => TypedValueIter::<K>::new(items),
            other => Err(Error::TypeError(format!(
                "expected list, got {}: {other}",
                other.type_name()
            ))),
        }
    }
}

// =====================================================================
// Generic typed iterator built on top of the standard slice iterator
// =====================================================================

/// Describes how to view a `Value` slice as a typed iterator.
/// Implementations validate the whole slice up front and then map
/// each `Value` to the element type.
#[doc(hidden)]
pub trait ValueElementKind {
    type Item<'a>;

    fn precheck(slice: &[Value]) -> Result<(), Error>;
    fn project(v: &Value) -> Self::Item<'_>;
}

/// Iterator over a list of `Value`s, parameterized by a
/// [`ValueElementKind`] that determines the element type.
#[doc(hidden)]
pub struct TypedValueIter<'a, K: ValueElementKind> {
    inner: std::slice::Iter<'a, Value>,
    _marker: PhantomData<K>,
}

impl<'a, K> TypedValueIter<'a, K>
where
    K: ValueElementKind,
{
    pub(crate) fn new(values: &'a [Value]) -> Result<Self, Error> {
        K::precheck(values)?;
        Ok(TypedValueIter {
            inner: values.iter(),
            _marker: PhantomData,
        })
    }

    /// The not-yet-consumed elements as a slice
    pub fn as_slice(&self) -> &'a [Value] {
        self.inner.as_slice()
    }
}

impl<'a, K> Iterator for TypedValueIter<'a, K>
where
    K: ValueElementKind,
{
    type Item = K::Item<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(K::project)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K> DoubleEndedIterator for TypedValueIter<'_, K>
where
    K: ValueElementKind,
{
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(K::project)
    }
}

impl<K> ExactSizeIterator for TypedValueIter<'_, K> where K: ValueElementKind {}
impl<K> FusedIterator for TypedValueIter<'_, K> where K: ValueElementKind {}

/// Views each `Value` as a borrowed reference
#[doc(hidden)]
pub struct ValueKind;

impl ValueElementKind for ValueKind {
    type Item<'a> = &'a Value;

    fn precheck(_slice: &[Value]) -> Result<(), Error> {
        Ok(())
    }

    fn project(v: &Value) -> Self::Item<'_> {
        v
    }
}

/// Views each `Value` as a [`Number`], rejecting non-numeric elements
#[doc(hidden)]
pub struct NumberKind;

impl ValueElementKind for NumberKind {
    type Item<'a> = Number;

    fn precheck(slice: &[Value]) -> Result<(), Error> {
        match slice
            .iter()
            .find(|v| !matches!(v, Value::Integer(_) | Value::Float(_)))
        {
            Some(bad) => Err(Error::TypeError(format!(
                "expected number, got {}: {bad}",
                bad.type_name()
            ))),
            None => Ok(()),
        }
    }

    fn project(v: &Value) -> Self::Item<'_> {
        match v {
            Value::Integer(n) => Number::Integer(*n),
            Value::Float(x) => Number::Float(*x),
            _ => unreachable!("NumberKind invariant violated"),
        }
    }
}

/// Borrowed iterator over values.
pub type ValueIter<'a> = TypedValueIter<'a, ValueKind>;

/// Borrowed iterator over numeric values, type checked up front.
pub type NumIter<'a> = TypedValueIter<'a, NumberKind>;

/// Marker for a rest parameter collecting all remaining arguments.
pub type ValuesRest = ValueIter<'static>;

/// Marker for a rest parameter collecting all remaining numeric arguments.
pub type NumRest = NumIter<'static>;

// =====================================================================
// Rest-parameter support for variadic operations
// =====================================================================

/// Builds a rest-parameter value from the tail of the argument list.
pub trait FromRest {
    type Param<'a>;

    fn from_rest(slice: &[Value]) -> Result<Self::Param<'_>, Error>;
}

impl<K> FromRest for TypedValueIter<'static, K>
where
    K: ValueElementKind,
{
    type Param<'a> = TypedValueIter<'a, K>;

    fn from_rest(slice: &[Value]) -> Result<Self::Param<'_>, Error> {
        TypedValueIter::<K>::new(slice)
    }
}

// =====================================================================
// Return-type adaptation for builtin functions
// =====================================================================

/// Normalizes builtin return types to the canonical
/// `Result<Value, Error>` expected by the evaluator.
pub trait IntoValueResult {
    fn into_value_result(self) -> Result<Value, Error>;
}

impl<T> IntoValueResult for Result<T, Error>
where
    T: Into<Value>,
{
    fn into_value_result(self) -> Result<Value, Error> {
        self.map(Into::into)
    }
}

macro_rules! impl_into_value_result {
    ($($t:ty),+) => {
        $(
            impl IntoValueResult for $t {
                fn into_value_result(self) -> Result<Value, Error> {
                    Ok(self.into())
                }
            }
        )+
    };
}

impl_into_value_result!(Value, Number, i64, f64, bool);

/// Converts a strongly-typed Rust function into the erased
/// [`OperationFn`], parameterized by its argument tuple type.
pub trait IntoOperation<Args> {
    /// Argument count implied by the Rust signature
    const ARITY: Arity;

    fn into_operation(self) -> Arc<OperationFn>;
}

/// Converts a function whose last parameter is a rest iterator
/// ([`ValueIter`] or [`NumIter`]), optionally after a fixed prefix
/// of [`FromParam`] parameters.
pub trait IntoVariadicOperation<Args> {
    fn into_variadic_operation(self) -> Arc<OperationFn>;
}

// =====================================================================
// Variadic adapters using iterator-based rest parameters
// =====================================================================

impl<F, I, R> IntoVariadicOperation<(I,)> for F
where
    I: FromRest,
    F: for<'a> Fn(<I as FromRest>::Param<'a>) -> R + Send + Sync + 'static,
    R: IntoValueResult,
{
    fn into_variadic_operation(self) -> Arc<OperationFn> {
        Arc::new(move |args: Vec<Value>| {
            let rest = <I as FromRest>::from_rest(&args)?;
            (self)(rest).into_value_result()
        })
    }
}

/// Implements `IntoVariadicOperation` for a fixed prefix of `FromParam`
/// parameters followed by a single rest parameter.
macro_rules! impl_into_variadic_operation_for_prefix_and_rest {
    ($prefix:expr, $( $v:ident, $p:ident : $A:ident ),+ ) => {
        impl<F, I, R, $( $A ),+> IntoVariadicOperation<( $( $A, )+ I, )> for F
        where
            I: FromRest,
            $( $A: FromParam, )+
            F: for<'a> Fn(
                    $( <$A as FromParam>::Param<'a> ),+,
                    <I as FromRest>::Param<'a>,
                ) -> R
                + Send
                + Sync
                + 'static,
            R: IntoValueResult,
        {
            fn into_variadic_operation(self) -> Arc<OperationFn> {
                Arc::new(move |mut args: Vec<Value>| {
                    let len = args.len();
                    match args.as_mut_slice() {
                        [ $( $v ),+, rest @ .. ] => {
                            $(
                                let $p = <$A as FromParam>::from_arg($v)?;
                            )+
                            let rest_param = <I as FromRest>::from_rest(rest)?;
                            (self)( $( $p ),+, rest_param ).into_value_result()
                        }
                        _ => Err(Error::arity_error(Arity::AtLeast($prefix), len)),
                    }
                })
            }
        }
    };
}

impl_into_variadic_operation_for_prefix_and_rest!(1, v0, p0: A1);
impl_into_variadic_operation_for_prefix_and_rest!(2, v0, p0: A1, v1, p1: A2);

// =====================================================================
// Fixed-arity adapters
// =====================================================================

/// Implements `IntoOperation` for functions of a given arity.
///
/// It checks the argument count up front, then lets each `FromParam`
/// either borrow from or consume its argument slot before invoking
/// the builtin function.
macro_rules! impl_into_operation_for_arity {
    ($arity:expr, $( $v:ident, $p:ident : $A:ident ),+ ) => {
        impl<F, R, $( $A ),+> IntoOperation<( $( $A, )+ )> for F
        where
            F: for<'a> Fn( $( <$A as FromParam>::Param<'a> ),+ ) -> R
                + Send
                + Sync
                + 'static,
            $( $A: FromParam, )+
            R: IntoValueResult,
        {
            const ARITY: Arity = Arity::Exact($arity);

            fn into_operation(self) -> Arc<OperationFn> {
                Arc::new(move |mut args: Vec<Value>| {
                    let len = args.len();
                    match args.as_mut_slice() {
                        [ $( $v ),+ ] => {
                            $(
                                let $p = <$A as FromParam>::from_arg($v)?;
                            )+
                            (self)( $( $p ),+ ).into_value_result()
                        }
                        _ => Err(Error::arity_error(Arity::Exact($arity), len)),
                    }
                })
            }
        }
    };
}

impl<F, R> IntoOperation<()> for F
where
    F: Fn() -> R + Send + Sync + 'static,
    R: IntoValueResult,
{
    const ARITY: Arity = Arity::Exact(0);

    fn into_operation(self) -> Arc<OperationFn> {
        Arc::new(move |args: Vec<Value>| {
            if !args.is_empty() {
                return Err(Error::arity_error(Arity::Exact(0), args.len()));
            }
            (self)().into_value_result()
        })
    }
}

impl_into_operation_for_arity!(1, v0, p0: A1);
impl_into_operation_for_arity!(2, v0, p0: A1, v1, p1: A2);
impl_into_operation_for_arity!(3, v0, p0: A1, v1, p1: A2, v2, p2: A3);
