use crate::Error;
use crate::MAX_EVAL_DEPTH;
use crate::ast::{Atom, Expr, Procedure, Value};
use crate::builtinops::{MATH_CONSTANTS, OpKind, get_builtin_ops};
use crate::stack::ensure_sufficient_stack;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

pub mod intooperation;

use intooperation::{IntoOperation, IntoVariadicOperation, OperationFn};
pub use intooperation::{NumIter, NumRest, ValueIter, ValuesRest};

/// Expected number of arguments for a procedure or special form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly n arguments
    Exact(usize),
    /// At least n arguments
    AtLeast(usize),
    /// Between min and max arguments (inclusive)
    Range(usize, usize),
    /// Any number of arguments
    Any,
}

impl Arity {
    /// Check if the given number of arguments is valid for this arity
    pub fn validate(self, count: usize) -> Result<(), Error> {
        let ok = match self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(n) => count >= n,
            Arity::Range(min, max) => (min..=max).contains(&count),
            Arity::Any => true,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::arity_error(self, count))
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "exactly {n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
            Arity::Range(min, max) => write!(f, "between {min} and {max}"),
            Arity::Any => write!(f, "any number of"),
        }
    }
}

/// One frame of the lexical scope chain.
///
/// Frames are shared through `Rc`: a closure keeps its defining frame alive,
/// and `define`/`set!` mutate bindings through the `RefCell`, so a procedure
/// defined at top level can see itself and later definitions.
pub struct Environment {
    bindings: RefCell<HashMap<String, Value>>,
    outer: Option<Rc<Environment>>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only names are shown; values can be closures over this very frame.
        let bindings = self.bindings.borrow();
        let mut names: Vec<&str> = bindings.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("Environment")
            .field("bindings", &names)
            .field("has_outer", &self.outer.is_some())
            .finish()
    }
}

impl Environment {
    /// Create an empty top-level frame
    pub fn new() -> Self {
        Environment {
            bindings: RefCell::new(HashMap::new()),
            outer: None,
        }
    }

    /// Create an empty frame nested inside `outer`
    pub fn with_outer(outer: Rc<Environment>) -> Self {
        Environment {
            bindings: RefCell::new(HashMap::new()),
            outer: Some(outer),
        }
    }

    /// Find the value bound to `name`, searching this frame and then each
    /// enclosing frame outward
    pub fn lookup(&self, name: &str) -> Result<Value, Error> {
        let mut frame = self;
        loop {
            if let Some(value) = frame.bindings.borrow().get(name) {
                return Ok(value.clone());
            }
            match &frame.outer {
                Some(outer) => frame = outer,
                None => return Err(Error::UnboundSymbol(name.to_owned())),
            }
        }
    }

    /// Bind `name` in this frame, replacing any existing binding here.
    /// Enclosing frames are never touched.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        let previous = self.bindings.borrow_mut().insert(name.into(), value);
        drop(previous);
    }

    /// Rebind `name` in the nearest frame that already defines it.
    /// Never creates a binding.
    pub fn assign(&self, name: &str, value: Value) -> Result<(), Error> {
        let mut frame = self;
        loop {
            if frame.bindings.borrow().contains_key(name) {
                let previous = frame.bindings.borrow_mut().insert(name.to_owned(), value);
                drop(previous);
                return Ok(());
            }
            match &frame.outer {
                Some(outer) => frame = outer,
                None => return Err(Error::UnboundSymbol(name.to_owned())),
            }
        }
    }

    /// Register a custom builtin function working directly on `&[Value]`.
    ///
    /// This is the low-level API; prefer
    /// [`Environment::register_builtin_operation`] for functions with
    /// typed parameters.
    ///
    /// # Example
    /// ```
    /// use stutter::ast::Value;
    /// use stutter::evaluator::{Arity, standard_env};
    /// use stutter::{Error, eval, parse};
    ///
    /// fn second(args: &[Value]) -> Result<Value, Error> {
    ///     Ok(args[1].clone())
    /// }
    ///
    /// let env = standard_env();
    /// env.register_builtin_function("second", Arity::Exact(2), second);
    /// assert_eq!(eval(&parse("(second 1 2)")?, &env)?, Value::Integer(2));
    /// # Ok::<(), Error>(())
    /// ```
    pub fn register_builtin_function(
        &self,
        name: &str,
        arity: Arity,
        func: fn(&[Value]) -> Result<Value, Error>,
    ) {
        let wrapped: Arc<OperationFn> = Arc::new(move |args: Vec<Value>| func(&args));
        self.define_builtin(name, arity, wrapped);
    }

    /// Register a strongly-typed Rust function as a builtin, with automatic
    /// argument conversion and arity derived from the signature.
    ///
    /// Supported parameter types are `Value`, `Number`, `i64`, `f64` (integers
    /// widen) and the list views [`ValuesRest`] / [`NumRest`]. Return types
    /// are anything convertible into `Value`, or `Result` of one.
    ///
    /// # Example
    /// ```
    /// use stutter::ast::Value;
    /// use stutter::evaluator::standard_env;
    /// use stutter::{Error, eval, parse};
    ///
    /// fn hypotenuse_sq(a: i64, b: i64) -> i64 {
    ///     a * a + b * b
    /// }
    ///
    /// let env = standard_env();
    /// env.register_builtin_operation::<_, (i64, i64)>("hyp2", hypotenuse_sq);
    /// assert_eq!(eval(&parse("(hyp2 3 4)")?, &env)?, Value::Integer(25));
    /// # Ok::<(), Error>(())
    /// ```
    pub fn register_builtin_operation<F, Args>(&self, name: &str, func: F)
    where
        F: IntoOperation<Args>,
    {
        self.define_builtin(name, F::ARITY, func.into_operation());
    }

    /// Register a variadic builtin whose last parameter collects the
    /// remaining arguments ([`ValuesRest`] or [`NumRest`]).
    ///
    /// The argument count cannot be derived from such a signature, so the
    /// accepted [`Arity`] is given explicitly and checked at call time.
    pub fn register_variadic_builtin_operation<F, Args>(&self, name: &str, arity: Arity, func: F)
    where
        F: IntoVariadicOperation<Args>,
    {
        self.define_builtin(name, arity, func.into_variadic_operation());
    }

    fn define_builtin(&self, name: &str, arity: Arity, func: Arc<OperationFn>) {
        self.define(
            name,
            Value::BuiltinFunction {
                id: Rc::from(name),
                arity,
                op: OpKind::Function(func),
            },
        );
    }

    /// Get all bindings visible from this frame, sorted by name.
    /// Inner bindings shadow outer ones.
    pub fn get_all_bindings(&self) -> Vec<(String, Value)> {
        let mut bindings = HashMap::new();

        if let Some(outer) = &self.outer {
            bindings.extend(outer.get_all_bindings());
        }
        for (name, value) in self.bindings.borrow().iter() {
            bindings.insert(name.clone(), value.clone());
        }

        let mut result: Vec<_> = bindings.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }

    /// Remove every binding in this frame.
    ///
    /// A closure defined in a frame holds that frame alive, so a global
    /// environment with user procedures is a reference cycle; clearing it
    /// at the end of a session releases those closures.
    pub fn teardown(&self) {
        let drained: Vec<(String, Value)> = self.bindings.borrow_mut().drain().collect();
        tracing::debug!(count = drained.len(), "environment torn down");
        drop(drained);
    }
}

/// Forms with their own evaluation rules. These are recognized by the head
/// symbol before any lookup, so they cannot be shadowed by bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialForm {
    Quote,
    If,
    Define,
    Set,
    Lambda,
}

impl SpecialForm {
    pub fn from_symbol(name: &str) -> Option<Self> {
        match name {
            "quote" => Some(SpecialForm::Quote),
            "if" => Some(SpecialForm::If),
            "define" => Some(SpecialForm::Define),
            "set!" => Some(SpecialForm::Set),
            "lambda" => Some(SpecialForm::Lambda),
            _ => None,
        }
    }

    /// Number of operands following the keyword
    pub fn arity(self) -> Arity {
        match self {
            SpecialForm::Quote => Arity::Exact(1),
            SpecialForm::If => Arity::Exact(3),
            SpecialForm::Define | SpecialForm::Set | SpecialForm::Lambda => Arity::Exact(2),
        }
    }
}

/// Evaluate an expression in `env` (public API)
pub fn eval(expr: &Expr, env: &Rc<Environment>) -> Result<Value, Error> {
    eval_with_depth_tracking(expr, env, 0)
}

/// Apply a procedure value to already-evaluated arguments (public API)
pub fn apply_procedure(procedure: &Value, args: Vec<Value>) -> Result<Value, Error> {
    apply_with_depth(procedure, args, 0)
}

/// Evaluate an expression with depth tracking to prevent stack overflow
fn eval_with_depth_tracking(
    expr: &Expr,
    env: &Rc<Environment>,
    depth: usize,
) -> Result<Value, Error> {
    if depth >= MAX_EVAL_DEPTH {
        return Err(Error::EvalError(format!(
            "Evaluation depth limit exceeded (max: {MAX_EVAL_DEPTH})"
        )));
    }
    match expr {
        Expr::Atom(Atom::Symbol(name)) => env.lookup(name),
        Expr::Atom(Atom::Integer(n)) => Ok(Value::Integer(*n)),
        Expr::Atom(Atom::Float(x)) => Ok(Value::Float(*x)),
        Expr::List(elements) => ensure_sufficient_stack(|| eval_list(elements, env, depth))
            .map_err(|err| add_context(err, expr)),
    }
}

const CONTEXT_MARKER: &str = "\n  Context: while evaluating: ";

/// Add the innermost failing form to evaluation and type errors
fn add_context(error: Error, expr: &Expr) -> Error {
    match error {
        Error::EvalError(msg) if !msg.contains(CONTEXT_MARKER) => {
            Error::EvalError(format!("{msg}{CONTEXT_MARKER}{expr}"))
        }
        Error::TypeError(msg) if !msg.contains(CONTEXT_MARKER) => {
            Error::TypeError(format!("{msg}{CONTEXT_MARKER}{expr}"))
        }
        // Arity errors carry their own expression; the rest need none
        other => other,
    }
}

/// Evaluate argument expressions left to right
fn eval_args(args: &[Expr], env: &Rc<Environment>, depth: usize) -> Result<Vec<Value>, Error> {
    args.iter()
        .map(|arg| eval_with_depth_tracking(arg, env, depth + 1))
        .collect()
}

fn render_form(elements: &[Expr]) -> String {
    Expr::List(elements.to_vec()).to_string()
}

fn eval_list(elements: &[Expr], env: &Rc<Environment>, depth: usize) -> Result<Value, Error> {
    let [head, operands @ ..] = elements else {
        return Err(Error::EvalError("Cannot evaluate empty list".to_owned()));
    };

    if let Some(form) = head.as_symbol().and_then(SpecialForm::from_symbol) {
        return match (form, operands) {
            (SpecialForm::Quote, [datum]) => Ok(Value::from(datum)),
            (SpecialForm::If, [test, consequent, alternative]) => {
                eval_if(test, consequent, alternative, env, depth)
            }
            (SpecialForm::Define, [target, expr]) => eval_define(target, expr, env, depth),
            (SpecialForm::Set, [target, expr]) => eval_set(target, expr, env, depth),
            (SpecialForm::Lambda, [params, body]) => eval_lambda(params, body, env),
            _ => Err(Error::arity_error_with_expr(
                form.arity(),
                operands.len(),
                render_form(elements),
            )),
        };
    }

    let procedure = eval_with_depth_tracking(head, env, depth + 1)?;
    let args = eval_args(operands, env, depth)?;
    apply_with_depth(&procedure, args, depth)
}

/// Apply a procedure value at the given evaluation depth.
///
/// Higher-order builtins such as `apply` and `map` call back into this so
/// that nested calls keep counting toward [`MAX_EVAL_DEPTH`].
pub(crate) fn apply_with_depth(
    procedure: &Value,
    args: Vec<Value>,
    depth: usize,
) -> Result<Value, Error> {
    match procedure {
        Value::BuiltinFunction { arity, op, .. } => {
            arity.validate(args.len())?;
            match op {
                OpKind::Function(func) => func(args),
                OpKind::HigherOrder(func) => func(args, depth + 1),
            }
        }
        Value::Procedure(closure) => {
            if closure.params.len() != args.len() {
                return Err(Error::arity_error(
                    Arity::Exact(closure.params.len()),
                    args.len(),
                ));
            }

            let frame = Rc::new(Environment::with_outer(Rc::clone(&closure.env)));
            for (param, arg) in closure.params.iter().zip(args) {
                frame.define(param.as_str(), arg);
            }
            tracing::trace!(params = ?closure.params, depth, "applying procedure");

            eval_with_depth_tracking(&closure.body, &frame, depth + 1)
        }
        other => Err(Error::TypeError(format!(
            "Cannot apply non-procedure: {other}"
        ))),
    }
}

fn eval_if(
    test: &Expr,
    consequent: &Expr,
    alternative: &Expr,
    env: &Rc<Environment>,
    depth: usize,
) -> Result<Value, Error> {
    let branch = if eval_with_depth_tracking(test, env, depth + 1)?.is_truthy() {
        consequent
    } else {
        alternative
    };
    eval_with_depth_tracking(branch, env, depth + 1)
}

fn eval_define(
    target: &Expr,
    expr: &Expr,
    env: &Rc<Environment>,
    depth: usize,
) -> Result<Value, Error> {
    let Some(name) = target.as_symbol() else {
        return Err(Error::TypeError(format!(
            "define requires a symbol, got {target}"
        )));
    };
    let value = eval_with_depth_tracking(expr, env, depth + 1)?;
    tracing::debug!(name = %name, value = %value, "define");
    env.define(name, value);
    Ok(Value::Unspecified)
}

fn eval_set(target: &Expr, expr: &Expr, env: &Rc<Environment>, depth: usize) -> Result<Value, Error> {
    let Some(name) = target.as_symbol() else {
        return Err(Error::TypeError(format!(
            "set! requires a symbol, got {target}"
        )));
    };
    let value = eval_with_depth_tracking(expr, env, depth + 1)?;
    tracing::debug!(name = %name, value = %value, "set!");
    env.assign(name, value)?;
    Ok(Value::Unspecified)
}

fn eval_lambda(params: &Expr, body: &Expr, env: &Rc<Environment>) -> Result<Value, Error> {
    match params {
        Expr::List(param_list) => {
            let mut params: Vec<String> = Vec::with_capacity(param_list.len());
            for param in param_list {
                match param.as_symbol() {
                    Some(name) if params.iter().any(|p| p == name) => {
                        return Err(Error::EvalError(format!(
                            "Duplicate parameter name: {name}"
                        )));
                    }
                    Some(name) => params.push(name.to_owned()),
                    None => {
                        return Err(Error::TypeError(format!(
                            "Lambda parameters must be symbols, got {param}"
                        )));
                    }
                }
            }

            Ok(Value::Procedure(Rc::new(Procedure {
                params,
                body: body.clone(),
                env: Rc::clone(env),
            })))
        }
        Expr::Atom(_) => Err(Error::TypeError(
            "Lambda parameters must be a list".to_owned(),
        )),
    }
}

/// Create a global environment holding the standard library
pub fn standard_env() -> Rc<Environment> {
    let env = Environment::new();

    for builtin_op in get_builtin_ops() {
        env.define(
            builtin_op.scheme_id,
            Value::BuiltinFunction {
                id: Rc::from(builtin_op.scheme_id),
                arity: builtin_op.arity,
                op: builtin_op.op_kind.clone(),
            },
        );
    }
    for &(name, value) in MATH_CONSTANTS {
        env.define(name, Value::Float(value));
    }

    Rc::new(env)
}

/// Same as [`standard_env`]
pub fn create_global_env() -> Rc<Environment> {
    standard_env()
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::Error;
    use crate::ast::{Number, nil, sym, val};
    use crate::parser::parse;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn run(input: &str, env: &Rc<Environment>) -> Result<Value, Error> {
        eval(&parse(input)?, env)
    }

    #[test]
    fn test_register_builtin_operation_add() {
        fn add(a: i64, b: i64) -> i64 {
            a + b
        }
        let env = create_global_env();
        env.register_builtin_operation::<_, (i64, i64)>("add2", add);
        assert_eq!(run("(add2 7 5)", &env).unwrap(), Value::Integer(12));
        assert!(matches!(
            run("(add2 7)", &env),
            Err(Error::Arity { expected: Arity::Exact(2), got: 1, .. })
        ));
    }

    #[test]
    fn test_register_builtin_operation_zero_arg() {
        fn forty_two() -> i64 {
            42
        }

        let env = create_global_env();
        env.register_builtin_operation::<_, ()>("forty-two", forty_two);
        assert_eq!(run("(forty-two)", &env).unwrap(), Value::Integer(42));
    }

    #[test]
    fn test_register_builtin_operation_result_builtin() {
        fn safe_div(a: i64, b: i64) -> Result<i64, Error> {
            a.checked_div(b)
                .ok_or_else(|| Error::ArithmeticError("division by zero".into()))
        }

        let env = create_global_env();
        env.register_builtin_operation::<_, (i64, i64)>("safe-div", safe_div);

        assert_eq!(run("(safe-div 6 3)", &env).unwrap(), Value::Integer(2));
        let err = run("(safe-div 1 0)", &env).unwrap_err();
        assert!(err.to_string().contains("division by zero"));
        // floats are not integers
        assert!(matches!(run("(safe-div 1.5 1)", &env), Err(Error::TypeError(_))));
    }

    #[test]
    fn test_register_builtin_operation_list_numeric_iterator_param() {
        fn sum_list(nums: NumIter<'_>) -> f64 {
            nums.map(Number::as_f64).sum()
        }

        let env = create_global_env();
        env.register_builtin_operation::<_, (NumRest,)>("sum-list", sum_list);
        assert_eq!(
            run("(sum-list (list 1 2 3 4))", &env).unwrap(),
            Value::Float(10.0)
        );
        assert!(matches!(
            run("(sum-list (list 1 (quote a)))", &env),
            Err(Error::TypeError(_))
        ));
    }

    #[test]
    fn test_register_variadic_builtin_operation() {
        fn weighted_sum(weight: i64, nums: NumIter<'_>) -> f64 {
            weight as f64 * nums.map(Number::as_f64).sum::<f64>()
        }
        fn count_args(args: ValueIter<'_>) -> i64 {
            args.len() as i64
        }

        let env = create_global_env();
        env.register_variadic_builtin_operation::<_, (i64, NumRest)>(
            "weighted-sum",
            Arity::AtLeast(1),
            weighted_sum,
        );
        env.register_variadic_builtin_operation::<_, (ValuesRest,)>(
            "count-args",
            Arity::Range(1, 3),
            count_args,
        );

        assert_eq!(
            run("(weighted-sum 2 1 2 3)", &env).unwrap(),
            Value::Float(12.0)
        );
        assert_eq!(run("(weighted-sum 2)", &env).unwrap(), Value::Float(0.0));
        assert_eq!(run("(count-args 1 (quote x) 3)", &env).unwrap(), val(3));

        match run("(count-args)", &env).unwrap_err() {
            Error::Arity { expected, got, .. } => {
                assert_eq!(expected, Arity::Range(1, 3));
                assert_eq!(got, 0);
            }
            other => panic!("expected ArityError, got {other:?}"),
        }
        assert!(matches!(
            run("(count-args 1 2 3 4)", &env),
            Err(Error::Arity { .. })
        ));
    }

    #[test]
    fn test_register_builtin_function_raw() {
        fn first_or_nil(args: &[Value]) -> Result<Value, Error> {
            Ok(args.first().cloned().unwrap_or_else(nil))
        }

        let env = create_global_env();
        env.register_builtin_function("first-or-nil", Arity::Any, first_or_nil);
        assert_eq!(run("(first-or-nil 5 6)", &env).unwrap(), val(5));
        assert_eq!(run("(first-or-nil)", &env).unwrap(), nil());
    }

    #[test]
    fn test_builtin_passed_as_value() {
        let env = create_global_env();
        assert_eq!(
            run("((lambda (op a b) (op a b)) > 9 6)", &env).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            run("((lambda (op a b) (op a b)) - 9 6)", &env).unwrap(),
            val(3)
        );
    }

    /// Test result variants for comprehensive testing
    #[derive(Debug)]
    enum TestResult {
        EvalResult(Value),           // Evaluation should succeed with this value
        SpecificError(&'static str), // Evaluation should fail with error containing this string
        Error,                       // Evaluation should fail (any error)
    }
    use TestResult::*;

    /// Test environment containing test cases that share state
    struct TestEnvironment(Vec<(&'static str, TestResult)>);

    /// Micro-helper for success cases in comprehensive tests
    fn success<T: Into<Value>>(value: T) -> TestResult {
        EvalResult(val(value))
    }

    /// Macro for setup expressions that return Unspecified (like define)
    macro_rules! test_setup {
        ($expr:expr) => {
            ($expr, EvalResult(Value::Unspecified))
        };
    }

    /// Run tests in isolated environments with shared state
    fn run_tests_in_environment(test_environments: Vec<TestEnvironment>) {
        for (env_idx, TestEnvironment(test_cases)) in test_environments.iter().enumerate() {
            let env = create_global_env();

            for (test_idx, (input, expected)) in test_cases.iter().enumerate() {
                let test_id = format!("Environment #{} test #{}", env_idx + 1, test_idx + 1);
                execute_test_case(input, expected, &env, &test_id);
            }
            env.teardown();
        }
    }

    /// Execute a single test case with detailed error reporting
    fn execute_test_case(input: &str, expected: &TestResult, env: &Rc<Environment>, test_id: &str) {
        let expr = match parse(input) {
            Ok(expr) => expr,
            Err(parse_err) => {
                panic!("{test_id}: unexpected parse error for '{input}': {parse_err:?}");
            }
        };

        match (eval(&expr, env), expected) {
            (Ok(actual), EvalResult(expected_val)) => match (&actual, expected_val) {
                (Value::Unspecified, Value::Unspecified) => {}
                (Value::Float(a), Value::Float(b)) if a.is_nan() && b.is_nan() => {}
                _ => {
                    assert!(
                        actual == *expected_val && actual.type_name() == expected_val.type_name(),
                        "{test_id} ({input}): expected {expected_val:?}, got {actual:?}"
                    );
                }
            },
            (Err(_), Error) => {}
            (Err(e), SpecificError(expected_text)) => {
                let error_msg = format!("{e}");
                assert!(
                    error_msg.contains(expected_text),
                    "{test_id} ({input}): error should contain '{expected_text}', got: {error_msg}"
                );
            }
            (Ok(actual), Error) => {
                panic!("{test_id} ({input}): expected error, got {actual:?}");
            }
            (Ok(actual), SpecificError(expected_text)) => {
                panic!(
                    "{test_id} ({input}): expected error containing '{expected_text}', got {actual:?}"
                );
            }
            (Err(err), EvalResult(expected_val)) => {
                panic!("{test_id} ({input}): expected {expected_val:?}, got error {err:?}");
            }
        }
    }

    /// Each case gets a fresh global environment
    fn run_comprehensive_tests(test_cases: Vec<(&str, TestResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let env = create_global_env();
            let test_id = format!("#{}", i + 1);
            execute_test_case(input, expected, &env, &test_id);
        }
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_comprehensive_evaluation_data_driven() {
        let test_cases = vec![
            // === SELF-EVALUATING ATOMS ===
            ("42", success(42)),
            ("-271", success(-271)),
            ("2.5", success(2.5)),
            // === SYMBOL LOOKUP ===
            ("(procedure? car)", success(true)),
            ("undefined-var", SpecificError("Unbound symbol: undefined-var")),
            ("pi", success(std::f64::consts::PI)),
            // === QUOTE ===
            ("(quote foo)", success(sym("foo"))),
            ("(quote (1 2 3))", success([1, 2, 3])),
            ("(quote ())", success(nil())),
            ("(quote (a (b 2.5)))", success(vec![sym("a"), val(vec![sym("b"), val(2.5)])])),
            ("(quote (if 1 2 3))", success(vec![sym("if"), val(1), val(2), val(3)])),
            ("(quote)", SpecificError("ArityError")),
            ("(quote a b)", SpecificError("(quote a b)")),
            // === IF ===
            ("(if (> 2 1) 10 20)", success(10)),
            ("(if (< 2 1) 10 20)", success(20)),
            ("(if 0 (quote yes) (quote no))", success(sym("yes"))),
            ("(if (quote ()) (quote yes) (quote no))", success(sym("no"))),
            ("(if (quote (0)) 1 2)", success(1)),
            ("(if (define x 1) 1 2)", success(1)), // unspecified is truthy
            // untaken branch is never evaluated
            ("(if (> 2 1) 1 undefined-var)", success(1)),
            ("(if (< 2 1) (car (quote ())) 2)", success(2)),
            ("(if 1 2)", SpecificError("expected exactly 3 arguments, got 2")),
            ("(if 1 2 3 4)", SpecificError("ArityError")),
            ("(if undefined-var 1 2)", SpecificError("Unbound symbol")),
            // === DEFINE ===
            ("(define x 10)", EvalResult(Value::Unspecified)),
            ("(define 5 10)", SpecificError("define requires a symbol")),
            ("(define (f x) x)", SpecificError("TypeError")),
            ("(define x)", SpecificError("ArityError")),
            ("(define x 1 2)", SpecificError("ArityError")),
            ("(define x undefined-var)", SpecificError("Unbound symbol")),
            // === SET! ===
            ("(set! never-defined 5)", SpecificError("Unbound symbol: never-defined")),
            ("(set! 5 5)", SpecificError("set! requires a symbol")),
            ("(set! x)", SpecificError("ArityError")),
            ("(set! x 1 2)", SpecificError("ArityError: (set! x 1 2): expected exactly 2 arguments, got 3")),
            // === LAMBDA ===
            ("((lambda (x) (* x x)) 5)", success(25)),
            ("((lambda () 42))", success(42)),
            ("((lambda (a b c) (list c b a)) 1 2 3)", success([3, 2, 1])),
            ("((lambda (x) ((lambda (y) (+ x y)) 2)) 40)", success(42)),
            ("((lambda (x x) x) 1 2)", SpecificError("Duplicate parameter name: x")),
            ("(lambda (1) 1)", SpecificError("Lambda parameters must be symbols")),
            ("(lambda x x)", SpecificError("Lambda parameters must be a list")),
            ("(lambda (x))", SpecificError("ArityError")),
            ("(lambda (x) x x)", SpecificError("ArityError")),
            ("((lambda (x) x))", SpecificError("expected exactly 1 arguments but got 0")),
            ("((lambda (x) x) 1 2)", SpecificError("ArityError")),
            // body is not evaluated when the lambda is created
            ("(procedure? (lambda () undefined-var))", success(true)),
            ("((lambda () undefined-var))", SpecificError("Unbound symbol")),
            // === APPLICATION ===
            ("(+ 1 2)", success(3)),
            ("((if (> 1 0) + -) 5 3)", success(8)),
            ("((if (< 1 0) + -) 5 3)", success(2)),
            ("(5 3)", SpecificError("Cannot apply non-procedure: 5")),
            ("((quote (1 2)) 3)", SpecificError("TypeError")),
            ("((quote foo))", SpecificError("Cannot apply non-procedure")),
            ("(undefined-fn 1)", SpecificError("Unbound symbol: undefined-fn")),
            // argument errors surface before application
            ("(5 undefined-var)", SpecificError("Unbound symbol")),
            ("()", SpecificError("Cannot evaluate empty list")),
            ("(car 1 2)", SpecificError("ArityError")),
            ("(min 5)", SpecificError("min expects a list or at least two arguments")),
            ("(max (list 4 9))", success(9)),
            ("(+ 1 (quote a))", SpecificError("TypeError")),
            // context names the innermost failing form
            ("(+ 1 (car 5))", SpecificError("while evaluating: (car 5)")),
        ];

        run_comprehensive_tests(test_cases);
    }

    #[test]
    fn test_stateful_environments() {
        let environment_test_cases = vec![
            TestEnvironment(vec![
                test_setup!("(define x 10)"),
                ("x", success(10)),
                test_setup!("(define x 20)"),
                ("x", success(20)),
                test_setup!("(set! x (+ x 1))"),
                ("x", success(21)),
                test_setup!("(define square (lambda (n) (* n n)))"),
                ("(square x)", success(441)),
                ("(square 2.5)", success(6.25)),
            ]),
            // set! on an undefined symbol creates nothing
            TestEnvironment(vec![
                ("(set! ghost 1)", SpecificError("Unbound symbol: ghost")),
                ("ghost", SpecificError("Unbound symbol: ghost")),
            ]),
            // parameters shadow globals; define inside a body stays local
            TestEnvironment(vec![
                test_setup!("(define x 1)"),
                test_setup!("(define shadow (lambda (x) (* x 100)))"),
                ("(shadow 5)", success(500)),
                ("x", success(1)),
                test_setup!("(define local (lambda (n) (if (define y n) y 0)))"),
                ("(local 7)", success(7)),
                ("y", SpecificError("Unbound symbol: y")),
            ]),
            // set! inside a body reaches the nearest defining frame
            TestEnvironment(vec![
                test_setup!("(define total 0)"),
                test_setup!("(define add! (lambda (n) (set! total (+ total n))))"),
                ("(add! 5)", EvalResult(Value::Unspecified)),
                ("(add! 7)", EvalResult(Value::Unspecified)),
                ("total", success(12)),
                // a parameter named like the global absorbs the assignment
                test_setup!("(define local-set (lambda (total) (set! total 99)))"),
                ("(local-set 1)", EvalResult(Value::Unspecified)),
                ("total", success(12)),
            ]),
            // closures capture their defining frame
            TestEnvironment(vec![
                test_setup!(
                    "(define make-counter (lambda () ((lambda (count) (lambda () (begin (set! count (+ count 1)) count))) 0)))"
                ),
                test_setup!("(define c1 (make-counter))"),
                test_setup!("(define c2 (make-counter))"),
                ("(c1)", success(1)),
                ("(c1)", success(2)),
                ("(c1)", success(3)),
                ("(c2)", success(1)),
                test_setup!("(define adder (lambda (n) (lambda (x) (+ x n))))"),
                test_setup!("(define add5 (adder 5))"),
                ("(add5 10)", success(15)),
                ("(map (adder 1) (quote (1 2 3)))", success([2, 3, 4])),
            ]),
            // special form keywords are not shadowed by definitions
            TestEnvironment(vec![
                test_setup!("(define if 5)"),
                ("(if 1 2 3)", success(2)),
                ("if", success(5)),
                test_setup!("(define quote car)"),
                ("(quote (1 2))", success([1, 2])),
            ]),
            // builtins can be redefined like any other binding
            TestEnvironment(vec![
                test_setup!("(define + -)"),
                ("(+ 5 3)", success(2)),
            ]),
            // `if` takes only one branch, observed through set!
            TestEnvironment(vec![
                test_setup!("(define hits 0)"),
                ("(if (> 1 0) 1 (set! hits 1))", success(1)),
                ("(if (< 1 0) (set! hits 2) 3)", success(3)),
                ("hits", success(0)),
            ]),
        ];

        run_tests_in_environment(environment_test_cases);
    }

    #[test]
    fn test_if_evaluates_only_taken_branch() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        fn touch(args: &[Value]) -> Result<Value, Error> {
            CALLS.fetch_add(1, Ordering::SeqCst);
            Ok(args.first().cloned().unwrap_or(Value::Unspecified))
        }

        let env = create_global_env();
        env.register_builtin_function("touch", Arity::Any, touch);

        assert_eq!(run("(if (> 2 1) 1 (touch 2))", &env).unwrap(), val(1));
        assert_eq!(CALLS.load(Ordering::SeqCst), 0);
        assert_eq!(run("(if (< 2 1) (touch 1) 2)", &env).unwrap(), val(2));
        assert_eq!(CALLS.load(Ordering::SeqCst), 0);
        assert_eq!(run("(if (touch 0) (touch 7) 2)", &env).unwrap(), val(7));
        assert_eq!(CALLS.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_recursive_functions() {
        let recursive_test_cases = vec![
            TestEnvironment(vec![
                test_setup!("(define fact (lambda (n) (if (<= n 1) 1 (* n (fact (- n 1))))))"),
                ("(fact 5)", success(120)),
                ("(fact 0)", success(1)),
                ("(fact 20)", success(2_432_902_008_176_640_000_i64)),
                ("(fact 21)", SpecificError("ArithmeticError")),
            ]),
            // mutual recursion resolves through the shared global frame
            TestEnvironment(vec![
                test_setup!("(define is-even (lambda (n) (if (= n 0) (= 1 1) (is-odd (- n 1)))))"),
                test_setup!("(define is-odd (lambda (n) (if (= n 0) (= 1 0) (is-even (- n 1)))))"),
                ("(is-even 10)", success(true)),
                ("(is-odd 7)", success(true)),
                ("(is-even 7)", success(false)),
            ]),
            TestEnvironment(vec![
                test_setup!(
                    "(define countdown (lambda (n) (if (<= n 0) (list) (cons n (countdown (- n 1))))))"
                ),
                ("(countdown 3)", success([3, 2, 1])),
                test_setup!("(define fib (lambda (n) (if (< n 2) n (+ (fib (- n 1)) (fib (- n 2))))))"),
                ("(fib 10)", success(55)),
                ("(map fib (list 1 2 3 4 5 6))", success([1, 1, 2, 3, 5, 8])),
            ]),
            TestEnvironment(vec![
                test_setup!("(define self-apply (lambda (f x) (f f x)))"),
                test_setup!(
                    "(define fact-trick (lambda (self n) (if (= n 0) 1 (* n (self self (- n 1))))))"
                ),
                ("(self-apply fact-trick 5)", success(120)),
            ]),
        ];

        run_tests_in_environment(recursive_test_cases);
    }

    #[test]
    fn test_evaluation_depth_limit() {
        // Runs on the default test thread stack
        let depth_test_environments = vec![TestEnvironment(vec![
            test_setup!(
                "(define make-deep (lambda (depth) (if (= depth 0) 42 (+ 1 (make-deep (- depth 1))))))"
            ),
            ("(make-deep 10)", success(52)),
            ("(make-deep 100)", success(142)),
            ("(make-deep 100000)", SpecificError("depth limit exceeded")),
            // the interpreter stays usable afterwards
            ("(make-deep 1)", success(43)),
        ])];

        run_tests_in_environment(depth_test_environments);
    }

    #[test]
    fn test_depth_limit_on_spawned_thread() {
        let result = std::thread::spawn(|| {
            let env = create_global_env();
            let define = parse(
                "(define loop (lambda (n) (if (= n 0) 0 (+ 1 (car (map loop (list (- n 1))))))))",
            )
            .unwrap();
            eval(&define, &env).unwrap();
            assert_eq!(eval(&parse("(loop 5)").unwrap(), &env).unwrap(), val(5));
            let result = eval(&parse("(loop 100000)").unwrap(), &env);
            env.teardown();
            result.map(|value| value.to_string()).map_err(|err| err.to_string())
        })
        .join()
        .unwrap();

        assert!(
            matches!(&result, Err(msg) if msg.contains("depth limit exceeded")),
            "{result:?}"
        );
    }

    #[test]
    fn test_environment_chain() {
        let global = Rc::new(Environment::new());
        global.define("x", val(1));
        global.define("y", val(2));

        let child = Rc::new(Environment::with_outer(Rc::clone(&global)));
        child.define("x", val(10));

        assert_eq!(child.lookup("x").unwrap(), val(10));
        assert_eq!(child.lookup("y").unwrap(), val(2));
        assert_eq!(global.lookup("x").unwrap(), val(1));
        assert!(matches!(child.lookup("z"), Err(Error::UnboundSymbol(name)) if name == "z"));

        // assign walks outward to the nearest defining frame
        child.assign("y", val(20)).unwrap();
        assert_eq!(global.lookup("y").unwrap(), val(20));
        child.assign("x", val(11)).unwrap();
        assert_eq!(global.lookup("x").unwrap(), val(1));
        assert!(child.assign("z", val(0)).is_err());
        assert!(child.lookup("z").is_err());

        let names: Vec<(String, Value)> = child.get_all_bindings();
        assert_eq!(
            names,
            vec![("x".to_owned(), val(11)), ("y".to_owned(), val(20))]
        );

        global.teardown();
        assert!(global.get_all_bindings().is_empty());
        assert!(child.lookup("y").is_err());
    }

    #[test]
    fn test_teardown_releases_closure_cycle() {
        let env = create_global_env();
        run("(define loop (lambda (n) (loop n)))", &env).unwrap();
        let weak = Rc::downgrade(&env);
        // the closure stored in the frame keeps the frame alive
        assert!(Rc::strong_count(&env) > 1);

        env.teardown();
        assert_eq!(Rc::strong_count(&env), 1);
        drop(env);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_standard_env_contents() {
        let env = create_global_env();
        for name in [
            "+", "-", "*", "/", ">", "<", ">=", "<=", "=", "abs", "apply", "begin", "car",
            "cdr", "cons", "eq?", "equal?", "expt", "length", "list", "list?", "map", "max",
            "min", "not", "null?", "number?", "print", "procedure?", "round", "symbol?", "sqrt",
            "floor", "pi", "e",
        ] {
            assert!(env.lookup(name).is_ok(), "{name} should be bound");
        }
        assert!(matches!(
            env.lookup("car").unwrap(),
            Value::BuiltinFunction { arity: Arity::Exact(1), .. }
        ));
        assert_eq!(SpecialForm::from_symbol("set!"), Some(SpecialForm::Set));
        assert_eq!(SpecialForm::from_symbol("begin"), None);
    }

    #[test]
    fn test_apply_procedure_api() {
        let env = create_global_env();
        let square = run("(lambda (x) (* x x))", &env).unwrap();
        assert_eq!(apply_procedure(&square, vec![val(9)]).unwrap(), val(81));
        let plus = env.lookup("+").unwrap();
        assert_eq!(apply_procedure(&plus, vec![val(1), val(2.5)]).unwrap(), val(3.5));
        assert!(matches!(
            apply_procedure(&val(1), vec![]),
            Err(Error::TypeError(_))
        ));
    }
}
