//! Stutter - a minimal Lisp-like expression interpreter
//!
//! This crate turns source text into a nested expression tree and evaluates
//! that tree against a chain of lexical scopes. It supports a small fixed set
//! of special forms, user-defined closures, and a table of built-in
//! procedures.
//!
//! ```text
//! (+ 1 (* 2 3))                                  ; arithmetic
//! (define fact (lambda (n) (if (<= n 1) 1 (* n (fact (- n 1))))))
//! (fact 5)                                       ; => 120
//! (car (quote (1 2 3)))                          ; => 1
//! ```
//!
//! ## Pipeline
//!
//! text → [`parser::tokenize`] → [`parser::parse`] → [`ast::Expr`] →
//! [`evaluator::eval`] → [`ast::Value`]
//!
//! The global environment is an explicit value created by
//! [`evaluator::standard_env`] and passed to every evaluation; there is no
//! hidden interpreter state.
//!
//! ```
//! use stutter::{eval, parse, standard_env};
//! use stutter::ast::Value;
//!
//! let env = standard_env();
//! eval(&parse("(define square (lambda (x) (* x x)))")?, &env)?;
//! let result = eval(&parse("(square 7)")?, &env)?;
//! assert_eq!(result, Value::Integer(49));
//! # Ok::<(), stutter::Error>(())
//! ```
//!
//! ## Modules
//!
//! - `parser`: tokenizing and parsing source text
//! - `ast`: expression tree and runtime value types
//! - `evaluator`: environments, special forms and procedure application
//! - `builtinops`: the standard library of built-in procedures

use std::fmt;

use crate::evaluator::Arity;

/// Maximum nesting depth accepted by the parser
pub const MAX_PARSE_DEPTH: usize = 128;

/// Maximum evaluation depth before a recursive program is aborted.
/// There is no tail-call elimination, so this bounds recursive procedures too.
pub const MAX_EVAL_DEPTH: usize = 1000;

/// Categorizes the different kinds of syntax errors.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ParseErrorKind {
    /// Input ended while a token was still expected
    UnexpectedEof,
    /// A `)` appeared where an expression was expected
    UnexpectedCloseParen,
    /// Extra tokens found after a complete expression (only when rejected by config)
    TrailingContent,
    /// Expression nesting exceeded [`MAX_PARSE_DEPTH`]
    TooDeeplyNested,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ParseErrorKind::UnexpectedEof => "unexpected end of input",
            ParseErrorKind::UnexpectedCloseParen => "unexpected close-parenthesis",
            ParseErrorKind::TrailingContent => "unexpected trailing input",
            ParseErrorKind::TooDeeplyNested => "expression too deeply nested",
        };
        f.write_str(text)
    }
}

/// A structured error providing detailed information about a syntax failure.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// The problematic token, if identifiable
    pub found: Option<String>,
    /// Index of the offending token in the token sequence
    pub position: Option<usize>,
}

impl ParseError {
    /// Create a ParseError whose message is the kind's description
    pub fn new(kind: ParseErrorKind) -> Self {
        ParseError {
            kind,
            message: kind.to_string(),
            found: None,
            position: None,
        }
    }

    /// Attach the offending token and its index
    pub fn at(mut self, position: usize, found: impl Into<String>) -> Self {
        self.position = Some(position);
        self.found = Some(found.into());
        self
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(found) = &self.found {
            write!(f, "\nFound: {found}")?;
        }
        if let Some(position) = self.position {
            write!(f, " (token {position})")?;
        }
        Ok(())
    }
}

/// Error types for the interpreter
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("SyntaxError: {0}")]
    Syntax(ParseError),
    #[error("Unbound symbol: {0}")]
    UnboundSymbol(String),
    #[error("{}", format_arity(.expected, .got, .expression))]
    Arity {
        expected: Arity,
        got: usize,
        expression: Option<String>,
    },
    #[error("TypeError: {0}")]
    TypeError(String),
    #[error("IndexError: {0}")]
    IndexError(String),
    #[error("ArithmeticError: {0}")]
    ArithmeticError(String),
    #[error("EvaluationError: {0}")]
    EvalError(String),
}

fn format_arity(expected: &Arity, got: &usize, expression: &Option<String>) -> String {
    match expression {
        Some(expr) => format!("ArityError: {expr}: expected {expected} arguments, got {got}"),
        None => format!("ArityError: expected {expected} arguments but got {got}"),
    }
}

impl Error {
    /// Create an ArityError without expression context
    pub fn arity_error(expected: Arity, got: usize) -> Self {
        Error::Arity {
            expected,
            got,
            expression: None,
        }
    }

    /// Create an ArityError with expression context
    pub fn arity_error_with_expr(expected: Arity, got: usize, expression: String) -> Self {
        Error::Arity {
            expected,
            got,
            expression: Some(expression),
        }
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        Error::Syntax(err)
    }
}

pub mod ast;
pub mod builtinops;
pub mod evaluator;
pub mod parser;
mod stack;

pub use evaluator::{Environment, eval, eval as evaluate, standard_env};
pub use parser::{ParseConfig, parse, parse_with_config};
