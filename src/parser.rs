use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    multi::many0,
    sequence::{preceded, terminated},
};
use std::collections::VecDeque;

use crate::ast::{Atom, Expr};
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

/// Parser options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseConfig {
    /// Fail with `TrailingContent` instead of silently dropping tokens that
    /// follow the first complete expression
    pub reject_trailing_tokens: bool,
}

fn whitespace(input: &str) -> IResult<&str, &str> {
    take_while(char::is_whitespace).parse(input)
}

fn paren(input: &str) -> IResult<&str, &str> {
    alt((tag("("), tag(")"))).parse(input)
}

/// Any run of characters that is neither whitespace nor a parenthesis
fn word(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace() && c != '(' && c != ')').parse(input)
}

fn token(input: &str) -> IResult<&str, &str> {
    preceded(whitespace, alt((paren, word))).parse(input)
}

/// Split source text into tokens: `(` and `)` stand alone, everything else
/// is split on whitespace.
pub fn tokenize(input: &str) -> Vec<&str> {
    // Every non-whitespace character belongs to some token, so this only
    // stops at the end of input.
    terminated(many0(token), whitespace)
        .parse(input)
        .map(|(_, tokens)| tokens)
        .unwrap_or_default()
}

/// Token sequence consumed front to back while parsing
struct TokenStream<'a> {
    tokens: VecDeque<&'a str>,
    consumed: usize,
}

impl<'a> TokenStream<'a> {
    fn new(tokens: Vec<&'a str>) -> Self {
        TokenStream {
            tokens: tokens.into(),
            consumed: 0,
        }
    }

    fn peek(&self) -> Option<&'a str> {
        self.tokens.front().copied()
    }

    /// Remove the next token, returning it with its index in the input
    fn pop(&mut self) -> Option<(usize, &'a str)> {
        let token = self.tokens.pop_front()?;
        let position = self.consumed;
        self.consumed += 1;
        Some((position, token))
    }
}

fn parse_expr(tokens: &mut TokenStream<'_>, depth: usize) -> Result<Expr, ParseError> {
    let Some((position, token)) = tokens.pop() else {
        return Err(ParseError::new(ParseErrorKind::UnexpectedEof));
    };

    if depth >= MAX_PARSE_DEPTH {
        return Err(ParseError::new(ParseErrorKind::TooDeeplyNested).at(position, token));
    }

    match token {
        "(" => {
            let mut items = Vec::new();
            loop {
                match tokens.peek() {
                    None => return Err(ParseError::new(ParseErrorKind::UnexpectedEof)),
                    Some(")") => {
                        tokens.pop();
                        return Ok(Expr::List(items));
                    }
                    Some(_) => items.push(parse_expr(tokens, depth + 1)?),
                }
            }
        }
        ")" => Err(ParseError::new(ParseErrorKind::UnexpectedCloseParen).at(position, token)),
        word => Ok(Expr::Atom(Atom::from_token(word))),
    }
}

/// Parse the first complete expression from `input`.
///
/// Tokens after that expression are ignored; use [`parse_with_config`] to
/// reject them instead.
pub fn parse(input: &str) -> Result<Expr, Error> {
    parse_with_config(input, ParseConfig::default())
}

/// Parse the first complete expression from `input` with explicit options
pub fn parse_with_config(input: &str, config: ParseConfig) -> Result<Expr, Error> {
    let mut tokens = TokenStream::new(tokenize(input));
    let expr = parse_expr(&mut tokens, 0)?;

    if let Some((position, extra)) = tokens.pop() {
        if config.reject_trailing_tokens {
            return Err(ParseError::new(ParseErrorKind::TrailingContent)
                .at(position, extra)
                .into());
        }
        tracing::debug!(
            ignored = tokens.tokens.len() + 1,
            "ignoring tokens after first expression"
        );
    }

    tracing::trace!(%expr, "parsed expression");
    Ok(expr)
}
