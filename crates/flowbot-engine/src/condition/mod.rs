//! Sandboxed condition expressions.
//!
//! Authored expressions are compiled into a small [`Condition`] tree and
//! evaluated against the user's message. Nothing in an expression can reach
//! outside the message text: the grammar has no variables, assignment or
//! arbitrary calls.
//!
//! ```text
//! includes("refund") && length < 200
//! text == "yes" || startsWith('y')
//! 1234            // digit-only: exact PIN match on the trimmed message
//! ```

mod ast;
mod lexer;
mod parser;

use thiserror::Error;

pub use ast::{CmpOp, Condition};

/// Longest expression we will look at, in bytes.
pub const MAX_EXPRESSION_LEN: usize = 4096;
/// Deepest `(`/`!` nesting the parser will follow.
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("expression is empty")]
    Empty,

    #[error("expression is {len} bytes, limit is {max}")]
    TooLong { len: usize, max: usize },

    #[error("expression nests deeper than {max} levels")]
    TooDeep { max: usize },

    #[error("unexpected character '{ch}' at {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("unterminated string starting at {pos}")]
    UnterminatedString { pos: usize },

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("unexpected {0}")]
    UnexpectedToken(String),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),
}

/// A digit-only expression is a PIN/code check, not a predicate.
pub fn is_pin(expression: &str) -> bool {
    let trimmed = expression.trim();
    !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit())
}

/// Compile an authored expression.
pub fn compile(expression: &str) -> Result<Condition, ExpressionError> {
    if expression.len() > MAX_EXPRESSION_LEN {
        return Err(ExpressionError::TooLong {
            len: expression.len(),
            max: MAX_EXPRESSION_LEN,
        });
    }
    if is_pin(expression) {
        return Ok(Condition::Equals(expression.trim().to_string()));
    }
    let tokens = lexer::tokenize(expression)?;
    parser::Parser::new(tokens).parse()
}

/// Compile and evaluate in one go.
pub fn evaluate(expression: &str, text: &str) -> Result<bool, ExpressionError> {
    Ok(compile(expression)?.evaluate(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refund_scenario() {
        assert_eq!(evaluate(r#"includes("refund")"#, "I want a refund please"), Ok(true));
        assert_eq!(evaluate(r#"includes("refund")"#, "hello"), Ok(false));
    }

    #[test]
    fn test_pin_is_exact_on_trimmed_text() {
        assert_eq!(evaluate("1234", " 1234 "), Ok(true));
        assert_eq!(evaluate("1234", "12345"), Ok(false));
        assert_eq!(evaluate("1234", "1234 please"), Ok(false));
        assert_eq!(evaluate("0042", "42"), Ok(false));
    }

    #[test]
    fn test_malformed_is_error_not_panic() {
        for bad in ["includes(", "&&", ")", "text ==", "includes(refund)", "a.b.c", "1 +"] {
            assert!(evaluate(bad, "anything").is_err(), "{bad} should fail");
        }
    }

    #[test]
    fn test_length_cap() {
        let long = format!("includes(\"{}\")", "a".repeat(MAX_EXPRESSION_LEN));
        assert!(matches!(compile(&long), Err(ExpressionError::TooLong { .. })));
    }

    #[test]
    fn test_empty_expression() {
        assert_eq!(compile("   "), Err(ExpressionError::Empty));
    }

    #[test]
    fn test_mixed_grammar() {
        let expr = r#"(text.startsWith("order") || contains('#')) && length <= 20"#;
        assert_eq!(evaluate(expr, "Order 55"), Ok(true));
        assert_eq!(evaluate(expr, "where is #55"), Ok(true));
        assert_eq!(evaluate(expr, "hello"), Ok(false));
        assert_eq!(evaluate(expr, "order that is much too long to pass"), Ok(false));
    }
}
