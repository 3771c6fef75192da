use super::ast::{CmpOp, Condition};
use super::lexer::Token;
use super::{ExpressionError, MAX_DEPTH};

/// What an operand turned out to be before comparison folds it into a condition.
#[derive(Debug, Clone)]
enum Operand {
    Bool(Condition),
    Text,
    Length,
    Number(f64),
    Str(String),
}

impl Operand {
    fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "boolean",
            Self::Text => "text",
            Self::Length => "length",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
        }
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    pub fn parse(mut self) -> Result<Condition, ExpressionError> {
        if self.tokens.is_empty() {
            return Err(ExpressionError::Empty);
        }
        let cond = self.parse_or()?;
        match self.peek() {
            None => Ok(cond),
            Some(tok) => Err(ExpressionError::UnexpectedToken(tok.describe())),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token, ExpressionError> {
        let tok = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(ExpressionError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(tok)
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ExpressionError> {
        let tok = self.next()?;
        if &tok == expected {
            Ok(())
        } else {
            Err(ExpressionError::UnexpectedToken(tok.describe()))
        }
    }

    fn enter(&mut self) -> Result<(), ExpressionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExpressionError::TooDeep { max: MAX_DEPTH });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn parse_or(&mut self) -> Result<Condition, ExpressionError> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let rhs = self.parse_and()?;
            lhs = lhs.or(rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Condition, ExpressionError> {
        let mut lhs = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = lhs.and(rhs);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Condition, ExpressionError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            self.enter()?;
            let inner = self.parse_unary()?;
            self.leave();
            return Ok(inner.not());
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Condition, ExpressionError> {
        let lhs = self.parse_operand()?;
        let op = match self.peek() {
            Some(Token::Cmp(op)) => *op,
            _ => return as_condition(lhs),
        };
        self.pos += 1;
        let rhs = self.parse_operand()?;
        compare(lhs, op, rhs)
    }

    fn parse_operand(&mut self) -> Result<Operand, ExpressionError> {
        match self.next()? {
            Token::LParen => {
                self.enter()?;
                let inner = self.parse_or()?;
                self.leave();
                self.expect(&Token::RParen)?;
                Ok(Operand::Bool(inner))
            }
            Token::Number(n) => Ok(Operand::Number(n)),
            Token::Str(s) => Ok(Operand::Str(s)),
            Token::Ident(name) => self.parse_ident(name),
            other => Err(ExpressionError::UnexpectedToken(other.describe())),
        }
    }

    fn parse_ident(&mut self, name: String) -> Result<Operand, ExpressionError> {
        match name.as_str() {
            "true" => Ok(Operand::Bool(Condition::Literal(true))),
            "false" => Ok(Operand::Bool(Condition::Literal(false))),
            "length" => Ok(Operand::Length),
            "text" | "message" => {
                if self.peek() != Some(&Token::Dot) {
                    return Ok(Operand::Text);
                }
                self.pos += 1;
                match self.next()? {
                    Token::Ident(member) if member == "length" => Ok(Operand::Length),
                    Token::Ident(member) => self.parse_call(member),
                    other => Err(ExpressionError::UnexpectedToken(other.describe())),
                }
            }
            _ => self.parse_call(name),
        }
    }

    /// `predicate("needle")`; the name has already been consumed.
    fn parse_call(&mut self, name: String) -> Result<Operand, ExpressionError> {
        let make: fn(String) -> Condition = match name.as_str() {
            "includes" | "contains" => Condition::Includes,
            "equals" => Condition::Equals,
            "startsWith" => Condition::StartsWith,
            "endsWith" => Condition::EndsWith,
            _ => return Err(ExpressionError::UnknownIdentifier(name)),
        };
        self.expect(&Token::LParen)?;
        let arg = match self.next()? {
            Token::Str(s) => s,
            Token::Number(n) => format_number(n),
            other => return Err(ExpressionError::UnexpectedToken(other.describe())),
        };
        self.expect(&Token::RParen)?;
        Ok(Operand::Bool(make(arg.to_lowercase())))
    }
}

/// An operand standing on its own must be usable as a boolean.
fn as_condition(operand: Operand) -> Result<Condition, ExpressionError> {
    match operand {
        Operand::Bool(c) => Ok(c),
        // Bare `text` or `length` mean "the message is not empty".
        Operand::Text | Operand::Length => Ok(Condition::LengthCompare(CmpOp::Gt, 0.0)),
        other => Err(ExpressionError::TypeMismatch(format!(
            "{} is not a condition",
            other.kind()
        ))),
    }
}

fn compare(lhs: Operand, op: CmpOp, rhs: Operand) -> Result<Condition, ExpressionError> {
    let equality = matches!(op, CmpOp::Eq | CmpOp::Ne);
    let negate = |c: Condition| if op == CmpOp::Ne { c.not() } else { c };

    match (lhs, rhs) {
        (Operand::Text, Operand::Str(s)) | (Operand::Str(s), Operand::Text) if equality => {
            Ok(negate(Condition::Equals(s.to_lowercase())))
        }
        (Operand::Length, Operand::Number(n)) => Ok(Condition::LengthCompare(op, n)),
        (Operand::Number(n), Operand::Length) => Ok(Condition::LengthCompare(op.flip(), n)),
        (Operand::Number(a), Operand::Number(b)) => Ok(Condition::Literal(op.apply(a, b))),
        (Operand::Str(a), Operand::Str(b)) if equality => Ok(Condition::Literal((a == b) != (op == CmpOp::Ne))),
        // `c == true` is `c`, `c == false` is `!c`; `!=` flips both.
        (Operand::Bool(Condition::Literal(x)), Operand::Bool(c))
        | (Operand::Bool(c), Operand::Bool(Condition::Literal(x)))
            if equality =>
        {
            Ok(negate(if x { c } else { c.not() }))
        }
        (Operand::Bool(_), Operand::Bool(_)) if equality => Err(ExpressionError::TypeMismatch(
            "two conditions can only be compared when one side is true or false".into(),
        )),
        (lhs, rhs) => Err(ExpressionError::TypeMismatch(format!(
            "cannot compare {} {} {}",
            lhs.kind(),
            op,
            rhs.kind()
        ))),
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::super::compile;
    use super::*;

    #[test]
    fn test_text_equality_compiles_to_equals() {
        assert_eq!(compile(r#"text == "Yes""#).unwrap(), Condition::Equals("yes".into()));
        assert_eq!(
            compile(r#"message !== 'no'"#).unwrap(),
            Condition::Equals("no".into()).not()
        );
    }

    #[test]
    fn test_number_length_is_flipped() {
        assert_eq!(
            compile("5 < length").unwrap(),
            Condition::LengthCompare(CmpOp::Gt, 5.0)
        );
        assert_eq!(
            compile("text.length >= 2").unwrap(),
            Condition::LengthCompare(CmpOp::Ge, 2.0)
        );
    }

    #[test]
    fn test_precedence_and_binds_tighter_than_or() {
        let c = compile(r#"includes("a") || includes("b") && includes("c")"#).unwrap();
        assert_eq!(
            c,
            Condition::Includes("a".into())
                .or(Condition::Includes("b".into()).and(Condition::Includes("c".into())))
        );
    }

    #[test]
    fn test_keyword_operators() {
        let c = compile(r#"not includes("x") and startsWith("a")"#).unwrap();
        assert!(c.evaluate("abc"));
        assert!(!c.evaluate("axe"));
    }

    #[test]
    fn test_type_mismatch() {
        assert!(matches!(compile(r#"length == "a""#), Err(ExpressionError::TypeMismatch(_))));
        assert!(matches!(compile(r#"text < "a""#), Err(ExpressionError::TypeMismatch(_))));
        assert!(matches!(compile(r#""just a string""#), Err(ExpressionError::TypeMismatch(_))));
    }

    #[test]
    fn test_unknown_function_rejected() {
        assert!(matches!(
            compile(r#"process.exit("1")"#),
            Err(ExpressionError::UnknownIdentifier(name)) if name == "process"
        ));
        assert!(matches!(
            compile(r#"eval("1")"#),
            Err(ExpressionError::UnknownIdentifier(_))
        ));
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        assert!(matches!(
            compile(r#"includes("a") includes("b")"#),
            Err(ExpressionError::UnexpectedToken(_))
        ));
        assert!(matches!(compile("(true"), Err(ExpressionError::UnexpectedEnd)));
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}true{}", "(".repeat(MAX_DEPTH + 1), ")".repeat(MAX_DEPTH + 1));
        assert!(matches!(compile(&deep), Err(ExpressionError::TooDeep { .. })));

        let ok = format!("{}true{}", "(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert_eq!(compile(&ok).unwrap(), Condition::Literal(true));

        let nots = format!("{}true", "!".repeat(MAX_DEPTH + 1));
        assert!(matches!(compile(&nots), Err(ExpressionError::TooDeep { .. })));
    }

    #[test]
    fn test_boolean_equality() {
        let c = compile(r#"includes("a") == false"#).unwrap();
        assert!(c.evaluate("xyz"));
        assert!(!c.evaluate("abc"));

        assert_eq!(compile(r#"true == includes("a")"#).unwrap(), Condition::Includes("a".into()));
        assert_eq!(
            compile(r#"includes("a") != true"#).unwrap(),
            Condition::Includes("a".into()).not()
        );
        assert_eq!(
            compile(r#"includes("a") != false"#).unwrap(),
            Condition::Includes("a".into())
        );
    }

    #[test]
    fn test_comparing_two_conditions_is_rejected() {
        assert!(matches!(
            compile(r#"includes("a") == includes("b")"#),
            Err(ExpressionError::TypeMismatch(_))
        ));
    }

    fn node_count(c: &Condition) -> usize {
        match c {
            Condition::And(a, b) | Condition::Or(a, b) => 1 + node_count(a) + node_count(b),
            Condition::Not(a) => 1 + node_count(a),
            _ => 1,
        }
    }

    #[test]
    fn test_nested_boolean_equality_stays_small() {
        let depth = 40;
        let mut expr = r#"includes("a")"#.to_string();
        for _ in 0..depth {
            expr = format!("({}) == true", expr);
        }
        let c = compile(&expr).unwrap();
        assert_eq!(c, Condition::Includes("a".into()));

        let mut expr = r#"includes("a")"#.to_string();
        for _ in 0..depth {
            expr = format!("({}) == false", expr);
        }
        let c = compile(&expr).unwrap();
        assert_eq!(node_count(&c), depth + 1);
        // An even number of negations
        assert!(c.evaluate("abc"));
        assert!(!c.evaluate("xyz"));
    }

    #[test]
    fn test_bare_text_means_non_empty() {
        let c = compile("text").unwrap();
        assert!(c.evaluate("hi"));
        assert!(!c.evaluate("   "));
    }
}
