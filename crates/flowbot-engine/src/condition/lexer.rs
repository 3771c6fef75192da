use super::ast::CmpOp;
use super::ExpressionError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    LParen,
    RParen,
    Dot,
    And,
    Or,
    Not,
    Cmp(CmpOp),
    Number(f64),
    Str(String),
    Ident(String),
}

impl Token {
    pub fn describe(&self) -> String {
        match self {
            Self::LParen => "'('".into(),
            Self::RParen => "')'".into(),
            Self::Dot => "'.'".into(),
            Self::And => "'&&'".into(),
            Self::Or => "'||'".into(),
            Self::Not => "'!'".into(),
            Self::Cmp(op) => format!("'{}'", op),
            Self::Number(n) => format!("number {}", n),
            Self::Str(s) => format!("string {:?}", s),
            Self::Ident(s) => format!("'{}'", s),
        }
    }
}

pub fn tokenize(input: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '&' | '|' => {
                if chars.get(i + 1) != Some(&c) {
                    return Err(ExpressionError::UnexpectedChar { ch: c, pos: i });
                }
                tokens.push(if c == '&' { Token::And } else { Token::Or });
                i += 2;
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    // != and !==
                    i += if chars.get(i + 2) == Some(&'=') { 3 } else { 2 };
                    tokens.push(Token::Cmp(CmpOp::Ne));
                } else {
                    tokens.push(Token::Not);
                    i += 1;
                }
            }
            '=' => {
                if chars.get(i + 1) != Some(&'=') {
                    return Err(ExpressionError::UnexpectedChar { ch: c, pos: i });
                }
                i += if chars.get(i + 2) == Some(&'=') { 3 } else { 2 };
                tokens.push(Token::Cmp(CmpOp::Eq));
            }
            '<' | '>' => {
                let or_equal = chars.get(i + 1) == Some(&'=');
                let op = match (c, or_equal) {
                    ('<', false) => CmpOp::Lt,
                    ('<', true) => CmpOp::Le,
                    ('>', false) => CmpOp::Gt,
                    _ => CmpOp::Ge,
                };
                tokens.push(Token::Cmp(op));
                i += if or_equal { 2 } else { 1 };
            }
            '"' | '\'' => {
                let (s, next) = read_string(&chars, i)?;
                tokens.push(Token::Str(s));
                i = next;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let n = literal
                    .parse::<f64>()
                    .map_err(|_| ExpressionError::InvalidNumber(literal.clone()))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(ExpressionError::UnexpectedChar { ch: other, pos: i }),
        }
    }

    Ok(tokens)
}

/// Read a quoted string starting at `start`. Returns the unescaped value and
/// the index just past the closing quote.
fn read_string(chars: &[char], start: usize) -> Result<(String, usize), ExpressionError> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        match chars[i] {
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .ok_or(ExpressionError::UnterminatedString { pos: start })?;
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => *other,
                });
                i += 2;
            }
            c if c == quote => return Ok((out, i + 1)),
            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    Err(ExpressionError::UnterminatedString { pos: start })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_call() {
        let tokens = tokenize(r#"text.includes("a b") && !x"#).unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("text".into()),
                Token::Dot,
                Token::Ident("includes".into()),
                Token::LParen,
                Token::Str("a b".into()),
                Token::RParen,
                Token::And,
                Token::Not,
                Token::Ident("x".into()),
            ]
        );
    }

    #[test]
    fn test_strict_and_loose_equality_are_the_same() {
        assert_eq!(tokenize("===").unwrap(), vec![Token::Cmp(CmpOp::Eq)]);
        assert_eq!(tokenize("==").unwrap(), vec![Token::Cmp(CmpOp::Eq)]);
        assert_eq!(tokenize("!==").unwrap(), vec![Token::Cmp(CmpOp::Ne)]);
        assert_eq!(tokenize("<= >").unwrap(), vec![Token::Cmp(CmpOp::Le), Token::Cmp(CmpOp::Gt)]);
    }

    #[test]
    fn test_escapes_and_single_quotes() {
        assert_eq!(
            tokenize(r#"'it\'s' "a\"b""#).unwrap(),
            vec![Token::Str("it's".into()), Token::Str("a\"b".into())]
        );
    }

    #[test]
    fn test_rejects_assignment_and_bitwise() {
        assert!(matches!(tokenize("a = 1"), Err(ExpressionError::UnexpectedChar { ch: '=', .. })));
        assert!(matches!(tokenize("a & b"), Err(ExpressionError::UnexpectedChar { ch: '&', .. })));
        assert!(matches!(tokenize("a; b"), Err(ExpressionError::UnexpectedChar { ch: ';', .. })));
    }

    #[test]
    fn test_unterminated_string() {
        assert!(matches!(
            tokenize(r#"includes("abc)"#),
            Err(ExpressionError::UnterminatedString { pos: 9 })
        ));
    }
}
