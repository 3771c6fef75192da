use std::fmt;

/// Numeric comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
        }
    }

    /// The operator that gives the same answer with operands swapped.
    pub fn flip(self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
            other => other,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        };
        f.write_str(s)
    }
}

/// A compiled condition. String needles are stored lowercased.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Literal(bool),
    Includes(String),
    Equals(String),
    StartsWith(String),
    EndsWith(String),
    /// `length <op> n`, on the character count of the trimmed text.
    LengthCompare(CmpOp, f64),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
}

struct Subject {
    folded: String,
    len: usize,
}

impl Condition {
    /// Evaluate against the user's raw message.
    ///
    /// Predicates compare case-insensitively against the trimmed text.
    pub fn evaluate(&self, text: &str) -> bool {
        let trimmed = text.trim();
        self.eval(&Subject {
            folded: trimmed.to_lowercase(),
            // Counted before folding: some characters grow when lowercased.
            len: trimmed.chars().count(),
        })
    }

    fn eval(&self, subject: &Subject) -> bool {
        let folded = subject.folded.as_str();
        match self {
            Self::Literal(b) => *b,
            Self::Includes(s) => folded.contains(s.as_str()),
            Self::Equals(s) => folded == s,
            Self::StartsWith(s) => folded.starts_with(s.as_str()),
            Self::EndsWith(s) => folded.ends_with(s.as_str()),
            Self::LengthCompare(op, n) => op.apply(subject.len as f64, *n),
            Self::And(a, b) => a.eval(subject) && b.eval(subject),
            Self::Or(a, b) => a.eval(subject) || b.eval(subject),
            Self::Not(a) => !a.eval(subject),
        }
    }

    pub fn and(self, other: Condition) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Condition) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self::Not(Box::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates_are_case_insensitive() {
        assert!(Condition::Includes("refund".into()).evaluate("I want a REFUND"));
        assert!(Condition::Equals("yes".into()).evaluate("  Yes "));
        assert!(Condition::StartsWith("hi".into()).evaluate("Hi there"));
        assert!(Condition::EndsWith("thanks".into()).evaluate("ok Thanks"));
    }

    #[test]
    fn test_length_counts_chars() {
        assert!(Condition::LengthCompare(CmpOp::Eq, 3.0).evaluate("héé"));
        assert!(Condition::LengthCompare(CmpOp::Lt, 3.0).evaluate(" ab "));
    }

    #[test]
    fn test_length_ignores_case_folding_growth() {
        // 'İ' lowercases to two chars
        assert_eq!("İ".to_lowercase().chars().count(), 2);
        assert!(Condition::LengthCompare(CmpOp::Eq, 1.0).evaluate(" İ "));
        assert!(Condition::Includes("i".into()).evaluate("İ"));
    }

    #[test]
    fn test_combinators() {
        let c = Condition::Includes("a".into()).and(Condition::Includes("b".into()).not());
        assert!(c.evaluate("a"));
        assert!(!c.evaluate("ab"));
        let c = Condition::Literal(false).or(Condition::Literal(true));
        assert!(c.evaluate(""));
    }

    #[test]
    fn test_flip() {
        assert_eq!(CmpOp::Lt.flip(), CmpOp::Gt);
        assert_eq!(CmpOp::Ge.flip(), CmpOp::Le);
        assert_eq!(CmpOp::Eq.flip(), CmpOp::Eq);
    }
}
