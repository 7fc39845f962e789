//! Integer/boolean expressions used as gate conditions.
//!
//! The language is deliberately small:
//!
//! ```text
//! expr    := or
//! or      := and ( "||" and )*
//! and     := eq ( "&&" eq )*
//! eq      := rel ( ( "==" | "!=" ) rel )*
//! rel     := add ( ( "<" | "<=" | ">" | ">=" ) add )*
//! add     := mul ( ( "+" | "-" ) mul )*
//! mul     := unary ( ( "*" | "/" ) unary )*
//! unary   := ( "!" | "-" | "+" ) unary | primary
//! primary := integer | "true" | "false" | identifier | "(" expr ")"
//!          | "if" "(" expr ")" expr "else" expr
//! ```
//!
//! Every value is an `i64`; booleans are `0`/`1` and any nonzero value is
//! truthy. `&&` and `||` short-circuit.

mod parse;

use core::hash::BuildHasher;
use std::collections::HashMap;
use thiserror::Error;

/// Error kind for parsing or evaluating an expression.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ExprError {
    /// A character that does not start any token.
    #[error("unexpected character {ch:?} at offset {offset}")]
    UnexpectedChar {
        /// The offending character.
        ch: char,
        /// Byte offset in the source.
        offset: usize,
    },
    /// A token that does not fit the grammar at this position.
    #[error("unexpected `{found}` at offset {offset}, expected {expected}")]
    UnexpectedToken {
        /// Source text of the token.
        found: String,
        /// Byte offset in the source.
        offset: usize,
        /// What the parser was looking for.
        expected: &'static str,
    },
    /// The source ended in the middle of an expression.
    #[error("unexpected end of expression, expected {expected}")]
    UnexpectedEnd {
        /// What the parser was looking for.
        expected: &'static str,
    },
    /// An integer literal does not fit in `i64`.
    #[error("integer literal at offset {offset} is out of range")]
    IntegerOutOfRange {
        /// Byte offset in the source.
        offset: usize,
    },
    /// A referenced variable has no value.
    #[error("variable `{name}` has no value")]
    UnknownVariable {
        /// Variable name.
        name: String,
    },
    /// Division by zero during evaluation.
    #[error("division by zero")]
    DivisionByZero,
    /// Arithmetic overflow during evaluation.
    #[error("arithmetic overflow")]
    Overflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Not,
    Neg,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Node {
    Int(i64),
    Var(String),
    Unary(UnaryOp, Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    If {
        cond: Box<Node>,
        then: Box<Node>,
        otherwise: Box<Node>,
    },
}

/// A parsed expression together with the variables it references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
    source: String,
    root: Node,
    variables: Vec<String>,
}

impl Expr {
    /// Parses `source`.
    ///
    /// # Errors
    /// If `source` is not a well-formed expression.
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let root = parse::parse(source)?;
        let mut variables = Vec::new();
        collect_variables(&root, &mut variables);
        Ok(Self {
            source: source.to_owned(),
            root,
            variables,
        })
    }

    /// The text this expression was parsed from.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Names referenced by the expression, in order of first use, without
    /// duplicates.
    #[must_use]
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Evaluates the expression, resolving variables through `lookup`.
    ///
    /// # Errors
    /// On a variable `lookup` cannot resolve, division by zero, or overflow.
    pub fn evaluate(&self, lookup: impl Fn(&str) -> Option<i64>) -> Result<i64, ExprError> {
        eval(&self.root, &lookup)
    }
}

/// Parses and evaluates `source` against a name-to-value map.
///
/// # Errors
/// If parsing or evaluation fails.
pub fn evaluate<S: BuildHasher>(
    source: &str,
    variables: &HashMap<String, i64, S>,
) -> Result<i64, ExprError> {
    Expr::parse(source)?.evaluate(|name| variables.get(name).copied())
}

/// Parses `source` and returns the names it references.
///
/// # Errors
/// If `source` is not a well-formed expression.
pub fn referenced_names(source: &str) -> Result<Vec<String>, ExprError> {
    Expr::parse(source).map(|expr| expr.variables)
}

fn collect_variables(node: &Node, out: &mut Vec<String>) {
    match node {
        Node::Int(_) => {}
        Node::Var(name) => {
            if !out.iter().any(|known| known == name) {
                out.push(name.clone());
            }
        }
        Node::Unary(_, operand) => collect_variables(operand, out),
        Node::Binary(_, lhs, rhs) => {
            collect_variables(lhs, out);
            collect_variables(rhs, out);
        }
        Node::If {
            cond,
            then,
            otherwise,
        } => {
            collect_variables(cond, out);
            collect_variables(then, out);
            collect_variables(otherwise, out);
        }
    }
}

fn eval(node: &Node, lookup: &impl Fn(&str) -> Option<i64>) -> Result<i64, ExprError> {
    Ok(match node {
        Node::Int(v) => *v,
        Node::Var(name) => {
            lookup(name).ok_or_else(|| ExprError::UnknownVariable { name: name.clone() })?
        }
        Node::Unary(op, operand) => {
            let v = eval(operand, lookup)?;
            match op {
                UnaryOp::Not => i64::from(v == 0),
                UnaryOp::Neg => v.checked_neg().ok_or(ExprError::Overflow)?,
                UnaryOp::Plus => v,
            }
        }
        Node::Binary(BinaryOp::And, lhs, rhs) => {
            i64::from(eval(lhs, lookup)? != 0 && eval(rhs, lookup)? != 0)
        }
        Node::Binary(BinaryOp::Or, lhs, rhs) => {
            i64::from(eval(lhs, lookup)? != 0 || eval(rhs, lookup)? != 0)
        }
        Node::Binary(op, lhs, rhs) => {
            let (l, r) = (eval(lhs, lookup)?, eval(rhs, lookup)?);
            match op {
                BinaryOp::Add => l.checked_add(r).ok_or(ExprError::Overflow)?,
                BinaryOp::Sub => l.checked_sub(r).ok_or(ExprError::Overflow)?,
                BinaryOp::Mul => l.checked_mul(r).ok_or(ExprError::Overflow)?,
                BinaryOp::Div => {
                    if r == 0 {
                        return Err(ExprError::DivisionByZero);
                    }
                    l.checked_div(r).ok_or(ExprError::Overflow)?
                }
                BinaryOp::Eq => i64::from(l == r),
                BinaryOp::Ne => i64::from(l != r),
                BinaryOp::Lt => i64::from(l < r),
                BinaryOp::Le => i64::from(l <= r),
                BinaryOp::Gt => i64::from(l > r),
                BinaryOp::Ge => i64::from(l >= r),
                BinaryOp::And | BinaryOp::Or => unreachable!("expr::eval"),
            }
        }
        Node::If {
            cond,
            then,
            otherwise,
        } => {
            if eval(cond, lookup)? != 0 {
                eval(then, lookup)?
            } else {
                eval(otherwise, lookup)?
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, i64)]) -> HashMap<String, i64> {
        pairs.iter().map(|&(k, v)| (k.to_owned(), v)).collect()
    }

    #[test]
    fn if_else_picks_the_else_branch() {
        let values = vars(&[("Sid_1", 5), ("Sid_2", 7), ("Sid_3", 8), ("Sid_4", 9)]);
        let result = evaluate("if (Sid_1 > Sid_2) Sid_3+8 else Sid_4*5", &values);
        assert_eq!(result, Ok(45));
    }

    #[test]
    fn if_else_with_single_letter_names() {
        let values = vars(&[("A", 5), ("B", 6), ("C", 7), ("D", 8)]);
        assert_eq!(evaluate("if (A > B) C+2 else D*3", &values), Ok(24));
        let values = vars(&[("A", 7), ("B", 6), ("C", 7), ("D", 8)]);
        assert_eq!(evaluate("if (A > B) C+2 else D*3", &values), Ok(9));
    }

    #[test]
    fn variables_are_collected_once_in_first_use_order() {
        let names = referenced_names("if (A > B) C+2 else D*3").unwrap();
        assert_eq!(names, ["A", "B", "C", "D"]);
        let names = referenced_names("x && y || x && !z").unwrap();
        assert_eq!(names, ["x", "y", "z"]);
    }

    #[test]
    fn precedence_and_associativity() {
        let empty = HashMap::new();
        assert_eq!(evaluate("1 + 2 * 3", &empty), Ok(7));
        assert_eq!(evaluate("(1 + 2) * 3", &empty), Ok(9));
        assert_eq!(evaluate("10 - 4 - 3", &empty), Ok(3));
        assert_eq!(evaluate("12 / 3 / 2", &empty), Ok(2));
        assert_eq!(evaluate("-2 * -3", &empty), Ok(6));
        assert_eq!(evaluate("1 < 2 == 1", &empty), Ok(1));
        assert_eq!(evaluate("true && false || true", &empty), Ok(1));
        assert_eq!(evaluate("!0 + !5", &empty), Ok(1));
    }

    #[test]
    fn logical_operators_short_circuit() {
        // `missing` would fail to resolve if it were evaluated.
        let values = vars(&[("a", 0), ("b", 3)]);
        assert_eq!(evaluate("a && missing", &values), Ok(0));
        assert_eq!(evaluate("b || missing", &values), Ok(1));
        assert_eq!(
            evaluate("b && missing", &values),
            Err(ExprError::UnknownVariable {
                name: "missing".to_owned()
            })
        );
    }

    #[test]
    fn nested_if_in_operands() {
        let values = vars(&[("flag", 1)]);
        assert_eq!(
            evaluate("1 + if (flag) 10 else 20 * 2", &values),
            Ok(11),
            "then-branch taken, else-branch extends to the end"
        );
        assert_eq!(
            evaluate("if (!flag) 1 else if (flag == 1) 2 else 3", &values),
            Ok(2)
        );
    }

    #[test]
    fn evaluation_errors() {
        let empty = HashMap::new();
        assert_eq!(evaluate("1 / 0", &empty), Err(ExprError::DivisionByZero));
        assert_eq!(
            evaluate("9223372036854775807 + 1", &empty),
            Err(ExprError::Overflow)
        );
    }
}
