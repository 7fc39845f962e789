use super::{BinaryOp, ExprError, Node, UnaryOp};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok<'s> {
    Int(i64),
    Ident(&'s str),
    If,
    Else,
    True,
    False,
    LParen,
    RParen,
    Op(&'static str),
}

#[derive(Debug, Clone)]
struct Token<'s> {
    tok: Tok<'s>,
    offset: usize,
    text: &'s str,
}

const OPERATORS: [&str; 16] = [
    "&&", "||", "==", "!=", "<=", ">=", "<", ">", "+", "-", "*", "/", "!", "(", ")", "=",
];

fn tokenize(source: &str) -> Result<Vec<Token<'_>>, ExprError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let b = bytes[pos];
        if b.is_ascii_whitespace() {
            pos += 1;
            continue;
        }
        let start = pos;
        if b.is_ascii_digit() {
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
            let text = &source[start..pos];
            let value = text
                .parse()
                .map_err(|_| ExprError::IntegerOutOfRange { offset: start })?;
            tokens.push(Token {
                tok: Tok::Int(value),
                offset: start,
                text,
            });
            continue;
        }
        if b.is_ascii_alphabetic() || b == b'_' {
            while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_') {
                pos += 1;
            }
            let text = &source[start..pos];
            let tok = match text {
                "if" => Tok::If,
                "else" => Tok::Else,
                "true" => Tok::True,
                "false" => Tok::False,
                ident => Tok::Ident(ident),
            };
            tokens.push(Token {
                tok,
                offset: start,
                text,
            });
            continue;
        }
        let rest = &source[start..];
        let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) else {
            let ch = rest.chars().next().expect("expr::tokenize");
            return Err(ExprError::UnexpectedChar { ch, offset: start });
        };
        pos += op.len();
        let tok = match *op {
            "(" => Tok::LParen,
            ")" => Tok::RParen,
            // A lone `=` is only ever a typo for `==`.
            "=" => {
                return Err(ExprError::UnexpectedChar {
                    ch: '=',
                    offset: start,
                });
            }
            op => Tok::Op(op),
        };
        tokens.push(Token {
            tok,
            offset: start,
            text: &source[start..pos],
        });
    }
    Ok(tokens)
}

struct Parser<'s> {
    tokens: Vec<Token<'s>>,
    pos: usize,
}

/// Binary precedence levels, loosest first.
const LEVELS: [&[(&str, BinaryOp)]; 6] = [
    &[("||", BinaryOp::Or)],
    &[("&&", BinaryOp::And)],
    &[("==", BinaryOp::Eq), ("!=", BinaryOp::Ne)],
    &[
        ("<", BinaryOp::Lt),
        ("<=", BinaryOp::Le),
        (">", BinaryOp::Gt),
        (">=", BinaryOp::Ge),
    ],
    &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
    &[("*", BinaryOp::Mul), ("/", BinaryOp::Div)],
];

pub(super) fn parse(source: &str) -> Result<Node, ExprError> {
    let mut parser = Parser {
        tokens: tokenize(source)?,
        pos: 0,
    };
    let root = parser.expr()?;
    match parser.tokens.get(parser.pos) {
        None => Ok(root),
        Some(token) => Err(unexpected(token, "end of expression")),
    }
}

fn unexpected(token: &Token<'_>, expected: &'static str) -> ExprError {
    ExprError::UnexpectedToken {
        found: token.text.to_owned(),
        offset: token.offset,
        expected,
    }
}

impl<'s> Parser<'s> {
    fn peek(&self) -> Option<&Tok<'s>> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn next(&mut self, expected: &'static str) -> Result<Token<'s>, ExprError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(ExprError::UnexpectedEnd { expected })?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, tok: &Tok<'_>, expected: &'static str) -> Result<(), ExprError> {
        let token = self.next(expected)?;
        if token.tok == *tok {
            Ok(())
        } else {
            Err(unexpected(&token, expected))
        }
    }

    fn expr(&mut self) -> Result<Node, ExprError> {
        self.binary(0)
    }

    fn binary(&mut self, level: usize) -> Result<Node, ExprError> {
        let Some(ops) = LEVELS.get(level) else {
            return self.unary();
        };
        let mut lhs = self.binary(level + 1)?;
        while let Some(Tok::Op(op)) = self.peek() {
            let Some(&(_, bin)) = ops.iter().find(|(text, _)| text == op) else {
                break;
            };
            self.pos += 1;
            let rhs = self.binary(level + 1)?;
            lhs = Node::Binary(bin, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Node, ExprError> {
        let op = match self.peek() {
            Some(Tok::Op("!")) => UnaryOp::Not,
            Some(Tok::Op("-")) => UnaryOp::Neg,
            Some(Tok::Op("+")) => UnaryOp::Plus,
            _ => return self.primary(),
        };
        self.pos += 1;
        Ok(Node::Unary(op, Box::new(self.unary()?)))
    }

    fn primary(&mut self) -> Result<Node, ExprError> {
        const EXPECTED: &str = "operand";
        let token = self.next(EXPECTED)?;
        match token.tok {
            Tok::Int(v) => Ok(Node::Int(v)),
            Tok::True => Ok(Node::Int(1)),
            Tok::False => Ok(Node::Int(0)),
            Tok::Ident(name) => Ok(Node::Var(name.to_owned())),
            Tok::LParen => {
                let inner = self.expr()?;
                self.expect(&Tok::RParen, "`)`")?;
                Ok(inner)
            }
            Tok::If => {
                self.expect(&Tok::LParen, "`(` after `if`")?;
                let cond = self.expr()?;
                self.expect(&Tok::RParen, "`)`")?;
                let then = self.expr()?;
                self.expect(&Tok::Else, "`else`")?;
                let otherwise = self.expr()?;
                Ok(Node::If {
                    cond: Box::new(cond),
                    then: Box::new(then),
                    otherwise: Box::new(otherwise),
                })
            }
            Tok::Else | Tok::RParen | Tok::Op(_) => Err(unexpected(&token, EXPECTED)),
        }
    }
}
