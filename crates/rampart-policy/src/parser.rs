//! Recursive-descent parser for the constraint expression language.
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! expr    := or
//! or      := and ( '||' and )*
//! and     := eq ( '&&' eq )*
//! eq      := rel ( ('==' | '!=') rel )*
//! rel     := add ( ('<' | '<=' | '>' | '>=') add )*
//! add     := mul ( ('+' | '-') mul )*
//! mul     := unary ( ('*' | '/' | '%') unary )*
//! unary   := ('!' | '-') unary | postfix
//! postfix := primary ( '.' IDENT '(' args ')' )*
//! primary := literal | IDENT | 'int' '(' expr ')' | 'double' '(' expr ')'
//!          | '(' expr ')' | '[' args ']'
//! ```
//!
//! `exists` is parsed as a member call whose first argument must be a bare
//! identifier; it lowers to a dedicated [`Expr::Exists`] node with the
//! binding variable.

use crate::ast::{BinOp, CastKind, Expr, ExprError, UnaryOp};
use crate::lexer::{Spanned, Token};

/// Maximum expression nesting depth.
const MAX_DEPTH: usize = 64;

/// Parse a token stream into an expression tree.
pub fn parse(tokens: Vec<Spanned>, source_len: usize) -> Result<Expr, ExprError> {
    let mut parser = Parser {
        tokens,
        index: 0,
        source_len,
    };
    let expr = parser.expr(0)?;
    if let Some(tok) = parser.peek() {
        return Err(ExprError::Syntax {
            pos: tok.pos,
            message: format!("unexpected {} after expression", tok.token),
        });
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    index: usize,
    source_len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.index)
    }

    fn advance(&mut self) -> Option<Spanned> {
        let tok = self.tokens.get(self.index).cloned();
        if tok.is_some() {
            self.index += 1;
        }
        tok
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek().map(|t| &t.token) == Some(expected) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExprError> {
        match self.advance() {
            Some(tok) if tok.token == expected => Ok(()),
            Some(tok) => Err(ExprError::Syntax {
                pos: tok.pos,
                message: format!("expected {expected}, found {}", tok.token),
            }),
            None => Err(self.eof(&format!("expected {expected}"))),
        }
    }

    fn eof(&self, message: &str) -> ExprError {
        ExprError::Syntax {
            pos: self.source_len,
            message: format!("{message}, found end of input"),
        }
    }

    fn guard_depth(&self, depth: usize) -> Result<(), ExprError> {
        if depth > MAX_DEPTH {
            return Err(ExprError::Syntax {
                pos: self.peek().map(|t| t.pos).unwrap_or(self.source_len),
                message: format!("expression nesting exceeds {MAX_DEPTH} levels"),
            });
        }
        Ok(())
    }

    fn expr(&mut self, depth: usize) -> Result<Expr, ExprError> {
        self.guard_depth(depth)?;
        self.or(depth)
    }

    fn or(&mut self, depth: usize) -> Result<Expr, ExprError> {
        let mut lhs = self.and(depth)?;
        while self.eat(&Token::OrOr) {
            let rhs = self.and(depth)?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self, depth: usize) -> Result<Expr, ExprError> {
        let mut lhs = self.equality(depth)?;
        while self.eat(&Token::AndAnd) {
            let rhs = self.equality(depth)?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn equality(&mut self, depth: usize) -> Result<Expr, ExprError> {
        let mut lhs = self.relational(depth)?;
        loop {
            let op = match self.peek().map(|t| &t.token) {
                Some(Token::EqEq) => BinOp::Eq,
                Some(Token::NotEq) => BinOp::Ne,
                _ => break,
            };
            self.index += 1;
            let rhs = self.relational(depth)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn relational(&mut self, depth: usize) -> Result<Expr, ExprError> {
        let mut lhs = self.additive(depth)?;
        loop {
            let op = match self.peek().map(|t| &t.token) {
                Some(Token::Lt) => BinOp::Lt,
                Some(Token::Le) => BinOp::Le,
                Some(Token::Gt) => BinOp::Gt,
                Some(Token::Ge) => BinOp::Ge,
                _ => break,
            };
            self.index += 1;
            let rhs = self.additive(depth)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn additive(&mut self, depth: usize) -> Result<Expr, ExprError> {
        let mut lhs = self.multiplicative(depth)?;
        loop {
            let op = match self.peek().map(|t| &t.token) {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.index += 1;
            let rhs = self.multiplicative(depth)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self, depth: usize) -> Result<Expr, ExprError> {
        let mut lhs = self.unary(depth)?;
        loop {
            let op = match self.peek().map(|t| &t.token) {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Rem,
                _ => break,
            };
            self.index += 1;
            let rhs = self.unary(depth)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self, depth: usize) -> Result<Expr, ExprError> {
        self.guard_depth(depth)?;
        if self.eat(&Token::Not) {
            let inner = self.unary(depth + 1)?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)));
        }
        if self.eat(&Token::Minus) {
            let inner = self.unary(depth + 1)?;
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(inner)));
        }
        self.postfix(depth)
    }

    fn postfix(&mut self, depth: usize) -> Result<Expr, ExprError> {
        let mut expr = self.primary(depth)?;
        while self.eat(&Token::Dot) {
            let (name, pos) = match self.advance() {
                Some(Spanned { token: Token::Ident(name), pos }) => (name, pos),
                Some(tok) => {
                    return Err(ExprError::Syntax {
                        pos: tok.pos,
                        message: format!("expected method name after '.', found {}", tok.token),
                    })
                }
                None => return Err(self.eof("expected method name after '.'")),
            };
            self.expect(Token::LParen)?;
            let args = self.args(depth + 1, Token::RParen)?;

            if name == "exists" {
                expr = self.lower_exists(expr, args, pos)?;
            } else {
                expr = Expr::Method {
                    recv: Box::new(expr),
                    name,
                    args,
                };
            }
        }
        Ok(expr)
    }

    /// `recv.exists(v, pred)` -- the first argument must be a bare identifier
    /// naming the per-element binding.
    fn lower_exists(&self, recv: Expr, mut args: Vec<Expr>, pos: usize) -> Result<Expr, ExprError> {
        if args.len() != 2 {
            return Err(ExprError::Syntax {
                pos,
                message: format!("exists expects 2 arguments (variable, predicate), found {}", args.len()),
            });
        }
        let pred = args.pop().expect("length checked");
        let var = match args.pop().expect("length checked") {
            Expr::Ident(name) => name,
            _ => {
                return Err(ExprError::Syntax {
                    pos,
                    message: "first argument of exists must be a variable name".into(),
                })
            }
        };
        Ok(Expr::Exists {
            recv: Box::new(recv),
            var,
            pred: Box::new(pred),
        })
    }

    /// Parse a comma-separated argument list up to `closer`.
    fn args(&mut self, depth: usize, closer: Token) -> Result<Vec<Expr>, ExprError> {
        let mut args = Vec::new();
        if self.eat(&closer) {
            return Ok(args);
        }
        loop {
            args.push(self.expr(depth)?);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(closer)?;
            return Ok(args);
        }
    }

    fn primary(&mut self, depth: usize) -> Result<Expr, ExprError> {
        let tok = match self.advance() {
            Some(tok) => tok,
            None => return Err(self.eof("expected expression")),
        };

        match tok.token {
            Token::Int(i) => Ok(Expr::Int(i)),
            Token::Float(x) => Ok(Expr::Float(x)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::True => Ok(Expr::Bool(true)),
            Token::False => Ok(Expr::Bool(false)),
            Token::LParen => {
                let inner = self.expr(depth + 1)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => {
                let elems = self.args(depth + 1, Token::RBracket)?;
                Ok(Expr::List(elems))
            }
            Token::Ident(name) => {
                // Free functions: only the numeric casts exist.
                if self.peek().map(|t| &t.token) == Some(&Token::LParen) {
                    self.index += 1;
                    let mut args = self.args(depth + 1, Token::RParen)?;
                    let cast = match name.as_str() {
                        "int" => CastKind::Int,
                        "double" => CastKind::Double,
                        other => {
                            return Err(ExprError::Syntax {
                                pos: tok.pos,
                                message: format!("unknown function '{other}'"),
                            })
                        }
                    };
                    if args.len() != 1 {
                        return Err(ExprError::Syntax {
                            pos: tok.pos,
                            message: format!("{name}() expects exactly one argument"),
                        });
                    }
                    Ok(Expr::Cast(cast, Box::new(args.pop().expect("length checked"))))
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            other => Err(ExprError::Syntax {
                pos: tok.pos,
                message: format!("unexpected {other}"),
            }),
        }
    }
}
