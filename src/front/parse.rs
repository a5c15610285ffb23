//! The parser: recursive-descent over the restricted C grammar (see the
//! module docs in [`super::lex`] for the lexical grammar), producing the
//! [`Program`] AST the compiler lowers.
//!
//! ```text
//! program    := "int" "main" "(" ")" "{" stmt* "}"
//! stmt       := decl | "return" expr ";" | expr ";"
//! decl       := "int" ident ("=" expr)? ";"
//! expr       := assign
//! assign     := logic_or (assign_op assign)?
//! logic_or   := logic_and ("||" logic_and)*
//! logic_and  := equality ("&&" equality)*
//! equality   := relational (("==" | "!=") relational)*
//! relational := bitor (("<" | ">" | "<=" | ">=") bitor)*
//! bitor      := bitxor ("|" bitxor)*
//! bitxor     := bitand ("^" bitand)*
//! bitand     := shift ("&" shift)*
//! shift      := additive (("<<" | ">>") additive)*
//! additive   := multiplicative (("+" | "-") multiplicative)*
//! multiplicative := unary (("*" | "/" | "%") unary)*
//! unary      := ("-" | "!") unary | primary
//! primary    := INT | IDENT | "(" expr ")"
//! ```

use std::fmt::Debug;

use derive_more::derive::Display;

use super::ast::*;
use super::lex::{lex_all, LexError, Token, TokenKind};
use crate::common::Id;

#[derive(Display)]
#[display("Parse error: {}", self.0)]
pub struct ParseError(String);

impl Debug for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl std::error::Error for ParseError {}

impl From<LexError> for ParseError {
    fn from(e: LexError) -> Self {
        ParseError(e.to_string())
    }
}

pub fn parse(input: &str) -> Result<Program, ParseError> {
    let tokens = lex_all(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        input_len: input.len(),
    };
    let program = parser.program()?;
    parser.expect_eof()?;
    Ok(program)
}

struct Parser<'src> {
    tokens: Vec<Token<'src>>,
    pos: usize,
    input_len: usize,
}

impl<'src> Parser<'src> {
    fn peek(&self) -> Option<Token<'src>> {
        self.tokens.get(self.pos).copied()
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind())
    }

    fn advance(&mut self) -> Option<Token<'src>> {
        let tok = self.peek();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn error_at(&self, msg: impl Into<String>) -> ParseError {
        let pos = self.peek().map(|t| t.pos()).unwrap_or(self.input_len);
        ParseError(format!("{} (at byte offset {pos})", msg.into()))
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token<'src>, ParseError> {
        match self.peek() {
            Some(t) if t.kind() == kind => {
                self.advance();
                Ok(t)
            }
            Some(t) => Err(self.error_at(format!("expected {kind}, found {}", t.text()))),
            None => Err(self.error_at(format!("expected {kind}, found end of input"))),
        }
    }

    /// Expect an identifier token whose text equals `word` (used for the
    /// `int`/`return`/`main` keywords, which the lexer does not special-case).
    fn expect_word(&mut self, word: &str) -> Result<(), ParseError> {
        match self.peek() {
            Some(t) if t.kind() == TokenKind::Id && t.text() == word => {
                self.advance();
                Ok(())
            }
            Some(t) => Err(self.error_at(format!("expected '{word}', found {}", t.text()))),
            None => Err(self.error_at(format!("expected '{word}', found end of input"))),
        }
    }

    fn match_kind(&mut self, kind: TokenKind) -> bool {
        if self.peek_kind() == Some(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_eof(&self) -> Result<(), ParseError> {
        match self.peek() {
            None => Ok(()),
            Some(t) => Err(self.error_at(format!("unexpected trailing token {}", t.text()))),
        }
    }

    fn program(&mut self) -> Result<Program, ParseError> {
        self.expect_word("int")?;
        self.expect_word("main")?;
        self.expect(TokenKind::LParen)?;
        self.expect(TokenKind::RParen)?;
        let body = self.block()?;
        Ok(Program {
            main: FuncDef {
                name: Id::new("main".to_string()),
                body,
            },
        })
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while self.peek_kind() != Some(TokenKind::RBrace) {
            if self.peek().is_none() {
                return Err(self.error_at("unterminated block, expected '}'"));
            }
            stmts.push(self.stmt()?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(stmts)
    }

    fn stmt(&mut self) -> Result<Stmt, ParseError> {
        if self.is_int_keyword() {
            return self.decl();
        }
        if self.peek_kind() == Some(TokenKind::Id)
            && self.peek().map(|t| t.text()) == Some("return")
        {
            self.advance();
            let expr = self.expr()?;
            self.expect(TokenKind::Semi)?;
            return Ok(Stmt::Return(expr));
        }
        let expr = self.expr()?;
        self.expect(TokenKind::Semi)?;
        Ok(Stmt::Expr(expr))
    }

    fn is_int_keyword(&self) -> bool {
        self.peek_kind() == Some(TokenKind::Id) && self.peek().map(|t| t.text()) == Some("int")
    }

    fn decl(&mut self) -> Result<Stmt, ParseError> {
        self.expect_word("int")?;
        let name_tok = self.expect(TokenKind::Id)?;
        let name = Id::new(name_tok.text().to_string());
        let init = if self.match_kind(TokenKind::Assign) {
            Some(self.expr()?)
        } else {
            None
        };
        self.expect(TokenKind::Semi)?;
        Ok(Stmt::Decl { name, init })
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        self.assign()
    }

    fn assign(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.logic_or()?;
        let op = match self.peek_kind() {
            Some(TokenKind::Assign) => Some(None),
            Some(TokenKind::PlusAssign) => Some(Some(BinOp::Add)),
            Some(TokenKind::MinusAssign) => Some(Some(BinOp::Sub)),
            Some(TokenKind::StarAssign) => Some(Some(BinOp::Mul)),
            Some(TokenKind::SlashAssign) => Some(Some(BinOp::Div)),
            Some(TokenKind::PercentAssign) => Some(Some(BinOp::Mod)),
            Some(TokenKind::AmpAssign) => Some(Some(BinOp::And)),
            Some(TokenKind::PipeAssign) => Some(Some(BinOp::Or)),
            Some(TokenKind::CaretAssign) => Some(Some(BinOp::Xor)),
            Some(TokenKind::ShlAssign) => Some(Some(BinOp::Shl)),
            Some(TokenKind::ShrAssign) => Some(Some(BinOp::Shr)),
            _ => None,
        };
        let Some(op) = op else {
            return Ok(lhs);
        };
        if !matches!(lhs, Expr::Id(_)) {
            return Err(self.error_at("left-hand side of assignment must be a variable"));
        }
        self.advance();
        let rvalue = self.assign()?;
        Ok(Expr::Assign {
            op,
            lvalue: Box::new(lhs),
            rvalue: Box::new(rvalue),
        })
    }

    /// Parse a left-associative chain at one precedence level: `next`
    /// parses the higher-precedence operand, `ops` maps a token kind to the
    /// `BinOp` it represents at this level.
    fn binary_level(
        &mut self,
        next: impl Fn(&mut Self) -> Result<Expr, ParseError>,
        ops: &[(TokenKind, BinOp)],
    ) -> Result<Expr, ParseError> {
        let mut lhs = next(self)?;
        loop {
            let Some(kind) = self.peek_kind() else { break };
            let Some(&(_, op)) = ops.iter().find(|(k, _)| *k == kind) else {
                break;
            };
            self.advance();
            let rhs = next(self)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn logic_or(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(Self::logic_and, &[(TokenKind::OrOr, BinOp::LogOr)])
    }

    fn logic_and(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(Self::equality, &[(TokenKind::AndAnd, BinOp::LogAnd)])
    }

    fn equality(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            Self::relational,
            &[(TokenKind::EqEq, BinOp::Eq), (TokenKind::NotEq, BinOp::Ne)],
        )
    }

    fn relational(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            Self::bitor,
            &[
                (TokenKind::Lt, BinOp::Lt),
                (TokenKind::Gt, BinOp::Gt),
                (TokenKind::LtEq, BinOp::Le),
                (TokenKind::GtEq, BinOp::Ge),
            ],
        )
    }

    fn bitor(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(Self::bitxor, &[(TokenKind::Pipe, BinOp::Or)])
    }

    fn bitxor(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(Self::bitand, &[(TokenKind::Caret, BinOp::Xor)])
    }

    fn bitand(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(Self::shift, &[(TokenKind::Amp, BinOp::And)])
    }

    fn shift(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            Self::additive,
            &[(TokenKind::Shl, BinOp::Shl), (TokenKind::Shr, BinOp::Shr)],
        )
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            Self::multiplicative,
            &[(TokenKind::Plus, BinOp::Add), (TokenKind::Minus, BinOp::Sub)],
        )
    }

    fn multiplicative(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            Self::unary,
            &[
                (TokenKind::Star, BinOp::Mul),
                (TokenKind::Slash, BinOp::Div),
                (TokenKind::Percent, BinOp::Mod),
            ],
        )
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek_kind() {
            Some(TokenKind::Minus) => Some(UnOp::Neg),
            Some(TokenKind::Bang) => Some(UnOp::Not),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let expr = self.unary()?;
            return Ok(Expr::Unary {
                op,
                expr: Box::new(expr),
            });
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Some(t) if t.kind() == TokenKind::Num => {
                self.advance();
                let value = t
                    .text()
                    .parse::<i64>()
                    .map_err(|_| self.error_at(format!("invalid integer literal {}", t.text())))?;
                Ok(Expr::Const(value))
            }
            Some(t) if t.kind() == TokenKind::Id => {
                self.advance();
                Ok(Expr::Id(Id::new(t.text().to_string())))
            }
            Some(t) if t.kind() == TokenKind::LParen => {
                self.advance();
                let e = self.expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(e)
            }
            Some(t) => Err(self.error_at(format!("unexpected token {}", t.text()))),
            None => Err(self.error_at("unexpected end of input")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stmts(src: &str) -> Vec<Stmt> {
        parse(src).unwrap().main.body
    }

    #[test]
    fn parses_constant_return() {
        let body = stmts("int main(){ return 2+3*4; }");
        assert_eq!(body.len(), 1);
        assert!(matches!(body[0], Stmt::Return(_)));
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let body = stmts("int main(){ return 2+3*4; }");
        match &body[0] {
            Stmt::Return(Expr::Binary {
                op: BinOp::Add,
                rhs,
                ..
            }) => {
                assert!(matches!(**rhs, Expr::Binary { op: BinOp::Mul, .. }));
            }
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    #[test]
    fn parses_decl_and_compound_assignment() {
        let body = stmts("int main(){ int a=3; int b=4; a+=b; return a*b; }");
        assert_eq!(body.len(), 4);
        assert!(matches!(body[0], Stmt::Decl { init: Some(_), .. }));
        match &body[2] {
            Stmt::Expr(Expr::Assign { op: Some(BinOp::Add), .. }) => {}
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    #[test]
    fn rejects_non_identifier_lvalue() {
        assert!(parse("int main(){ 1 = 2; return 0; }").is_err());
    }

    #[test]
    fn rejects_unterminated_block() {
        assert!(parse("int main(){ return 0;").is_err());
    }

    #[test]
    fn rejects_non_main_function_name() {
        assert!(parse("int foo(){ return 0; }").is_err());
    }
}

impl std::fmt::Debug for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Const(v) => write!(f, "{v}"),
            Expr::Id(id) => write!(f, "{id}"),
            Expr::Unary { op, expr } => write!(f, "({op:?} {expr:?})"),
            Expr::Binary { op, lhs, rhs } => write!(f, "({lhs:?} {op:?} {rhs:?})"),
            Expr::Assign { op, lvalue, rvalue } => write!(f, "({lvalue:?} {op:?}= {rvalue:?})"),
        }
    }
}
