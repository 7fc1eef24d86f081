//! Recursive-descent parser for the Lunet subset.
//!
//! Expressions use precedence climbing with the reference language's
//! operator table (`..` and `^` right-associative, unary binding between
//! the multiplicative and power levels).

use crate::ast::{BinOp, Block, Expr, FunctionProto, Stat, TableItem, Target, UnOp};
use crate::error::{EngineError, EngineResult};
use crate::lexer::{lex, Span, Tok};

/// Parse a source chunk into a parameterless function prototype.
pub fn parse_chunk(src: &str, chunk_name: &str) -> EngineResult<FunctionProto> {
    let tokens = lex(src).map_err(|(message, span)| EngineError::Syntax {
        message,
        chunk: chunk_name.to_string(),
        span,
    })?;
    let mut parser = Parser {
        toks: tokens,
        pos: 0,
        chunk: chunk_name.to_string(),
        end: src.len(),
    };
    let body = parser.block()?;
    if let Some((tok, _)) = parser.toks.get(parser.pos) {
        return Err(parser.error_at(format!("unexpected token {tok:?}")));
    }
    Ok(FunctionProto {
        params: Vec::new(),
        body,
        name: Some(chunk_name.to_string()),
    })
}

struct Parser {
    toks: Vec<(Tok, Span)>,
    pos: usize,
    chunk: String,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos).map(|(t, _)| t)
    }

    fn peek2(&self) -> Option<&Tok> {
        self.toks.get(self.pos + 1).map(|(t, _)| t)
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.toks.get(self.pos).map(|(t, _)| t.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn span(&self) -> Span {
        self.toks
            .get(self.pos)
            .map(|(_, s)| *s)
            .unwrap_or(Span {
                start: self.end,
                end: self.end,
            })
    }

    fn error_at(&self, message: String) -> EngineError {
        EngineError::Syntax {
            message,
            chunk: self.chunk.clone(),
            span: self.span(),
        }
    }

    fn check(&self, tok: &Tok) -> bool {
        self.peek() == Some(tok)
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.check(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Tok, what: &str) -> EngineResult<()> {
        if self.eat(&tok) {
            Ok(())
        } else {
            Err(self.error_at(format!("'{what}' expected")))
        }
    }

    fn name(&mut self) -> EngineResult<String> {
        match self.peek() {
            Some(Tok::Name(n)) => {
                let n = n.clone();
                self.pos += 1;
                Ok(n)
            }
            _ => Err(self.error_at("<name> expected".to_string())),
        }
    }

    fn block_ends(&self) -> bool {
        matches!(
            self.peek(),
            None | Some(Tok::End) | Some(Tok::Else) | Some(Tok::Elseif) | Some(Tok::Until)
        )
    }

    fn block(&mut self) -> EngineResult<Block> {
        let mut stats = Vec::new();
        while !self.block_ends() {
            if self.eat(&Tok::Semi) {
                continue;
            }
            if self.check(&Tok::Return) {
                stats.push(self.return_stat()?);
                while self.eat(&Tok::Semi) {}
                break;
            }
            stats.push(self.statement()?);
        }
        Ok(stats)
    }

    fn return_stat(&mut self) -> EngineResult<Stat> {
        self.expect(Tok::Return, "return")?;
        let mut exprs = Vec::new();
        if !self.block_ends() && !self.check(&Tok::Semi) {
            exprs = self.expr_list()?;
        }
        Ok(Stat::Return(exprs))
    }

    fn statement(&mut self) -> EngineResult<Stat> {
        match self.peek() {
            Some(Tok::Local) => self.local_stat(),
            Some(Tok::If) => self.if_stat(),
            Some(Tok::While) => self.while_stat(),
            Some(Tok::Repeat) => self.repeat_stat(),
            Some(Tok::For) => self.for_stat(),
            Some(Tok::Function) => self.function_stat(),
            Some(Tok::Break) => {
                self.pos += 1;
                Ok(Stat::Break)
            }
            Some(Tok::Do) => {
                self.pos += 1;
                let body = self.block()?;
                self.expect(Tok::End, "end")?;
                Ok(Stat::Do(body))
            }
            _ => self.expr_stat(),
        }
    }

    fn local_stat(&mut self) -> EngineResult<Stat> {
        self.expect(Tok::Local, "local")?;
        if self.eat(&Tok::Function) {
            let name = self.name()?;
            let proto = self.function_body(Some(name.clone()), false)?;
            return Ok(Stat::LocalFunction { name, proto });
        }
        let mut names = vec![self.name()?];
        while self.eat(&Tok::Comma) {
            names.push(self.name()?);
        }
        let exprs = if self.eat(&Tok::Assign) {
            self.expr_list()?
        } else {
            Vec::new()
        };
        Ok(Stat::Local { names, exprs })
    }

    fn if_stat(&mut self) -> EngineResult<Stat> {
        self.expect(Tok::If, "if")?;
        let mut arms = Vec::new();
        let cond = self.expr()?;
        self.expect(Tok::Then, "then")?;
        arms.push((cond, self.block()?));
        let mut else_body = None;
        loop {
            if self.eat(&Tok::Elseif) {
                let cond = self.expr()?;
                self.expect(Tok::Then, "then")?;
                arms.push((cond, self.block()?));
            } else if self.eat(&Tok::Else) {
                else_body = Some(self.block()?);
                self.expect(Tok::End, "end")?;
                break;
            } else {
                self.expect(Tok::End, "end")?;
                break;
            }
        }
        Ok(Stat::If { arms, else_body })
    }

    fn while_stat(&mut self) -> EngineResult<Stat> {
        self.expect(Tok::While, "while")?;
        let cond = self.expr()?;
        self.expect(Tok::Do, "do")?;
        let body = self.block()?;
        self.expect(Tok::End, "end")?;
        Ok(Stat::While { cond, body })
    }

    fn repeat_stat(&mut self) -> EngineResult<Stat> {
        self.expect(Tok::Repeat, "repeat")?;
        let body = self.block()?;
        self.expect(Tok::Until, "until")?;
        let cond = self.expr()?;
        Ok(Stat::Repeat { body, cond })
    }

    fn for_stat(&mut self) -> EngineResult<Stat> {
        self.expect(Tok::For, "for")?;
        let var = self.name()?;
        if self.check(&Tok::In) || self.check(&Tok::Comma) {
            return Err(self.error_at("generic 'for' is not supported".to_string()));
        }
        self.expect(Tok::Assign, "=")?;
        let start = self.expr()?;
        self.expect(Tok::Comma, ",")?;
        let end = self.expr()?;
        let step = if self.eat(&Tok::Comma) {
            Some(self.expr()?)
        } else {
            None
        };
        self.expect(Tok::Do, "do")?;
        let body = self.block()?;
        self.expect(Tok::End, "end")?;
        Ok(Stat::NumericFor {
            var,
            start,
            end,
            step,
            body,
        })
    }

    fn function_stat(&mut self) -> EngineResult<Stat> {
        self.expect(Tok::Function, "function")?;
        let mut path = vec![self.name()?];
        while self.eat(&Tok::Dot) {
            path.push(self.name()?);
        }
        let method = if self.eat(&Tok::Colon) {
            Some(self.name()?)
        } else {
            None
        };
        let display = method.clone().unwrap_or_else(|| {
            path.last().cloned().unwrap_or_default()
        });
        let proto = self.function_body(Some(display), method.is_some())?;
        Ok(Stat::Function {
            path,
            method,
            proto,
        })
    }

    fn function_body(
        &mut self,
        name: Option<String>,
        is_method: bool,
    ) -> EngineResult<FunctionProto> {
        self.expect(Tok::LParen, "(")?;
        let mut params = Vec::new();
        if is_method {
            params.push("self".to_string());
        }
        if !self.check(&Tok::RParen) {
            loop {
                if self.check(&Tok::Ellipsis) {
                    return Err(self.error_at("'...' is not supported".to_string()));
                }
                params.push(self.name()?);
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
        }
        self.expect(Tok::RParen, ")")?;
        let body = self.block()?;
        self.expect(Tok::End, "end")?;
        Ok(FunctionProto { params, body, name })
    }

    fn expr_stat(&mut self) -> EngineResult<Stat> {
        let first = self.suffixed_expr()?;
        if self.check(&Tok::Assign) || self.check(&Tok::Comma) {
            let mut targets = vec![self.as_target(first)?];
            while self.eat(&Tok::Comma) {
                let t = self.suffixed_expr()?;
                targets.push(self.as_target(t)?);
            }
            self.expect(Tok::Assign, "=")?;
            let exprs = self.expr_list()?;
            return Ok(Stat::Assign { targets, exprs });
        }
        if first.is_multi() {
            Ok(Stat::Call(first))
        } else {
            Err(self.error_at("syntax error: expression is not a statement".to_string()))
        }
    }

    fn as_target(&self, e: Expr) -> EngineResult<Target> {
        match e {
            Expr::Name(n) => Ok(Target::Name(n)),
            Expr::Index { obj, key } => Ok(Target::Index {
                obj: *obj,
                key: *key,
            }),
            _ => Err(self.error_at("cannot assign to this expression".to_string())),
        }
    }

    fn expr_list(&mut self) -> EngineResult<Vec<Expr>> {
        let mut exprs = vec![self.expr()?];
        while self.eat(&Tok::Comma) {
            exprs.push(self.expr()?);
        }
        Ok(exprs)
    }

    fn expr(&mut self) -> EngineResult<Expr> {
        self.expr_bp(0)
    }

    /// Binding power of unary operators: tighter than every binary operator
    /// except `^`.
    const UNARY_BP: u8 = 9;

    fn expr_bp(&mut self, min_bp: u8) -> EngineResult<Expr> {
        let mut lhs = match self.peek() {
            Some(Tok::Not) => {
                self.pos += 1;
                Expr::Unary {
                    op: UnOp::Not,
                    expr: Box::new(self.expr_bp(Self::UNARY_BP)?),
                }
            }
            Some(Tok::Minus) => {
                self.pos += 1;
                Expr::Unary {
                    op: UnOp::Neg,
                    expr: Box::new(self.expr_bp(Self::UNARY_BP)?),
                }
            }
            Some(Tok::Hash) => {
                self.pos += 1;
                Expr::Unary {
                    op: UnOp::Len,
                    expr: Box::new(self.expr_bp(Self::UNARY_BP)?),
                }
            }
            _ => self.simple_expr()?,
        };
        while let Some((op, lbp, rbp)) = self.peek_binop() {
            if lbp < min_bp {
                break;
            }
            self.pos += 1;
            let rhs = self.expr_bp(rbp)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn peek_binop(&self) -> Option<(BinOp, u8, u8)> {
        let op = match self.peek()? {
            Tok::Or => (BinOp::Or, 1, 2),
            Tok::And => (BinOp::And, 2, 3),
            Tok::EqEq => (BinOp::Eq, 3, 4),
            Tok::NotEq => (BinOp::Ne, 3, 4),
            Tok::Less => (BinOp::Lt, 3, 4),
            Tok::LessEq => (BinOp::Le, 3, 4),
            Tok::Greater => (BinOp::Gt, 3, 4),
            Tok::GreaterEq => (BinOp::Ge, 3, 4),
            // Right-associative
            Tok::DotDot => (BinOp::Concat, 5, 4),
            Tok::Plus => (BinOp::Add, 6, 7),
            Tok::Minus => (BinOp::Sub, 6, 7),
            Tok::Star => (BinOp::Mul, 7, 8),
            Tok::Slash => (BinOp::Div, 7, 8),
            Tok::Percent => (BinOp::Mod, 7, 8),
            // Right-associative, tighter than unary
            Tok::Caret => (BinOp::Pow, 11, 10),
            _ => return None,
        };
        Some(op)
    }

    fn simple_expr(&mut self) -> EngineResult<Expr> {
        match self.peek() {
            Some(Tok::Nil) => {
                self.pos += 1;
                Ok(Expr::Nil)
            }
            Some(Tok::True) => {
                self.pos += 1;
                Ok(Expr::True)
            }
            Some(Tok::False) => {
                self.pos += 1;
                Ok(Expr::False)
            }
            Some(Tok::Number(n)) => {
                let n = *n;
                self.pos += 1;
                Ok(Expr::Number(n))
            }
            Some(Tok::Str(s)) => {
                let s = s.clone();
                self.pos += 1;
                Ok(Expr::Str(s))
            }
            Some(Tok::Function) => {
                self.pos += 1;
                Ok(Expr::Function(self.function_body(None, false)?))
            }
            Some(Tok::LBrace) => self.table_constructor(),
            _ => self.suffixed_expr(),
        }
    }

    fn suffixed_expr(&mut self) -> EngineResult<Expr> {
        let mut expr = match self.peek() {
            Some(Tok::Name(_)) => Expr::Name(self.name()?),
            Some(Tok::LParen) => {
                self.pos += 1;
                let inner = self.expr()?;
                self.expect(Tok::RParen, ")")?;
                inner
            }
            _ => return Err(self.error_at("unexpected symbol".to_string())),
        };
        loop {
            match self.peek() {
                Some(Tok::Dot) => {
                    self.pos += 1;
                    let key = self.name()?;
                    expr = Expr::Index {
                        obj: Box::new(expr),
                        key: Box::new(Expr::Str(key)),
                    };
                }
                Some(Tok::LBracket) => {
                    self.pos += 1;
                    let key = self.expr()?;
                    self.expect(Tok::RBracket, "]")?;
                    expr = Expr::Index {
                        obj: Box::new(expr),
                        key: Box::new(key),
                    };
                }
                Some(Tok::Colon) => {
                    self.pos += 1;
                    let name = self.name()?;
                    let args = self.call_args()?;
                    expr = Expr::MethodCall {
                        obj: Box::new(expr),
                        name,
                        args,
                    };
                }
                Some(Tok::LParen) => {
                    let args = self.call_args()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn call_args(&mut self) -> EngineResult<Vec<Expr>> {
        self.expect(Tok::LParen, "(")?;
        let args = if self.check(&Tok::RParen) {
            Vec::new()
        } else {
            self.expr_list()?
        };
        self.expect(Tok::RParen, ")")?;
        Ok(args)
    }

    fn table_constructor(&mut self) -> EngineResult<Expr> {
        self.expect(Tok::LBrace, "{")?;
        let mut items = Vec::new();
        while !self.check(&Tok::RBrace) {
            match (self.peek(), self.peek2()) {
                (Some(Tok::LBracket), _) => {
                    self.pos += 1;
                    let key = self.expr()?;
                    self.expect(Tok::RBracket, "]")?;
                    self.expect(Tok::Assign, "=")?;
                    items.push(TableItem::Keyed(key, self.expr()?));
                }
                (Some(Tok::Name(_)), Some(Tok::Assign)) => {
                    let name = self.name()?;
                    self.pos += 1; // consume '='
                    items.push(TableItem::Named(name, self.expr()?));
                }
                _ => items.push(TableItem::Positional(self.expr()?)),
            }
            if !self.eat(&Tok::Comma) && !self.eat(&Tok::Semi) {
                break;
            }
        }
        self.expect(Tok::RBrace, "}")?;
        Ok(Expr::Table(items))
    }
}
