//! Recursive-descent parser for the script subset
//!
//! Locals are resolved while parsing: an identifier that has been assigned
//! earlier in the same scope is a variable read, anything else is a call on
//! self. `def`, `class` and `module` open fresh scopes.

use crate::ast::{BeginBlock, Node, NodeKind, RescueClause, Scope};
use crate::lexer::{tokenize, Spanned, Token};
use crate::ParseError;

type PResult<T> = Result<T, ParseError>;

/// Limit on syntactic nesting, counting brackets, bodies and operator chains
pub const MAX_NESTING: usize = 256;

/// Parse a whole program into its top-level scope.
pub fn parse_program(source: &str) -> PResult<Scope> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        scopes: vec![Vec::new()],
        depth: 0,
    };
    let body = parser.parse_stmts(&[])?;
    let locals = parser.scopes.pop().unwrap_or_default();
    Ok(Scope {
        locals,
        nparams: 0,
        body,
    })
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    scopes: Vec<Vec<String>>,
    depth: usize,
}

impl Parser {
    // ===== Token cursor =====

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_at(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|s| &s.token)
    }

    fn line(&self) -> u32 {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|s| s.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).map(|s| s.token.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, tok: &Token) -> bool {
        self.peek() == Some(tok)
    }

    fn eat(&mut self, tok: &Token) -> bool {
        if self.at(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Token) -> PResult<()> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected {}", tok.describe())))
        }
    }

    fn unexpected(&self, context: &str) -> ParseError {
        let found = match self.peek() {
            Some(tok) => tok.describe(),
            None => "end of input".to_string(),
        };
        ParseError::new(self.line(), format!("{}, found {}", context, found))
    }

    /// Take one level of the nesting budget.
    fn descend(&mut self) -> PResult<()> {
        if self.depth >= MAX_NESTING {
            return Err(ParseError::new(self.line(), "nesting too deep"));
        }
        self.depth += 1;
        Ok(())
    }

    fn skip_newlines(&mut self) {
        while self.eat(&Token::Newline) {}
    }

    fn skip_terms(&mut self) {
        while self.eat(&Token::Newline) || self.eat(&Token::Semicolon) {}
    }

    // ===== Scopes =====

    fn is_local(&self, name: &str) -> bool {
        self.scopes
            .last()
            .map(|s| s.iter().any(|l| l == name))
            .unwrap_or(false)
    }

    fn declare(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            if !scope.iter().any(|l| l == name) {
                scope.push(name.to_string());
            }
        }
    }

    // ===== Statements =====

    fn parse_stmts(&mut self, terminators: &[Token]) -> PResult<Vec<Node>> {
        let mut stmts = Vec::new();
        loop {
            self.skip_terms();
            match self.peek() {
                None => break,
                Some(tok) if terminators.contains(tok) => break,
                _ => {}
            }
            stmts.push(self.parse_stmt()?);
            match self.peek() {
                None | Some(Token::Newline) | Some(Token::Semicolon) => {}
                Some(tok) if terminators.contains(tok) => {}
                _ => return Err(self.unexpected("expected end of statement")),
            }
        }
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> PResult<Node> {
        let base = self.depth;
        let stmt = self.parse_modified_stmt();
        self.depth = base;
        stmt
    }

    fn parse_modified_stmt(&mut self) -> PResult<Node> {
        let mut stmt = self.parse_expr()?;
        loop {
            let line = self.line();
            if matches!(self.peek(), Some(Token::If) | Some(Token::While)) {
                self.descend()?;
            }
            if self.eat(&Token::If) {
                let cond = self.parse_expr()?;
                stmt = Node::new(
                    NodeKind::If {
                        cond: Box::new(cond),
                        then_body: vec![stmt],
                        else_body: vec![],
                    },
                    line,
                );
            } else if self.eat(&Token::While) {
                let cond = self.parse_expr()?;
                stmt = Node::new(
                    NodeKind::While {
                        cond: Box::new(cond),
                        body: vec![stmt],
                    },
                    line,
                );
            } else {
                return Ok(stmt);
            }
        }
    }

    // ===== Expressions =====

    /// Operator chains inside the expression draw on the same budget, so
    /// the depth is restored only once the whole expression is done.
    fn parse_expr(&mut self) -> PResult<Node> {
        let base = self.depth;
        let expr = self.descend().and_then(|_| self.parse_assignment());
        self.depth = base;
        expr
    }

    fn parse_assignment(&mut self) -> PResult<Node> {
        if let (Some(Token::Ident(name)), Some(Token::Assign)) = (self.peek(), self.peek_at(1)) {
            let name = name.clone();
            let line = self.line();
            self.pos += 2;
            self.skip_newlines();
            self.declare(&name);
            let value = self.parse_expr()?;
            return Ok(Node::new(NodeKind::LocalSet(name, Box::new(value)), line));
        }
        let target = self.parse_or()?;
        if !self.at(&Token::Assign) {
            return Ok(target);
        }
        // `recv[i] = v` is a call to `[]=`
        let line = target.line;
        match target.kind {
            NodeKind::Call {
                recv: Some(recv),
                name,
                mut args,
            } if name == "[]" => {
                self.pos += 1;
                self.skip_newlines();
                args.push(self.parse_expr()?);
                Ok(Node::new(
                    NodeKind::Call {
                        recv: Some(recv),
                        name: "[]=".to_string(),
                        args,
                    },
                    line,
                ))
            }
            _ => Err(self.unexpected("invalid assignment target")),
        }
    }

    fn parse_or(&mut self) -> PResult<Node> {
        let mut left = self.parse_and()?;
        while self.at(&Token::OrOr) {
            let line = self.line();
            self.pos += 1;
            self.descend()?;
            self.skip_newlines();
            let right = self.parse_and()?;
            left = Node::new(NodeKind::Or(Box::new(left), Box::new(right)), line);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> PResult<Node> {
        let mut left = self.parse_equality()?;
        while self.at(&Token::AndAnd) {
            let line = self.line();
            self.pos += 1;
            self.descend()?;
            self.skip_newlines();
            let right = self.parse_equality()?;
            left = Node::new(NodeKind::And(Box::new(left), Box::new(right)), line);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> PResult<Node> {
        let mut left = self.parse_comparison()?;
        loop {
            let line = self.line();
            let negate = match self.peek() {
                Some(Token::EqEq) => false,
                Some(Token::NotEq) => true,
                _ => return Ok(left),
            };
            self.pos += 1;
            self.descend()?;
            self.skip_newlines();
            let right = self.parse_comparison()?;
            let eq = binary_call(left, "==", right, line);
            left = if negate {
                Node::new(NodeKind::Not(Box::new(eq)), line)
            } else {
                eq
            };
        }
    }

    fn parse_comparison(&mut self) -> PResult<Node> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => "<",
                Some(Token::Gt) => ">",
                Some(Token::LtEq) => "<=",
                Some(Token::GtEq) => ">=",
                _ => return Ok(left),
            };
            let line = self.line();
            self.pos += 1;
            self.descend()?;
            self.skip_newlines();
            let right = self.parse_additive()?;
            left = binary_call(left, op, right, line);
        }
    }

    fn parse_additive(&mut self) -> PResult<Node> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => "+",
                Some(Token::Minus) => "-",
                _ => return Ok(left),
            };
            let line = self.line();
            self.pos += 1;
            self.descend()?;
            self.skip_newlines();
            let right = self.parse_multiplicative()?;
            left = binary_call(left, op, right, line);
        }
    }

    fn parse_multiplicative(&mut self) -> PResult<Node> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => "*",
                Some(Token::Slash) => "/",
                Some(Token::Percent) => "%",
                _ => return Ok(left),
            };
            let line = self.line();
            self.pos += 1;
            self.descend()?;
            self.skip_newlines();
            let right = self.parse_unary()?;
            left = binary_call(left, op, right, line);
        }
    }

    fn parse_unary(&mut self) -> PResult<Node> {
        let line = self.line();
        if self.eat(&Token::Bang) {
            self.descend()?;
            let operand = self.parse_unary()?;
            return Ok(Node::new(NodeKind::Not(Box::new(operand)), line));
        }
        if self.eat(&Token::Minus) {
            self.descend()?;
            let operand = self.parse_unary()?;
            let kind = match operand.kind {
                NodeKind::Int(i) => NodeKind::Int(i.wrapping_neg()),
                NodeKind::Float(f) => NodeKind::Float(-f),
                _ => NodeKind::Call {
                    recv: Some(Box::new(operand)),
                    name: "-@".to_string(),
                    args: vec![],
                },
            };
            return Ok(Node::new(kind, line));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> PResult<Node> {
        let mut node = self.parse_primary()?;
        loop {
            if self.at(&Token::LBracket) {
                let line = self.line();
                self.pos += 1;
                self.descend()?;
                let args = self.parse_list(&Token::RBracket)?;
                node = Node::new(
                    NodeKind::Call {
                        recv: Some(Box::new(node)),
                        name: "[]".to_string(),
                        args,
                    },
                    line,
                );
                continue;
            }
            // Allow method chains to continue on the next line.
            let mut lookahead = 0;
            while self.peek_at(lookahead) == Some(&Token::Newline) {
                lookahead += 1;
            }
            if self.peek_at(lookahead) != Some(&Token::Dot) {
                return Ok(node);
            }
            self.pos += lookahead + 1;
            self.descend()?;
            self.skip_newlines();
            let line = self.line();
            let name = match self.advance() {
                Some(Token::Ident(n)) | Some(Token::Const(n)) => n,
                Some(Token::Class) => "class".to_string(),
                _ => {
                    self.pos -= 1;
                    return Err(self.unexpected("expected method name after '.'"));
                }
            };
            // `recv.name[i]` indexes the result
            let args = if self.at(&Token::LBracket) {
                Vec::new()
            } else {
                self.parse_call_args()?
            };
            node = Node::new(
                NodeKind::Call {
                    recv: Some(Box::new(node)),
                    name,
                    args,
                },
                line,
            );
        }
    }

    /// Comma-separated expressions up to `close`, whose opener is already
    /// consumed
    fn parse_list(&mut self, close: &Token) -> PResult<Vec<Node>> {
        let mut items = Vec::new();
        self.skip_newlines();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_expr()?);
            self.skip_newlines();
            if self.eat(&Token::Comma) {
                self.skip_newlines();
                continue;
            }
            self.expect(close)?;
            return Ok(items);
        }
    }

    fn parse_call_args(&mut self) -> PResult<Vec<Node>> {
        let mut args = Vec::new();
        if self.eat(&Token::LParen) {
            return self.parse_list(&Token::RParen);
        }
        if !self.peek().map(starts_command_arg).unwrap_or(false) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            if !self.eat(&Token::Comma) {
                return Ok(args);
            }
            self.skip_newlines();
        }
    }

    fn parse_primary(&mut self) -> PResult<Node> {
        let line = self.line();
        let Some(tok) = self.advance() else {
            return Err(self.unexpected("expected expression"));
        };
        let kind = match tok {
            Token::Int(i) => NodeKind::Int(i),
            Token::Float(f) => NodeKind::Float(f),
            Token::Str(s) => NodeKind::Str(s),
            Token::Symbol(s) => NodeKind::Sym(s),
            Token::Nil => NodeKind::Nil,
            Token::True => NodeKind::True,
            Token::False => NodeKind::False,
            Token::SelfKw => NodeKind::SelfRef,
            Token::Const(name) => NodeKind::Const(name),
            Token::Ident(name) => {
                if self.is_local(&name) && !self.at(&Token::LParen) {
                    NodeKind::LocalGet(name)
                } else {
                    let args = self.parse_call_args()?;
                    NodeKind::Call {
                        recv: None,
                        name,
                        args,
                    }
                }
            }
            Token::LParen => {
                let mut stmts = self.parse_stmts(&[Token::RParen])?;
                self.expect(&Token::RParen)?;
                if stmts.len() == 1 {
                    return Ok(stmts.remove(0));
                }
                NodeKind::Seq(stmts)
            }
            Token::LBracket => NodeKind::Array(self.parse_list(&Token::RBracket)?),
            Token::If => return self.parse_if_tail(line),
            Token::While => {
                let cond = self.parse_expr()?;
                self.eat(&Token::Do);
                let body = self.parse_stmts(&[Token::End])?;
                self.expect(&Token::End)?;
                NodeKind::While {
                    cond: Box::new(cond),
                    body,
                }
            }
            Token::Begin => {
                let block = self.parse_begin_body()?;
                self.expect(&Token::End)?;
                if block.rescues.is_empty() {
                    NodeKind::Seq(block.body)
                } else {
                    NodeKind::Begin(Box::new(block))
                }
            }
            Token::Def => return self.parse_def(line),
            Token::Class => return self.parse_class(line),
            Token::Module => return self.parse_module(line),
            Token::Return => {
                let value = if self.peek().map(starts_expr).unwrap_or(false) {
                    Some(Box::new(self.parse_expr()?))
                } else {
                    None
                };
                NodeKind::Return(value)
            }
            _ => {
                self.pos -= 1;
                return Err(self.unexpected("expected expression"));
            }
        };
        Ok(Node::new(kind, line))
    }

    /// `if`/`elsif` already consumed
    fn parse_if_tail(&mut self, line: u32) -> PResult<Node> {
        let cond = self.parse_expr()?;
        self.eat(&Token::Then);
        let then_body = self.parse_stmts(&[Token::Elsif, Token::Else, Token::End])?;
        let else_body = match self.peek() {
            Some(Token::Elsif) => {
                let elsif_line = self.line();
                self.pos += 1;
                vec![self.parse_if_tail(elsif_line)?]
            }
            Some(Token::Else) => {
                self.pos += 1;
                let body = self.parse_stmts(&[Token::End])?;
                self.expect(&Token::End)?;
                body
            }
            _ => {
                self.expect(&Token::End)?;
                vec![]
            }
        };
        Ok(Node::new(
            NodeKind::If {
                cond: Box::new(cond),
                then_body,
                else_body,
            },
            line,
        ))
    }

    /// Body up to, not including, the closing `end`
    fn parse_begin_body(&mut self) -> PResult<BeginBlock> {
        let body = self.parse_stmts(&[Token::Rescue, Token::End])?;
        let mut rescues = Vec::new();
        while self.at(&Token::Rescue) {
            let line = self.line();
            self.pos += 1;
            let mut classes = Vec::new();
            while let Some(Token::Const(name)) = self.peek() {
                classes.push(Node::new(NodeKind::Const(name.clone()), self.line()));
                self.pos += 1;
                if !self.eat(&Token::Comma) {
                    break;
                }
                self.skip_newlines();
            }
            let var = if self.eat(&Token::FatArrow) {
                match self.advance() {
                    Some(Token::Ident(name)) => {
                        self.declare(&name);
                        Some(name)
                    }
                    _ => {
                        self.pos -= 1;
                        return Err(self.unexpected("expected variable name after '=>'"));
                    }
                }
            } else {
                None
            };
            self.eat(&Token::Then);
            let body = self.parse_stmts(&[Token::Rescue, Token::End])?;
            rescues.push(RescueClause {
                classes,
                var,
                body,
                line,
            });
        }
        Ok(BeginBlock { body, rescues })
    }

    fn parse_def(&mut self, line: u32) -> PResult<Node> {
        let singleton = self.at(&Token::SelfKw) && self.peek_at(1) == Some(&Token::Dot);
        if singleton {
            self.pos += 2;
        }
        let name = match self.advance() {
            Some(Token::Ident(n)) | Some(Token::Const(n)) => n,
            Some(Token::EqEq) => "==".to_string(),
            Some(Token::Plus) => "+".to_string(),
            Some(Token::Minus) => "-".to_string(),
            Some(Token::Star) => "*".to_string(),
            Some(Token::Slash) => "/".to_string(),
            Some(Token::Percent) => "%".to_string(),
            Some(Token::Lt) => "<".to_string(),
            Some(Token::Gt) => ">".to_string(),
            Some(Token::LtEq) => "<=".to_string(),
            Some(Token::GtEq) => ">=".to_string(),
            _ => {
                self.pos = self.pos.saturating_sub(1);
                return Err(self.unexpected("expected method name"));
            }
        };

        self.scopes.push(Vec::new());
        let mut nparams = 0;
        if self.eat(&Token::LParen) {
            self.skip_newlines();
            if !self.eat(&Token::RParen) {
                loop {
                    nparams += self.parse_param()?;
                    self.skip_newlines();
                    if self.eat(&Token::Comma) {
                        self.skip_newlines();
                        continue;
                    }
                    self.expect(&Token::RParen)?;
                    break;
                }
            }
        } else if matches!(self.peek(), Some(Token::Ident(_))) {
            loop {
                nparams += self.parse_param()?;
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }

        let block = self.parse_begin_body()?;
        self.expect(&Token::End)?;
        let locals = self.scopes.pop().unwrap_or_default();
        let body = if block.rescues.is_empty() {
            block.body
        } else {
            vec![Node::new(NodeKind::Begin(Box::new(block)), line)]
        };
        Ok(Node::new(
            NodeKind::Def {
                name,
                singleton,
                scope: Box::new(Scope {
                    locals,
                    nparams,
                    body,
                }),
            },
            line,
        ))
    }

    fn parse_param(&mut self) -> PResult<usize> {
        match self.advance() {
            Some(Token::Ident(p)) => {
                if self.is_local(&p) {
                    return Err(ParseError::new(
                        self.line(),
                        format!("duplicated argument name '{}'", p),
                    ));
                }
                self.declare(&p);
                Ok(1)
            }
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.unexpected("expected parameter name"))
            }
        }
    }

    fn parse_class(&mut self, line: u32) -> PResult<Node> {
        let name = self.parse_const_name("class")?;
        let superclass = if self.eat(&Token::Lt) {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };
        let scope = self.parse_body_scope()?;
        Ok(Node::new(
            NodeKind::Class {
                name,
                superclass,
                scope: Box::new(scope),
            },
            line,
        ))
    }

    fn parse_module(&mut self, line: u32) -> PResult<Node> {
        let name = self.parse_const_name("module")?;
        let scope = self.parse_body_scope()?;
        Ok(Node::new(
            NodeKind::Module {
                name,
                scope: Box::new(scope),
            },
            line,
        ))
    }

    fn parse_const_name(&mut self, what: &str) -> PResult<String> {
        match self.advance() {
            Some(Token::Const(name)) => Ok(name),
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.unexpected(&format!("{} name must be a constant", what)))
            }
        }
    }

    fn parse_body_scope(&mut self) -> PResult<Scope> {
        self.scopes.push(Vec::new());
        let body = self.parse_stmts(&[Token::End])?;
        self.expect(&Token::End)?;
        let locals = self.scopes.pop().unwrap_or_default();
        Ok(Scope {
            locals,
            nparams: 0,
            body,
        })
    }
}

fn binary_call(left: Node, op: &str, right: Node, line: u32) -> Node {
    Node::new(
        NodeKind::Call {
            recv: Some(Box::new(left)),
            name: op.to_string(),
            args: vec![right],
        },
        line,
    )
}

fn starts_command_arg(tok: &Token) -> bool {
    matches!(
        tok,
        Token::Int(_)
            | Token::Float(_)
            | Token::Str(_)
            | Token::Symbol(_)
            | Token::Ident(_)
            | Token::Const(_)
            | Token::Nil
            | Token::True
            | Token::False
            | Token::SelfKw
            | Token::Bang
            | Token::LBracket
    )
}

fn starts_expr(tok: &Token) -> bool {
    starts_command_arg(tok)
        || matches!(
            tok,
            Token::LParen
                | Token::Minus
                | Token::If
                | Token::While
                | Token::Begin
                | Token::Def
                | Token::Class
                | Token::Module
        )
}
