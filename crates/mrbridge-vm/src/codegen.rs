//! Bytecode generation from the syntax tree
//!
//! Every expression leaves exactly one value on the operand stack; the
//! generator tracks the compile-time depth so exception handlers know where
//! to cut the stack back to.

use crate::ast::{BeginBlock, Node, NodeKind, Scope};
use crate::irep::{CatchHandler, DebugInfo, Irep, LineEntry, PoolValue};
use crate::opcode::{IseqWriter, Opcode};
use crate::symbol::{Sym, SymbolTable};
use crate::ParseError;
use std::rc::Rc;

type CResult<T> = Result<T, ParseError>;

const MAX_NESTING: usize = 1024;

/// Compile a parsed scope into a procedure.
///
/// Names are interned into `symbols`. Line information is recorded only
/// when `debug_info` is set; local names are always recorded.
pub fn compile_scope(
    symbols: &mut SymbolTable,
    scope: &Scope,
    filename: &str,
    debug_info: bool,
) -> CResult<Irep> {
    compile_nested(symbols, scope, filename, debug_info, 0)
}

fn compile_nested(
    symbols: &mut SymbolTable,
    scope: &Scope,
    filename: &str,
    debug_info: bool,
    nesting: usize,
) -> CResult<Irep> {
    let mut builder = Builder {
        symbols,
        filename,
        debug_info,
        locals: &scope.locals,
        w: IseqWriter::new(),
        pool: Vec::new(),
        syms: Vec::new(),
        handlers: Vec::new(),
        lines: Vec::new(),
        reps: Vec::new(),
        depth: 0,
        nesting,
    };
    builder.compile_body(&scope.body)?;
    builder.w.emit(Opcode::Return);
    builder.finish(scope)
}

struct Builder<'a> {
    symbols: &'a mut SymbolTable,
    filename: &'a str,
    debug_info: bool,
    locals: &'a [String],
    w: IseqWriter,
    pool: Vec<PoolValue>,
    syms: Vec<Sym>,
    handlers: Vec<CatchHandler>,
    lines: Vec<LineEntry>,
    reps: Vec<Rc<Irep>>,
    depth: usize,
    nesting: usize,
}

impl Builder<'_> {
    fn finish(self, scope: &Scope) -> CResult<Irep> {
        let nlocals = u16::try_from(scope.locals.len() + 1)
            .map_err(|_| ParseError::new(0, "too many local variables"))?;
        let lv = scope
            .locals
            .iter()
            .map(|name| Some(self.symbols.intern_str(name)))
            .collect();
        let debug = self.debug_info.then(|| DebugInfo {
            filename: self.filename.to_string(),
            lines: self.lines,
        });
        Ok(Irep {
            nlocals,
            nparams: scope.nparams as u16,
            iseq: self.w.into_bytes(),
            pool: self.pool,
            syms: self.syms,
            lv: Some(lv),
            handlers: self.handlers,
            debug,
            reps: self.reps,
        })
    }

    // ===== Tables =====

    fn sym(&mut self, name: &str, line: u32) -> CResult<u16> {
        let sym = self.symbols.intern_str(name);
        if let Some(i) = self.syms.iter().position(|s| *s == sym) {
            return Ok(i as u16);
        }
        let idx = u16::try_from(self.syms.len())
            .map_err(|_| ParseError::new(line, "too many symbols in one body"))?;
        self.syms.push(sym);
        Ok(idx)
    }

    fn literal(&mut self, value: PoolValue, line: u32) -> CResult<u16> {
        if let Some(i) = self.pool.iter().position(|p| *p == value) {
            return Ok(i as u16);
        }
        let idx = u16::try_from(self.pool.len())
            .map_err(|_| ParseError::new(line, "too many literals in one body"))?;
        self.pool.push(value);
        Ok(idx)
    }

    fn child(&mut self, scope: &Scope, line: u32) -> CResult<u16> {
        let irep = compile_nested(
            self.symbols,
            scope,
            self.filename,
            self.debug_info,
            self.nesting,
        )?;
        let idx = u16::try_from(self.reps.len())
            .map_err(|_| ParseError::new(line, "too many nested bodies"))?;
        self.reps.push(Rc::new(irep));
        Ok(idx)
    }

    fn slot(&self, name: &str, line: u32) -> CResult<u16> {
        self.locals
            .iter()
            .position(|l| l == name)
            .map(|i| (i + 1) as u16)
            .ok_or_else(|| ParseError::new(line, format!("undefined local variable '{}'", name)))
    }

    fn mark_line(&mut self, line: u32) {
        if !self.debug_info {
            return;
        }
        let pc = self.w.offset() as u32;
        let line = line.min(u16::MAX as u32) as u16;
        match self.lines.last_mut() {
            Some(last) if last.line == line => {}
            Some(last) if last.pc == pc => last.line = line,
            _ => self.lines.push(LineEntry { pc, line }),
        }
    }

    // ===== Emission with depth tracking =====

    fn op(&mut self, op: Opcode, delta: isize) {
        self.w.emit(op);
        self.adjust(delta);
    }

    fn adjust(&mut self, delta: isize) {
        self.depth = (self.depth as isize + delta).max(0) as usize;
    }

    fn jump(&mut self, op: Opcode) -> usize {
        let at = self.w.emit_jump(op);
        if op != Opcode::Jmp {
            self.adjust(-1);
        }
        at
    }

    fn land(&mut self, at: usize) {
        let here = self.w.offset();
        self.w.patch(at, here);
    }

    // ===== Nodes =====

    fn compile_body(&mut self, stmts: &[Node]) -> CResult<()> {
        if stmts.is_empty() {
            self.op(Opcode::LoadNil, 1);
            return Ok(());
        }
        for (i, stmt) in stmts.iter().enumerate() {
            self.mark_line(stmt.line);
            self.compile(stmt)?;
            if i + 1 < stmts.len() {
                self.op(Opcode::Pop, -1);
            }
        }
        Ok(())
    }

    fn compile(&mut self, node: &Node) -> CResult<()> {
        if self.nesting >= MAX_NESTING {
            return Err(ParseError::new(node.line, "nesting too deep"));
        }
        self.nesting += 1;
        let result = self.compile_node(node);
        self.nesting -= 1;
        result
    }

    fn compile_node(&mut self, node: &Node) -> CResult<()> {
        let line = node.line;
        match &node.kind {
            NodeKind::Nil => self.op(Opcode::LoadNil, 1),
            NodeKind::True => self.op(Opcode::LoadTrue, 1),
            NodeKind::False => self.op(Opcode::LoadFalse, 1),
            NodeKind::SelfRef => self.op(Opcode::LoadSelf, 1),
            NodeKind::Int(i) => match i32::try_from(*i) {
                Ok(small) => {
                    self.w.emit_i32(Opcode::LoadI, small);
                    self.adjust(1);
                }
                Err(_) => {
                    let idx = self.literal(PoolValue::Int(*i), line)?;
                    self.w.emit_u16(Opcode::LoadL, idx);
                    self.adjust(1);
                }
            },
            NodeKind::Float(f) => {
                let idx = self.literal(PoolValue::Float(*f), line)?;
                self.w.emit_u16(Opcode::LoadL, idx);
                self.adjust(1);
            }
            NodeKind::Str(s) => {
                let idx = self.literal(PoolValue::Str(s.as_bytes().to_vec()), line)?;
                self.w.emit_u16(Opcode::LoadL, idx);
                self.adjust(1);
            }
            NodeKind::Sym(s) => {
                let idx = self.sym(s, line)?;
                self.w.emit_u16(Opcode::LoadSym, idx);
                self.adjust(1);
            }
            NodeKind::LocalGet(name) => {
                let slot = self.slot(name, line)?;
                self.w.emit_u16(Opcode::GetLocal, slot);
                self.adjust(1);
            }
            NodeKind::LocalSet(name, value) => {
                self.compile(value)?;
                let slot = self.slot(name, line)?;
                self.w.emit_u16(Opcode::SetLocal, slot);
            }
            NodeKind::Const(name) => {
                let idx = self.sym(name, line)?;
                self.w.emit_u16(Opcode::GetConst, idx);
                self.adjust(1);
            }
            NodeKind::Call { recv, name, args } => {
                let argc = u8::try_from(args.len())
                    .map_err(|_| ParseError::new(line, "too many arguments"))?;
                if let Some(recv) = recv {
                    self.compile(recv)?;
                }
                for arg in args {
                    self.compile(arg)?;
                }
                let idx = self.sym(name, line)?;
                self.mark_line(line);
                if recv.is_some() {
                    self.w.emit_u16_u8(Opcode::Send, idx, argc);
                    self.adjust(-(argc as isize));
                } else {
                    self.w.emit_u16_u8(Opcode::SSend, idx, argc);
                    self.adjust(1 - argc as isize);
                }
            }
            NodeKind::And(left, right) | NodeKind::Or(left, right) => {
                let op = if matches!(node.kind, NodeKind::And(..)) {
                    Opcode::JmpNot
                } else {
                    Opcode::JmpIf
                };
                self.compile(left)?;
                self.op(Opcode::Dup, 1);
                let short = self.jump(op);
                self.op(Opcode::Pop, -1);
                self.compile(right)?;
                self.land(short);
            }
            NodeKind::Not(operand) => {
                self.compile(operand)?;
                self.op(Opcode::Not, 0);
            }
            NodeKind::If {
                cond,
                then_body,
                else_body,
            } => {
                self.compile(cond)?;
                let to_else = self.jump(Opcode::JmpNot);
                let base = self.depth;
                self.compile_body(then_body)?;
                let to_end = self.jump(Opcode::Jmp);
                self.land(to_else);
                self.depth = base;
                self.compile_body(else_body)?;
                self.land(to_end);
            }
            NodeKind::While { cond, body } => {
                let top = self.w.offset();
                self.compile(cond)?;
                let exit = self.jump(Opcode::JmpNot);
                self.compile_body(body)?;
                self.op(Opcode::Pop, -1);
                self.w.emit_jump_to(Opcode::Jmp, top);
                self.land(exit);
                self.op(Opcode::LoadNil, 1);
            }
            NodeKind::Begin(block) => self.compile_begin(block)?,
            NodeKind::Def {
                name,
                singleton,
                scope,
            } => {
                let idx = self.sym(name, line)?;
                let child = self.child(scope, line)?;
                let op = if *singleton { Opcode::SDef } else { Opcode::Def };
                self.mark_line(line);
                self.w.emit_u16_u16(op, idx, child);
                self.adjust(1);
            }
            NodeKind::Array(items) => {
                let count = u16::try_from(items.len())
                    .map_err(|_| ParseError::new(line, "too many array elements"))?;
                for item in items {
                    self.compile(item)?;
                }
                self.w.emit_u16(Opcode::Array, count);
                self.adjust(1 - count as isize);
            }
            NodeKind::Class {
                name,
                superclass,
                scope,
            } => {
                if let Some(superclass) = superclass {
                    self.compile(superclass)?;
                }
                let idx = self.sym(name, line)?;
                self.mark_line(line);
                self.w
                    .emit_u16_u8(Opcode::Class, idx, superclass.is_some() as u8);
                if superclass.is_none() {
                    self.adjust(1);
                }
                let child = self.child(scope, line)?;
                self.w.emit_u16(Opcode::Exec, child);
            }
            NodeKind::Module { name, scope } => {
                let idx = self.sym(name, line)?;
                self.mark_line(line);
                self.w.emit_u16(Opcode::Module, idx);
                self.adjust(1);
                let child = self.child(scope, line)?;
                self.w.emit_u16(Opcode::Exec, child);
            }
            NodeKind::Return(value) => {
                match value {
                    Some(value) => self.compile(value)?,
                    None => self.op(Opcode::LoadNil, 1),
                }
                self.w.emit(Opcode::Return);
            }
            NodeKind::Seq(stmts) => self.compile_body(stmts)?,
        }
        Ok(())
    }

    /// ```text
    /// begin:  <body>
    /// end:    JMP done
    /// target: EXCEPT
    ///         (GETCONST C; RESCUE; JMPIF match)*  JMP next
    /// match:  [SETLOCAL var] POP; <clause body>; JMP done
    /// next:   ... further clauses ...
    ///         RAISE
    /// done:
    /// ```
    fn compile_begin(&mut self, block: &BeginBlock) -> CResult<()> {
        let depth = self.depth;
        let begin = self.w.offset();
        self.compile_body(&block.body)?;
        let end = self.w.offset();
        let mut done = vec![self.jump(Opcode::Jmp)];

        let target = self.w.offset();
        self.depth = depth;
        self.op(Opcode::Except, 1);
        for clause in &block.rescues {
            self.mark_line(clause.line);
            let default_class = [Node::new(NodeKind::Const("StandardError".into()), clause.line)];
            let classes = if clause.classes.is_empty() {
                &default_class[..]
            } else {
                &clause.classes[..]
            };
            let mut matched = Vec::with_capacity(classes.len());
            for class in classes {
                self.compile(class)?;
                self.op(Opcode::Rescue, 0);
                matched.push(self.jump(Opcode::JmpIf));
            }
            let next = self.jump(Opcode::Jmp);
            for at in matched {
                self.land(at);
            }
            if let Some(var) = &clause.var {
                let slot = self.slot(var, clause.line)?;
                self.w.emit_u16(Opcode::SetLocal, slot);
            }
            self.op(Opcode::Pop, -1);
            self.compile_body(&clause.body)?;
            done.push(self.jump(Opcode::Jmp));
            self.land(next);
            self.depth = depth + 1;
        }
        self.op(Opcode::Raise, -1);
        self.depth = depth + 1;
        for at in done {
            self.land(at);
        }

        let depth = u16::try_from(depth).map_err(|_| ParseError::new(0, "expression too deep"))?;
        self.handlers.push(CatchHandler {
            begin: begin as u32,
            end: end as u32,
            target: target as u32,
            depth,
        });
        Ok(())
    }
}
