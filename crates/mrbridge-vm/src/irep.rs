//! Compiled procedures

use crate::opcode::{Decoder, Instruction};
use crate::symbol::Sym;
use crate::DecodeError;
use std::rc::Rc;

/// Literal pool entry
#[derive(Debug, Clone, PartialEq)]
pub enum PoolValue {
    /// Integer too wide for `LOADI`
    Int(i64),
    /// Float literal
    Float(f64),
    /// String literal; a fresh string is allocated on every load
    Str(Vec<u8>),
}

/// Exception handler region
///
/// An exception raised while `begin <= pc < end` resumes at `target` with the
/// operand stack cut back to `depth` entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchHandler {
    /// First covered offset
    pub begin: u32,
    /// One past the last covered offset
    pub end: u32,
    /// Rescue entry point
    pub target: u32,
    /// Operand stack depth at `begin`
    pub depth: u16,
}

/// Line table entry: code from `pc` on belongs to `line`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEntry {
    /// Instruction offset
    pub pc: u32,
    /// 1-based source line
    pub line: u16,
}

/// Source position metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugInfo {
    /// Source file name
    pub filename: String,
    /// Line table, sorted by pc
    pub lines: Vec<LineEntry>,
}

impl DebugInfo {
    /// Source line of the instruction at `pc`
    pub fn line_for(&self, pc: usize) -> Option<u16> {
        let idx = self.lines.partition_point(|e| e.pc as usize <= pc);
        idx.checked_sub(1).map(|i| self.lines[i].line)
    }
}

/// Compiled procedure
///
/// Local slot 0 holds the receiver; parameters occupy slots `1..=nparams`.
#[derive(Debug, Clone, PartialEq)]
pub struct Irep {
    /// Local slots including the receiver slot
    pub nlocals: u16,
    /// Required argument count
    pub nparams: u16,
    /// Instruction bytes
    pub iseq: Vec<u8>,
    /// Literal pool
    pub pool: Vec<PoolValue>,
    /// Symbols referenced by the code, in definition order
    pub syms: Vec<Sym>,
    /// Names of slots `1..nlocals`; `None` entries are unnamed temporaries
    pub lv: Option<Vec<Option<Sym>>>,
    /// Exception handlers, innermost first
    pub handlers: Vec<CatchHandler>,
    /// Line information
    pub debug: Option<DebugInfo>,
    /// Nested procedures (method and class bodies)
    pub reps: Vec<Rc<Irep>>,
}

impl Irep {
    /// Innermost handler covering `pc`
    pub fn handler_for(&self, pc: usize) -> Option<&CatchHandler> {
        self.handlers
            .iter()
            .find(|h| (h.begin as usize) <= pc && pc < h.end as usize)
    }

    /// Decoded instruction stream
    pub fn instructions(&self) -> Decoder<'_> {
        Decoder::new(&self.iseq)
    }

    /// Count of instructions; stops at the first undecodable byte
    pub fn instruction_count(&self) -> usize {
        self.instructions().take_while(Result::is_ok).count()
    }

    /// Source line of `pc`
    pub fn line_for(&self, pc: usize) -> Option<u16> {
        self.debug.as_ref()?.line_for(pc)
    }

    /// Source file name
    pub fn filename(&self) -> Option<&str> {
        self.debug.as_ref().map(|d| d.filename.as_str())
    }

    /// Copy without local names and line info
    pub fn stripped(&self) -> Irep {
        Irep {
            lv: None,
            debug: None,
            reps: self.reps.iter().map(|r| Rc::new(r.stripped())).collect(),
            ..self.clone()
        }
    }

    /// Check that every instruction decodes and every operand is in range.
    ///
    /// Image reading runs this on every record so the interpreter can index
    /// pools and tables without bounds failures.
    pub fn verify(&self) -> Result<(), DecodeError> {
        use crate::opcode::Opcode::*;
        let len = self.iseq.len();
        let out_of_range = |ins: &Instruction| DecodeError::OperandOutOfRange(ins.pc);
        for ins in self.instructions() {
            let ins = ins?;
            let ok = match ins.opcode {
                LoadL => ins.a() < self.pool.len(),
                LoadSym | GetConst | Send | SSend | Module => ins.a() < self.syms.len(),
                GetLocal | SetLocal => ins.a() < self.nlocals as usize,
                Jmp | JmpIf | JmpNot => ins.a() <= len,
                Def | SDef => ins.a() < self.syms.len() && ins.b() < self.reps.len(),
                Class => ins.a() < self.syms.len() && ins.b() <= 1,
                Exec => ins.a() < self.reps.len(),
                _ => true,
            };
            if !ok {
                return Err(out_of_range(&ins));
            }
        }
        if self.nlocals == 0 || self.nparams >= self.nlocals {
            return Err(DecodeError::Malformed("more parameters than locals"));
        }
        for h in &self.handlers {
            if h.begin > h.end || h.end as usize > len || h.target as usize >= len {
                return Err(DecodeError::Malformed("handler outside instruction sequence"));
            }
        }
        if let Some(lv) = &self.lv {
            if lv.len() + 1 != self.nlocals as usize {
                return Err(DecodeError::Malformed("local name count mismatch"));
            }
        }
        self.reps.iter().try_for_each(|r| r.verify())
    }
}
