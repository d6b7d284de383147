//! Procedure Introspector
//!
//! Read-only views over a compiled procedure. Nothing here mutates the VM;
//! the views borrow the procedure's shared body and render names through
//! the context's symbol table on demand.

use crate::context::Context;
use crate::error::{ShimError, ShimResult};
use crate::value::Value;
use mrbridge_vm::{CatchHandler, Instruction, Irep, Opcode, Sym};
use std::rc::Rc;

/// View of a procedure value
#[derive(Debug, Clone)]
pub struct Procedure {
    irep: Option<Rc<Irep>>,
}

/// Raw instruction stream of a procedure
#[derive(Debug, Clone, Copy)]
pub struct Instructions<'a> {
    bytes: &'a [u8],
    count: usize,
}

impl<'a> Instructions<'a> {
    /// Encoded instruction bytes
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Number of instructions
    pub fn count(&self) -> usize {
        self.count
    }

    /// Decoded instructions, in order
    pub fn decoded(&self) -> impl Iterator<Item = Instruction> + 'a {
        mrbridge_vm::opcode::Decoder::new(self.bytes).map_while(Result::ok)
    }

    /// `pc  MNEMONIC operands` lines
    pub fn listing(&self) -> impl Iterator<Item = String> + 'a {
        self.decoded().map(|ins| {
            let mut line = format!("{:04} {}", ins.pc, ins.opcode.name());
            for op in ins.operands() {
                line.push(' ');
                line.push_str(&op.to_string());
            }
            line
        })
    }
}

impl Procedure {
    /// View of `v`; [`ShimError::NotAProcedure`] for other values
    pub fn from_value(ctx: &Context, v: Value) -> ShimResult<Self> {
        if !matches!(v, Value::Proc(_)) {
            return Err(ShimError::NotAProcedure);
        }
        let proc = ctx
            .vm()
            .proc_ref(v.into_raw())
            .ok_or(ShimError::NotAProcedure)?;
        Ok(Self {
            irep: proc.irep().cloned(),
        })
    }

    /// Whether the body is a host method
    pub fn is_native(&self) -> bool {
        self.irep.is_none()
    }

    /// Instruction stream; `None` for host methods
    pub fn instructions(&self) -> Option<Instructions<'_>> {
        let irep = self.irep.as_deref()?;
        Some(Instructions {
            bytes: &irep.iseq,
            count: irep.instruction_count(),
        })
    }

    /// Symbols referenced by the body, in definition order
    pub fn symbols<'a>(&'a self, ctx: &'a Context) -> impl Iterator<Item = String> + 'a {
        self.syms().iter().map(move |s| ctx.vm().sym_str(*s))
    }

    fn syms(&self) -> &[Sym] {
        self.irep.as_deref().map(|i| i.syms.as_slice()).unwrap_or(&[])
    }

    /// Local variable names, receiver slot excluded, in declaration order.
    ///
    /// `None` when the body carries no local name metadata. Unnamed slots
    /// render as empty strings.
    pub fn local_names<'a>(&'a self, ctx: &'a Context) -> Option<impl Iterator<Item = String> + 'a> {
        let lv = self.irep.as_deref()?.lv.as_ref()?;
        Some(lv.iter().map(move |s| match s {
            Some(sym) => ctx.vm().sym_str(*sym),
            None => String::new(),
        }))
    }

    /// Exception handler regions, innermost first
    pub fn catch_regions(&self) -> &[CatchHandler] {
        self.irep.as_deref().map(|i| i.handlers.as_slice()).unwrap_or(&[])
    }

    /// Nested procedures: method bodies and class bodies
    pub fn children(&self) -> impl Iterator<Item = Procedure> + '_ {
        self.irep
            .as_deref()
            .into_iter()
            .flat_map(|i| i.reps.iter())
            .map(|r| Procedure {
                irep: Some(Rc::clone(r)),
            })
    }

    /// Required argument count
    pub fn nparams(&self) -> u16 {
        self.irep.as_deref().map(|i| i.nparams).unwrap_or(0)
    }

    /// Source file name recorded in the line table
    pub fn filename(&self) -> Option<&str> {
        self.irep.as_deref()?.filename()
    }

    /// Source line of the instruction at `pc`
    pub fn line_for(&self, pc: usize) -> Option<u16> {
        self.irep.as_deref()?.line_for(pc)
    }

    /// Whether the body contains a `def` of `name`
    pub fn defines(&self, ctx: &Context, name: &str) -> bool {
        let Some(ins) = self.instructions() else {
            return false;
        };
        let syms = self.syms();
        ins.decoded().any(|i| {
            i.opcode == Opcode::Def
                && syms
                    .get(i.a())
                    .is_some_and(|s| ctx.vm().sym_name(*s) == Some(name.as_bytes()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{method_proc, object_class};
    use crate::trampoline::{compile, CompileContext};
    use crate::value::from_int;

    fn compiled(ctx: &mut Context, src: &str) -> Procedure {
        let v = compile(ctx, src.as_bytes(), &CompileContext::new("t.rb"));
        Procedure::from_value(ctx, v).unwrap()
    }

    #[test]
    fn test_method_locals() {
        let mut ctx = Context::open();
        let top = compiled(&mut ctx, "def foo(a); b = 1; end");
        assert!(top.defines(&ctx, "foo"));
        let child = top.children().next().unwrap();
        let names: Vec<String> = child.local_names(&ctx).unwrap().collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(child.nparams(), 1);
        let ins = child.instructions().unwrap();
        assert!(ins.count() > 0);
        assert!(!ins.bytes().is_empty());
        assert_eq!(ins.decoded().count(), ins.count());
    }

    #[test]
    fn test_symbols_in_definition_order() {
        let mut ctx = Context::open();
        let p = compiled(&mut ctx, "x = :alpha\nputs(x)\n:beta");
        let syms: Vec<String> = p.symbols(&ctx).collect();
        assert_eq!(syms, vec!["alpha", "puts", "beta"]);
    }

    #[test]
    fn test_catch_regions_are_separate_from_instructions() {
        let mut ctx = Context::open();
        let p = compiled(&mut ctx, "begin\n  1\nrescue\n  2\nend");
        assert_eq!(p.catch_regions().len(), 1);
        let region = p.catch_regions()[0];
        assert!(region.begin < region.end);
        let ins = p.instructions().unwrap();
        assert!(ins.decoded().any(|i| i.opcode == Opcode::Rescue));

        let plain = compiled(&mut ctx, "1");
        assert!(plain.catch_regions().is_empty());
    }

    #[test]
    fn test_host_method_has_no_body() {
        let mut ctx = Context::open();
        let object = object_class(&ctx);
        let v = method_proc(&mut ctx, object, "puts").unwrap();
        let p = Procedure::from_value(&ctx, v).unwrap();
        assert!(p.is_native());
        assert!(p.instructions().is_none());
        assert!(p.local_names(&ctx).is_none());
        assert_eq!(p.symbols(&ctx).count(), 0);
    }

    #[test]
    fn test_non_proc_rejected() {
        let ctx = Context::open();
        assert!(matches!(
            Procedure::from_value(&ctx, from_int(3)),
            Err(ShimError::NotAProcedure)
        ));
    }
}
