//! Bytecode interpreter and method dispatch
//!
//! Compiled bodies run in a Rust call per activation: `Send` recurses through
//! [`Vm::funcall`] into [`Vm::run_irep`]. Bodies that contain `begin/rescue`
//! run under their own recovery point so a raise anywhere below them lands
//! back in this frame and resumes at the matching handler.

use crate::codegen::compile_scope;
use crate::heap::ObjRef;
use crate::irep::{Irep, PoolValue};
use crate::jump::{FrameMark, VmJump};
use crate::object::{ProcBody, RObject, RProc};
use crate::opcode::{self, Opcode};
use crate::parser::parse_program;
use crate::symbol::Sym;
use crate::value::RawValue;
use crate::vm::{CallInfo, CompileOptions, Vm};
use crate::ParseError;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

impl Vm {
    // ===== Entry points =====

    /// Call method `mid` on `recv`
    pub fn funcall(&mut self, recv: RawValue, mid: Sym, args: &[RawValue]) -> RawValue {
        match self.lookup_method(recv, mid) {
            Some(proc) => self.invoke(proc, recv, Some(mid), args),
            None => self.no_method(recv, mid),
        }
    }

    /// Call method `name` on `recv`
    pub fn funcall_name(&mut self, recv: RawValue, name: &str, args: &[RawValue]) -> RawValue {
        let mid = self.intern_str(name);
        self.funcall(recv, mid, args)
    }

    /// Call a proc with an explicit receiver
    pub fn call_proc(&mut self, proc: RawValue, self_val: RawValue, args: &[RawValue]) -> RawValue {
        match proc.as_obj().filter(|_| self.proc_ref(proc).is_some()) {
            Some(p) => self.invoke(p, self_val, None, args),
            None => self.raise(self.core.type_error, "not a procedure"),
        }
    }

    /// Run a proc at top level, with `main` as self
    pub fn run_proc(&mut self, proc: RawValue) -> RawValue {
        let top = self.top_self;
        self.call_proc(proc, top, &[])
    }

    /// Parse and compile `source` into a proc without running it.
    ///
    /// Raises `SyntaxError` on malformed input. Line information is kept
    /// only when both `opts` and the VM options ask for it.
    pub fn compile(&mut self, source: &[u8], opts: &CompileOptions) -> RawValue {
        let filename = opts.filename_or_default().to_string();
        let debug_info = opts.debug_info && self.options.debug_info;
        let compiled = std::str::from_utf8(source)
            .map_err(|e| ParseError::new(1, format!("invalid UTF-8 in source: {}", e)))
            .and_then(parse_program)
            .and_then(|scope| compile_scope(&mut self.symbols, &scope, &filename, debug_info));
        match compiled {
            Ok(irep) => {
                tracing::trace!(file = %filename, iseq = irep.iseq.len(), "compiled");
                self.proc_new(Rc::new(irep))
            }
            Err(e) => {
                let msg = format!("{}:{}: {}", filename, e.line, e.message);
                self.raise(self.core.syntax_error, &msg)
            }
        }
    }

    /// Compile and run `source`
    pub fn load_string(&mut self, source: &[u8], opts: &CompileOptions) -> RawValue {
        let proc = self.compile(source, opts);
        self.run_proc(proc)
    }

    /// Result of `v.inspect`
    pub fn inspect(&mut self, v: RawValue) -> RawValue {
        self.funcall_name(v, "inspect", &[])
    }

    /// `v.inspect` as a Rust string
    pub fn inspect_string(&mut self, v: RawValue) -> String {
        let s = self.inspect(v);
        self.string_lossy(s).unwrap_or_default()
    }

    /// `v.to_s` as a Rust string
    pub fn to_s_string(&mut self, v: RawValue) -> String {
        if let Some(s) = self.string_lossy(v) {
            return s;
        }
        let s = self.funcall_name(v, "to_s", &[]);
        self.string_lossy(s).unwrap_or_default()
    }

    // ===== Activation =====

    fn invoke(&mut self, proc: ObjRef, recv: RawValue, mid: Option<Sym>, args: &[RawValue]) -> RawValue {
        let (body, target) = match self.heap.get(proc) {
            Some(RObject::Proc(RProc { body, target_class })) => {
                (body.clone(), target_class.unwrap_or(self.core.object))
            }
            _ => self.raise(self.core.type_error, "not a procedure"),
        };
        match body {
            ProcBody::Irep(irep) => self.run_irep(irep, recv, args, mid, target, Some(proc)),
            ProcBody::Native(f) => {
                self.check_depth();
                self.callinfo.push(CallInfo {
                    irep: None,
                    mid,
                    base: self.stack.len(),
                    pc: 0,
                    self_val: recv,
                    target_class: target,
                    proc: Some(proc),
                });
                let ai = self.arena_save();
                for arg in args {
                    self.arena_protect(*arg);
                }
                let result = f(self, recv, args);
                self.callinfo.pop();
                self.arena_restore(ai);
                self.arena_protect(result);
                result
            }
        }
    }

    fn check_depth(&mut self) {
        if self.callinfo.len() >= self.options.max_call_depth {
            self.raise(self.core.system_stack_error, "stack level too deep")
        }
    }

    /// Run a compiled body in a fresh frame
    pub(crate) fn run_irep(
        &mut self,
        irep: Rc<Irep>,
        self_val: RawValue,
        args: &[RawValue],
        mid: Option<Sym>,
        target_class: ObjRef,
        proc: Option<ObjRef>,
    ) -> RawValue {
        self.check_depth();
        if args.len() != irep.nparams as usize {
            let msg = format!(
                "wrong number of arguments (given {}, expected {})",
                args.len(),
                irep.nparams
            );
            self.raise(self.core.argument_error, &msg)
        }

        let base = self.stack.len();
        self.stack.push(self_val);
        self.stack.extend_from_slice(args);
        self.stack
            .resize(base + (irep.nlocals as usize).max(1), RawValue::nil());
        self.callinfo.push(CallInfo {
            irep: Some(irep.clone()),
            mid,
            base,
            pc: 0,
            self_val,
            target_class,
            proc,
        });

        let ai = self.arena_save();
        let result = if irep.handlers.is_empty() {
            self.dispatch(&irep)
        } else {
            self.dispatch_guarded(&irep)
        };
        self.callinfo.pop();
        self.stack.truncate(base);
        self.arena_restore(ai);
        self.arena_protect(result);
        result
    }

    /// Run the current frame under a recovery point, resuming at the
    /// covering handler each time a raise lands here.
    fn dispatch_guarded(&mut self, irep: &Rc<Irep>) -> RawValue {
        let ci_idx = self.callinfo.len() - 1;
        let floor = self.callinfo[ci_idx].base + irep.nlocals as usize;
        loop {
            let prev = self.jmp;
            let id = self.new_jump_id();
            self.jmp = Some(id);
            let mark = self.frame_mark();

            let result = panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(irep)));
            self.jmp = prev;

            let payload = match result {
                Ok(v) => return v,
                Err(payload) => payload,
            };
            match payload.downcast::<VmJump>() {
                Ok(jump) if jump.target == id => {}
                Ok(jump) => panic::resume_unwind(jump),
                Err(other) => {
                    self.unwind_to(mark);
                    panic::resume_unwind(other)
                }
            }

            let pc = self.callinfo[ci_idx].pc;
            let Some(handler) = irep.handler_for(pc).copied() else {
                self.unwind_to(FrameMark { stack: self.stack.len(), ..mark });
                self.throw()
            };
            tracing::trace!(pc, target = handler.target, "rescued");
            self.unwind_to(FrameMark {
                stack: floor + handler.depth as usize,
                ..mark
            });
            self.callinfo[ci_idx].pc = handler.target as usize;
        }
    }

    fn pop_operand(&mut self, floor: usize) -> RawValue {
        if self.stack.len() > floor {
            if let Some(v) = self.stack.pop() {
                return v;
            }
        }
        self.raise(self.core.script_error, "operand stack underflow")
    }

    fn peek_operand(&mut self, floor: usize) -> RawValue {
        let len = self.stack.len();
        if len <= floor {
            self.raise(self.core.script_error, "operand stack underflow")
        }
        self.stack[len - 1]
    }

    /// Execute the current frame from its saved pc until `RETURN`
    fn dispatch(&mut self, irep: &Rc<Irep>) -> RawValue {
        let ci_idx = self.callinfo.len() - 1;
        let base = self.callinfo[ci_idx].base;
        let floor = base + irep.nlocals as usize;
        let mut pc = self.callinfo[ci_idx].pc;
        let ai = self.arena_save();

        loop {
            self.arena_restore(ai);
            if pc >= irep.iseq.len() {
                return RawValue::nil();
            }
            self.callinfo[ci_idx].pc = pc;
            let ins = match opcode::decode(&irep.iseq, pc) {
                Ok(ins) => ins,
                Err(e) => {
                    let msg = format!("malformed instruction: {}", e);
                    self.raise(self.core.script_error, &msg)
                }
            };
            pc = ins.next_pc();

            match ins.opcode {
                Opcode::Nop => {}
                Opcode::Pop => {
                    self.pop_operand(floor);
                }
                Opcode::Dup => {
                    let v = self.peek_operand(floor);
                    self.stack.push(v);
                }
                Opcode::LoadNil => self.stack.push(RawValue::nil()),
                Opcode::LoadTrue => self.stack.push(RawValue::true_value()),
                Opcode::LoadFalse => self.stack.push(RawValue::false_value()),
                Opcode::LoadSelf => self.stack.push(self.stack[base]),
                Opcode::LoadI => self.stack.push(RawValue::fixnum(ins.a_signed())),
                Opcode::LoadL => {
                    let v = match &irep.pool[ins.a()] {
                        PoolValue::Int(i) => RawValue::fixnum(*i),
                        PoolValue::Float(f) => RawValue::float(*f),
                        PoolValue::Str(bytes) => self.str_new(bytes),
                    };
                    self.stack.push(v);
                }
                Opcode::LoadSym => self.stack.push(RawValue::symbol(irep.syms[ins.a()])),
                Opcode::GetLocal => self.stack.push(self.stack[base + ins.a()]),
                Opcode::SetLocal => {
                    let v = self.peek_operand(floor);
                    self.stack[base + ins.a()] = v;
                }
                Opcode::GetConst => {
                    let sym = irep.syms[ins.a()];
                    let scope = self.callinfo[ci_idx].target_class;
                    match self.const_get(scope, sym) {
                        Some(v) => self.stack.push(v),
                        None => {
                            let msg = format!("uninitialized constant {}", self.sym_str(sym));
                            self.raise(self.core.name_error, &msg)
                        }
                    }
                }
                Opcode::Send | Opcode::SSend => {
                    let mid = irep.syms[ins.a()];
                    let argc = ins.b();
                    let with_recv = ins.opcode == Opcode::Send;
                    if self.stack.len() < floor + argc + with_recv as usize {
                        self.raise(self.core.script_error, "operand stack underflow")
                    }
                    let args = self.stack.split_off(self.stack.len() - argc);
                    let recv = if with_recv {
                        self.pop_operand(floor)
                    } else {
                        self.stack[base]
                    };
                    let result = self.funcall(recv, mid, &args);
                    self.stack.push(result);
                    self.maybe_gc();
                }
                Opcode::Jmp => pc = ins.a(),
                Opcode::JmpIf => {
                    if self.pop_operand(floor).is_truthy() {
                        pc = ins.a();
                    }
                }
                Opcode::JmpNot => {
                    if !self.pop_operand(floor).is_truthy() {
                        pc = ins.a();
                    }
                }
                Opcode::Def => {
                    let mid = irep.syms[ins.a()];
                    let body = irep.reps[ins.b()].clone();
                    let target = self.callinfo[ci_idx].target_class;
                    let proc = self.alloc(RObject::Proc(RProc {
                        body: ProcBody::Irep(body),
                        target_class: Some(target),
                    }));
                    if let (Some(p), Some(class)) = (proc.as_obj(), self.rclass_mut(target)) {
                        class.methods.insert(mid, p);
                    }
                    self.stack.push(RawValue::symbol(mid));
                }
                Opcode::SDef => {
                    let mid = irep.syms[ins.a()];
                    let self_val = self.stack[base];
                    let Some(cls) = self.class_ref(self_val) else {
                        let msg = format!(
                            "can't define singleton method '{}' for {}",
                            self.sym_str(mid),
                            self.class_name(self.class_of(self_val))
                        );
                        self.raise(self.core.type_error, &msg)
                    };
                    let body = irep.reps[ins.b()].clone();
                    let proc = self.alloc(RObject::Proc(RProc {
                        body: ProcBody::Irep(body),
                        target_class: Some(cls),
                    }));
                    if let (Some(p), Some(class)) = (proc.as_obj(), self.rclass_mut(cls)) {
                        class.singleton_methods.insert(mid, p);
                    }
                    self.stack.push(RawValue::symbol(mid));
                }
                Opcode::Array => {
                    let count = ins.a();
                    if self.stack.len() < floor + count {
                        self.raise(self.core.script_error, "operand stack underflow")
                    }
                    let items = self.stack.split_off(self.stack.len() - count);
                    let array = self.array_new(&items);
                    self.stack.push(array);
                    self.maybe_gc();
                }
                Opcode::Class => {
                    let sym = irep.syms[ins.a()];
                    let superclass = if ins.b() == 1 {
                        let v = self.pop_operand(floor);
                        match self.class_ref(v) {
                            Some(c) if !self.is_module(c) => Some(c),
                            _ => self.raise(self.core.type_error, "superclass must be a Class"),
                        }
                    } else {
                        None
                    };
                    let outer = self.callinfo[ci_idx].target_class;
                    let cls = self.define_class_sym(sym, superclass, outer);
                    self.stack.push(self.class_value(cls));
                }
                Opcode::Module => {
                    let sym = irep.syms[ins.a()];
                    let outer = self.callinfo[ci_idx].target_class;
                    let module = self.define_module_sym(sym, outer);
                    self.stack.push(self.class_value(module));
                }
                Opcode::Exec => {
                    let v = self.pop_operand(floor);
                    let Some(cls) = self.class_ref(v) else {
                        self.raise(self.core.type_error, "class body needs a class or module")
                    };
                    let body = irep.reps[ins.a()].clone();
                    let result = self.run_irep(body, v, &[], None, cls, None);
                    self.stack.push(result);
                }
                Opcode::Except => {
                    let v = match self.exc.take() {
                        Some(e) => self.exception_value(e),
                        None => RawValue::nil(),
                    };
                    self.stack.push(v);
                }
                Opcode::Rescue => {
                    let c = self.pop_operand(floor);
                    let exc = self.peek_operand(floor);
                    let Some(cls) = self.class_ref(c) else {
                        self.raise(
                            self.core.type_error,
                            "class or module required for rescue clause",
                        )
                    };
                    let matched = self.is_kind_of(exc, cls);
                    self.stack.push(RawValue::bool(matched));
                }
                Opcode::Raise => {
                    let v = self.pop_operand(floor);
                    self.raise_exc(v)
                }
                Opcode::Return => {
                    if self.stack.len() > floor {
                        return self.pop_operand(floor);
                    }
                    return RawValue::nil();
                }
                Opcode::Not => {
                    let v = self.pop_operand(floor);
                    self.stack.push(RawValue::bool(!v.is_truthy()));
                }
            }
        }
    }

    fn no_method(&mut self, recv: RawValue, mid: Sym) -> ! {
        let desc = if recv.is_nil() {
            "nil".to_string()
        } else if recv.identical(&self.top_self) {
            "main".to_string()
        } else if let Some(cls) = self.class_ref(recv) {
            self.class_name(cls)
        } else {
            format!("an instance of {}", self.class_name(self.class_of(recv)))
        };
        let msg = format!("undefined method '{}' for {}", self.sym_str(mid), desc);
        self.raise(self.core.no_method_error, &msg)
    }
}
