//! VM instance state
//!
//! One [`Vm`] owns:
//! - the symbol table and object heap
//! - the core class hierarchy
//! - the operand stack and call-info stack
//! - the current exception slot and the innermost recovery point
//! - the GC arena and the host user-data slot

use crate::heap::{GcStats, Heap, ObjRef};
use crate::irep::Irep;
use crate::jump::{FrameMark, JumpId};
use crate::object::{ClassKind, DataType, InstanceTt, NativeFn, ProcBody, RClass, RData, RObject, RProc};
use crate::symbol::{Sym, SymbolTable};
use crate::value::{RawValue, ValueType};
use std::ffi::c_void;
use std::io::Write;
use std::rc::Rc;

/// Highest accepted `max_call_depth`.
///
/// Each script call nests several native frames, so this bounds the native
/// stack a script can consume to what an 8 MiB thread stack holds.
pub const MAX_CALL_DEPTH_LIMIT: usize = 1024;

/// VM configuration
#[derive(Debug, Clone)]
pub struct VmOptions {
    /// Allocations between automatic collections
    pub gc_threshold: usize,

    /// Maximum nesting of method calls before `SystemStackError`.
    /// Clamped to [`MAX_CALL_DEPTH_LIMIT`].
    pub max_call_depth: usize,

    /// Record line information when compiling. When off, compiled code
    /// carries no line table and backtraces are empty.
    pub debug_info: bool,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            gc_threshold: 1024,
            max_call_depth: 256,
            debug_info: true,
        }
    }
}

/// Options for compiling source text
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// File name recorded in line info and backtraces
    pub filename: Option<String>,
    /// Record line information
    pub debug_info: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            filename: None,
            debug_info: true,
        }
    }
}

impl CompileOptions {
    /// File name, `"-"` when none was given
    pub fn filename_or_default(&self) -> &str {
        self.filename.as_deref().unwrap_or("-")
    }
}

/// Activation record of a running method or body
#[derive(Debug, Clone)]
pub(crate) struct CallInfo {
    /// Compiled body; `None` for host methods
    pub irep: Option<Rc<Irep>>,
    /// Method name, `None` for top-level and class bodies
    pub mid: Option<Sym>,
    /// Stack index of local slot 0
    pub base: usize,
    /// Offset of the instruction being executed
    pub pc: usize,
    /// Receiver
    pub self_val: RawValue,
    /// Class `def` attaches methods to
    pub target_class: ObjRef,
    /// Running procedure, when there is one
    pub proc: Option<ObjRef>,
}

/// Core classes created at boot, one field per class
#[allow(missing_docs)]
#[derive(Debug, Clone)]
pub struct CoreClasses {
    pub object: ObjRef,
    pub module: ObjRef,
    pub class: ObjRef,
    pub nil: ObjRef,
    pub true_class: ObjRef,
    pub false_class: ObjRef,
    pub integer: ObjRef,
    pub float: ObjRef,
    pub string: ObjRef,
    pub symbol: ObjRef,
    pub array: ObjRef,
    pub proc_class: ObjRef,
    pub exception: ObjRef,
    pub script_error: ObjRef,
    pub syntax_error: ObjRef,
    pub standard_error: ObjRef,
    pub runtime_error: ObjRef,
    pub argument_error: ObjRef,
    pub type_error: ObjRef,
    pub name_error: ObjRef,
    pub no_method_error: ObjRef,
    pub zero_division_error: ObjRef,
    pub system_stack_error: ObjRef,
}

impl CoreClasses {
    fn all(&self) -> [ObjRef; 23] {
        [
            self.object,
            self.module,
            self.class,
            self.nil,
            self.true_class,
            self.false_class,
            self.integer,
            self.float,
            self.string,
            self.symbol,
            self.array,
            self.proc_class,
            self.exception,
            self.script_error,
            self.syntax_error,
            self.standard_error,
            self.runtime_error,
            self.argument_error,
            self.type_error,
            self.name_error,
            self.no_method_error,
            self.zero_division_error,
            self.system_stack_error,
        ]
    }

    fn boot(heap: &mut Heap, symbols: &mut SymbolTable) -> Self {
        let object = heap.alloc(RObject::Class(RClass::new(
            Some(symbols.intern_str("Object")),
            ClassKind::Class,
            None,
            None,
        )));
        let mut def = |name: &str, superclass: ObjRef| {
            let sym = symbols.intern_str(name);
            let class = heap.alloc(RObject::Class(RClass::new(
                Some(sym),
                ClassKind::Class,
                Some(superclass),
                Some(object),
            )));
            if let Some(RObject::Class(o)) = heap.get_mut(object) {
                o.consts.insert(sym, RawValue::object(ValueType::Class, class));
            }
            class
        };

        let module = def("Module", object);
        let class = def("Class", module);
        let nil = def("NilClass", object);
        let true_class = def("TrueClass", object);
        let false_class = def("FalseClass", object);
        let integer = def("Integer", object);
        let float = def("Float", object);
        let string = def("String", object);
        let symbol = def("Symbol", object);
        let array = def("Array", object);
        let proc_class = def("Proc", object);
        let exception = def("Exception", object);
        let script_error = def("ScriptError", exception);
        let syntax_error = def("SyntaxError", script_error);
        let standard_error = def("StandardError", exception);
        let runtime_error = def("RuntimeError", standard_error);
        let argument_error = def("ArgumentError", standard_error);
        let type_error = def("TypeError", standard_error);
        let name_error = def("NameError", standard_error);
        let no_method_error = def("NoMethodError", name_error);
        let zero_division_error = def("ZeroDivisionError", standard_error);
        let system_stack_error = def("SystemStackError", exception);

        let object_sym = symbols.intern_str("Object");
        if let Some(RObject::Class(o)) = heap.get_mut(object) {
            o.consts
                .insert(object_sym, RawValue::object(ValueType::Class, object));
        }

        Self {
            object,
            module,
            class,
            nil,
            true_class,
            false_class,
            integer,
            float,
            string,
            symbol,
            array,
            proc_class,
            exception,
            script_error,
            syntax_error,
            standard_error,
            runtime_error,
            argument_error,
            type_error,
            name_error,
            no_method_error,
            zero_division_error,
            system_stack_error,
        }
    }
}

/// Virtual machine instance
///
/// Not `Send`: method tables hold `Rc` closures, so a VM stays on the thread
/// that created it.
pub struct Vm {
    pub(crate) symbols: SymbolTable,
    pub(crate) heap: Heap,
    pub(crate) core: CoreClasses,
    pub(crate) top_self: RawValue,
    pub(crate) exc: Option<ObjRef>,
    pub(crate) jmp: Option<JumpId>,
    next_jump: u64,
    pub(crate) stack: Vec<RawValue>,
    pub(crate) callinfo: Vec<CallInfo>,
    pub(crate) arena: Vec<ObjRef>,
    registered: Vec<RawValue>,
    pub(crate) options: VmOptions,
    ud: *mut c_void,
    pub(crate) output: Box<dyn Write>,
}

impl Vm {
    /// Boot a VM with the core classes and library installed
    pub fn new(mut options: VmOptions) -> Self {
        options.max_call_depth = options.max_call_depth.min(MAX_CALL_DEPTH_LIMIT);
        let mut symbols = SymbolTable::new();
        let mut heap = Heap::new();
        let core = CoreClasses::boot(&mut heap, &mut symbols);
        let top_self = heap.alloc(RObject::Instance { class: core.object });

        let mut vm = Self {
            symbols,
            heap,
            core,
            top_self: RawValue::object(ValueType::Object, top_self),
            exc: None,
            jmp: None,
            next_jump: 1,
            stack: Vec::with_capacity(256),
            callinfo: Vec::with_capacity(32),
            arena: Vec::with_capacity(64),
            registered: Vec::new(),
            options,
            ud: std::ptr::null_mut(),
            output: Box::new(std::io::stdout()),
        };
        crate::builtins::init(&mut vm);
        vm.arena.clear();
        tracing::debug!(objects = vm.heap.live(), symbols = vm.symbols.len(), "vm booted");
        vm
    }

    /// Options the VM was created with
    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    /// Redirect `puts` output
    pub fn set_output(&mut self, out: Box<dyn Write>) {
        self.output = out;
    }

    // ===== Symbols =====

    /// Intern a name
    pub fn intern(&mut self, name: &[u8]) -> Sym {
        self.symbols.intern(name)
    }

    /// Intern a UTF-8 name
    pub fn intern_str(&mut self, name: &str) -> Sym {
        self.symbols.intern_str(name)
    }

    /// Name bytes of a symbol
    pub fn sym_name(&self, sym: Sym) -> Option<&[u8]> {
        self.symbols.name(sym)
    }

    /// Name of a symbol as lossy UTF-8
    pub fn sym_str(&self, sym: Sym) -> String {
        self.symbols.name_lossy(sym)
    }

    /// Symbol table
    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    // ===== User data =====

    /// Attach an opaque host pointer
    pub fn set_ud(&mut self, ud: *mut c_void) {
        self.ud = ud;
    }

    /// Host pointer set with [`Vm::set_ud`]
    pub fn ud(&self) -> *mut c_void {
        self.ud
    }

    // ===== Heap & GC =====

    /// Allocate and protect in the arena
    pub(crate) fn alloc(&mut self, obj: RObject) -> RawValue {
        let tt = obj.value_type();
        let r = self.heap.alloc(obj);
        self.arena.push(r);
        RawValue::object(tt, r)
    }

    pub(crate) fn obj(&self, v: RawValue) -> Option<&RObject> {
        self.heap.get(v.as_obj()?)
    }

    pub(crate) fn obj_mut(&mut self, v: RawValue) -> Option<&mut RObject> {
        self.heap.get_mut(v.as_obj()?)
    }

    /// Current arena index
    pub fn arena_save(&self) -> usize {
        self.arena.len()
    }

    /// Release arena protection of objects allocated after `idx`
    pub fn arena_restore(&mut self, idx: usize) {
        self.arena.truncate(idx);
    }

    /// Protect `v` until the enclosing arena is restored
    pub fn arena_protect(&mut self, v: RawValue) {
        if let Some(r) = v.as_obj() {
            self.arena.push(r);
        }
    }

    /// Keep `v` alive until [`Vm::gc_unregister`]
    pub fn gc_register(&mut self, v: RawValue) {
        if v.tt().is_heap() {
            self.registered.push(v);
        }
    }

    /// Drop one registration of `v`
    pub fn gc_unregister(&mut self, v: RawValue) {
        if let Some(i) = self.registered.iter().rposition(|r| r.identical(&v)) {
            self.registered.swap_remove(i);
        }
    }

    /// Number of live heap objects
    pub fn live_objects(&self) -> usize {
        self.heap.live()
    }

    /// Collector statistics
    pub fn gc_stats(&self) -> &GcStats {
        self.heap.stats()
    }

    /// Collect now. Returns the number of freed objects.
    pub fn full_gc(&mut self) -> usize {
        let mut roots: Vec<ObjRef> = self.core.all().to_vec();
        roots.extend(self.top_self.as_obj());
        roots.extend(self.exc);
        roots.extend(self.arena.iter().copied());
        roots.extend(self.registered.iter().filter_map(RawValue::as_obj));
        roots.extend(self.stack.iter().filter_map(RawValue::as_obj));
        for ci in &self.callinfo {
            roots.extend(ci.self_val.as_obj());
            roots.push(ci.target_class);
            roots.extend(ci.proc);
        }
        let freed = self.heap.collect(roots);
        tracing::debug!(freed, live = self.heap.live(), "gc");
        freed
    }

    pub(crate) fn maybe_gc(&mut self) {
        if self.heap.allocated_since_gc() >= self.options.gc_threshold {
            self.full_gc();
        }
    }

    // ===== Strings =====

    /// New string object
    pub fn str_new(&mut self, bytes: &[u8]) -> RawValue {
        self.alloc(RObject::String {
            bytes: bytes.to_vec(),
        })
    }

    /// Contents of a string object
    pub fn string_bytes(&self, v: RawValue) -> Option<&[u8]> {
        match self.obj(v)? {
            RObject::String { bytes } => Some(bytes),
            _ => None,
        }
    }

    /// Contents of a string object as lossy UTF-8
    pub fn string_lossy(&self, v: RawValue) -> Option<String> {
        self.string_bytes(v)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    // ===== Arrays =====

    /// New array holding `items`
    pub fn array_new(&mut self, items: &[RawValue]) -> RawValue {
        self.alloc(RObject::Array {
            items: items.to_vec(),
        })
    }

    /// Elements of an array object
    pub fn array_items(&self, v: RawValue) -> Option<&[RawValue]> {
        match self.obj(v)? {
            RObject::Array { items } => Some(items),
            _ => None,
        }
    }

    pub(crate) fn array_items_mut(&mut self, v: RawValue) -> Option<&mut Vec<RawValue>> {
        match self.obj_mut(v)? {
            RObject::Array { items } => Some(items),
            _ => None,
        }
    }

    /// Append to an array; `false` when `array` is not one
    pub fn array_push(&mut self, array: RawValue, item: RawValue) -> bool {
        match self.array_items_mut(array) {
            Some(items) => {
                items.push(item);
                true
            }
            None => false,
        }
    }

    // ===== Classes =====

    /// Core classes
    pub fn core(&self) -> &CoreClasses {
        &self.core
    }

    /// `Object`
    pub fn object_class(&self) -> ObjRef {
        self.core.object
    }

    /// Top-level receiver
    pub fn top_self(&self) -> RawValue {
        self.top_self
    }

    pub(crate) fn rclass(&self, cls: ObjRef) -> Option<&RClass> {
        match self.heap.get(cls)? {
            RObject::Class(c) => Some(c),
            _ => None,
        }
    }

    pub(crate) fn rclass_mut(&mut self, cls: ObjRef) -> Option<&mut RClass> {
        match self.heap.get_mut(cls)? {
            RObject::Class(c) => Some(c),
            _ => None,
        }
    }

    /// Class or module behind a value
    pub fn class_ref(&self, v: RawValue) -> Option<ObjRef> {
        match v.tt() {
            ValueType::Class | ValueType::Module => v.as_obj(),
            _ => None,
        }
    }

    /// Value for a class or module reference
    pub fn class_value(&self, cls: ObjRef) -> RawValue {
        match self.rclass(cls).map(|c| c.kind) {
            Some(ClassKind::Module) => RawValue::object(ValueType::Module, cls),
            _ => RawValue::object(ValueType::Class, cls),
        }
    }

    /// Whether `cls` is a module rather than a class
    pub fn is_module(&self, cls: ObjRef) -> bool {
        matches!(self.rclass(cls), Some(c) if c.kind == ClassKind::Module)
    }

    /// Class of any value
    pub fn class_of(&self, v: RawValue) -> ObjRef {
        match v.tt() {
            ValueType::False if v.is_nil() => self.core.nil,
            ValueType::False => self.core.false_class,
            ValueType::True => self.core.true_class,
            ValueType::Fixnum => self.core.integer,
            ValueType::Float => self.core.float,
            ValueType::Symbol => self.core.symbol,
            ValueType::CPtr => self.core.object,
            ValueType::Class => self.core.class,
            ValueType::Module => self.core.module,
            ValueType::Proc => self.core.proc_class,
            ValueType::String => self.core.string,
            ValueType::Array => self.core.array,
            _ => match self.obj(v) {
                Some(RObject::Instance { class }) => *class,
                Some(RObject::Exception(e)) => e.class,
                Some(RObject::Data(d)) => d.class,
                _ => self.core.object,
            },
        }
    }

    /// Qualified name, e.g. `Outer::Inner`
    pub fn class_name(&self, cls: ObjRef) -> String {
        let Some(c) = self.rclass(cls) else {
            return "#<Object>".to_string();
        };
        let Some(name) = c.name else {
            return match c.kind {
                ClassKind::Class => "#<Class>".to_string(),
                ClassKind::Module => "#<Module>".to_string(),
            };
        };
        let own = self.sym_str(name);
        match c.outer {
            Some(outer) if outer != self.core.object && outer != cls => {
                format!("{}::{}", self.class_name(outer), own)
            }
            _ => own,
        }
    }

    /// Superclass of `cls`
    pub fn superclass(&self, cls: ObjRef) -> Option<ObjRef> {
        self.rclass(cls)?.superclass
    }

    /// Whether `cls` is `ancestor` or inherits from it
    pub fn is_subclass(&self, cls: ObjRef, ancestor: ObjRef) -> bool {
        let mut cur = Some(cls);
        while let Some(c) = cur {
            if c == ancestor {
                return true;
            }
            cur = self.superclass(c);
        }
        false
    }

    /// `v.is_a?(cls)`
    pub fn is_kind_of(&self, v: RawValue, cls: ObjRef) -> bool {
        self.is_subclass(self.class_of(v), cls)
    }

    /// Look up a constant visible from `scope`: lexical outers first, then
    /// ancestors, then `Object`
    pub fn const_get(&self, scope: ObjRef, sym: Sym) -> Option<RawValue> {
        let mut cur = Some(scope);
        while let Some(c) = cur {
            let class = self.rclass(c)?;
            if let Some(v) = class.consts.get(&sym) {
                return Some(*v);
            }
            cur = class.outer;
        }
        let mut cur = self.superclass(scope);
        while let Some(c) = cur {
            if let Some(v) = self.rclass(c)?.consts.get(&sym) {
                return Some(*v);
            }
            cur = self.superclass(c);
        }
        self.rclass(self.core.object)?.consts.get(&sym).copied()
    }

    /// Set a constant on `cls`
    pub fn const_set(&mut self, cls: ObjRef, sym: Sym, v: RawValue) {
        if let Some(c) = self.rclass_mut(cls) {
            c.consts.insert(sym, v);
        }
    }

    /// Resolve a class or module by name; `A::B` paths start at `Object`
    pub fn class_get(&self, path: &str) -> Option<ObjRef> {
        let mut scope = self.core.object;
        for part in path.split("::") {
            let sym = self.symbols.lookup(part.as_bytes())?;
            let v = *self.rclass(scope)?.consts.get(&sym)?;
            scope = self.class_ref(v)?;
        }
        Some(scope)
    }

    /// Open `name` under `outer`, creating it when missing.
    ///
    /// Raises `TypeError` when the constant exists but is not a class, or
    /// when an explicit superclass disagrees with the existing one.
    pub fn define_class(&mut self, name: &str, superclass: Option<ObjRef>, outer: ObjRef) -> ObjRef {
        let sym = self.intern_str(name);
        self.define_class_sym(sym, superclass, outer)
    }

    pub(crate) fn define_class_sym(
        &mut self,
        sym: Sym,
        superclass: Option<ObjRef>,
        outer: ObjRef,
    ) -> ObjRef {
        let existing = self.rclass(outer).and_then(|c| c.consts.get(&sym).copied());
        if let Some(v) = existing {
            let name = self.sym_str(sym);
            match self.class_ref(v) {
                Some(cls) if !self.is_module(cls) => {
                    if let Some(sup) = superclass {
                        if self.superclass(cls) != Some(sup) {
                            let msg = format!("superclass mismatch for class {}", name);
                            self.raise(self.core.type_error, &msg);
                        }
                    }
                    return cls;
                }
                _ => {
                    let msg = format!("{} is not a class", name);
                    self.raise(self.core.type_error, &msg)
                }
            }
        }
        let superclass = superclass.unwrap_or(self.core.object);
        let instance_tt = self
            .rclass(superclass)
            .map(|c| c.instance_tt)
            .unwrap_or(InstanceTt::Object);
        let mut class = RClass::new(Some(sym), ClassKind::Class, Some(superclass), Some(outer));
        class.instance_tt = instance_tt;
        let v = self.alloc(RObject::Class(class));
        self.const_set(outer, sym, v);
        tracing::trace!(class = %self.sym_str(sym), "defined class");
        self.class_ref(v).unwrap_or(self.core.object)
    }

    /// Open module `name` under `outer`, creating it when missing
    pub fn define_module(&mut self, name: &str, outer: ObjRef) -> ObjRef {
        let sym = self.intern_str(name);
        self.define_module_sym(sym, outer)
    }

    pub(crate) fn define_module_sym(&mut self, sym: Sym, outer: ObjRef) -> ObjRef {
        let existing = self.rclass(outer).and_then(|c| c.consts.get(&sym).copied());
        if let Some(v) = existing {
            match self.class_ref(v) {
                Some(m) if self.is_module(m) => return m,
                _ => {
                    let msg = format!("{} is not a module", self.sym_str(sym));
                    self.raise(self.core.type_error, &msg)
                }
            }
        }
        let v = self.alloc(RObject::Class(RClass::new(
            Some(sym),
            ClassKind::Module,
            None,
            Some(outer),
        )));
        self.const_set(outer, sym, v);
        self.class_ref(v).unwrap_or(self.core.object)
    }

    /// Instance representation of `cls`
    pub fn instance_tt(&self, cls: ObjRef) -> Option<InstanceTt> {
        self.rclass(cls).map(|c| c.instance_tt)
    }

    /// Change the instance representation of `cls`
    pub fn set_instance_tt(&mut self, cls: ObjRef, tt: InstanceTt) -> bool {
        match self.rclass_mut(cls) {
            Some(c) => {
                c.instance_tt = tt;
                true
            }
            None => false,
        }
    }

    /// Define a host method
    pub fn define_method(&mut self, cls: ObjRef, name: &str, f: NativeFn) {
        let sym = self.intern_str(name);
        let proc = self.alloc(RObject::Proc(RProc {
            body: ProcBody::Native(f),
            target_class: Some(cls),
        }));
        if let (Some(p), Some(c)) = (proc.as_obj(), self.rclass_mut(cls)) {
            c.methods.insert(sym, p);
        }
    }

    /// Define a host method on the class object itself, e.g. `Point.origin`
    pub fn define_singleton_method(&mut self, cls: ObjRef, name: &str, f: NativeFn) {
        let sym = self.intern_str(name);
        let proc = self.alloc(RObject::Proc(RProc {
            body: ProcBody::Native(f),
            target_class: Some(cls),
        }));
        if let (Some(p), Some(c)) = (proc.as_obj(), self.rclass_mut(cls)) {
            c.singleton_methods.insert(sym, p);
        }
    }

    /// Define a host method from a plain function
    pub fn define_fn(&mut self, cls: ObjRef, name: &str, f: fn(&mut Vm, RawValue, &[RawValue]) -> RawValue) {
        self.define_method(cls, name, Rc::new(f));
    }

    /// Find a method on `cls` or its ancestors
    pub fn find_method(&self, cls: ObjRef, mid: Sym) -> Option<ObjRef> {
        let mut cur = Some(cls);
        while let Some(c) = cur {
            let class = self.rclass(c)?;
            if let Some(p) = class.methods.get(&mid) {
                return Some(*p);
            }
            cur = class.superclass;
        }
        None
    }

    /// Find a method called on the class object `cls`, searching the
    /// singleton tables of its superclass chain
    pub fn find_singleton_method(&self, cls: ObjRef, mid: Sym) -> Option<ObjRef> {
        let mut cur = Some(cls);
        while let Some(c) = cur {
            let class = self.rclass(c)?;
            if let Some(p) = class.singleton_methods.get(&mid) {
                return Some(*p);
            }
            cur = class.superclass;
        }
        None
    }

    /// Method `recv.mid` resolves to. Class and module receivers try their
    /// singleton methods before the methods of `Class` and `Module`.
    pub fn lookup_method(&self, recv: RawValue, mid: Sym) -> Option<ObjRef> {
        self.class_ref(recv)
            .and_then(|cls| self.find_singleton_method(cls, mid))
            .or_else(|| self.find_method(self.class_of(recv), mid))
    }

    /// Method body as a proc value
    pub fn method_proc(&self, cls: ObjRef, mid: Sym) -> Option<RawValue> {
        self.find_method(cls, mid)
            .map(|p| RawValue::object(ValueType::Proc, p))
    }

    /// Whether `v` responds to `mid`
    pub fn respond_to(&self, v: RawValue, mid: Sym) -> bool {
        self.lookup_method(v, mid).is_some()
    }

    // ===== Procs =====

    /// Wrap a compiled procedure as a top-level proc
    pub fn proc_new(&mut self, irep: Rc<Irep>) -> RawValue {
        let target_class = Some(self.core.object);
        self.alloc(RObject::Proc(RProc {
            body: ProcBody::Irep(irep),
            target_class,
        }))
    }

    /// Proc object behind a value
    pub fn proc_ref(&self, v: RawValue) -> Option<&RProc> {
        match self.obj(v)? {
            RObject::Proc(p) => Some(p),
            _ => None,
        }
    }

    /// Compiled body of a proc value
    pub fn proc_irep(&self, v: RawValue) -> Option<Rc<Irep>> {
        self.proc_ref(v)?.irep().cloned()
    }

    // ===== Data =====

    /// New data object of class `cls`
    pub fn data_new(&mut self, cls: ObjRef, ptr: *mut c_void, ty: Option<Rc<DataType>>) -> RawValue {
        self.alloc(RObject::Data(RData { class: cls, ptr, ty }))
    }

    /// Data cell behind a value
    pub fn data(&self, v: RawValue) -> Option<&RData> {
        match self.obj(v)? {
            RObject::Data(d) => Some(d),
            _ => None,
        }
    }

    /// Mutable data cell behind a value
    pub fn data_mut(&mut self, v: RawValue) -> Option<&mut RData> {
        match self.obj_mut(v)? {
            RObject::Data(d) => Some(d),
            _ => None,
        }
    }

    // ===== Recovery points =====

    /// Innermost registered recovery point
    pub fn jump_target(&self) -> Option<JumpId> {
        self.jmp
    }

    /// Replace the innermost recovery point
    pub fn set_jump_target(&mut self, target: Option<JumpId>) {
        self.jmp = target;
    }

    /// Fresh recovery point id
    pub fn new_jump_id(&mut self) -> JumpId {
        let id = JumpId::new(self.next_jump);
        self.next_jump += 1;
        id
    }

    /// Snapshot stack heights before a guarded call
    pub fn frame_mark(&self) -> FrameMark {
        FrameMark {
            callinfo: self.callinfo.len(),
            stack: self.stack.len(),
            arena: self.arena.len(),
        }
    }

    /// Drop frames pushed since `mark` after a caught jump
    pub fn unwind_to(&mut self, mark: FrameMark) {
        self.callinfo.truncate(mark.callinfo);
        self.stack.truncate(mark.stack);
        self.arena.truncate(mark.arena);
    }

    /// Current call depth
    pub fn call_depth(&self) -> usize {
        self.callinfo.len()
    }
}

impl Drop for Vm {
    fn drop(&mut self) {
        let live = self.heap.live();
        self.heap.clear();
        tracing::debug!(freed = live, "vm closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boot_defines_core_constants() {
        let vm = Vm::new(VmOptions::default());
        let se = vm.class_get("StandardError").unwrap();
        assert_eq!(se, vm.core().standard_error);
        assert!(vm.is_subclass(vm.core().no_method_error, vm.core().name_error));
        assert!(vm.is_subclass(vm.core().syntax_error, vm.core().exception));
        assert!(!vm.is_subclass(vm.core().system_stack_error, se));
        assert_eq!(vm.class_get("Object"), Some(vm.object_class()));
        assert_eq!(vm.class_get("Missing"), None);
    }

    #[test]
    fn test_class_of_immediates() {
        let vm = Vm::new(VmOptions::default());
        assert_eq!(vm.class_of(RawValue::nil()), vm.core().nil);
        assert_eq!(vm.class_of(RawValue::false_value()), vm.core().false_class);
        assert_eq!(vm.class_of(RawValue::fixnum(1)), vm.core().integer);
        assert_eq!(vm.class_name(vm.class_of(RawValue::float(1.0))), "Float");
    }

    #[test]
    fn test_define_class_and_module_nesting() {
        let mut vm = Vm::new(VmOptions::default());
        let object = vm.object_class();
        let m = vm.define_module("Outer", object);
        let c = vm.define_class("Inner", None, m);
        assert_eq!(vm.class_name(c), "Outer::Inner");
        assert_eq!(vm.class_get("Outer::Inner"), Some(c));
        assert!(vm.is_module(m));
        assert_eq!(vm.class_value(m).tt(), ValueType::Module);
        assert_eq!(vm.define_class("Inner", None, m), c);
    }

    #[test]
    fn test_subclass_inherits_instance_tt() {
        let mut vm = Vm::new(VmOptions::default());
        let object = vm.object_class();
        let base = vm.define_class("Handle", None, object);
        assert!(vm.set_instance_tt(base, InstanceTt::Data));
        let sub = vm.define_class("SubHandle", Some(base), object);
        assert_eq!(vm.instance_tt(sub), Some(InstanceTt::Data));
    }

    #[test]
    fn test_gc_keeps_registered_and_frees_rest() {
        let mut vm = Vm::new(VmOptions::default());
        let idx = vm.arena_save();
        let kept = vm.str_new(b"kept");
        let _dropped = vm.str_new(b"dropped");
        vm.gc_register(kept);
        vm.arena_restore(idx);
        let before = vm.live_objects();
        assert_eq!(vm.full_gc(), 1);
        assert_eq!(vm.live_objects(), before - 1);
        assert_eq!(vm.string_bytes(kept), Some(&b"kept"[..]));
        vm.gc_unregister(kept);
        assert_eq!(vm.full_gc(), 1);
    }

    fn constant(v: RawValue) -> NativeFn {
        Rc::new(move |_: &mut Vm, _: RawValue, _: &[RawValue]| v)
    }

    #[test]
    fn test_singleton_methods_inherit_and_shadow() {
        let mut vm = Vm::new(VmOptions::default());
        let object = vm.object_class();
        let base = vm.define_class("Base", None, object);
        let sub = vm.define_class("Sub", Some(base), object);
        vm.define_singleton_method(base, "make", constant(RawValue::fixnum(1)));
        let make = vm.intern_str("make");
        let new = vm.intern_str("new");

        let sub_val = vm.class_value(sub);
        assert!(vm.lookup_method(sub_val, make).is_some());
        assert!(vm.find_method(sub, make).is_none());
        assert_eq!(vm.lookup_method(sub_val, new), vm.find_method(vm.core().class, new));

        vm.define_singleton_method(sub, "new", constant(RawValue::nil()));
        assert_ne!(vm.lookup_method(sub_val, new), vm.find_method(vm.core().class, new));
    }

    #[test]
    fn test_array_push_and_trace() {
        let mut vm = Vm::new(VmOptions::default());
        let idx = vm.arena_save();
        let s = vm.str_new(b"elem");
        let array = vm.array_new(&[RawValue::fixnum(1)]);
        assert!(vm.array_push(array, s));
        assert!(!vm.array_push(s, s));
        assert_eq!(vm.class_of(array), vm.core().array);
        vm.gc_register(array);
        vm.arena_restore(idx);
        assert_eq!(vm.full_gc(), 0);
        assert_eq!(vm.array_items(array).map(<[_]>::len), Some(2));
        assert_eq!(vm.string_bytes(vm.array_items(array).unwrap()[1]), Some(&b"elem"[..]));
    }

    #[test]
    fn test_jump_ids_are_unique() {
        let mut vm = Vm::new(VmOptions::default());
        let a = vm.new_jump_id();
        let b = vm.new_jump_id();
        assert_ne!(a, b);
        assert_eq!(vm.jump_target(), None);
        vm.set_jump_target(Some(a));
        assert_eq!(vm.jump_target(), Some(a));
    }
}
