//! Heap object model
//!
//! Every heap cell holds one [`RObject`]. Classes and modules share
//! [`RClass`]; procedures are either compiled ([`Irep`]) or host closures.

use crate::heap::ObjRef;
use crate::irep::Irep;
use crate::symbol::Sym;
use crate::value::{RawValue, ValueType};
use crate::vm::Vm;
use rustc_hash::FxHashMap;
use std::ffi::c_void;
use std::fmt;
use std::rc::Rc;

/// Host-implemented method body
///
/// Receives the VM, the receiver and the arguments. Failures are reported by
/// raising through the VM, never by returning.
pub type NativeFn = Rc<dyn Fn(&mut Vm, RawValue, &[RawValue]) -> RawValue>;

/// Heap object payload
pub enum RObject {
    /// Plain instance
    Instance {
        /// Class of the instance
        class: ObjRef,
    },
    /// Byte string
    String {
        /// Contents, not necessarily UTF-8
        bytes: Vec<u8>,
    },
    /// Raised or raisable exception
    Exception(RException),
    /// Class or module
    Class(RClass),
    /// Procedure
    Proc(RProc),
    /// Host payload
    Data(RData),
    /// Array of values
    Array {
        /// Elements in order
        items: Vec<RawValue>,
    },
}

impl RObject {
    /// Value tag used when this object is handed out as a [`RawValue`]
    pub fn value_type(&self) -> ValueType {
        match self {
            RObject::Instance { .. } => ValueType::Object,
            RObject::String { .. } => ValueType::String,
            RObject::Exception(_) => ValueType::Exception,
            RObject::Class(c) if c.kind == ClassKind::Module => ValueType::Module,
            RObject::Class(_) => ValueType::Class,
            RObject::Proc(_) => ValueType::Proc,
            RObject::Data(_) => ValueType::Data,
            RObject::Array { .. } => ValueType::Array,
        }
    }

    /// Push every heap reference held by this object onto `out`
    pub fn trace(&self, out: &mut Vec<ObjRef>) {
        match self {
            RObject::Instance { class } => out.push(*class),
            RObject::String { .. } => {}
            RObject::Exception(e) => out.push(e.class),
            RObject::Class(c) => {
                out.extend(c.superclass);
                out.extend(c.outer);
                out.extend(c.methods.values().copied());
                out.extend(c.singleton_methods.values().copied());
                out.extend(c.consts.values().filter_map(RawValue::as_obj));
            }
            RObject::Proc(p) => out.extend(p.target_class),
            RObject::Data(d) => out.push(d.class),
            RObject::Array { items } => out.extend(items.iter().filter_map(RawValue::as_obj)),
        }
    }
}

impl fmt::Debug for RObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RObject::Instance { class } => write!(f, "Instance({:?})", class),
            RObject::String { bytes } => write!(f, "String({:?})", String::from_utf8_lossy(bytes)),
            RObject::Exception(e) => write!(f, "Exception({:?}, {:?})", e.class, e.message),
            RObject::Class(c) => write!(f, "{:?}({:?})", c.kind, c.name),
            RObject::Proc(p) => write!(f, "Proc(native: {})", p.is_native()),
            RObject::Data(d) => write!(f, "Data({:?}, {:p})", d.class, d.ptr),
            RObject::Array { items } => write!(f, "Array(len: {})", items.len()),
        }
    }
}

/// Exception instance
#[derive(Debug, Clone)]
pub struct RException {
    /// Exception class
    pub class: ObjRef,
    /// Message, empty when none was given
    pub message: String,
    /// Frames captured at raise time, most recent first
    pub backtrace: Vec<String>,
}

/// Class or module flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    /// Instantiable class
    Class,
    /// Namespace and method container
    Module,
}

/// How instances of a class are laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceTt {
    /// Ordinary instance cells
    Object,
    /// Data cells carrying a host payload
    Data,
}

/// Class or module object
#[derive(Debug)]
pub struct RClass {
    /// Constant name, `None` while anonymous
    pub name: Option<Sym>,
    /// Class or module
    pub kind: ClassKind,
    /// Superclass; `None` for the root class and for modules
    pub superclass: Option<ObjRef>,
    /// Method table, each entry a proc cell
    pub methods: FxHashMap<Sym, ObjRef>,
    /// Methods called on the class object itself; subclasses inherit them
    pub singleton_methods: FxHashMap<Sym, ObjRef>,
    /// Constant table
    pub consts: FxHashMap<Sym, RawValue>,
    /// Instance representation
    pub instance_tt: InstanceTt,
    /// Lexically enclosing class or module
    pub outer: Option<ObjRef>,
}

impl RClass {
    /// Create an empty class or module
    pub fn new(
        name: Option<Sym>,
        kind: ClassKind,
        superclass: Option<ObjRef>,
        outer: Option<ObjRef>,
    ) -> Self {
        Self {
            name,
            kind,
            superclass,
            methods: FxHashMap::default(),
            singleton_methods: FxHashMap::default(),
            consts: FxHashMap::default(),
            instance_tt: InstanceTt::Object,
            outer,
        }
    }
}

/// Procedure body
#[derive(Clone)]
pub enum ProcBody {
    /// Compiled bytecode
    Irep(Rc<Irep>),
    /// Host closure
    Native(NativeFn),
}

/// Procedure object
#[derive(Clone)]
pub struct RProc {
    /// Body
    pub body: ProcBody,
    /// Class methods defined inside this proc attach to
    pub target_class: Option<ObjRef>,
}

impl RProc {
    /// Whether the body is a host closure
    pub fn is_native(&self) -> bool {
        matches!(self.body, ProcBody::Native(_))
    }

    /// Compiled body, if any
    pub fn irep(&self) -> Option<&Rc<Irep>> {
        match &self.body {
            ProcBody::Irep(irep) => Some(irep),
            ProcBody::Native(_) => None,
        }
    }
}

/// Host destructor for a data payload
pub type DataFree = unsafe extern "C" fn(*mut c_void);

/// Run-time type tag of a data payload
///
/// Two descriptors describe the same type iff their names are equal.
#[derive(Debug, Clone)]
pub struct DataType {
    /// Type name
    pub name: String,
    /// Destructor invoked once when the owning cell dies
    pub dfree: Option<DataFree>,
}

impl PartialEq for DataType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for DataType {}

/// Data cell: a host payload owned by the VM from wrap time on
#[derive(Debug)]
pub struct RData {
    /// Class of the instance
    pub class: ObjRef,
    /// Payload, null until initialized
    pub ptr: *mut c_void,
    /// Descriptor, `None` until initialized
    pub ty: Option<Rc<DataType>>,
}

impl Drop for RData {
    fn drop(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        if let Some(dfree) = self.ty.as_ref().and_then(|t| t.dfree) {
            tracing::trace!(ty = %self.ty.as_ref().map(|t| t.name.as_str()).unwrap_or(""), "freeing data payload");
            // SAFETY: the payload was handed over together with this destructor
            // and the cell is being destroyed, so this is the only call.
            unsafe { dfree(self.ptr) };
        }
        self.ptr = std::ptr::null_mut();
    }
}
