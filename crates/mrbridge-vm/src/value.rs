//! Tagged value representation
//!
//! Values are stored unboxed as a payload union plus a type tag, the same
//! layout a C embedding API would hand across the boundary.
//!
//! # Layout
//!
//! ```text
//! ┌───────────────────────────────┬──────────────┐
//! │ payload (8 bytes, union)      │ tt (4 bytes) │
//! │   i: i64    f: f64            │              │
//! │   sym: u32  p: *mut c_void    │              │
//! │   obj: u32 (heap slot)        │              │
//! └───────────────────────────────┴──────────────┘
//! ```
//!
//! `nil` and `false` share the `False` tag and differ only in the integer
//! arm (0 = nil, 1 = false). Every constructor zero-fills the payload first,
//! so all eight payload bytes are always initialized.

use crate::heap::ObjRef;
use crate::symbol::Sym;
use std::ffi::c_void;
use std::fmt;

/// Type tag of a [`RawValue`]
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// `nil` (payload 0) or `false` (payload 1)
    False = 0,
    /// `true`
    True = 1,
    /// Fixed-width integer
    Fixnum = 2,
    /// Interned symbol
    Symbol = 3,
    /// Unboxed double
    Float = 4,
    /// Opaque host pointer, never dereferenced by the VM
    CPtr = 5,
    /// Plain object instance
    Object = 6,
    /// Class object
    Class = 7,
    /// Module object
    Module = 8,
    /// Procedure (compiled or host)
    Proc = 9,
    /// Byte string
    String = 10,
    /// Exception instance
    Exception = 11,
    /// Host payload with a type descriptor
    Data = 12,
    /// Array of values
    Array = 13,
}

impl ValueType {
    /// Decode a raw tag number
    pub fn from_u32(n: u32) -> Option<Self> {
        Some(match n {
            0 => ValueType::False,
            1 => ValueType::True,
            2 => ValueType::Fixnum,
            3 => ValueType::Symbol,
            4 => ValueType::Float,
            5 => ValueType::CPtr,
            6 => ValueType::Object,
            7 => ValueType::Class,
            8 => ValueType::Module,
            9 => ValueType::Proc,
            10 => ValueType::String,
            11 => ValueType::Exception,
            12 => ValueType::Data,
            13 => ValueType::Array,
            _ => return None,
        })
    }

    /// Whether the payload is a heap slot
    #[inline]
    pub const fn is_heap(self) -> bool {
        matches!(
            self,
            ValueType::Object
                | ValueType::Class
                | ValueType::Module
                | ValueType::Proc
                | ValueType::String
                | ValueType::Exception
                | ValueType::Data
                | ValueType::Array
        )
    }

    /// Tag name for diagnostics
    pub const fn name(self) -> &'static str {
        match self {
            ValueType::False => "false",
            ValueType::True => "true",
            ValueType::Fixnum => "fixnum",
            ValueType::Symbol => "symbol",
            ValueType::Float => "float",
            ValueType::CPtr => "cptr",
            ValueType::Object => "object",
            ValueType::Class => "class",
            ValueType::Module => "module",
            ValueType::Proc => "proc",
            ValueType::String => "string",
            ValueType::Exception => "exception",
            ValueType::Data => "data",
            ValueType::Array => "array",
        }
    }
}

/// Payload of a [`RawValue`]; which arm is live is decided by the tag.
#[repr(C)]
#[derive(Clone, Copy)]
pub union ValueUnion {
    /// Fixnum payload, also nil/false discriminator
    pub i: i64,
    /// Float payload
    pub f: f64,
    /// Symbol id
    pub sym: u32,
    /// Host pointer
    pub p: *mut c_void,
    /// Heap slot index
    pub obj: u32,
}

/// Unboxed VM value
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawValue {
    /// Payload
    pub value: ValueUnion,
    /// Type tag
    pub tt: ValueType,
}

impl RawValue {
    /// `nil`
    #[inline]
    pub const fn nil() -> Self {
        Self {
            value: ValueUnion { i: 0 },
            tt: ValueType::False,
        }
    }

    /// `false`
    #[inline]
    pub const fn false_value() -> Self {
        Self {
            value: ValueUnion { i: 1 },
            tt: ValueType::False,
        }
    }

    /// `true`
    #[inline]
    pub const fn true_value() -> Self {
        Self {
            value: ValueUnion { i: 1 },
            tt: ValueType::True,
        }
    }

    /// Boolean
    #[inline]
    pub const fn bool(b: bool) -> Self {
        if b {
            Self::true_value()
        } else {
            Self::false_value()
        }
    }

    /// Fixnum
    #[inline]
    pub const fn fixnum(i: i64) -> Self {
        Self {
            value: ValueUnion { i },
            tt: ValueType::Fixnum,
        }
    }

    /// Float
    #[inline]
    pub const fn float(f: f64) -> Self {
        Self {
            value: ValueUnion { f },
            tt: ValueType::Float,
        }
    }

    /// Symbol
    #[inline]
    pub fn symbol(sym: Sym) -> Self {
        let mut value = ValueUnion { i: 0 };
        value.sym = sym.as_u32();
        Self {
            value,
            tt: ValueType::Symbol,
        }
    }

    /// Opaque host pointer
    #[inline]
    pub const fn cptr(p: *mut c_void) -> Self {
        Self {
            value: ValueUnion { p },
            tt: ValueType::CPtr,
        }
    }

    /// Heap reference with the given tag
    #[inline]
    pub fn object(tt: ValueType, obj: ObjRef) -> Self {
        debug_assert!(tt.is_heap(), "{} is not a heap tag", tt.name());
        let mut value = ValueUnion { i: 0 };
        value.obj = obj.index();
        Self { value, tt }
    }

    /// Type tag
    #[inline]
    pub const fn tt(&self) -> ValueType {
        self.tt
    }

    /// All eight payload bytes as an integer
    #[inline]
    pub fn bits(&self) -> i64 {
        // SAFETY: every constructor initializes the full 8-byte payload
        unsafe { self.value.i }
    }

    /// `nil`?
    #[inline]
    pub fn is_nil(&self) -> bool {
        self.tt == ValueType::False && self.bits() == 0
    }

    /// Only `nil` and `false` are falsey
    #[inline]
    pub fn is_truthy(&self) -> bool {
        self.tt != ValueType::False
    }

    /// Read the fixnum arm without checking the tag
    ///
    /// # Safety
    /// The tag must be `Fixnum`; otherwise the result is a reinterpretation of
    /// whatever payload the value carries.
    #[inline]
    pub unsafe fn fixnum_unchecked(&self) -> i64 {
        self.value.i
    }

    /// Read the float arm without checking the tag
    ///
    /// # Safety
    /// The tag must be `Float`.
    #[inline]
    pub unsafe fn float_unchecked(&self) -> f64 {
        self.value.f
    }

    /// Read the symbol arm without checking the tag
    ///
    /// # Safety
    /// The tag must be `Symbol`.
    #[inline]
    pub unsafe fn sym_unchecked(&self) -> Sym {
        Sym::from_u32(self.value.sym)
    }

    /// Read the pointer arm without checking the tag
    ///
    /// # Safety
    /// The tag must be `CPtr`.
    #[inline]
    pub unsafe fn cptr_unchecked(&self) -> *mut c_void {
        self.value.p
    }

    /// Read the heap-slot arm without checking the tag
    ///
    /// # Safety
    /// The tag must be a heap tag.
    #[inline]
    pub unsafe fn obj_unchecked(&self) -> ObjRef {
        ObjRef::from_index(self.value.obj)
    }

    /// Fixnum payload, if this is a fixnum
    #[inline]
    pub fn as_fixnum(&self) -> Option<i64> {
        (self.tt == ValueType::Fixnum).then(|| unsafe { self.fixnum_unchecked() })
    }

    /// Float payload, if this is a float
    #[inline]
    pub fn as_float(&self) -> Option<f64> {
        (self.tt == ValueType::Float).then(|| unsafe { self.float_unchecked() })
    }

    /// Symbol payload, if this is a symbol
    #[inline]
    pub fn as_sym(&self) -> Option<Sym> {
        (self.tt == ValueType::Symbol).then(|| unsafe { self.sym_unchecked() })
    }

    /// Pointer payload, if this is a cptr
    #[inline]
    pub fn as_cptr(&self) -> Option<*mut c_void> {
        (self.tt == ValueType::CPtr).then(|| unsafe { self.cptr_unchecked() })
    }

    /// Heap slot, if this is heap-backed
    #[inline]
    pub fn as_obj(&self) -> Option<ObjRef> {
        self.tt.is_heap().then(|| unsafe { self.obj_unchecked() })
    }

    /// Tag and payload identity
    #[inline]
    pub fn identical(&self, other: &RawValue) -> bool {
        self.tt == other.tt && self.bits() == other.bits()
    }
}

impl Default for RawValue {
    fn default() -> Self {
        RawValue::nil()
    }
}

impl PartialEq for RawValue {
    fn eq(&self, other: &Self) -> bool {
        self.identical(other)
    }
}

impl fmt::Debug for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tt {
            ValueType::False if self.is_nil() => write!(f, "nil"),
            ValueType::False => write!(f, "false"),
            ValueType::True => write!(f, "true"),
            ValueType::Fixnum => write!(f, "fixnum({})", self.bits()),
            ValueType::Float => write!(f, "float({})", unsafe { self.float_unchecked() }),
            ValueType::Symbol => write!(f, "symbol({})", unsafe { self.value.sym }),
            ValueType::CPtr => write!(f, "cptr({:p})", unsafe { self.cptr_unchecked() }),
            tt => write!(f, "{}(#{})", tt.name(), unsafe { self.value.obj }),
        }
    }
}
