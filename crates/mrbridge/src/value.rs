//! Value Bridge
//!
//! [`Value`] is a closed sum type with one variant per VM tag. This module
//! is the only code in the shim that reads the VM's value union: everything
//! else converts through [`Value::from_raw`] and [`Value::into_raw`].
//!
//! # Memory Management
//!
//! Values are `Copy` and own nothing. Heap variants stay valid while the
//! collector can reach them: from the GC arena, a registration
//! ([`gc_register`]) or another reachable object.

use crate::context::Context;
use mrbridge_vm::{ObjRef, RawValue, Sym, ValueType};
use std::ffi::c_void;

/// Tagged VM value
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Value {
    /// `nil`
    #[default]
    Nil,
    /// `true` / `false`
    Bool(bool),
    /// Fixed-width integer
    FixedInt(i64),
    /// Float
    Float(f64),
    /// Interned symbol
    Symbol(Sym),
    /// Opaque host pointer the VM never dereferences
    RawPointer(*mut c_void),
    /// Procedure
    Proc(ObjRef),
    /// Class
    ClassRef(ObjRef),
    /// Module
    ModuleRef(ObjRef),
    /// Host payload cell
    DataObject(ObjRef),
    /// String
    String(ObjRef),
    /// Exception instance
    Exception(ObjRef),
    /// Plain object instance
    Object(ObjRef),
    /// Array
    Array(ObjRef),
}

/// Discriminant of a [`Value`]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantTag {
    /// [`Value::Nil`]
    Nil = 0,
    /// [`Value::Bool`]
    Bool = 1,
    /// [`Value::FixedInt`]
    FixedInt = 2,
    /// [`Value::Float`]
    Float = 3,
    /// [`Value::Symbol`]
    Symbol = 4,
    /// [`Value::RawPointer`]
    RawPointer = 5,
    /// [`Value::Proc`]
    Proc = 6,
    /// [`Value::ClassRef`]
    ClassRef = 7,
    /// [`Value::ModuleRef`]
    ModuleRef = 8,
    /// [`Value::DataObject`]
    DataObject = 9,
    /// [`Value::String`]
    String = 10,
    /// [`Value::Exception`]
    Exception = 11,
    /// [`Value::Object`]
    Object = 12,
    /// [`Value::Array`]
    Array = 13,
}

impl VariantTag {
    /// Tag from its numeric form
    pub fn from_u32(n: u32) -> Option<Self> {
        use VariantTag::*;
        Some(match n {
            0 => Nil,
            1 => Bool,
            2 => FixedInt,
            3 => Float,
            4 => Symbol,
            5 => RawPointer,
            6 => Proc,
            7 => ClassRef,
            8 => ModuleRef,
            9 => DataObject,
            10 => String,
            11 => Exception,
            12 => Object,
            13 => Array,
            _ => return None,
        })
    }

    /// Display name
    pub fn name(self) -> &'static str {
        match self {
            VariantTag::Nil => "nil",
            VariantTag::Bool => "bool",
            VariantTag::FixedInt => "integer",
            VariantTag::Float => "float",
            VariantTag::Symbol => "symbol",
            VariantTag::RawPointer => "raw pointer",
            VariantTag::Proc => "proc",
            VariantTag::ClassRef => "class",
            VariantTag::ModuleRef => "module",
            VariantTag::DataObject => "data object",
            VariantTag::String => "string",
            VariantTag::Exception => "exception",
            VariantTag::Object => "object",
            VariantTag::Array => "array",
        }
    }
}

impl Value {
    /// Decode a VM value
    pub fn from_raw(raw: RawValue) -> Self {
        // SAFETY: each arm reads the union member its tag designates
        unsafe {
            match raw.tt() {
                ValueType::False if raw.is_nil() => Value::Nil,
                ValueType::False => Value::Bool(false),
                ValueType::True => Value::Bool(true),
                ValueType::Fixnum => Value::FixedInt(raw.fixnum_unchecked()),
                ValueType::Float => Value::Float(raw.float_unchecked()),
                ValueType::Symbol => Value::Symbol(raw.sym_unchecked()),
                ValueType::CPtr => Value::RawPointer(raw.cptr_unchecked()),
                ValueType::Proc => Value::Proc(raw.obj_unchecked()),
                ValueType::Class => Value::ClassRef(raw.obj_unchecked()),
                ValueType::Module => Value::ModuleRef(raw.obj_unchecked()),
                ValueType::Data => Value::DataObject(raw.obj_unchecked()),
                ValueType::String => Value::String(raw.obj_unchecked()),
                ValueType::Exception => Value::Exception(raw.obj_unchecked()),
                ValueType::Object => Value::Object(raw.obj_unchecked()),
                ValueType::Array => Value::Array(raw.obj_unchecked()),
            }
        }
    }

    /// Encode for the VM
    pub fn into_raw(self) -> RawValue {
        match self {
            Value::Nil => RawValue::nil(),
            Value::Bool(b) => RawValue::bool(b),
            Value::FixedInt(i) => RawValue::fixnum(i),
            Value::Float(f) => RawValue::float(f),
            Value::Symbol(s) => RawValue::symbol(s),
            Value::RawPointer(p) => RawValue::cptr(p),
            Value::Proc(r) => RawValue::object(ValueType::Proc, r),
            Value::ClassRef(r) => RawValue::object(ValueType::Class, r),
            Value::ModuleRef(r) => RawValue::object(ValueType::Module, r),
            Value::DataObject(r) => RawValue::object(ValueType::Data, r),
            Value::String(r) => RawValue::object(ValueType::String, r),
            Value::Exception(r) => RawValue::object(ValueType::Exception, r),
            Value::Object(r) => RawValue::object(ValueType::Object, r),
            Value::Array(r) => RawValue::object(ValueType::Array, r),
        }
    }

    /// Discriminant
    pub fn tag(&self) -> VariantTag {
        match self {
            Value::Nil => VariantTag::Nil,
            Value::Bool(_) => VariantTag::Bool,
            Value::FixedInt(_) => VariantTag::FixedInt,
            Value::Float(_) => VariantTag::Float,
            Value::Symbol(_) => VariantTag::Symbol,
            Value::RawPointer(_) => VariantTag::RawPointer,
            Value::Proc(_) => VariantTag::Proc,
            Value::ClassRef(_) => VariantTag::ClassRef,
            Value::ModuleRef(_) => VariantTag::ModuleRef,
            Value::DataObject(_) => VariantTag::DataObject,
            Value::String(_) => VariantTag::String,
            Value::Exception(_) => VariantTag::Exception,
            Value::Object(_) => VariantTag::Object,
            Value::Array(_) => VariantTag::Array,
        }
    }

    /// Heap reference, for heap variants
    pub fn obj_ref(&self) -> Option<ObjRef> {
        match *self {
            Value::Proc(r)
            | Value::ClassRef(r)
            | Value::ModuleRef(r)
            | Value::DataObject(r)
            | Value::String(r)
            | Value::Exception(r)
            | Value::Object(r)
            | Value::Array(r) => Some(r),
            _ => None,
        }
    }

    /// Whether this is `nil`
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Script truthiness: everything but `nil` and `false`
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    /// Integer payload
    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Value::FixedInt(i) => Some(i),
            _ => None,
        }
    }

    /// Float payload
    pub fn as_float(&self) -> Option<f64> {
        match *self {
            Value::Float(f) => Some(f),
            _ => None,
        }
    }

    /// Boolean payload
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    /// Symbol payload
    pub fn as_symbol(&self) -> Option<Sym> {
        match *self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }
}

impl From<RawValue> for Value {
    fn from(raw: RawValue) -> Self {
        Value::from_raw(raw)
    }
}

impl From<Value> for RawValue {
    fn from(v: Value) -> Self {
        v.into_raw()
    }
}

// ============================================================================
// Bridge operations
// ============================================================================

/// Integer payload of a value the caller has tag-checked; `0` otherwise
#[inline]
pub fn to_int(v: Value) -> i64 {
    v.as_int().unwrap_or(0)
}

/// Float payload of a value the caller has tag-checked; `NaN` otherwise
#[inline]
pub fn to_float(v: Value) -> f64 {
    v.as_float().unwrap_or(f64::NAN)
}

/// `nil`
#[inline]
pub const fn make_nil() -> Value {
    Value::Nil
}

/// `false`
#[inline]
pub const fn make_false() -> Value {
    Value::Bool(false)
}

/// `true`
#[inline]
pub const fn make_true() -> Value {
    Value::Bool(true)
}

/// Integer value
#[inline]
pub const fn from_int(i: i64) -> Value {
    Value::FixedInt(i)
}

/// Float value. Floats are immediates in this VM, so the context is unused.
#[inline]
pub fn from_float(_ctx: &mut Context, f: f64) -> Value {
    Value::Float(f)
}

/// Intern `name` and return it as a symbol
pub fn symbol_from_name(ctx: &mut Context, name: &[u8]) -> Value {
    Value::Symbol(ctx.vm_mut().intern(name))
}

/// Name of a symbol value; `None` for other tags
pub fn symbol_name(ctx: &Context, v: Value) -> Option<&[u8]> {
    ctx.vm().sym_name(v.as_symbol()?)
}

/// Discriminant of `v`
#[inline]
pub fn tag_of(v: Value) -> VariantTag {
    v.tag()
}

/// Stash an opaque pointer in a value
#[inline]
pub fn raw_pointer_wrap(ptr: *mut c_void) -> Value {
    Value::RawPointer(ptr)
}

/// Pointer stashed with [`raw_pointer_wrap`]
#[inline]
pub fn raw_pointer_unwrap(v: Value) -> Option<*mut c_void> {
    match v {
        Value::RawPointer(p) => Some(p),
        _ => None,
    }
}

/// New string value
pub fn str_new(ctx: &mut Context, s: &str) -> Value {
    Value::from_raw(ctx.vm_mut().str_new(s.as_bytes()))
}

/// Bytes of a string value
pub fn string_bytes(ctx: &Context, v: Value) -> Option<&[u8]> {
    match v {
        Value::String(_) => ctx.vm().string_bytes(v.into_raw()),
        _ => None,
    }
}

/// New array holding `items` in order
pub fn array_new(ctx: &mut Context, items: &[Value]) -> Value {
    let raw: Vec<RawValue> = items.iter().map(|v| v.into_raw()).collect();
    Value::from_raw(ctx.vm_mut().array_new(&raw))
}

/// Elements of an array value; `None` for other tags
pub fn array_items(ctx: &Context, v: Value) -> Option<Vec<Value>> {
    match v {
        Value::Array(_) => ctx
            .vm()
            .array_items(v.into_raw())
            .map(|items| items.iter().copied().map(Value::from_raw).collect()),
        _ => None,
    }
}

/// Current GC arena index
pub fn arena_save(ctx: &Context) -> usize {
    ctx.vm().arena_save()
}

/// Release values created since `idx` to the collector
pub fn arena_restore(ctx: &mut Context, idx: usize) {
    ctx.vm_mut().arena_restore(idx)
}

/// Keep `v` alive until [`gc_unregister`]
pub fn gc_register(ctx: &mut Context, v: Value) {
    ctx.vm_mut().gc_register(v.into_raw())
}

/// Drop one registration of `v`
pub fn gc_unregister(ctx: &mut Context, v: Value) {
    ctx.vm_mut().gc_unregister(v.into_raw())
}

/// Collect now; returns the number of freed objects
pub fn full_gc(ctx: &mut Context) -> usize {
    ctx.vm_mut().full_gc()
}
