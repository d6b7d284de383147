//! C FFI bindings for the mrbridge shim
//!
//! This module exposes the shim to C hosts. The API follows these
//! principles:
//! - ABI-stable (only C-compatible types cross the boundary)
//! - One context per thread; nothing here is thread-safe
//! - Shim failures via `MrbridgeError` out-parameters
//! - Script failures via the exception slot (`mrbridge_get_current_exception`)
//! - Values are passed by value as the VM's 16-byte `{ payload, tag }` pair
//!   and must originate from this API; tags are not re-validated
//!
//! Functions that may raise into the VM (`mrbridge_raise_new`,
//! `mrbridge_raise_and_propagate`) and host method callbacks use the
//! `C-unwind` ABI: a raise unwinds through the callback frame back to the
//! guard that invoked it.

use mrbridge::class;
use mrbridge::data::{self, TypeDescriptor};
use mrbridge::introspect::Procedure;
use mrbridge::loader;
use mrbridge::trampoline::{self, CompileContext};
use mrbridge::value::{self, Value, VariantTag};
use mrbridge::{Context, ContextOptions, ReprSizes, ShimError};
use mrbridge_vm::{DataFree, RawValue};
use std::ffi::{c_void, CStr, CString};
use std::os::raw::{c_char, c_int};
use std::ptr;

// ============================================================================
// Opaque Types
// ============================================================================

/// Opaque handle to a VM context
#[repr(C)]
pub struct MrbridgeContext {
    _private: [u8; 0],
}

/// Opaque handle to a data type descriptor
#[repr(C)]
pub struct MrbridgeType {
    _private: [u8; 0],
}

/// VM value, passed by value
pub type MrbridgeValue = RawValue;

/// Host method body.
///
/// Receives the context, the receiver and `argc` arguments. May raise with
/// `mrbridge_raise_new`.
pub type MrbridgeMethod = unsafe extern "C-unwind" fn(
    ctx: *mut MrbridgeContext,
    recv: MrbridgeValue,
    argc: usize,
    argv: *const MrbridgeValue,
) -> MrbridgeValue;

/// Error information
#[repr(C)]
pub struct MrbridgeError {
    code: c_int,
    message: *mut c_char,
}

/// Error codes reported through `mrbridge_error_code`
pub mod codes {
    use std::os::raw::c_int;

    /// Null pointer or invalid UTF-8 argument
    pub const INVALID_ARGUMENT: c_int = 1;
    /// Bad image identifier or version
    pub const INVALID_IMAGE_HEADER: c_int = 2;
    /// Image not larger than its header
    pub const IMAGE_TOO_SMALL: c_int = 3;
    /// Declared image size exceeds the buffer
    pub const IMAGE_TRUNCATED: c_int = 4;
    /// Exception raised inside the VM
    pub const SCRIPT_ERROR: c_int = 5;
    /// Wrong value or payload type
    pub const TYPE_MISMATCH: c_int = 6;
    /// Recovery points restored out of order
    pub const STALE_JUMP_STATE: c_int = 7;
    /// Class not declared data-object represented
    pub const INSTANCE_REPRESENTATION: c_int = 8;
    /// Value is not a procedure
    pub const NOT_A_PROCEDURE: c_int = 9;
    /// Invalid configuration
    pub const INVALID_CONFIG: c_int = 10;
    /// I/O failure
    pub const IO: c_int = 11;
}

#[derive(Debug, thiserror::Error)]
enum FfiError {
    #[error("Invalid arguments (null {0})")]
    NullPointer(&'static str),

    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error(transparent)]
    Shim(#[from] ShimError),
}

impl FfiError {
    fn code(&self) -> c_int {
        match self {
            FfiError::NullPointer(_) | FfiError::InvalidUtf8(_) => codes::INVALID_ARGUMENT,
            FfiError::Shim(e) => match e {
                ShimError::InvalidImageHeader => codes::INVALID_IMAGE_HEADER,
                ShimError::ImageTooSmall { .. } => codes::IMAGE_TOO_SMALL,
                ShimError::ImageTruncated { .. } => codes::IMAGE_TRUNCATED,
                ShimError::ScriptError(_) => codes::SCRIPT_ERROR,
                ShimError::TypeMismatch { .. } => codes::TYPE_MISMATCH,
                ShimError::StaleJumpState => codes::STALE_JUMP_STATE,
                ShimError::InstanceRepresentation(_) => codes::INSTANCE_REPRESENTATION,
                ShimError::NotAProcedure => codes::NOT_A_PROCEDURE,
                ShimError::InvalidConfig(_) => codes::INVALID_CONFIG,
                ShimError::Io(_) => codes::IO,
            },
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert Rust string to C string (caller must free)
fn rust_to_c_string(s: &str) -> *mut c_char {
    let cleaned;
    let s = if s.contains('\0') {
        cleaned = s.replace('\0', "\\0");
        cleaned.as_str()
    } else {
        s
    };
    match CString::new(s) {
        Ok(c_str) => c_str.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Set error out-parameter
unsafe fn set_error(error_out: *mut *mut MrbridgeError, error: FfiError) {
    if !error_out.is_null() {
        let err = Box::new(MrbridgeError {
            code: error.code(),
            message: rust_to_c_string(&error.to_string()),
        });
        *error_out = Box::into_raw(err);
    }
}

unsafe fn context<'a>(ctx: *mut MrbridgeContext) -> Result<&'a mut Context, FfiError> {
    (ctx as *mut Context)
        .as_mut()
        .ok_or(FfiError::NullPointer("context"))
}

unsafe fn c_str<'a>(s: *const c_char, what: &'static str) -> Result<&'a str, FfiError> {
    if s.is_null() {
        return Err(FfiError::NullPointer(what));
    }
    CStr::from_ptr(s).to_str().map_err(|_| FfiError::InvalidUtf8(what))
}

unsafe fn byte_slice<'a>(bytes: *const u8, len: usize, what: &'static str) -> Result<&'a [u8], FfiError> {
    if bytes.is_null() {
        if len == 0 {
            return Ok(&[]);
        }
        return Err(FfiError::NullPointer(what));
    }
    Ok(std::slice::from_raw_parts(bytes, len))
}

unsafe fn descriptor<'a>(ty: *const MrbridgeType) -> Result<&'a TypeDescriptor, FfiError> {
    (ty as *const TypeDescriptor)
        .as_ref()
        .ok_or(FfiError::NullPointer("type descriptor"))
}

fn class_ref(v: MrbridgeValue) -> Result<mrbridge::ObjRef, FfiError> {
    let v = Value::from_raw(v);
    class::value_as_class(v).ok_or_else(|| ShimError::mismatch("class", v.tag().name()).into())
}

/// Unwrap a result, reporting the error and returning `fallback` on failure
unsafe fn report<T>(r: Result<T, FfiError>, error: *mut *mut MrbridgeError, fallback: T) -> T {
    match r {
        Ok(v) => v,
        Err(e) => {
            set_error(error, e);
            fallback
        }
    }
}

fn into_c_array(items: Vec<String>, count_out: *mut usize) -> *mut *mut c_char {
    let ptrs: Box<[*mut c_char]> = items.iter().map(|s| rust_to_c_string(s)).collect();
    if !count_out.is_null() {
        // SAFETY: checked non-null; caller provides a writable slot
        unsafe { *count_out = ptrs.len() };
    }
    Box::into_raw(ptrs) as *mut *mut c_char
}

// ============================================================================
// Context Lifecycle
// ============================================================================

/// Open a context with default options
///
/// # Returns
/// * Non-null context pointer; free with `mrbridge_close()`
///
/// # Example (C)
/// ```c
/// MrbridgeContext* ctx = mrbridge_open();
/// MrbridgeValue v = mrbridge_load_string(ctx, "1 + 2", 5, "main.rb", 0);
/// mrbridge_close(ctx);
/// ```
#[no_mangle]
pub extern "C" fn mrbridge_open() -> *mut MrbridgeContext {
    Box::into_raw(Box::new(Context::open())) as *mut MrbridgeContext
}

/// Open a context configured by a TOML file
///
/// # Returns
/// * Non-null context pointer on success
/// * NULL on failure (check error parameter)
///
/// # Safety
/// `path` must be a valid null-terminated string
#[no_mangle]
pub unsafe extern "C" fn mrbridge_open_with_config(
    path: *const c_char,
    error: *mut *mut MrbridgeError,
) -> *mut MrbridgeContext {
    let r = c_str(path, "path").and_then(|p| Ok(ContextOptions::from_file(p)?));
    match r {
        Ok(opts) => Box::into_raw(Box::new(Context::with_options(&opts))) as *mut MrbridgeContext,
        Err(e) => {
            set_error(error, e);
            ptr::null_mut()
        }
    }
}

/// Close a context. Destructors of all wrapped payloads run here.
///
/// # Safety
/// - `ctx` must come from `mrbridge_open*()` (NULL is ignored)
/// - `ctx` must not be used after this call
#[no_mangle]
pub unsafe extern "C" fn mrbridge_close(ctx: *mut MrbridgeContext) {
    if ctx.is_null() {
        return;
    }
    Box::from_raw(ctx as *mut Context).close();
}

/// Attach an opaque host pointer to the context
///
/// # Safety
/// `ctx` must be a valid context
#[no_mangle]
pub unsafe extern "C" fn mrbridge_set_user_data(ctx: *mut MrbridgeContext, ud: *mut c_void) {
    if let Ok(ctx) = context(ctx) {
        ctx.set_user_data(ud);
    }
}

/// Pointer set with `mrbridge_set_user_data()`, NULL if none
///
/// # Safety
/// `ctx` must be a valid context
#[no_mangle]
pub unsafe extern "C" fn mrbridge_user_data(ctx: *mut MrbridgeContext) -> *mut c_void {
    context(ctx).map(|c| c.user_data()).unwrap_or(ptr::null_mut())
}

/// Sizes of the VM representations
#[no_mangle]
pub extern "C" fn mrbridge_repr_sizes() -> ReprSizes {
    Context::repr_sizes()
}

// ============================================================================
// Value Conversion
// ============================================================================

/// `nil`
#[no_mangle]
pub extern "C" fn mrbridge_nil_value() -> MrbridgeValue {
    value::make_nil().into_raw()
}

/// `false`
#[no_mangle]
pub extern "C" fn mrbridge_false_value() -> MrbridgeValue {
    value::make_false().into_raw()
}

/// `true`
#[no_mangle]
pub extern "C" fn mrbridge_true_value() -> MrbridgeValue {
    value::make_true().into_raw()
}

/// Integer value
#[no_mangle]
pub extern "C" fn mrbridge_int_value(i: i64) -> MrbridgeValue {
    value::from_int(i).into_raw()
}

/// Float value
///
/// # Safety
/// `ctx` must be a valid context
#[no_mangle]
pub unsafe extern "C" fn mrbridge_float_value(ctx: *mut MrbridgeContext, f: f64) -> MrbridgeValue {
    match context(ctx) {
        Ok(ctx) => value::from_float(ctx, f).into_raw(),
        Err(_) => RawValue::float(f),
    }
}

/// Integer payload. The caller checks the tag first.
///
/// # Safety
/// Reads the payload without checking the tag
#[no_mangle]
pub unsafe extern "C" fn mrbridge_to_int(v: MrbridgeValue) -> i64 {
    v.fixnum_unchecked()
}

/// Float payload. The caller checks the tag first.
///
/// # Safety
/// Reads the payload without checking the tag
#[no_mangle]
pub unsafe extern "C" fn mrbridge_to_float(v: MrbridgeValue) -> f64 {
    v.float_unchecked()
}

/// Tag of a value as a `VariantTag` number
#[no_mangle]
pub extern "C" fn mrbridge_value_tag(v: MrbridgeValue) -> u32 {
    value::tag_of(Value::from_raw(v)) as u32
}

/// Intern `len` bytes at `name` as a symbol
///
/// # Safety
/// `ctx` must be valid and `name` readable for `len` bytes
#[no_mangle]
pub unsafe extern "C" fn mrbridge_symbol_from_name(
    ctx: *mut MrbridgeContext,
    name: *const u8,
    len: usize,
) -> MrbridgeValue {
    let r = context(ctx).and_then(|c| Ok((c, byte_slice(name, len, "name")?)));
    match r {
        Ok((ctx, name)) => value::symbol_from_name(ctx, name).into_raw(),
        Err(_) => RawValue::nil(),
    }
}

/// Name of a symbol; NULL for other values.
///
/// The bytes are not null-terminated and stay valid until the context
/// is closed.
///
/// # Safety
/// `ctx` must be valid; `len_out` may be NULL
#[no_mangle]
pub unsafe extern "C" fn mrbridge_symbol_name(
    ctx: *mut MrbridgeContext,
    v: MrbridgeValue,
    len_out: *mut usize,
) -> *const u8 {
    let Ok(ctx) = context(ctx) else {
        return ptr::null();
    };
    match value::symbol_name(ctx, Value::from_raw(v)) {
        Some(bytes) => {
            if !len_out.is_null() {
                *len_out = bytes.len();
            }
            bytes.as_ptr()
        }
        None => ptr::null(),
    }
}

/// Stash an opaque pointer in a value
#[no_mangle]
pub extern "C" fn mrbridge_raw_pointer_wrap(p: *mut c_void) -> MrbridgeValue {
    value::raw_pointer_wrap(p).into_raw()
}

/// Pointer stashed with `mrbridge_raw_pointer_wrap()`; NULL for other values
#[no_mangle]
pub extern "C" fn mrbridge_raw_pointer_unwrap(v: MrbridgeValue) -> *mut c_void {
    value::raw_pointer_unwrap(Value::from_raw(v)).unwrap_or(ptr::null_mut())
}

/// New string from `len` bytes of UTF-8
///
/// # Safety
/// `ctx` must be valid and `bytes` readable for `len` bytes
#[no_mangle]
pub unsafe extern "C" fn mrbridge_str_new(
    ctx: *mut MrbridgeContext,
    bytes: *const u8,
    len: usize,
    error: *mut *mut MrbridgeError,
) -> MrbridgeValue {
    let r = (|| -> Result<_, FfiError> {
        let ctx = context(ctx)?;
        let bytes = byte_slice(bytes, len, "bytes")?;
        let s = std::str::from_utf8(bytes).map_err(|_| FfiError::InvalidUtf8("bytes"))?;
        Ok(value::str_new(ctx, s).into_raw())
    })();
    report(r, error, RawValue::nil())
}

/// New array of `count` values
///
/// # Safety
/// `ctx` must be valid and `items` readable for `count` values
#[no_mangle]
pub unsafe extern "C" fn mrbridge_array_new(
    ctx: *mut MrbridgeContext,
    items: *const MrbridgeValue,
    count: usize,
    error: *mut *mut MrbridgeError,
) -> MrbridgeValue {
    let r = (|| -> Result<_, FfiError> {
        let ctx = context(ctx)?;
        let items: &[MrbridgeValue] = if count == 0 {
            &[]
        } else if items.is_null() {
            return Err(FfiError::NullPointer("items"));
        } else {
            std::slice::from_raw_parts(items, count)
        };
        let items: Vec<Value> = items.iter().copied().map(Value::from_raw).collect();
        Ok(value::array_new(ctx, &items).into_raw())
    })();
    report(r, error, RawValue::nil())
}

/// Elements of an array value
///
/// # Returns
/// * Copy of `*count_out` values; free with `mrbridge_value_array_free()`
/// * NULL for non-arrays
///
/// # Safety
/// `count_out` may be NULL
#[no_mangle]
pub unsafe extern "C" fn mrbridge_array_items(
    ctx: *mut MrbridgeContext,
    v: MrbridgeValue,
    count_out: *mut usize,
) -> *mut MrbridgeValue {
    let Ok(ctx) = context(ctx) else {
        return ptr::null_mut();
    };
    let Some(items) = value::array_items(ctx, Value::from_raw(v)) else {
        return ptr::null_mut();
    };
    let raw: Box<[MrbridgeValue]> = items.into_iter().map(Value::into_raw).collect();
    if !count_out.is_null() {
        *count_out = raw.len();
    }
    Box::into_raw(raw) as *mut MrbridgeValue
}

/// Free a value array returned by `mrbridge_array_items()`
///
/// # Safety
/// `arr` and `count` must come from the same call (NULL is ignored)
#[no_mangle]
pub unsafe extern "C" fn mrbridge_value_array_free(arr: *mut MrbridgeValue, count: usize) {
    if !arr.is_null() {
        drop(Box::from_raw(ptr::slice_from_raw_parts_mut(arr, count)));
    }
}

/// Keep `v` alive until `mrbridge_gc_unregister()`
///
/// # Safety
/// `ctx` must be a valid context
#[no_mangle]
pub unsafe extern "C" fn mrbridge_gc_register(ctx: *mut MrbridgeContext, v: MrbridgeValue) {
    if let Ok(ctx) = context(ctx) {
        value::gc_register(ctx, Value::from_raw(v));
    }
}

/// Drop one registration of `v`
///
/// # Safety
/// `ctx` must be a valid context
#[no_mangle]
pub unsafe extern "C" fn mrbridge_gc_unregister(ctx: *mut MrbridgeContext, v: MrbridgeValue) {
    if let Ok(ctx) = context(ctx) {
        value::gc_unregister(ctx, Value::from_raw(v));
    }
}

/// Current GC arena index
///
/// # Safety
/// `ctx` must be a valid context
#[no_mangle]
pub unsafe extern "C" fn mrbridge_gc_arena_save(ctx: *mut MrbridgeContext) -> usize {
    context(ctx).map(|c| value::arena_save(c)).unwrap_or(0)
}

/// Release values created since `idx` to the collector
///
/// # Safety
/// `ctx` must be a valid context
#[no_mangle]
pub unsafe extern "C" fn mrbridge_gc_arena_restore(ctx: *mut MrbridgeContext, idx: usize) {
    if let Ok(ctx) = context(ctx) {
        value::arena_restore(ctx, idx);
    }
}

// ============================================================================
// Object Wrapping
// ============================================================================

/// New type descriptor. Free with `mrbridge_type_free()` once no payload
/// of this type is wrapped through it anymore.
///
/// # Safety
/// `name` must be a valid null-terminated string
#[no_mangle]
pub unsafe extern "C" fn mrbridge_type_new(
    name: *const c_char,
    dfree: Option<DataFree>,
    error: *mut *mut MrbridgeError,
) -> *mut MrbridgeType {
    match c_str(name, "name") {
        Ok(name) => Box::into_raw(Box::new(data::make_descriptor(name, dfree))) as *mut MrbridgeType,
        Err(e) => {
            set_error(error, e);
            ptr::null_mut()
        }
    }
}

/// Free a type descriptor. Wrapped payloads keep their own reference.
///
/// # Safety
/// `ty` must come from `mrbridge_type_new()` (NULL is ignored)
#[no_mangle]
pub unsafe extern "C" fn mrbridge_type_free(ty: *mut MrbridgeType) {
    if ty.is_null() {
        return;
    }
    drop(Box::from_raw(ty as *mut TypeDescriptor));
}

/// Hand `payload` to the VM as an instance of `class`
///
/// # Returns
/// * DataObject value on success
/// * nil on failure (check error parameter)
///
/// # Safety
/// `payload` becomes owned by the VM; do not free it afterwards
#[no_mangle]
pub unsafe extern "C" fn mrbridge_wrap(
    ctx: *mut MrbridgeContext,
    class: MrbridgeValue,
    payload: *mut c_void,
    ty: *const MrbridgeType,
    error: *mut *mut MrbridgeError,
) -> MrbridgeValue {
    let r = (|| -> Result<_, FfiError> {
        let ctx = context(ctx)?;
        let ty = descriptor(ty)?;
        let cls = class_ref(class)?;
        Ok(data::wrap(ctx, cls, payload, ty)?.into_raw())
    })();
    report(r, error, RawValue::nil())
}

/// Payload of a data object whose descriptor has the same name as `ty`
///
/// # Returns
/// * Payload pointer on success
/// * NULL on mismatch (check error parameter)
///
/// # Safety
/// `ctx` and `ty` must be valid
#[no_mangle]
pub unsafe extern "C" fn mrbridge_unwrap(
    ctx: *mut MrbridgeContext,
    v: MrbridgeValue,
    ty: *const MrbridgeType,
    error: *mut *mut MrbridgeError,
) -> *mut c_void {
    let r = (|| -> Result<_, FfiError> {
        let ctx = context(ctx)?;
        let ty = descriptor(ty)?;
        Ok(data::unwrap(ctx, Value::from_raw(v), ty)?)
    })();
    report(r, error, ptr::null_mut())
}

/// Attach a payload to a data object created by script-side `new`
///
/// # Safety
/// Same ownership rules as `mrbridge_wrap()`
#[no_mangle]
pub unsafe extern "C" fn mrbridge_data_init(
    ctx: *mut MrbridgeContext,
    v: MrbridgeValue,
    payload: *mut c_void,
    ty: *const MrbridgeType,
    error: *mut *mut MrbridgeError,
) -> c_int {
    let r = (|| -> Result<_, FfiError> {
        let ctx = context(ctx)?;
        let ty = descriptor(ty)?;
        data::data_init(ctx, Value::from_raw(v), payload, ty)?;
        Ok(0)
    })();
    report(r, error, -1)
}

// ============================================================================
// Classes and Modules
// ============================================================================

/// `Object`
///
/// # Safety
/// `ctx` must be a valid context
#[no_mangle]
pub unsafe extern "C" fn mrbridge_object_class(ctx: *mut MrbridgeContext) -> MrbridgeValue {
    match context(ctx) {
        Ok(ctx) => class::class_as_value(class::object_class(ctx)).into_raw(),
        Err(_) => RawValue::nil(),
    }
}

/// Class or module named by an `A::B` path; nil when missing
///
/// # Safety
/// `path` must be a valid null-terminated string
#[no_mangle]
pub unsafe extern "C" fn mrbridge_class_get(
    ctx: *mut MrbridgeContext,
    path: *const c_char,
) -> MrbridgeValue {
    let Ok(ctx) = context(ctx) else {
        return RawValue::nil();
    };
    let Ok(path) = c_str(path, "path") else {
        return RawValue::nil();
    };
    match class::class_get(ctx, path) {
        Some(cls) if ctx.vm().is_module(cls) => class::module_as_value(cls).into_raw(),
        Some(cls) => class::class_as_value(cls).into_raw(),
        None => RawValue::nil(),
    }
}

/// Open class `name`; `superclass` may be nil for `Object`
///
/// # Safety
/// `name` must be a valid null-terminated string
#[no_mangle]
pub unsafe extern "C" fn mrbridge_define_class(
    ctx: *mut MrbridgeContext,
    name: *const c_char,
    superclass: MrbridgeValue,
    error: *mut *mut MrbridgeError,
) -> MrbridgeValue {
    let r = (|| -> Result<_, FfiError> {
        let ctx = context(ctx)?;
        let name = c_str(name, "name")?;
        let sup = match Value::from_raw(superclass) {
            Value::Nil => None,
            _ => Some(class_ref(superclass)?),
        };
        Ok(class::class_as_value(class::define_class(ctx, name, sup)?).into_raw())
    })();
    report(r, error, RawValue::nil())
}

/// Open module `name`
///
/// # Safety
/// `name` must be a valid null-terminated string
#[no_mangle]
pub unsafe extern "C" fn mrbridge_define_module(
    ctx: *mut MrbridgeContext,
    name: *const c_char,
    error: *mut *mut MrbridgeError,
) -> MrbridgeValue {
    let r = (|| -> Result<_, FfiError> {
        let ctx = context(ctx)?;
        let name = c_str(name, "name")?;
        Ok(class::module_as_value(class::define_module(ctx, name)?).into_raw())
    })();
    report(r, error, RawValue::nil())
}

/// Declare the instance representation of `class` (a `VariantTag` number)
///
/// # Safety
/// `ctx` must be a valid context
#[no_mangle]
pub unsafe extern "C" fn mrbridge_set_instance_representation(
    ctx: *mut MrbridgeContext,
    class: MrbridgeValue,
    tag: u32,
    error: *mut *mut MrbridgeError,
) -> c_int {
    let r = (|| -> Result<_, FfiError> {
        let ctx = context(ctx)?;
        let cls = class_ref(class)?;
        let tag = VariantTag::from_u32(tag)
            .ok_or_else(|| ShimError::mismatch("variant tag", tag.to_string()))?;
        class::set_instance_representation(ctx, cls, tag)?;
        Ok(0)
    })();
    report(r, error, -1)
}

/// Define a host method on `class`
///
/// # Safety
/// `func` must stay callable for the life of the context
#[no_mangle]
pub unsafe extern "C" fn mrbridge_define_method(
    ctx: *mut MrbridgeContext,
    class: MrbridgeValue,
    name: *const c_char,
    func: Option<MrbridgeMethod>,
    error: *mut *mut MrbridgeError,
) -> c_int {
    let r = (|| -> Result<_, FfiError> {
        let ctx = context(ctx)?;
        let cls = class_ref(class)?;
        let name = c_str(name, "name")?;
        let func = func.ok_or(FfiError::NullPointer("method"))?;
        class::define_method(ctx, cls, name, host_method(func));
        Ok(0)
    })();
    report(r, error, -1)
}

/// Define a host method on `class` itself (`Class.name` in scripts)
///
/// # Safety
/// `func` must stay callable for the life of the context
#[no_mangle]
pub unsafe extern "C" fn mrbridge_define_class_method(
    ctx: *mut MrbridgeContext,
    class: MrbridgeValue,
    name: *const c_char,
    func: Option<MrbridgeMethod>,
    error: *mut *mut MrbridgeError,
) -> c_int {
    let r = (|| -> Result<_, FfiError> {
        let ctx = context(ctx)?;
        let cls = class_ref(class)?;
        let name = c_str(name, "name")?;
        let func = func.ok_or(FfiError::NullPointer("method"))?;
        class::define_class_method(ctx, cls, name, host_method(func));
        Ok(0)
    })();
    report(r, error, -1)
}

fn host_method(func: MrbridgeMethod) -> impl Fn(&mut Context, Value, &[Value]) -> Value + 'static {
    move |ctx, recv, args| {
        let argv: Vec<RawValue> = args.iter().map(|a| a.into_raw()).collect();
        let handle = ctx as *mut Context as *mut MrbridgeContext;
        // SAFETY: the caller registered a function with this signature
        let out = unsafe { func(handle, recv.into_raw(), argv.len(), argv.as_ptr()) };
        Value::from_raw(out)
    }
}

// ============================================================================
// Exceptions
// ============================================================================

/// Render and clear the pending exception
///
/// # Returns
/// * Inspection line plus backtrace lines; free with `mrbridge_string_free()`
/// * NULL when no exception is pending
///
/// # Safety
/// `ctx` must be a valid context
#[no_mangle]
pub unsafe extern "C" fn mrbridge_get_current_exception(ctx: *mut MrbridgeContext) -> *mut c_char {
    match context(ctx) {
        Ok(ctx) => trampoline::get_current_exception(ctx)
            .map(|s| rust_to_c_string(&s))
            .unwrap_or(ptr::null_mut()),
        Err(_) => ptr::null_mut(),
    }
}

/// Raise a new exception. Never returns.
///
/// # Safety
/// Only valid inside a host method body or another guarded call
#[no_mangle]
pub unsafe extern "C-unwind" fn mrbridge_raise_new(
    ctx: *mut MrbridgeContext,
    class_name: *const c_char,
    message: *const c_char,
) -> ! {
    let ctx = &mut *(ctx as *mut Context);
    let class_name = CStr::from_ptr(class_name).to_string_lossy();
    let message = if message.is_null() {
        String::new()
    } else {
        CStr::from_ptr(message).to_string_lossy().into_owned()
    };
    trampoline::raise_new(ctx, &class_name, &message)
}

/// Raise and catch immediately, leaving the exception in the slot
///
/// # Safety
/// Strings must be valid null-terminated strings
#[no_mangle]
pub unsafe extern "C" fn mrbridge_raise_suppressed(
    ctx: *mut MrbridgeContext,
    class_name: *const c_char,
    message: *const c_char,
    error: *mut *mut MrbridgeError,
) -> c_int {
    let r = (|| -> Result<_, FfiError> {
        let ctx = context(ctx)?;
        let class_name = c_str(class_name, "class name")?;
        let message = c_str(message, "message")?;
        trampoline::raise_suppressed(ctx, class_name, message)?;
        Ok(0)
    })();
    report(r, error, -1)
}

/// Re-throw the pending exception; no-op when none is pending
///
/// # Safety
/// Only valid inside a host method body or another guarded call
#[no_mangle]
pub unsafe extern "C-unwind" fn mrbridge_raise_and_propagate(ctx: *mut MrbridgeContext) {
    if let Ok(ctx) = context(ctx) {
        trampoline::raise_and_propagate(ctx);
    }
}

// ============================================================================
// Loading and Calling
// ============================================================================

/// Compile and run `len` bytes of source
///
/// # Returns
/// * The result, or the compiled proc when `no_exec` is non-zero
/// * nil on failure, with the exception slot populated
///
/// # Safety
/// `source` must be readable for `len` bytes; `filename` may be NULL
#[no_mangle]
pub unsafe extern "C" fn mrbridge_load_string(
    ctx: *mut MrbridgeContext,
    source: *const u8,
    len: usize,
    filename: *const c_char,
    no_exec: c_int,
) -> MrbridgeValue {
    let Ok(ctx) = context(ctx) else {
        return RawValue::nil();
    };
    let Ok(source) = byte_slice(source, len, "source") else {
        return RawValue::nil();
    };
    let cc = CompileContext {
        filename: c_str(filename, "filename").ok().map(str::to_string),
        no_exec: no_exec != 0,
        ..CompileContext::default()
    };
    trampoline::load_script_suppressed(ctx, source, &cc).into_raw()
}

/// Deserialize an image into a proc without running it
///
/// # Returns
/// * Proc on success
/// * nil with an error for header problems
/// * nil with the exception slot populated for a corrupt body
///
/// # Safety
/// `bytes` must be readable for `len` bytes
#[no_mangle]
pub unsafe extern "C" fn mrbridge_read_image(
    ctx: *mut MrbridgeContext,
    bytes: *const u8,
    len: usize,
    error: *mut *mut MrbridgeError,
) -> MrbridgeValue {
    let r = (|| -> Result<_, FfiError> {
        let ctx = context(ctx)?;
        let bytes = byte_slice(bytes, len, "bytes")?;
        Ok(loader::read_image(ctx, bytes)?.into_raw())
    })();
    report(r, error, RawValue::nil())
}

/// Deserialize an image and run it
///
/// # Safety
/// `bytes` must be readable for `len` bytes
#[no_mangle]
pub unsafe extern "C" fn mrbridge_load_image(
    ctx: *mut MrbridgeContext,
    bytes: *const u8,
    len: usize,
    error: *mut *mut MrbridgeError,
) -> MrbridgeValue {
    let r = (|| -> Result<_, FfiError> {
        let ctx = context(ctx)?;
        let bytes = byte_slice(bytes, len, "bytes")?;
        Ok(loader::load_image(ctx, bytes)?.into_raw())
    })();
    report(r, error, RawValue::nil())
}

/// Call `recv.name(*argv)`; nil with the exception slot populated on failure
///
/// # Safety
/// `name` must be a valid null-terminated string and `argv` readable for
/// `argc` values
#[no_mangle]
pub unsafe extern "C" fn mrbridge_funcall(
    ctx: *mut MrbridgeContext,
    recv: MrbridgeValue,
    name: *const c_char,
    argc: usize,
    argv: *const MrbridgeValue,
) -> MrbridgeValue {
    let Ok(ctx) = context(ctx) else {
        return RawValue::nil();
    };
    let Ok(name) = c_str(name, "name") else {
        return RawValue::nil();
    };
    let args: Vec<Value> = if argc == 0 || argv.is_null() {
        Vec::new()
    } else {
        std::slice::from_raw_parts(argv, argc)
            .iter()
            .copied()
            .map(Value::from_raw)
            .collect()
    };
    trampoline::funcall(ctx, Value::from_raw(recv), name, &args).into_raw()
}

// ============================================================================
// Introspection
// ============================================================================

/// Instruction bytes of a compiled proc
///
/// # Returns
/// * Pointer to `*len_out` bytes, valid while the proc is alive
/// * NULL for host methods and non-procs
///
/// # Safety
/// `len_out` and `count_out` may be NULL
#[no_mangle]
pub unsafe extern "C" fn mrbridge_proc_iseq(
    ctx: *mut MrbridgeContext,
    proc: MrbridgeValue,
    len_out: *mut usize,
    count_out: *mut usize,
) -> *const u8 {
    let Ok(ctx) = context(ctx) else {
        return ptr::null();
    };
    let Ok(p) = Procedure::from_value(ctx, Value::from_raw(proc)) else {
        return ptr::null();
    };
    let Some(ins) = p.instructions() else {
        return ptr::null();
    };
    if !len_out.is_null() {
        *len_out = ins.bytes().len();
    }
    if !count_out.is_null() {
        *count_out = ins.count();
    }
    // The proc object keeps the body alive past this view
    ins.bytes().as_ptr()
}

/// Symbol names of a compiled proc, in definition order
///
/// # Returns
/// * Array of `*count_out` strings; free with `mrbridge_string_array_free()`
/// * NULL for non-procs
///
/// # Safety
/// `count_out` may be NULL
#[no_mangle]
pub unsafe extern "C" fn mrbridge_proc_symbols(
    ctx: *mut MrbridgeContext,
    proc: MrbridgeValue,
    count_out: *mut usize,
) -> *mut *mut c_char {
    let Ok(ctx) = context(ctx) else {
        return ptr::null_mut();
    };
    match Procedure::from_value(ctx, Value::from_raw(proc)) {
        Ok(p) => into_c_array(p.symbols(ctx).collect(), count_out),
        Err(_) => ptr::null_mut(),
    }
}

/// Local variable names of a compiled proc, receiver slot excluded
///
/// # Returns
/// * Array of `*count_out` strings; free with `mrbridge_string_array_free()`
/// * NULL without local name metadata
///
/// # Safety
/// `count_out` may be NULL
#[no_mangle]
pub unsafe extern "C" fn mrbridge_proc_local_names(
    ctx: *mut MrbridgeContext,
    proc: MrbridgeValue,
    count_out: *mut usize,
) -> *mut *mut c_char {
    let Ok(ctx) = context(ctx) else {
        return ptr::null_mut();
    };
    let Ok(p) = Procedure::from_value(ctx, Value::from_raw(proc)) else {
        return ptr::null_mut();
    };
    let result = match p.local_names(ctx) {
        Some(names) => into_c_array(names.collect(), count_out),
        None => ptr::null_mut(),
    };
    result
}

// ============================================================================
// Strings and Errors
// ============================================================================

/// Free a string returned by this API
///
/// # Safety
/// `s` must come from this API (NULL is ignored)
#[no_mangle]
pub unsafe extern "C" fn mrbridge_string_free(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

/// Free a string array returned by this API
///
/// # Safety
/// `arr` and `count` must come from the same call (NULL is ignored)
#[no_mangle]
pub unsafe extern "C" fn mrbridge_string_array_free(arr: *mut *mut c_char, count: usize) {
    if arr.is_null() {
        return;
    }
    let items = Box::from_raw(ptr::slice_from_raw_parts_mut(arr, count));
    for s in items.iter() {
        mrbridge_string_free(*s);
    }
}

/// Get the error message
///
/// # Safety
/// - Error pointer must be valid
/// - Returned string is valid until `mrbridge_error_free()` is called
#[no_mangle]
pub unsafe extern "C" fn mrbridge_error_message(error: *const MrbridgeError) -> *const c_char {
    if error.is_null() {
        return ptr::null();
    }
    (*error).message
}

/// Get the error code (see `codes`); 0 for NULL
///
/// # Safety
/// Error pointer must be valid or NULL
#[no_mangle]
pub unsafe extern "C" fn mrbridge_error_code(error: *const MrbridgeError) -> c_int {
    if error.is_null() {
        return 0;
    }
    (*error).code
}

/// Free an error
///
/// # Safety
/// Error pointer must come from this API (NULL is ignored)
#[no_mangle]
pub unsafe extern "C" fn mrbridge_error_free(error: *mut MrbridgeError) {
    if error.is_null() {
        return;
    }
    if !(*error).message.is_null() {
        drop(CString::from_raw((*error).message));
    }
    drop(Box::from_raw(error));
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the library version string
///
/// # Safety
/// The returned string is static and must not be freed
#[no_mangle]
pub extern "C" fn mrbridge_version() -> *const c_char {
    static VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");
    VERSION.as_ptr() as *const c_char
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    unsafe fn load(ctx: *mut MrbridgeContext, src: &str) -> MrbridgeValue {
        mrbridge_load_string(ctx, src.as_ptr(), src.len(), b"ffi.rb\0".as_ptr() as *const c_char, 0)
    }

    unsafe fn take_error(error: *mut MrbridgeError) -> (c_int, String) {
        assert!(!error.is_null());
        let code = mrbridge_error_code(error);
        let msg = CStr::from_ptr(mrbridge_error_message(error)).to_string_lossy().into_owned();
        mrbridge_error_free(error);
        (code, msg)
    }

    unsafe fn c_strings(arr: *mut *mut c_char, count: usize) -> Vec<String> {
        let out = std::slice::from_raw_parts(arr, count)
            .iter()
            .map(|s| CStr::from_ptr(*s).to_string_lossy().into_owned())
            .collect();
        mrbridge_string_array_free(arr, count);
        out
    }

    #[test]
    fn test_context_lifecycle() {
        unsafe {
            let ctx = mrbridge_open();
            assert!(!ctx.is_null());
            let mut marker = 1u8;
            mrbridge_set_user_data(ctx, &mut marker as *mut u8 as *mut c_void);
            assert_eq!(mrbridge_user_data(ctx), &mut marker as *mut u8 as *mut c_void);
            mrbridge_close(ctx);
            mrbridge_close(ptr::null_mut());
        }
    }

    #[test]
    fn test_value_conversions() {
        unsafe {
            let ctx = mrbridge_open();
            let v = mrbridge_int_value(-5);
            assert_eq!(mrbridge_value_tag(v), VariantTag::FixedInt as u32);
            assert_eq!(mrbridge_to_int(v), -5);

            let f = mrbridge_float_value(ctx, 1.5);
            assert_eq!(mrbridge_value_tag(f), VariantTag::Float as u32);
            assert_eq!(mrbridge_to_float(f), 1.5);

            assert_eq!(mrbridge_value_tag(mrbridge_nil_value()), VariantTag::Nil as u32);
            assert_eq!(mrbridge_value_tag(mrbridge_false_value()), VariantTag::Bool as u32);
            assert_eq!(mrbridge_value_tag(mrbridge_true_value()), VariantTag::Bool as u32);

            let a = mrbridge_symbol_from_name(ctx, b"foo".as_ptr(), 3);
            let b = mrbridge_symbol_from_name(ctx, b"foo".as_ptr(), 3);
            assert_eq!(a, b);
            let mut len = 0usize;
            let name = mrbridge_symbol_name(ctx, a, &mut len);
            assert_eq!(std::slice::from_raw_parts(name, len), b"foo");
            assert!(mrbridge_symbol_name(ctx, v, &mut len).is_null());

            let p = 0x40 as *mut c_void;
            assert_eq!(mrbridge_raw_pointer_unwrap(mrbridge_raw_pointer_wrap(p)), p);
            assert!(mrbridge_raw_pointer_unwrap(v).is_null());
            mrbridge_close(ctx);
        }
    }

    #[test]
    fn test_repr_sizes_and_version() {
        let sizes = mrbridge_repr_sizes();
        assert_eq!(sizes.value, std::mem::size_of::<MrbridgeValue>());
        assert_eq!(sizes.int, 8);
        let version = unsafe { CStr::from_ptr(mrbridge_version()) };
        assert_eq!(version.to_str().unwrap(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_exception_slot() {
        unsafe {
            let ctx = mrbridge_open();
            let v = load(ctx, "1 / 0");
            assert_eq!(mrbridge_value_tag(v), VariantTag::Nil as u32);
            let msg = mrbridge_get_current_exception(ctx);
            assert!(!msg.is_null());
            assert_eq!(
                CStr::from_ptr(msg).to_str().unwrap(),
                "divided by 0 (ZeroDivisionError)\nffi.rb:1"
            );
            mrbridge_string_free(msg);
            assert!(mrbridge_get_current_exception(ctx).is_null());

            let mut error = ptr::null_mut();
            let rc = mrbridge_raise_suppressed(
                ctx,
                b"TypeError\0".as_ptr() as *const c_char,
                b"bad input\0".as_ptr() as *const c_char,
                &mut error,
            );
            assert_eq!(rc, 0);
            assert!(error.is_null());
            let msg = mrbridge_get_current_exception(ctx);
            assert_eq!(CStr::from_ptr(msg).to_str().unwrap(), "bad input (TypeError)");
            mrbridge_string_free(msg);
            mrbridge_close(ctx);
        }
    }

    unsafe extern "C-unwind" fn checked_double(
        ctx: *mut MrbridgeContext,
        _recv: MrbridgeValue,
        argc: usize,
        argv: *const MrbridgeValue,
    ) -> MrbridgeValue {
        if argc != 1 || mrbridge_value_tag(*argv) != VariantTag::FixedInt as u32 {
            mrbridge_raise_new(
                ctx,
                b"ArgumentError\0".as_ptr() as *const c_char,
                b"integer expected\0".as_ptr() as *const c_char,
            );
        }
        mrbridge_int_value(mrbridge_to_int(*argv) * 2)
    }

    #[test]
    fn test_host_method() {
        unsafe {
            let ctx = mrbridge_open();
            let object = mrbridge_object_class(ctx);
            let mut error = ptr::null_mut();
            let rc = mrbridge_define_method(
                ctx,
                object,
                b"double\0".as_ptr() as *const c_char,
                Some(checked_double),
                &mut error,
            );
            assert_eq!(rc, 0);

            assert_eq!(mrbridge_to_int(load(ctx, "double(21)")), 42);
            let v = load(ctx, "begin\n  double(:x)\nrescue ArgumentError\n  -1\nend");
            assert_eq!(mrbridge_to_int(v), -1);

            let top = load(ctx, "self");
            let args = [mrbridge_int_value(5)];
            let v = mrbridge_funcall(ctx, top, b"double\0".as_ptr() as *const c_char, 1, args.as_ptr());
            assert_eq!(mrbridge_to_int(v), 10);

            let v = mrbridge_funcall(ctx, top, b"double\0".as_ptr() as *const c_char, 0, ptr::null());
            assert_eq!(mrbridge_value_tag(v), VariantTag::Nil as u32);
            let msg = mrbridge_get_current_exception(ctx);
            assert!(CStr::from_ptr(msg).to_str().unwrap().starts_with("integer expected (ArgumentError)"));
            mrbridge_string_free(msg);
            mrbridge_close(ctx);
        }
    }

    #[test]
    fn test_class_method_and_arrays() {
        unsafe {
            let ctx = mrbridge_open();
            let mut error = ptr::null_mut();
            let cls = mrbridge_define_class(ctx, b"Doubler\0".as_ptr() as *const c_char, mrbridge_nil_value(), &mut error);
            let rc = mrbridge_define_class_method(
                ctx,
                cls,
                b"run\0".as_ptr() as *const c_char,
                Some(checked_double),
                &mut error,
            );
            assert_eq!(rc, 0);
            assert!(error.is_null());

            let v = load(ctx, "[Doubler.run(2), Doubler.run(3)]");
            assert_eq!(mrbridge_value_tag(v), VariantTag::Array as u32);
            let mut count = 0usize;
            let items = mrbridge_array_items(ctx, v, &mut count);
            assert_eq!(count, 2);
            let ints: Vec<i64> = std::slice::from_raw_parts(items, count).iter().map(|i| mrbridge_to_int(*i)).collect();
            assert_eq!(ints, vec![4, 6]);
            mrbridge_value_array_free(items, count);
            assert!(mrbridge_array_items(ctx, mrbridge_int_value(1), &mut count).is_null());

            let parts = [mrbridge_int_value(1), mrbridge_nil_value()];
            let arr = mrbridge_array_new(ctx, parts.as_ptr(), parts.len(), &mut error);
            assert!(error.is_null());
            let size = mrbridge_funcall(ctx, arr, b"size\0".as_ptr() as *const c_char, 0, ptr::null());
            assert_eq!(mrbridge_to_int(size), 2);
            let empty = mrbridge_array_new(ctx, ptr::null(), 0, &mut error);
            assert_eq!(mrbridge_value_tag(empty), VariantTag::Array as u32);
            mrbridge_close(ctx);
        }
    }

    static FREED: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn free_counter(p: *mut c_void) {
        drop(Box::from_raw(p as *mut u32));
        FREED.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_wrap_unwrap() {
        unsafe {
            let ctx = mrbridge_open();
            let mut error = ptr::null_mut();
            let cls = mrbridge_define_class(
                ctx,
                b"Counter\0".as_ptr() as *const c_char,
                mrbridge_nil_value(),
                &mut error,
            );
            assert!(error.is_null());
            assert_eq!(mrbridge_value_tag(cls), VariantTag::ClassRef as u32);

            let ty = mrbridge_type_new(b"Counter\0".as_ptr() as *const c_char, Some(free_counter), &mut error);
            let payload = Box::into_raw(Box::new(3u32)) as *mut c_void;

            let v = mrbridge_wrap(ctx, cls, payload, ty, &mut error);
            let (code, _) = take_error(error);
            assert_eq!(code, codes::INSTANCE_REPRESENTATION);
            assert_eq!(mrbridge_value_tag(v), VariantTag::Nil as u32);
            error = ptr::null_mut();

            let rc = mrbridge_set_instance_representation(ctx, cls, VariantTag::DataObject as u32, &mut error);
            assert_eq!(rc, 0);
            let v = mrbridge_wrap(ctx, cls, payload, ty, &mut error);
            assert!(error.is_null());
            assert_eq!(mrbridge_value_tag(v), VariantTag::DataObject as u32);
            assert_eq!(mrbridge_unwrap(ctx, v, ty, &mut error), payload);

            let other = mrbridge_type_new(b"Gauge\0".as_ptr() as *const c_char, None, &mut error);
            assert!(mrbridge_unwrap(ctx, v, other, &mut error).is_null());
            let (code, msg) = take_error(error);
            assert_eq!(code, codes::TYPE_MISMATCH);
            assert!(msg.contains("Gauge"));

            mrbridge_type_free(other);
            mrbridge_type_free(ty);
            mrbridge_close(ctx);
            assert_eq!(FREED.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_image_and_introspection() {
        unsafe {
            let ctx = mrbridge_open();
            let src = "x = 1\ndef foo(a); b = 1; end";
            let proc = mrbridge_load_string(ctx, src.as_ptr(), src.len(), ptr::null(), 1);
            assert_eq!(mrbridge_value_tag(proc), VariantTag::Proc as u32);

            let image = loader::dump(&*(ctx as *mut Context), Value::from_raw(proc), mrbridge::ByteOrder::Big, false)
                .unwrap();
            let mut error = ptr::null_mut();
            let loaded = mrbridge_read_image(ctx, image.as_ptr(), image.len(), &mut error);
            assert!(error.is_null());

            let (mut len, mut count) = (0usize, 0usize);
            let iseq = mrbridge_proc_iseq(ctx, loaded, &mut len, &mut count);
            assert!(!iseq.is_null());
            assert!(len > 0 && count > 0);

            let mut n = 0usize;
            let syms = c_strings(mrbridge_proc_symbols(ctx, loaded, &mut n), n);
            assert_eq!(syms, vec!["foo"]);

            let top = Procedure::from_value(&*(ctx as *mut Context), Value::from_raw(loaded)).unwrap();
            let child = top.children().next().unwrap();
            let names: Vec<String> = child.local_names(&*(ctx as *mut Context)).unwrap().collect();
            assert_eq!(names, vec!["a", "b"]);

            let top_names = c_strings(mrbridge_proc_local_names(ctx, loaded, &mut n), n);
            assert_eq!(top_names, vec!["x"]);
            assert!(mrbridge_proc_local_names(ctx, mrbridge_int_value(1), &mut n).is_null());

            let mut bad = image.clone();
            bad[0] = b'Z';
            let v = mrbridge_read_image(ctx, bad.as_ptr(), bad.len(), &mut error);
            assert_eq!(mrbridge_value_tag(v), VariantTag::Nil as u32);
            let (code, _) = take_error(error);
            assert_eq!(code, codes::INVALID_IMAGE_HEADER);
            assert!(mrbridge_get_current_exception(ctx).is_null());
            mrbridge_close(ctx);
        }
    }

    #[test]
    fn test_null_arguments_are_reported() {
        unsafe {
            let mut error = ptr::null_mut();
            let v = mrbridge_read_image(ptr::null_mut(), ptr::null(), 0, &mut error);
            assert_eq!(mrbridge_value_tag(v), VariantTag::Nil as u32);
            let (code, msg) = take_error(error);
            assert_eq!(code, codes::INVALID_ARGUMENT);
            assert!(msg.contains("context"));

            let ctx = mrbridge_open_with_config(b"/nonexistent.toml\0".as_ptr() as *const c_char, &mut error);
            assert!(ctx.is_null());
            let (code, _) = take_error(error);
            assert_eq!(code, codes::IO);
        }
    }
}
