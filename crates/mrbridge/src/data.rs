//! Object Wrapper: host payloads in VM custody
//!
//! A payload handed to [`wrap`] belongs to the VM from then on. The
//! collector calls the descriptor's destructor exactly once, when the cell
//! is swept or when the context is closed.
//!
//! # Example
//!
//! ```ignore
//! let cls = class::define_class(&mut ctx, "Counter", None)?;
//! class::set_instance_representation(&mut ctx, cls, VariantTag::DataObject)?;
//! let ty = TypeDescriptor::boxed::<u64>("Counter");
//! let v = data::wrap_box(&mut ctx, cls, Box::new(0u64), &ty)?;
//! let p = data::unwrap(&ctx, v, &ty)? as *mut u64;
//! ```

use crate::context::Context;
use crate::error::{ShimError, ShimResult};
use crate::value::Value;
use mrbridge_vm::{DataFree, DataType, InstanceTt, ObjRef};
use std::any::TypeId;
use std::ffi::c_void;
use std::rc::Rc;

/// Run-time type of a wrapped payload
///
/// Two descriptors describe the same type iff their names are equal.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    ty: Rc<DataType>,
    boxed: Option<TypeId>,
}

impl TypeDescriptor {
    /// Descriptor whose destructor drops a `Box<T>`
    pub fn boxed<T: 'static>(name: &str) -> Self {
        Self {
            ty: Rc::new(DataType {
                name: name.to_string(),
                dfree: Some(drop_box::<T>),
            }),
            boxed: Some(TypeId::of::<T>()),
        }
    }

    /// Type name
    pub fn name(&self) -> &str {
        &self.ty.name
    }

    /// Destructor, if any
    pub fn destructor(&self) -> Option<DataFree> {
        self.ty.dfree
    }

    /// Whether `other` names the same type
    pub fn same_type(&self, other: &TypeDescriptor) -> bool {
        self.ty.name == other.ty.name
    }

    pub(crate) fn data_type(&self) -> Rc<DataType> {
        Rc::clone(&self.ty)
    }
}

unsafe extern "C" fn drop_box<T>(p: *mut c_void) {
    drop(Box::from_raw(p as *mut T));
}

/// Descriptor from a name and an optional destructor
pub fn make_descriptor(name: &str, destructor: Option<DataFree>) -> TypeDescriptor {
    TypeDescriptor {
        ty: Rc::new(DataType {
            name: name.to_string(),
            dfree: destructor,
        }),
        boxed: None,
    }
}

fn require_data_class(ctx: &Context, class: ObjRef) -> ShimResult<()> {
    match ctx.vm().instance_tt(class) {
        Some(InstanceTt::Data) => Ok(()),
        Some(InstanceTt::Object) => Err(ShimError::InstanceRepresentation(
            ctx.vm().class_name(class),
        )),
        None => Err(ShimError::mismatch("class", "non-class object")),
    }
}

/// Hand `payload` to the VM as an instance of `class`.
///
/// Fails with [`ShimError::InstanceRepresentation`] unless `class` was
/// declared DataObject-represented.
///
/// # Safety
///
/// `payload` must be valid for the descriptor's destructor and must not be
/// freed by the caller afterwards.
pub unsafe fn wrap(
    ctx: &mut Context,
    class: ObjRef,
    payload: *mut c_void,
    ty: &TypeDescriptor,
) -> ShimResult<Value> {
    require_data_class(ctx, class)?;
    let raw = ctx.vm_mut().data_new(class, payload, Some(ty.data_type()));
    tracing::trace!(ty = ty.name(), "wrapped payload");
    Ok(Value::from_raw(raw))
}

/// Move a boxed payload into the VM.
///
/// `ty` must come from [`TypeDescriptor::boxed`] for the same `T`. On error
/// the box is dropped here.
pub fn wrap_box<T: 'static>(
    ctx: &mut Context,
    class: ObjRef,
    payload: Box<T>,
    ty: &TypeDescriptor,
) -> ShimResult<Value> {
    if ty.boxed != Some(TypeId::of::<T>()) {
        return Err(ShimError::mismatch(
            format!("boxed descriptor for {}", std::any::type_name::<T>()),
            ty.name(),
        ));
    }
    require_data_class(ctx, class)?;
    let ptr = Box::into_raw(payload) as *mut c_void;
    // SAFETY: the descriptor drops exactly this Box<T>
    unsafe { wrap(ctx, class, ptr, ty) }
}

/// Payload of a data object whose descriptor names the same type as `ty`
pub fn unwrap(ctx: &Context, v: Value, ty: &TypeDescriptor) -> ShimResult<*mut c_void> {
    if !matches!(v, Value::DataObject(_)) {
        return Err(ShimError::mismatch(ty.name(), v.tag().name()));
    }
    let data = ctx
        .vm()
        .data(v.into_raw())
        .ok_or_else(|| ShimError::mismatch(ty.name(), "dead object"))?;
    match &data.ty {
        Some(actual) if actual.name == ty.ty.name => Ok(data.ptr),
        Some(actual) => Err(ShimError::mismatch(ty.name(), actual.name.as_str())),
        None => Err(ShimError::mismatch(ty.name(), "uninitialized data")),
    }
}

/// Attach a payload to a data object created by script-side `new`.
///
/// # Safety
///
/// Same contract as [`wrap`].
pub unsafe fn data_init(
    ctx: &mut Context,
    v: Value,
    payload: *mut c_void,
    ty: &TypeDescriptor,
) -> ShimResult<()> {
    if !matches!(v, Value::DataObject(_)) {
        return Err(ShimError::mismatch("data object", v.tag().name()));
    }
    let data = ctx
        .vm_mut()
        .data_mut(v.into_raw())
        .ok_or_else(|| ShimError::mismatch("data object", "dead object"))?;
    if data.ty.is_some() || !data.ptr.is_null() {
        return Err(ShimError::mismatch("uninitialized data", "initialized data"));
    }
    data.ptr = payload;
    data.ty = Some(ty.data_type());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::make_nil;
    use std::cell::Cell;

    fn data_class(ctx: &mut Context, name: &str) -> ObjRef {
        let object = ctx.vm().object_class();
        let cls = ctx.vm_mut().define_class(name, None, object);
        ctx.vm_mut().set_instance_tt(cls, InstanceTt::Data);
        cls
    }

    #[test]
    fn test_descriptor_identity_is_by_name() {
        let a = make_descriptor("Point", None);
        let b = make_descriptor("Point", None);
        let c = make_descriptor("Vector", None);
        assert!(a.same_type(&b));
        assert!(!a.same_type(&c));
        assert_eq!(a.name(), "Point");
        assert!(a.destructor().is_none());
    }

    #[test]
    fn test_wrap_unwrap_returns_payload() {
        let mut ctx = Context::open();
        let cls = data_class(&mut ctx, "Point");
        let ty = TypeDescriptor::boxed::<(i32, i32)>("Point");
        let v = wrap_box(&mut ctx, cls, Box::new((3, 4)), &ty).unwrap();
        let p = unwrap(&ctx, v, &ty).unwrap() as *const (i32, i32);
        assert_eq!(unsafe { *p }, (3, 4));

        let other = make_descriptor("Vector", None);
        assert!(matches!(
            unwrap(&ctx, v, &other),
            Err(ShimError::TypeMismatch { .. })
        ));
        assert!(matches!(
            unwrap(&ctx, make_nil(), &ty),
            Err(ShimError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_wrap_requires_data_representation() {
        let mut ctx = Context::open();
        let object = ctx.vm().object_class();
        let plain = ctx.vm_mut().define_class("Plain", None, object);
        let ty = TypeDescriptor::boxed::<u8>("Plain");
        let err = wrap_box(&mut ctx, plain, Box::new(1u8), &ty).unwrap_err();
        assert!(matches!(err, ShimError::InstanceRepresentation(ref n) if n == "Plain"));
    }

    #[test]
    fn test_wrap_box_checks_payload_type() {
        let mut ctx = Context::open();
        let cls = data_class(&mut ctx, "Cell");
        let ty = TypeDescriptor::boxed::<u32>("Cell");
        assert!(matches!(
            wrap_box(&mut ctx, cls, Box::new(1u64), &ty),
            Err(ShimError::TypeMismatch { .. })
        ));
    }

    struct Tracked<'a>(&'a Cell<u32>);

    impl Drop for Tracked<'_> {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_boxed_payload_dropped_on_close() {
        let drops: &'static Cell<u32> = Box::leak(Box::new(Cell::new(0)));
        let mut ctx = Context::open();
        let cls = data_class(&mut ctx, "Tracked");
        let ty = TypeDescriptor::boxed::<Tracked<'static>>("Tracked");
        let v = wrap_box(&mut ctx, cls, Box::new(Tracked(drops)), &ty).unwrap();
        crate::value::gc_register(&mut ctx, v);
        crate::value::full_gc(&mut ctx);
        assert_eq!(drops.get(), 0);
        ctx.close();
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn test_data_init_once() {
        let mut ctx = Context::open();
        let cls = data_class(&mut ctx, "Lazy");
        let raw = ctx.vm_mut().data_new(cls, std::ptr::null_mut(), None);
        let v = Value::from_raw(raw);
        let ty = make_descriptor("Lazy", None);
        let mut slot = 9u8;
        let p = &mut slot as *mut u8 as *mut c_void;
        unsafe {
            data_init(&mut ctx, v, p, &ty).unwrap();
            assert!(data_init(&mut ctx, v, p, &ty).is_err());
        }
        assert_eq!(unwrap(&ctx, v, &ty).unwrap(), p);
    }
}
