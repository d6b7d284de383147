//! Class and module bridging, host methods

use crate::context::Context;
use crate::error::{ShimError, ShimResult};
use crate::trampoline::{get_current_exception, protect, Raised};
use crate::value::{Value, VariantTag};
use mrbridge_vm::{InstanceTt, ObjRef, RawValue};
use std::rc::Rc;

/// Class as a value
pub fn class_as_value(class: ObjRef) -> Value {
    Value::ClassRef(class)
}

/// Module as a value
pub fn module_as_value(module: ObjRef) -> Value {
    Value::ModuleRef(module)
}

/// Class or module behind a value
pub fn value_as_class(v: Value) -> Option<ObjRef> {
    match v {
        Value::ClassRef(r) | Value::ModuleRef(r) => Some(r),
        _ => None,
    }
}

/// `Object`
pub fn object_class(ctx: &Context) -> ObjRef {
    ctx.vm().object_class()
}

/// Declare how instances of `class` are represented.
///
/// Only [`VariantTag::Object`] and [`VariantTag::DataObject`] are accepted.
pub fn set_instance_representation(
    ctx: &mut Context,
    class: ObjRef,
    tag: VariantTag,
) -> ShimResult<()> {
    let tt = match tag {
        VariantTag::Object => InstanceTt::Object,
        VariantTag::DataObject => InstanceTt::Data,
        other => return Err(ShimError::mismatch("object or data object", other.name())),
    };
    if ctx.vm().is_module(class) || !ctx.vm_mut().set_instance_tt(class, tt) {
        return Err(ShimError::mismatch("class", "non-class object"));
    }
    Ok(())
}

fn guarded_ref<F>(ctx: &mut Context, f: F) -> ShimResult<ObjRef>
where
    F: FnOnce(&mut Context) -> ObjRef,
{
    match protect(ctx, f)? {
        Ok(r) => Ok(r),
        Err(Raised) => Err(ShimError::ScriptError(
            get_current_exception(ctx).unwrap_or_default(),
        )),
    }
}

/// Open class `name` under `Object`, creating it when missing.
///
/// Reopening with a different superclass, or naming a constant that is
/// not a class, fails with [`ShimError::ScriptError`].
pub fn define_class(
    ctx: &mut Context,
    name: &str,
    superclass: Option<ObjRef>,
) -> ShimResult<ObjRef> {
    let outer = ctx.vm().object_class();
    guarded_ref(ctx, |c| c.vm_mut().define_class(name, superclass, outer))
}

/// Open module `name` under `Object`, creating it when missing
pub fn define_module(ctx: &mut Context, name: &str) -> ShimResult<ObjRef> {
    let outer = ctx.vm().object_class();
    guarded_ref(ctx, |c| c.vm_mut().define_module(name, outer))
}

/// Resolve `A::B` style paths
pub fn class_get(ctx: &Context, path: &str) -> Option<ObjRef> {
    ctx.vm().class_get(path)
}

/// Class name, `A::B` style
pub fn class_name(ctx: &Context, class: ObjRef) -> String {
    ctx.vm().class_name(class)
}

/// Define a host method.
///
/// The body runs inside the caller's guard: it may raise with
/// [`raise_new`](crate::trampoline::raise_new) and may open nested guards.
pub fn define_method<F>(ctx: &mut Context, class: ObjRef, name: &str, f: F)
where
    F: Fn(&mut Context, Value, &[Value]) -> Value + 'static,
{
    let body = move |vm: &mut mrbridge_vm::Vm, recv: RawValue, args: &[RawValue]| -> RawValue {
        let args: Vec<Value> = args.iter().copied().map(Value::from_raw).collect();
        f(Context::from_vm_mut(vm), Value::from_raw(recv), &args).into_raw()
    };
    ctx.vm_mut().define_method(class, name, Rc::new(body));
}

/// Define a host method on `class` itself, callable as `Class.name`.
///
/// Subclasses inherit it; the receiver passed to `f` is the class the
/// call was made on.
pub fn define_class_method<F>(ctx: &mut Context, class: ObjRef, name: &str, f: F)
where
    F: Fn(&mut Context, Value, &[Value]) -> Value + 'static,
{
    let body = move |vm: &mut mrbridge_vm::Vm, recv: RawValue, args: &[RawValue]| -> RawValue {
        let args: Vec<Value> = args.iter().copied().map(Value::from_raw).collect();
        f(Context::from_vm_mut(vm), Value::from_raw(recv), &args).into_raw()
    };
    ctx.vm_mut().define_singleton_method(class, name, Rc::new(body));
}

/// Method `name` of `class` as a proc value
pub fn method_proc(ctx: &mut Context, class: ObjRef, name: &str) -> Option<Value> {
    let mid = ctx.vm_mut().intern_str(name);
    ctx.vm().method_proc(class, mid).map(Value::from_raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trampoline::{eval, CompileContext};
    use crate::value::{from_int, to_int};

    #[test]
    fn test_identity_bridging() {
        let mut ctx = Context::open();
        let cls = define_class(&mut ctx, "Shape", None).unwrap();
        let module = define_module(&mut ctx, "Geometry").unwrap();
        assert_eq!(value_as_class(class_as_value(cls)), Some(cls));
        assert_eq!(value_as_class(module_as_value(module)), Some(module));
        assert_eq!(value_as_class(from_int(1)), None);
        assert_eq!(class_get(&ctx, "Shape"), Some(cls));
        assert_eq!(class_name(&ctx, cls), "Shape");
    }

    #[test]
    fn test_script_sees_host_class() {
        let mut ctx = Context::open();
        let cls = define_class(&mut ctx, "Shape", None).unwrap();
        let v = eval(&mut ctx, "Shape", &CompileContext::default()).unwrap();
        assert_eq!(v, class_as_value(cls));
    }

    #[test]
    fn test_superclass_mismatch_is_reported() {
        let mut ctx = Context::open();
        define_class(&mut ctx, "Base", None).unwrap();
        let string = class_get(&ctx, "String");
        let err = define_class(&mut ctx, "Base", string).unwrap_err();
        assert!(matches!(err, ShimError::ScriptError(ref m) if m.contains("superclass mismatch")));
        assert!(ctx.vm().exception().is_none());
    }

    #[test]
    fn test_instance_representation_tags() {
        let mut ctx = Context::open();
        let cls = define_class(&mut ctx, "Handle", None).unwrap();
        set_instance_representation(&mut ctx, cls, VariantTag::DataObject).unwrap();
        assert_eq!(ctx.vm().instance_tt(cls), Some(InstanceTt::Data));
        assert!(set_instance_representation(&mut ctx, cls, VariantTag::Float).is_err());

        let module = define_module(&mut ctx, "Mixin").unwrap();
        assert!(set_instance_representation(&mut ctx, module, VariantTag::Object).is_err());
    }

    #[test]
    fn test_host_method_called_from_script() {
        let mut ctx = Context::open();
        let object = object_class(&ctx);
        define_method(&mut ctx, object, "twice", |_, _, args| {
            from_int(args.first().map(|v| to_int(*v)).unwrap_or(0) * 2)
        });
        let v = eval(&mut ctx, "twice(21)", &CompileContext::default()).unwrap();
        assert_eq!(v, from_int(42));
        assert!(matches!(method_proc(&mut ctx, object, "twice"), Some(Value::Proc(_))));
        assert_eq!(method_proc(&mut ctx, object, "thrice"), None);
    }

    #[test]
    fn test_class_method_called_from_script() {
        let mut ctx = Context::open();
        let base = define_class(&mut ctx, "Counter", None).unwrap();
        define_class_method(&mut ctx, base, "start", |ctx, recv, _| {
            let name = value_as_class(recv).map(|c| class_name(ctx, c)).unwrap_or_default();
            crate::value::str_new(ctx, &name)
        });
        let v = eval(
            &mut ctx,
            "class Sub < Counter; end\nCounter.start + Sub.start",
            &CompileContext::default(),
        )
        .unwrap();
        assert_eq!(crate::value::string_bytes(&ctx, v), Some(&b"CounterSub"[..]));
        assert_eq!(method_proc(&mut ctx, base, "start"), None);
    }
}
