//! Core library: the methods every booted VM carries

use crate::object::{InstanceTt, RObject};
use crate::value::{RawValue, ValueType};
use crate::vm::Vm;
use std::io::Write;
use std::rc::Rc;

/// Install the core library on a freshly booted VM
pub(crate) fn init(vm: &mut Vm) {
    init_object(vm);
    init_class(vm);
    init_numeric(vm);
    init_string(vm);
    init_symbol(vm);
    init_array(vm);
    init_singletons(vm);
    init_exception(vm);
    let proc_class = vm.core.proc_class;
    vm.define_fn(proc_class, "call", proc_call);
}

fn check_arity(vm: &mut Vm, args: &[RawValue], expected: usize) {
    if args.len() != expected {
        let msg = format!(
            "wrong number of arguments (given {}, expected {})",
            args.len(),
            expected
        );
        vm.raise(vm.core.argument_error, &msg)
    }
}

fn class_name_of(vm: &Vm, v: RawValue) -> String {
    vm.class_name(vm.class_of(v))
}

// ===== Object / Kernel =====

fn init_object(vm: &mut Vm) {
    let object = vm.core.object;
    vm.define_fn(object, "initialize", |_, _, _| RawValue::nil());
    vm.define_fn(object, "inspect", object_to_s);
    vm.define_fn(object, "to_s", object_to_s);
    vm.define_fn(object, "class", |vm, this, _| {
        let cls = vm.class_of(this);
        vm.class_value(cls)
    });
    vm.define_fn(object, "==", object_eq);
    vm.define_fn(object, "equal?", object_eq);
    vm.define_fn(object, "nil?", |_, _, _| RawValue::false_value());
    vm.define_fn(object, "is_a?", object_is_a);
    vm.define_fn(object, "kind_of?", object_is_a);
    vm.define_fn(object, "respond_to?", object_respond_to);
    vm.define_fn(object, "raise", kernel_raise);
    vm.define_fn(object, "puts", kernel_puts);
    vm.define_fn(object, "p", kernel_p);
}

fn default_repr(vm: &Vm, v: RawValue) -> String {
    if v.identical(&vm.top_self) {
        return "main".to_string();
    }
    match v.tt() {
        ValueType::CPtr => format!("#<CPtr:{:p}>", v.as_cptr().unwrap_or(std::ptr::null_mut())),
        ValueType::Proc => "#<Proc>".to_string(),
        _ => format!("#<{}>", class_name_of(vm, v)),
    }
}

fn object_to_s(vm: &mut Vm, this: RawValue, _args: &[RawValue]) -> RawValue {
    let s = default_repr(vm, this);
    vm.str_new(s.as_bytes())
}

fn object_eq(vm: &mut Vm, this: RawValue, args: &[RawValue]) -> RawValue {
    check_arity(vm, args, 1);
    RawValue::bool(this.identical(&args[0]))
}

fn object_is_a(vm: &mut Vm, this: RawValue, args: &[RawValue]) -> RawValue {
    check_arity(vm, args, 1);
    match vm.class_ref(args[0]) {
        Some(cls) => RawValue::bool(vm.is_kind_of(this, cls)),
        None => vm.raise(vm.core.type_error, "class or module required"),
    }
}

fn object_respond_to(vm: &mut Vm, this: RawValue, args: &[RawValue]) -> RawValue {
    check_arity(vm, args, 1);
    let mid = match args[0].as_sym() {
        Some(sym) => sym,
        None => match vm.string_bytes(args[0]).map(<[u8]>::to_vec) {
            Some(name) => vm.intern(&name),
            None => {
                let msg = format!("{} is not a symbol nor a string", vm.inspect_string(args[0]));
                vm.raise(vm.core.type_error, &msg)
            }
        },
    };
    RawValue::bool(vm.respond_to(this, mid))
}

/// `raise`, `raise "msg"`, `raise Class`, `raise Class, "msg"`, `raise exc`
fn kernel_raise(vm: &mut Vm, _this: RawValue, args: &[RawValue]) -> RawValue {
    let exc = match args {
        [] => vm.exc_new(vm.core.runtime_error, "unhandled exception"),
        [msg] if msg.tt() == ValueType::String => {
            let text = vm.string_lossy(*msg).unwrap_or_default();
            vm.exc_new(vm.core.runtime_error, &text)
        }
        [exc] if exc.tt() == ValueType::Exception => *exc,
        [cls] | [cls, _] if vm.class_ref(*cls).is_some() => {
            vm.funcall_name(*cls, "new", &args[1..])
        }
        [_] | [_, _] => vm.raise(vm.core.type_error, "exception class/object expected"),
        _ => {
            let msg = format!("wrong number of arguments (given {}, expected 0..2)", args.len());
            vm.raise(vm.core.argument_error, &msg)
        }
    };
    vm.raise_exc(exc)
}

fn write_line(vm: &mut Vm, mut line: Vec<u8>) {
    if !line.ends_with(b"\n") {
        line.push(b'\n');
    }
    if let Err(e) = vm.output.write_all(&line) {
        let msg = format!("write failed: {}", e);
        vm.raise(vm.core.runtime_error, &msg)
    }
}

fn kernel_puts(vm: &mut Vm, _this: RawValue, args: &[RawValue]) -> RawValue {
    if args.is_empty() {
        write_line(vm, Vec::new());
    }
    for &arg in args {
        let line = vm.to_s_string(arg).into_bytes();
        write_line(vm, line);
    }
    RawValue::nil()
}

fn kernel_p(vm: &mut Vm, _this: RawValue, args: &[RawValue]) -> RawValue {
    for &arg in args {
        let line = vm.inspect_string(arg).into_bytes();
        write_line(vm, line);
    }
    match args {
        [] => RawValue::nil(),
        [one] => *one,
        _ => args[args.len() - 1],
    }
}

// ===== Class / Module =====

fn init_class(vm: &mut Vm) {
    let module = vm.core.module;
    let class = vm.core.class;
    vm.define_fn(module, "name", |vm, this, _| match vm.class_ref(this) {
        Some(cls) if vm.rclass(cls).is_some_and(|c| c.name.is_some()) => {
            let name = vm.class_name(cls);
            vm.str_new(name.as_bytes())
        }
        _ => RawValue::nil(),
    });
    vm.define_fn(module, "to_s", class_to_s);
    vm.define_fn(module, "inspect", class_to_s);
    vm.define_fn(class, "new", class_new);
    vm.define_fn(class, "superclass", |vm, this, _| {
        match vm.class_ref(this).and_then(|c| vm.superclass(c)) {
            Some(sup) => vm.class_value(sup),
            None => RawValue::nil(),
        }
    });
}

fn class_to_s(vm: &mut Vm, this: RawValue, _args: &[RawValue]) -> RawValue {
    let name = match vm.class_ref(this) {
        Some(cls) => vm.class_name(cls),
        None => default_repr(vm, this),
    };
    vm.str_new(name.as_bytes())
}

/// Allocate an instance following the class's representation, then run
/// `initialize` with the arguments
fn class_new(vm: &mut Vm, this: RawValue, args: &[RawValue]) -> RawValue {
    let Some(cls) = vm.class_ref(this) else {
        vm.raise(vm.core.type_error, "not a class")
    };
    let core = &vm.core;
    let builtin = [
        core.integer,
        core.float,
        core.symbol,
        core.nil,
        core.true_class,
        core.false_class,
        core.proc_class,
        core.class,
        core.module,
    ];
    if builtin.iter().any(|&b| vm.is_subclass(cls, b)) {
        let msg = format!("undefined method 'new' for {}", vm.class_name(cls));
        vm.raise(vm.core.no_method_error, &msg)
    }

    let obj = if vm.is_subclass(cls, vm.core.exception) {
        vm.exc_new(cls, "")
    } else if vm.is_subclass(cls, vm.core.string) {
        vm.str_new(b"")
    } else if vm.is_subclass(cls, vm.core.array) {
        vm.array_new(&[])
    } else {
        match vm.instance_tt(cls) {
            Some(InstanceTt::Data) => vm.data_new(cls, std::ptr::null_mut(), None),
            _ => vm.alloc(RObject::Instance { class: cls }),
        }
    };
    vm.funcall_name(obj, "initialize", args);
    obj
}

// ===== Integer / Float =====

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(v: RawValue) -> Option<Num> {
        match v.tt() {
            ValueType::Fixnum => v.as_fixnum().map(Num::Int),
            ValueType::Float => v.as_float().map(Num::Float),
            _ => None,
        }
    }

    fn to_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Arith {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy)]
enum Cmp {
    Lt,
    Gt,
    Le,
    Ge,
}

fn init_numeric(vm: &mut Vm) {
    let classes = [vm.core.integer, vm.core.float];
    for cls in classes {
        for (name, op) in [
            ("+", Arith::Add),
            ("-", Arith::Sub),
            ("*", Arith::Mul),
            ("/", Arith::Div),
            ("%", Arith::Mod),
        ] {
            vm.define_method(
                cls,
                name,
                Rc::new(move |vm: &mut Vm, this: RawValue, args: &[RawValue]| {
                    arith(vm, this, args, op)
                }),
            );
        }
        for (name, op) in [("<", Cmp::Lt), (">", Cmp::Gt), ("<=", Cmp::Le), (">=", Cmp::Ge)] {
            vm.define_method(
                cls,
                name,
                Rc::new(move |vm: &mut Vm, this: RawValue, args: &[RawValue]| {
                    compare(vm, this, args, op)
                }),
            );
        }
        vm.define_fn(cls, "==", num_eq);
        vm.define_fn(cls, "-@", num_neg);
        vm.define_fn(cls, "to_s", num_to_s);
        vm.define_fn(cls, "inspect", num_to_s);
        vm.define_fn(cls, "to_i", |_, this, _| match Num::of(this) {
            Some(Num::Float(f)) if f.is_finite() => RawValue::fixnum(f.trunc() as i64),
            Some(Num::Float(_)) => RawValue::fixnum(0),
            _ => this,
        });
        vm.define_fn(cls, "to_f", |_, this, _| {
            RawValue::float(Num::of(this).map(Num::to_f64).unwrap_or(f64::NAN))
        });
    }
}

fn operand(vm: &mut Vm, this: RawValue, args: &[RawValue]) -> (Num, Option<Num>) {
    check_arity(vm, args, 1);
    let lhs = Num::of(this).unwrap_or(Num::Int(0));
    (lhs, Num::of(args[0]))
}

fn arith(vm: &mut Vm, this: RawValue, args: &[RawValue], op: Arith) -> RawValue {
    let (lhs, rhs) = operand(vm, this, args);
    let Some(rhs) = rhs else {
        let msg = format!(
            "{} can't be coerced into {}",
            class_name_of(vm, args[0]),
            class_name_of(vm, this)
        );
        vm.raise(vm.core.type_error, &msg)
    };
    match (lhs, rhs) {
        (Num::Int(a), Num::Int(b)) => int_arith(vm, a, b, op),
        (a, b) => RawValue::float(float_arith(a.to_f64(), b.to_f64(), op)),
    }
}

/// Integer arithmetic with floor division; results that overflow `i64`
/// fall back to `Float`
fn int_arith(vm: &mut Vm, a: i64, b: i64, op: Arith) -> RawValue {
    if matches!(op, Arith::Div | Arith::Mod) && b == 0 {
        vm.raise(vm.core.zero_division_error, "divided by 0")
    }
    let exact = match op {
        Arith::Add => a.checked_add(b),
        Arith::Sub => a.checked_sub(b),
        Arith::Mul => a.checked_mul(b),
        Arith::Div => a.checked_div(b).map(|q| {
            if a % b != 0 && (a < 0) != (b < 0) {
                q - 1
            } else {
                q
            }
        }),
        Arith::Mod => Some(match a.checked_rem(b) {
            Some(r) if r != 0 && (r < 0) != (b < 0) => r + b,
            Some(r) => r,
            None => 0,
        }),
    };
    match exact {
        Some(i) => RawValue::fixnum(i),
        None => RawValue::float(float_arith(a as f64, b as f64, op)),
    }
}

fn float_arith(a: f64, b: f64, op: Arith) -> f64 {
    match op {
        Arith::Add => a + b,
        Arith::Sub => a - b,
        Arith::Mul => a * b,
        Arith::Div => a / b,
        Arith::Mod => a - b * (a / b).floor(),
    }
}

fn compare(vm: &mut Vm, this: RawValue, args: &[RawValue], op: Cmp) -> RawValue {
    let (lhs, rhs) = operand(vm, this, args);
    let Some(rhs) = rhs else {
        let msg = format!(
            "comparison of {} with {} failed",
            class_name_of(vm, this),
            class_name_of(vm, args[0])
        );
        vm.raise(vm.core.argument_error, &msg)
    };
    let ord = match (lhs, rhs) {
        (Num::Int(a), Num::Int(b)) => Some(a.cmp(&b)),
        (a, b) => a.to_f64().partial_cmp(&b.to_f64()),
    };
    let Some(ord) = ord else {
        return RawValue::false_value();
    };
    RawValue::bool(match op {
        Cmp::Lt => ord.is_lt(),
        Cmp::Gt => ord.is_gt(),
        Cmp::Le => ord.is_le(),
        Cmp::Ge => ord.is_ge(),
    })
}

fn num_eq(vm: &mut Vm, this: RawValue, args: &[RawValue]) -> RawValue {
    let (lhs, rhs) = operand(vm, this, args);
    RawValue::bool(match (lhs, rhs) {
        (Num::Int(a), Some(Num::Int(b))) => a == b,
        (a, Some(b)) => a.to_f64() == b.to_f64(),
        (_, None) => false,
    })
}

fn num_neg(_vm: &mut Vm, this: RawValue, _args: &[RawValue]) -> RawValue {
    match Num::of(this) {
        Some(Num::Int(i)) => match i.checked_neg() {
            Some(n) => RawValue::fixnum(n),
            None => RawValue::float(-(i as f64)),
        },
        Some(Num::Float(f)) => RawValue::float(-f),
        None => this,
    }
}

fn num_to_s(vm: &mut Vm, this: RawValue, _args: &[RawValue]) -> RawValue {
    let s = match Num::of(this) {
        Some(Num::Int(i)) => i.to_string(),
        Some(Num::Float(f)) => format_float(f),
        None => String::new(),
    };
    vm.str_new(s.as_bytes())
}

/// Render a float the way scripts print it: `1.0`, `0.25`, `1.0e+20`,
/// `Infinity`, `NaN`
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "NaN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if f != 0.0 && (f.abs() >= 1e16 || f.abs() < 1e-4) {
        let s = format!("{:e}", f);
        let (mantissa, exp) = s.split_once('e').unwrap_or((&s, "0"));
        let mantissa = if mantissa.contains('.') {
            mantissa.to_string()
        } else {
            format!("{}.0", mantissa)
        };
        let exp = match exp.strip_prefix('-') {
            Some(digits) => format!("-{:0>2}", digits),
            None => format!("+{:0>2}", exp),
        };
        return format!("{}e{}", mantissa, exp);
    }
    if f.fract() == 0.0 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

// ===== String / Symbol =====

fn init_string(vm: &mut Vm) {
    let string = vm.core.string;
    vm.define_fn(string, "initialize", |vm, this, args| {
        if let Some(src) = args.first() {
            let bytes = vm.string_bytes(*src).map(<[u8]>::to_vec).unwrap_or_default();
            if let Some(RObject::String { bytes: dst }) = vm.obj_mut(this) {
                *dst = bytes;
            }
        }
        RawValue::nil()
    });
    vm.define_fn(string, "+", |vm, this, args| {
        check_arity(vm, args, 1);
        let Some(rhs) = vm.string_bytes(args[0]).map(<[u8]>::to_vec) else {
            let msg = format!(
                "no implicit conversion of {} into String",
                class_name_of(vm, args[0])
            );
            vm.raise(vm.core.type_error, &msg)
        };
        let mut bytes = vm.string_bytes(this).map(<[u8]>::to_vec).unwrap_or_default();
        bytes.extend_from_slice(&rhs);
        vm.str_new(&bytes)
    });
    vm.define_fn(string, "==", |vm, this, args| {
        check_arity(vm, args, 1);
        let eq = match (vm.string_bytes(this), vm.string_bytes(args[0])) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        };
        RawValue::bool(eq)
    });
    vm.define_fn(string, "size", string_size);
    vm.define_fn(string, "length", string_size);
    vm.define_fn(string, "to_s", |_, this, _| this);
    vm.define_fn(string, "to_sym", |vm, this, _| {
        let bytes = vm.string_bytes(this).map(<[u8]>::to_vec).unwrap_or_default();
        RawValue::symbol(vm.intern(&bytes))
    });
    vm.define_fn(string, "inspect", |vm, this, _| {
        let s = vm.string_lossy(this).unwrap_or_default();
        let quoted = format!("{:?}", s);
        vm.str_new(quoted.as_bytes())
    });
}

fn string_size(vm: &mut Vm, this: RawValue, _args: &[RawValue]) -> RawValue {
    let n = match vm.string_bytes(this) {
        Some(b) => std::str::from_utf8(b).map_or(b.len(), |s| s.chars().count()),
        None => 0,
    };
    RawValue::fixnum(n as i64)
}

fn init_symbol(vm: &mut Vm) {
    let symbol = vm.core.symbol;
    vm.define_fn(symbol, "to_s", |vm, this, _| {
        let name = this
            .as_sym()
            .and_then(|s| vm.sym_name(s))
            .map(<[u8]>::to_vec)
            .unwrap_or_default();
        vm.str_new(&name)
    });
    vm.define_fn(symbol, "inspect", |vm, this, _| {
        let name = this.as_sym().map(|s| vm.sym_str(s)).unwrap_or_default();
        vm.str_new(format!(":{}", name).as_bytes())
    });
    vm.define_fn(symbol, "to_sym", |_, this, _| this);
}

// ===== Array =====

fn init_array(vm: &mut Vm) {
    let array = vm.core.array;
    vm.define_fn(array, "size", array_size);
    vm.define_fn(array, "length", array_size);
    vm.define_fn(array, "empty?", |vm, this, _| {
        RawValue::bool(vm.array_items(this).map_or(true, <[RawValue]>::is_empty))
    });
    vm.define_fn(array, "[]", |vm, this, args| {
        check_arity(vm, args, 1);
        let i = index_arg(vm, args[0]);
        let items = vm.array_items(this).unwrap_or_default();
        resolve_index(items.len(), i)
            .map(|i| items[i])
            .unwrap_or_else(RawValue::nil)
    });
    vm.define_fn(array, "[]=", array_store);
    vm.define_fn(array, "first", |vm, this, _| {
        vm.array_items(this)
            .and_then(|items| items.first().copied())
            .unwrap_or_else(RawValue::nil)
    });
    vm.define_fn(array, "last", |vm, this, _| {
        vm.array_items(this)
            .and_then(|items| items.last().copied())
            .unwrap_or_else(RawValue::nil)
    });
    vm.define_fn(array, "push", |vm, this, args| {
        if let Some(items) = vm.array_items_mut(this) {
            items.extend_from_slice(args);
        }
        this
    });
    vm.define_fn(array, "==", array_eq);
    vm.define_fn(array, "join", array_join);
    vm.define_fn(array, "inspect", array_inspect);
    vm.define_fn(array, "to_s", array_inspect);
}

fn array_size(vm: &mut Vm, this: RawValue, _args: &[RawValue]) -> RawValue {
    RawValue::fixnum(vm.array_items(this).map_or(0, <[RawValue]>::len) as i64)
}

fn index_arg(vm: &mut Vm, v: RawValue) -> i64 {
    match v.as_fixnum() {
        Some(i) => i,
        None => {
            let msg = format!("no implicit conversion of {} into Integer", class_name_of(vm, v));
            vm.raise(vm.core.type_error, &msg)
        }
    }
}

/// Position of `i` in an array of `len`, counting negatives from the end
fn resolve_index(len: usize, i: i64) -> Option<usize> {
    let i = if i < 0 { i.checked_add(len as i64)? } else { i };
    (0..len as i64).contains(&i).then_some(i as usize)
}

fn array_store(vm: &mut Vm, this: RawValue, args: &[RawValue]) -> RawValue {
    check_arity(vm, args, 2);
    let i = index_arg(vm, args[0]);
    let len = vm.array_items(this).map_or(0, <[RawValue]>::len);
    let at = if i < 0 {
        match resolve_index(len, i) {
            Some(at) => at,
            None => {
                let msg = format!("index {} too small for array", i);
                vm.raise(vm.core.argument_error, &msg)
            }
        }
    } else {
        i as usize
    };
    if let Some(items) = vm.array_items_mut(this) {
        if at >= items.len() {
            items.resize(at + 1, RawValue::nil());
        }
        items[at] = args[1];
    }
    args[1]
}

fn array_eq(vm: &mut Vm, this: RawValue, args: &[RawValue]) -> RawValue {
    check_arity(vm, args, 1);
    let (Some(a), Some(b)) = (vm.array_items(this), vm.array_items(args[0])) else {
        return RawValue::false_value();
    };
    if a.len() != b.len() {
        return RawValue::false_value();
    }
    let pairs: Vec<_> = a.iter().copied().zip(b.iter().copied()).collect();
    for (x, y) in pairs {
        if !vm.funcall_name(x, "==", &[y]).is_truthy() {
            return RawValue::false_value();
        }
    }
    RawValue::true_value()
}

fn array_join(vm: &mut Vm, this: RawValue, args: &[RawValue]) -> RawValue {
    let sep = match args.first() {
        Some(s) => vm.string_lossy(*s).unwrap_or_default(),
        None => String::new(),
    };
    let items = vm.array_items(this).map(<[RawValue]>::to_vec).unwrap_or_default();
    let parts: Vec<String> = items.into_iter().map(|v| vm.to_s_string(v)).collect();
    let joined = parts.join(&sep);
    vm.str_new(joined.as_bytes())
}

/// An array that (indirectly) contains itself renders as `[...]` where
/// the inner `inspect` finds an outer one on the call stack.
fn array_inspect(vm: &mut Vm, this: RawValue, _args: &[RawValue]) -> RawValue {
    let inspect = vm.symbols.lookup(b"inspect");
    let nested = vm
        .callinfo
        .iter()
        .rev()
        .skip(1)
        .any(|ci| ci.mid.is_some() && ci.mid == inspect && ci.self_val.identical(&this));
    if nested {
        return vm.str_new(b"[...]");
    }
    let items = vm.array_items(this).map(<[RawValue]>::to_vec).unwrap_or_default();
    let parts: Vec<String> = items.into_iter().map(|v| vm.inspect_string(v)).collect();
    let s = format!("[{}]", parts.join(", "));
    vm.str_new(s.as_bytes())
}

// ===== nil / true / false =====

fn init_singletons(vm: &mut Vm) {
    let (nil, t, f) = (vm.core.nil, vm.core.true_class, vm.core.false_class);
    vm.define_fn(nil, "to_s", |vm, _, _| vm.str_new(b""));
    vm.define_fn(nil, "inspect", |vm, _, _| vm.str_new(b"nil"));
    vm.define_fn(nil, "nil?", |_, _, _| RawValue::true_value());
    for cls in [t, f] {
        vm.define_fn(cls, "to_s", bool_to_s);
        vm.define_fn(cls, "inspect", bool_to_s);
    }
}

fn bool_to_s(vm: &mut Vm, this: RawValue, _args: &[RawValue]) -> RawValue {
    let s: &[u8] = if this.is_truthy() { b"true" } else { b"false" };
    vm.str_new(s)
}

// ===== Exception =====

fn init_exception(vm: &mut Vm) {
    let exception = vm.core.exception;
    vm.define_fn(exception, "initialize", |vm, this, args| {
        match args {
            [] => {}
            [msg] => {
                let text = vm.to_s_string(*msg);
                vm.set_exc_message(this, text);
            }
            _ => check_arity(vm, args, 1),
        }
        RawValue::nil()
    });
    vm.define_fn(exception, "message", exc_message);
    vm.define_fn(exception, "to_s", exc_message);
    vm.define_fn(exception, "inspect", |vm, this, _| {
        let s = this.as_obj().map(|e| vm.exc_inspect(e)).unwrap_or_default();
        vm.str_new(s.as_bytes())
    });
}

fn exc_message(vm: &mut Vm, this: RawValue, _args: &[RawValue]) -> RawValue {
    let s = this.as_obj().map(|e| vm.exc_message(e)).unwrap_or_default();
    vm.str_new(s.as_bytes())
}

// ===== Proc =====

fn proc_call(vm: &mut Vm, this: RawValue, args: &[RawValue]) -> RawValue {
    let top = vm.top_self;
    vm.call_proc(this, top, args)
}
