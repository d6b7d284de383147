//! Raising and rendering exceptions

use crate::heap::ObjRef;
use crate::jump::VmJump;
use crate::object::{RException, RObject};
use crate::value::{RawValue, ValueType};
use crate::vm::Vm;

impl Vm {
    /// New exception instance; `cls` should descend from `Exception`
    pub fn exc_new(&mut self, cls: ObjRef, message: &str) -> RawValue {
        self.alloc(RObject::Exception(RException {
            class: cls,
            message: message.to_string(),
            backtrace: Vec::new(),
        }))
    }

    /// Raise a new exception of class `cls`
    pub fn raise(&mut self, cls: ObjRef, message: &str) -> ! {
        let exc = self.exc_new(cls, message);
        self.raise_exc(exc)
    }

    /// Raise a new exception of the class named `class_name`.
    ///
    /// An unknown name raises `NameError`; a name that is not an exception
    /// class raises `TypeError`.
    pub fn raise_by_name(&mut self, class_name: &str, message: &str) -> ! {
        let Some(cls) = self.class_get(class_name) else {
            let msg = format!("uninitialized constant {}", class_name);
            self.raise(self.core.name_error, &msg)
        };
        if !self.is_subclass(cls, self.core.exception) {
            self.raise(self.core.type_error, "exception class/object expected")
        }
        self.raise(cls, message)
    }

    /// Store `exc` in the exception slot and jump to the innermost recovery
    /// point. A backtrace is captured if the exception has none yet.
    pub fn raise_exc(&mut self, exc: RawValue) -> ! {
        let Some(r) = exc.as_obj().filter(|_| exc.tt() == ValueType::Exception) else {
            self.raise(self.core.type_error, "exception class/object expected")
        };
        let needs_backtrace = matches!(
            self.heap.get(r),
            Some(RObject::Exception(e)) if e.backtrace.is_empty()
        );
        if needs_backtrace {
            let bt = self.capture_backtrace();
            if let Some(RObject::Exception(e)) = self.heap.get_mut(r) {
                e.backtrace = bt;
            }
        }
        self.exc = Some(r);
        self.throw()
    }

    /// Jump to the innermost recovery point with the current exception.
    ///
    /// # Panics
    ///
    /// Panics when no recovery point is registered: an exception with
    /// nowhere to go is fatal.
    pub fn throw(&mut self) -> ! {
        match self.jmp {
            Some(target) => {
                tracing::trace!(%target, depth = self.callinfo.len(), "raise");
                std::panic::resume_unwind(Box::new(VmJump { target }))
            }
            None => {
                let rendered = self
                    .exc
                    .map(|e| self.exc_inspect(e))
                    .unwrap_or_else(|| "unknown exception".to_string());
                panic!("uncaught exception with no recovery point: {}", rendered)
            }
        }
    }

    /// Pending exception
    pub fn exception(&self) -> Option<ObjRef> {
        self.exc
    }

    /// Take the pending exception, leaving the slot empty
    pub fn take_exception(&mut self) -> Option<ObjRef> {
        self.exc.take()
    }

    /// Replace the pending exception
    pub fn set_exception(&mut self, exc: Option<ObjRef>) {
        self.exc = exc;
    }

    /// Value for an exception reference
    pub fn exception_value(&self, exc: ObjRef) -> RawValue {
        RawValue::object(ValueType::Exception, exc)
    }

    fn rexception(&self, exc: ObjRef) -> Option<&RException> {
        match self.heap.get(exc)? {
            RObject::Exception(e) => Some(e),
            _ => None,
        }
    }

    /// Class of an exception
    pub fn exc_class(&self, exc: ObjRef) -> Option<ObjRef> {
        self.rexception(exc).map(|e| e.class)
    }

    /// Message, or the class name when empty
    pub fn exc_message(&self, exc: ObjRef) -> String {
        match self.rexception(exc) {
            Some(e) if e.message.is_empty() => self.class_name(e.class),
            Some(e) => e.message.clone(),
            None => String::new(),
        }
    }

    pub(crate) fn set_exc_message(&mut self, exc: RawValue, message: String) {
        if let Some(RObject::Exception(e)) = self.obj_mut(exc) {
            e.message = message;
        }
    }

    /// `message (ClassName)`, or just the class name without a message
    pub fn exc_inspect(&self, exc: ObjRef) -> String {
        match self.rexception(exc) {
            Some(e) if e.message.is_empty() => self.class_name(e.class),
            Some(e) => format!("{} ({})", e.message, self.class_name(e.class)),
            None => String::new(),
        }
    }

    /// Backtrace frames, most recent first
    pub fn exc_backtrace(&self, exc: ObjRef) -> Vec<String> {
        self.rexception(exc)
            .map(|e| e.backtrace.clone())
            .unwrap_or_default()
    }

    /// `file:line:in method` for each compiled frame, innermost first.
    /// Frames without line info and host frames are skipped.
    pub(crate) fn capture_backtrace(&self) -> Vec<String> {
        self.callinfo
            .iter()
            .rev()
            .filter_map(|ci| {
                let irep = ci.irep.as_ref()?;
                let debug = irep.debug.as_ref()?;
                let line = debug.line_for(ci.pc)?;
                Some(match ci.mid {
                    Some(mid) => format!("{}:{}:in {}", debug.filename, line, self.sym_str(mid)),
                    None => format!("{}:{}", debug.filename, line),
                })
            })
            .collect()
    }
}
