//! Context handle and configuration
//!
//! A [`Context`] is the exclusively owned handle to one VM instance. Every
//! shim operation takes it explicitly; it is neither `Send` nor `Sync`, so
//! the one-thread-per-VM rule is enforced by the type system.

use crate::data::TypeDescriptor;
use crate::error::{ShimError, ShimResult};
use mrbridge_vm::{RawValue, Vm, VmOptions, MAX_CALL_DEPTH_LIMIT};
use serde::{Deserialize, Serialize};
use std::ffi::c_void;
use std::io::Write;
use std::path::Path;

/// Context configuration, loadable from TOML
///
/// ```toml
/// gc_threshold = 2048
/// max_call_depth = 512
/// debug_info = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContextOptions {
    /// Allocations between automatic collections
    pub gc_threshold: usize,

    /// Method nesting limit before `SystemStackError`, at most
    /// [`MAX_CALL_DEPTH_LIMIT`]
    pub max_call_depth: usize,

    /// Record line information when compiling. Off means every script
    /// compiled by this context reports an empty backtrace.
    pub debug_info: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        let vm = VmOptions::default();
        Self {
            gc_threshold: vm.gc_threshold,
            max_call_depth: vm.max_call_depth,
            debug_info: vm.debug_info,
        }
    }
}

impl ContextOptions {
    /// Parse and validate TOML text
    pub fn from_toml_str(text: &str) -> ShimResult<Self> {
        let opts: Self =
            toml::from_str(text).map_err(|e| ShimError::InvalidConfig(e.to_string()))?;
        opts.validate()?;
        Ok(opts)
    }

    /// Read, parse and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> ShimResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Reject values the VM cannot run with
    pub fn validate(&self) -> ShimResult<()> {
        if self.gc_threshold == 0 {
            return Err(ShimError::InvalidConfig(
                "gc_threshold must be positive".to_string(),
            ));
        }
        if self.max_call_depth == 0 || self.max_call_depth > MAX_CALL_DEPTH_LIMIT {
            return Err(ShimError::InvalidConfig(format!(
                "max_call_depth must be in 1..={}, got {}",
                MAX_CALL_DEPTH_LIMIT, self.max_call_depth
            )));
        }
        Ok(())
    }

    /// VM options carried by this configuration
    pub fn vm_options(&self) -> VmOptions {
        VmOptions {
            gc_threshold: self.gc_threshold,
            max_call_depth: self.max_call_depth,
            debug_info: self.debug_info,
        }
    }
}

/// Sizes of the VM representations a host lays out its own structures by
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReprSizes {
    /// VM value
    pub value: usize,
    /// Type descriptor
    pub type_descriptor: usize,
    /// Integer payload
    pub int: usize,
    /// Float payload
    pub float: usize,
}

/// Exclusive handle to one VM instance
#[repr(transparent)]
pub struct Context {
    vm: Vm,
}

impl Context {
    /// Open a VM with default options
    pub fn open() -> Self {
        Self::with_options(&ContextOptions::default())
    }

    /// Open a VM with `opts`
    pub fn with_options(opts: &ContextOptions) -> Self {
        tracing::debug!(
            gc_threshold = opts.gc_threshold,
            max_call_depth = opts.max_call_depth,
            debug_info = opts.debug_info,
            "opening context"
        );
        Self {
            vm: Vm::new(opts.vm_options()),
        }
    }

    /// Close the VM. Destructors of every remaining data object run here.
    pub fn close(self) {
        drop(self);
    }

    /// View a VM borrowed by a host method as a context
    pub fn from_vm_mut(vm: &mut Vm) -> &mut Context {
        // SAFETY: Context is repr(transparent) over Vm
        unsafe { &mut *(vm as *mut Vm as *mut Context) }
    }

    /// Underlying VM
    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    /// Underlying VM, mutably
    pub fn vm_mut(&mut self) -> &mut Vm {
        &mut self.vm
    }

    /// Attach an opaque host pointer
    pub fn set_user_data(&mut self, ud: *mut c_void) {
        self.vm.set_ud(ud);
    }

    /// Pointer attached with [`Context::set_user_data`]
    pub fn user_data(&self) -> *mut c_void {
        self.vm.ud()
    }

    /// Redirect script output
    pub fn set_output(&mut self, out: Box<dyn Write>) {
        self.vm.set_output(out);
    }

    /// Number of live heap objects
    pub fn live_objects(&self) -> usize {
        self.vm.live_objects()
    }

    /// Representation sizes
    pub fn repr_sizes() -> ReprSizes {
        ReprSizes {
            value: std::mem::size_of::<RawValue>(),
            type_descriptor: std::mem::size_of::<TypeDescriptor>(),
            int: std::mem::size_of::<i64>(),
            float: std::mem::size_of::<f64>(),
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("live_objects", &self.vm.live_objects())
            .field("call_depth", &self.vm.call_depth())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_toml() {
        let opts = ContextOptions::from_toml_str("gc_threshold = 64\nmax_call_depth = 32\n").unwrap();
        assert_eq!(opts.gc_threshold, 64);
        assert_eq!(opts.max_call_depth, 32);
        assert!(opts.debug_info);
    }

    #[test]
    fn test_options_defaults_for_missing_keys() {
        let opts = ContextOptions::from_toml_str("").unwrap();
        assert_eq!(opts, ContextOptions::default());
    }

    #[test]
    fn test_options_rejected() {
        assert!(matches!(
            ContextOptions::from_toml_str("gc_threshold = 0"),
            Err(ShimError::InvalidConfig(_))
        ));
        assert!(matches!(
            ContextOptions::from_toml_str("max_call_depth = 0"),
            Err(ShimError::InvalidConfig(_))
        ));
        assert!(matches!(
            ContextOptions::from_toml_str("max_call_depth = 100000"),
            Err(ShimError::InvalidConfig(_))
        ));
        let at_limit = format!("max_call_depth = {}", MAX_CALL_DEPTH_LIMIT);
        assert!(ContextOptions::from_toml_str(&at_limit).is_ok());
        assert!(matches!(
            ContextOptions::from_toml_str("unknown_key = 1"),
            Err(ShimError::InvalidConfig(_))
        ));
        assert!(matches!(
            ContextOptions::from_toml_str("gc_threshold = \"x\""),
            Err(ShimError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_user_data_slot() {
        let mut ctx = Context::open();
        assert!(ctx.user_data().is_null());
        let mut marker = 5u32;
        let p = &mut marker as *mut u32 as *mut c_void;
        ctx.set_user_data(p);
        assert_eq!(ctx.user_data(), p);
    }

    #[test]
    fn test_from_vm_mut_is_same_instance() {
        let mut ctx = Context::open();
        let before = ctx.live_objects();
        let view = Context::from_vm_mut(ctx.vm_mut());
        assert_eq!(view.live_objects(), before);
    }

    #[test]
    fn test_repr_sizes() {
        let sizes = Context::repr_sizes();
        assert_eq!(sizes.value, 16);
        assert_eq!(sizes.int, 8);
        assert_eq!(sizes.float, 8);
        assert!(sizes.type_descriptor > 0);
    }
}
