//! Recovery points for non-local exits
//!
//! Raising never returns: the VM stores the exception in its slot and
//! unwinds with a [`VmJump`] payload addressed to the innermost registered
//! recovery point. Whoever registered that point catches the unwind with
//! `catch_unwind`, checks the address and restores VM state from the
//! [`FrameMark`] it took before the call.

use std::fmt;

/// Identity of a registered recovery point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JumpId(u64);

impl JumpId {
    pub(crate) const fn new(id: u64) -> Self {
        JumpId(id)
    }

    /// Raw id
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JumpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "jmp#{}", self.0)
    }
}

/// Unwind payload carried by a raise
#[derive(Debug)]
pub struct VmJump {
    /// Recovery point the raise was aimed at
    pub target: JumpId,
}

/// Snapshot of VM stacks taken before a guarded call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMark {
    pub(crate) callinfo: usize,
    pub(crate) stack: usize,
    pub(crate) arena: usize,
}

impl FrameMark {
    /// Call depth at the time of the mark
    pub fn call_depth(&self) -> usize {
        self.callinfo
    }
}
