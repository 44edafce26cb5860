// tamarin-vm - Bytecode compiler and virtual machine for the Tamarin programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Call frames for the VM.

use std::rc::Rc;

use crate::opcode::Instructions;
use crate::value::CompiledFunction;

/// A call frame on the VM's frame stack.
#[derive(Debug, Clone)]
pub struct Frame {
    /// The function being executed; frame 0 wraps the top-level bytecode.
    pub func: Rc<CompiledFunction>,

    /// Index of the most recently executed byte. Starts at -1; the fetch
    /// step pre-increments, so a jump to `target` stores `target - 1`.
    pub ip: i64,

    /// Stack index of the first argument / first local slot.
    pub base_pointer: usize,
}

impl Frame {
    /// Create a frame for `func` whose locals begin at `base_pointer`.
    pub fn new(func: Rc<CompiledFunction>, base_pointer: usize) -> Self {
        Frame {
            func,
            ip: -1,
            base_pointer,
        }
    }

    /// The instruction stream this frame executes.
    #[inline]
    pub fn instructions(&self) -> &Instructions {
        &self.func.instructions
    }
}
