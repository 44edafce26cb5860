// tamarin-vm - Bytecode compiler and virtual machine for the Tamarin programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Stack-based virtual machine for executing Tamarin bytecode.
//!
//! The machine drives a ring of call frames over a shared value stack, a
//! globals array, and the constant pool produced by the compiler. Execution
//! ends when the main frame runs off the end of its instructions; the
//! program's observable result is the last value popped off the stack.

pub mod error;
pub mod frame;
pub mod stack;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::builtins;
use crate::compiler::Bytecode;
use crate::opcode::{self, Op};
use crate::value::{BuiltinDef, CompiledFunction, HashPair, Value};

pub use error::{Result, RuntimeError};
pub use frame::Frame;
pub use stack::ValueStack;

/// Capacity of the value stack.
pub const STACK_SIZE: usize = 2048;
/// Capacity of the frame stack.
pub const MAX_FRAMES: usize = 1024;
/// Capacity of the globals array.
pub const GLOBALS_SIZE: usize = 65536;

/// Allocate a globals buffer suitable for [`VM::with_globals_store`].
pub fn new_globals_store() -> Rc<RefCell<Vec<Value>>> {
    Rc::new(RefCell::new(vec![Value::NULL; GLOBALS_SIZE]))
}

/// The Tamarin virtual machine.
pub struct VM {
    constants: Vec<Value>,

    stack: ValueStack,

    /// Global variable slots. Shared so a host can persist bindings across
    /// VM instances (the REPL does).
    globals: Rc<RefCell<Vec<Value>>>,

    /// Call frames; index 0 is the main frame.
    frames: Vec<Frame>,
}

impl VM {
    /// Create a VM that owns a fresh globals buffer.
    pub fn new(bytecode: Bytecode) -> Self {
        VM::with_globals_store(bytecode, new_globals_store())
    }

    /// Create a VM sharing a caller-supplied globals buffer of length
    /// [`GLOBALS_SIZE`].
    pub fn with_globals_store(bytecode: Bytecode, globals: Rc<RefCell<Vec<Value>>>) -> Self {
        let main_fn = CompiledFunction {
            instructions: bytecode.instructions,
            num_locals: 0,
            num_parameters: 0,
        };
        let mut frames = Vec::with_capacity(MAX_FRAMES);
        frames.push(Frame::new(Rc::new(main_fn), 0));

        VM {
            constants: bytecode.constants,
            stack: ValueStack::new(),
            globals,
            frames,
        }
    }

    /// The value most recently popped off the stack: the result of the
    /// final expression statement after a successful [`run`](VM::run).
    pub fn last_popped_stack_elem(&self) -> Value {
        self.stack.last_popped()
    }

    fn current_frame(&self) -> &Frame {
        self.frames.last().expect("no active frame")
    }

    fn current_frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("no active frame")
    }

    fn push_frame(&mut self, frame: Frame) -> Result<()> {
        if self.frames.len() >= MAX_FRAMES {
            return Err(RuntimeError::StackOverflow);
        }
        self.frames.push(frame);
        Ok(())
    }

    fn pop_frame(&mut self) -> Result<Frame> {
        if self.frames.len() <= 1 {
            // A return in the main frame; only hand-built bytecode gets here.
            return Err(RuntimeError::StackUnderflow);
        }
        Ok(self.frames.pop().expect("no active frame"))
    }

    #[inline]
    fn push(&mut self, value: Value) -> Result<()> {
        self.stack.push(value)
    }

    #[inline]
    fn pop(&mut self) -> Result<Value> {
        self.stack.pop()
    }

    /// Fetch-decode-execute until the main frame runs off the end of its
    /// instructions.
    pub fn run(&mut self) -> Result<()> {
        while self.current_frame().ip < self.current_frame().instructions().len() as i64 - 1 {
            self.current_frame_mut().ip += 1;

            let frame = self.current_frame();
            let ip = frame.ip as usize;
            let func = Rc::clone(&frame.func);
            let ins = &func.instructions.0;

            let byte = ins[ip];
            let op = Op::from_byte(byte).ok_or(RuntimeError::UnknownOpcode(byte))?;

            match op {
                Op::Constant => {
                    let const_index = opcode::read_u16(&ins[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 2;

                    let constant = self
                        .constants
                        .get(const_index)
                        .cloned()
                        .ok_or(RuntimeError::UndefinedConstant(const_index))?;
                    self.push(constant)?;
                }

                Op::Add | Op::Sub | Op::Mul | Op::Div => {
                    self.execute_binary_operation(op)?;
                }

                Op::Pop => {
                    self.pop()?;
                }

                Op::True => self.push(Value::TRUE)?,
                Op::False => self.push(Value::FALSE)?,
                Op::Null => self.push(Value::NULL)?,

                Op::Equal | Op::NotEqual | Op::GreaterThan => {
                    self.execute_comparison(op)?;
                }

                Op::Bang => {
                    let operand = self.pop()?;
                    self.push(Value::from_bool(!operand.is_truthy()))?;
                }

                Op::Minus => {
                    let operand = self.pop()?;
                    match operand {
                        Value::Integer(n) => self.push(Value::Integer(n.wrapping_neg()))?,
                        other => {
                            return Err(RuntimeError::UnsupportedNegation(other.type_name()));
                        }
                    }
                }

                Op::Jump => {
                    let target = opcode::read_u16(&ins[ip + 1..]) as i64;
                    self.current_frame_mut().ip = target - 1;
                }

                Op::JumpNotTruthy => {
                    let target = opcode::read_u16(&ins[ip + 1..]) as i64;
                    self.current_frame_mut().ip += 2;

                    let condition = self.pop()?;
                    if !condition.is_truthy() {
                        self.current_frame_mut().ip = target - 1;
                    }
                }

                Op::SetGlobal => {
                    let global_index = opcode::read_u16(&ins[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 2;

                    let value = self.pop()?;
                    self.globals.borrow_mut()[global_index] = value;
                }

                Op::GetGlobal => {
                    let global_index = opcode::read_u16(&ins[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 2;

                    let value = self.globals.borrow()[global_index].clone();
                    self.push(value)?;
                }

                Op::SetLocal => {
                    let local_index = opcode::read_u8(&ins[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 1;

                    let base_pointer = self.current_frame().base_pointer;
                    let value = self.pop()?;
                    self.stack.set(base_pointer + local_index, value);
                }

                Op::GetLocal => {
                    let local_index = opcode::read_u8(&ins[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 1;

                    let base_pointer = self.current_frame().base_pointer;
                    let value = self.stack.get(base_pointer + local_index);
                    self.push(value)?;
                }

                Op::GetBuiltin => {
                    let builtin_index = opcode::read_u8(&ins[ip + 1..]);
                    self.current_frame_mut().ip += 1;

                    let builtin = builtins::get(builtin_index as usize)
                        .ok_or(RuntimeError::UndefinedBuiltin(builtin_index))?;
                    self.push(Value::Builtin(builtin))?;
                }

                Op::Array => {
                    let num_elements = opcode::read_u16(&ins[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 2;

                    let start = self
                        .stack
                        .sp()
                        .checked_sub(num_elements)
                        .ok_or(RuntimeError::StackUnderflow)?;
                    let array = Value::array(self.stack.slice(start, self.stack.sp()).to_vec());
                    self.stack.set_sp(start);
                    self.push(array)?;
                }

                Op::Hash => {
                    let num_elements = opcode::read_u16(&ins[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 2;

                    let start = self
                        .stack
                        .sp()
                        .checked_sub(num_elements)
                        .ok_or(RuntimeError::StackUnderflow)?;
                    let hash = self.build_hash(start, self.stack.sp())?;
                    self.stack.set_sp(start);
                    self.push(hash)?;
                }

                Op::Index => {
                    let index = self.pop()?;
                    let left = self.pop()?;
                    self.execute_index_expression(left, index)?;
                }

                Op::IndexAssign => {
                    let value = self.pop()?;
                    let index = self.pop()?;
                    let left = self.pop()?;
                    self.execute_index_assignment(left, index, value)?;
                }

                Op::Call => {
                    let num_args = opcode::read_u8(&ins[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 1;

                    self.execute_call(num_args)?;
                }

                Op::ReturnValue => {
                    let return_value = self.pop()?;

                    let frame = self.pop_frame()?;
                    let new_sp = frame
                        .base_pointer
                        .checked_sub(1)
                        .ok_or(RuntimeError::StackUnderflow)?;
                    self.stack.set_sp(new_sp);

                    self.push(return_value)?;
                }

                Op::Return => {
                    let frame = self.pop_frame()?;
                    let new_sp = frame
                        .base_pointer
                        .checked_sub(1)
                        .ok_or(RuntimeError::StackUnderflow)?;
                    self.stack.set_sp(new_sp);

                    self.push(Value::NULL)?;
                }
            }
        }

        Ok(())
    }

    // =========================================================================
    // Operators
    // =========================================================================

    fn execute_binary_operation(&mut self, op: Op) -> Result<()> {
        let right = self.pop()?;
        let left = self.pop()?;

        match (&left, &right) {
            (Value::Integer(l), Value::Integer(r)) => {
                self.execute_binary_integer_operation(op, *l, *r)
            }
            (Value::Str(l), Value::Str(r)) => {
                if op != Op::Add {
                    return Err(RuntimeError::UnknownStringOperator(op));
                }
                let mut concatenated = String::with_capacity(l.len() + r.len());
                concatenated.push_str(l);
                concatenated.push_str(r);
                self.push(Value::string(concatenated))
            }
            _ => Err(RuntimeError::UnsupportedBinaryTypes {
                left: left.type_name(),
                right: right.type_name(),
            }),
        }
    }

    fn execute_binary_integer_operation(&mut self, op: Op, left: i64, right: i64) -> Result<()> {
        let result = match op {
            Op::Add => left.wrapping_add(right),
            Op::Sub => left.wrapping_sub(right),
            Op::Mul => left.wrapping_mul(right),
            Op::Div => {
                if right == 0 {
                    return Err(RuntimeError::DivisionByZero);
                }
                left.wrapping_div(right)
            }
            other => return Err(RuntimeError::UnknownIntegerOperator(other)),
        };
        self.push(Value::Integer(result))
    }

    fn execute_comparison(&mut self, op: Op) -> Result<()> {
        let right = self.pop()?;
        let left = self.pop()?;

        if let (Value::Integer(l), Value::Integer(r)) = (&left, &right) {
            let result = match op {
                Op::Equal => l == r,
                Op::NotEqual => l != r,
                Op::GreaterThan => l > r,
                other => return Err(RuntimeError::UnknownIntegerOperator(other)),
            };
            return self.push(Value::from_bool(result));
        }

        // Everything except integers compares by identity; the canonical
        // singletons make boolean and null equality come out right.
        match op {
            Op::Equal => self.push(Value::from_bool(left.equals(&right))),
            Op::NotEqual => self.push(Value::from_bool(!left.equals(&right))),
            other => Err(RuntimeError::UnknownOperator {
                op: other,
                left: left.type_name(),
                right: right.type_name(),
            }),
        }
    }

    // =========================================================================
    // Containers
    // =========================================================================

    fn build_hash(&self, start: usize, end: usize) -> Result<Value> {
        let mut pairs = HashMap::with_capacity((end - start) / 2);

        let mut i = start;
        while i < end {
            let key = self.stack.get(i);
            let value = self.stack.get(i + 1);

            let hash_key = key
                .hash_key()
                .ok_or_else(|| RuntimeError::UnusableAsHashKey(key.type_name()))?;
            pairs.insert(hash_key, HashPair { key, value });

            i += 2;
        }

        Ok(Value::hash(pairs))
    }

    fn execute_index_expression(&mut self, left: Value, index: Value) -> Result<()> {
        match (&left, &index) {
            (Value::Array(elements), Value::Integer(i)) => {
                let element = {
                    let elements = elements.borrow();
                    let max = elements.len() as i64 - 1;
                    if *i < 0 || *i > max {
                        Value::NULL
                    } else {
                        elements[*i as usize].clone()
                    }
                };
                self.push(element)
            }
            (Value::Hash(pairs), _) => {
                let key = index
                    .hash_key()
                    .ok_or_else(|| RuntimeError::UnusableHashKey(index.type_name()))?;
                let value = pairs
                    .borrow()
                    .get(&key)
                    .map(|pair| pair.value.clone())
                    .unwrap_or(Value::NULL);
                self.push(value)
            }
            _ => Err(RuntimeError::IndexNotSupported(left.type_name())),
        }
    }

    fn execute_index_assignment(&mut self, left: Value, index: Value, value: Value) -> Result<()> {
        match (&left, &index) {
            (Value::Array(elements), Value::Integer(i)) => {
                let stored = {
                    let mut elements = elements.borrow_mut();
                    let max = elements.len() as i64 - 1;
                    if *i < 0 || *i > max {
                        // Out of range: no write, the expression is null.
                        None
                    } else {
                        elements[*i as usize] = value.clone();
                        Some(value)
                    }
                };
                self.push(stored.unwrap_or(Value::NULL))
            }
            (Value::Hash(pairs), _) => {
                let key = index
                    .hash_key()
                    .ok_or_else(|| RuntimeError::UnusableHashKey(index.type_name()))?;
                pairs.borrow_mut().insert(
                    key,
                    HashPair {
                        key: index.clone(),
                        value: value.clone(),
                    },
                );
                self.push(value)
            }
            _ => Err(RuntimeError::IndexAssignNotSupported(left.type_name())),
        }
    }

    // =========================================================================
    // Calls
    // =========================================================================

    fn execute_call(&mut self, num_args: usize) -> Result<()> {
        let callee_index = self
            .stack
            .sp()
            .checked_sub(1 + num_args)
            .ok_or(RuntimeError::StackUnderflow)?;

        match self.stack.get(callee_index) {
            Value::Function(func) => self.call_function(func, num_args),
            Value::Builtin(builtin) => self.call_builtin(builtin, num_args),
            _ => Err(RuntimeError::CallingNonFunction),
        }
    }

    fn call_function(&mut self, func: Rc<CompiledFunction>, num_args: usize) -> Result<()> {
        if func.num_parameters != num_args {
            return Err(RuntimeError::WrongNumberOfArguments {
                want: func.num_parameters,
                got: num_args,
            });
        }

        // Arguments already occupy the first `num_args` local slots; the
        // remaining local slots are reserved above them.
        let base_pointer = self.stack.sp() - num_args;
        let num_locals = func.num_locals;
        if base_pointer + num_locals > STACK_SIZE {
            return Err(RuntimeError::StackOverflow);
        }

        self.push_frame(Frame::new(func, base_pointer))?;
        self.stack.set_sp(base_pointer + num_locals);
        Ok(())
    }

    fn call_builtin(&mut self, builtin: &'static BuiltinDef, num_args: usize) -> Result<()> {
        let sp = self.stack.sp();
        let args = self.stack.slice(sp - num_args, sp).to_vec();

        let result = (builtin.func)(&args);

        // Discard the arguments and the callee beneath them.
        self.stack.set_sp(sp - num_args - 1);
        self.push(result)
    }
}
