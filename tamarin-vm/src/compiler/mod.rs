// tamarin-vm - Bytecode compiler and virtual machine for the Tamarin programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Bytecode compiler: lowers the syntax tree to instructions and constants.
//!
//! The compiler keeps a stack of compilation scopes, one per function
//! literal being compiled, and a symbol table chain that mirrors it. Jump
//! targets are emitted with a placeholder operand and back-patched once the
//! branch's extent is known.

pub mod symbols;

use std::fmt;
use std::mem;
use std::rc::Rc;

use tamarin_parser::ast::{
    BlockStatement, Expression, InfixOperator, PrefixOperator, Program, Statement,
};

use crate::builtins;
use crate::opcode::{self, Instructions, Op};
use crate::value::{CompiledFunction, Value};
use symbols::{SymbolScope, SymbolTable};

/// Error during compilation.
#[derive(Debug, Clone)]
pub enum CompileError {
    /// Reference to a name with no binding in scope.
    UndefinedVariable(String),
    /// Constant pool overflow.
    TooManyConstants,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::UndefinedVariable(name) => write!(f, "undefined variable {}", name),
            CompileError::TooManyConstants => write!(f, "too many constants"),
        }
    }
}

impl std::error::Error for CompileError {}

/// Result type for compilation.
pub type Result<T> = std::result::Result<T, CompileError>;

/// What the compiler hands to the VM: a flat instruction buffer plus the
/// constant pool it indexes into.
#[derive(Debug, Clone)]
pub struct Bytecode {
    pub instructions: Instructions,
    pub constants: Vec<Value>,
}

/// Operand placeholder for jumps that are patched later.
const PLACEHOLDER: usize = 9999;

#[derive(Debug, Clone, Copy)]
struct EmittedInstruction {
    opcode: Op,
    position: usize,
}

/// Instruction buffer for one function body under compilation.
#[derive(Debug, Default)]
struct CompilationScope {
    instructions: Instructions,
    last_instruction: Option<EmittedInstruction>,
    previous_instruction: Option<EmittedInstruction>,
}

/// The bytecode compiler.
pub struct Compiler {
    constants: Vec<Value>,
    symbols: SymbolTable,
    scopes: Vec<CompilationScope>,
}

impl Compiler {
    /// Create a compiler with the builtin registry installed in the root
    /// symbol table.
    pub fn new() -> Self {
        let mut symbols = SymbolTable::new();
        for (index, builtin) in builtins::BUILTINS.iter().enumerate() {
            symbols.define_builtin(index, builtin.name);
        }
        Compiler::new_with_state(symbols, Vec::new())
    }

    /// Create a compiler resuming an existing symbol table and constant
    /// pool. Used by the REPL to carry definitions across submissions.
    pub fn new_with_state(symbols: SymbolTable, constants: Vec<Value>) -> Self {
        Compiler {
            constants,
            symbols,
            scopes: vec![CompilationScope::default()],
        }
    }

    /// Compile a program into the current main scope.
    pub fn compile(&mut self, program: &Program) -> Result<()> {
        for statement in &program.statements {
            self.compile_statement(statement)?;
        }
        Ok(())
    }

    /// The compiled artefact. The compiler remains usable afterwards.
    pub fn bytecode(&self) -> Bytecode {
        Bytecode {
            instructions: self.scopes[0].instructions.clone(),
            constants: self.constants.clone(),
        }
    }

    /// Tear down into the symbol table and constant pool, for the REPL to
    /// thread into the next submission's compiler.
    pub fn into_state(self) -> (SymbolTable, Vec<Value>) {
        (self.symbols, self.constants)
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn compile_statement(&mut self, statement: &Statement) -> Result<()> {
        match statement {
            Statement::Let { name, value } => {
                // Define before compiling the value; a redefinition gets a
                // fresh index while the old binding stays readable until
                // the store executes.
                let symbol = self.symbols.define(name);
                self.compile_expression(value)?;
                match symbol.scope {
                    SymbolScope::Global => self.emit(Op::SetGlobal, &[symbol.index]),
                    _ => self.emit(Op::SetLocal, &[symbol.index]),
                };
                Ok(())
            }
            Statement::Return(value) => {
                self.compile_expression(value)?;
                self.emit(Op::ReturnValue, &[]);
                Ok(())
            }
            Statement::Expression(expression) => {
                self.compile_expression(expression)?;
                self.emit(Op::Pop, &[]);
                Ok(())
            }
        }
    }

    fn compile_block(&mut self, block: &BlockStatement) -> Result<()> {
        for statement in &block.statements {
            self.compile_statement(statement)?;
        }
        Ok(())
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn compile_expression(&mut self, expression: &Expression) -> Result<()> {
        match expression {
            Expression::IntegerLiteral(n) => {
                let index = self.add_constant(Value::Integer(*n))?;
                self.emit(Op::Constant, &[index]);
            }
            Expression::StringLiteral(s) => {
                let index = self.add_constant(Value::string(s.clone()))?;
                self.emit(Op::Constant, &[index]);
            }
            Expression::BooleanLiteral(true) => {
                self.emit(Op::True, &[]);
            }
            Expression::BooleanLiteral(false) => {
                self.emit(Op::False, &[]);
            }
            Expression::Identifier(name) => {
                let symbol = self
                    .symbols
                    .resolve(name)
                    .ok_or_else(|| CompileError::UndefinedVariable(name.clone()))?;
                self.load_symbol(symbol.scope, symbol.index);
            }
            Expression::Prefix { operator, right } => {
                self.compile_expression(right)?;
                match operator {
                    PrefixOperator::Bang => self.emit(Op::Bang, &[]),
                    PrefixOperator::Minus => self.emit(Op::Minus, &[]),
                };
            }
            Expression::Infix {
                operator,
                left,
                right,
            } => self.compile_infix(*operator, left, right)?,
            Expression::If {
                condition,
                consequence,
                alternative,
            } => self.compile_if(condition, consequence, alternative.as_ref())?,
            Expression::FunctionLiteral { parameters, body } => {
                self.compile_function_literal(parameters, body)?;
            }
            Expression::Call {
                function,
                arguments,
            } => {
                self.compile_expression(function)?;
                for argument in arguments {
                    self.compile_expression(argument)?;
                }
                self.emit(Op::Call, &[arguments.len()]);
            }
            Expression::ArrayLiteral(elements) => {
                for element in elements {
                    self.compile_expression(element)?;
                }
                self.emit(Op::Array, &[elements.len()]);
            }
            Expression::HashLiteral(pairs) => {
                for (key, value) in pairs {
                    self.compile_expression(key)?;
                    self.compile_expression(value)?;
                }
                self.emit(Op::Hash, &[pairs.len() * 2]);
            }
            Expression::Index { left, index } => {
                self.compile_expression(left)?;
                self.compile_expression(index)?;
                self.emit(Op::Index, &[]);
            }
            Expression::IndexAssign { left, index, value } => {
                self.compile_expression(left)?;
                self.compile_expression(index)?;
                self.compile_expression(value)?;
                self.emit(Op::IndexAssign, &[]);
            }
        }
        Ok(())
    }

    fn compile_infix(
        &mut self,
        operator: InfixOperator,
        left: &Expression,
        right: &Expression,
    ) -> Result<()> {
        // `<` compiles as a flipped `>`; there is no less-than opcode.
        if operator == InfixOperator::Lt {
            self.compile_expression(right)?;
            self.compile_expression(left)?;
            self.emit(Op::GreaterThan, &[]);
            return Ok(());
        }

        self.compile_expression(left)?;
        self.compile_expression(right)?;
        match operator {
            InfixOperator::Plus => self.emit(Op::Add, &[]),
            InfixOperator::Minus => self.emit(Op::Sub, &[]),
            InfixOperator::Asterisk => self.emit(Op::Mul, &[]),
            InfixOperator::Slash => self.emit(Op::Div, &[]),
            InfixOperator::Gt => self.emit(Op::GreaterThan, &[]),
            InfixOperator::Eq => self.emit(Op::Equal, &[]),
            InfixOperator::NotEq => self.emit(Op::NotEqual, &[]),
            InfixOperator::Lt => unreachable!("handled above"),
        };
        Ok(())
    }

    fn compile_if(
        &mut self,
        condition: &Expression,
        consequence: &BlockStatement,
        alternative: Option<&BlockStatement>,
    ) -> Result<()> {
        self.compile_expression(condition)?;
        let jump_not_truthy_pos = self.emit(Op::JumpNotTruthy, &[PLACEHOLDER]);

        self.compile_block(consequence)?;
        if self.last_instruction_is(Op::Pop) {
            self.remove_last_pop();
        }

        let jump_pos = self.emit(Op::Jump, &[PLACEHOLDER]);

        let after_consequence = self.scope().instructions.len();
        self.change_operand(jump_not_truthy_pos, after_consequence);

        match alternative {
            Some(alternative) => {
                self.compile_block(alternative)?;
                if self.last_instruction_is(Op::Pop) {
                    self.remove_last_pop();
                }
            }
            None => {
                self.emit(Op::Null, &[]);
            }
        }

        let after_alternative = self.scope().instructions.len();
        self.change_operand(jump_pos, after_alternative);
        Ok(())
    }

    fn compile_function_literal(
        &mut self,
        parameters: &[String],
        body: &BlockStatement,
    ) -> Result<()> {
        self.enter_scope();
        for parameter in parameters {
            self.symbols.define(parameter);
        }

        self.compile_block(body)?;

        // An expression in tail position becomes the return value; a body
        // that ends any other way returns null.
        if self.last_instruction_is(Op::Pop) {
            self.replace_last_pop_with_return();
        }
        if !self.last_instruction_is(Op::ReturnValue) {
            self.emit(Op::Return, &[]);
        }

        let num_locals = self.symbols.num_definitions();
        let instructions = self.leave_scope();

        let function = CompiledFunction {
            instructions,
            num_locals,
            num_parameters: parameters.len(),
        };
        let index = self.add_constant(Value::Function(Rc::new(function)))?;
        self.emit(Op::Constant, &[index]);
        Ok(())
    }

    fn load_symbol(&mut self, scope: SymbolScope, index: usize) {
        match scope {
            SymbolScope::Global => self.emit(Op::GetGlobal, &[index]),
            SymbolScope::Local => self.emit(Op::GetLocal, &[index]),
            SymbolScope::Builtin => self.emit(Op::GetBuiltin, &[index]),
        };
    }

    // =========================================================================
    // Emission
    // =========================================================================

    fn scope(&self) -> &CompilationScope {
        self.scopes.last().expect("no compilation scope")
    }

    fn scope_mut(&mut self) -> &mut CompilationScope {
        self.scopes.last_mut().expect("no compilation scope")
    }

    fn emit(&mut self, op: Op, operands: &[usize]) -> usize {
        let instruction = opcode::make(op, operands);
        let scope = self.scope_mut();
        let position = scope.instructions.append(&instruction);
        scope.previous_instruction = scope.last_instruction;
        scope.last_instruction = Some(EmittedInstruction {
            opcode: op,
            position,
        });
        position
    }

    fn add_constant(&mut self, value: Value) -> Result<usize> {
        let index = self.constants.len();
        if index > u16::MAX as usize {
            return Err(CompileError::TooManyConstants);
        }
        self.constants.push(value);
        Ok(index)
    }

    fn last_instruction_is(&self, op: Op) -> bool {
        matches!(self.scope().last_instruction, Some(last) if last.opcode == op)
    }

    fn remove_last_pop(&mut self) {
        let scope = self.scope_mut();
        if let Some(last) = scope.last_instruction {
            scope.instructions.0.truncate(last.position);
            scope.last_instruction = scope.previous_instruction;
        }
    }

    /// Rewrite the trailing `Pop` of a function body into `ReturnValue`.
    fn replace_last_pop_with_return(&mut self) {
        let scope = self.scope_mut();
        if let Some(last) = &mut scope.last_instruction {
            scope.instructions.0[last.position] = Op::ReturnValue as u8;
            last.opcode = Op::ReturnValue;
        }
    }

    /// Re-encode the operand of the (jump) instruction at `position`.
    fn change_operand(&mut self, position: usize, operand: usize) {
        let scope = self.scope_mut();
        let byte = scope.instructions.0[position];
        match Op::from_byte(byte) {
            Some(op) => {
                let instruction = opcode::make(op, &[operand]);
                scope.instructions.0[position..position + instruction.len()]
                    .copy_from_slice(&instruction);
            }
            None => debug_assert!(false, "change_operand on unknown opcode {}", byte),
        }
    }

    fn enter_scope(&mut self) {
        self.scopes.push(CompilationScope::default());
        let outer = mem::take(&mut self.symbols);
        self.symbols = SymbolTable::enclosed(outer);
    }

    fn leave_scope(&mut self) -> Instructions {
        let scope = self.scopes.pop().expect("no compilation scope");
        let table = mem::take(&mut self.symbols);
        let outer = table.into_outer();
        debug_assert!(outer.is_some(), "leave_scope at top level");
        self.symbols = outer.unwrap_or_default();
        scope.instructions
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}
