// tamarin - A small scripting language with a bytecode compiler and VM
// Copyright (c) 2025 Tom Waddington. MIT licensed.

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::process;
use std::rc::Rc;

use tamarin_parser::Parser;
use tamarin_vm::vm::new_globals_store;
use tamarin_vm::{builtins, Compiler, SymbolTable, Value, VM};

fn main() {
    let args: Vec<String> = env::args().collect();

    // Handle --version flag
    if args.len() == 2 && (args[1] == "--version" || args[1] == "-v") {
        println!("Tamarin v0.1.0");
        return;
    }

    // If files provided, run them; otherwise start the REPL
    if args.len() > 1 {
        run_files(&args[1..]);
    } else {
        run_repl();
    }
}

/// Compile and run a sequence of source files
fn run_files(files: &[String]) {
    for file_path in files {
        if let Err(e) = run_file(file_path) {
            eprintln!("{}", e);
            process::exit(1);
        }
    }
}

/// Compile and run a single source file
fn run_file(file_path: &str) -> Result<(), String> {
    let path = Path::new(file_path);

    // Validate file extension
    match path.extension().and_then(|e| e.to_str()) {
        Some("tam") => {}
        Some(ext) => {
            return Err(format!(
                "Error: unsupported file extension '.{}' for '{}'",
                ext, file_path
            ));
        }
        None => {
            return Err(format!(
                "Error: file '{}' has no extension (expected .tam)",
                file_path
            ));
        }
    }

    let source =
        fs::read_to_string(path).map_err(|e| format!("Error reading '{}': {}", file_path, e))?;

    let program =
        Parser::parse_str(&source).map_err(|e| format!("{} in '{}'", e, file_path))?;

    let mut compiler = Compiler::new();
    compiler
        .compile(&program)
        .map_err(|e| format!("Compile error in '{}': {}", file_path, e))?;

    let mut machine = VM::new(compiler.bytecode());
    machine
        .run()
        .map_err(|e| format!("Runtime error in '{}': {}", file_path, e))?;

    Ok(())
}

/// Run the interactive REPL. Globals, symbol definitions, and the constant
/// pool persist across submissions.
fn run_repl() {
    println!("Tamarin v0.1.0");

    let globals = new_globals_store();
    let mut symbols = SymbolTable::new();
    for (index, builtin) in builtins::BUILTINS.iter().enumerate() {
        symbols.define_builtin(index, builtin.name);
    }
    let mut constants: Vec<Value> = Vec::new();

    loop {
        print!(">> ");
        io::stdout().flush().unwrap();

        let mut input = String::new();
        match io::stdin().read_line(&mut input) {
            Ok(0) => {
                println!();
                break;
            }
            Ok(_) => {
                let input = input.trim();
                if input.is_empty() {
                    continue;
                }

                let program = match Parser::parse_str(input) {
                    Ok(program) => program,
                    Err(e) => {
                        eprintln!("{}", e);
                        continue;
                    }
                };

                let mut compiler = Compiler::new_with_state(symbols, constants);
                match compiler.compile(&program) {
                    Ok(()) => {}
                    Err(e) => {
                        eprintln!("Compile error: {}", e);
                        let state = compiler.into_state();
                        symbols = state.0.into_root();
                        constants = state.1;
                        continue;
                    }
                }
                let bytecode = compiler.bytecode();
                let state = compiler.into_state();
                symbols = state.0;
                constants = state.1;

                let mut machine = VM::with_globals_store(bytecode, Rc::clone(&globals));
                match machine.run() {
                    Ok(()) => println!("{}", machine.last_popped_stack_elem()),
                    Err(e) => eprintln!("Runtime error: {}", e),
                }
            }
            Err(e) => {
                eprintln!("Read error: {}", e);
                break;
            }
        }
    }
}
