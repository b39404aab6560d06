use std::path::{Path, PathBuf};
use std::{fs, process};

use clap::Parser;
use kiln::bytecode::disasm::print_bc;
use kiln::bytecode::{CallTarget, Emitter, Instruction};
use kiln::runtime::stack::OperandStack;
use kiln::{Builtins, Bytecode, ErrorKind, Value, Vm, VmConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(about = "Run a kiln bytecode stream (.kbc); without a file, run the demo")]
struct Cli {
    /// Path to a postcard-encoded .kbc stream
    file: Option<PathBuf>,

    /// Print the disassembly before running
    #[arg(long)]
    dis: bool,

    /// Stop after this many instructions
    #[arg(long)]
    max_steps: Option<usize>,

    /// Write the demo stream to this path and exit
    #[arg(long)]
    emit_demo: Option<PathBuf>,
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    if let Some(path) = &cli.emit_demo {
        emit_demo(path);
        return;
    }

    let code = match &cli.file {
        Some(path) => read_program(path),
        None => {
            println!("demo mode");
            demo_program()
        }
    };

    if cli.dis {
        print_bc(&code);
    }

    let config = VmConfig {
        max_steps: cli.max_steps,
        ..VmConfig::default()
    };
    run_program(code, config);
}

fn read_program(path: &Path) -> Bytecode {
    ensure_extension(path);

    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Failed to read '{}': {}", path.display(), e);
            process::exit(1);
        }
    };

    match Bytecode::from_bytes(&bytes) {
        Ok(code) => code,
        Err(e) => {
            error!("Load error: {}", e);
            process::exit(1);
        }
    }
}

fn ensure_extension(path: &Path) {
    if path.extension().and_then(|e| e.to_str()) != Some("kbc") {
        error!("expected a .kbc file, got {}", path.display());
        process::exit(1);
    }
}

fn emit_demo(path: &Path) {
    let bytes = match demo_program().to_bytes() {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Encode error: {}", e);
            process::exit(1);
        }
    };
    if let Err(e) = fs::write(path, bytes) {
        error!("Failed to write '{}': {}", path.display(), e);
        process::exit(1);
    }
    info!("wrote demo stream to {}", path.display());
}

fn run_program(code: Bytecode, config: VmConfig) {
    let mut vm = match Vm::with_config(code, host_builtins(), config) {
        Ok(vm) => vm,
        Err(e) => {
            error!("Load error: {}", e);
            process::exit(1);
        }
    };

    match vm.run() {
        Ok(halt) => {
            info!(steps = halt.steps, "program halted");
            if !vm.stack().is_empty() {
                let rendered: Vec<String> = vm.stack().iter().map(|v| v.to_string()).collect();
                println!("stack: {}", rendered.join(" "));
            }
        }
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    }
}

// Host built-ins

fn pop_two_numbers(name: &str, stack: &mut OperandStack) -> Result<(f64, f64), ErrorKind> {
    let b = stack.pop()?;
    let a = stack.pop()?;
    match (a.as_number(), b.as_number()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(ErrorKind::builtin(
            name,
            format!("cannot apply to {} and {}", a.type_name(), b.type_name()),
        )),
    }
}

fn host_builtins() -> Builtins {
    Builtins::new()
        .register("print", |stack| {
            let values = stack.pop_n(stack.len())?;
            let rendered: Vec<String> = values.iter().map(|v| v.to_string()).collect();
            println!("{}", rendered.join(" "));
            Ok(vec![])
        })
        .register("add", |stack| {
            let (a, b) = pop_two_numbers("add", stack)?;
            Ok(vec![Value::Number(a + b)])
        })
        .register("sub", |stack| {
            let (a, b) = pop_two_numbers("sub", stack)?;
            Ok(vec![Value::Number(a - b)])
        })
        .register("less", |stack| {
            let (a, b) = pop_two_numbers("less", stack)?;
            Ok(vec![Value::Number(if a < b { 1.0 } else { 0.0 })])
        })
        .register("size", |stack| match stack.pop()? {
            Value::List(items) => Ok(vec![Value::Number(items.borrow().len() as f64)]),
            Value::Text(s) => Ok(vec![Value::Number(s.chars().count() as f64)]),
            other => Err(ErrorKind::builtin(
                "size",
                format!("cannot size {}", other.type_name()),
            )),
        })
}

/// Counts down from 3, printing each step, then prints a list of the
/// remaining counter and its size.
fn demo_program() -> Bytecode {
    let mut e = Emitter::new();
    e.num(3.0)
        .emit(Instruction::Define("n".to_string()))
        .label(1)
        .emit(Instruction::Load("n".to_string()))
        .emit(Instruction::JumpIf(2))
        .emit(Instruction::Jump(3))
        .label(2)
        .emit(Instruction::PushStack)
        .str("tick")
        .emit(Instruction::Load("n".to_string()))
        .call("print")
        .emit(Instruction::PopStack)
        .emit(Instruction::PushStack)
        .emit(Instruction::Load("n".to_string()))
        .num(1.0)
        .call("sub")
        .emit(Instruction::PopStack)
        .emit(Instruction::Assign("n".to_string()))
        .emit(Instruction::Jump(1))
        .label(3)
        .emit(Instruction::Routine(10))
        .emit(Instruction::Define("report".to_string()))
        .emit(Instruction::Jump(11))
        .label(10)
        .emit(Instruction::Define("items".to_string()))
        .emit(Instruction::PushStack)
        .str("items")
        .emit(Instruction::Load("items".to_string()))
        .emit(Instruction::PushStack)
        .emit(Instruction::Load("items".to_string()))
        .call("size")
        .emit(Instruction::PopStack)
        .call("print")
        .emit(Instruction::PopStack)
        .emit(Instruction::Return)
        .label(11)
        .emit(Instruction::PushStack)
        .emit(Instruction::Load("n".to_string()))
        .str("done")
        .num(2.0)
        .emit(Instruction::MakeList)
        .emit(Instruction::Call(CallTarget::Name("report".to_string())))
        .emit(Instruction::PopStack);
    e.finish()
}
