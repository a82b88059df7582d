//! Basalt CLI - run or disassemble raw bytecode files

use std::env;
use std::fs;
use std::io::IsTerminal;
use std::process::ExitCode;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use basalt::disasm::listing;
use basalt::errors::{format_fault, ErrorConfig};
use basalt::{Program, Vm, VmConfig};

const USAGE: &str = "usage: basalt run <file>\n       basalt disasm <file>";

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "basalt=warn".into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = env::args().collect();
    match (args.get(1).map(String::as_str), args.get(2)) {
        (Some("run"), Some(path)) => run_file(path),
        (Some("disasm"), Some(path)) => disasm_file(path),
        _ => {
            eprintln!("{}", USAGE);
            ExitCode::from(2)
        }
    }
}

fn read_code(path: &str) -> Result<Vec<u8>, ExitCode> {
    fs::read(path).map_err(|e| {
        eprintln!("Error reading {}: {}", path, e);
        ExitCode::FAILURE
    })
}

fn run_file(path: &str) -> ExitCode {
    let code = match read_code(path) {
        Ok(code) => code,
        Err(status) => return status,
    };
    let mut vm = Vm::with_config(&VmConfig::from_env());
    vm.load(Program::new(code, Vec::new()));

    match vm.run() {
        Ok(()) => {
            println!("{}", vm.acc());
            ExitCode::SUCCESS
        }
        Err(e) => {
            let config = ErrorConfig::new(std::io::stderr().is_terminal()).with_filename(path);
            eprint!(
                "{}",
                format_fault(&e, vm.code(), vm.instruction_ip(), vm.global_names(), &config)
            );
            ExitCode::FAILURE
        }
    }
}

fn disasm_file(path: &str) -> ExitCode {
    match read_code(path) {
        Ok(code) => {
            println!("{}", listing(&code));
            ExitCode::SUCCESS
        }
        Err(status) => status,
    }
}
