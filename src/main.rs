use std::cell::RefCell;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use beremiz::diagnostics::{self, OnFatal};
use beremiz::interpreter::Interpreter;
use beremiz::tokenizer::Tokenizer;
use clap::Parser;
use justerror::Error;

#[derive(Debug, Parser)]
#[command(name = "beremiz", about = "Interpreter for the beremiz stack language")]
struct Cli {
    /// Script file to run; starts the REPL when omitted
    file: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    match cli.file {
        Some(file) => run_file(&file),
        None => repl(),
    }
}

fn run_file(file: &str) {
    let path = match resolve_path(file) {
        Ok(path) => path,
        Err(e) => {
            diagnostics::error(format_args!("Error resolving file path: {}", e));
            std::process::exit(1);
        }
    };

    let source = match std::fs::read_to_string(&path) {
        Ok(source) => source,
        Err(_) => {
            diagnostics::error("Unable to get the file content.");
            std::process::exit(1);
        }
    };

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.to_string());

    run_source(&source, &name, false, diagnostics::exit_on_fatal());
}

fn repl() {
    loop {
        print!("\n> ");
        let _ = std::io::stdout().flush();

        let mut input = String::new();
        let read = match std::io::stdin().read_line(&mut input) {
            Ok(read) => read,
            Err(_) => {
                diagnostics::error("Unable to read stdin.");
                break;
            }
        };
        if read == 0 {
            break;
        }

        let input = input.trim();
        if input.eq_ignore_ascii_case(".exit") || input.eq_ignore_ascii_case("exit") {
            break;
        }
        if input.eq_ignore_ascii_case(".help") {
            print_help();
            continue;
        }
        if input.eq_ignore_ascii_case(".clear") {
            print!("\x1b[H\x1b[2J");
            let _ = std::io::stdout().flush();
            continue;
        }
        if input.is_empty() {
            continue;
        }

        run_source(input, "stdin", true, diagnostics::continue_on_fatal());
    }
}

fn run_source(source: &str, file: &str, is_repl: bool, on_fatal: OnFatal) {
    let mut tokenizer = Tokenizer::new(source, file, on_fatal.clone());
    let tokens = tokenizer.tokenize();
    let lines = tokenizer.into_lines();

    let stdout = Rc::new(RefCell::new(std::io::stdout()));
    let mut interpreter = Interpreter::new(tokens, lines, is_repl, stdout, on_fatal);
    interpreter.evaluate();
}

#[Error]
enum PathError {
    HomeDirUnavailable,
}

fn resolve_path(input: &str) -> Result<PathBuf, PathError> {
    let path = Path::new(input);
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }

    if let Some(rest) = input.strip_prefix('~') {
        let home = std::env::var_os("HOME").ok_or(PathError::HomeDirUnavailable)?;
        return Ok(PathBuf::from(home).join(rest.trim_start_matches('/')));
    }

    Ok(path.to_path_buf())
}

fn print_help() {
    println!(
        r#"
Available commands:
  .help           - Show this help message
  .exit, exit     - Exit the program
  .clear          - Clear the screen

  Any other text will be processed normally"#
    );
}
