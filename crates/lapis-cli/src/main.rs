//! Lapis CLI
//!
//! Command-line interface for the Lapis language.

use std::borrow::Cow;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::process::ExitCode;
use std::thread;

use clap::{CommandFactory, Parser, Subcommand};
use colored::Colorize;
use lapis_core::diagnostics::{Diagnostics, DiagnosticsOutput};
use lapis_core::{Diagnostic, Interpreter, InterpreterConfig, Lexer, Value};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Exit status when a diagnostic was reported.
const EXIT_DIAGNOSTIC: u8 = 1;
/// Exit status when the input file could not be read.
const EXIT_UNREADABLE: u8 = 2;

/// Stack for the interpreter thread, sized for the default call depth limit.
const STACK_SIZE: usize = 256 * 1024 * 1024;

#[derive(Parser)]
#[command(name = "lapis")]
#[command(author, version, about = "Run and check Lapis scripts", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Script to run (same as `lapis run <file>`)
    file: Option<String>,

    /// Log interpreter internals to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a Lapis script
    Run {
        /// Path to the .lapis file
        file: String,
    },

    /// Check a script for syntax errors without running it
    Check {
        /// Path to the .lapis file
        file: String,

        /// Output format (human, json)
        #[arg(short, long, default_value = "human")]
        format: String,
    },

    /// Parse a file and print the AST as JSON (for debugging)
    Parse {
        /// Path to the .lapis file
        file: String,
    },

    /// Start an interactive session
    Repl,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    if cli.no_color {
        colored::control::set_override(false);
    }

    let spawned = thread::Builder::new()
        .name("lapis".to_string())
        .stack_size(STACK_SIZE)
        .spawn(move || dispatch(cli));
    match spawned {
        Ok(handle) => handle.join().unwrap_or(ExitCode::FAILURE),
        Err(e) => {
            eprintln!("{} failed to start interpreter thread: {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("LAPIS_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn dispatch(cli: Cli) -> ExitCode {
    let no_color = cli.no_color;
    match (cli.command, cli.file) {
        (Some(Commands::Run { file }), _) | (None, Some(file)) => cmd_run(&file, no_color),
        (Some(Commands::Check { file, format }), _) => cmd_check(&file, &format, no_color),
        (Some(Commands::Parse { file }), _) => cmd_parse(&file, no_color),
        (Some(Commands::Repl), _) => cmd_repl(no_color),
        (None, None) => {
            let _ = Cli::command().print_help();
            ExitCode::from(EXIT_UNREADABLE)
        }
    }
}

fn read_source(file: &str) -> Result<String, ExitCode> {
    fs::read_to_string(file).map_err(|e| {
        eprintln!("{} failed to read file '{}': {}", "error:".red().bold(), file, e);
        ExitCode::from(EXIT_UNREADABLE)
    })
}

fn load_config(path: &Path, no_color: bool) -> Result<(InterpreterConfig, bool), ExitCode> {
    match InterpreterConfig::for_script(path) {
        Ok(config) => {
            let color = !no_color && config.color.enabled();
            colored::control::set_override(color);
            Ok((config, color))
        }
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            Err(ExitCode::from(EXIT_DIAGNOSTIC))
        }
    }
}

/// Print a diagnostic with a code frame. Diagnostics raised inside an
/// imported module carry that module's path, so its source is read back.
fn report(diagnostic: &Diagnostic, file: &str, source: &str, color: bool) {
    let source = if diagnostic.file.is_empty() || diagnostic.file == file {
        Cow::Borrowed(source)
    } else {
        fs::read_to_string(&diagnostic.file)
            .map(Cow::Owned)
            .unwrap_or(Cow::Borrowed(""))
    };
    eprint!("{}", diagnostic.render(&source, color));
}

fn cmd_run(file: &str, no_color: bool) -> ExitCode {
    let path = Path::new(file);
    let source = match read_source(file) {
        Ok(source) => source,
        Err(code) => return code,
    };
    let (config, color) = match load_config(path, no_color) {
        Ok(loaded) => loaded,
        Err(code) => return code,
    };

    debug!(file, max_call_depth = config.max_call_depth, "configuration loaded");
    let mut interpreter = Interpreter::with_config(config);
    match interpreter.run_file(path) {
        Ok(_) => ExitCode::SUCCESS,
        Err(diagnostic) => {
            report(&diagnostic, file, &source, color);
            ExitCode::from(EXIT_DIAGNOSTIC)
        }
    }
}

fn cmd_check(file: &str, format: &str, no_color: bool) -> ExitCode {
    let source = match read_source(file) {
        Ok(source) => source,
        Err(code) => return code,
    };
    let color = !no_color && InterpreterConfig::for_script(Path::new(file))
        .map(|config| config.color.enabled())
        .unwrap_or(true);

    let mut diagnostics = Diagnostics::new();
    let parsed = Lexer::new(&source)
        .with_file(file)
        .tokenize()
        .and_then(|tokens| lapis_core::parser::Parser::new(tokens, file).parse_with_warnings());
    match parsed {
        Ok((_, warnings)) => {
            for warning in warnings {
                diagnostics.push(warning);
            }
        }
        Err(error) => diagnostics.push(error),
    }

    match format {
        "json" => {
            let output = DiagnosticsOutput::from_diagnostics(&diagnostics);
            match serde_json::to_string_pretty(&output) {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    eprintln!("{} failed to serialize diagnostics: {}", "error:".red().bold(), e);
                    return ExitCode::from(EXIT_DIAGNOSTIC);
                }
            }
        }
        _ => {
            for diagnostic in diagnostics.iter() {
                report(diagnostic, file, &source, color);
            }
            let warning_count = diagnostics.warnings().count();
            if diagnostics.has_errors() {
                eprintln!(
                    "{}: could not check `{}` due to a previous error{}",
                    "error".red().bold(),
                    file,
                    if warning_count > 0 {
                        format!("; {} warning{} emitted", warning_count, plural(warning_count))
                    } else {
                        String::new()
                    }
                );
            } else if warning_count > 0 {
                println!(
                    "{} `{}` checked with {} warning{}",
                    "Finished".green().bold(),
                    file,
                    warning_count,
                    plural(warning_count)
                );
            } else {
                println!("{} `{}` checked successfully", "Finished".green().bold(), file);
            }
        }
    }

    if diagnostics.has_errors() {
        ExitCode::from(EXIT_DIAGNOSTIC)
    } else {
        ExitCode::SUCCESS
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

fn cmd_parse(file: &str, no_color: bool) -> ExitCode {
    let source = match read_source(file) {
        Ok(source) => source,
        Err(code) => return code,
    };

    match lapis_core::parse_source(&source, file) {
        Ok(program) => match serde_json::to_string_pretty(&program) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{} failed to serialize AST: {}", "error:".red().bold(), e);
                ExitCode::from(EXIT_DIAGNOSTIC)
            }
        },
        Err(diagnostic) => {
            report(&diagnostic, file, &source, !no_color);
            ExitCode::from(EXIT_DIAGNOSTIC)
        }
    }
}

/// Minimal line-at-a-time session. Each line runs in the same top-level
/// scope; a missing trailing `;` is added.
fn cmd_repl(no_color: bool) -> ExitCode {
    const FILE: &str = "<repl>";

    let (config, color) = match load_config(Path::new(FILE), no_color) {
        Ok(loaded) => loaded,
        Err(code) => return code,
    };
    let mut interpreter = Interpreter::with_config(config);

    println!(
        "{} {} (type {} to quit)",
        "Lapis".green().bold(),
        env!("CARGO_PKG_VERSION"),
        "exit".bold()
    );
    let stdin = io::stdin();
    loop {
        print!("{} ", ">".cyan().bold());
        if let Err(e) = io::stdout().flush() {
            warn!(error = %e, "failed to flush the prompt");
        }

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("{} failed to read input: {}", "error:".red().bold(), e);
                return ExitCode::from(EXIT_DIAGNOSTIC);
            }
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "exit" {
            break;
        }
        let mut code = input.to_string();
        if !code.ends_with(';') && !code.ends_with("end") {
            code.push(';');
        }

        match interpreter.run_source(&code, FILE) {
            Ok(Value::Null) => {}
            Ok(value) => println!("{}", format!("{:?}", value).dimmed()),
            Err(diagnostic) => report(&diagnostic, FILE, &code, color),
        }
    }
    ExitCode::SUCCESS
}
