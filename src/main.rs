use std::fs;
use std::io::Read;

use anyhow::{bail, Context, Result};
use clap::{Parser as ClapParser, Subcommand};
use colored::Colorize;

use unstack::ast::Module;
use unstack::formatter::CodeFormatter;
use unstack::interpreter::Interpreter;
use unstack::lexer::Lexer;
use unstack::parser;
use unstack::rewrite::{self, RewriteOptions};
use unstack::visitor::Visitor;

#[derive(ClapParser)]
#[command(name = "unstack")]
#[command(version)]
#[command(about = "Rewrites recursive functions into stack-safe, memoized trampolined form", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rewrite every @unstack function and print the transformed program
    Transform {
        /// Source file, or '-' for stdin
        file: String,

        /// Write the output here instead of stdout
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Rewrite and execute a program
    Run {
        /// Source file, or '-' for stdin
        file: String,
    },
    /// Parse and dry-run the rewrite without producing output
    Check {
        /// Source file, or '-' for stdin
        file: String,
    },
    /// Pretty-print a source file without transforming it
    Format {
        /// Source file, or '-' for stdin
        file: String,

        /// Write the output here instead of stdout
        #[arg(short, long)]
        output: Option<String>,

        /// Indentation size (number of spaces)
        #[arg(short, long, default_value = "4")]
        indent: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Transform { file, output } => transform_file(&file, output.as_deref()),
        Commands::Run { file } => run_file(&file),
        Commands::Check { file } => check_file(&file),
        Commands::Format {
            file,
            output,
            indent,
        } => format_file(&file, output.as_deref(), indent),
    }
}

fn read_source(file: &str) -> Result<String> {
    if file == "-" {
        let mut source = String::new();
        std::io::stdin()
            .read_to_string(&mut source)
            .context("Failed to read from stdin")?;
        Ok(source)
    } else {
        fs::read_to_string(file).with_context(|| format!("Failed to read file: {}", file))
    }
}

/// Lexes and parses a source file, printing every diagnostic before
/// reporting failure.
fn load_module(file: &str, source: &str) -> Result<Module> {
    let mut lexer = Lexer::new(source);
    let tokens = lexer.tokenize();

    let lexer_errors = lexer.get_errors();
    if !lexer_errors.is_empty() {
        eprintln!("{}", format!("Lexical errors found in '{}':", file).red());
        for error in lexer_errors {
            eprintln!("  {}", error);
        }
        bail!("aborting: {} lexical error(s)", lexer_errors.len());
    }

    match parser::parse(tokens) {
        Ok(module) => Ok(module),
        Err(errors) => {
            eprintln!("{}", format!("Syntax errors found in '{}':", file).red());
            for error in &errors {
                eprintln!("  {}", error.get_message());
            }
            bail!("aborting: {} syntax error(s)", errors.len());
        }
    }
}

fn transform_file(file: &str, output: Option<&str>) -> Result<()> {
    let source = read_source(file)?;
    let module = load_module(file, &source)?;

    let rewritten = match rewrite::rewrite_module(&module, &RewriteOptions::default()) {
        Ok(module) => module,
        Err(error) => {
            eprintln!("{}", format!("Cannot transform '{}':", file).red());
            eprintln!("  {}", error);
            bail!("aborting: rewrite failed");
        }
    };

    let text = unstack::formatter::format_module(&rewritten);
    write_output(output, &text)
}

fn run_file(file: &str) -> Result<()> {
    let source = read_source(file)?;
    let module = load_module(file, &source)?;

    // The native driver backs the reserved name, so no surface driver
    // definition is spliced in.
    let rewritten = match rewrite::rewrite_module(&module, &RewriteOptions { emit_driver: false }) {
        Ok(module) => module,
        Err(error) => {
            eprintln!("{}", format!("Cannot transform '{}':", file).red());
            eprintln!("  {}", error);
            bail!("aborting: rewrite failed");
        }
    };

    let mut interpreter = Interpreter::new();
    if let Err(error) = interpreter.interpret(&rewritten) {
        eprintln!("{}", format!("Runtime error in '{}':", file).red());
        eprintln!("  {}", error);
        bail!("aborting: runtime error");
    }
    Ok(())
}

fn check_file(file: &str) -> Result<()> {
    let source = read_source(file)?;
    let module = load_module(file, &source)?;

    match rewrite::rewrite_module(&module, &RewriteOptions::default()) {
        Ok(_) => {
            let marked = rewrite::count_marked(&module);
            println!(
                "{}",
                format!(
                    "✓ '{}' is valid ({} marked function{})",
                    file,
                    marked,
                    if marked == 1 { "" } else { "s" }
                )
                .green()
            );
            Ok(())
        }
        Err(error) => {
            eprintln!("{}", format!("✗ '{}' cannot be transformed:", file).red());
            eprintln!("  {}", error);
            bail!("aborting: rewrite failed");
        }
    }
}

fn format_file(file: &str, output: Option<&str>, indent: usize) -> Result<()> {
    let source = read_source(file)?;
    let module = load_module(file, &source)?;

    let mut formatter = CodeFormatter::new(indent);
    formatter.visit_module(&module);
    let text = formatter.into_output();
    write_output(output, &text)
}

fn write_output(output: Option<&str>, text: &str) -> Result<()> {
    match output {
        Some(path) => {
            fs::write(path, text).with_context(|| format!("Failed to write to file: {}", path))?;
            println!("Wrote output to '{}'", path);
        }
        None => print!("{}", text),
    }
    Ok(())
}
