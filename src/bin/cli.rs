// CLI binary: errors are reported on stderr with a non-zero exit code.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use grail::artifacts::write_artifacts;
use grail::compiler::{CheckResult, ParseResult, Severity};
use grail::config::{load_settings, Settings};
use grail::error::GrailError;
use grail::script::{load, CompiledScript};

// ── CLI argument parsing ─────────────────────────────────────────

#[derive(Parser)]
#[command(name = "grail", about = "Compile .pym scripts for the Monty interpreter", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (JSON)
    #[arg(long, global = true, default_value = "grail.json")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Check scripts for constructs the interpreter does not support
    Check {
        files: Vec<PathBuf>,
        /// Output raw JSON reports
        #[arg(long)]
        json: bool,
        /// Treat warnings as failures too
        #[arg(long)]
        strict: bool,
    },
    /// Write the stripped code, stub and reports for a script
    Build {
        file: PathBuf,
        /// Artifact root (defaults to the configured directory)
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Print the type stub for a script
    Stub { file: PathBuf },
    /// Map a line of the stripped code back to the original script
    Map { file: PathBuf, line: usize },
    /// Print the JSON schema of the check report
    Schema,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let settings = match load_settings(&cli.config) {
        Ok(settings) => settings,
        Err(e) => fail(&e),
    };

    match cli.command {
        Commands::Check {
            files,
            json,
            strict,
        } => run_check(&files, json, strict, &settings),
        Commands::Build { file, out_dir } => {
            let script = load_or_exit(&file, &settings);
            let root = out_dir.unwrap_or_else(|| settings.artifacts_dir.clone());
            match write_artifacts(&root, &script) {
                Ok(dir) => println!("{}", dir.display()),
                Err(e) => fail(&e),
            }
        }
        Commands::Stub { file } => print!("{}", load_or_exit(&file, &settings).stub),
        Commands::Map { file, line } => {
            let script = load_or_exit(&file, &settings);
            match script.map_interpreter_line(line) {
                Some(original) => {
                    let text = script.parse_result.line_text(original).unwrap_or("");
                    println!("{original}: {}", text.trim());
                }
                None => {
                    eprintln!("Line {line} of the stripped code has no original line");
                    process::exit(1);
                }
            }
        }
        Commands::Schema => {
            let schema = schemars::schema_for!(CheckResult);
            println!("{}", serde_json::to_string_pretty(&schema).unwrap());
        }
    }
}

fn run_check(files: &[PathBuf], json: bool, strict: bool, settings: &Settings) {
    let settings = Settings {
        strict: false,
        ..settings.clone()
    };
    let mut reports = Vec::with_capacity(files.len());
    let mut all_valid = true;
    for file in files {
        let script = load_or_exit(file, &settings);
        let report = script.check_result;
        all_valid &= report.valid && !(strict && !report.warnings.is_empty());
        if !json {
            print_report(file, &report, &script.parse_result);
        }
        reports.push(report);
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&reports).unwrap());
    }
    if !all_valid {
        process::exit(1);
    }
}

fn print_report(file: &Path, report: &CheckResult, parsed: &ParseResult) {
    let status = if report.valid { "ok" } else { "FAILED" };
    println!(
        "{}: {status} ({} errors, {} warnings)",
        file.display(),
        report.errors.len(),
        report.warnings.len()
    );
    for message in report.messages() {
        let label = match message.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        println!(
            "  {}:{}: {label} {}: {}",
            message.line, message.column, message.code, message.message
        );
        if let Some(source) = parsed.line_text(message.line) {
            println!("      {}", source.trim());
        }
        if let Some(suggestion) = &message.suggestion {
            println!("      hint: {suggestion}");
        }
    }
}

fn load_or_exit(file: &Path, settings: &Settings) -> CompiledScript {
    match load(file, settings) {
        Ok(script) => script,
        Err(e) => fail(&e),
    }
}

fn fail(e: &GrailError) -> ! {
    eprintln!("Error: {e}");
    process::exit(1);
}
