//! fieldview - CLI

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fieldview::util::config::{load_config, CompileConfig};
use fieldview::util::logger::{self, LogLevel};
use fieldview::{compile_file, BatchResult, VERSION};
use std::path::{Path, PathBuf};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "fieldview")]
#[command(version = VERSION)]
#[command(about = "Type deduction and iterator-IR lowering for field operators", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(short, long, value_name = "FILE", default_value = "fieldview.toml")]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile a JSON batch and print the program units
    Compile {
        /// Batch file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Compile units one after another
        #[arg(long)]
        sequential: bool,
    },

    /// Type-check and lower a batch, printing only diagnostics
    Check {
        /// Batch file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Print version information
    Version,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = load_config(&args.config)
        .with_context(|| format!("Failed to load config: {}", args.config.display()))?;
    if args.verbose {
        config.log_level = LogLevel::Debug;
    }
    logger::init_with_level(config.log_level);

    match args.command {
        Commands::Compile { file, sequential } => {
            if sequential {
                config.parallel = false;
            }
            let result = compile(&file, &config)?;
            for report in &result.programs {
                if let Some(unit) = &report.output {
                    println!("{}\n", unit);
                }
            }
            finish(&result)?;
        }
        Commands::Check { file } => {
            let result = compile(&file, &config)?;
            finish(&result)?;
            eprintln!("Check passed!");
        }
        Commands::Version => {
            println!("fieldview {}", VERSION);
        }
    }

    Ok(())
}

fn compile(
    file: &Path,
    config: &CompileConfig,
) -> Result<BatchResult> {
    compile_file(file, config).with_context(|| format!("Failed to compile: {}", file.display()))
}

fn finish(result: &BatchResult) -> Result<()> {
    for diagnostic in result.diagnostics() {
        eprintln!("{}", diagnostic);
        if !diagnostic.offending.is_empty() {
            eprintln!("  --> {}", diagnostic.offending);
        }
        for related in &diagnostic.related {
            eprintln!("  note: see {}", related);
        }
    }
    if !result.is_success() {
        bail!("{} unit(s) failed", result.diagnostics().count());
    }
    Ok(())
}
