//! Gridcalc - evaluate spreadsheet formulas from the command line

mod config;

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use gridcalc_core::sheet::load_sheet;
use gridcalc_core::{CellRef, EngineConfig, FormulaEngine, Grid};

fn print_usage() {
    eprintln!("Usage: gridcalc [OPTIONS] [FILE]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  [FILE]                    Sheet to load (.grd)");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --command <FORMULA>   Evaluate one formula against FILE and print it");
    eprintln!("  -f, --functions <FILE>    Load custom Rhai functions (can be repeated)");
    eprintln!("  --config <FILE>           Read engine settings from a TOML file");
    eprintln!("  --no-config               Ignore the per-user config file");
    eprintln!("  -h, --help                Print help");
    eprintln!();
    eprintln!("Set GRIDCALC_LOG (e.g. GRIDCALC_LOG=debug) to enable logging.");
}

#[derive(Debug, Default)]
struct Options {
    file_path: Option<PathBuf>,
    command: Option<String>,
    functions_files: Vec<PathBuf>,
    config_file: Option<PathBuf>,
    no_config: bool,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("GRIDCALC_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let mut options = Options::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                return ExitCode::SUCCESS;
            }
            "-c" | "--command" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --command requires a formula");
                    return ExitCode::FAILURE;
                }
                options.command = Some(args[i].to_string());
            }
            "-f" | "--functions" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --functions requires a file path");
                    return ExitCode::FAILURE;
                }
                options.functions_files.push(PathBuf::from(&args[i]));
            }
            "--config" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --config requires a file path");
                    return ExitCode::FAILURE;
                }
                options.config_file = Some(PathBuf::from(&args[i]));
            }
            "--no-config" => options.no_config = true,
            arg if arg.starts_with('-') => {
                eprintln!("Error: Unknown option: {}", arg);
                print_usage();
                return ExitCode::FAILURE;
            }
            _ => {
                if options.file_path.is_none() {
                    options.file_path = Some(PathBuf::from(&args[i]));
                } else {
                    eprintln!("Error: Unexpected argument: {}", args[i]);
                    print_usage();
                    return ExitCode::FAILURE;
                }
            }
        }
        i += 1;
    }

    init_logging();

    match run(options) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(options: Options) -> anyhow::Result<ExitCode> {
    let mut engine_config = if options.no_config && options.config_file.is_none() {
        EngineConfig::default()
    } else {
        let (loaded, warnings) = config::load_config(options.config_file.as_deref());
        for warning in warnings {
            eprintln!("Warning: {}", warning);
        }
        loaded
    };
    engine_config.functions_files.extend(options.functions_files);

    let engine = FormulaEngine::from_config(engine_config)?;

    let grid = match options.file_path.as_ref() {
        Some(path) => {
            let updates = load_sheet(path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            debug!(path = %path.display(), cells = updates.len(), "sheet loaded");
            engine.batch_evaluate(&updates, &Grid::new())
        }
        None => Grid::new(),
    };

    if let Some(formula) = options.command {
        let value = engine.evaluate_detached(&formula, &grid);
        println!("{}", value);
        return Ok(if value.is_error() {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        });
    }

    let mut cells: Vec<(&CellRef, String)> = grid
        .iter()
        .map(|(id, cell)| (id, cell.display_value.clone()))
        .filter(|(_, display)| !display.is_empty())
        .collect();
    cells.sort_by_key(|(id, _)| **id);
    for (id, display) in cells {
        println!("{}: {}", id, display);
    }
    Ok(ExitCode::SUCCESS)
}
