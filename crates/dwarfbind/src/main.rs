use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use dwarfbind_core::{generate, inspect, load_images, GenerateOptions, GeneratedModule, ModuleManifest, Result};
use dwarfbind_core::Diagnostics;
use dwarfbind_utils::{info, init_logging, LogConfig, LogFormat, LogLevel};

mod config;

use config::{manifest_path, GenerateConfig};

/// Generate Python ctypes bindings from DWARF debug information.
#[derive(Parser, Debug)]
#[command(name = "dwarfbind")]
#[command(version)]
#[command(about = "Generate Python ctypes bindings from DWARF debug information", long_about = None)]
struct Cli
{
    /// Log level: error, warn, info, debug or trace (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,
    /// Log format: pretty or json (overrides DWARFBIND_LOG_FORMAT)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
    /// Write logs to this file instead of stderr (overrides DWARFBIND_LOG_FILE)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Generate a module from a JSON request file
    Generate
    {
        /// Request configuration (JSON)
        #[arg(long)]
        config: PathBuf,
        /// Output python file; overrides the configuration
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Shared libraries or executables to read; overrides the configuration
        #[arg(long = "lib")]
        libs: Vec<PathBuf>,
    },
    /// Bind every named type, exported function and exported global
    All
    {
        /// Shared libraries or executables to read
        #[arg(long = "lib", required = true)]
        libs: Vec<PathBuf>,
        /// Output python file
        #[arg(short, long)]
        output: PathBuf,
        /// Python module name (default: output file stem)
        #[arg(long)]
        module: Option<String>,
        /// Type names to leave out
        #[arg(long)]
        skip: Vec<String>,
        /// Manifests of modules whose types are imported instead of redefined
        #[arg(long)]
        existing: Vec<PathBuf>,
        /// Headers to translate macros from
        #[arg(long = "header")]
        headers: Vec<PathBuf>,
        /// Also define the targets of pointers
        #[arg(long, default_value_t = false)]
        deep_inspect: bool,
    },
    /// Print the resolved layout of a type
    Inspect
    {
        /// Shared libraries or executables to read
        #[arg(long = "lib", required = true)]
        libs: Vec<PathBuf>,
        /// C++ qualified type name
        name: String,
    },
}

fn main()
{
    let cli = Cli::parse();

    if let Err(e) = setup_logging(&cli) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    if let Err(e) = run_command(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn setup_logging(cli: &Cli) -> std::result::Result<(), dwarfbind_utils::LoggingError>
{
    let mut config = LogConfig::from_env();
    config.level = cli.log_level;
    if let Some(format) = cli.log_format {
        config.format = format;
    }
    if let Some(path) = &cli.log_file {
        config.file = Some(path.clone());
    }
    init_logging(&config)
}

fn run_command(cli: Cli) -> Result<()>
{
    match cli.command {
        Commands::Generate { config, output, libs } => {
            let mut config = GenerateConfig::load(&config)?;
            if output.is_some() {
                config.output = output;
            }
            if !libs.is_empty() {
                config.libraries = libs;
            }
            let libraries = std::mem::take(&mut config.libraries);
            let output = config.output.clone();
            let options = config.into_options()?;
            run_generate(&libraries, &options, output.as_deref())
        }
        Commands::All {
            libs,
            output,
            module,
            skip,
            existing,
            headers,
            deep_inspect,
        } => {
            let module = module.unwrap_or_else(|| {
                output
                    .file_stem()
                    .map_or_else(|| "bindings".to_string(), |stem| stem.to_string_lossy().into_owned())
            });
            let mut options = GenerateOptions::everything(module, skip);
            options.existing = existing.iter().map(ModuleManifest::load).collect::<Result<Vec<_>>>()?;
            options.macro_sources = headers
                .iter()
                .map(dwarfbind_core::MacroSource::read)
                .collect::<Result<Vec<_>>>()?;
            options.deep_inspect = deep_inspect;
            run_generate(&libs, &options, Some(&output))
        }
        Commands::Inspect { libs, name } => {
            info!("Inspecting {} in {} images", name, libs.len());
            let forest = load_images(&libs)?;
            print!("{}", inspect(&forest, &name)?);
            Ok(())
        }
    }
}

fn run_generate(libraries: &[PathBuf], options: &GenerateOptions, output: Option<&Path>) -> Result<()>
{
    if libraries.is_empty() {
        return Err(dwarfbind_core::BindError::InvalidRequest(
            "no libraries given (use --lib or \"libraries\")".to_string(),
        ));
    }
    info!("Loading {} images", libraries.len());
    let forest = load_images(libraries)?;
    let module = generate(&forest, options)?;
    write_module(&module, output)?;

    eprint!("{}", diagnostics_report(&module.diagnostics));
    Ok(())
}

/// Every diagnostic of the run, one per line, after a count. Empty when the
/// run was clean.
fn diagnostics_report(diagnostics: &Diagnostics) -> String
{
    if diagnostics.is_empty() {
        return String::new();
    }
    let mut report = format!("{} problems found:\n", diagnostics.len());
    for diagnostic in diagnostics.iter() {
        report.push_str("  ");
        report.push_str(&diagnostic.to_string());
        report.push('\n');
    }
    report
}

/// Write the module and its manifest, or print the module when there is no
/// output path.
fn write_module(module: &GeneratedModule, output: Option<&Path>) -> Result<()>
{
    let Some(output) = output else {
        print!("{}", module.source);
        return Ok(());
    };
    fs::write(output, &module.source)?;
    let sidecar = manifest_path(output);
    module.manifest.save(&sidecar)?;
    info!(
        "Wrote {} ({} types in manifest {})",
        output.display(),
        module.manifest.types.len(),
        sidecar.display()
    );
    Ok(())
}
