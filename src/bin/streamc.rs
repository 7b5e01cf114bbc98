//! Compile one protocol from a protocol file and print the result.
//!
//! Usage:
//!   streamc [OPTIONS] FILE [PROTOCOL]
//!
//! Without PROTOCOL (or with --report) the parsed file is reported instead.
//! Fields for `%(name)` redirection are declared with `--field NAME`.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use streamproto::device::{render_program, BasicDevice};
use streamproto::instruction::encode;
use streamproto::{Backend, CompilerConfig, Registry, StdFormats};

#[derive(Parser)]
#[command(name = "streamc")]
#[command(version)]
#[command(about = "Compile instrument protocol files", long_about = None)]
struct Cli {
    /// Protocol file, looked up along the search path
    file: String,

    /// Protocol request, e.g. `read` or `set(CH1,5)`
    protocol: Option<String>,

    /// Search path (`:` or `;` separated)
    #[arg(short, long, env = "STREAM_PROTOCOL_PATH")]
    path: Option<String>,

    /// Configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Declare a device field for `%(NAME)` redirection
    #[arg(short, long = "field", value_name = "NAME")]
    fields: Vec<String>,

    /// Print the wire encoding as hex instead of rendered commands
    #[arg(short = 'x', long)]
    hex: bool,

    /// Print the parsed file
    #[arg(short, long)]
    report: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(" ")
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        })
        .init();

    let mut config = match &cli.config {
        Some(path) => CompilerConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => CompilerConfig::default(),
    };
    if let Some(path) = &cli.path {
        config = config.with_search_path(path);
    }

    let mut registry = Registry::new(config);

    let request = match (&cli.protocol, cli.report) {
        (Some(request), false) => request,
        _ => {
            let report = registry.report(&cli.file)?;
            print!("{}", report);
            return Ok(());
        }
    };

    let device = cli
        .fields
        .iter()
        .enumerate()
        .fold(BasicDevice::new(), |dev, (i, name)| {
            dev.with_field(name.clone(), (i as u16).to_le_bytes().to_vec())
        });
    let backend = Backend::new(&device, &StdFormats).with_fields(&device);
    let compiled = registry
        .compile(&cli.file, request, &backend)
        .with_context(|| format!("compiling '{}' from {}", request, cli.file))?;

    let mut sections = vec![("body".to_string(), compiled.body.clone())];
    sections.extend(compiled.handlers.iter().cloned());
    for (name, code) in &sections {
        if cli.hex {
            println!("{}: {}", name, hex(&encode(code)));
        } else {
            println!("{}: {}", name, render_program(code));
        }
    }

    let mut instance = registry.get_protocol(&cli.file, request)?;
    let settings = device.settings(&mut instance)?;
    log::debug!("device settings: {:?}", settings);
    Ok(())
}
