use std::env;
use std::error::Error;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use clap::{Parser, ValueEnum, error::ErrorKind};
use tracing::level_filters::LevelFilter;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use crate::audit::{IdempotenceAuditor, recheck_file};
use crate::chem::{CommandCanonicalizer, CommandFingerprinter, ExternalCommand};
use crate::config::{PipelineOptions, PrepareManifest, PropertyErrorPolicy, StoreSettings};
use crate::constants::env::{CANONICALIZE_CMD, DB_HOST, DB_PATH, FINGERPRINT_CMD};
use crate::constants::outputs::NAMELIST_FILE;
use crate::errors::PipelineError;
use crate::namelist::export_names;
use crate::pipeline::Pipeline;
use crate::store::StoreContext;

/// Pipeline stage selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Command {
    /// Canonicalize, deduplicate, and write JSONL batches.
    Prepare,
    /// Audit canonicalizer idempotence over the dataset structures.
    Check,
    /// Export polymer names from the store.
    Namelist,
}

#[derive(Debug, Parser)]
#[command(
    name = "polylet",
    disable_help_subcommand = true,
    about = "Prepare polymer property datasets for bulk loading",
    long_about = "Canonicalize polymer SMILES from property CSV files, deduplicate them against the polymer store, and write JSONL batches for loading.",
    after_help = "Environment variables are also read from ./.env (or --env-file) without overriding ones already set. The store is the SQLite file named by DB_PATH, else the PostgreSQL server named by DB_HOST, DB_PORT, DB_USER, DB_PASSWORD and DB_NAME. External canonicalizer and fingerprint commands resolve by explicit arg, then POLYLET_CANONICALIZE_CMD / POLYLET_FINGERPRINT_CMD."
)]
struct PolyletCli {
    #[arg(value_enum, help = "Pipeline stage to run")]
    command: Command,
    #[arg(
        long,
        default_value_t = 6,
        value_parser = clap::value_parser!(u8).range(1..=8),
        help = "Verbosity from 1 (errors only) to 8 (trace)"
    )]
    loglevel: u8,
    #[arg(long, help = "Process at most 10 rows per dataset and log at debug level")]
    debug: bool,
    #[arg(long, value_name = "PATH", help = "Dataset manifest (JSON); defaults to the built-in catalogue")]
    manifest: Option<PathBuf>,
    #[arg(long = "data-dir", value_name = "DIR", default_value = ".", help = "Directory holding the dataset CSV files")]
    data_dir: PathBuf,
    #[arg(long = "output-dir", value_name = "DIR", help = "Output directory; defaults to the data directory")]
    output_dir: Option<PathBuf>,
    #[arg(long = "canonicalize-cmd", value_name = "CMD", help = "Command printing the canonical form of its last argument")]
    canonicalize_cmd: Option<String>,
    #[arg(long = "fingerprint-cmd", value_name = "CMD", help = "Command printing a JSON fingerprint of its last argument")]
    fingerprint_cmd: Option<String>,
    #[arg(long = "abort-on-property-error", help = "Fail a dataset when its property lookup errors")]
    abort_on_property_error: bool,
    #[arg(long, value_name = "PATH", help = "With `check`, re-run the audit over a list_not_idempotent.csv")]
    recheck: Option<PathBuf>,
    #[arg(long = "log-file", value_name = "PATH", help = "Also append log events to this file")]
    log_file: Option<PathBuf>,
    #[arg(long = "env-file", value_name = "PATH", help = "Load environment variables from this file instead of ./.env")]
    env_file: Option<PathBuf>,
}

impl PolyletCli {
    fn pipeline_options(&self) -> PipelineOptions {
        let mut options = PipelineOptions::new(&self.data_dir).with_debug(self.debug);
        if let Some(output_dir) = &self.output_dir {
            options = options.with_output_dir(output_dir);
        }
        if self.abort_on_property_error {
            options = options.with_property_error_policy(PropertyErrorPolicy::Abort);
        }
        options
    }

    fn manifest(&self) -> Result<PrepareManifest, PipelineError> {
        match &self.manifest {
            Some(path) => PrepareManifest::load(path),
            None => Ok(PrepareManifest::builtin()),
        }
    }

    fn canonicalizer(&self) -> Result<CommandCanonicalizer, PipelineError> {
        let command = resolve_command(&self.canonicalize_cmd, CANONICALIZE_CMD, "--canonicalize-cmd")?;
        Ok(CommandCanonicalizer::new(command))
    }

    fn fingerprinter(&self) -> Result<CommandFingerprinter, PipelineError> {
        let command = resolve_command(&self.fingerprint_cmd, FINGERPRINT_CMD, "--fingerprint-cmd")?;
        Ok(CommandFingerprinter::new(command))
    }
}

fn resolve_command(
    explicit: &Option<String>,
    env_key: &str,
    flag: &str,
) -> Result<ExternalCommand, PipelineError> {
    let command_line = explicit
        .clone()
        .or_else(|| env::var(env_key).ok())
        .ok_or_else(|| {
            PipelineError::Configuration(format!("no command configured; pass {flag} or set {env_key}"))
        })?;
    ExternalCommand::parse(&command_line)
}

/// Load `KEY=value` pairs into the process environment. Variables that are
/// already set keep their value. Without an explicit path a missing `./.env`
/// is not an error.
fn load_env_file(path: Option<&Path>) -> Result<Option<PathBuf>, PipelineError> {
    match path {
        Some(path) => {
            dotenvy::from_path(path).map_err(|err| {
                PipelineError::Configuration(format!("cannot load {}: {err}", path.display()))
            })?;
            Ok(Some(path.to_path_buf()))
        }
        None => Ok(dotenvy::dotenv().ok()),
    }
}

/// Map the numeric verbosity to a level filter. `debug` forces level 7.
pub fn level_for(loglevel: u8, debug: bool) -> LevelFilter {
    let loglevel = if debug { 7 } else { loglevel };
    match loglevel {
        0..=2 => LevelFilter::ERROR,
        3 => LevelFilter::WARN,
        4..=6 => LevelFilter::INFO,
        7 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

fn init_logging(level: LevelFilter, log_file: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .try_init();
    Ok(())
}

/// Entry point of the `polylet` binary.
pub fn run<I>(args_iter: I) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    let Some(cli) = parse_cli::<PolyletCli, _>(std::iter::once("polylet".to_string()).chain(args_iter))?
    else {
        return Ok(());
    };
    let env_file = load_env_file(cli.env_file.as_deref())?;
    init_logging(level_for(cli.loglevel, cli.debug), cli.log_file.as_deref())?;
    if let Some(path) = env_file {
        debug!(path = %path.display(), "loaded environment file");
    }
    if cli.debug {
        warn!("debug mode: at most 10 rows per dataset");
    }

    match cli.command {
        Command::Prepare => run_prepare(&cli)?,
        Command::Check => run_check(&cli)?,
        Command::Namelist => run_namelist(&cli)?,
    }
    Ok(())
}

fn run_prepare(cli: &PolyletCli) -> Result<(), PipelineError> {
    let manifest = cli.manifest()?;
    let canonicalizer = cli.canonicalizer()?;
    let fingerprinter = cli.fingerprinter()?;
    let context = StoreContext::connect(StoreSettings::from_env()?.as_ref());

    let pipeline = Pipeline::new(&context, &canonicalizer, &fingerprinter, cli.pipeline_options());
    let report = pipeline.prepare(&manifest)?;
    info!(
        datasets = report.datasets.len(),
        new_polymers = report.new_polymers,
        store_connected = report.store_connected,
        "prepare done"
    );
    Ok(())
}

fn run_check(cli: &PolyletCli) -> Result<(), PipelineError> {
    let canonicalizer = cli.canonicalizer()?;

    if let Some(path) = &cli.recheck {
        for (smiles, idempotent) in recheck_file(&canonicalizer, path)? {
            println!("{smiles}\nIdempotent: {idempotent}");
        }
        return Ok(());
    }

    let manifest = cli.manifest()?;
    let options = cli.pipeline_options();
    let output_dir = options.output_dir.clone();
    let mut auditor = IdempotenceAuditor::new(&canonicalizer, options);
    for spec in &manifest.datasets {
        auditor.audit_dataset(spec)?;
    }
    auditor.write(&output_dir)?;
    let report = auditor.report();
    info!(
        checked = report.checked,
        not_idempotent = report.not_idempotent,
        "check done"
    );
    Ok(())
}

fn run_namelist(cli: &PolyletCli) -> Result<(), PipelineError> {
    let settings = StoreSettings::from_env()?.ok_or_else(|| {
        PipelineError::Configuration(format!(
            "the namelist command requires {DB_PATH} or {DB_HOST}"
        ))
    })?;
    let context = StoreContext::try_connect(&settings)?;
    let out = cli.pipeline_options().output_dir.join(NAMELIST_FILE);
    export_names(&context, &out)?;
    Ok(())
}

fn parse_cli<T, I>(args: I) -> Result<Option<T>, Box<dyn Error>>
where
    T: Parser,
    I: IntoIterator,
    I::Item: Into<std::ffi::OsString> + Clone,
{
    match T::try_parse_from(args) {
        Ok(cli) => Ok(Some(cli)),
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                err.print()?;
                Ok(None)
            }
            _ => Err(err.into()),
        },
    }
}
