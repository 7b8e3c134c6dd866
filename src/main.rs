use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{fmt, EnvFilter};

use claims_validator::{
    ingest, unique_patients, CompanionCodeRule, ImportSummary, InputError, RawUpload, RuleStore,
    Settings, UpsertOutcome, ValidatorError,
};

#[derive(Parser)]
#[command(name = "claims-validator", version, about = "Validate claims-export CSV files")]
struct Cli {
    /// Rule store path (overrides DATABASE_URL)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the rule tables and seed the required-headers rule
    Init,
    /// Validate a file against the stored rules and print the JSON report
    Validate { file: PathBuf },
    /// Print unique patients per service date
    Metrics { file: PathBuf },
    /// Add or update one required-companion rule
    AddCompanion {
        code: String,
        requires: String,
        #[arg(long)]
        inactive: bool,
        #[arg(long)]
        note: Option<String>,
    },
    /// Bulk import companion rules (code,requires_code,active[,note])
    ImportCompanions { file: PathBuf },
    /// Bulk import billing codes (code,name,description,is_active)
    ImportCodes { file: PathBuf },
    /// Bulk import establishments (number,name,city,region_code,is_active)
    ImportEstablishments { file: PathBuf },
    /// Bulk import context elements (key,value,description)
    ImportContexts { file: PathBuf },
}

fn main() -> ExitCode {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut settings = Settings::from_env().context("Invalid environment settings")?;
    if let Some(db) = cli.db {
        settings.database_path = db;
    }

    match cli.command {
        Command::Init => {
            let store = open_store(&settings.database_path)?;
            store.setup_database()?;
            store.seed_required_headers_rule()?;
            println!("✓ Rule store ready at {}", settings.database_path.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Validate { file } => {
            let upload = read_upload(&file, settings.max_upload_bytes)?;
            // Store is released before the CPU-bound part starts
            let (params, index) = {
                let store = open_store(&settings.database_path)?;
                (store.load_required_headers()?, store.load_companion_index()?)
            };

            let report = ingest(&upload, &params, &index, &settings.fields)?;
            println!("{}", serde_json::to_string_pretty(&report)?);

            Ok(if report.valid {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }
        Command::Metrics { file } => {
            let upload = read_upload(&file, settings.max_upload_bytes)?;
            let report = unique_patients(&upload, &settings.fields)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::AddCompanion {
            code,
            requires,
            inactive,
            note,
        } => {
            let store = open_store(&settings.database_path)?;
            store.setup_database()?;

            let mut rule = CompanionCodeRule::new(&code, &requires, !inactive);
            if let Some(note) = note {
                rule = rule.with_note(&note);
            }
            let outcome = store.upsert_companion_rule(&rule)?;
            let verb = match outcome {
                UpsertOutcome::Inserted => "Inserted",
                UpsertOutcome::Updated => "Updated",
                UpsertOutcome::Unchanged => "Unchanged",
            };
            println!("✓ {}: {} requires {}", verb, code, requires);
            Ok(ExitCode::SUCCESS)
        }
        Command::ImportCompanions { file } => {
            import_file(&settings, &file, RuleStore::import_companion_rules)
        }
        Command::ImportCodes { file } => import_file(&settings, &file, RuleStore::import_codes),
        Command::ImportEstablishments { file } => {
            import_file(&settings, &file, RuleStore::import_establishments)
        }
        Command::ImportContexts { file } => import_file(&settings, &file, RuleStore::import_contexts),
    }
}

/// Decode `file`, run one bulk import against the store and print the counts.
fn import_file<F>(settings: &Settings, file: &Path, import: F) -> Result<ExitCode>
where
    F: Fn(&RuleStore, &str) -> claims_validator::Result<ImportSummary>,
{
    let upload = read_upload(file, settings.max_upload_bytes)?;
    let text = claims_validator::decode(&upload.bytes).text;

    let store = open_store(&settings.database_path)?;
    store.setup_database()?;
    let summary = import(&store, &text)?;
    println!(
        "Processed: {} rows | Inserted: {} | Updated: {} | Unchanged: {} | Skipped: {}",
        summary.processed, summary.inserted, summary.updated, summary.unchanged, summary.skipped
    );
    Ok(ExitCode::SUCCESS)
}

fn open_store(path: &Path) -> Result<RuleStore> {
    RuleStore::open(path).with_context(|| format!("Failed to open rule store: {}", path.display()))
}

fn read_upload(path: &Path, max_bytes: usize) -> Result<RawUpload> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read file: {}", path.display()))?;
    if bytes.len() > max_bytes {
        return Err(ValidatorError::from(InputError::TooLarge { max_bytes }).into());
    }
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string);
    Ok(RawUpload::new(bytes, filename))
}
