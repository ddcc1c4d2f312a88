use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use tdb_client::{Credentials, GatewayClient};
use tdb_migrate::{GenerateOptions, MigrationDir, Schema};
use tracing::info;

#[derive(Args)]
pub struct GenerateArgs {
    /// Schema snapshot (JSON) describing the desired tables
    #[arg(long)]
    pub schema: PathBuf,
    /// Journal directory; receives `<tag>.sql` and `meta/`
    #[arg(long = "out-dir", visible_alias = "outDir", default_value = "migrations")]
    pub out_dir: PathBuf,
    /// Tag for the new entry (default `<idx>_init` / `<idx>_migration`)
    #[arg(long)]
    pub tag: Option<String>,
    /// Diff against this schema instead of the stored snapshot
    #[arg(long = "from-schema", visible_alias = "fromSchema")]
    pub from_schema: Option<PathBuf>,
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Journal directory produced by `generate-migrations`
    #[arg(long, default_value = "migrations")]
    pub dir: PathBuf,
    /// Gateway base URL
    #[arg(long, env = "TDB_URL", default_value = "http://127.0.0.1:8787")]
    pub url: String,
    /// Deployment secret
    #[arg(long, env = "TDB_SECRET", hide_env_values = true)]
    pub secret: String,
    /// Tenant database name
    #[arg(long)]
    pub db: String,
    /// Signed token for the tenant
    #[arg(long, env = "TDB_TOKEN", hide_env_values = true)]
    pub token: String,
}

fn read_schema(path: &Path) -> Result<Schema> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading schema {}", path.display()))?;
    Schema::from_json(&raw).with_context(|| format!("parsing schema {}", path.display()))
}

pub fn generate(args: GenerateArgs) -> Result<()> {
    let schema = read_schema(&args.schema)?;
    let from_schema = args.from_schema.as_deref().map(read_schema).transpose()?;
    let dir = MigrationDir::new(&args.out_dir);
    let out = tdb_migrate::generate(
        &dir,
        &schema,
        GenerateOptions {
            tag: args.tag,
            from_schema,
        },
    )?;
    for warning in &out.warnings {
        eprintln!("warning: {warning}");
    }
    match out.entry {
        Some(entry) => println!(
            "wrote {} ({} statements)",
            dir.sql_path(&entry.tag).display(),
            out.statements.len()
        ),
        None => println!("no schema changes"),
    }
    Ok(())
}

pub fn apply(args: ApplyArgs) -> Result<()> {
    let dir = MigrationDir::new(&args.dir);
    let migrations = dir
        .load_migrations()
        .with_context(|| format!("loading journal from {}", args.dir.display()))?;
    let client = GatewayClient::new(
        &args.url,
        Credentials {
            secret: args.secret,
            db: args.db.clone(),
            token: args.token,
        },
    )?;
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting runtime")?;
    let now_ms = chrono::Utc::now().timestamp_millis();
    let report = rt
        .block_on(tdb_migrate::apply(&client, &migrations, now_ms))
        .with_context(|| format!("applying migrations to {}", args.db))?;
    info!(target: "tdb::cli", db = %args.db, applied = report.applied.len(), skipped = report.skipped, "apply finished");
    for tag in &report.applied {
        println!("applied {tag}");
    }
    println!(
        "{} applied, {} already recorded, schema version {}",
        report.applied.len(),
        report.skipped,
        report.schema_version
    );
    Ok(())
}
