use clap::{Parser, Subcommand};

mod commands;

use commands::{ApplyArgs, GenerateArgs, MintArgs, VerifyArgs};

#[derive(Parser)]
#[command(name = "tdb-cli", version, about = "tenantdb migration and token utilities")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Diff a schema against the journal and write the next migration
    GenerateMigrations(GenerateArgs),
    /// Apply unrecorded journal entries to one tenant through the gateway
    ApplyMigrations(ApplyArgs),
    /// Mint a signed per-database token
    MintToken(MintArgs),
    /// Check a token against a tenant and secret
    VerifyToken(VerifyArgs),
}

fn main() {
    tdb_otel::init_with_default("warn");

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::GenerateMigrations(args) => commands::migrations::generate(args),
        Commands::ApplyMigrations(args) => commands::migrations::apply(args),
        Commands::MintToken(args) => commands::token::mint(args),
        Commands::VerifyToken(args) => commands::token::verify(args),
    };
    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
