pub mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "school-fees")]
#[command(about = "School fees CLI - run the API, manage the schema, mint tokens and seed fee structures")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the HTTP API")]
    Serve(commands::serve::ServeArgs),

    #[command(about = "Apply pending database migrations")]
    Migrate,

    #[command(about = "Mint a bearer token for local testing")]
    Token(commands::token::TokenArgs),

    #[command(about = "Load fee structures from a YAML fixture")]
    Seed(commands::seed::SeedArgs),
}

#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    match cli.command {
        Commands::Serve(args) => commands::serve::handle(args).await,
        Commands::Migrate => commands::migrate::handle(output_format).await,
        Commands::Token(args) => commands::token::handle(args, output_format),
        Commands::Seed(args) => commands::seed::handle(args, output_format).await,
    }
}
