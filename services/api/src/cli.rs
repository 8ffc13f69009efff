use crate::server;
use clap::{Args, Parser, Subcommand};
use patron_card::error::AppError;
use patron_card::patrons::luhn::luhn_calculate;

#[derive(Parser, Debug)]
#[command(
    name = "patron-card-api",
    about = "Issue library cards and check patron eligibility against the ILS",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Print a barcode prefix with its Luhn check digit appended
    Luhn(LuhnArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

#[derive(Args, Debug)]
pub(crate) struct LuhnArgs {
    /// Digits without a check digit, e.g. 2888805543244
    #[arg(value_parser = parse_digits)]
    pub(crate) prefix: String,
}

fn parse_digits(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("'{raw}' must be a non-empty string of digits"));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn run_luhn(args: &LuhnArgs) -> Result<String, AppError> {
    luhn_calculate(&args.prefix)
        .ok_or_else(|| AppError::InvalidInput(format!("'{}' is not a digit string", args.prefix)))
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Luhn(args) => {
            println!("{}", run_luhn(&args)?);
            Ok(())
        }
    }
}
