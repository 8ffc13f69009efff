mod cli;
mod infra;
mod routes;
mod server;

use patron_card::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
