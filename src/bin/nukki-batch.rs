//! nukki-batch binary entry point

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    nukki_batch::cli::main().await
}
