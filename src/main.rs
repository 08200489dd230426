use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    access_control_cli::cli::run().await
}
