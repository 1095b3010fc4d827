use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    energy_api::run().await
}
