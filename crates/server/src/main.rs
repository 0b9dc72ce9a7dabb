#[tokio::main]
async fn main() -> anyhow::Result<()> {
    careline_server::run().await
}
