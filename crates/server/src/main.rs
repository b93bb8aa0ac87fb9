use server::{init_tracing, Server, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = ServerConfig::from_env()?;
    Server::run(config).await
}
