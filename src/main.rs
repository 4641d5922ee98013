use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use gitserve::{GitServer, ServerOptions};

#[derive(Parser)]
#[command(name = "gitserve")]
#[command(about = "Serve bare Git repositories over smart HTTP", long_about = None)]
struct Cli {
    /// Directory holding the bare repositories (falls back to GITSERVE_ROOT)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Port to listen on; 0 picks a free port (falls back to GITSERVE_PORT,
    /// then 8000)
    #[arg(long)]
    port: Option<u16>,

    /// Create missing repositories on first access
    #[arg(long)]
    auto_create: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let root = match cli.root {
        Some(root) => root,
        None => std::env::var("GITSERVE_ROOT")
            .map(PathBuf::from)
            .context("--root or GITSERVE_ROOT must be set")?,
    };
    std::fs::create_dir_all(&root)
        .with_context(|| format!("failed to create repository root: {}", root.display()))?;

    let port = match cli.port {
        Some(port) => port,
        None => match std::env::var("GITSERVE_PORT") {
            Ok(value) => value
                .parse()
                .with_context(|| format!("invalid GITSERVE_PORT {value:?}"))?,
            Err(_) => 8000,
        },
    };

    let server = GitServer::new(
        root,
        ServerOptions {
            auto_create: cli.auto_create,
            authenticator: None,
        },
    );
    server.listen(port).await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for ctrl-c")?;
    server.close().await
}
