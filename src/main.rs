use clap::Parser;
use tracing_subscriber::EnvFilter;

use venice_launcher::config::Cli;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let code = venice_launcher::launcher::run(cli).await;

    // 백엔드와 리스너는 run() 안에서 이미 정리됨
    std::process::exit(code);
}
