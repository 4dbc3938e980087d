use clap::Parser;
use reform_impact::api::{Cli, Command, run_analyses, run_http_server};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Run(args) => {
            if let Err(e) = run_analyses(&args) {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        }
        Command::Serve(args) => {
            if let Err(e) = run_http_server(args.port, &args.dataset).await {
                eprintln!("Server error: {e}");
                std::process::exit(1);
            }
        }
    }
}
