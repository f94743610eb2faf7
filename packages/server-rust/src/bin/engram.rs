//! Engram server binary: `serve` and local store management.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use engram_server::cli::{run_store_command, stdin_confirm, Cli, Command};
use engram_server::config::AppConfig;
use engram_server::server::run_until_signal;

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log.level.clone()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.log.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    match cli.command {
        Command::Serve => {
            init_tracing(&config);
            if let Err(e) = run_until_signal(config).await {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        }
        Command::Store(command) => {
            let mut confirm = |prompt: &str| stdin_confirm(prompt);
            match run_store_command(&command, &config, &mut confirm) {
                Ok(output) => println!("{output}"),
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
}
