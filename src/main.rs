use clap::Parser;
use std::process;
use tokio_util::sync::CancellationToken;
use xmlparse_driver::cli::{self, Args};

fn main() {
    let args = Args::parse();

    if !args.has_action() {
        if let Err(e) = cli::print_help() {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
        process::exit(0);
    }

    if let Err(e) = cli::setup_logging(&args) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }

    let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("Failed to create async runtime: {}", e);
        process::exit(1);
    });

    let result = runtime.block_on(async {
        let shutdown = CancellationToken::new();

        let signal_token = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nReceived CTRL+C, shutting down...");
                signal_token.cancel();
            }
        });

        cli::run(args, shutdown).await
    });

    match result {
        Ok(()) => process::exit(0),
        Err(error) => {
            eprintln!("Error: {:#}", error);
            process::exit(1);
        }
    }
}
