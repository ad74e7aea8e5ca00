// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use wsgate::config::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match cli.to_config().and_then(|c| c.validate().map(|()| c)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(2);
        }
    };

    wsgate::init_tracing(&cli.log_format, &cli.log_level);

    if let Err(e) = wsgate::run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
