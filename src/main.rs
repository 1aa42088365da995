// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use std::process;

use clap::Parser;
use segment_serve::cli::args::{Cli, Commands};
use segment_serve::cli::extract::run_extract;
use segment_serve::cli::logging::init_tracing;
use segment_serve::{failure, server};

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Serve(args) => tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(segment_serve::ServeError::from)
            .and_then(|runtime| runtime.block_on(server::run(args.service_config()))),
        Commands::Extract(args) => run_extract(&args),
    };

    if let Err(e) = outcome {
        failure!("{e}");
        process::exit(1);
    }
}
