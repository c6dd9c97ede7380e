/// Stepwise CLI
///
/// Runs goals from an already-parsed goal file against a pooled engine.

use stepwise_core::cli;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
