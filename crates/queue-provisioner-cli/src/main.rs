use queue_provisioner_cli::run_cli;
use tracing::error;

#[tokio::main]
async fn main() {
    if let Err(e) = run_cli().await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);

        std::process::exit(e.exit_code());
    }
}
