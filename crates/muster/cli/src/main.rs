//! Muster CLI binary

#[tokio::main]
async fn main() {
    if let Err(e) = muster_cli::run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
