//! Nova extension controller.

#[tokio::main]
async fn main() {
    if let Err(e) = nova_controller::cli::run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
