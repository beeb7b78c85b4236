#[tokio::main]
async fn main() {
    if let Err(err) = sr_api::run().await {
        tracing::error!(error = %err, "sr-api failed");
        std::process::exit(1);
    }
}
