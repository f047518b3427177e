#[tokio::main]
async fn main() {
    if let Err(e) = medschedule_lib::run().await {
        tracing::error!("{e}");
        eprintln!("medschedule: {e}");
        std::process::exit(1);
    }
}
