#[tokio::main]
async fn main() {
    if let Err(e) = lead_pitcher::run().await {
        eprintln!("lead-pitcher: {e}");
        std::process::exit(1);
    }
}
