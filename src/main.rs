#[tokio::main(flavor = "current_thread")]
async fn main() {
    propdesk::init_logging();
    if let Err(e) = propdesk::run().await {
        log::error!("propdesk failed: {e}");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
