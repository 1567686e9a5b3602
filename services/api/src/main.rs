use visit_scheduler_api::run;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("visit scheduler error: {err}");
        std::process::exit(1);
    }
}
