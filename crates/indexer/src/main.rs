#[tokio::main]
async fn main() {
    indexer::start(std::env::args()).await;
}
