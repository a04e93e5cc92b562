#[tokio::main]
async fn main() -> anyhow::Result<()> {
    chat_tail_lib::run().await
}
