mod api;
mod host;
mod outbound;
mod serializer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
