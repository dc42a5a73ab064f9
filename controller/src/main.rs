mod host;
mod mqtt;
mod relays;
mod sensors;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
