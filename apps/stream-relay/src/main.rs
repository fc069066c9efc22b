//! Stream Relay Service - Entry Point
//!
//! Produces order events through a producer daemon and consumes them again.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    stream_relay::run().await
}
