//! Demo client: echoes any received message back to the server and answers
//! every ping with a pong. Run after the demo server is listening.

use pipebus::{ChannelConfig, ClientBus, ClientId, MessageRegistry, WireMessage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

const DEMO_CLIENT: &str = "demo-client";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OneMessage {
    message: String,
}

impl WireMessage for OneMessage {
    const TYPE_TAG: &'static str = "demo.one_message";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OneResponse {
    response: String,
}

impl WireMessage for OneResponse {
    const TYPE_TAG: &'static str = "demo.one_response";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Ping;

impl WireMessage for Ping {
    const TYPE_TAG: &'static str = "demo.ping";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Pong;

impl WireMessage for Pong {
    const TYPE_TAG: &'static str = "demo.pong";
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let registry = Arc::new(MessageRegistry::new());
    registry.register::<OneMessage>()?;
    registry.register::<OneResponse>()?;
    registry.register::<Ping>()?;
    registry.register::<Pong>()?;

    let bus = Arc::new(ClientBus::with_config(
        ClientId::new(DEMO_CLIENT)?,
        registry,
        ChannelConfig::default(),
    ));

    let echo_bus = bus.clone();
    let _message_sub = bus
        .subscribe::<OneMessage, _, _>(move |message| {
            let bus = echo_bus.clone();
            async move {
                info!("message received: {}", message.message);
                let echo = OneResponse {
                    response: format!("echo: {}", message.message),
                };
                if let Err(e) = bus.publish(&echo).await {
                    warn!("failed to echo message: {}", e);
                }
            }
        })
        .await?;

    let pong_bus = bus.clone();
    let _ping_sub = bus
        .subscribe::<Ping, _, _>(move |_ping| {
            let bus = pong_bus.clone();
            async move {
                if let Err(e) = bus.publish(&Pong).await {
                    warn!("failed to answer ping: {}", e);
                }
            }
        })
        .await?;

    info!("client {:?} connected; press ctrl-c to exit", DEMO_CLIENT);
    tokio::signal::ctrl_c().await?;

    bus.shutdown().await;
    Ok(())
}
