//! Demo server: publishes to a known client on keypress and can run a
//! ping/pong round-trip benchmark against it. Start this first, then the
//! demo client.

use pipebus::{ChannelConfig, ClientId, CompositeServerBus, MessageRegistry, WireMessage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{info, warn};

const DEMO_CLIENT: &str = "demo-client";
const PING_PONG_ROUNDS: u32 = 10_000;

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

    let client_id = ClientId::new(DEMO_CLIENT)?;
    let bus = CompositeServerBus::with_config(registry, ChannelConfig::default());

    let _response_sub = bus
        .get_or_create(&client_id)
        .await
        .subscribe::<OneResponse, _, _>(|response| async move {
            info!("response received: {}", response.response);
        })
        .await?;

    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel();
    let _pong_sub = bus
        .get_or_create(&client_id)
        .await
        .subscribe::<Pong, _, _>(move |_pong| {
            let pong_tx = pong_tx.clone();
            async move {
                let _ = pong_tx.send(());
            }
        })
        .await?;

    info!("server ready; waiting for client {:?} to connect", DEMO_CLIENT);
    println!("press <m><enter> to send a message, <p><enter> to ping pong, <q><enter> to quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match line.trim() {
            "m" => {
                info!("sending hello message to client");
                bus.get_or_create(&client_id)
                    .await
                    .publish(&OneMessage {
                        message: "Hello from server".into(),
                    })
                    .await?;
            }
            "p" => ping_pong(&bus, &client_id, &mut pong_rx).await?,
            "q" => break,
            other => println!("unrecognized input {:?}", other),
        }
    }

    bus.shutdown().await;
    Ok(())
}

/// Run the sequential ping/pong benchmark: each round publishes one `Ping`
/// and waits for the client's `Pong` before the next.
async fn ping_pong(
    bus: &CompositeServerBus,
    client_id: &ClientId,
    pong_rx: &mut mpsc::UnboundedReceiver<()>,
) -> pipebus::Result<()> {
    let client_bus = bus.get_or_create(client_id).await;
    let start = Instant::now();

    for round in 0..PING_PONG_ROUNDS {
        client_bus.publish(&Ping).await?;
        if timeout(Duration::from_secs(5), pong_rx.recv()).await.is_err() {
            warn!(
                "no pong after round {}; is the demo client running?",
                round
            );
            return Ok(());
        }
    }

    info!(
        "ping pong: {} round trips in {:?}",
        PING_PONG_ROUNDS,
        start.elapsed()
    );
    Ok(())
}
