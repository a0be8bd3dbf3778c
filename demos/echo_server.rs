//! Echo server.
//!
//! Accepts TCP connections and answers every `Chat` message with the same
//! text, upper-cased. Kind 1 is `Chat` on both ends.
//!
//! ```text
//! RUST_LOG=wirelink=debug cargo run --example echo_server -- --port 7000
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use wirelink::codec::{KindRegistry, Message};
use wirelink::{Connection, ConnectionConfig, HandlerRegistry, KindPrefixCodec, Router};

#[derive(Debug, Serialize, Deserialize)]
struct Chat {
    text: String,
}

impl Message for Chat {
    const NAME: &'static str = "Chat";
}

#[derive(Debug)]
struct Peer {
    addr: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("echo_server=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let port = parse_arg(&args, "--port").unwrap_or(7000);
    let addr: SocketAddr = ([127, 0, 0, 1], port).into();

    let mut kinds = KindRegistry::new();
    kinds.register_with_kind(Chat::NAME, 1)?;
    let kinds = Arc::new(kinds);

    let mut handlers = HandlerRegistry::new();
    handlers.on::<Chat, _, _>(&kinds, |chat, conn| async move {
        match conn.user_state::<Peer>() {
            Some(peer) => tracing::info!(connection = %conn.id(), peer = %peer.addr, "chat: {}", chat.text),
            None => tracing::info!(connection = %conn.id(), "chat: {}", chat.text),
        }
        conn.send(&Chat {
            text: chat.text.to_uppercase(),
        })
        .await
    })?;
    let router: Arc<dyn Router> = Arc::new(handlers);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("listening on {}", addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        let conn = Connection::builder()
            .codec(KindPrefixCodec)
            .kinds(kinds.clone())
            .config(ConnectionConfig {
                max_payload_size: 64 * 1024,
                ..Default::default()
            })
            .build(stream);
        conn.set_user_state(Arc::new(Peer { addr: peer }));
        conn.start_shared(router.clone())?;
        tracing::info!(connection = %conn.id(), %peer, "accepted");

        tokio::spawn(async move {
            conn.closed().await;
            tracing::info!(
                connection = %conn.id(),
                reason = ?conn.stop_reason(),
                "disconnected"
            );
        });
    }
}

fn parse_arg(args: &[String], flag: &str) -> Option<u16> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}
