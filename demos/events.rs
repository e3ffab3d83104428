//! Events - watch clients join and leave a virtual server.
//!
//! This demo shows:
//! - Registering notification handlers with `.on()` and `subscribe()`
//! - Keeping a local client mirror in sync with `EntityCache`
//! - Reacting to lifecycle events from `client.events()`
//!
//! # Running
//!
//! ```sh
//! SQ_USER=serveradmin SQ_PASSWORD=secret RUST_LOG=info \
//!     cargo run --example events -- 127.0.0.1:10011
//! ```

use std::sync::{Arc, Mutex};

use serverquery_client::mirror::int_key;
use serverquery_client::protocol::DEFAULT_QUERY_PORT;
use serverquery_client::{
    filter, CachedEntity, Client, ClientEvent, Command, Criterion, EntityCache, Value,
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| format!("127.0.0.1:{DEFAULT_QUERY_PORT}"));

    // Membership changes trigger a fresh clientlist snapshot
    let (refresh_tx, mut refresh_rx) = mpsc::unbounded_channel::<()>();
    let on_enter = refresh_tx.clone();

    let client = Client::builder()
        .on("cliententerview", move |notification| {
            if let Some(record) = notification.first() {
                tracing::info!("joined: {:?}", record.get("client_nickname"));
            }
            let _ = on_enter.send(());
        })
        .connect(&addr)
        .await?;
    let client = Arc::new(client);

    let on_leave = refresh_tx;
    client.subscribe("clientleftview", move |notification| {
        if let Some(record) = notification.first() {
            tracing::info!("left: clid {:?}", record.get("clid"));
        }
        let _ = on_leave.send(());
    });

    if let (Ok(user), Ok(password)) = (std::env::var("SQ_USER"), std::env::var("SQ_PASSWORD")) {
        client.login(&user, &password).await?;
    }
    client.use_server(1).await?;
    client.register_event("server", None).await?;

    let mirror: Arc<Mutex<EntityCache<i64, CachedEntity<i64, Client>>>> = Arc::default();
    let mut events = client.events();

    let _ = refresh_mirror(&client, &mirror).await;
    loop {
        tokio::select! {
            Some(()) = refresh_rx.recv() => {
                if let Err(e) = refresh_mirror(&client, &mirror).await {
                    tracing::warn!("clientlist failed: {}", e);
                }
            }
            event = events.recv() => match event {
                Ok(ClientEvent::Closed(reason)) => {
                    tracing::info!("connection closed: {}", reason);
                    break;
                }
                Ok(ClientEvent::ProtocolError(e)) => tracing::warn!("keepalive failed: {}", e),
                Ok(ClientEvent::Ready) | Err(_) => {}
            },
            _ = tokio::signal::ctrl_c() => {
                client.quit().await?;
                break;
            }
        }
    }

    Ok(())
}

/// Fetch a clientlist snapshot and reconcile the mirror with it.
async fn refresh_mirror(
    client: &Arc<Client>,
    mirror: &Mutex<EntityCache<i64, CachedEntity<i64, Client>>>,
) -> serverquery_client::Result<()> {
    let snapshot = client.submit_cached(&Command::new("clientlist")).await?;

    let mut mirror = mirror.lock().unwrap_or_else(|e| e.into_inner());
    let current = mirror.reconcile(&snapshot, int_key("clid"), |record| {
        let key = record.get("clid").and_then(Value::as_int).unwrap_or_default();
        CachedEntity::new(key, record.clone(), client)
    });

    let humans = filter(current, &[("client_type", Criterion::Exact(Value::Int(0)))]);
    tracing::info!("{} clients online", humans.len());
    Ok(())
}
