//! Whoami - connect, log in and print the session identity.
//!
//! This demo shows:
//! - Loading a `ClientConfig` from JSON
//! - Logging in and selecting a virtual server
//! - Coalesced read-only commands via `submit_cached`
//!
//! # Running
//!
//! ```sh
//! SQ_USER=serveradmin SQ_PASSWORD=secret \
//! RUST_LOG=serverquery_client=debug \
//!     cargo run --example whoami -- 127.0.0.1:10011
//! ```
//!
//! Set `SQ_CONFIG` to a JSON file to override the defaults.

use serverquery_client::protocol::DEFAULT_QUERY_PORT;
use serverquery_client::{ClientBuilder, ClientConfig, Command};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| format!("127.0.0.1:{DEFAULT_QUERY_PORT}"));

    let config = match std::env::var("SQ_CONFIG") {
        Ok(path) => ClientConfig::from_json_str(&std::fs::read_to_string(path)?)?,
        Err(_) => ClientConfig::default(),
    };

    let client = ClientBuilder::from_config(config).connect(&addr).await?;

    if let (Ok(user), Ok(password)) = (std::env::var("SQ_USER"), std::env::var("SQ_PASSWORD")) {
        client.login(&user, &password).await?;
        client.use_server(1).await?;
    }

    let version = client.version().await?;
    println!("server version: {:?}", version.get("version"));

    let me = client.whoami().await?;
    for (key, value) in &me {
        println!("{key} = {value}");
    }

    // Both calls share one round trip
    let info = Command::new("serverinfo");
    let (a, b) = tokio::join!(client.submit_cached(&info), client.submit_cached(&info));
    if let (Ok(a), Ok(b)) = (a, b) {
        println!("serverinfo shared: {}", std::sync::Arc::ptr_eq(&a, &b));
    }

    client.quit().await?;
    Ok(())
}
