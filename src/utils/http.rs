use std::time::Duration;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use reqwest::{Client, Proxy};
use tracing::info;

const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

static HTTP_CLIENT: OnceCell<Client> = OnceCell::new();

fn build_client(proxy_url: Option<&str>) -> Result<Client> {
    let mut builder = Client::builder().timeout(HTTP_TIMEOUT);
    if let Some(proxy_url) = proxy_url {
        let proxy = Proxy::all(proxy_url).context("invalid proxy address")?;
        builder = builder.proxy(proxy);
    }
    builder.build().context("failed to build HTTP client")
}

/// Builds the shared outbound client once at startup. Later calls are ignored.
pub fn init_http_client(proxy_url: Option<&str>) -> Result<()> {
    let client = build_client(proxy_url)?;
    if HTTP_CLIENT.set(client).is_ok() && proxy_url.is_some() {
        info!("Outbound HTTP client configured with proxy");
    }
    Ok(())
}

pub fn get_http_client() -> &'static Client {
    HTTP_CLIENT.get_or_init(|| {
        Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default()
    })
}
