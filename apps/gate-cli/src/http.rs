//! Client for the device's signed HTTP control API.

use anyhow::{Context, bail};
use chrono::Utc;
use reqwest::Url;
use tracing::debug;

use gate_protocol::GateAction;
use gate_protocol::signing::{
    API_KEY_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER, api_path, signed_headers,
};

/// Triggers `action` on the device at `base_url`.
///
/// The signature covers the full request path, so a base URL with a path
/// prefix is signed as sent.
pub async fn send_signed(
    client: &reqwest::Client,
    base_url: &str,
    action: GateAction,
    secret: &str,
    api_key: Option<&str>,
) -> anyhow::Result<()> {
    let url = Url::parse(&format!(
        "{}{}",
        base_url.trim_end_matches('/'),
        api_path(action)
    ))
    .with_context(|| format!("invalid device URL {base_url}"))?;
    let headers = signed_headers(url.path(), secret, Utc::now())?;

    let mut req = client
        .get(url.clone())
        .header(TIMESTAMP_HEADER, headers.timestamp)
        .header(SIGNATURE_HEADER, headers.signature);
    if let Some(key) = api_key {
        req = req.header(API_KEY_HEADER, key);
    }

    debug!(%url, "sending signed request");
    let resp = req
        .send()
        .await
        .with_context(|| format!("requesting {url}"))?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("request failed with status: {status} {}", body.trim());
    }
    Ok(())
}
