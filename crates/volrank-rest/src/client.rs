//! HTTP client for the exchange REST API.
//!
//! Executes [`RequestDescriptor`]s and maps responses onto [`RestError`]:
//! non-2xx statuses carry the parsed error body, network failures carry
//! the underlying `reqwest` error.

use crate::error::{RestError, RestResult};
use crate::signer::{RequestDescriptor, RequestSigner};
use crate::types::{AccountInfo, ListenKeyResponse, Ticker24hr};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const ACCOUNT_PATH: &str = "/api/v3/account";
const TICKER_24HR_PATH: &str = "/api/v3/ticker/24hr";
const USER_DATA_STREAM_PATH: &str = "/api/v3/userDataStream";

/// Client bound to one API host.
#[derive(Debug, Clone)]
pub struct ExchangeClient {
    client: Client,
    signer: RequestSigner,
}

impl ExchangeClient {
    /// Create a new client around `signer`.
    pub fn new(signer: RequestSigner) -> RestResult<Self> {
        Self::with_timeout(signer, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(signer: RequestSigner, timeout: Duration) -> RestResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, signer })
    }

    pub fn signer(&self) -> &RequestSigner {
        &self.signer
    }

    pub fn base_url(&self) -> &str {
        self.signer.base_url()
    }

    /// Send a described request and decode the JSON body.
    pub async fn execute<T: DeserializeOwned>(&self, request: &RequestDescriptor) -> RestResult<T> {
        debug!(method = %request.method, path = %request.path, "Sending request");

        let mut builder = self.client.request(request.method.clone(), request.url());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let body = serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text));
            return Err(RestError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_str(&text)?)
    }

    /// Account snapshot (signed).
    pub async fn account(&self) -> RestResult<AccountInfo> {
        let request = self.signer.signed(Method::GET, ACCOUNT_PATH, &[])?;
        self.execute(&request).await
    }

    /// 24h rolling statistics for every listed pair (public).
    pub async fn ticker_24hr(&self) -> RestResult<Vec<Ticker24hr>> {
        let request = self.signer.public(Method::GET, TICKER_24HR_PATH, &[]);
        let tickers: Vec<Ticker24hr> = self.execute(&request).await?;
        info!(count = tickers.len(), "Fetched 24h ticker snapshot");
        Ok(tickers)
    }

    /// Open a user-data session and return its listen key.
    pub async fn create_listen_key(&self) -> RestResult<String> {
        let request = self.signer.keyed(Method::POST, USER_DATA_STREAM_PATH, &[])?;
        let response: ListenKeyResponse = self.execute(&request).await?;
        Ok(response.listen_key)
    }

    /// Extend the validity of `listen_key`.
    pub async fn renew_listen_key(&self, listen_key: &str) -> RestResult<()> {
        let request = self.signer.keyed(
            Method::PUT,
            USER_DATA_STREAM_PATH,
            &[("listenKey", listen_key)],
        )?;
        let _: serde_json::Value = self.execute(&request).await?;
        Ok(())
    }

    /// Close the user-data session.
    pub async fn close_listen_key(&self, listen_key: &str) -> RestResult<()> {
        let request = self.signer.keyed(
            Method::DELETE,
            USER_DATA_STREAM_PATH,
            &[("listenKey", listen_key)],
        )?;
        let _: serde_json::Value = self.execute(&request).await?;
        Ok(())
    }
}
