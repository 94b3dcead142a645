//! JSON-over-HTTP ledger client.
//!
//! Talks to a signing relay that fronts the ledger. The relay owns keys and
//! nonces; this client only issues requests and interprets status codes:
//! transport failures and 5xx are `Unavailable`, 409 is `NonceConflict`,
//! any other 4xx is `Rejected`.

use crate::ledger::{LedgerClient, LedgerError, LedgerResult, Receipt, TxHandle};
use async_trait::async_trait;
use repmine_core::{Address, ChangeLogEntry, Digest, LedgerConfig, SequenceNumber};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct RootResponse {
    root: Digest,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WindowResponse {
    opened_at: u64,
}

#[derive(Debug, Deserialize)]
struct BlockResponse {
    timestamp: u64,
}

#[derive(Debug, Deserialize)]
struct SubmissionResponse {
    root: Option<Digest>,
}

#[derive(Debug, Deserialize)]
struct NonceResponse {
    nonce: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest {
    publisher: Address,
    root: Digest,
    key_count: u64,
}

#[derive(Debug, Serialize)]
struct ConfirmRequest {
    publisher: Address,
    round: u64,
    nonce: Option<u64>,
}

/// Ledger client backed by the relay's HTTP API
#[derive(Debug, Clone)]
pub struct HttpLedgerClient {
    client: Client,
    base_url: String,
    publisher: Address,
    receipt_poll: Duration,
}

impl HttpLedgerClient {
    pub fn new(config: &LedgerConfig, publisher: Address) -> LedgerResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("repmine/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| LedgerError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

        info!(url = %config.url, publisher = %publisher, "Ledger client configured");

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            publisher,
            receipt_poll: config.receipt_poll_interval(),
        })
    }

    pub fn publisher(&self) -> Address {
        self.publisher
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> LedgerResult<T> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> LedgerResult<T> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }
}

fn transport_error(e: reqwest::Error) -> LedgerError {
    LedgerError::Unavailable(e.to_string())
}

/// Classify a non-success status.
pub(crate) fn status_error(status: StatusCode, body: &str) -> LedgerError {
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body)
    };
    if status == StatusCode::CONFLICT {
        LedgerError::NonceConflict(detail)
    } else if status.is_client_error() {
        LedgerError::Rejected(detail)
    } else {
        LedgerError::Unavailable(detail)
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> LedgerResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(status, &body));
    }
    response
        .json()
        .await
        .map_err(|e| LedgerError::Malformed(e.to_string()))
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn current_root(&self) -> LedgerResult<Digest> {
        let response: RootResponse = self.get_json("/root").await?;
        Ok(response.root)
    }

    async fn window_open_timestamp(&self) -> LedgerResult<u64> {
        let response: WindowResponse = self.get_json("/window").await?;
        Ok(response.opened_at)
    }

    async fn current_block_timestamp(&self) -> LedgerResult<u64> {
        let response: BlockResponse = self.get_json("/block/latest").await?;
        Ok(response.timestamp)
    }

    async fn pending_change_log(
        &self,
        after: Option<SequenceNumber>,
    ) -> LedgerResult<Vec<ChangeLogEntry>> {
        let path = match after {
            Some(sequence) => format!("/change-log?after={}", sequence),
            None => "/change-log".to_string(),
        };
        self.get_json(&path).await
    }

    async fn submitted_root(&self) -> LedgerResult<Option<Digest>> {
        let response: SubmissionResponse = self
            .get_json(&format!("/submissions/{}", self.publisher))
            .await?;
        Ok(response.root)
    }

    async fn submit_root(&self, root: Digest, key_count: u64) -> LedgerResult<TxHandle> {
        let request = SubmitRequest {
            publisher: self.publisher,
            root,
            key_count,
        };
        let tx: TxHandle = self.post_json("/submit", &request).await?;
        debug!(tx = %tx.hash, nonce = tx.nonce, %root, "Root submission broadcast");
        Ok(tx)
    }

    async fn confirm_root(&self, round: u64, nonce_override: Option<u64>) -> LedgerResult<TxHandle> {
        let request = ConfirmRequest {
            publisher: self.publisher,
            round,
            nonce: nonce_override,
        };
        let tx: TxHandle = self.post_json("/confirm", &request).await?;
        debug!(tx = %tx.hash, nonce = tx.nonce, round, "Root confirmation broadcast");
        Ok(tx)
    }

    async fn wait_for_inclusion(&self, tx: &TxHandle) -> LedgerResult<Receipt> {
        loop {
            let response = self
                .client
                .get(self.url(&format!("/receipts/{}", tx.hash)))
                .send()
                .await
                .map_err(transport_error)?;

            if response.status() == StatusCode::NOT_FOUND {
                tokio::time::sleep(self.receipt_poll).await;
                continue;
            }
            return decode(response).await;
        }
    }

    async fn next_nonce(&self) -> LedgerResult<u64> {
        let response: NonceResponse = self
            .get_json(&format!("/nonce/{}", self.publisher))
            .await?;
        Ok(response.nonce)
    }
}
