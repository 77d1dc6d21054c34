//! The `Broadcaster` contract and a thin ARC-style HTTP client.
//!
//! **Reference**: wallet-services `broadcaster::arc`
//! (`crates/wallet-services/src/broadcaster/arc.rs`); this crate keeps the
//! same POST-raw-tx-hex shape but drops ARC-specific config (callback URLs,
//! deployment IDs) that belongs to that teacher's broader service layer.

use crate::transaction::Transaction;
use async_trait::async_trait;

/// A successful broadcast response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastSuccess {
    pub txid: String,
    pub message: String,
}

/// A rejected or failed broadcast attempt, surfaced to callers unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastFailure {
    pub code: String,
    pub description: String,
}

/// Submits a transaction to the network. Implementations may suspend on
/// network I/O; errors are returned, never unwound as panics.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, tx: &Transaction) -> Result<BroadcastSuccess, BroadcastFailure>;
}

#[derive(serde::Deserialize)]
struct ArcResponse {
    txid: String,
    #[serde(default)]
    title: String,
    #[serde(rename = "extraInfo", default)]
    extra_info: Option<String>,
}

/// A thin ARC (BSV Blockchain Transaction Processor) broadcaster: POSTs the
/// raw tx hex and reports back the txid ARC assigned.
pub struct ArcBroadcaster {
    url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl ArcBroadcaster {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            url: url.into(),
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Broadcaster for ArcBroadcaster {
    async fn broadcast(&self, tx: &Transaction) -> Result<BroadcastSuccess, BroadcastFailure> {
        let raw_tx_hex = tx.to_hex().map_err(|e| BroadcastFailure {
            code: "ERR_SERIALIZE".to_string(),
            description: e.to_string(),
        })?;

        let mut req = self
            .client
            .post(format!("{}/v1/tx", self.url))
            .json(&serde_json::json!({ "rawTx": raw_tx_hex }));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| BroadcastFailure {
            code: "ERR_NETWORK".to_string(),
            description: e.to_string(),
        })?;

        if !resp.status().is_success() {
            let code = resp.status().to_string();
            let description = resp.text().await.unwrap_or_default();
            return Err(BroadcastFailure { code, description });
        }

        let parsed: ArcResponse = resp.json().await.map_err(|e| BroadcastFailure {
            code: "ERR_DECODE".to_string(),
            description: e.to_string(),
        })?;

        Ok(BroadcastSuccess {
            txid: parsed.txid,
            message: parsed.extra_info.unwrap_or(parsed.title),
        })
    }
}

impl Transaction {
    /// Broadcasts via `broadcaster`, surfacing its result unchanged.
    pub async fn broadcast(
        &self,
        broadcaster: &dyn Broadcaster,
    ) -> Result<BroadcastSuccess, BroadcastFailure> {
        broadcaster.broadcast(self).await
    }
}
