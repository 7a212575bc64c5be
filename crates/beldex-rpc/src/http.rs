//! Blocking [`DaemonClient`] over the async JSON-RPC client.
//!
//! Each call drives a private current-thread runtime, so the adapter can be
//! used from plain threads (the wallet's refresh and long-poll threads).

use crate::client::{RpcClient, RpcConfig};
use crate::daemon::{ChainHeight, DaemonClient, OutputDistribution, OutputKey, SubmitResult};
use crate::error::RpcError;
use beldex_types::{Block, BlockHash, BnsRecordInfo, Hash, KeyImage, TxEntry};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

pub struct HttpDaemon {
    client: RpcClient,
    runtime: tokio::runtime::Runtime,
}

#[derive(Deserialize)]
struct InfoResponse {
    height: u64,
    #[serde(default)]
    target_height: u64,
}

#[derive(Deserialize)]
struct SendRawResponse {
    status: String,
    #[serde(default)]
    reason: String,
}

fn field<T: DeserializeOwned>(mut value: Value, name: &str) -> Result<T, RpcError> {
    let inner = value
        .get_mut(name)
        .map(Value::take)
        .ok_or_else(|| RpcError::NoResult { context: name.to_string() })?;
    Ok(serde_json::from_value(inner)?)
}

impl HttpDaemon {
    pub fn new(config: RpcConfig) -> Result<Self, RpcError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| RpcError::Other(format!("failed to start runtime: {e}")))?;
        Ok(Self { client: RpcClient::with_config(config)?, runtime })
    }

    pub fn url(&self) -> &str {
        self.client.url()
    }

    fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.runtime.block_on(self.client.call(method, params))
    }

    fn post(&self, endpoint: &str, body: Value) -> Result<Value, RpcError> {
        self.runtime.block_on(self.client.post(endpoint, &body))
    }
}

impl DaemonClient for HttpDaemon {
    fn get_height(&self) -> Result<ChainHeight, RpcError> {
        let info: InfoResponse = serde_json::from_value(self.call("get_info", json!({}))?)?;
        Ok(ChainHeight { height: info.height, target_height: info.target_height })
    }

    fn get_blocks(&self, start_height: u64, max_count: usize) -> Result<Vec<Block>, RpcError> {
        let res = self.call("get_blocks_range", json!({ "start_height": start_height, "max_count": max_count }))?;
        field(res, "blocks")
    }

    fn get_hashes(&self, start_height: u64, max_count: usize) -> Result<Vec<BlockHash>, RpcError> {
        let res = self.call("get_hashes_range", json!({ "start_height": start_height, "max_count": max_count }))?;
        field(res, "hashes")
    }

    fn submit_transaction(&self, blob: &str) -> Result<SubmitResult, RpcError> {
        let res: SendRawResponse =
            serde_json::from_value(self.post("/send_raw_transaction", json!({ "tx_as_hex": blob }))?)?;
        if res.status == "OK" {
            Ok(SubmitResult::Accepted)
        } else if res.status == "BUSY" {
            Err(RpcError::Busy { context: "send_raw_transaction".into() })
        } else {
            Ok(SubmitResult::Rejected(if res.reason.is_empty() { res.status } else { res.reason }))
        }
    }

    fn get_transactions(&self, hashes: &[Hash]) -> Result<Vec<Option<TxEntry>>, RpcError> {
        let hex_hashes: Vec<String> = hashes.iter().map(hex::encode).collect();
        let res = self.post("/get_transactions", json!({ "txs_hashes": hex_hashes }))?;
        field(res, "txs")
    }

    fn get_output_distribution(&self) -> Result<OutputDistribution, RpcError> {
        let res = self.call("get_output_distribution", json!({ "cumulative": true }))?;
        field(res, "distribution")
    }

    fn get_outputs(&self, indices: &[u64]) -> Result<Vec<OutputKey>, RpcError> {
        let res = self.post("/get_outs", json!({ "indices": indices }))?;
        field(res, "outs")
    }

    fn is_key_image_spent(&self, key_images: &[KeyImage]) -> Result<Vec<bool>, RpcError> {
        let hex_images: Vec<String> = key_images.iter().map(hex::encode).collect();
        let res = self.post("/is_key_image_spent", json!({ "key_images": hex_images }))?;
        let status: Vec<u8> = field(res, "spent_status")?;
        Ok(status.into_iter().map(|s| s != 0).collect())
    }

    fn lookup_bns(&self, name_hash: &Hash) -> Result<Option<BnsRecordInfo>, RpcError> {
        let res = self.call("bns_lookup", json!({ "name_hash": hex::encode(name_hash) }))?;
        field(res, "record")
    }
}
