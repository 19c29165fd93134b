//! REST client for the aggregator API (spec.md §4.2, §6).
//!
//! Grounded on `original_source/neurons/aggregator_client.py`: same
//! endpoints, same retry/backoff policy, same canonical payload format.
//! The Rust port uses one shared `reqwest::Client` instead of a
//! session-per-request, since `reqwest` has no per-event-loop lifetime
//! concern (spec.md §9 "Per-loop async primitives" does not apply here).

use std::collections::HashMap;
use std::time::Duration;

use log::{error, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AggregatorError;
use crate::model::{EpochStats, Order};

pub struct AggregatorClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    max_retries: u32,
    backoff_seconds: u64,
    page_limit: u32,
}

#[derive(Debug, Deserialize)]
pub struct HealthDoc {
    pub status: String,
    #[serde(default)]
    pub storage: StorageHealth,
}

#[derive(Debug, Default, Deserialize)]
pub struct StorageHealth {
    #[serde(default)]
    pub healthy: bool,
}

impl HealthDoc {
    /// Aggregator is healthy iff `status` is one of `healthy`/`ok` and
    /// storage reports healthy (spec.md §4.6 step 1).
    pub fn is_healthy(&self) -> bool {
        matches!(self.status.as_str(), "healthy" | "ok") && self.storage.healthy
    }
}

#[derive(Debug, Serialize)]
struct SubmitValidationBody<'a> {
    #[serde(rename = "orderId")]
    order_id: &'a str,
    #[serde(rename = "validatorId")]
    validator_id: &'a str,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    notes: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct SubmitWeightsStats {
    #[serde(rename = "totalSimulations")]
    total_simulations: usize,
    #[serde(rename = "validMiners")]
    valid_miners: usize,
    #[serde(rename = "totalMiners")]
    total_miners: usize,
    #[serde(rename = "burnPercentage")]
    burn_percentage: f64,
    #[serde(rename = "weightsSum")]
    weights_sum: f64,
}

#[derive(Debug, Serialize)]
struct SubmitWeightsBody<'a> {
    #[serde(rename = "validatorId")]
    validator_id: &'a str,
    #[serde(rename = "epochKey")]
    epoch_key: &'a str,
    timestamp: &'a str,
    weights: &'a HashMap<String, f64>,
    stats: SubmitWeightsStats,
    signature: String,
    #[serde(rename = "signatureType")]
    signature_type: &'a str,
    #[serde(rename = "blockNumber", skip_serializing_if = "Option::is_none")]
    block_number: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionReceipt {
    #[serde(rename = "weightSubmissionId", default)]
    pub weight_submission_id: Option<String>,
    #[serde(flatten)]
    pub extra: Value,
}

/// Formats a weight value with up to 12 fractional digits, trailing zeros
/// stripped, `"0"` if the result would otherwise be empty (spec.md §4.2).
fn format_decimal(value: f64) -> String {
    let s = format!("{value:.12}");
    let trimmed = s.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() {
        "0".to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// Builds the deterministic newline-delimited string signed for
/// `submit_weights` (spec.md §4.2). Byte-identical for identical inputs.
pub fn canonical_weights_payload(
    validator_id: &str,
    epoch_key: &str,
    timestamp: &str,
    block_number: Option<u64>,
    weights: &HashMap<String, f64>,
    stats: &EpochStats,
) -> String {
    let mut sorted: Vec<(&String, &f64)> = weights.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let keys_line = sorted
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(",");
    let values_line = sorted
        .iter()
        .map(|(_, v)| format_decimal(**v))
        .collect::<Vec<_>>()
        .join(",");

    let weights_line = if keys_line.is_empty() {
        ":".to_owned()
    } else {
        format!("{keys_line}:{values_line}")
    };

    let block_line = block_number.map(|b| b.to_string()).unwrap_or_default();

    [
        "validator-weights".to_owned(),
        validator_id.to_owned(),
        epoch_key.to_owned(),
        timestamp.to_owned(),
        block_line,
        weights_line,
        stats.total_simulations.to_string(),
        stats.valid_miners.to_string(),
        stats.total_miners.to_string(),
        format_decimal(stats.burn_percentage),
    ]
    .join("\n")
}

impl AggregatorClient {
    pub fn new(
        base_url: impl Into<String> + Clone,
        api_key: impl Into<String>,
        timeout_seconds: u64,
        verify_ssl: bool,
        max_retries: u32,
        backoff_seconds: u64,
        page_limit: u32,
    ) -> Result<Self, AggregatorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .danger_accept_invalid_certs(!verify_ssl)
            .build()
            .map_err(|e| AggregatorError::Transport(base_url.clone().into(), e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key: api_key.into(),
            client,
            max_retries,
            backoff_seconds,
            page_limit: page_limit.clamp(1, 1000),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Issues `method` to `path`, retrying transport errors and non-2xx
    /// responses up to `max_retries + 1` total attempts with linear
    /// backoff. Per spec.md §9 Open Questions, retrying 4xx is the
    /// original behavior and is preserved here pending server contract
    /// confirmation.
    async fn request_json<T: for<'de> Deserialize<'de>>(
        &self,
        method: reqwest::Method,
        path: &str,
        query: Option<&[(&str, String)]>,
        body: Option<&impl Serialize>,
    ) -> Result<T, AggregatorError> {
        let url = self.url(path);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let mut req = self
                .client
                .request(method.clone(), &url)
                .header("X-API-Key", &self.api_key);
            if let Some(q) = query {
                req = req.query(q);
            }
            if let Some(b) = body {
                req = req.json(b);
            }

            let outcome = async {
                let resp = req
                    .send()
                    .await
                    .map_err(|e| AggregatorError::Transport(url.clone(), e.to_string()))?;
                let status = resp.status();
                if !status.is_success() {
                    let body_text = resp.text().await.unwrap_or_default();
                    return Err(AggregatorError::Http {
                        url: url.clone(),
                        status: status.as_u16(),
                        body: body_text,
                    });
                }
                resp.json::<T>()
                    .await
                    .map_err(|e| AggregatorError::InvalidJson {
                        url: url.clone(),
                        source: serde_json::Error::io(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            e.to_string(),
                        )),
                    })
            }
            .await;

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if attempt > self.max_retries => {
                    error!(target: "aggregator", "request to {url} failed after {attempt} attempts: {e}");
                    return Err(e);
                }
                Err(e) => {
                    warn!(target: "aggregator", "request to {url} failed (attempt {attempt}): {e}, retrying");
                    tokio::time::sleep(Duration::from_secs(self.backoff_seconds * attempt as u64))
                        .await;
                }
            }
        }
    }

    /// `GET /v1/validators/orders?validator_id=<id>`. Empty list on
    /// transport error (spec.md §4.2).
    pub async fn fetch_pending_orders(&self, validator_id: &str) -> Vec<Order> {
        let query = [
            ("validator_id", validator_id.to_owned()),
            ("limit", self.page_limit.to_string()),
        ];
        match self
            .request_json::<Vec<Order>>(
                reqwest::Method::GET,
                "/v1/validators/orders",
                Some(&query),
                None::<&()>,
            )
            .await
        {
            Ok(orders) => orders,
            Err(e) => {
                error!(target: "aggregator", "failed to fetch pending orders: {e}");
                Vec::new()
            }
        }
    }

    /// `POST /v1/validators/validate`. Returns whether the server accepted.
    pub async fn submit_validation(
        &self,
        order_id: &str,
        validator_id: &str,
        success: bool,
        notes: Option<&str>,
    ) -> bool {
        let body = SubmitValidationBody {
            order_id,
            validator_id,
            success,
            notes,
        };
        match self
            .request_json::<Value>(
                reqwest::Method::POST,
                "/v1/validators/validate",
                None,
                Some(&body),
            )
            .await
        {
            Ok(_) => true,
            Err(e) => {
                error!(target: "aggregator", "failed to submit validation for {order_id}: {e}");
                false
            }
        }
    }

    /// `GET /health`. Returns `None` on any failure (spec.md §4.2). Health
    /// failures never retry.
    pub async fn fetch_health(&self) -> Option<HealthDoc> {
        let resp = self
            .client
            .get(self.url("/health"))
            .header("X-API-Key", &self.api_key)
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            return None;
        }
        resp.json::<HealthDoc>().await.ok()
    }

    /// `POST /v1/validators/weights`, signed with the canonical payload.
    #[allow(clippy::too_many_arguments)]
    pub async fn submit_weights(
        &self,
        validator_id: &str,
        epoch_key: &str,
        weights: &HashMap<String, f64>,
        stats: &EpochStats,
        timestamp: &str,
        signature_hex: String,
        signature_type: &str,
        block_number: Option<u64>,
    ) -> Option<SubmissionReceipt> {
        let weights_sum: f64 = weights.values().sum();
        let body = SubmitWeightsBody {
            validator_id,
            epoch_key,
            timestamp,
            weights,
            stats: SubmitWeightsStats {
                total_simulations: stats.total_simulations,
                valid_miners: stats.valid_miners,
                total_miners: stats.total_miners,
                burn_percentage: stats.burn_percentage,
                weights_sum,
            },
            signature: signature_hex,
            signature_type,
            block_number,
        };

        match self
            .request_json::<SubmissionReceipt>(
                reqwest::Method::POST,
                "/v1/validators/weights",
                None,
                Some(&body),
            )
            .await
        {
            Ok(receipt) => Some(receipt),
            Err(e) => {
                error!(target: "aggregator", "failed to submit weights for {epoch_key}: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EpochStats;

    #[test]
    fn canonical_payload_matches_spec_example() {
        let mut weights = HashMap::new();
        weights.insert("zebra".to_owned(), 0.1);
        weights.insert("alpha".to_owned(), 0.3);
        weights.insert("middle".to_owned(), 0.6);
        let stats = EpochStats {
            total_simulations: 0,
            valid_miners: 0,
            total_miners: 0,
            burn_percentage: 0.0,
            burn_fallback: false,
            error: None,
        };

        let payload = canonical_weights_payload("V", "E", "T", Some(1), &weights, &stats);
        let lines: Vec<&str> = payload.split('\n').collect();
        assert_eq!(lines.len(), 10);
        assert_eq!(lines[0], "validator-weights");
        assert_eq!(lines[1], "V");
        assert_eq!(lines[2], "E");
        assert_eq!(lines[3], "T");
        assert_eq!(lines[4], "1");
        assert_eq!(lines[5], "alpha,middle,zebra:0.3,0.6,0.1");
        assert_eq!(lines[6], "0");
        assert_eq!(lines[7], "0");
        assert_eq!(lines[8], "0");
        assert_eq!(lines[9], "0");
    }

    #[test]
    fn canonical_payload_empty_weights_uses_bare_colon() {
        let weights = HashMap::new();
        let stats = EpochStats::default();
        let payload = canonical_weights_payload("V", "E", "T", None, &weights, &stats);
        let lines: Vec<&str> = payload.split('\n').collect();
        assert_eq!(lines[4], "");
        assert_eq!(lines[5], ":");
    }

    #[test]
    fn format_decimal_strips_trailing_zeros() {
        assert_eq!(format_decimal(0.3), "0.3");
        assert_eq!(format_decimal(0.0), "0");
        assert_eq!(format_decimal(1.0), "1");
    }
}
