//! Advisory chain analysis.
//!
//! An [`Analyzer`] turns the chain into a short natural-language report about
//! integrity, throughput and anomalies. Analysis never mutates the chain and
//! its failure never blocks the ledger.
//!
//! Two analysers ship with the crate: [`LocalAuditor`] derives the report from
//! the chain alone, [`RemoteAnalyzer`] posts the chain summary to an external
//! text-analysis service.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::error::AnalysisError;
use crate::ledger::{audit, now_millis};
use crate::model::{Action, Priority, Record};
use crate::reconcile::pending;

/// Text returned when analysis fails or times out.
pub const FALLBACK_ANALYSIS: &str = "Analysis unavailable. Check the connection and try again.";

const URGENT_WINDOW_MS: i64 = 72 * 60 * 60 * 1000;

#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn summarize(&self, chain: &[Record]) -> Result<String, AnalysisError>;
}

/// Compact per-record view handed to analysers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainSummaryItem {
    pub id: u64,
    pub time: String,
    pub action: &'static str,
    #[serde(rename = "type")]
    pub exam_type: String,
    pub priority: &'static str,
    pub hash: String,
}

/// RFC 3339 rendering of a millisecond timestamp; raw millis if out of range.
pub fn format_millis(ms: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000)
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_else(|| ms.to_string())
}

pub fn summarize_chain(chain: &[Record]) -> Vec<ChainSummaryItem> {
    chain
        .iter()
        .map(|r| ChainSummaryItem {
            id: r.sequence_number,
            time: format_millis(r.created_at),
            action: r.payload.action.as_str(),
            exam_type: r.payload.exam_type.clone(),
            priority: r.payload.priority.as_str(),
            hash: format!("{}...", r.digest.chars().take(8).collect::<String>()),
        })
        .collect()
}

/// Run `analyzer` with a deadline; any failure becomes [`FALLBACK_ANALYSIS`].
pub async fn analyze_or_fallback(
    analyzer: &dyn Analyzer,
    chain: &[Record],
    timeout: Duration,
) -> String {
    let outcome = match tokio::time::timeout(timeout, analyzer.summarize(chain)).await {
        Ok(res) => res,
        Err(_) => Err(AnalysisError::Timeout),
    };
    match outcome {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "chain analysis failed");
            FALLBACK_ANALYSIS.to_string()
        }
    }
}

/// Built-in analyser that derives its report from the chain alone.
#[derive(Debug, Clone, Default)]
pub struct LocalAuditor {
    now: Option<i64>,
}

impl LocalAuditor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix "now" for pending-age checks.
    pub fn at(now: i64) -> Self {
        Self { now: Some(now) }
    }

    pub fn report(&self, chain: &[Record]) -> String {
        let now = self.now.unwrap_or_else(now_millis);
        let integrity = audit(chain);

        let mut lines = Vec::new();
        if integrity.valid {
            lines.push(format!(
                "Integrity: all {} records verified; hash links intact.",
                integrity.total_records
            ));
        } else {
            lines.push(format!(
                "Integrity: COMPROMISED, {} violation(s), first at record {}.",
                integrity.violations.len(),
                integrity.first_invalid().unwrap_or_default()
            ));
        }

        let mut booked_at: HashMap<&str, i64> = HashMap::new();
        let mut fulfillments: HashMap<&str, usize> = HashMap::new();
        let mut orphans = Vec::new();
        let mut latencies: Vec<i128> = Vec::new();
        let mut bookings = 0usize;

        for r in chain.iter().filter(|r| !r.is_genesis()) {
            let nre = r.payload.nre.as_str();
            match r.payload.action {
                Action::Creation => {
                    bookings += 1;
                    booked_at.entry(nre).or_insert(r.created_at);
                }
                Action::Fulfillment => {
                    *fulfillments.entry(nre).or_default() += 1;
                    match booked_at.get(nre) {
                        Some(&t) => latencies.push(i128::from(r.created_at) - i128::from(t)),
                        None => orphans.push(r.sequence_number),
                    }
                }
                Action::Update => {}
            }
        }

        let open = pending(chain);
        let fulfilled: usize = fulfillments.values().sum();
        let mut throughput = format!(
            "Throughput: {bookings} booking(s), {fulfilled} fulfillment(s), {} pending.",
            open.len()
        );
        if !latencies.is_empty() {
            // Timestamps are arbitrary i64; widen so differences and sums cannot overflow.
            let mean = latencies.iter().sum::<i128>() / latencies.len() as i128;
            throughput.push_str(&format!(
                " Mean booking-to-fulfillment time: {:.1} min.",
                mean as f64 / 60_000.0
            ));
        }
        lines.push(throughput);

        let mut anomalies = Vec::new();
        for seq in orphans {
            anomalies.push(format!("record {seq} fulfils a request with no prior booking"));
        }
        let mut duplicated: Vec<_> = fulfillments.iter().filter(|(_, n)| **n > 1).collect();
        duplicated.sort();
        for (nre, n) in duplicated {
            anomalies.push(format!("request {nre} fulfilled {n} times"));
        }
        for w in &integrity.warnings {
            anomalies.push(w.to_string());
        }
        let overdue = |r: &Record| {
            r.payload.priority == Priority::U
                && i128::from(now) - i128::from(r.created_at) > i128::from(URGENT_WINDOW_MS)
        };
        for r in open.iter().filter(|r| overdue(r)) {
            anomalies.push(format!(
                "urgent request {} pending beyond 72h (record {})",
                r.payload.nre, r.sequence_number
            ));
        }

        if anomalies.is_empty() {
            lines.push("Anomalies: none detected.".into());
        } else {
            lines.push("Anomalies:".into());
            lines.extend(anomalies.into_iter().map(|a| format!("- {a}")));
        }
        lines.join("\n")
    }
}

#[async_trait]
impl Analyzer for LocalAuditor {
    async fn summarize(&self, chain: &[Record]) -> Result<String, AnalysisError> {
        Ok(self.report(chain))
    }
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    chain: &'a [ChainSummaryItem],
}

#[derive(Deserialize)]
struct AnalyzeResponse {
    #[serde(default)]
    analysis: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Analyser backed by an HTTP text-analysis service.
///
/// POSTs `{"chain": [ChainSummaryItem...]}` to `url` and expects
/// `{"analysis": "..."}` back. Transport failures, non-2xx statuses and empty
/// answers are all [`AnalysisError::Unavailable`].
#[derive(Debug, Clone)]
pub struct RemoteAnalyzer {
    client: reqwest::Client,
    url: String,
}

impl RemoteAnalyzer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Analyzer for RemoteAnalyzer {
    async fn summarize(&self, chain: &[Record]) -> Result<String, AnalysisError> {
        let summary = summarize_chain(chain);
        let response = self
            .client
            .post(&self.url)
            .json(&AnalyzeRequest { chain: &summary })
            .send()
            .await?;

        let status = response.status();
        let body: Option<AnalyzeResponse> = response.json().await.ok();
        if !status.is_success() {
            let detail = body
                .and_then(|b| b.error)
                .unwrap_or_else(|| "no detail".to_string());
            return Err(AnalysisError::Unavailable(format!("status {status}: {detail}")));
        }

        body.and_then(|b| b.analysis)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| AnalysisError::Unavailable("empty analysis".into()))
    }
}
