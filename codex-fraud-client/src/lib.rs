//! Synchronous fraud-scoring client (§4.7). Three knobs: base URL, a hard
//! per-call timeout (the scorer sits on the write path), and a fallback
//! decision used when the remote is unreachable or non-2xx.

use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FraudClientError {
    #[error("failed to build HTTP client: {0}")]
    Configuration(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FraudDecision {
    Approve,
    Review,
    Block,
}

impl FraudDecision {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "APPROVE",
            Self::Review => "REVIEW",
            Self::Block => "BLOCK",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.to_uppercase().as_str() {
            "BLOCK" => Self::Block,
            "REVIEW" => Self::Review,
            _ => Self::Approve,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
    Unknown,
}

impl RiskLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Computed client-side from the numeric score rather than trusted from the
/// remote response, matching the source's `_map_risk_level`.
#[must_use]
pub fn risk_level_for_score(score: f64) -> RiskLevel {
    if score >= 0.8 {
        RiskLevel::Critical
    } else if score >= 0.6 {
        RiskLevel::High
    } else if score >= 0.3 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FraudScore {
    pub score: f64,
    pub decision: FraudDecision,
    pub risk_level: RiskLevel,
    pub reasons: Vec<String>,
    pub latency: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionScoringRequest {
    pub transaction_id: String,
    pub customer_id: String,
    pub amount: f64,
    pub currency: String,
    pub merchant_id: Option<String>,
    pub merchant_category: Option<String>,
    pub channel: String,
    pub country: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub transaction_type: String,
    pub description: String,
    pub metadata: Value,
}

#[derive(Serialize)]
struct ScoreRequestBody {
    transaction_id: String,
    #[serde(rename = "cif_id")]
    customer_id: String,
    amount: f64,
    currency: String,
    merchant_id: String,
    merchant_category: String,
    channel: String,
    country: String,
    timestamp: DateTime<Utc>,
    metadata: Value,
}

impl From<&TransactionScoringRequest> for ScoreRequestBody {
    fn from(request: &TransactionScoringRequest) -> Self {
        let mut metadata = match &request.metadata {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        metadata.insert(
            "transaction_type".to_string(),
            Value::String(request.transaction_type.clone()),
        );
        metadata.insert(
            "description".to_string(),
            Value::String(request.description.clone()),
        );

        Self {
            transaction_id: request.transaction_id.clone(),
            customer_id: request.customer_id.clone(),
            amount: request.amount,
            currency: request.currency.clone(),
            merchant_id: request.merchant_id.clone().unwrap_or_default(),
            merchant_category: request.merchant_category.clone().unwrap_or_default(),
            channel: request.channel.clone(),
            country: request.country.clone().unwrap_or_default(),
            timestamp: request.timestamp,
            metadata: Value::Object(metadata),
        }
    }
}

#[derive(Deserialize)]
struct ScoreResponseBody {
    #[serde(rename = "risk_score", default)]
    risk_score: f64,
    #[serde(rename = "action", default)]
    action: Option<String>,
    #[serde(default)]
    reasons: Vec<String>,
}

/// Synchronous client consumed on the transaction write path (§4.7).
#[async_trait]
pub trait FraudScorer: Send + Sync {
    async fn score(&self, request: TransactionScoringRequest) -> FraudScore;
    async fn health_check(&self) -> bool;
}

pub struct BastionFraudClient {
    base_url: String,
    timeout: Duration,
    api_key: Option<String>,
    enabled: bool,
    fallback_decision: FraudDecision,
    http: reqwest::Client,
}

impl BastionFraudClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, FraudClientError> {
        Self::builder(base_url).build()
    }

    #[must_use]
    pub fn builder(base_url: impl Into<String>) -> BastionFraudClientBuilder {
        BastionFraudClientBuilder {
            base_url: base_url.into(),
            timeout: Duration::from_secs(2),
            api_key: None,
            enabled: true,
            fallback_decision: FraudDecision::Approve,
        }
    }

    fn fallback(&self, latency: Duration) -> FraudScore {
        FraudScore {
            score: 0.0,
            decision: self.fallback_decision,
            risk_level: RiskLevel::Unknown,
            reasons: vec!["unavailable".to_string()],
            latency,
        }
    }
}

pub struct BastionFraudClientBuilder {
    base_url: String,
    timeout: Duration,
    api_key: Option<String>,
    enabled: bool,
    fallback_decision: FraudDecision,
}

impl BastionFraudClientBuilder {
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn fallback_decision(mut self, decision: FraudDecision) -> Self {
        self.fallback_decision = decision;
        self
    }

    pub fn build(self) -> Result<BastionFraudClient, FraudClientError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|err| FraudClientError::Configuration(err.to_string()))?;
        Ok(BastionFraudClient {
            base_url: self.base_url.trim_end_matches('/').to_string(),
            timeout: self.timeout,
            api_key: self.api_key,
            enabled: self.enabled,
            fallback_decision: self.fallback_decision,
            http,
        })
    }
}

#[async_trait]
impl FraudScorer for BastionFraudClient {
    async fn score(&self, request: TransactionScoringRequest) -> FraudScore {
        if !self.enabled {
            return FraudScore {
                score: 0.0,
                decision: FraudDecision::Approve,
                risk_level: RiskLevel::Low,
                reasons: vec!["fraud_scoring_disabled".to_string()],
                latency: Duration::ZERO,
            };
        }

        let start = Instant::now();
        let body = ScoreRequestBody::from(&request);
        let mut builder = self.http.post(format!("{}/score", self.base_url)).json(&body);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let outcome = tokio::time::timeout(self.timeout, builder.send()).await;
        let latency = start.elapsed();

        match outcome {
            Ok(Ok(response)) if response.status().is_success() => {
                match response.json::<ScoreResponseBody>().await {
                    Ok(parsed) => FraudScore {
                        score: parsed.risk_score,
                        decision: FraudDecision::parse(parsed.action.as_deref().unwrap_or("APPROVE")),
                        risk_level: risk_level_for_score(parsed.risk_score),
                        reasons: parsed.reasons,
                        latency,
                    },
                    Err(err) => {
                        tracing::error!(error = %err, "fraud scorer returned an unparsable response");
                        self.fallback(latency)
                    }
                }
            }
            Ok(Ok(response)) => {
                tracing::warn!(status = %response.status(), "fraud scorer returned a non-2xx response");
                self.fallback(latency)
            }
            Ok(Err(err)) => {
                tracing::error!(error = %err, "fraud scorer connection failed");
                self.fallback(latency)
            }
            Err(_) => {
                tracing::error!(timeout_ms = self.timeout.as_millis() as u64, "fraud scorer call timed out");
                self.fallback(latency)
            }
        }
    }

    async fn health_check(&self) -> bool {
        match self.http.get(format!("{}/health", self.base_url)).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

/// Scores purely on amount thresholds; required for tests and local
/// development per §4.7.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockFraudScorer;

#[async_trait]
impl FraudScorer for MockFraudScorer {
    async fn score(&self, request: TransactionScoringRequest) -> FraudScore {
        let latency = Duration::from_millis(1);
        if request.amount > 50_000.0 {
            FraudScore {
                score: 0.85,
                decision: FraudDecision::Block,
                risk_level: RiskLevel::Critical,
                reasons: vec!["high_amount".to_string()],
                latency,
            }
        } else if request.amount > 10_000.0 {
            FraudScore {
                score: 0.55,
                decision: FraudDecision::Review,
                risk_level: RiskLevel::High,
                reasons: vec!["large_amount".to_string()],
                latency,
            }
        } else if request.amount > 5_000.0 {
            FraudScore {
                score: 0.35,
                decision: FraudDecision::Review,
                risk_level: RiskLevel::Medium,
                reasons: vec!["medium_amount".to_string()],
                latency,
            }
        } else {
            FraudScore {
                score: 0.1,
                decision: FraudDecision::Approve,
                risk_level: RiskLevel::Low,
                reasons: Vec::new(),
                latency,
            }
        }
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;
    use wiremock::matchers::method;
    use wiremock::matchers::path;

    fn request(amount: f64) -> TransactionScoringRequest {
        TransactionScoringRequest {
            transaction_id: "txn-1".to_string(),
            customer_id: "cust-1".to_string(),
            amount,
            currency: "USD".to_string(),
            merchant_id: None,
            merchant_category: None,
            channel: "online".to_string(),
            country: None,
            timestamp: Utc::now(),
            transaction_type: "WITHDRAWAL".to_string(),
            description: String::new(),
            metadata: Value::Null,
        }
    }

    #[test]
    fn mock_scorer_thresholds_match_the_source() {
        assert_eq!(
            futures_block_on(MockFraudScorer.score(request(75_000.0))).decision,
            FraudDecision::Block
        );
        assert_eq!(
            futures_block_on(MockFraudScorer.score(request(15_000.0))).decision,
            FraudDecision::Review
        );
        assert_eq!(
            futures_block_on(MockFraudScorer.score(request(100.0))).decision,
            FraudDecision::Approve
        );
    }

    fn futures_block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime")
            .block_on(future)
    }

    #[test]
    fn risk_level_thresholds_match_the_source() {
        assert_eq!(risk_level_for_score(0.9), RiskLevel::Critical);
        assert_eq!(risk_level_for_score(0.65), RiskLevel::High);
        assert_eq!(risk_level_for_score(0.31), RiskLevel::Medium);
        assert_eq!(risk_level_for_score(0.1), RiskLevel::Low);
    }

    #[tokio::test]
    async fn disabled_client_always_approves_without_a_call() {
        let client = BastionFraudClient::builder("http://127.0.0.1:1")
            .enabled(false)
            .build()
            .expect("client");

        let score = client.score(request(1_000_000.0)).await;
        assert_eq!(score.decision, FraudDecision::Approve);
        assert_eq!(score.reasons, vec!["fraud_scoring_disabled".to_string()]);
        assert_eq!(score.latency, Duration::ZERO);
    }

    #[tokio::test]
    async fn successful_response_maps_risk_score_to_decision() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/score"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "risk_score": 0.9,
                "action": "block",
                "reasons": ["velocity"],
            })))
            .mount(&server)
            .await;

        let client = BastionFraudClient::new(server.uri()).expect("client");
        let score = client.score(request(60_000.0)).await;

        assert_eq!(score.decision, FraudDecision::Block);
        assert_eq!(score.risk_level, RiskLevel::Critical);
        assert_eq!(score.reasons, vec!["velocity".to_string()]);
    }

    #[tokio::test]
    async fn unreachable_server_returns_fallback_decision() {
        let client = BastionFraudClient::builder("http://127.0.0.1:1")
            .timeout(Duration::from_millis(200))
            .fallback_decision(FraudDecision::Block)
            .build()
            .expect("client");

        let score = client.score(request(100.0)).await;

        assert_eq!(score.decision, FraudDecision::Block);
        assert_eq!(score.risk_level, RiskLevel::Unknown);
        assert_eq!(score.reasons, vec!["unavailable".to_string()]);
    }

    #[tokio::test]
    async fn mock_scorer_health_check_always_succeeds() {
        assert!(MockFraudScorer.health_check().await);
    }
}
