use crate::config::{CollaboratorsSection, LedgerSection};
use crate::error::{NodeError, NodeResult};
use crate::metrics::NodeMetrics;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use veriscore_core::{
    ClassProbabilities, Classifier, CollaboratorError, Collaborators, DomainInfo, DomainRegistry,
    FabricationDetector, Fetcher, Ledger, LedgerError, SimilarityDetector, WeightTable,
};

#[derive(Clone, Debug)]
pub struct ServiceClient {
    name: &'static str,
    base_url: String,
    http_client: Client,
}

impl ServiceClient {
    pub fn new(name: &'static str, base_url: impl Into<String>, http_client: Client) -> Self {
        Self {
            name,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn post_json<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, CollaboratorError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let result = self.send_json(path, body).await;
        if result.is_err() {
            NodeMetrics::record_collaborator_failure(self.name);
        }
        result
    }

    async fn send_json<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, CollaboratorError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let response = self
            .http_client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &error_body));
        }

        response
            .json()
            .await
            .map_err(|e| CollaboratorError::Malformed(format!("{}: {}", self.name, e)))
    }
}

fn request_error(e: reqwest::Error) -> CollaboratorError {
    if e.is_timeout() || e.is_connect() {
        CollaboratorError::Transient(e.to_string())
    } else {
        CollaboratorError::Unavailable(e.to_string())
    }
}

pub fn status_error(status: StatusCode, body: &str) -> CollaboratorError {
    let message = format!("{} - {}", status, body.chars().take(200).collect::<String>());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        CollaboratorError::Transient(message)
    } else {
        CollaboratorError::Unavailable(message)
    }
}

#[derive(Serialize)]
struct PairRequest<'a> {
    statement: &'a str,
    excerpt: &'a str,
}

pub struct HttpClassifier {
    client: ServiceClient,
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(
        &self,
        statement: &str,
        excerpt: &str,
    ) -> Result<ClassProbabilities, CollaboratorError> {
        self.client
            .post_json("classify", &PairRequest { statement, excerpt })
            .await
    }
}

#[derive(Deserialize)]
struct FabricationResponse {
    fabricated: bool,
}

#[derive(Serialize)]
struct SimilarityRequest<'a> {
    a: &'a str,
    b: &'a str,
}

#[derive(Deserialize)]
struct SimilarityResponse {
    similarity: f64,
}

pub struct HttpDetector {
    client: ServiceClient,
}

#[async_trait]
impl FabricationDetector for HttpDetector {
    async fn is_fabricated(
        &self,
        statement: &str,
        excerpt: &str,
    ) -> Result<bool, CollaboratorError> {
        let response: FabricationResponse = self
            .client
            .post_json("fabrication", &PairRequest { statement, excerpt })
            .await?;
        Ok(response.fabricated)
    }
}

#[async_trait]
impl SimilarityDetector for HttpDetector {
    async fn similarity(&self, a: &str, b: &str) -> Result<f64, CollaboratorError> {
        let response: SimilarityResponse = self
            .client
            .post_json("similarity", &SimilarityRequest { a, b })
            .await?;

        if !response.similarity.is_finite() {
            return Err(CollaboratorError::Malformed(
                "similarity is not a number".to_string(),
            ));
        }
        Ok(response.similarity)
    }
}

#[derive(Serialize)]
struct DomainRequest<'a> {
    domain: &'a str,
}

pub struct HttpDomainRegistry {
    client: ServiceClient,
}

#[async_trait]
impl DomainRegistry for HttpDomainRegistry {
    async fn lookup(&self, domain: &str) -> Result<DomainInfo, CollaboratorError> {
        self.client
            .post_json("lookup", &DomainRequest { domain })
            .await
    }
}

pub struct HttpFetcher {
    http_client: Client,
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, CollaboratorError> {
        let result: Result<String, CollaboratorError> = async {
            let response = self.http_client.get(url).send().await.map_err(request_error)?;

            let status = response.status();
            if !status.is_success() {
                return Err(status_error(status, ""));
            }

            response
                .text()
                .await
                .map_err(|e| CollaboratorError::Malformed(e.to_string()))
        }
        .await;

        if result.is_err() {
            NodeMetrics::record_collaborator_failure("fetcher");
        }
        result
    }
}

#[derive(Serialize)]
struct SetWeightsRequest {
    request_id: String,
    subnet_id: u16,
    uids: Vec<u16>,
    weights: Vec<u16>,
}

pub struct HttpLedger {
    client: ServiceClient,
}

impl HttpLedger {
    pub fn new(section: &LedgerSection, http_client: Client) -> Self {
        Self {
            client: ServiceClient::new("ledger", &section.url, http_client),
        }
    }
}

#[async_trait]
impl Ledger for HttpLedger {
    async fn set_weights(
        &self,
        round_id: &str,
        table: &WeightTable,
        subnet_id: u16,
    ) -> Result<(), LedgerError> {
        let (uids, weights) = table.to_vectors();
        let request = SetWeightsRequest {
            request_id: weights_request_id(subnet_id, round_id),
            subnet_id,
            uids,
            weights,
        };

        tracing::debug!(
            request_id = %request.request_id,
            subnet_id,
            entries = request.uids.len(),
            "Sending set_weights"
        );

        match self
            .client
            .post_json::<_, serde_json::Value>("set_weights", &request)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_retryable() => Err(LedgerError::Transient(e.to_string())),
            Err(e) => Err(LedgerError::Fatal(e.to_string())),
        }
    }
}

/// Same subnet and round always give the same id, so the ledger can drop
/// a retried write that already landed.
pub fn weights_request_id(subnet_id: u16, round_id: &str) -> String {
    uuid::Uuid::new_v5(
        &uuid::Uuid::NAMESPACE_OID,
        format!("veriscore:{}:{}", subnet_id, round_id).as_bytes(),
    )
    .to_string()
}

pub fn build_http_client(user_agent: &str) -> NodeResult<Client> {
    Client::builder()
        .user_agent(user_agent)
        .build()
        .map_err(|e| NodeError::Client(format!("Failed to build HTTP client: {}", e)))
}

pub fn build_collaborators(section: &CollaboratorsSection) -> NodeResult<Collaborators> {
    let http_client = build_http_client(&section.user_agent)?;

    let detector = Arc::new(HttpDetector {
        client: ServiceClient::new("detector", &section.detector_url, http_client.clone()),
    });

    let registry = section.registry_url.as_ref().map(|url| {
        Arc::new(HttpDomainRegistry {
            client: ServiceClient::new("registry", url, http_client.clone()),
        }) as Arc<dyn DomainRegistry>
    });

    Ok(Collaborators {
        classifier: Arc::new(HttpClassifier {
            client: ServiceClient::new("classifier", &section.classifier_url, http_client.clone()),
        }),
        fetcher: Arc::new(HttpFetcher {
            http_client: http_client.clone(),
        }),
        registry,
        fabrication: detector.clone(),
        similarity: detector,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let client = ServiceClient::new("test", "http://localhost:8500/", Client::new());
        assert_eq!(client.url("classify"), "http://localhost:8500/classify");
        assert_eq!(client.url("/lookup"), "http://localhost:8500/lookup");
    }

    #[test]
    fn test_status_mapping() {
        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE, "").is_retryable());
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(!status_error(StatusCode::NOT_FOUND, "").is_retryable());
        assert!(!status_error(StatusCode::BAD_REQUEST, "bad").is_retryable());
    }

    #[test]
    fn test_weights_request_id_is_stable_per_round() {
        let first = weights_request_id(7, "round-12");
        assert_eq!(first, weights_request_id(7, "round-12"));
        assert_ne!(first, weights_request_id(7, "round-13"));
        assert_ne!(first, weights_request_id(8, "round-12"));
        assert!(uuid::Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn test_build_collaborators_without_registry() {
        let collaborators = build_collaborators(&CollaboratorsSection::default()).unwrap();
        assert!(collaborators.registry.is_none());

        let section = CollaboratorsSection {
            registry_url: Some("http://127.0.0.1:8502".to_string()),
            ..Default::default()
        };
        assert!(build_collaborators(&section).unwrap().registry.is_some());
    }
}
