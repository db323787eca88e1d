use std::fmt;

use reqwest::{Client, IntoUrl, Url};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{Error, JobId, ProofRequest, ProofStatus, QueryProofResult};

const REQUEST_PROOF_METHOD: &str = "polymer_requestProof";
const QUERY_PROOF_METHOD: &str = "polymer_queryProof";

/// JSON-RPC request structure.
#[derive(Debug, Serialize)]
struct JsonRpcRequest<P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: P,
}

/// JSON-RPC response structure.
#[derive(Debug, Deserialize)]
struct JsonRpcResponse<R> {
    result: Option<R>,
    error: Option<JsonRpcError>,
}

/// JSON-RPC error structure.
#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// HTTP client for the attestation service.
///
/// Every call is authorized with the bearer credential given at construction.
#[derive(Clone)]
pub struct AttestorClient {
    url: Url,
    api_key: String,
    client: Client,
}

impl fmt::Debug for AttestorClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttestorClient")
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}

impl AttestorClient {
    /// Creates a new client for the service at `url`.
    pub fn new(url: impl IntoUrl, api_key: impl Into<String>) -> Result<Self, Error> {
        Self::with_client(url, api_key, Client::new())
    }

    /// Creates a new client with a custom [`reqwest::Client`].
    pub fn with_client(
        url: impl IntoUrl,
        api_key: impl Into<String>,
        client: Client,
    ) -> Result<Self, Error> {
        Ok(Self {
            url: url.into_url()?,
            api_key: api_key.into(),
            client,
        })
    }

    /// Returns the service URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Sends a JSON-RPC call and returns its `result`.
    async fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &'static str,
        params: P,
    ) -> Result<R, Error> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };

        let response = self
            .client
            .post(self.url.clone())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let msg = response.text().await.ok().filter(|body| !body.is_empty());
            return Err(Error::ErrorStatus {
                status: status.as_u16(),
                msg,
            });
        }

        let rpc_response: JsonRpcResponse<R> = response.json().await?;

        if let Some(error) = rpc_response.error {
            return Err(Error::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        rpc_response.result.ok_or(Error::EmptyResult { method })
    }

    /// Submits a proof generation job and returns its id.
    pub async fn request_proof(&self, request: &ProofRequest) -> Result<JobId, Error> {
        self.call(REQUEST_PROOF_METHOD, request.params()).await
    }

    /// Queries the state of a proof generation job.
    pub async fn query_proof(&self, job_id: JobId) -> Result<ProofStatus, Error> {
        let result: QueryProofResult = self.call(QUERY_PROOF_METHOD, [job_id]).await?;
        Ok(result.into())
    }
}
