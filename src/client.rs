//! HTTP client for a running schemad instance.
//!
//! [`SchemaClient`] speaks the JSON API of [`crate::server::handlers`];
//! [`RemoteReasoner`] binds it to one ontology and implements
//! [`SchemaReasoner`] so callers can treat local and remote knowledge bases
//! alike.

use std::time::Duration;

use miette::Diagnostic;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::error::SchemaResult;
use crate::explain::Explanations;
use crate::kb::{SchemaReasoner, UpdateSummary};
use crate::ontology::{Axiom, AxiomSet, Entity};
use crate::reasoner::{NodeSet, QueryKind};
use crate::server::handlers::{
    AxiomRequest, EntailsResponse, ExplainRequest, ExplainResponse, HealthResponse,
    OntologyListResponse, QueryRequest, UpdateRequest,
};
use crate::server::routing::{ErrorBody, SHUTDOWN_PATH};
use crate::state::OntologySummary;

#[derive(Debug, Error, Diagnostic)]
pub enum ClientError {
    #[error("remote request failed: {message}")]
    #[diagnostic(code(schemad::client::request), help("Is schemad running?"))]
    Request { message: String },

    #[error("unexpected response from server: {message}")]
    #[diagnostic(code(schemad::client::response), help("Server version mismatch?"))]
    Response { message: String },

    #[error("server answered {status}: {message} [{code}]")]
    #[diagnostic(code(schemad::client::remote))]
    Remote {
        status: u16,
        code: String,
        message: String,
    },
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Talks to one schemad instance.
#[derive(Clone)]
pub struct SchemaClient {
    base_url: String,
    http: ureq::Agent,
}

impl SchemaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .build();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    /// Client for `host:port`. An unspecified bind address means loopback.
    pub fn for_addr(host: &str, port: u16) -> Self {
        let host = if host == "0.0.0.0" { "127.0.0.1" } else { host };
        Self::new(format!("http://{host}:{port}"))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        let resp = self.http.get(&self.url(path)).call().map_err(into_client_error)?;
        resp.into_json().map_err(|e| ClientError::Response {
            message: format!("failed to parse JSON: {e}"),
        })
    }

    fn post_json<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> ClientResult<T> {
        let resp = self
            .http
            .post(&self.url(path))
            .send_json(body)
            .map_err(into_client_error)?;
        resp.into_json().map_err(|e| ClientError::Response {
            message: format!("failed to parse JSON: {e}"),
        })
    }

    pub fn health(&self) -> ClientResult<HealthResponse> {
        self.get_json("/health")
    }

    /// Ask the server to shut down. Returns once the request is acknowledged.
    pub fn shutdown(&self) -> ClientResult<()> {
        self.http
            .get(&self.url(SHUTDOWN_PATH))
            .call()
            .map_err(into_client_error)?;
        Ok(())
    }

    pub fn list(&self) -> ClientResult<Vec<OntologySummary>> {
        let resp: OntologyListResponse = self.get_json("/ontologies")?;
        Ok(resp.ontologies)
    }

    pub fn query(&self, ontology: &str, kind: QueryKind, entity: &Entity) -> ClientResult<NodeSet> {
        self.post_json(
            &format!("/ontologies/{ontology}/query"),
            &QueryRequest {
                kind,
                entity: entity.clone(),
            },
        )
    }

    pub fn entails(&self, ontology: &str, axiom: &Axiom) -> ClientResult<bool> {
        let resp: EntailsResponse = self.post_json(
            &format!("/ontologies/{ontology}/entails"),
            &AxiomRequest {
                axiom: axiom.clone(),
            },
        )?;
        Ok(resp.entailed)
    }

    pub fn explain(&self, ontology: &str, axiom: &Axiom, limit: usize) -> ClientResult<Explanations> {
        let resp: ExplainResponse = self.post_json(
            &format!("/ontologies/{ontology}/explain"),
            &ExplainRequest {
                axiom: axiom.clone(),
                limit,
            },
        )?;
        Ok(resp.justifications)
    }

    pub fn update(
        &self,
        ontology: &str,
        additions: &AxiomSet,
        removals: &AxiomSet,
    ) -> ClientResult<UpdateSummary> {
        self.post_json(
            &format!("/ontologies/{ontology}/update"),
            &UpdateRequest {
                additions: additions.clone(),
                removals: removals.clone(),
            },
        )
    }
}

/// Error statuses carry an [`ErrorBody`]; everything else is transport.
fn into_client_error(err: ureq::Error) -> ClientError {
    match err {
        ureq::Error::Status(status, resp) => match resp.into_json::<ErrorBody>() {
            Ok(body) => ClientError::Remote {
                status,
                code: body.error,
                message: body.message,
            },
            Err(e) => ClientError::Response {
                message: format!("status {status} without error body: {e}"),
            },
        },
        ureq::Error::Transport(t) => ClientError::Request {
            message: t.to_string(),
        },
    }
}

/// One ontology on a remote server.
#[derive(Clone)]
pub struct RemoteReasoner {
    client: SchemaClient,
    ontology: String,
}

impl RemoteReasoner {
    pub fn new(client: SchemaClient, ontology: impl Into<String>) -> Self {
        Self {
            client,
            ontology: ontology.into(),
        }
    }

    pub fn ontology(&self) -> &str {
        &self.ontology
    }
}

impl SchemaReasoner for RemoteReasoner {
    fn query(&self, kind: QueryKind, entity: &Entity) -> SchemaResult<NodeSet> {
        Ok(self.client.query(&self.ontology, kind, entity)?)
    }

    fn is_entailed(&self, axiom: &Axiom) -> SchemaResult<bool> {
        Ok(self.client.entails(&self.ontology, axiom)?)
    }

    fn explain(&self, axiom: &Axiom, limit: usize) -> SchemaResult<Explanations> {
        Ok(self.client.explain(&self.ontology, axiom, limit)?)
    }

    fn update(&self, additions: &AxiomSet, removals: &AxiomSet) -> SchemaResult<UpdateSummary> {
        Ok(self.client.update(&self.ontology, additions, removals)?)
    }

    /// The server owns the knowledge base; nothing to release here.
    fn close(&self) {
        tracing::debug!(ontology = %self.ontology, "remote reasoner released");
    }
}
