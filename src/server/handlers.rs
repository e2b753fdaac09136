//! Built-in HTTP routes over the loaded knowledge bases.
//!
//! - `GET  /health`: liveness and state generation
//! - `GET  /ontologies`: loaded ontologies
//! - `POST /ontologies/{name}/query`: hierarchy and instance queries
//! - `POST /ontologies/{name}/entails`: entailment check
//! - `POST /ontologies/{name}/explain`: justifications for an entailment
//! - `POST /ontologies/{name}/update`: add and remove axioms

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::routing::{Route, RouteRequest, RouteResponse};
use crate::error::SchemaResult;
use crate::explain::Explanations;
use crate::kb::KnowledgeBase;
use crate::ontology::{Axiom, AxiomSet, Entity};
use crate::reasoner::QueryKind;
use crate::state::OntologySummary;

// ── Wire types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub generation: u64,
    pub loaded_at: u64,
    pub ontologies: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub kind: QueryKind,
    pub entity: Entity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxiomRequest {
    pub axiom: Axiom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplainRequest {
    pub axiom: Axiom,
    /// Maximum justifications; `0` asks for all.
    #[serde(default)]
    pub limit: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateRequest {
    #[serde(default)]
    pub additions: AxiomSet,
    #[serde(default)]
    pub removals: AxiomSet,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntailsResponse {
    pub entailed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExplainResponse {
    pub justifications: Explanations,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OntologyListResponse {
    pub ontologies: Vec<OntologySummary>,
}

// ── Handlers ──────────────────────────────────────────────────────────────

fn knowledge_base(req: &RouteRequest) -> SchemaResult<Arc<KnowledgeBase>> {
    let name = req.param("name")?;
    Ok(req.state()?.get(name)?)
}

fn health(req: RouteRequest) -> SchemaResult<RouteResponse> {
    let state = req.state()?;
    Ok(RouteResponse::json(&HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        generation: state.generation(),
        loaded_at: state.loaded_at(),
        ontologies: state.len(),
    })?)
}

fn list_ontologies(req: RouteRequest) -> SchemaResult<RouteResponse> {
    let ontologies = req.state()?.summaries();
    Ok(RouteResponse::json(&OntologyListResponse { ontologies })?)
}

fn query(req: RouteRequest) -> SchemaResult<RouteResponse> {
    let kb = knowledge_base(&req)?;
    let body: QueryRequest = req.json()?;
    let nodes = kb.query(body.kind, &body.entity)?;
    Ok(RouteResponse::json(&nodes)?)
}

fn entails(req: RouteRequest) -> SchemaResult<RouteResponse> {
    let kb = knowledge_base(&req)?;
    let body: AxiomRequest = req.json()?;
    let entailed = kb.is_entailed(&body.axiom)?;
    Ok(RouteResponse::json(&EntailsResponse { entailed })?)
}

fn explain(req: RouteRequest) -> SchemaResult<RouteResponse> {
    let kb = knowledge_base(&req)?;
    let body: ExplainRequest = req.json()?;
    let justifications = kb.explain(&body.axiom, body.limit)?;
    Ok(RouteResponse::json(&ExplainResponse { justifications })?)
}

fn update(req: RouteRequest) -> SchemaResult<RouteResponse> {
    let kb = knowledge_base(&req)?;
    let body: UpdateRequest = req.json()?;
    let summary = kb.update(&body.additions, &body.removals)?;
    Ok(RouteResponse::json(&summary)?)
}

/// The routes every schemad instance serves.
pub fn knowledge_base_routes() -> Vec<Route> {
    vec![
        Route::get("/health", health),
        Route::get("/ontologies", list_ontologies),
        Route::post("/ontologies/{name}/query", query),
        Route::post("/ontologies/{name}/entails", entails),
        Route::post("/ontologies/{name}/explain", explain),
        Route::post("/ontologies/{name}/update", update),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use axum::body::Bytes;
    use axum::http::StatusCode;

    use crate::error::{ReasoningError, SchemaError};
    use crate::kb::KbSettings;
    use crate::reasoner::NodeSet;
    use crate::source::MemorySource;
    use crate::state::StateHolder;

    fn request(name: &str, body: serde_json::Value) -> RouteRequest {
        let source = MemorySource::new();
        source.publish(
            "zoo",
            [
                Axiom::sub_class_of("Dog", "Mammal"),
                Axiom::sub_class_of("Mammal", "Animal"),
            ]
            .into_iter()
            .collect(),
        );
        let holder = StateHolder::load(&source, KbSettings::default()).unwrap();
        RouteRequest::new(
            HashMap::from([("name".to_string(), name.to_string())]),
            HashMap::new(),
            Bytes::from(body.to_string()),
            holder.current().ok(),
        )
    }

    #[test]
    fn query_returns_node_set() {
        let req = request(
            "zoo",
            serde_json::json!({"kind": "super_classes", "entity": {"class": "Dog"}}),
        );
        let resp = query(req).unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        let nodes: NodeSet = serde_json::from_slice(&resp.body).unwrap();
        assert!(nodes.contains_entity(&Entity::class("Animal")));
    }

    #[test]
    fn entails_reports_boolean() {
        let req = request(
            "zoo",
            serde_json::json!({"axiom": {"sub_class_of": {"sub": "Dog", "sup": "Animal"}}}),
        );
        let resp: EntailsResponse = serde_json::from_slice(&entails(req).unwrap().body).unwrap();
        assert!(resp.entailed);
    }

    #[test]
    fn unknown_ontology_is_reasoning_error() {
        let req = request("pizza", serde_json::json!({}));
        assert!(matches!(
            update(req),
            Err(SchemaError::Reasoning(ReasoningError::UnknownOntology { .. }))
        ));
    }

    #[test]
    fn malformed_body_is_request_error() {
        let req = request("zoo", serde_json::json!({"kind": "sideways"}));
        assert!(matches!(query(req), Err(SchemaError::Request(_))));
    }
}
