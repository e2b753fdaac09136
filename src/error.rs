//! Rich diagnostic error types for schemad.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains. Request-scoped errors
//! are turned into HTTP responses by the server; the codes travel in the
//! response body so remote callers see the same diagnostic.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for schemad.
#[derive(Debug, Error, Diagnostic)]
pub enum SchemaError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Reasoning(#[from] ReasoningError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Scheduling(#[from] SchedulingError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Shutdown(#[from] ShutdownError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Client(#[from] crate::client::ClientError),
}

// ---------------------------------------------------------------------------
// Reasoning errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ReasoningError {
    #[error("knowledge base \"{ontology}\" is inconsistent")]
    #[diagnostic(
        code(schemad::reasoning::inconsistent),
        help(
            "Some individual is asserted into classes that cannot share instances. \
             Use the explain endpoint on any axiom to see the conflicting assertions, \
             then remove one of them with an update."
        )
    )]
    Inconsistent { ontology: String },

    #[error("unknown {entity}")]
    #[diagnostic(
        code(schemad::reasoning::unknown_entity),
        help("The entity does not occur in any axiom of this ontology. Check the spelling.")
    )]
    UnknownEntity { entity: String },

    #[error("unknown ontology \"{name}\"")]
    #[diagnostic(
        code(schemad::reasoning::unknown_ontology),
        help("List the loaded ontologies with `GET /ontologies`.")
    )]
    UnknownOntology { name: String },

    #[error("malformed axiom {axiom}: {message}")]
    #[diagnostic(
        code(schemad::reasoning::malformed_axiom),
        help("Fix the axiom and resend the batch. No axiom of a rejected batch is applied.")
    )]
    MalformedAxiom { axiom: String, message: String },

    #[error("query {kind} does not apply to {entity}")]
    #[diagnostic(
        code(schemad::reasoning::invalid_query),
        help(
            "Class queries (equivalent/sub/super/disjoint classes, instances) take a class; \
             type queries take an individual."
        )
    )]
    InvalidQuery { kind: String, entity: String },

    #[error("expression expands to {terms} conjuncts, more than the limit of {max}")]
    #[diagnostic(
        code(schemad::reasoning::too_complex),
        help("Split the statement into smaller ones.")
    )]
    ExpressionTooComplex { terms: usize, max: usize },

    #[error("knowledge base \"{ontology}\" has been closed")]
    #[diagnostic(
        code(schemad::reasoning::closed),
        help("The service is shutting down or the ontology was unloaded. Retry later.")
    )]
    Closed { ontology: String },
}

// ---------------------------------------------------------------------------
// Scheduling errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SchedulingError {
    #[error("no async runtime available to run job \"{job}\"")]
    #[diagnostic(
        code(schemad::scheduling::no_runtime),
        help("Recurring jobs must be scheduled from within a Tokio runtime.")
    )]
    NoRuntime { job: String },

    #[error("job \"{job}\" has a zero period")]
    #[diagnostic(
        code(schemad::scheduling::zero_period),
        help("Set `update_interval_secs` to at least 1.")
    )]
    ZeroPeriod { job: String },

    #[error("job \"{job}\" is already scheduled")]
    #[diagnostic(
        code(schemad::scheduling::duplicate),
        help("Only one instance of a job identity may run. Cancel the existing one first.")
    )]
    DuplicateJob { job: String },
}

// ---------------------------------------------------------------------------
// Shutdown errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ShutdownError {
    #[error("job \"{job}\" had already stopped")]
    #[diagnostic(code(schemad::shutdown::job_stopped))]
    JobAlreadyStopped { job: String },

    #[error("listener task failed: {message}")]
    #[diagnostic(code(schemad::shutdown::listener))]
    Listener { message: String },

    #[error("listener did not stop within {secs}s")]
    #[diagnostic(
        code(schemad::shutdown::timeout),
        help("Open connections were dropped. Raise `drain_timeout_secs` for slow requests.")
    )]
    ListenerTimeout { secs: u64 },
}

// ---------------------------------------------------------------------------
// Server errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ServerError {
    #[error("server is already running")]
    #[diagnostic(
        code(schemad::server::already_running),
        help("Call `stop()` before starting the server again.")
    )]
    AlreadyRunning,

    #[error("server is not running")]
    #[diagnostic(code(schemad::server::not_running))]
    NotRunning,

    #[error("server is shutting down")]
    #[diagnostic(
        code(schemad::server::shutting_down),
        help("No new requests are accepted once shutdown begins.")
    )]
    ShuttingDown,

    #[error("failed to bind {addr}")]
    #[diagnostic(
        code(schemad::server::bind),
        help("Another process may be listening on this port. Pick another with `--port`.")
    )]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start service (status {status})")]
    #[diagnostic(
        code(schemad::server::start),
        help(
            "The listener may already be bound. Call `stop()` to release it before retrying."
        )
    )]
    Start {
        status: u16,
        #[source]
        source: Box<SchemaError>,
    },

    #[error("route {method} {path} is registered twice")]
    #[diagnostic(
        code(schemad::server::duplicate_route),
        help("Every (method, path) pair may be handled by exactly one handler.")
    )]
    DuplicateRoute { method: String, path: String },

    #[error("route {path} uses unsupported method {method}")]
    #[diagnostic(code(schemad::server::method))]
    UnsupportedMethod { method: String, path: String },
}

impl ServerError {
    /// Wrap a startup failure as a fatal service error.
    pub fn start(source: impl Into<SchemaError>) -> Self {
        ServerError::Start {
            status: 500,
            source: Box::new(source.into()),
        }
    }

    /// HTTP-style status code describing this error.
    pub fn status(&self) -> u16 {
        match self {
            ServerError::Start { status, .. } => *status,
            ServerError::NotRunning | ServerError::ShuttingDown => 503,
            _ => 500,
        }
    }
}

// ---------------------------------------------------------------------------
// Source errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SourceError {
    #[error("failed to read ontology source {path}")]
    #[diagnostic(
        code(schemad::source::io),
        help("Check that the ontology directory exists and is readable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse ontology document {path}: {message}")]
    #[diagnostic(
        code(schemad::source::parse),
        help(r#"Documents are JSON objects of the form {{"axioms": [...]}}."#)
    )]
    Parse { path: String, message: String },
}

// ---------------------------------------------------------------------------
// State errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StateError {
    #[error("server state has been closed")]
    #[diagnostic(
        code(schemad::state::closed),
        help("The service is shutting down; no knowledge base is available.")
    )]
    Closed,
}

// ---------------------------------------------------------------------------
// Request errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum RequestError {
    #[error("missing path parameter \"{name}\"")]
    #[diagnostic(code(schemad::request::missing_param))]
    MissingParam { name: String },

    #[error("invalid request body: {message}")]
    #[diagnostic(
        code(schemad::request::body),
        help("The body must be a JSON document matching the endpoint's request type.")
    )]
    InvalidBody { message: String },

    #[error("failed to encode response: {message}")]
    #[diagnostic(code(schemad::request::encode))]
    Encode { message: String },
}

/// Convenience alias for functions returning schemad results.
pub type SchemaResult<T> = std::result::Result<T, SchemaError>;
