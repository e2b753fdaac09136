//! Routing table and handler registry.
//!
//! Handlers are opaque, synchronous capabilities. Every dispatch captures the
//! current [`ServerState`] and runs the handler on the blocking pool, so a
//! slow reasoning call never holds up connection acceptance. Errors a handler
//! returns become JSON error responses; a panicking handler becomes a 500.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Extension, Path, Query};
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodFilter, MethodRouter};
use miette::Diagnostic;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{
    ReasoningError, RequestError, SchemaError, SchemaResult, ServerError, StateError,
};
use super::shutdown::InFlight;
use crate::state::{ServerState, StateHolder};

/// The administrative route that starts a graceful shutdown.
pub const SHUTDOWN_PATH: &str = "/admin/shutdown";

/// Everything a handler gets to see about a request.
pub struct RouteRequest {
    pub params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Bytes,
    state: Option<Arc<ServerState>>,
}

impl RouteRequest {
    pub fn new(
        params: HashMap<String, String>,
        query: HashMap<String, String>,
        body: Bytes,
        state: Option<Arc<ServerState>>,
    ) -> Self {
        Self {
            params,
            query,
            body,
            state,
        }
    }

    /// The server state captured when the request was dispatched.
    pub fn state(&self) -> Result<&Arc<ServerState>, StateError> {
        self.state.as_ref().ok_or(StateError::Closed)
    }

    pub fn param(&self, name: &str) -> Result<&str, RequestError> {
        self.params
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| RequestError::MissingParam {
                name: name.to_string(),
            })
    }

    /// Decode the body as JSON. An empty body decodes as `{}`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, RequestError> {
        let body: &[u8] = if self.body.is_empty() {
            b"{}"
        } else {
            &self.body
        };
        serde_json::from_slice(body).map_err(|e| RequestError::InvalidBody {
            message: e.to_string(),
        })
    }
}

/// A handler's answer.
#[derive(Debug, Clone)]
pub struct RouteResponse {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl RouteResponse {
    pub fn json<T: Serialize>(value: &T) -> Result<Self, RequestError> {
        let body = serde_json::to_vec(value).map_err(|e| RequestError::Encode {
            message: e.to_string(),
        })?;
        Ok(Self {
            status: StatusCode::OK,
            content_type: "application/json",
            body,
        })
    }

    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }
}

impl IntoResponse for RouteResponse {
    fn into_response(self) -> Response {
        (
            self.status,
            [(header::CONTENT_TYPE, self.content_type)],
            self.body,
        )
            .into_response()
    }
}

/// A request handler. Runs on the blocking pool and may block freely.
pub trait RouteHandler: Send + Sync + 'static {
    fn handle(&self, request: RouteRequest) -> SchemaResult<RouteResponse>;
}

impl<F> RouteHandler for F
where
    F: Fn(RouteRequest) -> SchemaResult<RouteResponse> + Send + Sync + 'static,
{
    fn handle(&self, request: RouteRequest) -> SchemaResult<RouteResponse> {
        self(request)
    }
}

/// One (method, path, handler) entry. Paths use `{name}` for parameters.
#[derive(Clone)]
pub struct Route {
    pub method: Method,
    pub path: String,
    pub handler: Arc<dyn RouteHandler>,
}

impl Route {
    pub fn new(method: Method, path: impl Into<String>, handler: impl RouteHandler) -> Self {
        Self {
            method,
            path: path.into(),
            handler: Arc::new(handler),
        }
    }

    pub fn get(path: impl Into<String>, handler: impl RouteHandler) -> Self {
        Self::new(Method::GET, path, handler)
    }

    pub fn post(path: impl Into<String>, handler: impl RouteHandler) -> Self {
        Self::new(Method::POST, path, handler)
    }
}

/// JSON error payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    /// Diagnostic code, e.g. `schemad::reasoning::unknown_ontology`.
    pub error: String,
    pub message: String,
}

/// A request-scoped failure on its way to the client.
pub struct ApiError(pub SchemaError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            SchemaError::Reasoning(e) => match e {
                ReasoningError::MalformedAxiom { .. }
                | ReasoningError::InvalidQuery { .. }
                | ReasoningError::ExpressionTooComplex { .. } => StatusCode::BAD_REQUEST,
                ReasoningError::UnknownEntity { .. } | ReasoningError::UnknownOntology { .. } => {
                    StatusCode::NOT_FOUND
                }
                ReasoningError::Inconsistent { .. } => StatusCode::CONFLICT,
                ReasoningError::Closed { .. } => StatusCode::SERVICE_UNAVAILABLE,
            },
            SchemaError::State(StateError::Closed) => StatusCode::SERVICE_UNAVAILABLE,
            SchemaError::Request(RequestError::Encode { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
            SchemaError::Request(_) => StatusCode::BAD_REQUEST,
            SchemaError::Server(e) => {
                StatusCode::from_u16(e.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self
                .0
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "schemad::internal".into()),
            message: self.0.to_string(),
        }
    }
}

impl From<SchemaError> for ApiError {
    fn from(err: SchemaError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self.0, status = status.as_u16(), "request failed");
        }
        (status, axum::Json(self.body())).into_response()
    }
}

/// Build the router for `routes`. A (method, path) pair may appear once, and
/// `GET /admin/shutdown` is reserved.
pub fn build_router(routes: &[Route], holder: Arc<StateHolder>) -> Result<Router, ServerError> {
    let mut seen: HashSet<(Method, &str)> = HashSet::new();
    seen.insert((Method::GET, SHUTDOWN_PATH));
    let mut by_path: BTreeMap<&str, Vec<&Route>> = BTreeMap::new();
    for route in routes {
        if !seen.insert((route.method.clone(), route.path.as_str())) {
            return Err(ServerError::DuplicateRoute {
                method: route.method.to_string(),
                path: route.path.clone(),
            });
        }
        by_path.entry(route.path.as_str()).or_default().push(route);
    }

    let mut router = Router::new();
    for (path, routes) in by_path {
        let mut methods = MethodRouter::new();
        for route in routes {
            let filter = MethodFilter::try_from(route.method.clone()).map_err(|_| {
                ServerError::UnsupportedMethod {
                    method: route.method.to_string(),
                    path: route.path.clone(),
                }
            })?;
            methods = add_endpoint(methods, filter, path.contains('{'), route, &holder);
        }
        router = router.route(path, methods);
    }
    Ok(router)
}

fn add_endpoint(
    methods: MethodRouter,
    filter: MethodFilter,
    has_params: bool,
    route: &Route,
    holder: &Arc<StateHolder>,
) -> MethodRouter {
    let handler = Arc::clone(&route.handler);
    let holder = Arc::clone(holder);
    if has_params {
        methods.on(
            filter,
            move |Path(params): Path<HashMap<String, String>>,
                  Query(query): Query<HashMap<String, String>>,
                  in_flight: Option<Extension<Arc<InFlight>>>,
                  body: Bytes| {
                dispatch(
                    Arc::clone(&handler),
                    Arc::clone(&holder),
                    in_flight.map(|Extension(guard)| guard),
                    params,
                    query,
                    body,
                )
            },
        )
    } else {
        methods.on(
            filter,
            move |Query(query): Query<HashMap<String, String>>,
                  in_flight: Option<Extension<Arc<InFlight>>>,
                  body: Bytes| {
                dispatch(
                    Arc::clone(&handler),
                    Arc::clone(&holder),
                    in_flight.map(|Extension(guard)| guard),
                    HashMap::new(),
                    query,
                    body,
                )
            },
        )
    }
}

/// Run `handler` on the blocking pool. `in_flight` moves into the blocking
/// task and is released only when the handler returns.
async fn dispatch(
    handler: Arc<dyn RouteHandler>,
    holder: Arc<StateHolder>,
    in_flight: Option<Arc<InFlight>>,
    params: HashMap<String, String>,
    query: HashMap<String, String>,
    body: Bytes,
) -> Response {
    let request = RouteRequest::new(params, query, body, holder.current().ok());
    let work = move || {
        let _in_flight = in_flight;
        handler.handle(request)
    };
    match tokio::task::spawn_blocking(work).await {
        Ok(Ok(response)) => response.into_response(),
        Ok(Err(e)) => ApiError(e).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "handler panicked");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(ErrorBody {
                    error: "schemad::internal".into(),
                    message: "handler panicked".into(),
                }),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, mpsc};
    use std::time::Duration;

    use super::*;
    use crate::kb::KbSettings;
    use crate::server::shutdown::ShutdownTracker;
    use crate::source::MemorySource;

    fn holder() -> Arc<StateHolder> {
        Arc::new(StateHolder::load(&MemorySource::new(), KbSettings::default()).unwrap())
    }

    fn ok(_: RouteRequest) -> SchemaResult<RouteResponse> {
        Ok(RouteResponse::empty(StatusCode::NO_CONTENT))
    }

    #[test]
    fn duplicate_route_is_rejected() {
        let routes = [Route::get("/a", ok), Route::post("/a", ok), Route::get("/a", ok)];
        assert!(matches!(
            build_router(&routes, holder()),
            Err(ServerError::DuplicateRoute { .. })
        ));
    }

    #[test]
    fn shutdown_route_is_reserved() {
        let routes = [Route::get(SHUTDOWN_PATH, ok)];
        assert!(matches!(
            build_router(&routes, holder()),
            Err(ServerError::DuplicateRoute { .. })
        ));
    }

    #[test]
    fn error_status_follows_kind() {
        let status = |e: SchemaError| ApiError(e).status();
        assert_eq!(
            status(ReasoningError::UnknownOntology { name: "x".into() }.into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(ReasoningError::Inconsistent { ontology: "x".into() }.into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status(RequestError::InvalidBody { message: "x".into() }.into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status(StateError::Closed.into()), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status(ServerError::NotRunning.into()), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn error_body_carries_diagnostic_code() {
        let body = ApiError(ReasoningError::UnknownOntology { name: "pizza".into() }.into()).body();
        assert_eq!(body.error, "schemad::reasoning::unknown_ontology");
        assert!(body.message.contains("pizza"));
    }

    #[test]
    fn empty_body_decodes_as_empty_object() {
        #[derive(Deserialize)]
        struct Req {
            #[serde(default)]
            limit: usize,
        }
        let req = RouteRequest::new(HashMap::new(), HashMap::new(), Bytes::new(), None);
        assert_eq!(req.json::<Req>().unwrap().limit, 0);
        assert!(matches!(req.state(), Err(StateError::Closed)));
    }

    #[tokio::test]
    async fn dropped_request_keeps_handler_counted_until_it_returns() {
        let tracker = ShutdownTracker::new();
        let (release, wait) = mpsc::channel::<()>();
        let wait = Mutex::new(wait);
        let handler = Route::get("/slow", move |_req: RouteRequest| -> SchemaResult<RouteResponse> {
            let _ = wait.lock().unwrap().recv();
            Ok(RouteResponse::empty(StatusCode::OK))
        })
        .handler;

        let in_flight = Arc::new(tracker.enter().unwrap());
        let request = tokio::spawn(dispatch(
            handler,
            holder(),
            Some(in_flight),
            HashMap::new(),
            HashMap::new(),
            Bytes::new(),
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The client went away; the handler is still running.
        request.abort();
        let _ = request.await;
        assert_eq!(tracker.in_flight(), 1);
        assert!(!tracker.drained(Duration::from_millis(50)).await);

        release.send(()).unwrap();
        assert!(tracker.drained(Duration::from_secs(1)).await);
    }
}
