//! Blueprint Server
//!
//! Axum HTTP surface over the core coordinator: stage invocation, the SSE
//! progress stream, document and execution reads, and context ingestion.

pub mod api;
pub mod error;
pub mod state;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

pub use state::{AppState, SharedState};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Blueprint API",
        version = "1.0.0",
        description = "Staged document generation: about, standards, architecture, plan"
    ),
    paths(
        api::stages::run_stage,
        api::stages::events,
        api::documents::list_versions,
        api::documents::latest_version,
        api::documents::list_executions,
        api::documents::get_execution,
        api::context::ingest,
        api::context::search,
        api::system::health
    ),
    components(
        schemas(
            api::stages::RunStageRequest,
            api::stages::StageResponse,
            api::stages::AcceptedResponse,
            api::documents::DocumentView,
            api::documents::ExecutionView,
            api::context::IngestRequest,
            api::context::IngestResponse,
            api::context::ContextSearchRequest,
            api::context::ContextSearchResponse,
            api::context::ContextResult,
            api::system::HealthResponse,
            api::system::DependencyHealth,
            error::ErrorBody
        )
    ),
    tags(
        (name = "stages", description = "Stage invocation and progress"),
        (name = "documents", description = "Document versions and execution history"),
        (name = "context", description = "Project context for retrieval"),
        (name = "system", description = "Health")
    )
)]
pub struct ApiDoc;

/// Build the application router
pub fn router(state: SharedState) -> Router {
    let project_routes = Router::new()
        .route("/stages/:step", post(api::stages::run_stage))
        .route("/events", get(api::stages::events))
        .route(
            "/documents/:document_type/versions",
            get(api::documents::list_versions),
        )
        .route(
            "/documents/:document_type/latest",
            get(api::documents::latest_version),
        )
        .route("/executions", get(api::documents::list_executions))
        .route("/context", post(api::context::ingest))
        .route("/context/search", post(api::context::search));

    Router::new()
        .nest("/api/v1/projects/:project_id", project_routes)
        .route(
            "/api/v1/executions/:execution_id",
            get(api::documents::get_execution),
        )
        .route("/api/v1/health", get(api::system::health))
        .route("/api/v1/openapi.json", get(api::system::serve_openapi))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        response::Response,
    };
    use blueprint_core::error::ModelError;
    use blueprint_core::models::{DocumentSection, GeneratedDocument, ModelClient, ModelRequest};
    use blueprint_core::skills::{AgentRegistry, StageAgent};
    use blueprint_core::state::BlueprintDb;
    use blueprint_core::swarm::{CoordinatorConfig, Stage};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    /// Answers every stage with a complete document
    struct CannedModel;

    #[async_trait]
    impl ModelClient for CannedModel {
        fn dependency(&self, _agent_type: &str) -> String {
            "canned".to_string()
        }

        async fn generate(&self, request: &ModelRequest) -> Result<GeneratedDocument, ModelError> {
            let stage = (1..=4)
                .filter_map(Stage::from_step)
                .find(|s| s.agent_type() == request.agent_type)
                .ok_or_else(|| ModelError::Fatal("unknown agent".to_string()))?;
            let agent = AgentRegistry::standard().get(stage);
            Ok(GeneratedDocument {
                title: format!("Habit tracker {}", stage),
                sections: agent
                    .required_sections()
                    .iter()
                    .map(|h| DocumentSection {
                        heading: h.to_string(),
                        body: format!("{} details.", h),
                    })
                    .collect(),
                confidence: 0.9,
            })
        }
    }

    fn app_with_state() -> (Router, SharedState) {
        let db = BlueprintDb::open_in_memory().unwrap();
        let state = Arc::new(AppState::new(
            CoordinatorConfig::default(),
            &db,
            Arc::new(CannedModel),
        ));
        (router(state.clone()), state)
    }

    fn app() -> Router {
        app_with_state().0
    }

    fn post_json(uri: &str, tenant: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(tenant) = tenant {
            builder = builder.header(api::TENANT_HEADER, tenant);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_as(uri: &str, tenant: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(api::TENANT_HEADER, tenant)
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn idea() -> Value {
        json!({"input": {"idea_description": "A habit tracker for remote teams"}})
    }

    #[tokio::test]
    async fn test_run_first_stage() {
        let app = app();

        let response = app
            .clone()
            .oneshot(post_json("/api/v1/projects/p1/stages/1", Some("t1"), idea()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["document"]["document_type"], "about");
        assert_eq!(body["document"]["version"], 1);
        assert_eq!(body["attempts"], 1);

        let response = app
            .clone()
            .oneshot(get_as("/api/v1/projects/p1/documents/about/latest", "t1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let latest = json_body(response).await;
        assert_eq!(latest["correlation_id"], body["correlation_id"]);

        let response = app
            .oneshot(get_as("/api/v1/projects/p1/executions", "t1"))
            .await
            .unwrap();
        let executions = json_body(response).await;
        assert_eq!(executions[0]["status"], "succeeded");
        assert_eq!(executions[0]["id"], body["execution_id"]);
    }

    #[tokio::test]
    async fn test_precondition_is_conflict() {
        let response = app()
            .oneshot(post_json(
                "/api/v1/projects/p1/stages/2",
                Some("t1"),
                json!({"input": {}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = json_body(response).await;
        assert_eq!(body["code"], "precondition_failed");
        assert!(body["correlation_id"].is_string());
    }

    #[tokio::test]
    async fn test_missing_tenant_is_rejected() {
        let response = app()
            .oneshot(post_json("/api/v1/projects/p1/stages/1", None, idea()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "missing_tenant");
    }

    #[tokio::test]
    async fn test_invalid_step_and_input() {
        let app = app();

        let response = app
            .clone()
            .oneshot(post_json("/api/v1/projects/p1/stages/7", Some("t1"), idea()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = app
            .oneshot(post_json(
                "/api/v1/projects/p1/stages/1",
                Some("t1"),
                json!({"input": {"idea_description": ""}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json_body(response).await["code"], "validation_error");
    }

    #[tokio::test]
    async fn test_no_wait_returns_accepted() {
        let mut body = idea();
        body["wait"] = json!(false);
        body["correlation_id"] = json!("corr-async");

        let response = app()
            .oneshot(post_json("/api/v1/projects/p1/stages/1", Some("t1"), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(json_body(response).await["correlation_id"], "corr-async");
    }

    #[tokio::test]
    async fn test_tenants_do_not_see_each_other() {
        let app = app();
        app.clone()
            .oneshot(post_json("/api/v1/projects/shared/stages/1", Some("alpha"), idea()))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(get_as("/api/v1/projects/shared/documents/about/latest", "beta"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        // Stage 2 for the other tenant has no predecessor
        let response = app
            .oneshot(post_json(
                "/api/v1/projects/shared/stages/2",
                Some("beta"),
                json!({"input": {}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_unknown_document_type() {
        let response = app()
            .oneshot(get_as("/api/v1/projects/p1/documents/roadmap/versions", "t1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_context_ingest_and_search() {
        let app = app();

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/v1/projects/p1/context",
                Some("t1"),
                json!({"chunk_type": "research", "content": "Remote teams forget standups"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(json_body(response).await["id"].is_i64());

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/v1/projects/p1/context/search",
                Some("t1"),
                json!({"query": "remote standups"}),
            ))
            .await
            .unwrap();
        let results = json_body(response).await;
        assert_eq!(results["results"].as_array().map(Vec::len), Some(1));

        let response = app
            .oneshot(post_json(
                "/api/v1/projects/p1/context",
                Some("t1"),
                json!({"chunk_type": "note", "content": "   "}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_execution_is_tenant_scoped() {
        let app = app();
        let response = app
            .clone()
            .oneshot(post_json("/api/v1/projects/p1/stages/1", Some("t1"), idea()))
            .await
            .unwrap();
        let execution_id = json_body(response).await["execution_id"]
            .as_str()
            .unwrap()
            .to_string();

        let uri = format!("/api/v1/executions/{}", execution_id);
        let response = app.clone().oneshot(get_as(&uri, "t1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get_as(&uri, "t2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health_and_openapi() {
        let (app, state) = app_with_state();
        let _watching = state
            .bus
            .subscribe(blueprint_core::swarm::ProjectScope::new("t1", "p1"));

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let health = json_body(response).await;
        assert_eq!(health["status"], "ok");
        assert_eq!(health["progress_channels"], 1);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/openapi.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let doc = json_body(response).await;
        assert!(doc["paths"]["/api/v1/projects/{project_id}/stages/{step}"].is_object());
    }
}
