use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::domain::{
    Actor, ApplicationId, ApplicationStatus, GroupId, OrgNodeId, RoutingRule, SequenceId, StepId,
    StepSequence,
};
use super::engine::{ErrorKind, StepSubmission, WorkflowEngine, WorkflowError};
use super::hierarchy::OrgNode;
use super::repository::{Directory, WorkflowRepository};
use super::views::{ListFilter, ListState};

/// Caller identity, set by the authenticating proxy in front of the service.
pub const ACTOR_ID_HEADER: &str = "x-actor-id";
/// Comma-separated role names carried by the caller's session.
pub const ACTOR_ROLES_HEADER: &str = "x-actor-roles";
/// Role name unlocking administrative endpoints.
pub const ADMIN_ROLE: &str = "admin";

type SharedEngine<R, D> = Arc<WorkflowEngine<R, D>>;

/// Router builder exposing the review workflow over HTTP.
pub fn application_router<R, D>(engine: SharedEngine<R, D>) -> Router
where
    R: WorkflowRepository + 'static,
    D: Directory + 'static,
{
    Router::new()
        .route(
            "/api/v1/applications",
            get(list_handler::<R, D>).post(start_handler::<R, D>),
        )
        .route(
            "/api/v1/applications/:application_id",
            get(detail_handler::<R, D>).delete(delete_handler::<R, D>),
        )
        .route(
            "/api/v1/applications/:application_id/steps/:step_id",
            post(submit_handler::<R, D>),
        )
        .route(
            "/api/v1/applications/:application_id/processed",
            post(process_handler::<R, D>),
        )
        .route(
            "/api/v1/applications/:application_id/revert",
            post(revert_handler::<R, D>),
        )
        .route(
            "/api/v1/applications/:application_id/status",
            post(status_handler::<R, D>),
        )
        .route(
            "/api/v1/admin/applications",
            get(admin_list_handler::<R, D>),
        )
        .route("/api/v1/sequences", post(register_sequence_handler::<R, D>))
        .route(
            "/api/v1/org-chart",
            get(org_chart_handler::<R, D>).post(add_org_node_handler::<R, D>),
        )
        .route(
            "/api/v1/org-chart/:node_id",
            axum::routing::delete(remove_org_node_handler::<R, D>),
        )
        .route(
            "/api/v1/org-chart/:node_id/subtree",
            get(org_subtree_handler::<R, D>),
        )
        .route(
            "/api/v1/org-chart/:node_id/superior",
            post(reassign_org_node_handler::<R, D>),
        )
        .with_state(engine)
}

#[derive(Debug, Deserialize)]
pub(crate) struct StartRequest {
    pub(crate) sequence_id: SequenceId,
    #[serde(default)]
    pub(crate) payload: serde_json::Value,
    #[serde(default)]
    pub(crate) routing_override: Option<RoutingRule>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SubmitRequest {
    #[serde(default)]
    pub(crate) payload: serde_json::Value,
    #[serde(default)]
    pub(crate) routing_override: Option<RoutingRule>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusRequest {
    pub(crate) status: ApplicationStatus,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReassignRequest {
    pub(crate) superior_id: OrgNodeId,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ListQuery {
    #[serde(default)]
    pub(crate) state: Option<ListState>,
    #[serde(default)]
    pub(crate) sequence_id: Option<SequenceId>,
    #[serde(default)]
    pub(crate) group: Option<GroupId>,
}

impl ListQuery {
    fn split(self) -> (ListState, ListFilter) {
        (
            self.state.unwrap_or(ListState::Pending),
            ListFilter {
                sequence_id: self.sequence_id,
                group: self.group,
            },
        )
    }
}

pub(crate) async fn start_handler<R, D>(
    State(engine): State<SharedEngine<R, D>>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<StartRequest>,
) -> Response
where
    R: WorkflowRepository + 'static,
    D: Directory + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::CREATED,
        engine.start_application(
            &actor,
            &request.sequence_id,
            request.payload,
            request.routing_override,
        ),
    )
}

pub(crate) async fn submit_handler<R, D>(
    State(engine): State<SharedEngine<R, D>>,
    Path((application_id, step_id)): Path<(String, String)>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<SubmitRequest>,
) -> Response
where
    R: WorkflowRepository + 'static,
    D: Directory + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    let submission = StepSubmission {
        application_id: ApplicationId(application_id),
        step_id: StepId(step_id),
        payload: request.payload,
        routing_override: request.routing_override,
    };
    respond(StatusCode::OK, engine.submit_step(&actor, submission))
}

pub(crate) async fn process_handler<R, D>(
    State(engine): State<SharedEngine<R, D>>,
    Path(application_id): Path<String>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<SubmitRequest>,
) -> Response
where
    R: WorkflowRepository + 'static,
    D: Directory + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        engine.process_application(
            &actor,
            &ApplicationId(application_id),
            request.payload,
            request.routing_override,
        ),
    )
}

pub(crate) async fn detail_handler<R, D>(
    State(engine): State<SharedEngine<R, D>>,
    Path(application_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    R: WorkflowRepository + 'static,
    D: Directory + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        engine.get_application(&actor, &ApplicationId(application_id)),
    )
}

pub(crate) async fn list_handler<R, D>(
    State(engine): State<SharedEngine<R, D>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Response
where
    R: WorkflowRepository + 'static,
    D: Directory + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    let (state, filter) = query.split();
    respond(
        StatusCode::OK,
        engine.list_applications(&actor, state, &filter, false),
    )
}

pub(crate) async fn admin_list_handler<R, D>(
    State(engine): State<SharedEngine<R, D>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Response
where
    R: WorkflowRepository + 'static,
    D: Directory + 'static,
{
    let actor = match admin_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    let (state, filter) = query.split();
    respond(StatusCode::OK, engine.list_admin(&actor, state, &filter))
}

pub(crate) async fn revert_handler<R, D>(
    State(engine): State<SharedEngine<R, D>>,
    Path(application_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    R: WorkflowRepository + 'static,
    D: Directory + 'static,
{
    let actor = match admin_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        engine.revert(&actor, &ApplicationId(application_id)),
    )
}

pub(crate) async fn status_handler<R, D>(
    State(engine): State<SharedEngine<R, D>>,
    Path(application_id): Path<String>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<StatusRequest>,
) -> Response
where
    R: WorkflowRepository + 'static,
    D: Directory + 'static,
{
    let actor = match admin_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        engine.set_status(&actor, &ApplicationId(application_id), request.status),
    )
}

pub(crate) async fn delete_handler<R, D>(
    State(engine): State<SharedEngine<R, D>>,
    Path(application_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    R: WorkflowRepository + 'static,
    D: Directory + 'static,
{
    let actor = match admin_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    match engine.delete_application(&actor, &ApplicationId(application_id)) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error_response(&error),
    }
}

pub(crate) async fn register_sequence_handler<R, D>(
    State(engine): State<SharedEngine<R, D>>,
    headers: HeaderMap,
    axum::Json(sequence): axum::Json<StepSequence>,
) -> Response
where
    R: WorkflowRepository + 'static,
    D: Directory + 'static,
{
    let actor = match admin_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::CREATED,
        engine.register_sequence(&actor, sequence),
    )
}

pub(crate) async fn org_chart_handler<R, D>(
    State(engine): State<SharedEngine<R, D>>,
    headers: HeaderMap,
) -> Response
where
    R: WorkflowRepository + 'static,
    D: Directory + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(StatusCode::OK, engine.org_chart(&actor))
}

pub(crate) async fn org_subtree_handler<R, D>(
    State(engine): State<SharedEngine<R, D>>,
    Path(node_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    R: WorkflowRepository + 'static,
    D: Directory + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        engine.org_subtree(&actor, &OrgNodeId(node_id)),
    )
}

pub(crate) async fn add_org_node_handler<R, D>(
    State(engine): State<SharedEngine<R, D>>,
    headers: HeaderMap,
    axum::Json(node): axum::Json<OrgNode>,
) -> Response
where
    R: WorkflowRepository + 'static,
    D: Directory + 'static,
{
    let actor = match admin_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(StatusCode::CREATED, engine.add_org_node(&actor, node))
}

pub(crate) async fn remove_org_node_handler<R, D>(
    State(engine): State<SharedEngine<R, D>>,
    Path(node_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    R: WorkflowRepository + 'static,
    D: Directory + 'static,
{
    let actor = match admin_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        engine.remove_org_node(&actor, &OrgNodeId(node_id)),
    )
}

pub(crate) async fn reassign_org_node_handler<R, D>(
    State(engine): State<SharedEngine<R, D>>,
    Path(node_id): Path<String>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<ReassignRequest>,
) -> Response
where
    R: WorkflowRepository + 'static,
    D: Directory + 'static,
{
    let actor = match admin_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    match engine.reassign_org_node(&actor, &OrgNodeId(node_id), &request.superior_id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error_response(&error),
    }
}

/// Reads the caller from the identity headers; a missing id is a 401.
pub(crate) fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, Response> {
    let user_id = headers
        .get(ACTOR_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            let payload = json!({
                "error": format!("missing {ACTOR_ID_HEADER} header"),
            });
            (StatusCode::UNAUTHORIZED, axum::Json(payload)).into_response()
        })?;

    let roles: Vec<String> = headers
        .get(ACTOR_ROLES_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|role| !role.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(Actor::new(user_id).with_roles(roles))
}

fn admin_from_headers(headers: &HeaderMap) -> Result<Actor, Response> {
    let actor = actor_from_headers(headers)?;
    if actor.role_names.iter().any(|role| role == ADMIN_ROLE) {
        Ok(actor)
    } else {
        let payload = json!({
            "error": format!("{} requires the {ADMIN_ROLE} role", actor.user_id),
        });
        Err((StatusCode::FORBIDDEN, axum::Json(payload)).into_response())
    }
}

fn respond<T: Serialize>(status: StatusCode, outcome: Result<T, WorkflowError>) -> Response {
    match outcome {
        Ok(body) => (status, axum::Json(body)).into_response(),
        Err(error) => error_response(&error),
    }
}

pub(crate) fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn error_response(error: &WorkflowError) -> Response {
    let kind = error.kind();
    let payload = json!({
        "error": error.to_string(),
        "kind": kind,
    });
    (status_for(kind), axum::Json(payload)).into_response()
}
