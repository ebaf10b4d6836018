use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use servicehub_core::{
    DlqHistoryEntry, DlqStatus, EntityType, FailureCategory, Message, Namespace, Rule, ServiceHubError,
};
use servicehub_store::{BrokerCredential, DlqFilter};
use time::OffsetDateTime;

use crate::state::AppState;

const CORRELATION_ID_HEADER: &str = "x-correlation-id";

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/namespaces", post(create_namespace).get(list_namespaces))
        .route("/namespaces/:id", get(get_namespace))
        .route("/namespaces/:id/active", put(set_namespace_active))
        .route("/namespaces/:id/tick", post(tick_namespace))
        .route("/namespaces/:id/queues", get(list_queues))
        .route("/namespaces/:id/topics", get(list_topics))
        .route(
            "/namespaces/:id/topics/:topic/subscriptions",
            get(list_subscriptions),
        )
        .route(
            "/namespaces/:id/entities/:entity_type/:entity_name/messages",
            get(peek_messages).post(send_message),
        )
        .route(
            "/namespaces/:id/entities/:entity_type/:entity_name/dead-letter-test",
            post(dead_letter_test),
        )
        .route(
            "/namespaces/:id/entities/:entity_type/:entity_name/counts",
            get(runtime_counts),
        )
        .route("/dlq", get(list_dlq))
        .route("/dlq/summary", get(dlq_summary))
        .route("/dlq:replayAll", post(replay_all))
        .route("/dlq/:id", get(get_dlq_entry))
        .route("/dlq/:id/timeline", get(dlq_timeline))
        .route("/dlq/:id/status", put(set_dlq_status))
        .route("/rules", get(list_rules).post(put_rule))
        .route("/rules/:id", get(get_rule).delete(delete_rule))
        .route("/rules/test", post(test_rule))
        .with_state(state)
        .layer(middleware::from_fn(attach_correlation_id))
}

/// Ensures every response carries an `X-Correlation-Id`, reusing the
/// caller's own header value when one was supplied.
async fn attach_correlation_id(req: Request<Body>, next: Next) -> Response {
    let supplied = req
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let correlation_id = servicehub_telemetry::correlation_id(supplied.as_deref());

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
    response
}

async fn healthz() -> &'static str {
    "ok"
}

fn parse_entity_type(raw: &str) -> Result<EntityType, ServiceHubError> {
    match raw {
        "queue" => Ok(EntityType::Queue),
        "subscription" => Ok(EntityType::Subscription),
        other => Err(ServiceHubError::Validation(format!(
            "unknown entity type {other:?}, expected \"queue\" or \"subscription\""
        ))),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateNamespaceRequest {
    name: String,
    display_label: String,
    connection_string: String,
}

async fn create_namespace(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateNamespaceRequest>,
) -> Result<Json<Namespace>, ServiceHubError> {
    if request.name.trim().is_empty() {
        return Err(ServiceHubError::Validation("name must not be blank".into()));
    }
    let id = uuid::Uuid::new_v4().to_string();
    let now = OffsetDateTime::now_utc();
    let namespace = Namespace {
        id: id.clone(),
        name: request.name,
        display_label: request.display_label,
        credential_ref: id.clone(),
        active: true,
        created_at: now,
        modified_at: now,
        last_connection_test_succeeded: None,
    };

    state
        .credential_store
        .put(
            &id,
            &BrokerCredential {
                connection_string: request.connection_string,
            },
        )
        .await?;
    state.mount_namespace(namespace.clone());
    Ok(Json(namespace))
}

async fn list_namespaces(State(state): State<Arc<AppState>>) -> Json<Vec<Namespace>> {
    Json(state.namespaces.iter().map(|e| e.namespace.clone()).collect())
}

async fn get_namespace(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Namespace>, ServiceHubError> {
    state
        .namespaces
        .get(&id)
        .map(|entry| Json(entry.namespace.clone()))
        .ok_or_else(|| ServiceHubError::NotFound(format!("namespace {id} not found")))
}

#[derive(Deserialize)]
struct SetActiveRequest {
    active: bool,
}

async fn set_namespace_active(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<SetActiveRequest>,
) -> Result<Json<Namespace>, ServiceHubError> {
    let mut entry = state
        .namespaces
        .get_mut(&id)
        .ok_or_else(|| ServiceHubError::NotFound(format!("namespace {id} not found")))?;
    entry.namespace.active = request.active;
    entry.namespace.modified_at = OffsetDateTime::now_utc();
    Ok(Json(entry.namespace.clone()))
}

#[derive(Serialize)]
struct TickResponse {
    entities_scanned: usize,
    detected: usize,
    updated: usize,
    replays_triggered: usize,
}

async fn tick_namespace(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TickResponse>, ServiceHubError> {
    let monitor = state
        .namespaces
        .get(&id)
        .map(|e| e.monitor.clone())
        .ok_or_else(|| ServiceHubError::NotFound(format!("namespace {id} not found")))?;
    let report = monitor.run_once().await?;
    Ok(Json(TickResponse {
        entities_scanned: report.entities_scanned,
        detected: report.detected,
        updated: report.updated,
        replays_triggered: report.replays_triggered,
    }))
}

async fn list_queues(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<servicehub_core::EntitySummary>>, ServiceHubError> {
    let gateway = state
        .namespaces
        .get(&id)
        .map(|e| e.gateway.clone())
        .ok_or_else(|| ServiceHubError::NotFound(format!("namespace {id} not found")))?;
    let queues = gateway
        .list_queues()
        .await
        .map_err(|err| ServiceHubError::ExternalService(err.to_string()))?;
    Ok(Json(queues))
}

async fn list_topics(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<String>>, ServiceHubError> {
    let gateway = state
        .namespaces
        .get(&id)
        .map(|e| e.gateway.clone())
        .ok_or_else(|| ServiceHubError::NotFound(format!("namespace {id} not found")))?;
    let topics = gateway
        .list_topics()
        .await
        .map_err(|err| ServiceHubError::ExternalService(err.to_string()))?;
    Ok(Json(topics))
}

async fn list_subscriptions(
    State(state): State<Arc<AppState>>,
    Path((id, topic)): Path<(String, String)>,
) -> Result<Json<Vec<servicehub_core::EntitySummary>>, ServiceHubError> {
    let gateway = state
        .namespaces
        .get(&id)
        .map(|e| e.gateway.clone())
        .ok_or_else(|| ServiceHubError::NotFound(format!("namespace {id} not found")))?;
    let subscriptions = gateway
        .list_subscriptions(&topic)
        .await
        .map_err(|err| ServiceHubError::ExternalService(err.to_string()))?;
    Ok(Json(subscriptions))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PeekMessagesQuery {
    queue_type: String,
    #[serde(default)]
    skip: usize,
    #[serde(default = "default_take")]
    take: usize,
}

fn default_take() -> usize {
    50
}

async fn peek_messages(
    State(state): State<Arc<AppState>>,
    Path((id, entity_type, entity_name)): Path<(String, String, String)>,
    Query(query): Query<PeekMessagesQuery>,
) -> Result<Json<Vec<Message>>, ServiceHubError> {
    let entity_type = parse_entity_type(&entity_type)?;
    let gateway = state
        .namespaces
        .get(&id)
        .map(|e| e.gateway.clone())
        .ok_or_else(|| ServiceHubError::NotFound(format!("namespace {id} not found")))?;

    let fetch_count = query.skip + query.take;
    let messages = match query.queue_type.as_str() {
        "active" => gateway.peek(&entity_name, entity_type, None, fetch_count).await,
        "deadletter" => gateway.peek_dlq(&entity_name, entity_type, None, fetch_count).await,
        other => {
            return Err(ServiceHubError::Validation(format!(
                "unknown queueType {other:?}, expected \"active\" or \"deadletter\""
            )))
        }
    }
    .map_err(|err| ServiceHubError::ExternalService(err.to_string()))?;

    Ok(Json(messages.into_iter().skip(query.skip).take(query.take).collect()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRequest {
    body: String,
    content_type: Option<String>,
    correlation_id: Option<String>,
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    Path((id, entity_type, entity_name)): Path<(String, String, String)>,
    Json(request): Json<SendMessageRequest>,
) -> Result<(), ServiceHubError> {
    let entity_type = parse_entity_type(&entity_type)?;
    let gateway = state
        .namespaces
        .get(&id)
        .map(|e| e.gateway.clone())
        .ok_or_else(|| ServiceHubError::NotFound(format!("namespace {id} not found")))?;
    let message = Message {
        broker_message_id: uuid::Uuid::new_v4().to_string(),
        sequence_number: 0,
        enqueued_at_utc: OffsetDateTime::now_utc(),
        dead_lettered_at_utc: None,
        dead_letter_reason: None,
        dead_letter_error_description: None,
        delivery_count: 0,
        content_type: request.content_type,
        body: request.body.into_bytes(),
        application_properties: serde_json::Map::new(),
        correlation_id: request.correlation_id,
        session_id: None,
        scheduled_enqueue_time_utc: None,
    };
    gateway
        .send(&entity_name, entity_type, message)
        .await
        .map_err(|err| ServiceHubError::ExternalService(err.to_string()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeadLetterTestRequest {
    count: u8,
    reason: String,
    error_description: Option<String>,
}

async fn dead_letter_test(
    State(state): State<Arc<AppState>>,
    Path((id, entity_type, entity_name)): Path<(String, String, String)>,
    Json(request): Json<DeadLetterTestRequest>,
) -> Result<(), ServiceHubError> {
    let entity_type = parse_entity_type(&entity_type)?;
    let gateway = state
        .namespaces
        .get(&id)
        .map(|e| e.gateway.clone())
        .ok_or_else(|| ServiceHubError::NotFound(format!("namespace {id} not found")))?;
    gateway
        .dead_letter(
            &entity_name,
            entity_type,
            request.count,
            &request.reason,
            request.error_description.as_deref(),
        )
        .await
        .map_err(|err| ServiceHubError::ExternalService(err.to_string()))
}

async fn runtime_counts(
    State(state): State<Arc<AppState>>,
    Path((id, entity_type, entity_name)): Path<(String, String, String)>,
) -> Result<Json<servicehub_core::RuntimeCounts>, ServiceHubError> {
    let entity_type = parse_entity_type(&entity_type)?;
    let gateway = state
        .namespaces
        .get(&id)
        .map(|e| e.gateway.clone())
        .ok_or_else(|| ServiceHubError::NotFound(format!("namespace {id} not found")))?;
    let counts = gateway
        .runtime_counts(&entity_name, entity_type)
        .await
        .map_err(|err| ServiceHubError::ExternalService(err.to_string()))?;
    Ok(Json(counts))
}

#[derive(Deserialize)]
struct DlqListQuery {
    namespace_id: Option<String>,
    entity_name: Option<String>,
    status: Option<String>,
    failure_category: Option<String>,
    search: Option<String>,
    min_delivery_count: Option<i64>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    date_from: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    date_to: Option<OffsetDateTime>,
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_page_size")]
    page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    50
}

fn parse_status(raw: &str) -> Result<DlqStatus, ServiceHubError> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|_| ServiceHubError::Validation(format!("unknown dlq status {raw:?}")))
}

fn parse_category(raw: &str) -> Result<FailureCategory, ServiceHubError> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|_| ServiceHubError::Validation(format!("unknown failure category {raw:?}")))
}

async fn list_dlq(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DlqListQuery>,
) -> Result<(HeaderMap, Json<DlqPageResponse>), ServiceHubError> {
    let date_range = match (query.date_from, query.date_to) {
        (Some(from), Some(to)) => Some((from, to)),
        (Some(_), None) | (None, Some(_)) => {
            return Err(ServiceHubError::Validation(
                "dateFrom and dateTo must both be supplied together".into(),
            ))
        }
        (None, None) => None,
    };
    let filter = DlqFilter {
        namespace_id: query.namespace_id,
        entity_name: query.entity_name,
        status: query.status.as_deref().map(parse_status).transpose()?,
        failure_category: query.failure_category.as_deref().map(parse_category).transpose()?,
        search: query.search,
        min_delivery_count: query.min_delivery_count,
        date_range,
        page: query.page,
        page_size: query.page_size,
    };
    let page = state.query_service.list(filter).await?;

    let has_next = ((page.page - 1) as usize * page.page_size as usize + page.items.len()) < page.total;
    let has_prev = page.page > 1;

    let mut headers = HeaderMap::new();
    headers.insert("x-total-count", HeaderValue::from_str(&page.total.to_string()).unwrap());
    headers.insert("x-page-number", HeaderValue::from_str(&page.page.to_string()).unwrap());
    headers.insert("x-page-size", HeaderValue::from_str(&page.page_size.to_string()).unwrap());

    Ok((
        headers,
        Json(DlqPageResponse {
            items: page.items,
            total_count: page.total,
            has_next,
            has_prev,
        }),
    ))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DlqPageResponse {
    items: Vec<servicehub_core::DlqHistoryEntry>,
    total_count: usize,
    has_next: bool,
    has_prev: bool,
}

async fn get_dlq_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<servicehub_core::DlqHistoryEntry>, ServiceHubError> {
    Ok(Json(state.query_service.get(id).await?))
}

async fn dlq_timeline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<servicehub_core::TimelineEvent>>, ServiceHubError> {
    Ok(Json(state.query_service.timeline(id).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetDlqStatusRequest {
    status: DlqStatus,
    user_notes: Option<String>,
}

async fn set_dlq_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(request): Json<SetDlqStatusRequest>,
) -> Result<Json<servicehub_core::DlqHistoryEntry>, ServiceHubError> {
    Ok(Json(
        state.dlq_store.set_status(id, request.status, request.user_notes).await?,
    ))
}

#[derive(Deserialize)]
struct SummaryQuery {
    namespace_id: Option<String>,
}

async fn dlq_summary(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<servicehub_store::DlqAggregate>, ServiceHubError> {
    Ok(Json(state.query_service.summary(query.namespace_id.as_deref()).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplayAllQuery {
    rule_id: i64,
    namespace_id: Option<String>,
}

/// Replays every `Active` entry matching `ruleId`'s conditions, across every
/// namespace that entry belongs to (or a single one, if `namespaceId` scopes
/// the request).
async fn replay_all(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReplayAllQuery>,
) -> Result<Json<servicehub_engine::BulkReplayResult>, ServiceHubError> {
    let sample = state
        .query_service
        .list(DlqFilter {
            namespace_id: query.namespace_id,
            status: Some(DlqStatus::Active),
            page: 1,
            page_size: 10_000,
            ..Default::default()
        })
        .await?;

    let mut by_namespace: HashMap<String, Vec<DlqHistoryEntry>> = HashMap::new();
    for entry in sample.items {
        by_namespace.entry(entry.namespace_id.clone()).or_default().push(entry);
    }

    let mut result = servicehub_engine::BulkReplayResult::default();
    for (namespace_id, entries) in by_namespace {
        let Some(executor) = state.namespaces.get(&namespace_id).map(|e| e.replay_executor.clone()) else {
            continue;
        };
        let partial = state
            .rule_engine
            .replay_all(query.rule_id, &entries, &executor, "manual:replay-all")
            .await?;
        result.matched += partial.matched;
        result.replayed += partial.replayed;
        result.failed += partial.failed;
        result.skipped += partial.skipped;
        result.results.extend(partial.results);
    }
    Ok(Json(result))
}

async fn list_rules(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Rule>>, ServiceHubError> {
    Ok(Json(state.rule_store.list().await?))
}

async fn get_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Rule>, ServiceHubError> {
    Ok(Json(state.rule_store.get(id).await?))
}

async fn put_rule(
    State(state): State<Arc<AppState>>,
    Json(rule): Json<Rule>,
) -> Result<Json<Rule>, ServiceHubError> {
    Ok(Json(state.rule_store.put(rule).await?))
}

async fn delete_rule(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Result<(), ServiceHubError> {
    state.rule_store.delete(id).await
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestRuleRequest {
    rule: Rule,
    #[serde(default)]
    namespace_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TestRuleResponse {
    tested: usize,
    matched: usize,
    sample_matches: Vec<i64>,
}

async fn test_rule(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TestRuleRequest>,
) -> Result<Json<TestRuleResponse>, ServiceHubError> {
    let sample = state
        .query_service
        .list(DlqFilter {
            namespace_id: request.namespace_id,
            page: 1,
            page_size: 500,
            ..Default::default()
        })
        .await?;
    let result = state.rule_engine.test_rule(&request.rule, &sample.items)?;
    Ok(Json(TestRuleResponse {
        tested: result.tested,
        matched: result.matched,
        sample_matches: result.sample_matches,
    }))
}
