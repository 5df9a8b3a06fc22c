use crate::AppState;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use orb_activitypub::{
    ActorDocument, BoxKind, CollectionKind, InboxAuth, PublicKeyDocument, PAGE_SIZE,
};
use orb_crypto::httpsig::{self, RequestTarget};
use orb_db::Store;
use orb_op_decorator::{DecoratorError, OriginResolver, ResolutionMetadata};
use orb_op_queue::PubSub;
use orb_types::{Operation, OperationType};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

type St<DB, P, R> = State<Arc<AppState<DB, P, R>>>;

fn internal(e: impl std::fmt::Display) -> Response {
    warn!(error = %e, "request failed");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, message.into()).into_response()
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn admin_authorized<DB, P, R>(state: &AppState<DB, P, R>, headers: &HeaderMap) -> bool {
    match &state.config.admin_token {
        Some(token) => bearer(headers) == Some(token.as_str()),
        None => false,
    }
}

// --- CAS ---

pub async fn get_cas<DB, P, R>(State(state): St<DB, P, R>, Path(hash): Path<String>) -> Response
where
    DB: Store + Clone + Send + Sync + 'static,
    P: PubSub + 'static,
    R: OriginResolver + 'static,
{
    match state.cas.read(&hash).await {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(orb_cas::Error::NotFound(_)) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => internal(e),
    }
}

// --- Sidetree operations ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequestBody {
    pub did_suffix: String,
    #[serde(rename = "type")]
    pub operation_type: OperationType,
    /// base64url-encoded signed operation payload
    pub operation: String,
    #[serde(default)]
    pub anchor_origin: Option<String>,
}

pub async fn post_operation<DB, P, R>(
    State(state): St<DB, P, R>,
    Json(body): Json<OperationRequestBody>,
) -> Response
where
    DB: Store + Clone + Send + Sync + 'static,
    P: PubSub + 'static,
    R: OriginResolver + 'static,
{
    let request = match data_encoding::BASE64URL_NOPAD.decode(body.operation.as_bytes()) {
        Ok(bytes) => bytes,
        Err(e) => return bad_request(format!("operation payload is not base64url: {e}")),
    };
    let operation = Operation {
        unique_suffix: body.did_suffix,
        operation_type: body.operation_type,
        operation_request: request,
        anchor_origin: body
            .anchor_origin
            .unwrap_or_else(|| state.config.base.to_string()),
        protocol_version: state.config.protocol_version,
    };

    match state.decorator.decorate(&operation).await {
        Ok(()) => {}
        Err(e @ (DecoratorError::StaleLocalState { .. } | DecoratorError::HasUnpublishedOperations)) => {
            return (StatusCode::BAD_REQUEST, format!("{e}; retry later")).into_response();
        }
        Err(DecoratorError::NotFound(did)) => {
            return bad_request(format!("unknown DID {did}"));
        }
        Err(e) => return internal(e),
    }

    if let Err(e) = state.unpublished.put(&operation) {
        return internal(e);
    }
    match state
        .queue
        .add(operation, state.config.protocol_version)
        .await
    {
        Ok(id) => (StatusCode::OK, Json(json!({ "id": id }))).into_response(),
        Err(e) => internal(e),
    }
}

// --- DID resolution ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResolutionResponse {
    did_document: serde_json::Value,
    did_document_metadata: serde_json::Value,
    #[serde(flatten)]
    metadata: ResolutionMetadata,
}

pub async fn resolve_did<DB, P, R>(State(state): St<DB, P, R>, Path(did): Path<String>) -> Response
where
    DB: Store + Clone + Send + Sync + 'static,
    P: PubSub + 'static,
    R: OriginResolver + 'static,
{
    let Some(suffix) = did.rsplit(':').next().filter(|s| !s.is_empty()) else {
        return bad_request(format!("malformed DID {did}"));
    };
    let published = match state.op_store.get(suffix) {
        Ok(ops) => ops,
        Err(e) => return internal(e),
    };
    let unpublished = match state.unpublished.get(suffix) {
        Ok(ops) => ops,
        Err(e) => return internal(e),
    };
    if published.is_empty() && unpublished.is_empty() {
        return StatusCode::NOT_FOUND.into_response();
    }

    let canonical = published.last().map(|op| {
        format!(
            "did:{}:{}:{}",
            state.config.namespace,
            op.canonical_reference.trim_start_matches("hl:"),
            suffix
        )
    });
    let response = ResolutionResponse {
        did_document: json!({ "id": did }),
        did_document_metadata: json!({
            "published": !published.is_empty(),
            "canonicalId": canonical,
            "versionId": published.last().map(|op| op.canonical_reference.clone()),
        }),
        metadata: ResolutionMetadata {
            published_operation_count: published.len() as u64,
            unpublished_operation_count: unpublished.len() as u64,
        },
    };
    (StatusCode::OK, Json(response)).into_response()
}

// --- ActivityPub service ---

fn check_actor<DB, P, R>(state: &AppState<DB, P, R>, actor: &str) -> Result<(), Response> {
    if actor == state.config.actor_name {
        Ok(())
    } else {
        Err(StatusCode::NOT_FOUND.into_response())
    }
}

pub async fn get_actor<DB, P, R>(State(state): St<DB, P, R>, Path(actor): Path<String>) -> Response
where
    DB: Store + Clone + Send + Sync + 'static,
    P: PubSub + 'static,
    R: OriginResolver + 'static,
{
    if let Err(response) = check_actor(&state, &actor) {
        return response;
    }
    let iri = state.actor_iri();
    let join = |suffix: &str| {
        iri.join(&format!("{}/{suffix}", iri.path()))
            .expect("actor collection IRIs derive from the actor IRI")
    };
    let doc = ActorDocument {
        id: iri.clone(),
        inbox: join("inbox"),
        outbox: join("outbox"),
        followers: Some(join("followers")),
        following: Some(join("following")),
        witnesses: Some(join("witnesses")),
        public_key: Some(PublicKeyDocument::new(
            &format!("{iri}#main-key"),
            &iri,
            &state.public_key,
        )),
    };
    (StatusCode::OK, Json(doc)).into_response()
}

#[derive(Deserialize)]
pub struct PageQuery {
    pub page: Option<u64>,
}

fn collection_json(
    base: &Url,
    total: u64,
    last_page: u64,
    page: Option<u64>,
    items: Vec<serde_json::Value>,
) -> serde_json::Value {
    match page {
        None => json!({
            "id": base.as_str(),
            "type": "OrderedCollection",
            "totalItems": total,
            "first": format!("{base}?page=0"),
            "last": format!("{base}?page={last_page}"),
        }),
        Some(n) => {
            let mut value = json!({
                "id": format!("{base}?page={n}"),
                "type": "OrderedCollectionPage",
                "totalItems": total,
                "orderedItems": items,
            });
            if n < last_page {
                value["next"] = json!(format!("{base}?page={}", n + 1));
            }
            value
        }
    }
}

fn serve_box<DB, P, R>(
    state: &AppState<DB, P, R>,
    actor: &str,
    box_kind: BoxKind,
    page: Option<u64>,
) -> Response
where
    DB: Store + Clone + Send + Sync + 'static,
    P: PubSub + 'static,
    R: OriginResolver + 'static,
{
    if let Err(response) = check_actor(state, actor) {
        return response;
    }
    let iri = state.actor_iri();
    let base = iri
        .join(&format!("{}/{box_kind}", iri.path()))
        .expect("box IRI derives from the actor IRI");
    let total = match state.activity_store.total(&iri, box_kind) {
        Ok(total) => total,
        Err(e) => return internal(e),
    };
    let last_page = total.saturating_sub(1) / PAGE_SIZE;
    let items = match page {
        Some(n) => match state.activity_store.page(&iri, box_kind, n) {
            Ok(activities) => activities
                .iter()
                .filter_map(|a| serde_json::to_value(a).ok())
                .collect(),
            Err(e) => return internal(e),
        },
        None => vec![],
    };
    (
        StatusCode::OK,
        Json(collection_json(&base, total, last_page, page, items)),
    )
        .into_response()
}

pub async fn get_inbox<DB, P, R>(
    State(state): St<DB, P, R>,
    Path(actor): Path<String>,
    Query(query): Query<PageQuery>,
) -> Response
where
    DB: Store + Clone + Send + Sync + 'static,
    P: PubSub + 'static,
    R: OriginResolver + 'static,
{
    serve_box(&state, &actor, BoxKind::Inbox, query.page)
}

pub async fn get_outbox<DB, P, R>(
    State(state): St<DB, P, R>,
    Path(actor): Path<String>,
    Query(query): Query<PageQuery>,
) -> Response
where
    DB: Store + Clone + Send + Sync + 'static,
    P: PubSub + 'static,
    R: OriginResolver + 'static,
{
    serve_box(&state, &actor, BoxKind::Outbox, query.page)
}

pub async fn post_inbox<DB, P, R>(
    State(state): St<DB, P, R>,
    Path(actor): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    DB: Store + Clone + Send + Sync + 'static,
    P: PubSub + 'static,
    R: OriginResolver + 'static,
{
    if let Err(response) = check_actor(&state, &actor) {
        return response;
    }
    let auth = match authenticate(&state, &actor, &headers, &body).await {
        Ok(auth) => auth,
        Err(response) => return response,
    };
    match state.inbox.receive(auth, &body).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(orb_activitypub::Error::Malformed(e)) => bad_request(e),
        Err(orb_activitypub::Error::Unauthorized) => StatusCode::UNAUTHORIZED.into_response(),
        Err(orb_activitypub::Error::Forbidden(e)) => {
            (StatusCode::FORBIDDEN, e).into_response()
        }
        Err(e) => internal(e),
    }
}

async fn authenticate<DB, P, R>(
    state: &AppState<DB, P, R>,
    actor: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<InboxAuth, Response>
where
    DB: Store + Clone + Send + Sync + 'static,
    P: PubSub + 'static,
    R: OriginResolver + 'static,
{
    if let (Some(expected), Some(presented)) = (&state.config.inbox_token, bearer(headers)) {
        if presented == expected {
            return Ok(InboxAuth::Token);
        }
    }

    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| StatusCode::UNAUTHORIZED.into_response())
    };
    let signature = header("signature")?;
    let date = header("date")?;
    let digest = header("digest")?;
    if httpsig::digest_header(body) != digest {
        debug!("inbox digest mismatch");
        return Err(StatusCode::UNAUTHORIZED.into_response());
    }
    let host = state.config.base.host_str().unwrap_or_default();
    let path = format!("/services/{actor}/inbox");
    let target = RequestTarget {
        method: "POST",
        path: &path,
        host,
        date,
        digest,
    };
    let key_id = httpsig::verify_request(&state.key_resolver, &target, signature)
        .await
        .map_err(|e| {
            debug!(error = %e, "inbox signature verification failed");
            StatusCode::UNAUTHORIZED.into_response()
        })?;
    let actor_iri = orb_activitypub::ActorKeyResolver::actor_iri(&key_id)
        .map_err(|_| StatusCode::UNAUTHORIZED.into_response())?;
    Ok(InboxAuth::Actor(actor_iri))
}

pub async fn get_collection<DB, P, R>(
    State(state): St<DB, P, R>,
    Path((actor, collection)): Path<(String, String)>,
    Query(query): Query<PageQuery>,
) -> Response
where
    DB: Store + Clone + Send + Sync + 'static,
    P: PubSub + 'static,
    R: OriginResolver + 'static,
{
    if let Err(response) = check_actor(&state, &actor) {
        return response;
    }
    let kind = match collection.as_str() {
        "followers" => CollectionKind::Followers,
        "following" => CollectionKind::Following,
        "witnesses" => CollectionKind::Witnesses,
        "liked" => CollectionKind::Liked,
        _ => return StatusCode::NOT_FOUND.into_response(),
    };
    let iri = state.actor_iri();
    let base = iri
        .join(&format!("{}/{collection}", iri.path()))
        .expect("collection IRI derives from the actor IRI");
    let members = match state.collections.list(kind) {
        Ok(members) => members,
        Err(e) => return internal(e),
    };
    let total = members.len() as u64;
    let items = members.iter().map(|m| json!(m.as_str())).collect();
    (
        StatusCode::OK,
        Json(collection_json(&base, total, 0, query.page, items)),
    )
        .into_response()
}

// --- Witness log administration ---

pub async fn post_log<DB, P, R>(
    State(state): St<DB, P, R>,
    headers: HeaderMap,
    Json(log): Json<Url>,
) -> Response
where
    DB: Store + Clone + Send + Sync + 'static,
    P: PubSub + 'static,
    R: OriginResolver + 'static,
{
    if !admin_authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match state.vct_store.set_log_endpoint(&log) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => internal(e),
    }
}

pub async fn get_log<DB, P, R>(State(state): St<DB, P, R>) -> Response
where
    DB: Store + Clone + Send + Sync + 'static,
    P: PubSub + 'static,
    R: OriginResolver + 'static,
{
    match state.vct_store.log_endpoint() {
        Ok(Some(url)) => (StatusCode::OK, url.to_string()).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => internal(e),
    }
}

#[derive(Deserialize)]
pub struct LogMonitorRequest {
    #[serde(default)]
    pub activate: Vec<Url>,
    #[serde(default)]
    pub deactivate: Vec<Url>,
}

pub async fn post_log_monitor<DB, P, R>(
    State(state): St<DB, P, R>,
    headers: HeaderMap,
    Json(request): Json<LogMonitorRequest>,
) -> Response
where
    DB: Store + Clone + Send + Sync + 'static,
    P: PubSub + 'static,
    R: OriginResolver + 'static,
{
    if !admin_authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    for log in &request.activate {
        if let Err(e) = state.vct_store.activate(log) {
            return internal(e);
        }
    }
    for log in &request.deactivate {
        if let Err(e) = state.vct_store.deactivate(log) {
            return internal(e);
        }
    }
    StatusCode::OK.into_response()
}

#[derive(Deserialize)]
pub struct LogMonitorQuery {
    pub status: Option<String>,
}

pub async fn get_log_monitor<DB, P, R>(
    State(state): St<DB, P, R>,
    Query(query): Query<LogMonitorQuery>,
) -> Response
where
    DB: Store + Clone + Send + Sync + 'static,
    P: PubSub + 'static,
    R: OriginResolver + 'static,
{
    let logs = match query.status.as_deref() {
        None | Some("active") => state.vct_store.active(),
        Some("inactive") => state.vct_store.inactive(),
        Some(other) => return bad_request(format!("unknown status {other}")),
    };
    match logs {
        Ok(logs) => (StatusCode::OK, Json(json!({ "logs": logs }))).into_response(),
        Err(e) => internal(e),
    }
}

// --- Healthcheck ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    mq_status: String,
    vct_status: String,
    db_status: String,
    kms_status: String,
    status: String,
    current_time: String,
    version: String,
}

pub async fn healthcheck<DB, P, R>(State(state): St<DB, P, R>) -> Response
where
    DB: Store + Clone + Send + Sync + 'static,
    P: PubSub + 'static,
    R: OriginResolver + 'static,
{
    let mq_status = match state.pubsub.health_check().await {
        Ok(()) => "success".to_string(),
        Err(e) => e.to_string(),
    };
    let kms_status = match state.signer.health_check().await {
        Ok(()) => "success".to_string(),
        Err(e) => e.to_string(),
    };
    let db_status = match state.vct_store.log_endpoint() {
        Ok(_) => "success".to_string(),
        Err(e) => e.to_string(),
    };
    let vct_status = match state.vct_store.active() {
        Ok(logs) if logs.is_empty() => "disabled".to_string(),
        Ok(_) => "success".to_string(),
        Err(e) => e.to_string(),
    };

    let healthy = [&mq_status, &kms_status, &db_status]
        .iter()
        .all(|s| *s == "success")
        && (vct_status == "success" || vct_status == "disabled");
    let maintenance = state.maintenance.load(Ordering::Relaxed);
    let status = if maintenance {
        "maintenance"
    } else if healthy {
        "success"
    } else {
        "unavailable"
    };
    let code = if healthy || maintenance {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(HealthResponse {
            mq_status,
            vct_status,
            db_status,
            kms_status,
            status: status.to_string(),
            current_time: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
        .into_response()
}
