//! HTTP request handlers
//!
//! Implements the REST API surface of the dashboard backend.

use actix_web::{web, HttpRequest, HttpResponse, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::alerts;
use crate::config::Settings;
use crate::error::AppError;
use crate::history::{self, HistoryWindow};
use crate::models::{
    AcknowledgeInput, Alert, Contact, ContactInput, CreateAlertInput, EditNodeInput, HealthCheck,
    LogEntry, LogKind, NodeMetadata, NodeReading, NodeRealtime, NodeStatus, NodeType, Notification,
    ReadingInput, RegisterNodeInput, StoredSettings,
};
use crate::prediction;
use crate::simulator;
use crate::sms::{DispatchOutcome, SmsDispatcher};
use crate::status;
use crate::store::{AppState, DatabaseSnapshot};
use crate::validation::{
    normalize_phone, validate_pagination, validate_reading_input, validate_register_input,
};
use crate::websocket::WsSession;

/// Configure all application routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            // Health check
            .route("/health", web::get().to(health_check))
            // Node registry
            .route("/nodes", web::post().to(register_node))
            .route("/nodes", web::get().to(list_nodes))
            .route("/nodes/{id}", web::get().to(get_node))
            .route("/nodes/{id}", web::put().to(edit_node))
            .route("/nodes/{id}", web::delete().to(delete_node))
            .route("/nodes/{id}/realtime", web::post().to(ingest_reading))
            // History
            .route("/nodes/{id}/history", web::get().to(get_history))
            .route("/nodes/{id}/history/export", web::get().to(export_history))
            .route(
                "/nodes/{id}/history/generate",
                web::post().to(generate_history),
            )
            // Map feed
            .route("/map/mesh", web::get().to(get_mesh))
            // Alerts
            .route("/alerts", web::post().to(create_alert))
            .route("/alerts", web::get().to(list_alerts))
            .route("/alerts/{id}/acknowledge", web::post().to(acknowledge_alert))
            // Contacts
            .route("/contacts", web::post().to(add_contact))
            .route("/contacts", web::get().to(list_contacts))
            .route("/contacts/{id}", web::delete().to(delete_contact))
            // Logs, settings, notifications
            .route("/logs", web::get().to(get_logs))
            .route("/settings", web::get().to(get_settings))
            .route("/settings", web::put().to(save_settings))
            .route("/notifications", web::get().to(list_notifications))
            // SMS provider + prediction feed
            .route("/sms/status", web::get().to(sms_status))
            .route("/prediction", web::get().to(get_prediction))
            // Bulk export/import + maintenance
            .route("/export", web::get().to(export_database))
            .route("/import", web::post().to(import_database))
            .route(
                "/maintenance/history/cleanup",
                web::post().to(cleanup_history),
            ),
    )
    // WebSocket endpoint
    .route("/ws", web::get().to(websocket_handler));
}

/// Health check endpoint
///
/// GET /api/health
pub async fn health_check(
    state: web::Data<Arc<RwLock<AppState>>>,
) -> Result<HttpResponse, AppError> {
    let state = state.read().await;

    let health = HealthCheck {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        uptime_seconds: state.uptime_seconds(),
        node_count: state.node_count(),
        active_alerts: state.active_alert_count(),
    };

    Ok(HttpResponse::Ok().json(health))
}

#[derive(Serialize)]
struct RegisterResponse {
    success: bool,
    node_id: String,
    correlation_id: String,
}

/// Register a new node
///
/// POST /api/nodes
///
/// Rejects duplicate ids and out-of-range coordinates; verifies the
/// coordinate round-trip after the write.
pub async fn register_node(
    state: web::Data<Arc<RwLock<AppState>>>,
    body: web::Json<RegisterNodeInput>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let correlation_id = extract_correlation_id(&req);
    let input = body.into_inner();

    validate_register_input(&input)?;

    let node_id = input.id.clone();
    let latitude = input.latitude;
    let longitude = input.longitude;
    let metadata: NodeMetadata = input.into();

    {
        let mut state = state.write().await;
        state.insert_node(metadata)?;

        // Read-back verification of the coordinate round-trip
        let stored = state.get_node(&node_id).ok_or_else(|| {
            AppError::VerificationError(format!("Node {} missing on read-back", node_id))
        })?;
        if stored.metadata.latitude != latitude || stored.metadata.longitude != longitude {
            return Err(AppError::VerificationError(format!(
                "Node {} coordinates mutated on round-trip",
                node_id
            )));
        }

        state.append_log(LogEntry::new(
            LogKind::NodeRegistered,
            format!("Node {} registered", node_id),
            json!({ "node_id": node_id, "latitude": latitude, "longitude": longitude }),
        ));
    }

    info!(
        correlation_id = %correlation_id,
        node_id = %node_id,
        "Node registered"
    );

    Ok(HttpResponse::Created().json(RegisterResponse {
        success: true,
        node_id,
        correlation_id,
    }))
}

/// Dashboard list row: realtime plus binary online/offline status
#[derive(Serialize)]
struct NodeSummary {
    id: String,
    name: String,
    node_type: NodeType,
    latitude: f64,
    longitude: f64,
    status: NodeStatus,
    realtime: NodeRealtime,
}

/// List all nodes with computed status
///
/// GET /api/nodes
///
/// The list view only distinguishes online from offline.
pub async fn list_nodes(
    state: web::Data<Arc<RwLock<AppState>>>,
) -> Result<HttpResponse, AppError> {
    let state = state.read().await;
    let now = Utc::now();

    let rows: Vec<NodeSummary> = state
        .list_nodes()
        .into_iter()
        .map(|record| NodeSummary {
            id: record.metadata.id.clone(),
            name: record.metadata.name.clone(),
            node_type: record.metadata.node_type,
            latitude: record.metadata.latitude,
            longitude: record.metadata.longitude,
            status: status::classify(record.realtime.last_update, now, &status::BINARY),
            realtime: record.realtime.clone(),
        })
        .collect();

    Ok(HttpResponse::Ok().json(rows))
}

#[derive(Serialize)]
struct NodeDetail {
    metadata: NodeMetadata,
    realtime: NodeRealtime,
    /// Three-tier status for the detail view
    status: NodeStatus,
    history_count: usize,
    alert_refs: Vec<crate::models::AlertRef>,
}

/// Get one node with three-tier status
///
/// GET /api/nodes/{id}
pub async fn get_node(
    state: web::Data<Arc<RwLock<AppState>>>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let state = state.read().await;

    let record = state
        .get_node(&id)
        .ok_or_else(|| AppError::NotFound(format!("Node {} does not exist", id)))?;

    Ok(HttpResponse::Ok().json(NodeDetail {
        metadata: record.metadata.clone(),
        realtime: record.realtime.clone(),
        status: status::classify(record.realtime.last_update, Utc::now(), &status::THREE_TIER),
        history_count: record.history.len(),
        alert_refs: record.alert_refs.clone(),
    }))
}

/// Overwrite a node's metadata
///
/// PUT /api/nodes/{id}
pub async fn edit_node(
    state: web::Data<Arc<RwLock<AppState>>>,
    path: web::Path<String>,
    body: web::Json<EditNodeInput>,
) -> Result<HttpResponse, AppError> {
    use validator::Validate;

    let id = path.into_inner();
    let input = body.into_inner();

    if let Err(e) = input.validate() {
        return Err(AppError::ValidationError(e.to_string()));
    }
    crate::validation::validate_coordinates(input.latitude, input.longitude)?;

    let metadata = NodeMetadata {
        id: id.clone(),
        name: input.name,
        node_type: input.node_type,
        latitude: input.latitude,
        longitude: input.longitude,
        altitude: input.altitude,
        description: input.description,
        installer: input.installer,
        created_at: Utc::now(), // preserved by the store
        neighbors: input.neighbors,
    };

    let mut state = state.write().await;
    state.update_node_metadata(&id, metadata)?;
    state.append_log(LogEntry::new(
        LogKind::NodeUpdated,
        format!("Node {} metadata updated", id),
        json!({ "node_id": id }),
    ));

    Ok(HttpResponse::Ok().json(json!({ "success": true, "node_id": id })))
}

/// Delete a node's entire subtree
///
/// DELETE /api/nodes/{id}
///
/// Irreversible; alerts and contacts referencing the node keep their
/// dangling references.
pub async fn delete_node(
    state: web::Data<Arc<RwLock<AppState>>>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();

    let mut state = state.write().await;
    state.delete_node(&id)?;
    state.append_log(LogEntry::new(
        LogKind::NodeDeleted,
        format!("Node {} deleted", id),
        json!({ "node_id": id }),
    ));

    Ok(HttpResponse::Ok().json(json!({ "success": true, "node_id": id })))
}

#[derive(Serialize)]
struct IngestResponse {
    success: bool,
    node_id: String,
    correlation_id: String,
}

/// Ingest a realtime sensor write
///
/// POST /api/nodes/{id}/realtime
pub async fn ingest_reading(
    state: web::Data<Arc<RwLock<AppState>>>,
    path: web::Path<String>,
    body: web::Json<ReadingInput>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let correlation_id = extract_correlation_id(&req);
    let id = path.into_inner();
    let input = body.into_inner();

    validate_reading_input(&input)?;

    {
        let mut state = state.write().await;
        state.apply_reading(&id, input.into_reading())?;
    }

    info!(
        correlation_id = %correlation_id,
        node_id = %id,
        "Sensor reading ingested"
    );

    Ok(HttpResponse::Created().json(IngestResponse {
        success: true,
        node_id: id,
        correlation_id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub window: Option<String>,
}

#[derive(Serialize)]
struct HistoryResponse {
    node_id: String,
    window: String,
    count: usize,
    readings: Vec<NodeReading>,
}

/// Windowed history query
///
/// GET /api/nodes/{id}/history?window=24h
pub async fn get_history(
    state: web::Data<Arc<RwLock<AppState>>>,
    path: web::Path<String>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let window = HistoryWindow::parse(query.window.as_deref().unwrap_or("24h"))?;

    let state = state.read().await;
    let record = state
        .get_node(&id)
        .ok_or_else(|| AppError::NotFound(format!("Node {} does not exist", id)))?;

    let rows = history::filter_window(&record.history, window, Utc::now());

    Ok(HttpResponse::Ok().json(HistoryResponse {
        node_id: id,
        window: window.label().to_string(),
        count: rows.len(),
        readings: rows.into_iter().cloned().collect(),
    }))
}

/// CSV download of the windowed history
///
/// GET /api/nodes/{id}/history/export?window=7d
pub async fn export_history(
    state: web::Data<Arc<RwLock<AppState>>>,
    path: web::Path<String>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let window = HistoryWindow::parse(query.window.as_deref().unwrap_or("7d"))?;

    let state = state.read().await;
    let record = state
        .get_node(&id)
        .ok_or_else(|| AppError::NotFound(format!("Node {} does not exist", id)))?;

    let rows = history::filter_window(&record.history, window, Utc::now());
    let csv = history::to_csv(record, &rows);

    Ok(HttpResponse::Ok()
        .content_type("text/csv")
        .insert_header((
            "Content-Disposition",
            format!("attachment; filename=\"{}_history.csv\"", id),
        ))
        .body(csv))
}

#[derive(Debug, Deserialize)]
pub struct GenerateQuery {
    pub hours: Option<u32>,
    pub interval_mins: Option<u32>,
}

/// Generate demo history for a node
///
/// POST /api/nodes/{id}/history/generate?hours=24&interval_mins=10
pub async fn generate_history(
    state: web::Data<Arc<RwLock<AppState>>>,
    path: web::Path<String>,
    query: web::Query<GenerateQuery>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let hours = query.hours.unwrap_or(24);
    let interval_mins = query.interval_mins.unwrap_or(10);

    if hours == 0 || hours > 24 * 7 {
        return Err(AppError::ValidationError(
            "Hours must be between 1 and 168".to_string(),
        ));
    }
    if interval_mins == 0 || interval_mins > 60 {
        return Err(AppError::ValidationError(
            "Interval must be between 1 and 60 minutes".to_string(),
        ));
    }

    let mut state = state.write().await;
    let node_type = state
        .get_node(&id)
        .ok_or_else(|| AppError::NotFound(format!("Node {} does not exist", id)))?
        .metadata
        .node_type;

    let readings = simulator::generate_demo_history(node_type, hours, interval_mins, Utc::now());
    let generated = state.append_history(&id, readings)?;

    state.append_log(LogEntry::new(
        LogKind::MaintenanceRun,
        format!("Generated {} demo history entries for {}", generated, id),
        json!({ "node_id": id, "hours": hours, "interval_mins": interval_mins }),
    ));

    Ok(HttpResponse::Ok().json(json!({ "success": true, "generated": generated })))
}

#[derive(Serialize)]
struct MeshNode {
    id: String,
    name: String,
    node_type: NodeType,
    latitude: f64,
    longitude: f64,
    status: NodeStatus,
}

#[derive(Serialize)]
struct MeshLink {
    from: String,
    to: String,
}

#[derive(Serialize)]
struct MeshResponse {
    nodes: Vec<MeshNode>,
    links: Vec<MeshLink>,
}

/// Map feed: markers and mesh links
///
/// GET /api/map/mesh
///
/// Nodes with missing or out-of-range coordinates are silently excluded;
/// links require both endpoints to be visible.
pub async fn get_mesh(state: web::Data<Arc<RwLock<AppState>>>) -> Result<HttpResponse, AppError> {
    let state = state.read().await;
    let now = Utc::now();

    let visible: Vec<_> = state
        .list_nodes()
        .into_iter()
        .filter(|record| record.metadata.map_visible())
        .collect();

    let visible_ids: HashSet<&str> = visible.iter().map(|r| r.metadata.id.as_str()).collect();

    let nodes: Vec<MeshNode> = visible
        .iter()
        .map(|record| MeshNode {
            id: record.metadata.id.clone(),
            name: record.metadata.name.clone(),
            node_type: record.metadata.node_type,
            latitude: record.metadata.latitude,
            longitude: record.metadata.longitude,
            status: status::classify(record.realtime.last_update, now, &status::BINARY),
        })
        .collect();

    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut links = Vec::new();
    for record in &visible {
        for neighbor in &record.metadata.neighbors {
            if !visible_ids.contains(neighbor.as_str()) {
                continue;
            }
            let a = record.metadata.id.clone();
            let b = neighbor.clone();
            let key = if a <= b {
                (a.clone(), b.clone())
            } else {
                (b.clone(), a.clone())
            };
            if seen.insert(key) {
                links.push(MeshLink { from: a, to: b });
            }
        }
    }

    Ok(HttpResponse::Ok().json(MeshResponse { nodes, links }))
}

#[derive(Serialize)]
struct CreateAlertResponse {
    success: bool,
    alert: Alert,
    #[serde(skip_serializing_if = "Option::is_none")]
    sms: Option<DispatchOutcome>,
}

/// Create an alert, optionally fanning out SMS
///
/// POST /api/alerts
///
/// SMS dispatch happens after the alert is durably created; its outcome is
/// surfaced but never affects creation.
pub async fn create_alert(
    state: web::Data<Arc<RwLock<AppState>>>,
    dispatcher: web::Data<SmsDispatcher>,
    body: web::Json<CreateAlertInput>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let correlation_id = extract_correlation_id(&req);
    let input = body.into_inner();
    let send_sms = input.send_sms;

    let creation = {
        let mut state = state.write().await;
        alerts::create_alert(&mut state, input)?
    };

    let sms = if send_sms {
        let outcome = dispatcher
            .dispatch(
                &creation.recipients,
                &creation.alert.message,
                &creation.alert.id,
                creation.alert.severity,
            )
            .await;

        let mut state = state.write().await;
        alerts::mark_sms_dispatched(&mut state, &creation.alert.id, &outcome);
        Some(outcome)
    } else {
        None
    };

    info!(
        correlation_id = %correlation_id,
        alert_id = %creation.alert.id,
        sms_requested = send_sms,
        "Alert created via API"
    );

    // Return the stored record, including any sms_sent update
    let alert = {
        let state = state.read().await;
        state
            .get_alert(&creation.alert.id)
            .cloned()
            .unwrap_or(creation.alert)
    };

    Ok(HttpResponse::Created().json(CreateAlertResponse {
        success: true,
        alert,
        sms,
    }))
}

/// List alerts, newest first
///
/// GET /api/alerts
pub async fn list_alerts(
    state: web::Data<Arc<RwLock<AppState>>>,
) -> Result<HttpResponse, AppError> {
    let state = state.read().await;
    let alerts: Vec<Alert> = state.list_alerts().into_iter().cloned().collect();
    Ok(HttpResponse::Ok().json(alerts))
}

/// Acknowledge an alert
///
/// POST /api/alerts/{id}/acknowledge
pub async fn acknowledge_alert(
    state: web::Data<Arc<RwLock<AppState>>>,
    path: web::Path<String>,
    body: web::Json<AcknowledgeInput>,
) -> Result<HttpResponse, AppError> {
    use validator::Validate;

    let id = path.into_inner();
    let input = body.into_inner();
    if let Err(e) = input.validate() {
        return Err(AppError::ValidationError(e.to_string()));
    }

    let mut state = state.write().await;
    let alert = alerts::acknowledge_alert(&mut state, &id, &input.acknowledged_by)?;

    Ok(HttpResponse::Ok().json(alert))
}

/// Add a contact
///
/// POST /api/contacts
///
/// The phone number is normalized to +91XXXXXXXXXX before storing.
pub async fn add_contact(
    state: web::Data<Arc<RwLock<AppState>>>,
    body: web::Json<ContactInput>,
) -> Result<HttpResponse, AppError> {
    use validator::Validate;

    let input = body.into_inner();
    if let Err(e) = input.validate() {
        return Err(AppError::ValidationError(e.to_string()));
    }

    let phone = normalize_phone(&input.phone)?;
    let contact = Contact {
        id: Uuid::new_v4().to_string(),
        name: input.name,
        phone,
        email: input.email,
        preference: input.preference,
        associated_nodes: input.associated_nodes,
    };

    let mut state = state.write().await;
    state.insert_contact(contact.clone());
    state.append_log(LogEntry::new(
        LogKind::ContactAdded,
        format!("Contact {} added", contact.name),
        json!({ "contact_id": contact.id }),
    ));

    Ok(HttpResponse::Created().json(contact))
}

/// List contacts
///
/// GET /api/contacts
pub async fn list_contacts(
    state: web::Data<Arc<RwLock<AppState>>>,
) -> Result<HttpResponse, AppError> {
    let state = state.read().await;
    let contacts: Vec<Contact> = state.list_contacts().into_iter().cloned().collect();
    Ok(HttpResponse::Ok().json(contacts))
}

/// Delete a contact
///
/// DELETE /api/contacts/{id}
///
/// Unconditional; alerts already carrying the contact's phone keep it.
pub async fn delete_contact(
    state: web::Data<Arc<RwLock<AppState>>>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();

    let mut state = state.write().await;
    let contact = state.delete_contact(&id)?;
    state.append_log(LogEntry::new(
        LogKind::ContactDeleted,
        format!("Contact {} deleted", contact.name),
        json!({ "contact_id": id }),
    ));

    Ok(HttpResponse::Ok().json(json!({ "success": true, "contact_id": id })))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub kind: Option<LogKind>,
}

#[derive(Serialize)]
struct PaginatedResponse<T> {
    data: Vec<T>,
    page: u32,
    limit: u32,
    total: u32,
    total_pages: u32,
}

/// Paginated log read, newest first
///
/// GET /api/logs?page=1&limit=100&kind=alert_created
pub async fn get_logs(
    state: web::Data<Arc<RwLock<AppState>>>,
    query: web::Query<LogsQuery>,
) -> Result<HttpResponse, AppError> {
    let (page, limit) = validate_pagination(query.page, query.limit)?;

    let state = state.read().await;
    let (entries, total) = state.logs_page(page, limit, query.kind);

    Ok(HttpResponse::Ok().json(PaginatedResponse {
        data: entries.into_iter().cloned().collect::<Vec<LogEntry>>(),
        page,
        limit,
        total: total as u32,
        total_pages: ((total as f64) / (limit as f64)).ceil() as u32,
    }))
}

/// Get the whole settings record
///
/// GET /api/settings
pub async fn get_settings(
    state: web::Data<Arc<RwLock<AppState>>>,
) -> Result<HttpResponse, AppError> {
    let state = state.read().await;
    Ok(HttpResponse::Ok().json(state.settings().clone()))
}

/// Save the whole settings record, last write wins
///
/// PUT /api/settings
pub async fn save_settings(
    state: web::Data<Arc<RwLock<AppState>>>,
    body: web::Json<StoredSettings>,
) -> Result<HttpResponse, AppError> {
    use validator::Validate;

    let input = body.into_inner();
    if let Err(e) = input.validate() {
        return Err(AppError::ValidationError(e.to_string()));
    }

    let mut state = state.write().await;
    let saved = state.save_settings(input).clone();
    state.append_log(LogEntry::new(
        LogKind::SettingsSaved,
        "Settings saved",
        serde_json::Value::Null,
    ));

    Ok(HttpResponse::Ok().json(saved))
}

/// List in-app notifications, newest first
///
/// GET /api/notifications
pub async fn list_notifications(
    state: web::Data<Arc<RwLock<AppState>>>,
) -> Result<HttpResponse, AppError> {
    let state = state.read().await;
    let notifications: Vec<Notification> =
        state.list_notifications().into_iter().cloned().collect();
    Ok(HttpResponse::Ok().json(notifications))
}

/// SMS provider readiness
///
/// GET /api/sms/status
pub async fn sms_status(dispatcher: web::Data<SmsDispatcher>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(dispatcher.status()))
}

/// Cloudburst prediction feed
///
/// GET /api/prediction
pub async fn get_prediction(settings: web::Data<Settings>) -> Result<HttpResponse, AppError> {
    let response = prediction::load_predictions(&settings.prediction.csv_path);
    Ok(HttpResponse::Ok().json(response))
}

/// Whole-database JSON dump
///
/// GET /api/export
pub async fn export_database(
    state: web::Data<Arc<RwLock<AppState>>>,
) -> Result<HttpResponse, AppError> {
    let state = state.read().await;
    Ok(HttpResponse::Ok().json(state.snapshot()))
}

/// Wholesale restore from a dump
///
/// POST /api/import
pub async fn import_database(
    state: web::Data<Arc<RwLock<AppState>>>,
    body: web::Json<DatabaseSnapshot>,
) -> Result<HttpResponse, AppError> {
    let snapshot = body.into_inner();
    let nodes = snapshot.nodes.len();

    let mut state = state.write().await;
    state.restore(snapshot);
    state.append_log(LogEntry::new(
        LogKind::DataImported,
        format!("Database restored: {} nodes", nodes),
        serde_json::Value::Null,
    ));

    Ok(HttpResponse::Ok().json(json!({ "success": true, "nodes": nodes })))
}

/// Drop history entries older than the configured retention
///
/// POST /api/maintenance/history/cleanup
pub async fn cleanup_history(
    state: web::Data<Arc<RwLock<AppState>>>,
) -> Result<HttpResponse, AppError> {
    let mut state = state.write().await;
    let retention_days = state.settings().system.retention_days;
    let (processed, removed) = state.cleanup_history(retention_days);

    state.append_log(LogEntry::new(
        LogKind::MaintenanceRun,
        format!(
            "History cleanup: {} entries removed across {} nodes",
            removed, processed
        ),
        json!({ "retention_days": retention_days }),
    ));

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "nodes_processed": processed,
        "entries_removed": removed,
    })))
}

/// WebSocket upgrade handler
///
/// GET /ws
pub async fn websocket_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<Arc<RwLock<AppState>>>,
) -> Result<HttpResponse, actix_web::Error> {
    let client_id = Uuid::new_v4().to_string();

    info!(client_id = %client_id, "WebSocket connection request");

    // Register client
    {
        let mut state = state.write().await;
        state.add_client(client_id.clone());
    }

    let ws_session = WsSession::new(client_id, state.get_ref().clone());

    actix_web_actors::ws::start(ws_session, &req, stream)
}

/// Extract or generate correlation ID from request headers
fn extract_correlation_id(req: &HttpRequest) -> String {
    req.headers()
        .get("X-Correlation-ID")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SmsSettings;
    use actix_web::{test, App};

    fn test_settings() -> Settings {
        Settings {
            server: crate::config::ServerSettings {
                host: "127.0.0.1".into(),
                port: 0,
            },
            simulator: crate::config::SimulatorSettings {
                enabled: false,
                interval_ms: 1000,
            },
            sms: SmsSettings {
                enabled: false,
                account_sid: None,
                auth_token: None,
                phone_number: None,
                api_base_url: "https://api.twilio.com".into(),
            },
            prediction: crate::config::PredictionSettings {
                csv_path: "/nonexistent/forecast.csv".into(),
            },
        }
    }

    macro_rules! test_app {
        ($state:expr) => {{
            let settings = test_settings();
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state))
                    .app_data(web::Data::new(SmsDispatcher::new(settings.sms.clone())))
                    .app_data(web::Data::new(settings))
                    .configure(configure_routes),
            )
            .await
        }};
    }

    fn register_body(id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "name": format!("{} station", id),
            "node_type": "sensor",
            "latitude": 28.6139,
            "longitude": 77.2090,
        })
    }

    #[actix_web::test]
    async fn test_health_check() {
        let state = Arc::new(RwLock::new(AppState::new()));
        let app = test_app!(state);

        let req = test::TestRequest::get().uri("/api/health").to_request();
        let resp = test::call_service(&app, req).await;

        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn test_register_valid_node() {
        let state = Arc::new(RwLock::new(AppState::new()));
        let app = test_app!(state.clone());

        let req = test::TestRequest::post()
            .uri("/api/nodes")
            .set_json(register_body("node1"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 201);

        // Round-trips the same numeric coordinates
        let s = state.read().await;
        let record = s.get_node("node1").unwrap();
        assert_eq!(record.metadata.latitude, 28.6139);
        assert_eq!(record.metadata.longitude, 77.2090);
    }

    #[actix_web::test]
    async fn test_register_out_of_range_latitude() {
        let state = Arc::new(RwLock::new(AppState::new()));
        let app = test_app!(state.clone());

        let mut body = register_body("node1");
        body["latitude"] = json!(95.0);

        let req = test::TestRequest::post()
            .uri("/api/nodes")
            .set_json(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);

        // No write happened
        assert!(state.read().await.get_node("node1").is_none());
    }

    #[actix_web::test]
    async fn test_register_duplicate_id() {
        let state = Arc::new(RwLock::new(AppState::new()));
        let app = test_app!(state.clone());

        let req = test::TestRequest::post()
            .uri("/api/nodes")
            .set_json(register_body("node1"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 201);

        let mut second = register_body("node1");
        second["name"] = json!("imposter");
        let req = test::TestRequest::post()
            .uri("/api/nodes")
            .set_json(second)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 409);

        // Existing record unchanged
        let s = state.read().await;
        assert_eq!(s.get_node("node1").unwrap().metadata.name, "node1 station");
    }

    #[actix_web::test]
    async fn test_fresh_node_offline_until_reading() {
        let state = Arc::new(RwLock::new(AppState::new()));
        let app = test_app!(state.clone());

        let req = test::TestRequest::post()
            .uri("/api/nodes")
            .set_json(register_body("node1"))
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::get().uri("/api/nodes").to_request();
        let rows: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(rows[0]["status"], "offline");

        let req = test::TestRequest::post()
            .uri("/api/nodes/node1/realtime")
            .set_json(json!({
                "temperature": 27.4,
                "pressure": 1002.5,
                "signal_strength": -71.0,
            }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 201);

        let req = test::TestRequest::get().uri("/api/nodes").to_request();
        let rows: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(rows[0]["status"], "online");
    }

    #[actix_web::test]
    async fn test_ingest_unknown_node() {
        let state = Arc::new(RwLock::new(AppState::new()));
        let app = test_app!(state);

        let req = test::TestRequest::post()
            .uri("/api/nodes/ghost/realtime")
            .set_json(json!({ "temperature": 27.4, "pressure": 1002.5 }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 404);
    }

    #[actix_web::test]
    async fn test_alert_with_empty_node_list() {
        let state = Arc::new(RwLock::new(AppState::new()));
        let app = test_app!(state);

        let req = test::TestRequest::post()
            .uri("/api/alerts")
            .set_json(json!({
                "message": "cloudburst risk",
                "severity": "critical",
                "affected_nodes": [],
            }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);
    }

    #[actix_web::test]
    async fn test_alert_creation_and_acknowledge() {
        let state = Arc::new(RwLock::new(AppState::new()));
        let app = test_app!(state.clone());

        let req = test::TestRequest::post()
            .uri("/api/nodes")
            .set_json(register_body("node1"))
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::post()
            .uri("/api/alerts")
            .set_json(json!({
                "message": "cloudburst risk",
                "severity": "critical",
                "affected_nodes": ["node1"],
            }))
            .to_request();
        let created: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let alert_id = created["alert"]["id"].as_str().unwrap().to_string();
        assert_eq!(created["alert"]["affected_nodes"], json!(["node1"]));

        let req = test::TestRequest::post()
            .uri(&format!("/api/alerts/{}/acknowledge", alert_id))
            .set_json(json!({ "acknowledged_by": "operator" }))
            .to_request();
        let acked: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(acked["acknowledged"], json!(true));
        assert_eq!(acked["acknowledged_by"], json!("operator"));
    }

    #[actix_web::test]
    async fn test_contact_phone_normalized() {
        let state = Arc::new(RwLock::new(AppState::new()));
        let app = test_app!(state);

        let req = test::TestRequest::post()
            .uri("/api/contacts")
            .set_json(json!({
                "name": "Operator",
                "phone": "9876543210",
                "preference": "sms",
                "associated_nodes": ["node1"],
            }))
            .to_request();
        let contact: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(contact["phone"], json!("+919876543210"));
    }

    #[actix_web::test]
    async fn test_contact_invalid_phone() {
        let state = Arc::new(RwLock::new(AppState::new()));
        let app = test_app!(state);

        let req = test::TestRequest::post()
            .uri("/api/contacts")
            .set_json(json!({
                "name": "Operator",
                "phone": "12345",
                "preference": "sms",
            }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);
    }

    #[actix_web::test]
    async fn test_mesh_links_between_neighbors() {
        let state = Arc::new(RwLock::new(AppState::new()));
        let app = test_app!(state.clone());

        let mut first = register_body("node1");
        first["neighbors"] = json!(["node2"]);
        let req = test::TestRequest::post()
            .uri("/api/nodes")
            .set_json(first)
            .to_request();
        test::call_service(&app, req).await;

        let mut second = register_body("node2");
        second["neighbors"] = json!(["node1", "ghost"]);
        let req = test::TestRequest::post()
            .uri("/api/nodes")
            .set_json(second)
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::get().uri("/api/map/mesh").to_request();
        let mesh: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(mesh["nodes"].as_array().unwrap().len(), 2);
        // One deduplicated link; the dangling neighbor is dropped
        assert_eq!(mesh["links"].as_array().unwrap().len(), 1);
    }

    #[actix_web::test]
    async fn test_settings_round_trip() {
        let state = Arc::new(RwLock::new(AppState::new()));
        let app = test_app!(state);

        let req = test::TestRequest::get().uri("/api/settings").to_request();
        let mut settings: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert!(settings["last_saved"].is_null());

        settings["system"]["retention_days"] = json!(14);
        let req = test::TestRequest::put()
            .uri("/api/settings")
            .set_json(&settings)
            .to_request();
        let saved: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(saved["system"]["retention_days"], json!(14));
        assert!(!saved["last_saved"].is_null());
    }

    #[actix_web::test]
    async fn test_settings_rejects_out_of_range() {
        let state = Arc::new(RwLock::new(AppState::new()));
        let app = test_app!(state);

        let req = test::TestRequest::get().uri("/api/settings").to_request();
        let mut settings: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        settings["system"]["retention_days"] = json!(999);
        let req = test::TestRequest::put()
            .uri("/api/settings")
            .set_json(&settings)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);
    }

    #[actix_web::test]
    async fn test_sms_status_unconfigured() {
        let state = Arc::new(RwLock::new(AppState::new()));
        let app = test_app!(state);

        let req = test::TestRequest::get().uri("/api/sms/status").to_request();
        let status: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(status["configured"], json!(false));
        assert_eq!(status["status"], json!("disabled"));
    }

    #[actix_web::test]
    async fn test_prediction_missing_csv_is_soft() {
        let state = Arc::new(RwLock::new(AppState::new()));
        let app = test_app!(state);

        let req = test::TestRequest::get().uri("/api/prediction").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["success"], json!(false));
        assert!(body["predictions"].as_array().unwrap().is_empty());
    }

    #[actix_web::test]
    async fn test_export_import_round_trip() {
        let state = Arc::new(RwLock::new(AppState::new()));
        let app = test_app!(state.clone());

        let req = test::TestRequest::post()
            .uri("/api/nodes")
            .set_json(register_body("node1"))
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::get().uri("/api/export").to_request();
        let dump: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        // Import into a fresh app
        let fresh = Arc::new(RwLock::new(AppState::new()));
        let fresh_app = test_app!(fresh.clone());
        let req = test::TestRequest::post()
            .uri("/api/import")
            .set_json(&dump)
            .to_request();
        assert_eq!(test::call_service(&fresh_app, req).await.status(), 200);
        assert!(fresh.read().await.get_node("node1").is_some());
    }

    #[actix_web::test]
    async fn test_history_export_csv() {
        let state = Arc::new(RwLock::new(AppState::new()));
        let app = test_app!(state.clone());

        let req = test::TestRequest::post()
            .uri("/api/nodes")
            .set_json(register_body("node1"))
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::post()
            .uri("/api/nodes/node1/realtime")
            .set_json(json!({ "temperature": 27.4, "pressure": 1002.5 }))
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::get()
            .uri("/api/nodes/node1/history/export?window=1h")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let body = test::read_body(resp).await;
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.starts_with("node_id,node_name,timestamp"));
        assert!(text.lines().count() >= 2);
    }

    #[actix_web::test]
    async fn test_invalid_history_window() {
        let state = Arc::new(RwLock::new(AppState::new()));
        let app = test_app!(state.clone());

        let req = test::TestRequest::post()
            .uri("/api/nodes")
            .set_json(register_body("node1"))
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::get()
            .uri("/api/nodes/node1/history?window=3h")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);
    }

    #[actix_web::test]
    async fn test_generate_history_then_cleanup() {
        let state = Arc::new(RwLock::new(AppState::new()));
        let app = test_app!(state.clone());

        let req = test::TestRequest::post()
            .uri("/api/nodes")
            .set_json(register_body("node1"))
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::post()
            .uri("/api/nodes/node1/history/generate?hours=6&interval_mins=10")
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["generated"], json!(36));

        // Recent entries survive the retention sweep
        let req = test::TestRequest::post()
            .uri("/api/maintenance/history/cleanup")
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["entries_removed"], json!(0));
    }

    #[actix_web::test]
    async fn test_logs_paginated() {
        let state = Arc::new(RwLock::new(AppState::new()));
        let app = test_app!(state.clone());

        for i in 0..3 {
            let req = test::TestRequest::post()
                .uri("/api/nodes")
                .set_json(register_body(&format!("node{}", i)))
                .to_request();
            test::call_service(&app, req).await;
        }

        let req = test::TestRequest::get()
            .uri("/api/logs?page=1&limit=2")
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["total"], json!(3));
        assert_eq!(body["data"].as_array().unwrap().len(), 2);
        assert_eq!(body["total_pages"], json!(2));
    }

    #[actix_web::test]
    async fn test_delete_node_leaves_dangling_alert() {
        let state = Arc::new(RwLock::new(AppState::new()));
        let app = test_app!(state.clone());

        let req = test::TestRequest::post()
            .uri("/api/nodes")
            .set_json(register_body("node1"))
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::post()
            .uri("/api/alerts")
            .set_json(json!({
                "message": "flood watch",
                "severity": "warning",
                "affected_nodes": ["node1"],
            }))
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::delete().uri("/api/nodes/node1").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 200);

        // Alert survives with its now-dangling reference
        let req = test::TestRequest::get().uri("/api/alerts").to_request();
        let alerts: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(alerts[0]["affected_nodes"], json!(["node1"]));
    }
}
