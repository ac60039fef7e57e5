//! In-memory hierarchical store
//!
//! Central state container holding the same entity subtrees the dashboard's
//! hosted realtime database exposes (`nodes/{id}/metadata|realtime|history`,
//! `alerts/{id}`, `contacts/{id}`, `logs/{id}`, `settings`,
//! `notifications/{id}`). Constructed once and injected, so every operation
//! is testable without a live backing service.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::models::{
    Alert, AlertRef, Contact, LogEntry, LogKind, NodeMetadata, NodeReading, NodeRecord,
    Notification, StoredSettings,
};
use crate::status;

/// Upper bound on log entries kept in memory; oldest entries fall off first.
/// Reads are paginated regardless.
const MAX_LOG_ENTRIES: usize = 10_000;

/// Central application state
#[derive(Debug)]
pub struct AppState {
    /// Node subtrees keyed by node id
    nodes: HashMap<String, NodeRecord>,
    /// Alert records keyed by alert id
    alerts: HashMap<String, Alert>,
    /// Contact records keyed by contact id
    contacts: HashMap<String, Contact>,
    /// Append-only event log, oldest first
    logs: VecDeque<LogEntry>,
    /// In-app notification records keyed by id
    notifications: HashMap<String, Notification>,
    /// Whole-object settings record
    settings: StoredSettings,
    /// Application start time
    start_time: DateTime<Utc>,
    /// Total realtime readings processed
    total_readings: u64,
    /// Connected WebSocket clients
    connected_clients: Vec<String>,
}

impl AppState {
    /// Create new application state
    pub fn new() -> Self {
        info!("Initializing application state");
        Self {
            nodes: HashMap::new(),
            alerts: HashMap::new(),
            contacts: HashMap::new(),
            logs: VecDeque::new(),
            notifications: HashMap::new(),
            settings: StoredSettings::default(),
            start_time: Utc::now(),
            total_readings: 0,
            connected_clients: Vec::new(),
        }
    }

    // -----------------------------------------------------------------
    // Nodes
    // -----------------------------------------------------------------

    /// Create-if-absent node registration. The existence check and the
    /// insert happen atomically under the store's write lock, so two
    /// concurrent registrations with the same id cannot both succeed.
    pub fn insert_node(&mut self, metadata: NodeMetadata) -> AppResult<()> {
        let id = metadata.id.clone();
        match self.nodes.entry(id.clone()) {
            std::collections::hash_map::Entry::Occupied(_) => Err(AppError::DuplicateIdError(
                format!("Node {} is already registered", id),
            )),
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(NodeRecord::new(metadata));
                debug!(node_id = %id, "Node record inserted");
                Ok(())
            }
        }
    }

    pub fn get_node(&self, id: &str) -> Option<&NodeRecord> {
        self.nodes.get(id)
    }

    /// Unconditional overwrite of a node's metadata subtree. The created-at
    /// stamp of the original registration is preserved.
    pub fn update_node_metadata(&mut self, id: &str, mut metadata: NodeMetadata) -> AppResult<()> {
        let record = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("Node {} does not exist", id)))?;
        metadata.created_at = record.metadata.created_at;
        record.metadata = metadata;
        Ok(())
    }

    /// Remove the entire node subtree. Alerts and contacts referencing the
    /// id are left dangling, as the dashboard expects.
    pub fn delete_node(&mut self, id: &str) -> AppResult<NodeRecord> {
        self.nodes
            .remove(id)
            .ok_or_else(|| AppError::NotFound(format!("Node {} does not exist", id)))
    }

    /// Apply a realtime sensor write: overwrite the realtime subtree and
    /// append the reading to history.
    pub fn apply_reading(&mut self, id: &str, reading: NodeReading) -> AppResult<()> {
        let record = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("Node {} does not exist", id)))?;

        record.realtime.temperature = reading.temperature;
        record.realtime.pressure = reading.pressure;
        record.realtime.humidity = reading.humidity;
        record.realtime.signal_strength = reading.signal_strength;
        record.realtime.last_update = Some(reading.timestamp);
        record.realtime.status =
            status::classify(Some(reading.timestamp), Utc::now(), &status::THREE_TIER);

        record.history.push(reading);
        self.total_readings += 1;

        Ok(())
    }

    /// Append already-timestamped readings to a node's history without
    /// touching the realtime subtree. Used by bulk history generation.
    pub fn append_history(&mut self, id: &str, readings: Vec<NodeReading>) -> AppResult<usize> {
        let record = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("Node {} does not exist", id)))?;
        let count = readings.len();
        record.history.extend(readings);
        Ok(count)
    }

    pub fn list_nodes(&self) -> Vec<&NodeRecord> {
        let mut nodes: Vec<&NodeRecord> = self.nodes.values().collect();
        nodes.sort_by(|a, b| a.metadata.id.cmp(&b.metadata.id));
        nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Write a denormalized alert back-reference under a node's subtree.
    /// Returns false when the node does not exist (the reference is skipped,
    /// not queued).
    pub fn add_alert_ref(&mut self, node_id: &str, alert_ref: AlertRef) -> bool {
        match self.nodes.get_mut(node_id) {
            Some(record) => {
                record.alert_refs.push(alert_ref);
                true
            }
            None => false,
        }
    }

    /// Drop history entries older than the retention cutoff, one node at a
    /// time. Returns (nodes processed, entries removed).
    pub fn cleanup_history(&mut self, retention_days: u32) -> (usize, usize) {
        let cutoff = Utc::now() - Duration::days(retention_days as i64);
        let mut removed = 0;
        let mut processed = 0;

        for record in self.nodes.values_mut() {
            let before = record.history.len();
            record.history.retain(|r| r.timestamp >= cutoff);
            removed += before - record.history.len();
            processed += 1;
        }

        (processed, removed)
    }

    // -----------------------------------------------------------------
    // Alerts
    // -----------------------------------------------------------------

    pub fn insert_alert(&mut self, alert: Alert) {
        debug!(alert_id = %alert.id, severity = %alert.severity, "Alert record inserted");
        self.alerts.insert(alert.id.clone(), alert);
    }

    pub fn get_alert(&self, id: &str) -> Option<&Alert> {
        self.alerts.get(id)
    }

    pub fn get_alert_mut(&mut self, id: &str) -> Option<&mut Alert> {
        self.alerts.get_mut(id)
    }

    /// All alerts, newest first
    pub fn list_alerts(&self) -> Vec<&Alert> {
        let mut alerts: Vec<&Alert> = self.alerts.values().collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        alerts
    }

    pub fn active_alert_count(&self) -> usize {
        self.alerts.values().filter(|a| !a.acknowledged).count()
    }

    pub fn alert_count(&self) -> usize {
        self.alerts.len()
    }

    // -----------------------------------------------------------------
    // Contacts
    // -----------------------------------------------------------------

    pub fn insert_contact(&mut self, contact: Contact) {
        self.contacts.insert(contact.id.clone(), contact);
    }

    pub fn delete_contact(&mut self, id: &str) -> AppResult<Contact> {
        self.contacts
            .remove(id)
            .ok_or_else(|| AppError::NotFound(format!("Contact {} does not exist", id)))
    }

    pub fn list_contacts(&self) -> Vec<&Contact> {
        let mut contacts: Vec<&Contact> = self.contacts.values().collect();
        contacts.sort_by(|a, b| a.name.cmp(&b.name));
        contacts
    }

    /// Contacts whose associated-node set intersects the given node ids
    pub fn contacts_for_nodes(&self, node_ids: &[String]) -> Vec<&Contact> {
        let mut matched: Vec<&Contact> = self
            .contacts
            .values()
            .filter(|c| c.associated_nodes.iter().any(|n| node_ids.contains(n)))
            .collect();
        matched.sort_by(|a, b| a.name.cmp(&b.name));
        matched
    }

    // -----------------------------------------------------------------
    // Logs
    // -----------------------------------------------------------------

    pub fn append_log(&mut self, entry: LogEntry) {
        if self.logs.len() >= MAX_LOG_ENTRIES {
            self.logs.pop_front();
        }
        self.logs.push_back(entry);
    }

    /// Paginated log read, newest first, optionally filtered by event kind.
    /// Returns the page plus the total number of matching entries.
    pub fn logs_page(
        &self,
        page: u32,
        limit: u32,
        kind: Option<LogKind>,
    ) -> (Vec<&LogEntry>, usize) {
        let matching: Vec<&LogEntry> = self
            .logs
            .iter()
            .rev()
            .filter(|e| kind.map_or(true, |k| e.kind == k))
            .collect();

        let total = matching.len();
        let start = ((page - 1) * limit) as usize;
        let end = (start + limit as usize).min(total);

        let entries = if start < total {
            matching[start..end].to_vec()
        } else {
            Vec::new()
        };

        (entries, total)
    }

    // -----------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------

    pub fn insert_notification(&mut self, notification: Notification) {
        self.notifications
            .insert(notification.id.clone(), notification);
    }

    /// All notifications, newest first. Expired entries are returned too;
    /// expiry is data, nothing sweeps it.
    pub fn list_notifications(&self) -> Vec<&Notification> {
        let mut notifications: Vec<&Notification> = self.notifications.values().collect();
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        notifications
    }

    // -----------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------

    pub fn settings(&self) -> &StoredSettings {
        &self.settings
    }

    /// Whole-object settings save, last write wins. Stamps `last_saved`.
    pub fn save_settings(&mut self, mut settings: StoredSettings) -> &StoredSettings {
        settings.last_saved = Some(Utc::now());
        self.settings = settings;
        &self.settings
    }

    // -----------------------------------------------------------------
    // Export / import
    // -----------------------------------------------------------------

    /// Whole-database dump. No partial subset, no schema version tag.
    pub fn snapshot(&self) -> DatabaseSnapshot {
        DatabaseSnapshot {
            nodes: self.nodes.clone(),
            alerts: self.alerts.clone(),
            contacts: self.contacts.clone(),
            logs: self.logs.iter().cloned().collect(),
            notifications: self.notifications.clone(),
            settings: self.settings.clone(),
        }
    }

    /// Wholesale restore from a dump; replaces every subtree and rebuilds
    /// the reading counter from the imported histories.
    pub fn restore(&mut self, snapshot: DatabaseSnapshot) {
        self.total_readings = snapshot
            .nodes
            .values()
            .map(|n| n.history.len() as u64)
            .sum();
        self.nodes = snapshot.nodes;
        self.alerts = snapshot.alerts;
        self.contacts = snapshot.contacts;
        self.logs = snapshot.logs.into();
        self.notifications = snapshot.notifications;
        self.settings = snapshot.settings;
        info!(
            nodes = self.nodes.len(),
            alerts = self.alerts.len(),
            contacts = self.contacts.len(),
            "Store restored from snapshot"
        );
    }

    // -----------------------------------------------------------------
    // Counters and clients
    // -----------------------------------------------------------------

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        (Utc::now() - self.start_time).num_seconds() as u64
    }

    /// Get total readings processed
    pub fn total_readings(&self) -> u64 {
        self.total_readings
    }

    /// Register a new WebSocket client
    pub fn add_client(&mut self, client_id: String) {
        info!(client_id = %client_id, "WebSocket client connected");
        self.connected_clients.push(client_id);
    }

    /// Remove a WebSocket client
    pub fn remove_client(&mut self, client_id: &str) {
        info!(client_id = %client_id, "WebSocket client disconnected");
        self.connected_clients.retain(|id| id != client_id);
    }

    /// Get count of connected clients
    pub fn client_count(&self) -> usize {
        self.connected_clients.len()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

/// Whole-database JSON dump format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DatabaseSnapshot {
    pub nodes: HashMap<String, NodeRecord>,
    pub alerts: HashMap<String, Alert>,
    pub contacts: HashMap<String, Contact>,
    pub logs: Vec<LogEntry>,
    pub notifications: HashMap<String, Notification>,
    pub settings: StoredSettings,
}
