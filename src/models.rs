//! Data models for nodes, alerts, contacts and related structures
//!
//! Defines the core data structures used throughout the application.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Flexible timestamp deserialization.
///
/// Sensor firmware in the field reports timestamps as either epoch-millisecond
/// numbers or epoch-second strings; dashboards send RFC 3339. All three are
/// accepted here and normalized to `DateTime<Utc>` so the ambiguity never
/// reaches business logic.
pub mod flex_time {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Float(f64),
        Text(String),
    }

    fn parse(raw: Raw) -> Result<DateTime<Utc>, String> {
        match raw {
            // Numeric timestamps are epoch milliseconds
            Raw::Int(ms) => Utc
                .timestamp_millis_opt(ms)
                .single()
                .ok_or_else(|| format!("epoch milliseconds out of range: {}", ms)),
            Raw::Float(ms) => Utc
                .timestamp_millis_opt(ms as i64)
                .single()
                .ok_or_else(|| format!("epoch milliseconds out of range: {}", ms)),
            Raw::Text(s) => {
                // String timestamps are epoch seconds, or RFC 3339 as a fallback
                if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
                    let secs: i64 = s
                        .parse()
                        .map_err(|_| format!("epoch seconds out of range: {}", s))?;
                    Utc.timestamp_opt(secs, 0)
                        .single()
                        .ok_or_else(|| format!("epoch seconds out of range: {}", s))
                } else {
                    DateTime::parse_from_rfc3339(&s)
                        .map(|dt| dt.with_timezone(&Utc))
                        .map_err(|e| format!("invalid timestamp {:?}: {}", s, e))
                }
            }
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        parse(Raw::deserialize(deserializer)?).map_err(serde::de::Error::custom)
    }

    pub fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<Raw> = Option::deserialize(deserializer)?;
        raw.map(parse).transpose().map_err(serde::de::Error::custom)
    }
}

/// Node device type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// Field sensor: reports temperature, pressure and signal strength
    Sensor,
    /// Aggregating gateway: reports temperature, pressure and humidity
    Gateway,
}

/// Computed liveness of a node, derived from its last realtime update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    Warning,
    Offline,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Online => write!(f, "online"),
            NodeStatus::Warning => write!(f, "warning"),
            NodeStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Static node description, written at registration and edited wholesale
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub id: String,
    pub name: String,
    pub node_type: NodeType,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installer: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Neighbor node ids used for mesh-link visualization
    #[serde(default)]
    pub neighbors: Vec<String>,
}

impl NodeMetadata {
    /// Whether the node can appear on the map. Nodes with missing or
    /// non-finite coordinates are excluded, never repaired.
    pub fn map_visible(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Latest-known reading set for a node, overwritten on each update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRealtime {
    pub temperature: Option<f64>,
    pub pressure: Option<f64>,
    /// Absent on sensor-only nodes
    pub humidity: Option<f64>,
    /// Absent on gateways
    pub signal_strength: Option<f64>,
    pub last_update: Option<DateTime<Utc>>,
    pub status: NodeStatus,
}

impl Default for NodeRealtime {
    fn default() -> Self {
        Self {
            temperature: None,
            pressure: None,
            humidity: None,
            signal_strength: None,
            last_update: None,
            status: NodeStatus::Offline,
        }
    }
}

/// One timestamped history entry for a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReading {
    #[serde(deserialize_with = "flex_time::deserialize")]
    pub timestamp: DateTime<Utc>,
    pub temperature: Option<f64>,
    pub pressure: Option<f64>,
    pub humidity: Option<f64>,
    pub signal_strength: Option<f64>,
}

/// Denormalized back-reference from a node to an alert affecting it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRef {
    pub alert_id: String,
    pub severity: AlertSeverity,
    pub at: DateTime<Utc>,
}

/// Full node subtree: metadata + realtime + history + alert back-references
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub metadata: NodeMetadata,
    pub realtime: NodeRealtime,
    #[serde(default)]
    pub history: Vec<NodeReading>,
    #[serde(default)]
    pub alert_refs: Vec<AlertRef>,
}

impl NodeRecord {
    /// Fresh record as written by registration: metadata plus zeroed
    /// realtime defaults and an empty history.
    pub fn new(metadata: NodeMetadata) -> Self {
        Self {
            metadata,
            realtime: NodeRealtime::default(),
            history: Vec::new(),
            alert_refs: Vec::new(),
        }
    }
}

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Warning => write!(f, "warning"),
            AlertSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// A severity-tagged message tied to one or more nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub affected_nodes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub acknowledged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// Phone numbers the alert was addressed to at creation time
    #[serde(default)]
    pub recipients: Vec<String>,
    pub sms_sent: bool,
}

/// Contact notification channel preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyPreference {
    Sms,
    Email,
    Both,
}

impl NotifyPreference {
    pub fn wants_sms(self) -> bool {
        matches!(self, NotifyPreference::Sms | NotifyPreference::Both)
    }
}

/// A notification recipient associated with one or more nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub name: String,
    /// Normalized to +91XXXXXXXXXX before storing
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub preference: NotifyPreference,
    #[serde(default)]
    pub associated_nodes: Vec<String>,
}

/// Event kinds recorded in the append-only log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    NodeRegistered,
    NodeUpdated,
    NodeDeleted,
    AlertCreated,
    AlertAcknowledged,
    SmsDispatched,
    ContactAdded,
    ContactDeleted,
    SettingsSaved,
    MaintenanceRun,
    DataImported,
}

/// Append-only log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub kind: LogKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl LogEntry {
    pub fn new(kind: LogKind, message: impl Into<String>, metadata: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            metadata,
        }
    }
}

/// In-app notification record created alongside an alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub alert_id: String,
    pub message: String,
    pub severity: AlertSeverity,
    pub created_at: DateTime<Utc>,
    /// Fixed 7-day expiry; stored as data, never swept by any process
    pub expires_at: DateTime<Utc>,
}

impl Notification {
    pub fn for_alert(alert: &Alert) -> Self {
        let created_at = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            alert_id: alert.id.clone(),
            message: alert.message.clone(),
            severity: alert.severity,
            created_at,
            expires_at: created_at + chrono::Duration::days(7),
        }
    }
}

/// Threshold configuration for one signal
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ThresholdSetting {
    pub enabled: bool,
    pub trigger: f64,
    #[validate(range(min = 1, max = 1440, message = "Window must be between 1 and 1440 minutes"))]
    pub window_minutes: u32,
    pub severity: AlertSeverity,
}

/// Per-signal alert threshold configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ThresholdSettings {
    #[validate(nested)]
    pub temperature: ThresholdSetting,
    #[validate(nested)]
    pub pressure: ThresholdSetting,
    #[validate(nested)]
    pub humidity: ThresholdSetting,
    #[validate(nested)]
    pub signal_strength: ThresholdSetting,
}

impl Default for ThresholdSettings {
    fn default() -> Self {
        Self {
            temperature: ThresholdSetting {
                enabled: true,
                trigger: 40.0,
                window_minutes: 30,
                severity: AlertSeverity::Warning,
            },
            pressure: ThresholdSetting {
                enabled: true,
                trigger: 950.0,
                window_minutes: 30,
                severity: AlertSeverity::Critical,
            },
            humidity: ThresholdSetting {
                enabled: true,
                trigger: 95.0,
                window_minutes: 60,
                severity: AlertSeverity::Warning,
            },
            signal_strength: ThresholdSetting {
                enabled: false,
                trigger: -100.0,
                window_minutes: 60,
                severity: AlertSeverity::Warning,
            },
        }
    }
}

/// System-wide dashboard configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SystemSettings {
    #[validate(range(min = 5, max = 3600, message = "Update interval must be 5-3600 seconds"))]
    pub update_interval_secs: u32,
    #[validate(range(min = 1, max = 365, message = "Retention must be 1-365 days"))]
    pub retention_days: u32,
    pub map_provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_api_key: Option<String>,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            update_interval_secs: 30,
            retention_days: 30,
            map_provider: "openstreetmap".to_string(),
            map_api_key: None,
        }
    }
}

/// Whole settings record; saved as one object, last write wins
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct StoredSettings {
    #[validate(nested)]
    pub thresholds: ThresholdSettings,
    #[validate(nested)]
    pub system: SystemSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_saved: Option<DateTime<Utc>>,
}

/// Input DTO for node registration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegisterNodeInput {
    #[validate(length(min = 1, max = 64, message = "Node id is required"))]
    pub id: String,
    #[validate(length(min = 1, max = 128, message = "Node name is required"))]
    pub name: String,
    pub node_type: NodeType,
    #[validate(range(min = -90.0, max = 90.0, message = "Latitude must be between -90 and 90"))]
    pub latitude: f64,
    #[validate(range(min = -180.0, max = 180.0, message = "Longitude must be between -180 and 180"))]
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub description: Option<String>,
    pub installer: Option<String>,
    #[serde(default)]
    pub neighbors: Vec<String>,
}

impl From<RegisterNodeInput> for NodeMetadata {
    fn from(input: RegisterNodeInput) -> Self {
        NodeMetadata {
            id: input.id,
            name: input.name,
            node_type: input.node_type,
            latitude: input.latitude,
            longitude: input.longitude,
            altitude: input.altitude,
            description: input.description,
            installer: input.installer,
            created_at: Utc::now(),
            neighbors: input.neighbors,
        }
    }
}

/// Input DTO for metadata edits; overwrites the metadata subtree
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EditNodeInput {
    #[validate(length(min = 1, max = 128, message = "Node name is required"))]
    pub name: String,
    pub node_type: NodeType,
    #[validate(range(min = -90.0, max = 90.0, message = "Latitude must be between -90 and 90"))]
    pub latitude: f64,
    #[validate(range(min = -180.0, max = 180.0, message = "Longitude must be between -180 and 180"))]
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub description: Option<String>,
    pub installer: Option<String>,
    #[serde(default)]
    pub neighbors: Vec<String>,
}

/// Input DTO for a realtime sensor write
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReadingInput {
    #[validate(range(min = -40.0, max = 60.0, message = "Temperature must be between -40 and 60°C"))]
    pub temperature: f64,
    #[validate(range(min = 800.0, max = 1100.0, message = "Pressure must be between 800 and 1100 hPa"))]
    pub pressure: f64,
    #[validate(range(min = 0.0, max = 100.0, message = "Humidity must be between 0 and 100%"))]
    pub humidity: Option<f64>,
    #[validate(range(min = -130.0, max = 0.0, message = "Signal strength must be between -130 and 0 dBm"))]
    pub signal_strength: Option<f64>,
    /// Optional device-provided timestamp (defaults to server time)
    #[serde(default, deserialize_with = "flex_time::deserialize_opt")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ReadingInput {
    pub fn into_reading(self) -> NodeReading {
        NodeReading {
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            temperature: Some(self.temperature),
            pressure: Some(self.pressure),
            humidity: self.humidity,
            signal_strength: self.signal_strength,
        }
    }
}

/// Input DTO for alert creation
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateAlertInput {
    #[validate(length(min = 1, max = 500, message = "Message must be 1-500 characters"))]
    pub message: String,
    pub severity: AlertSeverity,
    pub affected_nodes: Vec<String>,
    #[serde(default)]
    pub send_sms: bool,
}

/// Input DTO for alert acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AcknowledgeInput {
    #[validate(length(min = 1, max = 128, message = "Acknowledger name is required"))]
    pub acknowledged_by: String,
}

/// Input DTO for contact creation
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ContactInput {
    #[validate(length(min = 1, max = 128, message = "Contact name is required"))]
    pub name: String,
    pub phone: String,
    #[validate(email(message = "Invalid email address"))]
    pub email: Option<String>,
    pub preference: NotifyPreference,
    #[serde(default)]
    pub associated_nodes: Vec<String>,
}

/// WebSocket message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    /// A node's realtime subtree changed
    NodeUpdate {
        node_id: String,
        realtime: NodeRealtime,
    },
    /// A new alert was created
    AlertRaised(Alert),
    /// Connection acknowledgment
    Connected { client_id: String },
    /// Error message
    Error { message: String },
    /// Heartbeat/ping
    Ping,
    /// Heartbeat/pong response
    Pong,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub node_count: usize,
    pub active_alerts: usize,
}
