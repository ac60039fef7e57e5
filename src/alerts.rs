//! Alert dispatch pipeline
//!
//! Creation runs as a linear sequence: validate, write the alert record,
//! read it back, fan out per-node back-references (best effort, no
//! rollback), log the action, compute SMS recipients, and record an in-app
//! notification. SMS delivery itself happens outside the store lock and is
//! reported back through `mark_sms_dispatched`; its outcome never affects
//! whether the alert exists.

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Alert, AlertRef, CreateAlertInput, LogEntry, LogKind, Notification};
use crate::sms::DispatchOutcome;
use crate::store::AppState;
use crate::validation::validate_alert_input;

/// Result of the creation pipeline
#[derive(Debug, Clone)]
pub struct AlertCreation {
    pub alert: Alert,
    /// SMS-capable recipient phones at creation time
    pub recipients: Vec<String>,
    pub back_refs_written: usize,
    pub back_refs_skipped: usize,
}

/// Create an alert. Must reference at least one existing node; nodes
/// missing at back-reference time are skipped without rolling back the
/// references already written.
pub fn create_alert(state: &mut AppState, input: CreateAlertInput) -> AppResult<AlertCreation> {
    validate_alert_input(&input)?;

    if !input
        .affected_nodes
        .iter()
        .any(|id| state.get_node(id).is_some())
    {
        return Err(AppError::ValidationError(
            "Alert must reference at least one existing node".to_string(),
        ));
    }

    // Recipients: contacts whose associated-node set intersects the
    // affected set, restricted to SMS-capable preferences.
    let recipients: Vec<String> = state
        .contacts_for_nodes(&input.affected_nodes)
        .iter()
        .filter(|c| c.preference.wants_sms())
        .map(|c| c.phone.clone())
        .collect();

    let alert = Alert {
        id: Uuid::new_v4().to_string(),
        severity: input.severity,
        message: input.message.clone(),
        affected_nodes: input.affected_nodes.clone(),
        created_at: Utc::now(),
        acknowledged: false,
        acknowledged_by: None,
        acknowledged_at: None,
        recipients: recipients.clone(),
        sms_sent: false,
    };
    let alert_id = alert.id.clone();

    state.insert_alert(alert);

    // Read-back verification of the write
    let alert = state
        .get_alert(&alert_id)
        .ok_or_else(|| {
            AppError::VerificationError(format!(
                "Alert {} missing on read-back after write",
                alert_id
            ))
        })?
        .clone();

    if alert.affected_nodes != input.affected_nodes {
        return Err(AppError::VerificationError(format!(
            "Alert {} affected-node list mutated on round-trip",
            alert_id
        )));
    }

    // Per-node back-references, best effort
    let mut written = 0;
    let mut skipped = 0;
    for node_id in &input.affected_nodes {
        let alert_ref = AlertRef {
            alert_id: alert_id.clone(),
            severity: input.severity,
            at: alert.created_at,
        };
        if state.add_alert_ref(node_id, alert_ref) {
            written += 1;
        } else {
            skipped += 1;
        }
    }
    if skipped > 0 {
        warn!(
            alert_id = %alert_id,
            skipped = skipped,
            "Some affected nodes missing at back-reference time"
        );
    }

    state.append_log(LogEntry::new(
        LogKind::AlertCreated,
        format!("{} alert created: {}", alert.severity, alert.message),
        json!({
            "alert_id": alert_id,
            "affected_nodes": input.affected_nodes,
            "recipients": recipients.len(),
            "back_refs_skipped": skipped,
        }),
    ));

    state.insert_notification(Notification::for_alert(&alert));

    info!(
        alert_id = %alert_id,
        severity = %alert.severity,
        affected = alert.affected_nodes.len(),
        recipients = recipients.len(),
        "Alert created"
    );

    Ok(AlertCreation {
        alert,
        recipients,
        back_refs_written: written,
        back_refs_skipped: skipped,
    })
}

/// Acknowledge an alert. Unconditional overwrite; acknowledging an
/// already-acknowledged alert just restamps it.
pub fn acknowledge_alert(state: &mut AppState, id: &str, acknowledged_by: &str) -> AppResult<Alert> {
    let alert = state
        .get_alert_mut(id)
        .ok_or_else(|| AppError::NotFound(format!("Alert {} does not exist", id)))?;

    alert.acknowledged = true;
    alert.acknowledged_by = Some(acknowledged_by.to_string());
    alert.acknowledged_at = Some(Utc::now());
    let alert = alert.clone();

    state.append_log(LogEntry::new(
        LogKind::AlertAcknowledged,
        format!("Alert acknowledged by {}", acknowledged_by),
        json!({ "alert_id": id }),
    ));

    Ok(alert)
}

/// Record an SMS dispatch outcome against the alert and the log. Called
/// after delivery regardless of how it went; a failed dispatch leaves the
/// alert itself intact.
pub fn mark_sms_dispatched(state: &mut AppState, alert_id: &str, outcome: &DispatchOutcome) {
    if let Some(alert) = state.get_alert_mut(alert_id) {
        alert.sms_sent = outcome.success_count > 0;
    }

    state.append_log(LogEntry::new(
        LogKind::SmsDispatched,
        format!(
            "SMS dispatch for alert {}: {} sent, {} failed",
            alert_id, outcome.success_count, outcome.failure_count
        ),
        json!({
            "alert_id": alert_id,
            "configured": outcome.configured,
            "success": outcome.success,
            "errors": outcome.errors,
        }),
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AlertSeverity, Contact, NodeMetadata, NodeType, NotifyPreference,
    };

    fn state_with_nodes(ids: &[&str]) -> AppState {
        let mut state = AppState::new();
        for id in ids {
            state
                .insert_node(NodeMetadata {
                    id: id.to_string(),
                    name: format!("{} station", id),
                    node_type: NodeType::Sensor,
                    latitude: 28.6,
                    longitude: 77.2,
                    altitude: None,
                    description: None,
                    installer: None,
                    created_at: Utc::now(),
                    neighbors: vec![],
                })
                .unwrap();
        }
        state
    }

    fn contact_on(state: &mut AppState, id: &str, phone: &str, nodes: &[&str]) {
        state.insert_contact(Contact {
            id: id.to_string(),
            name: id.to_string(),
            phone: phone.to_string(),
            email: None,
            preference: NotifyPreference::Sms,
            associated_nodes: nodes.iter().map(|s| s.to_string()).collect(),
        });
    }

    fn input(nodes: &[&str]) -> CreateAlertInput {
        CreateAlertInput {
            message: "cloudburst risk rising".into(),
            severity: AlertSeverity::Critical,
            affected_nodes: nodes.iter().map(|s| s.to_string()).collect(),
            send_sms: false,
        }
    }

    #[test]
    fn test_empty_affected_list_rejected() {
        let mut state = state_with_nodes(&["node1"]);
        let result = create_alert(&mut state, input(&[]));
        assert!(matches!(result, Err(AppError::ValidationError(_))));
        assert_eq!(state.alert_count(), 0);
    }

    #[test]
    fn test_all_nodes_missing_rejected() {
        let mut state = state_with_nodes(&["node1"]);
        let result = create_alert(&mut state, input(&["ghost1", "ghost2"]));
        assert!(matches!(result, Err(AppError::ValidationError(_))));
    }

    #[test]
    fn test_creation_writes_record_and_back_refs() {
        let mut state = state_with_nodes(&["node1", "node2"]);

        let creation = create_alert(&mut state, input(&["node1", "node2"])).unwrap();

        assert_eq!(
            creation.alert.affected_nodes,
            vec!["node1".to_string(), "node2".to_string()]
        );
        assert_eq!(creation.back_refs_written, 2);
        assert_eq!(creation.back_refs_skipped, 0);

        for id in ["node1", "node2"] {
            let refs = &state.get_node(id).unwrap().alert_refs;
            assert_eq!(refs.len(), 1);
            assert_eq!(refs[0].alert_id, creation.alert.id);
            assert_eq!(refs[0].severity, AlertSeverity::Critical);
        }
    }

    #[test]
    fn test_missing_node_back_ref_skipped_not_rolled_back() {
        let mut state = state_with_nodes(&["node1"]);

        let creation = create_alert(&mut state, input(&["node1", "ghost"])).unwrap();

        assert_eq!(creation.back_refs_written, 1);
        assert_eq!(creation.back_refs_skipped, 1);
        assert_eq!(state.get_node("node1").unwrap().alert_refs.len(), 1);
        // The alert itself still exists with the full list
        assert_eq!(
            state.get_alert(&creation.alert.id).unwrap().affected_nodes,
            vec!["node1".to_string(), "ghost".to_string()]
        );
    }

    #[test]
    fn test_recipient_computation_intersects_associated_nodes() {
        let mut state = state_with_nodes(&["node1", "node2"]);
        contact_on(&mut state, "c1", "+919876543210", &["node1"]);
        contact_on(&mut state, "c2", "+919812345678", &["node9"]);

        let creation = create_alert(&mut state, input(&["node1", "node2"])).unwrap();

        assert_eq!(creation.recipients, vec!["+919876543210".to_string()]);
        assert_eq!(creation.alert.recipients, creation.recipients);
    }

    #[test]
    fn test_email_only_contacts_excluded_from_sms_recipients() {
        let mut state = state_with_nodes(&["node1"]);
        state.insert_contact(Contact {
            id: "c1".into(),
            name: "mail only".into(),
            phone: "+919876543210".into(),
            email: Some("ops@example.in".into()),
            preference: NotifyPreference::Email,
            associated_nodes: vec!["node1".into()],
        });

        let creation = create_alert(&mut state, input(&["node1"])).unwrap();
        assert!(creation.recipients.is_empty());
    }

    #[test]
    fn test_creation_records_log_and_notification() {
        let mut state = state_with_nodes(&["node1"]);

        let creation = create_alert(&mut state, input(&["node1"])).unwrap();

        let (entries, _) = state.logs_page(1, 10, Some(LogKind::AlertCreated));
        assert_eq!(entries.len(), 1);

        let notifications = state.list_notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].alert_id, creation.alert.id);
    }

    #[test]
    fn test_acknowledge_sets_fields_and_is_idempotent() {
        let mut state = state_with_nodes(&["node1"]);
        let creation = create_alert(&mut state, input(&["node1"])).unwrap();

        let first = acknowledge_alert(&mut state, &creation.alert.id, "operator-a").unwrap();
        assert!(first.acknowledged);
        assert_eq!(first.acknowledged_by.as_deref(), Some("operator-a"));

        // Second acknowledgement overwrites without error
        let second = acknowledge_alert(&mut state, &creation.alert.id, "operator-b").unwrap();
        assert!(second.acknowledged);
        assert_eq!(second.acknowledged_by.as_deref(), Some("operator-b"));
    }

    #[test]
    fn test_acknowledge_unknown_alert() {
        let mut state = AppState::new();
        assert!(matches!(
            acknowledge_alert(&mut state, "ghost", "op"),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_mark_sms_dispatched_sets_flag() {
        let mut state = state_with_nodes(&["node1"]);
        let creation = create_alert(&mut state, input(&["node1"])).unwrap();

        let outcome = DispatchOutcome {
            success: true,
            configured: true,
            success_count: 1,
            failure_count: 0,
            delivery_results: vec![],
            errors: vec![],
        };
        mark_sms_dispatched(&mut state, &creation.alert.id, &outcome);

        assert!(state.get_alert(&creation.alert.id).unwrap().sms_sent);
    }
}
