//! Historical data aggregation and export
//!
//! Read-only windowing over a node's history subtree plus CSV export.
//! Export is a plain string-join of the filtered rows; only the free-text
//! node name is quote-wrapped.

use chrono::{DateTime, Duration, Utc};

use crate::error::{AppError, AppResult};
use crate::models::{NodeReading, NodeRecord};

/// Rolling query window over a node's history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryWindow {
    OneHour,
    SixHours,
    OneDay,
    SevenDays,
}

impl HistoryWindow {
    /// Parse the dashboard's window selector values
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "1h" => Ok(HistoryWindow::OneHour),
            "6h" => Ok(HistoryWindow::SixHours),
            "24h" => Ok(HistoryWindow::OneDay),
            "7d" => Ok(HistoryWindow::SevenDays),
            other => Err(AppError::BadRequest(format!(
                "Invalid history window {:?}. Valid windows: 1h, 6h, 24h, 7d",
                other
            ))),
        }
    }

    pub fn duration(self) -> Duration {
        match self {
            HistoryWindow::OneHour => Duration::hours(1),
            HistoryWindow::SixHours => Duration::hours(6),
            HistoryWindow::OneDay => Duration::hours(24),
            HistoryWindow::SevenDays => Duration::days(7),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            HistoryWindow::OneHour => "1h",
            HistoryWindow::SixHours => "6h",
            HistoryWindow::OneDay => "24h",
            HistoryWindow::SevenDays => "7d",
        }
    }
}

/// Readings within the rolling window, oldest first
pub fn filter_window(
    history: &[NodeReading],
    window: HistoryWindow,
    now: DateTime<Utc>,
) -> Vec<&NodeReading> {
    let cutoff = now - window.duration();
    let mut rows: Vec<&NodeReading> = history.iter().filter(|r| r.timestamp >= cutoff).collect();
    rows.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    rows
}

fn format_opt(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Render the filtered rows as CSV for download
pub fn to_csv(record: &NodeRecord, rows: &[&NodeReading]) -> String {
    let mut out = String::from("node_id,node_name,timestamp,temperature,pressure,humidity,signal_strength\n");
    for row in rows {
        out.push_str(&format!(
            "{},\"{}\",{},{},{},{},{}\n",
            record.metadata.id,
            record.metadata.name,
            row.timestamp.to_rfc3339(),
            format_opt(row.temperature),
            format_opt(row.pressure),
            format_opt(row.humidity),
            format_opt(row.signal_strength),
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NodeMetadata, NodeType};

    fn reading(age_mins: i64, temp: f64) -> NodeReading {
        NodeReading {
            timestamp: Utc::now() - Duration::minutes(age_mins),
            temperature: Some(temp),
            pressure: Some(1004.0),
            humidity: None,
            signal_strength: Some(-70.0),
        }
    }

    fn record(history: Vec<NodeReading>) -> NodeRecord {
        let mut r = NodeRecord::new(NodeMetadata {
            id: "node1".into(),
            name: "Valley station, east".into(),
            node_type: NodeType::Sensor,
            latitude: 28.6,
            longitude: 77.2,
            altitude: None,
            description: None,
            installer: None,
            created_at: Utc::now(),
            neighbors: vec![],
        });
        r.history = history;
        r
    }

    #[test]
    fn test_window_parsing() {
        assert_eq!(HistoryWindow::parse("1h").unwrap(), HistoryWindow::OneHour);
        assert_eq!(HistoryWindow::parse("6h").unwrap(), HistoryWindow::SixHours);
        assert_eq!(HistoryWindow::parse("24h").unwrap(), HistoryWindow::OneDay);
        assert_eq!(HistoryWindow::parse("7d").unwrap(), HistoryWindow::SevenDays);
        assert!(HistoryWindow::parse("3h").is_err());
    }

    #[test]
    fn test_filter_window_cuts_old_rows() {
        let history = vec![reading(30, 20.0), reading(90, 21.0), reading(60 * 30, 22.0)];
        let now = Utc::now();

        let hour = filter_window(&history, HistoryWindow::OneHour, now);
        assert_eq!(hour.len(), 1);
        assert_eq!(hour[0].temperature, Some(20.0));

        let six = filter_window(&history, HistoryWindow::SixHours, now);
        assert_eq!(six.len(), 2);

        let week = filter_window(&history, HistoryWindow::SevenDays, now);
        assert_eq!(week.len(), 3);
    }

    #[test]
    fn test_filter_window_sorts_oldest_first() {
        let history = vec![reading(5, 20.0), reading(40, 21.0), reading(20, 22.0)];
        let rows = filter_window(&history, HistoryWindow::OneHour, Utc::now());

        assert_eq!(rows[0].temperature, Some(21.0));
        assert_eq!(rows[2].temperature, Some(20.0));
    }

    #[test]
    fn test_csv_format() {
        let record = record(vec![reading(5, 24.5)]);
        let rows = filter_window(&record.history, HistoryWindow::OneHour, Utc::now());
        let csv = to_csv(&record, &rows);

        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "node_id,node_name,timestamp,temperature,pressure,humidity,signal_strength"
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("node1,\"Valley station, east\","));
        assert!(row.contains(",24.5,1004,"));
        // Missing humidity renders as an empty field
        assert!(row.contains(",1004,,-70"));
    }

    #[test]
    fn test_csv_empty_history() {
        let record = record(vec![]);
        let csv = to_csv(&record, &[]);
        assert_eq!(csv.lines().count(), 1);
    }
}
