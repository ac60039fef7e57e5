//! Cloudburst prediction feed
//!
//! Serves rows from a static daily-forecast CSV. The binary prediction flag
//! comes from the file; the confidence value is generated per request and
//! is not a model score. Kept deliberately dumb so a real model endpoint
//! can replace it behind the same response shape.

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::{debug, warn};

/// One forecast row from the CSV, plus the per-request confidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRow {
    pub date: String,
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub rainfall: f64,
    /// 1 = cloudburst predicted, 0 = not
    pub prediction: u8,
    /// Randomly generated at request time
    pub confidence: f64,
}

/// Response envelope for the prediction endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub success: bool,
    pub predictions: Vec<PredictionRow>,
    pub date: String,
    pub message: String,
}

/// Load the forecast CSV and attach fresh confidence values.
///
/// A missing or unreadable file yields `success: false` with an empty row
/// set rather than an error; the dashboard renders the message.
pub fn load_predictions(csv_path: &str) -> PredictionResponse {
    let today = Utc::now().format("%Y-%m-%d").to_string();

    let raw = match fs::read_to_string(csv_path) {
        Ok(contents) => contents,
        Err(e) => {
            warn!(path = %csv_path, error = %e, "Forecast CSV unavailable");
            return PredictionResponse {
                success: false,
                predictions: Vec::new(),
                date: today,
                message: "Forecast data unavailable".to_string(),
            };
        }
    };

    let mut rng = rand::thread_rng();
    let mut predictions = Vec::new();
    let mut skipped = 0;

    // First line is the header
    for line in raw.lines().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        match parse_row(line, &mut rng) {
            Some(row) => predictions.push(row),
            None => {
                skipped += 1;
                debug!(line = %line, "Skipping malformed forecast row");
            }
        }
    }

    let message = if skipped > 0 {
        format!("Loaded {} rows ({} skipped)", predictions.len(), skipped)
    } else {
        format!("Loaded {} rows", predictions.len())
    };

    PredictionResponse {
        success: true,
        predictions,
        date: today,
        message,
    }
}

/// Parse `date,temperature,humidity,pressure,rainfall,prediction`
fn parse_row(line: &str, rng: &mut impl Rng) -> Option<PredictionRow> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 6 {
        return None;
    }

    let prediction: u8 = fields[5].parse().ok().filter(|p| *p <= 1)?;
    let confidence: f64 = if prediction == 1 {
        rng.gen_range(0.70..0.97)
    } else {
        rng.gen_range(0.55..0.90)
    };

    Some(PredictionRow {
        date: fields[0].to_string(),
        temperature: fields[1].parse().ok()?,
        humidity: fields[2].parse().ok()?,
        pressure: fields[3].parse().ok()?,
        rainfall: fields[4].parse().ok()?,
        prediction,
        confidence: (confidence * 100.0).round() / 100.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn write_temp_csv(contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("cews-forecast-{}.csv", Uuid::new_v4()));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_valid_csv() {
        let path = write_temp_csv(
            "date,temperature,humidity,pressure,rainfall,prediction\n\
             2026-08-01,31.2,88.0,998.4,42.5,1\n\
             2026-08-02,29.8,71.0,1006.1,3.2,0\n",
        );

        let response = load_predictions(path.to_str().unwrap());
        fs::remove_file(&path).ok();

        assert!(response.success);
        assert_eq!(response.predictions.len(), 2);

        let first = &response.predictions[0];
        assert_eq!(first.prediction, 1);
        assert_eq!(first.rainfall, 42.5);
        assert!((0.0..=1.0).contains(&first.confidence));
    }

    #[test]
    fn test_confidence_varies_between_requests() {
        let path = write_temp_csv(
            "date,temperature,humidity,pressure,rainfall,prediction\n\
             2026-08-01,31.2,88.0,998.4,42.5,1\n",
        );

        // Random confidence: over several loads at least two values differ
        let values: Vec<f64> = (0..8)
            .map(|_| load_predictions(path.to_str().unwrap()).predictions[0].confidence)
            .collect();
        fs::remove_file(&path).ok();

        assert!(values.iter().any(|v| *v != values[0]));
    }

    #[test]
    fn test_malformed_rows_skipped() {
        let path = write_temp_csv(
            "date,temperature,humidity,pressure,rainfall,prediction\n\
             2026-08-01,not-a-number,88.0,998.4,42.5,1\n\
             2026-08-02,29.8,71.0,1006.1,3.2,0\n\
             short,row\n",
        );

        let response = load_predictions(path.to_str().unwrap());
        fs::remove_file(&path).ok();

        assert!(response.success);
        assert_eq!(response.predictions.len(), 1);
        assert!(response.message.contains("skipped"));
    }

    #[test]
    fn test_missing_file_is_soft_failure() {
        let response = load_predictions("/nonexistent/forecast.csv");

        assert!(!response.success);
        assert!(response.predictions.is_empty());
        assert_eq!(response.message, "Forecast data unavailable");
    }
}
