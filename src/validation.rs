//! Input validation module
//!
//! Provides comprehensive validation for node, reading, alert and contact inputs.

use crate::error::{AppError, AppResult};
use crate::models::{CreateAlertInput, ReadingInput, RegisterNodeInput};
use tracing::{debug, warn};
use validator::Validate;

/// Sensor reading validation constraints
pub struct ReadingConstraints;

impl ReadingConstraints {
    /// Ambient temperature range (Celsius)
    pub const TEMP_MIN: f64 = -40.0;
    pub const TEMP_MAX: f64 = 60.0;

    /// Barometric pressure range (hPa)
    pub const PRESSURE_MIN: f64 = 800.0;
    pub const PRESSURE_MAX: f64 = 1100.0;

    /// Relative humidity range (percentage)
    pub const HUMIDITY_MIN: f64 = 0.0;
    pub const HUMIDITY_MAX: f64 = 100.0;

    /// LoRa signal strength range (dBm)
    pub const RSSI_MIN: f64 = -130.0;
    pub const RSSI_MAX: f64 = 0.0;
}

/// Geographic coordinate constraints
pub struct CoordinateConstraints;

impl CoordinateConstraints {
    pub const LAT_MIN: f64 = -90.0;
    pub const LAT_MAX: f64 = 90.0;
    pub const LON_MIN: f64 = -180.0;
    pub const LON_MAX: f64 = 180.0;
}

/// Flatten `validator` field errors into one message string
fn collect_field_errors(errors: &validator::ValidationErrors) -> String {
    errors
        .field_errors()
        .iter()
        .map(|(field, errs)| {
            let msgs: Vec<&str> = errs
                .iter()
                .filter_map(|e| e.message.as_ref().map(|c| c.as_ref()))
                .collect();
            format!("{}: {}", field, msgs.join(", "))
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Validate node registration input
pub fn validate_register_input(input: &RegisterNodeInput) -> AppResult<()> {
    if let Err(validation_errors) = input.validate() {
        let message = collect_field_errors(&validation_errors);
        warn!(errors = %message, "Node registration validation failed");
        return Err(AppError::ValidationError(message));
    }

    validate_coordinates(input.latitude, input.longitude)?;

    debug!(node_id = %input.id, "Node registration input validation passed");
    Ok(())
}

/// Validate latitude/longitude as finite, in-range numbers
pub fn validate_coordinates(latitude: f64, longitude: f64) -> AppResult<()> {
    if !latitude.is_finite() || !longitude.is_finite() {
        return Err(AppError::ValidationError(
            "Coordinates must be finite numbers".to_string(),
        ));
    }

    if latitude < CoordinateConstraints::LAT_MIN || latitude > CoordinateConstraints::LAT_MAX {
        return Err(AppError::ValidationError(format!(
            "Latitude {} out of valid range [{}, {}]",
            latitude,
            CoordinateConstraints::LAT_MIN,
            CoordinateConstraints::LAT_MAX
        )));
    }

    if longitude < CoordinateConstraints::LON_MIN || longitude > CoordinateConstraints::LON_MAX {
        return Err(AppError::ValidationError(format!(
            "Longitude {} out of valid range [{}, {}]",
            longitude,
            CoordinateConstraints::LON_MIN,
            CoordinateConstraints::LON_MAX
        )));
    }

    Ok(())
}

/// Validate a realtime reading write
pub fn validate_reading_input(input: &ReadingInput) -> AppResult<()> {
    if let Err(validation_errors) = input.validate() {
        let message = collect_field_errors(&validation_errors);
        warn!(errors = %message, "Sensor reading validation failed");
        return Err(AppError::ValidationError(message));
    }

    validate_finite("Temperature", input.temperature)?;
    validate_finite("Pressure", input.pressure)?;
    if let Some(humidity) = input.humidity {
        validate_finite("Humidity", humidity)?;
    }
    if let Some(rssi) = input.signal_strength {
        validate_finite("Signal strength", rssi)?;
    }

    Ok(())
}

fn validate_finite(label: &str, value: f64) -> AppResult<()> {
    if !value.is_finite() {
        return Err(AppError::ValidationError(format!(
            "{} must be a finite number",
            label
        )));
    }
    Ok(())
}

/// Validate alert creation input
pub fn validate_alert_input(input: &CreateAlertInput) -> AppResult<()> {
    if let Err(validation_errors) = input.validate() {
        let message = collect_field_errors(&validation_errors);
        warn!(errors = %message, "Alert input validation failed");
        return Err(AppError::ValidationError(message));
    }

    if input.affected_nodes.is_empty() {
        return Err(AppError::ValidationError(
            "Alert must reference at least one node".to_string(),
        ));
    }

    Ok(())
}

/// Normalize a phone number to +91XXXXXXXXXX form.
///
/// Accepts a 10-digit Indian mobile number (first digit 6-9), optionally
/// prefixed with `91` or `+91`. Any other shape is rejected.
pub fn normalize_phone(raw: &str) -> AppResult<String> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::ValidationError(format!(
            "Phone number {:?} must contain only digits",
            raw
        )));
    }

    let local = match digits.len() {
        10 => digits,
        12 if digits.starts_with("91") => &digits[2..],
        _ => {
            return Err(AppError::ValidationError(format!(
                "Phone number {:?} is not a valid Indian mobile number",
                raw
            )))
        }
    };

    if !matches!(local.as_bytes()[0], b'6'..=b'9') {
        return Err(AppError::ValidationError(format!(
            "Phone number {:?} is not a valid Indian mobile number",
            raw
        )));
    }

    Ok(format!("+91{}", local))
}

/// Validate pagination parameters
pub fn validate_pagination(page: Option<u32>, limit: Option<u32>) -> AppResult<(u32, u32)> {
    let page = page.unwrap_or(1);
    let limit = limit.unwrap_or(100);

    if page == 0 {
        return Err(AppError::ValidationError(
            "Page number must be greater than 0".to_string(),
        ));
    }

    if limit == 0 || limit > 1000 {
        return Err(AppError::ValidationError(
            "Limit must be between 1 and 1000".to_string(),
        ));
    }

    Ok((page, limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertSeverity, NodeType};

    fn register_input() -> RegisterNodeInput {
        RegisterNodeInput {
            id: "node1".into(),
            name: "Valley sensor".into(),
            node_type: NodeType::Sensor,
            latitude: 28.6139,
            longitude: 77.2090,
            altitude: Some(216.0),
            description: None,
            installer: None,
            neighbors: vec![],
        }
    }

    #[test]
    fn test_valid_register_input() {
        assert!(validate_register_input(&register_input()).is_ok());
    }

    #[test]
    fn test_latitude_out_of_range() {
        let mut input = register_input();
        input.latitude = -90.5;

        let result = validate_register_input(&input);
        assert!(result.is_err());

        if let Err(AppError::ValidationError(msg)) = result {
            assert!(msg.contains("atitude"));
        } else {
            panic!("expected ValidationError");
        }
    }

    #[test]
    fn test_longitude_out_of_range() {
        let mut input = register_input();
        input.longitude = 180.1;
        assert!(validate_register_input(&input).is_err());
    }

    #[test]
    fn test_non_finite_coordinates() {
        assert!(validate_coordinates(f64::NAN, 77.0).is_err());
        assert!(validate_coordinates(28.0, f64::INFINITY).is_err());
        assert!(validate_coordinates(28.0, 77.0).is_ok());
    }

    #[test]
    fn test_boundary_coordinates_accepted() {
        assert!(validate_coordinates(90.0, 180.0).is_ok());
        assert!(validate_coordinates(-90.0, -180.0).is_ok());
    }

    #[test]
    fn test_reading_out_of_range() {
        let input = ReadingInput {
            temperature: 80.0, // above ambient range
            pressure: 1000.0,
            humidity: None,
            signal_strength: None,
            timestamp: None,
        };
        assert!(validate_reading_input(&input).is_err());
    }

    #[test]
    fn test_reading_valid() {
        let input = ReadingInput {
            temperature: 24.5,
            pressure: 1004.2,
            humidity: Some(68.0),
            signal_strength: Some(-74.0),
            timestamp: None,
        };
        assert!(validate_reading_input(&input).is_ok());
    }

    #[test]
    fn test_alert_requires_affected_nodes() {
        let input = CreateAlertInput {
            message: "heavy rainfall upstream".into(),
            severity: AlertSeverity::Critical,
            affected_nodes: vec![],
            send_sms: false,
        };
        assert!(validate_alert_input(&input).is_err());
    }

    #[test]
    fn test_phone_ten_digits() {
        assert_eq!(normalize_phone("9876543210").unwrap(), "+919876543210");
    }

    #[test]
    fn test_phone_with_country_prefix() {
        assert_eq!(normalize_phone("919876543210").unwrap(), "+919876543210");
        assert_eq!(normalize_phone("+919876543210").unwrap(), "+919876543210");
    }

    #[test]
    fn test_phone_wrong_digit_count() {
        assert!(normalize_phone("98765").is_err());
        assert!(normalize_phone("98765432101").is_err());
        assert!(normalize_phone("9198765432100").is_err());
    }

    #[test]
    fn test_phone_rejects_non_digits() {
        assert!(normalize_phone("98-76-54-32-10").is_err());
        assert!(normalize_phone("").is_err());
    }

    #[test]
    fn test_phone_rejects_invalid_leading_digit() {
        assert!(normalize_phone("1234567890").is_err());
    }

    #[test]
    fn test_pagination_validation() {
        // Valid cases
        assert!(validate_pagination(Some(1), Some(50)).is_ok());
        assert!(validate_pagination(None, None).is_ok());

        // Invalid cases
        assert!(validate_pagination(Some(0), Some(50)).is_err());
        assert!(validate_pagination(Some(1), Some(0)).is_err());
        assert!(validate_pagination(Some(1), Some(2000)).is_err());
    }
}
