//! Record validation shared by training and serving
//!
//! Both training rows and prediction requests go through these functions,
//! so the model is only ever fitted and queried on the same shape of data.

use super::{LATITUDE_RANGE, LONGITUDE_RANGE, N_BATHROOM_RANGE, N_ROOMS_RANGE};
use crate::error::ValidationError;
use crate::models::{LabeledRow, PropertyRecord, PropertyType, RawPropertyRecord, TrainingExample};
use serde_json::Value;

/// Validate a raw listing into a [`PropertyRecord`]
///
/// Fields are checked in declaration order and the first failure is
/// returned. Coordinates outside continental Chile are rejected rather
/// than clamped.
pub fn validate_record(raw: &RawPropertyRecord) -> Result<PropertyRecord, ValidationError> {
    let property_type = parse_property_type(required(&raw.property_type, "type")?)?;
    let sector = parse_sector(required(&raw.sector, "sector")?)?;

    let net_usable_area = parse_positive(
        required(&raw.net_usable_area, "net_usable_area")?,
        "net_usable_area",
    )?;
    let net_area = parse_positive(required(&raw.net_area, "net_area")?, "net_area")?;
    let n_rooms = parse_count(required(&raw.n_rooms, "n_rooms")?, "n_rooms", N_ROOMS_RANGE)?;
    let n_bathroom = parse_count(
        required(&raw.n_bathroom, "n_bathroom")?,
        "n_bathroom",
        N_BATHROOM_RANGE,
    )?;
    let latitude = parse_bounded(required(&raw.latitude, "latitude")?, "latitude", LATITUDE_RANGE)?;
    let longitude = parse_bounded(
        required(&raw.longitude, "longitude")?,
        "longitude",
        LONGITUDE_RANGE,
    )?;

    Ok(PropertyRecord {
        property_type,
        sector,
        net_usable_area,
        net_area,
        n_rooms,
        n_bathroom,
        latitude,
        longitude,
    })
}

/// Validate a labeled row: the listing first, then its price
pub fn validate_example(row: &LabeledRow) -> Result<TrainingExample, ValidationError> {
    let record = validate_record(&row.record)?;
    let price = parse_positive(required(&row.price, "price")?, "price")?;
    Ok(TrainingExample { record, price })
}

fn required<'a>(value: &'a Option<Value>, field: &'static str) -> Result<&'a Value, ValidationError> {
    match value {
        None | Some(Value::Null) => Err(ValidationError::MissingField { field }),
        Some(v) => Ok(v),
    }
}

fn parse_property_type(value: &Value) -> Result<PropertyType, ValidationError> {
    let text = match value {
        Value::String(s) => s.as_str(),
        other => {
            return Err(invalid_type(other.to_string()));
        }
    };
    PropertyType::parse(text).ok_or_else(|| invalid_type(text.to_string()))
}

fn invalid_type(value: String) -> ValidationError {
    let expected: Vec<&str> = PropertyType::ALL.iter().map(|t| t.as_str()).collect();
    ValidationError::InvalidCategory {
        field: "type",
        value,
        expected: expected.join(", "),
    }
}

fn parse_sector(value: &Value) -> Result<String, ValidationError> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        other => Err(ValidationError::InvalidCategory {
            field: "sector",
            value: other.to_string(),
            expected: "a non-empty sector name".to_string(),
        }),
    }
}

fn parse_number(value: &Value, field: &'static str) -> Result<f64, ValidationError> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    let number = number.ok_or_else(|| ValidationError::InvalidNumber {
        field,
        value: value.to_string(),
    })?;

    if !number.is_finite() {
        return Err(ValidationError::OutOfRange {
            field,
            value: number,
            constraint: "must be finite".to_string(),
        });
    }
    Ok(number)
}

fn parse_positive(value: &Value, field: &'static str) -> Result<f64, ValidationError> {
    let number = parse_number(value, field)?;
    if number <= 0.0 {
        return Err(ValidationError::OutOfRange {
            field,
            value: number,
            constraint: "must be greater than 0".to_string(),
        });
    }
    Ok(number)
}

fn parse_bounded(value: &Value, field: &'static str, (min, max): (f64, f64)) -> Result<f64, ValidationError> {
    let number = parse_number(value, field)?;
    if number < min || number > max {
        return Err(ValidationError::OutOfRange {
            field,
            value: number,
            constraint: format!("must be between {} and {}", min, max),
        });
    }
    Ok(number)
}

fn parse_count(value: &Value, field: &'static str, (min, max): (u32, u32)) -> Result<u32, ValidationError> {
    let number = parse_number(value, field)?;
    if number.fract() != 0.0 {
        return Err(ValidationError::InvalidNumber {
            field,
            value: value.to_string(),
        });
    }
    if number < min as f64 || number > max as f64 {
        return Err(ValidationError::OutOfRange {
            field,
            value: number,
            constraint: format!("must be between {} and {}", min, max),
        });
    }
    Ok(number as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn las_condes() -> RawPropertyRecord {
        serde_json::from_value(json!({
            "type": "apartment",
            "sector": "Las Condes",
            "net_usable_area": 65,
            "net_area": 70,
            "n_rooms": 2,
            "n_bathroom": 1,
            "latitude": -33.45,
            "longitude": -70.65
        }))
        .unwrap()
    }

    #[test]
    fn test_valid_record() {
        let record = validate_record(&las_condes()).unwrap();
        assert_eq!(record.property_type, PropertyType::Apartment);
        assert_eq!(record.sector, "Las Condes");
        assert_eq!(record.n_rooms, 2);
        assert_eq!(record.latitude, -33.45);
    }

    #[test]
    fn test_latitude_bound_is_inclusive() {
        let mut raw = las_condes();
        raw.latitude = Some(json!(-56));
        assert!(validate_record(&raw).is_ok());

        raw.latitude = Some(json!(-56.01));
        let err = validate_record(&raw).unwrap_err();
        assert!(matches!(err, ValidationError::OutOfRange { field: "latitude", .. }));
    }

    #[test]
    fn test_longitude_outside_chile_rejected() {
        let mut raw = las_condes();
        raw.longitude = Some(json!(-58.4));
        let err = validate_record(&raw).unwrap_err();
        assert_eq!(err.field(), "longitude");
    }

    #[test]
    fn test_n_rooms_bounds() {
        let mut raw = las_condes();
        for (rooms, ok) in [(0, false), (1, true), (10, true), (11, false)] {
            raw.n_rooms = Some(json!(rooms));
            let result = validate_record(&raw);
            assert_eq!(result.is_ok(), ok, "n_rooms = {}", rooms);
            if !ok {
                assert!(matches!(
                    result.unwrap_err(),
                    ValidationError::OutOfRange { field: "n_rooms", .. }
                ));
            }
        }
    }

    #[test]
    fn test_n_bathroom_bounds() {
        let mut raw = las_condes();
        raw.n_bathroom = Some(json!(6));
        assert_eq!(validate_record(&raw).unwrap_err().field(), "n_bathroom");
        raw.n_bathroom = Some(json!(5));
        assert!(validate_record(&raw).is_ok());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut raw = las_condes();
        raw.property_type = Some(json!("castle"));
        let err = validate_record(&raw).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidCategory { field: "type", .. }));
    }

    #[test]
    fn test_missing_field() {
        let mut raw = las_condes();
        raw.net_area = None;
        assert_eq!(
            validate_record(&raw).unwrap_err(),
            ValidationError::MissingField { field: "net_area" }
        );

        raw.net_area = Some(Value::Null);
        assert_eq!(validate_record(&raw).unwrap_err().kind(), "missing_field");
    }

    #[test]
    fn test_blank_sector_is_invalid_not_missing() {
        let mut raw = las_condes();
        raw.sector = Some(json!("   "));
        assert!(matches!(
            validate_record(&raw).unwrap_err(),
            ValidationError::InvalidCategory { field: "sector", .. }
        ));

        raw.sector = Some(json!("  Ñuñoa "));
        assert_eq!(validate_record(&raw).unwrap().sector, "Ñuñoa");
    }

    #[test]
    fn test_blank_number_is_invalid() {
        let mut raw = las_condes();
        raw.net_area = Some(json!(""));
        assert!(matches!(
            validate_record(&raw).unwrap_err(),
            ValidationError::InvalidNumber { field: "net_area", .. }
        ));
    }

    #[test]
    fn test_numeric_strings_are_parsed() {
        let mut raw = las_condes();
        raw.net_area = Some(json!("70.5"));
        raw.n_rooms = Some(json!("3.0"));
        let record = validate_record(&raw).unwrap();
        assert_eq!(record.net_area, 70.5);
        assert_eq!(record.n_rooms, 3);
    }

    #[test]
    fn test_non_numeric_and_non_finite_values() {
        let mut raw = las_condes();
        raw.net_area = Some(json!("seventy"));
        assert!(matches!(
            validate_record(&raw).unwrap_err(),
            ValidationError::InvalidNumber { field: "net_area", .. }
        ));

        raw.net_area = Some(json!("NaN"));
        assert!(matches!(
            validate_record(&raw).unwrap_err(),
            ValidationError::OutOfRange { field: "net_area", .. }
        ));

        raw.net_area = Some(json!(-5.0));
        assert!(matches!(
            validate_record(&raw).unwrap_err(),
            ValidationError::OutOfRange { field: "net_area", .. }
        ));
    }

    #[test]
    fn test_fractional_rooms_rejected() {
        let mut raw = las_condes();
        raw.n_rooms = Some(json!(2.5));
        assert!(matches!(
            validate_record(&raw).unwrap_err(),
            ValidationError::InvalidNumber { field: "n_rooms", .. }
        ));
    }

    #[test]
    fn test_usable_area_may_exceed_net_area() {
        let mut raw = las_condes();
        raw.net_usable_area = Some(json!(90));
        raw.net_area = Some(json!(70));
        assert!(validate_record(&raw).is_ok());
    }

    #[test]
    fn test_validate_example_price() {
        let mut row = LabeledRow {
            record: las_condes(),
            price: Some(json!(14500)),
        };
        assert_eq!(validate_example(&row).unwrap().price, 14500.0);

        row.price = Some(json!(0));
        assert_eq!(validate_example(&row).unwrap_err().field(), "price");

        row.price = None;
        assert_eq!(
            validate_example(&row).unwrap_err(),
            ValidationError::MissingField { field: "price" }
        );
    }
}
