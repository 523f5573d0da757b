//! Field-by-field comparison of a claimed record against ground truth.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use claims::Entity;

use crate::ground_truth::CanonicalRecord;
use crate::schema::{FieldClass, RecordSchema};

/// Slack added to tolerance checks to absorb float rounding.
const TOLERANCE_EPSILON: f64 = 1e-9;

/// Relative tolerances per numeric field class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerances {
    /// Volatile fields such as prices (fraction, e.g. 0.05 = 5%)
    pub volatile: f64,
    /// Estimate-like fields (fraction)
    pub estimate: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            volatile: 0.05,
            estimate: 0.10,
        }
    }
}

/// First disagreement found between a claim and ground truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldDiscrepancy {
    /// Identity field differs, or a numeric field has a non-numeric value
    Mismatch { field: String },
    /// Numeric field outside its relative tolerance
    ToleranceExceeded { field: String, deviation: f64 },
    /// Status moved in a direction that is not allowed
    InvalidStatusTransition {
        field: String,
        from: String,
        to: String,
    },
}

/// `|claimed - truth| / |truth|`; a truth of zero only tolerates an exact zero.
pub fn relative_deviation(claimed: f64, truth: f64) -> f64 {
    if truth == 0.0 {
        if claimed == 0.0 {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        ((claimed - truth) / truth).abs()
    }
}

/// Parse an entity's payload as a JSON object.
pub fn parse_content(entity: &Entity) -> Result<Map<String, Value>, String> {
    match serde_json::from_slice::<Value>(&entity.content) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err("content is not a JSON object".to_string()),
        Err(e) => Err(format!("content is not valid JSON: {}", e)),
    }
}

/// Compare a claimed record with its authoritative counterpart.
///
/// Fields are checked in schema order and the first discrepancy is
/// returned. Fields ground truth does not carry are skipped, as are fields
/// the claim omits; informational fields are never compared.
pub fn compare_record(
    schema: &RecordSchema,
    claimed: &Map<String, Value>,
    truth: &CanonicalRecord,
    tolerances: &Tolerances,
) -> Result<(), FieldDiscrepancy> {
    for spec in &schema.fields {
        let (Some(claimed_value), Some(truth_value)) =
            (present(claimed, &spec.name), present(&truth.fields, &spec.name))
        else {
            continue;
        };

        match spec.class {
            FieldClass::Identity => {
                if !values_equal(claimed_value, truth_value) {
                    return Err(FieldDiscrepancy::Mismatch {
                        field: spec.name.clone(),
                    });
                }
            }
            FieldClass::Volatile => {
                check_tolerance(&spec.name, claimed_value, truth_value, tolerances.volatile)?
            }
            FieldClass::Estimate => {
                check_tolerance(&spec.name, claimed_value, truth_value, tolerances.estimate)?
            }
            FieldClass::Status => {
                let (Some(from), Some(to)) = (claimed_value.as_str(), truth_value.as_str()) else {
                    return Err(FieldDiscrepancy::Mismatch {
                        field: spec.name.clone(),
                    });
                };
                if !schema.status_transitions.allows(from, to) {
                    return Err(FieldDiscrepancy::InvalidStatusTransition {
                        field: spec.name.clone(),
                        from: from.to_string(),
                        to: to.to_string(),
                    });
                }
            }
            FieldClass::Informational => {}
        }
    }
    Ok(())
}

fn present<'a>(record: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    record.get(field).filter(|v| !v.is_null())
}

/// JSON equality that treats `1` and `1.0` as the same number.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if a.is_number() && b.is_number() => x == y,
        _ => a == b,
    }
}

fn check_tolerance(
    field: &str,
    claimed: &Value,
    truth: &Value,
    tolerance: f64,
) -> Result<(), FieldDiscrepancy> {
    let (Some(claimed), Some(truth)) = (claimed.as_f64(), truth.as_f64()) else {
        return Err(FieldDiscrepancy::Mismatch {
            field: field.to_string(),
        });
    };
    let deviation = relative_deviation(claimed, truth);
    if deviation > tolerance + TOLERANCE_EPSILON {
        return Err(FieldDiscrepancy::ToleranceExceeded {
            field: field.to_string(),
            deviation,
        });
    }
    Ok(())
}
