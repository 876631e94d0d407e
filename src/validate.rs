//! Field validation for requisition creation and update.
//!
//! Pure: takes the field set, returns either `Ok` or a field-level error map
//! that is surfaced to the invoking participant verbatim.

use std::collections::BTreeMap;
use std::fmt;

/// The validated field set of a requisition, minus the deadline (which goes
/// through the deadline adapter separately).
#[derive(Debug, Clone)]
pub struct RequestFields {
    pub material: String,
    pub quantity: i64,
    pub payment: String,
    pub region: String,
}

/// Field-level validation failures, keyed by field name.
///
/// BTreeMap keeps the rendering order stable for users and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(BTreeMap<&'static str, String>);

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, reason) in &self.0 {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", field, reason)?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Validate a full requisition field set.
pub fn validate(fields: &RequestFields) -> Result<(), ValidationErrors> {
    let mut errors = BTreeMap::new();

    check_text(&mut errors, "material", &fields.material);
    check_text(&mut errors, "payment", &fields.payment);
    check_text(&mut errors, "region", &fields.region);
    if fields.quantity < 1 {
        errors.insert("quantity", "must be at least 1".to_string());
    } else if fields.quantity > u32::MAX as i64 {
        errors.insert("quantity", "is too large".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors(errors))
    }
}

fn check_text(errors: &mut BTreeMap<&'static str, String>, field: &'static str, value: &str) {
    if value.trim().is_empty() {
        errors.insert(field, "must not be empty".to_string());
    }
}
