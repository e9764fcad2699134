//! Pull batch fields out of the model's structured output and merge them.

use parley_types::{merge_data, FieldMap, SessionState};
use serde_json::{Map, Value};

use crate::batch::batch_collect_fields;
use crate::route::Step;
use crate::schema::{Schema, ValidationError};

/// Result of the collect phase.
#[derive(Debug, Clone)]
pub struct CollectOutcome {
    /// Fields taken from the model output this turn.
    pub collected_data: FieldMap,
    /// `session` with `collected_data` merged in, valid or not.
    pub updated_session: SessionState,
    pub fields_collected: Vec<String>,
    pub fields_missing: Vec<String>,
    pub validation_errors: Vec<ValidationError>,
}

impl CollectOutcome {
    pub fn is_valid(&self) -> bool {
        self.validation_errors.is_empty()
    }
}

/// Collect every batch step's fields from `structured`.
///
/// Fields absent from the output, or present as `null`, are reported as
/// missing. When `schema` is given each collected field is validated, but
/// the merge happens regardless.
pub fn collect_batch_data(
    steps: &[&Step],
    structured: Option<&Map<String, Value>>,
    session: &SessionState,
    schema: Option<&Schema>,
) -> CollectOutcome {
    let mut collected_data = FieldMap::new();
    let mut fields_collected = Vec::new();
    let mut fields_missing = Vec::new();
    let mut validation_errors = Vec::new();

    for field in batch_collect_fields(steps) {
        match structured.and_then(|s| s.get(&field)) {
            Some(value) if !value.is_null() => {
                if let Some(schema) = schema {
                    validation_errors.extend(schema.validate_field(&field, value));
                }
                collected_data.insert(field.clone(), value.clone());
                fields_collected.push(field);
            }
            _ => fields_missing.push(field),
        }
    }

    if !validation_errors.is_empty() {
        tracing::warn!(
            errors = validation_errors.len(),
            fields = ?validation_errors.iter().map(|e| e.field.as_str()).collect::<Vec<_>>(),
            "Collected data failed schema validation; merging anyway"
        );
    }
    tracing::debug!(collected = ?fields_collected, missing = ?fields_missing, "Collected batch data");

    let updated_session = merge_data(session, &collected_data);
    CollectOutcome {
        collected_data,
        updated_session,
        fields_collected,
        fields_missing,
        validation_errors,
    }
}
