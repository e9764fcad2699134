//! Decide whether a step must wait for the user.

use parley_types::FieldMap;

use crate::route::Step;

/// Returns `true` when `step` cannot run, or can run but still has nothing
/// to show for its collect fields.
///
/// 1. Every `requires` field must be present, else the step needs input.
/// 2. If the step collects nothing, it never needs input.
/// 3. Otherwise one present collect field is enough.
///
/// Presence means the key exists; `0`, `false`, `""` and `null` all count.
pub fn needs_input(step: &Step, data: &FieldMap) -> bool {
    if step.requires.iter().any(|f| !data.contains_key(f)) {
        return true;
    }
    if step.collect.is_empty() {
        return false;
    }
    !step.collect.iter().any(|f| data.contains_key(f))
}

/// Required fields that are still absent from `data`, in declaration order.
pub fn missing_requirements<'a>(step: &'a Step, data: &FieldMap) -> Vec<&'a str> {
    step.requires
        .iter()
        .filter(|f| !data.contains_key(*f))
        .map(String::as_str)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn data(pairs: &[(&str, Value)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn missing_requirement_needs_input() {
        let step = Step::new("s").with_requires(["email"]);
        assert!(needs_input(&step, &FieldMap::new()));
        assert_eq!(missing_requirements(&step, &FieldMap::new()), vec!["email"]);
    }

    #[test]
    fn nothing_to_collect_never_needs_input() {
        let step = Step::new("s");
        assert!(!needs_input(&step, &FieldMap::new()));
    }

    #[test]
    fn one_collect_field_is_enough() {
        let step = Step::new("s").with_collect(["phone", "email"]);
        assert!(needs_input(&step, &FieldMap::new()));
        assert!(!needs_input(&step, &data(&[("email", json!("a@b.c"))])));
    }

    #[test]
    fn requires_gate_applies_before_collect() {
        let step = Step::new("s").with_requires(["name"]).with_collect(["email"]);
        assert!(needs_input(&step, &data(&[("email", json!("a@b.c"))])));
        assert!(needs_input(&step, &data(&[("name", json!("Ada"))])));
        assert!(!needs_input(
            &step,
            &data(&[("name", json!("Ada")), ("email", json!("a@b.c"))])
        ));
    }

    #[test]
    fn falsy_values_count_as_present() {
        let step = Step::new("s").with_requires(["a", "b", "c", "d"]);
        let d = data(&[
            ("a", json!(0)),
            ("b", json!(false)),
            ("c", json!("")),
            ("d", Value::Null),
        ]);
        assert!(!needs_input(&step, &d));
    }
}
