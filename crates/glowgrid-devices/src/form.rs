//! UI-facing form descriptors.
//!
//! Each managed device gets one form: a title, an ordered set of fields, and
//! an error slot the director fills when the device misbehaves. Forms carry
//! presentation state only; live device state lives on the paired
//! controller and is copied in after connects and writes.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

/// Kind of control a field renders as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// On/off toggle
    Boolean,
}

/// One controllable field on a device form.
#[derive(Debug, Clone, Serialize)]
pub struct FormField {
    /// Globally-unique field identifier (`<form-uid>-field-<i>`)
    pub uid: String,
    /// Display name
    pub title: String,
    /// Control kind
    #[serde(rename = "type")]
    pub kind: FieldKind,
    /// Last known state, `None` until the device has connected
    pub state: Option<Value>,
}

/// Form descriptor for one device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceForm {
    /// Unique form identifier (`form-<n>`)
    pub uid: String,
    /// Device title from the config
    pub title: String,
    /// Whether an error message is set
    pub has_error: bool,
    /// Error message to display in place of the controls
    pub error_message: String,
    /// Fields in display order
    pub fields: Vec<FormField>,
    #[serde(skip)]
    field_indices: HashMap<String, usize>,
}

impl DeviceForm {
    /// Build a form with one field per name, states unknown.
    pub fn new(
        uid: impl Into<String>,
        title: impl Into<String>,
        kind: FieldKind,
        field_names: &[String],
    ) -> Self {
        let uid = uid.into();
        let mut fields = Vec::with_capacity(field_names.len());
        let mut field_indices = HashMap::with_capacity(field_names.len());

        for (index, name) in field_names.iter().enumerate() {
            let field_uid = format!("{uid}-field-{index}");
            field_indices.insert(field_uid.clone(), index);
            fields.push(FormField {
                uid: field_uid,
                title: name.clone(),
                kind,
                state: None,
            });
        }

        Self {
            uid,
            title: title.into(),
            has_error: false,
            error_message: String::new(),
            fields,
            field_indices,
        }
    }

    /// Look up a field by its UID.
    pub fn field_by_uid(&self, uid: &str) -> Option<&FormField> {
        self.field_indices
            .get(uid)
            .and_then(|&index| self.fields.get(index))
    }

    /// Number of fields.
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Copy a state snapshot into the fields, index-aligned. Missing
    /// trailing entries leave the field state unknown.
    pub fn set_states(&mut self, states: &[Value]) {
        for (index, field) in self.fields.iter_mut().enumerate() {
            field.state = states.get(index).cloned();
        }
    }

    /// Clear every field state back to unknown.
    pub fn clear_states(&mut self) {
        for field in &mut self.fields {
            field.state = None;
        }
    }

    /// Associate an error message with this form.
    pub fn set_error(&mut self, message: impl Into<String>) {
        self.has_error = true;
        self.error_message = message.into();
    }

    /// Clear any error message.
    pub fn clear_error(&mut self) {
        self.has_error = false;
        self.error_message.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_field_uids_follow_form_uid() {
        let form = DeviceForm::new(
            "form-3",
            "Bedroom",
            FieldKind::Boolean,
            &names(&["Overhead Light", "Bedside Lamp"]),
        );

        assert_eq!(form.fields[0].uid, "form-3-field-0");
        assert_eq!(form.fields[1].uid, "form-3-field-1");
        assert_eq!(form.field_by_uid("form-3-field-1").unwrap().title, "Bedside Lamp");
        assert!(form.field_by_uid("form-3-field-2").is_none());
    }

    #[test]
    fn test_states_start_unknown() {
        let form = DeviceForm::new("form-1", "Desk", FieldKind::Boolean, &names(&["Lamp"]));
        assert!(form.fields[0].state.is_none());
        assert!(!form.has_error);
    }

    #[test]
    fn test_set_states_index_aligned() {
        let mut form =
            DeviceForm::new("form-1", "Desk", FieldKind::Boolean, &names(&["Lamp", "Fan"]));
        form.set_states(&[json!(true), json!(false)]);
        assert_eq!(form.fields[0].state, Some(json!(true)));
        assert_eq!(form.fields[1].state, Some(json!(false)));

        form.clear_states();
        assert!(form.fields[0].state.is_none());
    }

    #[test]
    fn test_error_roundtrip() {
        let mut form = DeviceForm::new("form-1", "Desk", FieldKind::Boolean, &names(&["Lamp"]));
        form.set_error("Connection error: host unreachable");
        assert!(form.has_error);
        assert_eq!(form.error_message, "Connection error: host unreachable");

        form.clear_error();
        assert!(!form.has_error);
        assert!(form.error_message.is_empty());
    }

    #[test]
    fn test_serializes_type_tag() {
        let form = DeviceForm::new("form-1", "Desk", FieldKind::Boolean, &names(&["Lamp"]));
        let value = serde_json::to_value(&form).unwrap();
        assert_eq!(value["fields"][0]["type"], json!("boolean"));
    }
}
