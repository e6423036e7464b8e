//! JSON Schema for [`crate::record::StructuredRecord`].
//!
//! The schema is what the extraction capability is asked to honour. It is
//! strict in the way providers' structured-output modes expect: every
//! property is listed in `required`, optional scalars are `["string",
//! "null"]`, and enumerated fields carry their closed vocabulary.

use crate::record::{DEGREE_LEVELS, EMPLOYMENT_TYPES, LANGUAGE_PROFICIENCIES, LOCATION_TYPES};
use serde_json::{json, Map, Value};

/// Top-level fields every record carries.
pub const TOP_LEVEL_FIELDS: &[&str] = &[
    "profile",
    "experience",
    "education",
    "skills",
    "certifications",
    "languages",
    "projects",
    "awards",
];

fn nullable_string() -> Value {
    json!({ "type": ["string", "null"] })
}

fn nullable_enum(values: &[&str]) -> Value {
    let mut variants: Vec<Value> = values.iter().map(|v| json!(v)).collect();
    variants.push(Value::Null);
    json!({ "type": ["string", "null"], "enum": variants })
}

fn string_list() -> Value {
    json!({ "type": "array", "items": { "type": "string" } })
}

/// An object schema whose every property is required and no others allowed.
fn strict_object(properties: Vec<(&str, Value)>) -> Value {
    let required: Vec<Value> = properties.iter().map(|(k, _)| json!(k)).collect();
    let props: Map<String, Value> = properties
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    json!({
        "type": "object",
        "properties": props,
        "required": required,
        "additionalProperties": false
    })
}

fn list_of(item: Value) -> Value {
    json!({ "type": "array", "items": item })
}

/// Build the full record schema.
pub fn record_schema() -> Value {
    let profile = strict_object(vec![
        ("full_name", nullable_string()),
        ("headline", nullable_string()),
        ("email", nullable_string()),
        ("phone", nullable_string()),
        ("location", nullable_string()),
        ("website", nullable_string()),
        ("linkedin", nullable_string()),
        ("summary", nullable_string()),
    ]);

    let experience = strict_object(vec![
        ("company", nullable_string()),
        ("title", nullable_string()),
        ("location", nullable_string()),
        ("employment_type", nullable_enum(EMPLOYMENT_TYPES)),
        ("location_type", nullable_enum(LOCATION_TYPES)),
        ("start_date", nullable_string()),
        ("end_date", nullable_string()),
        ("is_current", json!({ "type": ["boolean", "null"] })),
        ("description", nullable_string()),
        ("highlights", string_list()),
    ]);

    let education = strict_object(vec![
        ("institution", nullable_string()),
        ("degree", nullable_string()),
        ("degree_level", nullable_enum(DEGREE_LEVELS)),
        ("field_of_study", nullable_string()),
        ("start_date", nullable_string()),
        ("end_date", nullable_string()),
        ("grade", nullable_string()),
    ]);

    let certification = strict_object(vec![
        ("name", nullable_string()),
        ("issuer", nullable_string()),
        ("issue_date", nullable_string()),
        ("expiry_date", nullable_string()),
    ]);

    let language = strict_object(vec![
        ("language", nullable_string()),
        ("proficiency", nullable_enum(LANGUAGE_PROFICIENCIES)),
    ]);

    let project = strict_object(vec![
        ("name", nullable_string()),
        ("description", nullable_string()),
        ("url", nullable_string()),
        ("technologies", string_list()),
    ]);

    let award = strict_object(vec![
        ("title", nullable_string()),
        ("issuer", nullable_string()),
        ("date", nullable_string()),
        ("description", nullable_string()),
    ]);

    strict_object(vec![
        ("profile", profile),
        ("experience", list_of(experience)),
        ("education", list_of(education)),
        ("skills", string_list()),
        ("certifications", list_of(certification)),
        ("languages", list_of(language)),
        ("projects", list_of(project)),
        ("awards", list_of(award)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::StructuredRecord;

    #[test]
    fn schema_requires_every_top_level_field() {
        let schema = record_schema();
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert_eq!(required, TOP_LEVEL_FIELDS);
    }

    #[test]
    fn enum_fields_allow_null() {
        let schema = record_schema();
        let level = &schema["properties"]["education"]["items"]["properties"]["degree_level"];
        let values = level["enum"].as_array().unwrap();
        assert!(values.contains(&Value::Null));
        assert!(values.contains(&json!("bachelor")));
    }

    #[test]
    fn schema_properties_match_record_serialisation() {
        let schema = record_schema();
        let record = serde_json::to_value(StructuredRecord::default()).unwrap();
        let profile_keys: Vec<&String> = record["profile"].as_object().unwrap().keys().collect();
        let schema_keys: Vec<&String> = schema["properties"]["profile"]["properties"]
            .as_object()
            .unwrap()
            .keys()
            .collect();
        for k in profile_keys {
            assert!(schema_keys.contains(&k), "schema is missing profile.{k}");
        }
    }
}
