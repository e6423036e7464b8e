//! The schema-shaped record the pipeline ultimately returns.
//!
//! Optional scalars serialise as explicit `null` and optional collections as
//! `[]`, so every top-level field is always present in the JSON output.
//! Enumerated fields only ever hold a value from their closed vocabulary:
//! anything else the model invents is coerced to `null` during
//! deserialisation (and logged) rather than smuggled through as free text.

use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredRecord {
    pub profile: Profile,
    #[serde(default)]
    pub experience: Vec<ExperienceEntry>,
    #[serde(default)]
    pub education: Vec<EducationEntry>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub certifications: Vec<Certification>,
    #[serde(default)]
    pub languages: Vec<LanguageSkill>,
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub awards: Vec<Award>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub full_name: Option<String>,
    pub headline: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
    pub linkedin: Option<String>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperienceEntry {
    pub company: Option<String>,
    pub title: Option<String>,
    pub location: Option<String>,
    #[serde(deserialize_with = "closed_vocabulary")]
    pub employment_type: Option<EmploymentType>,
    #[serde(deserialize_with = "closed_vocabulary")]
    pub location_type: Option<LocationType>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub is_current: Option<bool>,
    pub description: Option<String>,
    pub highlights: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EducationEntry {
    pub institution: Option<String>,
    pub degree: Option<String>,
    #[serde(deserialize_with = "closed_vocabulary")]
    pub degree_level: Option<DegreeLevel>,
    pub field_of_study: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub grade: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Certification {
    pub name: Option<String>,
    pub issuer: Option<String>,
    pub issue_date: Option<String>,
    pub expiry_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageSkill {
    pub language: Option<String>,
    #[serde(deserialize_with = "closed_vocabulary")]
    pub proficiency: Option<LanguageProficiency>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Project {
    pub name: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub technologies: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Award {
    pub title: Option<String>,
    pub issuer: Option<String>,
    pub date: Option<String>,
    pub description: Option<String>,
}

// ── Closed vocabularies ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmploymentType {
    FullTime,
    PartTime,
    Contract,
    Internship,
    Freelance,
    Temporary,
    Volunteer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationType {
    OnSite,
    Remote,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegreeLevel {
    HighSchool,
    Associate,
    Bachelor,
    Master,
    Doctorate,
    Certificate,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanguageProficiency {
    Elementary,
    LimitedWorking,
    ProfessionalWorking,
    FullProfessional,
    Native,
}

/// Allowed values per enumerated field, in wire form.
pub const EMPLOYMENT_TYPES: &[&str] = &[
    "full_time",
    "part_time",
    "contract",
    "internship",
    "freelance",
    "temporary",
    "volunteer",
];
pub const LOCATION_TYPES: &[&str] = &["on_site", "remote", "hybrid"];
pub const DEGREE_LEVELS: &[&str] = &[
    "high_school",
    "associate",
    "bachelor",
    "master",
    "doctorate",
    "certificate",
    "other",
];
pub const LANGUAGE_PROFICIENCIES: &[&str] = &[
    "elementary",
    "limited_working",
    "professional_working",
    "full_professional",
    "native",
];

/// Deserialise an enumerated field, coercing anything outside the
/// vocabulary to `None`.
///
/// Casing and separators are normalised first, so `"Full-Time"` and
/// `"full time"` both land on `full_time`.
fn closed_vocabulary<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    let value = match raw {
        None | Some(serde_json::Value::Null) => return Ok(None),
        Some(serde_json::Value::String(s)) => {
            let normalised = s.trim().to_lowercase().replace(['-', ' '], "_");
            serde_json::Value::String(normalised)
        }
        Some(other) => other,
    };
    match serde_json::from_value::<T>(value.clone()) {
        Ok(v) => Ok(Some(v)),
        Err(_) => {
            warn!("Dropping out-of-vocabulary value {}", value);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_collections_become_empty() {
        let rec: StructuredRecord = serde_json::from_value(json!({
            "profile": { "full_name": "Jane Doe" },
            "experience": [],
            "education": []
        }))
        .unwrap();
        assert_eq!(rec.profile.full_name.as_deref(), Some("Jane Doe"));
        assert!(rec.skills.is_empty());
        assert!(rec.awards.is_empty());
    }

    #[test]
    fn optional_scalars_serialise_as_null() {
        let json = serde_json::to_value(StructuredRecord::default()).unwrap();
        assert!(json["profile"]["email"].is_null());
        assert_eq!(json["languages"], json!([]));
        for key in [
            "profile",
            "experience",
            "education",
            "skills",
            "certifications",
            "languages",
            "projects",
            "awards",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn vocabulary_values_are_normalised() {
        let entry: ExperienceEntry = serde_json::from_value(json!({
            "company": "Acme",
            "employment_type": "Full-Time",
            "location_type": "on site"
        }))
        .unwrap();
        assert_eq!(entry.employment_type, Some(EmploymentType::FullTime));
        assert_eq!(entry.location_type, Some(LocationType::OnSite));
    }

    #[test]
    fn out_of_vocabulary_values_are_dropped() {
        let entry: EducationEntry = serde_json::from_value(json!({
            "institution": "MIT",
            "degree_level": "wizard"
        }))
        .unwrap();
        assert_eq!(entry.institution.as_deref(), Some("MIT"));
        assert_eq!(entry.degree_level, None);

        let lang: LanguageSkill = serde_json::from_value(json!({
            "language": "French",
            "proficiency": 3
        }))
        .unwrap();
        assert_eq!(lang.proficiency, None);
    }

    #[test]
    fn vocabulary_lists_match_serde_names() {
        for v in EMPLOYMENT_TYPES {
            assert!(serde_json::from_value::<EmploymentType>(json!(v)).is_ok(), "{v}");
        }
        for v in LOCATION_TYPES {
            assert!(serde_json::from_value::<LocationType>(json!(v)).is_ok(), "{v}");
        }
        for v in DEGREE_LEVELS {
            assert!(serde_json::from_value::<DegreeLevel>(json!(v)).is_ok(), "{v}");
        }
        for v in LANGUAGE_PROFICIENCIES {
            assert!(serde_json::from_value::<LanguageProficiency>(json!(v)).is_ok(), "{v}");
        }
    }
}
