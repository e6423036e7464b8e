//! Prompts for the structured-extraction request.
//!
//! The schema carries the contract. The prompt only says how to treat
//! missing data and which input the model is looking at. Callers can replace the system prompt through
//! [`crate::config::ExtractionConfig::system_prompt`]; the schema is appended
//! either way.

use crate::schema::record_schema;

/// Instructions preceding the schema in the system message.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You extract structured data from resumes and CVs.

Rules:
1. Return ONLY a single JSON object that matches the JSON Schema below. No prose, no Markdown fences.
2. Every property in the schema must be present. Use null for an unknown scalar and [] for an empty list. Never omit a key.
3. Enumerated fields may only take one of the listed values, or null when none applies.
4. Copy names, titles, dates and organisations as written; do not invent information that is not in the document.
5. Dates stay in the document's own format (e.g. "2019-03", "March 2019", "Present")."#;

/// User-turn instruction when the document arrives as extracted text.
pub const TEXT_INSTRUCTION: &str = "Extract the record from the following document text.";

/// User-turn instruction when the document arrives as page images.
pub const IMAGES_INSTRUCTION: &str =
    "Extract the record from the attached page images, read in page order.";

/// User-turn instruction when both text and page images are supplied.
pub const MIXED_INSTRUCTION: &str = "Extract the record from the document text below. \
The attached page images show the same pages; use them for content the text misses.";

/// Build the complete system message: instructions followed by the schema.
pub fn system_message(custom: Option<&str>) -> String {
    let schema = serde_json::to_string_pretty(&record_schema()).unwrap_or_default();
    format!(
        "{}\n\nJSON Schema:\n{}",
        custom.unwrap_or(DEFAULT_SYSTEM_PROMPT),
        schema
    )
}

/// Wrap document text with its instruction.
pub fn text_message(instruction: &str, text: &str) -> String {
    format!("{instruction}\n\n\"\"\"\n{text}\n\"\"\"")
}
