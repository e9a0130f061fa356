use super::ResponseFormat;

pub fn segment_query(query: &str, modifier: &str) -> String {
    match modifier.trim().is_empty() {
        true => query.trim().to_string(),
        false => format!("{} {}", query.trim(), modifier.trim()),
    }
}

pub fn build_segment_prompt(query: &str, modifier: &str, format: ResponseFormat) -> String {
    let final_query = segment_query(query, modifier);

    let output_shape = match format {
        ResponseFormat::FreeText => {
            r#"REQUIRED JSON FORMAT (EXTRACT AS MANY AS POSSIBLE):
    [
      {
        "name": "Business Name",
        "phone": "Full Phone Number (Mandatory)",
        "email": "Email if available",
        "website": "URL",
        "address": "Full Address",
        "sourceUrl": "Source link"
      }
    ]"#
        }
        ResponseFormat::Structured => {
            r#"REQUIRED JSON FORMAT (EXTRACT AS MANY AS POSSIBLE):
    {
      "leads": [
        {
          "name": "Business Name",
          "phone": "Full Phone Number (Mandatory)",
          "email": "Email if available",
          "website": "URL",
          "address": "Full Address",
          "sourceUrl": "Source link"
        }
      ]
    }"#
        }
    };

    format!(
        r#"
    INSTRUCTIONS: You are a B2B lead generation expert. Use web search to perform an EXHAUSTIVE extraction for: "{final_query}".

    GOAL: Find EVERY possible business contact. Do not summarize and do not stop at a top-N list.
    Look for lists, tables and directory entries in the search results.

    TARGET SOURCES:
    - Industrial zone member directories (GIDC, MIDC, RIICO, etc.)
    - B2B portals (IndiaMART, TradeIndia, ExportersIndia)
    - Trade association lists
    - Government MSME/Udyam registries

    {output_shape}

    STRICT RULES:
    1. Only include businesses where a PHONE NUMBER is found.
    2. If multiple numbers exist, pick the primary mobile/WhatsApp.
    3. Every field is a string. Use "N/A" for anything you cannot find, never omit a field.
    4. MAXIMIZE QUANTITY. If you see a list of 50 leads, extract all of them.
    5. JSON ONLY. No text before or after.
"#
    )
}
