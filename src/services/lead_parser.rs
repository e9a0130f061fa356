use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::domain::lead::LeadRecord;

use super::ResponseBody;

static ARRAY_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\s*\{").unwrap());
static TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*([\]}])").unwrap());

#[derive(Deserialize)]
struct LeadEnvelope {
    leads: Vec<LeadRecord>,
}

fn decode_array(candidate: &str) -> Option<Vec<LeadRecord>> {
    match serde_json::from_str::<Vec<LeadRecord>>(candidate) {
        Ok(leads) => Some(leads),
        Err(e) => {
            log::warn!("Strict decode failed, retrying without trailing commas: {}", e);
            let repaired = TRAILING_COMMA.replace_all(candidate, "$1");
            serde_json::from_str::<Vec<LeadRecord>>(&repaired)
                .map_err(|e| log::error!("JSON parsing error after repair: {}", e))
                .ok()
        }
    }
}

// Length of the bracketed value opening at the start of `text`, skipping
// brackets inside string literals. `None` when it never closes.
fn balanced_len(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' | '{' => depth += 1,
            ']' | '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }

    None
}

/// Finds the first balanced array of objects in free text and decodes it.
pub fn extract_from_text(text: &str) -> Option<Vec<LeadRecord>> {
    let candidate = ARRAY_START.find_iter(text).find_map(|start| {
        let rest = &text[start.start()..];
        balanced_len(rest).map(|len| &rest[..len])
    })?;

    decode_array(candidate)
}

fn extract_from_json(json: &str) -> Option<Vec<LeadRecord>> {
    if let Ok(envelope) = serde_json::from_str::<LeadEnvelope>(json) {
        return Some(envelope.leads);
    }
    if let Ok(leads) = serde_json::from_str::<Vec<LeadRecord>>(json) {
        return Some(leads);
    }

    log::warn!("Structured response did not match the lead schema, scanning as text");
    extract_from_text(json)
}

/// Decodes a service response into normalized leads.
///
/// `None` means nothing decodable was found. Records without a usable name
/// are dropped.
pub fn parse_leads(body: &ResponseBody) -> Option<Vec<LeadRecord>> {
    let raw = match body {
        ResponseBody::Text(text) => extract_from_text(text),
        ResponseBody::Json(json) => extract_from_json(json),
    }?;

    Some(raw.into_iter().filter_map(LeadRecord::normalized).collect())
}
