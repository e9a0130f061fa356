use std::collections::HashSet;

use serde::{Deserialize, Deserializer, Serialize};
use serde_aux::field_attributes::deserialize_default_from_null;

// Values the extraction service uses when it could not find a field.
const UNKNOWN_SENTINELS: [&str; 7] = [
    "n/a",
    "na",
    "none",
    "null",
    "unknown",
    "not found",
    "not available",
];

pub fn is_unknown(value: &str) -> bool {
    let value = value.trim();
    value.is_empty()
        || UNKNOWN_SENTINELS
            .iter()
            .any(|sentinel| value.eq_ignore_ascii_case(sentinel))
}

// Phones arrive as strings, bare numbers or null.
fn deserialize_phone<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Phone {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Option::<Phone>::deserialize(deserializer)? {
        Some(Phone::Text(text)) => text,
        Some(Phone::Number(number)) => number.to_string(),
        None => String::new(),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadRecord {
    #[serde(default, deserialize_with = "deserialize_default_from_null")]
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_phone")]
    pub phone: String,
    #[serde(default, deserialize_with = "deserialize_default_from_null")]
    pub email: String,
    #[serde(default, deserialize_with = "deserialize_default_from_null")]
    pub website: String,
    #[serde(default, deserialize_with = "deserialize_default_from_null")]
    pub address: String,
    #[serde(
        default,
        alias = "source_url",
        alias = "source",
        deserialize_with = "deserialize_default_from_null"
    )]
    pub source_url: String,
}

impl LeadRecord {
    /// Trims every field. Returns `None` when the record has no usable name.
    pub fn normalized(self) -> Option<Self> {
        let lead = LeadRecord {
            name: self.name.trim().to_string(),
            phone: self.phone.trim().to_string(),
            email: self.email.trim().to_string(),
            website: self.website.trim().to_string(),
            address: self.address.trim().to_string(),
            source_url: self.source_url.trim().to_string(),
        };

        match is_unknown(&lead.name) {
            true => None,
            false => Some(lead),
        }
    }

    pub fn has_phone(&self) -> bool {
        !is_unknown(&self.phone)
    }

    pub fn name_key(&self) -> String {
        self.name.trim().to_lowercase()
    }

    pub fn phone_key(&self) -> Option<String> {
        match self.has_phone() {
            true => Some(self.phone.trim().to_string()),
            false => None,
        }
    }
}

/// Ordered set of accepted leads.
///
/// Two leads are the same business when their trimmed names match
/// case-insensitively, or when both carry the same known phone number.
/// The first lead inserted for a key is kept and later duplicates are
/// dropped without touching it.
#[derive(Debug, Default)]
pub struct LeadSet {
    leads: Vec<LeadRecord>,
    names: HashSet<String>,
    phones: HashSet<String>,
    phone_mandatory: bool,
}

impl LeadSet {
    pub fn new(phone_mandatory: bool) -> Self {
        LeadSet {
            phone_mandatory,
            ..Default::default()
        }
    }

    pub fn insert(&mut self, lead: LeadRecord) -> bool {
        if is_unknown(&lead.name) {
            return false;
        }
        if self.phone_mandatory && !lead.has_phone() {
            return false;
        }

        let name_key = lead.name_key();
        let phone_key = lead.phone_key();

        if self.names.contains(&name_key) {
            return false;
        }
        if let Some(ref phone) = phone_key {
            if self.phones.contains(phone) {
                return false;
            }
        }

        self.names.insert(name_key);
        if let Some(phone) = phone_key {
            self.phones.insert(phone);
        }
        self.leads.push(lead);

        true
    }

    /// Returns how many of `leads` were accepted.
    pub fn extend(&mut self, leads: impl IntoIterator<Item = LeadRecord>) -> usize {
        leads
            .into_iter()
            .map(|lead| self.insert(lead))
            .filter(|accepted| *accepted)
            .count()
    }

    pub fn len(&self) -> usize {
        self.leads.len()
    }

    pub fn into_leads(self) -> Vec<LeadRecord> {
        self.leads
    }
}

/// Merges segment lists in the order given.
pub fn merge_segments(
    segments: impl IntoIterator<Item = Vec<LeadRecord>>,
    phone_mandatory: bool,
) -> Vec<LeadRecord> {
    let mut set = LeadSet::new(phone_mandatory);
    for segment in segments {
        set.extend(segment);
    }
    set.into_leads()
}

#[cfg(test)]
mod tests {
    use super::{is_unknown, merge_segments, LeadRecord, LeadSet};

    fn lead(name: &str, phone: &str) -> LeadRecord {
        LeadRecord {
            name: name.to_string(),
            phone: phone.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            ..Default::default()
        }
    }

    #[test]
    fn sentinels_are_unknown() {
        for value in ["", "  ", "N/A", "n/a", "NA", "Unknown", "not found", " null "] {
            assert!(is_unknown(value), "{:?} should be unknown", value);
        }
        assert!(!is_unknown("+91 98250 12345"));
        assert!(!is_unknown("Nash Infotech"));
    }

    #[test]
    fn name_match_is_case_insensitive_and_trimmed() {
        let mut set = LeadSet::new(true);

        assert!(set.insert(lead("Acme Systems", "111")));
        assert!(!set.insert(lead("  acme SYSTEMS ", "222")));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn shared_phone_is_a_duplicate() {
        let mut set = LeadSet::new(true);

        assert!(set.insert(lead("Acme Systems", "079-2658")));
        assert!(!set.insert(lead("Acme Sys Pvt Ltd", "079-2658")));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn unknown_phones_never_collide() {
        let mut set = LeadSet::new(false);

        assert!(set.insert(lead("Alpha", "N/A")));
        assert!(set.insert(lead("Beta", "N/A")));
        assert!(set.insert(lead("Gamma", "")));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn first_occurrence_wins() {
        let first = LeadRecord {
            address: "SG Highway, Ahmedabad".to_string(),
            ..lead("Acme", "111")
        };
        let later = LeadRecord {
            address: "Somewhere else".to_string(),
            ..lead("ACME", "999")
        };

        let merged = merge_segments(vec![vec![first.clone()], vec![later]], true);

        assert_eq!(merged, vec![first]);
    }

    #[test]
    fn phone_mandatory_drops_phoneless_leads() {
        let merged = merge_segments(
            vec![vec![lead("Alpha", "N/A"), lead("Beta", "123"), lead("Gamma", " ")]],
            true,
        );

        assert_eq!(merged.len(), 1);
        assert!(merged.iter().all(|l| l.has_phone()));
    }

    #[test]
    fn phoneless_lead_does_not_shadow_a_later_one() {
        let merged = merge_segments(
            vec![vec![lead("Alpha", "N/A")], vec![lead("alpha", "555")]],
            true,
        );

        assert_eq!(merged, vec![lead("alpha", "555")]);
    }

    #[test]
    fn merge_is_deterministic() {
        let segments = vec![
            vec![lead("A", "1"), lead("B", "2"), lead("a", "3")],
            vec![lead("C", "2"), lead("D", "4")],
            vec![lead("E", "5"), lead("d", "6")],
        ];

        let first = merge_segments(segments.clone(), true);
        let second = merge_segments(segments, true);

        assert_eq!(first, second);
        let names: Vec<&str> = first.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "D", "E"]);
    }

    #[test]
    fn accepted_leads_share_no_key() {
        let segments = vec![
            vec![lead("A", "1"), lead("B", "1"), lead("C", "2")],
            vec![lead(" c ", "3"), lead("D", "2"), lead("E", "4")],
        ];
        let merged = merge_segments(segments, true);

        for (i, left) in merged.iter().enumerate() {
            for right in merged.iter().skip(i + 1) {
                assert_ne!(left.name_key(), right.name_key());
                assert_ne!(left.phone_key(), right.phone_key());
            }
        }
    }

    #[test]
    fn normalized_trims_and_rejects_nameless() {
        let raw = LeadRecord {
            name: "  Nash Infotech ".to_string(),
            phone: " 98250 ".to_string(),
            ..Default::default()
        };
        let lead = raw.normalized().unwrap();
        assert_eq!(lead.name, "Nash Infotech");
        assert_eq!(lead.phone, "98250");

        assert!(lead_with_name("N/A").normalized().is_none());
        assert!(lead_with_name("   ").normalized().is_none());
    }

    fn lead_with_name(name: &str) -> LeadRecord {
        LeadRecord {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn deserializes_lenient_fields() {
        let json = r#"{"name":"Acme","phone":9825012345,"sourceUrl":"https://x.in"}"#;
        let lead: LeadRecord = serde_json::from_str(json).unwrap();

        assert_eq!(lead.phone, "9825012345");
        assert_eq!(lead.source_url, "https://x.in");
        assert_eq!(lead.email, "");
    }

    #[test]
    fn null_fields_read_as_empty() {
        let json = r#"[
            {"name":"Acme","phone":"123","email":null,"website":null,"address":"Naroda GIDC","sourceUrl":null},
            {"name":"Bharat Tools","phone":null,"email":"sales@bharat.in"}
        ]"#;
        let leads: Vec<LeadRecord> = serde_json::from_str(json).unwrap();

        assert_eq!(leads.len(), 2);
        assert_eq!(leads[0].email, "");
        assert_eq!(leads[0].source_url, "");
        assert_eq!(leads[1].phone, "");
        assert!(!leads[1].has_phone());
    }
}
