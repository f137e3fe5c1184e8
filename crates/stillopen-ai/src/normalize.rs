//! Schema normalization: raw records of any origin → [`CanonicalPlace`].
//!
//! One function per origin shape. The original sample set and Overture share
//! the Overture schema (nested `names`/`categories`, list-typed contact
//! fields, `sources` provenance structs). OSM records arrive either as the
//! flattened export (`name`, `category`, `address`, nested `metadata`) or as
//! raw Overpass elements carrying a `tags` mapping.
//!
//! Normalization is total: every malformed field degrades to its default.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use stillopen_core::{CanonicalPlace, Contact, Origin, Provenance, RawRecord};

use crate::decode::{decode_collection, decode_mapping, element_to_string, is_null_token};

/// Amenity values queried as "open" from OSM.
pub const OSM_OPEN_AMENITIES: &[&str] =
    &["restaurant", "cafe", "bar", "fast_food", "bank", "pharmacy"];

/// Shop values queried as "open" from OSM.
pub const OSM_OPEN_SHOPS: &[&str] = &["supermarket", "convenience", "bakery", "electronics"];

/// Tag prefixes marking a business that no longer operates.
const OSM_CLOSED_PREFIXES: &[&str] = &["disused:", "closed:"];

const OSM_CATEGORY_TAGS: &[&str] = &[
    "amenity",
    "shop",
    "disused:amenity",
    "disused:shop",
    "closed:amenity",
    "closed:shop",
];
const OSM_WEBSITE_TAGS: &[&str] = &["website", "contact:website", "url"];
const OSM_PHONE_TAGS: &[&str] = &["phone", "contact:phone"];
const OSM_SOCIAL_TAGS: &[&str] = &["contact:facebook", "contact:instagram", "facebook"];
const OSM_EMAIL_TAGS: &[&str] = &["email", "contact:email"];
const OSM_ADDRESS_TAGS: &[&str] = &["addr:street", "addr:housenumber", "addr:city", "addr:state"];

const TIMESTAMP_KEYS: &[&str] = &["update_time", "updated_at", "timestamp"];

/// Converts raw records into canonical places relative to a reference time.
///
/// The reference time anchors `days_since_last_update`. Training pins it
/// (see [`TrainingConfig::reference_time`](crate::TrainingConfig)); serving
/// uses the current time.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    reference: DateTime<Utc>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::now()
    }
}

impl Normalizer {
    pub fn new(reference: DateTime<Utc>) -> Self {
        Self { reference }
    }

    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    pub fn reference(&self) -> DateTime<Utc> {
        self.reference
    }

    /// Normalize one record. Never fails.
    pub fn normalize(&self, raw: &RawRecord, origin: Origin) -> CanonicalPlace {
        match origin {
            Origin::Original | Origin::Overture => self.normalize_overture_like(raw, origin),
            Origin::Osm => self.normalize_osm(raw),
        }
    }

    /// Original sample set and Overture export.
    fn normalize_overture_like(&self, raw: &RawRecord, origin: Origin) -> CanonicalPlace {
        let name = primary_of(raw.get("names"))
            .or_else(|| non_empty_str(raw.get("name")))
            .unwrap_or_else(|| CanonicalPlace::UNKNOWN_NAME.to_string());
        let category = primary_of(raw.get("categories"))
            .or_else(|| non_empty_str(raw.get("category")))
            .unwrap_or_else(|| CanonicalPlace::UNKNOWN_CATEGORY.to_string());

        let contact = Contact {
            websites: strings(raw.get("websites")),
            socials: strings(raw.get("socials")),
            phones: strings(raw.get("phones")),
            emails: strings(raw.get("emails")),
        };

        let address_present = !decode_collection(raw.get("addresses")).is_empty()
            || non_empty_str(raw.get("address")).is_some();

        let provenance: Vec<Provenance> = decode_collection(raw.get("sources"))
            .iter()
            .map(provenance_entry)
            .collect();

        let open_label = match origin {
            // Overture extracts only list operating places.
            Origin::Overture => Some(1),
            _ => parse_label(raw.get("open")),
        };

        CanonicalPlace {
            name,
            category,
            contact,
            brand_present: brand_present(raw.get("brand")),
            address_present,
            confidence: unit_interval(parse_f64(raw.get("confidence"))),
            days_since_last_update: self.staleness_days(&provenance),
            provenance,
            open_label,
            origin,
        }
    }

    /// OSM export records and raw Overpass elements.
    fn normalize_osm(&self, raw: &RawRecord) -> CanonicalPlace {
        let metadata = decode_mapping(raw.get("metadata")).unwrap_or_default();
        let tags = decode_mapping(raw.get("tags")).unwrap_or_default();
        // Export records keep contact data under `metadata`; fall back to the
        // top level for hand-built records.
        let field = |key: &str| metadata.get(key).or_else(|| raw.get(key));

        let name = non_empty_str(raw.get("name"))
            .or_else(|| tag(&tags, "name"))
            .or_else(|| tag(&tags, "old_name"))
            .unwrap_or_else(|| CanonicalPlace::UNKNOWN_NAME.to_string());

        let category = non_empty_str(raw.get("category"))
            .filter(|c| c != CanonicalPlace::UNKNOWN_CATEGORY)
            .or_else(|| primary_of(field("categories")))
            .or_else(|| OSM_CATEGORY_TAGS.iter().find_map(|k| tag(&tags, k)))
            .unwrap_or_else(|| CanonicalPlace::UNKNOWN_CATEGORY.to_string());

        let contact = Contact {
            websites: strings_or_tags(field("websites"), &tags, OSM_WEBSITE_TAGS),
            socials: strings_or_tags(field("socials"), &tags, OSM_SOCIAL_TAGS),
            phones: strings_or_tags(field("phones"), &tags, OSM_PHONE_TAGS),
            emails: strings_or_tags(field("emails"), &tags, OSM_EMAIL_TAGS),
        };

        let brand_present = brand_present(field("brand")) || tag(&tags, "brand").is_some();

        let address_present = non_empty_str(raw.get("address")).is_some()
            || !decode_collection(field("addresses")).is_empty()
            || OSM_ADDRESS_TAGS.iter().any(|k| tag(&tags, k).is_some());

        let confidence = parse_f64(field("confidence"))
            .unwrap_or(if address_present { 0.7 } else { 0.5 });

        let mut provenance: Vec<Provenance> = decode_collection(field("sources"))
            .iter()
            .map(provenance_entry)
            .collect();
        if provenance.is_empty()
            && let Some(id) = raw.get("id").filter(|v| !v.is_null())
        {
            let id = element_to_string(id);
            provenance.push(Provenance {
                source_id: if id.starts_with("osm") { id } else { format!("osm/{id}") },
                confidence: None,
                updated_at: raw.get("timestamp").and_then(Value::as_str).and_then(parse_timestamp),
            });
        }

        let open_label = parse_label(raw.get("open"))
            .or_else(|| parse_label(metadata.get("open")))
            .or_else(|| osm_tag_label(&tags));

        CanonicalPlace {
            name,
            category,
            contact,
            brand_present,
            address_present,
            confidence: unit_interval(Some(confidence)),
            days_since_last_update: self.staleness_days(&provenance),
            provenance,
            open_label,
            origin: Origin::Osm,
        }
    }

    /// Minimum whole-day age over parseable provenance timestamps, clamped
    /// at zero; [`CanonicalPlace::UNKNOWN_STALENESS_DAYS`] when none parse.
    fn staleness_days(&self, provenance: &[Provenance]) -> u32 {
        provenance
            .iter()
            .filter_map(|p| p.updated_at)
            .map(|ts| (self.reference - ts).num_days().max(0))
            .min()
            .map(|days| u32::try_from(days).unwrap_or(u32::MAX))
            .unwrap_or(CanonicalPlace::UNKNOWN_STALENESS_DAYS)
    }
}

/// Label implied by OSM tags: closed prefixes win, then the open allowlist.
fn osm_tag_label(tags: &Map<String, Value>) -> Option<u8> {
    let closed = tags
        .keys()
        .any(|k| OSM_CLOSED_PREFIXES.iter().any(|p| k.starts_with(p)));
    if closed {
        return Some(0);
    }
    let allowed = |key: &str, list: &[&str]| {
        tags.get(key)
            .and_then(Value::as_str)
            .is_some_and(|v| list.contains(&v))
    };
    if allowed("amenity", OSM_OPEN_AMENITIES) || allowed("shop", OSM_OPEN_SHOPS) {
        return Some(1);
    }
    None
}

fn provenance_entry(value: &Value) -> Provenance {
    let Value::Object(map) = value else {
        return Provenance {
            source_id: element_to_string(value),
            confidence: None,
            updated_at: None,
        };
    };

    let dataset = non_empty_str(map.get("dataset"));
    let record_id = map.get("record_id").filter(|v| !v.is_null()).map(element_to_string);
    let source_id = match (dataset, record_id) {
        (Some(d), Some(r)) => format!("{d}/{r}"),
        (Some(d), None) => d,
        (None, Some(r)) => r,
        (None, None) => non_empty_str(map.get("source_id")).unwrap_or_default(),
    };

    let updated_at = TIMESTAMP_KEYS
        .iter()
        .filter_map(|k| map.get(*k).and_then(Value::as_str))
        .find_map(parse_timestamp);

    Provenance {
        source_id,
        confidence: parse_f64(map.get("confidence")),
        updated_at,
    }
}

/// Parse an ISO-8601 timestamp. Offsets (including `Z`) are honoured; naive
/// datetimes and bare dates are taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn primary_of(value: Option<&Value>) -> Option<String> {
    let map = decode_mapping(value)?;
    non_empty_str(map.get("primary"))
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !is_null_token(s))
        .map(str::to_string)
}

fn tag(tags: &Map<String, Value>, key: &str) -> Option<String> {
    non_empty_str(tags.get(key))
}

fn strings(value: Option<&Value>) -> Vec<String> {
    decode_collection(value).iter().map(element_to_string).collect()
}

fn strings_or_tags(value: Option<&Value>, tags: &Map<String, Value>, keys: &[&str]) -> Vec<String> {
    if value.is_some_and(|v| !v.is_null()) {
        return strings(value);
    }
    keys.iter().filter_map(|k| tag(tags, k)).collect()
}

fn brand_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => {
            if is_null_token(s) {
                false
            } else if let Some(map) = decode_mapping(Some(&Value::String(s.clone()))) {
                map.values().any(|v| brand_present(Some(v)))
            } else {
                true
            }
        }
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(_)) => true,
        Some(Value::Array(items)) => items.iter().any(|v| brand_present(Some(v))),
        Some(Value::Object(map)) => map.values().any(|v| brand_present(Some(v))),
    }
}

fn parse_f64(value: Option<&Value>) -> Option<f64> {
    let f = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    f.is_finite().then_some(f)
}

fn parse_label(value: Option<&Value>) -> Option<u8> {
    match value? {
        Value::Bool(b) => Some(u8::from(*b)),
        Value::Number(n) => {
            let f = n.as_f64()?;
            f.is_finite().then(|| u8::from(f >= 0.5))
        }
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "1.0" | "true" | "open" => Some(1),
            "0" | "0.0" | "false" | "closed" => Some(0),
            _ => None,
        },
        _ => None,
    }
}

fn unit_interval(value: Option<f64>) -> f64 {
    value.unwrap_or(0.0).clamp(0.0, 1.0)
}
