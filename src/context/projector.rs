//! Field projection over untyped upstream payloads
//!
//! Upstream objects arrive as arbitrary JSON, so projection works on
//! `serde_json::Map` rather than typed models.

use serde_json::{Map, Value};

/// Essential fields kept when no explicit field list is requested
const BOOKING_FIELDS: &[&str] = &[
    "id",
    "status",
    "check_in",
    "check_out",
    "guest_name",
    "property_id",
    "total_price",
    "currency",
];

const PROPERTY_FIELDS: &[&str] = &[
    "id",
    "name",
    "status",
    "address.city",
    "address.country",
    "bedrooms",
    "max_guests",
];

const GUEST_FIELDS: &[&str] = &["id", "first_name", "last_name", "email", "phone"];

const UNIT_FIELDS: &[&str] = &["id", "property_id", "name", "status"];

const INVOICE_FIELDS: &[&str] = &["id", "booking_id", "status", "total", "currency", "due_date"];

const TASK_FIELDS: &[&str] = &["id", "title", "status", "due_date", "property_id"];

const FALLBACK_FIELDS: &[&str] = &["id"];

/// Path fragments mapped to the type tag they identify
const RESOURCE_TAGS: &[(&str, &str)] = &[
    ("bookings", "booking"),
    ("reservations", "booking"),
    ("properties", "property"),
    ("guests", "guest"),
    ("units", "unit"),
    ("invoices", "invoice"),
    ("tasks", "task"),
];

/// Type tag used when no known resource name appears in a path
pub const UNKNOWN_TYPE: &str = "unknown";

/// Essential fields for an object type tag; unknown tags keep only `id`
pub fn essential_fields(type_tag: &str) -> &'static [&'static str] {
    match type_tag {
        "booking" => BOOKING_FIELDS,
        "property" => PROPERTY_FIELDS,
        "guest" => GUEST_FIELDS,
        "unit" => UNIT_FIELDS,
        "invoice" => INVOICE_FIELDS,
        "task" => TASK_FIELDS,
        _ => FALLBACK_FIELDS,
    }
}

/// Derive a type tag from a route path.
///
/// The right-most known resource name wins, so `/properties/7/bookings/3`
/// is a booking.
pub fn type_tag_for_path(path: &str) -> &'static str {
    let lowered = path.to_ascii_lowercase();
    RESOURCE_TAGS
        .iter()
        .filter_map(|(fragment, tag)| lowered.rfind(fragment).map(|pos| (pos, *tag)))
        .max_by_key(|(pos, _)| *pos)
        .map(|(_, tag)| tag)
        .unwrap_or(UNKNOWN_TYPE)
}

/// Keep only the named fields of `object`.
///
/// Dotted paths select a nested key without its siblings. Intermediate
/// containers are only created once the leaf is known to exist, and
/// missing fields are skipped.
pub fn project<S: AsRef<str>>(object: &Map<String, Value>, fields: &[S]) -> Map<String, Value> {
    let mut projected = Map::new();

    for field in fields {
        let path: Vec<&str> = field.as_ref().split('.').collect();
        if path.iter().any(|segment| segment.is_empty()) {
            continue;
        }
        if let Some(leaf) = lookup(object, &path) {
            insert_path(&mut projected, &path, leaf.clone());
        }
    }

    projected
}

fn lookup<'a>(object: &'a Map<String, Value>, path: &[&str]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let value = object.get(*first)?;
    if rest.is_empty() {
        return Some(value);
    }
    match value {
        Value::Object(inner) => lookup(inner, rest),
        _ => None,
    }
}

fn insert_path(target: &mut Map<String, Value>, path: &[&str], leaf: Value) {
    let Some((first, rest)) = path.split_first() else {
        return;
    };

    if rest.is_empty() {
        target.insert((*first).to_string(), leaf);
        return;
    }

    let slot = target
        .entry((*first).to_string())
        .or_insert_with(|| Value::Object(Map::new()));

    // A whole-object selection of the same key already covers the leaf
    if let Value::Object(inner) = slot {
        if lookup(inner, rest).is_none() {
            insert_path(inner, rest, leaf);
        }
    }
}

/// Count every key at every depth.
///
/// Arrays contribute the count of their first element only; upstream lists
/// are homogeneous and walking every element of a large page is wasted work.
pub fn count_fields(value: &Value) -> usize {
    match value {
        Value::Object(map) => map.iter().map(|(_, v)| 1 + count_fields(v)).sum(),
        Value::Array(items) => items.first().map(count_fields).unwrap_or(0),
        _ => 0,
    }
}

/// Top-level and dotted names of the fields present in a projection
pub fn field_names(object: &Map<String, Value>) -> Vec<String> {
    let mut names = Vec::new();
    collect_names(object, "", &mut names);
    names
}

fn collect_names(object: &Map<String, Value>, prefix: &str, names: &mut Vec<String>) {
    for (key, value) in object {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Object(inner) if !inner.is_empty() => collect_names(inner, &name, names),
            _ => names.push(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_dotted_path_keeps_only_selected_leaf() {
        let object = as_map(json!({"id": 1, "addr": {"city": "NYC", "zip": "10001"}}));
        let projected = project(&object, &["id", "addr.city"]);
        assert_eq!(Value::Object(projected), json!({"id": 1, "addr": {"city": "NYC"}}));
    }

    #[test]
    fn test_missing_leaf_creates_no_container() {
        let object = as_map(json!({"id": 1, "addr": {"city": "NYC"}}));
        let projected = project(&object, &["id", "owner.name", "addr.street"]);
        assert_eq!(Value::Object(projected), json!({"id": 1}));
    }

    #[test]
    fn test_non_object_intermediate_is_skipped() {
        let object = as_map(json!({"id": 1, "addr": "somewhere"}));
        let projected = project(&object, &["addr.city"]);
        assert!(projected.is_empty());
    }

    #[test]
    fn test_sibling_paths_merge() {
        let object = as_map(json!({"addr": {"city": "NYC", "zip": "10001", "street": "Main"}}));
        let projected = project(&object, &["addr.city", "addr.zip"]);
        assert_eq!(
            Value::Object(projected),
            json!({"addr": {"city": "NYC", "zip": "10001"}})
        );
    }

    #[test]
    fn test_whole_object_wins_over_dotted_path() {
        let object = as_map(json!({"addr": {"city": "NYC", "zip": "10001"}}));
        let projected = project(&object, &["addr", "addr.city"]);
        assert_eq!(
            Value::Object(projected),
            json!({"addr": {"city": "NYC", "zip": "10001"}})
        );
    }

    #[test]
    fn test_empty_field_list_yields_empty_object() {
        let object = as_map(json!({"id": 1}));
        let fields: [&str; 0] = [];
        assert!(project(&object, &fields).is_empty());
    }

    #[test]
    fn test_count_fields_recursive() {
        let value = json!({
            "id": 1,
            "addr": {"city": "NYC", "zip": "10001"},
            "rooms": [{"name": "a", "beds": 2}, {"name": "b", "beds": 1, "extra": true}]
        });
        // id, addr(+2), rooms(+2 from first element)
        assert_eq!(count_fields(&value), 1 + 3 + 3);
        assert_eq!(count_fields(&json!([])), 0);
        assert_eq!(count_fields(&json!("scalar")), 0);
    }

    #[test]
    fn test_projection_never_increases_field_count() {
        let samples = vec![
            json!({"id": 1, "a": {"b": {"c": 1, "d": 2}}, "e": [1, 2]}),
            json!({"id": "x", "name": "n", "address": {"city": "c", "country": "d"}}),
            json!({}),
        ];
        let field_lists: Vec<Vec<&str>> = vec![
            vec!["id"],
            vec!["a.b.c", "e"],
            vec!["address.city", "name", "missing.leaf"],
            vec![],
        ];
        for sample in &samples {
            let object = sample.as_object().unwrap();
            for fields in &field_lists {
                let projected = Value::Object(project(object, fields));
                assert!(count_fields(&projected) <= count_fields(sample));
            }
        }
    }

    #[test]
    fn test_essential_fields_fallback() {
        assert_eq!(essential_fields("booking")[0], "id");
        assert_eq!(essential_fields("spaceship"), &["id"]);
    }

    #[test]
    fn test_type_tag_for_path() {
        assert_eq!(type_tag_for_path("/api/v1/bookings/12"), "booking");
        assert_eq!(type_tag_for_path("/api/v1/properties/7/bookings"), "booking");
        assert_eq!(type_tag_for_path("/api/v1/properties/7"), "property");
        assert_eq!(type_tag_for_path("/api/v1/widgets"), UNKNOWN_TYPE);
    }

    #[test]
    fn test_field_names_flatten_nested() {
        let object = as_map(json!({"id": 1, "addr": {"city": "NYC"}}));
        let mut names = field_names(&object);
        names.sort();
        assert_eq!(names, vec!["addr.city".to_string(), "id".to_string()]);
    }
}
