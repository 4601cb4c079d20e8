//! JSON Schema → `serde_json::Value` generator
//!
//! Handles the OpenAPI 3.x / JSON Schema subset found in API documents:
//! string, integer, number, boolean, array, object, enum, $ref, anyOf, oneOf, allOf.
//! Also extracts the values a document declares itself (`example`, `default`).

use rand::Rng;
use serde_json::{Value, json};

/// Maximum recursion depth for schema traversal (prevents stack overflow on circular `$ref`).
const MAX_DEPTH: u32 = 20;

/// Maximum string length for generation (prevents OOM on absurd maxLength values).
const MAX_STRING_LEN: usize = 10_000;

/// Generate a random JSON value conforming to the given JSON Schema.
///
/// `root` is the whole API document, used for `$ref` resolution.
pub fn generate(schema: &Value, root: &Value, rng: &mut impl Rng) -> Value {
    generate_inner(schema, root, rng, 0)
}

fn generate_inner(schema: &Value, root: &Value, rng: &mut impl Rng, depth: u32) -> Value {
    if depth > MAX_DEPTH {
        return Value::Null;
    }

    if let Some(ref_str) = schema.get("$ref").and_then(|v| v.as_str()) {
        return match resolve_ref(ref_str, root) {
            Some(resolved) => generate_inner(resolved, root, rng, depth + 1),
            None => Value::Null,
        };
    }

    if let Some(enum_values) = schema.get("enum").and_then(|v| v.as_array()) {
        if !enum_values.is_empty() {
            return enum_values[rng.gen_range(0..enum_values.len())].clone();
        }
    }

    // anyOf / oneOf: pick one non-null variant
    for key in &["anyOf", "oneOf"] {
        if let Some(variants) = schema.get(*key).and_then(|v| v.as_array()) {
            let non_null: Vec<_> = variants
                .iter()
                .filter(|s| s.get("type").and_then(|t| t.as_str()) != Some("null"))
                .collect();
            if non_null.is_empty() {
                return Value::Null;
            }
            return generate_inner(
                non_null[rng.gen_range(0..non_null.len())],
                root,
                rng,
                depth + 1,
            );
        }
    }

    // allOf: merge objects
    if let Some(all_of) = schema.get("allOf").and_then(|v| v.as_array()) {
        let mut merged = serde_json::Map::new();
        for sub in all_of {
            if let Value::Object(obj) = generate_inner(sub, root, rng, depth + 1) {
                merged.extend(obj);
            }
        }
        return Value::Object(merged);
    }

    match schema_type(schema) {
        "string" => gen_string(schema, rng),
        "integer" => gen_integer(schema, rng),
        "number" => gen_number(schema, rng),
        "boolean" => Value::Bool(rng.gen_bool(0.5)),
        "array" => gen_array(schema, root, rng, depth + 1),
        "object" => gen_object(schema, root, rng, depth + 1),
        "null" => Value::Null,
        _ => {
            // Infer from structure
            if schema.get("properties").is_some() {
                gen_object(schema, root, rng, depth + 1)
            } else if schema.get("items").is_some() {
                gen_array(schema, root, rng, depth + 1)
            } else {
                Value::String(random_alnum(rng, 8))
            }
        }
    }
}

/// `type` of a schema; OpenAPI 3.1 type arrays use their first non-null entry.
fn schema_type(schema: &Value) -> &str {
    match schema.get("type") {
        Some(Value::String(t)) => t,
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|t| *t != "null")
            .unwrap_or(""),
        _ => "",
    }
}

/// Follow a local reference such as `#/components/schemas/Item`.
pub(crate) fn resolve_ref<'a>(ref_str: &str, root: &'a Value) -> Option<&'a Value> {
    ref_str.strip_prefix('#').and_then(|pointer| root.pointer(pointer))
}

/// Resolve `value` if it is a `$ref`, following chains up to [`MAX_DEPTH`].
pub(crate) fn deref<'a>(value: &'a Value, root: &'a Value) -> &'a Value {
    let mut current = value;
    for _ in 0..MAX_DEPTH {
        match current
            .get("$ref")
            .and_then(|r| r.as_str())
            .and_then(|r| resolve_ref(r, root))
        {
            Some(next) => current = next,
            None => break,
        }
    }
    current
}

fn gen_string(schema: &Value, rng: &mut impl Rng) -> Value {
    let format = schema.get("format").and_then(|v| v.as_str());
    match format {
        Some("email") => Value::String(format!("user{}@example.com", rng.gen_range(1..9999_u32))),
        Some("uri" | "url") => Value::String("https://example.com".into()),
        Some("date") => Value::String("2024-01-15".into()),
        Some("date-time") => Value::String("2024-01-15T12:00:00Z".into()),
        Some("uuid") => Value::String(format!(
            "{:08x}-{:04x}-4{:03x}-{:04x}-{:012x}",
            rng.r#gen::<u32>(),
            rng.r#gen::<u16>(),
            rng.r#gen::<u16>() & 0x0FFF,
            (rng.r#gen::<u16>() & 0x3FFF) | 0x8000,
            rng.r#gen::<u64>() & 0xFFFF_FFFF_FFFF,
        )),
        _ => {
            let min = schema
                .get("minLength")
                .and_then(|v| v.as_u64())
                .map_or(1, |v| usize::try_from(v).unwrap_or(MAX_STRING_LEN).min(MAX_STRING_LEN));
            let max = schema
                .get("maxLength")
                .and_then(|v| v.as_u64())
                .map_or(20, |v| usize::try_from(v).unwrap_or(MAX_STRING_LEN).min(MAX_STRING_LEN));
            let len = rng.gen_range(min..=max.max(min));
            Value::String(random_alnum(rng, len))
        }
    }
}

fn gen_integer(schema: &Value, rng: &mut impl Rng) -> Value {
    let min = schema
        .get("minimum")
        .and_then(|v| v.as_i64())
        .unwrap_or(-1000);
    let max = schema
        .get("maximum")
        .and_then(|v| v.as_i64())
        .unwrap_or(1000);
    Value::Number(rng.gen_range(min..=max.max(min)).into())
}

fn gen_number(schema: &Value, rng: &mut impl Rng) -> Value {
    let min = schema
        .get("minimum")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);
    let max = schema
        .get("maximum")
        .and_then(|v| v.as_f64())
        .unwrap_or(1000.0);
    json!(rng.gen_range(min..=max.max(min)))
}

fn gen_array(schema: &Value, root: &Value, rng: &mut impl Rng, depth: u32) -> Value {
    let bound = |key: &str, default: usize| {
        schema
            .get(key)
            .and_then(|v| v.as_u64())
            .map_or(default, |v| usize::try_from(v).unwrap_or(default))
    };
    let min = bound("minItems", 0);
    let max = bound("maxItems", 3);
    let count = rng.gen_range(min..=max.max(min));
    let items_schema = schema
        .get("items")
        .cloned()
        .unwrap_or(json!({"type": "string"}));
    Value::Array(
        (0..count)
            .map(|_| generate_inner(&items_schema, root, rng, depth))
            .collect(),
    )
}

fn gen_object(schema: &Value, root: &Value, rng: &mut impl Rng, depth: u32) -> Value {
    let mut obj = serde_json::Map::new();
    let required = required_properties(schema);
    if let Some(props) = schema.get("properties").and_then(|v| v.as_object()) {
        for (key, prop_schema) in props {
            if required.contains(&key.as_str()) || rng.gen_bool(0.5) {
                obj.insert(key.clone(), generate_inner(prop_schema, root, rng, depth));
            }
        }
    }
    Value::Object(obj)
}

fn required_properties(schema: &Value) -> Vec<&str> {
    schema
        .get("required")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// Value the schema declares for itself: `example`, then the first of
/// `examples`, then `default`. Objects without one are assembled from their
/// properties' declared values.
#[must_use]
pub fn declared_value(schema: &Value, root: &Value) -> Option<Value> {
    declared_value_inner(schema, root, 0)
}

fn declared_value_inner(schema: &Value, root: &Value, depth: u32) -> Option<Value> {
    if depth > MAX_DEPTH {
        return None;
    }
    let schema = deref(schema, root);

    if let Some(example) = schema.get("example") {
        return Some(example.clone());
    }
    if let Some(first) = schema
        .get("examples")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
    {
        return Some(first.clone());
    }
    if let Some(default) = schema.get("default") {
        return Some(default.clone());
    }

    if let Some(all_of) = schema.get("allOf").and_then(|v| v.as_array()) {
        let mut merged = serde_json::Map::new();
        for sub in all_of {
            if let Some(Value::Object(obj)) = declared_value_inner(sub, root, depth + 1) {
                merged.extend(obj);
            }
        }
        return (!merged.is_empty()).then_some(Value::Object(merged));
    }

    let props = schema.get("properties").and_then(|v| v.as_object())?;
    let obj: serde_json::Map<String, Value> = props
        .iter()
        .filter_map(|(name, prop)| {
            declared_value_inner(prop, root, depth + 1).map(|v| (name.clone(), v))
        })
        .collect();
    (!obj.is_empty()).then_some(Value::Object(obj))
}

/// Render a value for a path, query or header slot.
#[must_use]
pub fn to_param_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn random_alnum(rng: &mut impl Rng, len: usize) -> String {
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    (0..len)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}
