//! Case generation phases: explicit examples and schema-driven generation

use rand::Rng;
use serde_json::Value;

use service_validator_core::Case;

use super::spec::{Operation, ParamLocation};
use crate::datagen::{self, to_param_string};

/// Case generation phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    /// One case from the examples declared in the document
    Explicit,
    /// Random cases generated from the schemas
    Generate,
}

impl Phase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Generate => "generate",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "explicit" => Ok(Self::Explicit),
            "generate" => Ok(Self::Generate),
            other => Err(format!(
                "unknown phase '{other}' (expected explicit or generate)"
            )),
        }
    }
}

/// Case built from declared examples.
///
/// Returns `None` when the operation takes inputs but declares no example
/// for any of them. Required inputs without an example are generated.
pub fn explicit_case(op: &Operation, root: &Value, rng: &mut impl Rng) -> Option<Case> {
    let declared: Vec<Option<Value>> = op
        .parameters
        .iter()
        .map(|p| {
            p.example
                .clone()
                .or_else(|| datagen::declared_value(&p.schema, root))
        })
        .collect();
    let body = op.request_body.as_ref().and_then(|b| {
        b.example
            .clone()
            .or_else(|| datagen::declared_value(&b.schema, root))
    });

    let any_declared = declared.iter().any(Option::is_some) || body.is_some();
    if op.has_inputs() && !any_declared {
        return None;
    }

    let mut case = new_case(op);
    for (param, value) in op.parameters.iter().zip(declared) {
        let value = match value {
            Some(v) => v,
            None if param.required => datagen::generate(&param.schema, root, rng),
            None => continue,
        };
        set_parameter(&mut case, param.location, &param.name, &value);
    }
    if let Some(request_body) = &op.request_body {
        let body = match body {
            Some(v) => Some(v),
            None if request_body.required => Some(datagen::generate(&request_body.schema, root, rng)),
            None => None,
        };
        if let Some(body) = body {
            case.body = Some(body);
            case.media_type = Some(request_body.media_type.clone());
        }
    }
    Some(case)
}

/// Case with every required input and a random subset of the optional ones.
pub fn generated_case(op: &Operation, root: &Value, rng: &mut impl Rng) -> Case {
    let mut case = new_case(op);
    for param in &op.parameters {
        if param.required || rng.gen_bool(0.5) {
            let value = datagen::generate(&param.schema, root, rng);
            set_parameter(&mut case, param.location, &param.name, &value);
        }
    }
    if let Some(body) = &op.request_body {
        if body.required || rng.gen_bool(0.5) {
            case.body = Some(datagen::generate(&body.schema, root, rng));
            case.media_type = Some(body.media_type.clone());
        }
    }
    case
}

fn new_case(op: &Operation) -> Case {
    Case::new(&op.method, &op.path).with_contract(op.contract.clone())
}

fn set_parameter(case: &mut Case, location: ParamLocation, name: &str, value: &Value) {
    let rendered = to_param_string(value);
    match location {
        ParamLocation::Path => {
            case.path_parameters.insert(name.to_string(), rendered);
        }
        ParamLocation::Query => match value {
            // arrays explode into repeated keys
            Value::Array(items) => {
                for item in items {
                    case.query.push((name.to_string(), to_param_string(item)));
                }
            }
            _ => case.query.push((name.to_string(), rendered)),
        },
        ParamLocation::Header => case.headers.set(name, rendered),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spec::extract_operations;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;
    use serde_json::json;

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(7)
    }

    fn document() -> Value {
        json!({
            "paths": {
                "/health": {"get": {"responses": {"200": {}}}},
                "/items/{id}": {
                    "get": {
                        "parameters": [
                            {"name": "id", "in": "path", "required": true, "schema": {"type": "integer", "minimum": 1, "maximum": 9}},
                            {"name": "fields", "in": "query", "schema": {"type": "array", "items": {"type": "string"}}, "example": ["a", "b"]},
                            {"name": "X-Trace", "in": "header", "schema": {"type": "string"}}
                        ],
                        "responses": {"200": {}}
                    }
                },
                "/items": {
                    "post": {
                        "requestBody": {
                            "required": true,
                            "content": {"application/json": {"schema": {"type": "object", "properties": {"name": {"type": "string"}}, "required": ["name"]}}}
                        },
                        "responses": {"201": {}}
                    }
                }
            }
        })
    }

    fn op(method: &str, path: &str) -> Operation {
        extract_operations(&document())
            .into_iter()
            .find(|o| o.method == method && o.path == path)
            .unwrap()
    }

    // ── Phase ──

    #[test]
    fn phase_parse() {
        assert_eq!("Explicit".parse::<Phase>().unwrap(), Phase::Explicit);
        assert_eq!(" generate".parse::<Phase>().unwrap(), Phase::Generate);
        assert!("shrink".parse::<Phase>().is_err());
    }

    // ── explicit_case ──

    #[test]
    fn explicit_without_inputs_is_plain_request() {
        let root = document();
        let case = explicit_case(&op("GET", "/health"), &root, &mut rng()).unwrap();
        assert_eq!(case.operation(), "GET /health");
        assert!(case.body.is_none());
        assert!(case.contract.is_some());
    }

    #[test]
    fn explicit_uses_examples_and_fills_required() {
        let root = document();
        let case = explicit_case(&op("GET", "/items/{id}"), &root, &mut rng()).unwrap();
        assert_eq!(
            case.query,
            vec![("fields".to_string(), "a".to_string()), ("fields".to_string(), "b".to_string())]
        );
        let id: i64 = case.path_parameters["id"].parse().unwrap();
        assert!((1..=9).contains(&id));
        // optional header without example stays out
        assert!(!case.headers.contains("X-Trace"));
    }

    #[test]
    fn explicit_skipped_when_nothing_declared() {
        let root = document();
        assert!(explicit_case(&op("POST", "/items"), &root, &mut rng()).is_none());
    }

    // ── generated_case ──

    #[test]
    fn generated_has_required_inputs() {
        let root = document();
        let case = generated_case(&op("POST", "/items"), &root, &mut rng());
        assert!(case.body.as_ref().unwrap().get("name").is_some());
        assert_eq!(case.media_type.as_deref(), Some("application/json"));

        let case = generated_case(&op("GET", "/items/{id}"), &root, &mut rng());
        assert!(case.path_parameters.contains_key("id"));
        assert!(!case.formatted_path().contains('{'));
    }

    #[test]
    fn generated_is_reproducible_from_seed() {
        let root = document();
        let operation = op("GET", "/items/{id}");
        let a = generated_case(&operation, &root, &mut rng());
        let b = generated_case(&operation, &root, &mut rng());
        assert_eq!(a.path_parameters, b.path_parameters);
        assert_eq!(a.query, b.query);
        assert_eq!(a.headers, b.headers);
    }
}
