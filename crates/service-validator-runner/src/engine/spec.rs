//! OpenAPI document parsing: extract operations, parameters, examples and
//! the response contract of each operation

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use service_validator_core::ResponseContract;

use crate::RunnerError;
use crate::datagen::{self, deref};

const METHODS: &[&str] = &["get", "put", "post", "delete", "options", "head", "patch", "trace"];

/// Extracted API operation
#[derive(Debug, Clone)]
pub struct Operation {
    pub method: String,
    pub path: String,
    pub tags: Vec<String>,
    pub parameters: Vec<Parameter>,
    pub request_body: Option<RequestBody>,
    pub contract: Arc<ResponseContract>,
}

impl Operation {
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.path)
    }

    /// Whether a request needs anything besides method and path.
    #[must_use]
    pub fn has_inputs(&self) -> bool {
        !self.parameters.is_empty() || self.request_body.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub location: ParamLocation,
    pub schema: Value,
    pub required: bool,
    /// Value declared on the parameter itself (`example` or first of `examples`)
    pub example: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamLocation {
    Path,
    Query,
    Header,
}

#[derive(Debug, Clone)]
pub struct RequestBody {
    pub media_type: String,
    pub schema: Value,
    pub required: bool,
    /// Example declared on the media type
    pub example: Option<Value>,
}

/// Read and parse an API document from disk.
///
/// # Errors
///
/// Returns error if the file cannot be read or is neither JSON nor YAML.
pub fn load_document(path: &Path) -> Result<Value, RunnerError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| RunnerError::Io(format!("{}: {e}", path.display())))?;
    parse_document(path, &content)
}

/// Load an API document from a file path or an `http(s)://` URL.
///
/// # Errors
///
/// Returns error if the document cannot be fetched, read or parsed.
pub fn fetch_document(location: &str) -> Result<Value, RunnerError> {
    if !(location.starts_with("http://") || location.starts_with("https://")) {
        return load_document(Path::new(location));
    }
    tracing::debug!(url = location, "fetching API document");
    let response = reqwest::blocking::get(location)
        .and_then(reqwest::blocking::Response::error_for_status)
        .map_err(|e| RunnerError::Http(format!("{location}: {e}")))?;
    let content = response
        .text()
        .map_err(|e| RunnerError::Http(format!("{location}: {e}")))?;
    let path = location.split(['?', '#']).next().unwrap_or(location);
    parse_document(Path::new(path), &content)
}

/// Parse an API document from JSON or YAML.
///
/// Detection strategy: try extension first (`.yaml`/`.yml`/`.json`), then fall
/// back to content sniffing (leading `{` → JSON, otherwise YAML).
///
/// # Errors
///
/// Returns error if the content does not parse.
pub fn parse_document(path: &Path, content: &str) -> Result<Value, RunnerError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let as_json = |c: &str| {
        serde_json::from_str(c).map_err(|e| RunnerError::Parse(format!("Invalid JSON: {e}")))
    };
    let as_yaml = |c: &str| {
        serde_yml::from_str(c).map_err(|e| RunnerError::Parse(format!("Invalid YAML: {e}")))
    };

    match ext.as_str() {
        "yaml" | "yml" => as_yaml(content),
        "json" => as_json(content),
        _ if content.trim_start().starts_with('{') => as_json(content),
        _ => as_yaml(content),
    }
}

/// Every operation of the document, in path order then method order.
#[must_use]
pub fn extract_operations(root: &Value) -> Vec<Operation> {
    let Some(paths) = root.get("paths").and_then(|p| p.as_object()) else {
        return Vec::new();
    };

    let mut ops = Vec::new();
    for (path, path_item) in paths {
        let path_item = deref(path_item, root);
        for method in METHODS {
            let Some(operation) = path_item.get(*method) else {
                continue;
            };
            ops.push(Operation {
                method: method.to_uppercase(),
                path: path.clone(),
                tags: operation
                    .get("tags")
                    .and_then(|t| t.as_array())
                    .map(|t| t.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                    .unwrap_or_default(),
                parameters: collect_parameters(path_item, operation, root),
                request_body: parse_request_body(operation, root),
                contract: Arc::new(parse_contract(operation, root)),
            });
        }
    }
    ops
}

/// Path-level parameters, overridden by operation-level ones with the same
/// name and location.
fn collect_parameters(path_item: &Value, operation: &Value, root: &Value) -> Vec<Parameter> {
    let mut parameters: Vec<Parameter> = Vec::new();
    for source in [path_item.get("parameters"), operation.get("parameters")]
        .into_iter()
        .flatten()
    {
        let Some(params) = source.as_array() else {
            continue;
        };
        for param in params {
            let Some(p) = parse_parameter(deref(param, root)) else {
                continue;
            };
            parameters.retain(|existing| !(existing.name == p.name && existing.location == p.location));
            parameters.push(p);
        }
    }
    parameters
}

fn parse_parameter(param: &Value) -> Option<Parameter> {
    let name = param.get("name")?.as_str()?.to_string();
    let location = match param.get("in")?.as_str()? {
        "path" => ParamLocation::Path,
        "query" => ParamLocation::Query,
        "header" => ParamLocation::Header,
        _ => return None,
    };
    let schema = param
        .get("schema")
        .cloned()
        .unwrap_or(serde_json::json!({"type": "string"}));
    let required = location == ParamLocation::Path
        || param
            .get("required")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

    Some(Parameter {
        name,
        location,
        schema,
        required,
        example: declared_example(param),
    })
}

fn parse_request_body(operation: &Value, root: &Value) -> Option<RequestBody> {
    let body = deref(operation.get("requestBody")?, root);
    let content = body.get("content")?.as_object()?;

    // Prefer JSON, otherwise the first declared media type
    let (media_type, media) = content
        .iter()
        .find(|(mt, _)| is_json(mt))
        .or_else(|| content.iter().next())?;

    Some(RequestBody {
        media_type: media_type.clone(),
        schema: media
            .get("schema")
            .cloned()
            .unwrap_or(serde_json::json!({})),
        required: body
            .get("required")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        example: declared_example(media),
    })
}

/// `example`, or the `value` of the first entry of `examples`.
fn declared_example(node: &Value) -> Option<Value> {
    node.get("example").cloned().or_else(|| {
        node.get("examples")
            .and_then(|e| e.as_object())
            .and_then(|e| e.values().next())
            .and_then(|e| e.get("value"))
            .cloned()
    })
}

fn parse_contract(operation: &Value, root: &Value) -> ResponseContract {
    let mut contract = ResponseContract::default();
    let Some(responses) = operation.get("responses").and_then(|r| r.as_object()) else {
        return contract;
    };

    for (key, response) in responses {
        contract.statuses.push(key.clone());
        let response = deref(response, root);
        let Some(content) = response.get("content").and_then(|c| c.as_object()) else {
            continue;
        };
        let types: Vec<String> = content.keys().cloned().collect();
        if !types.is_empty() {
            contract.content_types.insert(key.clone(), types);
        }
        if let Some(schema) = content
            .iter()
            .find(|(mt, _)| is_json(mt))
            .and_then(|(_, media)| media.get("schema"))
        {
            contract
                .schemas
                .insert(key.clone(), resolve_refs(schema, root));
        }
    }
    contract
}

/// `application/json` and structured-syntax `+json` media types.
pub(crate) fn is_json(media_type: &str) -> bool {
    let essence = media_type.split(';').next().unwrap_or("").trim();
    essence.eq_ignore_ascii_case("application/json") || essence.ends_with("+json")
}

/// Recursively inline `$ref` in a JSON Schema.
///
/// Produces a self-contained schema suitable for `jsonschema` validation.
/// Depth-limited to 20 to prevent infinite recursion on circular refs.
fn resolve_refs(schema: &Value, root: &Value) -> Value {
    resolve_refs_inner(schema, root, 0)
}

fn resolve_refs_inner(schema: &Value, root: &Value, depth: u32) -> Value {
    if depth > 20 {
        return schema.clone();
    }
    match schema {
        Value::Object(obj) => {
            if let Some(ref_str) = obj.get("$ref").and_then(|v| v.as_str()) {
                return match datagen::resolve_ref(ref_str, root) {
                    Some(resolved) => resolve_refs_inner(resolved, root, depth + 1),
                    None => schema.clone(),
                };
            }
            let inlined: serde_json::Map<String, Value> = obj
                .iter()
                .map(|(k, v)| (k.clone(), resolve_refs_inner(v, root, depth + 1)))
                .collect();
            Value::Object(inlined)
        }
        Value::Array(arr) => Value::Array(
            arr.iter()
                .map(|v| resolve_refs_inner(v, root, depth + 1))
                .collect(),
        ),
        _ => schema.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document() -> Value {
        json!({
            "openapi": "3.0.3",
            "info": {"title": "Test", "version": "1.0"},
            "components": {
                "schemas": {
                    "Item": {
                        "type": "object",
                        "properties": {"id": {"type": "integer"}},
                        "required": ["id"]
                    }
                },
                "parameters": {
                    "Limit": {"name": "limit", "in": "query", "schema": {"type": "integer"}, "example": 5}
                }
            },
            "paths": {
                "/health": {
                    "get": {"responses": {"200": {"description": "OK"}}}
                },
                "/items": {
                    "get": {
                        "tags": ["items"],
                        "parameters": [{"$ref": "#/components/parameters/Limit"}],
                        "responses": {
                            "200": {
                                "description": "OK",
                                "content": {
                                    "application/json": {
                                        "schema": {"type": "array", "items": {"$ref": "#/components/schemas/Item"}}
                                    }
                                }
                            },
                            "4XX": {"description": "client error"},
                            "default": {"description": "other"}
                        }
                    },
                    "post": {
                        "requestBody": {
                            "required": true,
                            "content": {
                                "text/plain": {"schema": {"type": "string"}},
                                "application/json": {
                                    "schema": {"$ref": "#/components/schemas/Item"},
                                    "example": {"id": 1}
                                }
                            }
                        },
                        "responses": {"201": {"description": "Created"}}
                    }
                },
                "/items/{id}": {
                    "parameters": [
                        {"name": "id", "in": "path", "schema": {"type": "integer"}}
                    ],
                    "delete": {
                        "parameters": [
                            {"name": "id", "in": "path", "required": true, "schema": {"type": "string"}, "example": "abc"}
                        ],
                        "responses": {"204": {"description": "Deleted"}}
                    }
                }
            }
        })
    }

    fn find<'a>(ops: &'a [Operation], method: &str, path: &str) -> &'a Operation {
        ops.iter()
            .find(|o| o.method == method && o.path == path)
            .unwrap()
    }

    // ── extract_operations ──

    #[test]
    fn extracts_every_operation() {
        let ops = extract_operations(&document());
        assert_eq!(ops.len(), 4);
        let health = find(&ops, "GET", "/health");
        assert!(!health.has_inputs());
        assert_eq!(health.label(), "GET /health");
    }

    #[test]
    fn parameter_refs_resolved() {
        let ops = extract_operations(&document());
        let list = find(&ops, "GET", "/items");
        assert_eq!(list.tags, vec!["items"]);
        assert_eq!(list.parameters.len(), 1);
        assert_eq!(list.parameters[0].name, "limit");
        assert_eq!(list.parameters[0].example, Some(json!(5)));
        assert!(!list.parameters[0].required);
    }

    #[test]
    fn operation_parameter_overrides_path_level() {
        let ops = extract_operations(&document());
        let delete = find(&ops, "DELETE", "/items/{id}");
        assert_eq!(delete.parameters.len(), 1);
        assert_eq!(delete.parameters[0].schema, json!({"type": "string"}));
        assert!(delete.parameters[0].required);
    }

    #[test]
    fn request_body_prefers_json() {
        let ops = extract_operations(&document());
        let body = find(&ops, "POST", "/items").request_body.as_ref().unwrap();
        assert_eq!(body.media_type, "application/json");
        assert!(body.required);
        assert_eq!(body.example, Some(json!({"id": 1})));
    }

    #[test]
    fn contract_keeps_keys_types_and_inlined_schemas() {
        let ops = extract_operations(&document());
        let contract = &find(&ops, "GET", "/items").contract;
        assert_eq!(contract.statuses.len(), 3);
        assert_eq!(
            contract.content_types["200"],
            vec!["application/json".to_string()]
        );
        assert_eq!(
            contract.schemas["200"]["items"]["required"],
            json!(["id"])
        );
        assert_eq!(contract.matching_key(404), Some("4XX"));
        assert_eq!(contract.matching_key(500), Some("default"));
    }

    #[test]
    fn no_paths_no_operations() {
        assert!(extract_operations(&json!({"openapi": "3.0.0"})).is_empty());
    }

    #[test]
    fn json_media_types() {
        assert!(is_json("application/json; charset=utf-8"));
        assert!(is_json("application/problem+json"));
        assert!(!is_json("text/plain"));
    }

    // ── parse_document ──

    #[test]
    fn parse_document_by_extension() {
        let v = parse_document(Path::new("api.yaml"), "openapi: 3.0.0\n").unwrap();
        assert_eq!(v["openapi"], "3.0.0");
        let v = parse_document(Path::new("api.json"), r#"{"openapi": "3.0.0"}"#).unwrap();
        assert_eq!(v["openapi"], "3.0.0");
    }

    #[test]
    fn parse_document_sniffs_content() {
        let v = parse_document(Path::new("api"), r#"{"a": 1}"#).unwrap();
        assert_eq!(v["a"], 1);
        let v = parse_document(Path::new("api"), "a: 1\n").unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn parse_document_invalid_json_error() {
        let err = parse_document(Path::new("api.json"), "{nope").unwrap_err();
        assert!(err.to_string().contains("Invalid JSON"));
    }

    #[test]
    fn load_missing_document_is_io_error() {
        let err = load_document(Path::new("/nonexistent/api.yaml")).unwrap_err();
        assert!(matches!(err, RunnerError::Io(_)));
    }
}
