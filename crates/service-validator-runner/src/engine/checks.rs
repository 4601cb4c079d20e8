//! Native response checks against the operation's declared responses
//!
//! No I/O. A check without a response contract to compare against does not
//! apply.

use service_validator_core::{
    Case, Evaluation, Registry, RegistryError, Response, ResponseContract, Rule, RuleError, RuleKind,
};

use super::spec::is_json;

/// Registry holding every native check.
///
/// # Errors
///
/// Never fails for the built-in set; the signature mirrors [`Registry::register`].
pub fn native_registry() -> Result<Registry, RegistryError> {
    let mut registry = Registry::new();
    registry.register(NotAServerError)?;
    registry.register(StatusCodeConformance)?;
    registry.register(ContentTypeConformance)?;
    registry.register(ResponseSchemaConformance)?;
    Ok(registry)
}

fn contract(case: &Case) -> Option<&ResponseContract> {
    case.contract.as_deref()
}

pub struct NotAServerError;

impl Rule for NotAServerError {
    fn name(&self) -> &'static str {
        "not_a_server_error"
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Native
    }

    fn evaluate(&self, response: &Response, _case: &Case) -> Result<Evaluation, RuleError> {
        Ok(Evaluation::ensure(
            response.status_code < 500,
            format!(
                "Received a response with 5xx status code: {}",
                response.status_code
            ),
        ))
    }
}

pub struct StatusCodeConformance;

impl Rule for StatusCodeConformance {
    fn name(&self) -> &'static str {
        "status_code_conformance"
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Native
    }

    fn evaluate(&self, response: &Response, case: &Case) -> Result<Evaluation, RuleError> {
        let Some(contract) = contract(case) else {
            return Ok(Evaluation::NotApplicable);
        };
        if contract.statuses.is_empty() {
            return Ok(Evaluation::Passed);
        }
        Ok(Evaluation::ensure(
            contract.matching_key(response.status_code).is_some(),
            format!(
                "Received a response with a status code, which is not defined in the schema: {}\n\nDeclared status codes: {}",
                response.status_code,
                contract.statuses.join(", ")
            ),
        ))
    }
}

pub struct ContentTypeConformance;

impl Rule for ContentTypeConformance {
    fn name(&self) -> &'static str {
        "content_type_conformance"
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Native
    }

    fn evaluate(&self, response: &Response, case: &Case) -> Result<Evaluation, RuleError> {
        let Some(contract) = contract(case) else {
            return Ok(Evaluation::NotApplicable);
        };
        let declared = contract
            .matching_key(response.status_code)
            .and_then(|key| contract.content_types.get(key))
            .filter(|types| !types.is_empty());
        let Some(declared) = declared else {
            return Ok(Evaluation::Passed);
        };

        let Some(actual) = response.media_type() else {
            return Ok(Evaluation::violated(format!(
                "Response is missing the `Content-Type` header\n\nDefined content types: {}",
                declared.join(", ")
            )));
        };
        Ok(Evaluation::ensure(
            declared.iter().any(|d| media_type_matches(d, actual)),
            format!(
                "Received a response with '{actual}' Content-Type, but it is not declared in the schema.\n\nDefined content types: {}",
                declared.join(", ")
            ),
        ))
    }
}

/// Compare media types without parameters, honouring `*` wildcards in the
/// declared type.
fn media_type_matches(declared: &str, actual: &str) -> bool {
    let essence = |mt: &str| mt.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    let declared = essence(declared);
    let actual = essence(actual);
    let (Some((d_type, d_sub)), Some((a_type, a_sub))) =
        (declared.split_once('/'), actual.split_once('/'))
    else {
        return declared == actual;
    };
    (d_type == "*" || d_type == a_type) && (d_sub == "*" || d_sub == a_sub)
}

pub struct ResponseSchemaConformance;

impl Rule for ResponseSchemaConformance {
    fn name(&self) -> &'static str {
        "response_schema_conformance"
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Native
    }

    fn evaluate(&self, response: &Response, case: &Case) -> Result<Evaluation, RuleError> {
        let Some(contract) = contract(case) else {
            return Ok(Evaluation::NotApplicable);
        };
        let schema = contract
            .matching_key(response.status_code)
            .and_then(|key| contract.schemas.get(key));
        let Some(schema) = schema else {
            return Ok(Evaluation::Passed);
        };
        if !response.media_type().is_some_and(is_json) {
            return Ok(Evaluation::Passed);
        }

        let Ok(body) = serde_json::from_str::<serde_json::Value>(&response.body) else {
            let preview: String = response.body.chars().take(200).collect();
            return Ok(Evaluation::violated(format!(
                "Response is not valid JSON, but a JSON schema is declared for it: {preview}"
            )));
        };
        let validator = jsonschema::validator_for(schema)
            .map_err(|e| RuleError::new(format!("invalid response schema: {e}")))?;
        let errors: Vec<String> = validator
            .iter_errors(&body)
            .take(5)
            .map(|e| e.to_string())
            .collect();
        Ok(Evaluation::ensure(
            errors.is_empty(),
            format!("Response does not conform to the defined schema: {}", errors.join("; ")),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::*;
    use service_validator_core::Request;

    // ── Test helpers ──

    fn contract() -> ResponseContract {
        ResponseContract {
            content_types: BTreeMap::from([
                ("200".to_string(), vec!["application/json".to_string()]),
                ("4XX".to_string(), vec!["application/problem+json".to_string(), "text/*".to_string()]),
            ]),
            schemas: BTreeMap::from([(
                "200".to_string(),
                serde_json::json!({
                    "type": "object",
                    "properties": {"id": {"type": "integer"}},
                    "required": ["id"]
                }),
            )]),
            statuses: vec!["200".to_string(), "4XX".to_string()],
        }
    }

    fn case() -> Case {
        Case::new("GET", "/items/{id}").with_contract(Arc::new(contract()))
    }

    fn response(status: u16, content_type: Option<&str>, body: &str) -> Response {
        Response {
            status_code: status,
            headers: content_type
                .map(|ct| ("Content-Type", ct))
                .into_iter()
                .collect(),
            body: body.to_string(),
            elapsed: 0.01,
            request: Request::default(),
        }
    }

    fn eval(rule: &dyn Rule, response: &Response) -> Evaluation {
        rule.evaluate(response, &case()).unwrap()
    }

    // ── not_a_server_error ──

    #[test]
    fn server_error_detected() {
        let r = response(502, None, "Bad Gateway");
        assert_eq!(
            eval(&NotAServerError, &r),
            Evaluation::violated("Received a response with 5xx status code: 502")
        );
        assert_eq!(eval(&NotAServerError, &response(404, None, "")), Evaluation::Passed);
    }

    // ── status_code_conformance ──

    #[test]
    fn declared_status_and_range_pass() {
        assert_eq!(eval(&StatusCodeConformance, &response(200, None, "")), Evaluation::Passed);
        assert_eq!(eval(&StatusCodeConformance, &response(418, None, "")), Evaluation::Passed);
    }

    #[test]
    fn undeclared_status_violates() {
        let Evaluation::Violated(message) = eval(&StatusCodeConformance, &response(201, None, ""))
        else {
            panic!("expected a violation");
        };
        assert!(message.contains("not defined in the schema: 201"));
        assert!(message.contains("200, 4XX"));
    }

    #[test]
    fn no_contract_not_applicable() {
        let plain = Case::new("GET", "/x");
        let r = response(201, None, "");
        for rule in native_registry().unwrap().all_rules() {
            if rule.name() == "not_a_server_error" {
                continue;
            }
            assert_eq!(rule.evaluate(&r, &plain).unwrap(), Evaluation::NotApplicable);
        }
    }

    // ── content_type_conformance ──

    #[test]
    fn content_type_with_parameters_matches() {
        let r = response(200, Some("application/json; charset=utf-8"), "{}");
        assert_eq!(eval(&ContentTypeConformance, &r), Evaluation::Passed);
    }

    #[test]
    fn content_type_wildcard_matches() {
        let r = response(404, Some("text/plain"), "gone");
        assert_eq!(eval(&ContentTypeConformance, &r), Evaluation::Passed);
    }

    #[test]
    fn content_type_mismatch_and_missing() {
        let r = response(200, Some("text/html"), "<p>");
        assert!(matches!(eval(&ContentTypeConformance, &r), Evaluation::Violated(m) if m.contains("'text/html'")));
        let r = response(200, None, "{}");
        assert!(matches!(eval(&ContentTypeConformance, &r), Evaluation::Violated(m) if m.contains("missing")));
    }

    // ── response_schema_conformance ──

    #[test]
    fn body_matches_schema() {
        let r = response(200, Some("application/json"), r#"{"id": 1}"#);
        assert_eq!(eval(&ResponseSchemaConformance, &r), Evaluation::Passed);
    }

    #[test]
    fn body_violates_schema() {
        let r = response(200, Some("application/json"), r#"{"id": "one"}"#);
        assert!(matches!(
            eval(&ResponseSchemaConformance, &r),
            Evaluation::Violated(m) if m.starts_with("Response does not conform")
        ));
    }

    #[test]
    fn non_json_body_with_json_schema() {
        let r = response(200, Some("application/json"), "oops");
        assert!(matches!(
            eval(&ResponseSchemaConformance, &r),
            Evaluation::Violated(m) if m.contains("not valid JSON")
        ));
    }

    #[test]
    fn non_json_media_type_skips_schema() {
        let r = response(200, Some("text/plain"), "oops");
        assert_eq!(eval(&ResponseSchemaConformance, &r), Evaluation::Passed);
    }

    #[test]
    fn invalid_schema_is_rule_error() {
        let mut broken = contract();
        broken
            .schemas
            .insert("200".to_string(), serde_json::json!({"type": 12}));
        let case = Case::new("GET", "/x").with_contract(Arc::new(broken));
        let r = response(200, Some("application/json"), "{}");
        assert!(ResponseSchemaConformance.evaluate(&r, &case).is_err());
    }

    #[test]
    fn registry_order() {
        let names: Vec<_> = native_registry()
            .unwrap()
            .all_rules()
            .iter()
            .map(|r| r.name())
            .collect();
        assert_eq!(
            names,
            vec![
                "not_a_server_error",
                "status_code_conformance",
                "content_type_conformance",
                "response_schema_conformance"
            ]
        );
    }
}
