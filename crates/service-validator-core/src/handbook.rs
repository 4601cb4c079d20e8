//! API handbook rules
//!
//! Header and status code conventions, plus three rules that come with an
//! augmentation: they derive an extra request from a successful case and
//! check how the service treats it.

use crate::http::{Case, Response};
use crate::registry::{Evaluation, Registry, RegistryError, Rule, RuleError, RuleKind};

const HANDBOOK_URL: &str = "https://cloud.ibm.com/docs/api-handbook";

pub const INVALID_ACCEPT: &str = "invalid/accept";
pub const INVALID_CONTENT_TYPE: &str = "invalid/content/type";

/// Registry holding every handbook rule, in catalog order.
///
/// # Errors
///
/// Never fails for the built-in set; the signature mirrors [`Registry::register`].
pub fn handbook_registry() -> Result<Registry, RegistryError> {
    let mut registry = Registry::new();
    registry.register(AllowHeaderIn405)?;
    registry.register(ContentLocation)?;
    registry.register(GetWithRequestBody)?;
    registry.register(InvalidAcceptHeader)?;
    registry.register(InvalidRequestContentType)?;
    registry.register(Location201)?;
    registry.register(No422)?;
    registry.register(NoAcceptHeader)?;
    registry.register(NoContent204)?;
    registry.register(WwwAuthenticate401)?;
    Ok(registry)
}

// ── Header rules ──

pub struct AllowHeaderIn405;

impl Rule for AllowHeaderIn405 {
    fn name(&self) -> &'static str {
        "allow_header_in_405"
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Handbook
    }

    fn evaluate(&self, response: &Response, _case: &Case) -> Result<Evaluation, RuleError> {
        if response.status_code != 405 {
            return Ok(Evaluation::Passed);
        }
        Ok(Evaluation::ensure(
            response.headers.contains("Allow"),
            "For 405 response, must provide the Allow header with the list of accepted request methods.",
        ))
    }
}

pub struct ContentLocation;

impl Rule for ContentLocation {
    fn name(&self) -> &'static str {
        "content_location"
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Handbook
    }

    fn evaluate(&self, response: &Response, case: &Case) -> Result<Evaluation, RuleError> {
        let method = case.method.to_uppercase();
        let content_location = response.header("Content-Location");

        match response.status_code {
            200 if matches!(method.as_str(), "PUT" | "PATCH") => {
                let Some(content_location) = content_location else {
                    return Ok(Evaluation::violated(
                        "For successful PUT or PATCH response, should provide Content-Location header with the URI of the resource.",
                    ));
                };
                let relative = case.formatted_path();
                let absolute = response.request.url_without_query();
                Ok(Evaluation::ensure(
                    content_location == relative || content_location == absolute,
                    format!(
                        "Content-Location header should match the request URI. Content-Location: {content_location}, Absolute Request URI: {absolute}, Relative Request URI: {relative}"
                    ),
                ))
            }
            201 => {
                let Some(content_location) = content_location else {
                    return Ok(Evaluation::violated(
                        "For 201 response, should provide Content-Location header with the URI of the created resource.",
                    ));
                };
                let location = response.header("Location");
                Ok(Evaluation::ensure(
                    Some(content_location) == location,
                    format!(
                        "Content-Location header should match the value of the Location header. Content-Location: {content_location}, Location: {}",
                        location.unwrap_or("None")
                    ),
                ))
            }
            202 if matches!(method.as_str(), "DELETE" | "PATCH" | "POST" | "PUT") => {
                Ok(Evaluation::ensure(
                    content_location.is_some(),
                    "For 202 response from a DELETE, PATCH, POST, or PUT, should provide Content-Location header with the URI where resource may be obtained.",
                ))
            }
            _ => Ok(Evaluation::Passed),
        }
    }
}

pub struct Location201;

impl Rule for Location201 {
    fn name(&self) -> &'static str {
        "location_201"
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Handbook
    }

    fn evaluate(&self, response: &Response, _case: &Case) -> Result<Evaluation, RuleError> {
        if response.status_code != 201 {
            return Ok(Evaluation::Passed);
        }
        Ok(Evaluation::ensure(
            response.headers.contains("Location"),
            "For 201 response, must provide Location header with the URI of the created resource.",
        ))
    }
}

pub struct NoAcceptHeader;

impl Rule for NoAcceptHeader {
    fn name(&self) -> &'static str {
        "no_accept_header"
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Handbook
    }

    fn evaluate(&self, response: &Response, _case: &Case) -> Result<Evaluation, RuleError> {
        if response.body.is_empty() || response.request.headers.contains("Accept") {
            return Ok(Evaluation::Passed);
        }
        Ok(Evaluation::ensure(
            response
                .header("Content-Type")
                .is_some_and(|ct| ct.starts_with("application/json")),
            "Accept header not provided in the request. Response must be JSON, and Content-Type header must start with application/json.",
        ))
    }
}

pub struct WwwAuthenticate401;

impl Rule for WwwAuthenticate401 {
    fn name(&self) -> &'static str {
        "www_authenticate_401"
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Handbook
    }

    fn evaluate(&self, response: &Response, _case: &Case) -> Result<Evaluation, RuleError> {
        if response.status_code != 401 {
            return Ok(Evaluation::Passed);
        }
        Ok(Evaluation::ensure(
            response.headers.contains("WWW-Authenticate"),
            "401 response must have WWW-Authenticate header.",
        ))
    }
}

// ── Status code rules ──

pub struct No422;

impl Rule for No422 {
    fn name(&self) -> &'static str {
        "no_422"
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Handbook
    }

    fn evaluate(&self, response: &Response, _case: &Case) -> Result<Evaluation, RuleError> {
        Ok(Evaluation::ensure(
            response.status_code != 422,
            format!(
                "422 code should not be used. Instead, 400 should be returned in response to invalid request payloads. {HANDBOOK_URL}?topic=api-handbook-status-codes#client-errors-4xx"
            ),
        ))
    }
}

pub struct NoContent204;

impl Rule for NoContent204 {
    fn name(&self) -> &'static str {
        "no_content_204"
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Handbook
    }

    fn evaluate(&self, response: &Response, _case: &Case) -> Result<Evaluation, RuleError> {
        if response.status_code != 204 {
            return Ok(Evaluation::NotApplicable);
        }
        Ok(Evaluation::ensure(
            response.body.is_empty(),
            format!(
                "204 response must not include a response body. {HANDBOOK_URL}?topic=api-handbook-status-codes#success-2xx"
            ),
        ))
    }
}

// ── Rules with augmentation ──

pub struct GetWithRequestBody;

impl Rule for GetWithRequestBody {
    fn name(&self) -> &'static str {
        "get_with_request_body"
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Handbook
    }

    fn evaluate(&self, response: &Response, _case: &Case) -> Result<Evaluation, RuleError> {
        let request = &response.request;
        if !request.method.eq_ignore_ascii_case("GET") || !request.has_body() {
            return Ok(Evaluation::NotApplicable);
        }
        Ok(Evaluation::ensure(
            response.is_success(),
            format!(
                "Request body with a GET request must not cause an error. {HANDBOOK_URL}?topic=api-handbook-methods#get"
            ),
        ))
    }

    fn augment(&self, case: &Case, response: &Response) -> Option<Case> {
        if !response.is_success() || !case.method.eq_ignore_ascii_case("GET") {
            return None;
        }
        let mut extra = case.clone();
        extra.body = Some(serde_json::json!({"requestBody": "request body passed with GET."}));
        extra.media_type = Some("application/json".to_string());
        Some(extra)
    }

    fn has_augmentation(&self) -> bool {
        true
    }
}

pub struct InvalidAcceptHeader;

impl Rule for InvalidAcceptHeader {
    fn name(&self) -> &'static str {
        "invalid_accept_header"
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Handbook
    }

    fn evaluate(&self, response: &Response, _case: &Case) -> Result<Evaluation, RuleError> {
        if response.request.headers.get("Accept") != Some(INVALID_ACCEPT) {
            return Ok(Evaluation::NotApplicable);
        }
        Ok(Evaluation::ensure(
            response.status_code == 406,
            format!(
                "Requests including Accept header with only unsupported formats MUST be rejected with a 406 status code. {HANDBOOK_URL}?topic=api-handbook-headers#negotiation-headers"
            ),
        ))
    }

    fn augment(&self, case: &Case, response: &Response) -> Option<Case> {
        if !response.is_success() {
            return None;
        }
        Some(case.clone().with_header("Accept", INVALID_ACCEPT))
    }

    fn has_augmentation(&self) -> bool {
        true
    }
}

pub struct InvalidRequestContentType;

impl Rule for InvalidRequestContentType {
    fn name(&self) -> &'static str {
        "invalid_request_content_type"
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Handbook
    }

    fn evaluate(&self, response: &Response, _case: &Case) -> Result<Evaluation, RuleError> {
        let request = &response.request;
        if !request.has_body() || request.headers.get("Content-Type") != Some(INVALID_CONTENT_TYPE)
        {
            return Ok(Evaluation::NotApplicable);
        }
        Ok(Evaluation::ensure(
            response.status_code == 415,
            format!(
                "415 status code must be used when the client sends a payload with a content-type not supported by the server. {HANDBOOK_URL}?topic=api-handbook-headers#representation-headers"
            ),
        ))
    }

    fn augment(&self, case: &Case, response: &Response) -> Option<Case> {
        if !response.is_success() {
            return None;
        }
        Some(case.clone().with_header("Content-Type", INVALID_CONTENT_TYPE))
    }

    fn has_augmentation(&self) -> bool {
        true
    }
}
