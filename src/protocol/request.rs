//! GraphQL request and response types.
//!
//! The session layer treats both as opaque payloads. Query builders fill in
//! a [`Request`]; domain code decodes the [`Response`].

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

// ============================================================================
// Request
// ============================================================================

/// A GraphQL operation.
///
/// # Format
///
/// ```json
/// {
///   "query": "query Report($code: String) { reportData { report(code: $code) { title } } }",
///   "variables": { "code": "aBcD1234" },
///   "operationName": "Report"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Query document.
    pub query: String,

    /// Variables referenced by the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Map<String, Value>>,

    /// Operation to run when the document holds several.
    #[serde(
        rename = "operationName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub operation_name: Option<String>,
}

impl Request {
    /// Creates a request with no variables.
    #[inline]
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: None,
            operation_name: None,
        }
    }

    /// Adds one variable.
    #[must_use]
    pub fn variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables
            .get_or_insert_with(Map::new)
            .insert(name.into(), value.into());
        self
    }

    /// Replaces all variables.
    #[inline]
    #[must_use]
    pub fn variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = Some(variables);
        self
    }

    /// Sets the operation name.
    #[inline]
    #[must_use]
    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }
}

// ============================================================================
// Response
// ============================================================================

/// A GraphQL execution result.
///
/// # Format
///
/// ```json
/// {
///   "data": { ... },
///   "errors": [ { "message": "...", "path": ["reportData"] } ]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Result data.
    #[serde(default)]
    pub data: Option<Value>,

    /// Errors reported by the service.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,

    /// Service-specific extensions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl Response {
    /// Creates a successful response.
    #[inline]
    #[must_use]
    pub fn with_data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    /// Returns `true` if the service reported errors.
    #[inline]
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Looks up a value inside `data` by JSON pointer (`/reportData/report`).
    #[inline]
    #[must_use]
    pub fn data_at(&self, pointer: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|v| v.pointer(pointer))
    }

    /// Extracts the data, returning error if the service reported errors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] carrying every reported error.
    pub fn into_result(self) -> Result<Value> {
        if self.errors.is_empty() {
            Ok(self.data.unwrap_or(Value::Null))
        } else {
            Err(Error::query(self.errors))
        }
    }
}

// ============================================================================
// GraphQLError
// ============================================================================

/// One error entry from a GraphQL response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    /// Human-readable message.
    pub message: String,

    /// Source locations in the query document.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,

    /// Response path the error applies to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<Value>,

    /// Service-specific details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQLError {
    /// Creates an error with only a message.
    #[inline]
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: Vec::new(),
            path: Vec::new(),
            extensions: None,
        }
    }
}

/// Line and column in a query document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let request = Request::new("query Report($code: String) { reportData { report(code: $code) { title } } }")
            .variable("code", "aBcD1234")
            .operation_name("Report");

        let json = serde_json::to_value(&request).expect("serialize");
        assert_eq!(json["variables"]["code"], "aBcD1234");
        assert_eq!(json["operationName"], "Report");
    }

    #[test]
    fn test_request_omits_empty_fields() {
        let json = serde_json::to_value(Request::new("{ __typename }")).expect("serialize");
        assert_eq!(json, json!({ "query": "{ __typename }" }));
    }

    #[test]
    fn test_response_data_at() {
        let response: Response = serde_json::from_value(json!({
            "data": { "reportData": { "report": { "title": "vAS" } } }
        }))
        .expect("deserialize");

        assert!(!response.has_errors());
        assert_eq!(
            response.data_at("/reportData/report/title"),
            Some(&json!("vAS"))
        );
        assert_eq!(response.data_at("/worldData"), None);
    }

    #[test]
    fn test_response_into_result_with_errors() {
        let response: Response = serde_json::from_value(json!({
            "data": null,
            "errors": [{
                "message": "This report does not exist.",
                "locations": [{ "line": 1, "column": 3 }],
                "path": ["reportData", "report"]
            }]
        }))
        .expect("deserialize");

        let err = response.into_result().unwrap_err();
        match err {
            Error::Query { message, errors } => {
                assert_eq!(message, "This report does not exist.");
                assert_eq!(errors[0].locations[0], Location { line: 1, column: 3 });
            }
            other => panic!("Expected Query error, got {other:?}"),
        }
    }

    #[test]
    fn test_response_into_result_without_data() {
        let value = Response::default().into_result().expect("no errors");
        assert_eq!(value, Value::Null);
    }
}
