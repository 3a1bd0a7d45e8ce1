//! Client-facing results of relayed commands.

// self
use crate::_prelude::*;

/// Outcome of one relayed command, as delivered to the client.
///
/// Serializes untagged: a success is the backend body verbatim, a failure is the
/// `{status, error, detail}` envelope.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RelayResponse {
	/// 2xx backend body.
	Success(JsonValue),
	/// Rejected, failed, or non-2xx command.
	Failure(ErrorEnvelope),
}
impl RelayResponse {
	pub(crate) fn failure(status: u16, method: &str, detail: impl Into<JsonValue>) -> Self {
		Self::Failure(ErrorEnvelope::new(status, method, detail))
	}

	/// Returns `true` for [`RelayResponse::Success`].
	pub fn is_success(&self) -> bool {
		matches!(self, Self::Success(_))
	}

	/// Failure envelope, if any.
	pub fn as_failure(&self) -> Option<&ErrorEnvelope> {
		match self {
			Self::Failure(envelope) => Some(envelope),
			Self::Success(_) => None,
		}
	}

	/// Wire representation.
	pub fn into_value(self) -> JsonValue {
		match self {
			Self::Success(body) => body,
			Self::Failure(envelope) => serde_json::json!({
				"status": envelope.status,
				"error": envelope.error,
				"detail": envelope.detail,
			}),
		}
	}
}

/// Failure description returned in place of a backend body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
	/// HTTP-style status: the backend's for non-2xx answers, 429 for admission, 500 otherwise.
	pub status: u16,
	/// `Unable to complete <method> request`.
	pub error: String,
	/// Backend body or a short reason.
	pub detail: JsonValue,
}
impl ErrorEnvelope {
	/// Builds an envelope for a `method` request.
	pub fn new(status: u16, method: &str, detail: impl Into<JsonValue>) -> Self {
		Self { status, error: format!("Unable to complete {method} request"), detail: detail.into() }
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::json;
	// self
	use super::*;

	#[test]
	fn responses_serialize_untagged() {
		let success = RelayResponse::Success(json!({ "id": 7 }));
		let failure = RelayResponse::failure(429, "post", "Rate limit exceeded");

		assert_eq!(serde_json::to_value(&success).expect("Serialization should succeed."), json!({ "id": 7 }));
		assert_eq!(
			serde_json::to_value(&failure).expect("Serialization should succeed."),
			json!({ "status": 429, "error": "Unable to complete post request", "detail": "Rate limit exceeded" })
		);
		assert_eq!(failure.clone().into_value(), serde_json::to_value(&failure).expect("Serialization should succeed."));
		assert_eq!(failure.as_failure().map(|envelope| envelope.status), Some(429));
		assert!(success.is_success());
	}
}
