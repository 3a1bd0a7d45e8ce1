//! Bearer credentials and the boundary parse step that normalizes client-supplied payloads.
//!
//! Clients embed their credential under the `token` key of a command payload, either as a JSON
//! object or as a JSON-encoded string (cookie storage). [`CredentialPayload::take`] strips the key
//! from the payload so it is never forwarded to the backend, and yields a strict [`Credential`].

// self
use crate::{_prelude::*, auth::TokenSecret};

/// Payload key under which clients embed their credential.
pub const CREDENTIAL_KEY: &str = "token";

/// Access + refresh token pair identifying a session to the backend.
///
/// A credential is replaced wholesale on refresh and never mutated field by field. An empty
/// refresh secret means the client holds no refresh token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
	/// Short-lived access token sent as the bearer header.
	pub access: TokenSecret,
	/// Longer-lived refresh token exchanged for new access tokens.
	pub refresh: TokenSecret,
}
impl Credential {
	/// Creates a credential from raw token strings.
	pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
		Self { access: TokenSecret::new(access), refresh: TokenSecret::new(refresh) }
	}

	/// Returns the refresh token unless it is empty.
	pub fn refresh_token(&self) -> Option<&TokenSecret> {
		(!self.refresh.is_empty()).then_some(&self.refresh)
	}

	/// Returns a copy carrying a new access token and the same refresh token.
	pub fn with_access(&self, access: impl Into<String>) -> Self {
		Self { access: TokenSecret::new(access), refresh: self.refresh.clone() }
	}

	/// Serializes the credential into the JSON object shape clients persist.
	pub fn to_json(&self) -> JsonValue {
		serde_json::json!({ "access": self.access.expose(), "refresh": self.refresh.expose() })
	}
}

/// Reasons a client-supplied credential payload was discarded.
#[derive(Debug, ThisError)]
pub enum CredentialDecodeError {
	/// The string form did not contain valid JSON.
	#[error("Credential string is not valid JSON.")]
	Json(#[source] serde_json::Error),
	/// The payload was neither an object nor a JSON-encoded object.
	#[error("Credential payload must be an object, got {kind}.")]
	NotAnObject {
		/// JSON kind that was received.
		kind: &'static str,
	},
	/// One of the token fields was missing or not a string.
	#[error("Credential payload is missing the `{field}` token.")]
	Incomplete {
		/// Name of the missing field.
		field: &'static str,
	},
}

/// Outcome of extracting a credential from a command payload.
#[derive(Debug)]
pub enum CredentialPayload {
	/// The payload carried no credential.
	Absent,
	/// The payload carried a well-formed credential.
	Present(Credential),
	/// The payload carried something that could not be normalized.
	Invalid(CredentialDecodeError),
}
impl CredentialPayload {
	/// Removes the credential key from `payload` and parses its value.
	pub fn take(payload: &mut JsonMap<String, JsonValue>) -> Self {
		match payload.remove(CREDENTIAL_KEY) {
			None | Some(JsonValue::Null) => Self::Absent,
			Some(value) => match Self::parse(value) {
				Ok(credential) => Self::Present(credential),
				Err(e) => Self::Invalid(e),
			},
		}
	}

	/// Normalizes a raw credential value into a [`Credential`].
	pub fn parse(value: JsonValue) -> Result<Credential, CredentialDecodeError> {
		let value = match value {
			JsonValue::String(raw) =>
				serde_json::from_str::<JsonValue>(&raw).map_err(CredentialDecodeError::Json)?,
			other => other,
		};
		let mut fields = match value {
			JsonValue::Object(fields) => fields,
			other => return Err(CredentialDecodeError::NotAnObject { kind: json_kind(&other) }),
		};
		let access = take_string(&mut fields, "access")?;
		let refresh = take_string(&mut fields, "refresh")?;

		Ok(Credential::new(access, refresh))
	}
}

fn take_string(
	fields: &mut JsonMap<String, JsonValue>,
	field: &'static str,
) -> Result<String, CredentialDecodeError> {
	match fields.remove(field) {
		Some(JsonValue::String(value)) => Ok(value),
		_ => Err(CredentialDecodeError::Incomplete { field }),
	}
}

fn json_kind(value: &JsonValue) -> &'static str {
	match value {
		JsonValue::Null => "null",
		JsonValue::Bool(_) => "boolean",
		JsonValue::Number(_) => "number",
		JsonValue::String(_) => "string",
		JsonValue::Array(_) => "array",
		JsonValue::Object(_) => "object",
	}
}
