//! Access-token claim decoding.
//!
//! Access tokens are JWTs issued by the backend. The relay never verifies signatures; it only
//! reads the payload segment to learn when the token expires so it can refresh ahead of time.

// crates.io
use base64::{
	Engine as _,
	alphabet::URL_SAFE,
	engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};
// self
use crate::{_prelude::*, auth::TokenSecret};

const JWT_PAYLOAD: GeneralPurpose = GeneralPurpose::new(
	&URL_SAFE,
	GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Errors raised while decoding access-token claims.
#[derive(Debug, ThisError)]
pub enum ClaimsError {
	/// The token does not have the three dot-separated JWT segments.
	#[error("Access token is not a JWT.")]
	Malformed,
	/// The payload segment is not valid base64url.
	#[error("Access token payload is not valid base64url.")]
	Base64(#[from] base64::DecodeError),
	/// The payload segment is not a JSON claims object.
	#[error("Access token payload is not a JSON claims object.")]
	Json(#[from] serde_path_to_error::Error<serde_json::Error>),
}

/// Decoded payload of an access token.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct AccessClaims {
	/// Expiry instant in seconds since the Unix epoch.
	#[serde(default)]
	pub exp: Option<i64>,
}
impl AccessClaims {
	/// Decodes the claims embedded in `token`.
	pub fn decode(token: &TokenSecret) -> Result<Self, ClaimsError> {
		let mut segments = token.expose().split('.');
		let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
			(Some(_), Some(payload), Some(_), None) => payload,
			_ => return Err(ClaimsError::Malformed),
		};
		let bytes = JWT_PAYLOAD.decode(payload)?;
		let mut de = serde_json::Deserializer::from_slice(&bytes);

		Ok(serde_path_to_error::deserialize(&mut de)?)
	}

	/// Returns the expiry claim as an instant, if present and representable.
	pub fn expires_at(&self) -> Option<OffsetDateTime> {
		self.exp.and_then(|exp| OffsetDateTime::from_unix_timestamp(exp).ok())
	}
}
