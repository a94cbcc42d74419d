//! Grant-specific token request composition.
//!
//! [`Composer`] is a closed set of request builders. The manager threads it through to the
//! fetch step without inspecting it, so adding a grant never touches the caching code.

// std
use std::{
	collections::BTreeMap,
	fmt::{Debug, Formatter, Result as FmtResult},
};
// crates.io
use base64::{Engine, engine::general_purpose::STANDARD};
use http::{
	HeaderValue, Method, Request,
	header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
};
use serde::{Deserialize, Serialize};
use url::{Url, form_urlencoded};
// self
use crate::_prelude::*;

/// `grant_type` for the client-credentials grant.
pub const GRANT_CLIENT_CREDENTIALS: &str = "client_credentials";
/// `grant_type` for the SAML 2.0 bearer assertion grant.
pub const GRANT_SAML2_BEARER: &str = "urn:ietf:params:oauth:grant-type:saml2-bearer";
/// `client_assertion_type` for JWT client assertions.
pub const CLIENT_ASSERTION_TYPE_JWT: &str =
	"urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Grant-independent inputs shared by every composer.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRequest {
	/// Token endpoint of the authorization server.
	#[serde(default)]
	pub token_url: Option<Url>,
	/// OAuth client identifier.
	#[serde(default)]
	pub client_id: Option<String>,
	/// OAuth client secret.
	#[serde(default, skip_serializing)]
	pub client_secret: Option<String>,
	/// Requested scopes.
	#[serde(default)]
	pub scope: Vec<String>,
	/// Serialized custom claims forwarded to the authorization server.
	#[serde(default)]
	pub custom_claims: Option<String>,
}
impl TokenRequest {
	/// Create an empty request.
	pub fn new() -> Self {
		Self::default()
	}

	/// Set the token endpoint.
	pub fn with_token_url(mut self, token_url: Url) -> Self {
		self.token_url = Some(token_url);

		self
	}

	/// Set client id and secret.
	pub fn with_client(
		mut self,
		client_id: impl Into<String>,
		client_secret: impl Into<String>,
	) -> Self {
		self.client_id = Some(client_id.into());
		self.client_secret = Some(client_secret.into());

		self
	}

	/// Replace the requested scopes.
	pub fn with_scope<I, S>(mut self, scope: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.scope = scope.into_iter().map(Into::into).collect();

		self
	}

	/// Set the custom claims.
	pub fn with_custom_claims(mut self, custom_claims: impl Into<String>) -> Self {
		self.custom_claims = Some(custom_claims.into());

		self
	}

	fn scope_param(&self) -> Option<String> {
		if self.scope.is_empty() { None } else { Some(self.scope.join(" ")) }
	}
}
impl Debug for TokenRequest {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenRequest")
			.field("token_url", &self.token_url)
			.field("client_id", &self.client_id)
			.field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
			.field("scope", &self.scope)
			.field("custom_claims", &self.custom_claims)
			.finish()
	}
}

/// Builds the wire-level request for a grant the crate does not know about.
pub trait RequestComposer: Send + Sync {
	/// Compose the token request.
	fn compose(&self, request: &TokenRequest) -> Result<ComposedRequest>;
}

/// Selects how a token request is built.
#[derive(Clone)]
pub enum Composer {
	/// Client-credentials grant authenticated with HTTP Basic.
	ClientCredentials,
	/// Client-credentials grant authenticated by the client TLS certificate.
	Mtls,
	/// SAML 2.0 bearer assertion grant with a JWT client assertion.
	SamlBearer {
		/// Base64-encoded SAML assertion.
		assertion: String,
		/// JWT proving the client identity.
		client_assertion: String,
	},
	/// Caller-supplied composer.
	External(Arc<dyn RequestComposer>),
}
impl Composer {
	/// Build a SAML bearer composer.
	pub fn saml_bearer(assertion: impl Into<String>, client_assertion: impl Into<String>) -> Self {
		Self::SamlBearer { assertion: assertion.into(), client_assertion: client_assertion.into() }
	}

	/// Wrap a caller-supplied composer.
	pub fn external(composer: impl RequestComposer + 'static) -> Self {
		Self::External(Arc::new(composer))
	}

	/// Short label used in logs and metrics.
	pub fn name(&self) -> &'static str {
		match self {
			Self::ClientCredentials => "client_credentials",
			Self::Mtls => "mtls",
			Self::SamlBearer { .. } => "saml_bearer",
			Self::External(_) => "external",
		}
	}

	/// Whether tokens obtained through this composer may be cached.
	///
	/// SAML assertions are single use, so their tokens are never shared between requests.
	pub fn is_cacheable(&self) -> bool {
		!matches!(self, Self::SamlBearer { .. })
	}

	/// Compose the wire-level request for `request`.
	pub fn compose(&self, request: &TokenRequest) -> Result<ComposedRequest> {
		match self {
			Self::ClientCredentials => {
				let client_auth = match (&request.client_id, &request.client_secret) {
					(Some(client_id), Some(client_secret)) => ClientAuth::Basic {
						client_id: client_id.clone(),
						client_secret: client_secret.clone(),
					},
					_ => ClientAuth::None,
				};
				let composed =
					ComposedRequest::new(GRANT_CLIENT_CREDENTIALS, request.token_url.clone())
						.with_client_auth(client_auth)
						.with_optional_param("scope", request.scope_param())
						.with_optional_param("custom_claims", request.custom_claims.clone());

				Ok(composed)
			},
			Self::Mtls => {
				let composed =
					ComposedRequest::new(GRANT_CLIENT_CREDENTIALS, request.token_url.clone())
						.with_client_auth(ClientAuth::TlsCertificate)
						.with_optional_param("client_id", request.client_id.clone())
						.with_optional_param("scope", request.scope_param())
						.with_optional_param("custom_claims", request.custom_claims.clone());

				Ok(composed)
			},
			Self::SamlBearer { assertion, client_assertion } => {
				if assertion.is_empty() {
					return Err(Error::Validation {
						field: "assertion",
						reason: "Must not be empty.".into(),
					});
				}
				if client_assertion.is_empty() {
					return Err(Error::Validation {
						field: "client_assertion",
						reason: "Must not be empty.".into(),
					});
				}

				let composed = ComposedRequest::new(GRANT_SAML2_BEARER, request.token_url.clone())
					.with_param("assertion", assertion.clone())
					.with_param("client_assertion_type", CLIENT_ASSERTION_TYPE_JWT)
					.with_param("client_assertion", client_assertion.clone())
					.with_optional_param("scope", request.scope_param());

				Ok(composed)
			},
			Self::External(composer) => composer.compose(request),
		}
	}
}
impl Debug for Composer {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::SamlBearer { .. } =>
				f.debug_struct("Composer::SamlBearer").finish_non_exhaustive(),
			other => write!(f, "Composer::{}", other.name()),
		}
	}
}

/// How the client authenticates to the token endpoint.
#[derive(Clone, PartialEq, Eq)]
pub enum ClientAuth {
	/// No client authentication beyond what the form carries.
	None,
	/// HTTP Basic with client id and secret.
	Basic {
		/// OAuth client identifier.
		client_id: String,
		/// OAuth client secret.
		client_secret: String,
	},
	/// Client certificate presented by the TLS transport.
	TlsCertificate,
}
impl Debug for ClientAuth {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::None => f.write_str("ClientAuth::None"),
			Self::Basic { client_id, .. } => f
				.debug_struct("ClientAuth::Basic")
				.field("client_id", client_id)
				.field("client_secret", &"<redacted>")
				.finish(),
			Self::TlsCertificate => f.write_str("ClientAuth::TlsCertificate"),
		}
	}
}

/// Wire-level token request ready for a [`TokenFetcher`](crate::TokenFetcher).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComposedRequest {
	/// OAuth `grant_type` parameter.
	pub grant_type: String,
	/// Token endpoint the request targets.
	pub token_url: Option<Url>,
	/// Client authentication method.
	pub client_auth: ClientAuth,
	/// Form parameters other than `grant_type`.
	pub form: BTreeMap<String, String>,
}
impl ComposedRequest {
	/// Start a request for `grant_type`.
	pub fn new(grant_type: impl Into<String>, token_url: Option<Url>) -> Self {
		Self {
			grant_type: grant_type.into(),
			token_url,
			client_auth: ClientAuth::None,
			form: BTreeMap::new(),
		}
	}

	/// Set the client authentication method.
	pub fn with_client_auth(mut self, client_auth: ClientAuth) -> Self {
		self.client_auth = client_auth;

		self
	}

	/// Add a form parameter.
	pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.form.insert(name.into(), value.into());

		self
	}

	/// Add a form parameter when `value` is present.
	pub fn with_optional_param(self, name: impl Into<String>, value: Option<String>) -> Self {
		match value {
			Some(value) => self.with_param(name, value),
			None => self,
		}
	}

	/// Render the `application/x-www-form-urlencoded` body, `grant_type` first.
	pub fn form_body(&self) -> String {
		let mut serializer = form_urlencoded::Serializer::new(String::new());

		serializer.append_pair("grant_type", &self.grant_type);

		for (name, value) in &self.form {
			serializer.append_pair(name, value);
		}

		serializer.finish()
	}

	/// Build a `POST` request against the token endpoint.
	pub fn to_http(&self) -> Result<Request<String>> {
		let token_url = self.token_url.as_ref().ok_or(Error::MissingTokenUrl)?;
		let mut request = Request::builder()
			.method(Method::POST)
			.uri(token_url.as_str())
			.header(CONTENT_TYPE, "application/x-www-form-urlencoded")
			.header(ACCEPT, "application/json")
			.body(self.form_body())?;

		if let ClientAuth::Basic { client_id, client_secret } = &self.client_auth {
			let credentials = STANDARD.encode(format!("{client_id}:{client_secret}"));
			let value = HeaderValue::from_str(&format!("Basic {credentials}")).map_err(|err| {
				Error::Validation {
					field: "client_id",
					reason: format!("Cannot form an Authorization header: {err}."),
				}
			})?;

			request.headers_mut().insert(AUTHORIZATION, value);
		}

		Ok(request)
	}
}
