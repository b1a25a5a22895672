//! Transport primitives for gateway requests.
//!
//! The module exposes [`HttpTransport`] alongside the owned [`ApiRequest`] and [`ApiResponse`]
//! types so downstream crates can plug in any HTTP stack. Requests are plain owned values so the
//! gateway can rewrite credentials and resend them after a refresh.

// std
#[cfg(feature = "reqwest")] use std::ops::Deref;
// crates.io
use http::{
	HeaderMap, HeaderValue, Method, StatusCode,
	header::{AUTHORIZATION, CONTENT_TYPE},
};
// self
use crate::{_prelude::*, auth::TokenSecret, error::TransportError};

/// Boxed future returned by [`HttpTransport::send`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<ApiResponse, TransportError>> + 'a + Send>>;

/// Abstraction over HTTP stacks capable of executing gateway requests.
///
/// The trait is the gateway's only dependency on an HTTP client. Implementations must be
/// `Send + Sync + 'static` so a single transport can back many concurrent requests, and must
/// report every HTTP response (including 4xx/5xx) as `Ok`; `Err` is reserved for failures that
/// produced no response at all.
pub trait HttpTransport
where
	Self: 'static + Send + Sync,
{
	/// Sends `request` and returns the full response.
	fn send(&self, request: ApiRequest) -> TransportFuture<'_>;
}

/// Owned outbound request that can be replayed after a token refresh.
#[derive(Clone, Debug)]
pub struct ApiRequest {
	/// HTTP method.
	pub method: Method,
	/// Absolute request URL.
	pub url: Url,
	/// Request headers.
	pub headers: HeaderMap,
	/// Optional request body.
	pub body: Option<Vec<u8>>,
	retried: bool,
}
impl ApiRequest {
	/// Creates a request without headers or body.
	pub fn new(method: Method, url: Url) -> Self {
		Self { method, url, headers: HeaderMap::new(), body: None, retried: false }
	}

	/// Shorthand for a `GET` request.
	pub fn get(url: Url) -> Self {
		Self::new(Method::GET, url)
	}

	/// Shorthand for a `POST` request.
	pub fn post(url: Url) -> Self {
		Self::new(Method::POST, url)
	}

	/// Serializes `body` as JSON and sets the content type.
	pub fn with_json<T>(mut self, body: &T) -> Result<Self>
	where
		T: ?Sized + Serialize,
	{
		let mut buf = Vec::new();

		serde_path_to_error::serialize(body, &mut serde_json::Serializer::new(&mut buf))?;
		self.headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
		self.body = Some(buf);

		Ok(self)
	}

	/// Adds or replaces a header.
	pub fn with_header(mut self, name: http::header::HeaderName, value: HeaderValue) -> Self {
		self.headers.insert(name, value);

		self
	}

	/// Returns `true` once the gateway has resent this request after an auth failure.
	pub fn is_retry(&self) -> bool {
		self.retried
	}

	/// Returns the bearer token currently attached, if any.
	pub fn bearer_token(&self) -> Option<&str> {
		self.headers.get(AUTHORIZATION)?.to_str().ok()?.strip_prefix("Bearer ")
	}

	pub(crate) fn mark_retried(&mut self) {
		self.retried = true;
	}

	pub(crate) fn attach_token(&mut self, token: &TokenSecret) -> Result<()> {
		let mut value = HeaderValue::from_str(&token.bearer())
			.map_err(|e| crate::error::ConfigError::HttpRequest(e.into()))?;

		value.set_sensitive(true);
		self.headers.insert(AUTHORIZATION, value);

		Ok(())
	}
}

/// Fully buffered response returned by an [`HttpTransport`].
#[derive(Clone, Debug)]
pub struct ApiResponse {
	/// HTTP status.
	pub status: StatusCode,
	/// Response headers.
	pub headers: HeaderMap,
	/// Raw response body.
	pub body: Vec<u8>,
}
impl ApiResponse {
	/// Creates a response with an empty header map.
	pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
		Self { status, headers: HeaderMap::new(), body: body.into() }
	}

	/// Decodes the body as JSON, reporting the failing path on error.
	pub fn json<T>(&self) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let mut de = serde_json::Deserializer::from_slice(&self.body);

		Ok(serde_path_to_error::deserialize(&mut de)?)
	}

	/// Returns the body as lossily decoded text.
	pub fn text(&self) -> String {
		String::from_utf8_lossy(&self.body).into_owned()
	}
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
///
/// Configure timeouts and TLS on the wrapped client; the gateway adds no timeouts of its own.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestTransport {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Deref for ReqwestTransport {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl HttpTransport for ReqwestTransport {
	fn send(&self, request: ApiRequest) -> TransportFuture<'_> {
		let client = self.0.clone();

		Box::pin(async move {
			let mut builder = client.request(request.method, request.url).headers(request.headers);

			if let Some(body) = request.body {
				builder = builder.body(body);
			}

			let response = builder.send().await?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let body = response.bytes().await?.to_vec();

			Ok(ApiResponse { status, headers, body })
		})
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn url(value: &str) -> Url {
		Url::parse(value).expect("Failed to parse transport test URL.")
	}

	#[test]
	fn attached_token_is_sensitive_and_readable() {
		let mut request = ApiRequest::get(url("https://api.example.com/auctions"));

		assert!(request.bearer_token().is_none());

		request.attach_token(&TokenSecret::new("a1")).expect("Token should form a header.");

		assert_eq!(request.bearer_token(), Some("a1"));
		assert!(
			request.headers.get(AUTHORIZATION).is_some_and(HeaderValue::is_sensitive),
			"Authorization header should be marked sensitive."
		);
		assert!(!request.is_retry());

		request.mark_retried();

		assert!(request.is_retry());
	}

	#[test]
	fn json_body_sets_content_type() {
		let request = ApiRequest::post(url("https://api.example.com/bids"))
			.with_json(&serde_json::json!({ "amount": 125 }))
			.expect("JSON body should encode.");

		assert_eq!(
			request.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
			Some("application/json")
		);
		assert_eq!(request.body.as_deref(), Some(br#"{"amount":125}"#.as_slice()));
	}

	#[test]
	fn response_json_reports_failures() {
		#[derive(Debug, Deserialize)]
		struct Listing {
			#[allow(dead_code)]
			id: u64,
		}

		let ok = ApiResponse::new(StatusCode::OK, br#"{"id":9}"#.to_vec());

		assert!(ok.json::<Listing>().is_ok());

		let bad = ApiResponse::new(StatusCode::OK, br#"{"id":"nine"}"#.to_vec());
		let err = bad.json::<Listing>().expect_err("String id should not decode.");

		assert!(matches!(err, Error::Serialization { .. }));
		assert_eq!(bad.text(), r#"{"id":"nine"}"#);
	}
}
