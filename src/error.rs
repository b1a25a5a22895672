//! Gateway-level error types shared across the token store, refresh coordinator, and transport.

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Boxed error used for opaque upstream failures (refresh exchanges, transports).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Durable storage failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::storage::StorageError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// JSON payload could not be encoded or decoded.
	#[error("Payload could not be (de)serialized.")]
	Serialization {
		/// Structured serde failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
	/// Upstream answered with a non-success status that is not an authentication failure.
	#[error("Request failed with HTTP status {status}.")]
	Status {
		/// HTTP status code.
		status: u16,
		/// Response body, decoded lossily.
		body: String,
	},
	/// Authentication failure that could not be recovered by a refresh and retry.
	#[error("Request was rejected as unauthorized (HTTP {status}).")]
	Unauthorized {
		/// HTTP status code.
		status: u16,
		/// Response body, decoded lossily.
		body: String,
	},
	/// The refresh exchange itself failed; only the caller that triggered it observes this.
	#[error("Refresh token exchange failed.")]
	RefreshExchange {
		/// Error raised by the exchange.
		#[source]
		source: BoxError,
	},
}
impl Error {
	/// Wraps an exchange failure raised while minting a new access token.
	pub fn refresh_exchange(src: impl Into<BoxError>) -> Self {
		Self::RefreshExchange { source: src.into() }
	}

	/// Returns `true` if the error is an unrecoverable authentication failure.
	pub fn is_unauthorized(&self) -> bool {
		matches!(self, Self::Unauthorized { .. })
	}
}
impl From<serde_path_to_error::Error<serde_json::Error>> for Error {
	fn from(e: serde_path_to_error::Error<serde_json::Error>) -> Self {
		Self::Serialization { source: e }
	}
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] http::Error),
	/// A configured URL or path cannot be parsed or joined.
	#[error("The {field} URL is invalid.")]
	InvalidUrl {
		/// Which configuration field failed.
		field: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Base URL is mandatory.
	#[error("Missing base URL.")]
	MissingBaseUrl,
	/// A base URL that cannot carry paths (e.g. `mailto:`) was supplied.
	#[error("Base URL `{url}` cannot be used as a base for request paths.")]
	CannotBeABase {
		/// URL that failed validation.
		url: String,
	},
	/// Storage keys must be non-empty and distinct.
	#[error("Storage key `{key}` is empty or collides with another key.")]
	InvalidStorageKey {
		/// Offending key.
		key: String,
	},
}
/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while sending the request.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while sending the request.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::storage::StorageError;

	#[test]
	fn storage_error_converts_into_error_with_source() {
		let storage_error = StorageError::Backend { message: "disk unavailable".into() };
		let error: Error = storage_error.clone().into();

		assert!(matches!(error, Error::Storage(_)));
		assert!(error.to_string().contains("disk unavailable"));

		let source = StdError::source(&error)
			.expect("Error should expose the original storage error as its source.");

		assert_eq!(source.to_string(), storage_error.to_string());
	}

	#[test]
	fn refresh_exchange_keeps_original_message() {
		let error = Error::refresh_exchange("upstream said no");
		let source = StdError::source(&error).expect("Exchange errors should expose a source.");

		assert_eq!(source.to_string(), "upstream said no");
		assert!(!error.is_unauthorized());
	}
}
