pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Conflict: {message}")]
	Conflict { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
}

impl From<sqlx::Error> for ServiceError {
	fn from(err: sqlx::Error) -> Self {
		Self::Storage { message: err.to_string() }
	}
}

impl From<parity_storage::Error> for ServiceError {
	fn from(err: parity_storage::Error) -> Self {
		match err {
			parity_storage::Error::Sqlx(inner) => Self::Storage { message: inner.to_string() },
			parity_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			parity_storage::Error::NotFound(message) => Self::NotFound { message },
			parity_storage::Error::Conflict(message) => Self::Conflict { message },
		}
	}
}
