use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Cannot read Parity config {path:?}.")]
	Read { path: PathBuf, source: std::io::Error },
	#[error("Cannot parse Parity config {path:?}.")]
	Parse { path: PathBuf, source: toml::de::Error },
	/// `key` is the dotted path of the rejected setting.
	#[error("{key} {reason}")]
	Invalid { key: &'static str, reason: String },
}
impl Error {
	pub(crate) fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
		Self::Invalid { key, reason: reason.into() }
	}
}
