use std::io;

use thiserror::Error;

/// Errors raised while configuring, opening or sampling energy sources
#[derive(Error, Debug)]
pub enum SamplerError {
	#[error("Invalid configuration: {0}")]
	InvalidConfig(String),

	#[error("Source {source_name} unavailable: {reason}")]
	SourceUnavailable { source_name: String, reason: String },

	#[error("Failed to read {source_name}: {reason}")]
	ReadFailure { source_name: String, reason: String },

	#[error("{source_name} returned completion code {code:#04x}")]
	SoftStatus { source_name: String, code: u8 },

	#[error("Sink error: {0}")]
	Sink(String),

	#[error("IO error: {0}")]
	Io(#[from] io::Error),
}

/// Result type alias for the sampler
pub type Result<T> = std::result::Result<T, SamplerError>;

impl SamplerError {
	pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
		SamplerError::InvalidConfig(msg.into())
	}

	pub fn unavailable<N: Into<String>, R: ToString>(source_name: N, reason: R) -> Self {
		SamplerError::SourceUnavailable {
			source_name: source_name.into(),
			reason: reason.to_string(),
		}
	}

	pub fn read_failure<N: Into<String>, R: ToString>(source_name: N, reason: R) -> Self {
		SamplerError::ReadFailure {
			source_name: source_name.into(),
			reason: reason.to_string(),
		}
	}

	pub fn soft_status<N: Into<String>>(source_name: N, code: u8) -> Self {
		SamplerError::SoftStatus {
			source_name: source_name.into(),
			code,
		}
	}

	pub fn sink<S: Into<String>>(msg: S) -> Self {
		SamplerError::Sink(msg.into())
	}

	/// A soft failure means "no reading this tick", never a broken channel
	pub fn is_soft(&self) -> bool {
		matches!(self, SamplerError::SoftStatus { .. })
	}
}
