// Copyright 2021-2022 Parity Technologies (UK) Ltd.
// This file is part of streamq.

// streamq is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// streamq is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with streamq.  If not, see <http://www.gnu.org/licenses/>.

use std::time::Duration;

use thiserror::Error;

/// Catch-all error for task handlers and result backends.
pub type PerformError = Box<dyn std::error::Error + Send + Sync>;

/// Catch-all error for custom serialization backends.
pub type CodecError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
	/// Error talking to the broker
	#[error(transparent)]
	Broker(#[from] BrokerError),
	/// Error encoding a task for publication
	#[error(transparent)]
	Serialize(#[from] SerializeError),
	/// Error decoding a task record back into arguments
	#[error(transparent)]
	Decode(#[from] DecodeError),
	/// Invalid configuration
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// A task declared an injectable capability the worker does not provide.
	/// Fatal: surfaced from `Worker::run` before any task is dispatched.
	#[error("task `{task}` declares unknown injectable capability `{capability}`")]
	MisconfiguredTask { task: String, capability: &'static str },
	#[error("{0}")]
	Msg(String),
}

impl From<String> for Error {
	fn from(err: String) -> Error {
		Error::Msg(err)
	}
}

/// Transport-level broker failures. The worker treats these as task
/// failures: the affected task is not acked and will be redelivered.
#[derive(Debug, Error)]
pub enum BrokerError {
	#[error("broker has not been opened")]
	NotOpen,
	#[error("broker channel closed")]
	Closed,
	#[error(transparent)]
	Redis(#[from] redis::RedisError),
	#[error("failed to encode task record {0}")]
	Codec(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SerializeError {
	#[error("failed to encode value {0}")]
	Json(#[from] serde_json::Error),
	#[error("backend `{backend}` failed to encode value: {reason}")]
	Backend { backend: String, reason: CodecError },
}

#[derive(Debug, Error)]
pub enum DecodeError {
	#[error("unknown serialization backend `{0}`")]
	UnknownBackend(String),
	#[error("task `{0}` is not registered")]
	UnknownTask(String),
	#[error("expected {expected} positional arguments, record carries {actual}")]
	ArgumentCount { expected: usize, actual: usize },
	#[error("record is missing keyword argument `{0}`")]
	MissingKwarg(String),
	#[error("record carries unexpected keyword argument `{0}`")]
	UnexpectedKwarg(String),
	#[error("backend `{backend}` produced a value of the wrong type")]
	WrongType { backend: String },
	#[error("failed to decode value {0}")]
	Json(#[from] serde_json::Error),
	#[error("backend `{backend}` failed to decode value: {reason}")]
	Backend { backend: String, reason: CodecError },
}

#[derive(Debug, Error)]
pub enum ConfigError {
	/// The heartbeat must fire at least once within the broker idle timeout,
	/// otherwise a healthy in-flight task would be reclaimed mid-execution.
	#[error(
		"healthcheck interval ({healthcheck:?}) must be strictly less than the timeout interval ({timeout:?})"
	)]
	HealthcheckNotBelowTimeout { healthcheck: Duration, timeout: Duration },
}
