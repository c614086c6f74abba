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

//! An asynchronous task queue.
//!
//! Tasks are declared with [`TaskDefinition`], serialized into
//! self-describing [`TaskRecord`]s and published through a [`Broker`].
//! A [`Worker`] consumes the broker on a pool of concurrent executors with
//! at-least-once delivery: unacknowledged tasks are reclaimed after an idle
//! timeout and redelivered with an incremented requeue count, up to a
//! configured maximum.

#![forbid(unsafe_code)]

#[doc(hidden)]
pub extern crate async_trait;
#[doc(hidden)]
pub extern crate serde;

mod broker;
mod config;
mod error;
mod publisher;
mod registry;
mod result;
mod serialization;
mod shutdown;
mod task;
mod worker;

pub use crate::broker::{Broker, InMemoryBroker, RedisBroker, RedisBrokerConfig, StreamMeta};
pub use crate::config::{Configuration, ConfigurationBuilder};
pub use crate::error::{
	BrokerError, CodecError, ConfigError, DecodeError, Error, PerformError, SerializeError,
};
pub use crate::publisher::{Publisher, RecordSink};
pub use crate::registry::TaskRegistry;
pub use crate::result::{InMemoryResultBackend, ResultBackend};
pub use crate::serialization::{
	deserialize_task, serialize_task, EncodedValue, SerializationBackend, SerializationRegistry,
	TaskRecord, JSON_BACKEND_ID,
};
pub use crate::shutdown::StopHandle;
pub use crate::task::{
	BrokerTask, Capability, CapabilitySet, Injectable, TaskArgs, TaskContext, TaskDefinition,
	TaskHandler, TaskInstance, TaskKwargs, TaskValue,
};
pub use crate::worker::{Worker, WorkerBuilder};
