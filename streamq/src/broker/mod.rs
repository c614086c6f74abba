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

mod inmemory;
mod redis;

pub use self::inmemory::InMemoryBroker;
pub use self::redis::{RedisBroker, RedisBrokerConfig, StreamMeta};

use crate::{
	config::Configuration, error::BrokerError, serialization::TaskRecord, shutdown::StopHandle,
	task::BrokerTask,
};

/// The transport every queue backend must provide.
///
/// Delivery is at-least-once: a successfully enqueued record is yielded by
/// some future `read` until it is acked. A delivered-but-unacked task whose
/// idle timer is not refreshed via [`tasks_healthcheck`](Self::tasks_healthcheck)
/// becomes eligible for reclamation by the maintenance loop, which
/// re-enqueues it with an incremented requeue count.
#[async_trait::async_trait]
pub trait Broker: Send + Sync + 'static {
	/// Broker-private position metadata carried by every in-flight task,
	/// opaque to the worker runtime.
	type Meta: Clone + Send + Sync + 'static;

	/// Acquire broker resources. Idempotent per instance.
	async fn open(&self) -> Result<(), BrokerError>;

	/// Release broker resources. Called once all worker fibers have joined.
	async fn close(&self) -> Result<(), BrokerError>;

	/// Publish a record. May suspend for internal backpressure.
	async fn enqueue(&self, record: &TaskRecord) -> Result<(), BrokerError>;

	/// Fetch the next batch of tasks. May block for a broker-configured
	/// interval; an empty batch on timeout is legal and expected.
	async fn read(&self) -> Result<Vec<BrokerTask<Self::Meta>>, BrokerError>;

	/// Mark a delivered task complete; it will not be redelivered. The
	/// executor only calls this after the task's handler has finished, so a
	/// failed or interrupted execution leaves the task pending for
	/// reclamation.
	async fn ack(&self, task: BrokerTask<Self::Meta>) -> Result<(), BrokerError>;

	/// Refresh the idle timers of in-flight tasks. Idempotent; a no-op for
	/// an empty slice.
	async fn tasks_healthcheck(&self, tasks: &[BrokerTask<Self::Meta>]) -> Result<(), BrokerError>;

	/// Broker-internal maintenance loop: periodically reclaim tasks whose
	/// idle time exceeds the configured timeout and re-enqueue them with an
	/// incremented requeue count. Runs until `stop` is raised.
	async fn run_worker_maintenance_tasks(
		&self,
		stop: StopHandle,
		config: &Configuration,
	) -> Result<(), BrokerError>;
}
