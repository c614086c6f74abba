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

use std::sync::Arc;

use crate::{
	broker::Broker,
	config::Configuration,
	error::{BrokerError, Error},
	serialization::{serialize_task, TaskRecord},
	task::{TaskArgs, TaskInstance, TaskKwargs},
};

/// Record-level ingress to a broker, with the metadata type erased so the
/// publisher can be passed around (and injected into tasks) without
/// carrying the broker's type.
#[async_trait::async_trait]
pub trait RecordSink: Send + Sync + 'static {
	async fn enqueue_record(&self, record: &TaskRecord) -> Result<(), BrokerError>;
}

#[async_trait::async_trait]
impl<B: Broker> RecordSink for B {
	async fn enqueue_record(&self, record: &TaskRecord) -> Result<(), BrokerError> {
		self.enqueue(record).await
	}
}

/// Serializes task instances and hands them to the broker. The worker
/// provides one to every task that declares it as an injected capability,
/// so tasks can enqueue follow-on tasks.
#[derive(Clone)]
pub struct Publisher {
	sink: Arc<dyn RecordSink>,
	config: Configuration,
}

impl Publisher {
	pub fn new<B: Broker>(broker: Arc<B>, config: Configuration) -> Self {
		Self { sink: broker, config }
	}

	/// Publish one task instance; returns the id assigned to the record.
	pub async fn enqueue<A, K>(&self, instance: &TaskInstance<A, K>) -> Result<String, Error>
	where
		A: TaskArgs,
		K: TaskKwargs,
	{
		let record = serialize_task(instance, self.config.serialization())?;
		self.sink.enqueue_record(&record).await?;
		log::debug!("enqueued task `{}` as {}", record.task_name, record.id);
		Ok(record.id)
	}
}
