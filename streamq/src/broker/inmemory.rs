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

use flume::{Receiver, Sender};

use crate::{
	broker::Broker, config::Configuration, error::BrokerError, serialization::TaskRecord,
	shutdown::StopHandle, task::BrokerTask,
};

/// A bounded single-process FIFO.
///
/// Acks are no-ops and there is no reclamation: a crash loses the buffer.
/// Used as the test fixture and for deployments where the producer and the
/// worker share one process.
pub struct InMemoryBroker {
	tx: Sender<TaskRecord>,
	rx: Receiver<TaskRecord>,
}

impl InMemoryBroker {
	/// `capacity` bounds the buffer; a full buffer backpressures `enqueue`.
	pub fn new(capacity: usize) -> Self {
		let (tx, rx) = flume::bounded(capacity);
		Self { tx, rx }
	}

	/// Number of records waiting to be read.
	pub fn queued_count(&self) -> usize {
		self.rx.len()
	}
}

#[async_trait::async_trait]
impl Broker for InMemoryBroker {
	type Meta = ();

	async fn open(&self) -> Result<(), BrokerError> {
		Ok(())
	}

	async fn close(&self) -> Result<(), BrokerError> {
		Ok(())
	}

	async fn enqueue(&self, record: &TaskRecord) -> Result<(), BrokerError> {
		self.tx.send_async(record.clone()).await.map_err(|_| BrokerError::Closed)
	}

	async fn read(&self) -> Result<Vec<BrokerTask<Self::Meta>>, BrokerError> {
		let record = self.rx.recv_async().await.map_err(|_| BrokerError::Closed)?;
		Ok(vec![BrokerTask { record, meta: () }])
	}

	async fn ack(&self, _task: BrokerTask<Self::Meta>) -> Result<(), BrokerError> {
		Ok(())
	}

	async fn tasks_healthcheck(&self, _tasks: &[BrokerTask<Self::Meta>]) -> Result<(), BrokerError> {
		Ok(())
	}

	async fn run_worker_maintenance_tasks(
		&self,
		stop: StopHandle,
		_config: &Configuration,
	) -> Result<(), BrokerError> {
		stop.wait().await;
		Ok(())
	}
}
