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

//! The worker runtime: one dispatcher multiplexing the broker read stream
//! into a pool of executor fibers over a zero-capacity hand-off channel,
//! with a heartbeat fiber refreshing broker-side idle timers and a
//! deterministic shutdown path that drains in-flight work before the
//! broker is released.

use std::{
	any::{Any, TypeId},
	collections::HashMap,
	sync::{Arc, Mutex},
	time::Duration,
};

use async_std::{future::timeout, task};
use futures::future::{self, Either};

use crate::{
	broker::Broker,
	config::Configuration,
	error::{DecodeError, Error, PerformError},
	publisher::Publisher,
	registry::TaskRegistry,
	result::ResultBackend,
	serialization::TaskRecord,
	shutdown::StopHandle,
	task::{BrokerTask, CapabilitySet, TaskContext},
};

/// Pause before retrying after a failed broker read.
const READ_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Builder pattern struct for the [`Worker`].
pub struct WorkerBuilder<B: Broker> {
	broker: Arc<B>,
	registry: TaskRegistry,
	config: Configuration,
	concurrency: usize,
	result_backend: Option<Arc<dyn ResultBackend>>,
	capabilities: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
	install_signal_handlers: bool,
}

impl<B: Broker> WorkerBuilder<B> {
	pub fn new(broker: Arc<B>, registry: TaskRegistry, config: Configuration) -> Self {
		Self {
			broker,
			registry,
			config,
			concurrency: num_cpus::get(),
			result_backend: None,
			capabilities: HashMap::new(),
			install_signal_handlers: true,
		}
	}

	/// Number of executor fibers; this bounds the tasks in flight at once.
	pub fn concurrency(mut self, concurrency: usize) -> Self {
		self.concurrency = concurrency.max(1);
		self
	}

	pub fn result_backend(mut self, backend: Arc<dyn ResultBackend>) -> Self {
		self.result_backend = Some(backend);
		self
	}

	/// Provide a value tasks may declare as an injected capability.
	pub fn capability<T: Any + Clone + Send + Sync>(mut self, value: T) -> Self {
		self.capabilities.insert(TypeId::of::<T>(), Box::new(value));
		self
	}

	/// Whether `run` installs SIGTERM/SIGINT handlers that stop the worker.
	/// On by default; hosts that manage signals themselves (and tests)
	/// switch it off and call [`Worker::stop`].
	pub fn install_signal_handlers(mut self, install: bool) -> Self {
		self.install_signal_handlers = install;
		self
	}

	pub fn build(mut self) -> Worker<B> {
		let publisher = Publisher::new(Arc::clone(&self.broker), self.config.clone());
		self.capabilities
			.entry(TypeId::of::<Publisher>())
			.or_insert_with(|| Box::new(publisher));

		Worker {
			broker: self.broker,
			registry: Arc::new(self.registry),
			config: self.config,
			concurrency: self.concurrency,
			result_backend: self.result_backend,
			capabilities: CapabilitySet::new(self.capabilities),
			install_signal_handlers: self.install_signal_handlers,
			stop: StopHandle::new(),
			active_tasks: ActiveTasks::new(),
		}
	}
}

/// Concurrent consumer for a broker.
///
/// `run` drives the dispatch loop on the calling fiber and spawns the
/// broker maintenance loop, the heartbeat loop and `concurrency` executors
/// alongside it. One failing task never terminates the worker; `run`
/// returns on [`Worker::stop`], on a termination signal, or with an error
/// if a registered task declares a capability the worker cannot provide.
pub struct Worker<B: Broker> {
	broker: Arc<B>,
	registry: Arc<TaskRegistry>,
	config: Configuration,
	concurrency: usize,
	result_backend: Option<Arc<dyn ResultBackend>>,
	capabilities: CapabilitySet,
	install_signal_handlers: bool,
	stop: StopHandle,
	active_tasks: ActiveTasks<B::Meta>,
}

impl<B: Broker> Worker<B> {
	pub fn builder(broker: Arc<B>, registry: TaskRegistry, config: Configuration) -> WorkerBuilder<B> {
		WorkerBuilder::new(broker, registry, config)
	}

	/// Request shutdown: in-flight tasks run to completion and are acked,
	/// everything still queued stays with the broker.
	pub fn stop(&self) {
		self.stop.raise();
	}

	pub fn stop_handle(&self) -> StopHandle {
		self.stop.clone()
	}

	pub async fn run(&self) -> Result<(), Error> {
		self.check_capabilities()?;

		if self.install_signal_handlers {
			let stop = self.stop.clone();
			if let Err(error) = ctrlc::set_handler(move || stop.raise()) {
				log::warn!("could not install termination signal handlers: {}", error);
			}
		}

		self.broker.open().await?;

		let (send, recv) = flume::bounded::<BrokerTask<B::Meta>>(0);
		let mut fibers = Vec::with_capacity(self.concurrency + 2);

		{
			let broker = Arc::clone(&self.broker);
			let config = self.config.clone();
			let stop = self.stop.clone();
			fibers.push(task::spawn(async move {
				if let Err(error) =
					broker.run_worker_maintenance_tasks(stop.clone(), &config).await
				{
					log::error!("broker maintenance loop failed: {}", error);
					stop.raise();
				}
			}));
		}

		{
			let broker = Arc::clone(&self.broker);
			let active_tasks = self.active_tasks.clone();
			let interval = self.config.healthcheck_interval();
			let stop = self.stop.clone();
			fibers.push(task::spawn(heartbeat(broker, active_tasks, interval, stop)));
		}

		for _ in 0..self.concurrency {
			let executor = Executor {
				broker: Arc::clone(&self.broker),
				registry: Arc::clone(&self.registry),
				config: self.config.clone(),
				result_backend: self.result_backend.clone(),
				capabilities: self.capabilities.clone(),
				active_tasks: self.active_tasks.clone(),
			};
			let recv = recv.clone();
			fibers.push(task::spawn(async move { executor.run(recv).await }));
		}
		drop(recv);

		self.dispatch(&send).await;

		// deterministic shutdown: no new work, executors drain, everything
		// joins before the broker goes away
		self.stop.raise();
		drop(send);
		future::join_all(fibers).await;
		self.broker.close().await?;
		Ok(())
	}

	/// Every declared injectable must be present in the capability set.
	/// Checked once, before anything is spawned.
	fn check_capabilities(&self) -> Result<(), Error> {
		for task in self.registry.tasks() {
			for capability in task.capabilities() {
				if !self.capabilities.contains(capability.id) {
					return Err(Error::MisconfiguredTask {
						task: task.name().to_string(),
						capability: capability.name,
					});
				}
			}
		}
		Ok(())
	}

	async fn dispatch(&self, send: &flume::Sender<BrokerTask<B::Meta>>) {
		let mut stop_wait = Box::pin(self.stop.wait());
		loop {
			let read = Box::pin(self.broker.read());
			match future::select(read, stop_wait).await {
				Either::Right(..) => break,
				Either::Left((result, pending_stop)) => {
					stop_wait = pending_stop;
					match result {
						Ok(tasks) => {
							for task in tasks {
								if task.record.requeue_count
									>= self.config.max_delivery_attempts()
								{
									self.drop_poisoned(task).await;
									continue;
								}
								if send.send_async(task).await.is_err() {
									return;
								}
							}
						}
						Err(error) => {
							log::error!("broker read failed: {}", error);
							task::sleep(READ_RETRY_DELAY).await;
						}
					}
				}
			}
			task::yield_now().await;
			if self.stop.is_raised() {
				break;
			}
		}
	}

	/// A task that exhausted its delivery attempts is acked without ever
	/// reaching an executor.
	async fn drop_poisoned(&self, task: BrokerTask<B::Meta>) {
		log::warn!(
			"dropping task {} (`{}`) after {} delivery attempts",
			task.record.id,
			task.record.task_name,
			task.record.requeue_count,
		);
		if let Err(error) = self.broker.ack(task).await {
			log::error!("failed to ack dropped task: {}", error);
		}
	}
}

struct Executor<B: Broker> {
	broker: Arc<B>,
	registry: Arc<TaskRegistry>,
	config: Configuration,
	result_backend: Option<Arc<dyn ResultBackend>>,
	capabilities: CapabilitySet,
	active_tasks: ActiveTasks<B::Meta>,
}

impl<B: Broker> Executor<B> {
	async fn run(self, recv: flume::Receiver<BrokerTask<B::Meta>>) {
		while let Ok(task) = recv.recv_async().await {
			self.handle(task).await;
		}
	}

	async fn handle(&self, task: BrokerTask<B::Meta>) {
		let task_id = task.record.id.clone();
		self.active_tasks.insert(task.clone());

		match self.perform(&task.record).await {
			Ok(payload) => {
				if let Err(error) = self.broker.ack(task).await {
					// not acked; the broker will redeliver after timeout
					log::error!("failed to ack task {}: {}", task_id, error);
					self.active_tasks.remove(&task_id);
					return;
				}
				self.active_tasks.remove(&task_id);
				if let Some(backend) = &self.result_backend {
					if let Err(error) = backend.set(&task_id, payload).await {
						log::error!("failed to record result of task {}: {}", task_id, error);
					}
				}
			}
			Err(error) => {
				log::error!("task {} failed: {}", task_id, error);
				self.active_tasks.remove(&task_id);
			}
		}
	}

	async fn perform(&self, record: &TaskRecord) -> Result<Vec<u8>, PerformError> {
		let registered = self
			.registry
			.get(&record.task_name)
			.ok_or_else(|| DecodeError::UnknownTask(record.task_name.clone()))?;
		let ctx = TaskContext::new(self.capabilities.clone());
		registered
			.perform(record.clone(), Arc::clone(self.config.serialization()), ctx)
			.await
	}
}

/// In-flight tasks, keyed by record id. Executor fibers insert and remove;
/// the heartbeat fiber snapshots the values before suspending.
struct ActiveTasks<M> {
	inner: Arc<Mutex<HashMap<String, BrokerTask<M>>>>,
}

impl<M> Clone for ActiveTasks<M> {
	fn clone(&self) -> Self {
		Self { inner: Arc::clone(&self.inner) }
	}
}

impl<M: Clone> ActiveTasks<M> {
	fn new() -> Self {
		Self { inner: Arc::new(Mutex::new(HashMap::new())) }
	}

	fn insert(&self, task: BrokerTask<M>) {
		self.inner
			.lock()
			.expect("active task lock poisoned")
			.insert(task.record.id.clone(), task);
	}

	fn remove(&self, id: &str) {
		self.inner.lock().expect("active task lock poisoned").remove(id);
	}

	fn snapshot(&self) -> Vec<BrokerTask<M>> {
		self.inner.lock().expect("active task lock poisoned").values().cloned().collect()
	}
}

/// Periodically tell the broker which tasks are still executing so their
/// idle timers restart and they escape reclamation.
async fn heartbeat<B: Broker>(
	broker: Arc<B>,
	active_tasks: ActiveTasks<B::Meta>,
	interval: Duration,
	stop: StopHandle,
) {
	loop {
		let snapshot = active_tasks.snapshot();
		if !snapshot.is_empty() {
			if let Err(error) = broker.tasks_healthcheck(&snapshot).await {
				log::error!("tasks healthcheck failed: {}", error);
			}
		}
		let _ = timeout(interval, stop.wait()).await;
		if stop.is_raised() {
			return;
		}
	}
}
