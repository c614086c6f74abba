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

//! Broker over a Redis stream with a consumer group.
//!
//! Every worker in a deployment shares `stream_name` and `group_name` but
//! registers its own `consumer_name`. Each stream entry holds the encoded
//! record in a single `value` field; the entry id travels with the task as
//! [`StreamMeta`] so ack, heartbeat and reclamation can address the pending
//! entry. Reclamation re-enqueues a fresh entry and acks the stale one,
//! keeping entry ids strictly monotone and the requeue count inside the
//! record itself.

use std::{sync::Mutex, time::Duration};

use async_std::future::timeout;
use flume::{Receiver, Sender};
use redis::{
	aio::MultiplexedConnection,
	streams::{
		StreamAutoClaimOptions, StreamAutoClaimReply, StreamClaimReply, StreamId,
		StreamReadOptions, StreamReadReply,
	},
	AsyncCommands, Client,
};

use crate::{
	broker::Broker, config::Configuration, error::BrokerError, serialization::TaskRecord,
	shutdown::StopHandle, task::BrokerTask,
};

/// Field under which the encoded record is stored in each stream entry.
const VALUE_FIELD: &str = "value";
/// Upper bound on entries reclaimed per maintenance pass.
const AUTOCLAIM_BATCH: usize = 1000;

/// Position of an in-flight task: the id of its stream entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamMeta {
	pub entry_id: String,
}

pub struct RedisBrokerConfig {
	/// Stream key the queue lives under.
	pub stream_name: String,
	/// Consumer group shared by all workers of the queue.
	pub group_name: String,
	/// Per-worker identity within the group. Two concurrent workers must
	/// use distinct names.
	pub consumer_name: String,
	/// BLOCK parameter passed to XREADGROUP.
	pub read_block_time: Duration,
	/// COUNT parameter passed to XREADGROUP.
	pub read_count: usize,
	/// Bound on concurrently in-flight XADDs.
	pub max_concurrent_enqueues: usize,
}

impl RedisBrokerConfig {
	pub fn new<S: AsRef<str>>(consumer_name: S) -> Self {
		Self {
			stream_name: "streamq".to_string(),
			group_name: "default".to_string(),
			consumer_name: consumer_name.as_ref().to_string(),
			read_block_time: Duration::from_secs(1),
			read_count: 1,
			max_concurrent_enqueues: 20,
		}
	}
}

pub struct RedisBroker {
	client: Client,
	config: RedisBrokerConfig,
	conn: Mutex<Option<MultiplexedConnection>>,
	// enqueue permits: sending acquires, receiving releases
	permits: (Sender<()>, Receiver<()>),
}

impl RedisBroker {
	pub fn new<S: AsRef<str>>(redis_url: S, config: RedisBrokerConfig) -> Result<Self, BrokerError> {
		let client = Client::open(redis_url.as_ref())?;
		let permits = flume::bounded(config.max_concurrent_enqueues);
		Ok(Self { client, config, conn: Mutex::new(None), permits })
	}

	fn connection(&self) -> Result<MultiplexedConnection, BrokerError> {
		self.conn.lock().expect("connection lock poisoned").clone().ok_or(BrokerError::NotOpen)
	}

	fn decode_entry(&self, entry: &StreamId) -> Option<TaskRecord> {
		let payload: Vec<u8> = match entry.get(VALUE_FIELD) {
			Some(payload) => payload,
			None => {
				log::error!("stream entry {} has no `{}` field, skipping", entry.id, VALUE_FIELD);
				return None;
			}
		};
		match serde_json::from_slice(&payload) {
			Ok(record) => Some(record),
			Err(error) => {
				log::error!("failed to decode stream entry {}: {}", entry.id, error);
				None
			}
		}
	}

	/// One reclamation pass: claim entries idle for longer than
	/// `min_idle`, re-enqueue each with an incremented requeue count and
	/// ack the stale entry. Entries that no longer decode are purged.
	async fn reclaim_stale_tasks(&self, min_idle: Duration) -> Result<(), BrokerError> {
		let mut conn = self.connection()?;
		let options = StreamAutoClaimOptions::default().count(AUTOCLAIM_BATCH);
		let reply: StreamAutoClaimReply = conn
			.xautoclaim_options(
				&self.config.stream_name,
				&self.config.group_name,
				&self.config.consumer_name,
				min_idle.as_millis() as usize,
				"0-0",
				options,
			)
			.await?;

		for entry in &reply.claimed {
			let mut record = match self.decode_entry(entry) {
				Some(record) => record,
				None => {
					// undecodable entries can never execute; purge them
					let _: i64 = conn
						.xack(&self.config.stream_name, &self.config.group_name, &[&entry.id])
						.await?;
					continue;
				}
			};
			record.requeue_count += 1;
			self.enqueue(&record).await?;
			let _: i64 = conn
				.xack(&self.config.stream_name, &self.config.group_name, &[&entry.id])
				.await?;
			log::info!(
				"requeued stale task {} (delivery attempt {})",
				record.id,
				record.requeue_count
			);
		}
		Ok(())
	}
}

#[async_trait::async_trait]
impl Broker for RedisBroker {
	type Meta = StreamMeta;

	async fn open(&self) -> Result<(), BrokerError> {
		if self.conn.lock().expect("connection lock poisoned").is_some() {
			return Ok(());
		}
		let mut conn = self.client.get_multiplexed_async_std_connection().await?;

		// create stream and group atomically; tolerate racing workers
		match conn
			.xgroup_create_mkstream::<_, _, _, ()>(
				&self.config.stream_name,
				&self.config.group_name,
				"$",
			)
			.await
		{
			Ok(()) => {}
			Err(error) if error.code() == Some("BUSYGROUP") => {}
			Err(error) => return Err(error.into()),
		}
		let _: i64 = redis::cmd("XGROUP")
			.arg("CREATECONSUMER")
			.arg(&self.config.stream_name)
			.arg(&self.config.group_name)
			.arg(&self.config.consumer_name)
			.query_async(&mut conn)
			.await?;

		*self.conn.lock().expect("connection lock poisoned") = Some(conn);
		Ok(())
	}

	async fn close(&self) -> Result<(), BrokerError> {
		self.conn.lock().expect("connection lock poisoned").take();
		Ok(())
	}

	async fn enqueue(&self, record: &TaskRecord) -> Result<(), BrokerError> {
		let mut conn = self.connection()?;
		let payload = serde_json::to_vec(record)?;

		// acquiring a permit suspends while max_concurrent_enqueues XADDs
		// are in flight
		self.permits.0.send_async(()).await.map_err(|_| BrokerError::Closed)?;
		let written: Result<String, redis::RedisError> =
			conn.xadd(&self.config.stream_name, "*", &[(VALUE_FIELD, payload)]).await;
		let _ = self.permits.1.try_recv();
		written?;
		Ok(())
	}

	async fn read(&self) -> Result<Vec<BrokerTask<Self::Meta>>, BrokerError> {
		let mut conn = self.connection()?;
		let options = StreamReadOptions::default()
			.group(&self.config.group_name, &self.config.consumer_name)
			.count(self.config.read_count)
			.block(self.config.read_block_time.as_millis() as usize);
		// a blocked read that times out yields nil rather than an empty reply
		let reply: Option<StreamReadReply> =
			conn.xread_options(&[&self.config.stream_name], &[">"], &options).await?;
		let reply = reply.unwrap_or_default();

		let mut tasks = Vec::new();
		for key in &reply.keys {
			for entry in &key.ids {
				if let Some(record) = self.decode_entry(entry) {
					tasks.push(BrokerTask {
						record,
						meta: StreamMeta { entry_id: entry.id.clone() },
					});
				}
			}
		}
		Ok(tasks)
	}

	async fn ack(&self, task: BrokerTask<Self::Meta>) -> Result<(), BrokerError> {
		let mut conn = self.connection()?;
		let _: i64 = conn
			.xack(&self.config.stream_name, &self.config.group_name, &[&task.meta.entry_id])
			.await?;
		log::debug!("acked task {} (stream entry {})", task.record.id, task.meta.entry_id);
		Ok(())
	}

	async fn tasks_healthcheck(&self, tasks: &[BrokerTask<Self::Meta>]) -> Result<(), BrokerError> {
		if tasks.is_empty() {
			return Ok(());
		}
		let mut conn = self.connection()?;
		let ids: Vec<&str> = tasks.iter().map(|task| task.meta.entry_id.as_str()).collect();
		// claiming with zero min-idle resets the idle timers without
		// transferring ownership
		let _: StreamClaimReply = conn
			.xclaim(
				&self.config.stream_name,
				&self.config.group_name,
				&self.config.consumer_name,
				0usize,
				&ids,
			)
			.await?;
		Ok(())
	}

	async fn run_worker_maintenance_tasks(
		&self,
		stop: StopHandle,
		config: &Configuration,
	) -> Result<(), BrokerError> {
		loop {
			if let Err(error) = self.reclaim_stale_tasks(config.timeout_interval()).await {
				log::error!("stale task reclamation failed: {}", error);
			}
			let _ = timeout(config.timeout_interval(), stop.wait()).await;
			if stop.is_raised() {
				return Ok(());
			}
		}
	}
}
