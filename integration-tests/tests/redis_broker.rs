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

//! Redelivery and heartbeat behavior against a live Redis.
//!
//! These tests run only when `TEST_REDIS_URL` is set, e.g.
//! `TEST_REDIS_URL=redis://localhost:6379`. Each test uses a throwaway
//! stream key and deletes it afterwards.

use std::{
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	},
	time::Duration,
};

use async_std::task;
use redis::AsyncCommands;
use streamq::{
	Broker, Configuration, PerformError, Publisher, RedisBroker, RedisBrokerConfig, TaskContext,
	TaskDefinition, TaskRegistry, Worker,
};

use crate::{dummy_tasks::failing, initialize, wait_until};

fn redis_url() -> Option<String> {
	match std::env::var("TEST_REDIS_URL") {
		Ok(url) => Some(url),
		Err(_) => {
			eprintln!("TEST_REDIS_URL not set, skipping redis test");
			None
		}
	}
}

fn broker_config(stream: &str) -> RedisBrokerConfig {
	let mut config = RedisBrokerConfig::new("consumer-1");
	config.stream_name = stream.to_string();
	config.read_block_time = Duration::from_millis(200);
	config
}

fn unique_stream() -> String {
	format!("streamq-test-{}", uuid::Uuid::new_v4())
}

async fn delete_stream(url: &str, stream: &str) {
	let client = redis::Client::open(url).unwrap();
	let mut conn = client.get_multiplexed_async_std_connection().await.unwrap();
	let _: i64 = conn.del(stream).await.unwrap();
}

#[test]
fn redelivery_stops_at_the_attempt_bound() {
	initialize();
	let url = match redis_url() {
		Some(url) => url,
		None => return,
	};

	task::block_on(async {
		let stream = unique_stream();
		let broker = Arc::new(RedisBroker::new(&url, broker_config(&stream)).unwrap());
		let config = Configuration::builder()
			.max_delivery_attempts(3)
			.healthcheck_interval(Duration::from_millis(100))
			.timeout_interval(Duration::from_millis(400))
			.build()
			.unwrap();

		let attempts = Arc::new(AtomicUsize::new(0));
		let failing = failing(Arc::clone(&attempts));
		let mut registry = TaskRegistry::new();
		registry.register(&failing);

		broker.open().await.unwrap();
		let publisher = Publisher::new(Arc::clone(&broker), config.clone());
		publisher.enqueue(&failing.instance((), ())).await.unwrap();

		let worker = Arc::new(
			Worker::builder(Arc::clone(&broker), registry, config)
				.concurrency(1)
				.install_signal_handlers(false)
				.build(),
		);
		let handle = {
			let worker = Arc::clone(&worker);
			task::spawn(async move { worker.run().await })
		};

		// requeue counts 0, 1 and 2 each get one execution
		wait_until("three delivery attempts", Duration::from_secs(15), || {
			attempts.load(Ordering::SeqCst) == 3
		})
		.await;

		// the fourth delivery is dropped at the gate, never executed
		task::sleep(Duration::from_millis(1500)).await;
		assert_eq!(attempts.load(Ordering::SeqCst), 3);

		worker.stop();
		handle.await.unwrap();
		delete_stream(&url, &stream).await;
	});
}

#[test]
fn heartbeat_keeps_long_tasks_from_being_reclaimed() {
	initialize();
	let url = match redis_url() {
		Some(url) => url,
		None => return,
	};

	task::block_on(async {
		let stream = unique_stream();
		let broker = Arc::new(RedisBroker::new(&url, broker_config(&stream)).unwrap());
		let config = Configuration::builder()
			.max_delivery_attempts(3)
			.healthcheck_interval(Duration::from_millis(100))
			.timeout_interval(Duration::from_millis(500))
			.build()
			.unwrap();

		let invoked = Arc::new(AtomicUsize::new(0));
		let completed = Arc::new(AtomicUsize::new(0));
		let slow = {
			let invoked = Arc::clone(&invoked);
			let completed = Arc::clone(&completed);
			TaskDefinition::<(), (), ()>::new("slow", move |_: (), _: (), _ctx: TaskContext| {
				let invoked = Arc::clone(&invoked);
				let completed = Arc::clone(&completed);
				async move {
					invoked.fetch_add(1, Ordering::SeqCst);
					// several timeout intervals long; only the heartbeat
					// keeps this delivery alive
					task::sleep(Duration::from_millis(2000)).await;
					completed.fetch_add(1, Ordering::SeqCst);
					Ok::<_, PerformError>(())
				}
			})
		};
		let mut registry = TaskRegistry::new();
		registry.register(&slow);

		broker.open().await.unwrap();
		let publisher = Publisher::new(Arc::clone(&broker), config.clone());
		publisher.enqueue(&slow.instance((), ())).await.unwrap();

		let worker = Arc::new(
			Worker::builder(Arc::clone(&broker), registry, config)
				.concurrency(1)
				.install_signal_handlers(false)
				.build(),
		);
		let handle = {
			let worker = Arc::clone(&worker);
			task::spawn(async move { worker.run().await })
		};

		wait_until("the slow task to finish", Duration::from_secs(15), || {
			completed.load(Ordering::SeqCst) == 1
		})
		.await;

		// no reclamation happened during execution and none happens after
		// the ack
		task::sleep(Duration::from_millis(1200)).await;
		assert_eq!(invoked.load(Ordering::SeqCst), 1);
		assert_eq!(completed.load(Ordering::SeqCst), 1);

		worker.stop();
		handle.await.unwrap();
		delete_stream(&url, &stream).await;
	});
}
