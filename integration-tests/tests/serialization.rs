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

//! Publisher-to-broker wire checks: what a worker would read back matches
//! what was enqueued, including per-argument codec selection.

use std::{
	any::{Any, TypeId},
	sync::Arc,
	time::Duration,
};

use async_std::task;
use serde::{Deserialize, Serialize};
use streamq::{
	deserialize_task, Broker, CodecError, Configuration, InMemoryBroker, PerformError, Publisher,
	SerializationBackend, SerializationRegistry, TaskContext, TaskDefinition, JSON_BACKEND_ID,
};

use crate::initialize;

/// A domain type with its own codec: stored as a single little-endian u32.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
struct Pixel(u32);

struct PixelBackend;

impl SerializationBackend for PixelBackend {
	fn id(&self) -> &str {
		"pixel"
	}

	fn serializable(&self, value: &dyn Any) -> bool {
		value.is::<Pixel>()
	}

	fn serialize(&self, value: &dyn Any) -> Result<Vec<u8>, CodecError> {
		let pixel = value.downcast_ref::<Pixel>().ok_or("not a pixel")?;
		Ok(pixel.0.to_le_bytes().to_vec())
	}

	fn deserialize(&self, bytes: &[u8], expected: TypeId) -> Result<Box<dyn Any + Send>, CodecError> {
		if expected != TypeId::of::<Pixel>() {
			return Err("pixel backend only decodes pixels".into());
		}
		let bytes: [u8; 4] = bytes.try_into().map_err(|_| "expected four bytes")?;
		Ok(Box::new(Pixel(u32::from_le_bytes(bytes))))
	}
}

fn configuration() -> Configuration {
	Configuration::builder()
		.healthcheck_interval(Duration::from_millis(50))
		.timeout_interval(Duration::from_secs(10))
		.serialization(SerializationRegistry::default().with_backend(Arc::new(PixelBackend)))
		.build()
		.unwrap()
}

fn blend() -> TaskDefinition<(Pixel, u8), (), ()> {
	TaskDefinition::new("blend", |_: (Pixel, u8), _: (), _ctx: TaskContext| async move {
		Ok::<_, PerformError>(())
	})
}

#[test]
fn enqueued_records_carry_the_task_name_and_fresh_ids() {
	initialize();
	task::block_on(async {
		let broker = Arc::new(InMemoryBroker::new(32));
		let config = configuration();
		let publisher = Publisher::new(Arc::clone(&broker), config.clone());

		let blend = blend();
		let mut published = Vec::new();
		for i in 0..10u32 {
			published.push(
				publisher.enqueue(&blend.instance((Pixel(i), i as u8), ())).await.unwrap(),
			);
		}

		for expected_id in &published {
			let mut batch = broker.read().await.unwrap();
			let task = batch.pop().unwrap();
			assert_eq!(task.record.task_name, "blend");
			assert_eq!(&task.record.id, expected_id);
		}

		published.sort();
		published.dedup();
		assert_eq!(published.len(), 10);
	});
}

#[test]
fn each_argument_selects_its_own_codec() {
	initialize();
	task::block_on(async {
		let broker = Arc::new(InMemoryBroker::new(16));
		let config = configuration();
		let publisher = Publisher::new(Arc::clone(&broker), config.clone());

		let blend = blend();
		publisher.enqueue(&blend.instance((Pixel(7), 2), ())).await.unwrap();

		let mut batch = broker.read().await.unwrap();
		let task = batch.pop().unwrap();
		assert_eq!(task.record.task_name, "blend");
		assert_eq!(task.record.requeue_count, 0);

		// the claimed type went through the custom codec, the rest through
		// the default
		assert_eq!(task.record.args[0].backend(), "pixel");
		assert_eq!(task.record.args[1].backend(), JSON_BACKEND_ID);

		let (args, _kwargs): ((Pixel, u8), ()) =
			deserialize_task(&task.record, config.serialization()).unwrap();
		assert_eq!(args, (Pixel(7), 2));
	});
}
