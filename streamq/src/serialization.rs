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

//! The wire form of a task invocation and the per-argument codec selection.
//!
//! Every argument of a task travels as an independent `(backend id, bytes)`
//! pair, so a single task may mix plain JSON-encoded primitives with domain
//! types that carry their own codec.

use std::{
	any::{Any, TypeId},
	collections::BTreeMap,
	sync::Arc,
};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::{
	error::{CodecError, DecodeError, SerializeError},
	task::{TaskArgs, TaskInstance, TaskKwargs},
};

/// Backend id of the built-in JSON codec, the default used for every value
/// no registered backend claims. Reserved; custom backends must pick
/// another id.
pub const JSON_BACKEND_ID: &str = "json";

/// A value encoded for transport: backend id followed by the opaque payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedValue(pub String, pub Vec<u8>);

impl EncodedValue {
	pub fn backend(&self) -> &str {
		&self.0
	}

	pub fn payload(&self) -> &[u8] {
		&self.1
	}
}

/// The broker-agnostic wire unit: one serialized task invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
	pub id: String,
	pub task_name: String,
	/// 0 at first enqueue, incremented exactly once per reclamation.
	#[serde(default)]
	pub requeue_count: u32,
	pub enqueue_time: DateTime<Utc>,
	pub args: Vec<EncodedValue>,
	pub kwargs: BTreeMap<String, EncodedValue>,
}

/// A codec for argument values of specific concrete types.
///
/// Backends claim values through [`serializable`](Self::serializable) by
/// downcasting; the registry asks each backend in registration order and
/// the first claimant wins. Values nobody claims fall through to the JSON
/// default, which is the only codec able to encode arbitrary `Serialize`
/// types.
pub trait SerializationBackend: Send + Sync {
	/// Stable identifier stored next to every payload this backend encodes.
	fn id(&self) -> &str;

	/// Can this backend encode `value`?
	fn serializable(&self, value: &dyn Any) -> bool;

	fn serialize(&self, value: &dyn Any) -> Result<Vec<u8>, CodecError>;

	/// Decode `bytes` into a value of the `expected` type. Returning a
	/// value of any other type is reported as [`DecodeError::WrongType`].
	fn deserialize(&self, bytes: &[u8], expected: TypeId) -> Result<Box<dyn Any + Send>, CodecError>;
}

/// Ordered collection of serialization backends plus the JSON default.
#[derive(Default)]
pub struct SerializationRegistry {
	backends: Vec<Arc<dyn SerializationBackend>>,
}

impl SerializationRegistry {
	/// Append a backend. Registration order is selection order.
	pub fn with_backend(mut self, backend: Arc<dyn SerializationBackend>) -> Self {
		debug_assert!(backend.id() != JSON_BACKEND_ID, "`json` is reserved for the default codec");
		self.backends.push(backend);
		self
	}

	fn backend(&self, id: &str) -> Option<&Arc<dyn SerializationBackend>> {
		self.backends.iter().find(|backend| backend.id() == id)
	}

	/// Encode one value: first registered backend claiming it wins,
	/// JSON default last. Fails only if the chosen codec fails.
	pub fn serialize_value<T: Serialize + Any>(
		&self,
		value: &T,
	) -> Result<EncodedValue, SerializeError> {
		for backend in &self.backends {
			if backend.serializable(value) {
				let payload = backend.serialize(value).map_err(|reason| {
					SerializeError::Backend { backend: backend.id().to_string(), reason }
				})?;
				return Ok(EncodedValue(backend.id().to_string(), payload));
			}
		}
		Ok(EncodedValue(JSON_BACKEND_ID.to_string(), serde_json::to_vec(value)?))
	}

	/// Decode one value with the backend named by the record.
	pub fn deserialize_value<T: DeserializeOwned + Any>(
		&self,
		value: &EncodedValue,
	) -> Result<T, DecodeError> {
		let EncodedValue(backend_id, payload) = value;
		if backend_id == JSON_BACKEND_ID {
			return Ok(serde_json::from_slice(payload)?);
		}
		let backend = self
			.backend(backend_id)
			.ok_or_else(|| DecodeError::UnknownBackend(backend_id.clone()))?;
		let decoded = backend
			.deserialize(payload, TypeId::of::<T>())
			.map_err(|reason| DecodeError::Backend { backend: backend_id.clone(), reason })?;
		decoded
			.downcast::<T>()
			.map(|boxed| *boxed)
			.map_err(|_| DecodeError::WrongType { backend: backend_id.clone() })
	}
}

/// Turn a task instance into its wire record: fresh UUID, current UTC
/// timestamp, every positional and keyword argument encoded independently.
pub fn serialize_task<A: TaskArgs, K: TaskKwargs>(
	instance: &TaskInstance<A, K>,
	registry: &SerializationRegistry,
) -> Result<TaskRecord, SerializeError> {
	Ok(TaskRecord {
		id: Uuid::new_v4().to_string(),
		task_name: instance.task_name().to_string(),
		requeue_count: 0,
		enqueue_time: Utc::now(),
		args: instance.args().encode(registry)?,
		kwargs: instance.kwargs().encode(registry)?,
	})
}

/// Decode a record back into typed arguments. Strict: the positional
/// argument count must match the declared arity, and keyword arguments
/// must match by name exactly.
pub fn deserialize_task<A: TaskArgs, K: TaskKwargs>(
	record: &TaskRecord,
	registry: &SerializationRegistry,
) -> Result<(A, K), DecodeError> {
	let args = A::decode(&record.args, registry)?;
	let kwargs = K::decode(&record.kwargs, registry)?;
	Ok((args, kwargs))
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::task_kwargs;

	#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
	struct Tag(u8);

	/// Claims `Tag` values only, encoding them as a single raw byte.
	struct TagBackend;

	impl SerializationBackend for TagBackend {
		fn id(&self) -> &str {
			"tag"
		}

		fn serializable(&self, value: &dyn Any) -> bool {
			value.is::<Tag>()
		}

		fn serialize(&self, value: &dyn Any) -> Result<Vec<u8>, CodecError> {
			let tag = value.downcast_ref::<Tag>().ok_or("not a tag")?;
			Ok(vec![tag.0])
		}

		fn deserialize(
			&self,
			bytes: &[u8],
			expected: TypeId,
		) -> Result<Box<dyn Any + Send>, CodecError> {
			if expected != TypeId::of::<Tag>() {
				return Err("tag backend only decodes tags".into());
			}
			let byte = bytes.first().ok_or("empty payload")?;
			Ok(Box::new(Tag(*byte)))
		}
	}

	fn registry() -> SerializationRegistry {
		SerializationRegistry::default().with_backend(Arc::new(TagBackend))
	}

	task_kwargs! {
		#[derive(Clone, Debug, PartialEq)]
		struct Extras {
			label: String,
			priority: u8,
		}
	}

	#[test]
	fn values_round_trip_through_the_default_codec() {
		let registry = SerializationRegistry::default();
		let encoded = registry.serialize_value(&42u64).unwrap();
		assert_eq!(encoded.backend(), JSON_BACKEND_ID);
		let decoded: u64 = registry.deserialize_value(&encoded).unwrap();
		assert_eq!(decoded, 42);
	}

	#[test]
	fn first_claiming_backend_wins() {
		let registry = registry();

		let encoded = registry.serialize_value(&Tag(7)).unwrap();
		assert_eq!(encoded.backend(), "tag");
		assert_eq!(encoded.payload(), &[7]);
		let decoded: Tag = registry.deserialize_value(&encoded).unwrap();
		assert_eq!(decoded, Tag(7));

		// unclaimed values fall through to the default
		let encoded = registry.serialize_value(&"seven".to_string()).unwrap();
		assert_eq!(encoded.backend(), JSON_BACKEND_ID);
	}

	#[test]
	fn unknown_backend_is_an_error() {
		let registry = SerializationRegistry::default();
		let encoded = EncodedValue("tag".to_string(), vec![7]);
		let result: Result<Tag, _> = registry.deserialize_value(&encoded);
		assert!(matches!(result, Err(DecodeError::UnknownBackend(id)) if id == "tag"));
	}

	#[test]
	fn positional_arity_is_strict() {
		let registry = SerializationRegistry::default();
		let values = vec![registry.serialize_value(&1u8).unwrap()];
		let result = <(u8, u8)>::decode(&values, &registry);
		assert!(matches!(
			result,
			Err(DecodeError::ArgumentCount { expected: 2, actual: 1 })
		));
	}

	#[test]
	fn kwargs_round_trip_and_reject_unknown_names() {
		let registry = SerializationRegistry::default();
		let extras = Extras { label: "fast".to_string(), priority: 3 };
		let encoded = extras.encode(&registry).unwrap();
		let decoded = Extras::decode(&encoded, &registry).unwrap();
		assert_eq!(decoded, extras);

		let mut with_stray = encoded.clone();
		with_stray.insert("stray".to_string(), registry.serialize_value(&0u8).unwrap());
		let result = Extras::decode(&with_stray, &registry);
		assert!(matches!(result, Err(DecodeError::UnexpectedKwarg(name)) if name == "stray"));

		let mut missing = encoded;
		missing.remove("label");
		let result = Extras::decode(&missing, &registry);
		assert!(matches!(result, Err(DecodeError::MissingKwarg(name)) if name == "label"));
	}

	#[test]
	fn records_survive_the_wire_format() {
		let registry = registry();
		let record = TaskRecord {
			id: Uuid::new_v4().to_string(),
			task_name: "observe".to_string(),
			requeue_count: 2,
			enqueue_time: Utc::now(),
			args: vec![
				registry.serialize_value(&Tag(1)).unwrap(),
				registry.serialize_value(&"two".to_string()).unwrap(),
			],
			kwargs: BTreeMap::new(),
		};

		let bytes = serde_json::to_vec(&record).unwrap();
		let decoded: TaskRecord = serde_json::from_slice(&bytes).unwrap();
		assert_eq!(decoded, record);

		// requeue_count defaults to zero when absent
		let json = serde_json::json!({
			"id": record.id,
			"task_name": record.task_name,
			"enqueue_time": record.enqueue_time,
			"args": [],
			"kwargs": {},
		});
		let decoded: TaskRecord = serde_json::from_value(json).unwrap();
		assert_eq!(decoded.requeue_count, 0);
	}
}
