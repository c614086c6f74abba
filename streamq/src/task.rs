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

//! Typed task declarations.
//!
//! A [`TaskDefinition`] pairs a name with an async handler over a tuple of
//! positional arguments and an optional keyword-argument struct. Injected
//! capabilities (the [`Publisher`] being the canonical one) are declared at
//! definition time and validated once when the worker starts, so dispatch
//! never has to inspect the handler.

use std::{
	any::{type_name, Any, TypeId},
	collections::{BTreeMap, HashMap},
	fmt,
	future::Future,
	sync::Arc,
};

use futures::{future::BoxFuture, FutureExt};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
	error::{DecodeError, PerformError, SerializeError},
	publisher::Publisher,
	serialization::{EncodedValue, SerializationRegistry, TaskRecord},
};

/// In-flight envelope pairing a [`TaskRecord`] with broker-private
/// positional metadata. `M` is opaque to the worker runtime.
#[derive(Clone, Debug)]
pub struct BrokerTask<M> {
	pub record: TaskRecord,
	pub meta: M,
}

/// A value that can travel as a task argument.
pub trait TaskValue: Serialize + DeserializeOwned + Any + Send {}

impl<T> TaskValue for T where T: Serialize + DeserializeOwned + Any + Send {}

/// The positional arguments of a task, encoded one
/// [`EncodedValue`] per element. Implemented for tuples up to arity 8.
pub trait TaskArgs: Send + Sized + 'static {
	const ARITY: usize;

	fn encode(&self, registry: &SerializationRegistry) -> Result<Vec<EncodedValue>, SerializeError>;

	fn decode(
		values: &[EncodedValue],
		registry: &SerializationRegistry,
	) -> Result<Self, DecodeError>;
}

impl TaskArgs for () {
	const ARITY: usize = 0;

	fn encode(&self, _: &SerializationRegistry) -> Result<Vec<EncodedValue>, SerializeError> {
		Ok(Vec::new())
	}

	fn decode(values: &[EncodedValue], _: &SerializationRegistry) -> Result<Self, DecodeError> {
		if !values.is_empty() {
			return Err(DecodeError::ArgumentCount { expected: 0, actual: values.len() });
		}
		Ok(())
	}
}

macro_rules! impl_task_args {
	($arity:expr; $($ty:ident : $idx:tt),+) => {
		impl<$($ty: TaskValue),+> TaskArgs for ($($ty,)+) {
			const ARITY: usize = $arity;

			fn encode(
				&self,
				registry: &SerializationRegistry,
			) -> Result<Vec<EncodedValue>, SerializeError> {
				Ok(vec![$(registry.serialize_value(&self.$idx)?),+])
			}

			fn decode(
				values: &[EncodedValue],
				registry: &SerializationRegistry,
			) -> Result<Self, DecodeError> {
				if values.len() != Self::ARITY {
					return Err(DecodeError::ArgumentCount {
						expected: Self::ARITY,
						actual: values.len(),
					});
				}
				Ok(($(registry.deserialize_value::<$ty>(&values[$idx])?,)+))
			}
		}
	};
}

impl_task_args!(1; A0:0);
impl_task_args!(2; A0:0, A1:1);
impl_task_args!(3; A0:0, A1:1, A2:2);
impl_task_args!(4; A0:0, A1:1, A2:2, A3:3);
impl_task_args!(5; A0:0, A1:1, A2:2, A3:3, A4:4);
impl_task_args!(6; A0:0, A1:1, A2:2, A3:3, A4:4, A5:5);
impl_task_args!(7; A0:0, A1:1, A2:2, A3:3, A4:4, A5:5, A6:6);
impl_task_args!(8; A0:0, A1:1, A2:2, A3:3, A4:4, A5:5, A6:6, A7:7);

/// The keyword arguments of a task, encoded independently and keyed by
/// name. `()` means the task takes none; use [`task_kwargs!`] to declare a
/// named set.
pub trait TaskKwargs: Send + Sized + 'static {
	fn encode(
		&self,
		registry: &SerializationRegistry,
	) -> Result<BTreeMap<String, EncodedValue>, SerializeError>;

	fn decode(
		values: &BTreeMap<String, EncodedValue>,
		registry: &SerializationRegistry,
	) -> Result<Self, DecodeError>;
}

impl TaskKwargs for () {
	fn encode(
		&self,
		_: &SerializationRegistry,
	) -> Result<BTreeMap<String, EncodedValue>, SerializeError> {
		Ok(BTreeMap::new())
	}

	fn decode(
		values: &BTreeMap<String, EncodedValue>,
		_: &SerializationRegistry,
	) -> Result<Self, DecodeError> {
		if let Some(name) = values.keys().next() {
			return Err(DecodeError::UnexpectedKwarg(name.clone()));
		}
		Ok(())
	}
}

/// Declare a keyword-argument struct for a task.
///
/// ```ignore
/// streamq::task_kwargs! {
/// 	struct ResizeOpts {
/// 		width: u32,
/// 		keep_aspect: bool,
/// 	}
/// }
/// ```
#[macro_export]
macro_rules! task_kwargs {
	(
		$(#[$meta:meta])*
		$vis:vis struct $name:ident {
			$($(#[$fmeta:meta])* $fvis:vis $field:ident : $ty:ty),* $(,)?
		}
	) => {
		$(#[$meta])*
		$vis struct $name {
			$($(#[$fmeta])* $fvis $field: $ty,)*
		}

		impl $crate::TaskKwargs for $name {
			fn encode(
				&self,
				registry: &$crate::SerializationRegistry,
			) -> Result<
				::std::collections::BTreeMap<::std::string::String, $crate::EncodedValue>,
				$crate::SerializeError,
			> {
				let mut map = ::std::collections::BTreeMap::new();
				$(
					map.insert(
						::std::stringify!($field).to_string(),
						registry.serialize_value(&self.$field)?,
					);
				)*
				Ok(map)
			}

			fn decode(
				values: &::std::collections::BTreeMap<::std::string::String, $crate::EncodedValue>,
				registry: &$crate::SerializationRegistry,
			) -> Result<Self, $crate::DecodeError> {
				for name in values.keys() {
					match name.as_str() {
						$(::std::stringify!($field) => {})*
						other => {
							return Err($crate::DecodeError::UnexpectedKwarg(other.to_string()))
						}
					}
				}
				$(
					let $field = registry.deserialize_value::<$ty>(
						values.get(::std::stringify!($field)).ok_or_else(|| {
							$crate::DecodeError::MissingKwarg(::std::stringify!($field).to_string())
						})?,
					)?;
				)*
				Ok(Self { $($field,)* })
			}
		}
	};
}

/// A value the worker can hand to task handlers at call time.
pub trait Injectable: Any + Clone + Send + Sync {}

impl<T> Injectable for T where T: Any + Clone + Send + Sync {}

/// An injectable capability declared by a task definition.
#[derive(Clone, Copy)]
pub struct Capability {
	pub(crate) id: TypeId,
	pub(crate) name: &'static str,
}

impl Capability {
	pub fn of<T: Injectable>() -> Self {
		Self { id: TypeId::of::<T>(), name: type_name::<T>() }
	}
}

impl fmt::Debug for Capability {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Capability").field(&self.name).finish()
	}
}

/// The set of capabilities a worker provides to its tasks, keyed by type.
#[derive(Clone, Default)]
pub struct CapabilitySet {
	inner: Arc<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl CapabilitySet {
	pub(crate) fn new(inner: HashMap<TypeId, Box<dyn Any + Send + Sync>>) -> Self {
		Self { inner: Arc::new(inner) }
	}

	pub(crate) fn contains(&self, id: TypeId) -> bool {
		self.inner.contains_key(&id)
	}

	pub fn get<T: Injectable>(&self) -> Option<T> {
		self.inner.get(&TypeId::of::<T>()).and_then(|value| value.downcast_ref::<T>()).cloned()
	}
}

/// Ambient parameters handed to every task invocation.
pub struct TaskContext {
	capabilities: CapabilitySet,
}

impl TaskContext {
	pub(crate) fn new(capabilities: CapabilitySet) -> Self {
		Self { capabilities }
	}

	/// Fetch an injected capability declared on the task definition.
	pub fn get<T: Injectable>(&self) -> Result<T, PerformError> {
		self.capabilities
			.get::<T>()
			.ok_or_else(|| format!("capability `{}` was not provided", type_name::<T>()).into())
	}

	/// The queue publisher, for tasks that enqueue follow-on tasks.
	pub fn publisher(&self) -> Result<Publisher, PerformError> {
		self.get()
	}
}

/// The async callable behind a task definition.
///
/// Implemented for every `Fn(A, K, TaskContext) -> Future` returning
/// `Result<R, PerformError>`, so plain async closures register directly.
pub trait TaskHandler<A, K>: Send + Sync + 'static {
	type Output: Serialize + Send + 'static;

	fn call(
		&self,
		args: A,
		kwargs: K,
		ctx: TaskContext,
	) -> BoxFuture<'static, Result<Self::Output, PerformError>>;
}

impl<F, Fut, A, K, R> TaskHandler<A, K> for F
where
	F: Fn(A, K, TaskContext) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<R, PerformError>> + Send + 'static,
	A: Send + 'static,
	K: Send + 'static,
	R: Serialize + Send + 'static,
{
	type Output = R;

	fn call(
		&self,
		args: A,
		kwargs: K,
		ctx: TaskContext,
	) -> BoxFuture<'static, Result<R, PerformError>> {
		(self)(args, kwargs, ctx).boxed()
	}
}

/// A named task: handler plus declared argument shape and capabilities.
/// Created once at startup, immutable afterwards.
pub struct TaskDefinition<A, K, R>
where
	A: TaskArgs,
	K: TaskKwargs,
	R: Serialize + Send + 'static,
{
	name: &'static str,
	handler: Arc<dyn TaskHandler<A, K, Output = R>>,
	capabilities: Vec<Capability>,
}

impl<A, K, R> Clone for TaskDefinition<A, K, R>
where
	A: TaskArgs,
	K: TaskKwargs,
	R: Serialize + Send + 'static,
{
	fn clone(&self) -> Self {
		Self {
			name: self.name,
			handler: Arc::clone(&self.handler),
			capabilities: self.capabilities.clone(),
		}
	}
}

impl<A, K, R> TaskDefinition<A, K, R>
where
	A: TaskArgs,
	K: TaskKwargs,
	R: Serialize + Send + 'static,
{
	pub fn new<H>(name: &'static str, handler: H) -> Self
	where
		H: TaskHandler<A, K, Output = R>,
	{
		Self { name, handler: Arc::new(handler), capabilities: Vec::new() }
	}

	/// Declare an injectable capability the handler will fetch from its
	/// [`TaskContext`]. Validated against the worker's capability set when
	/// the worker starts.
	pub fn inject<T: Injectable>(mut self) -> Self {
		self.capabilities.push(Capability::of::<T>());
		self
	}

	pub fn name(&self) -> &'static str {
		self.name
	}

	/// Bind arguments, producing an instance ready for publication.
	pub fn instance(&self, args: A, kwargs: K) -> TaskInstance<A, K> {
		TaskInstance { task_name: self.name, args, kwargs }
	}

	pub(crate) fn handler(&self) -> Arc<dyn TaskHandler<A, K, Output = R>> {
		Arc::clone(&self.handler)
	}

	pub(crate) fn capabilities(&self) -> &[Capability] {
		&self.capabilities
	}
}

/// A task invocation bound to concrete argument values, not yet serialized.
pub struct TaskInstance<A, K> {
	task_name: &'static str,
	args: A,
	kwargs: K,
}

impl<A: TaskArgs, K: TaskKwargs> TaskInstance<A, K> {
	pub fn task_name(&self) -> &'static str {
		self.task_name
	}

	pub fn args(&self) -> &A {
		&self.args
	}

	pub fn kwargs(&self) -> &K {
		&self.kwargs
	}
}
