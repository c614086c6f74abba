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

//! A registry of task definitions, used to map task names to concrete
//! perform functions at runtime. Registration erases the argument types
//! behind a vtable so the worker dispatches on the record's name alone.

use std::{collections::HashMap, sync::Arc};

use futures::{future::BoxFuture, FutureExt};
use serde::Serialize;

use crate::{
	error::PerformError,
	serialization::{deserialize_task, SerializationRegistry, TaskRecord},
	task::{Capability, TaskArgs, TaskContext, TaskDefinition, TaskKwargs},
};

type PerformFuture = BoxFuture<'static, Result<Vec<u8>, PerformError>>;
type PerformFn =
	Box<dyn Fn(TaskRecord, Arc<SerializationRegistry>, TaskContext) -> PerformFuture + Send + Sync>;

pub(crate) struct RegisteredTask {
	name: &'static str,
	capabilities: Vec<Capability>,
	perform: PerformFn,
}

impl RegisteredTask {
	pub(crate) fn name(&self) -> &'static str {
		self.name
	}

	pub(crate) fn capabilities(&self) -> &[Capability] {
		&self.capabilities
	}

	/// Decode the record's arguments, run the handler and JSON-encode its
	/// result. Any failure along the way surfaces as one `PerformError`.
	pub(crate) fn perform(
		&self,
		record: TaskRecord,
		serialization: Arc<SerializationRegistry>,
		ctx: TaskContext,
	) -> PerformFuture {
		(self.perform)(record, serialization, ctx)
	}
}

/// Maps task names to their erased perform functions. Built at process
/// start; registering after a worker has started has no effect on it.
#[derive(Default)]
pub struct TaskRegistry {
	tasks: HashMap<&'static str, RegisteredTask>,
}

impl TaskRegistry {
	pub fn new() -> Self {
		Default::default()
	}

	pub fn register<A, K, R>(&mut self, task: &TaskDefinition<A, K, R>)
	where
		A: TaskArgs,
		K: TaskKwargs,
		R: Serialize + Send + 'static,
	{
		let handler = task.handler();
		let perform: PerformFn = Box::new(move |record, serialization, ctx| {
			let handler = Arc::clone(&handler);
			async move {
				let (args, kwargs) = deserialize_task::<A, K>(&record, &serialization)?;
				let result = handler.call(args, kwargs, ctx).await?;
				let payload = serde_json::to_vec(&result)?;
				Ok(payload)
			}
			.boxed()
		});
		self.tasks.insert(
			task.name(),
			RegisteredTask {
				name: task.name(),
				capabilities: task.capabilities().to_vec(),
				perform,
			},
		);
	}

	pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
		self.tasks.values().map(|task| task.name)
	}

	pub(crate) fn get(&self, name: &str) -> Option<&RegisteredTask> {
		self.tasks.get(name)
	}

	pub(crate) fn tasks(&self) -> impl Iterator<Item = &RegisteredTask> {
		self.tasks.values()
	}
}
