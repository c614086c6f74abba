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

use std::{
	collections::HashMap,
	sync::Mutex,
};

use crate::error::PerformError;

/// Write-only sink for task return values. `set` is called at most once
/// per terminal execution, after the task has been acked; failures are
/// logged by the worker and never affect acknowledgement.
#[async_trait::async_trait]
pub trait ResultBackend: Send + Sync + 'static {
	async fn set(&self, task_id: &str, value: Vec<u8>) -> Result<(), PerformError>;
}

/// Keeps results in a process-local map. Suitable for tests and
/// single-process deployments.
#[derive(Default)]
pub struct InMemoryResultBackend {
	values: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryResultBackend {
	pub fn new() -> Self {
		Default::default()
	}

	pub fn get(&self, task_id: &str) -> Option<Vec<u8>> {
		self.values.lock().expect("result lock poisoned").get(task_id).cloned()
	}

	pub fn len(&self) -> usize {
		self.values.lock().expect("result lock poisoned").len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[async_trait::async_trait]
impl ResultBackend for InMemoryResultBackend {
	async fn set(&self, task_id: &str, value: Vec<u8>) -> Result<(), PerformError> {
		self.values.lock().expect("result lock poisoned").insert(task_id.to_string(), value);
		Ok(())
	}
}
