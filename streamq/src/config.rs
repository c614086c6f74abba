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

use std::{sync::Arc, time::Duration};

use crate::{error::ConfigError, serialization::SerializationRegistry};

/// Shared, immutable queue configuration. Publisher, worker and broker all
/// read the same instance; cloning is cheap.
#[derive(Clone)]
pub struct Configuration {
	max_delivery_attempts: u32,
	healthcheck_interval: Duration,
	timeout_interval: Duration,
	serialization: Arc<SerializationRegistry>,
}

impl Configuration {
	pub fn builder() -> ConfigurationBuilder {
		ConfigurationBuilder::default()
	}

	/// Number of deliveries a task may consume before it is dropped as a
	/// poison pill. A task is executed with requeue counts `0..attempts`.
	pub fn max_delivery_attempts(&self) -> u32 {
		self.max_delivery_attempts
	}

	/// How often the worker refreshes the broker-side idle timer of its
	/// in-flight tasks.
	pub fn healthcheck_interval(&self) -> Duration {
		self.healthcheck_interval
	}

	/// Idle time after which the broker considers an in-flight task
	/// abandoned and reclaims it for redelivery.
	pub fn timeout_interval(&self) -> Duration {
		self.timeout_interval
	}

	pub fn serialization(&self) -> &Arc<SerializationRegistry> {
		&self.serialization
	}
}

/// Builder pattern struct for [`Configuration`].
pub struct ConfigurationBuilder {
	max_delivery_attempts: u32,
	healthcheck_interval: Duration,
	timeout_interval: Duration,
	serialization: SerializationRegistry,
}

impl Default for ConfigurationBuilder {
	fn default() -> Self {
		Self {
			max_delivery_attempts: 3,
			healthcheck_interval: Duration::from_secs(5),
			timeout_interval: Duration::from_secs(30),
			serialization: SerializationRegistry::default(),
		}
	}
}

impl ConfigurationBuilder {
	pub fn max_delivery_attempts(mut self, attempts: u32) -> Self {
		self.max_delivery_attempts = attempts;
		self
	}

	pub fn healthcheck_interval(mut self, interval: Duration) -> Self {
		self.healthcheck_interval = interval;
		self
	}

	pub fn timeout_interval(mut self, interval: Duration) -> Self {
		self.timeout_interval = interval;
		self
	}

	pub fn serialization(mut self, registry: SerializationRegistry) -> Self {
		self.serialization = registry;
		self
	}

	pub fn build(self) -> Result<Configuration, ConfigError> {
		if self.healthcheck_interval >= self.timeout_interval {
			return Err(ConfigError::HealthcheckNotBelowTimeout {
				healthcheck: self.healthcheck_interval,
				timeout: self.timeout_interval,
			});
		}
		Ok(Configuration {
			max_delivery_attempts: self.max_delivery_attempts,
			healthcheck_interval: self.healthcheck_interval,
			timeout_interval: self.timeout_interval,
			serialization: Arc::new(self.serialization),
		})
	}
}
