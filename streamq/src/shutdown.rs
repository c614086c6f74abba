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

use std::sync::{
	atomic::{AtomicBool, Ordering},
	Arc, Mutex,
};

use flume::{Receiver, Sender};

/// One-shot shutdown signal shared by every fiber of a worker.
///
/// Raising is sticky and broadcast: the sender side of an empty rendezvous
/// channel is dropped, which wakes every `wait`er at once (a disconnected
/// flume receiver resolves immediately). Safe to raise from a signal
/// handler thread.
#[derive(Clone)]
pub struct StopHandle {
	inner: Arc<Inner>,
}

struct Inner {
	raised: AtomicBool,
	guard: Mutex<Option<Sender<()>>>,
	rx: Receiver<()>,
}

impl StopHandle {
	pub fn new() -> Self {
		let (tx, rx) = flume::bounded(0);
		Self { inner: Arc::new(Inner { raised: AtomicBool::new(false), guard: Mutex::new(Some(tx)), rx }) }
	}

	/// Raise the signal. Idempotent.
	pub fn raise(&self) {
		if !self.inner.raised.swap(true, Ordering::SeqCst) {
			if let Ok(mut guard) = self.inner.guard.lock() {
				guard.take();
			}
		}
	}

	pub fn is_raised(&self) -> bool {
		self.inner.raised.load(Ordering::SeqCst)
	}

	/// Suspend until the signal is raised. Returns immediately if it
	/// already was.
	pub async fn wait(&self) {
		if self.is_raised() {
			return;
		}
		// nothing is ever sent; this resolves on disconnect
		let _ = self.inner.rx.recv_async().await;
	}
}

impl Default for StopHandle {
	fn default() -> Self {
		Self::new()
	}
}
