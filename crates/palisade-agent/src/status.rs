// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Status fan-out to local observers.
//!
//! Each observer owns a bounded queue. Publishing never blocks: an observer
//! whose queue is full misses that update while every other observer still
//! receives it.

use palisade_common::AgentStatus;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error};

struct Observers {
	current: AgentStatus,
	queues: HashMap<u64, mpsc::Sender<AgentStatus>>,
	next_id: u64,
	capacity: usize,
}

#[derive(Clone)]
pub struct StatusBroadcaster {
	inner: Arc<Mutex<Observers>>,
}

impl StatusBroadcaster {
	pub fn new(capacity: usize) -> Self {
		Self {
			inner: Arc::new(Mutex::new(Observers {
				current: AgentStatus::default(),
				queues: HashMap::new(),
				next_id: 1,
				capacity: capacity.max(1),
			})),
		}
	}

	/// New observer; its queue already holds the current status.
	pub fn subscribe(&self) -> StatusSubscription {
		let mut inner = self.inner.lock();
		let (tx, rx) = mpsc::channel(inner.capacity);
		// fresh queue with capacity >= 1, cannot be full
		let _ = tx.try_send(inner.current.clone());

		let id = inner.next_id;
		inner.next_id += 1;
		inner.queues.insert(id, tx);
		debug!(observer = id, "status observer subscribed");

		StatusSubscription {
			id,
			rx,
			broadcaster: self.clone(),
		}
	}

	pub fn current(&self) -> AgentStatus {
		self.inner.lock().current.clone()
	}

	pub fn observers(&self) -> usize {
		self.inner.lock().queues.len()
	}

	pub fn publish(&self, status: AgentStatus) {
		let mut inner = self.inner.lock();
		inner.current = status.clone();

		let mut closed = Vec::new();
		for (id, tx) in &inner.queues {
			match tx.try_send(status.clone()) {
				Ok(()) => {}
				Err(TrySendError::Full(_)) => {
					error!(observer = id, state = %status.connection_state, "BUG: status observer queue full, update dropped");
				}
				Err(TrySendError::Closed(_)) => closed.push(*id),
			}
		}
		for id in closed {
			inner.queues.remove(&id);
			debug!(observer = id, "removed closed status observer");
		}
	}

	fn unsubscribe(&self, id: u64) {
		if self.inner.lock().queues.remove(&id).is_some() {
			debug!(observer = id, "status observer unsubscribed");
		}
	}
}

/// Read side of one observer. Dropping it unsubscribes.
pub struct StatusSubscription {
	id: u64,
	rx: mpsc::Receiver<AgentStatus>,
	broadcaster: StatusBroadcaster,
}

impl StatusSubscription {
	pub fn id(&self) -> u64 {
		self.id
	}

	pub async fn recv(&mut self) -> Option<AgentStatus> {
		self.rx.recv().await
	}

	pub fn try_recv(&mut self) -> Option<AgentStatus> {
		self.rx.try_recv().ok()
	}

	/// Removes the queue; statuses already queued can still be drained.
	pub fn unsubscribe(&mut self) {
		self.broadcaster.unsubscribe(self.id);
	}
}

impl Drop for StatusSubscription {
	fn drop(&mut self) {
		self.broadcaster.unsubscribe(self.id);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use palisade_common::AgentState;

	fn status(state: AgentState) -> AgentStatus {
		AgentStatus::new(state)
	}

	#[test]
	fn subscription_starts_with_current_status() {
		let broadcaster = StatusBroadcaster::new(4);
		broadcaster.publish(status(AgentState::Authenticating));

		let mut sub = broadcaster.subscribe();
		assert_eq!(
			sub.try_recv().map(|s| s.connection_state),
			Some(AgentState::Authenticating)
		);
		assert!(sub.try_recv().is_none());
	}

	#[test]
	fn full_observer_drops_without_affecting_others() {
		let broadcaster = StatusBroadcaster::new(2);
		let mut slow = broadcaster.subscribe();
		let mut fast = broadcaster.subscribe();
		assert!(fast.try_recv().is_some());

		broadcaster.publish(status(AgentState::Authenticating));
		assert!(fast.try_recv().is_some());
		// slow holds the initial status plus this one and is now full
		broadcaster.publish(status(AgentState::Bootstrapping));
		assert!(fast.try_recv().is_some());

		let received: Vec<_> = std::iter::from_fn(|| slow.try_recv())
			.map(|s| s.connection_state)
			.collect();
		assert_eq!(
			received,
			[AgentState::Disconnected, AgentState::Authenticating]
		);
		assert_eq!(broadcaster.current().connection_state, AgentState::Bootstrapping);
	}

	#[test]
	fn order_is_preserved_per_observer() {
		let broadcaster = StatusBroadcaster::new(16);
		let mut sub = broadcaster.subscribe();
		let produced = [
			AgentState::Authenticating,
			AgentState::Bootstrapping,
			AgentState::Connected,
			AgentState::Disconnected,
		];
		for state in produced {
			broadcaster.publish(status(state));
		}

		let received: Vec<_> = std::iter::from_fn(|| sub.try_recv())
			.skip(1)
			.map(|s| s.connection_state)
			.collect();
		assert_eq!(received, produced);
	}

	#[tokio::test]
	async fn unsubscribe_closes_queue() {
		let broadcaster = StatusBroadcaster::new(4);
		let mut sub = broadcaster.subscribe();
		assert_eq!(broadcaster.observers(), 1);

		sub.unsubscribe();
		assert_eq!(broadcaster.observers(), 0);
		broadcaster.publish(status(AgentState::Connected));

		assert!(sub.recv().await.is_some());
		assert!(sub.recv().await.is_none());

		let other = broadcaster.subscribe();
		drop(other);
		assert_eq!(broadcaster.observers(), 0);
	}
}
