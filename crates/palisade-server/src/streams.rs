// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Keyed set of live push channels.
//!
//! Every entry carries a registration id. Removal only succeeds for the
//! holder of the current id, so a stale subscriber shutting down late cannot
//! evict the one that replaced it. Lookup and send happen under the same lock.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Identity of one registration, returned to the subscriber that made it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(u64);

impl StreamHandle {
	pub fn id(&self) -> u64 {
		self.0
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendFailure {
	NotRegistered,
	Full,
	/// The receiver was dropped; the entry has been removed.
	Closed,
}

struct Entry<T> {
	handle: StreamHandle,
	tx: mpsc::Sender<T>,
}

pub(crate) struct StreamSet<K, T> {
	entries: Mutex<HashMap<K, Entry<T>>>,
	next_id: AtomicU64,
}

impl<K, T> StreamSet<K, T>
where
	K: Eq + Hash + Clone,
{
	pub(crate) fn new() -> Self {
		Self {
			entries: Mutex::new(HashMap::new()),
			next_id: AtomicU64::new(1),
		}
	}

	fn next_handle(&self) -> StreamHandle {
		StreamHandle(self.next_id.fetch_add(1, Ordering::Relaxed))
	}

	/// Installs `tx`, replacing any current entry. Returns the new handle and
	/// whether something was replaced.
	pub(crate) fn insert(&self, key: K, tx: mpsc::Sender<T>) -> (StreamHandle, bool) {
		let handle = self.next_handle();
		let replaced = self
			.entries
			.lock()
			.insert(key, Entry { handle, tx })
			.is_some();
		(handle, replaced)
	}

	/// Installs `tx` only if no live entry exists. An entry whose receiver is
	/// gone counts as vacant.
	pub(crate) fn insert_if_vacant(&self, key: K, tx: mpsc::Sender<T>) -> Option<StreamHandle> {
		let mut entries = self.entries.lock();
		if entries.get(&key).is_some_and(|e| !e.tx.is_closed()) {
			return None;
		}
		let handle = self.next_handle();
		entries.insert(key, Entry { handle, tx });
		Some(handle)
	}

	/// Compare-and-delete: removes the entry only if it is still `handle`'s.
	pub(crate) fn remove_if_current(&self, key: &K, handle: StreamHandle) -> bool {
		let mut entries = self.entries.lock();
		match entries.get(key) {
			Some(entry) if entry.handle == handle => {
				entries.remove(key);
				true
			}
			_ => false,
		}
	}

	pub(crate) fn send(&self, key: &K, item: T) -> Result<StreamHandle, SendFailure> {
		let mut entries = self.entries.lock();
		let entry = entries.get(key).ok_or(SendFailure::NotRegistered)?;
		let handle = entry.handle;
		let sent = entry.tx.try_send(item);
		match sent {
			Ok(()) => Ok(handle),
			Err(TrySendError::Full(_)) => Err(SendFailure::Full),
			Err(TrySendError::Closed(_)) => {
				entries.remove(key);
				Err(SendFailure::Closed)
			}
		}
	}

	pub(crate) fn contains(&self, key: &K) -> bool {
		self.entries.lock().contains_key(key)
	}

	pub(crate) fn keys(&self) -> Vec<K> {
		self.entries.lock().keys().cloned().collect()
	}

	pub(crate) fn len(&self) -> usize {
		self.entries.lock().len()
	}
}

/// Runs async work one at a time per key. A key's lock only lives while
/// some task holds it or waits for it.
pub(crate) struct KeyedLocks<K> {
	locks: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
}

impl<K> KeyedLocks<K>
where
	K: Eq + Hash + Clone,
{
	pub(crate) fn new() -> Self {
		Self {
			locks: Mutex::new(HashMap::new()),
		}
	}

	pub(crate) async fn run<F>(&self, key: &K, work: F) -> F::Output
	where
		F: Future,
	{
		let lock = self.locks.lock().entry(key.clone()).or_default().clone();
		let output = {
			let _guard = lock.lock().await;
			work.await
		};

		let mut locks = self.locks.lock();
		// one reference in the map, one here
		if Arc::strong_count(&lock) == 2 {
			locks.remove(key);
		}
		output
	}

	#[cfg(test)]
	fn len(&self) -> usize {
		self.locks.lock().len()
	}
}
