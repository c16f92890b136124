use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::addr::NodeId;
use crate::cell::{CellBody, Parent};
use crate::error::CellError;
use crate::message::Message;
use crate::outcome::{ErrorMap, Fault, Outcome, Snapshot, Source, Status};

// Within one transition the order is: broadcasts, then the snapshot
// store, then the terminal observers. Broadcasts go first so that a
// caller who saw the new snapshot and then sends a message is ordered
// after them in every child's mailbox. Observers go last so that a
// completed wait always reads the terminal snapshot.

impl<T> CellBody<T>
where
	T: Clone + Send + Sync + 'static,
{
	/// Apply one message. Runs on the cell's mailbox pump, so
	/// invocations for a single cell never overlap and anything sent
	/// from here is processed after this call returns.
	pub(crate) fn handle(self: &Arc<Self>, message: Message<T>) {
		tracing::trace!(cell = self.name, message = ?message, "handle");
		match message {
			Message::Update => self.on_update(),
			Message::ParentComputed(parent, value) => self.on_parent_computed(parent, value),
			Message::ParentNeedsUpdate(parent) => self.on_parent_needs_update(parent),
			Message::ParentError(parent, fault) => self.on_parent_error(parent, fault),
			Message::ParentRecovered(parent) => self.on_parent_recovered(parent),
			Message::Set(value) => self.on_set(value),
			Message::ForceNeedsUpdate => self.on_force_needs_update(),
			Message::ForceError => self.on_force_error(),
		}
	}

	fn on_update(self: &Arc<Self>) {
		match self.snapshot.load().status {
			Status::NeedsUpdate => {
				let ready = {
					let mut inner = self.inner.lock();
					inner.demanded = true;
					inner.ready()
				};
				if ready {
					self.compute();
				} else {
					self.demand_parents();
				}
			}
			// already in flight, already valued, memoized, or
			// faulted: demand changes nothing
			Status::Updating | Status::UpToDate | Status::Oblivious | Status::Error => {}
		}
	}

	fn on_parent_computed(self: &Arc<Self>, parent: NodeId, value: T) {
		let snapshot = self.snapshot.load_full();
		match snapshot.status {
			Status::NeedsUpdate => {
				let ready = {
					let mut inner = self.inner.lock();
					inner.parent_values.insert(parent, value);
					inner.demanded && inner.ready()
				};
				if ready {
					self.compute();
				}
			}
			Status::Updating => {
				let ready = {
					let mut inner = self.inner.lock();
					inner.parent_values.insert(parent, value);
					inner.ready()
				};
				if ready {
					self.compute();
				}
			}
			Status::UpToDate => {
				// the cached value just went stale; take the new
				// input now, tell the children theirs is stale too
				let mut inner = self.inner.lock();
				inner.parent_values.insert(parent, value);
				inner.broadcast(Message::ParentNeedsUpdate(self.id));
				self.publish(Status::NeedsUpdate, Outcome::Pending);
			}
			Status::Oblivious => {}
			Status::Error => self.recovered_input(parent, value, &snapshot),
		}
	}

	/// A fresh input while faulted: record it, drop the sender from
	/// the error map, and if only the cell's own failure remains,
	/// presume it stale and let the next demand retry.
	fn recovered_input(self: &Arc<Self>, parent: NodeId, value: T, snapshot: &Snapshot<T>) {
		let Outcome::Faulted(faults) = &snapshot.value else {
			return;
		};
		let mut faults = faults.clone();
		faults.remove(&Source::Cell(parent));
		let own_only = faults.keys().all(|source| *source == Source::Own);

		let mut inner = self.inner.lock();
		inner.parent_values.insert(parent, value);
		if own_only {
			tracing::debug!(cell = self.name, "recovered");
			inner.broadcast(Message::ParentRecovered(self.id));
			self.publish(Status::NeedsUpdate, Outcome::Pending);
		} else {
			self.publish(Status::Error, Outcome::Faulted(faults));
		}
	}

	fn on_parent_needs_update(self: &Arc<Self>, parent: NodeId) {
		match self.snapshot.load().status {
			Status::NeedsUpdate | Status::Error => {
				self.inner.lock().parent_values.remove(&parent);
			}
			Status::Updating => {
				// still in demand: chase the parent that lost its
				// value, or readiness may never be regained
				let target = {
					let mut inner = self.inner.lock();
					inner.parent_values.remove(&parent);
					inner.cell_parent(parent)
				};
				if let Some(cell) = target {
					cell.update();
				}
			}
			Status::UpToDate => {
				let mut inner = self.inner.lock();
				inner.parent_values.remove(&parent);
				inner.broadcast(Message::ParentNeedsUpdate(self.id));
				self.publish(Status::NeedsUpdate, Outcome::Pending);
			}
			Status::Oblivious => {}
		}
	}

	fn on_parent_error(self: &Arc<Self>, parent: NodeId, fault: Fault) {
		let snapshot = self.snapshot.load_full();
		match snapshot.status {
			Status::Oblivious => {}
			Status::Error => {
				let Outcome::Faulted(faults) = &snapshot.value else {
					return;
				};
				let mut faults = faults.clone();
				let new = faults.insert(Source::Cell(parent), fault.clone()).is_none();
				let mut inner = self.inner.lock();
				if new {
					inner.broadcast(Message::ParentError(self.id, fault));
				}
				self.publish(Status::Error, Outcome::Faulted(faults));
			}
			Status::NeedsUpdate | Status::Updating | Status::UpToDate => {
				let mut faults = ErrorMap::new();
				faults.insert(Source::Cell(parent), fault.clone());
				let mut inner = self.inner.lock();
				inner.demanded = false;
				tracing::debug!(cell = self.name, parent = ?parent, error = %fault, "parent faulted");
				inner.broadcast(Message::ParentError(self.id, fault));
				self.publish(Status::Error, Outcome::Faulted(faults));
				inner.settled();
			}
		}
	}

	fn on_parent_recovered(self: &Arc<Self>, parent: NodeId) {
		let snapshot = self.snapshot.load_full();
		if snapshot.status != Status::Error {
			return;
		}
		let Outcome::Faulted(faults) = &snapshot.value else {
			return;
		};
		let mut faults = faults.clone();
		if faults.remove(&Source::Cell(parent)).is_none() {
			return;
		}
		let mut inner = self.inner.lock();
		if faults.is_empty() {
			tracing::debug!(cell = self.name, "recovered");
			inner.broadcast(Message::ParentRecovered(self.id));
			self.publish(Status::NeedsUpdate, Outcome::Pending);
		} else {
			self.publish(Status::Error, Outcome::Faulted(faults));
		}
	}

	fn on_set(self: &Arc<Self>, value: T) {
		let was_faulted = self.snapshot.load().status == Status::Error;
		let status = if self.oblivious { Status::Oblivious } else { Status::UpToDate };
		let mut inner = self.inner.lock();
		inner.demanded = false;
		if was_faulted {
			// recover first so children clear their map entry before
			// the new value reaches them
			inner.broadcast(Message::ParentRecovered(self.id));
		}
		inner.broadcast(Message::ParentComputed(self.id, value.clone()));
		self.publish(status, Outcome::Computed(value));
		inner.settled();
	}

	fn on_force_needs_update(self: &Arc<Self>) {
		let was_faulted = self.snapshot.load().status == Status::Error;
		let mut inner = self.inner.lock();
		inner.reprime();
		tracing::debug!(cell = self.name, "forced to needs-update");
		if was_faulted {
			inner.broadcast(Message::ParentRecovered(self.id));
		}
		inner.broadcast(Message::ParentNeedsUpdate(self.id));
		self.publish(Status::NeedsUpdate, Outcome::Pending);
	}

	fn on_force_error(self: &Arc<Self>) {
		let snapshot = self.snapshot.load_full();
		let fault: Fault = Arc::new(CellError::Forced);
		if let (Status::Error, Outcome::Faulted(faults)) = (snapshot.status, &snapshot.value) {
			let mut faults = faults.clone();
			let new = faults.insert(Source::Own, fault.clone()).is_none();
			let mut inner = self.inner.lock();
			if new {
				inner.broadcast(Message::ParentError(self.id, fault));
			}
			self.publish(Status::Error, Outcome::Faulted(faults));
		} else {
			self.settle_error(fault);
		}
	}

	/// Send demand upstream to every distinct cell parent. Watched
	/// handles are never demanded; their values are already current.
	fn demand_parents(self: &Arc<Self>) {
		let inner = self.inner.lock();
		let mut seen = BTreeSet::new();
		for parent in &inner.parents {
			if let Parent::Cell(cell) = parent {
				if seen.insert(cell.id()) {
					cell.update();
				}
			}
		}
		self.publish(Status::Updating, Outcome::Pending);
	}

	/// The compute action: assemble arguments in parent order, apply
	/// the function, settle with the result. The user function runs
	/// with no lock held; the mailbox pump already serializes us.
	fn compute(self: &Arc<Self>) {
		let args: Vec<T> = {
			let inner = self.inner.lock();
			inner
				.parents
				.iter()
				.map(|parent| match parent {
					Parent::Const(value) => value.clone(),
					Parent::Cell(cell) => inner.parent_values[&cell.id()].clone(),
					Parent::Handle(handle) => inner.parent_values[&handle.id()].clone(),
				})
				.collect()
		};

		let Some(func) = self.func.as_ref() else {
			// a source forced back to pending has nothing to
			// recompute from; fault instead of waiting forever
			self.settle_error(Arc::new(CellError::Undefined));
			return;
		};

		self.publish(Status::Updating, Outcome::Pending);
		let result = catch_unwind(AssertUnwindSafe(|| func(&args)));

		match result {
			Ok(Ok(value)) => self.settle_computed(value),
			Ok(Err(error)) => self.settle_error(Arc::from(error)),
			Err(panic) => {
				let reason = panic
					.downcast_ref::<&str>()
					.map(|s| s.to_string())
					.or_else(|| panic.downcast_ref::<String>().cloned())
					.unwrap_or_else(|| "<opaque>".to_string());
				self.settle_error(Arc::new(CellError::Panicked { reason }));
			}
		}
	}

	fn settle_computed(self: &Arc<Self>, value: T) {
		let status = if self.oblivious { Status::Oblivious } else { Status::UpToDate };
		let mut inner = self.inner.lock();
		inner.demanded = false;
		tracing::debug!(cell = self.name, status = ?status, "computed");
		inner.broadcast(Message::ParentComputed(self.id, value.clone()));
		self.publish(status, Outcome::Computed(value));
		inner.settled();
	}

	fn settle_error(self: &Arc<Self>, fault: Fault) {
		let mut faults = ErrorMap::new();
		faults.insert(Source::Own, fault.clone());
		let mut inner = self.inner.lock();
		inner.demanded = false;
		tracing::debug!(cell = self.name, error = %fault, "faulted");
		inner.broadcast(Message::ParentError(self.id, fault));
		self.publish(Status::Error, Outcome::Faulted(faults));
		inner.settled();
	}
}
