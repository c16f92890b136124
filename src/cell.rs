use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use tokio::sync::{mpsc, oneshot};

use crate::addr::NodeId;
use crate::dispatch;
use crate::error::{BoxError, CellError};
use crate::message::Message;
use crate::outcome::{ErrorMap, Outcome, Snapshot, Source, Status};
use crate::{Handle, Watch};

/// The user-supplied update function: pure, applied to the resolved
/// parent values in entry order.
pub type CellFn<T> = Box<dyn Fn(&[T]) -> Result<T, BoxError> + Send + Sync>;

/// A unit of deferred computation: applies its function to the
/// current values of its parents, caches the result, and recomputes
/// only when demanded and only when a parent actually changed.
pub struct Cell<T>
where
	T: Clone + Send + Sync + 'static,
{
	body: Arc<CellBody<T>>,
}

impl<T> Clone for Cell<T>
where
	T: Clone + Send + Sync + 'static,
{
	fn clone(&self) -> Self {
		Self {
			body: self.body.clone(),
		}
	}
}

/// One entry in a cell's parent list. Entry order defines the
/// argument order of the update function.
pub enum Parent<T>
where
	T: Clone + Send + Sync + 'static,
{
	/// A plain value, passed through as-is.
	Const(T),
	/// Another cell; receives demand and reports results back.
	Cell(Cell<T>),
	/// A non-cell handle; watched, never demanded.
	Handle(Arc<dyn Handle<T>>),
}

impl<T> Parent<T>
where
	T: Clone + Send + Sync + 'static,
{
	pub fn constant(value: T) -> Self {
		Parent::Const(value)
	}

	pub(crate) fn id(&self) -> Option<NodeId> {
		match self {
			Parent::Const(_) => None,
			Parent::Cell(cell) => Some(cell.id()),
			Parent::Handle(handle) => Some(handle.id()),
		}
	}
}

impl<T> Clone for Parent<T>
where
	T: Clone + Send + Sync + 'static,
{
	fn clone(&self) -> Self {
		match self {
			Parent::Const(value) => Parent::Const(value.clone()),
			Parent::Cell(cell) => Parent::Cell(cell.clone()),
			Parent::Handle(handle) => Parent::Handle(handle.clone()),
		}
	}
}

impl<T> From<&Cell<T>> for Parent<T>
where
	T: Clone + Send + Sync + 'static,
{
	fn from(cell: &Cell<T>) -> Self {
		Parent::Cell(cell.clone())
	}
}

pub(crate) struct CellBody<T>
where
	T: Clone + Send + Sync + 'static,
{
	pub(crate) id: NodeId,
	pub(crate) name: &'static str,
	pub(crate) oblivious: bool,
	pub(crate) func: Option<CellFn<T>>,
	pub(crate) snapshot: ArcSwap<Snapshot<T>>,
	sender: mpsc::UnboundedSender<Message<T>>,
	pub(crate) inner: Mutex<CellInner<T>>,
}

pub(crate) struct CellInner<T>
where
	T: Clone + Send + Sync + 'static,
{
	id: NodeId,
	/// Sticky demand: set when an update request is accepted,
	/// cleared when the cell settles. Survives regressions so a
	/// late parent value still triggers the pending compute.
	pub(crate) demanded: bool,
	pub(crate) parents: SmallVec<[Parent<T>; 4]>,
	/// Last observed value per distinct handle-parent identity.
	pub(crate) parent_values: BTreeMap<NodeId, T>,
	/// Number of distinct handle-parent identities; readiness is
	/// `parent_values` covering all of them.
	pub(crate) n_handle: usize,
	pub(crate) children: BTreeMap<NodeId, Weak<CellBody<T>>>,
	pub(crate) observers: Vec<oneshot::Sender<()>>,
	watches: Vec<(Arc<dyn Handle<T>>, Arc<HandleWatch<T>>)>,
	this: Weak<CellBody<T>>,
}

/// Adapter installed on a watched handle; forwards each distinct
/// change into the owning cell's mailbox.
struct HandleWatch<T>
where
	T: Clone + Send + Sync + 'static,
{
	source: NodeId,
	target: Weak<CellBody<T>>,
}

impl<T> Watch<T> for HandleWatch<T>
where
	T: Clone + Send + Sync + 'static,
{
	fn changed(&self, value: &T) {
		if let Some(target) = self.target.upgrade() {
			target.send(Message::ParentComputed(self.source, value.clone()));
		}
	}
}

impl<T> Cell<T>
where
	T: Clone + Send + Sync + 'static,
{
	/// Build a derived cell. Requires a running tokio runtime; the
	/// cell's mailbox pump is spawned onto it.
	pub fn new(func: CellFn<T>, parents: Vec<Parent<T>>) -> Self {
		Self::build("<unnamed>", Some(func), parents, None, false)
	}

	pub fn named(name: &'static str, func: CellFn<T>, parents: Vec<Parent<T>>) -> Self {
		Self::build(name, Some(func), parents, None, false)
	}

	/// Like [`Cell::named`], but after the first successful compute
	/// the cell ignores all parent traffic until it is explicitly
	/// reset with [`Cell::force_needs_update`].
	pub fn oblivious(name: &'static str, func: CellFn<T>, parents: Vec<Parent<T>>) -> Self {
		Self::build(name, Some(func), parents, None, true)
	}

	/// A leaf input: no parents, no function, born up to date with
	/// `initial`. Feed it with [`Cell::set`].
	pub fn source(name: &'static str, initial: T) -> Self {
		Self::build(name, None, Vec::new(), Some(initial), false)
	}

	fn build(
		name: &'static str,
		func: Option<CellFn<T>>,
		parents: Vec<Parent<T>>,
		initial: Option<T>,
		oblivious: bool,
	) -> Self {
		let id = NodeId::next();
		let (sender, mailbox) = mpsc::unbounded_channel();

		let n_handle = parents
			.iter()
			.filter_map(Parent::id)
			.collect::<BTreeSet<_>>()
			.len();

		let snapshot = match initial {
			Some(value) => Snapshot {
				status: if oblivious { Status::Oblivious } else { Status::UpToDate },
				value: Outcome::Computed(value),
			},
			None => Snapshot {
				status: Status::NeedsUpdate,
				value: Outcome::Pending,
			},
		};

		let body = Arc::new_cyclic(|this| CellBody {
			id,
			name,
			oblivious,
			func,
			snapshot: ArcSwap::from_pointee(snapshot),
			sender,
			inner: Mutex::new(CellInner {
				id,
				demanded: false,
				parents: SmallVec::from_vec(parents),
				parent_values: BTreeMap::new(),
				n_handle,
				children: BTreeMap::new(),
				observers: Vec::new(),
				watches: Vec::new(),
				this: this.clone(),
			}),
		});

		body.attach();
		let this = body.inner.lock().this.clone();
		dispatch::pump(this, mailbox);

		Cell { body }
	}

	pub fn id(&self) -> NodeId {
		self.body.id
	}

	pub fn name(&self) -> &'static str {
		self.body.name
	}

	#[inline]
	pub fn status(&self) -> Status {
		self.body.snapshot.load().status
	}

	#[inline]
	pub fn value(&self) -> Outcome<T> {
		self.body.snapshot.load().value.clone()
	}

	#[inline]
	pub fn snapshot(&self) -> Arc<Snapshot<T>> {
		self.body.snapshot.load_full()
	}

	/// External write. Only a cell without handle parents accepts it;
	/// a derived cell rejects the write before it reaches the state
	/// machine.
	pub fn set(&self, value: T) -> Result<(), CellError> {
		if self.body.inner.lock().n_handle > 0 {
			return Err(CellError::Dependent { cell: self.body.name });
		}
		self.body.send(Message::Set(value));
		Ok(())
	}

	/// Demand that this cell become up to date. Returns immediately;
	/// use [`evaluate`](crate::evaluate) to wait for the result.
	pub fn update(&self) {
		self.body.send(Message::Update);
	}

	/// Unconditionally discard the cached value, re-read the parents'
	/// current values, and regress to `NeedsUpdate`. The only way to
	/// reset an oblivious cell.
	pub fn force_needs_update(&self) {
		self.body.send(Message::ForceNeedsUpdate);
	}

	/// Inject a synthetic error as if the cell's own function failed.
	pub fn force_error(&self) {
		self.body.send(Message::ForceError);
	}

	/// Install a one-shot observer that fires when the cell next
	/// reaches a terminal status. `None` when it already has one.
	pub(crate) fn observe_settled(&self) -> Option<oneshot::Receiver<()>> {
		let mut inner = self.body.inner.lock();
		if self.body.snapshot.load().status.is_terminal() {
			return None;
		}
		let (sender, receiver) = oneshot::channel();
		inner.observers.push(sender);
		Some(receiver)
	}
}

impl<T> CellBody<T>
where
	T: Clone + Send + Sync + 'static,
{
	pub(crate) fn send(&self, message: Message<T>) {
		// a closed mailbox means the cell is going away; there is
		// nobody left to deliver to
		let _ = self.sender.send(message);
	}

	pub(crate) fn publish(&self, status: Status, value: Outcome<T>) {
		self.snapshot.store(Arc::new(Snapshot { status, value }));
	}

	/// Wire the freshly built cell into the graph: register as a
	/// child of each cell parent, install a watch on each non-cell
	/// handle, then prime `parent_values` from parents that already
	/// hold a value. Runs before the mailbox pump starts, so nothing
	/// a parent publishes after the registration can be missed.
	fn attach(self: &Arc<Self>) {
		let (this, parents) = {
			let inner = self.inner.lock();
			let parents: Vec<Parent<T>> = inner.parents.iter().cloned().collect();
			(inner.this.clone(), parents)
		};

		let mut watches = Vec::new();
		for parent in &parents {
			match parent {
				Parent::Const(_) => {}
				Parent::Cell(cell) => {
					cell.body.inner.lock().children.insert(self.id, this.clone());
				}
				Parent::Handle(handle) => {
					let watch = Arc::new(HandleWatch {
						source: handle.id(),
						target: this.clone(),
					});
					handle.watch(Arc::downgrade(&watch) as Weak<dyn Watch<T>>);
					watches.push((handle.clone(), watch));
				}
			}
		}

		let mut inherited = ErrorMap::new();
		let mut inner = self.inner.lock();
		inner.watches = watches;
		for parent in &parents {
			match parent {
				Parent::Const(_) => {}
				Parent::Cell(cell) => {
					let snapshot = cell.snapshot();
					match &snapshot.value {
						Outcome::Computed(value) => {
							inner.parent_values.insert(cell.id(), value.clone());
						}
						Outcome::Faulted(faults) => {
							// a faulted parent ignores demand, so a cell
							// born under one inherits the fault instead
							// of waiting for a broadcast that never comes
							if let Some((_, fault)) = faults.iter().next() {
								inherited.insert(Source::Cell(cell.id()), fault.clone());
							}
						}
						Outcome::Pending => {}
					}
				}
				Parent::Handle(handle) => {
					inner.parent_values.insert(handle.id(), handle.current());
				}
			}
		}
		if !inherited.is_empty() {
			self.publish(Status::Error, Outcome::Faulted(inherited));
		}
	}
}

impl<T> CellInner<T>
where
	T: Clone + Send + Sync + 'static,
{
	/// Ready to compute: a value recorded for every distinct handle
	/// parent. Standing faults force `Status::Error`, so they cannot
	/// coexist with a readiness check.
	pub(crate) fn ready(&self) -> bool {
		self.parent_values.len() == self.n_handle
	}

	pub(crate) fn cell_parent(&self, id: NodeId) -> Option<Cell<T>> {
		self.parents.iter().find_map(|parent| match parent {
			Parent::Cell(cell) if cell.id() == id => Some(cell.clone()),
			_ => None,
		})
	}

	/// Fire and discard the one-shot terminal observers.
	pub(crate) fn settled(&mut self) {
		for observer in self.observers.drain(..) {
			let _ = observer.send(());
		}
	}

	/// Send `message` to every live child, dropping the dead ones.
	pub(crate) fn broadcast(&mut self, message: Message<T>) {
		self.children.retain(|_, child| match child.upgrade() {
			Some(child) => {
				child.send(message.clone());
				true
			}
			None => false,
		});
	}

	/// Drop every recorded parent value and take fresh ones from the
	/// parents' published snapshots. An oblivious cell's records go
	/// stale on purpose, and an up-to-date parent ignores re-demand,
	/// so a reset must pull rather than wait.
	pub(crate) fn reprime(&mut self) {
		self.parent_values.clear();
		for parent in &self.parents {
			match parent {
				Parent::Const(_) => {}
				Parent::Cell(cell) => {
					let snapshot = cell.snapshot();
					if let Outcome::Computed(value) = &snapshot.value {
						self.parent_values.insert(cell.id(), value.clone());
					}
				}
				Parent::Handle(handle) => {
					self.parent_values.insert(handle.id(), handle.current());
				}
			}
		}
	}
}

impl<T> Drop for CellInner<T>
where
	T: Clone + Send + Sync + 'static,
{
	fn drop(&mut self) {
		for (handle, watch) in &self.watches {
			let weak = Arc::downgrade(watch) as Weak<dyn Watch<T>>;
			handle.unwatch(&weak);
		}
		for parent in &self.parents {
			if let Parent::Cell(cell) = parent {
				cell.body.inner.lock().children.remove(&self.id);
			}
		}
	}
}

impl<T> Debug for Cell<T>
where
	T: Clone + Send + Sync + Debug + 'static,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let snapshot = self.snapshot();
		f.debug_struct("Cell")
			.field("name", &self.body.name)
			.field("id", &self.body.id)
			.field("status", &snapshot.status)
			.field("value", &snapshot.value)
			.finish()
	}
}
