use std::collections::BTreeSet;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::addr::{NodeId, WeakAddr};
use crate::cell::Parent;
use crate::hashed::Hashed;
use crate::{Handle, Watch};

/// A plain observable value: the built-in non-cell handle. It has no
/// status and is never demanded; its value is always current, and
/// watches fire only when the stored value actually changes.
pub struct Var<T> {
	body: Arc<VarBody<T>>,
}

impl<T> Clone for Var<T> {
	fn clone(&self) -> Self {
		Self {
			body: self.body.clone(),
		}
	}
}

pub struct VarBody<T> {
	id: NodeId,
	value: RwLock<Hashed<T>>,
	watchers: Mutex<BTreeSet<WeakAddr<dyn Watch<T>>>>,
}

impl<T> Var<T>
where
	T: Send + Sync + 'static,
{
	pub fn new(value: T) -> Self
	where
		T: Hash,
	{
		Var {
			body: Arc::new(VarBody {
				id: NodeId::next(),
				value: RwLock::new(Hashed::new(value)),
				watchers: Mutex::new(BTreeSet::new()),
			}),
		}
	}

	pub fn id(&self) -> NodeId {
		self.body.id
	}

	#[inline]
	pub fn get(&self) -> T
	where
		T: Clone,
	{
		self.body.value.read().value.clone()
	}

	#[inline]
	pub fn set(&self, value: T)
	where
		T: Hash,
	{
		let _ = self.replace(value);
	}

	/// Store `value` and return the previous one. Watches fire only
	/// when the new value is distinct from the old.
	pub fn replace(&self, value: T) -> T
	where
		T: Hash,
	{
		let mut current = self.body.value.write();
		let (old, changed) = current.replace(value);
		std::mem::drop(current);
		if changed {
			self.body.notify();
		}
		old
	}

	/// Mutate the value in place; watches fire if the mutation
	/// changed it.
	pub fn update(&self, func: impl FnOnce(&mut T))
	where
		T: Hash,
	{
		let mut current = self.body.value.write();
		func(&mut current.value);
		let changed = current.rehash();
		std::mem::drop(current);
		if changed {
			self.body.notify();
		}
	}
}

impl<T> VarBody<T> {
	fn notify(&self)
	where
		T: Send + Sync + 'static,
	{
		let value = self.value.read();
		let mut watchers = self.watchers.lock();
		watchers.retain(|watch| match watch.upgrade() {
			Some(watch) => {
				watch.changed(&value.value);
				true
			}
			None => false,
		});
	}
}

impl<T> Handle<T> for VarBody<T>
where
	T: Clone + Send + Sync + 'static,
{
	fn id(&self) -> NodeId {
		self.id
	}

	fn current(&self) -> T {
		self.value.read().value.clone()
	}

	fn watch(&self, watch: Weak<dyn Watch<T>>) {
		self.watchers.lock().insert(WeakAddr::new(watch));
	}

	fn unwatch(&self, watch: &Weak<dyn Watch<T>>) {
		self.watchers.lock().remove(&WeakAddr::new(watch.clone()));
	}
}

impl<T> From<&Var<T>> for Parent<T>
where
	T: Clone + Hash + Send + Sync + 'static,
{
	fn from(var: &Var<T>) -> Self {
		Parent::Handle(var.body.clone())
	}
}

impl<T> Default for Var<T>
where
	T: Default + Hash + Send + Sync + 'static,
{
	fn default() -> Self {
		Var::new(Default::default())
	}
}

impl<T> Debug for Var<T>
where
	T: Debug,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.body.value.read().fmt(f)
	}
}
