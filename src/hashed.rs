use std::fmt::Debug;
use std::hash::Hash;
use std::ops::Deref;

/// A value paired with its `fxhash`, so "did it actually change" is
/// one integer comparison instead of an `Eq` bound.
pub(crate) struct Hashed<T> {
	pub(crate) value: T,
	hash: u64,
}

impl<T> Hashed<T>
where
	T: Hash,
{
	pub(crate) fn new(value: T) -> Self {
		let hash = fxhash::hash64(&value);
		Self { value, hash }
	}

	/// Store `value`, returning the old one and whether the stored
	/// hash changed.
	pub(crate) fn replace(&mut self, value: T) -> (T, bool) {
		let next = Hashed::new(value);
		let changed = next.hash != self.hash;
		let old = std::mem::replace(self, next);
		(old.value, changed)
	}

	/// Recompute the hash after mutating `value` in place; true when
	/// it changed.
	pub(crate) fn rehash(&mut self) -> bool {
		let hash = fxhash::hash64(&self.value);
		let changed = hash != self.hash;
		self.hash = hash;
		changed
	}
}

impl<T> Deref for Hashed<T> {
	type Target = T;
	fn deref(&self) -> &Self::Target {
		&self.value
	}
}

impl<T> Debug for Hashed<T>
where
	T: Debug,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.value.fmt(f)
	}
}
