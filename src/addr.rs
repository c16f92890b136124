use std::cmp::Ordering;
use std::fmt::Debug;
use std::ops::Deref;
use std::sync::atomic::AtomicU64;
use std::sync::Weak;

static NEXT: AtomicU64 = AtomicU64::new(1);

/// Identity of a cell or handle. Allocated once, never reused, so it
/// can key error maps and parent-value maps even after the referent
/// is gone.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

impl NodeId {
	/// Allocate a fresh identity. External `Handle` implementations
	/// call this once per handle.
	pub fn next() -> Self {
		NodeId(NEXT.fetch_add(1, std::sync::atomic::Ordering::Relaxed))
	}
}

impl Debug for NodeId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// A weak trait object ordered and compared by referent address, so
/// it can live in a `BTreeSet` and be removed by identity later.
pub(crate) struct WeakAddr<T: ?Sized> {
	ptr: Weak<T>,
}

impl<T: ?Sized> WeakAddr<T> {
	pub(crate) fn new(ptr: Weak<T>) -> Self {
		WeakAddr { ptr }
	}
}

impl<T: ?Sized> Deref for WeakAddr<T> {
	type Target = Weak<T>;
	fn deref(&self) -> &Self::Target {
		&self.ptr
	}
}

impl<T: ?Sized> PartialEq for WeakAddr<T> {
	fn eq(&self, other: &Self) -> bool {
		std::ptr::addr_eq(Weak::as_ptr(&self.ptr), Weak::as_ptr(&other.ptr))
	}
}

impl<T: ?Sized> Eq for WeakAddr<T> {}

impl<T: ?Sized> Ord for WeakAddr<T> {
	fn cmp(&self, other: &Self) -> Ordering {
		(Weak::as_ptr(&self.ptr) as *const ()).cmp(&(Weak::as_ptr(&other.ptr) as *const ()))
	}
}

impl<T: ?Sized> PartialOrd for WeakAddr<T> {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}
