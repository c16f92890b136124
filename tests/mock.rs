use std::sync::{Arc, Mutex, MutexGuard};

use mockall::*;

#[automock]
pub trait Probe {
	fn invoked(&self, cell: &'static str);
}

#[derive(Clone)]
pub struct SharedProbe(Arc<Mutex<MockProbe>>);

impl SharedProbe {
	pub fn new() -> SharedProbe {
		SharedProbe(Arc::new(Mutex::new(MockProbe::new())))
	}

	pub fn get<'a>(&'a self) -> MutexGuard<'a, MockProbe> {
		return self.0.lock().unwrap();
	}
}
