use std::ops::{Deref, DerefMut};

pub mod collections;
pub mod macros;
pub mod retire;
pub mod slot;
pub mod sync;

pub use retire::RetirementList;
pub use slot::{Displaced, Guard, PublishSlot, Published, Retire};

/// Asserts that a value may be shared across threads. Used for cells whose access is
/// serialized by a protocol the type system cannot see.
#[repr(transparent)]
pub struct IsSendSync<T: ?Sized>(T);

impl<T> IsSendSync<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }
    pub fn into_inner(self) -> T {
        self.0
    }
}

unsafe impl<T: ?Sized> Send for IsSendSync<T> {}
unsafe impl<T: ?Sized> Sync for IsSendSync<T> {}

impl<T: ?Sized> Deref for IsSendSync<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T: ?Sized> DerefMut for IsSendSync<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<T: ?Sized> AsRef<T> for IsSendSync<T> {
    fn as_ref(&self) -> &T {
        &self.0
    }
}
