use std::{
    alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error},
    sync::atomic::AtomicUsize,
};

use crossbeam::utils::CachePadded;

use crate::Error;

/// Storage shared by both ends of a ring. `head` counts slots written, `tail` counts slots read;
/// both only ever grow and are reduced modulo the capacity when indexing.
pub(crate) struct State<T> {
    pub(crate) head: CachePadded<AtomicUsize>,
    pub(crate) tail: CachePadded<AtomicUsize>,
    pub(crate) capacity: usize,
    layout: Layout,
    pub(crate) data: *mut T,
}

unsafe impl<T: Send> Send for State<T> {}
unsafe impl<T: Send> Sync for State<T> {}

impl<T> State<T> {
    pub(crate) fn new(capacity: usize, align: usize, init: impl Fn() -> T) -> Result<Self, Error> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(Error::Capacity(capacity));
        }
        let layout = Layout::array::<T>(capacity)
            .and_then(|layout| layout.align_to(align.max(align_of::<T>())))
            .map_err(|_| Error::Layout)?;
        let data = if layout.size() == 0 {
            std::ptr::NonNull::<T>::dangling().as_ptr()
        } else {
            let data = unsafe { alloc_zeroed(layout).cast::<T>() };
            if data.is_null() {
                handle_alloc_error(layout);
            }
            data
        };
        for k in 0..capacity {
            unsafe { std::ptr::write(data.add(k), init()) };
        }
        Ok(Self {
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            capacity,
            layout,
            data,
        })
    }
}

impl<T> Drop for State<T> {
    fn drop(&mut self) {
        unsafe {
            for k in 0..self.capacity {
                std::ptr::drop_in_place(self.data.add(k));
            }
            if self.layout.size() != 0 {
                dealloc(self.data.cast(), self.layout);
            }
        }
    }
}
