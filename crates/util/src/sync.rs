pub mod single_flight;
pub mod spin_lock;

pub use single_flight::SingleFlight;
pub use spin_lock::SpinLock;
