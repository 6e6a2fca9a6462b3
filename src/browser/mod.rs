pub mod driver;
pub mod stability;

pub use driver::{CdpDriver, Driver, NavWait};
pub use stability::wait_for_stability;
