pub mod buffer;
pub mod error;
pub mod null;
pub mod spool;

pub use buffer::{Buffer, DeliveryRecord};
pub use error::{Result, SpoolError};
pub use null::NullBuffer;
pub use spool::SpooledBuffer;
