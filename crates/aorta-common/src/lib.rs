pub mod clock;
pub mod error;
pub mod logging;
pub mod message;
pub mod value;

pub use clock::{retransmission_delay, Clock, FrozenClock, SystemClock};
pub use error::{AortaError, Result};
pub use message::{DeliveryTag, Message, MessageClass, APPLICATION_PROPERTY_MESSAGE_CLASS};
pub use value::Value;
