pub mod coordinator;
pub mod log;

pub use coordinator::MessageDeliveryCoordinator;
pub use log::MessageLog;
