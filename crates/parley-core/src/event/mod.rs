//! Event bus used to fan out session events, inbound realtime events and
//! message-log changes to any number of subscribers.

pub mod bus;

pub use bus::EventBus;
