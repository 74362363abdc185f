pub mod broker;
pub mod store;

pub use broker::{Dispatch, DispatchReceiver, DispatchSender, WorkBroker, dispatch_channel};
pub use store::WorkQueue;
