pub mod context;
mod request;
pub mod states;
mod timesync;
pub mod worker;

pub use context::{InitLatch, SenderConfig, SendingContext};
pub use states::SendingState;
pub use worker::SenderWorker;
