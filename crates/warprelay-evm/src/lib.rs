//! warprelay-evm: EVM log subscription, catch-up scanner and reconnecting
//! subscriber.

pub mod builder;
pub mod client;
pub mod context;
pub mod live;
pub mod rpc;
pub mod scanner;
pub mod subscriber;
pub mod ws;

pub use builder::SubscriberBuilder;
pub use client::{EvmClient, EvmClientConfig, EvmDialer};
pub use scanner::{CatchUp, CatchUpReport};
pub use subscriber::{Subscriber, SubscriberHandle};
