//! Funding gateway dispatch core: turns a one-way RabbitMQ publish into a
//! bounded-latency call/response interaction, multiplexing many concurrent
//! callers over a single exclusive reply queue.

pub mod address;
pub mod broker;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod message;

pub use address::{AddressValidator, SharedValidator};
pub use broker::connection::BrokerContext;
pub use config::GatewayConfig;
pub use dispatch::correlation::CorrelationRegistry;
pub use dispatch::dispatcher::RequestDispatcher;
pub use error::DispatchError;
pub use message::{FundingOutcome, FundingRequest};
