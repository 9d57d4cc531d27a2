//! Strict request/reply channels over ZeroMQ REQ sockets.
//!
//! ```no_run
//! use reqchannel::{Endpoint, OpenOptions, TransportProvider};
//!
//! let provider = TransportProvider::new();
//! let endpoint: Endpoint = "tcp://localhost:5556".parse()?;
//! let mut channel = provider.open(OpenOptions::new(endpoint))?;
//! for i in 0..10 {
//!     let reply = channel.request(format!("Hello-{}", i))?;
//!     println!("Received reply [ {} ]", reply);
//! }
//! channel.close();
//! provider.terminate()?;
//! # Ok::<(), reqchannel::Error>(())
//! ```

pub mod channel;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod message;
mod monitor;
pub mod provider;

pub use channel::{ChannelState, CloseHandle, OpenOptions, Operation, RequestChannel};
pub use config::ClientConfig;
pub use endpoint::{Endpoint, Scheme};
pub use error::{ConfigError, ConnectionError, Error, Result};
pub use message::Message;
pub use provider::TransportProvider;
