//! # altcom-rpc
//!
//! Client-side command/response gateway for a remote modem and crypto
//! subsystem reached over a framed byte link.
//!
//! Application code calls remote operations as ordinary async functions.
//! Each call is encoded into a command frame, correlated with its response
//! by transaction id, and decoded back into a result. Frames the modem sends
//! on its own (error indications and other notifications) are classified on
//! the receive path and handled on separate jobs.
//!
//! ## Architecture
//!
//! - **Frame codec** (`protocol`, `codec`): 8-byte big-endian header and
//!   fixed-size payloads
//! - **Buffers** (`buffer`): bounded pool shared by every exchange
//! - **Gateway** (`gateway`, `writer`): synchronous exchanges with timeout
//! - **Notifications** (`handler`): registry, dispatcher and job queue
//! - **Operations** (`ops`): the generic call path and concrete operations
//!
//! ## Example
//!
//! ```no_run
//! use altcom_rpc::ops::tls::SslConfig;
//! use altcom_rpc::Altcom;
//!
//! #[tokio::main]
//! async fn main() -> altcom_rpc::Result<()> {
//!     let altcom = Altcom::builder().build();
//!     altcom.connect("/run/altcom.sock").await?;
//!
//!     let mut conf = SslConfig::new();
//!     altcom.config_init(&mut conf).await?;
//!     println!("config id: {:?}", conf.id());
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod codec;
pub mod config;
pub mod error;
pub mod gateway;
pub mod handler;
pub mod ops;
pub mod protocol;
pub mod state;
pub mod transport;
pub mod writer;

mod client;

pub use client::{Altcom, AltcomBuilder};
pub use config::{AltcomConfig, ResultPolicy};
pub use error::{AltcomError, Result};
pub use gateway::Timeout;
