//! # Courier HTTP Transport
//!
//! A [`Transport`](courier_core::transport::Transport) implementation over
//! `reqwest`, for installing on a Courier engine or on a single layer.
//!
//! ## Example
//!
//! ```no_run
//! use courier_core::config::{LayerConfig, TransportConfig};
//! use courier_http::ReqwestTransport;
//! use courier_runtime::Courier;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let courier = Courier::builder()
//!         .transport(ReqwestTransport::builder().origin("https://api.example.com")?.build()?)
//!         .build();
//!
//!     let users = courier.create_module(LayerConfig::transport(TransportConfig::new().base_url("/users")));
//!     let user = courier_runtime::to_promise(users.request(TransportConfig::new().url("/42"))).await?;
//!
//!     println!("{user}");
//!     Ok(())
//! }
//! ```
//!
//! ## Behavior
//!
//! - Non-2xx statuses fail with `TransportError::Status` unless
//!   [`accept_all_statuses`](ReqwestTransportBuilder::accept_all_statuses) is set
//! - JSON bodies are decoded into `serde_json::Value`; anything else arrives as a string
//! - Relative endpoints are joined onto the configured origin

pub mod client;
pub mod error;

pub use client::{ReqwestTransport, ReqwestTransportBuilder};
pub use error::HttpError;
