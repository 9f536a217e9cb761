//! # strmon
//!
//! This crate watches a list of live streamers and records them while they are
//! live. Every streamer runs its own state machine on its own task; the
//! `Monitor` owns the machines, shares a bounded number of recording slots
//! between them and routes user commands to them.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use strmon::{config::Config, monitor::Monitor, sites, util::HttpClient};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Arc::new(Config::default());
//!     let client = Arc::new(HttpClient::new().unwrap());
//!
//!     let monitor = Monitor::new(config, sites::registry(client));
//!     let id = monitor
//!         .add("direct", "https://cdn.example.com/live/index.m3u8", true)
//!         .await
//!         .unwrap();
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(60)).await;
//!     println!("{}", monitor.snapshot(&id).unwrap().status);
//!
//!     monitor.shutdown().await;
//! }
//! ```
//!
//! Sites are added by implementing `adapter::SiteAdapter` and registering the
//! implementation in a `SiteRegistry`.

#![forbid(unsafe_code)]

#[macro_use]
extern crate log;

pub mod adapter;
pub mod backoff;
pub mod config;
pub mod error;
pub mod events;
pub mod hls;
pub mod index;
pub mod machine;
pub mod monitor;
pub mod notice;
pub mod session;
pub mod sites;
pub mod source;
pub mod stats;
pub mod store;
pub mod streamer;
pub mod util;
