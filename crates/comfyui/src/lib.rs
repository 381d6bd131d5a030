//! ComfyUI backend integration for the job dispatcher.
//!
//! Provides the REST and WebSocket clients for a ComfyUI server, lenient
//! event decoding, the per-device event listener with reconnection and
//! queue polling, the submission forwarder, the health prober, and the
//! [`Dispatcher`](manager::Dispatcher) that composes them over a fixed set
//! of GPU devices.

pub mod api;
pub mod client;
pub mod config;
pub mod device;
pub mod forwarder;
pub mod listener;
pub mod manager;
pub mod messages;
pub mod poller;
pub mod processor;
pub mod prober;
pub mod reconnect;
