//! # Backbone Core - Layered Service Composition
//!
//! Composes an application from named services, started layer by layer:
//! - Backbone: dependency-ordered instantiation, bind notifications, and a
//!   shared event bus with scoped (`"scope:event"`) routing
//! - Interface matching: structural conformance checks for services
//! - Message protocol: host/client adapters that put a service behind a
//!   channel so it can live in another process
//!
//! ## Architecture
//!
//! ```text
//!   layer 0  ┌──────────┐  ┌──────────┐
//!            │ settings │  │  logger  │        ready values / factories
//!            └────┬─────┘  └──────────┘
//!   layer 1  ┌────▼─────┐                      factories see every service
//!            │    db    │◀── RemoteServiceClient ◀── channel ── host process
//!            └────┬─────┘
//!   layer 2  ┌────▼─────┐
//!            │   http   │   on_service_bind / scoped events reach forward
//!            └──────────┘
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod backbone;
pub mod commbus;
pub mod interface;
pub mod messaging;
pub mod service;
pub mod supervisor;
pub mod types;

// Internal utilities
pub mod observability;

pub use types::{Config, Error, Result};
