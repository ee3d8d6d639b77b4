// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared types for the Palisade overlay network.
//!
//! Both sides of the control plane speak in these types:
//!
//! - the server keeps [`Device`], [`Gateway`] and [`Session`] records in its
//!   directory and projects them into [`Peer`]s,
//! - the device agent receives [`DeviceConfiguration`] updates and reports its
//!   own lifecycle as [`AgentStatus`] snapshots.

pub mod agent;
pub mod env;
pub mod ids;
pub mod keys;
pub mod logging;
pub mod model;
pub mod peer;

pub use agent::{merge_gateway_health, AgentState, AgentStatus};
pub use ids::{DeviceId, SessionKey};
pub use keys::{KeyError, WgPublicKey};
pub use logging::{init_tracing, try_init_tracing, LoggingError};
pub use model::{Device, Gateway, Session};
pub use peer::{DeviceConfigStatus, DeviceConfiguration, GatewayConfiguration, Peer};
