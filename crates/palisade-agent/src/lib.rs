// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Device agent connection state machine.
//!
//! [`StateMachine`] drives the agent through Disconnected, Authenticating,
//! Bootstrapping and Connected. [`AgentControl`] is the handle the local
//! control API uses to log in, log out, switch tenants and watch status.

pub mod collaborators;
pub mod config;
pub mod control;
pub mod error;
pub mod event;
pub mod machine;
pub mod runtime;
pub mod states;
pub mod status;
pub mod transitions;

pub use collaborators::{
	ApiServer, Collaborators, ConfigStream, DeviceHelper, Enroller, GatewayChecker, TcpGatewayChecker, TokenSource,
	TunnelConfig, GATEWAY_CHECK_PORT,
};
pub use config::{AgentConfig, AuthProvider, ConfigError, TenantConfig};
pub use control::AgentControl;
pub use error::{AgentError, Result};
pub use event::{Event, EventWithSpan};
pub use machine::StateMachine;
pub use runtime::{Enrollment, RuntimeState, SessionInfo, Tokens};
pub use status::{StatusBroadcaster, StatusSubscription};
pub use transitions::{step, transition};
