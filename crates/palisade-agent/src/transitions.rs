// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::event::Event;
use palisade_common::AgentState;
use tracing::warn;

struct Transition {
	event: Event,
	sources: &'static [AgentState],
	target: AgentState,
}

const TRANSITIONS: &[Transition] = &[
	Transition {
		event: Event::Login,
		sources: &[AgentState::Disconnected],
		target: AgentState::Authenticating,
	},
	Transition {
		event: Event::Authenticated,
		sources: &[AgentState::Authenticating],
		target: AgentState::Bootstrapping,
	},
	Transition {
		event: Event::Bootstrapped,
		sources: &[AgentState::Bootstrapping],
		target: AgentState::Connected,
	},
	Transition {
		event: Event::Disconnect,
		sources: &[
			AgentState::Connected,
			AgentState::Authenticating,
			AgentState::Bootstrapping,
		],
		target: AgentState::Disconnected,
	},
];

/// Target state for `event` in `from`, or `None` if the table has no row.
pub fn transition(event: Event, from: AgentState) -> Option<AgentState> {
	TRANSITIONS
		.iter()
		.find(|t| t.event == event && t.sources.contains(&from))
		.map(|t| t.target)
}

/// Applies `event`, staying in `from` when it is not allowed there.
pub fn step(from: AgentState, event: Event) -> AgentState {
	match transition(event, from) {
		Some(to) => to,
		None => {
			warn!(state = %from, %event, "invalid state transition, event dropped");
			from
		}
	}
}
