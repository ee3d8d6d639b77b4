// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;
use tracing::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
	Login,
	Authenticated,
	Bootstrapped,
	Disconnect,
	/// Produced by a state that has nothing more to do until outside input.
	WaitForExternalEvent,
}

impl Event {
	pub const ALL: [Event; 5] = [
		Event::Login,
		Event::Authenticated,
		Event::Bootstrapped,
		Event::Disconnect,
		Event::WaitForExternalEvent,
	];

	pub fn name(&self) -> &'static str {
		match self {
			Event::Login => "Login",
			Event::Authenticated => "Authenticated",
			Event::Bootstrapped => "Bootstrapped",
			Event::Disconnect => "Disconnect",
			Event::WaitForExternalEvent => "WaitForExternalEvent",
		}
	}
}

impl fmt::Display for Event {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

/// Event returned by a state's `enter`, tagged with the span it ran in.
#[derive(Debug, Clone)]
pub struct EventWithSpan {
	pub event: Event,
	pub span: Span,
}

impl EventWithSpan {
	pub fn new(event: Event, span: Span) -> Self {
		Self { event, span }
	}

	/// Tags `event` with the span that is current at the call site.
	pub fn in_current_span(event: Event) -> Self {
		Self::new(event, Span::current())
	}
}
