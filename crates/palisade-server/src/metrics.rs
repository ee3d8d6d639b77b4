// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use prometheus::{CounterVec, Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};

/// Push-path counters and gauges. Export is left to the embedder via
/// [`PushMetrics::encode`] or [`PushMetrics::registry`].
pub struct PushMetrics {
	registry: Registry,

	pub device_configs_returned: CounterVec,
	pub gateway_configs_returned: CounterVec,
	pub devices_connected: Gauge,
	pub gateways_connected: Gauge,
	pub privileged_users: GaugeVec,
}

impl PushMetrics {
	pub fn new() -> Result<Self, prometheus::Error> {
		let registry = Registry::new();

		let device_configs_returned = CounterVec::new(
			Opts::new(
				"palisade_device_configs_returned_total",
				"Healthy device configurations delivered",
			),
			&["serial", "username"],
		)?;
		registry.register(Box::new(device_configs_returned.clone()))?;

		let gateway_configs_returned = CounterVec::new(
			Opts::new(
				"palisade_gateway_configs_returned_total",
				"Gateway configurations delivered",
			),
			&["gateway"],
		)?;
		registry.register(Box::new(gateway_configs_returned.clone()))?;

		let devices_connected = Gauge::new(
			"palisade_devices_connected",
			"Device sessions holding an open config stream",
		)?;
		registry.register(Box::new(devices_connected.clone()))?;

		let gateways_connected = Gauge::new(
			"palisade_gateways_connected",
			"Gateways holding an open config stream",
		)?;
		registry.register(Box::new(gateways_connected.clone()))?;

		let privileged_users = GaugeVec::new(
			Opts::new(
				"palisade_privileged_users",
				"Principals with just-in-time access at the last push",
			),
			&["gateway"],
		)?;
		registry.register(Box::new(privileged_users.clone()))?;

		Ok(Self {
			registry,
			device_configs_returned,
			gateway_configs_returned,
			devices_connected,
			gateways_connected,
			privileged_users,
		})
	}

	pub fn registry(&self) -> &Registry {
		&self.registry
	}

	pub fn record_device_config(&self, serial: &str, username: &str) {
		self.device_configs_returned
			.with_label_values(&[serial, username])
			.inc();
	}

	pub fn record_gateway_config(&self, gateway: &str, privileged_users: usize) {
		self.gateway_configs_returned
			.with_label_values(&[gateway])
			.inc();
		self.privileged_users
			.with_label_values(&[gateway])
			.set(privileged_users as f64);
	}

	/// Renders the Prometheus text format.
	pub fn encode(&self) -> Result<String, prometheus::Error> {
		let encoder = TextEncoder::new();
		let metric_families = self.registry.gather();
		let mut buffer = Vec::new();
		encoder.encode(&metric_families, &mut buffer)?;
		String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
	}
}
