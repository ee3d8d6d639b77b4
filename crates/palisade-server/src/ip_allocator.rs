// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Overlay address allocation.
//!
//! The two families deliberately differ: the v4 pool is small, so every call
//! scans from the lowest host and reuses freed addresses, while the v6 pool
//! only ever appends after the highest address handed out.

use crate::directory::{Directory, EntityRef};
use crate::error::{Result, ServerError};
use ipnet::{Ipv4Net, Ipv6Net};
use palisade_common::{Device, Gateway};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tokio::sync::Mutex;
use tracing::{info, instrument};

/// Lowest host address of `prefix` that is not in `taken`.
///
/// Network and broadcast addresses are never returned, except for a `/32`
/// whose single address is the host.
pub fn next_ipv4(prefix: Ipv4Net, taken: &[Ipv4Addr]) -> Result<Ipv4Addr> {
	let network = u32::from(prefix.network());
	let broadcast = u32::from(prefix.broadcast());
	let (first, last) = if prefix.prefix_len() == 32 {
		(network, network)
	} else if broadcast - network < 2 {
		// /31 has no host left once both ends are excluded
		return Err(exhausted(prefix));
	} else {
		(network + 1, broadcast - 1)
	};

	let taken: HashSet<u32> = taken.iter().map(|ip| u32::from(*ip)).collect();
	(first..=last)
		.find(|candidate| !taken.contains(candidate))
		.map(Ipv4Addr::from)
		.ok_or_else(|| exhausted(prefix))
}

/// Successor of the highest taken address inside `prefix`, or the prefix's
/// own address when nothing is taken yet. Never fills gaps.
pub fn next_ipv6(prefix: Ipv6Net, taken: &[Ipv6Addr]) -> Result<Ipv6Addr> {
	let highest = taken
		.iter()
		.filter(|ip| prefix.contains(*ip))
		.map(|ip| u128::from(*ip))
		.max();

	let candidate = match highest {
		Some(highest) => highest.checked_add(1),
		None => {
			let own = u128::from(prefix.addr());
			if own == u128::from(prefix.network()) && prefix.prefix_len() < 128 {
				// all-zero host part is the subnet-router anycast address
				own.checked_add(1)
			} else {
				Some(own)
			}
		}
	};

	candidate
		.map(Ipv6Addr::from)
		.filter(|ip| prefix.contains(ip))
		.ok_or_else(|| exhausted(prefix))
}

fn exhausted(prefix: impl std::fmt::Display) -> ServerError {
	ServerError::PoolExhausted {
		pool: prefix.to_string(),
	}
}

#[derive(Debug, Clone)]
pub struct Ipv4Allocator {
	prefix: Ipv4Net,
	reserved: Vec<Ipv4Addr>,
}

impl Ipv4Allocator {
	pub fn new(prefix: Ipv4Net, reserved: Vec<Ipv4Addr>) -> Self {
		Self { prefix, reserved }
	}

	pub fn prefix(&self) -> Ipv4Net {
		self.prefix
	}

	/// `taken` need not include the reserved addresses; they are always added.
	pub fn next(&self, taken: &[Ipv4Addr]) -> Result<Ipv4Addr> {
		let mut all = Vec::with_capacity(taken.len() + self.reserved.len());
		all.extend_from_slice(taken);
		all.extend_from_slice(&self.reserved);
		next_ipv4(self.prefix, &all)
	}
}

#[derive(Debug, Clone)]
pub struct Ipv6Allocator {
	prefix: Ipv6Net,
}

impl Ipv6Allocator {
	pub fn new(prefix: Ipv6Net) -> Self {
		Self { prefix }
	}

	pub fn prefix(&self) -> Ipv6Net {
		self.prefix
	}

	pub fn next(&self, taken: &[Ipv6Addr]) -> Result<Ipv6Addr> {
		next_ipv6(self.prefix, taken)
	}
}

/// Addresses assigned to an entity after [`AddressPools`] ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssignedAddresses {
	pub ipv4: Ipv4Addr,
	pub ipv6: Ipv6Addr,
}

/// Both pools plus the locks that serialize allocate-then-persist per family.
pub struct AddressPools {
	v4: Ipv4Allocator,
	v6: Ipv6Allocator,
	v4_lock: Mutex<()>,
	v6_lock: Mutex<()>,
}

impl AddressPools {
	pub fn new(v4: Ipv4Allocator, v6: Ipv6Allocator) -> Self {
		Self {
			v4,
			v6,
			v4_lock: Mutex::new(()),
			v6_lock: Mutex::new(()),
		}
	}

	pub fn v4(&self) -> &Ipv4Allocator {
		&self.v4
	}

	pub fn v6(&self) -> &Ipv6Allocator {
		&self.v6
	}

	/// Gives the device any address it is still missing. Existing addresses
	/// are kept.
	#[instrument(skip(self, directory, device), fields(device_id = %device.id, serial = %device.serial))]
	pub async fn assign_device(&self, directory: &dyn Directory, device: &Device) -> Result<AssignedAddresses> {
		let entity = EntityRef::Device(device.id);
		self.assign(directory, &entity, device.ipv4, device.ipv6).await
	}

	#[instrument(skip(self, directory, gateway), fields(gateway = %gateway.name))]
	pub async fn assign_gateway(&self, directory: &dyn Directory, gateway: &Gateway) -> Result<AssignedAddresses> {
		let entity = EntityRef::Gateway(gateway.name.clone());
		self.assign(directory, &entity, gateway.ipv4, gateway.ipv6).await
	}

	async fn assign(
		&self,
		directory: &dyn Directory,
		entity: &EntityRef,
		ipv4: Option<Ipv4Addr>,
		ipv6: Option<Ipv6Addr>,
	) -> Result<AssignedAddresses> {
		let ipv4 = match ipv4 {
			Some(ip) => ip,
			None => {
				let _guard = self.v4_lock.lock().await;
				let (devices, gateways) = taken_addresses(directory).await?;
				let taken: Vec<Ipv4Addr> = devices
					.iter()
					.map(|d| d.ipv4)
					.chain(gateways.iter().map(|g| g.ipv4))
					.flatten()
					.collect();
				let ip = self.v4.next(&taken)?;
				directory.assign_address(entity, IpAddr::V4(ip)).await?;
				info!(%entity, %ip, "assigned IPv4 address");
				ip
			}
		};

		let ipv6 = match ipv6 {
			Some(ip) => ip,
			None => {
				let _guard = self.v6_lock.lock().await;
				let (devices, gateways) = taken_addresses(directory).await?;
				let taken: Vec<Ipv6Addr> = devices
					.iter()
					.map(|d| d.ipv6)
					.chain(gateways.iter().map(|g| g.ipv6))
					.flatten()
					.collect();
				let ip = self.v6.next(&taken)?;
				directory.assign_address(entity, IpAddr::V6(ip)).await?;
				info!(%entity, %ip, "assigned IPv6 address");
				ip
			}
		};

		Ok(AssignedAddresses { ipv4, ipv6 })
	}
}

async fn taken_addresses(directory: &dyn Directory) -> Result<(Vec<Device>, Vec<Gateway>)> {
	let devices = directory.list_devices().await?;
	let gateways = directory.list_gateways().await?;
	Ok((devices, gateways))
}
