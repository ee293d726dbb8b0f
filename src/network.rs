//! IP forwarding and NAT rules for VPN traffic
//!
//! Rules are appended on every run; nothing checks whether they are
//! already present.

use crate::config::Settings;
use crate::exec::{CommandExecutor, Invocation};
use anyhow::{Context, Result};
use std::fs;
use std::net::Ipv4Addr;

/// Split a CIDR range such as `10.8.0.0/24` into the network address and
/// dotted netmask that OpenVPN's `server` directive takes. Host bits are
/// cleared.
pub fn split_subnet(cidr: &str) -> Result<(Ipv4Addr, Ipv4Addr)> {
    let invalid = || format!("Invalid subnet '{}': expected CIDR notation such as 10.8.0.0/24", cidr);

    let (address, prefix) = cidr.split_once('/').with_context(invalid)?;
    let address: Ipv4Addr = address.trim().parse().with_context(invalid)?;
    let prefix: u32 = prefix.trim().parse().with_context(invalid)?;
    if prefix > 32 {
        anyhow::bail!(invalid());
    }

    let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
    Ok((
        Ipv4Addr::from(u32::from(address) & mask),
        Ipv4Addr::from(mask),
    ))
}

pub fn masquerade_rule(subnet: &str) -> Invocation {
    Invocation::new("iptables").args([
        "-t",
        "nat",
        "-A",
        "POSTROUTING",
        "!",
        "-d",
        subnet,
        "-j",
        "MASQUERADE",
    ])
}

pub fn forward_rule() -> Invocation {
    Invocation::new("iptables").args(["-A", "FORWARD", "-j", "ACCEPT"])
}

/// Enable IP forwarding and append the masquerade and forward rules
pub fn configure_network(exec: &dyn CommandExecutor, settings: &Settings) -> Result<()> {
    let network = &settings.network;

    println!("Turning on IP forwarding...");
    fs::write(&network.ip_forward_path, "1").with_context(|| {
        format!(
            "Failed to enable IP forwarding via {}",
            network.ip_forward_path.display()
        )
    })?;

    println!("Enabling masquerading outside {}...", network.subnet);
    exec.run(&masquerade_rule(&network.subnet))?;

    println!("Enabling forwarding...");
    exec.run(&forward_rule())?;

    println!("✓ Network configured");
    Ok(())
}
