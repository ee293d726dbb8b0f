//! CA and server command handlers

use crate::config::Settings;
use crate::exec::CommandExecutor;
use crate::{pki, server};
use anyhow::Result;

const CA_TOOLS: &[&str] = &["make-cadir", "bash", "openssl", "openvpn"];
const SERVER_TOOLS: &[&str] = &["bash", "iptables", "systemctl"];

/// Handle `ovpn ca`
pub fn handle_ca(exec: &dyn CommandExecutor, settings: &Settings) -> Result<()> {
    super::preflight(exec, CA_TOOLS)?;
    pki::bootstrap_ca(exec, settings)?;
    Ok(())
}

/// Handle `ovpn server`
pub fn handle_server(exec: &dyn CommandExecutor, settings: &Settings) -> Result<()> {
    super::preflight(exec, SERVER_TOOLS)?;
    server::install_from_existing_ca(exec, settings)
}

/// Handle `ovpn setup`
pub fn handle_setup(exec: &dyn CommandExecutor, settings: &Settings) -> Result<()> {
    let mut tools = CA_TOOLS.to_vec();
    tools.extend(SERVER_TOOLS.iter().copied().filter(|t| !CA_TOOLS.contains(t)));
    super::preflight(exec, &tools)?;
    server::provision(exec, settings)
}
