use crate::config::Settings;
use crate::exec::CommandExecutor;
use crate::network;
use anyhow::Result;

/// Handle `ovpn network`
pub fn handle_network(exec: &dyn CommandExecutor, settings: &Settings) -> Result<()> {
    super::preflight(exec, &["iptables"])?;
    network::configure_network(exec, settings)
}
