//! Client key command handler

use crate::client::{self, ClientName};
use crate::config::Settings;
use crate::exec::CommandExecutor;
use anyhow::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAction {
    Create,
    Revoke,
}

/// Handle `ovpn client <name> --create|--revoke`
pub fn handle_client(
    exec: &dyn CommandExecutor,
    settings: &Settings,
    name: &str,
    action: ClientAction,
) -> Result<()> {
    let name = ClientName::parse(name)?;
    match action {
        ClientAction::Create => {
            super::preflight(exec, &["bash"])?;
            client::create_client(exec, settings, &name)?;
        }
        ClientAction::Revoke => {
            super::preflight(exec, &["bash", "systemctl"])?;
            client::revoke_client(exec, settings, &name)?;
        }
    }
    Ok(())
}
