// Command module routing
//
// Each subcommand has a handler in its own file. Handlers load settings,
// run the preflight checks and call into the library modules.

pub mod client;
pub mod network;
pub mod server;

use crate::config::Settings;
use crate::exec::{CommandExecutor, require_commands};
use anyhow::Result;
use std::path::PathBuf;

pub use client::ClientAction;

/// Subcommands of the `ovpn` binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ca,
    Server,
    Setup,
    Network,
    Client { name: String, action: ClientAction },
}

/// Path options given on the command line; they win over file and environment settings
#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub config: Option<PathBuf>,
    pub templates: Option<PathBuf>,
    pub ca_dir: Option<PathBuf>,
    pub openvpn_dir: Option<PathBuf>,
    pub client_dir: Option<PathBuf>,
}

impl PathOverrides {
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(dir) = &self.templates {
            settings.paths.templates = dir.clone();
        }
        if let Some(dir) = &self.ca_dir {
            settings.paths.ca_dir = dir.clone();
        }
        if let Some(dir) = &self.openvpn_dir {
            settings.paths.openvpn_dir = dir.clone();
        }
        if let Some(dir) = &self.client_dir {
            settings.paths.client_dir = dir.clone();
        }
    }
}

pub fn load_settings(overrides: &PathOverrides) -> Result<Settings> {
    let mut settings = Settings::load(overrides.config.as_deref())?;
    overrides.apply(&mut settings);
    log::debug!("settings: {:?}", settings);
    Ok(settings)
}

/// Dispatch command to appropriate handler
pub fn handle_command(
    exec: &dyn CommandExecutor,
    overrides: &PathOverrides,
    command: Command,
) -> Result<()> {
    let settings = load_settings(overrides)?;
    match command {
        Command::Ca => server::handle_ca(exec, &settings),
        Command::Server => server::handle_server(exec, &settings),
        Command::Setup => server::handle_setup(exec, &settings),
        Command::Network => network::handle_network(exec, &settings),
        Command::Client { name, action } => client::handle_client(exec, &settings, &name, action),
    }
}

/// Check tools are installed and warn when not running as root
pub(crate) fn preflight(exec: &dyn CommandExecutor, commands: &[&str]) -> Result<()> {
    let user = whoami::username();
    if user != "root" {
        eprintln!("⚠ Warning: running as '{}', not root", user);
        eprintln!("  Writing to /etc/openvpn, /proc and the firewall usually requires root");
    }
    require_commands(exec, commands)
}
