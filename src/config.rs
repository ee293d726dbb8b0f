//! Provisioning settings
//!
//! Settings come from built-in defaults, an optional `ovpn.toml`, a `.env`
//! file and `OVPN_*` environment variables, in that order.

use crate::exec::shell_escape;
use crate::network::split_subnet;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "ovpn.toml";

pub type Mapping = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub ca: CaIdentity,
    pub server: ServerSettings,
    pub network: NetworkSettings,
    pub paths: Paths,
}

/// Identity fields written into the easy-rsa vars file
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaIdentity {
    pub country: String,
    pub province: String,
    pub city: String,
    pub org: String,
    pub email: String,
    pub ou: String,
    pub name: String,
    pub key_size: u32,
}

impl Default for CaIdentity {
    fn default() -> Self {
        Self {
            country: "US".to_string(),
            province: "MI".to_string(),
            city: "Detroit".to_string(),
            org: "LiquidInvestigations".to_string(),
            email: "support@liquiddemo.org".to_string(),
            ou: "node".to_string(),
            name: "detroit-liquid.local".to_string(),
            key_size: 2048,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    pub port: u16,
    pub protocol: String,
    /// Public address clients connect to
    pub address: Option<String>,
    /// systemd unit running the server
    pub unit: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 1192,
            protocol: "tcp".to_string(),
            address: None,
            unit: "openvpn@server".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkSettings {
    /// Address pool handed to clients, in CIDR notation. Also the
    /// destination range exempt from masquerading.
    pub subnet: String,
    pub ip_forward_path: PathBuf,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            subnet: "10.8.0.0/24".to_string(),
            ip_forward_path: PathBuf::from("/proc/sys/net/ipv4/ip_forward"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Paths {
    pub templates: PathBuf,
    pub ca_dir: PathBuf,
    pub openvpn_dir: PathBuf,
    /// Where client profiles are written
    pub client_dir: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            templates: PathBuf::from("templates"),
            ca_dir: PathBuf::from("/etc/openvpn/openvpn-ca"),
            openvpn_dir: PathBuf::from("/etc/openvpn"),
            client_dir: PathBuf::from("."),
        }
    }
}

impl Paths {
    pub fn vars_template(&self) -> PathBuf {
        self.templates.join("vars.j2")
    }

    pub fn server_template(&self) -> PathBuf {
        self.templates.join("server.conf.j2")
    }

    pub fn client_template(&self) -> PathBuf {
        self.templates.join("client.ovpn.j2")
    }

    pub fn server_conf(&self) -> PathBuf {
        self.openvpn_dir.join("server.conf")
    }
}

impl Settings {
    /// Load settings from `path`, or from `ovpn.toml` in the working
    /// directory when it exists, then apply `.env` / `OVPN_*` overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };

        if let Ok(env_path) = dotenv::dotenv() {
            log::debug!("loaded environment from {}", env_path.display());
        }
        settings.apply_env(|key| env::var(key).ok())?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `OVPN_*` overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("OVPN_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("Invalid OVPN_PORT: {}", port))?;
        }
        if let Some(protocol) = lookup("OVPN_PROTOCOL") {
            self.server.protocol = protocol;
        }
        if let Some(address) = lookup("OVPN_SERVER_ADDRESS") {
            self.server.address = Some(address);
        }
        if let Some(dir) = lookup("OVPN_CA_DIR") {
            self.paths.ca_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("OVPN_OPENVPN_DIR") {
            self.paths.openvpn_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("OVPN_TEMPLATES_DIR") {
            self.paths.templates = PathBuf::from(dir);
        }
        Ok(())
    }

    /// Mapping for the vars template. The rendered file is sourced by a
    /// shell, so identity values arrive already shell-quoted.
    pub fn ca_vars(&self) -> Mapping {
        let ca = &self.ca;
        [
            ("key_country", &ca.country),
            ("key_province", &ca.province),
            ("key_city", &ca.city),
            ("key_org", &ca.org),
            ("key_email", &ca.email),
            ("key_ou", &ca.ou),
            ("key_name", &ca.name),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), shell_escape(v)))
        .chain(std::iter::once((
            "key_size".to_string(),
            ca.key_size.to_string(),
        )))
        .collect()
    }

    /// Mapping shared by the server and client templates
    pub fn server_vars(&self) -> Mapping {
        let mut vars = Mapping::new();
        vars.insert("port".to_string(), self.server.port.to_string());
        vars.insert("protocol".to_string(), self.server.protocol.clone());
        vars
    }

    /// Mapping for server.conf: the shared values plus the client address
    /// pool taken from `network.subnet`
    pub fn server_conf_vars(&self) -> Result<Mapping> {
        let (network, netmask) = split_subnet(&self.network.subnet)?;
        let mut vars = self.server_vars();
        vars.insert("subnet".to_string(), self.network.subnet.clone());
        vars.insert("server_network".to_string(), network.to_string());
        vars.insert("server_netmask".to_string(), netmask.to_string());
        Ok(vars)
    }

    pub fn server_address(&self) -> Result<&str> {
        self.server.address.as_deref().context(
            "Server address not configured\n\nAdd to ovpn.toml:\n  [server]\n  address = \"vpn.example.com\"\n\nor to .env:\n  OVPN_SERVER_ADDRESS=\"vpn.example.com\"",
        )
    }
}
