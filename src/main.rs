use anyhow::Result;
use clap::{ArgGroup, Parser, Subcommand};
use ovpn_provision::commands::{self, ClientAction, Command, PathOverrides};
use ovpn_provision::exec::LocalExecutor;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ovpn")]
#[command(about = "OpenVPN provisioning - certificate authority, server and client profiles", long_about = None)]
struct Cli {
    /// Settings file (default: ./ovpn.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory holding vars.j2, server.conf.j2 and client.ovpn.j2
    #[arg(long, global = true)]
    templates: Option<PathBuf>,
    /// easy-rsa certificate authority directory
    #[arg(long, global = true)]
    ca_dir: Option<PathBuf>,
    /// OpenVPN configuration directory
    #[arg(long, global = true)]
    openvpn_dir: Option<PathBuf>,
    /// Log every external command
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a certificate authority with server certificate, DH parameters and HMAC key
    Ca,
    /// Install server.conf, keys and CRL from an existing CA, configure the network and start OpenVPN
    Server,
    /// Create the CA, then install and start the server
    Setup,
    /// Enable IP forwarding and add NAT / forwarding firewall rules
    Network,
    /// Create or revoke client keys, generating an .ovpn file as needed
    #[command(group(ArgGroup::new("action").required(true).args(["create", "revoke"])))]
    Client {
        /// The name for the client
        name: String,
        /// Create client keys and an .ovpn profile
        #[arg(long, short = 'c')]
        create: bool,
        /// Revoke client keys and reload the revocation list
        #[arg(long, short = 'r')]
        revoke: bool,
        /// Directory the .ovpn profile is written to
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let mut overrides = PathOverrides {
        config: cli.config,
        templates: cli.templates,
        ca_dir: cli.ca_dir,
        openvpn_dir: cli.openvpn_dir,
        client_dir: None,
    };

    let command = match cli.command {
        Commands::Ca => Command::Ca,
        Commands::Server => Command::Server,
        Commands::Setup => Command::Setup,
        Commands::Network => Command::Network,
        Commands::Client {
            name,
            create,
            revoke: _,
            output,
        } => {
            overrides.client_dir = output;
            let action = if create {
                ClientAction::Create
            } else {
                ClientAction::Revoke
            };
            Command::Client { name, action }
        }
    };

    commands::handle_command(&LocalExecutor, &overrides, command)
}
