//! Server provisioning: CA, server.conf, key installation, CRL, network and service

use crate::config::Settings;
use crate::exec::{CommandExecutor, Invocation};
use crate::network;
use crate::pki::{self, CaEnvironment};
use crate::template;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Full setup: bootstrap a new CA, then install and start the server
pub fn provision(exec: &dyn CommandExecutor, settings: &Settings) -> Result<()> {
    let ca = pki::bootstrap_ca(exec, settings)?;
    install_server(exec, settings, &ca)?;
    println!();
    println!("✓ OpenVPN server provisioned");
    Ok(())
}

/// Install and start the server from an already bootstrapped CA
pub fn install_from_existing_ca(exec: &dyn CommandExecutor, settings: &Settings) -> Result<()> {
    let ca = CaEnvironment::load(exec, &settings.paths.ca_dir)?;
    install_server(exec, settings, &ca)?;
    println!();
    println!("✓ OpenVPN server installed");
    Ok(())
}

pub fn install_server(
    exec: &dyn CommandExecutor,
    settings: &Settings,
    ca: &CaEnvironment,
) -> Result<()> {
    let mut vars = settings.server_conf_vars()?;

    let openvpn_dir = &settings.paths.openvpn_dir;
    fs::create_dir_all(openvpn_dir)
        .with_context(|| format!("Failed to create directory: {}", openvpn_dir.display()))?;

    println!("Generating server.conf...");
    vars.insert("dh".to_string(), file_name(&ca.dh_file())?);
    template::render_file(
        &settings.paths.server_template(),
        &settings.paths.server_conf(),
        &vars,
    )?;

    println!("Copying keys and certificates to {}...", openvpn_dir.display());
    for artifact in pki::server_artifacts(ca) {
        copy_into(&artifact, openvpn_dir)?;
    }

    let crl = pki::init_crl(exec, ca)?;
    copy_into(&crl, openvpn_dir)?;

    network::configure_network(exec, settings)?;

    println!("Starting OpenVPN...");
    systemctl(exec, "start", &settings.server.unit)?;
    println!("✓ {} started", settings.server.unit);
    Ok(())
}

/// Copy `file` into `dir`, keeping its name
pub fn copy_into(file: &Path, dir: &Path) -> Result<PathBuf> {
    let dest = dir.join(file_name(file)?);
    fs::copy(file, &dest).with_context(|| {
        format!(
            "Failed to copy {} to {}",
            file.display(),
            dest.display()
        )
    })?;
    log::debug!("copied {} -> {}", file.display(), dest.display());
    Ok(dest)
}

pub fn systemctl(exec: &dyn CommandExecutor, action: &str, unit: &str) -> Result<()> {
    exec.run(&Invocation::new("systemctl").args([action, unit]))?;
    Ok(())
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("Path has no file name: {}", path.display()))
}
