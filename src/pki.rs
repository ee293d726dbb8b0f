//! Certificate authority bootstrap (easy-rsa 2)

use crate::config::Settings;
use crate::env_source::{VarsMapping, source_vars};
use crate::exec::{CommandExecutor, Invocation, path_arg};
use crate::template;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Output;

/// `revoke-full` ends by verifying the revoked certificate against the new
/// CRL. That check fails ("error 23 ... certificate revoked") and the script
/// exits with this code when revocation worked.
///
/// The same code comes back when verify cannot load `<name>.crt` at all, e.g.
/// for a client that was never issued, so [`revoke_certificate`] also
/// requires [`REVOKED_VERIFY_MARKER`] in the output.
pub const REVOKE_FULL_REVOKED: i32 = 2;

/// openssl verify's report for a certificate found on the CRL
pub const REVOKED_VERIFY_MARKER: &str = "error 23";

/// Name of the certificate issued for the server
pub const SERVER_CERT_NAME: &str = "server";

/// An easy-rsa directory together with the environment its `vars` file yields
#[derive(Debug, Clone)]
pub struct CaEnvironment {
    ca_dir: PathBuf,
    vars: VarsMapping,
    key_dir: PathBuf,
    key_size: u32,
}

impl CaEnvironment {
    /// Source `<ca_dir>/vars` and validate the variables later steps rely on
    pub fn load(exec: &dyn CommandExecutor, ca_dir: &Path) -> Result<Self> {
        if !ca_dir.is_dir() {
            anyhow::bail!(
                "Certificate authority not found at {}\n\nRun 'ovpn ca' or 'ovpn setup' first",
                ca_dir.display()
            );
        }
        let ca_dir = absolute_dir(ca_dir)?;
        let vars = source_vars(exec, &ca_dir.join("vars"), &ca_dir)?;
        Self::from_vars(&ca_dir, vars)
    }

    pub fn from_vars(ca_dir: &Path, vars: VarsMapping) -> Result<Self> {
        let key_dir = PathBuf::from(vars.require("KEY_DIR")?);
        let key_size_raw = vars.require("KEY_SIZE")?;
        let key_size = key_size_raw
            .parse()
            .with_context(|| format!("Invalid KEY_SIZE in vars file: {}", key_size_raw))?;

        Ok(Self {
            ca_dir: ca_dir.to_path_buf(),
            vars,
            key_dir,
            key_size,
        })
    }

    pub fn ca_dir(&self) -> &Path {
        &self.ca_dir
    }

    pub fn vars(&self) -> &VarsMapping {
        &self.vars
    }

    pub fn key_dir(&self) -> &Path {
        &self.key_dir
    }

    pub fn key_size(&self) -> u32 {
        self.key_size
    }

    pub fn key_file(&self, name: &str) -> PathBuf {
        self.key_dir.join(name)
    }

    pub fn dh_file(&self) -> PathBuf {
        self.key_file(&format!("dh{}.pem", self.key_size))
    }

    pub fn hmac_file(&self) -> PathBuf {
        self.key_file("ta.key")
    }

    pub fn crl_file(&self) -> PathBuf {
        self.key_file("crl.pem")
    }

    /// Command running in the CA directory with the sourced environment
    pub fn invocation(&self, program: &str) -> Invocation {
        Invocation::new(program)
            .current_dir(&self.ca_dir)
            .envs(self.vars.as_map())
    }

    /// One of the easy-rsa scripts shipped inside the CA directory
    pub fn tool(&self, script: &str) -> Invocation {
        self.invocation(&path_arg(&self.ca_dir.join(script)))
    }
}

/// Create a fresh CA directory and generate the CA, server certificate,
/// DH parameters and HMAC key. The directory must not exist yet.
pub fn bootstrap_ca(exec: &dyn CommandExecutor, settings: &Settings) -> Result<CaEnvironment> {
    let paths = &settings.paths;
    if paths.ca_dir.exists() {
        anyhow::bail!(
            "CA directory already exists: {}\n\nRemove it or point paths.ca_dir elsewhere",
            paths.ca_dir.display()
        );
    }

    let ca_dir = absolute_dir(&paths.ca_dir)?;

    println!("Setting up certificate authority directory...");
    exec.run(&Invocation::new("make-cadir").arg(path_arg(&ca_dir)))?;

    println!("Creating vars file from template...");
    template::render_file(&paths.vars_template(), &ca_dir.join("vars"), &settings.ca_vars())?;

    println!("Sourcing vars file...");
    let ca = CaEnvironment::load(exec, &ca_dir)?;

    generate_server_keys(exec, &ca)?;
    println!("✓ Certificate authority ready in {}", ca.ca_dir().display());
    Ok(ca)
}

/// Commands run inside the CA directory, so a relative path would be
/// resolved a second time against itself.
fn absolute_dir(dir: &Path) -> Result<PathBuf> {
    std::path::absolute(dir)
        .with_context(|| format!("Failed to resolve CA directory: {}", dir.display()))
}

fn generate_server_keys(exec: &dyn CommandExecutor, ca: &CaEnvironment) -> Result<()> {
    println!("Cleaning up before key generation (clean-all)...");
    exec.run(&ca.tool("clean-all"))?;

    println!("Initializing certificate authority (pkitool --initca)...");
    exec.run(&ca.tool("pkitool").arg("--initca"))?;

    println!("Creating server certificate (pkitool --server)...");
    exec.run(&ca.tool("pkitool").args(["--server", SERVER_CERT_NAME]))?;

    // -dsaparam: DSA-style generation, far faster at this key size
    println!("Generating Diffie-Hellman parameters...");
    exec.run(&ca.invocation("openssl").args([
        "dhparam".to_string(),
        "-dsaparam".to_string(),
        "-out".to_string(),
        path_arg(&ca.dh_file()),
        ca.key_size().to_string(),
    ]))?;

    println!("Generating OpenVPN HMAC key...");
    exec.run(&ca.invocation("openvpn").args([
        "--genkey".to_string(),
        "--secret".to_string(),
        path_arg(&ca.hmac_file()),
    ]))?;

    Ok(())
}

/// Initialize the certificate revocation list, returning the path of `crl.pem`
pub fn init_crl(exec: &dyn CommandExecutor, ca: &CaEnvironment) -> Result<PathBuf> {
    println!("Initializing revocation list...");
    exec.run(&ca.tool("pkitool").arg("CRL_INIT"))?;
    revoke_full(exec, ca, "CRL_INIT")?;
    Ok(ca.crl_file())
}

fn revoke_full(exec: &dyn CommandExecutor, ca: &CaEnvironment, name: &str) -> Result<Output> {
    let output = exec.run(
        &ca.tool("revoke-full")
            .arg(name)
            .capture_output()
            .accept_code(REVOKE_FULL_REVOKED),
    )?;
    print!("{}", String::from_utf8_lossy(&output.stdout));
    Ok(output)
}

/// Revoke the issued certificate `name` and regenerate `crl.pem`. Exit code
/// 2 only counts when verify reported the certificate as revoked.
pub fn revoke_certificate(
    exec: &dyn CommandExecutor,
    ca: &CaEnvironment,
    name: &str,
) -> Result<()> {
    let output = revoke_full(exec, ca, name)?;

    if output.status.code() == Some(REVOKE_FULL_REVOKED) {
        let reported = [&output.stdout, &output.stderr]
            .iter()
            .any(|stream| String::from_utf8_lossy(stream).contains(REVOKED_VERIFY_MARKER));
        if !reported {
            anyhow::bail!(
                "revoke-full {} exited with code {} without confirming the revocation\n\nIs there an issued certificate named '{}' in {}?",
                name,
                REVOKE_FULL_REVOKED,
                name,
                ca.key_dir().display()
            );
        }
    }
    Ok(())
}

/// Files the server needs from the CA key directory
pub fn server_artifacts(ca: &CaEnvironment) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = ["ca.crt", "ca.key", "server.crt", "server.key", "ta.key"]
        .iter()
        .map(|name| ca.key_file(name))
        .collect();
    files.push(ca.dh_file());
    files
}
