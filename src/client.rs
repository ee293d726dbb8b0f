//! Client certificate lifecycle and `.ovpn` profile generation

use crate::config::{Mapping, Settings};
use crate::exec::CommandExecutor;
use crate::pki::{self, CaEnvironment};
use crate::server::{copy_into, systemctl};
use crate::template;
use anyhow::{Context, Result};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

/// Names whose key files would collide with the CA's own material
const RESERVED_NAMES: &[&str] = &["ca", "server", "ta", "dh", "crl", "CRL_INIT"];

/// Client identity, used as certificate common name and file stem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientName(String);

impl ClientName {
    pub fn parse(name: &str) -> Result<Self> {
        if name.is_empty() {
            anyhow::bail!("Client name must not be empty");
        }
        if name.starts_with('-') || name.starts_with('.') {
            anyhow::bail!("Client name must not start with '-' or '.': {}", name);
        }
        if let Some(c) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@')))
        {
            anyhow::bail!("Invalid character {:?} in client name: {}", c, name);
        }
        if RESERVED_NAMES.contains(&name) {
            anyhow::bail!("Client name '{}' is reserved", name);
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn profile_file_name(&self) -> String {
        format!("{}.ovpn", self.0)
    }
}

impl FromStr for ClientName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ClientName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Issue a certificate for `name` and write `<client_dir>/<name>.ovpn`
pub fn create_client(
    exec: &dyn CommandExecutor,
    settings: &Settings,
    name: &ClientName,
) -> Result<PathBuf> {
    let remote = settings.server_address()?;
    let ca = CaEnvironment::load(exec, &settings.paths.ca_dir)?;

    println!("Creating client certificate for {}...", name);
    exec.run(&ca.tool("pkitool").arg(name.as_str()))?;

    println!("Generating client profile...");
    let vars = profile_vars(settings, &ca, name, remote)?;

    let client_dir = &settings.paths.client_dir;
    fs::create_dir_all(client_dir)
        .with_context(|| format!("Failed to create directory: {}", client_dir.display()))?;
    let profile = client_dir.join(name.profile_file_name());
    template::render_file(&settings.paths.client_template(), &profile, &vars)?;

    println!("✓ Client profile written to {}", profile.display());
    Ok(profile)
}

/// Template mapping for a client profile. Every key file must be present.
pub fn profile_vars(
    settings: &Settings,
    ca: &CaEnvironment,
    name: &ClientName,
    remote: &str,
) -> Result<Mapping> {
    let mut vars = settings.server_vars();
    vars.insert("remote".to_string(), remote.to_string());

    let blobs = [
        ("ca", "ca.crt".to_string()),
        ("cert", format!("{}.crt", name)),
        ("key", format!("{}.key", name)),
        ("tls_auth", "ta.key".to_string()),
    ];
    for (var, file) in blobs {
        let path = ca.key_file(&file);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Missing key material for client profile: {}", path.display()))?;
        vars.insert(var.to_string(), content);
    }
    Ok(vars)
}

/// Revoke the certificate for `name`, install the new CRL and restart the server
pub fn revoke_client(
    exec: &dyn CommandExecutor,
    settings: &Settings,
    name: &ClientName,
) -> Result<()> {
    let ca = CaEnvironment::load(exec, &settings.paths.ca_dir)?;

    println!("Revoking client certificate for {}...", name);
    pki::revoke_certificate(exec, &ca, name.as_str())?;

    println!("Installing updated revocation list...");
    copy_into(&ca.crl_file(), &settings.paths.openvpn_dir)?;

    // Open question: whether a restart drops live sessions has not been verified
    println!("Restarting OpenVPN to load the revocation list...");
    systemctl(exec, "restart", &settings.server.unit)?;

    println!("✓ Revoked {}", name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::{MockExecutor, MockResponse};
    use crate::pki::REVOKE_FULL_REVOKED;
    use crate::pki::tests::{REVOKED_OUTPUT, env_output, settings_in};
    use std::path::Path;

    #[test]
    fn test_client_name_validation() {
        assert!(ClientName::parse("alice").is_ok());
        assert!(ClientName::parse("bob.laptop-2").is_ok());
        assert!(ClientName::parse("").is_err());
        assert!(ClientName::parse("--initca").is_err());
        assert!(ClientName::parse("../etc/passwd").is_err());
        assert!(ClientName::parse("a/b").is_err());
        assert!(ClientName::parse("a b").is_err());
        assert!(ClientName::parse("server").is_err());
        assert!(ClientName::parse("ca").is_err());
    }

    fn ca_with_keys(root: &Path) -> (Settings, MockExecutor) {
        let mut settings = settings_in(root);
        settings.server.address = Some("vpn.example.org".to_string());
        fs::write(
            settings.paths.client_template(),
            "remote {{ remote }} {{ port }}\n<ca>\n{{ ca }}</ca>\n<cert>\n{{ cert }}</cert>\n<key>\n{{ key }}</key>\n<tls-auth>\n{{ tls_auth }}</tls-auth>\n",
        )
        .unwrap();
        let keys = settings.paths.ca_dir.join("keys");
        fs::create_dir_all(&keys).unwrap();
        fs::write(keys.join("ca.crt"), "CA\n").unwrap();
        fs::write(keys.join("ta.key"), "TA\n").unwrap();

        let exec = MockExecutor::new();
        exec.respond(
            "bash",
            MockResponse::ok().stdout(env_output(&settings.paths.ca_dir)),
        );
        (settings, exec)
    }

    #[test]
    fn test_missing_client_key_writes_no_profile() {
        let root = tempfile::tempdir().unwrap();
        let (settings, exec) = ca_with_keys(root.path());
        let keys = settings.paths.ca_dir.join("keys");
        // pkitool "succeeds" but only produces the certificate
        exec.respond(
            "pkitool",
            MockResponse::ok().writes(keys.join("carol.crt"), "CERT\n"),
        );

        let name = ClientName::parse("carol").unwrap();
        let err = create_client(&exec, &settings, &name).unwrap_err();
        assert!(err.to_string().contains("carol.key"));
        assert!(!settings.paths.client_dir.join("carol.ovpn").exists());
    }

    #[test]
    fn test_create_requires_server_address() {
        let root = tempfile::tempdir().unwrap();
        let (mut settings, exec) = ca_with_keys(root.path());
        settings.server.address = None;

        let name = ClientName::parse("dave").unwrap();
        assert!(create_client(&exec, &settings, &name).is_err());
        assert!(exec.calls().is_empty());
    }

    #[test]
    fn test_failed_issuance_is_fatal() {
        let root = tempfile::tempdir().unwrap();
        let (settings, exec) = ca_with_keys(root.path());
        exec.respond("pkitool", MockResponse::exit(1));

        let name = ClientName::parse("erin").unwrap();
        assert!(create_client(&exec, &settings, &name).is_err());
        assert!(!settings.paths.client_dir.join("erin.ovpn").exists());
    }

    #[test]
    fn test_revoke_installs_crl_and_restarts() {
        let root = tempfile::tempdir().unwrap();
        let (settings, exec) = ca_with_keys(root.path());
        let keys = settings.paths.ca_dir.join("keys");
        fs::create_dir_all(&settings.paths.openvpn_dir).unwrap();
        exec.respond(
            "revoke-full",
            MockResponse::exit(REVOKE_FULL_REVOKED)
                .stdout(REVOKED_OUTPUT)
                .writes(keys.join("crl.pem"), "NEW CRL\n"),
        );

        let name = ClientName::parse("alice").unwrap();
        revoke_client(&exec, &settings, &name).unwrap();

        let revoke = exec.calls_to("revoke-full");
        assert_eq!(revoke[0].arguments(), ["alice"]);
        assert_eq!(
            fs::read_to_string(settings.paths.openvpn_dir.join("crl.pem")).unwrap(),
            "NEW CRL\n"
        );
        assert_eq!(
            exec.command_lines().last().unwrap(),
            "systemctl restart openvpn@server"
        );
    }

    #[test]
    fn test_revoke_unknown_client_surfaces_tool_status() {
        let root = tempfile::tempdir().unwrap();
        let (settings, exec) = ca_with_keys(root.path());
        exec.respond("revoke-full", MockResponse::exit(1));

        let name = ClientName::parse("mallory").unwrap();
        let err = revoke_client(&exec, &settings, &name).unwrap_err();
        assert!(err.to_string().contains("revoke-full mallory"));
        assert!(exec.calls_to("systemctl").is_empty());
    }

    #[test]
    fn test_revoke_never_issued_client_is_not_reported_revoked() {
        let root = tempfile::tempdir().unwrap();
        let (settings, exec) = ca_with_keys(root.path());
        fs::create_dir_all(&settings.paths.openvpn_dir).unwrap();
        let keys = settings.paths.ca_dir.join("keys");
        exec.respond(
            "revoke-full",
            MockResponse::exit(REVOKE_FULL_REVOKED)
                .stdout("Can't open ghost.crt for reading, No such file or directory\n")
                .writes(keys.join("crl.pem"), "CRL\n"),
        );

        let name = ClientName::parse("ghost").unwrap();
        let err = revoke_client(&exec, &settings, &name).unwrap_err();
        assert!(err.to_string().contains("without confirming the revocation"));
        assert!(!settings.paths.openvpn_dir.join("crl.pem").exists());
        assert!(exec.calls_to("systemctl").is_empty());
    }
}
