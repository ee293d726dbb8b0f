// OpenVPN provisioning library
// Sequences easy-rsa, openssl, openvpn, iptables and systemctl to stand up
// an OpenVPN server and manage its client certificates.

pub mod client;
pub mod commands;
pub mod config;
pub mod env_source;
pub mod exec;
pub mod network;
pub mod pki;
pub mod server;
pub mod template;
