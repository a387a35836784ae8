//! Tor Control Port client
//!
//! Communicates with the local Tor daemon via the control protocol.

use crate::config::TorConfig;
use anyhow::{bail, Context, Result};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, trace};

/// Response from ADD_ONION command
#[derive(Debug, Clone)]
pub struct AddOnionResponse {
    /// The service ID (without .onion suffix)
    pub service_id: String,
    /// The full onion address
    pub onion_address: String,
}

/// Common cookie file locations
const COOKIE_PATHS: &[&str] = &[
    "/run/tor/control.authcookie",
    "/var/run/tor/control.authcookie",
    "/var/lib/tor/control_auth_cookie",
];

const REPLY_TIMEOUT: Duration = Duration::from_secs(30);
const BOOTSTRAP_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Connection to Tor control port
pub struct TorController {
    stream: BufReader<TcpStream>,
}

impl TorController {
    /// Connect to Tor control port and authenticate
    pub async fn connect(config: &TorConfig) -> Result<Self> {
        let addr = config.control_addr();
        debug!("Connecting to Tor control port: {}", addr);

        let stream = TcpStream::connect(&addr)
            .await
            .with_context(|| format!("Failed to connect to Tor at {}", addr))?;

        let mut controller = Self {
            stream: BufReader::new(stream),
        };

        if let Some(password) = &config.control_password {
            controller.authenticate_password(password).await?;
        } else {
            controller.authenticate_cookie().await?;
        }

        Ok(controller)
    }

    /// Authenticate with a quoted password (HashedControlPassword)
    async fn authenticate_password(&mut self, password: &str) -> Result<()> {
        let escaped = password.replace('\\', "\\\\").replace('"', "\\\"");
        self.send_command(&format!("AUTHENTICATE \"{}\"", escaped))
            .await
            .context("Tor rejected control password")?;
        debug!("Authenticated with control password");
        Ok(())
    }

    /// Authenticate with cookie file
    async fn authenticate_cookie(&mut self) -> Result<()> {
        for path in COOKIE_PATHS {
            if let Ok(cookie) = std::fs::read(path) {
                let cookie_hex = data_encoding::HEXLOWER.encode(&cookie);
                match self
                    .send_command(&format!("AUTHENTICATE {}", cookie_hex))
                    .await
                {
                    Ok(_) => {
                        debug!("Authenticated with cookie from {}", path);
                        return Ok(());
                    },
                    Err(e) => {
                        debug!("Cookie auth failed with {}: {}", path, e);
                        continue;
                    },
                }
            }
        }

        // Works if Tor has no authentication configured
        debug!("Trying null authentication");
        self.send_command("AUTHENTICATE").await?;
        Ok(())
    }

    /// Send a command and collect the reply lines, without status prefixes
    ///
    /// Fails if Tor answers with anything other than a 2xx status.
    async fn send_command(&mut self, cmd: &str) -> Result<Vec<String>> {
        let verb = cmd.split_whitespace().next().unwrap_or_default();
        trace!(verb, "Sending Tor command");

        let stream = self.stream.get_mut();
        stream.write_all(cmd.as_bytes()).await?;
        stream.write_all(b"\r\n").await?;
        stream.flush().await?;

        let mut lines = Vec::new();
        let mut in_data_block = false;
        loop {
            let mut line = String::new();
            let bytes_read = timeout(REPLY_TIMEOUT, self.stream.read_line(&mut line))
                .await
                .with_context(|| format!("Timeout waiting for Tor reply to {}", verb))??;
            if bytes_read == 0 {
                bail!("Tor closed the control connection during {}", verb);
            }
            let line = line.trim_end_matches(&['\r', '\n'][..]);

            // Data block: 250+keyword=\r\n <data lines> .\r\n
            if in_data_block {
                if line == "." {
                    in_data_block = false;
                } else {
                    lines.push(line.to_string());
                }
                continue;
            }

            let bytes = line.as_bytes();
            if bytes.len() < 4 || !bytes[..3].iter().all(u8::is_ascii_digit) {
                bail!("Malformed Tor reply line: {:?}", line);
            }
            let code = &line[..3];

            if !code.starts_with('2') {
                bail!("Tor control error: {}", line);
            }

            match bytes[3] {
                b'+' => {
                    in_data_block = true;
                    lines.push(line[4..].to_string());
                },
                b'-' => lines.push(line[4..].to_string()),
                b' ' => {
                    if &line[4..] != "OK" {
                        lines.push(line[4..].to_string());
                    }
                    break;
                },
                _ => bail!("Malformed Tor reply line: {:?}", line),
            }
        }

        trace!(verb, lines = lines.len(), "Tor command completed");
        Ok(lines)
    }

    /// Get information about the Tor daemon
    ///
    /// Returns the raw value of `keyword`.
    pub async fn get_info(&mut self, keyword: &str) -> Result<String> {
        let lines = self.send_command(&format!("GETINFO {}", keyword)).await?;
        let prefix = format!("{}=", keyword);
        let mut values = lines.iter();
        let first = values
            .next()
            .and_then(|line| line.strip_prefix(&prefix))
            .with_context(|| format!("GETINFO reply missing {}", keyword))?;

        // Multi-line values arrive as a data block after `keyword=`
        let mut value = first.to_string();
        for line in values {
            if !value.is_empty() {
                value.push('\n');
            }
            value.push_str(line);
        }
        Ok(value)
    }

    /// Check if Tor is fully bootstrapped
    pub async fn is_bootstrapped(&mut self) -> Result<bool> {
        let response = self.get_info("status/bootstrap-phase").await?;
        Ok(response.contains("PROGRESS=100"))
    }

    /// Poll bootstrap status until complete or `limit` elapses
    pub async fn wait_for_bootstrap(&mut self, limit: Duration) -> Result<()> {
        let deadline = Instant::now() + limit;
        loop {
            if self.is_bootstrapped().await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                bail!("Tor did not finish bootstrapping within {:?}", limit);
            }
            debug!("Waiting for Tor to bootstrap");
            tokio::time::sleep(BOOTSTRAP_POLL_INTERVAL).await;
        }
    }

    /// Port of Tor's first SOCKS listener, if it reports one
    pub async fn socks_listener_port(&mut self) -> Result<Option<u16>> {
        let listeners = self.get_info("net/listeners/socks").await?;
        Ok(parse_socks_listeners(&listeners))
    }

    /// Create a hidden service using ADD_ONION with the provided Ed25519 private key
    ///
    /// The key is the expanded 64-byte Ed25519 secret key. Inbound connections
    /// on `virtual_port` are forwarded to `target` (`host:port`).
    pub async fn add_onion(
        &mut self,
        private_key: &[u8; 64],
        virtual_port: u16,
        target: &str,
        flags: &[&str],
    ) -> Result<AddOnionResponse> {
        let key_b64 = data_encoding::BASE64.encode(private_key);

        let flags_str = if flags.is_empty() {
            String::new()
        } else {
            format!(" Flags={}", flags.join(","))
        };

        let cmd = format!(
            "ADD_ONION ED25519-V3:{}{} Port={},{}",
            key_b64, flags_str, virtual_port, target
        );

        debug!(
            "Sending ADD_ONION command for port {} -> {}",
            virtual_port, target
        );
        let lines = self.send_command(&cmd).await?;

        let service_id = lines
            .iter()
            .find_map(|line| line.strip_prefix("ServiceID="))
            .context("ADD_ONION response missing ServiceID")?
            .to_string();

        let onion_address = format!("{}.onion", service_id);
        info!("Created hidden service: {}", onion_address);

        Ok(AddOnionResponse {
            service_id,
            onion_address,
        })
    }

    /// Remove a previously created onion service
    pub async fn del_onion(&mut self, service_id: &str) -> Result<()> {
        self.send_command(&format!("DEL_ONION {}", service_id))
            .await?;
        info!("Removed hidden service: {}", service_id);
        Ok(())
    }
}

/// First port in a `net/listeners/socks` value such as
/// `"127.0.0.1:9050" "[::1]:9050"`
fn parse_socks_listeners(value: &str) -> Option<u16> {
    value
        .split_whitespace()
        .map(|listener| listener.trim_matches('"'))
        .find_map(|listener| listener.rsplit_once(':')?.1.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_socks_listeners() {
        assert_eq!(parse_socks_listeners("127.0.0.1:9050"), Some(9050));
        assert_eq!(
            parse_socks_listeners("\"127.0.0.1:19050\" \"[::1]:9050\""),
            Some(19050)
        );
        assert_eq!(parse_socks_listeners("[::1]:9150"), Some(9150));
        assert_eq!(parse_socks_listeners(""), None);
        assert_eq!(parse_socks_listeners("unix:/run/tor/socks"), None);
    }
}
