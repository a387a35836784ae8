//! Tor control port tests
//!
//! Runs the control client and the Tor-backed hidden service host against
//! an in-process fake control port that speaks just enough of the protocol.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use whereabouts::config::TorConfig;
use whereabouts::crypto::{service_id, HiddenServiceKeys};
use whereabouts::sharing::{HiddenServiceConfig, HiddenServiceHost};
use whereabouts::tor::{TorController, TorHiddenService};

const PASSWORD: &str = "s3cret \"pw\"";

/// Canned replies for a fake Tor daemon
#[derive(Clone)]
struct FakeTor {
    service_id: String,
    /// Bootstrap progress replies, last one repeats
    bootstrap: Vec<u8>,
    commands: Arc<Mutex<Vec<String>>>,
}

impl FakeTor {
    fn new(service_id: &str) -> Self {
        Self {
            service_id: service_id.to_string(),
            bootstrap: vec![100],
            commands: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    fn reply(&self, command: &str, bootstrap_queries: &mut usize) -> String {
        let verb = command.split_whitespace().next().unwrap_or_default();
        match verb {
            "AUTHENTICATE" => {
                if command == "AUTHENTICATE \"s3cret \\\"pw\\\"\"" {
                    "250 OK\r\n".to_string()
                } else {
                    "515 Authentication failed: Password did not match\r\n".to_string()
                }
            },
            "GETINFO" => match command.trim_start_matches("GETINFO ") {
                "status/bootstrap-phase" => {
                    let index = (*bootstrap_queries).min(self.bootstrap.len() - 1);
                    *bootstrap_queries += 1;
                    format!(
                        "250-status/bootstrap-phase=NOTICE BOOTSTRAP PROGRESS={} TAG=done SUMMARY=\"Done\"\r\n250 OK\r\n",
                        self.bootstrap[index]
                    )
                },
                "net/listeners/socks" => {
                    "250-net/listeners/socks=\"127.0.0.1:19050\" \"[::1]:19050\"\r\n250 OK\r\n"
                        .to_string()
                },
                "config-text" => {
                    "250+config-text=\r\nSocksPort 19050\r\nControlPort 9051\r\n.\r\n250 OK\r\n"
                        .to_string()
                },
                _ => "552 Unrecognized key\r\n".to_string(),
            },
            "ADD_ONION" => format!("250-ServiceID={}\r\n250 OK\r\n", self.service_id),
            "DEL_ONION" => "250 OK\r\n".to_string(),
            _ => "510 Unrecognized command\r\n".to_string(),
        }
    }

    /// Accept control connections on a loopback port
    async fn spawn(self) -> u16 {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let tor = self.clone();
                tokio::spawn(async move {
                    let (read, mut write) = stream.into_split();
                    let mut lines = BufReader::new(read).lines();
                    let mut bootstrap_queries = 0;
                    while let Ok(Some(line)) = lines.next_line().await {
                        tor.commands.lock().unwrap().push(line.clone());
                        let reply = tor.reply(&line, &mut bootstrap_queries);
                        if write.write_all(reply.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });
        port
    }
}

fn tor_config(port: u16, password: &str) -> TorConfig {
    TorConfig {
        control_port: port,
        control_password: Some(password.to_string()),
        socks_port: 9999,
        bootstrap_timeout_secs: 10,
        ..TorConfig::default()
    }
}

fn service_config(keys: HiddenServiceKeys) -> HiddenServiceConfig {
    HiddenServiceConfig {
        keys,
        forward_addr: SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 8443),
    }
}

#[tokio::test]
async fn test_publish_and_withdraw_hidden_service() {
    let keys = HiddenServiceKeys::from_seed(&[7u8; 32]);
    let id = service_id(&keys.onion_address());
    let tor = FakeTor::new(&id);
    let port = tor.clone().spawn().await;

    let host = TorHiddenService::new(tor_config(port, PASSWORD));
    let socks_port = host.start(&service_config(keys)).await.unwrap();
    assert_eq!(socks_port, 19050);

    host.stop().await;
    // Second stop has nothing to withdraw
    host.stop().await;

    let commands = tor.commands();
    assert_eq!(commands.len(), 5, "{:?}", commands);
    assert_eq!(commands[0], "AUTHENTICATE \"s3cret \\\"pw\\\"\"");
    assert_eq!(commands[1], "GETINFO status/bootstrap-phase");
    assert!(commands[2].starts_with("ADD_ONION ED25519-V3:"));
    assert!(commands[2].ends_with(" Flags=DiscardPK Port=443,127.0.0.1:8443"));
    assert_eq!(commands[3], "GETINFO net/listeners/socks");
    assert_eq!(commands[4], format!("DEL_ONION {}", id));
}

#[tokio::test]
async fn test_mismatched_service_is_removed() {
    let keys = HiddenServiceKeys::from_seed(&[7u8; 32]);
    let other = service_id(&HiddenServiceKeys::from_seed(&[8u8; 32]).onion_address());
    let tor = FakeTor::new(&other);
    let port = tor.clone().spawn().await;

    let host = TorHiddenService::new(tor_config(port, PASSWORD));
    let err = host.start(&service_config(keys)).await.unwrap_err();
    assert!(err.to_string().contains("identity address"));

    let commands = tor.commands();
    assert_eq!(commands.last().unwrap(), &format!("DEL_ONION {}", other));
}

#[tokio::test]
async fn test_wrong_password_is_rejected() {
    let tor = FakeTor::new("unused");
    let port = tor.clone().spawn().await;

    let err = TorController::connect(&tor_config(port, "wrong"))
        .await
        .err()
        .expect("authentication should fail");
    assert!(format!("{:#}", err).contains("515"));
}

#[tokio::test]
async fn test_unreachable_control_port() {
    // Bind then drop to get a port nobody listens on
    let port = {
        let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        listener.local_addr().unwrap().port()
    };

    let host = TorHiddenService::new(tor_config(port, PASSWORD));
    let keys = HiddenServiceKeys::from_seed(&[7u8; 32]);
    assert!(host.start(&service_config(keys)).await.is_err());
}

#[tokio::test]
async fn test_get_info_data_block() {
    let tor = FakeTor::new("unused");
    let port = tor.clone().spawn().await;

    let mut controller = TorController::connect(&tor_config(port, PASSWORD)).await.unwrap();
    let text = controller.get_info("config-text").await.unwrap();
    assert_eq!(text, "SocksPort 19050\nControlPort 9051");

    assert!(controller.get_info("no/such/key").await.is_err());
    assert_eq!(controller.socks_listener_port().await.unwrap(), Some(19050));
}

#[tokio::test]
async fn test_waits_for_bootstrap() {
    let mut tor = FakeTor::new("unused");
    tor.bootstrap = vec![50, 100];
    let port = tor.clone().spawn().await;

    let mut controller = TorController::connect(&tor_config(port, PASSWORD)).await.unwrap();
    assert!(!controller.is_bootstrapped().await.unwrap());
    assert!(controller.is_bootstrapped().await.unwrap());

    let mut tor = FakeTor::new("unused");
    tor.bootstrap = vec![10];
    let port = tor.clone().spawn().await;

    let mut controller = TorController::connect(&tor_config(port, PASSWORD)).await.unwrap();
    let err = controller
        .wait_for_bootstrap(Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("bootstrapping"));
}
