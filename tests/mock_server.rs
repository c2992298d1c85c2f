//! End-to-end tests against an in-process mock AMI server.

use asterisk_ami_tokio::{
    Action, AmiClient, AmiError, AmiSettings, ConnectionStatus, LinkState, PeerEntry, StatusStream,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::time::timeout;

const GREETING: &str = "Asterisk Call Manager/5.0.1\r\n";
const WAIT: Duration = Duration::from_secs(5);

/// Server side of one accepted AMI connection.
struct Peer {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Peer {
    async fn accept(listener: &TcpListener) -> Peer {
        let (stream, _) = timeout(WAIT, listener.accept())
            .await
            .expect("no connection attempt")
            .unwrap();
        let (read_half, mut writer) = stream.into_split();
        writer
            .write_all(GREETING.as_bytes())
            .await
            .unwrap();
        Peer {
            reader: BufReader::new(read_half),
            writer,
        }
    }

    /// Next action as a field map; `None` once the client hung up.
    async fn read_action(&mut self) -> Option<HashMap<String, String>> {
        let mut fields = HashMap::new();
        loop {
            let mut line = String::new();
            let n = self
                .reader
                .read_line(&mut line)
                .await
                .ok()?;
            if n == 0 {
                return None;
            }
            let line = line.trim_end();
            if line.is_empty() {
                if fields.is_empty() {
                    continue;
                }
                return Some(fields);
            }
            let (name, value) = line
                .split_once(':')
                .expect("action line without colon");
            fields.insert(name.trim().to_string(), value.trim().to_string());
        }
    }

    async fn write(&mut self, frame: &str) {
        self.writer
            .write_all(frame.as_bytes())
            .await
            .unwrap();
    }

    /// Read the Login action and accept it.
    async fn accept_login(&mut self) {
        let login = self
            .read_action()
            .await
            .expect("no login");
        assert_eq!(login["Action"], "Login");
        assert_eq!(login["Username"], "admin");
        assert_eq!(login["Secret"], "amp111");
        let reply = format!(
            "Response: Success\r\nActionID: {}\r\nMessage: Authentication accepted\r\n\r\n",
            login["ActionID"]
        );
        self.write(&reply)
            .await;
    }

    /// Answer Pings until the client goes away.
    async fn serve_pings(mut self) {
        while let Some(action) = self
            .read_action()
            .await
        {
            if action["Action"] == "Ping" {
                let reply = format!(
                    "Response: Success\r\nActionID: {}\r\nPing: Pong\r\nTimestamp: 1700000000.000000\r\n\r\n",
                    action["ActionID"]
                );
                self.write(&reply)
                    .await;
            }
        }
    }
}

async fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let port = listener
        .local_addr()
        .unwrap()
        .port();
    (listener, port)
}

fn settings(port: u16) -> AmiSettings {
    AmiSettings::new("127.0.0.1", port, "admin", "amp111")
        .with_keepalive(false)
        .with_reconnect_interval(Duration::from_millis(50))
        .with_action_timeout(Duration::from_secs(3))
        .with_dial_timeout(Duration::from_secs(2))
}

async fn next_status(status: &mut StatusStream) -> ConnectionStatus {
    timeout(WAIT, status.recv())
        .await
        .expect("timeout waiting for status")
        .expect("status stream closed")
        .expect("status stream error")
}

#[tokio::test]
async fn login_then_event_list_and_unsolicited_event() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.accept_login()
            .await;
        peer.write("Event: FullyBooted\r\nPrivilege: system,all\r\nStatus: Fully Booted\r\n\r\n")
            .await;

        let action = peer
            .read_action()
            .await
            .unwrap();
        assert_eq!(action["Action"], "SIPpeers");
        let id = &action["ActionID"];
        let reply = format!(
            "Response: Success\r\nActionID: {id}\r\nEventList: start\r\nMessage: Peer status list will follow\r\n\r\n\
Event: PeerEntry\r\nActionID: {id}\r\nChanneltype: SIP\r\nObjectName: 1001\r\nIPaddress: 10.0.0.5\r\nIPport: 5060\r\nDynamic: yes\r\nStatus: OK (5 ms)\r\n\r\n\
Event: PeerEntry\r\nActionID: {id}\r\nChanneltype: SIP\r\nObjectName: 1002\r\nIPaddress: -none-\r\nIPport: 0\r\nDynamic: yes\r\nStatus: UNKNOWN\r\n\r\n\
Event: PeerlistComplete\r\nActionID: {id}\r\nEventList: Complete\r\nListItems: 2\r\n\r\n"
        );
        peer.write(&reply)
            .await;
        peer.serve_pings()
            .await;
    });

    let client = AmiClient::new(settings(port));
    let mut status = client.subscribe_status();
    let mut events = client.subscribe_events();
    client
        .connect()
        .await
        .unwrap();

    assert_eq!(next_status(&mut status).await, ConnectionStatus::Connected);
    assert!(client.is_connected());
    assert_eq!(
        client
            .greeting()
            .as_deref(),
        Some("Asterisk Call Manager/5.0.1")
    );
    assert_eq!(client.link_state(), Some(LinkState::Online));

    let booted = timeout(WAIT, events.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(booted.is_named("FullyBooted"));

    let response = client
        .send(Action::new("SIPpeers"))
        .await
        .unwrap();
    assert_eq!(response.message(), Some("Peer status list will follow"));
    assert_eq!(
        response
            .events()
            .len(),
        3
    );

    let peers: Vec<PeerEntry> = response
        .decode_events("PeerEntry")
        .unwrap();
    assert_eq!(peers.len(), 2);
    assert_eq!(peers[0].ip_port, Some(5060));
    assert_eq!(peers[1].ip_address, None);
    assert_eq!(client.pending_actions(), 0);

    client
        .disconnect()
        .await;
    assert!(!client.is_connected());
    server
        .await
        .unwrap();
}

#[tokio::test]
async fn concurrent_actions_are_correlated() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.accept_login()
            .await;

        let mut actions = Vec::new();
        for _ in 0..8 {
            actions.push(
                peer.read_action()
                    .await
                    .unwrap(),
            );
        }
        // Answer in reverse submission order.
        for action in actions
            .iter()
            .rev()
        {
            let reply = format!(
                "Response: Success\r\nActionID: {}\r\nValue: {}\r\n\r\n",
                action["ActionID"], action["Variable"]
            );
            peer.write(&reply)
                .await;
        }
        peer.serve_pings()
            .await;
    });

    let client = AmiClient::new(settings(port));
    let mut status = client.subscribe_status();
    client
        .connect()
        .await
        .unwrap();
    assert_eq!(next_status(&mut status).await, ConnectionStatus::Connected);

    let mut calls = Vec::new();
    for n in 0..8 {
        let client = client.clone();
        calls.push(tokio::spawn(async move {
            let response = client
                .send(Action::new("Getvar").field("Variable", format!("VAR{}", n)))
                .await
                .unwrap();
            (n, response)
        }));
    }
    for call in calls {
        let (n, response) = call
            .await
            .unwrap();
        assert_eq!(response.field("Value"), Some(format!("VAR{}", n).as_str()));
    }

    client
        .disconnect()
        .await;
    server
        .await
        .unwrap();
}

#[tokio::test]
async fn unanswered_action_times_out() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.accept_login()
            .await;
        // Swallow everything.
        while peer
            .read_action()
            .await
            .is_some()
        {}
    });

    let client = AmiClient::new(settings(port).with_action_timeout(Duration::from_millis(300)));
    let mut status = client.subscribe_status();
    client
        .connect()
        .await
        .unwrap();
    assert_eq!(next_status(&mut status).await, ConnectionStatus::Connected);

    let result = client
        .send(Action::new("Status"))
        .await;
    assert!(matches!(
        result,
        Err(AmiError::ActionTimeout { ref action, timeout_ms: 300 }) if action == "Status"
    ));
    assert_eq!(client.pending_actions(), 0);
    assert!(client.is_connected());

    client
        .disconnect()
        .await;
    server
        .await
        .unwrap();
}

#[tokio::test]
async fn rejected_login_is_not_retried() {
    let (listener, port) = listener().await;
    let client = AmiClient::new(settings(port));
    let mut status = client.subscribe_status();
    client
        .connect()
        .await
        .unwrap();

    let mut peer = Peer::accept(&listener).await;
    let login = peer
        .read_action()
        .await
        .unwrap();
    let reply = format!(
        "Response: Error\r\nActionID: {}\r\nMessage: Authentication failed\r\n\r\n",
        login["ActionID"]
    );
    peer.write(&reply)
        .await;

    assert_eq!(
        next_status(&mut status).await,
        ConnectionStatus::AuthenticationFailed
    );
    assert_eq!(client.status(), Some(ConnectionStatus::AuthenticationFailed));
    assert!(!client.is_connected());
    assert!(matches!(
        client
            .send(Action::ping())
            .await,
        Err(AmiError::NotConnected)
    ));

    // Well past the reconnect interval: no second attempt.
    assert!(timeout(Duration::from_millis(500), listener.accept())
        .await
        .is_err());
}

#[tokio::test]
async fn reconnects_after_server_drops_connection() {
    let (listener, port) = listener().await;
    let client = AmiClient::new(settings(port));
    let mut status = client.subscribe_status();
    client
        .connect()
        .await
        .unwrap();

    let mut first = Peer::accept(&listener).await;
    first
        .accept_login()
        .await;
    assert_eq!(next_status(&mut status).await, ConnectionStatus::Connected);
    drop(first);

    assert_eq!(
        next_status(&mut status).await,
        ConnectionStatus::NetworkErrorOnDisconnect
    );

    let mut second = Peer::accept(&listener).await;
    second
        .accept_login()
        .await;
    assert_eq!(next_status(&mut status).await, ConnectionStatus::Connected);
    let server = tokio::spawn(second.serve_pings());

    let pong = client
        .send(Action::ping())
        .await
        .unwrap();
    assert_eq!(pong.field("Ping"), Some("Pong"));

    client
        .disconnect()
        .await;
    server
        .await
        .unwrap();
}

#[tokio::test]
async fn logoff_ends_session_without_reconnect() {
    let (listener, port) = listener().await;
    let client = AmiClient::new(settings(port));
    let mut status = client.subscribe_status();
    client
        .connect()
        .await
        .unwrap();

    let mut peer = Peer::accept(&listener).await;
    peer.accept_login()
        .await;
    assert_eq!(next_status(&mut status).await, ConnectionStatus::Connected);

    let server = tokio::spawn(async move {
        let action = peer
            .read_action()
            .await
            .unwrap();
        assert_eq!(action["Action"], "Logoff");
        let reply = format!(
            "Response: Goodbye\r\nActionID: {}\r\nMessage: Thanks for all the fish.\r\n\r\n",
            action["ActionID"]
        );
        peer.write(&reply)
            .await;
        (listener, peer)
    });

    let goodbye = client
        .logoff()
        .await
        .unwrap();
    assert_eq!(goodbye.response(), Some("Goodbye"));

    let (listener, peer) = server
        .await
        .unwrap();
    drop(peer);

    assert_eq!(
        next_status(&mut status).await,
        ConnectionStatus::NetworkErrorOnDisconnect
    );
    assert!(timeout(Duration::from_millis(500), listener.accept())
        .await
        .is_err());
    assert!(!client.is_connected());
}

#[tokio::test]
async fn keepalive_detects_silent_server() {
    let (listener, port) = listener().await;
    let client = AmiClient::new(
        settings(port)
            .with_keepalive(true)
            .with_ping(Duration::from_millis(200), Duration::from_millis(100)),
    );
    let mut status = client.subscribe_status();
    client
        .connect()
        .await
        .unwrap();

    let mut silent = Peer::accept(&listener).await;
    silent
        .accept_login()
        .await;
    assert_eq!(next_status(&mut status).await, ConnectionStatus::Connected);

    // Pings are read but never answered.
    let ping = silent
        .read_action()
        .await
        .unwrap();
    assert_eq!(ping["Action"], "Ping");

    assert_eq!(
        next_status(&mut status).await,
        ConnectionStatus::NetworkErrorOnDisconnect
    );

    let mut healthy = Peer::accept(&listener).await;
    healthy
        .accept_login()
        .await;
    assert_eq!(next_status(&mut status).await, ConnectionStatus::Connected);
    let server = tokio::spawn(healthy.serve_pings());

    // Several ping periods pass without another disconnect.
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(client.is_connected());

    client
        .disconnect()
        .await;
    server
        .await
        .unwrap();
    drop(silent);
}

#[tokio::test]
async fn greeting_timeout_is_a_connect_error() {
    let (listener, port) = listener().await;
    let client = AmiClient::new(
        settings(port)
            .with_dial_timeout(Duration::from_millis(200))
            .with_reconnect_interval(Duration::from_secs(30)),
    );
    let mut status = client.subscribe_status();
    client
        .connect()
        .await
        .unwrap();

    // Accept but never send the banner.
    let (_mute, _) = timeout(WAIT, listener.accept())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        next_status(&mut status).await,
        ConnectionStatus::NetworkErrorOnConnect
    );
    client
        .disconnect()
        .await;
}

#[tokio::test]
async fn send_map_uses_action_key() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        peer.accept_login()
            .await;
        let action = peer
            .read_action()
            .await
            .unwrap();
        assert_eq!(action["Action"], "Command");
        assert_eq!(action["Command"], "core show version");
        let reply = format!(
            "Response: Success\r\nActionID: {}\r\nMessage: Command output follows\r\nOutput: Asterisk 20.5.0\r\n\r\n",
            action["ActionID"]
        );
        peer.write(&reply)
            .await;
        peer.serve_pings()
            .await;
    });

    let client = AmiClient::new(settings(port));
    let mut status = client.subscribe_status();
    client
        .connect()
        .await
        .unwrap();
    assert_eq!(next_status(&mut status).await, ConnectionStatus::Connected);

    let response = client
        .send_map(HashMap::from([
            ("Action".to_string(), "Command".to_string()),
            ("Command".to_string(), "core show version".to_string()),
        ]))
        .await
        .unwrap();
    assert_eq!(response.field("Output"), Some("Asterisk 20.5.0"));
    assert!(response
        .events()
        .is_empty());

    client
        .disconnect()
        .await;
    server
        .await
        .unwrap();
}

#[tokio::test]
async fn connect_is_idempotent() {
    let (listener, port) = listener().await;
    let client = AmiClient::new(settings(port));
    let mut status = client.subscribe_status();
    client
        .connect()
        .await
        .unwrap();
    client
        .connect()
        .await
        .unwrap();

    let mut peer = Peer::accept(&listener).await;
    peer.accept_login()
        .await;
    assert_eq!(next_status(&mut status).await, ConnectionStatus::Connected);
    client
        .connect()
        .await
        .unwrap();

    assert!(timeout(Duration::from_millis(300), listener.accept())
        .await
        .is_err());

    let server = tokio::spawn(peer.serve_pings());
    client
        .disconnect()
        .await;
    server
        .await
        .unwrap();
}
