//! Server network layer: dispatch loop, command handling, and routing

use crate::history::HistoryBuffer;
use crate::monitor;
use crate::registry::{ClientRegistry, RegistryError};
use log::{debug, error, info, warn};
use shared::{Command, Reply};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::RwLock;

const RECV_BUFFER_SIZE: usize = 2048;

/// Runtime settings, filled from the command line in `main`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the UDP socket binds to, e.g. `127.0.0.1:12000`
    pub bind_addr: String,
    /// Source port that authorizes `kick`. A convention, not a credential:
    /// any peer able to choose its source port can claim it.
    pub admin_port: u16,
    pub max_clients: usize,
    pub history_capacity: usize,
    /// How often the inactivity monitor wakes up
    pub monitor_interval: Duration,
    /// Idle time after which a client becomes a probe candidate
    pub idle_threshold: Duration,
    /// How long an unanswered probe is allowed to stand before eviction
    pub probe_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("127.0.0.1:{}", shared::SERVER_PORT),
            admin_port: shared::ADMIN_PORT,
            max_clients: shared::MAX_CLIENTS,
            history_capacity: shared::HISTORY_CAPACITY,
            monitor_interval: Duration::from_secs(10),
            idle_threshold: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

/// The chat relay server.
///
/// Owns the socket and the two shared resources (registry, history), each
/// behind its own reader/writer lock. The locks are never nested and never
/// held across a socket write; broadcasts iterate over registry snapshots.
/// Cloning is cheap and yields a handle to the same server, which is how
/// the per-datagram handler tasks and the monitor task share state.
#[derive(Clone)]
pub struct Server {
    socket: Arc<UdpSocket>,
    registry: Arc<RwLock<ClientRegistry>>,
    history: Arc<RwLock<HistoryBuffer>>,
    config: Arc<ServerConfig>,
}

impl Server {
    /// Binds the listening socket. This is the only fatal failure point;
    /// everything after startup degrades per request instead of crashing.
    pub async fn new(config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(&config.bind_addr).await?);
        info!("chat relay listening on {}", socket.local_addr()?);

        Ok(Server {
            socket,
            registry: Arc::new(RwLock::new(ClientRegistry::new(config.max_clients))),
            history: Arc::new(RwLock::new(HistoryBuffer::new(config.history_capacity))),
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The shared client registry. Exposed so tests and embedders can
    /// observe or seed state; production mutation goes through handlers.
    pub fn registry(&self) -> &Arc<RwLock<ClientRegistry>> {
        &self.registry
    }

    /// Main dispatch loop: one blocking receive, one fire-and-forget task
    /// per datagram. No admission control — an inherited trait of the
    /// original design, kept as-is.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        monitor::spawn(self.clone());

        let mut buffer = [0u8; RECV_BUFFER_SIZE];
        loop {
            match self.socket.recv_from(&mut buffer).await {
                Ok((len, addr)) => {
                    let text = String::from_utf8_lossy(&buffer[..len]).into_owned();
                    let server = self.clone();
                    tokio::spawn(async move {
                        server.handle_request(addr, &text).await;
                    });
                }
                Err(e) => {
                    error!("error receiving datagram: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }

    /// Handles one datagram start to finish. All state lives in the
    /// registry/history; nothing survives this call.
    pub async fn handle_request(&self, addr: SocketAddr, raw: &str) {
        let request = match shared::parse_request(raw) {
            Ok(request) => request,
            Err(e) => {
                warn!("malformed request from {}: {}", addr, e);
                self.send_reply(addr, &Reply::error(e.to_string())).await;
                return;
            }
        };

        // Any parseable request counts as liveness and clears an
        // outstanding probe. No-op for unregistered senders.
        self.registry.write().await.touch(addr);

        debug!("{} -> {:?}", addr, request.command);

        match request.command {
            Command::Conn => self.handle_conn(addr, &request.payload).await,
            Command::Say => self.handle_say(addr, &request.payload).await,
            Command::SayTo => self.handle_sayto(addr, &request.payload).await,
            Command::Mute => self.handle_mute(addr, &request.payload).await,
            Command::Unmute => self.handle_unmute(addr, &request.payload).await,
            Command::Rename => self.handle_rename(addr, &request.payload).await,
            Command::Disconn => self.handle_disconn(addr).await,
            Command::Kick => self.handle_kick(addr, &request.payload).await,
            // the touch above was the whole point; never replied to
            Command::RetPing => {}
            Command::Unknown(command) => {
                self.send_reply(addr, &Reply::error(format!("Unknown command '{}'", command)))
                    .await;
            }
        }
    }

    /// `conn$name`: register (or re-register in place, keeping the mute
    /// list), replay history, then announce the join to everyone else.
    async fn handle_conn(&self, addr: SocketAddr, name: &str) {
        let result = {
            let mut registry = self.registry.write().await;
            if registry.contains_addr(addr) {
                registry.rename(addr, name).map(|_| ())
            } else {
                registry.insert(name, addr)
            }
        };

        if let Err(e) = result {
            self.send_reply(addr, &Reply::error(e.to_string())).await;
            return;
        }

        self.send_reply(
            addr,
            &Reply::system(format!(
                "Hi {}, you have successfully connected to the chat",
                name
            )),
        )
        .await;

        // Replay strictly before the join announcement is recorded, so the
        // new client never sees a message triggered by its own connection.
        let lines = self.history.read().await.lines();
        for line in &lines {
            self.send_raw(addr, &shared::history_line(line)).await;
        }

        self.broadcast_system(&format!("{} has joined the chat", name), Some(addr))
            .await;
    }

    /// `say$message`: mute-aware broadcast of `name: message`.
    async fn handle_say(&self, addr: SocketAddr, message: &str) {
        let sender = {
            let registry = self.registry.read().await;
            registry.find_by_addr(addr).map(|c| c.name.clone())
        };
        let Some(sender) = sender else {
            self.send_reply(
                addr,
                &Reply::error("You must conn$<name> before sending messages"),
            )
            .await;
            return;
        };

        // empty broadcasts are dropped without an error
        if message.is_empty() {
            return;
        }

        self.broadcast_public(&sender, addr, message).await;
    }

    /// `sayto$recipient message`: private delivery. A recipient that muted
    /// the sender never sees the message; the sender gets a blocked notice
    /// instead of a delivery error.
    async fn handle_sayto(&self, addr: SocketAddr, payload: &str) {
        let sender = {
            let registry = self.registry.read().await;
            registry.find_by_addr(addr).map(|c| c.name.clone())
        };
        let Some(sender) = sender else {
            self.send_reply(
                addr,
                &Reply::error("You must conn$<name> before sending messages"),
            )
            .await;
            return;
        };

        let Some((recipient, message)) = shared::split_private(payload) else {
            self.send_reply(
                addr,
                &Reply::error("sayto requires a recipient name and a message"),
            )
            .await;
            return;
        };

        let target = {
            let registry = self.registry.read().await;
            registry
                .find_by_name(recipient)
                .map(|c| (c.addr, c.has_muted(&sender)))
        };

        match target {
            None => {
                self.send_reply(
                    addr,
                    &Reply::error(format!("Recipient '{}' not found", recipient)),
                )
                .await;
            }
            Some((_, true)) => {
                self.send_reply(
                    addr,
                    &Reply::system(format!(
                        "Your message could not be delivered (you are muted by {})",
                        recipient
                    )),
                )
                .await;
            }
            Some((recipient_addr, false)) => {
                let private = Reply::Private {
                    sender,
                    text: message.to_string(),
                };
                self.send_raw(recipient_addr, &private.to_wire()).await;
                self.send_reply(
                    addr,
                    &Reply::system(format!("Message delivered to {}", recipient)),
                )
                .await;
            }
        }
    }

    /// `mute$name`: add to the caller's mute list.
    async fn handle_mute(&self, addr: SocketAddr, target: &str) {
        if target.is_empty() {
            self.send_reply(addr, &Reply::error("mute requires a client name"))
                .await;
            return;
        }

        let result = self.registry.write().await.mute(addr, target);
        let reply = match result {
            Ok(()) => Reply::system(format!("You have muted {}", target)),
            Err(RegistryError::NotRegistered) => {
                Reply::error("You must conn$<name> before muting users")
            }
            Err(e) => Reply::error(e.to_string()),
        };
        self.send_reply(addr, &reply).await;
    }

    /// `unmute$name`: remove from the caller's mute list.
    async fn handle_unmute(&self, addr: SocketAddr, target: &str) {
        if target.is_empty() {
            self.send_reply(addr, &Reply::error("unmute requires a client name"))
                .await;
            return;
        }

        let result = self.registry.write().await.unmute(addr, target);
        let reply = match result {
            Ok(()) => Reply::system(format!("You have unmuted {}", target)),
            Err(RegistryError::NotRegistered) => {
                Reply::error("You must conn$<name> before unmuting users")
            }
            Err(e) => Reply::error(e.to_string()),
        };
        self.send_reply(addr, &reply).await;
    }

    /// `rename$new_name`: change the caller's display name and announce
    /// the change.
    async fn handle_rename(&self, addr: SocketAddr, new_name: &str) {
        if new_name.is_empty() {
            self.send_reply(addr, &Reply::error("rename requires a new name"))
                .await;
            return;
        }

        let result = self.registry.write().await.rename(addr, new_name);
        match result {
            Ok(old_name) => {
                self.send_reply(
                    addr,
                    &Reply::system(format!("You are now known as {}", new_name)),
                )
                .await;
                self.broadcast_system(
                    &format!("{} is now known as {}", old_name, new_name),
                    Some(addr),
                )
                .await;
            }
            Err(RegistryError::NotRegistered) => {
                self.send_reply(addr, &Reply::error("You must conn$<name> before renaming"))
                    .await;
            }
            Err(e) => {
                self.send_reply(addr, &Reply::error(e.to_string())).await;
            }
        }
    }

    /// `disconn$`: voluntary departure. Never an error, even when the
    /// sender was not registered to begin with.
    async fn handle_disconn(&self, addr: SocketAddr) {
        let removed = self.registry.write().await.remove_by_addr(addr);
        match removed {
            None => {
                self.send_reply(addr, &Reply::system("You are not connected"))
                    .await;
            }
            Some(client) => {
                self.send_reply(addr, &Reply::system("Disconnected. Bye!"))
                    .await;
                self.broadcast_system(&format!("{} has left the chat", client.name), None)
                    .await;
            }
        }
    }

    /// `kick$name`: administrative removal, authorized solely by the
    /// requester's source port.
    async fn handle_kick(&self, addr: SocketAddr, target: &str) {
        if addr.port() != self.config.admin_port {
            self.send_reply(addr, &Reply::error("kick is admin-only")).await;
            return;
        }
        if target.is_empty() {
            self.send_reply(addr, &Reply::error("kick requires a client name"))
                .await;
            return;
        }

        let removed = self.registry.write().await.remove_by_name(target);
        match removed {
            None => {
                self.send_reply(addr, &Reply::error(format!("Client '{}' not found", target)))
                    .await;
            }
            Some(client) => {
                info!("client '{}' kicked by {}", client.name, addr);
                self.send_raw(
                    client.addr,
                    &Reply::system("You have been removed from the chat").to_wire(),
                )
                .await;
                self.broadcast_system(
                    &format!("{} has been removed from the chat", client.name),
                    None,
                )
                .await;
            }
        }
    }

    /// Delivers a public chat line to every registered client except the
    /// sender and anyone who muted the sender. Recorded in history first.
    async fn broadcast_public(&self, sender: &str, sender_addr: SocketAddr, text: &str) {
        let chat = Reply::Chat {
            sender: sender.to_string(),
            text: text.to_string(),
        };
        self.history.write().await.append(chat.history_text());

        let snapshot = self.registry.read().await.snapshot();
        let wire = chat.to_wire();
        for client in snapshot {
            if client.addr == sender_addr || client.has_muted(sender) {
                continue;
            }
            self.send_raw(client.addr, &wire).await;
        }
    }

    /// Delivers a system announcement to every registered client except an
    /// optional excluded address. Recorded in history first.
    pub(crate) async fn broadcast_system(&self, text: &str, exclude: Option<SocketAddr>) {
        self.history.write().await.append(text.to_string());

        let snapshot = self.registry.read().await.snapshot();
        let wire = Reply::system(text).to_wire();
        for client in snapshot {
            if Some(client.addr) == exclude {
                continue;
            }
            self.send_raw(client.addr, &wire).await;
        }
    }

    async fn send_reply(&self, addr: SocketAddr, reply: &Reply) {
        self.send_raw(addr, &reply.to_wire()).await;
    }

    /// Fire-and-forget datagram write. A failed delivery is logged and
    /// isolated to that one recipient.
    pub(crate) async fn send_raw(&self, addr: SocketAddr, line: &str) {
        if let Err(e) = self.socket.send_to(line.as_bytes(), addr).await {
            error!("failed to send to {}: {}", addr, e);
        }
    }
}
