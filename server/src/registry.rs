//! Client registry for the chat relay
//!
//! This module owns the shared table of registered clients, including:
//! - Client lifecycle (connect, rename, disconnect, kick, eviction)
//! - Name uniqueness and capacity enforcement
//! - Per-client mute lists
//! - Liveness bookkeeping consumed by the inactivity monitor
//!
//! The registry itself is unsynchronized; the server wraps it in a
//! reader/writer lock and every caller copies out what it needs before
//! doing network I/O.

use log::info;
use shared::{MAX_MUTED, MAX_NAME_LEN};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Errors produced by registry mutations. Rejected operations leave the
/// registry untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    EmptyName,
    NameTooLong,
    NameTaken(String),
    CapacityExceeded,
    NotRegistered,
    MuteListFull(String),
    NotMuted(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::EmptyName => write!(f, "Name cannot be empty"),
            RegistryError::NameTooLong => {
                write!(f, "Name cannot be longer than {} characters", MAX_NAME_LEN)
            }
            RegistryError::NameTaken(name) => write!(f, "Name '{}' already in use", name),
            RegistryError::CapacityExceeded => write!(f, "Server full"),
            RegistryError::NotRegistered => write!(f, "Not registered"),
            RegistryError::MuteListFull(target) => {
                write!(f, "Unable to mute {} (maybe full list)", target)
            }
            RegistryError::NotMuted(target) => write!(f, "{} was not muted", target),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Represents one registered chat participant
///
/// Each client tracks:
/// - Identity (display name, network address)
/// - The set of sender names it does not want to hear from
/// - Liveness state driven by incoming traffic and monitor probes
#[derive(Debug)]
pub struct Client {
    /// Unique display name, the routing key for private sends
    pub name: String,
    /// Network address for sending replies
    pub addr: SocketAddr,
    /// Names whose messages are suppressed for this client
    pub muted: HashSet<String>,
    /// Last time any valid request arrived from this client
    pub last_active: Instant,
    /// When a liveness probe was sent, if one is outstanding
    pub pending_ping: Option<Instant>,
}

impl Client {
    fn new(name: String, addr: SocketAddr) -> Self {
        Self {
            name,
            addr,
            muted: HashSet::new(),
            last_active: Instant::now(),
            pending_ping: None,
        }
    }

    pub fn has_muted(&self, sender: &str) -> bool {
        self.muted.contains(sender)
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active.elapsed()
    }
}

/// Point-in-time copy of a client, taken under the read lock so broadcast
/// and monitor passes can iterate without holding it.
#[derive(Debug, Clone)]
pub struct ClientSnapshot {
    pub name: String,
    pub addr: SocketAddr,
    pub muted: HashSet<String>,
    pub last_active: Instant,
    pub pending_ping: Option<Instant>,
}

impl ClientSnapshot {
    pub fn has_muted(&self, sender: &str) -> bool {
        self.muted.contains(sender)
    }
}

/// The authoritative table of registered clients
///
/// Keyed by network address, with a secondary index by display name kept in
/// lockstep. Enforces name uniqueness, the client capacity bound, and the
/// per-client mute-list bound. Mutations are all-or-nothing.
pub struct ClientRegistry {
    clients: HashMap<SocketAddr, Client>,
    names: HashMap<String, SocketAddr>,
    max_clients: usize,
}

impl ClientRegistry {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            names: HashMap::new(),
            max_clients,
        }
    }

    fn validate_name(name: &str) -> Result<(), RegistryError> {
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if name.len() > MAX_NAME_LEN {
            return Err(RegistryError::NameTooLong);
        }
        Ok(())
    }

    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<&Client> {
        self.clients.get(&addr)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Client> {
        self.names.get(name).and_then(|addr| self.clients.get(addr))
    }

    pub fn contains_addr(&self, addr: SocketAddr) -> bool {
        self.clients.contains_key(&addr)
    }

    /// Mutable access for liveness bookkeeping. Callers must not touch
    /// `name`; renames go through [`ClientRegistry::rename`] to keep the
    /// name index consistent.
    pub(crate) fn find_by_addr_mut(&mut self, addr: SocketAddr) -> Option<&mut Client> {
        self.clients.get_mut(&addr)
    }

    /// Registers a new client under the given name.
    ///
    /// Fails if the name is invalid or already held by another client, or if
    /// the registry is at capacity. Addresses already registered must go
    /// through [`ClientRegistry::rename`] instead.
    pub fn insert(&mut self, name: &str, addr: SocketAddr) -> Result<(), RegistryError> {
        Self::validate_name(name)?;
        if self.names.contains_key(name) {
            return Err(RegistryError::NameTaken(name.to_string()));
        }
        if self.clients.len() >= self.max_clients {
            return Err(RegistryError::CapacityExceeded);
        }

        self.clients.insert(addr, Client::new(name.to_string(), addr));
        self.names.insert(name.to_string(), addr);
        info!("client '{}' registered from {}", name, addr);
        Ok(())
    }

    /// Renames the client at `addr`, returning the old name for
    /// announcement. Renaming to the client's own current name is allowed.
    pub fn rename(&mut self, addr: SocketAddr, new_name: &str) -> Result<String, RegistryError> {
        Self::validate_name(new_name)?;
        if !self.clients.contains_key(&addr) {
            return Err(RegistryError::NotRegistered);
        }
        if let Some(&holder) = self.names.get(new_name) {
            if holder != addr {
                return Err(RegistryError::NameTaken(new_name.to_string()));
            }
        }

        let client = self
            .clients
            .get_mut(&addr)
            .ok_or(RegistryError::NotRegistered)?;
        let old_name = std::mem::replace(&mut client.name, new_name.to_string());
        self.names.remove(&old_name);
        self.names.insert(new_name.to_string(), addr);
        Ok(old_name)
    }

    /// Adds `target` to the caller's mute list. Muting a name twice is a
    /// no-op; the list is capacity-bounded.
    pub fn mute(&mut self, addr: SocketAddr, target: &str) -> Result<(), RegistryError> {
        let client = self
            .clients
            .get_mut(&addr)
            .ok_or(RegistryError::NotRegistered)?;
        if client.muted.contains(target) {
            return Ok(());
        }
        if client.muted.len() >= MAX_MUTED {
            return Err(RegistryError::MuteListFull(target.to_string()));
        }
        client.muted.insert(target.to_string());
        Ok(())
    }

    /// Removes `target` from the caller's mute list.
    pub fn unmute(&mut self, addr: SocketAddr, target: &str) -> Result<(), RegistryError> {
        let client = self
            .clients
            .get_mut(&addr)
            .ok_or(RegistryError::NotRegistered)?;
        if !client.muted.remove(target) {
            return Err(RegistryError::NotMuted(target.to_string()));
        }
        Ok(())
    }

    /// Removes the client at `addr`, returning the record if one existed.
    /// Safe to call twice; the second call is a no-op returning `None`.
    pub fn remove_by_addr(&mut self, addr: SocketAddr) -> Option<Client> {
        let client = self.clients.remove(&addr)?;
        self.names.remove(&client.name);
        info!("client '{}' removed ({})", client.name, addr);
        Some(client)
    }

    /// Removes the client holding `name`, returning the record if one
    /// existed.
    pub fn remove_by_name(&mut self, name: &str) -> Option<Client> {
        let addr = self.names.get(name).copied()?;
        self.remove_by_addr(addr)
    }

    /// Records traffic from `addr`: refreshes the activity timestamp and
    /// clears any outstanding probe. Returns false for unknown addresses.
    pub fn touch(&mut self, addr: SocketAddr) -> bool {
        match self.clients.get_mut(&addr) {
            Some(client) => {
                client.last_active = Instant::now();
                client.pending_ping = None;
                true
            }
            None => false,
        }
    }

    /// Marks a probe as sent to `addr`. Returns false if the client is gone.
    pub fn mark_probed(&mut self, addr: SocketAddr, at: Instant) -> bool {
        match self.clients.get_mut(&addr) {
            Some(client) => {
                client.pending_ping = Some(at);
                true
            }
            None => false,
        }
    }

    /// Removes `addr` only if it is still idle past `idle_threshold` with a
    /// probe outstanding for at least `probe_timeout`.
    ///
    /// The monitor decides to evict from a snapshot; between that decision
    /// and this call a request handler may have refreshed or removed the
    /// same client, so the live entry is re-checked here and a stale
    /// eviction becomes a no-op.
    pub fn evict_if_stale(
        &mut self,
        addr: SocketAddr,
        idle_threshold: Duration,
        probe_timeout: Duration,
    ) -> Option<Client> {
        let client = self.clients.get(&addr)?;
        let probed_at = client.pending_ping?;
        if client.idle_for() < idle_threshold || probed_at.elapsed() < probe_timeout {
            return None;
        }
        self.remove_by_addr(addr)
    }

    /// Consistent point-in-time copy of all registered clients, for
    /// iteration with no lock held.
    pub fn snapshot(&self) -> Vec<ClientSnapshot> {
        self.clients
            .values()
            .map(|client| ClientSnapshot {
                name: client.name.clone(),
                addr: client.addr,
                muted: client.muted.clone(),
                last_active: client.last_active,
                pending_ping: client.pending_ping,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    #[test]
    fn insert_registers_client() {
        let mut registry = ClientRegistry::new(8);
        registry.insert("Alice", test_addr()).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.find_by_addr(test_addr()).unwrap().name, "Alice");
        assert_eq!(registry.find_by_name("Alice").unwrap().addr, test_addr());
    }

    #[test]
    fn insert_rejects_duplicate_name() {
        let mut registry = ClientRegistry::new(8);
        registry.insert("Alice", test_addr()).unwrap();

        let err = registry.insert("Alice", test_addr2()).unwrap_err();
        assert_eq!(err, RegistryError::NameTaken("Alice".to_string()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn insert_rejects_empty_and_overlong_names() {
        let mut registry = ClientRegistry::new(8);

        assert_eq!(
            registry.insert("", test_addr()),
            Err(RegistryError::EmptyName)
        );
        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert_eq!(
            registry.insert(&long, test_addr()),
            Err(RegistryError::NameTooLong)
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn insert_enforces_capacity() {
        let mut registry = ClientRegistry::new(1);
        registry.insert("Alice", test_addr()).unwrap();

        assert_eq!(
            registry.insert("Bob", test_addr2()),
            Err(RegistryError::CapacityExceeded)
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn rename_updates_both_indexes() {
        let mut registry = ClientRegistry::new(8);
        registry.insert("Alice", test_addr()).unwrap();

        let old = registry.rename(test_addr(), "Alice123").unwrap();
        assert_eq!(old, "Alice");
        assert!(registry.find_by_name("Alice").is_none());
        assert_eq!(registry.find_by_name("Alice123").unwrap().addr, test_addr());
        assert_eq!(registry.find_by_addr(test_addr()).unwrap().name, "Alice123");
    }

    #[test]
    fn rename_rejects_name_held_by_other_client() {
        let mut registry = ClientRegistry::new(8);
        registry.insert("Alice", test_addr()).unwrap();
        registry.insert("Bob", test_addr2()).unwrap();

        let err = registry.rename(test_addr(), "Bob").unwrap_err();
        assert_eq!(err, RegistryError::NameTaken("Bob".to_string()));
        // rejected rename leaves both entries intact
        assert_eq!(registry.find_by_name("Alice").unwrap().addr, test_addr());
        assert_eq!(registry.find_by_name("Bob").unwrap().addr, test_addr2());
    }

    #[test]
    fn rename_to_own_name_is_allowed() {
        let mut registry = ClientRegistry::new(8);
        registry.insert("Alice", test_addr()).unwrap();

        let old = registry.rename(test_addr(), "Alice").unwrap();
        assert_eq!(old, "Alice");
        assert_eq!(registry.find_by_name("Alice").unwrap().addr, test_addr());
    }

    #[test]
    fn rename_unknown_address_fails() {
        let mut registry = ClientRegistry::new(8);
        assert_eq!(
            registry.rename(test_addr(), "Ghost"),
            Err(RegistryError::NotRegistered)
        );
    }

    #[test]
    fn mute_is_idempotent() {
        let mut registry = ClientRegistry::new(8);
        registry.insert("Alice", test_addr()).unwrap();

        registry.mute(test_addr(), "Bob").unwrap();
        registry.mute(test_addr(), "Bob").unwrap();
        assert_eq!(registry.find_by_addr(test_addr()).unwrap().muted.len(), 1);
    }

    #[test]
    fn mute_list_is_bounded() {
        let mut registry = ClientRegistry::new(8);
        registry.insert("Alice", test_addr()).unwrap();

        for i in 0..MAX_MUTED {
            registry.mute(test_addr(), &format!("peer{}", i)).unwrap();
        }
        assert_eq!(
            registry.mute(test_addr(), "overflow"),
            Err(RegistryError::MuteListFull("overflow".to_string()))
        );
        // already-muted names still succeed at capacity
        registry.mute(test_addr(), "peer0").unwrap();
    }

    #[test]
    fn unmute_requires_existing_entry() {
        let mut registry = ClientRegistry::new(8);
        registry.insert("Alice", test_addr()).unwrap();

        assert_eq!(
            registry.unmute(test_addr(), "Bob"),
            Err(RegistryError::NotMuted("Bob".to_string()))
        );
        registry.mute(test_addr(), "Bob").unwrap();
        registry.unmute(test_addr(), "Bob").unwrap();
        assert_eq!(
            registry.unmute(test_addr(), "Bob"),
            Err(RegistryError::NotMuted("Bob".to_string()))
        );
    }

    #[test]
    fn remove_is_safe_to_repeat() {
        let mut registry = ClientRegistry::new(8);
        registry.insert("Alice", test_addr()).unwrap();

        assert!(registry.remove_by_addr(test_addr()).is_some());
        assert!(registry.remove_by_addr(test_addr()).is_none());
        assert!(registry.find_by_name("Alice").is_none());
    }

    #[test]
    fn remove_by_name_clears_address_entry() {
        let mut registry = ClientRegistry::new(8);
        registry.insert("Alice", test_addr()).unwrap();

        let removed = registry.remove_by_name("Alice").unwrap();
        assert_eq!(removed.addr, test_addr());
        assert!(!registry.contains_addr(test_addr()));
        assert!(registry.remove_by_name("Alice").is_none());
    }

    #[test]
    fn touch_refreshes_activity_and_clears_probe() {
        let mut registry = ClientRegistry::new(8);
        registry.insert("Alice", test_addr()).unwrap();
        registry.mark_probed(test_addr(), Instant::now());

        assert!(registry.touch(test_addr()));
        let client = registry.find_by_addr(test_addr()).unwrap();
        assert!(client.pending_ping.is_none());
        assert!(client.idle_for() < Duration::from_secs(1));

        assert!(!registry.touch(test_addr2()));
    }

    #[test]
    fn evict_if_stale_removes_expired_probe() {
        let mut registry = ClientRegistry::new(8);
        registry.insert("Alice", test_addr()).unwrap();

        let threshold = Duration::from_secs(30);
        let probe_timeout = Duration::from_secs(10);

        let client = registry.clients.get_mut(&test_addr()).unwrap();
        client.last_active = Instant::now() - Duration::from_secs(60);
        client.pending_ping = Some(Instant::now() - Duration::from_secs(20));

        let evicted = registry
            .evict_if_stale(test_addr(), threshold, probe_timeout)
            .unwrap();
        assert_eq!(evicted.name, "Alice");
        assert!(registry.is_empty());
    }

    #[test]
    fn evict_if_stale_spares_refreshed_client() {
        let mut registry = ClientRegistry::new(8);
        registry.insert("Alice", test_addr()).unwrap();

        let threshold = Duration::from_secs(30);
        let probe_timeout = Duration::from_secs(10);

        // probe answered: pending_ping cleared by touch
        let client = registry.clients.get_mut(&test_addr()).unwrap();
        client.last_active = Instant::now() - Duration::from_secs(60);
        client.pending_ping = Some(Instant::now() - Duration::from_secs(20));
        registry.touch(test_addr());

        assert!(registry
            .evict_if_stale(test_addr(), threshold, probe_timeout)
            .is_none());
        assert_eq!(registry.len(), 1);

        // probe still inside its window
        let client = registry.clients.get_mut(&test_addr()).unwrap();
        client.last_active = Instant::now() - Duration::from_secs(60);
        client.pending_ping = Some(Instant::now() - Duration::from_secs(2));
        assert!(registry
            .evict_if_stale(test_addr(), threshold, probe_timeout)
            .is_none());

        // client already gone
        registry.remove_by_addr(test_addr());
        assert!(registry
            .evict_if_stale(test_addr(), threshold, probe_timeout)
            .is_none());
    }

    #[test]
    fn snapshot_is_independent_of_later_mutations() {
        let mut registry = ClientRegistry::new(8);
        registry.insert("Alice", test_addr()).unwrap();
        registry.insert("Bob", test_addr2()).unwrap();
        registry.mute(test_addr(), "Bob").unwrap();

        let snapshot = registry.snapshot();
        registry.remove_by_addr(test_addr());
        registry.remove_by_addr(test_addr2());

        assert_eq!(snapshot.len(), 2);
        let alice = snapshot.iter().find(|c| c.name == "Alice").unwrap();
        assert!(alice.has_muted("Bob"));
        assert!(!alice.has_muted("Carol"));
    }
}
