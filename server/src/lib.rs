//! # Chat Relay Server Library
//!
//! Server side of a connectionless multi-user chat relay. Clients register
//! a display name over UDP, broadcast or privately message each other, mute
//! senders they do not want to hear from, and are monitored for inactivity.
//!
//! ## Core Responsibilities
//!
//! ### Client Registry
//! The authoritative in-memory table of registered clients, keyed by
//! network address with a secondary display-name index. Enforces name
//! uniqueness, the capacity bound, and per-client mute lists under a single
//! reader/writer lock.
//!
//! ### Command Dispatch
//! Each incoming datagram is handled by an independent fire-and-forget
//! task that parses the `type$payload` request, updates the sender's
//! liveness, mutates the registry, and routes replies. Handlers are
//! stateless across requests; all shared state lives in the registry and
//! history buffer.
//!
//! ### Mute-Aware Routing
//! Broadcasts skip recipients whose mute lists contain the sender; private
//! sends to a recipient that muted the sender are withheld, with a blocked
//! notice going back to the sender instead of a delivery error.
//!
//! ### History Replay
//! A bounded ring of recent broadcast lines is replayed to every new
//! joiner, before the join announcement, so fresh clients get context
//! without any delivery guarantee being implied.
//!
//! ### Inactivity Monitoring
//! A periodic task probes the single least-recently-active client once its
//! idle time passes the threshold, and evicts it when the probe goes
//! unanswered. Any traffic from a probed client resets its state.
//!
//! ## Concurrency Model
//!
//! The dispatch loop blocks only on the socket receive; every datagram
//! spawns a new handler task with no admission control (an inherited
//! limitation of the original design, kept deliberately). The registry and
//! history buffer each have exactly one lock, the locks are never nested,
//! and no lock is held across a socket write — broadcast loops iterate
//! over snapshots copied out under a read lock.
//!
//! Datagram semantics apply throughout: no delivery or ordering guarantee,
//! no acknowledgment protocol, no retransmission. A failed send to one
//! recipient is logged and never affects the others.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::new(ServerConfig::default()).await?;
//!     // Runs the dispatch loop and the inactivity monitor until the
//!     // process is stopped.
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod history;
mod monitor;
pub mod network;
pub mod registry;
