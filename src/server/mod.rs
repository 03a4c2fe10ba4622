//! Server runtime primitives (spec §4.4): the session base type, the
//! process-wide session registry, server lifecycle + listener fan-out,
//! and the acceptor/handler model session decoders plug into.

pub mod handler;
pub mod network_server;
pub mod session;
pub mod session_list;

pub use handler::{ChannelAcceptor, DatagramAcceptor, DatagramHandler, HandlerList, SessionHandler, StreamAcceptor};
pub use network_server::{NetworkServer, ServerListener, SessionListener};
pub use session::{AuthContext, ClientInfo, PostProcessor, SrvSession};
pub use session_list::SessionList;
