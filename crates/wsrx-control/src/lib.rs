//! Connection-bridging engine
//!
//! - [`ConnectionRegistry`] owns every live session and is driven through a
//!   [`RegistryHandle`]
//! - [`Bridge`] pumps bytes between the TCP and tunnel stream of a session
//! - [`Session`] pairs the two streams with their metadata
pub mod bridge;
pub mod registry;
pub mod session;

pub use bridge::{Bridge, BridgeConfig, BridgeOutcome, Side, Termination};
pub use registry::{ConnectionRegistry, RegistryError, RegistryHandle};
pub use session::{
    mapping_prefix, server_session_key, Role, Session, SessionInfo, SessionMeta, SharedStream,
    SESSION_KEY_SEPARATOR,
};
