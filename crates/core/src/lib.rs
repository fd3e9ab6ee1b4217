pub mod error;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;
pub mod transport;

pub use error::{Result, RtspError};
pub use registry::Registry;
pub use server::{Server, ServerConfig};
