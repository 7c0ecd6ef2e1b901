pub mod channel;
pub mod cli;
pub mod commands;
pub mod config;
pub mod daemon;
pub mod driver;
pub mod error;
pub mod interrupt;
pub mod mount;
pub mod node;
pub mod session;
pub mod wire;

pub use config::load_config;
pub use config::Config;

pub use channel::{ChannelFlags, ChannelHandle, ChannelPool, Device, PollEvents};
pub use daemon::{Backend, LocalBackend};
pub use driver::RequestDriver;
pub use error::{DeferError, Result};
pub use interrupt::Interrupt;
pub use mount::Mount;
pub use node::{DirectoryBlock, Node, NodeKind, NodeRef, NodeTable};
pub use session::LocalSession;
pub use wire::{MountOpts, Request, RequestKind, Response};
