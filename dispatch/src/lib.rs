//! Acts on completed packet groups: relays text messages to Discord and
//! keeps the node directory current from node info broadcasts.

pub mod avatars;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod ignore_list;
pub mod metrics_defs;
pub mod node_directory;
pub mod refresh;
pub mod text_message;
pub mod webhook;

pub use dispatcher::Dispatcher;
pub use errors::DispatchError;
