//! Just-in-time daemon support: file-system watching, reverse dependency
//! tracking, and the named-pipe server asset requests arrive on.

pub mod asset_pipe;
pub mod asset_server;
pub mod reverse_deps;
pub mod watcher;

pub use asset_server::AssetServer;
pub use reverse_deps::ReverseDependencyMap;
pub use watcher::ResourceWatcher;
