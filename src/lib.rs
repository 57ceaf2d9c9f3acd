pub mod network;
pub mod config;
pub mod error;
pub mod export;
pub mod graph;
pub mod monitor;
pub mod scheduler;

pub use error::{MonitorError, Result};
pub use config::Config;
pub use graph::{Edge, Graph, GraphSnapshot, Node, NodeType};
pub use monitor::Monitor;
