#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod ir;
pub mod layout;
pub mod layout_dump;
pub mod parser;
pub mod scheduler;
pub mod session;

#[cfg(feature = "cli")]
pub use cli::run;
pub use config::{GraphType, Settings, load_config};
pub use error::GraphError;
pub use ir::{Graph, Node, NodeId, NodeKind, Pin, PinDirection, PinId, PinKind};
pub use layout::{FormatterParameters, GraphFormatter, format_graph};
pub use scheduler::{SchedulerState, TickScheduler};
pub use session::GraphSession;
