pub mod bus;
pub mod config;
pub mod context;
pub mod debounce;
pub mod epoch;
pub mod error;
pub mod projection;
pub mod selection;
pub mod tabs;
pub mod watch;

pub use bus::{BusError, BusReceiver, BusSender, Envelope, PostOutcome, Priority};
pub use config::{ConfigError, PluginConfig, PluginKind, SidecarConfig};
pub use context::Context;
pub use debounce::{Debounce, Debouncer};
pub use epoch::{Epoch, EpochCounter, Generation, GenerationCounter};
pub use error::{Classify, ErrorClass};
pub use projection::{Delta, ListProjection, PreservedState, Projection, ProjectionStore, Record};
pub use selection::{SelectionState, TextPos};
pub use tabs::{Tab, TabMode, TabSet};
pub use watch::{Signal, SignalKind, SourceId, WatchError, WatchHandle, WatchMode, WatchSpec};
