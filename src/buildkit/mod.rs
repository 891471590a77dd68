//! Build graphs and the engine that executes them.
//!
//! The engine itself lives outside this crate; [`BuildExecutor`] is the
//! contract it fulfils. [`MockExecutor`] stands in for it in tests.

mod executor;
pub mod graph;
mod mock;
mod platform;
mod status;

pub use executor::{
    BuildExecutor, ExitStatus, ImageConfig, Process, ProcessControl, ProcessOutput, SolveRequest,
    SolvedRef, StartRequest, UNKNOWN_EXIT_STATUS,
};
pub use graph::{
    CacheSharing, CopyOptions, Definition, Exec, GraphBuilder, Layer, LocalOptions, Mount, Op,
    OutputRef,
};
pub use mock::{MockExecutor, MockExit, MockExport, MockProcess};
pub use platform::Platform;
pub use status::{SolveStatus, StatusLine, StatusRenderer, Vertex, VertexLog, VertexWarning};
