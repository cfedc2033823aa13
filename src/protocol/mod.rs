//! Chroma wire protocol: report codec, protocol generations, and the
//! command/effect registries.

pub mod commands;
pub mod effects;
pub mod profile;
pub mod report;

pub use profile::{ProfileId, ProtocolProfile};
pub use report::{Request, Response, Status, ARGS_SIZE, REPORT_SIZE};
