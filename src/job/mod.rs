//! Job orchestration and status reporting.
//!
//! # Components
//!
//! - [`PyramidGenerator`]: whole-job and single-tile generation
//! - [`JobStatus`]: the PENDING → PROCESSING → READY | ERROR state machine
//! - [`CatalogService`]: where status transitions and completion
//!   notifications are sent
//! - [`MemoryCatalog`]: in-process catalog with status history and a ready
//!   event broadcast

mod catalog;
mod orchestrator;
mod status;

pub use catalog::{CatalogService, MemoryCatalog};
pub use orchestrator::{ImageDescriptor, JobReport, PyramidGenerator, TileOutcome};
pub use status::JobStatus;
