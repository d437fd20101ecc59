//! Transport between the client thread and the devices.
//!
//! Every bound device gets its own pipe and worker thread:
//!
//! ```text
//! output: transfer → gain → RingPipe[i] → IoWorker[i] → device[i]
//! input:  device → IoWorker → RingPipe → transfer
//! ```
//!
//! - **Pipe**: fixed-capacity SPSC frame queue; the client side never blocks
//! - **Worker**: one OS thread per device, stopped by the shared running flag
//!   and pipe shutdown

mod pipe;
mod worker;

pub use pipe::{ring_pipe, PipeControl, PipeReader, PipeWriter};
pub(crate) use worker::{IoWorker, WorkerConfig};
