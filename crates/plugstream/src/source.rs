//! Stream source drivers.
//!
//! Every source follows the same shape: load bytes, drive the pump on a
//! schedule, finish exactly once. Buffer and result sources are timer
//! driven; job sources are driven by fetch-job events with suspend/resume
//! tied to pump progress.

pub(crate) mod buffer;
pub(crate) mod job;

pub(crate) use buffer::drive_buffer;
pub(crate) use job::drive_job;
