//! The three kernel samplers and their delta engines.

pub mod process;
pub mod system_stat;
pub mod traits;
pub mod uid_io;

#[cfg(test)]
pub mod mock;

pub use process::{ProcessDelta, ProcessRecord, ProcessSampler, ProcessUsage, ThreadRecord};
pub use system_stat::{SystemStat, SystemStatDelta, SystemStatSampler, SystemStatUsage};
pub use traits::{FileSystem, RealFs};
pub use uid_io::{IoStat, UidIoDelta, UidIoRecord, UidIoSampler, UidIoUsage};
