pub mod disk;
pub mod memory;
pub mod models;
pub mod repositories;

pub use disk::DiskWatermarkStore;
pub use listsync_common::job_id::validate_job_id;
pub use memory::MemoryWatermarkStore;
pub use models::Watermark;
pub use repositories::WatermarkStore;
