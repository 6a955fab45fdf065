//! patch 提取、规范化与持久化.

mod extract;
mod write;

pub use extract::{label_occupancy, ExtractMode, PatchExtractor};
pub use write::{
    normalize_image_channels, patch_dir, rm_and_mkdir, EphemeralDir, PatchWriter,
};
