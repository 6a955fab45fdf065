//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::Idx2d;

pub use crate::consts::{NucleusClass, RGB_CHANNELS, TEST_CLASSES, TRAIN_CLASSES};

pub use crate::data::{blue_only, ClassMasks, Sample};

pub use crate::dataset::{
    self, home_dataset_dir_with, IndexOptions, MonusacIndex, NpyMaskDir, OpenMasks, WsiDecode,
};

pub use crate::patch::{label_occupancy, ExtractMode, PatchExtractor, PatchWriter};

pub use crate::pipeline::{patch_folder, PrepConfig, PrepError, PrepReport};
