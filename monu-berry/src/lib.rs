#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 将 MoNuSAC 格式的病理全切片数据集 (图像 + 分类别细胞核掩膜)
//! 切分为固定大小、可重叠的 patch, 并以 `.npy` 格式持久化, 供细胞核分割网络训练使用.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 该 crate 主要针对 MoNuSAC 的目录组织方式
//!   (`images_root/<病例号>/<文件名>` 与 `masks_root/<病例号>/<文件名主干>/`),
//!   但任何按此模式组织的数据集均可工作.
//! 2. 在非期望情况下 (违反调用约定), 程序会直接 panic, 而不会导致内存错误.
//!   As what Rust promises. I/O 与数据错误则以 `Result` 形式返回.
//!
//! # 功能总览
//!
//! ### 数据集索引 ✅
//!
//! 启动时一次性扫描图像根目录, 构建有序的 (图像, 掩膜目录) 索引,
//! 保证 patch 命名在多次运行间可复现.
//!
//! 实现位于 `monu-berry/src/dataset`.
//!
//! ### 切片解码与掩膜装载 ✅
//!
//! 常规 raster 格式 (tif/tiff) 由 `image` 解码; 专有全切片格式 (svs)
//! 通过 [`dataset::WsiDecode`] 外部协作者解码. 掩膜装载同理以
//! [`dataset::OpenMasks`] 为接缝.
//!
//! ### patch 提取 ✅
//!
//! 给定窗口/步长几何, 以 `valid` 或 `mirror` 两种模式平铺组合张量,
//! 并按分类通道占用情况将 patch 划分为 informative / background 两组.
//!
//! 实现位于 `monu-berry/src/patch/extract.rs`.
//!
//! ### patch 规范化与写出 ✅
//!
//! 图像通道按 patch 内 min-max 规范化到 \[0, 1\], 与掩膜通道重新拼接后
//! 写为 `.npy`. 支持 merge (合并乱序) 与 split (两棵目录树) 两种输出模式.
//!
//! 实现位于 `monu-berry/src/patch/write.rs`.
//!
//! ### 入口函数 ✅
//!
//! [`pipeline::patch_folder`] 串联上述各阶段, 一次调用处理整个数据集.

/// 二维索引, 同时也可一定程度上用作非负整数向量. 约定为 `(h, w)` 序.
pub type Idx2d = (usize, usize);

/// 病理样本基础数据结构.
mod data;

pub use data::{blue_only, ClassMasks, Sample};

pub mod consts;

pub mod dataset;
pub mod patch;
pub mod pipeline;
pub mod prelude;
