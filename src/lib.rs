// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.

//! coreflash: a slot-based flash reprogramming engine for devices whose
//! flash holds multiple selectable FPGA core images.
//!
//! The engine stages a candidate image, verifies its integrity, then
//! reconciles the target slot sector by sector, erasing and programming
//! only what actually differs. Slot 0, the mandatory recovery image, is
//! never erased wholesale; it is updated through an explicit erase list
//! captured from the outgoing image before anything destructive happens.

pub mod config;
pub mod device;
pub mod error;
pub mod fixtures;
pub mod geometry;
pub mod header;
pub mod loader;
pub mod orchestrator;
pub mod reconcile;
pub mod slot0;
pub mod staging;

pub use config::StagingMode;
pub use device::{DeviceInfo, FlashDevice, ProgressSink, RemovableStorage, SilentSink};
pub use error::{DeviceError, FlashError, HeaderError, LoadError, StorageError};
pub use geometry::FlashGeometry;
pub use header::CoreHeader;
pub use loader::{StagedImage, StagedSource};
pub use orchestrator::{Orchestrator, Outcome, Phase, Target};
pub use slot0::Slot0EraseList;
pub use staging::{StageState, StagingStore};
