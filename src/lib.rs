#![doc = include_str!("../README.md")]

// private mods (will be partly re-exported)
mod container;
mod controller;
mod creator;
mod definitions;
mod engine;
mod environment;
mod error;
mod manager;
mod random;
mod readers;
mod timeref;
mod woss;

// public, flat re-exports
pub use error::Error;

pub use container::{CreatorContainer, LinkKey, PointRegion, Region};
pub use controller::{Controller, ManagerKind};
pub use creator::{BellhopCreator, CustomAngles, SharedWoss, WossCreator};
pub use definitions::Definitions;
pub use engine::{EngineRunner, ShellEngine, ENGINE_BASE_NAME, ENGINE_PROGRAM};
pub use environment::{
    AltimetryProvider, BathymetryProvider, EnvironmentManager, FnAltimetry, FnBathymetry,
    FnSediment, FnSsp, MemoryPressureStore, MemoryTimeArrStore, PressureStore, SedimentProvider,
    SspProvider, TimeArrStore,
};
pub use manager::{ParallelManager, SimpleManager, WossManager};
pub use random::{RandomSource, SmallRngSource};
pub use readers::{
    arr_ascii::ArrAsciiReader, arr_bin::ArrBinReader, shd::ShdReader, ArrData, ArrSyntax,
    ReaderContext, ResReader, ShdSyntax,
};
pub use readers::shd::ShdData;
pub use timeref::{FixedTimeReference, TimeReference};
pub use types::{
    altimetry::Altimetry,
    coord::{Coord, CoordZ, CoordZPair},
    pressure::Pressure,
    sediment::Sediment,
    ssp::Ssp,
    time::{SimTime, Time},
    time_arr::TimeArr,
    transducer::{CustomTransducer, Transducer, TransducerRegistry},
};
pub use woss::{
    bellhop::{
        BathymetryWriteMethod, BellhopMode, BellhopSettings, BellhopWoss, CurveType,
        SSP_GUARD_RANGE_FACTOR,
    },
    quantized_frequencies,
    transect::Transect,
    Woss, WOSS_MAX_DEPTH, WOSS_MAX_RANGE, WOSS_MIN_DEPTH, WOSS_MIN_RANGE,
};

// public mods
pub mod types;
pub mod utils;
