//! rustomo-core: Hierarchy walker and virtual layout engine for tomography scans.
//!
//! This crate turns the group/array hierarchy of a multi-file scan into a
//! single exchange layout whose arrays are composed, without copying, from
//! slabs of the physical source files.
//!
//! # Pipeline
//!
//! 1. [`walk`] visits the [`SourceTree`] depth-first, classifying `image`
//!    arrays by their scan title and collecting [`AcquisitionParams`].
//! 2. [`LayoutBuilder`] resolves the physical sources of each [`ScanRecord`]
//!    into a [`LogicalArrayDescriptor`].
//! 3. [`Converter`] assigns target keys, writes descriptors through a
//!    [`TargetWriter`] and finally generates the angle sequence.
//!

pub mod angles;
pub mod classify;
pub mod compose;
pub mod config;
pub mod error;
pub mod layout;
pub mod params;
pub mod report;
pub mod tree;
pub mod walker;

pub use angles::{angle_sequence, theta_from_params};
pub use classify::{classify, classify_label, Classification, LabelMatches};
pub use compose::{
    convert, persist, Converter, DenseArray, KeyAssigner, TargetKey, TargetLayout, TargetWriter,
    EXCHANGE_GROUP, TARGET_GROUPS,
};
pub use config::{ConversionConfig, ParameterName};
pub use error::{Error, Result};
pub use layout::{
    AssumePresent, LayoutBuilder, LogicalArrayDescriptor, MemoryCatalog, PhysicalSource,
    SourceCatalog, SourceSlab, SourceStatus, StitchPolicy,
};
pub use params::{AcquisitionParams, ParamAnomaly, ParamField, RejectedParam};
pub use report::{ConversionReport, PlacedArray, SkipReason, SkippedRecord};
pub use tree::{ArrayNode, ElementType, NodeId, NodeKind, SourceTree, Value, VirtualSource};
pub use walker::{walk, ScanRecord, WalkOutcome};
