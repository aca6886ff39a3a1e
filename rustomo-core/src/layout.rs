//! Virtual layout builder.
//!
//! Turns a [`ScanRecord`] into a [`LogicalArrayDescriptor`]: an ordered list
//! of physical sources, each covering a disjoint leading-axis range of the
//! logical array.
//!
//! Sources are assumed to contribute equal slabs of `leading / count` rows
//! (floor division); the last source absorbs the remainder. For anything
//! other than projection data, multi-source arrays keep only the first slab,
//! which drops the averaged frames acquisition software appends to flat and
//! dark sequences.

use crate::compose::TargetKey;
use crate::config::ConversionConfig;
use crate::tree::{ElementType, SourceTree, VirtualSource};
use crate::walker::ScanRecord;
use crate::{Error, Result};
use log::debug;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One physical backing array.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PhysicalSource {
    pub file_path: PathBuf,
    pub internal_path: String,
    /// Extent read from the source: the slab rows followed by the trailing dims.
    pub shape: Vec<usize>,
}

impl PhysicalSource {
    /// `file::internal_path`, used in diagnostics.
    #[must_use]
    pub fn display_path(&self) -> String {
        format!("{}::{}", self.file_path.display(), self.internal_path)
    }
}

/// A physical source mapped onto `[start, end)` of the logical leading axis.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SourceSlab {
    pub source: PhysicalSource,
    pub start: usize,
    pub end: usize,
}

impl SourceSlab {
    /// Rows contributed by this slab.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.end - self.start
    }
}

/// Logical array composed from physical sources.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LogicalArrayDescriptor {
    /// Absolute target path, e.g. `/exchange/data`.
    pub target_key: String,
    pub total_shape: Vec<usize>,
    pub dtype: ElementType,
    pub sources: Vec<SourceSlab>,
}

impl LogicalArrayDescriptor {
    /// Extent of the leading axis.
    #[must_use]
    pub fn leading_extent(&self) -> usize {
        self.total_shape.first().copied().unwrap_or(0)
    }

    /// Returns true when the slabs partition `[0, leading)` exactly, in order.
    #[must_use]
    pub fn is_partition(&self) -> bool {
        let mut cursor = 0;
        for slab in &self.sources {
            if slab.start != cursor || slab.end <= slab.start {
                return false;
            }
            cursor = slab.end;
        }
        cursor == self.leading_extent()
    }
}

/// Result of probing a physical source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStatus {
    Missing,
    /// Present; the shape is `None` when the catalog cannot tell.
    Present(Option<Vec<usize>>),
}

/// Answers existence and shape questions about physical sources.
pub trait SourceCatalog {
    /// Looks up `internal_path` inside `file`.
    fn locate(&self, file: &Path, internal_path: &str) -> SourceStatus;
}

/// Catalog that trusts every manifest entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumePresent;

impl SourceCatalog for AssumePresent {
    fn locate(&self, _file: &Path, _internal_path: &str) -> SourceStatus {
        SourceStatus::Present(None)
    }
}

/// In-memory catalog keyed by file and dataset path.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    entries: HashMap<(PathBuf, String), Vec<usize>>,
}

impl MemoryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a dataset with its shape.
    pub fn insert(&mut self, file: impl Into<PathBuf>, internal_path: &str, shape: Vec<usize>) {
        self.entries
            .insert((file.into(), internal_path.to_string()), shape);
    }

    /// Builder-style [`Self::insert`].
    #[must_use]
    pub fn with(
        mut self,
        file: impl Into<PathBuf>,
        internal_path: &str,
        shape: Vec<usize>,
    ) -> Self {
        self.insert(file, internal_path, shape);
        self
    }
}

impl SourceCatalog for MemoryCatalog {
    fn locate(&self, file: &Path, internal_path: &str) -> SourceStatus {
        self.entries
            .get(&(file.to_path_buf(), internal_path.to_string()))
            .map_or(SourceStatus::Missing, |shape| {
                SourceStatus::Present(Some(shape.clone()))
            })
    }
}

impl<C: SourceCatalog + ?Sized> SourceCatalog for &C {
    fn locate(&self, file: &Path, internal_path: &str) -> SourceStatus {
        (**self).locate(file, internal_path)
    }
}

/// How the sources of one record are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StitchPolicy {
    /// Every source contributes its slab.
    StitchAll,
    /// Only the first source's slab is kept (averaged-frame removal).
    FirstSlabOnly,
}

impl StitchPolicy {
    /// Policy for `key` backed by `source_count` physical files.
    #[must_use]
    pub fn select(key: TargetKey, source_count: usize) -> Self {
        if !key.is_projection_data() && source_count > 1 {
            Self::FirstSlabOnly
        } else {
            Self::StitchAll
        }
    }
}

/// Builds logical array descriptors for scan records.
pub struct LayoutBuilder<'a, C: ?Sized> {
    tree: &'a SourceTree,
    config: &'a ConversionConfig,
    data_dir: PathBuf,
    catalog: &'a C,
}

impl<'a, C: SourceCatalog + ?Sized> LayoutBuilder<'a, C> {
    /// Creates a builder resolving relative source files against `data_dir`.
    pub fn new(
        tree: &'a SourceTree,
        config: &'a ConversionConfig,
        data_dir: impl Into<PathBuf>,
        catalog: &'a C,
    ) -> Self {
        Self {
            tree,
            config,
            data_dir: data_dir.into(),
            catalog,
        }
    }

    /// Builds the descriptor placing `record` under `key`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if a physical source is missing and
    /// [`Error::ShapeMismatch`] if the extent cannot be split or a source is
    /// too small. Both only concern this record.
    pub fn build(&self, record: &ScanRecord, key: TargetKey) -> Result<LogicalArrayDescriptor> {
        let array_path = self.tree.path(record.array);
        let array = self
            .tree
            .array(record.array)
            .ok_or_else(|| Error::NotFound {
                path: array_path.clone(),
            })?;
        let Some((&leading, trailing)) = array.shape.split_first() else {
            return Err(Error::ShapeMismatch {
                path: array_path,
                expected: vec![1],
                found: Vec::new(),
            });
        };

        let files = self.resolve_files(record, &array.virtual_sources);
        let count = files.len();
        let slab = leading / count;
        if slab == 0 {
            return Err(Error::ShapeMismatch {
                path: array_path,
                expected: vec![count],
                found: array.shape.clone(),
            });
        }

        let policy = StitchPolicy::select(key, count);
        let ranges: Vec<(usize, usize)> = match policy {
            StitchPolicy::FirstSlabOnly => vec![(0, slab)],
            StitchPolicy::StitchAll => (0..count)
                .map(|i| {
                    let end = if i + 1 == count { leading } else { (i + 1) * slab };
                    (i * slab, end)
                })
                .collect(),
        };
        debug!("{array_path} -> {key}: {count} source(s), slab {slab}, {policy:?}");

        let sources = files
            .into_iter()
            .zip(ranges)
            .map(|((file_path, internal_path), (start, end))| -> Result<SourceSlab> {
                let mut shape = Vec::with_capacity(array.shape.len());
                shape.push(end - start);
                shape.extend_from_slice(trailing);
                let source = PhysicalSource {
                    file_path,
                    internal_path,
                    shape,
                };
                if self.config.verify_sources && array.is_virtual() {
                    self.verify(&source)?;
                }
                Ok(SourceSlab { source, start, end })
            })
            .collect::<Result<Vec<_>>>()?;

        let total_leading = sources.last().map_or(0, |s| s.end);
        let mut total_shape = Vec::with_capacity(array.shape.len());
        total_shape.push(total_leading);
        total_shape.extend_from_slice(trailing);

        Ok(LogicalArrayDescriptor {
            target_key: key.path().to_string(),
            total_shape,
            dtype: array.dtype,
            sources,
        })
    }

    /// Physical files backing the record, in manifest order.
    ///
    /// A plain array is its own single source inside the input file.
    fn resolve_files(
        &self,
        record: &ScanRecord,
        manifest: &[VirtualSource],
    ) -> Vec<(PathBuf, String)> {
        if manifest.is_empty() {
            return vec![(
                self.tree.file_path().to_path_buf(),
                self.tree.path(record.array),
            )];
        }

        manifest
            .iter()
            .map(|entry| {
                let file = self.resolve_file(&entry.file_path);
                let internal = match &self.config.source_entry {
                    Some(entry_group) => self.rebuilt_internal_path(record, entry_group),
                    None => entry.internal_path.clone(),
                };
                (file, internal)
            })
            .collect()
    }

    fn resolve_file(&self, manifest_file: &str) -> PathBuf {
        // "." is how HDF5 records a source inside the virtual dataset's own file.
        if manifest_file == "." {
            return self.tree.file_path().to_path_buf();
        }
        let path = Path::new(manifest_file);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }

    /// `/<entry>/<owning group below its scan>/<dataset>`.
    fn rebuilt_internal_path(&self, record: &ScanRecord, entry_group: &str) -> String {
        let mut components = vec![entry_group.trim_matches('/').to_string()];
        components.extend(self.tree.path_below_top(record.owning_group));
        components.push(self.config.source_dataset.clone());
        let joined = components
            .iter()
            .filter(|c| !c.is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("/");
        format!("/{joined}")
    }

    fn verify(&self, source: &PhysicalSource) -> Result<()> {
        match self.catalog.locate(&source.file_path, &source.internal_path) {
            SourceStatus::Missing => Err(Error::NotFound {
                path: source.display_path(),
            }),
            SourceStatus::Present(None) => Ok(()),
            SourceStatus::Present(Some(found)) => {
                let fits = found.len() == source.shape.len()
                    && found[0] >= source.shape[0]
                    && found[1..] == source.shape[1..];
                if fits {
                    Ok(())
                } else {
                    Err(Error::ShapeMismatch {
                        path: source.display_path(),
                        expected: source.shape.clone(),
                        found,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Classification;
    use crate::tree::{ArrayNode, NodeId};

    fn tree_with_image(shape: Vec<usize>, files: &[&str]) -> (SourceTree, ScanRecord) {
        let mut tree = SourceTree::new("/scans/sample.h5");
        let group = tree.ensure_groups("/1.1/measurement").unwrap();
        let manifest = files
            .iter()
            .map(|f| VirtualSource::new(*f, "/entry_0000/measurement/data"))
            .collect();
        let array = tree
            .add_array(
                group,
                "image",
                ArrayNode::new(shape, ElementType::UInt16).with_virtual_sources(manifest),
            )
            .unwrap();
        let record = ScanRecord {
            array,
            owning_group: group,
            classification: Classification::Projection,
        };
        (tree, record)
    }

    #[test]
    fn test_stitch_two_sources() {
        let (tree, record) = tree_with_image(vec![100, 50, 50], &["a.h5", "b.h5"]);
        let config = ConversionConfig::default();
        let builder = LayoutBuilder::new(&tree, &config, "/scans", &AssumePresent);
        let desc = builder.build(&record, TargetKey::Data).unwrap();

        assert_eq!(desc.target_key, "/exchange/data");
        assert_eq!(desc.total_shape, vec![100, 50, 50]);
        assert_eq!(desc.dtype, ElementType::UInt16);
        assert_eq!(desc.sources.len(), 2);
        assert_eq!((desc.sources[0].start, desc.sources[0].end), (0, 50));
        assert_eq!((desc.sources[1].start, desc.sources[1].end), (50, 100));
        assert_eq!(desc.sources[1].source.file_path, PathBuf::from("/scans/b.h5"));
        assert_eq!(
            desc.sources[0].source.internal_path,
            "/entry_0000/measurement/data"
        );
        assert_eq!(desc.sources[0].source.shape, vec![50, 50, 50]);
        assert!(desc.is_partition());
    }

    #[test]
    fn test_remainder_goes_to_last_source() {
        let (tree, record) = tree_with_image(vec![101, 4, 4], &["a.h5", "b.h5", "c.h5"]);
        let config = ConversionConfig::default();
        let builder = LayoutBuilder::new(&tree, &config, "/scans", &AssumePresent);
        let desc = builder.build(&record, TargetKey::Data).unwrap();

        let ranges: Vec<(usize, usize)> = desc.sources.iter().map(|s| (s.start, s.end)).collect();
        assert_eq!(ranges, vec![(0, 33), (33, 66), (66, 101)]);
        assert_eq!(desc.sources[2].source.shape, vec![35, 4, 4]);
        assert!(desc.is_partition());
    }

    #[test]
    fn test_partition_holds_for_many_splits() {
        for leading in 1..40 {
            for count in 1..=leading.min(7) {
                let names: Vec<String> = (0..count).map(|i| format!("f{i}.h5")).collect();
                let refs: Vec<&str> = names.iter().map(String::as_str).collect();
                let (tree, record) = tree_with_image(vec![leading, 2, 2], &refs);
                let config = ConversionConfig::default();
                let builder = LayoutBuilder::new(&tree, &config, "/scans", &AssumePresent);
                let desc = builder.build(&record, TargetKey::Data).unwrap();
                assert!(desc.is_partition(), "leading={leading} count={count}");
                assert_eq!(desc.leading_extent(), leading);
            }
        }
    }

    #[test]
    fn test_averaged_frame_removal() {
        let (tree, record) = tree_with_image(vec![41, 8, 8], &["a.h5", "b.h5", "c.h5", "d.h5"]);
        let config = ConversionConfig::default();
        let builder = LayoutBuilder::new(&tree, &config, "/scans", &AssumePresent);

        for key in [TargetKey::DataWhite, TargetKey::DataWhiteFallback, TargetKey::DataDark] {
            let desc = builder.build(&record, key).unwrap();
            assert_eq!(desc.total_shape, vec![10, 8, 8]);
            assert_eq!(desc.sources.len(), 1);
            assert_eq!(desc.sources[0].source.file_path, PathBuf::from("/scans/a.h5"));
            assert_eq!((desc.sources[0].start, desc.sources[0].end), (0, 10));
            assert!(desc.is_partition());
        }
    }

    #[test]
    fn test_single_source_flat_is_stitched() {
        let (tree, record) = tree_with_image(vec![21, 8, 8], &["only.h5"]);
        let config = ConversionConfig::default();
        let builder = LayoutBuilder::new(&tree, &config, "/scans", &AssumePresent);
        let desc = builder.build(&record, TargetKey::DataWhite).unwrap();
        assert_eq!(desc.total_shape, vec![21, 8, 8]);
        assert_eq!(desc.sources.len(), 1);
        assert_eq!(StitchPolicy::select(TargetKey::DataWhite, 1), StitchPolicy::StitchAll);
    }

    #[test]
    fn test_plain_array_is_its_own_source() {
        let (tree, record) = tree_with_image(vec![12, 3, 3], &[]);
        let config = ConversionConfig::default();
        let catalog = MemoryCatalog::new();
        let builder = LayoutBuilder::new(&tree, &config, "/scans", &catalog);
        let desc = builder.build(&record, TargetKey::DataDark).unwrap();

        assert_eq!(desc.sources.len(), 1);
        let source = &desc.sources[0].source;
        assert_eq!(source.file_path, PathBuf::from("/scans/sample.h5"));
        assert_eq!(source.internal_path, "/1.1/measurement/image");
        assert_eq!(source.shape, vec![12, 3, 3]);
    }

    #[test]
    fn test_manifest_internal_path_when_entry_disabled() {
        let mut tree = SourceTree::new("/scans/sample.h5");
        let group = tree.ensure_groups("/1.1/measurement").unwrap();
        let array = tree
            .add_array(
                group,
                "image",
                ArrayNode::new(vec![4, 2, 2], ElementType::Float32).with_virtual_sources(vec![
                    VirtualSource::new("/abs/x.h5", "/scan/frames"),
                    VirtualSource::new(".", "/local/frames"),
                ]),
            )
            .unwrap();
        let record = ScanRecord {
            array,
            owning_group: group,
            classification: Classification::Projection,
        };
        let config = ConversionConfig::default().with_source_entry(None);
        let builder = LayoutBuilder::new(&tree, &config, "/scans", &AssumePresent);
        let desc = builder.build(&record, TargetKey::Data).unwrap();

        assert_eq!(desc.sources[0].source.file_path, PathBuf::from("/abs/x.h5"));
        assert_eq!(desc.sources[0].source.internal_path, "/scan/frames");
        assert_eq!(
            desc.sources[1].source.file_path,
            PathBuf::from("/scans/sample.h5")
        );
        assert_eq!(desc.sources[1].source.internal_path, "/local/frames");
    }

    #[test]
    fn test_rebuilt_path_for_image_in_scan_group() {
        let mut tree = SourceTree::new("/scans/sample.h5");
        let scan = tree.add_group(NodeId::ROOT, "4.1").unwrap();
        let array = tree
            .add_array(
                scan,
                "image",
                ArrayNode::new(vec![2, 2, 2], ElementType::UInt8)
                    .with_virtual_sources(vec![VirtualSource::new("a.h5", "/x")]),
            )
            .unwrap();
        let record = ScanRecord {
            array,
            owning_group: scan,
            classification: Classification::Dark,
        };
        let config = ConversionConfig::default();
        let builder = LayoutBuilder::new(&tree, &config, "/scans", &AssumePresent);
        let desc = builder.build(&record, TargetKey::DataDark).unwrap();
        assert_eq!(desc.sources[0].source.internal_path, "/entry_0000/data");
    }

    #[test]
    fn test_missing_source_is_not_found() {
        let (tree, record) = tree_with_image(vec![10, 4, 4], &["a.h5", "b.h5"]);
        let config = ConversionConfig::default();
        let catalog = MemoryCatalog::new().with(
            "/scans/a.h5",
            "/entry_0000/measurement/data",
            vec![5, 4, 4],
        );
        let builder = LayoutBuilder::new(&tree, &config, "/scans", &catalog);
        let err = builder.build(&record, TargetKey::Data).unwrap_err();
        assert!(matches!(err, Error::NotFound { ref path } if path.contains("b.h5")));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_source_shape_mismatch() {
        let (tree, record) = tree_with_image(vec![10, 4, 4], &["a.h5", "b.h5"]);
        let config = ConversionConfig::default();
        let catalog = MemoryCatalog::new()
            .with("/scans/a.h5", "/entry_0000/measurement/data", vec![5, 4, 4])
            .with("/scans/b.h5", "/entry_0000/measurement/data", vec![5, 4, 3]);
        let builder = LayoutBuilder::new(&tree, &config, "/scans", &catalog);
        let err = builder.build(&record, TargetKey::Data).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));

        let short = MemoryCatalog::new()
            .with("/scans/a.h5", "/entry_0000/measurement/data", vec![4, 4, 4])
            .with("/scans/b.h5", "/entry_0000/measurement/data", vec![5, 4, 4]);
        let builder = LayoutBuilder::new(&tree, &config, "/scans", &short);
        assert!(builder.build(&record, TargetKey::Data).is_err());
    }

    #[test]
    fn test_verification_can_be_disabled() {
        let (tree, record) = tree_with_image(vec![10, 4, 4], &["a.h5", "b.h5"]);
        let config = ConversionConfig::default().with_verify_sources(false);
        let catalog = MemoryCatalog::new();
        let builder = LayoutBuilder::new(&tree, &config, "/scans", &catalog);
        assert!(builder.build(&record, TargetKey::Data).is_ok());
    }

    #[test]
    fn test_fewer_rows_than_sources() {
        let (tree, record) = tree_with_image(vec![2, 4, 4], &["a.h5", "b.h5", "c.h5"]);
        let config = ConversionConfig::default();
        let builder = LayoutBuilder::new(&tree, &config, "/scans", &AssumePresent);
        let err = builder.build(&record, TargetKey::Data).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }
}
