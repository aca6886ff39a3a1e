//! HDF5 source import and exchange-layout output.
//!
//! [`read_source_tree`] imports group/dataset metadata (never sample data)
//! into a [`SourceTree`]. [`Hdf5LayoutWriter`] persists a composed layout
//! either as true virtual datasets or by copying every slab.

use crate::{Error, Result};
use hdf5::plist::dataset_create::Layout;
use hdf5::types::{
    FixedAscii, FixedUnicode, FloatSize, H5Type, IntSize, TypeDescriptor, VarLenAscii,
    VarLenUnicode,
};
use hdf5::{Dataset, File, Group, Hyperslab, Selection, SliceOrIndex};
use log::{debug, info};
use ndarray::{ArrayD, ArrayView1, IxDyn};
use rustomo_core::{
    ArrayNode, ElementType, LogicalArrayDescriptor, NodeId, SourceCatalog, SourceSlab,
    SourceStatus, SourceTree, TargetWriter, Value, VirtualSource,
};
use std::path::Path;
use std::str::FromStr;

const FORMAT_VERSION: &str = "0.1";
const DEFAULT_CHUNK_ROWS: usize = 64;

/// Options for importing an HDF5 file.
#[derive(Clone, Debug)]
pub struct ReadOptions {
    /// Maximum group nesting; deeper (or cyclic) hierarchies are rejected.
    pub max_depth: usize,
    /// Load values of single-element datasets (titles, parameters).
    pub load_values: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            max_depth: 64,
            load_values: true,
        }
    }
}

impl ReadOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    #[must_use]
    pub fn with_load_values(mut self, load: bool) -> Self {
        self.load_values = load;
        self
    }
}

/// Imports the hierarchy of an HDF5 file.
///
/// Members are visited in the order HDF5 lists them. Links that resolve to
/// neither a group nor a dataset (named datatypes, dangling links) are
/// ignored.
///
/// # Errors
/// Returns an error if the file cannot be opened, a member cannot be
/// inspected, or the nesting exceeds `options.max_depth`.
pub fn read_source_tree<P: AsRef<Path>>(path: P, options: &ReadOptions) -> Result<SourceTree> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut tree = SourceTree::new(path);
    let mut stack: Vec<(Group, NodeId, usize)> = vec![(file.group("/")?, NodeId::ROOT, 0)];

    while let Some((group, node, depth)) = stack.pop() {
        if depth > options.max_depth {
            return Err(Error::InvalidFormat(format!(
                "{} nests deeper than {} groups",
                tree.path(node),
                options.max_depth
            )));
        }

        // Reversed push keeps member order on pop.
        let mut pending = Vec::new();
        for name in group.member_names()? {
            if let Ok(child) = group.group(&name) {
                let id = tree.add_group(node, &name)?;
                pending.push((child, id, depth + 1));
            } else if let Ok(dataset) = group.dataset(&name) {
                let array = read_array_node(&dataset, options)?;
                tree.add_array(node, &name, array)?;
            } else {
                debug!("ignoring {}/{name}: not a group or dataset", group.name());
            }
        }
        stack.extend(pending.into_iter().rev());
    }

    debug!("imported {} node(s) from {}", tree.len(), path.display());
    Ok(tree)
}

fn read_array_node(dataset: &Dataset, options: &ReadOptions) -> Result<ArrayNode> {
    let descriptor = dataset.dtype()?.to_descriptor()?;
    let mut array = ArrayNode::new(dataset.shape(), element_type(&descriptor));

    if options.load_values && dataset.size() == 1 {
        array.value = read_single_value(dataset, &descriptor)?;
    }

    let dcpl = dataset.dcpl()?;
    if matches!(dcpl.layout(), Layout::Virtual) {
        array.virtual_sources = dcpl
            .virtual_map()
            .into_iter()
            .map(|mapping| VirtualSource::new(mapping.src_filename, mapping.src_dataset))
            .collect();
    }
    Ok(array)
}

fn element_type(descriptor: &TypeDescriptor) -> ElementType {
    match descriptor {
        TypeDescriptor::Integer(size) => match size {
            IntSize::U1 => ElementType::Int8,
            IntSize::U2 => ElementType::Int16,
            IntSize::U4 => ElementType::Int32,
            IntSize::U8 => ElementType::Int64,
        },
        TypeDescriptor::Unsigned(size) => match size {
            IntSize::U1 => ElementType::UInt8,
            IntSize::U2 => ElementType::UInt16,
            IntSize::U4 => ElementType::UInt32,
            IntSize::U8 => ElementType::UInt64,
        },
        TypeDescriptor::Float(FloatSize::U4) => ElementType::Float32,
        TypeDescriptor::Float(FloatSize::U8) => ElementType::Float64,
        TypeDescriptor::Boolean => ElementType::Bool,
        TypeDescriptor::FixedAscii(_)
        | TypeDescriptor::FixedUnicode(_)
        | TypeDescriptor::VarLenAscii
        | TypeDescriptor::VarLenUnicode => ElementType::Text,
        _ => ElementType::Other,
    }
}

fn read_single_value(dataset: &Dataset, descriptor: &TypeDescriptor) -> Result<Option<Value>> {
    let value = match descriptor {
        TypeDescriptor::Integer(_) | TypeDescriptor::Unsigned(_) => {
            first(dataset.read_raw::<i64>()?).map(Value::Int)
        }
        TypeDescriptor::Float(_) => first(dataset.read_raw::<f64>()?).map(Value::Float),
        TypeDescriptor::Boolean => first(dataset.read_raw::<bool>()?).map(Value::Bool),
        TypeDescriptor::VarLenAscii => {
            first(dataset.read_raw::<VarLenAscii>()?).map(|s| Value::Text(s.to_string()))
        }
        TypeDescriptor::VarLenUnicode => {
            first(dataset.read_raw::<VarLenUnicode>()?).map(|s| Value::Text(s.to_string()))
        }
        TypeDescriptor::FixedAscii(len) => read_fixed_text(dataset, *len, false)?.map(Value::Text),
        TypeDescriptor::FixedUnicode(len) => read_fixed_text(dataset, *len, true)?.map(Value::Text),
        _ => None,
    };
    Ok(value)
}

/// Reads a fixed-length string into the smallest buffer class that holds it.
///
/// HDF5 only converts fixed-length strings to other fixed-length strings, so
/// the memory type is picked from the stored length.
fn read_fixed_text(dataset: &Dataset, len: usize, unicode: bool) -> Result<Option<String>> {
    match (len, unicode) {
        (0..=64, false) => fixed_ascii::<64>(dataset),
        (65..=1024, false) => fixed_ascii::<1024>(dataset),
        (1025..=16384, false) => fixed_ascii::<16384>(dataset),
        (0..=64, true) => fixed_unicode::<64>(dataset),
        (65..=1024, true) => fixed_unicode::<1024>(dataset),
        (1025..=16384, true) => fixed_unicode::<16384>(dataset),
        _ => {
            debug!("{}: {len}-byte string not loaded", dataset.name());
            Ok(None)
        }
    }
}

fn fixed_ascii<const N: usize>(dataset: &Dataset) -> Result<Option<String>> {
    let values = dataset.read_raw::<FixedAscii<N>>()?;
    Ok(first(values).map(|s| s.as_str().to_string()))
}

fn fixed_unicode<const N: usize>(dataset: &Dataset) -> Result<Option<String>> {
    let values = dataset.read_raw::<FixedUnicode<N>>()?;
    Ok(first(values).map(|s| s.as_str().to_string()))
}

fn first<T>(values: Vec<T>) -> Option<T> {
    values.into_iter().next()
}

/// Catalog that opens each physical file and reads the dataset shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct Hdf5Catalog;

impl SourceCatalog for Hdf5Catalog {
    fn locate(&self, file: &Path, internal_path: &str) -> SourceStatus {
        if !file.is_file() {
            return SourceStatus::Missing;
        }
        match File::open(file).and_then(|f| f.dataset(internal_path)) {
            Ok(dataset) => SourceStatus::Present(Some(dataset.shape())),
            Err(err) => {
                debug!("lookup of {}::{internal_path} failed: {err}", file.display());
                SourceStatus::Missing
            }
        }
    }
}

/// How composed arrays are persisted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Virtual datasets referencing the physical sources.
    #[default]
    Virtual,
    /// Contiguous datasets holding a copy of every slab.
    Materialize,
}

/// Runs `$body` with `$T` bound to the Rust type of an [`ElementType`].
macro_rules! with_element_type {
    ($dtype:expr, $T:ident => $body:expr) => {
        match $dtype {
            ElementType::Int8 => {
                type $T = i8;
                $body
            }
            ElementType::Int16 => {
                type $T = i16;
                $body
            }
            ElementType::Int32 => {
                type $T = i32;
                $body
            }
            ElementType::Int64 => {
                type $T = i64;
                $body
            }
            ElementType::UInt8 => {
                type $T = u8;
                $body
            }
            ElementType::UInt16 => {
                type $T = u16;
                $body
            }
            ElementType::UInt32 => {
                type $T = u32;
                $body
            }
            ElementType::UInt64 => {
                type $T = u64;
                $body
            }
            ElementType::Float32 => {
                type $T = f32;
                $body
            }
            ElementType::Float64 => {
                type $T = f64;
                $body
            }
            ElementType::Bool => {
                type $T = bool;
                $body
            }
            other @ (ElementType::Text | ElementType::Other) => Err(Error::InvalidFormat(
                format!("cannot compose arrays of element type {other:?}"),
            )),
        }
    };
}

/// Writes a target layout into a new HDF5 file.
pub struct Hdf5LayoutWriter {
    file: File,
    mode: WriteMode,
    chunk_rows: usize,
}

impl Hdf5LayoutWriter {
    /// Create (truncating) the output file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P, mode: WriteMode) -> Result<Self> {
        let file = File::create(path)?;
        set_attr_str_file(&file, "rustomo_format_version", FORMAT_VERSION)?;
        Ok(Self {
            file,
            mode,
            chunk_rows: DEFAULT_CHUNK_ROWS,
        })
    }

    /// Rows copied per read/write round trip in [`WriteMode::Materialize`].
    #[must_use]
    pub fn with_chunk_rows(mut self, rows: usize) -> Self {
        self.chunk_rows = rows.max(1);
        self
    }

    fn check_free(&self, key: &str) -> Result<()> {
        if self.file.link_exists(key) {
            return Err(Error::InvalidFormat(format!(
                "{key} already exists in output file"
            )));
        }
        Ok(())
    }
}

impl TargetWriter for Hdf5LayoutWriter {
    type Error = Error;

    fn create_group(&mut self, path: &str) -> Result<()> {
        if !self.file.link_exists(path) {
            self.file.create_group(path)?;
        }
        Ok(())
    }

    fn create_virtual_array(&mut self, descriptor: &LogicalArrayDescriptor) -> Result<()> {
        self.check_free(&descriptor.target_key)?;
        match self.mode {
            WriteMode::Virtual => {
                with_element_type!(descriptor.dtype, T => {
                    create_virtual::<T>(&self.file, descriptor)
                })?;
            }
            WriteMode::Materialize => {
                let chunk_rows = self.chunk_rows;
                with_element_type!(descriptor.dtype, T => {
                    materialize::<T>(&self.file, descriptor, chunk_rows)
                })?;
            }
        }
        info!(
            "wrote {} ({:?}, {} source(s))",
            descriptor.target_key,
            self.mode,
            descriptor.sources.len()
        );
        Ok(())
    }

    fn create_array(&mut self, key: &str, data: &[f64]) -> Result<()> {
        self.check_free(key)?;
        let dataset = self
            .file
            .new_dataset::<f64>()
            .shape((data.len(),))
            .create(key)?;
        if !data.is_empty() {
            dataset.write(ArrayView1::from(data))?;
        }
        set_dataset_units(&dataset, "degrees")?;
        Ok(())
    }
}

fn create_virtual<T: H5Type>(file: &File, descriptor: &LogicalArrayDescriptor) -> Result<()> {
    let trailing = descriptor.total_shape.len().saturating_sub(1);
    file.new_dataset::<T>()
        .shape(descriptor.total_shape.clone())
        .with_dcpl(|pl| {
            for slab in &descriptor.sources {
                pl.virtual_map(
                    slab.source.file_path.to_string_lossy(),
                    slab.source.internal_path.as_str(),
                    slab.source.shape.clone(),
                    Selection::All,
                    descriptor.total_shape.clone(),
                    row_selection(slab.start, slab.end, trailing),
                );
            }
            pl
        })
        .create(descriptor.target_key.as_str())?;
    Ok(())
}

fn materialize<T: H5Type>(
    file: &File,
    descriptor: &LogicalArrayDescriptor,
    chunk_rows: usize,
) -> Result<()> {
    let target = file
        .new_dataset::<T>()
        .shape(descriptor.total_shape.clone())
        .create(descriptor.target_key.as_str())?;
    for slab in &descriptor.sources {
        let source_file = File::open(&slab.source.file_path)?;
        let source = source_file.dataset(&slab.source.internal_path)?;
        debug!(
            "copying {} rows from {}",
            slab.rows(),
            slab.source.display_path()
        );
        copy_slab::<T>(&source, &target, slab, chunk_rows)?;
    }
    Ok(())
}

fn copy_slab<T: H5Type>(
    source: &Dataset,
    target: &Dataset,
    slab: &SourceSlab,
    chunk_rows: usize,
) -> Result<()> {
    let trailing = slab.source.shape.len().saturating_sub(1);
    let rows = slab.rows();
    let mut offset = 0;
    while offset < rows {
        let end = (offset + chunk_rows).min(rows);
        let block: ArrayD<T> =
            source.read_slice::<T, _, IxDyn>(row_selection(offset, end, trailing))?;
        target.write_slice(
            &block,
            row_selection(slab.start + offset, slab.start + end, trailing),
        )?;
        offset = end;
    }
    Ok(())
}

/// Rows `[start, end)` of the leading axis, all of the `trailing` axes.
fn row_selection(start: usize, end: usize, trailing: usize) -> Selection {
    let mut dims = Vec::with_capacity(trailing + 1);
    dims.push(SliceOrIndex::from(start..end));
    dims.extend((0..trailing).map(|_| SliceOrIndex::from(..)));
    Selection::from(Hyperslab::from(dims))
}

fn set_dataset_units(dataset: &Dataset, units: &str) -> Result<()> {
    let value = to_var_len_unicode(units)?;
    dataset
        .new_attr::<VarLenUnicode>()
        .create("units")?
        .write_scalar(&value)?;
    Ok(())
}

fn set_attr_str_file(file: &File, name: &str, value: &str) -> Result<()> {
    let value = to_var_len_unicode(value)?;
    file.new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn to_var_len_unicode(value: &str) -> Result<VarLenUnicode> {
    VarLenUnicode::from_str(value)
        .map_err(|e| Error::InvalidFormat(format!("invalid utf-8 attribute: {e}")))
}
