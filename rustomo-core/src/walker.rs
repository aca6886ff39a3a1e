//! Depth-first hierarchy walk producing scan records and acquisition parameters.

use crate::classify::{classify_label, Classification};
use crate::config::ConversionConfig;
use crate::params::{AcquisitionParams, ParamAnomaly};
use crate::report::{SkipReason, SkippedRecord};
use crate::tree::{ArrayNode, ElementType, NodeId, NodeKind, SourceTree, Value};
use crate::{Error, Result};
use log::{debug, warn};

/// A classified acquisition array found during the walk.
///
/// Holds handles into the tree; nothing is copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRecord {
    pub array: NodeId,
    pub owning_group: NodeId,
    pub classification: Classification,
}

/// Everything collected by one walk.
#[derive(Debug, Clone, Default)]
pub struct WalkOutcome {
    pub params: AcquisitionParams,
    pub records: Vec<ScanRecord>,
    pub skipped: Vec<SkippedRecord>,
    pub anomalies: Vec<ParamAnomaly>,
}

struct Frame {
    group: NodeId,
    next: usize,
}

/// Walks `tree` depth-first in child order.
///
/// Groups are descended into, `image`-like arrays are classified through the
/// title of their top-level scan group, and recognised parameter arrays are
/// recorded. Traversal uses an explicit stack, so depth is unbounded.
///
/// # Errors
/// Returns [`Error::MalformedMetadata`] when a title or parameter exists but
/// cannot be interpreted. Missing titles only skip the affected array.
pub fn walk(tree: &SourceTree, config: &ConversionConfig) -> Result<WalkOutcome> {
    let mut outcome = WalkOutcome::default();
    let mut stack = vec![Frame {
        group: tree.root(),
        next: 0,
    }];

    while let Some(frame) = stack.last_mut() {
        let Some(&child) = tree.children(frame.group).get(frame.next) else {
            stack.pop();
            continue;
        };
        frame.next += 1;

        match tree.kind(child) {
            NodeKind::Group(_) => stack.push(Frame {
                group: child,
                next: 0,
            }),
            NodeKind::Array(array) => visit_array(tree, config, child, array, &mut outcome)?,
        }
    }

    debug!(
        "walk finished: {} record(s), {} skipped",
        outcome.records.len(),
        outcome.skipped.len()
    );
    Ok(outcome)
}

fn visit_array(
    tree: &SourceTree,
    config: &ConversionConfig,
    id: NodeId,
    array: &ArrayNode,
    outcome: &mut WalkOutcome,
) -> Result<()> {
    let name = tree.name(id);

    if name == config.image_name && array.rank() == config.image_rank {
        let path = tree.path(id);
        match resolve_title(tree, config, id)? {
            TitleLookup::Missing(title_path) => {
                warn!("title {title_path} not found, skipping {path}");
                outcome
                    .skipped
                    .push(SkippedRecord::new(path, SkipReason::TitleNotFound(title_path)));
            }
            TitleLookup::Unread(title_path) => {
                warn!("title {title_path} has no loaded value, skipping {path}");
                outcome
                    .skipped
                    .push(SkippedRecord::new(path, SkipReason::TitleUnread(title_path)));
            }
            TitleLookup::Found(label) => match classify_label(label.as_bytes()).first() {
                Some(classification) => {
                    debug!("{path} classified as {classification}");
                    let owning_group = tree.parent(id).unwrap_or(NodeId::ROOT);
                    outcome.records.push(ScanRecord {
                        array: id,
                        owning_group,
                        classification,
                    });
                }
                None => {
                    debug!("{path}: title {label:?} matches no keyword");
                    outcome
                        .skipped
                        .push(SkippedRecord::new(path, SkipReason::Unclassified(label)));
                }
            },
        }
    } else if let Some(field) = config.parameter_field(name) {
        let path = tree.path(id);
        let anomaly = match &array.value {
            Some(value) => outcome.params.record(field, value, &path),
            None => Some(outcome.params.reject(field, &path, "no scalar value")),
        };
        if let Some(anomaly) = anomaly {
            warn!("acquisition parameter {anomaly}");
            outcome.anomalies.push(anomaly);
        }
    }
    Ok(())
}

enum TitleLookup {
    Missing(String),
    /// Text title whose value was not loaded.
    Unread(String),
    Found(String),
}

fn resolve_title(
    tree: &SourceTree,
    config: &ConversionConfig,
    image: NodeId,
) -> Result<TitleLookup> {
    let scan = tree.top_level_ancestor(image);
    let title_path = if scan == tree.root() {
        format!("/{}", config.title_name)
    } else {
        format!("{}/{}", tree.path(scan), config.title_name)
    };

    let Some(title) = tree.child(scan, &config.title_name) else {
        return Ok(TitleLookup::Missing(title_path));
    };
    let malformed = |reason: &str| Error::MalformedMetadata {
        path: title_path.clone(),
        reason: reason.to_string(),
    };
    let array = tree.array(title).ok_or_else(|| malformed("title is a group"))?;
    match &array.value {
        Some(Value::Text(label)) => Ok(TitleLookup::Found(label.clone())),
        Some(_) => Err(malformed("title is not a text value")),
        None if array.dtype == ElementType::Text => Ok(TitleLookup::Unread(title_path)),
        None => Err(malformed("title is not a text value")),
    }
}
