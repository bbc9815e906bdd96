//! Property-based test generators using proptest.
//!
//! [`GraphOp`] sequences drive a live [`Document`] through random edits.
//! Indices are reduced modulo the current length when applied, so every
//! generated sequence is valid against any document.

use crate::model::{Calibration, DataGroup, DataItem, Document, Graphic};
use proptest::prelude::*;
use refgraph_codec::Value;
use std::rc::Rc;

/// Strategy for scalar property values.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e6f64..1.0e6).prop_map(Value::Float),
        text_strategy().prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
    ]
}

/// Strategy for arbitrary short strings, biased towards text that looks
/// like a number.
pub fn text_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        2 => "\\PC{0,12}",
        1 => any::<i64>().prop_map(|n| n.to_string()),
        1 => (-1.0e6f64..1.0e6).prop_map(|f| f.to_string()),
        1 => (0u32..100, 0u32..10).prop_map(|(m, e)| format!("{m}e{e}")),
        1 => "[0-9]{1,4}(\\.[0-9]{0,2})?",
    ]
}

/// Strategy for short labels.
pub fn label_strategy() -> impl Strategy<Value = String> {
    text_strategy()
}

/// Strategy for storage keys: any non-empty string, numeric-looking ones
/// included.
pub fn key_strategy() -> impl Strategy<Value = String> {
    text_strategy().prop_filter("keys are non-empty", |key| !key.is_empty())
}

/// One random edit of a sample document.
#[derive(Debug, Clone)]
pub enum GraphOp {
    /// Insert a new group before `index`.
    AddGroup {
        /// Insertion position.
        index: usize,
        /// Group name.
        name: String,
    },
    /// Remove a group and everything only it owns.
    RemoveGroup {
        /// Group position.
        group: usize,
    },
    /// Insert a new item into a group.
    AddItem {
        /// Group position.
        group: usize,
        /// Insertion position.
        index: usize,
        /// Raw value.
        value: f64,
    },
    /// Remove an item from a group.
    RemoveItem {
        /// Group position.
        group: usize,
        /// Item position.
        item: usize,
    },
    /// Relabel an item.
    SetLabel {
        /// Group position.
        group: usize,
        /// Item position.
        item: usize,
        /// New label.
        label: String,
    },
    /// Change an item's raw value.
    SetValue {
        /// Group position.
        group: usize,
        /// Item position.
        item: usize,
        /// New value.
        value: f64,
    },
    /// Point an item at the document's calibration.
    ShareCalibration {
        /// Group position.
        group: usize,
        /// Item position.
        item: usize,
    },
    /// Give an item a calibration of its own.
    OwnCalibration {
        /// Group position.
        group: usize,
        /// Item position.
        item: usize,
        /// Scale factor.
        scale: f64,
    },
    /// Remove an item's calibration.
    ClearCalibration {
        /// Group position.
        group: usize,
        /// Item position.
        item: usize,
    },
    /// Replace the document's calibration.
    ReplaceDocumentCalibration {
        /// Scale factor.
        scale: f64,
    },
    /// Insert a graphic into an item.
    AddGraphic {
        /// Group position.
        group: usize,
        /// Item position.
        item: usize,
        /// Insertion position.
        index: usize,
    },
    /// Remove a graphic from an item.
    RemoveGraphic {
        /// Group position.
        group: usize,
        /// Item position.
        item: usize,
        /// Graphic position.
        graphic: usize,
    },
    /// Replace an item's sample buffer.
    SetSamples {
        /// Group position.
        group: usize,
        /// Item position.
        item: usize,
        /// Buffer contents.
        samples: Vec<u8>,
    },
    /// Move the same item to another group position.
    MoveItem {
        /// Group position.
        group: usize,
        /// Current item position.
        from: usize,
        /// New item position.
        to: usize,
    },
}

fn pick<T>(members: &[Rc<T>], index: usize) -> Option<Rc<T>> {
    if members.is_empty() {
        None
    } else {
        Some(Rc::clone(&members[index % members.len()]))
    }
}

fn item_at(document: &Document, group: usize, item: usize) -> Option<Rc<DataItem>> {
    let group = pick(&document.groups.to_vec(), group)?;
    pick(&group.items.to_vec(), item)
}

impl GraphOp {
    /// Applies the edit. Edits that address an empty list do nothing.
    pub fn apply(&self, document: &Document) {
        match self {
            GraphOp::AddGroup { index, name } => {
                let index = index % (document.groups.len() + 1);
                document.groups.insert(index, DataGroup::new(name));
            }
            GraphOp::RemoveGroup { group } => {
                if let Some(group) = pick(&document.groups.to_vec(), *group) {
                    document.groups.remove_value(&group);
                }
            }
            GraphOp::AddItem {
                group,
                index,
                value,
            } => {
                if let Some(group) = pick(&document.groups.to_vec(), *group) {
                    let index = index % (group.items.len() + 1);
                    group.items.insert(index, DataItem::new("item", *value));
                }
            }
            GraphOp::RemoveItem { group, item } => {
                if let Some(group) = pick(&document.groups.to_vec(), *group) {
                    if !group.items.is_empty() {
                        group.items.remove(item % group.items.len());
                    }
                }
            }
            GraphOp::SetLabel { group, item, label } => {
                if let Some(item) = item_at(document, *group, *item) {
                    item.set_label(label);
                }
            }
            GraphOp::SetValue { group, item, value } => {
                if let Some(item) = item_at(document, *group, *item) {
                    item.set_value(*value);
                }
            }
            GraphOp::ShareCalibration { group, item } => {
                if let (Some(item), Some(calibration)) =
                    (item_at(document, *group, *item), document.calibration.get())
                {
                    item.calibration.set(Some(calibration));
                }
            }
            GraphOp::OwnCalibration { group, item, scale } => {
                if let Some(item) = item_at(document, *group, *item) {
                    item.calibration.set(Some(Calibration::new(*scale, 0.0)));
                }
            }
            GraphOp::ClearCalibration { group, item } => {
                if let Some(item) = item_at(document, *group, *item) {
                    item.calibration.set(None);
                }
            }
            GraphOp::ReplaceDocumentCalibration { scale } => {
                document
                    .calibration
                    .set(Some(Calibration::new(*scale, 1.0)));
            }
            GraphOp::AddGraphic { group, item, index } => {
                if let Some(item) = item_at(document, *group, *item) {
                    let index = index % (item.graphics.len() + 1);
                    item.graphics.insert(index, Graphic::new("dot", 0.0, 0.0));
                }
            }
            GraphOp::RemoveGraphic {
                group,
                item,
                graphic,
            } => {
                if let Some(item) = item_at(document, *group, *item) {
                    if !item.graphics.is_empty() {
                        item.graphics.remove(graphic % item.graphics.len());
                    }
                }
            }
            GraphOp::SetSamples {
                group,
                item,
                samples,
            } => {
                if let Some(item) = item_at(document, *group, *item) {
                    item.set_samples(samples.clone());
                }
            }
            GraphOp::MoveItem { group, from, to } => {
                if let Some(group) = pick(&document.groups.to_vec(), *group) {
                    let len = group.items.len();
                    if let Some(item) = pick(&group.items.to_vec(), *from) {
                        let from = from % len;
                        let to = to % (len + 1);
                        // Inserted before removal so the count never hits zero.
                        group.items.insert(to, item);
                        let stale = if to <= from { from + 1 } else { from };
                        group.items.remove(stale);
                    }
                }
            }
        }
    }
}

/// Strategy for one edit.
pub fn graph_op_strategy() -> impl Strategy<Value = GraphOp> {
    let index = 0usize..16;
    prop_oneof![
        3 => (index.clone(), label_strategy())
            .prop_map(|(index, name)| GraphOp::AddGroup { index, name }),
        1 => index.clone().prop_map(|group| GraphOp::RemoveGroup { group }),
        4 => (index.clone(), index.clone(), -100.0f64..100.0)
            .prop_map(|(group, index, value)| GraphOp::AddItem { group, index, value }),
        2 => (index.clone(), index.clone())
            .prop_map(|(group, item)| GraphOp::RemoveItem { group, item }),
        1 => (index.clone(), index.clone(), label_strategy())
            .prop_map(|(group, item, label)| GraphOp::SetLabel { group, item, label }),
        1 => (index.clone(), index.clone(), -100.0f64..100.0)
            .prop_map(|(group, item, value)| GraphOp::SetValue { group, item, value }),
        2 => (index.clone(), index.clone())
            .prop_map(|(group, item)| GraphOp::ShareCalibration { group, item }),
        1 => (index.clone(), index.clone(), 0.1f64..10.0)
            .prop_map(|(group, item, scale)| GraphOp::OwnCalibration { group, item, scale }),
        1 => (index.clone(), index.clone())
            .prop_map(|(group, item)| GraphOp::ClearCalibration { group, item }),
        1 => (0.1f64..10.0).prop_map(|scale| GraphOp::ReplaceDocumentCalibration { scale }),
        2 => (index.clone(), index.clone(), index.clone())
            .prop_map(|(group, item, index)| GraphOp::AddGraphic { group, item, index }),
        1 => (index.clone(), index.clone(), index.clone())
            .prop_map(|(group, item, graphic)| GraphOp::RemoveGraphic { group, item, graphic }),
        1 => (index.clone(), index.clone(), prop::collection::vec(any::<u8>(), 0..16))
            .prop_map(|(group, item, samples)| GraphOp::SetSamples { group, item, samples }),
        1 => (index.clone(), index.clone(), index)
            .prop_map(|(group, from, to)| GraphOp::MoveItem { group, from, to }),
    ]
}

/// Strategy for a sequence of edits.
pub fn graph_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<GraphOp>> {
    prop::collection::vec(graph_op_strategy(), 1..max_len)
}
