//! Benchmark utilities.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use rand::Rng;
use refgraph_testkit::{Calibration, DataGroup, DataItem, Document, Graphic};
use std::rc::Rc;

/// Generates random sample bytes.
pub fn random_samples(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Builds a detached document with `groups` groups of `items` items each.
///
/// Every item has one graphic and `sample_size` bytes of samples; every
/// other item shares the document calibration.
pub fn wide_document(groups: usize, items: usize, sample_size: usize) -> Rc<Document> {
    let mut rng = rand::thread_rng();
    let document = Document::new("bench");
    let calibration = Calibration::new(1.5, 0.25);
    document.calibration.set(Some(Rc::clone(&calibration)));

    for g in 0..groups {
        let group = DataGroup::new(&format!("group-{g}"));
        for i in 0..items {
            let item = DataItem::new(&format!("item-{i}"), rng.gen_range(0.0..100.0));
            item.graphics
                .append(Graphic::new("dot", rng.gen(), rng.gen()));
            item.set_samples(random_samples(sample_size));
            if i % 2 == 0 {
                item.calibration.set(Some(Rc::clone(&calibration)));
            }
            group.items.append(item);
        }
        document.groups.append(group);
    }
    document
}

/// Number of nodes [`wide_document`] produces.
pub fn wide_node_count(groups: usize, items: usize) -> usize {
    2 + groups * (1 + 2 * items)
}
