//! Deterministic intra-series slice ordering.
//!
//! Sorting purely by physical position interleaves the slabs of multi-slab
//! acquisitions, so each slice gets a key from the most trusted source it
//! carries:
//!  1. Instance Number
//!  2. Image Position projected onto the slice normal
//!  3. Arrival order
//!
//! Keys sort by tier first, so an explicit index always precedes geometry,
//! which always precedes arrival order.

use crate::enums::SortTier;
use crate::header::RawSlice;

use nalgebra::Vector3;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SortKey {
    pub tier: SortTier,
    pub value: f64,
}

impl SortKey {
    fn compare(&self, other: &Self) -> Ordering {
        self.tier
            .cmp(&other.tier)
            .then_with(|| self.value.total_cmp(&other.value))
    }
}

/// Normal of the plane spanned by the row and column cosines, or `None` if
/// they are parallel or degenerate.
pub fn slice_normal(orientation: &[f64; 6]) -> Option<Vector3<f64>> {
    let row = Vector3::new(orientation[0], orientation[1], orientation[2]);
    let column = Vector3::new(orientation[3], orientation[4], orientation[5]);
    let normal = row.cross(&column);
    (normal.norm() > 0.0).then_some(normal)
}

/// Sort key of every slice, in input order.
///
/// The normal is taken from the first slice whose orientation yields one and
/// reused for the rest of the series.
pub fn sort_keys(slices: &[RawSlice]) -> Vec<SortKey> {
    let mut normal: Option<Vector3<f64>> = None;
    slices
        .iter()
        .enumerate()
        .map(|(index, slice)| {
            if let Some(number) = slice.instance_number {
                return SortKey {
                    tier: SortTier::InstanceNumber,
                    value: f64::from(number),
                };
            }
            if let (Some(position), Some(orientation)) = (slice.position, slice.orientation) {
                if normal.is_none() {
                    normal = slice_normal(&orientation);
                }
                if let Some(normal) = normal {
                    return SortKey {
                        tier: SortTier::ImagePositionPatient,
                        value: normal.dot(&Vector3::from(position)),
                    };
                }
            }
            SortKey {
                tier: SortTier::Arrival,
                value: index as f64,
            }
        })
        .collect()
}

/// Reorder `slices` ascending by their sort keys. Equal keys keep input order.
pub fn order_slices(slices: Vec<RawSlice>) -> Vec<RawSlice> {
    let keys = sort_keys(&slices);
    let mut keyed: Vec<(SortKey, RawSlice)> = keys.into_iter().zip(slices).collect();
    keyed.sort_by(|a, b| a.0.compare(&b.0));
    keyed.into_iter().map(|(_, slice)| slice).collect()
}
