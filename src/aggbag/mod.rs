//! Aggregate key/counter store
//!
//! An [`AggBag`] maps multi-field keys to multi-field counters. Both
//! sides are encoded into fixed-width byte strings laid out by a
//! [`FieldList`], so every record of a store has the same size.

pub mod codec;
pub mod convert;
pub mod layout;
pub mod manipulate;
pub mod record;
pub mod store;

pub use layout::{FieldList, FieldSpec};
pub use manipulate::{FieldSelection, FilterKind, RowFilter};
pub use record::{Aggregate, AggregateRef, FieldCursor};
pub use store::{AggBag, Iter};
