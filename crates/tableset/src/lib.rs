//! # TableSet - a precedence-stacked view over sorted tables
//!
//! A [`TableSet`] is an ordered list of tables that together form one
//! logical dataset. Index 0 is the oldest table and has the lowest
//! precedence; when several tables hold rows equal under the shared
//! [`RowOrder`](table::RowOrder), the highest-index table wins.
//!
//! Sets are immutable values: [`TableSet::append`] returns a new set sharing
//! the same table handles. [`TableSetD`] layers a
//! [`DeleteCodec`](table::DeleteCodec) on top so tombstoned rows read as
//! absent.

mod deleted;
mod iter;
mod set;

pub use deleted::TableSetD;
pub use iter::SetIter;
pub use merge::Direction;
pub use set::TableSet;

#[cfg(test)]
mod tests;
