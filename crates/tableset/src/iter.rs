//! Merged, precedence-resolved iteration over a [`TableSet`](crate::TableSet).

use std::cmp::Ordering;
use std::sync::Arc;

use merge::{Direction, MergeSource, SourceStack};
use table::{DeleteCodec, Error, Result, RowOrder};

/// Iterator yielding one row per key of a table set, taken from the
/// winning table, in key order for `direction`.
///
/// Each step emits the first row of the top cursor's run of equal rows,
/// the same row [`TableSet::get_row`](crate::TableSet::get_row) returns,
/// and then moves every cursor sitting on an equal row past its run. A cursor that
/// lands on a row sorting before the one just emitted means a table is out
/// of order; the iterator yields [`Error::NotSorted`] and stops.
pub struct SetIter<'a> {
    stack: SourceStack<'a>,
    order: Arc<dyn RowOrder>,
    direction: Direction,
    codec: Option<Arc<dyn DeleteCodec>>,
    done: bool,
}

impl<'a> SetIter<'a> {
    pub(crate) fn new(
        order: Arc<dyn RowOrder>,
        direction: Direction,
        sources: Vec<MergeSource<'a>>,
        codec: Option<Arc<dyn DeleteCodec>>,
    ) -> Self {
        let mut stack = SourceStack::new(order.clone(), direction);
        for s in sources {
            stack.push(s);
        }
        Self {
            stack,
            order,
            direction,
            codec,
            done: false,
        }
    }

    pub(crate) fn empty(direction: Direction) -> Self {
        let order: Arc<dyn RowOrder> = Arc::new(table::LexicalOrder);
        Self {
            stack: SourceStack::new(order.clone(), direction),
            order,
            direction,
            codec: None,
            done: true,
        }
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Produces the next resolved row, tombstones included.
    fn step(&mut self) -> Result<Option<Vec<u8>>> {
        let order = self.order.clone();
        let Some(mut top) = self.stack.pop() else {
            return Ok(None);
        };
        let Some(mut emitted) = top.row().map(<[u8]>::to_vec) else {
            return Ok(None);
        };

        // One row per key: the first of the run in table order, which a
        // reverse walk reaches last.
        top.advance()?;
        while top.compare_row(&emitted) == Ordering::Equal {
            if self.direction == Direction::Reverse {
                if let Some(r) = top.row() {
                    emitted.clear();
                    emitted.extend_from_slice(r);
                }
            }
            top.advance()?;
        }
        self.check_not_behind(&order, &top, &emitted)?;

        let mut moved = vec![top];
        while let Some(lower) = self.stack.peek() {
            let ord = match lower.row() {
                Some(r) => self.direction.apply(order.compare(r, &emitted)),
                None => break,
            };
            match ord {
                Ordering::Greater => break,
                Ordering::Less => return Err(self.not_sorted(lower)),
                Ordering::Equal => {
                    let Some(mut lower) = self.stack.pop() else {
                        break;
                    };
                    while lower.compare_row(&emitted) == Ordering::Equal {
                        lower.advance()?;
                    }
                    self.check_not_behind(&order, &lower, &emitted)?;
                    moved.push(lower);
                }
            }
        }
        for s in moved {
            self.stack.push(s);
        }
        Ok(Some(emitted))
    }

    fn check_not_behind(
        &self,
        order: &Arc<dyn RowOrder>,
        source: &MergeSource<'_>,
        emitted: &[u8],
    ) -> Result<()> {
        match source.row() {
            Some(r) if self.direction.apply(order.compare(r, emitted)) == Ordering::Less => {
                Err(self.not_sorted(source))
            }
            _ => Ok(()),
        }
    }

    fn not_sorted(&self, source: &MergeSource<'_>) -> Error {
        Error::NotSorted(format!(
            "{} row {:?} sorts before a row already emitted",
            source.table().path().display(),
            source.row_number()
        ))
    }
}

impl Iterator for SetIter<'_> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.step() {
                Ok(Some(row)) => {
                    if self.codec.as_ref().is_some_and(|c| c.is_deleted(&row)) {
                        continue;
                    }
                    return Some(Ok(row));
                }
                Ok(None) => self.done = true,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
