//! Duplicate-preserving merge.

use table::{Error, Result, SortedTable};

use crate::source::{Direction, MergeSource, SourceStack};
use crate::{aborted, copy_rows, finish, prepare, MergeOptions, MergeOutcome};

/// Merges `sources` into `target`, keeping every row.
///
/// At each step the cursor with the least row (`top`) looks up the row of
/// the cursor behind it (`next`). Everything in `top` before that row is
/// copied as one block, together with `top`'s run of rows equal to it when
/// `top` already sits on that run. Rows equal across sources therefore come
/// out grouped by source, higher index first.
///
/// `options.purge` is ignored.
pub fn list_merge(
    sources: &[&SortedTable],
    target: &mut SortedTable,
    options: &MergeOptions,
) -> Result<MergeOutcome> {
    prepare("list", sources, target)?;

    let mut stack = SourceStack::new(target.order().clone(), Direction::Forward);
    for (precedence, table) in sources.iter().enumerate() {
        stack.push(MergeSource::at_start(
            table,
            Direction::Forward,
            precedence,
            options.search_rows,
        )?);
    }

    let mut buf = Vec::new();
    let mut written = 0u64;

    while stack.len() > 1 {
        if options.aborted() {
            return Ok(aborted("list", target, written));
        }
        let Some(mut top) = stack.pop() else { break };
        let key = match stack.peek().and_then(MergeSource::row) {
            Some(row) => row.to_vec(),
            None => break,
        };
        let Some(cur) = top.row_number() else { break };

        let end = match top.search_ahead(&key)?.into_result() {
            // Equal rows of a lower-ranked `top` wait for `next`.
            Ok(hit) if top.compare_row(&key).is_lt() => top.run_first(&key, hit)?,
            Ok(hit) => top.run_past(&key, hit)?.unwrap_or(cur),
            Err(insertion) => insertion,
        };
        if end <= cur {
            return Err(Error::NotSorted(format!(
                "{} row {} sorts after the next source's row",
                top.table().path().display(),
                cur
            )));
        }

        written += copy_rows(top.table(), cur, end, target, None, &mut buf)?;
        top.seek(Some(end))?;
        stack.push(top);
    }

    if options.aborted() {
        return Ok(aborted("list", target, written));
    }
    if let Some(last) = stack.pop() {
        if let Some(cur) = last.row_number() {
            written += copy_rows(last.table(), cur, last.row_count(), target, None, &mut buf)?;
        }
    }

    finish("list", target, written)
}
