//! Precedence-overriding merge.

use table::{Error, Result, SortedTable};

use crate::source::{Direction, MergeSource, SourceStack};
use crate::{aborted, copy_rows, finish, prepare, MergeOptions, MergeOutcome, RowFilter};

/// Merges `sources` into `target` so that each key keeps one row from the
/// highest-index source holding it.
///
/// Every key appears at most once in the output: of a run of equal rows in
/// the winning source, only the first is kept. With `options.purge` set,
/// a kept row the codec marks deleted is dropped after precedence has been
/// resolved.
pub fn set_merge(
    sources: &[&SortedTable],
    target: &mut SortedTable,
    options: &MergeOptions,
) -> Result<MergeOutcome> {
    prepare("set", sources, target)?;

    let mut stack = SourceStack::new(target.order().clone(), Direction::Forward);
    for (precedence, table) in sources.iter().enumerate() {
        stack.push(MergeSource::at_start(
            table,
            Direction::Forward,
            precedence,
            options.search_rows,
        )?);
    }

    let order = target.order().clone();
    let mut filter = RowFilter::new(order.as_ref(), options.purge.as_deref());
    let mut buf = Vec::new();
    let mut written = 0u64;

    while stack.len() > 1 {
        if options.aborted() {
            return Ok(aborted("set", target, written));
        }
        let (Some(mut top), Some(mut next)) = (stack.pop(), stack.pop()) else {
            break;
        };
        let (Some(cur), Some(next_cur)) = (top.row_number(), next.row_number()) else {
            break;
        };
        let key = next.row().map(<[u8]>::to_vec).unwrap_or_default();

        match top.search_ahead(&key)?.into_result() {
            Ok(_) if top.precedence() > next.precedence() => {
                // `next`'s run of this key is shadowed.
                let past = next.run_past(&key, next_cur)?;
                next.seek(past)?;
            }
            Ok(hit) => {
                // `top`'s run of this key is shadowed.
                let first = top.run_first(&key, hit)?;
                let past = top.run_past(&key, hit)?;
                written += copy_rows(
                    top.table(),
                    cur,
                    first,
                    target,
                    Some(&mut filter),
                    &mut buf,
                )?;
                top.seek(past)?;
            }
            Err(insertion) => {
                if insertion <= cur {
                    return Err(Error::NotSorted(format!(
                        "{} row {} sorts after the next source's row",
                        top.table().path().display(),
                        cur
                    )));
                }
                written += copy_rows(
                    top.table(),
                    cur,
                    insertion,
                    target,
                    Some(&mut filter),
                    &mut buf,
                )?;
                top.seek(Some(insertion))?;
            }
        }

        stack.push(top);
        stack.push(next);
    }

    if options.aborted() {
        return Ok(aborted("set", target, written));
    }
    if let Some(last) = stack.pop() {
        if let Some(cur) = last.row_number() {
            written += copy_rows(
                last.table(),
                cur,
                last.row_count(),
                target,
                Some(&mut filter),
                &mut buf,
            )?;
        }
    }

    finish("set", target, written)
}
