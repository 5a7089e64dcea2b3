use crate::model::*;

// ── Availability Algorithm ────────────────────────────────────────

/// Compute free spans for a property within a query window: the window
/// minus every active stay hold. Inspection slots don't subtract — they
/// never block stays (see the conflict policy), so a window peppered with
/// viewings still reads as bookable.
pub fn free_spans(ps: &PropertyState, query: &Span) -> Vec<Span> {
    let mut busy: Vec<Span> = ps
        .holds_overlapping(query)
        .filter(|h| h.kind.is_stay())
        .map(|h| Span::new(h.span.start.max(query.start), h.span.end.min(query.end)))
        .collect();

    if busy.is_empty() {
        return vec![*query];
    }

    busy.sort_by_key(|s| s.start);
    let busy = merge_overlapping(&busy);
    subtract_intervals(&[*query], &busy)
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}
