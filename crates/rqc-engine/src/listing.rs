use std::cmp::Ordering;

use rqc_core::{EntrySort, InspectionEntry, InspectionResult, ListQuery, Page};

use crate::Engine;

fn compare(sort: EntrySort, a: &InspectionEntry, b: &InspectionEntry) -> Ordering {
    let by_range = || {
        a.range
            .start
            .total_cmp(&b.range.start)
            .then(a.range.end.total_cmp(&b.range.end))
    };
    let primary = match sort {
        EntrySort::RangeStart => by_range(),
        EntrySort::SubmittedAt => a.submitted_at_unix.cmp(&b.submitted_at_unix).then_with(by_range),
        EntrySort::Status => a.status.cmp(&b.status).then_with(by_range),
    };
    primary.then_with(|| a.id.cmp(&b.id))
}

/// Cuts one 1-based page out of `items`.
pub fn paginate<T>(items: Vec<T>, page: u32, page_size: u32) -> Page<T> {
    let page = page.max(1);
    let page_size = page_size.max(1);
    let total = items.len();
    let skip = (page as usize - 1).saturating_mul(page_size as usize);
    Page {
        items: items.into_iter().skip(skip).take(page_size as usize).collect(),
        total,
        page,
        page_size,
    }
}

impl Engine {
    pub fn list_inspection_entries(&self, query: &ListQuery) -> InspectionResult<Page<InspectionEntry>> {
        let tx = self.storage.begin()?;
        let mut items = tx.find_entries(&query.filter)?;
        drop(tx);

        items.sort_by(|a, b| {
            let ord = compare(query.sort, a, b);
            if query.descending {
                ord.reverse()
            } else {
                ord
            }
        });
        let listing = &self.cfg.listing;
        let page_size = query
            .page_size
            .unwrap_or(listing.default_page_size)
            .clamp(1, listing.max_page_size.max(1));
        let page = paginate(items, query.page, page_size);
        tracing::debug!(total = page.total, page = page.page, page_size = page.page_size, "entries listed");
        Ok(page)
    }
}
