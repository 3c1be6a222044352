//! Resume cursor and offset paging.

use serde::Serialize;

/// Where to continue a table copy that already has rows at the destination.
///
/// Applies to the first fetched page only. It fills the partially copied
/// page up to its boundary so that every later page is aligned to the
/// batch size again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResumeCursor {
    /// Rows already present at the destination.
    pub offset: u64,

    /// Rows needed to reach the end of the current page.
    pub limit: u64,

    /// 1-based index of the page the cursor completes.
    pub next_page_index: u64,
}

impl ResumeCursor {
    /// Compute the cursor from the destination row count `existing` and the
    /// page size `batch_size`. Returns `None` when nothing was copied yet.
    pub fn from_existing_rows(existing: i64, batch_size: usize) -> Option<Self> {
        if existing <= 0 || batch_size == 0 {
            return None;
        }

        let d = existing as u64;
        let b = batch_size as u64;

        // ceil(d / b), plus one more page when d sits exactly on a boundary
        let next_page_index = d.div_ceil(b) + u64::from(d % b == 0);

        Some(Self {
            offset: d,
            limit: next_page_index * b - d,
            next_page_index,
        })
    }
}

/// One page request: `OFFSET offset ROWS FETCH NEXT limit ROWS ONLY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageWindow {
    /// 1-based page index.
    pub page_index: u64,
    pub offset: u64,
    pub limit: u64,
}

/// Sequence of page windows for one table.
///
/// Feed every fetched page back through [`PagePlan::record`]; a page that
/// comes back shorter than its window's limit ends the table.
#[derive(Debug, Clone)]
pub struct PagePlan {
    batch_size: u64,
    cursor: Option<ResumeCursor>,
    next_page: u64,
    done: bool,
}

impl PagePlan {
    pub fn new(batch_size: usize, cursor: Option<ResumeCursor>) -> Self {
        Self {
            batch_size: batch_size.max(1) as u64,
            next_page: cursor.map(|c| c.next_page_index).unwrap_or(1),
            cursor,
            done: false,
        }
    }

    /// The next window to fetch, or `None` once the table is exhausted.
    pub fn next_window(&mut self) -> Option<PageWindow> {
        if self.done {
            return None;
        }

        if let Some(cursor) = self.cursor.take() {
            return Some(PageWindow {
                page_index: cursor.next_page_index,
                offset: cursor.offset,
                limit: cursor.limit,
            });
        }

        Some(PageWindow {
            page_index: self.next_page,
            offset: (self.next_page - 1) * self.batch_size,
            limit: self.batch_size,
        })
    }

    /// Record how many rows a window returned.
    pub fn record(&mut self, window: PageWindow, fetched: usize) {
        if (fetched as u64) < window.limit {
            self.done = true;
        } else {
            self.next_page = window.page_index + 1;
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }
}
