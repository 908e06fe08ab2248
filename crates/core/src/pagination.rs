/// An offset/limit view over `total` rows.
///
/// Construction clamps `offset` into `0..=max(0, total - limit)`. Stepping
/// forward advances by a whole page while that page still starts inside the
/// result, and snaps back to the last full page once it would not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationWindow {
    total: usize,
    limit: usize,
    offset: usize,
}

impl PaginationWindow {
    /// A zero `limit` is treated as one row per page.
    #[must_use]
    pub fn new(total: usize, limit: usize, offset: usize) -> Self {
        let limit = limit.max(1);
        Self {
            total,
            limit,
            offset: offset.min(max_offset(total, limit)),
        }
    }

    #[must_use]
    pub fn first(total: usize, limit: usize) -> Self {
        Self::new(total, limit, 0)
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[must_use]
    pub fn next(&self) -> Self {
        let candidate = self.offset.saturating_add(self.limit);
        let offset = if candidate >= self.total {
            max_offset(self.total, self.limit)
        } else {
            candidate
        };
        Self { offset, ..*self }
    }

    #[must_use]
    pub fn prev(&self) -> Self {
        Self {
            offset: self.offset.saturating_sub(self.limit),
            ..*self
        }
    }

    /// Same offset, re-clamped against a new row count.
    #[must_use]
    pub fn with_total(&self, total: usize) -> Self {
        Self::new(total, self.limit, self.offset)
    }

    #[must_use]
    pub fn has_next(&self) -> bool {
        self.offset.saturating_add(self.limit) < self.total
    }

    #[must_use]
    pub fn has_prev(&self) -> bool {
        self.offset > 0
    }

    /// 1-based inclusive range of rows on screen, `(0, 0)` when nothing is shown.
    #[must_use]
    pub fn display_range(&self, rows_returned: usize) -> (usize, usize) {
        if rows_returned == 0 || self.total == 0 {
            return (0, 0);
        }
        let end = self.offset.saturating_add(rows_returned).min(self.total);
        (self.offset + 1, end)
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.total.div_ceil(self.limit).max(1)
    }

    /// 1-based page holding the last row of the window.
    #[must_use]
    pub fn page_number(&self) -> usize {
        if self.total == 0 {
            return 1;
        }
        let last_row = (self.offset + self.limit).min(self.total);
        last_row.div_ceil(self.limit)
    }
}

fn max_offset(total: usize, limit: usize) -> usize {
    total.saturating_sub(limit)
}
