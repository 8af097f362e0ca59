use serde::Deserialize;

/// `?page=` as sent by the browser. Kept as text so garbage falls back to page one.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
}

/// One page of a result set. The page number is always clamped into
/// `1..=num_pages`, and an empty result still has a single empty page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: i64,
    pub num_pages: i64,
    pub per_page: i64,
    pub total: i64,
}

impl Page {
    pub fn resolve(requested: Option<&str>, total: i64, per_page: i64) -> Self {
        let per_page = per_page.max(1);
        let total = total.max(0);
        let num_pages = ((total + per_page - 1) / per_page).max(1);
        let number = match requested.map(str::trim).map(str::parse::<i64>) {
            Some(Ok(n)) if n < 1 => 1,
            Some(Ok(n)) if n > num_pages => num_pages,
            Some(Ok(n)) => n,
            _ => 1,
        };
        Self {
            number,
            num_pages,
            per_page,
            total,
        }
    }

    pub fn offset(&self) -> i64 {
        (self.number - 1) * self.per_page
    }

    pub fn has_previous(&self) -> bool {
        self.number > 1
    }

    pub fn has_next(&self) -> bool {
        self.number < self.num_pages
    }

    pub fn has_other_pages(&self) -> bool {
        self.num_pages > 1
    }

    pub fn previous_number(&self) -> i64 {
        (self.number - 1).max(1)
    }

    pub fn next_number(&self) -> i64 {
        (self.number + 1).min(self.num_pages)
    }
}
