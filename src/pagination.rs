use serde::Serialize;

/// Splits `count` rows into pages of `per_page`. An empty listing still has
/// one (empty) page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Paginator {
    pub count: i64,
    pub per_page: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageWindow {
    pub number: i64,
    pub num_pages: i64,
    pub count: i64,
    pub offset: i64,
    pub limit: i64,
}

impl Paginator {
    pub fn new(count: i64, per_page: i64) -> Self {
        Paginator {
            count: count.max(0),
            per_page: per_page.max(1),
        }
    }

    pub fn num_pages(&self) -> i64 {
        if self.count == 0 {
            1
        } else {
            (self.count + self.per_page - 1) / self.per_page
        }
    }

    /// Resolves the raw `page` query value. Anything that is not a number
    /// yields the first page; numbers outside the range clamp to the nearest
    /// page that exists.
    pub fn page(&self, requested: Option<&str>) -> PageWindow {
        let num_pages = self.num_pages();
        let number = requested
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .unwrap_or(1)
            .clamp(1, num_pages);
        PageWindow {
            number,
            num_pages,
            count: self.count,
            offset: (number - 1) * self.per_page,
            limit: self.per_page,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub object_list: Vec<T>,
    pub number: i64,
    pub num_pages: i64,
    pub count: i64,
    pub has_previous: bool,
    pub has_next: bool,
    pub previous_page_number: Option<i64>,
    pub next_page_number: Option<i64>,
}

impl<T> Page<T> {
    pub fn new(object_list: Vec<T>, window: PageWindow) -> Self {
        let has_previous = window.number > 1;
        let has_next = window.number < window.num_pages;
        Page {
            object_list,
            number: window.number,
            num_pages: window.num_pages,
            count: window.count,
            has_previous,
            has_next,
            previous_page_number: if has_previous { Some(window.number - 1) } else { None },
            next_page_number: if has_next { Some(window.number + 1) } else { None },
        }
    }
}
