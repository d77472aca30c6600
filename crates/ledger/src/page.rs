use serde::Serialize;

/// A 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    /// Largest page size a caller may ask for.
    pub const MAX_LIMIT: u32 = 100;

    /// Builds a request, clamping `page` to at least 1 and `limit` to
    /// `1..=MAX_LIMIT`.
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.clamp(1, Self::MAX_LIMIT),
        }
    }

    /// Number of records to skip.
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, limit: 10 }
    }
}

/// One page of results plus the total count across all pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub request: PageRequest,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        self.total.div_ceil(u64::from(self.request.limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamping() {
        assert_eq!(PageRequest::new(0, 0), PageRequest { page: 1, limit: 1 });
        assert_eq!(PageRequest::new(3, 1000).limit, PageRequest::MAX_LIMIT);
    }

    #[test]
    fn test_offset() {
        assert_eq!(PageRequest::new(1, 10).offset(), 0);
        assert_eq!(PageRequest::new(3, 10).offset(), 20);
    }

    #[test]
    fn test_total_pages_rounds_up() {
        let page: Page<()> = Page {
            items: vec![],
            total: 21,
            request: PageRequest::new(1, 10),
        };
        assert_eq!(page.total_pages(), 3);
    }
}
