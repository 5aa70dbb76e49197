//! Pagination request and result types

use serde::{Deserialize, Serialize};

/// A 1-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub const DEFAULT_PAGE_SIZE: u32 = 20;
    pub const MAX_PAGE_SIZE: u32 = 100;

    /// Build a request, normalizing out-of-range values
    ///
    /// Page 0 becomes page 1; a page size outside 1..=100 becomes 20.
    pub fn new(page: u32, page_size: u32) -> Self {
        let page = page.max(1);
        let page_size = if (1..=Self::MAX_PAGE_SIZE).contains(&page_size) {
            page_size
        } else {
            Self::DEFAULT_PAGE_SIZE
        };
        Self { page, page_size }
    }

    /// Row offset of the first item on this page
    pub fn offset(&self) -> usize {
        (self.page as usize - 1) * self.page_size as usize
    }

    pub fn limit(&self) -> usize {
        self.page_size as usize
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, Self::DEFAULT_PAGE_SIZE)
    }
}

/// One page of results plus totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub total_count: usize,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
}

impl<T> PaginatedResult<T> {
    pub fn new(items: Vec<T>, total_count: usize, request: PageRequest) -> Self {
        let total_pages = total_count.div_ceil(request.page_size as usize) as u32;
        Self {
            items,
            total_count,
            page: request.page,
            page_size: request.page_size,
            total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_request_normalization() {
        assert_eq!(PageRequest::new(0, 10), PageRequest { page: 1, page_size: 10 });
        assert_eq!(PageRequest::new(2, 0).page_size, 20);
        assert_eq!(PageRequest::new(2, 500).page_size, 20);
        assert_eq!(PageRequest::new(3, 10).offset(), 20);
    }

    #[test]
    fn test_total_pages() {
        let result: PaginatedResult<u8> = PaginatedResult::new(vec![], 41, PageRequest::new(1, 20));
        assert_eq!(result.total_pages, 3);

        let empty: PaginatedResult<u8> = PaginatedResult::new(vec![], 0, PageRequest::new(1, 20));
        assert_eq!(empty.total_pages, 0);
    }
}
