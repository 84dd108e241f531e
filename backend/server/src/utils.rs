use serde::Deserialize;

use crate::error::AppError;

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// `?page=2&pageSize=50`, both optional.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl Pagination {
    /// Fills in defaults and validates the window.
    pub fn resolve(&self) -> Result<PageWindow, AppError> {
        PageWindow::new(
            self.page.unwrap_or(1),
            self.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        )
    }
}

/// A validated page. `offset` and `offset + page_size` both fit in an `i64`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageWindow {
    pub page: i64,
    pub page_size: i64,
    pub offset: i64,
}

impl PageWindow {
    pub fn new(page: i64, page_size: i64) -> Result<Self, AppError> {
        if page < 1 {
            return Err(AppError::invalid("page must be at least 1"));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(AppError::invalid(format!(
                "pageSize must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }

        let offset = (page - 1)
            .checked_mul(page_size)
            .filter(|offset| offset.checked_add(page_size).is_some())
            .ok_or_else(|| AppError::invalid("page is out of range"))?;

        Ok(Self {
            page,
            page_size,
            offset,
        })
    }
}

#[cfg(test)]
pub(crate) fn window(page: i64, page_size: i64) -> PageWindow {
    PageWindow::new(page, page_size).unwrap()
}

/// Trims `value` and checks its length in characters.
pub fn check_length(field: &str, value: &str, min: usize, max: usize) -> Result<String, AppError> {
    let trimmed = value.trim();
    let length = trimmed.chars().count();

    if length < min || length > max {
        return Err(AppError::invalid(format!(
            "{field} must be between {min} and {max} characters"
        )));
    }

    Ok(trimmed.to_string())
}

/// Same as [`check_length`] for optional fields in partial updates.
pub fn check_optional(
    field: &str,
    value: Option<String>,
    min: usize,
    max: usize,
) -> Result<Option<String>, AppError> {
    value
        .map(|value| check_length(field, &value, min, max))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults() {
        let window = Pagination::default().resolve().unwrap();
        assert_eq!((window.page, window.page_size, window.offset), (1, DEFAULT_PAGE_SIZE, 0));
    }

    #[test]
    fn pagination_bounds() {
        let zero_page = Pagination {
            page: Some(0),
            page_size: None,
        };
        assert!(zero_page.resolve().is_err());

        let huge = Pagination {
            page: Some(1),
            page_size: Some(MAX_PAGE_SIZE + 1),
        };
        assert!(matches!(huge.resolve(), Err(AppError::InvalidRequest(_))));
    }

    #[test]
    fn offset_skips_earlier_pages() {
        assert_eq!(PageWindow::new(3, 25).unwrap().offset, 50);
    }

    #[test]
    fn huge_pages_are_rejected_instead_of_overflowing() {
        assert!(matches!(
            PageWindow::new(i64::MAX, 2),
            Err(AppError::InvalidRequest(_))
        ));
        assert!(matches!(
            PageWindow::new(i64::MAX / 100 + 2, MAX_PAGE_SIZE),
            Err(AppError::InvalidRequest(_))
        ));

        // the last page whose rows are still addressable
        let last = PageWindow::new(i64::MAX / 2, 2).unwrap();
        assert!(last.offset.checked_add(last.page_size).is_some());
    }

    #[test]
    fn length_counts_characters_after_trimming() {
        assert_eq!(check_length("title", "  Hello  ", 5, 10).unwrap(), "Hello");
        assert!(check_length("title", "Hi", 5, 10).is_err());
        // six characters, twelve bytes
        assert!(check_length("title", "привет", 5, 6).is_ok());
    }

    #[test]
    fn optional_fields_pass_through_when_missing() {
        assert_eq!(check_optional("about", None, 1, 10).unwrap(), None);
        assert!(check_optional("about", Some(String::new()), 1, 10).is_err());
    }
}
