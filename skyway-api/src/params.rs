use axum::{
    extract::{FromRequestParts, OriginalUri, Query},
    http::request::Parts,
};
use serde::Serialize;
use skyway_core::repository::{Page, PageRequest, Sort, SortField};
use skyway_core::validation::FieldErrors;
use std::str::FromStr;

use crate::error::AppError;

/// Raw query pairs of a request together with the public path it was made on.
#[derive(Debug, Clone, Default)]
pub struct Params {
    path: String,
    pairs: Vec<(String, String)>,
}

impl<S: Send + Sync> FromRequestParts<S> for Params {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let path = match parts.extensions.get::<OriginalUri>() {
            Some(OriginalUri(uri)) => uri.path().to_string(),
            None => parts.uri.path().to_string(),
        };
        let Query(pairs) = Query::<Vec<(String, String)>>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        Ok(Params { path, pairs })
    }
}

impl Params {
    pub fn new(path: impl Into<String>, pairs: Vec<(String, String)>) -> Self {
        Self {
            path: path.into(),
            pairs,
        }
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// Last non-blank value of `name`, trimmed.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn string(&self, name: &str) -> Option<String> {
        self.get(name).map(str::to_string)
    }

    /// Parses `name`; a value that does not parse is a validation error on it.
    pub fn parse<T: FromStr>(&self, name: &str) -> Result<Option<T>, AppError> {
        match self.get(name) {
            None => Ok(None),
            Some(raw) => raw.parse::<T>().map(Some).map_err(|_| {
                AppError::Validation(FieldErrors::single(
                    name,
                    format!("Select a valid choice. {} is not one of the available choices.", raw),
                ))
            }),
        }
    }

    pub fn id(&self, name: &str) -> Result<Option<i64>, AppError> {
        match self.get(name) {
            None => Ok(None),
            Some(raw) => raw
                .parse::<i64>()
                .map(Some)
                .map_err(|_| AppError::Validation(FieldErrors::single(name, "Enter a whole number."))),
        }
    }

    pub fn flag(&self, name: &str) -> Result<Option<bool>, AppError> {
        match self.get(name).map(str::to_ascii_lowercase).as_deref() {
            None => Ok(None),
            Some("true") | Some("1") => Ok(Some(true)),
            Some("false") | Some("0") => Ok(Some(false)),
            Some(_) => Err(AppError::Validation(FieldErrors::single(
                name,
                "Must be a valid boolean.",
            ))),
        }
    }

    pub fn required(&self, name: &str) -> Result<&str, AppError> {
        self.get(name)
            .ok_or_else(|| AppError::BadRequest(format!("{} is required", name)))
    }

    pub fn search(&self) -> Option<String> {
        self.string("search")
    }

    /// Unknown ordering fields are ignored and the listing keeps its default.
    pub fn ordering<F: SortField>(&self) -> Option<Sort<F>> {
        self.get("ordering").and_then(Sort::parse)
    }

    pub fn page_request(&self, size: u64) -> Result<PageRequest, AppError> {
        let page = match self.get("page") {
            None => 1,
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|p| *p >= 1)
                .ok_or_else(|| AppError::BadRequest("Invalid page.".into()))?,
        };
        Ok(PageRequest { page, size })
    }

    fn link(&self, page: u64) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in self.pairs.iter().filter(|(k, _)| k != "page") {
            query.append_pair(k, v);
        }
        if page > 1 {
            query.append_pair("page", &page.to_string());
        }
        let query = query.finish();
        if query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, query)
        }
    }
}

/// Envelope of every paginated listing.
#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub count: u64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

impl<T> Paginated<T> {
    /// A page past the last one is not found, except the first page of an
    /// empty listing.
    pub fn new(params: &Params, request: PageRequest, page: Page<T>) -> Result<Self, AppError> {
        let last = page.count.div_ceil(request.size.max(1)).max(1);
        if request.page > last {
            return Err(AppError::NotFound("Invalid page.".into()));
        }
        Ok(Paginated {
            count: page.count,
            next: (request.page < last).then(|| params.link(request.page + 1)),
            previous: (request.page > 1).then(|| params.link(request.page - 1)),
            results: page.items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyway_core::repository::AirlineSort;

    fn params(pairs: &[(&str, &str)]) -> Params {
        Params::new(
            "/api/airlines/",
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn page(count: u64, items: usize) -> Page<u64> {
        Page {
            count,
            items: (0..items as u64).collect(),
        }
    }

    #[test]
    fn links_keep_filters_and_replace_page() {
        let p = params(&[("search", "air"), ("page", "2")]);
        let request = p.page_request(10).unwrap();
        let listing = Paginated::new(&p, request, page(25, 10)).unwrap();
        assert_eq!(listing.next.as_deref(), Some("/api/airlines/?search=air&page=3"));
        assert_eq!(listing.previous.as_deref(), Some("/api/airlines/?search=air"));
    }

    #[test]
    fn page_bounds() {
        assert!(params(&[("page", "0")]).page_request(10).is_err());
        assert!(params(&[("page", "x")]).page_request(10).is_err());

        let p = params(&[("page", "4")]);
        let request = p.page_request(10).unwrap();
        assert!(matches!(
            Paginated::new(&p, request, page(25, 0)),
            Err(AppError::NotFound(_))
        ));

        let empty = params(&[]);
        let listing = Paginated::new(&empty, empty.page_request(10).unwrap(), page(0, 0)).unwrap();
        assert_eq!(listing.count, 0);
        assert!(listing.next.is_none() && listing.previous.is_none());
    }

    #[test]
    fn unknown_ordering_is_ignored() {
        assert!(params(&[("ordering", "-password")]).ordering::<AirlineSort>().is_none());
        let sort = params(&[("ordering", "-name")]).ordering::<AirlineSort>().unwrap();
        assert!(sort.descending);
    }

    #[test]
    fn blank_values_are_absent() {
        let p = params(&[("status", "  "), ("is_active", "TRUE")]);
        assert_eq!(p.get("status"), None);
        assert_eq!(p.flag("is_active").unwrap(), Some(true));
    }
}
