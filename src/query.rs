//! Filter / Sort / Paginate
//!
//! Pure functions applied to a complete, cache-resolved collection. Nothing
//! in here is ever cached.

use crate::model::{NetworkInfo, SecurityGroupInfo, SubnetInfo};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "desc" => Self::Desc,
            _ => Self::Asc,
        }
    }
}

/// Caller-facing list options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub search: String,
    /// Empty keeps provider order
    #[serde(default)]
    pub sort_by: String,
    #[serde(default)]
    pub sort_order: SortOrder,
    /// 1-indexed, 0 means first page
    #[serde(default)]
    pub page: u32,
    /// 0 means default page size
    #[serde(default)]
    pub limit: u32,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn search(mut self, needle: impl Into<String>) -> Self {
        self.search = needle.into();
        self
    }

    pub fn sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort_by = field.into();
        self.sort_order = order;
        self
    }

    pub fn page(mut self, page: u32, limit: u32) -> Self {
        self.page = page;
        self.limit = limit;
        self
    }

    pub fn effective_page(&self) -> u32 {
        self.page.max(1)
    }

    pub fn effective_limit(&self) -> u32 {
        match self.limit {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        }
    }
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    /// Count after filtering, before pagination
    pub total: usize,
    pub page: u32,
    pub limit: u32,
}

/// Per-kind search and sort fields
pub trait Listable {
    /// Fields matched by the search string
    fn search_fields(&self) -> Vec<&str>;

    /// Compare on a named field, `None` when the field is not sortable
    fn compare_field(&self, other: &Self, field: &str) -> Option<Ordering>;

    fn name(&self) -> &str;
}

/// Case-insensitive substring filter. Empty search returns the input as is.
pub fn filter<T: Listable>(items: Vec<T>, search: &str) -> Vec<T> {
    let needle = search.trim().to_lowercase();
    if needle.is_empty() {
        return items;
    }

    items
        .into_iter()
        .filter(|item| {
            item.search_fields()
                .iter()
                .any(|field| field.to_lowercase().contains(&needle))
        })
        .collect()
}

/// Stable sort on a named field; unknown fields sort by name ascending
pub fn sort<T: Listable>(items: &mut [T], field: &str, order: SortOrder) {
    let field = field.trim();
    if field.is_empty() {
        return;
    }

    let known = match items.first() {
        Some(first) => first.compare_field(first, field).is_some(),
        None => return,
    };

    if !known {
        items.sort_by(|a, b| a.name().cmp(b.name()));
        return;
    }

    items.sort_by(|a, b| {
        let ordering = a.compare_field(b, field).unwrap_or(Ordering::Equal);
        match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
}

/// 1-indexed page slice; out of range pages are empty
pub fn paginate<T>(items: Vec<T>, page: u32, limit: u32) -> Vec<T> {
    let offset = (page.max(1) as usize - 1).saturating_mul(limit as usize);
    if offset >= items.len() {
        return Vec::new();
    }
    items.into_iter().skip(offset).take(limit as usize).collect()
}

/// Filter, sort and paginate in that order
pub fn apply<T: Listable>(items: Vec<T>, query: &ListQuery) -> ListResponse<T> {
    let mut filtered = filter(items, &query.search);
    sort(&mut filtered, &query.sort_by, query.sort_order);

    let total = filtered.len();
    let page = query.effective_page();
    let limit = query.effective_limit();

    ListResponse {
        items: paginate(filtered, page, limit),
        total,
        page,
        limit,
    }
}

fn cmp_str(a: &str, b: &str) -> Ordering {
    a.cmp(b)
}

impl Listable for NetworkInfo {
    fn search_fields(&self) -> Vec<&str> {
        let mut fields = vec![self.name.as_str(), self.id.as_str()];
        if let Some(description) = &self.description {
            fields.push(description);
        }
        fields
    }

    fn compare_field(&self, other: &Self, field: &str) -> Option<Ordering> {
        match field {
            "name" => Some(cmp_str(&self.name, &other.name)),
            "state" => Some(cmp_str(self.state.as_str(), other.state.as_str())),
            "created_at" => Some(self.created_at.cmp(&other.created_at)),
            _ => None,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Listable for SubnetInfo {
    fn search_fields(&self) -> Vec<&str> {
        let mut fields = vec![
            self.name.as_str(),
            self.cidr_block.as_str(),
            self.id.as_str(),
        ];
        if let Some(description) = &self.description {
            fields.push(description);
        }
        fields
    }

    fn compare_field(&self, other: &Self, field: &str) -> Option<Ordering> {
        match field {
            "name" => Some(cmp_str(&self.name, &other.name)),
            "state" => Some(cmp_str(self.state.as_str(), other.state.as_str())),
            "cidr_block" => Some(cmp_str(&self.cidr_block, &other.cidr_block)),
            "created_at" => Some(self.created_at.cmp(&other.created_at)),
            _ => None,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Listable for SecurityGroupInfo {
    fn search_fields(&self) -> Vec<&str> {
        vec![
            self.name.as_str(),
            self.description.as_str(),
            self.id.as_str(),
        ]
    }

    fn compare_field(&self, other: &Self, field: &str) -> Option<Ordering> {
        match field {
            "name" => Some(cmp_str(&self.name, &other.name)),
            "created_at" => Some(self.created_at.cmp(&other.created_at)),
            _ => None,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
