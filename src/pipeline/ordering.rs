use std::collections::HashMap;

use crate::edit::catalog::CategoryFamily;
use crate::edit::{normalize_category, EditOperation};

/// Category -> layering rank. Unranked categories go last, in encounter order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalOrder {
    ranks: HashMap<String, usize>,
}

impl CanonicalOrder {
    pub fn for_family(family: CategoryFamily) -> Self {
        Self::from_categories(family.categories().iter().map(|spec| spec.key))
    }

    pub fn from_categories<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ranks = HashMap::new();
        for category in categories {
            let key = normalize_category(category.as_ref());
            if key.is_empty() {
                continue;
            }
            let next = ranks.len();
            ranks.entry(key).or_insert(next);
        }
        Self { ranks }
    }

    pub fn rank(&self, category: &str) -> Option<usize> {
        self.ranks.get(&normalize_category(category)).copied()
    }

    pub fn categories(&self) -> Vec<String> {
        let mut ranked = self
            .ranks
            .iter()
            .map(|(key, rank)| (*rank, key.clone()))
            .collect::<Vec<_>>();
        ranked.sort();
        ranked.into_iter().map(|(_, key)| key).collect()
    }

    pub fn arrange(&self, operations: Vec<EditOperation>) -> Vec<EditOperation> {
        let mut keyed = operations
            .into_iter()
            .enumerate()
            .map(|(index, op)| {
                let rank = self.rank(op.category.as_str()).unwrap_or(usize::MAX);
                (rank, index, op)
            })
            .collect::<Vec<_>>();
        keyed.sort_by_key(|(rank, index, _)| (*rank, *index));
        keyed.into_iter().map(|(_, _, op)| op).collect()
    }
}
