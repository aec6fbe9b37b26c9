//! Ordered sets of class identifiers.

use serde::{Deserialize, Serialize};

use super::error::{Result, ZslError};

/// An ordered sequence of unique class ids.
///
/// Iteration order is insertion order; per-class metrics average over the
/// classes in this order. Membership tests are O(1) through a dense mask
/// indexed by class id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<usize>", into = "Vec<usize>")]
pub struct ClassSet {
    ids: Vec<usize>,
    mask: Vec<bool>,
}

impl ClassSet {
    /// Build a class set, rejecting duplicate ids.
    pub fn new(ids: Vec<usize>) -> Result<Self> {
        let len = match ids.iter().max() {
            Some(&max) => max.checked_add(1).ok_or_else(|| {
                ZslError::SemanticData(format!("class id {} is out of range", max))
            })?,
            None => 0,
        };
        let mut mask = vec![false; len];
        for &id in &ids {
            if mask[id] {
                return Err(ZslError::SemanticData(format!(
                    "class id {} listed more than once",
                    id
                )));
            }
            mask[id] = true;
        }
        Ok(Self { ids, mask })
    }

    /// Like [`ClassSet::new`], but every id must be below `num_classes`.
    /// Ids are checked before the membership mask is allocated.
    pub fn bounded(ids: Vec<usize>, num_classes: usize) -> Result<Self> {
        if let Some(&class) = ids.iter().find(|&&id| id >= num_classes) {
            return Err(ZslError::InvalidClass { class, num_classes });
        }
        Self::new(ids)
    }

    /// The contiguous set `0..num_classes`.
    pub fn range(num_classes: usize) -> Self {
        Self {
            ids: (0..num_classes).collect(),
            mask: vec![true; num_classes],
        }
    }

    pub fn contains(&self, class: usize) -> bool {
        self.mask.get(class).copied().unwrap_or(false)
    }

    pub fn ids(&self) -> &[usize] {
        &self.ids
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.ids.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Largest id plus one, or zero for an empty set.
    pub fn id_bound(&self) -> usize {
        self.mask.len()
    }

    pub fn is_disjoint(&self, other: &ClassSet) -> bool {
        self.ids.iter().all(|&id| !other.contains(id))
    }
}

impl TryFrom<Vec<usize>> for ClassSet {
    type Error = ZslError;

    fn try_from(ids: Vec<usize>) -> Result<Self> {
        Self::new(ids)
    }
}

impl From<ClassSet> for Vec<usize> {
    fn from(set: ClassSet) -> Self {
        set.ids
    }
}
