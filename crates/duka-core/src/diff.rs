//! # Nested Collection Diff
//!
//! Reconciles a submitted child collection against the stored one by
//! identifier instead of deleting and recreating every child.
//!
//! ```text
//! stored:    [a, b, c]
//! submitted: [a', {new}, c']
//!
//! update a ← a'   create {new}   update c ← c'   delete b
//! ```
//!
//! Children that survive keep their identity, so anything hanging off
//! them (receptions on a PO line, for instance) is preserved.

use std::collections::HashSet;

use crate::error::ValidationError;

/// A submitted child that may refer to a stored one.
pub trait Identified {
    fn identifier(&self) -> Option<&str>;
}

/// The plan produced by [`diff_by_id`].
#[derive(Debug)]
pub struct CollectionDiff<'a, T> {
    pub create: Vec<&'a T>,
    pub update: Vec<(String, &'a T)>,
    pub delete: Vec<String>,
}

impl<T> CollectionDiff<'_, T> {
    pub fn is_noop(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }
}

/// Splits `submitted` into creates, updates and deletes against `stored_ids`.
///
/// A submitted identifier that is not stored is rejected, as is the same
/// identifier appearing twice.
pub fn diff_by_id<'a, T: Identified>(
    stored_ids: &[String],
    submitted: &'a [T],
    field: &str,
) -> Result<CollectionDiff<'a, T>, ValidationError> {
    let stored: HashSet<&str> = stored_ids.iter().map(String::as_str).collect();
    let mut kept: HashSet<&str> = HashSet::new();

    let mut create = Vec::new();
    let mut update = Vec::new();

    for item in submitted {
        match item.identifier() {
            None => create.push(item),
            Some(id) => {
                if !stored.contains(id) {
                    return Err(ValidationError::NotAllowed {
                        field: format!("{}.id", field),
                        reason: format!("'{}' does not belong to this collection", id),
                    });
                }
                if !kept.insert(id) {
                    return Err(ValidationError::Duplicate {
                        field: format!("{}.id", field),
                        value: id.to_string(),
                    });
                }
                update.push((id.to_string(), item));
            }
        }
    }

    let delete = stored_ids
        .iter()
        .filter(|id| !kept.contains(id.as_str()))
        .cloned()
        .collect();

    Ok(CollectionDiff {
        create,
        update,
        delete,
    })
}
