//! Role names reported by the provider and the all-of requirement check.

use serde::{Deserialize, Serialize};

/// The set of role names attached to an identity.
///
/// Serialized as a plain JSON array (the provider sends it under the
/// `group` key of the info response).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roles(pub Vec<String>);

impl Roles {
    /// Whether `name` is a member of the set.
    pub fn has(&self, name: &str) -> bool {
        self.0.iter().any(|r| r == name)
    }

    /// True iff every required role is present. An empty requirement is
    /// always satisfied; order and duplicates in `required` are irrelevant.
    pub fn has_all(&self, required: &[String]) -> bool {
        required.iter().all(|r| self.has(r))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for Roles {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Roles(iter.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(names: &[&str]) -> Roles {
        names.iter().copied().collect()
    }

    fn req(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_requirement_always_passes() {
        assert!(roles(&[]).has_all(&req(&[])));
        assert!(roles(&["staff"]).has_all(&req(&[])));
    }

    #[test]
    fn test_has_all_is_subset_inclusion() {
        let u = roles(&["staff", "admin", "dev"]);
        assert!(u.has_all(&req(&["staff"])));
        assert!(u.has_all(&req(&["admin", "staff"])));
        assert!(!u.has_all(&req(&["admin", "ops"])));
        assert!(!roles(&[]).has_all(&req(&["staff"])));
    }

    #[test]
    fn test_order_and_duplicates_do_not_matter() {
        let u = roles(&["a", "b"]);
        assert!(u.has_all(&req(&["b", "a"])));
        assert!(u.has_all(&req(&["a", "a", "b"])));
        assert!(!u.has_all(&req(&["a", "a", "c"])));
    }
}
