//! Item tree: folders and files owned by a single owner.
//!
//! Every item carries a materialised `path` (`/a/b/c.txt`) that is unique
//! per owner. Paths are composed from the parent's path and the item name
//! and rewritten atomically when an item is moved or renamed.

mod repository;
mod tree;
mod types;

pub use repository::ItemRepository;
pub use tree::ItemTree;
pub(crate) use tree::lock_parent;
pub use types::{FileContent, Item, ItemKind, ItemUpdate, NewItem};

use crate::{Result, StowageError};

/// Path separator inside materialised paths.
pub const PATH_SEPARATOR: char = '/';

/// Maximum length of an item name, in characters.
pub const MAX_NAME_LENGTH: usize = 255;

/// Maximum nesting depth walked when resolving ancestors.
pub const MAX_TREE_DEPTH: usize = 64;

/// Check that `name` can be used as a single path component.
pub fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(StowageError::InvalidName("name must not be empty".to_string()));
    }
    if name.contains(PATH_SEPARATOR) {
        return Err(StowageError::InvalidName(format!(
            "'{name}' contains '{PATH_SEPARATOR}'"
        )));
    }
    if name == "." || name == ".." {
        return Err(StowageError::InvalidName(format!("'{name}' is reserved")));
    }
    if name.chars().any(char::is_control) {
        return Err(StowageError::InvalidName(
            "name must not contain control characters".to_string(),
        ));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(StowageError::InvalidName(format!(
            "name is longer than {MAX_NAME_LENGTH} characters"
        )));
    }
    Ok(())
}

/// Compose the full path of `name` under a parent path (`None` for the root).
pub fn compose_path(parent_path: Option<&str>, name: &str) -> Result<String> {
    validate_name(name)?;
    Ok(match parent_path {
        Some(parent) => format!("{parent}{PATH_SEPARATOR}{name}"),
        None => format!("{PATH_SEPARATOR}{name}"),
    })
}

/// Path of the parent of `path`, or `None` for a root-level item.
pub fn parent_path_of(path: &str) -> Option<&str> {
    path.rsplit_once(PATH_SEPARATOR)
        .map(|(parent, _)| parent)
        .filter(|parent| !parent.is_empty())
}

/// Check whether `path` equals `root` or lies underneath it.
pub fn is_within(path: &str, root: &str) -> bool {
    path == root
        || path
            .strip_prefix(root)
            .is_some_and(|rest| rest.starts_with(PATH_SEPARATOR))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_root_level() {
        assert_eq!(compose_path(None, "docs").unwrap(), "/docs");
    }

    #[test]
    fn test_compose_nested() {
        assert_eq!(
            compose_path(Some("/docs/2024"), "report.pdf").unwrap(),
            "/docs/2024/report.pdf"
        );
    }

    #[test]
    fn test_compose_rejects_separator() {
        let result = compose_path(Some("/docs"), "a/b");
        assert!(matches!(result, Err(StowageError::InvalidName(_))));
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("photo.jpg").is_ok());
        assert!(validate_name("写真.jpg").is_ok());
        assert!(validate_name(".hidden").is_ok());

        for bad in ["", "   ", ".", "..", "a/b", "tab\there"] {
            assert!(
                matches!(validate_name(bad), Err(StowageError::InvalidName(_))),
                "{bad:?}"
            );
        }

        assert!(validate_name(&"x".repeat(MAX_NAME_LENGTH)).is_ok());
        assert!(validate_name(&"x".repeat(MAX_NAME_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_parent_path_of() {
        assert_eq!(parent_path_of("/a"), None);
        assert_eq!(parent_path_of("/a/b"), Some("/a"));
        assert_eq!(parent_path_of("/a/b/c.txt"), Some("/a/b"));
    }

    #[test]
    fn test_is_within() {
        assert!(is_within("/a", "/a"));
        assert!(is_within("/a/b", "/a"));
        assert!(!is_within("/ab", "/a"));
        assert!(!is_within("/b/a", "/a"));
    }
}
