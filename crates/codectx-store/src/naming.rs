use std::path::Path;

const DIGEST_HEX_LEN: usize = 16;

/// Stable identifier for a workspace root: the first 16 hex chars of the
/// blake3 digest of its canonical path.
///
/// Falls back to the path as given when it cannot be canonicalized.
#[must_use]
pub fn workspace_id_for(root: &Path) -> String {
    let canonical = root
        .canonicalize()
        .unwrap_or_else(|_| root.to_path_buf());
    let digest = blake3::hash(canonical.to_string_lossy().as_bytes());
    digest.to_hex()[..DIGEST_HEX_LEN].to_owned()
}

/// Collection holding the chunks of exactly one workspace root.
#[must_use]
pub fn collection_name_for(root: &Path) -> String {
    format!("codectx_{}", workspace_id_for(root))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            collection_name_for(dir.path()),
            collection_name_for(dir.path())
        );
    }

    #[test]
    fn equivalent_paths_share_a_collection() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let direct = collection_name_for(dir.path());
        let dotted = collection_name_for(&dir.path().join("sub").join(".."));
        assert_eq!(direct, dotted);
    }

    #[test]
    fn different_roots_get_different_collections() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        assert_ne!(collection_name_for(a.path()), collection_name_for(b.path()));
    }

    #[test]
    fn name_shape() {
        let name = collection_name_for(Path::new("/definitely/not/here"));
        assert!(name.starts_with("codectx_"));
        assert_eq!(name.len(), "codectx_".len() + DIGEST_HEX_LEN);
        assert!(name["codectx_".len()..].chars().all(|c| c.is_ascii_hexdigit()));
    }
}
