//! Collision-free identifiers for test-created records.

use uuid::Uuid;

/// Returns a value distinct from every other call in this process.
pub fn unique_id() -> String {
    Uuid::new_v4().to_string()
}

/// Builds a namespaced tag `<prefix>/<discriminator>`.
///
/// Without a discriminator a fresh [`unique_id`] is used, so every tag marks
/// exactly one run and stray records can be swept out of band.
pub fn test_tag(prefix: &str, discriminator: Option<&str>) -> String {
    let prefix = prefix.trim_end_matches('/');
    match discriminator {
        Some(discriminator) => format!("{prefix}/{discriminator}"),
        None => format!("{prefix}/{}", unique_id()),
    }
}

/// A short suffix for human-readable names (`"template-3f2a9c1b"`).
pub fn short_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}
