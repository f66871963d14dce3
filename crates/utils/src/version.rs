use std::sync::LazyLock;

use crate::build_info::BUILD_INFO;

/// Release version plus the commit it was built from, e.g. `0.1.0-3f2a9c1-dirty`.
pub static VERSION: LazyLock<String> = LazyLock::new(|| {
    format!(
        "{}-{}{}",
        env!("PLUGIN_RELEASE_VERSION"),
        BUILD_INFO.commit_sha1.unwrap_or("unknown"),
        if BUILD_INFO.is_dirty() { "-dirty" } else { "" }
    )
});

/// Branch the binary was built from, if known.
pub fn branch() -> &'static str {
    BUILD_INFO.branch.unwrap_or("unknown")
}
