/// Git metadata captured by `build.rs`; absent when building outside a git checkout.
pub(crate) struct BuildInfo {
    pub(crate) commit_sha1: Option<&'static str>,
    pub(crate) branch: Option<&'static str>,
    git_dirty: Option<&'static str>,
}

impl BuildInfo {
    /// Whether the working tree had uncommitted changes at build time.
    pub(crate) fn is_dirty(&self) -> bool {
        self.git_dirty == Some("true")
    }
}

pub(crate) const BUILD_INFO: BuildInfo = BuildInfo {
    commit_sha1: option_env!("VERGEN_GIT_SHA"),
    branch: option_env!("VERGEN_GIT_BRANCH"),
    git_dirty: option_env!("VERGEN_GIT_DIRTY"),
};
