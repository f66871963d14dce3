use std::env;

/// Release version injected by the image build, e.g. `DEVICE_PLUGIN_VERSION=v0.3.1`.
const RELEASE_VERSION_VAR: &str = "DEVICE_PLUGIN_VERSION";

fn main() {
    if let Err(err) = emit_git_variables() {
        println!("cargo:warning=git metadata unavailable: {err}");
    }

    let release = env::var(RELEASE_VERSION_VAR)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| env::var("CARGO_PKG_VERSION").ok())
        .unwrap_or_else(|| "dev".to_string());
    println!("cargo:rustc-env=PLUGIN_RELEASE_VERSION={release}");
    println!("cargo:rerun-if-env-changed={RELEASE_VERSION_VAR}");
}

fn emit_git_variables() -> anyhow::Result<()> {
    let git = vergen_git2::Git2Builder::default()
        .branch(true)
        .sha(true)
        .dirty(true)
        .build()?;

    vergen_git2::Emitter::default()
        .fail_on_error()
        .add_instructions(&git)?
        .emit()
}
