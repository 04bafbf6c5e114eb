use anyhow::{anyhow, Context};
use std::env;
use std::path::{Path, PathBuf};

const PROBES_PACKAGE: &str = "tclens-probes";
const PROBES_OBJECT: &str = "tc_classifiers";

fn main() -> anyhow::Result<()> {
    println!("cargo:rerun-if-env-changed=TCLENS_SKIP_EBPF");

    // Nothing to do when cross-building the classifiers themselves
    if env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default() == "bpf" {
        return Ok(());
    }

    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    let object_path = out_dir.join(PROBES_OBJECT);

    if env::consts::OS != "linux" {
        println!(
            "cargo:warning=TC classifier compilation skipped on {}",
            env::consts::OS
        );
        return write_placeholder(&object_path);
    }

    // CI runners have no bpf-linker
    if env::var("CI").is_ok() || env::var("TCLENS_SKIP_EBPF").is_ok() {
        println!("cargo:warning=TC classifier compilation skipped, the agent will refuse to load");
        return write_placeholder(&object_path);
    }

    // tclens-probes is excluded from the workspace, so ask for its manifest directly
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR")?);
    let probes_manifest = manifest_dir.join("..").join(PROBES_PACKAGE).join("Cargo.toml");

    let aya_build::cargo_metadata::Metadata { packages, .. } =
        aya_build::cargo_metadata::MetadataCommand::new()
            .manifest_path(&probes_manifest)
            .no_deps()
            .exec()
            .context("MetadataCommand::exec")?;

    let probes = packages
        .into_iter()
        .find(|pkg| pkg.name == PROBES_PACKAGE)
        .ok_or_else(|| anyhow!("{} package not found", PROBES_PACKAGE))?;

    aya_build::build_ebpf([probes])?;

    if !object_path.exists() {
        return Err(anyhow!(
            "TC classifier compilation failed: {} not found",
            object_path.display()
        ));
    }

    Ok(())
}

/// An empty object keeps `include_bytes_aligned!` happy; loading it fails at runtime
fn write_placeholder(path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        std::fs::write(path, []).context("writing placeholder classifier object")?;
    }
    Ok(())
}
