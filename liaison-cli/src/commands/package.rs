// MIT License
// Copyright 2023--present liaison developers

//! Package command

use std::path::{Path, PathBuf};

use anyhow::Context;
use liaison_core::package::{package, PackageOptions};

pub fn run(
    fmu: &Path,
    namespace: &str,
    transport_config: Option<&Path>,
    stub_dir: Option<PathBuf>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let transport = super::load_transport(transport_config)?;
    let stub_dir = match stub_dir {
        Some(dir) => dir,
        None => default_stub_dir()?,
    };
    let options = PackageOptions {
        model_unit: fmu.to_path_buf(),
        namespace: namespace.to_owned(),
        transport,
        stub_dir,
        output: output.unwrap_or_else(|| default_output(fmu)),
    };

    let summary = package(&options).with_context(|| format!("packaging {}", fmu.display()))?;
    println!(
        "{}: {} for {}",
        summary.output.display(),
        summary.model_identifier,
        summary.platforms.join(", ")
    );
    Ok(())
}

fn default_stub_dir() -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe().context("locating the liaison executable")?;
    let dir = exe
        .parent()
        .context("the liaison executable has no parent directory")?;
    Ok(dir.join("stubs"))
}

/// `<dir>/<stem>-remote.fmu` for `<dir>/<stem>.fmu`.
fn default_output(fmu: &Path) -> PathBuf {
    let stem = fmu
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "model".to_owned());
    fmu.with_file_name(format!("{stem}-remote.fmu"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_defaults_next_to_the_input() {
        assert_eq!(
            default_output(Path::new("/units/BouncingBall.fmu")),
            PathBuf::from("/units/BouncingBall-remote.fmu")
        );
    }
}
