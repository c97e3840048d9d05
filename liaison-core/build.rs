// MIT License
// Copyright 2023--present liaison developers

/// Generate the C header via cbindgen (only when `gen-header` is active).
/// Run `cargo build --features gen-header` to regenerate.
#[cfg(feature = "gen-header")]
fn generate_c_header(crate_dir: &str) -> Result<(), String> {
    use std::path::PathBuf;

    let output_dir = PathBuf::from(crate_dir).join("include");
    std::fs::create_dir_all(&output_dir)
        .map_err(|e| format!("cannot create {}: {e}", output_dir.display()))?;

    let config = cbindgen::Config::from_file(PathBuf::from(crate_dir).join("cbindgen.toml"))
        .map_err(|e| format!("cannot read cbindgen.toml: {e}"))?;

    cbindgen::Builder::new()
        .with_crate(crate_dir)
        .with_config(config)
        .generate()
        .map_err(|e| format!("cannot generate C bindings: {e}"))?
        .write_to_file(output_dir.join("liaison.h"));
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=src");
    println!("cargo:rerun-if-changed=cbindgen.toml");

    #[cfg(feature = "gen-header")]
    match std::env::var("CARGO_MANIFEST_DIR") {
        Ok(crate_dir) => {
            if let Err(e) = generate_c_header(&crate_dir) {
                println!("cargo:warning={e}");
            }
        }
        Err(e) => println!("cargo:warning=CARGO_MANIFEST_DIR: {e}"),
    }
}
