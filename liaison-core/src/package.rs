// MIT License
// Copyright 2023--present liaison developers

//! Build a proxy model unit.
//!
//! The packaged unit keeps the original `modelDescription.xml` byte for byte,
//! replaces every native binary with the client stub and carries the
//! namespace and transport settings in `resources/liaison.json`. TLS files
//! named by the transport settings are copied into `resources/` and the
//! config is rewritten to refer to them by file name, so the unit can be moved
//! freely.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::config::{validate_namespace, ConfigError, TransportConfig, UnitConfig};
use crate::unit::{
    identifier_or_stem, library_extension, read_model_description_bytes, UnitError,
    MODEL_DESCRIPTION,
};

#[derive(Debug, Error)]
pub enum PackageError {
    #[error(transparent)]
    Unit(#[from] UnitError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("failed to serialize unit config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no stub binaries found under {}", dir.display())]
    NoStubs { dir: PathBuf },
    #[error("TLS file for `{field}` does not exist: {}", path.display())]
    MissingTlsFile { field: &'static str, path: PathBuf },
    #[error("TLS files {} and {} share the name `{name}`", first.display(), second.display())]
    TlsNameClash {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },
}

#[derive(Debug, Clone)]
pub struct PackageOptions {
    /// The unit being proxied.
    pub model_unit: PathBuf,
    pub namespace: String,
    pub transport: TransportConfig,
    /// Directory laid out as `<platform>/<stub library>`.
    pub stub_dir: PathBuf,
    /// Archive to write.
    pub output: PathBuf,
}

/// What [`package`] wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSummary {
    pub model_identifier: String,
    pub platforms: Vec<String>,
    pub output: PathBuf,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PackageError + '_ {
    move |source| PackageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// One stub library per platform directory under `stub_dir`.
pub fn find_stubs(stub_dir: &Path) -> Result<BTreeMap<String, PathBuf>, PackageError> {
    let mut stubs = BTreeMap::new();
    for entry in std::fs::read_dir(stub_dir).map_err(io_error(stub_dir))? {
        let entry = entry.map_err(io_error(stub_dir))?;
        let platform_dir = entry.path();
        if !platform_dir.is_dir() {
            continue;
        }
        let platform = entry.file_name().to_string_lossy().into_owned();
        let extension = library_extension(&platform);

        let mut candidates: Vec<PathBuf> = std::fs::read_dir(&platform_dir)
            .map_err(io_error(&platform_dir))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == extension))
            .collect();
        candidates.sort();
        match candidates.into_iter().next() {
            Some(stub) => {
                stubs.insert(platform, stub);
            }
            None => tracing::warn!(platform = %platform, "no .{extension} stub, skipping"),
        }
    }
    if stubs.is_empty() {
        return Err(PackageError::NoStubs {
            dir: stub_dir.to_path_buf(),
        });
    }
    Ok(stubs)
}

/// Point TLS paths at bare file names and return `name -> source file`.
fn relocate_tls(transport: &mut TransportConfig) -> Result<BTreeMap<String, PathBuf>, PackageError> {
    let mut files = BTreeMap::new();
    let Some(tls) = transport.tls.as_mut() else {
        return Ok(files);
    };
    for (field, slot) in tls.files_mut() {
        let Some(path) = slot.take() else {
            continue;
        };
        let name = match path.file_name() {
            Some(name) if path.is_file() => name.to_string_lossy().into_owned(),
            _ => return Err(PackageError::MissingTlsFile { field, path }),
        };
        if let Some(first) = files.get(&name) {
            if *first != path {
                return Err(PackageError::TlsNameClash {
                    name,
                    first: first.clone(),
                    second: path,
                });
            }
        }
        *slot = Some(PathBuf::from(&name));
        files.insert(name, path);
    }
    Ok(files)
}

/// Write the proxy unit described by `options`.
pub fn package(options: &PackageOptions) -> Result<PackageSummary, PackageError> {
    validate_namespace(&options.namespace)?;
    let description = read_model_description_bytes(&options.model_unit)?;
    let model_identifier =
        identifier_or_stem(&String::from_utf8_lossy(&description), &options.model_unit);
    let stubs = find_stubs(&options.stub_dir)?;

    let mut transport = options.transport.clone();
    let tls_files = relocate_tls(&mut transport)?;
    let config = UnitConfig::new(options.namespace.clone(), transport);
    let config_json = serde_json::to_vec_pretty(&config)?;

    if let Some(parent) = options.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    let output = &options.output;
    let file = File::create(output).map_err(io_error(output))?;
    let mut zip = ZipWriter::new(file);
    let entry_options = SimpleFileOptions::default();
    let archive_error = |source| PackageError::Archive {
        path: output.clone(),
        source,
    };

    let add = |zip: &mut ZipWriter<File>, name: String, data: &[u8]| -> Result<(), PackageError> {
        zip.start_file(name, entry_options).map_err(archive_error)?;
        zip.write_all(data).map_err(io_error(output))
    };

    add(&mut zip, MODEL_DESCRIPTION.to_owned(), &description)?;
    for (platform, stub) in &stubs {
        let data = std::fs::read(stub).map_err(io_error(stub))?;
        let name = format!(
            "binaries/{platform}/{model_identifier}.{}",
            library_extension(platform)
        );
        add(&mut zip, name, &data)?;
    }
    add(
        &mut zip,
        format!("resources/{}", UnitConfig::FILE_NAME),
        &config_json,
    )?;
    for (name, source) in &tls_files {
        let data = std::fs::read(source).map_err(io_error(source))?;
        add(&mut zip, format!("resources/{name}"), &data)?;
    }
    zip.finish().map_err(archive_error)?;

    let platforms: Vec<String> = stubs.into_keys().collect();
    tracing::info!(
        output = %output.display(),
        namespace = %options.namespace,
        ?platforms,
        "packaged proxy unit"
    );
    Ok(PackageSummary {
        model_identifier,
        platforms,
        output: output.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TlsConfig;
    use crate::transport::tls::tests::identity;
    use crate::transport::Session;
    use crate::unit::tests::{write_unit, DESCRIPTION};
    use crate::unit::ModelUnit;
    use std::sync::Arc;

    struct Scratch {
        dir: tempfile::TempDir,
    }

    impl Scratch {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let original = dir.path().join("BouncingBall.fmu");
            write_unit(
                &original,
                &[
                    (MODEL_DESCRIPTION, DESCRIPTION.as_bytes()),
                    ("binaries/x86_64-linux/BouncingBall.so", b"real model"),
                ],
            );
            let stubs = dir.path().join("stubs");
            std::fs::create_dir_all(stubs.join("x86_64-linux")).unwrap();
            std::fs::create_dir_all(stubs.join("x86_64-windows")).unwrap();
            std::fs::write(stubs.join("x86_64-linux/libliaison_core.so"), b"stub so").unwrap();
            std::fs::write(stubs.join("x86_64-windows/liaison_core.dll"), b"stub dll").unwrap();
            Self { dir }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn options(&self, transport: TransportConfig) -> PackageOptions {
            PackageOptions {
                model_unit: self.path("BouncingBall.fmu"),
                namespace: "ball".into(),
                transport,
                stub_dir: self.path("stubs"),
                output: self.path("out/BouncingBall.fmu"),
            }
        }
    }

    #[test]
    fn metadata_is_unchanged() {
        let scratch = Scratch::new();
        let summary = package(&scratch.options(TransportConfig::default())).unwrap();
        assert_eq!(summary.model_identifier, "BouncingBall");
        assert_eq!(summary.platforms, vec!["x86_64-linux", "x86_64-windows"]);

        assert_eq!(
            read_model_description_bytes(&summary.output).unwrap(),
            read_model_description_bytes(&scratch.path("BouncingBall.fmu")).unwrap()
        );
    }

    #[test]
    fn non_utf8_metadata_is_copied_verbatim() {
        let scratch = Scratch::new();
        let mut description = DESCRIPTION.as_bytes().to_vec();
        description.extend_from_slice(b"<!-- \xe9t\xe9 -->\n");
        write_unit(
            &scratch.path("BouncingBall.fmu"),
            &[(MODEL_DESCRIPTION, description.as_slice())],
        );

        let summary = package(&scratch.options(TransportConfig::default())).unwrap();
        assert_eq!(summary.model_identifier, "BouncingBall");
        assert_eq!(read_model_description_bytes(&summary.output).unwrap(), description);
    }

    #[test]
    fn binaries_are_replaced_by_stubs() {
        let scratch = Scratch::new();
        let summary = package(&scratch.options(TransportConfig::default())).unwrap();
        let unit = ModelUnit::extract(&summary.output).unwrap();

        let linux = std::fs::read(unit.library_path("x86_64-linux")).unwrap();
        assert_eq!(linux, b"stub so");
        let windows = std::fs::read(unit.library_path("x86_64-windows")).unwrap();
        assert_eq!(windows, b"stub dll");

        let config =
            UnitConfig::load(&unit.resources_dir().unwrap().join(UnitConfig::FILE_NAME)).unwrap();
        assert_eq!(config.namespace, "ball");
        assert!(config.transport.tls.is_none());
    }

    #[test]
    fn tls_files_travel_with_the_unit() {
        let scratch = Scratch::new();
        std::fs::create_dir_all(scratch.path("certs")).unwrap();
        std::fs::write(scratch.path("certs/client.pem"), b"CERT").unwrap();
        std::fs::write(scratch.path("certs/ca.pem"), b"CA").unwrap();
        let transport = TransportConfig {
            connect: vec!["tcp/10.0.0.5:7447".into()],
            tls: Some(TlsConfig {
                connect_certificate: Some(scratch.path("certs/client.pem")),
                root_ca_certificate: Some(scratch.path("certs/ca.pem")),
                ..TlsConfig::default()
            }),
            ..TransportConfig::default()
        };

        let summary = package(&scratch.options(transport)).unwrap();
        let unit = ModelUnit::extract(&summary.output).unwrap();
        let resources = unit.resources_dir().unwrap();
        let config = UnitConfig::load(&resources.join(UnitConfig::FILE_NAME)).unwrap();
        let tls = config.transport.tls.unwrap();

        assert_eq!(tls.connect_certificate, Some(resources.join("client.pem")));
        assert_eq!(tls.root_ca_certificate, Some(resources.join("ca.pem")));
        assert_eq!(tls.connect_private_key, None);
        assert_eq!(std::fs::read(resources.join("client.pem")).unwrap(), b"CERT");
        assert_eq!(config.transport.connect, vec!["tcp/10.0.0.5:7447"]);
    }

    #[test]
    fn packaged_tls_config_connects() {
        let scratch = Scratch::new();
        std::fs::create_dir_all(scratch.path("certs")).unwrap();
        let (cert, key) = identity(&scratch.path("certs"), "server");
        let server = Session::listen(&TransportConfig {
            listen: vec!["tcp/127.0.0.1:0".into()],
            tls: Some(TlsConfig {
                listen_certificate: Some(cert.clone()),
                listen_private_key: Some(key),
                ..TlsConfig::default()
            }),
            ..TransportConfig::default()
        })
        .unwrap();
        server
            .declare_responder("rpc/ball/echo", Arc::new(|p: &[u8]| -> Vec<u8> { p.to_vec() }))
            .unwrap();

        let transport = TransportConfig {
            connect: server.local_endpoints(),
            tls: Some(TlsConfig {
                root_ca_certificate: Some(cert),
                ..TlsConfig::default()
            }),
            ..TransportConfig::default()
        };
        let summary = package(&scratch.options(transport)).unwrap();
        std::fs::remove_dir_all(scratch.path("certs")).unwrap();

        let unit = ModelUnit::extract(&summary.output).unwrap();
        let config =
            UnitConfig::load(&unit.resources_dir().unwrap().join(UnitConfig::FILE_NAME)).unwrap();
        let client = Session::connect(&config.transport).unwrap();
        assert_eq!(client.query("rpc/ball/echo", vec![9, 8]).unwrap(), vec![9, 8]);
        server.close();
    }

    #[test]
    fn missing_tls_file_is_an_error() {
        let scratch = Scratch::new();
        let transport = TransportConfig {
            tls: Some(TlsConfig {
                root_ca_certificate: Some(scratch.path("nowhere/ca.pem")),
                ..TlsConfig::default()
            }),
            ..TransportConfig::default()
        };
        assert!(matches!(
            package(&scratch.options(transport)),
            Err(PackageError::MissingTlsFile {
                field: "root_ca_certificate",
                ..
            })
        ));
    }

    #[test]
    fn empty_stub_dir_is_an_error() {
        let scratch = Scratch::new();
        std::fs::create_dir_all(scratch.path("empty")).unwrap();
        let options = PackageOptions {
            stub_dir: scratch.path("empty"),
            ..scratch.options(TransportConfig::default())
        };
        assert!(matches!(package(&options), Err(PackageError::NoStubs { .. })));
    }

    #[test]
    fn bad_namespace_is_rejected_before_writing() {
        let scratch = Scratch::new();
        let options = PackageOptions {
            namespace: "has space".into(),
            ..scratch.options(TransportConfig::default())
        };
        assert!(matches!(package(&options), Err(PackageError::Config(_))));
        assert!(!options.output.exists());
    }
}
