// MIT License
// Copyright 2023--present liaison developers

//! Model units on disk.
//!
//! A model unit is a zip archive laid out as
//!
//! ```text
//! modelDescription.xml
//! binaries/<platform>/<modelIdentifier>.<ext>
//! resources/...
//! ```
//!
//! [`ModelUnit::extract`] unpacks one into a temporary directory that lives as
//! long as the returned value, so the server can load the native library and
//! hand the model its resources.

use std::fs::File;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use thiserror::Error;
use zip::ZipArchive;

/// Name of the metadata entry at the root of every unit.
pub const MODEL_DESCRIPTION: &str = "modelDescription.xml";

#[derive(Debug, Error)]
pub enum UnitError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} is not a readable model unit: {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("{} has no `{entry}` entry", path.display())]
    MissingEntry { path: PathBuf, entry: String },
    #[error("no model binary for {platform} at {}", path.display())]
    MissingBinary { platform: &'static str, path: PathBuf },
    #[error("this host platform has no FMI platform tuple")]
    UnsupportedPlatform,
}

/// FMI 3.0 platform tuple of the running host.
pub fn current_platform() -> Option<&'static str> {
    match (std::env::consts::ARCH, std::env::consts::OS) {
        ("x86_64", "linux") => Some("x86_64-linux"),
        ("aarch64", "linux") => Some("aarch64-linux"),
        ("x86_64", "windows") => Some("x86_64-windows"),
        ("x86", "windows") => Some("x86-windows"),
        ("x86_64", "macos") => Some("x86_64-darwin"),
        ("aarch64", "macos") => Some("aarch64-darwin"),
        _ => None,
    }
}

/// Shared library extension used under `binaries/<platform>/`.
pub fn library_extension(platform: &str) -> &'static str {
    if platform.ends_with("-windows") {
        "dll"
    } else if platform.ends_with("-darwin") {
        "dylib"
    } else {
        "so"
    }
}

/// Elements whose `modelIdentifier` names the unit's binaries.
const INTERFACE_ELEMENTS: [&str; 3] = ["CoSimulation", "ModelExchange", "ScheduledExecution"];

/// `modelIdentifier` of the first interface element in a model description.
///
/// Every interface element of one unit carries the same identifier. Comments,
/// CDATA sections and attributes of other elements are skipped.
pub fn model_identifier(description: &str) -> Option<String> {
    let mut rest = description;
    while let Some(open) = rest.find('<') {
        rest = &rest[open + 1..];
        if let Some(comment) = rest.strip_prefix("!--") {
            rest = comment.find("-->").map_or("", |end| &comment[end + 3..]);
            continue;
        }
        if let Some(cdata) = rest.strip_prefix("![CDATA[") {
            rest = cdata.find("]]>").map_or("", |end| &cdata[end + 3..]);
            continue;
        }
        let name_end = rest
            .find(|c: char| c.is_whitespace() || c == '/' || c == '>')
            .unwrap_or(rest.len());
        let (name, tail) = rest.split_at(name_end);
        let (attributes, after) = split_tag(tail);
        rest = after;
        if !INTERFACE_ELEMENTS.contains(&name) {
            continue;
        }
        if let Some(identifier) = attribute(attributes, "modelIdentifier")
            .map(str::trim)
            .filter(|id| !id.is_empty())
        {
            return Some(identifier.to_owned());
        }
    }
    None
}

/// Split at the first `>` outside a quoted value.
fn split_tag(s: &str) -> (&str, &str) {
    let mut quote = None;
    for (i, c) in s.char_indices() {
        match (quote, c) {
            (None, '"' | '\'') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, '>') => return (&s[..i], &s[i + 1..]),
            _ => {}
        }
    }
    (s, "")
}

/// Value of attribute `wanted` in the inside of a start tag.
fn attribute<'a>(mut attributes: &'a str, wanted: &str) -> Option<&'a str> {
    loop {
        let eq = attributes.find('=')?;
        let name = attributes[..eq].trim_matches(|c: char| c.is_whitespace() || c == '/');
        let value = attributes[eq + 1..].trim_start();
        let quote = value.chars().next().filter(|c| *c == '"' || *c == '\'')?;
        let value = &value[1..];
        let end = value.find(quote)?;
        if name == wanted {
            return Some(&value[..end]);
        }
        attributes = &value[end + 1..];
    }
}

pub(crate) fn open_archive(path: &Path) -> Result<ZipArchive<File>, UnitError> {
    let file = File::open(path).map_err(|source| UnitError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    ZipArchive::new(file).map_err(|source| UnitError::Archive {
        path: path.to_path_buf(),
        source,
    })
}

/// Raw bytes of the model description, read without extracting the unit.
pub fn read_model_description_bytes(unit: &Path) -> Result<Vec<u8>, UnitError> {
    let mut archive = open_archive(unit)?;
    let mut entry = archive
        .by_name(MODEL_DESCRIPTION)
        .map_err(|_| UnitError::MissingEntry {
            path: unit.to_path_buf(),
            entry: MODEL_DESCRIPTION.to_owned(),
        })?;
    let mut bytes = Vec::new();
    std::io::Read::read_to_end(&mut entry, &mut bytes).map_err(|source| UnitError::Io {
        path: unit.to_path_buf(),
        source,
    })?;
    Ok(bytes)
}

/// The model description as text. Bytes that are not UTF-8 are replaced.
pub fn read_model_description(unit: &Path) -> Result<String, UnitError> {
    let bytes = read_model_description_bytes(unit)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// `modelIdentifier` from the description, else the archive's file stem.
pub fn identifier_or_stem(description: &str, unit: &Path) -> String {
    model_identifier(description).unwrap_or_else(|| {
        unit.file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    })
}

/// An extracted model unit.
#[derive(Debug)]
pub struct ModelUnit {
    dir: TempDir,
    model_identifier: String,
}

impl ModelUnit {
    pub fn extract(unit: &Path) -> Result<Self, UnitError> {
        let description = read_model_description(unit)?;
        let model_identifier = identifier_or_stem(&description, unit);

        let dir = tempfile::Builder::new()
            .prefix("liaison-")
            .tempdir()
            .map_err(|source| UnitError::Io {
                path: std::env::temp_dir(),
                source,
            })?;
        open_archive(unit)?
            .extract(dir.path())
            .map_err(|source| UnitError::Archive {
                path: unit.to_path_buf(),
                source,
            })?;

        tracing::info!(
            unit = %unit.display(),
            model_identifier = %model_identifier,
            into = %dir.path().display(),
            "extracted model unit"
        );
        Ok(Self {
            dir,
            model_identifier,
        })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn model_identifier(&self) -> &str {
        &self.model_identifier
    }

    /// `resources/`, if the unit has one.
    pub fn resources_dir(&self) -> Option<PathBuf> {
        let resources = self.root().join("resources");
        resources.is_dir().then_some(resources)
    }

    /// Path of the native library for `platform`, whether or not it exists.
    pub fn library_path(&self, platform: &str) -> PathBuf {
        self.root().join("binaries").join(platform).join(format!(
            "{}.{}",
            self.model_identifier,
            library_extension(platform)
        ))
    }

    /// The native library for the running host.
    pub fn native_library(&self) -> Result<PathBuf, UnitError> {
        let platform = current_platform().ok_or(UnitError::UnsupportedPlatform)?;
        let path = self.library_path(platform);
        if !path.is_file() {
            return Err(UnitError::MissingBinary { platform, path });
        }
        Ok(path)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    pub(crate) const DESCRIPTION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<fmiModelDescription fmiVersion="3.0" modelName="BouncingBall" instantiationToken="{1AE5E10D}">
  <CoSimulation modelIdentifier="BouncingBall" canHandleVariableCommunicationStepSize="true"/>
  <ModelVariables>
    <Float64 name="time" valueReference="0" causality="independent" variability="continuous"/>
    <Float64 name="h" valueReference="1" causality="output" variability="continuous" start="1"/>
  </ModelVariables>
</fmiModelDescription>
"#;

    /// Write a unit with the given entries.
    pub(crate) fn write_unit(path: &Path, entries: &[(&str, &[u8])]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, data) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn identifier_is_read_from_description() {
        assert_eq!(model_identifier(DESCRIPTION).as_deref(), Some("BouncingBall"));
        assert_eq!(
            model_identifier("<ModelExchange modelIdentifier = 'me' />").as_deref(),
            Some("me")
        );
        assert_eq!(model_identifier("<CoSimulation/>"), None);
    }

    #[test]
    fn identifier_comes_only_from_interface_elements() {
        let description = r#"<?xml version="1.0"?>
<!-- <CoSimulation modelIdentifier="commented"/> -->
<fmiModelDescription description='modelIdentifier="quoted"' modelIdentifier="root">
  <Annotation modelIdentifier="annotated"/>
  <ScheduledExecution xmodelIdentifier="prefixed" modelIdentifier="scheduled"/>
</fmiModelDescription>"#;
        assert_eq!(model_identifier(description).as_deref(), Some("scheduled"));
        assert_eq!(
            model_identifier("<fmiModelDescription modelIdentifier='root'/>"),
            None
        );
        assert_eq!(
            model_identifier("<CoSimulation a='x>y' modelIdentifier=\"gt\"/>").as_deref(),
            Some("gt")
        );
    }

    #[test]
    fn non_utf8_description_is_readable() {
        let scratch = tempfile::tempdir().unwrap();
        let fmu = scratch.path().join("latin1.fmu");
        let mut description = DESCRIPTION.replace("BouncingBall\"", "Caf\u{1}\"").into_bytes();
        for byte in description.iter_mut().filter(|b| **b == 1) {
            *byte = 0xe9;
        }
        write_unit(&fmu, &[(MODEL_DESCRIPTION, description.as_slice())]);

        assert_eq!(read_model_description_bytes(&fmu).unwrap(), description);
        let text = read_model_description(&fmu).unwrap();
        assert!(text.contains("Caf\u{fffd}"));
        assert_eq!(
            ModelUnit::extract(&fmu).unwrap().model_identifier(),
            "Caf\u{fffd}"
        );
    }

    #[test]
    fn stem_is_the_fallback_identifier() {
        assert_eq!(
            identifier_or_stem("<fmiModelDescription/>", Path::new("/tmp/Feedthrough.fmu")),
            "Feedthrough"
        );
    }

    #[test]
    fn extract_lays_out_the_unit() {
        let scratch = tempfile::tempdir().unwrap();
        let fmu = scratch.path().join("ball.fmu");
        let platform = current_platform().unwrap_or("x86_64-linux");
        let binary = format!("binaries/{platform}/BouncingBall.{}", library_extension(platform));
        write_unit(
            &fmu,
            &[
                (MODEL_DESCRIPTION, DESCRIPTION.as_bytes()),
                (binary.as_str(), b"not really a library"),
                ("resources/table.csv", b"t,h\n0,1\n"),
            ],
        );

        let unit = ModelUnit::extract(&fmu).unwrap();
        assert_eq!(unit.model_identifier(), "BouncingBall");
        assert!(unit.resources_dir().unwrap().join("table.csv").is_file());
        assert!(unit.library_path(platform).is_file());
        if current_platform().is_some() {
            assert_eq!(unit.native_library().unwrap(), unit.library_path(platform));
        }
    }

    #[test]
    fn extracted_files_go_away_with_the_unit() {
        let scratch = tempfile::tempdir().unwrap();
        let fmu = scratch.path().join("ball.fmu");
        write_unit(&fmu, &[(MODEL_DESCRIPTION, DESCRIPTION.as_bytes())]);

        let unit = ModelUnit::extract(&fmu).unwrap();
        let root = unit.root().to_path_buf();
        assert!(root.join(MODEL_DESCRIPTION).is_file());
        assert!(unit.resources_dir().is_none());
        drop(unit);
        assert!(!root.exists());
    }

    #[test]
    fn missing_description_is_reported() {
        let scratch = tempfile::tempdir().unwrap();
        let fmu = scratch.path().join("empty.fmu");
        write_unit(&fmu, &[("resources/x", b"")]);
        assert!(matches!(
            ModelUnit::extract(&fmu),
            Err(UnitError::MissingEntry { .. })
        ));
    }

    #[test]
    fn not_a_zip_is_reported() {
        let scratch = tempfile::tempdir().unwrap();
        let fmu = scratch.path().join("junk.fmu");
        std::fs::write(&fmu, b"plain text").unwrap();
        assert!(matches!(
            read_model_description(&fmu),
            Err(UnitError::Archive { .. })
        ));
    }
}
