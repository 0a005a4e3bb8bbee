//! Capture file name grammar
//!
//! Raw fragments (from worker nodes WU01-WU13):
//!   `Lvl00-00001-Arh2k_mezen_200725-06-00-BD11EBB0_BE00_4BE7_BC66_9DED8D740C2E.raw`
//!   `Lvl0X-00002-T-Arh2k_mezen_200725-06-00-BD11EBB0_BE00_4BE7_BC66_9DED8D740C2E.raw`
//!
//! Metadata (from the control unit):
//!   `EAD-00001-Arh2k_mezen_200725-BD11EBB0_BE00_4BE7_BC66_9DED8D740C2E.xml`
//!
//! Raw field breakdown: data type (`Lvl00` verified, `Lvl0X` unverified),
//! capture number, optional `T` test marker, project name, sensor code
//! (`XX-YY`), session id. Metadata files carry no sensor code and no test
//! marker; a capture's metadata exists only for production captures.

use once_cell::sync::Lazy;
use regex::Regex;

static RAW_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(Lvl\d+X?)-(\d+)(?:-(T))?-([^-]+)-(\d+-\d+)-([A-F0-9_]+)\.raw$")
        .expect("raw capture regex")
});

static METADATA_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^EAD-(\d+)-([^-]+)-([A-F0-9_]+)\.xml$").expect("metadata regex")
});

/// Which side of a capture a file contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Raw,
    Metadata,
}

/// Structured view of a capture file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureFile {
    pub kind: FileKind,
    /// Literal data type field: `Lvl00`, `Lvl0X`, `EAD`, ...
    pub data_type: String,
    /// Fixed-width decimal string, the identity of the capture.
    pub capture_number: String,
    /// Test captures carry a `T` marker between capture number and project.
    pub is_test: bool,
    pub project_name: String,
    /// Raw files only; empty for metadata.
    pub sensor_code: String,
    pub session_id: String,
}

impl CaptureFile {
    /// `Lvl00` and metadata are verified, `Lvl0X` (and any other
    /// X-suffixed level) is not.
    pub fn is_verified(&self) -> bool {
        !self.data_type.ends_with('X')
    }
}

/// Parse a file name into a capture descriptor.
///
/// Tries the raw grammar first, then the metadata grammar. Names that match
/// neither are not capture contributions and yield `None`. Matching is
/// case-sensitive throughout.
pub fn parse(filename: &str) -> Option<CaptureFile> {
    if let Some(m) = RAW_NAME.captures(filename) {
        return Some(CaptureFile {
            kind: FileKind::Raw,
            data_type: m[1].to_string(),
            capture_number: m[2].to_string(),
            is_test: m.get(3).is_some(),
            project_name: m[4].to_string(),
            sensor_code: m[5].to_string(),
            session_id: m[6].to_string(),
        });
    }

    let m = METADATA_NAME.captures(filename)?;
    Some(CaptureFile {
        kind: FileKind::Metadata,
        data_type: "EAD".to_string(),
        capture_number: m[1].to_string(),
        is_test: false,
        project_name: m[2].to_string(),
        sensor_code: String::new(),
        session_id: m[3].to_string(),
    })
}
