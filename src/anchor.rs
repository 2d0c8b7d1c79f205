//! Anchor file: a small textual file carrying the archive-wide metadata
//! needed to reopen it (spec §6.4). Written once by the master at
//! `Close(Write)`; parsed first at `Open(Read)`.

use std::collections::BTreeMap;
use std::io::Write as _;

use crate::error::{TraceError, TraceResult};
use crate::substrate::SubstrateKind;

/// Trace-format version written by this crate; readers accept up to
/// [`crate::limits::MAX_TRACE_FORMAT_VERSION`] (spec §6.5).
pub const TRACE_FORMAT_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct Anchor {
    pub archive_name: String,
    pub machine: String,
    pub description: String,
    pub creator: String,
    pub version: String,
    pub trace_format_version: u32,
    pub substrate: SubstrateKind,
    pub compressed: bool,
    pub event_chunk_size: u64,
    pub def_chunk_size: u64,
    pub n_locations: u64,
    pub n_global_defs: u64,
    pub trace_id: u64,
    pub n_snapshots: u64,
    pub n_thumbnails: u64,
    pub properties: BTreeMap<String, String>,
}

fn substrate_tag(kind: SubstrateKind) -> &'static str {
    match kind {
        SubstrateKind::Posix => "posix",
        SubstrateKind::Sion => "sion",
        SubstrateKind::Null => "null",
    }
}

fn substrate_from_tag(tag: &str) -> TraceResult<SubstrateKind> {
    match tag {
        "posix" => Ok(SubstrateKind::Posix),
        "sion" => Ok(SubstrateKind::Sion),
        "null" => Ok(SubstrateKind::Null),
        other => Err(TraceError::integrity(format!("anchor file names unknown substrate {other:?}"))),
    }
}

impl Anchor {
    /// Serializes as `key: value` lines, one per field, properties last
    /// under a `property.<name>:` prefix.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let mut line = |k: &str, v: &dyn std::fmt::Display| out.push_str(&format!("{k}: {v}\n"));
        line("archive_name", &self.archive_name);
        line("machine", &self.machine);
        line("description", &self.description);
        line("creator", &self.creator);
        line("version", &self.version);
        line("trace_format_version", &self.trace_format_version);
        line("substrate", &substrate_tag(self.substrate));
        line("compressed", &self.compressed);
        line("event_chunk_size", &self.event_chunk_size);
        line("def_chunk_size", &self.def_chunk_size);
        line("n_locations", &self.n_locations);
        line("n_global_defs", &self.n_global_defs);
        line("trace_id", &self.trace_id);
        line("n_snapshots", &self.n_snapshots);
        line("n_thumbnails", &self.n_thumbnails);
        for (k, v) in &self.properties {
            out.push_str(&format!("property.{k}: {v}\n"));
        }
        out
    }

    pub fn from_text(text: &str) -> TraceResult<Self> {
        let mut fields: BTreeMap<String, String> = BTreeMap::new();
        let mut properties = BTreeMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| TraceError::integrity(format!("malformed anchor line {line:?}")))?;
            let (key, value) = (key.trim(), value.trim());
            if let Some(name) = key.strip_prefix("property.") {
                properties.insert(name.to_string(), value.to_string());
            } else {
                fields.insert(key.to_string(), value.to_string());
            }
        }
        let get = |k: &str| -> TraceResult<String> {
            fields
                .get(k)
                .cloned()
                .ok_or_else(|| TraceError::integrity(format!("anchor file is missing field {k:?}")))
        };
        let parse_u64 = |k: &str, raw: &str| -> TraceResult<u64> {
            raw.parse()
                .map_err(|_| TraceError::integrity(format!("anchor field {k:?} is not a valid integer")))
        };
        let trace_format_version: u32 = get("trace_format_version")?
            .parse()
            .map_err(|_| TraceError::integrity("anchor field trace_format_version is not a valid integer".into()))?;
        if trace_format_version > crate::limits::MAX_TRACE_FORMAT_VERSION {
            return Err(TraceError::integrity(format!(
                "archive trace format version {trace_format_version} exceeds the maximum this reader accepts ({})",
                crate::limits::MAX_TRACE_FORMAT_VERSION
            )));
        }
        Ok(Anchor {
            archive_name: get("archive_name")?,
            machine: get("machine")?,
            description: get("description")?,
            creator: get("creator")?,
            version: get("version")?,
            trace_format_version,
            substrate: substrate_from_tag(&get("substrate")?)?,
            compressed: get("compressed")? == "true",
            event_chunk_size: parse_u64("event_chunk_size", &get("event_chunk_size")?)?,
            def_chunk_size: parse_u64("def_chunk_size", &get("def_chunk_size")?)?,
            n_locations: parse_u64("n_locations", &get("n_locations")?)?,
            n_global_defs: parse_u64("n_global_defs", &get("n_global_defs")?)?,
            trace_id: parse_u64("trace_id", &get("trace_id")?)?,
            n_snapshots: parse_u64("n_snapshots", &get("n_snapshots")?)?,
            n_thumbnails: parse_u64("n_thumbnails", &get("n_thumbnails")?)?,
            properties,
        })
    }

    pub fn write_to(&self, path: &std::path::Path) -> TraceResult<()> {
        let mut f = std::fs::File::create(path)?;
        f.write_all(self.to_text().as_bytes())?;
        Ok(())
    }

    pub fn read_from(path: &std::path::Path) -> TraceResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_text(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> Anchor {
        let mut properties = BTreeMap::new();
        properties.insert("site".to_string(), "lab-a".to_string());
        Anchor {
            archive_name: "trace".to_string(),
            machine: "cluster-7".to_string(),
            description: "benchmark run".to_string(),
            creator: "tracefmt".to_string(),
            version: "1.0".to_string(),
            trace_format_version: TRACE_FORMAT_VERSION,
            substrate: SubstrateKind::Posix,
            compressed: true,
            event_chunk_size: 1 << 20,
            def_chunk_size: 1 << 18,
            n_locations: 4,
            n_global_defs: 12,
            trace_id: 0xdead_beef,
            n_snapshots: 0,
            n_thumbnails: 0,
            properties,
        }
    }

    #[test]
    fn text_round_trip_preserves_every_field() {
        let anchor = sample();
        let parsed = Anchor::from_text(&anchor.to_text()).unwrap();
        assert_eq!(parsed, anchor);
    }

    #[test]
    fn file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trace.anchor");
        let anchor = sample();
        anchor.write_to(&path).unwrap();
        let parsed = Anchor::read_from(&path).unwrap();
        assert_eq!(parsed, anchor);
    }

    #[test]
    fn rejects_a_trace_format_version_above_the_maximum() {
        let mut anchor = sample();
        anchor.trace_format_version = crate::limits::MAX_TRACE_FORMAT_VERSION + 1;
        let err = Anchor::from_text(&anchor.to_text()).unwrap_err();
        assert!(matches!(err, TraceError::Integrity(_)));
    }
}
