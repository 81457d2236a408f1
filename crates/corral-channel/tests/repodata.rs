use corral_channel::repodata::parse_repodata;
use corral_core::channel::Channel;

fn channel() -> Channel {
    Channel::resolve("/srv/channels/local", "https://conda.anaconda.org", 5)
}

const REPODATA: &str = r#"{
  "info": {"subdir": "linux-64"},
  "packages": {
    "zlib-1.2.13-h0_0.tar.bz2": {"name": "zlib", "version": "1.2.13", "build": "h0_0", "build_number": 0, "depends": []},
    "zlib-1.3-h0_0.tar.bz2":    {"name": "zlib", "version": "1.3", "build": "h0_0", "build_number": 0, "depends": []},
    "broken-1.0-0.tar.bz2":     {"name": "broken", "version": "1.0", "build": "0", "depends": ["dep >="]},
    "gone-1.0-0.tar.bz2":       {"name": "gone", "version": "1.0", "build": "0"}
  },
  "packages.conda": {
    "zlib-1.3-h0_0.conda": {"name": "zlib", "version": "1.3", "build": "h0_0", "build_number": 0, "depends": [], "timestamp": 1700000000000}
  },
  "removed": ["gone-1.0-0.tar.bz2"]
}"#;

#[test]
fn conda_entries_shadow_tar_bz2() {
    let parsed = parse_repodata(REPODATA.as_bytes(), &channel(), "linux-64", false).unwrap();
    let zlib13: Vec<_> = parsed
        .records
        .iter()
        .filter(|r| r.name == "zlib" && r.version.to_string() == "1.3")
        .collect();
    assert_eq!(zlib13.len(), 1);
    assert_eq!(zlib13[0].file_name.as_deref(), Some("zlib-1.3-h0_0.conda"));
    assert_eq!(zlib13[0].timestamp, Some(1_700_000_000_000));
}

#[test]
fn use_only_tar_bz2_ignores_conda_entries() {
    let parsed = parse_repodata(REPODATA.as_bytes(), &channel(), "linux-64", true).unwrap();
    assert!(parsed
        .records
        .iter()
        .all(|r| r.file_name.as_deref().is_some_and(|f| f.ends_with(".tar.bz2"))));
    assert_eq!(parsed.records.iter().filter(|r| r.name == "zlib").count(), 2);
}

#[test]
fn malformed_records_are_skipped() {
    let parsed = parse_repodata(REPODATA.as_bytes(), &channel(), "linux-64", false).unwrap();
    assert_eq!(parsed.skipped, 1);
    assert!(parsed.records.iter().all(|r| r.name != "broken"));
}

#[test]
fn removed_entries_are_dropped() {
    let parsed = parse_repodata(REPODATA.as_bytes(), &channel(), "linux-64", false).unwrap();
    assert!(parsed.records.iter().all(|r| r.name != "gone"));
}

#[test]
fn records_carry_channel_metadata() {
    let parsed = parse_repodata(REPODATA.as_bytes(), &channel(), "linux-64", false).unwrap();
    let rec = &parsed.records[0];
    assert_eq!(rec.channel, "local");
    assert_eq!(rec.priority, 5);
    assert_eq!(rec.subdir.as_deref(), Some("linux-64"));
    assert!(rec
        .url
        .as_deref()
        .is_some_and(|u| u.starts_with("file:///srv/channels/local/linux-64/")));
}

#[test]
fn invalid_json_is_a_channel_error() {
    let err = parse_repodata(b"not json", &channel(), "noarch", false).unwrap_err();
    assert!(err.to_string().starts_with("Channel error"), "{err}");
}

#[test]
fn empty_document_has_no_records() {
    let parsed = parse_repodata(b"{}", &channel(), "noarch", false).unwrap();
    assert!(parsed.records.is_empty());
    assert_eq!(parsed.skipped, 0);
}
