use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use corral_channel::cache::RepodataCache;
use corral_channel::loader::{load_channels, LoadOptions};
use corral_core::channel::Channel;
use tempfile::TempDir;

const ALIAS: &str = "https://conda.anaconda.org";

fn write_repodata(root: &Path, subdir: &str, body: &str) {
    let dir = root.join(subdir);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("repodata.json"), body).unwrap();
}

fn options(cache: &Path) -> LoadOptions {
    LoadOptions {
        subdirs: vec!["linux-64".to_string(), "noarch".to_string()],
        use_only_tar_bz2: false,
        concurrency: 2,
        cache_dir: cache.to_path_buf(),
        max_age: Duration::from_secs(60),
        offline: false,
        auth: BTreeMap::new(),
    }
}

#[tokio::test]
async fn loads_local_channels_in_order() {
    let tmp = TempDir::new().unwrap();
    let first = tmp.path().join("first");
    let second = tmp.path().join("second");
    write_repodata(
        &first,
        "linux-64",
        r#"{"packages": {"a-1.0-0.tar.bz2": {"name": "a", "version": "1.0", "build": "0"}}}"#,
    );
    write_repodata(
        &first,
        "noarch",
        r#"{"packages": {"b-1.0-0.tar.bz2": {"name": "b", "version": "1.0", "build": "0"}}}"#,
    );
    write_repodata(
        &second,
        "noarch",
        r#"{"packages": {"a-2.0-0.tar.bz2": {"name": "a", "version": "2.0", "build": "0"}}}"#,
    );

    let refs = vec![
        first.to_string_lossy().into_owned(),
        second.to_string_lossy().into_owned(),
    ];
    let channels = Channel::resolve_all(&refs, ALIAS);
    let data = load_channels(&channels, &options(&tmp.path().join("cache")))
        .await
        .unwrap();

    assert_eq!(data.len(), 2);
    assert_eq!(data[0].channel.name, "first");
    let names: Vec<&str> = data[0].records.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b"]);
    assert_eq!(data[1].records.len(), 1);
    assert!(data[0].records[0].priority > data[1].records[0].priority);
}

#[tokio::test]
async fn missing_channel_directory_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let refs = vec![tmp.path().join("nope").to_string_lossy().into_owned()];
    let channels = Channel::resolve_all(&refs, ALIAS);
    let err = load_channels(&channels, &options(&tmp.path().join("cache")))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("does not exist"), "{err}");
}

#[tokio::test]
async fn offline_remote_channel_uses_cache() {
    let tmp = TempDir::new().unwrap();
    let cache_dir = tmp.path().join("cache");
    let channel = Channel::resolve("https://example.invalid/private", ALIAS, 1);
    let cache = RepodataCache::new(&cache_dir);
    cache
        .put(
            &channel.repodata_url("noarch"),
            br#"{"packages": {"c-1.0-0.tar.bz2": {"name": "c", "version": "1.0", "build": "0"}}}"#,
        )
        .unwrap();

    let mut opts = options(&cache_dir);
    opts.offline = true;
    let data = load_channels(&[channel], &opts).await.unwrap();
    assert_eq!(data[0].records.len(), 1);
    assert_eq!(data[0].records[0].name, "c");
}

#[tokio::test]
async fn fresh_cache_avoids_network() {
    let tmp = TempDir::new().unwrap();
    let cache_dir = tmp.path().join("cache");
    let channel = Channel::resolve("https://example.invalid/cached", ALIAS, 1);
    let cache = RepodataCache::new(&cache_dir);
    for subdir in ["linux-64", "noarch"] {
        cache.put(&channel.repodata_url(subdir), b"{}").unwrap();
    }
    let data = load_channels(&[channel], &options(&cache_dir)).await.unwrap();
    assert!(data[0].records.is_empty());
}
