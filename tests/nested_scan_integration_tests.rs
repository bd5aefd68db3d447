//! Integration tests for nested container expansion
//!
//! These tests verify that the scan pipeline correctly:
//! - Expands zip/tar/gzip containers into derived objects
//! - Keeps every derived object independently readable by address alone
//! - Stays idempotent across repeated scans of the same address
//! - Respects recursion depth limits

use evidence_analyzer::storage::CaseStore;
use evidence_analyzer::{
    AnalysisEngine, Dictionary, EngineConfig, MemoryCase, ScanStatus, Selection, VirtualAddress,
};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Cursor, Read, Write};
use std::sync::Arc;
use zip::write::SimpleFileOptions;

/// Helper to create a ZIP archive in memory
fn build_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, content) in files {
        zip.start_file(*name, options).unwrap();
        zip.write_all(content).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// Helper to create a TAR archive in memory
fn build_tar(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_uid(1000);
        header.set_gid(1000);
        header.set_mtime(1_700_000_000);
        header.set_cksum();
        builder.append_data(&mut header, *name, *content).unwrap();
    }
    builder.into_inner().unwrap()
}

/// Helper to gzip bytes, optionally with an embedded original filename
fn build_gzip(content: &[u8], embedded_name: Option<&str>) -> Vec<u8> {
    let writer = Vec::new();
    let mut builder = flate2::GzBuilder::new();
    if let Some(name) = embedded_name {
        builder = builder.filename(name);
    }
    let mut encoder = builder.write(writer, Compression::default());
    encoder.write_all(content).unwrap();
    encoder.finish().unwrap()
}

fn engine_with(store: Arc<MemoryCase>, config: EngineConfig, words: &[&str]) -> AnalysisEngine {
    let dictionary = Dictionary::from_words(words.iter().copied()).unwrap();
    AnalysisEngine::new(config, store as Arc<dyn CaseStore>, dictionary).unwrap()
}

fn read_address(engine: &AnalysisEngine, address: &str) -> Vec<u8> {
    let mut stream = engine.open(address).unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).unwrap();
    out
}

#[test]
fn test_zip_scan_yields_one_derived_object_per_member() {
    let payload_a = b"jpeg bytes here".repeat(100);
    let payload_b = b"second member".to_vec();
    let zip_bytes = build_zip(&[("photos/a.jpg", &payload_a), ("b.txt", &payload_b)]);

    let store = Arc::new(MemoryCase::new());
    let root = store.add_evidence("img0", zip_bytes.clone()).unwrap();
    let engine = engine_with(store.clone(), EngineConfig::default(), &["nothing"]);

    let stats = engine.scan("img0", &Selection::defaults()).unwrap();
    assert_eq!(stats.children_registered, 2);

    let children = store.derived_children(&root).unwrap();
    assert_eq!(children.len(), 2);

    // Reference extraction: the zip crate itself
    let mut reference = zip::ZipArchive::new(Cursor::new(zip_bytes)).unwrap();
    for (index, expected) in [payload_a.as_slice(), payload_b.as_slice()]
        .into_iter()
        .enumerate()
    {
        let member = reference.by_index_raw(index).unwrap();
        let expected_address = format!(
            "img0|Z{}:{}",
            member.header_start(),
            member.compressed_size()
        );
        let child = children
            .iter()
            .find(|c| c.address.to_string() == expected_address)
            .unwrap_or_else(|| panic!("missing derived object at {}", expected_address));
        assert_eq!(child.attrs.size, expected.len() as u64);

        // Independently readable, byte-identical to reference extraction
        assert_eq!(read_address(&engine, &expected_address), expected);
    }

    let names: Vec<&str> = children.iter().map(|c| c.display_name.as_str()).collect();
    assert!(names.contains(&"photos/a.jpg"));
    assert!(names.contains(&"b.txt"));
}

#[test]
fn test_nested_tar_gz_inside_zip_expands_recursively() {
    // img0 (zip) -> logs.tar.gz (gzip) -> logs.tar (tar) -> app.log
    let log_payload = b"2024-01-01 INFO deeply nested evidence\n".repeat(30);
    let tar_bytes = build_tar(&[("app.log", &log_payload)]);
    let targz_bytes = build_gzip(&tar_bytes, None);
    let zip_bytes = build_zip(&[("logs.tar.gz", &targz_bytes)]);

    let store = Arc::new(MemoryCase::new());
    let root = store.add_evidence("img0", zip_bytes).unwrap();
    let engine = engine_with(store.clone(), EngineConfig::default(), &["nothing"]);

    engine.scan("img0", &Selection::defaults()).unwrap();

    // Level 1: the zip member
    let level1 = store.derived_children(&root).unwrap();
    assert_eq!(level1.len(), 1);
    assert_eq!(level1[0].display_name, "logs.tar.gz");

    // Level 2: the gzip single child, named by stripping the .gz suffix
    let level2 = store.derived_children(&level1[0].address).unwrap();
    assert_eq!(level2.len(), 1);
    assert_eq!(level2[0].display_name, "logs.tar");
    assert_eq!(level2[0].attrs.size, tar_bytes.len() as u64);

    // Level 3: the tar member, with unix attributes from the header
    let level3 = store.derived_children(&level2[0].address).unwrap();
    assert_eq!(level3.len(), 1);
    assert_eq!(level3[0].display_name, "app.log");
    assert_eq!(level3[0].attrs.uid, Some(1000));
    assert_eq!(level3[0].attrs.mode, Some(0o644));

    // The innermost object is readable purely from its address chain
    let innermost = level3[0].address.to_string();
    assert_eq!(read_address(&engine, &innermost), log_payload);

    // Address chain has the expected driver specifiers
    let parsed: VirtualAddress = innermost.parse().unwrap();
    let specifiers: Vec<char> = parsed.steps().iter().map(|s| s.specifier).collect();
    assert_eq!(specifiers, vec!['Z', 'G', 'T']);
}

#[test]
fn test_rescan_is_idempotent() {
    let zip_bytes = build_zip(&[("a.txt", b"alpha"), ("b.txt", b"bravo")]);
    let store = Arc::new(MemoryCase::new());
    let root = store.add_evidence("img0", zip_bytes).unwrap();
    let engine = engine_with(store.clone(), EngineConfig::default(), &["alpha"]);

    engine.scan("img0", &Selection::defaults()).unwrap();
    let children_first = store.derived_children(&root).unwrap();
    let hits_first = store.all_hits();

    // Second scan: markers make every (definition, address) pair a no-op
    let stats = engine.scan("img0", &Selection::defaults()).unwrap();
    assert_eq!(stats.children_registered, 0);

    assert_eq!(store.derived_children(&root).unwrap(), children_first);
    assert_eq!(store.all_hits().len(), hits_first.len());
}

#[test]
fn test_gzip_child_naming_preferences() {
    let store = Arc::new(MemoryCase::new());

    // (a) embedded FNAME wins
    let with_name = build_gzip(b"content-a", Some("original.log"));
    store.add_evidence("gz-a", with_name).unwrap();
    // (b) no FNAME: parent display name minus the .gz suffix
    let without_name = build_gzip(b"content-b", None);
    store.add_evidence("app.log.gz", without_name.clone()).unwrap();
    // (c) no FNAME, no recognizable suffix: fixed placeholder
    store.add_evidence("blob", without_name).unwrap();

    let engine = engine_with(store.clone(), EngineConfig::default(), &["nothing"]);
    for root in ["gz-a", "app.log.gz", "blob"] {
        engine.scan(root, &Selection::defaults()).unwrap();
    }

    let name_of = |root: &str| {
        let parent = VirtualAddress::root(root).unwrap();
        let children = store.derived_children(&parent).unwrap();
        assert_eq!(children.len(), 1, "expected one gzip child for {}", root);
        children[0].display_name.clone()
    };

    assert_eq!(name_of("gz-a"), "original.log");
    assert_eq!(name_of("app.log.gz"), "app.log");
    assert_eq!(name_of("blob"), "data");
}

#[test]
fn test_resource_guard_skips_fragmented_object() {
    let zip_bytes = build_zip(&[("a.txt", b"alpha")]);
    let store = Arc::new(MemoryCase::new());
    let root = store.add_evidence("img0", zip_bytes).unwrap();
    store.set_evidence_extents("img0", 1_000_000);

    let engine = engine_with(store.clone(), EngineConfig::default(), &["nothing"]);
    let stats = engine.scan("img0", &Selection::defaults()).unwrap();

    // Skipped before any instance was created: no children, no markers burned
    assert_eq!(stats.objects_skipped, 1);
    assert!(store.derived_children(&root).unwrap().is_empty());
    assert_eq!(
        store.scan_status("zip", &root).unwrap(),
        Some(ScanStatus::Skipped)
    );
    assert!(store.try_mark_scanned("zip", &root).unwrap());
}

#[test]
fn test_depth_cap_stops_expansion() {
    // Three levels of zip nesting with a depth cap of 1
    let innermost = build_zip(&[("core.txt", b"bottom")]);
    let middle = build_zip(&[("inner.zip", &innermost)]);
    let outer = build_zip(&[("middle.zip", &middle)]);

    let store = Arc::new(MemoryCase::new());
    let root = store.add_evidence("img0", outer).unwrap();

    let config = EngineConfig {
        max_depth: 1,
        ..Default::default()
    };
    let engine = engine_with(store.clone(), config, &["nothing"]);
    engine.scan("img0", &Selection::defaults()).unwrap();

    // Depth 1 (middle.zip) was scanned and registered its child record
    let level1 = store.derived_children(&root).unwrap();
    assert_eq!(level1.len(), 1);
    let level2 = store.derived_children(&level1[0].address).unwrap();
    assert_eq!(level2.len(), 1);

    // Depth 2 (inner.zip) was never scanned: no marker, no children
    let inner_addr = &level2[0].address;
    assert!(store.scan_status("zip", inner_addr).unwrap().is_none());
    assert!(store.derived_children(inner_addr).unwrap().is_empty());
}

#[test]
fn test_index_hits_decode_back_to_object_offsets() {
    let mut body = vec![b'.'; 4096];
    body[1000..1007].copy_from_slice(b"invoice");
    body[3000..3007].copy_from_slice(b"invoice");

    let store = Arc::new(MemoryCase::new());
    store.add_evidence("doc0", body).unwrap();
    let engine = engine_with(store.clone(), EngineConfig::default(), &["invoice"]);

    engine.scan("doc0", &Selection::defaults()).unwrap();

    let hits = store.all_hits();
    assert_eq!(hits.len(), 2);

    let decoder = engine.offset_decoder();
    let expected = VirtualAddress::root("doc0").unwrap();
    let mut offsets: Vec<u64> = hits
        .iter()
        .map(|hit| {
            let (address, local) = decoder.decode(hit.encoded_offset).unwrap();
            assert_eq!(address, expected);
            local
        })
        .collect();
    offsets.sort_unstable();
    assert_eq!(offsets, vec![1000, 3000]);
}

#[test]
fn test_members_inside_containers_are_indexed() {
    // The keyword lives inside a zip member; hits must decode to the
    // derived object's own address, at the member-relative offset
    let mut member = vec![b' '; 600];
    member[200..206].copy_from_slice(b"wire77");
    let zip_bytes = build_zip(&[("note.txt", &member)]);

    let store = Arc::new(MemoryCase::new());
    let root = store.add_evidence("img0", zip_bytes).unwrap();
    let engine = engine_with(store.clone(), EngineConfig::default(), &["wire77"]);

    engine.scan("img0", &Selection::defaults()).unwrap();

    let child = &store.derived_children(&root).unwrap()[0];
    let decoder = engine.offset_decoder();

    let decoded: Vec<(VirtualAddress, u64)> = store
        .all_hits()
        .iter()
        .map(|h| decoder.decode(h.encoded_offset).unwrap())
        .collect();
    assert!(decoded.contains(&(child.address.clone(), 200)));
}

#[test]
fn test_scan_roots_fans_out_over_workers() {
    let store = Arc::new(MemoryCase::new());
    store
        .add_evidence("img0", build_zip(&[("a.txt", b"alpha")]))
        .unwrap();
    store
        .add_evidence("img1", build_zip(&[("b.txt", b"bravo")]))
        .unwrap();

    let config = EngineConfig {
        workers: 2,
        ..Default::default()
    };
    let engine = engine_with(store.clone(), config, &["nothing"]);

    let outcomes = engine
        .scan_roots(
            &["img0".to_string(), "img1".to_string()],
            &Selection::defaults(),
        )
        .unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.ok));

    for root in ["img0", "img1"] {
        let parent = VirtualAddress::root(root).unwrap();
        assert_eq!(store.derived_children(&parent).unwrap().len(), 1);
    }
}

#[test]
fn test_group_selection_resolves_with_dependencies() {
    let store = Arc::new(MemoryCase::new());
    let engine = engine_with(store, EngineConfig::default(), &["x"]);

    let train = engine
        .registry()
        .resolve(&Selection::empty().select_group("containers"))
        .unwrap();
    let names: Vec<&str> = train.iter().map(|d| d.name).collect();

    // The container group pulls in its "type" dependency, ordered first
    assert_eq!(names, vec!["type", "zip", "tar", "gzip"]);
}

#[test]
fn test_malformed_container_leaves_no_children() {
    // Valid zip magic but corrupt body: the zip instance fails in finish,
    // sibling scanners and the index still complete
    let mut bytes = b"PK\x03\x04".to_vec();
    bytes.extend_from_slice(&[0xFF; 200]);

    let store = Arc::new(MemoryCase::new());
    let root = store.add_evidence("img0", bytes).unwrap();
    let engine = engine_with(store.clone(), EngineConfig::default(), &["nothing"]);

    let stats = engine.scan("img0", &Selection::defaults()).unwrap();
    assert_eq!(stats.children_registered, 0);

    assert!(store.derived_children(&root).unwrap().is_empty());
    assert_eq!(
        store.scan_status("zip", &root).unwrap(),
        Some(ScanStatus::Failed)
    );
    // Siblings in the same train were not aborted
    assert_eq!(
        store.scan_status("index", &root).unwrap(),
        Some(ScanStatus::Done)
    );
    assert_eq!(
        store.scan_status("type", &root).unwrap(),
        Some(ScanStatus::Done)
    );
}
