use std::fs;
use std::path::{Path, PathBuf};

use bagkit::bagit::{Bag, DigestAlgorithm, Error, SerializationFormat};
use tempfile::TempDir;

fn bag_root(temp: &TempDir) -> PathBuf {
    temp.path().join("test-bag")
}

fn write_src_file(temp: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = temp.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

#[test]
fn fresh_bag_materializes_minimal_structure() {
    let temp = TempDir::new().unwrap();
    let root = bag_root(&temp);

    let mut bag = Bag::create(&root).unwrap();
    bag.update().unwrap();

    assert_eq!(
        "BagIt-Version: 1.0\nTag-File-Character-Encoding: UTF-8\n",
        read(&root.join("bagit.txt"))
    );
    assert_eq!("", read(&root.join("manifest-sha512.txt")));
    assert!(root.join("data").is_dir());
    assert!(fs::read_dir(root.join("data")).unwrap().next().is_none());
    assert!(!root.join("bag-info.txt").exists());
    assert!(!root.join("tagmanifest-sha512.txt").exists());

    assert!(bag.validate().unwrap());
    assert!(bag.errors().is_empty());
}

#[test]
fn create_rejects_existing_directories() {
    let temp = TempDir::new().unwrap();
    assert!(matches!(
        Bag::create(temp.path()),
        Err(Error::FileAlreadyExists { .. })
    ));
}

#[test]
fn added_files_are_manifested_and_verified() {
    let temp = TempDir::new().unwrap();
    let root = bag_root(&temp);
    let src = write_src_file(&temp, "greeting.txt", "hello\n");

    let mut bag = Bag::create(&root).unwrap();
    bag.add_file(&src, "greeting.txt").unwrap();
    bag.update().unwrap();

    let expected = DigestAlgorithm::Sha512
        .hash_file(root.join("data/greeting.txt"))
        .unwrap();
    assert_eq!(
        format!("{expected}  data/greeting.txt\n"),
        read(&root.join("manifest-sha512.txt"))
    );

    assert!(bag.validate().unwrap());
}

#[test]
fn on_disk_mutation_is_detected_without_update() {
    let temp = TempDir::new().unwrap();
    let root = bag_root(&temp);
    let src = write_src_file(&temp, "greeting.txt", "hello\n");

    let mut bag = Bag::create(&root).unwrap();
    bag.add_file(&src, "data/greeting.txt").unwrap();
    bag.update().unwrap();

    fs::write(root.join("data/greeting.txt"), "HELLO\n").unwrap();

    assert!(!bag.validate().unwrap());
    assert_eq!(1, bag.errors().len());

    let message = bag.errors()[0].message();
    assert!(message.starts_with("data/greeting.txt calculated hash ("));
    assert!(message.contains(") does not match manifest ("));
}

#[test]
fn update_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let root = bag_root(&temp);
    let src = write_src_file(&temp, "a.txt", "payload a\n");

    let mut bag = Bag::create(&root).unwrap();
    bag.add_file(&src, "a.txt").unwrap();
    bag.add_bag_info_tag("Source-Organization", "Example Org").unwrap();
    bag.update().unwrap();

    let first: Vec<(String, String)> = list_files(&root);
    bag.update().unwrap();
    let second: Vec<(String, String)> = list_files(&root);

    assert_eq!(first, second);
}

fn list_files(root: &Path) -> Vec<(String, String)> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(root) {
        let entry = entry.unwrap();
        if entry.file_type().is_file() {
            files.push((
                entry.path().display().to_string(),
                fs::read_to_string(entry.path()).unwrap(),
            ));
        }
    }
    files.sort();
    files
}

#[test]
fn updated_bags_reload_to_the_same_state() {
    let temp = TempDir::new().unwrap();
    let root = bag_root(&temp);
    let src_a = write_src_file(&temp, "a.txt", "payload a\n");
    let src_b = write_src_file(&temp, "b.txt", "payload b\n");

    let mut bag = Bag::create(&root).unwrap();
    bag.add_file(&src_a, "a.txt").unwrap();
    bag.add_file(&src_b, "sub/b.txt").unwrap();
    bag.add_algorithm(DigestAlgorithm::Sha256).unwrap();
    bag.add_bag_info_tag("Source-Organization", "Example Org").unwrap();
    bag.add_bag_info_tag("Contact-Name", "Somebody").unwrap();
    bag.update().unwrap();

    let reloaded = Bag::load(&root).unwrap();

    assert!(reloaded.errors().is_empty());
    assert_eq!(bag.version(), reloaded.version());
    assert_eq!("UTF-8", reloaded.encoding().name());
    assert_eq!(bag.is_extended(), reloaded.is_extended());
    assert_eq!(bag.algorithms(), reloaded.algorithms());
    assert_eq!(
        vec!["Example Org"],
        reloaded.bag_info().get_values("Source-Organization")
    );
    assert_eq!(
        bag.payload_manifest(DigestAlgorithm::Sha512)
            .unwrap()
            .entries(),
        reloaded
            .payload_manifest(DigestAlgorithm::Sha512)
            .unwrap()
            .entries()
    );
    assert_eq!(
        bag.payload_manifest(DigestAlgorithm::Sha256)
            .unwrap()
            .entries(),
        reloaded
            .payload_manifest(DigestAlgorithm::Sha256)
            .unwrap()
            .entries()
    );
}

#[test]
fn payload_oxum_counts_bytes_and_files() {
    let temp = TempDir::new().unwrap();
    let root = bag_root(&temp);
    let src_a = write_src_file(&temp, "a.txt", "123456");
    let src_b = write_src_file(&temp, "b.txt", "789");

    let mut bag = Bag::create(&root).unwrap();
    bag.add_file(&src_a, "a.txt").unwrap();
    bag.add_file(&src_b, "b.txt").unwrap();
    bag.set_extended(true);
    bag.update().unwrap();

    let info = read(&root.join("bag-info.txt"));
    assert!(info.contains("Payload-Oxum: 9.2"));
    assert!(info.contains("Bag-Size: 9.00 B"));
    assert!(info.contains("Bagging-Date: "));
}

#[test]
fn extended_bags_write_tag_manifests_that_skip_themselves() {
    let temp = TempDir::new().unwrap();
    let root = bag_root(&temp);
    let src = write_src_file(&temp, "a.txt", "payload\n");
    let tag_src = write_src_file(&temp, "custom.txt", "tag data\n");

    let mut bag = Bag::create(&root).unwrap();
    bag.add_file(&src, "a.txt").unwrap();
    bag.add_tag_file(&tag_src, "meta/custom.txt").unwrap();
    bag.update().unwrap();

    let tag_manifest = read(&root.join("tagmanifest-sha512.txt"));
    assert!(tag_manifest.contains("bagit.txt"));
    assert!(tag_manifest.contains("bag-info.txt"));
    assert!(tag_manifest.contains("manifest-sha512.txt"));
    assert!(tag_manifest.contains("meta/custom.txt"));
    assert!(!tag_manifest.contains("tagmanifest"));

    assert!(bag.validate().unwrap());

    let mut reloaded = Bag::load(&root).unwrap();
    assert!(reloaded.is_extended());
    assert!(reloaded.validate().unwrap());
}

#[test]
fn stray_tag_files_produce_a_warning() {
    let temp = TempDir::new().unwrap();
    let root = bag_root(&temp);

    let mut bag = Bag::create(&root).unwrap();
    bag.add_bag_info_tag("Source-Organization", "Example Org").unwrap();
    bag.update().unwrap();

    fs::write(root.join("stray.txt"), "not listed\n").unwrap();

    assert!(bag.validate().unwrap());
    assert!(bag.warnings().iter().any(|w| w.message()
        == "There are files on disk not listed in this manifest file."));
}

#[test]
fn tag_manifests_listing_tag_manifests_are_errors() {
    let temp = TempDir::new().unwrap();
    let root = bag_root(&temp);

    let mut bag = Bag::create(&root).unwrap();
    bag.add_bag_info_tag("Source-Organization", "Example Org").unwrap();
    bag.update().unwrap();

    let manifest = root.join("tagmanifest-sha512.txt");
    let mut content = read(&manifest);
    content.push_str("0000  tagmanifest-sha512.txt\n");
    fs::write(&manifest, content).unwrap();

    assert!(!bag.validate().unwrap());
    assert!(bag
        .errors()
        .iter()
        .any(|e| e.message().contains("MUST not list any tag files")));
}

#[test]
fn repeated_reserved_bag_info_tags_are_reported_on_load() {
    let temp = TempDir::new().unwrap();
    let root = bag_root(&temp);

    let mut bag = Bag::create(&root).unwrap();
    bag.set_extended(true);
    bag.update().unwrap();

    fs::write(
        root.join("bag-info.txt"),
        "Payload-Oxum: 0.0\nPayload-Oxum: 1.1\nBag-Size: 0 B\nBag-Size: 1 B\n",
    )
    .unwrap();

    let loaded = Bag::load(&root).unwrap();

    assert!(loaded
        .errors()
        .iter()
        .any(|e| e.message() == "Tag Payload-Oxum MUST not be repeated."));
    assert!(loaded
        .warnings()
        .iter()
        .any(|w| w.message() == "Tag Bag-Size SHOULD not be repeated."));
}

#[test]
fn removing_the_last_algorithm_is_rejected() {
    let temp = TempDir::new().unwrap();
    let root = bag_root(&temp);

    let mut bag = Bag::create(&root).unwrap();
    bag.set_algorithm(DigestAlgorithm::Sha256).unwrap();

    let result = bag.remove_algorithm(DigestAlgorithm::Sha256);
    match result {
        Err(Error::LastAlgorithm { .. }) => (),
        other => panic!("expected LastAlgorithm error, got {other:?}"),
    }
    assert_eq!(
        "Cannot remove last payload algorithm from the bag",
        bag.remove_algorithm(DigestAlgorithm::Sha256)
            .unwrap_err()
            .to_string()
    );
}

#[test]
fn reserved_basenames_are_rejected_on_every_platform() {
    let temp = TempDir::new().unwrap();
    let root = bag_root(&temp);
    let src = write_src_file(&temp, "a.txt", "x");

    let mut bag = Bag::create(&root).unwrap();

    for dest in ["data/CON", "data/sub/lpt5", "NUL"] {
        assert!(
            matches!(
                bag.add_file(&src, dest),
                Err(Error::ReservedFilename { .. })
            ),
            "{dest} should be rejected"
        );
    }
}

#[test]
fn destinations_escaping_the_bag_are_rejected() {
    let temp = TempDir::new().unwrap();
    let root = bag_root(&temp);
    let src = write_src_file(&temp, "a.txt", "x");

    let mut bag = Bag::create(&root).unwrap();

    assert!(matches!(
        bag.add_file(&src, "data/../../escape.txt"),
        Err(Error::PathOutsideBag { .. })
    ));
    assert!(matches!(
        bag.add_tag_file(&src, "../outside.txt"),
        Err(Error::PathOutsideBag { .. })
    ));
}

#[test]
fn tag_files_cannot_shadow_reserved_names() {
    let temp = TempDir::new().unwrap();
    let root = bag_root(&temp);
    let src = write_src_file(&temp, "a.txt", "x");

    let mut bag = Bag::create(&root).unwrap();

    for dest in [
        "bagit.txt",
        "bag-info.txt",
        "fetch.txt",
        "manifest-md5.txt",
        "tagmanifest-md5.txt",
        "data/inside.txt",
    ] {
        assert!(
            matches!(
                bag.add_tag_file(&src, dest),
                Err(Error::ReservedFilename { .. })
            ),
            "{dest} should be rejected"
        );
    }
}

#[test]
fn create_file_and_remove_file_round_trip() {
    let temp = TempDir::new().unwrap();
    let root = bag_root(&temp);

    let mut bag = Bag::create(&root).unwrap();
    bag.create_file(b"generated content\n", "notes/deep/note.txt")
        .unwrap();

    let on_disk = root.join("data/notes/deep/note.txt");
    assert_eq!("generated content\n", read(&on_disk));

    assert!(matches!(
        bag.create_file(b"again", "notes/deep/note.txt"),
        Err(Error::FileAlreadyExists { .. })
    ));

    bag.remove_file("notes/deep/note.txt").unwrap();
    assert!(!on_disk.exists());
    assert!(!root.join("data/notes").exists());
    assert!(root.join("data").exists());
}

#[test]
fn fetch_rows_reserve_their_destinations() {
    let temp = TempDir::new().unwrap();
    let root = bag_root(&temp);
    let src = write_src_file(&temp, "a.txt", "x");

    let mut bag = Bag::create(&root).unwrap();
    bag.update().unwrap();

    fs::write(
        root.join("fetch.txt"),
        "http://example.org/remote.bin 42 data/remote.bin\n",
    )
    .unwrap();

    let mut loaded = Bag::load(&root).unwrap();
    assert!(loaded.is_extended());
    assert_eq!(1, loaded.fetch().unwrap().rows().len());

    assert!(matches!(
        loaded.add_file(&src, "remote.bin"),
        Err(Error::ReservedByFetch { .. })
    ));
}

#[test]
fn fetch_destinations_already_on_disk_are_not_downloaded() {
    let temp = TempDir::new().unwrap();
    let root = bag_root(&temp);
    let src = write_src_file(&temp, "a.bin", "remote bytes\n");

    let mut bag = Bag::create(&root).unwrap();
    bag.add_file(&src, "a.bin").unwrap();
    bag.update().unwrap();

    fs::write(
        root.join("fetch.txt"),
        "http://localhost:1/unreachable.bin - data/a.bin\n",
    )
    .unwrap();

    // The destination exists, so validation never touches the network
    let mut loaded = Bag::load(&root).unwrap();
    assert!(loaded.validate().unwrap());
}

#[test]
fn invalid_fetch_rows_fail_validation_without_downloading() {
    let temp = TempDir::new().unwrap();
    let root = bag_root(&temp);

    let mut bag = Bag::create(&root).unwrap();
    bag.update().unwrap();

    fs::write(
        root.join("fetch.txt"),
        "ftp://example.org/a.bin - data/a.bin\nhttp://example.org/b.bin - data/../../b.bin\n",
    )
    .unwrap();

    let mut loaded = Bag::load(&root).unwrap();
    assert!(!loaded.validate().unwrap());
    assert_eq!(2, loaded.errors().len());
}

#[test]
fn upgrade_replaces_md5_with_sha512() {
    let temp = TempDir::new().unwrap();
    let root = bag_root(&temp);

    fs::create_dir_all(root.join("data")).unwrap();
    fs::write(
        root.join("bagit.txt"),
        "BagIt-Version: 0.97\nTag-File-Character-Encoding: UTF-8\n",
    )
    .unwrap();
    fs::write(root.join("data/file.txt"), "hello\n").unwrap();
    fs::write(
        root.join("manifest-md5.txt"),
        "b1946ac92492d2347c6235b4d2611184  data/file.txt\n",
    )
    .unwrap();

    let mut bag = Bag::load(&root).unwrap();
    assert_eq!("0.97", bag.version().to_string());

    bag.upgrade().unwrap();

    assert_eq!("1.0", bag.version().to_string());
    assert!(!root.join("manifest-md5.txt").exists());
    assert!(root.join("manifest-sha512.txt").exists());
    assert!(read(&root.join("bagit.txt")).contains("BagIt-Version: 1.0"));

    let mut reloaded = Bag::load(&root).unwrap();
    assert_eq!(vec![DigestAlgorithm::Sha512], reloaded.algorithms());
    assert!(reloaded.validate().unwrap());
}

#[test]
fn upgrade_is_rejected_for_current_version_bags() {
    let temp = TempDir::new().unwrap();
    let root = bag_root(&temp);

    let mut bag = Bag::create(&root).unwrap();
    bag.update().unwrap();

    let mut loaded = Bag::load(&root).unwrap();
    assert!(matches!(
        loaded.upgrade(),
        Err(Error::UpgradeNotAllowed { .. })
    ));
}

#[test]
fn packaged_bags_load_and_validate() {
    let temp = TempDir::new().unwrap();
    let root = bag_root(&temp);
    let src = write_src_file(&temp, "a.txt", "payload a\n");

    let mut bag = Bag::create(&root).unwrap();
    bag.add_file(&src, "a.txt").unwrap();
    bag.add_bag_info_tag("Source-Organization", "Example Org").unwrap();

    for (archive_name, format) in [
        ("packaged.zip", SerializationFormat::Zip),
        ("packaged.tar.gz", SerializationFormat::TarGz),
        ("packaged.tar", SerializationFormat::Tar),
    ] {
        let archive = temp.path().join(archive_name);
        bag.package(&archive).unwrap();

        let mut unpacked = Bag::load(&archive).unwrap();
        assert_eq!(Some(format), unpacked.serialization());
        assert_eq!(
            vec!["Example Org"],
            unpacked.bag_info().get_values("Source-Organization")
        );
        assert!(unpacked.validate().unwrap(), "{archive_name} should validate");
    }
}

#[test]
fn unknown_archive_extensions_are_rejected() {
    let temp = TempDir::new().unwrap();
    let root = bag_root(&temp);

    let mut bag = Bag::create(&root).unwrap();
    assert!(matches!(
        bag.package(temp.path().join("bag.rar")),
        Err(Error::UnsupportedSerialization { .. })
    ));
}

#[test]
fn unknown_encodings_are_rejected_and_known_ones_round_trip() {
    let temp = TempDir::new().unwrap();
    let root = bag_root(&temp);

    let mut bag = Bag::create(&root).unwrap();
    assert!(matches!(
        bag.set_encoding("KLINGON-1"),
        Err(Error::UnsupportedEncoding { .. })
    ));

    bag.set_encoding("ISO-8859-1").unwrap();
    bag.add_bag_info_tag("External-Description", "café records").unwrap();
    bag.update().unwrap();

    assert!(read(&root.join("bagit.txt")).contains("Tag-File-Character-Encoding: ISO-8859-1"));

    let reloaded = Bag::load(&root).unwrap();
    assert_eq!("ISO-8859-1", reloaded.encoding().name());
    assert_eq!(
        vec!["café records"],
        reloaded.bag_info().get_values("External-Description")
    );
}

#[test]
fn generated_bag_info_tags_cannot_be_set_by_callers() {
    let temp = TempDir::new().unwrap();
    let root = bag_root(&temp);

    let mut bag = Bag::create(&root).unwrap();
    assert!(matches!(
        bag.add_bag_info_tag("Payload-Oxum", "1.1"),
        Err(Error::GeneratedTag { .. })
    ));
    assert!(matches!(
        bag.add_bag_info_tag("Bag-Size", "1 B"),
        Err(Error::GeneratedTag { .. })
    ));
}

#[test]
fn finalize_removes_fetched_payload_but_keeps_manifest_entries() {
    let temp = TempDir::new().unwrap();
    let root = bag_root(&temp);
    let src = write_src_file(&temp, "a.bin", "remote bytes\n");

    let mut bag = Bag::create(&root).unwrap();
    bag.add_file(&src, "a.bin").unwrap();
    bag.update().unwrap();

    // Simulate a fetch entry whose file is already materialized
    fs::write(
        root.join("fetch.txt"),
        "http://example.org/a.bin - data/a.bin\n",
    )
    .unwrap();

    let mut loaded = Bag::load(&root).unwrap();
    loaded.finalize().unwrap();

    assert!(!root.join("data/a.bin").exists());
    let manifest = read(&root.join("manifest-sha512.txt"));
    assert!(manifest.contains("data/a.bin"));
    assert!(read(&root.join("fetch.txt")).contains("http://example.org/a.bin"));
}
