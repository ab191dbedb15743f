mod common;

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use std::thread;

use byteorder::{LittleEndian, WriteBytesExt};
use common::{DOS_HOST, ZipBuilder, ZipFixtureEntry, crc32, lzma, temp_file};
use runarc::zip::attributes::MsDosAttributes;
use runarc::zip::extra::{EXTENDED_TIMESTAMP_ID, ExtendedTimestamp};
use runarc::zip::{
    CompressionMethod, CompressionRegistry, ExternalAttributes, ExternalAttributesRegistry, ExtraField,
    GeneralPurposeFlags, HostSystem, UnixEntityType,
};
use runarc::{EntryKind, EntryPath, Error, LinkTarget, RangeReader, ZipArchive, ZipOptions};

fn open(data: Vec<u8>) -> ZipArchive {
    ZipArchive::from_source(data, &ZipOptions::default()).unwrap()
}

fn open_err(data: Vec<u8>) -> Error {
    ZipArchive::from_source(data, &ZipOptions::default()).unwrap_err()
}

fn paths(archive: &ZipArchive) -> Vec<String> {
    archive.entries().unwrap().map(|e| e.path().to_string()).collect()
}

/// One extra field record: id, length, data.
fn extra(id: u16, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.write_u16::<LittleEndian>(id).unwrap();
    out.write_u16::<LittleEndian>(data.len() as u16).unwrap();
    out.extend_from_slice(data);
    out
}

#[test]
fn empty_archive_has_only_root() {
    let data = ZipBuilder::new().build();
    assert_eq!(data.len(), 22);
    let archive = open(data);
    assert_eq!(archive.size().unwrap(), 1);
    assert!(archive.root().unwrap().is_empty());
    assert_eq!(archive.comment(), None);
}

#[test]
fn archive_comment_is_kept() {
    let archive = open(ZipBuilder::new().stored("a", b"a").comment("built nightly").build());
    assert_eq!(archive.comment(), Some("built nightly"));
}

#[test]
fn files_that_are_not_zips_are_rejected() {
    assert!(matches!(open_err(vec![0u8; 10]), Error::Format { .. }));
    assert!(matches!(open_err(vec![0xAA; 70_000]), Error::Format { .. }));
}

#[test]
fn reads_stored_deflated_and_bzip2_entries() {
    let text = "the quick brown fox jumps over the lazy dog\n".repeat(50);
    let archive = open(
        ZipBuilder::new()
            .stored("plain.txt", text.as_bytes())
            .deflated("deflated.txt", text.as_bytes())
            .bzip2("bzip2.txt", text.as_bytes())
            .build(),
    );

    assert_eq!(paths(&archive), ["/", "/bzip2.txt", "/deflated.txt", "/plain.txt"]);
    for (name, method) in [("plain.txt", "Stored"), ("deflated.txt", "Deflated"), ("bzip2.txt", "BZip2")] {
        let file = archive.get(name).unwrap().unwrap().as_file().unwrap();
        assert_eq!(file.size(), text.len() as u64, "{name}");
        assert_eq!(file.metadata().compression.name(), method);
        assert_eq!(file.metadata().crc32, crc32(text.as_bytes()));
        assert_eq!(file.read_to_vec().unwrap(), text.as_bytes(), "{name}");
    }

    let deflated = archive.get("deflated.txt").unwrap().unwrap().as_file().unwrap();
    assert!(deflated.stored_size() < deflated.size());
}

#[test]
fn reads_lzma_entries_with_end_marker() {
    let text = "lzma payload ".repeat(300);
    let mut entry = ZipFixtureEntry::new("packed.lzma", 14, lzma(text.as_bytes()), text.as_bytes());
    entry.flags = GeneralPurposeFlags::COMPRESSION_OPTION_1.bits();
    let archive = open(ZipBuilder::new().entry(entry).build());

    let file = archive.get("packed.lzma").unwrap().unwrap().as_file().unwrap();
    assert_eq!(file.metadata().compression.name(), "LZMA");
    assert_eq!(file.read_to_vec().unwrap(), text.as_bytes());
}

#[test]
fn random_access_needs_stored_data() {
    let archive = open(
        ZipBuilder::new()
            .stored("stored", b"0123456789")
            .deflated("packed", b"0123456789")
            .build(),
    );

    let stored = archive.get("stored").unwrap().unwrap().as_file().unwrap();
    let mut reader = stored.open_random_access().unwrap();
    reader.seek(SeekFrom::Start(4)).unwrap();
    let mut buf = [0u8; 3];
    reader.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"456");

    let packed = archive.get("packed").unwrap().unwrap().as_file().unwrap();
    assert!(matches!(packed.open_random_access(), Err(Error::Unsupported(_))));
    assert_eq!(packed.read_to_vec().unwrap(), b"0123456789");
}

#[test]
fn directories_and_symlinks() {
    let archive = open(
        ZipBuilder::new()
            .directory("docs/")
            .stored("docs/a.txt", b"alpha")
            .symlink("docs/latest", "a.txt")
            .symlink("abs", "/docs/a.txt")
            .build(),
    );

    let docs = archive.get("docs").unwrap().unwrap();
    assert_eq!(docs.kind(), EntryKind::Directory);
    assert!(!docs.is_synthetic());
    assert_eq!(docs.metadata().unix_mode(), Some(0o755));

    let latest = archive.get("docs/latest").unwrap().unwrap().as_symlink().unwrap();
    assert_eq!(latest.target(), &LinkTarget::Relative("a.txt".into()));
    assert_eq!(latest.resolve(), EntryPath::new("/docs/a.txt"));
    let mut stored = String::new();
    latest.open().unwrap().read_to_string(&mut stored).unwrap();
    assert_eq!(stored, "a.txt");

    let abs = archive.get("abs").unwrap().unwrap().as_symlink().unwrap();
    assert!(matches!(abs.target(), LinkTarget::Absolute(_)));
    assert_eq!(abs.resolve(), EntryPath::new("/docs/a.txt"));
}

#[test]
fn unix_directory_type_without_slash_is_a_directory() {
    let mut entry = ZipFixtureEntry::new("plain", 0, Vec::new(), b"");
    entry.external_attributes = 0o040700 << 16;
    let archive = open(ZipBuilder::new().entry(entry).build());
    let plain = archive.get("plain").unwrap().unwrap();
    assert_eq!(plain.kind(), EntryKind::Directory);
    assert_eq!(
        plain.metadata().external_attributes.unix_entity_type(),
        Some(UnixEntityType::Directory)
    );
}

#[test]
fn missing_parents_are_synthesized() {
    let archive = open(ZipBuilder::new().deflated("a/b/c.txt", b"c").build());
    assert_eq!(paths(&archive), ["/", "/a", "/a/b", "/a/b/c.txt"]);

    let a = archive.get("a").unwrap().unwrap();
    assert!(a.is_synthetic());
    let metadata = a.metadata();
    assert_eq!(metadata.version_made_by.version, 10);
    assert_eq!(metadata.version_made_by.host, HostSystem::MsDos);
    assert_eq!(metadata.version_needed, 10);
    assert_eq!(metadata.compression.name(), "Stored");
    assert_eq!(metadata.last_modified, None);
    assert_eq!(
        metadata.external_attributes,
        ExternalAttributes::MsDos(MsDosAttributes::SUB_DIRECTORY)
    );
}

#[test]
fn file_with_children_becomes_a_directory() {
    let archive = open(
        ZipBuilder::new()
            .entry(ZipFixtureEntry::new("node", 0, b"abc".to_vec(), b"abc"))
            .stored("node/child", b"x")
            .build(),
    );
    let node = archive.get("node").unwrap().unwrap().as_directory().unwrap();
    assert!(!node.is_synthetic());
    assert_eq!(node.len(), 1);
    assert_eq!(node.metadata().uncompressed_size, 3);
}

#[test]
fn root_record_is_skipped() {
    let archive = open(
        ZipBuilder::new()
            .entry(ZipFixtureEntry::new("/", 0, Vec::new(), b""))
            .stored("kept", b"k")
            .build(),
    );
    assert_eq!(paths(&archive), ["/", "/kept"]);
    assert!(archive.root().unwrap().is_synthetic());
}

#[test]
fn unknown_method_is_indexed_but_cannot_be_opened() {
    let archive = open(
        ZipBuilder::new()
            .entry(ZipFixtureEntry::new("odd", 99, b"???".to_vec(), b"abc"))
            .build(),
    );
    let odd = archive.get("odd").unwrap().unwrap().as_file().unwrap();
    assert_eq!(odd.size(), 3);
    assert_eq!(odd.metadata().compression.code(), 99);
    assert!(matches!(odd.open(), Err(Error::Unsupported(_))));
}

#[test]
fn symlink_with_unsupported_method_falls_back_to_a_file() {
    let mut entry = ZipFixtureEntry::new("link", 98, b"???".to_vec(), b"target");
    entry.external_attributes = 0o120777 << 16;
    let archive = open(ZipBuilder::new().entry(entry).build());
    assert_eq!(archive.get("link").unwrap().unwrap().kind(), EntryKind::File);
}

#[test]
fn encrypted_entries_are_unsupported() {
    let mut entry = ZipFixtureEntry::new("secret", 0, b"xxxx".to_vec(), b"xxxx");
    entry.flags = GeneralPurposeFlags::ENCRYPTED.bits();
    let archive = open(ZipBuilder::new().entry(entry).build());
    let secret = archive.get("secret").unwrap().unwrap().as_file().unwrap();
    assert!(secret.metadata().is_encrypted());
    assert!(matches!(secret.open(), Err(Error::Unsupported(_))));
    assert!(matches!(secret.open_random_access(), Err(Error::Unsupported(_))));
}

#[derive(Debug)]
struct CorruptDeflate;

struct FailingReader;

impl Read for FailingReader {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::InvalidData, "corrupt block"))
    }
}

impl CompressionMethod for CorruptDeflate {
    fn code(&self) -> u16 {
        8
    }

    fn name(&self) -> &str {
        "Corrupt"
    }

    fn decoder(
        &self,
        _raw: RangeReader,
        _flags: GeneralPurposeFlags,
        _uncompressed_size: u64,
    ) -> runarc::Result<Box<dyn Read + Send>> {
        Ok(Box::new(FailingReader))
    }
}

#[test]
fn substituted_codec_is_used() {
    let mut methods = CompressionRegistry::default();
    methods.register(CorruptDeflate);
    let options = ZipOptions::default().with_compression_methods(methods);
    let archive = ZipArchive::from_source(ZipBuilder::new().deflated("f", b"content").build(), &options).unwrap();

    let file = archive.get("f").unwrap().unwrap().as_file().unwrap();
    assert_eq!(file.metadata().compression.name(), "Corrupt");
    match file.read_to_vec() {
        Err(Error::Io(err)) => assert_eq!(err.kind(), io::ErrorKind::InvalidData),
        other => panic!("expected an I/O error, got {other:?}"),
    }
}

#[test]
fn failing_attribute_parser_fails_the_open() {
    let mut attributes = ExternalAttributesRegistry::default();
    attributes.register(HostSystem::Unix, |_raw: u32| -> runarc::Result<ExternalAttributes> {
        Err(Error::Unsupported("exotic attributes".into()))
    });
    let options = ZipOptions::default().with_external_attributes(attributes);
    let err = ZipArchive::from_source(ZipBuilder::new().stored("f", b"x").build(), &options).unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)), "{err}");
}

#[test]
fn ms_dos_entries_have_no_unix_mode() {
    let mut entry = ZipFixtureEntry::new("DOS.TXT", 0, b"dos".to_vec(), b"dos");
    entry.version_made_by = DOS_HOST;
    entry.external_attributes = MsDosAttributes::ARCHIVE.bits() as u32;
    let archive = open(ZipBuilder::new().entry(entry).build());
    let file = archive.get("DOS.TXT").unwrap().unwrap();
    assert_eq!(file.kind(), EntryKind::File);
    assert_eq!(file.metadata().unix_mode(), None);
    assert_eq!(
        file.metadata().external_attributes,
        ExternalAttributes::MsDos(MsDosAttributes::ARCHIVE)
    );
}

#[test]
fn names_use_the_configured_charset_unless_flagged_utf8() {
    let (cp866, _, _) = encoding_rs::IBM866.encode("отчёт.txt");
    let legacy = ZipFixtureEntry {
        name: cp866.into_owned(),
        ..ZipFixtureEntry::new("", 0, b"1".to_vec(), b"1")
    };
    let mut modern = ZipFixtureEntry::new("данные.txt", 0, b"2".to_vec(), b"2");
    modern.flags = GeneralPurposeFlags::UTF8.bits();
    let data = ZipBuilder::new().entry(legacy).entry(modern).build();

    let default = open(data.clone());
    assert!(default.get("отчёт.txt").unwrap().is_none());
    assert!(default.get("данные.txt").unwrap().is_some());

    let options = ZipOptions::default().with_charset(encoding_rs::IBM866);
    let archive = ZipArchive::from_source(data, &options).unwrap();
    assert!(archive.get("отчёт.txt").unwrap().is_some());
    assert!(archive.get("данные.txt").unwrap().is_some());
}

#[test]
fn unicode_path_field_overrides_the_header_name() {
    let raw_name = b"?ber.txt";
    let mut field = vec![1u8];
    field.write_u32::<LittleEndian>(crc32(raw_name)).unwrap();
    field.extend_from_slice("über.txt".as_bytes());

    let mut entry = ZipFixtureEntry::new("?ber.txt", 0, b"u".to_vec(), b"u");
    entry.central_extra = extra(0x7075, &field);
    let mut stale = ZipFixtureEntry::new("stale.txt", 0, b"s".to_vec(), b"s");
    let mut stale_field = vec![1u8];
    stale_field.write_u32::<LittleEndian>(0xDEAD_BEEF).unwrap();
    stale_field.extend_from_slice("renamed.txt".as_bytes());
    stale.central_extra = extra(0x7075, &stale_field);

    let archive = open(ZipBuilder::new().entry(entry).entry(stale).build());
    assert_eq!(paths(&archive), ["/", "/stale.txt", "/über.txt"]);
}

#[test]
fn extended_timestamps_come_from_extra_fields() {
    let mut central = vec![1u8];
    central.write_u32::<LittleEndian>(1_650_000_000).unwrap();
    let mut local = vec![7u8];
    for time in [1_700_000_000u32, 1_700_000_100, 1_600_000_000] {
        local.write_u32::<LittleEndian>(time).unwrap();
    }

    let mut stamped = ZipFixtureEntry::new("stamped", 0, b"data".to_vec(), b"data");
    stamped.central_extra = extra(EXTENDED_TIMESTAMP_ID, &central);
    stamped.local_extra = extra(EXTENDED_TIMESTAMP_ID, &local);
    let archive = open(ZipBuilder::new().entry(stamped).stored("plain", b"p").build());

    let file = archive.get("stamped").unwrap().unwrap().as_file().unwrap();
    // The data offset follows the local header's longer extra field.
    assert_eq!(file.read_to_vec().unwrap(), b"data");

    let metadata = file.metadata();
    assert_eq!(metadata.modified().unwrap().timestamp(), 1_700_000_000);
    match &metadata.central_extra_fields[..] {
        [ExtraField::ExtendedTimestamp(ExtendedTimestamp { modified, accessed, .. })] => {
            assert_eq!(modified.unwrap().timestamp(), 1_650_000_000);
            assert_eq!(*accessed, None);
        }
        other => panic!("unexpected central extra fields {other:?}"),
    }
    match metadata.extra_field(EXTENDED_TIMESTAMP_ID) {
        Some(ExtraField::ExtendedTimestamp(local)) => {
            assert_eq!(local.accessed.unwrap().timestamp(), 1_700_000_100);
            assert_eq!(local.created.unwrap().timestamp(), 1_600_000_000);
        }
        other => panic!("unexpected local extra field {other:?}"),
    }

    let plain = archive.get("plain").unwrap().unwrap();
    assert_eq!(
        plain.metadata().modified().unwrap().to_rfc3339(),
        "2021-06-15T13:45:30+00:00"
    );
}

#[test]
fn unknown_extra_fields_are_kept_raw() {
    let mut entry = ZipFixtureEntry::new("f", 0, b"x".to_vec(), b"x");
    entry.central_extra = extra(0xCAFE, b"\x01\x02\x03");
    let archive = open(ZipBuilder::new().entry(entry).build());
    let file = archive.get("f").unwrap().unwrap();
    assert_eq!(
        file.metadata().central_extra_fields,
        [ExtraField::Unparsed {
            id: 0xCAFE,
            data: vec![1, 2, 3]
        }]
    );
}

#[test]
fn bad_local_header_is_a_format_error() {
    let mut data = ZipBuilder::new().stored("f", b"x").build();
    data[..2].copy_from_slice(b"XX");
    let err = open_err(data);
    assert!(matches!(err, Error::Format { offset: Some(0), .. }), "{err}");
}

#[test]
fn absurdly_deep_paths_are_a_format_error() {
    let name = format!("{}f", "a/".repeat(8000));
    let err = open_err(ZipBuilder::new().stored("ok", b"x").stored(&name, b"x").build());
    assert!(matches!(err, Error::Format { offset: Some(_), .. }), "{err}");
}

#[test]
fn deep_paths_index_on_a_small_stack() {
    let name = format!("{}f", "a/".repeat(999));
    let data = ZipBuilder::new().stored(&name, b"deep").build();
    let read = thread::Builder::new()
        .stack_size(256 * 1024)
        .spawn(move || {
            let archive = open(data);
            let file = archive.get(name.as_str()).unwrap().unwrap().as_file().unwrap();
            (archive.size().unwrap(), file.path().depth(), file.read_to_vec().unwrap())
        })
        .unwrap()
        .join()
        .unwrap();
    assert_eq!(read, (1001, 1000, b"deep".to_vec()));
}

#[test]
fn concurrent_reads_from_threads() {
    let mut builder = ZipBuilder::new();
    for i in 0..8 {
        builder = builder.deflated(&format!("f{i}"), format!("zip entry {i} ").repeat(200).as_bytes());
    }
    let archive = Arc::new(open(builder.build()));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let archive = Arc::clone(&archive);
            thread::spawn(move || {
                let file = archive.get(format!("f{i}").as_str()).unwrap().unwrap().as_file().unwrap();
                file.read_to_vec().unwrap()
            })
        })
        .collect();
    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.join().unwrap(), format!("zip entry {i} ").repeat(200).into_bytes());
    }
}

#[test]
fn close_invalidates_readers() {
    let file = temp_file(&ZipBuilder::new().stored("f", b"abcdef").build());
    let archive = ZipArchive::open(file.path()).unwrap();
    let entry = archive.get("f").unwrap().unwrap().as_file().unwrap();
    let mut reader = entry.open().unwrap();
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"ab");

    archive.close().unwrap();
    archive.close().unwrap();

    let err = reader.read(&mut buf).unwrap_err();
    assert!(Error::from(err).is_closed());
    assert!(entry.open().err().unwrap().is_closed());
    assert!(archive.root().err().unwrap().is_closed());
    assert!(archive.size().unwrap_err().is_closed());
}
