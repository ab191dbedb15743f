//! Main entry point for the runarc CLI application.
//!
//! This binary lists, tests and pipes the entries of Tar and Zip archives
//! through the library's archive index.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::NaiveDateTime;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use runarc::cli::ArchiveFormat;
use runarc::{Archive, Cli, Entry, EntryMetadata, TarArchive, TarMetadata, TarOptions, ZipArchive, ZipMetadata, ZipOptions};

/// What the listing and test modes need to know about a format.
trait Describe: EntryMetadata {
    fn timestamp(&self) -> Option<NaiveDateTime>;

    fn method(&self) -> &str;

    /// CRC-32 of the content, for formats that store one.
    fn crc32(&self) -> Option<u32>;
}

impl Describe for TarMetadata {
    fn timestamp(&self) -> Option<NaiveDateTime> {
        Some(self.mtime.naive_utc())
    }

    fn method(&self) -> &str {
        "Stored"
    }

    fn crc32(&self) -> Option<u32> {
        None
    }
}

impl Describe for ZipMetadata {
    fn timestamp(&self) -> Option<NaiveDateTime> {
        self.modified().map(|time| time.naive_utc())
    }

    fn method(&self) -> &str {
        self.compression.name()
    }

    fn crc32(&self) -> Option<u32> {
        Some(self.crc32)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level())))
        .init();

    let format = match cli.format {
        Some(format) => format,
        None => detect_format(&cli.file)?,
    };
    let charset = cli.charset().map_err(anyhow::Error::msg)?;

    match format {
        ArchiveFormat::Tar => {
            let mut options = TarOptions::default();
            if let Some(charset) = charset {
                options = options.with_charset(charset);
            }
            let archive = TarArchive::open_with(&cli.file, &options)
                .with_context(|| format!("cannot read tar archive {}", cli.file.display()))?;
            process_archive(&archive, &cli)
        }
        ArchiveFormat::Zip => {
            let mut options = ZipOptions::default();
            if let Some(charset) = charset {
                options = options.with_charset(charset);
            }
            let archive = ZipArchive::open_with(&cli.file, &options)
                .with_context(|| format!("cannot read zip archive {}", cli.file.display()))?;
            process_archive(&archive, &cli)
        }
    }
}

/// Pick the format from the file's magic bytes, falling back to its
/// extension.
fn detect_format(path: &Path) -> Result<ArchiveFormat> {
    let mut head = Vec::with_capacity(512);
    File::open(path)
        .with_context(|| format!("cannot open {}", path.display()))?
        .take(512)
        .read_to_end(&mut head)?;

    ArchiveFormat::from_magic(&head)
        .or_else(|| ArchiveFormat::from_extension(path))
        .with_context(|| format!("cannot tell the format of {}, use --format", path.display()))
}

/// Run the requested mode, then close the archive.
fn process_archive<M: Describe>(archive: &Archive<M>, cli: &Cli) -> Result<()> {
    let selected: Vec<Entry<'_, M>> = archive
        .entries()?
        .filter(|entry| !entry.path().is_root())
        .filter(|entry| cli.selects(&display_path(entry)))
        .collect();

    let result = if cli.list || cli.verbose {
        list_entries(archive, &selected, cli.verbose)
    } else if cli.test {
        test_entries(&selected, cli)
    } else if cli.pipe {
        pipe_entries(&selected)
    } else {
        list_entries(archive, &selected, false)
    };

    archive.close()?;
    result
}

/// Entry path without the leading `/`, directories with a trailing one.
fn display_path<M: EntryMetadata>(entry: &Entry<'_, M>) -> String {
    let path = entry.path().to_string();
    let path = path.trim_start_matches('/');
    if entry.as_directory().is_some() {
        format!("{path}/")
    } else {
        path.to_string()
    }
}

/// List entries of the archive.
///
/// Supports two output formats:
/// - Simple format (`-l`): Just entry paths, one per line
/// - Verbose format (`-v`): Detailed table with size, compression ratio,
///   method and timestamps
fn list_entries<M: Describe>(archive: &Archive<M>, entries: &[Entry<'_, M>], verbose: bool) -> Result<()> {
    if !verbose {
        for entry in entries {
            println!("{}", display_path(entry));
        }
        return Ok(());
    }

    if let Some(comment) = archive.comment() {
        println!("{comment}");
    }
    println!(
        "{:>10}  {:>10}  {:>5}  {:<8}  {:>10}  {:>5}  Name",
        "Length", "Size", "Cmpr", "Method", "Date", "Time"
    );
    println!("{}", "-".repeat(80));

    // Track totals for summary line
    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in entries {
        let (length, size) = match entry.as_file() {
            Some(file) => (file.size(), file.stored_size()),
            None => (0, 0),
        };
        let (date, time) = match entry.metadata().timestamp() {
            Some(stamp) => (stamp.format("%Y-%m-%d").to_string(), stamp.format("%H:%M").to_string()),
            None => ("-".to_string(), "-".to_string()),
        };
        let name = match entry.as_symlink() {
            Some(link) => format!("{} -> {}", display_path(entry), link.target()),
            None => display_path(entry),
        };

        println!(
            "{:>10}  {:>10}  {}  {:<8}  {:>10}  {:>5}  {}",
            length,
            size,
            ratio(length, size),
            entry.metadata().method(),
            date,
            time,
            name
        );

        if entry.as_file().is_some() {
            total_uncompressed += length;
            total_compressed += size;
            file_count += 1;
        }
    }

    println!("{}", "-".repeat(80));
    println!(
        "{:>10}  {:>10}  {}  {:>31}  {} files, {} total",
        total_uncompressed,
        total_compressed,
        ratio(total_uncompressed, total_compressed),
        "",
        file_count,
        format_size(total_uncompressed)
    );
    Ok(())
}

/// Percentage saved by compression.
fn ratio(length: u64, size: u64) -> String {
    if length > 0 && size <= length {
        format!("{:>4}%", 100 - (size * 100 / length))
    } else {
        "  0%".to_string()
    }
}

/// Read every selected file and symlink completely, checking CRC-32 where
/// the format stores one.
fn test_entries<M: Describe>(entries: &[Entry<'_, M>], cli: &Cli) -> Result<()> {
    let mut failed = 0usize;
    let mut tested = 0usize;

    for entry in entries {
        let reader = if let Some(file) = entry.as_file() {
            file.open()
        } else if let Some(link) = entry.as_symlink() {
            link.open()
        } else {
            continue;
        };
        tested += 1;

        let outcome = reader.map_err(anyhow::Error::from).and_then(|mut reader| {
            let mut crc = flate2::CrcReader::new(&mut reader);
            io::copy(&mut crc, &mut io::sink())?;
            match entry.metadata().crc32() {
                Some(expected) if entry.as_file().is_some() && expected != crc.crc().sum() => {
                    bail!("bad CRC {:08x} (should be {expected:08x})", crc.crc().sum())
                }
                _ => Ok(()),
            }
        });

        match outcome {
            Ok(()) => {
                if !cli.is_quiet() {
                    println!("    testing: {:<50} OK", display_path(entry));
                }
            }
            Err(err) => {
                failed += 1;
                println!("    testing: {:<50} {err:#}", display_path(entry));
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {tested} entries failed");
    }
    if !cli.is_quiet() {
        println!("No errors detected in {tested} tested entries.");
    }
    Ok(())
}

/// Copy file contents to stdout, with a marker line per file when more than
/// one is selected.
fn pipe_entries<M: Describe>(entries: &[Entry<'_, M>]) -> Result<()> {
    let files: Vec<_> = entries.iter().filter_map(|entry| entry.as_file()).collect();
    let show_names = files.len() > 1;
    let mut stdout = io::stdout().lock();

    for file in files {
        if show_names {
            writeln!(stdout, "--- {} ---", display_path(&file))?;
        }
        let mut reader = file
            .open()
            .with_context(|| format!("cannot open {}", display_path(&file)))?;
        io::copy(&mut reader, &mut stdout)?;
    }
    stdout.flush()?;
    Ok(())
}

/// Format a byte size into a human-readable string.
///
/// Automatically selects the appropriate unit (bytes, KB, MB, GB)
/// based on the size magnitude.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
