use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use encoding_rs::Encoding;

use crate::archive::Glob;

#[derive(Parser, Debug)]
#[command(name = "runarc")]
#[command(version)]
#[command(about = "List, test and read Tar and Zip archives without unpacking them", long_about = None)]
#[command(after_help = "Examples:\n  \
  runarc -l backup.tar                 list all entries of backup.tar\n  \
  runarc -v data.zip '*.txt'           show details of the text files in data.zip\n  \
  runarc -p foo.zip docs/readme.md     send one file to stdout\n  \
  runarc -t legacy.zip --charset cp866 test a zip with Cyrillic DOS names")]
pub struct Cli {
    /// Tar or Zip archive
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Entries to select (default: all); `*` and `?` are wildcards
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    /// List entries (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List verbosely
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Write file contents to stdout, no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Test entries by reading them completely
    #[arg(short = 't')]
    pub test: bool,

    /// Exclude entries that follow
    #[arg(short = 'x', value_name = "FILE", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Archive format (default: detect from content, then extension)
    #[arg(long = "format", value_enum)]
    pub format: Option<ArchiveFormat>,

    /// Charset of entry names without a UTF-8 marker, e.g. cp866 or shift_jis
    #[arg(long = "charset", value_name = "LABEL")]
    pub charset: Option<String>,

    /// Quiet mode, only report errors
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    Zip,
}

impl ArchiveFormat {
    /// Guess the format from the first bytes of a file.
    pub fn from_magic(head: &[u8]) -> Option<Self> {
        if head.starts_with(b"PK\x03\x04") || head.starts_with(b"PK\x05\x06") {
            return Some(ArchiveFormat::Zip);
        }
        if head.get(257..262) == Some(b"ustar".as_slice()) {
            return Some(ArchiveFormat::Tar);
        }
        None
    }

    pub fn from_extension(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "tar" => Some(ArchiveFormat::Tar),
            "zip" | "jar" => Some(ArchiveFormat::Zip),
            _ => None,
        }
    }
}

impl Cli {
    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.pipe
    }

    /// Default log filter when `RUST_LOG` is not set.
    pub fn log_level(&self) -> &'static str {
        if self.quiet > 0 { "error" } else { "warn" }
    }

    /// The charset named by `--charset`. `Ok(None)` means the default.
    pub fn charset(&self) -> Result<Option<&'static Encoding>, String> {
        match &self.charset {
            None => Ok(None),
            Some(label) => Encoding::for_label(label.as_bytes())
                .map(Some)
                .ok_or_else(|| format!("unknown charset {label:?}")),
        }
    }

    /// Whether an entry path (without the leading `/`) is selected by the
    /// positional patterns and not excluded by `-x`.
    pub fn selects(&self, path: &str) -> bool {
        let name = path.rsplit('/').next().unwrap_or(path);

        if !self.files.is_empty() {
            let matches = self.files.iter().any(|f| {
                if Glob::has_wildcards(f) {
                    Glob::new(f).matches(path)
                } else {
                    // No wildcards: exact match on name or full path
                    path == f.trim_start_matches('/') || name == f
                }
            });
            if !matches {
                return false;
            }
        }

        !self
            .exclude
            .iter()
            .any(|x| path.contains(x.as_str()) || Glob::new(x).matches(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("runarc").chain(args.iter().copied()))
    }

    #[test]
    fn detects_formats() {
        assert_eq!(ArchiveFormat::from_magic(b"PK\x03\x04rest"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::from_magic(b"PK\x05\x06"), Some(ArchiveFormat::Zip));
        let mut block = vec![0u8; 512];
        block[257..263].copy_from_slice(b"ustar\0");
        assert_eq!(ArchiveFormat::from_magic(&block), Some(ArchiveFormat::Tar));
        assert_eq!(ArchiveFormat::from_magic(b"garbage"), None);

        assert_eq!(ArchiveFormat::from_extension(Path::new("a/b.TAR")), Some(ArchiveFormat::Tar));
        assert_eq!(ArchiveFormat::from_extension(Path::new("lib.jar")), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::from_extension(Path::new("notes")), None);
    }

    #[test]
    fn selection() {
        let all = cli(&["a.zip"]);
        assert!(all.selects("docs/readme.txt"));

        let some = cli(&["a.zip", "*.txt", "Makefile", "-x", "secret"]);
        assert!(some.selects("docs/readme.txt"));
        assert!(some.selects("build/Makefile"));
        assert!(!some.selects("docs/readme.md"));
        assert!(!some.selects("docs/secret.txt"));
    }

    #[test]
    fn charset_labels() {
        assert_eq!(cli(&["a.zip"]).charset(), Ok(None));
        assert_eq!(
            cli(&["a.zip", "--charset", "cp866"]).charset(),
            Ok(Some(encoding_rs::IBM866))
        );
        assert!(cli(&["a.zip", "--charset", "klingon"]).charset().is_err());
    }

    #[test]
    fn quiet_levels() {
        assert_eq!(cli(&["a.tar"]).log_level(), "warn");
        let quiet = cli(&["a.tar", "-q"]);
        assert!(quiet.is_quiet());
        assert_eq!(quiet.log_level(), "error");
        assert!(cli(&["a.tar", "-p"]).is_quiet());
    }
}
