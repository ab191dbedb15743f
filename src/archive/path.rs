use std::fmt;

/// A normalized absolute path inside an archive.
///
/// Empty and `.` segments are dropped and `..` removes the previous segment,
/// never climbing above the root. The root itself has no segments and
/// displays as `/`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EntryPath(Vec<String>);

impl EntryPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Normalize a `/`-separated path. Leading slashes are optional.
    pub fn new(path: &str) -> Self {
        let mut segments: Vec<String> = Vec::new();
        for segment in path.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                segment => segments.push(segment.to_string()),
            }
        }
        Self(segments)
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Last segment, or `""` for the root.
    pub fn name(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or("")
    }

    pub fn parent(&self) -> Option<EntryPath> {
        if self.is_root() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// Append a relative path, normalizing as [`EntryPath::new`] does.
    pub fn join(&self, relative: &str) -> EntryPath {
        let mut joined = self.0.join("/");
        joined.push('/');
        joined.push_str(relative);
        Self::new(&joined)
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub(crate) fn child(&self, name: &str) -> EntryPath {
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        Self(segments)
    }
}

impl fmt::Display for EntryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.0 {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl From<&str> for EntryPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<&EntryPath> for EntryPath {
    fn from(path: &EntryPath) -> Self {
        path.clone()
    }
}
