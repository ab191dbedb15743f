//! Entry selection.
//!
//! Filters answer one question about an [`Entry`]: should it be selected?
//! They are used with [`Archive::filter`](super::Archive::filter) and by the
//! command-line front end to pick entries by name or kind.

use super::{Entry, EntryKind, EntryMetadata};

/// A predicate over archive entries.
pub trait EntryFilter<M> {
    fn matches(&self, entry: &Entry<'_, M>) -> bool;
}

impl<M, F> EntryFilter<M> for F
where
    F: Fn(&Entry<'_, M>) -> bool,
{
    fn matches(&self, entry: &Entry<'_, M>) -> bool {
        self(entry)
    }
}

/// Combinators for the filters in this module.
///
/// Closures can be combined by wrapping them in [`And`], [`Or`] or [`Not`]
/// directly.
pub trait EntryFilterExt: Sized {
    fn and<F>(self, other: F) -> And<Self, F> {
        And(self, other)
    }

    fn or<F>(self, other: F) -> Or<Self, F> {
        Or(self, other)
    }

    fn not(self) -> Not<Self> {
        Not(self)
    }
}

macro_rules! filter_ext {
    ($($ty:ident $(<$($param:ident),+>)?),* $(,)?) => {
        $(impl$(<$($param),+>)? EntryFilterExt for $ty$(<$($param),+>)? {})*
    };
}

filter_ext!(And<A, B>, Or<A, B>, Not<A>, KindFilter, NameGlob, PathGlob);

#[derive(Debug, Clone)]
pub struct And<A, B>(pub A, pub B);

impl<M, A: EntryFilter<M>, B: EntryFilter<M>> EntryFilter<M> for And<A, B> {
    fn matches(&self, entry: &Entry<'_, M>) -> bool {
        self.0.matches(entry) && self.1.matches(entry)
    }
}

#[derive(Debug, Clone)]
pub struct Or<A, B>(pub A, pub B);

impl<M, A: EntryFilter<M>, B: EntryFilter<M>> EntryFilter<M> for Or<A, B> {
    fn matches(&self, entry: &Entry<'_, M>) -> bool {
        self.0.matches(entry) || self.1.matches(entry)
    }
}

#[derive(Debug, Clone)]
pub struct Not<A>(pub A);

impl<M, A: EntryFilter<M>> EntryFilter<M> for Not<A> {
    fn matches(&self, entry: &Entry<'_, M>) -> bool {
        !self.0.matches(entry)
    }
}

/// Selects entries of one kind.
#[derive(Debug, Clone, Copy)]
pub struct KindFilter(pub EntryKind);

impl<M: EntryMetadata> EntryFilter<M> for KindFilter {
    fn matches(&self, entry: &Entry<'_, M>) -> bool {
        entry.kind() == self.0
    }
}

/// Matches an entry's name against a glob.
#[derive(Debug, Clone)]
pub struct NameGlob(pub Glob);

impl NameGlob {
    pub fn new(pattern: &str) -> Self {
        Self(Glob::new(pattern))
    }
}

impl<M: EntryMetadata> EntryFilter<M> for NameGlob {
    fn matches(&self, entry: &Entry<'_, M>) -> bool {
        self.0.matches(entry.name())
    }
}

/// Matches an entry's full path, without the leading `/`, against a glob.
#[derive(Debug, Clone)]
pub struct PathGlob(pub Glob);

impl PathGlob {
    pub fn new(pattern: &str) -> Self {
        Self(Glob::new(pattern.trim_start_matches('/')))
    }
}

impl<M: EntryMetadata> EntryFilter<M> for PathGlob {
    fn matches(&self, entry: &Entry<'_, M>) -> bool {
        let path = entry.path().to_string();
        self.0.matches(path.trim_start_matches('/'))
    }
}

/// Simple glob pattern supporting `*` and `?` wildcards.
///
/// - `*` matches zero or more characters, `/` included
/// - `?` matches exactly one character
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Glob {
    pattern: Vec<char>,
}

impl Glob {
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.chars().collect(),
        }
    }

    /// Check if a pattern contains glob wildcard characters.
    pub fn has_wildcards(pattern: &str) -> bool {
        pattern.contains('*') || pattern.contains('?')
    }

    pub fn matches(&self, text: &str) -> bool {
        let text: Vec<char> = text.chars().collect();
        do_match(&self.pattern, &text)
    }
}

/// Backtracking matcher; a `*` first tries to match nothing, then one more
/// character at a time.
fn do_match(pattern: &[char], text: &[char]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (Some('*'), _) => {
            // Collapse runs of stars so backtracking stays linear per star.
            let rest = &pattern[1..];
            if rest.first() == Some(&'*') {
                return do_match(rest, text);
            }
            (0..=text.len()).any(|skip| do_match(rest, &text[skip..]))
        }
        (Some('?'), Some(_)) => do_match(&pattern[1..], &text[1..]),
        (Some(p), Some(t)) if p == t => do_match(&pattern[1..], &text[1..]),
        _ => false,
    }
}
