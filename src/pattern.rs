//! Glob-style path pattern matching for repository queries and watchers.
//!
//! A pattern is a comma-separated list of terms; a path matches the pattern
//! if it matches any term. Within a term:
//!
//! - `**` matches any number of path segments, including zero.
//! - `*` matches any characters within a single segment.
//! - A term lacking a leading `/` is implicitly anchored with `/**/`, so
//!   `*.json` finds all JSON files recursively and `/foo/*.json` finds the
//!   JSON files directly under `/foo`.
//!
//! The compiled form also supports cursor matching on partial paths, which
//! lets tree walkers prune whole subtrees that can never produce a match.

/// One segment of a compiled pattern term.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// `**`: spans zero or more path segments.
    DoubleStar,
    /// A segment with no wildcards.
    Literal(String),
    /// A segment containing `*` wildcards; stored as the literal chunks
    /// between the stars.
    Glob(Vec<String>),
}

impl Segment {
    fn compile(raw: &str) -> Segment {
        if raw == "**" {
            Segment::DoubleStar
        } else if raw.contains('*') {
            Segment::Glob(raw.split('*').map(str::to_owned).collect())
        } else {
            Segment::Literal(raw.to_owned())
        }
    }

    /// Match a single path segment (never used for `DoubleStar`).
    fn matches(&self, part: &str) -> bool {
        match self {
            Segment::DoubleStar => true,
            Segment::Literal(lit) => lit == part,
            Segment::Glob(chunks) => glob_matches(chunks, part),
        }
    }
}

/// Match `part` against literal chunks separated by `*` wildcards.
fn glob_matches(chunks: &[String], part: &str) -> bool {
    let (first, rest) = match chunks.split_first() {
        Some(split) => split,
        None => return part.is_empty(),
    };
    if !part.starts_with(first.as_str()) {
        return false;
    }
    let mut remaining = &part[first.len()..];
    if rest.is_empty() {
        return remaining.is_empty();
    }
    // Middle chunks match greedily left to right; the final chunk must be a
    // suffix of what is left.
    let (last, middle) = rest.split_last().expect("rest is non-empty");
    for chunk in middle {
        if chunk.is_empty() {
            continue;
        }
        match remaining.find(chunk.as_str()) {
            Some(pos) => remaining = &remaining[pos + chunk.len()..],
            None => return false,
        }
    }
    last.is_empty() || remaining.ends_with(last.as_str())
}

/// One comma-separated term of a pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Term {
    segments: Vec<Segment>,
}

impl Term {
    fn compile(raw: &str) -> Term {
        let anchored = if raw.starts_with('/') {
            raw.to_owned()
        } else {
            format!("/**/{raw}")
        };
        let segments = anchored
            .split('/')
            .filter(|s| !s.is_empty())
            .map(Segment::compile)
            .collect();
        Term { segments }
    }

    fn matches(&self, parts: &[&str]) -> bool {
        term_matches(&self.segments, parts)
    }

    fn matches_prefix(&self, parts: &[&str]) -> bool {
        term_matches_prefix(&self.segments, parts)
    }

    fn is_match_all(&self) -> bool {
        self.segments.len() == 1 && self.segments[0] == Segment::DoubleStar
    }

    fn has_double_star(&self) -> bool {
        self.segments.contains(&Segment::DoubleStar)
    }
}

fn term_matches(segments: &[Segment], parts: &[&str]) -> bool {
    match segments.split_first() {
        None => parts.is_empty(),
        Some((Segment::DoubleStar, rest)) => {
            (0..=parts.len()).any(|skip| term_matches(rest, &parts[skip..]))
        }
        Some((seg, rest)) => match parts.split_first() {
            Some((part, tail)) => seg.matches(part) && term_matches(rest, tail),
            None => false,
        },
    }
}

/// Whether some extension of `parts` (a directory prefix) could match the
/// remaining segments. Used to prune tree traversal.
fn term_matches_prefix(segments: &[Segment], parts: &[&str]) -> bool {
    if parts.is_empty() {
        // Deeper entries still have segments to offer unless the pattern is
        // already exhausted.
        return !segments.is_empty();
    }
    match segments.split_first() {
        None => false,
        Some((Segment::DoubleStar, rest)) => {
            (0..=parts.len()).any(|skip| term_matches_prefix(rest, &parts[skip..]))
                || rest.is_empty()
        }
        Some((seg, rest)) => {
            seg.matches(parts[0]) && term_matches_prefix(rest, &parts[1..])
        }
    }
}

/// A compiled path pattern.
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    terms: Vec<Term>,
    match_all: bool,
}

impl PathPattern {
    /// Compile a pattern string. Empty terms are ignored; an entirely empty
    /// pattern matches nothing.
    pub fn compile(pattern: &str) -> PathPattern {
        let terms: Vec<Term> = pattern
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(Term::compile)
            .collect();
        let match_all = terms.iter().any(Term::is_match_all);
        PathPattern {
            source: pattern.to_owned(),
            terms,
            match_all,
        }
    }

    /// A pattern that accepts every path.
    pub fn all() -> PathPattern {
        PathPattern::compile("/**")
    }

    /// The original pattern string.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether this pattern short-circuits to accept any path.
    pub fn is_match_all(&self) -> bool {
        self.match_all
    }

    /// Whether any term carries a `**` segment.
    pub fn has_double_star(&self) -> bool {
        self.match_all || self.terms.iter().any(Term::has_double_star)
    }

    /// Match an absolute path.
    pub fn matches(&self, path: &str) -> bool {
        if self.match_all {
            return true;
        }
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        self.terms.iter().any(|t| t.matches(&parts))
    }

    /// Cursor match: whether any path under the directory `path` could match.
    /// `path` is an absolute directory path (`"/"` for the root).
    pub fn matches_under(&self, path: &str) -> bool {
        if self.match_all {
            return true;
        }
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        self.terms.iter().any(|t| t.matches_prefix(&parts))
    }
}
