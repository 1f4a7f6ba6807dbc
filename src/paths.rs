//! Path-string normalization and destination-root substitution
//!
//! Paths arrive from the render farm as strings written on whatever machine
//! submitted the job: possibly with a drive letter, possibly with backslashes.
//! [`NormalizedPath`] decomposes such a string into an optional drive letter
//! plus segments and renders it back with the separator of choice.
//! [`PathRewrite`] moves a download path from the job's declared destination
//! root to a local output root.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Absolute path decomposed into an optional drive letter and its segments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPath {
    drive_letter: Option<char>,
    segments: Vec<String>,
}

impl NormalizedPath {
    /// Parse an absolute path string
    ///
    /// A leading `~` and `$VAR`/`${VAR}` references are expanded first; unknown
    /// variables stay as written. Accepts `/a/b`, `\a\b`, `C:\a\b`, `C:/a/b`
    /// and mixtures of separators. Empty strings, relative paths and paths
    /// containing `:` outside the drive prefix are rejected.
    ///
    /// # Examples
    ///
    /// ```
    /// use renderfarm_dl::paths::NormalizedPath;
    ///
    /// let path = NormalizedPath::parse(r"C:\renders\shot_010\beauty.exr").unwrap();
    /// assert_eq!(path.drive_letter(), Some('C'));
    /// assert_eq!(path.posix_path(true), "C:/renders/shot_010/beauty.exr");
    /// assert_eq!(path.posix_path(false), "/renders/shot_010/beauty.exr");
    /// ```
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(invalid(raw, "empty path"));
        }

        let home = shellexpand::tilde(raw);
        let vars = shellexpand::env_with_context_no_errors(&home, |var| std::env::var(var).ok());
        let expanded: &str = &vars;

        let mut chars = expanded.chars();
        let (drive_letter, remainder) = match (chars.next(), chars.next()) {
            (Some(letter), Some(':')) if letter.is_ascii_alphabetic() => {
                (Some(letter), &expanded[2..])
            }
            _ => (None, expanded),
        };

        if !remainder.starts_with(['/', '\\']) {
            return Err(invalid(raw, "not an absolute path"));
        }
        if remainder.contains(':') {
            return Err(invalid(raw, "bad characters in path"));
        }

        let segments = remainder
            .split(['/', '\\'])
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            drive_letter,
            segments,
        })
    }

    /// Drive letter, if the path had one
    pub fn drive_letter(&self) -> Option<char> {
        self.drive_letter
    }

    /// Path segments, root first
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Render with forward slashes
    pub fn posix_path(&self, with_drive_letter: bool) -> String {
        self.construct("/", with_drive_letter)
    }

    /// Render with backslashes
    pub fn windows_path(&self, with_drive_letter: bool) -> String {
        self.construct("\\", with_drive_letter)
    }

    /// Render with the separator of the running platform
    pub fn os_path(&self, with_drive_letter: bool) -> String {
        if cfg!(windows) {
            self.windows_path(with_drive_letter)
        } else {
            self.posix_path(with_drive_letter)
        }
    }

    /// Segment-wise prefix test; drive letters must match case-insensitively
    ///
    /// `/out/a` starts with `/out`, but `/output/a` does not.
    pub fn starts_with(&self, prefix: &NormalizedPath) -> bool {
        let same_drive = match (self.drive_letter, prefix.drive_letter) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(&b),
            (None, None) => true,
            _ => false,
        };
        same_drive
            && self.segments.len() >= prefix.segments.len()
            && self.segments.iter().zip(&prefix.segments).all(|(a, b)| a == b)
    }

    /// Local filesystem path with the platform separator
    pub fn to_path_buf(&self) -> PathBuf {
        PathBuf::from(self.os_path(true))
    }

    fn construct(&self, sep: &str, with_drive_letter: bool) -> String {
        let body = format!("{}{}", sep, self.segments.join(sep));
        match self.drive_letter {
            Some(letter) if with_drive_letter => format!("{letter}:{body}"),
            _ => body,
        }
    }
}

impl std::fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.posix_path(true))
    }
}

/// Substitutes a job's destination root with a local output root
#[derive(Debug, Clone)]
pub struct PathRewrite {
    destination: NormalizedPath,
    output_root: PathBuf,
}

impl PathRewrite {
    /// Build a rewrite from the job's declared destination to `output_root`
    pub fn new(destination: &str, output_root: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            destination: NormalizedPath::parse(destination)?,
            output_root: output_root.into(),
        })
    }

    /// Local output root paths are moved under
    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Resolve `raw` to a local path
    ///
    /// Paths under the destination root are re-rooted at the output root;
    /// anything else is only normalized.
    pub fn apply(&self, raw: &str) -> Result<PathBuf> {
        let path = NormalizedPath::parse(raw)?;
        if !path.starts_with(&self.destination) {
            tracing::warn!(
                path = raw,
                destination = %self.destination,
                "download path is outside the job destination, leaving it unchanged"
            );
            return Ok(path.to_path_buf());
        }

        let mut rewritten = self.output_root.clone();
        for segment in &path.segments()[self.destination.depth()..] {
            rewritten.push(segment);
        }
        Ok(rewritten)
    }
}

fn invalid(raw: &str, reason: &str) -> Error {
    Error::InvalidPath {
        path: PathBuf::from(raw),
        reason: reason.to_string(),
    }
}
