use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PreReleaseKind {
    Alpha,
    Beta,
    ReleaseCandidate,
}

impl PreReleaseKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Alpha => "a",
            Self::Beta => "b",
            Self::ReleaseCandidate => "rc",
        }
    }

    fn parse(label: &str) -> Option<Self> {
        match label {
            "a" | "alpha" => Some(Self::Alpha),
            "b" | "beta" => Some(Self::Beta),
            "rc" | "c" | "pre" | "preview" => Some(Self::ReleaseCandidate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReleaseVersion {
    raw: String,
    epoch: u64,
    release: Vec<u64>,
    pre: Option<(PreReleaseKind, u64)>,
    post: Option<u64>,
    dev: Option<u64>,
    local: Option<String>,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    DevOnly,
    Pre(PreReleaseKind, u64),
    Final,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum DevTail {
    Dev(u64),
    Release,
}

impl ReleaseVersion {
    pub fn parse(input: &str) -> Result<Self> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(anyhow!("release version must not be empty"));
        }

        let lowered = raw.to_ascii_lowercase();
        let unprefixed = lowered.strip_prefix('v').unwrap_or(&lowered);
        let (public, local) = match unprefixed.split_once('+') {
            Some((public, label)) => (public, Some(parse_local_label(label, raw)?)),
            None => (unprefixed, None),
        };
        let (epoch, body) = match public.split_once('!') {
            Some((epoch, body)) => {
                let epoch = epoch
                    .parse::<u64>()
                    .with_context(|| format!("invalid epoch in release version '{raw}'"))?;
                (epoch, body)
            }
            None => (0, public),
        };

        let mut cursor = Cursor { rest: body };
        let release = cursor
            .release()
            .ok_or_else(|| anyhow!("release version '{raw}' must start with a number"))?;
        let pre = cursor.pre_release();
        let post = cursor.post_release();
        let dev = cursor.dev_release();
        if !cursor.rest.is_empty() {
            return Err(anyhow!(
                "invalid release version '{raw}': unexpected '{}'",
                cursor.rest
            ));
        }

        Ok(Self {
            raw: raw.to_string(),
            epoch,
            release,
            pre,
            post,
            dev,
            local,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn release(&self) -> &[u64] {
        &self.release
    }

    pub fn pre(&self) -> Option<(PreReleaseKind, u64)> {
        self.pre
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some() || self.dev.is_some()
    }

    pub fn is_postrelease(&self) -> bool {
        self.post.is_some()
    }

    fn phase(&self) -> Phase {
        match (self.pre, self.post, self.dev) {
            (None, None, Some(_)) => Phase::DevOnly,
            (Some((kind, number)), _, _) => Phase::Pre(kind, number),
            _ => Phase::Final,
        }
    }

    fn dev_tail(&self) -> DevTail {
        match self.dev {
            Some(number) => DevTail::Dev(number),
            None => DevTail::Release,
        }
    }
}

pub fn versions_match(left: &str, right: &str) -> bool {
    match (ReleaseVersion::parse(left), ReleaseVersion::parse(right)) {
        (Ok(left), Ok(right)) => left == right,
        _ => left.trim() == right.trim(),
    }
}

fn parse_local_label(label: &str, raw: &str) -> Result<String> {
    if label.is_empty()
        || !label
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_'))
    {
        return Err(anyhow!("invalid local label in release version '{raw}'"));
    }
    Ok(label.replace(&['-', '_'][..], "."))
}

fn compare_release(left: &[u64], right: &[u64]) -> Ordering {
    let len = left.len().max(right.len());
    (0..len)
        .map(|index| {
            let l = left.get(index).copied().unwrap_or(0);
            let r = right.get(index).copied().unwrap_or(0);
            l.cmp(&r)
        })
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}

struct Cursor<'a> {
    rest: &'a str,
}

impl Cursor<'_> {
    fn number(&mut self) -> Option<u64> {
        let digits = self.rest.len()
            - self
                .rest
                .trim_start_matches(|ch: char| ch.is_ascii_digit())
                .len();
        if digits == 0 {
            return None;
        }
        let (head, tail) = self.rest.split_at(digits);
        let value = head.parse::<u64>().ok()?;
        self.rest = tail;
        Some(value)
    }

    fn release(&mut self) -> Option<Vec<u64>> {
        let mut parts = vec![self.number()?];
        while let Some(tail) = self.rest.strip_prefix('.') {
            if !tail.starts_with(|ch: char| ch.is_ascii_digit()) {
                break;
            }
            self.rest = tail;
            parts.push(self.number()?);
        }
        Some(parts)
    }

    fn label(&mut self, labels: &[&'static str]) -> Option<&'static str> {
        let trimmed = self
            .rest
            .strip_prefix(&['.', '-', '_'][..])
            .unwrap_or(self.rest);
        let label = *labels.iter().find(|label| trimmed.starts_with(**label))?;
        self.rest = &trimmed[label.len()..];
        Some(label)
    }

    fn optional_number(&mut self) -> u64 {
        if let Some(tail) = self.rest.strip_prefix(&['.', '-', '_'][..]) {
            if tail.starts_with(|ch: char| ch.is_ascii_digit()) {
                self.rest = tail;
            }
        }
        self.number().unwrap_or(0)
    }

    fn pre_release(&mut self) -> Option<(PreReleaseKind, u64)> {
        let label = self.label(&["preview", "alpha", "beta", "pre", "rc", "a", "b", "c"])?;
        let kind = PreReleaseKind::parse(label)?;
        Some((kind, self.optional_number()))
    }

    fn post_release(&mut self) -> Option<u64> {
        if let Some(tail) = self.rest.strip_prefix('-') {
            if tail.starts_with(|ch: char| ch.is_ascii_digit()) {
                self.rest = tail;
                return self.number();
            }
        }
        self.label(&["post", "rev", "r"])?;
        Some(self.optional_number())
    }

    fn dev_release(&mut self) -> Option<u64> {
        self.label(&["dev"])?;
        Some(self.optional_number())
    }
}

impl Ord for ReleaseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| compare_release(&self.release, &other.release))
            .then_with(|| self.phase().cmp(&other.phase()))
            .then_with(|| self.post.cmp(&other.post))
            .then_with(|| self.dev_tail().cmp(&other.dev_tail()))
            .then_with(|| self.local.cmp(&other.local))
    }
}

impl PartialOrd for ReleaseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ReleaseVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ReleaseVersion {}

impl FromStr for ReleaseVersion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
