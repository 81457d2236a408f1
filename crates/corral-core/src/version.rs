//! Conda version parsing, comparison, and prefix matching.
//!
//! Conda versions use their own ordering rather than semver:
//! - An optional integer epoch precedes `!` (`1!2.0` sorts after every epoch-0 version)
//! - An optional local part follows `+` and only breaks ties
//! - Segments are split on `.`, `_` and `-`, each segment into runs of digits and letters
//! - A segment that starts with letters gets an implicit leading `0`
//! - Numbers compare numerically, strings case-insensitively; strings sort below numbers
//! - `dev` sorts below every other string and `post` above every number
//! - Missing trailing components and segments compare as `0`, so `1.0 == 1.0.0`

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use corral_util::errors::CorralError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A parsed conda version with comparable segments.
#[derive(Debug, Clone)]
pub struct Version {
    source: String,
    epoch: u64,
    release: Vec<Segment>,
    local: Vec<Segment>,
}

type Segment = Vec<Component>;

/// Derived ordering gives `dev < text < number < post`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Component {
    Dev,
    Text(String),
    Numeric(u64),
    Post,
}

impl Version {
    pub fn parse(input: &str) -> Result<Self, CorralError> {
        let source = input.trim();
        let invalid = |reason: String| CorralError::InvalidSpec {
            spec: input.to_string(),
            reason,
        };
        if source.is_empty() {
            return Err(invalid("empty version".to_string()));
        }

        let lowered = source.to_lowercase();
        if let Some(c) = lowered
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+' | '!')))
        {
            return Err(invalid(format!("invalid character '{c}' in version")));
        }

        let (epoch, rest) = match lowered.split_once('!') {
            Some((epoch, rest)) => {
                let epoch = epoch
                    .parse::<u64>()
                    .map_err(|_| invalid(format!("epoch '{epoch}' is not an integer")))?;
                (epoch, rest)
            }
            None => (0, lowered.as_str()),
        };
        if rest.contains('!') {
            return Err(invalid("more than one '!' in version".to_string()));
        }

        let (release, local) = match rest.split_once('+') {
            Some((release, local)) => (release, Some(local)),
            None => (rest, None),
        };
        if local.is_some_and(|l| l.contains('+')) {
            return Err(invalid("more than one '+' in version".to_string()));
        }

        let release = parse_segments(release).map_err(|r| invalid(r.to_string()))?;
        let local = match local {
            Some(l) => parse_segments(l).map_err(|r| invalid(format!("local part: {r}")))?,
            None => Vec::new(),
        };

        Ok(Self {
            source: source.to_string(),
            epoch,
            release,
            local,
        })
    }

    /// The version exactly as written (trimmed).
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether the release part starts with `prefix`, as used by `1.2.*` globs.
    ///
    /// All but the last prefix segment must be equal; the last prefix segment
    /// must match the start of the corresponding segment, with a trailing
    /// string component matching as a string prefix.
    pub fn starts_with(&self, prefix: &Version) -> bool {
        if self.epoch != prefix.epoch {
            return false;
        }
        if !segments_start_with(&self.release, &prefix.release) {
            return false;
        }
        prefix.local.is_empty() || segments_start_with(&self.local, &prefix.local)
    }

    /// A copy with the last release segment dropped (`1.2.3` becomes `1.2`).
    ///
    /// Returns `None` for single-segment versions.
    pub fn without_last_segment(&self) -> Option<Version> {
        if self.release.len() < 2 {
            return None;
        }
        let release: Vec<Segment> = self.release[..self.release.len() - 1].to_vec();
        let mut source = render_segments(&release);
        if self.epoch != 0 {
            source = format!("{}!{source}", self.epoch);
        }
        Some(Self {
            source,
            epoch: self.epoch,
            release,
            local: Vec::new(),
        })
    }
}

fn parse_segments(input: &str) -> Result<Vec<Segment>, &'static str> {
    if input.is_empty() {
        return Err("empty version component");
    }
    let mut segments = Vec::new();
    for part in input.split(['.', '_', '-']) {
        if part.is_empty() {
            return Err("empty version component");
        }
        segments.push(parse_segment(part)?);
    }
    Ok(segments)
}

fn parse_segment(part: &str) -> Result<Segment, &'static str> {
    let mut components = Vec::new();
    let mut run = String::new();
    let mut run_is_digit = false;

    for ch in part.chars() {
        let is_digit = ch.is_ascii_digit();
        if !run.is_empty() && is_digit != run_is_digit {
            components.push(classify(&run, run_is_digit)?);
            run.clear();
        }
        run_is_digit = is_digit;
        run.push(ch);
    }
    if !run.is_empty() {
        components.push(classify(&run, run_is_digit)?);
    }

    if !matches!(components.first(), Some(Component::Numeric(_))) {
        components.insert(0, Component::Numeric(0));
    }
    Ok(components)
}

fn classify(run: &str, is_digit: bool) -> Result<Component, &'static str> {
    if is_digit {
        return run
            .parse::<u64>()
            .map(Component::Numeric)
            .map_err(|_| "numeric version component is too large");
    }
    Ok(match run {
        "dev" => Component::Dev,
        "post" => Component::Post,
        _ => Component::Text(run.to_string()),
    })
}

fn render_segments(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|seg| {
            seg.iter()
                .map(|c| match c {
                    Component::Dev => "dev".to_string(),
                    Component::Post => "post".to_string(),
                    Component::Text(s) => s.clone(),
                    Component::Numeric(n) => n.to_string(),
                })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join(".")
}

fn compare_components(a: Option<&Component>, b: Option<&Component>) -> Ordering {
    let zero = Component::Numeric(0);
    a.unwrap_or(&zero).cmp(b.unwrap_or(&zero))
}

fn compare_segments(a: &[Component], b: &[Component]) -> Ordering {
    for i in 0..a.len().max(b.len()) {
        let ord = compare_components(a.get(i), b.get(i));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn compare_segment_lists(a: &[Segment], b: &[Segment]) -> Ordering {
    for i in 0..a.len().max(b.len()) {
        let sa = a.get(i).map(Vec::as_slice).unwrap_or(&[]);
        let sb = b.get(i).map(Vec::as_slice).unwrap_or(&[]);
        let ord = compare_segments(sa, sb);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn segments_start_with(segments: &[Segment], prefix: &[Segment]) -> bool {
    let Some((last, init)) = prefix.split_last() else {
        return true;
    };
    for (i, p) in init.iter().enumerate() {
        let s = segments.get(i).map(Vec::as_slice).unwrap_or(&[]);
        if compare_segments(s, p) != Ordering::Equal {
            return false;
        }
    }

    let s = segments.get(init.len()).map(Vec::as_slice).unwrap_or(&[]);
    let Some((p_last, p_init)) = last.split_last() else {
        return true;
    };
    for (i, pc) in p_init.iter().enumerate() {
        if compare_components(s.get(i), Some(pc)) != Ordering::Equal {
            return false;
        }
    }
    match (s.get(p_init.len()), p_last) {
        (Some(Component::Text(have)), Component::Text(want)) => have.starts_with(want.as_str()),
        (have, want) => compare_components(have, Some(want)) == Ordering::Equal,
    }
}

/// Segments with padding zeros stripped, so that equal versions hash equally.
fn normalized(segments: &[Segment]) -> Vec<&[Component]> {
    let mut out: Vec<&[Component]> = segments
        .iter()
        .map(|seg| {
            let end = seg
                .iter()
                .rposition(|c| *c != Component::Numeric(0))
                .map_or(0, |i| i + 1);
            &seg[..end]
        })
        .collect();
    while out.last().is_some_and(|s| s.is_empty()) {
        out.pop();
    }
    out
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.epoch.hash(state);
        for part in [&self.release, &self.local] {
            let segs = normalized(part);
            segs.len().hash(state);
            for seg in segs {
                seg.hash(state);
            }
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| compare_segment_lists(&self.release, &other.release))
            .then_with(|| compare_segment_lists(&self.local, &other.local))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for Version {
    type Err = CorralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Version::parse(&raw).map_err(serde::de::Error::custom)
    }
}
