//! Match specs: the constraint expressions used for requests, dependencies
//! and `constrains` entries.
//!
//! A [`MatchSpec`] names a package and optionally restricts its version,
//! build string, build number, channel and subdir. The version part is a
//! [`VersionSpec`] tree where `,` (AND) binds tighter than `|` (OR) and
//! parentheses group. Any version tree can be rewritten in conjunctive
//! normal form, which is how specs on the same name are merged.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use corral_util::errors::CorralError;
use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::record::PackageRecord;
use crate::version::Version;

fn invalid(spec: &str, reason: impl Into<String>) -> CorralError {
    CorralError::InvalidSpec {
        spec: spec.to_string(),
        reason: reason.into(),
    }
}

/// Re-attribute a nested parse error to the full spec the user wrote.
fn reword(err: CorralError, full: &str) -> CorralError {
    match err {
        CorralError::InvalidSpec { reason, .. } => invalid(full, reason),
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Version constraints
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionOperator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    StartsWith,
    NotStartsWith,
}

/// A single relational constraint such as `>=1.2` or `1.2.*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionConstraint {
    pub op: VersionOperator,
    pub version: Version,
}

impl VersionConstraint {
    pub fn new(op: VersionOperator, version: Version) -> Self {
        Self { op, version }
    }

    pub fn matches(&self, candidate: &Version) -> bool {
        match self.op {
            VersionOperator::Eq => candidate == &self.version,
            VersionOperator::Ne => candidate != &self.version,
            VersionOperator::Gt => candidate > &self.version,
            VersionOperator::Ge => candidate >= &self.version,
            VersionOperator::Lt => candidate < &self.version,
            VersionOperator::Le => candidate <= &self.version,
            VersionOperator::StartsWith => candidate.starts_with(&self.version),
            VersionOperator::NotStartsWith => !candidate.starts_with(&self.version),
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = &self.version;
        match self.op {
            VersionOperator::Eq => write!(f, "=={v}"),
            VersionOperator::Ne => write!(f, "!={v}"),
            VersionOperator::Gt => write!(f, ">{v}"),
            VersionOperator::Ge => write!(f, ">={v}"),
            VersionOperator::Lt => write!(f, "<{v}"),
            VersionOperator::Le => write!(f, "<={v}"),
            VersionOperator::StartsWith => write!(f, "{v}.*"),
            VersionOperator::NotStartsWith => write!(f, "!={v}.*"),
        }
    }
}

/// A version expression tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionSpec {
    /// Matches every version (`*`).
    Any,
    Constraint(VersionConstraint),
    /// Every child must match (`,`).
    All(Vec<VersionSpec>),
    /// At least one child must match (`|`).
    AnyOf(Vec<VersionSpec>),
}

impl VersionSpec {
    pub fn parse(input: &str) -> Result<Self, CorralError> {
        let mut parser = VersionParser {
            text: input,
            pos: 0,
        };
        let spec = parser.parse_or()?;
        parser.skip_ws();
        if parser.pos != input.len() {
            return Err(invalid(
                input,
                format!("unexpected '{}'", &input[parser.pos..]),
            ));
        }
        Ok(spec)
    }

    pub fn matches(&self, version: &Version) -> bool {
        match self {
            VersionSpec::Any => true,
            VersionSpec::Constraint(c) => c.matches(version),
            VersionSpec::All(children) => children.iter().all(|c| c.matches(version)),
            VersionSpec::AnyOf(children) => children.iter().any(|c| c.matches(version)),
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, VersionSpec::Any)
    }

    /// Number of clauses [`VersionSpec::to_cnf`] would produce, saturating.
    pub fn cnf_len(&self) -> usize {
        match self {
            VersionSpec::Any => 0,
            VersionSpec::Constraint(_) => 1,
            VersionSpec::All(children) => children.iter().fold(0, |n, c| n.saturating_add(c.cnf_len())),
            VersionSpec::AnyOf(children) => {
                let mut n: usize = 1;
                for child in children {
                    match child.cnf_len() {
                        0 => return 0,
                        len => n = n.saturating_mul(len),
                    }
                }
                n
            }
        }
    }

    /// Rewrite as an AND of OR-clauses. `Any` yields no clauses.
    ///
    /// OR distributes over AND, so the clause count is the product of the
    /// disjuncts' counts; check [`VersionSpec::cnf_len`] first.
    pub fn to_cnf(&self) -> Vec<Vec<VersionConstraint>> {
        match self {
            VersionSpec::Any => Vec::new(),
            VersionSpec::Constraint(c) => vec![vec![c.clone()]],
            VersionSpec::All(children) => children.iter().flat_map(|c| c.to_cnf()).collect(),
            VersionSpec::AnyOf(children) => {
                let mut acc: Vec<Vec<VersionConstraint>> = vec![Vec::new()];
                for child in children {
                    let clauses = child.to_cnf();
                    if clauses.is_empty() {
                        return Vec::new();
                    }
                    let mut next = Vec::with_capacity(acc.len() * clauses.len());
                    for left in &acc {
                        for right in &clauses {
                            let mut merged = left.clone();
                            for atom in right {
                                if !merged.contains(atom) {
                                    merged.push(atom.clone());
                                }
                            }
                            next.push(merged);
                        }
                    }
                    acc = next;
                }
                acc
            }
        }
    }

    /// Build a tree from CNF clauses, dropping duplicate clauses.
    pub fn from_cnf(clauses: Vec<Vec<VersionConstraint>>) -> Self {
        let mut unique: Vec<Vec<VersionConstraint>> = Vec::new();
        for clause in clauses {
            if !clause.is_empty() && !unique.contains(&clause) {
                unique.push(clause);
            }
        }
        all_of(
            unique
                .into_iter()
                .map(|clause| any_of(clause.into_iter().map(VersionSpec::Constraint).collect()))
                .collect(),
        )
    }

    /// The CNF form of this tree, or the tree itself when its CNF would
    /// exceed [`MAX_CNF_CLAUSES`].
    pub fn normalized(&self) -> Self {
        if self.cnf_len() > MAX_CNF_CLAUSES {
            return self.clone();
        }
        Self::from_cnf(self.to_cnf())
    }
}

/// Largest CNF that merging and normalizing will build.
pub const MAX_CNF_CLAUSES: usize = 256;

fn all_of(items: Vec<VersionSpec>) -> VersionSpec {
    let mut flat = Vec::new();
    for item in items {
        match item {
            VersionSpec::Any => {}
            VersionSpec::All(inner) => flat.extend(inner),
            other => flat.push(other),
        }
    }
    match flat.len() {
        0 => VersionSpec::Any,
        1 => flat.swap_remove(0),
        _ => VersionSpec::All(flat),
    }
}

fn any_of(items: Vec<VersionSpec>) -> VersionSpec {
    let mut flat = Vec::new();
    for item in items {
        match item {
            VersionSpec::Any => return VersionSpec::Any,
            VersionSpec::AnyOf(inner) => flat.extend(inner),
            other => flat.push(other),
        }
    }
    match flat.len() {
        0 => VersionSpec::Any,
        1 => flat.swap_remove(0),
        _ => VersionSpec::AnyOf(flat),
    }
}

struct VersionParser<'a> {
    text: &'a str,
    pos: usize,
}

impl VersionParser<'_> {
    fn skip_ws(&mut self) {
        while self.pos < self.text.len() && self.text.as_bytes()[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn eat(&mut self, byte: u8) -> bool {
        self.skip_ws();
        if self.text.as_bytes().get(self.pos) == Some(&byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<VersionSpec, CorralError> {
        let mut items = vec![self.parse_and()?];
        while self.eat(b'|') {
            items.push(self.parse_and()?);
        }
        Ok(any_of(items))
    }

    fn parse_and(&mut self) -> Result<VersionSpec, CorralError> {
        let mut items = vec![self.parse_term()?];
        while self.eat(b',') {
            items.push(self.parse_term()?);
        }
        Ok(all_of(items))
    }

    fn parse_term(&mut self) -> Result<VersionSpec, CorralError> {
        if self.eat(b'(') {
            let inner = self.parse_or()?;
            if !self.eat(b')') {
                return Err(invalid(self.text, "unbalanced parenthesis"));
            }
            return Ok(inner);
        }
        let start = self.pos;
        while let Some(b) = self.text.as_bytes().get(self.pos) {
            if matches!(b, b',' | b'|' | b'(' | b')') {
                break;
            }
            self.pos += 1;
        }
        parse_atom(&self.text[start..self.pos], self.text)
    }
}

const OPERATORS: [&str; 8] = ["==", "!=", ">=", "<=", "~=", ">", "<", "="];

fn parse_atom(atom: &str, full: &str) -> Result<VersionSpec, CorralError> {
    let atom = atom.trim();
    if atom.is_empty() {
        return Err(invalid(full, "empty version constraint"));
    }
    if atom == "*" {
        return Ok(VersionSpec::Any);
    }

    let op = OPERATORS.iter().find(|op| atom.starts_with(**op)).copied();
    let rest = atom[op.map_or(0, str::len)..].trim();
    if rest.is_empty() {
        return Err(invalid(full, format!("operator '{atom}' has no version")));
    }

    let (glob, text) = if let Some(stripped) = rest.strip_suffix(".*") {
        (true, stripped)
    } else if let Some(stripped) = rest.strip_suffix('*') {
        (true, stripped)
    } else {
        (false, rest)
    };
    if text.is_empty() {
        return match op {
            None | Some("==") | Some("=") => Ok(VersionSpec::Any),
            Some(op) => Err(invalid(full, format!("operator '{op}' needs a concrete version"))),
        };
    }

    let version = Version::parse(text).map_err(|e| reword(e, full))?;
    let constraint = |op: VersionOperator| -> Result<VersionSpec, CorralError> {
        Ok(VersionSpec::Constraint(VersionConstraint::new(op, version.clone())))
    };
    match (op, glob) {
        (None, false) | (Some("=="), false) => constraint(VersionOperator::Eq),
        (None, true) | (Some("=="), true) | (Some("="), _) => constraint(VersionOperator::StartsWith),
        (Some("!="), false) => constraint(VersionOperator::Ne),
        (Some("!="), true) => constraint(VersionOperator::NotStartsWith),
        (Some(">="), _) => constraint(VersionOperator::Ge),
        (Some("<="), _) => constraint(VersionOperator::Le),
        (Some(">"), _) => constraint(VersionOperator::Gt),
        (Some("<"), _) => constraint(VersionOperator::Lt),
        (Some("~="), _) => {
            let prefix = version.without_last_segment().ok_or_else(|| {
                invalid(full, "'~=' needs a version with at least two segments")
            })?;
            Ok(VersionSpec::All(vec![
                VersionSpec::Constraint(VersionConstraint::new(VersionOperator::Ge, version.clone())),
                VersionSpec::Constraint(VersionConstraint::new(VersionOperator::StartsWith, prefix)),
            ]))
        }
        (Some(op), _) => Err(invalid(full, format!("unknown operator '{op}'"))),
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSpec::Any => f.write_str("*"),
            VersionSpec::Constraint(c) => write!(f, "{c}"),
            VersionSpec::All(children) => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    match child {
                        VersionSpec::AnyOf(_) => write!(f, "({child})")?,
                        _ => write!(f, "{child}")?,
                    }
                }
                Ok(())
            }
            VersionSpec::AnyOf(children) => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str("|")?;
                    }
                    write!(f, "{child}")?;
                }
                Ok(())
            }
        }
    }
}

impl FromStr for VersionSpec {
    type Err = CorralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VersionSpec::parse(s)
    }
}

// ---------------------------------------------------------------------------
// String matchers (build strings, name globs)
// ---------------------------------------------------------------------------

/// An exact string or a shell-style glob (`*`, `?`, `[..]`).
#[derive(Debug, Clone)]
pub enum StringMatcher {
    Exact(String),
    Glob { pattern: String, matcher: GlobMatcher },
}

impl StringMatcher {
    pub fn parse(pattern: &str) -> Result<Self, String> {
        if pattern.contains(['*', '?', '[']) {
            let glob = Glob::new(pattern).map_err(|e| e.to_string())?;
            Ok(StringMatcher::Glob {
                pattern: pattern.to_string(),
                matcher: glob.compile_matcher(),
            })
        } else {
            Ok(StringMatcher::Exact(pattern.to_string()))
        }
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            StringMatcher::Exact(s) => s == value,
            StringMatcher::Glob { matcher, .. } => matcher.is_match(value),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            StringMatcher::Exact(s) => s,
            StringMatcher::Glob { pattern, .. } => pattern,
        }
    }
}

impl PartialEq for StringMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for StringMatcher {}

impl Hash for StringMatcher {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl fmt::Display for StringMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build number restriction, e.g. `build_number='>=3'`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BuildNumberSpec {
    pub op: VersionOperator,
    pub value: u64,
}

impl BuildNumberSpec {
    fn parse(text: &str, full: &str) -> Result<Self, CorralError> {
        let text = text.trim();
        let (op, rest) = [
            ("==", VersionOperator::Eq),
            ("!=", VersionOperator::Ne),
            (">=", VersionOperator::Ge),
            ("<=", VersionOperator::Le),
            (">", VersionOperator::Gt),
            ("<", VersionOperator::Lt),
            ("=", VersionOperator::Eq),
        ]
        .iter()
        .find_map(|(prefix, op)| text.strip_prefix(prefix).map(|rest| (*op, rest)))
        .unwrap_or((VersionOperator::Eq, text));
        let value = rest
            .trim()
            .parse::<u64>()
            .map_err(|_| invalid(full, format!("build number '{text}' is not an integer")))?;
        Ok(Self { op, value })
    }

    pub fn matches(&self, n: u64) -> bool {
        match self.op {
            VersionOperator::Ne => n != self.value,
            VersionOperator::Gt => n > self.value,
            VersionOperator::Ge => n >= self.value,
            VersionOperator::Lt => n < self.value,
            VersionOperator::Le => n <= self.value,
            _ => n == self.value,
        }
    }
}

impl fmt::Display for BuildNumberSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            VersionOperator::Ne => "!=",
            VersionOperator::Gt => ">",
            VersionOperator::Ge => ">=",
            VersionOperator::Lt => "<",
            VersionOperator::Le => "<=",
            _ => "",
        };
        write!(f, "{op}{}", self.value)
    }
}

// ---------------------------------------------------------------------------
// MatchSpec
// ---------------------------------------------------------------------------

/// A package constraint: name plus optional version, build, build number,
/// channel and subdir restrictions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchSpec {
    /// Lowercased package name. May contain `*` when used as a removal glob.
    pub name: String,
    pub version: Option<VersionSpec>,
    pub build: Option<StringMatcher>,
    pub build_number: Option<BuildNumberSpec>,
    pub channel: Option<String>,
    pub subdir: Option<String>,
}

impl MatchSpec {
    /// A spec that matches any record with this name.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_lowercase(),
            version: None,
            build: None,
            build_number: None,
            channel: None,
            subdir: None,
        }
    }

    /// A spec that matches exactly one record identity.
    pub fn for_record(record: &PackageRecord) -> Self {
        Self {
            name: record.name.clone(),
            version: Some(VersionSpec::Constraint(VersionConstraint::new(
                VersionOperator::Eq,
                record.version.clone(),
            ))),
            build: Some(StringMatcher::Exact(record.build.clone())),
            build_number: None,
            channel: (!record.channel.is_empty()).then(|| record.channel.clone()),
            subdir: None,
        }
    }

    pub fn parse(input: &str) -> Result<Self, CorralError> {
        let mut text = input.trim();
        if text.is_empty() {
            return Err(invalid(input, "empty spec"));
        }

        let mut brackets = Vec::new();
        if text.ends_with(']') {
            let open = text
                .find('[')
                .ok_or_else(|| invalid(input, "unmatched ']'"))?;
            brackets = parse_brackets(&text[open + 1..text.len() - 1])
                .map_err(|reason| invalid(input, reason))?;
            text = text[..open].trim_end();
        }

        let mut channel = None;
        if let Some((ch, rest)) = text.split_once("::") {
            let ch = ch.trim();
            if ch.is_empty() {
                return Err(invalid(input, "empty channel before '::'"));
            }
            channel = Some(ch.trim_end_matches('/').to_string());
            text = rest.trim();
        }

        let name_end = text
            .find(|c: char| c.is_whitespace() || matches!(c, '=' | '<' | '>' | '!' | '~'))
            .unwrap_or(text.len());
        let name = text[..name_end].to_lowercase();
        if name.is_empty() {
            return Err(invalid(input, "missing package name"));
        }
        if let Some(c) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '*')))
        {
            return Err(invalid(input, format!("invalid character '{c}' in package name")));
        }

        let (mut version, mut build) = split_version_build(&text[name_end..], input)?;
        let mut build_number = None;
        let mut subdir = None;
        for (key, value) in brackets {
            match key.as_str() {
                "version" => version = Some(value),
                "build" => build = Some(value),
                "build_number" => build_number = Some(BuildNumberSpec::parse(&value, input)?),
                "channel" => channel = Some(value.trim_end_matches('/').to_string()),
                "subdir" => subdir = Some(value),
                other => return Err(invalid(input, format!("unsupported bracket key '{other}'"))),
            }
        }

        let version = match version {
            Some(v) => Some(VersionSpec::parse(&v).map_err(|e| reword(e, input))?),
            None => None,
        }
        .filter(|v| !v.is_any());
        let build = match build {
            Some(b) => Some(StringMatcher::parse(&b).map_err(|reason| invalid(input, reason))?),
            None => None,
        };

        Ok(Self {
            name,
            version,
            build,
            build_number,
            channel,
            subdir,
        })
    }

    pub fn is_name_glob(&self) -> bool {
        self.name.contains('*')
    }

    pub fn matches_name(&self, name: &str) -> bool {
        if !self.is_name_glob() {
            return self.name == name;
        }
        StringMatcher::parse(&self.name).is_ok_and(|m| m.matches(name))
    }

    pub fn matches(&self, record: &PackageRecord) -> bool {
        self.matches_name(&record.name)
            && self.version.as_ref().is_none_or(|v| v.matches(&record.version))
            && self.build.as_ref().is_none_or(|b| b.matches(&record.build))
            && self.build_number.is_none_or(|b| b.matches(record.build_number))
            && self
                .channel
                .as_ref()
                .is_none_or(|c| channel_matches(c, &record.channel))
            && self
                .subdir
                .as_ref()
                .is_none_or(|s| record.subdir.as_deref().is_none_or(|r| r == s))
    }

    /// Intersect two specs on the same name by concatenating their version
    /// clauses. Returns `None` when names differ or the non-version fields
    /// contradict each other. Versions whose CNF would be too large are
    /// joined as a plain conjunction instead.
    pub fn merge(&self, other: &MatchSpec) -> Option<MatchSpec> {
        if self.name != other.name {
            return None;
        }
        let version = match (&self.version, &other.version) {
            (Some(a), Some(b)) if a.cnf_len().saturating_add(b.cnf_len()) > MAX_CNF_CLAUSES => {
                Some(all_of(vec![a.clone(), b.clone()]))
            }
            (Some(a), Some(b)) => {
                let mut clauses = a.to_cnf();
                clauses.extend(b.to_cnf());
                Some(VersionSpec::from_cnf(clauses)).filter(|v| !v.is_any())
            }
            (Some(v), None) | (None, Some(v)) => Some(v.clone()),
            (None, None) => None,
        };
        Some(MatchSpec {
            name: self.name.clone(),
            version,
            build: merge_field(&self.build, &other.build)?,
            build_number: merge_field(&self.build_number, &other.build_number)?,
            channel: merge_field(&self.channel, &other.channel)?,
            subdir: merge_field(&self.subdir, &other.subdir)?,
        })
    }
}

fn merge_field<T: PartialEq + Clone>(a: &Option<T>, b: &Option<T>) -> Option<Option<T>> {
    match (a, b) {
        (Some(x), Some(y)) if x != y => None,
        (Some(x), _) => Some(Some(x.clone())),
        (None, y) => Some(y.clone()),
    }
}

/// A spec channel matches a record channel by name or by the last path
/// segment of a channel URL.
fn channel_matches(wanted: &str, have: &str) -> bool {
    if wanted == have {
        return true;
    }
    let tail = |s: &str| s.trim_end_matches('/').rsplit('/').next().unwrap_or("").to_string();
    !have.is_empty() && tail(wanted) == tail(have)
}

/// Remove whitespace that only separates an operator from its operand or
/// surrounds `,` and `|`.
fn collapse_operator_spaces(text: &str) -> String {
    let chars: Vec<char> = text.trim().chars().collect();
    let mut out = String::with_capacity(chars.len());
    for (i, &c) in chars.iter().enumerate() {
        if c.is_whitespace() {
            let prev = out.chars().last();
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            let glued_prev = prev.is_some_and(|p| matches!(p, '=' | '<' | '>' | '!' | '~' | ',' | '|' | '('));
            let glued_next = next.is_some_and(|n| matches!(n, ',' | '|' | ')'));
            if glued_prev || glued_next {
                continue;
            }
        }
        out.push(c);
    }
    out
}

fn split_version_build(
    rest: &str,
    full: &str,
) -> Result<(Option<String>, Option<String>), CorralError> {
    let rest = collapse_operator_spaces(rest);
    if rest.is_empty() {
        return Ok((None, None));
    }

    let tokens: Vec<&str> = rest.split_whitespace().collect();
    if tokens.len() > 1 {
        return match tokens.as_slice() {
            [version, build] => Ok((Some(version.to_string()), Some(build.to_string()))),
            _ => Err(invalid(full, "expected at most a version and a build string")),
        };
    }

    // conda-build forms: `=1.2`, `=1.2=build`, `==1.2=build`. With a build
    // the leading `=` is dropped, so the version is exact.
    let Some(body) = rest.strip_prefix("==").or_else(|| rest.strip_prefix('=')) else {
        return Ok((Some(rest), None));
    };
    match body.split_once('=') {
        Some((version, build)) => {
            if version.is_empty() || build.is_empty() {
                return Err(invalid(full, "empty version or build in '=version=build'"));
            }
            Ok((Some(version.to_string()), Some(build.to_string())))
        }
        None => Ok((Some(rest), None)),
    }
}

fn parse_brackets(inner: &str) -> Result<Vec<(String, String)>, String> {
    let chars: Vec<char> = inner.chars().collect();
    let mut entries = Vec::new();
    let mut i = 0;
    loop {
        while i < chars.len() && (chars[i].is_whitespace() || chars[i] == ',') {
            i += 1;
        }
        if i >= chars.len() {
            break;
        }

        let key_start = i;
        while i < chars.len() && chars[i] != '=' {
            i += 1;
        }
        let key: String = chars[key_start..i].iter().collect::<String>().trim().to_string();
        if i >= chars.len() || key.is_empty() {
            return Err(format!("bracket entry '{key}' has no value"));
        }
        i += 1;
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }

        let value = match chars.get(i) {
            Some(&quote) if quote == '\'' || quote == '"' => {
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|&c| c == quote)
                    .map(|p| start + p)
                    .ok_or_else(|| format!("unterminated quote in bracket value for '{key}'"))?;
                i = end + 1;
                chars[start..end].iter().collect::<String>()
            }
            _ => {
                let start = i;
                while i < chars.len() && chars[i] != ',' {
                    i += 1;
                }
                chars[start..i].iter().collect::<String>().trim().to_string()
            }
        };
        if value.is_empty() {
            return Err(format!("bracket entry '{key}' has an empty value"));
        }
        entries.push((key, value));
    }
    Ok(entries)
}

impl fmt::Display for MatchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(channel) = &self.channel {
            write!(f, "{channel}::")?;
        }
        f.write_str(&self.name)?;
        match (&self.version, &self.build) {
            (Some(v), Some(b)) => write!(f, " {v} {b}")?,
            (Some(v), None) => write!(f, " {v}")?,
            (None, Some(b)) => write!(f, " * {b}")?,
            (None, None) => {}
        }
        let mut extras = Vec::new();
        if let Some(n) = &self.build_number {
            extras.push(format!("build_number='{n}'"));
        }
        if let Some(s) = &self.subdir {
            extras.push(format!("subdir='{s}'"));
        }
        if !extras.is_empty() {
            write!(f, "[{}]", extras.join(", "))?;
        }
        Ok(())
    }
}

impl FromStr for MatchSpec {
    type Err = CorralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MatchSpec::parse(s)
    }
}

impl Serialize for MatchSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MatchSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        MatchSpec::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vs(s: &str) -> VersionSpec {
        VersionSpec::parse(s).unwrap()
    }

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let spec = vs(">=1,<2|>=3");
        assert!(spec.matches(&v("1.5")));
        assert!(!spec.matches(&v("2.5")));
        assert!(spec.matches(&v("3.1")));
        assert_eq!(spec.to_string(), ">=1,<2|>=3");
    }

    #[test]
    fn parentheses_group() {
        let spec = vs("(1.0|2.0),!=2.0");
        assert!(spec.matches(&v("1.0")));
        assert!(!spec.matches(&v("2.0")));
        assert_eq!(spec.to_string(), "(==1.0|==2.0),!=2.0");
    }

    #[test]
    fn glob_and_fuzzy_forms() {
        assert!(vs("1.2.*").matches(&v("1.2.7")));
        assert!(vs("1.2*").matches(&v("1.2.7")));
        assert!(vs("=1.2").matches(&v("1.2.7")));
        assert!(!vs("=1.2").matches(&v("1.3")));
        assert!(!vs("!=1.2.*").matches(&v("1.2.1")));
        assert!(vs(">=1.2.*").matches(&v("1.3")));
        assert!(vs("*").is_any());
    }

    #[test]
    fn compatible_release() {
        let spec = vs("~=1.4.2");
        assert!(spec.matches(&v("1.4.5")));
        assert!(!spec.matches(&v("1.5.0")));
        assert!(!spec.matches(&v("1.4.1")));
        assert!(VersionSpec::parse("~=1").is_err());
    }

    #[test]
    fn cnf_distributes_or_over_and() {
        let cnf = vs("(>=1,<2)|3.*").to_cnf();
        assert_eq!(cnf.len(), 2);
        assert!(cnf.iter().all(|clause| clause.len() == 2));
        let back = VersionSpec::from_cnf(cnf);
        for sample in ["1.5", "2.5", "3.0", "0.9"] {
            assert_eq!(
                back.matches(&v(sample)),
                vs("(>=1,<2)|3.*").matches(&v(sample)),
                "{sample}"
            );
        }
    }

    #[test]
    fn malformed_version_specs() {
        for bad in ["", ">=", "1.0,", "(1.0", "1.0)", ">=*", "1..0", ">=1.0 beta"] {
            assert!(VersionSpec::parse(bad).is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn collapse_spaces() {
        assert_eq!(collapse_operator_spaces(">= 1.0 , < 2"), ">=1.0,<2");
        assert_eq!(collapse_operator_spaces("1.0 py38_0"), "1.0 py38_0");
        assert_eq!(collapse_operator_spaces("1.0 | 2.0 *_0"), "1.0|2.0 *_0");
    }

    #[test]
    fn bracket_values() {
        let entries = parse_brackets("version='>=1,<2', build=py*").unwrap();
        assert_eq!(
            entries,
            vec![
                ("version".to_string(), ">=1,<2".to_string()),
                ("build".to_string(), "py*".to_string())
            ]
        );
        assert!(parse_brackets("version='1.0").is_err());
        assert!(parse_brackets("version").is_err());
    }

    #[test]
    fn channel_tail_match() {
        assert!(channel_matches("conda-forge", "conda-forge"));
        assert!(channel_matches("https://conda.anaconda.org/conda-forge", "conda-forge"));
        assert!(!channel_matches("defaults", "conda-forge"));
    }
}
