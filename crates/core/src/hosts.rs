use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StorageInventoryError};

/// Largest number of hosts a single node-set expression may expand to.
pub const MAX_EXPANDED_HOSTS: usize = 65_536;

/// Sorted set of host names.
///
/// Parses node-set expressions such as `wolf-[1-3,7],boro-2`, where each
/// bracket group holds comma separated numbers or inclusive ranges. Zero padded
/// bounds (`node[01-03]`) keep their width.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HostSet {
    hosts: BTreeSet<String>,
}

impl HostSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(expression: &str) -> Result<Self> {
        let mut hosts = BTreeSet::new();
        for element in split_top_level(expression)? {
            let element = element.trim();
            if element.is_empty() {
                continue;
            }
            for host in expand_pattern(expression, element)? {
                hosts.insert(host);
            }
            if hosts.len() > MAX_EXPANDED_HOSTS {
                return Err(too_many_hosts(expression));
            }
        }
        Ok(Self { hosts })
    }

    pub fn insert(&mut self, host: impl Into<String>) -> bool {
        self.hosts.insert(host.into())
    }

    pub fn update(&mut self, other: &HostSet) {
        self.hosts.extend(other.hosts.iter().cloned());
    }

    pub fn union(&self, other: &HostSet) -> HostSet {
        let mut merged = self.clone();
        merged.update(other);
        merged
    }

    pub fn contains(&self, host: &str) -> bool {
        self.hosts.contains(host)
    }

    pub fn is_subset(&self, other: &HostSet) -> bool {
        self.hosts.is_subset(&other.hosts)
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.hosts.iter().map(String::as_str)
    }
}

impl fmt::Display for HostSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self.hosts.iter().cloned().collect::<Vec<_>>().join(",");
        f.write_str(&joined)
    }
}

impl FromStr for HostSet {
    type Err = StorageInventoryError;

    fn from_str(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

impl TryFrom<String> for HostSet {
    type Error = StorageInventoryError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<HostSet> for String {
    fn from(value: HostSet) -> Self {
        value.to_string()
    }
}

impl<S: Into<String>> FromIterator<S> for HostSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            hosts: iter.into_iter().map(Into::into).collect(),
        }
    }
}

fn split_top_level(expression: &str) -> Result<Vec<&str>> {
    let mut parts = Vec::new();
    let mut depth = 0_usize;
    let mut start = 0;

    for (index, ch) in expression.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| invalid(expression, "unbalanced ']'"))?;
            }
            ',' if depth == 0 => {
                parts.push(&expression[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(invalid(expression, "unterminated '['"));
    }
    parts.push(&expression[start..]);
    Ok(parts)
}

fn expand_pattern(expression: &str, pattern: &str) -> Result<Vec<String>> {
    let Some(open) = pattern.find('[') else {
        return Ok(vec![pattern.to_string()]);
    };
    let close = pattern[open..]
        .find(']')
        .map(|offset| open + offset)
        .ok_or_else(|| invalid(expression, "unterminated '['"))?;

    let prefix = &pattern[..open];
    let values = expand_ranges(expression, &pattern[open + 1..close])?;
    let suffixes = expand_pattern(expression, &pattern[close + 1..])?;
    if values.len().saturating_mul(suffixes.len()) > MAX_EXPANDED_HOSTS {
        return Err(too_many_hosts(expression));
    }

    let mut hosts = Vec::with_capacity(values.len() * suffixes.len());
    for value in &values {
        for suffix in &suffixes {
            hosts.push(format!("{prefix}{value}{suffix}"));
        }
    }
    Ok(hosts)
}

fn expand_ranges(expression: &str, ranges: &str) -> Result<Vec<String>> {
    let mut values = Vec::new();
    for range in ranges.split(',') {
        let range = range.trim();
        if range.is_empty() {
            return Err(invalid(expression, "empty range"));
        }
        let (low, high) = range.split_once('-').unwrap_or((range, range));
        let width = if low.len() > 1 && low.starts_with('0') {
            low.len()
        } else {
            0
        };
        let low_value = parse_bound(expression, low)?;
        let high_value = parse_bound(expression, high)?;
        if low_value > high_value {
            return Err(invalid(expression, &format!("descending range '{range}'")));
        }
        let count = (high_value - low_value).saturating_add(1);
        if count > (MAX_EXPANDED_HOSTS - values.len()) as u64 {
            return Err(too_many_hosts(expression));
        }
        values.extend((low_value..=high_value).map(|value| format!("{value:0width$}")));
    }
    Ok(values)
}

fn parse_bound(expression: &str, bound: &str) -> Result<u64> {
    bound
        .trim()
        .parse::<u64>()
        .map_err(|_| invalid(expression, &format!("'{bound}' is not a number")))
}

fn too_many_hosts(expression: &str) -> StorageInventoryError {
    invalid(
        expression,
        &format!("expands to more than {MAX_EXPANDED_HOSTS} hosts"),
    )
}

fn invalid(expression: &str, reason: &str) -> StorageInventoryError {
    StorageInventoryError::InvalidHostSet {
        expression: expression.to_string(),
        reason: reason.to_string(),
    }
}
