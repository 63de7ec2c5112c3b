// src/version.rs

//! Package versions and dependency version ranges
//!
//! Package versions follow NuGet conventions: one to four numeric parts and an
//! optional prerelease label. Prerelease ordering reuses `semver`'s rules.

use crate::error::{Error, Result};
use semver::Prerelease;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageVersion {
    major: u64,
    minor: u64,
    patch: u64,
    revision: u64,
    pre: Prerelease,
}

impl PackageVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            revision: 0,
            pre: Prerelease::EMPTY,
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        // Build metadata never participates in ordering
        let without_build = trimmed.split('+').next().unwrap_or_default();
        let (numbers, pre) = match without_build.split_once('-') {
            Some((numbers, pre)) => (numbers, pre),
            None => (without_build, ""),
        };

        let parts = numbers
            .split('.')
            .map(|part| part.parse::<u64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| Error::InvalidVersion(input.to_string()))?;
        if parts.is_empty() || parts.len() > 4 {
            return Err(Error::InvalidVersion(input.to_string()));
        }

        let pre = if pre.is_empty() {
            Prerelease::EMPTY
        } else {
            Prerelease::new(pre).map_err(|_| Error::InvalidVersion(input.to_string()))?
        };

        Ok(Self {
            major: parts[0],
            minor: parts.get(1).copied().unwrap_or(0),
            patch: parts.get(2).copied().unwrap_or(0),
            revision: parts.get(3).copied().unwrap_or(0),
            pre,
        })
    }

    /// Best-effort parse of free-form display versions ("2.40.0.windows.1").
    ///
    /// Leading numeric parts are kept; anything unparseable becomes `0.0.0`.
    pub fn parse_lenient(input: &str) -> Self {
        if let Ok(version) = Self::parse(input) {
            return version;
        }
        let numbers: Vec<&str> = input
            .trim()
            .split(['.', '-', ' '])
            .take_while(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
            .take(4)
            .collect();
        if numbers.is_empty() {
            return Self::new(0, 0, 0);
        }
        Self::parse(&numbers.join(".")).unwrap_or_else(|_| Self::new(0, 0, 0))
    }

    pub fn is_prerelease(&self) -> bool {
        !self.pre.is_empty()
    }

    pub fn major(&self) -> u64 {
        self.major
    }

    pub fn minor(&self) -> u64 {
        self.minor
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch, self.revision)
            .cmp(&(other.major, other.minor, other.patch, other.revision))
            .then_with(|| match (self.pre.is_empty(), other.pre.is_empty()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => self.pre.cmp(&other.pre),
            })
    }
}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if self.revision > 0 {
            write!(f, ".{}", self.revision)?;
        }
        if !self.pre.is_empty() {
            write!(f, "-{}", self.pre)?;
        }
        Ok(())
    }
}

impl FromStr for PackageVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for PackageVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Version interval in NuGet notation (`1.0`, `[1.0]`, `[1.0,2.0)`, `(,2.0]`)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionRange {
    min: Option<PackageVersion>,
    min_inclusive: bool,
    max: Option<PackageVersion>,
    max_inclusive: bool,
}

impl VersionRange {
    /// Range accepting every version
    pub fn any() -> Self {
        Self::default()
    }

    pub fn exact(version: PackageVersion) -> Self {
        Self {
            min: Some(version.clone()),
            min_inclusive: true,
            max: Some(version),
            max_inclusive: true,
        }
    }

    pub fn at_least(version: PackageVersion) -> Self {
        Self {
            min: Some(version),
            min_inclusive: true,
            max: None,
            max_inclusive: false,
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        let s = input.trim();
        if s.is_empty() {
            return Ok(Self::any());
        }

        let first = s.chars().next().unwrap_or_default();
        if first != '[' && first != '(' {
            return Ok(Self::at_least(PackageVersion::parse(s)?));
        }

        let last = s.chars().last().unwrap_or_default();
        if s.len() < 2 || (last != ']' && last != ')') {
            return Err(Error::InvalidVersion(input.to_string()));
        }
        let inner = &s[1..s.len() - 1];
        let min_inclusive = first == '[';
        let max_inclusive = last == ']';

        let Some((low, high)) = inner.split_once(',') else {
            // "[1.0]" pins a single version; "(1.0)" is meaningless
            if !(min_inclusive && max_inclusive) {
                return Err(Error::InvalidVersion(input.to_string()));
            }
            return Ok(Self::exact(PackageVersion::parse(inner)?));
        };

        let parse_side = |side: &str| -> Result<Option<PackageVersion>> {
            let side = side.trim();
            if side.is_empty() {
                Ok(None)
            } else {
                PackageVersion::parse(side).map(Some)
            }
        };

        Ok(Self {
            min: parse_side(low)?,
            min_inclusive,
            max: parse_side(high)?,
            max_inclusive,
        })
    }

    pub fn satisfies(&self, version: &PackageVersion) -> bool {
        if let Some(min) = &self.min {
            match version.cmp(min) {
                Ordering::Less => return false,
                Ordering::Equal if !self.min_inclusive => return false,
                _ => {}
            }
        }
        if let Some(max) = &self.max {
            match version.cmp(max) {
                Ordering::Greater => return false,
                Ordering::Equal if !self.max_inclusive => return false,
                _ => {}
            }
        }
        true
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.min, &self.max) {
            (None, None) => Ok(()),
            (Some(min), None) if self.min_inclusive => write!(f, "{}", min),
            (Some(min), Some(max)) if min == max && self.min_inclusive && self.max_inclusive => {
                write!(f, "[{}]", min)
            }
            (min, max) => {
                write!(f, "{}", if self.min_inclusive { '[' } else { '(' })?;
                if let Some(min) = min {
                    write!(f, "{}", min)?;
                }
                write!(f, ",")?;
                if let Some(max) = max {
                    write!(f, "{}", max)?;
                }
                write!(f, "{}", if self.max_inclusive { ']' } else { ')' })
            }
        }
    }
}
