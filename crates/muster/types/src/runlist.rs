//! Run lists: validated `role[name]` / `recipe[name]` tokens
//!
//! A [`RunListItem`] can only be obtained by parsing, so holding one means
//! the token was valid. A [`RunList`] routes every insertion through the
//! parser, so an invalid token fails the push itself rather than some later
//! validation pass.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<kind>role|recipe)\[(?P<name>.*)\]$").expect("run list token pattern")
});

static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("run list name pattern"));

// ── RunListKind ──────────────────────────────────────────────────────

/// What a run list token refers to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunListKind {
    Role,
    Recipe,
}

impl RunListKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunListKind::Role => "role",
            RunListKind::Recipe => "recipe",
        }
    }
}

impl fmt::Display for RunListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── RunListItem ──────────────────────────────────────────────────────

/// A single validated run list token such as `role[dns_server]`
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunListItem {
    kind: RunListKind,
    name: String,
}

impl RunListItem {
    /// Parse a token of the form `kind[name]`.
    ///
    /// Fails with [`ModelError::InvalidRunlistType`] when the token does not
    /// have that shape, and with [`ModelError::InvalidRunlistName`] when the
    /// name is empty or contains anything other than `[A-Za-z0-9_]`.
    pub fn parse(token: &str) -> Result<Self> {
        let captures = TOKEN
            .captures(token)
            .ok_or_else(|| ModelError::InvalidRunlistType {
                token: token.to_string(),
            })?;

        let kind = match &captures["kind"] {
            "role" => RunListKind::Role,
            "recipe" => RunListKind::Recipe,
            _ => {
                return Err(ModelError::InvalidRunlistType {
                    token: token.to_string(),
                })
            }
        };

        let name = &captures["name"];
        if name.is_empty() {
            return Err(ModelError::InvalidRunlistName {
                token: token.to_string(),
                reason: "name cannot be empty".into(),
            });
        }
        if !WORD.is_match(name) {
            return Err(ModelError::InvalidRunlistName {
                token: token.to_string(),
                reason: "name must be [A-Za-z0-9_]".into(),
            });
        }

        Ok(Self {
            kind,
            name: name.to_string(),
        })
    }

    pub fn kind(&self) -> RunListKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for RunListItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.kind, self.name)
    }
}

impl FromStr for RunListItem {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RunListItem {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<RunListItem> for String {
    fn from(item: RunListItem) -> Self {
        item.to_string()
    }
}

// ── RunList ──────────────────────────────────────────────────────────

/// An ordered sequence of run list items
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunList(Vec<RunListItem>);

impl RunList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Parse every token, failing on the first invalid one.
    pub fn parse<I, S>(tokens: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::new();
        for token in tokens {
            list.push(token.as_ref())?;
        }
        Ok(list)
    }

    /// Parse and append a token. The list is unchanged on failure.
    pub fn push(&mut self, token: &str) -> Result<&RunListItem> {
        let item = RunListItem::parse(token)?;
        self.0.push(item);
        Ok(&self.0[self.0.len() - 1])
    }

    /// Append an already validated item.
    pub fn push_item(&mut self, item: RunListItem) {
        self.0.push(item);
    }

    pub fn contains(&self, item: &RunListItem) -> bool {
        self.0.contains(item)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RunListItem> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// The list as its original string tokens.
    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(ToString::to_string).collect()
    }
}

impl<'a> IntoIterator for &'a RunList {
    type Item = &'a RunListItem;
    type IntoIter = std::slice::Iter<'a, RunListItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<RunListItem> for RunList {
    fn from_iter<T: IntoIterator<Item = RunListItem>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for RunList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.to_strings().join(", "))
    }
}
