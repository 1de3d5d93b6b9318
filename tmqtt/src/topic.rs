use std::fmt::{self, Write};
use std::ops;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TopicError {
    #[error("InvalidTopic({0})")]
    InvalidTopic(String),
    #[error("InvalidLevel({0})")]
    InvalidLevel(String),
}

#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Clone, Hash, Serialize, Deserialize)]
pub enum Level {
    Normal(String),
    Metadata(String), // $SYS, only ever the first level
    Blank,
    SingleWildcard, // +
    MultiWildcard,  // #
}

impl Level {
    #[inline]
    pub fn value(&self) -> Option<&str> {
        match self {
            Level::Normal(s) | Level::Metadata(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn is_metadata(&self) -> bool {
        matches!(self, Level::Metadata(_))
    }

    #[inline]
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Level::SingleWildcard | Level::MultiWildcard)
    }

    fn parse(s: &str, first: bool) -> Result<Level, TopicError> {
        match s {
            "+" => Ok(Level::SingleWildcard),
            "#" => Ok(Level::MultiWildcard),
            "" => Ok(Level::Blank),
            _ if s.contains(['+', '#']) => {
                Err(TopicError::InvalidLevel(format!("invalid level `{}` contains +|#", s)))
            }
            _ if first && s.starts_with('$') => Ok(Level::Metadata(s.to_owned())),
            _ => Ok(Level::Normal(s.to_owned())),
        }
    }

    /// Whether this filter level accepts the given topic level.
    #[inline]
    fn accepts(&self, level: &str, first: bool) -> bool {
        match self {
            Level::Normal(s) | Level::Metadata(s) => s == level,
            Level::Blank => level.is_empty(),
            Level::SingleWildcard | Level::MultiWildcard => !(first && level.starts_with('$')),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Normal(s) | Level::Metadata(s) => f.write_str(s),
            Level::Blank => Ok(()),
            Level::SingleWildcard => f.write_char('+'),
            Level::MultiWildcard => f.write_char('#'),
        }
    }
}

/// A parsed topic name or topic filter.
///
/// Filters are parsed once when subscribed and then matched against concrete topic names
/// with [`Topic::matches_str`].
#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Clone, Hash, Serialize, Deserialize)]
pub struct Topic(Vec<Level>);

impl Topic {
    /// Parses a subscription filter. Unlike a topic name, a filter may not be empty.
    #[inline]
    pub fn filter(s: &str) -> Result<Topic, TopicError> {
        if s.is_empty() {
            return Err(TopicError::InvalidTopic("empty topic filter".into()));
        }
        Topic::from_str(s)
    }

    /// Parses the topic of a PUBLISH, which must be non-empty and free of wildcards.
    #[inline]
    pub fn name(s: &str) -> Result<Topic, TopicError> {
        let topic = Topic::filter(s)?;
        if topic.has_wildcards() {
            return Err(TopicError::InvalidTopic(format!("topic name `{}` contains wildcards", s)));
        }
        Ok(topic)
    }

    #[inline]
    pub fn levels(&self) -> &[Level] {
        &self.0
    }

    #[inline]
    pub fn has_wildcards(&self) -> bool {
        self.0.iter().any(Level::is_wildcard)
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        let last = self.0.len().saturating_sub(1);
        self.0.iter().enumerate().all(|(pos, level)| match level {
            Level::MultiWildcard => pos == last,
            Level::Metadata(s) => pos == 0 && !s.contains(['+', '#']),
            Level::Normal(s) => !s.contains(['+', '#']),
            _ => true,
        })
    }

    pub fn matches_str<S: AsRef<str> + ?Sized>(&self, topic: &S) -> bool {
        let mut filter = self.0.iter();
        for (pos, level) in topic.as_ref().split('/').enumerate() {
            match filter.next() {
                Some(Level::MultiWildcard) => return Level::MultiWildcard.accepts(level, pos == 0),
                Some(f) if f.accepts(level, pos == 0) => continue,
                _ => return false,
            }
        }
        // `sport/#` also matches `sport`
        matches!(filter.next(), None | Some(Level::MultiWildcard))
    }
}

impl ops::Deref for Topic {
    type Target = [Level];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<Level>> for Topic {
    fn from(v: Vec<Level>) -> Self {
        Topic(v)
    }
}

impl FromStr for Topic {
    type Err = TopicError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, TopicError> {
        let topic = s
            .split('/')
            .enumerate()
            .map(|(pos, l)| Level::parse(l, pos == 0))
            .collect::<Result<Vec<_>, TopicError>>()
            .map(Topic)?;
        if topic.is_valid() {
            Ok(topic)
        } else {
            Err(TopicError::InvalidTopic(format!("invalid topic `{}`", s)))
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (pos, level) in self.0.iter().enumerate() {
            if pos > 0 {
                f.write_char('/')?;
            }
            level.fmt(f)?;
        }
        Ok(())
    }
}

#[inline]
pub fn is_wildcard_filter(filter: &str) -> bool {
    filter.contains(['+', '#'])
}
