//! Topic routing
//!
//! A [`RouteTable`] holds the configured `pattern -> destination` rules in
//! registration order. The first route whose pattern matches an incoming
//! topic wins, even if a later route would match more specifically.

mod filter;

#[cfg(test)]
mod tests;

use std::fmt;
use std::sync::Arc;

use regex::Regex;

pub use crate::config::MatchMode;
use crate::config::RouteConfig;
pub use filter::{segment_matches, validate_pattern};

/// Longest key the store accepts, in UTF-8 bytes
const MAX_CHILD_KEY_BYTES: usize = 768;

/// Errors raised while building routes
#[derive(Debug)]
pub enum RouteError {
    /// Topic pattern was empty
    EmptyPattern,
    /// Pattern breaks a wildcard placement rule
    InvalidPattern {
        pattern: String,
        reason: &'static str,
    },
    /// `+` used while matching by prefix
    UnsupportedWildcard(String),
    /// Prefix matcher failed to compile
    Regex(regex::Error),
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteError::EmptyPattern => write!(f, "route pattern cannot be empty"),
            RouteError::InvalidPattern { pattern, reason } => {
                write!(f, "invalid route pattern '{}': {}", pattern, reason)
            }
            RouteError::UnsupportedWildcard(pattern) => write!(
                f,
                "route pattern '{}' uses '+', which requires routing.match_mode = \"segment\"",
                pattern
            ),
            RouteError::Regex(e) => write!(f, "failed to compile route pattern: {}", e),
        }
    }
}

impl std::error::Error for RouteError {}

#[derive(Debug)]
enum Matcher {
    Prefix(Regex),
    Segment,
}

/// A compiled route
#[derive(Debug)]
pub struct Route {
    topic_pattern: String,
    destination_path: String,
    append_topic_as_child: bool,
    matcher: Matcher,
}

impl Route {
    /// Compile a route from a topic pattern and a destination path
    ///
    /// A destination ending in `/#` has that suffix removed and marks the
    /// route as appending the topic's last level as a child key.
    pub fn new(pattern: &str, destination: &str, mode: MatchMode) -> Result<Self, RouteError> {
        validate_pattern(pattern, mode)?;

        let matcher = match mode {
            MatchMode::Prefix => Matcher::Prefix(filter::compile_prefix(pattern)?),
            MatchMode::Segment => Matcher::Segment,
        };

        let (path, append_topic_as_child) = match destination.strip_suffix("/#") {
            Some(stripped) => (stripped, true),
            None => (destination, false),
        };

        Ok(Self {
            topic_pattern: pattern.to_string(),
            destination_path: normalize_path(path),
            append_topic_as_child,
            matcher,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.topic_pattern
    }

    /// Destination path with a leading `/` and no trailing `/`; empty for the root
    pub fn destination(&self) -> &str {
        &self.destination_path
    }

    pub fn appends_topic_as_child(&self) -> bool {
        self.append_topic_as_child
    }

    /// Check whether a topic is routed here
    pub fn matches(&self, topic: &str) -> bool {
        match &self.matcher {
            Matcher::Prefix(re) => re.is_match(topic),
            Matcher::Segment => segment_matches(topic, &self.topic_pattern),
        }
    }

    /// Store path for a message carrying `subtopic`
    pub fn resolve_path(&self, subtopic: &str) -> String {
        if self.append_topic_as_child {
            format!("{}/{}", self.destination_path, subtopic)
        } else {
            self.destination_path.clone()
        }
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

/// Last level of a topic, or the whole topic when it has no `/`
pub fn subtopic(topic: &str) -> &str {
    topic.rsplit('/').next().unwrap_or(topic)
}

/// Check that a subtopic can name a child node in the store
///
/// Store keys cannot be empty or contain `.`, `$`, `#`, `[`, `]`, `/` or
/// ASCII control characters.
pub fn check_child_key(key: &str) -> Result<(), &'static str> {
    if key.is_empty() {
        return Err("child key is empty");
    }
    if key.len() > MAX_CHILD_KEY_BYTES {
        return Err("child key is longer than 768 bytes");
    }
    if key
        .chars()
        .any(|c| matches!(c, '.' | '$' | '#' | '[' | ']' | '/') || c.is_ascii_control())
    {
        return Err("child key contains '.', '$', '#', '[', ']', '/' or a control character");
    }
    Ok(())
}

/// Ordered set of routes
#[derive(Debug, Default)]
pub struct RouteTable {
    mode: MatchMode,
    routes: Vec<Arc<Route>>,
}

impl RouteTable {
    pub fn new(mode: MatchMode) -> Self {
        Self {
            mode,
            routes: Vec::new(),
        }
    }

    /// Build a table from configured routes, keeping their order
    pub fn from_config(mode: MatchMode, routes: &[RouteConfig]) -> Result<Self, RouteError> {
        let mut table = Self::new(mode);
        for route in routes {
            table.add_route(&route.topic, &route.path)?;
        }
        Ok(table)
    }

    /// Append a route; it matches after every route added before it
    pub fn add_route(&mut self, pattern: &str, destination: &str) -> Result<(), RouteError> {
        let route = Route::new(pattern, destination, self.mode)?;
        self.routes.push(Arc::new(route));
        Ok(())
    }

    /// First route matching the topic, in registration order
    pub fn match_topic(&self, topic: &str) -> Option<&Arc<Route>> {
        self.routes.iter().find(|route| route.matches(topic))
    }

    /// Topic filters to subscribe to, one per distinct pattern
    pub fn filters(&self) -> Vec<String> {
        let mut filters: Vec<String> = Vec::with_capacity(self.routes.len());
        for route in &self.routes {
            if !filters.iter().any(|f| f == route.pattern()) {
                filters.push(route.pattern().to_string());
            }
        }
        filters
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Route>> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
