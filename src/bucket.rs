//! Rate-limit bucket classification.
//!
//! DESIGN
//! ======
//! A bucket is the quota pool shared by every request whose route has the
//! same shape. Classification is a pure function of (method, path):
//!
//! 1. `DELETE /channels/{id}/messages/{id}` is checked first against its
//!    own rule. Message deletion has a stricter quota than the channel's
//!    other message routes and must not share their bucket.
//! 2. The default rule table, in order. First full-path match wins.
//! 3. Otherwise the literal path is the bucket key.
//!
//! Rule patterns are path shapes: `{id}` matches one all-digit segment and
//! captures it, `**` matches whatever segments remain, anything else is a
//! literal segment. Templates refer to captures as `$1`..`$9`. Top-level
//! resource IDs (channel, guild, webhook) are kept in the key, child IDs are
//! replaced with a placeholder.

use std::fmt;

/// Canonical bucket identity. Equal strings mean a shared quota pool.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey(String);

impl BucketKey {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// RULE TABLE
// =============================================================================

const DELETE_MESSAGE_RULE: (&str, &str) = (
    "/channels/{id}/messages/{id}",
    "DELETE /channels/$1/messages/{message.id}",
);

const DEFAULT_RULES: &[(&str, &str)] = &[
    ("/channels/{id}/messages/{id}", "/channels/$1/messages/{message.id}"),
    ("/channels/{id}/messages/{id}/reactions/**", "/channels/$1/messages/{message.id}/reactions"),
    ("/channels/{id}/messages/{id}/crosspost", "/channels/$1/messages/{message.id}/crosspost"),
    ("/channels/{id}/pins/{id}", "/channels/$1/pins/{message.id}"),
    ("/channels/{id}/permissions/{id}", "/channels/$1/permissions/{overwrite.id}"),
    ("/channels/{id}/recipients/{id}", "/channels/$1/recipients/{user.id}"),
    ("/guilds/{id}/members/{id}", "/guilds/$1/members/{user.id}"),
    ("/guilds/{id}/members/{id}/roles/{id}", "/guilds/$1/members/{user.id}/roles/{role.id}"),
    ("/guilds/{id}/bans/{id}", "/guilds/$1/bans/{user.id}"),
    ("/guilds/{id}/roles/{id}", "/guilds/$1/roles/{role.id}"),
    ("/guilds/{id}/emojis/{id}", "/guilds/$1/emojis/{emoji.id}"),
    ("/guilds/{id}/integrations/{id}", "/guilds/$1/integrations/{integration.id}"),
    ("/guilds/{id}/integrations/{id}/sync", "/guilds/$1/integrations/{integration.id}/sync"),
    ("/users/@me/guilds/{id}", "/users/@me/guilds/{guild.id}"),
    ("/users/{id}", "/users/{user.id}"),
    ("/invites/**", "/invites/{invite.code}"),
    ("/webhooks/{id}/**", "/webhooks/$1"),
];

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Id,
    Rest,
}

/// One (path shape, key template) pair.
#[derive(Clone, Debug)]
pub struct BucketRule {
    segments: Vec<Segment>,
    template: String,
}

impl BucketRule {
    #[must_use]
    pub fn new(pattern: &str, template: &str) -> Self {
        let segments = split_path(pattern)
            .map(|segment| match segment {
                "{id}" => Segment::Id,
                "**" => Segment::Rest,
                literal => Segment::Literal(literal.to_owned()),
            })
            .collect();
        Self {
            segments,
            template: template.to_owned(),
        }
    }

    /// Bucket key for `path` if the whole path matches this rule.
    #[must_use]
    pub fn apply(&self, path: &str) -> Option<String> {
        let captures = self.captures(path)?;
        Some(expand(&self.template, &captures))
    }

    fn captures<'a>(&self, path: &'a str) -> Option<Vec<&'a str>> {
        let mut captures = Vec::new();
        let mut parts = split_path(path);
        for segment in &self.segments {
            match segment {
                Segment::Rest => return Some(captures),
                Segment::Literal(literal) => {
                    if parts.next()? != literal.as_str() {
                        return None;
                    }
                }
                Segment::Id => {
                    let part = parts.next()?;
                    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                        return None;
                    }
                    captures.push(part);
                }
            }
        }
        parts.next().is_none().then_some(captures)
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.trim_start_matches('/').split('/')
}

fn expand(template: &str, captures: &[&str]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' {
            if let Some(index) = chars.peek().and_then(|d| d.to_digit(10)) {
                chars.next();
                let capture = (index as usize).checked_sub(1).and_then(|i| captures.get(i));
                out.push_str(capture.copied().unwrap_or_default());
                continue;
            }
        }
        out.push(c);
    }
    out
}

// =============================================================================
// CLASSIFIER
// =============================================================================

/// Maps (method, path) to a [`BucketKey`].
#[derive(Clone, Debug)]
pub struct BucketClassifier {
    delete_message: BucketRule,
    rules: Vec<BucketRule>,
}

impl BucketClassifier {
    /// Classifier with the built-in route table.
    #[must_use]
    pub fn new() -> Self {
        Self::with_rules(DEFAULT_RULES.iter().map(|(p, t)| BucketRule::new(p, t)).collect())
    }

    /// Classifier with a custom route table. The message-delete rule is
    /// always evaluated first for `DELETE`.
    #[must_use]
    pub fn with_rules(rules: Vec<BucketRule>) -> Self {
        let (pattern, template) = DELETE_MESSAGE_RULE;
        Self {
            delete_message: BucketRule::new(pattern, template),
            rules,
        }
    }

    #[must_use]
    pub fn classify(&self, method: &str, path: &str) -> BucketKey {
        let path = path.split(['?', '#']).next().unwrap_or_default();

        let delete_rule = method
            .eq_ignore_ascii_case("DELETE")
            .then_some(&self.delete_message);

        let key = delete_rule
            .into_iter()
            .chain(&self.rules)
            .find_map(|rule| rule.apply(path))
            .unwrap_or_else(|| path.to_owned());

        BucketKey(key)
    }
}

impl Default for BucketClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "bucket_test.rs"]
mod tests;
