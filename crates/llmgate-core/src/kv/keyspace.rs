//! Key naming helpers.
//!
//! Keys are `:`-separated. Scan patterns are built here so caller-supplied
//! segments (tenant ids, model names) cannot inject glob metacharacters.

pub const MODEL_REGISTRY_PREFIX: &str = "modelreg";

const SEP: char = ':';

/// A key namespace such as `modelreg:`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyspace {
    prefix: String,
}

impl Keyspace {
    pub fn new(prefix: &str) -> Self {
        let mut prefix = prefix.to_string();
        if !prefix.ends_with(SEP) {
            prefix.push(SEP);
        }
        Self { prefix }
    }

    pub fn model_registry() -> Self {
        Self::new(MODEL_REGISTRY_PREFIX)
    }

    /// Exact key: prefix followed by `parts` joined with `:`.
    ///
    /// With no parts the namespace name itself is returned, without the
    /// trailing separator.
    pub fn key(&self, parts: &[&str]) -> String {
        if parts.is_empty() {
            return self.prefix.trim_end_matches(SEP).to_string();
        }
        format!("{}{}", self.prefix, parts.join(":"))
    }

    /// Literal prefix (always ends with `:`) for `parts`.
    pub fn prefix_of(&self, parts: &[&str]) -> String {
        if parts.is_empty() {
            return self.prefix.clone();
        }
        format!("{}:", self.key(parts))
    }

    /// Matches every key in this namespace.
    pub fn pattern_all(&self) -> String {
        format!("{}*", escape_glob(&self.prefix))
    }

    /// Matches every key below `parts`, with each part glob-escaped.
    pub fn pattern_under(&self, parts: &[&str]) -> String {
        let escaped: Vec<String> = parts.iter().map(|p| escape_glob(p)).collect();
        let mut pattern = escape_glob(&self.prefix);
        for part in escaped {
            pattern.push_str(&part);
            pattern.push(SEP);
        }
        pattern.push('*');
        pattern
    }
}

/// Escape `* ? [ ] \` so `s` matches only itself in a glob pattern.
pub fn escape_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
