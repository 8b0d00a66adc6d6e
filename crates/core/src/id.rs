// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identifier types for analyses, tasks, machines and nodes.

use crate::clock::Clock;

/// Trait for truncating identifiers to a short prefix.
pub trait ShortId {
    /// Returns a string slice truncated to at most `n` characters.
    fn short(&self, n: usize) -> &str;
}

impl ShortId for str {
    fn short(&self, n: usize) -> &str {
        if self.len() <= n {
            self
        } else {
            &self[..n]
        }
    }
}

/// Define a newtype ID wrapper around `String`.
///
/// Generates `new()`, `as_str()`, `short()`, `Display`, `From<String>`, `From<&str>`,
/// `PartialEq<str>`, `PartialEq<&str>`, and `Borrow<str>` implementations.
#[macro_export]
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        pub struct $name:ident;
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns a string slice truncated to at most `n` characters.
            pub fn short(&self, n: usize) -> &str {
                if self.0.len() <= n {
                    &self.0
                } else {
                    &self.0[..n]
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id! {
    /// Identifier of one submitted analysis.
    ///
    /// Format `YYYYMMDD-XXXXXX`: submission date followed by six uppercase
    /// base-36 characters. Unique within a working directory.
    pub struct AnalysisId;
}

define_id! {
    /// Identifier of one task: `<analysis_id>_<n>` with `n` starting at 1.
    pub struct TaskId;
}

define_id! {
    /// Name of a configured machine, unique within its machinery.
    pub struct MachineName;
}

define_id! {
    /// Name of a task-running node known to the main node.
    pub struct NodeName;
}

const ID_CHARS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ID_SUFFIX_LEN: usize = 6;

impl AnalysisId {
    /// Generate a fresh analysis id for today's date.
    ///
    /// Uniqueness against existing analyses is the caller's responsibility
    /// (retry on collision against the `untracked/` sentinel directory).
    pub fn generate(clock: &impl Clock) -> Self {
        let mut rng = rand::rng();
        Self::generate_with(clock, &mut rng)
    }

    /// Generate with an explicit RNG (deterministic in tests).
    pub fn generate_with(clock: &impl Clock, rng: &mut impl rand::Rng) -> Self {
        let mut suffix = String::with_capacity(ID_SUFFIX_LEN);
        for _ in 0..ID_SUFFIX_LEN {
            let idx = rng.random_range(0..ID_CHARS.len());
            suffix.push(ID_CHARS[idx] as char);
        }
        Self(format!("{}-{}", clock.today_compact(), suffix))
    }

    /// Validate the `YYYYMMDD-XXXXXX` shape.
    pub fn is_valid(s: &str) -> bool {
        let Some((date, suffix)) = s.split_once('-') else {
            return false;
        };
        date.len() == 8
            && date.bytes().all(|b| b.is_ascii_digit())
            && suffix.len() == ID_SUFFIX_LEN
            && suffix
                .bytes()
                .all(|b| b.is_ascii_digit() || b.is_ascii_uppercase())
    }

    /// The `YYYYMMDD` date segment, used for the on-disk directory layout.
    pub fn date_segment(&self) -> &str {
        self.0.split_once('-').map(|(d, _)| d).unwrap_or(&self.0)
    }
}

impl TaskId {
    /// Build a task id from its analysis and 1-based sequence number.
    pub fn for_analysis(analysis: &AnalysisId, number: u32) -> Self {
        Self(format!("{}_{}", analysis, number))
    }

    /// The analysis id this task belongs to.
    pub fn analysis_id(&self) -> AnalysisId {
        match self.0.rsplit_once('_') {
            Some((analysis, _)) => AnalysisId::new(analysis),
            None => AnalysisId::new(self.0.clone()),
        }
    }

    /// The 1-based task number within its analysis.
    pub fn number(&self) -> Option<u32> {
        self.0.rsplit_once('_').and_then(|(_, n)| n.parse().ok())
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
