//! Draft record and completion accounting.

use crate::schema::fields;
use crate::variant::Variant;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The structured record assembled during a call: a sparse field map.
pub type Draft = Map<String, Value>;

/// Total number of completion groups.
pub const COMPLETION_GROUP_COUNT: usize = 10;

/// A completion group is filled when any of its constituent fields is.
struct CompletionGroup {
    name: &'static str,
    fields: &'static [&'static str],
}

const COMPLETION_GROUPS: [CompletionGroup; COMPLETION_GROUP_COUNT] = [
    CompletionGroup {
        name: "category",
        fields: &[fields::CATEGORY],
    },
    CompletionGroup {
        name: "title",
        fields: &[fields::TITLE],
    },
    CompletionGroup {
        name: "content",
        fields: &[fields::CONTENT],
    },
    CompletionGroup {
        name: "level",
        fields: &[fields::LEVEL],
    },
    CompletionGroup {
        name: "genderPreference",
        fields: &[fields::GENDER_PREFERENCE],
    },
    // Either direction counts, so a draft that switched variants mid-way
    // is still credited.
    CompletionGroup {
        name: "counterpartTypes",
        fields: &[fields::PREFERRED_MENTOR_TYPES, fields::PREFERRED_MENTEE_TYPES],
    },
    CompletionGroup {
        name: "meetingMode",
        fields: &[fields::MEETING_MODE],
    },
    CompletionGroup {
        name: "schedule_days",
        fields: &[fields::DAYS, fields::DAY_NEGOTIABLE],
    },
    CompletionGroup {
        name: "schedule_times",
        fields: &[fields::TIMES, fields::TIME_NEGOTIABLE],
    },
    CompletionGroup {
        name: "budget",
        fields: &[fields::BUDGET, fields::BUDGET_TYPE],
    },
];

/// Which completion groups are filled, as reported to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub filled: Vec<String>,
    pub missing: Vec<String>,
    pub total: usize,
}

impl Completion {
    /// Fraction of filled groups in `[0, 1]`.
    pub fn ratio(&self) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        self.filled.len() as f32 / self.total as f32
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Whether a draft value counts as set.
///
/// Strings must contain non-whitespace text, arrays must be non-empty,
/// booleans must be `true`, numbers always count.
pub fn is_filled(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Bool(b) => *b,
        Value::Number(_) => true,
        Value::Object(map) => !map.is_empty(),
    }
}

/// Computes the completion groups of `draft`.
///
/// The grouping is fixed and identical for both variants; the variant is
/// part of the signature so callers always compute against the active one.
pub fn compute_completion(draft: &Draft, _variant: Variant) -> Completion {
    let (filled, missing): (Vec<_>, Vec<_>) = COMPLETION_GROUPS.iter().partition(|group| {
        group
            .fields
            .iter()
            .any(|field| draft.get(*field).is_some_and(is_filled))
    });

    Completion {
        filled: filled.iter().map(|g| g.name.to_string()).collect(),
        missing: missing.iter().map(|g| g.name.to_string()).collect(),
        total: COMPLETION_GROUP_COUNT,
    }
}
