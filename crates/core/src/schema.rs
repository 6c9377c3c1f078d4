//! Tool Schema Builder
//!
//! Describes the two tools the remote agent may call during a capture call,
//! and every draft field `update_draft` is allowed to set. The description
//! is rendered into the JSON shape the realtime session expects in its
//! `tools` array.

use crate::variant::Variant;
use serde::Serialize;
use serde_json::{Map, Value, json};

/// Tool that merges fields into the draft.
pub const UPDATE_DRAFT_TOOL: &str = "update_draft";
/// Tool that reports which completion groups are filled.
pub const GET_DRAFT_STATUS_TOOL: &str = "get_draft_status";

/// Draft field names. These are the keys stored in the draft map.
pub mod fields {
    pub const CATEGORY: &str = "category";
    pub const TITLE: &str = "title";
    pub const CONTENT: &str = "content";
    pub const LEVEL: &str = "level";
    pub const GENDER_PREFERENCE: &str = "genderPreference";
    pub const PREFERRED_MENTOR_TYPES: &str = "preferredMentorTypes";
    pub const PREFERRED_MENTEE_TYPES: &str = "preferredMenteeTypes";
    pub const MEETING_MODE: &str = "meetingMode";
    pub const LOCATION: &str = "location";
    pub const DAYS: &str = "days";
    pub const DAY_NEGOTIABLE: &str = "dayNegotiable";
    pub const TIMES: &str = "times";
    pub const TIME_NEGOTIABLE: &str = "timeNegotiable";
    pub const BUDGET: &str = "budget";
    pub const BUDGET_TYPE: &str = "budgetType";
}

const CATEGORIES: &[&str] = &[
    "개발", "디자인", "마케팅", "커리어", "외국어", "음악", "운동", "요리", "식물", "기타",
];
const MENTEE_OWN_LEVELS: &[&str] = &["입문", "초급", "중급", "고급"];
const DESIRED_MENTEE_LEVELS: &[&str] = &["누구나", "입문", "초급", "중급"];
const MENTOR_GENDERS: &[&str] = &["남성 멘토", "여성 멘토", "상관없음"];
const MENTEE_GENDERS: &[&str] = &["남성 멘티", "여성 멘티", "상관없음"];
const MENTOR_TRAITS: &[&str] = &[
    "친절한", "꼼꼼한", "실무 중심", "이론 중심", "유머러스한", "엄격한",
];
const MENTEE_TRAITS: &[&str] = &[
    "성실한",
    "적극적인",
    "질문이 많은",
    "꾸준한",
    "열정적인",
    "시간 약속을 잘 지키는",
];
const MEETING_MODES: &[&str] = &["온라인", "오프라인", "상관없음"];
const DAYS: &[&str] = &["월", "화", "수", "목", "금", "토", "일"];
const TIME_BUCKETS: &[&str] = &["오전", "오후", "저녁"];
const BUDGET_TYPES: &[&str] = &["시간당", "회당", "월 단위", "협의"];

/// Value type of a draft field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    StringArray,
    Boolean,
    Number,
}

/// One field the agent may set through `update_draft`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub description: &'static str,
    /// Closed vocabulary for categorical fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed: Option<&'static [&'static str]>,
}

impl FieldSpec {
    fn new(name: &'static str, kind: FieldKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
            allowed: None,
        }
    }

    fn one_of(mut self, allowed: &'static [&'static str]) -> Self {
        self.allowed = Some(allowed);
        self
    }

    /// Renders this field as a JSON Schema property.
    pub fn json_schema(&self) -> Value {
        let mut property = Map::new();
        let enumeration = self
            .allowed
            .map(|values| Value::from(values.iter().map(|v| Value::from(*v)).collect::<Vec<_>>()));
        match self.kind {
            FieldKind::String => {
                property.insert("type".into(), "string".into());
                if let Some(values) = enumeration {
                    property.insert("enum".into(), values);
                }
            }
            FieldKind::StringArray => {
                property.insert("type".into(), "array".into());
                let mut items = Map::new();
                items.insert("type".into(), "string".into());
                if let Some(values) = enumeration {
                    items.insert("enum".into(), values);
                }
                property.insert("items".into(), Value::Object(items));
            }
            FieldKind::Boolean => {
                property.insert("type".into(), "boolean".into());
            }
            FieldKind::Number => {
                property.insert("type".into(), "number".into());
            }
        }
        property.insert("description".into(), self.description.into());
        Value::Object(property)
    }
}

/// A function tool as advertised to the realtime session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

/// The complete tool description for one variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSchema {
    pub variant: Variant,
    pub tools: Vec<ToolDefinition>,
}

impl ToolSchema {
    pub fn tool(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|t| t.name == name)
    }
}

/// Name of the field holding the desired counterpart traits for `variant`.
pub fn counterpart_field(variant: Variant) -> &'static str {
    match variant {
        Variant::SeekMentor => fields::PREFERRED_MENTOR_TYPES,
        Variant::SeekMentee => fields::PREFERRED_MENTEE_TYPES,
    }
}

/// The fields `update_draft` accepts for `variant`, in presentation order.
pub fn field_specs(variant: Variant) -> Vec<FieldSpec> {
    let (levels, genders, traits, counterpart_description) = match variant {
        Variant::SeekMentor => (
            MENTEE_OWN_LEVELS,
            MENTOR_GENDERS,
            MENTOR_TRAITS,
            "Traits the user wants in a mentor",
        ),
        Variant::SeekMentee => (
            DESIRED_MENTEE_LEVELS,
            MENTEE_GENDERS,
            MENTEE_TRAITS,
            "Traits the user wants in a mentee",
        ),
    };

    vec![
        FieldSpec::new(fields::CATEGORY, FieldKind::String, "Topic category of the post")
            .one_of(CATEGORIES),
        FieldSpec::new(fields::TITLE, FieldKind::String, "Short title summarising the request"),
        FieldSpec::new(fields::CONTENT, FieldKind::String, "Free-form description of the request"),
        FieldSpec::new(fields::LEVEL, FieldKind::String, "Experience level").one_of(levels),
        FieldSpec::new(
            fields::GENDER_PREFERENCE,
            FieldKind::String,
            "Preferred gender of the counterpart",
        )
        .one_of(genders),
        FieldSpec::new(
            counterpart_field(variant),
            FieldKind::StringArray,
            counterpart_description,
        )
        .one_of(traits),
        FieldSpec::new(fields::MEETING_MODE, FieldKind::String, "How sessions take place")
            .one_of(MEETING_MODES),
        FieldSpec::new(fields::LOCATION, FieldKind::String, "Meeting area for offline sessions"),
        FieldSpec::new(fields::DAYS, FieldKind::StringArray, "Available days of the week")
            .one_of(DAYS),
        FieldSpec::new(fields::DAY_NEGOTIABLE, FieldKind::Boolean, "Days can be negotiated"),
        FieldSpec::new(fields::TIMES, FieldKind::StringArray, "Available time of day")
            .one_of(TIME_BUCKETS),
        FieldSpec::new(
            fields::TIME_NEGOTIABLE,
            FieldKind::Boolean,
            "Time of day can be negotiated",
        ),
        FieldSpec::new(fields::BUDGET, FieldKind::Number, "Budget amount in KRW"),
        FieldSpec::new(fields::BUDGET_TYPE, FieldKind::String, "Unit the budget applies to")
            .one_of(BUDGET_TYPES),
    ]
}

/// Builds the tool description advertised to the agent for `variant`.
pub fn build_tool_schema(variant: Variant) -> ToolSchema {
    let properties: Map<String, Value> = field_specs(variant)
        .iter()
        .map(|spec| (spec.name.to_string(), spec.json_schema()))
        .collect();

    let update_draft = ToolDefinition {
        kind: "function",
        name: UPDATE_DRAFT_TOOL,
        description: "Save one or more fields the user has stated into the draft. \
                      Only include fields that were mentioned; omitted fields are kept as is.",
        parameters: json!({
            "type": "object",
            "properties": properties,
            "additionalProperties": false,
        }),
    };

    let get_draft_status = ToolDefinition {
        kind: "function",
        name: GET_DRAFT_STATUS_TOOL,
        description: "Report which parts of the draft are filled and which are still missing.",
        parameters: json!({
            "type": "object",
            "properties": {},
        }),
    };

    ToolSchema {
        variant,
        tools: vec![update_draft, get_draft_status],
    }
}
