use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{generate_id, now_rfc3339, Id};

/// One immutable, executable definition bound to a route.
///
/// Versions are append-only: once persisted, no field other than `is_current`
/// ever changes, and `is_current` only flips inside the activation
/// transaction. Exactly one version per route is current at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub id: Id,
    pub route_id: Id,
    /// 1-based, gapless, strictly increasing per route.
    pub version_no: i32,
    pub is_current: bool,
    #[serde(default)]
    pub request_spec: RequestSpec,
    pub logic: LogicSpec,
    #[serde(default)]
    pub logic_config: LogicConfig,
    pub response_spec: Option<ResponseSpec>,
    pub status_codes: Option<StatusCodeMap>,
    /// Example parameter values for admin test calls.
    pub sample_params: Option<serde_json::Value>,
    pub change_note: Option<String>,
    pub created_at: String, // ISO 8601 timestamp
    pub created_by: Option<String>,
}

impl Version {
    pub fn from_draft(
        route_id: Id,
        version_no: i32,
        is_current: bool,
        draft: VersionDraft,
        created_by: Option<String>,
    ) -> Self {
        Self {
            id: generate_id(),
            route_id,
            version_no,
            is_current,
            request_spec: draft.request_spec,
            logic: draft.logic,
            logic_config: draft.logic_config,
            response_spec: draft.response_spec,
            status_codes: draft.status_codes,
            sample_params: draft.sample_params,
            change_note: draft.change_note,
            created_at: now_rfc3339(),
            created_by,
        }
    }

    /// Copy of this version's executable payload, used by rollback to create
    /// a fresh version instead of mutating history.
    pub fn to_draft(&self) -> VersionDraft {
        VersionDraft {
            request_spec: self.request_spec.clone(),
            logic: self.logic.clone(),
            logic_config: self.logic_config.clone(),
            response_spec: self.response_spec.clone(),
            status_codes: self.status_codes.clone(),
            sample_params: self.sample_params.clone(),
            change_note: self.change_note.clone(),
        }
    }
}

/// Everything a new version carries except its identity and number, which the
/// store assigns inside the insert transaction.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct VersionDraft {
    #[serde(default)]
    pub request_spec: RequestSpec,
    pub logic: LogicSpec,
    #[serde(default)]
    pub logic_config: LogicConfig,
    pub response_spec: Option<ResponseSpec>,
    pub status_codes: Option<StatusCodeMap>,
    pub sample_params: Option<serde_json::Value>,
    pub change_note: Option<String>,
}

/// Per-parameter validation rules, keyed by parameter name.
pub type RequestSpec = BTreeMap<String, ParamSpec>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    #[default]
    String,
    Int,
    Float,
    Bool,
    Date,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type", default)]
    pub kind: ParamKind,
    #[serde(default)]
    pub required: bool,
    /// Applied when the parameter is optional and absent.
    pub default: Option<serde_json::Value>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    /// Regex the full string value must match.
    pub pattern: Option<String>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    /// Enumerated allowed values (post-coercion).
    #[serde(rename = "enum")]
    pub allowed: Option<Vec<serde_json::Value>>,
}

/// The closed set of executable logic kinds.
///
/// Dispatch is a match over this enum so the compiler enforces exhaustiveness
/// whenever a kind is added or retired. `Expression` is a permanently disabled
/// tag kept so stored legacy definitions still deserialize; the dispatcher
/// rejects it without ever evaluating anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogicSpec {
    SingleQuery {
        /// One parameterized read statement; `:name` placeholders bind
        /// validated parameters, never string interpolation.
        sql: String,
    },
    MultiQuery {
        queries: Vec<NamedQuery>,
    },
    Pipeline {
        steps: Vec<PipelineStep>,
    },
    ExternalCall {
        #[serde(flatten)]
        call: CallSpec,
    },
    StaticResponse {
        /// Literal template; `$params.*` and step references are substituted.
        body: serde_json::Value,
    },
    Expression {
        #[serde(default)]
        source: String,
    },
}

impl Default for LogicSpec {
    fn default() -> Self {
        LogicSpec::StaticResponse {
            body: serde_json::Value::Null,
        }
    }
}

impl LogicSpec {
    pub fn kind_name(&self) -> &'static str {
        match self {
            LogicSpec::SingleQuery { .. } => "SINGLE_QUERY",
            LogicSpec::MultiQuery { .. } => "MULTI_QUERY",
            LogicSpec::Pipeline { .. } => "PIPELINE",
            LogicSpec::ExternalCall { .. } => "EXTERNAL_CALL",
            LogicSpec::StaticResponse { .. } => "STATIC_RESPONSE",
            LogicSpec::Expression { .. } => "EXPRESSION",
        }
    }
}

/// One query of a MULTI_QUERY sequence. Results are collected under `name`;
/// later queries may bind earlier results through explicit `params` references
/// such as `"$users[0].cmpny_id"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedQuery {
    pub name: String,
    pub sql: String,
    /// Bind-name → literal value or `$...` reference. Placeholders not listed
    /// here fall back to the validated request parameters.
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

/// One unit of a PIPELINE. The step's result is stored under `output` for
/// later steps to reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStep {
    pub output: String,
    /// An optional step's failure is recorded as null output instead of
    /// halting the pipeline.
    #[serde(default)]
    pub optional: bool,
    /// Step-specific timeout; the pipeline's aggregate budget can only
    /// shorten it, never extend it.
    pub timeout_secs: Option<u64>,
    pub logic: StepLogic,
}

/// Logic kinds allowed inside a pipeline step. Pipelines do not nest; the
/// type rules it out instead of a runtime check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepLogic {
    SingleQuery {
        sql: String,
    },
    MultiQuery {
        queries: Vec<NamedQuery>,
    },
    ExternalCall {
        #[serde(flatten)]
        call: CallSpec,
    },
    StaticResponse {
        body: serde_json::Value,
    },
}

impl StepLogic {
    pub fn kind_name(&self) -> &'static str {
        match self {
            StepLogic::SingleQuery { .. } => "SINGLE_QUERY",
            StepLogic::MultiQuery { .. } => "MULTI_QUERY",
            StepLogic::ExternalCall { .. } => "EXTERNAL_CALL",
            StepLogic::StaticResponse { .. } => "STATIC_RESPONSE",
        }
    }
}

/// Outbound call description for EXTERNAL_CALL. URL, header values and body
/// are templates; references are substituted before the call is issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSpec {
    #[serde(default = "default_call_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
}

fn default_call_method() -> String {
    "GET".to_string()
}

/// Kind-specific auxiliary settings. Absent fields fall back to the engine
/// configuration; declared values may tighten but never loosen the global
/// row ceiling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogicConfig {
    pub timeout_secs: Option<u64>,
    pub pipeline_timeout_secs: Option<u64>,
    pub max_rows: Option<usize>,
}

/// Response template: each value is either a literal or a `$result` /
/// `$result_count` / `$result.<path>` / `$params.<name>` reference.
pub type ResponseSpec = serde_json::Map<String, serde_json::Value>;

/// Status-code overrides keyed on whether the execution produced rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusCodeMap {
    pub success: Option<u16>,
    pub not_found: Option<u16>,
}
