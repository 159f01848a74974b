use std::sync::OnceLock;
use std::time::Duration;

use regex::{Regex, RegexSet};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::model::{LogicConfig, LogicSpec, StepLogic};
use crate::source::SourceRow;

/// Patterns rejected in any literal query payload, tested against the
/// normalized (comment-stripped, whitespace-collapsed, upper-cased) text.
/// Pattern screening is known-bypassable; the read-only source connection is
/// the backstop.
const FORBIDDEN_SQL_PATTERNS: &[&str] = &[
    r"\bDROP\b",
    r"\bTRUNCATE\b",
    r"\bALTER\b",
    r"\bCREATE\b",
    r"\bGRANT\b",
    r"\bREVOKE\b",
    r"\bDELETE\b",
    r"\bINSERT\b",
    r"\bUPDATE\b",
    r"\bMERGE\b",
    r"\bEXEC\b",
    r"\bEXECUTE\b",
    r"\bUNION\s+(?:ALL\s+)?SELECT\b",
    r"\bINTO\s+(?:OUTFILE|DUMPFILE)\b",
    r"\bLOAD_FILE\b",
    r"\bBENCHMARK\b",
    r"\bSLEEP\b",
    r"\bPG_SLEEP\b",
    r"\bWAITFOR\b",
    r"\bXP_\w+",
    r"\bSP_\w+",
];

/// Column-name patterns redacted at the response boundary.
const SENSITIVE_FIELD_PATTERN: &str = "(?i)(password|passwd|pwd|secret|token|api_key|apikey|\
     private_key|secret_key|access_key|credential|ssn|social_security|resident_reg|national_id)";

fn sensitive_field_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(SENSITIVE_FIELD_PATTERN).expect("sensitive pattern compiles"))
}

/// Whether a projected column name must be redacted before leaving the engine.
pub fn is_sensitive_field(name: &str) -> bool {
    sensitive_field_regex().is_match(name)
}

/// Replace every sensitive field's value in-place, at any depth. Applied by
/// the response mapper only, so intermediate steps keep real values.
pub fn redact_sensitive(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                if is_sensitive_field(key) {
                    *entry = serde_json::Value::String("***".to_string());
                } else {
                    redact_sensitive(entry);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items.iter_mut() {
                redact_sensitive(item);
            }
        }
        _ => {}
    }
}

/// Enforces the engine's safety constraints: injection screening of literal
/// query text, the read-only statement gate, row-count ceilings re-checked
/// after execution, and step/pipeline timeout budgets.
#[derive(Debug, Clone)]
pub struct SecurityGuard {
    step_timeout: Duration,
    pipeline_timeout: Duration,
    max_rows: usize,
    forbidden: RegexSet,
}

impl SecurityGuard {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            step_timeout: Duration::from_secs(config.step_timeout_secs),
            pipeline_timeout: Duration::from_secs(config.pipeline_timeout_secs),
            max_rows: config.max_result_rows,
            forbidden: RegexSet::new(FORBIDDEN_SQL_PATTERNS)
                .expect("forbidden SQL patterns compile"),
        }
    }

    /// Screen one literal SQL payload. A match is always an error, never
    /// silently dropped.
    pub fn screen_sql(&self, sql: &str) -> Result<(), EngineError> {
        let normalized = normalize_sql(sql);
        if normalized.is_empty() {
            return Err(EngineError::security("empty query payload"));
        }

        if !(normalized.starts_with("SELECT ")
            || normalized.starts_with("WITH ")
            || normalized == "SELECT")
        {
            return Err(EngineError::security(format!(
                "write-capable or non-SELECT statement rejected: {}",
                truncate_for_log(&normalized)
            )));
        }

        // One trailing semicolon is tolerated; anything further is a stacked
        // statement.
        let trimmed = normalized.trim_end_matches(';');
        if trimmed.contains(';') {
            return Err(EngineError::security(format!(
                "stacked statements rejected: {}",
                truncate_for_log(&normalized)
            )));
        }

        let matches: Vec<usize> = self.forbidden.matches(trimmed).into_iter().collect();
        if let Some(index) = matches.first() {
            return Err(EngineError::security(format!(
                "forbidden pattern {} matched in query: {}",
                FORBIDDEN_SQL_PATTERNS[*index],
                truncate_for_log(&normalized)
            )));
        }

        Ok(())
    }

    /// Screen a whole logic payload before anything executes. The disabled
    /// EXPRESSION kind is rejected here and in the dispatcher.
    pub fn screen_logic(&self, logic: &LogicSpec) -> Result<(), EngineError> {
        match logic {
            LogicSpec::SingleQuery { sql } => self.screen_sql(sql),
            LogicSpec::MultiQuery { queries } => {
                for query in queries {
                    self.screen_sql(&query.sql)?;
                }
                Ok(())
            }
            LogicSpec::Pipeline { steps } => {
                for step in steps {
                    self.screen_step(&step.logic)?;
                }
                Ok(())
            }
            LogicSpec::ExternalCall { .. } | LogicSpec::StaticResponse { .. } => Ok(()),
            LogicSpec::Expression { .. } => Err(EngineError::security(
                "unsupported logic kind: EXPRESSION is permanently disabled",
            )),
        }
    }

    pub fn screen_step(&self, step: &StepLogic) -> Result<(), EngineError> {
        match step {
            StepLogic::SingleQuery { sql } => self.screen_sql(sql),
            StepLogic::MultiQuery { queries } => {
                for query in queries {
                    self.screen_sql(&query.sql)?;
                }
                Ok(())
            }
            StepLogic::ExternalCall { .. } | StepLogic::StaticResponse { .. } => Ok(()),
        }
    }

    /// Allowance for one execution step. A declared timeout may differ from
    /// the default in either direction; the pipeline budget still caps it.
    pub fn step_allowance(&self, declared_secs: Option<u64>) -> Duration {
        declared_secs
            .map(Duration::from_secs)
            .unwrap_or(self.step_timeout)
    }

    /// Aggregate wall-clock budget for a pipeline.
    pub fn pipeline_budget(&self, config: &LogicConfig) -> Duration {
        config
            .pipeline_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.pipeline_timeout)
    }

    /// Effective row ceiling: a version's declared cap may tighten the global
    /// ceiling but never raise it.
    pub fn row_ceiling(&self, config: &LogicConfig) -> usize {
        config
            .max_rows
            .map(|declared| declared.min(self.max_rows))
            .unwrap_or(self.max_rows)
    }

    /// Re-check the actual result size after execution and truncate. A
    /// client-declared LIMIT is not trusted; an outer wrapping query could
    /// have bypassed it.
    pub fn enforce_row_ceiling(&self, rows: &mut Vec<SourceRow>, ceiling: usize) {
        if rows.len() > ceiling {
            log::warn!(
                "result truncated from {} to {} rows by the row ceiling",
                rows.len(),
                ceiling
            );
            rows.truncate(ceiling);
        }
    }
}

/// Strip comments, collapse whitespace and case-fold so keyword screening
/// cannot be dodged with layout tricks.
fn normalize_sql(sql: &str) -> String {
    static LINE_COMMENT: OnceLock<Regex> = OnceLock::new();
    static BLOCK_COMMENT: OnceLock<Regex> = OnceLock::new();
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();

    let line = LINE_COMMENT.get_or_init(|| Regex::new(r"--[^\n]*").expect("regex compiles"));
    let block =
        BLOCK_COMMENT.get_or_init(|| Regex::new(r"(?s)/\*.*?\*/").expect("regex compiles"));
    let ws = WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("regex compiles"));

    let stripped = line.replace_all(sql, " ");
    let stripped = block.replace_all(&stripped, " ");
    ws.replace_all(&stripped, " ")
        .trim()
        .to_ascii_uppercase()
}

fn truncate_for_log(text: &str) -> String {
    text.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> SecurityGuard {
        SecurityGuard::from_config(&EngineConfig::default())
    }

    #[test]
    fn plain_select_passes() {
        assert!(guard()
            .screen_sql("SELECT id, name FROM app_user_l WHERE cmpny_id = :cmpny_id")
            .is_ok());
    }

    #[test]
    fn stacked_statement_with_drop_is_rejected() {
        let err = guard()
            .screen_sql("SELECT * FROM x WHERE id = 1; DROP TABLE x;--")
            .unwrap_err();
        assert!(matches!(err, EngineError::Security { .. }));
    }

    #[test]
    fn comments_do_not_hide_keywords() {
        let err = guard()
            .screen_sql("SELECT * FROM x WHERE 1=1 /* hide */ UNION /* me */ SELECT password FROM users")
            .unwrap_err();
        assert!(matches!(err, EngineError::Security { .. }));
    }

    #[test]
    fn write_statement_fails_closed() {
        for sql in [
            "UPDATE users SET name = 'x'",
            "INSERT INTO users VALUES (1)",
            "DELETE FROM users",
        ] {
            assert!(guard().screen_sql(sql).is_err(), "accepted: {}", sql);
        }
    }

    #[test]
    fn timing_functions_are_rejected() {
        assert!(guard()
            .screen_sql("SELECT pg_sleep(10) FROM t")
            .is_err());
        assert!(guard()
            .screen_sql("SELECT benchmark(1000000, md5('x'))")
            .is_err());
    }

    #[test]
    fn column_names_containing_keywords_are_fine() {
        assert!(guard()
            .screen_sql("SELECT created_at, update_dt FROM audit_rows")
            .is_ok());
    }

    #[test]
    fn expression_kind_is_always_rejected() {
        let logic = LogicSpec::Expression {
            source: "1 + 1".to_string(),
        };
        assert!(matches!(
            guard().screen_logic(&logic),
            Err(EngineError::Security { .. })
        ));
    }

    #[test]
    fn declared_row_cap_cannot_exceed_global_ceiling() {
        let g = guard();
        let config = LogicConfig {
            max_rows: Some(1_000_000),
            ..Default::default()
        };
        assert_eq!(g.row_ceiling(&config), 1000);
        let tighter = LogicConfig {
            max_rows: Some(10),
            ..Default::default()
        };
        assert_eq!(g.row_ceiling(&tighter), 10);
    }

    #[test]
    fn sensitive_fields_are_redacted_at_depth() {
        let mut value = serde_json::json!({
            "user": {"name": "kim", "password_hash": "abc", "api_key": "xyz"},
            "items": [{"token": "t"}]
        });
        redact_sensitive(&mut value);
        assert_eq!(value["user"]["password_hash"], "***");
        assert_eq!(value["user"]["api_key"], "***");
        assert_eq!(value["items"][0]["token"], "***");
        assert_eq!(value["user"]["name"], "kim");
    }
}
