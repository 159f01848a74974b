use crate::error::{EngineError, FieldViolation};
use crate::model::{ParamKind, ParamMap, ParamSpec, ParamValue, RequestSpec};

/// Validates raw request parameters against a version's request spec and
/// produces the typed parameter mapping every downstream step consumes.
///
/// This is the sole parameter trust boundary. All violations are collected
/// before failing so the caller sees every problem at once, not just the
/// first. Parameters not declared in the spec are ignored unless strict mode
/// is configured.
#[derive(Debug, Clone)]
pub struct RequestValidator {
    strict: bool,
}

impl RequestValidator {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    pub fn validate(
        &self,
        spec: &RequestSpec,
        raw: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<ParamMap, EngineError> {
        let mut validated = ParamMap::new();
        let mut violations = Vec::new();

        for (name, param_spec) in spec {
            let supplied = raw.get(name).filter(|v| !v.is_null());

            let value = match supplied {
                Some(value) => value.clone(),
                None if param_spec.required => {
                    violations.push(FieldViolation::new(name, "required parameter is missing"));
                    continue;
                }
                None => match &param_spec.default {
                    Some(default) => default.clone(),
                    None => continue,
                },
            };

            let coerced = match coerce(param_spec.kind, &value) {
                Ok(coerced) => coerced,
                Err(message) => {
                    violations.push(FieldViolation::new(name, message));
                    continue;
                }
            };

            if let Err(message) = check_constraints(&coerced, param_spec) {
                violations.push(FieldViolation::new(name, message));
                continue;
            }

            validated.insert(name.clone(), coerced);
        }

        if self.strict {
            for name in raw.keys() {
                if !spec.contains_key(name) && !name.starts_with('_') {
                    violations.push(FieldViolation::new(name, "parameter is not declared"));
                }
            }
        }

        if violations.is_empty() {
            Ok(validated)
        } else {
            Err(EngineError::Validation { violations })
        }
    }
}

fn coerce(kind: ParamKind, value: &serde_json::Value) -> Result<ParamValue, String> {
    use serde_json::Value;

    match kind {
        ParamKind::String => match value {
            Value::String(s) => Ok(ParamValue::Str(s.clone())),
            Value::Number(n) => Ok(ParamValue::Str(n.to_string())),
            Value::Bool(b) => Ok(ParamValue::Str(b.to_string())),
            _ => Err("expected a string value".to_string()),
        },
        ParamKind::Int => match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(ParamValue::Int(i))
                } else {
                    match n.as_f64() {
                        Some(f) if f.fract() == 0.0 => Ok(ParamValue::Int(f as i64)),
                        _ => Err("expected an integer value".to_string()),
                    }
                }
            }
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(ParamValue::Int)
                .map_err(|_| "expected an integer value".to_string()),
            _ => Err("expected an integer value".to_string()),
        },
        ParamKind::Float => match value {
            Value::Number(n) => n
                .as_f64()
                .map(ParamValue::Float)
                .ok_or_else(|| "expected a numeric value".to_string()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(ParamValue::Float)
                .map_err(|_| "expected a numeric value".to_string()),
            _ => Err("expected a numeric value".to_string()),
        },
        ParamKind::Bool => match value {
            Value::Bool(b) => Ok(ParamValue::Bool(*b)),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(ParamValue::Bool(true)),
                "false" | "0" | "no" => Ok(ParamValue::Bool(false)),
                _ => Err("expected a boolean value".to_string()),
            },
            Value::Number(n) if n.as_i64() == Some(0) => Ok(ParamValue::Bool(false)),
            Value::Number(n) if n.as_i64() == Some(1) => Ok(ParamValue::Bool(true)),
            _ => Err("expected a boolean value".to_string()),
        },
        ParamKind::Date => match value {
            Value::String(s) => chrono::NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map(ParamValue::Date)
                .map_err(|_| "expected an ISO 8601 date (YYYY-MM-DD)".to_string()),
            _ => Err("expected an ISO 8601 date (YYYY-MM-DD)".to_string()),
        },
    }
}

fn check_constraints(value: &ParamValue, spec: &ParamSpec) -> Result<(), String> {
    if let ParamValue::Str(s) = value {
        if let Some(min) = spec.min_length {
            if s.chars().count() < min {
                return Err(format!("must be at least {} characters", min));
            }
        }
        if let Some(max) = spec.max_length {
            if s.chars().count() > max {
                return Err(format!("must be at most {} characters", max));
            }
        }
        if let Some(pattern) = &spec.pattern {
            // Anchored at the start, matching the original's semantics.
            let anchored = format!("^(?:{})", pattern);
            match regex::Regex::new(&anchored) {
                Ok(re) => {
                    if !re.is_match(s) {
                        return Err(format!("does not match pattern {}", pattern));
                    }
                }
                Err(_) => return Err("declared pattern is not a valid regex".to_string()),
            }
        }
    }

    let numeric = match value {
        ParamValue::Int(i) => Some(*i as f64),
        ParamValue::Float(f) => Some(*f),
        _ => None,
    };
    if let Some(n) = numeric {
        if let Some(min) = spec.min_value {
            if n < min {
                return Err(format!("must be at least {}", min));
            }
        }
        if let Some(max) = spec.max_value {
            if n > max {
                return Err(format!("must be at most {}", max));
            }
        }
    }

    if let Some(allowed) = &spec.allowed {
        let as_json = value.to_json();
        if !allowed.contains(&as_json) {
            return Err(format!(
                "must be one of {}",
                serde_json::Value::Array(allowed.clone())
            ));
        }
    }

    Ok(())
}
