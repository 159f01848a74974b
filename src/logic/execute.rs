use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::EngineError;
use crate::logic::guard::SecurityGuard;
use crate::logic::refs::{resolve_binding, resolve_template, substitute_inline, RefContext};
use crate::model::{CallSpec, LogicConfig, LogicSpec, NamedQuery, ParamMap, PipelineStep, StepLogic};
use crate::source::{CallSource, OutboundRequest, QuerySource};

/// Raw result of one dispatch, before response mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub result: serde_json::Value,
    pub result_count: usize,
    /// Status of the upstream response for EXTERNAL_CALL results.
    pub upstream_status: Option<u16>,
}

impl Execution {
    fn empty() -> Self {
        Self {
            result: serde_json::Value::Null,
            result_count: 0,
            upstream_status: None,
        }
    }
}

fn count_of(value: &serde_json::Value) -> usize {
    match value {
        serde_json::Value::Null => 0,
        serde_json::Value::Array(items) => items.len(),
        _ => 1,
    }
}

/// Executes a version's logic payload: a closed dispatch over the logic kind.
///
/// Every kind consumes only the typed parameter mapping and named outputs
/// produced earlier in the same request; query text never has untrusted data
/// spliced into it. Each step runs under its own deadline, and a pipeline
/// additionally runs under an aggregate budget that can only shorten a step's
/// allowance.
pub struct LogicExecutor {
    query_source: Arc<dyn QuerySource>,
    call_source: Arc<dyn CallSource>,
    guard: SecurityGuard,
}

impl LogicExecutor {
    pub fn new(
        query_source: Arc<dyn QuerySource>,
        call_source: Arc<dyn CallSource>,
        guard: SecurityGuard,
    ) -> Self {
        Self {
            query_source,
            call_source,
            guard,
        }
    }

    pub async fn execute(
        &self,
        logic: &LogicSpec,
        config: &LogicConfig,
        params: &ParamMap,
    ) -> Result<Execution, EngineError> {
        let no_steps = BTreeMap::new();
        match logic {
            LogicSpec::SingleQuery { sql } => {
                let allowance = self.guard.step_allowance(config.timeout_secs);
                with_deadline(
                    "step",
                    allowance,
                    self.run_single_query(sql, config, params, &no_steps),
                )
                .await
            }
            LogicSpec::MultiQuery { queries } => {
                self.run_multi_query(queries, config, params, &no_steps).await
            }
            LogicSpec::Pipeline { steps } => self.run_pipeline(steps, config, params).await,
            LogicSpec::ExternalCall { call } => {
                let allowance = self.guard.step_allowance(config.timeout_secs);
                with_deadline(
                    "step",
                    allowance,
                    self.run_external_call(call, params, &no_steps),
                )
                .await
            }
            LogicSpec::StaticResponse { body } => Ok(run_static(body, params, &no_steps)),
            LogicSpec::Expression { .. } => Err(EngineError::security(
                "unsupported logic kind: EXPRESSION is permanently disabled",
            )),
        }
    }

    async fn run_single_query(
        &self,
        sql: &str,
        config: &LogicConfig,
        params: &ParamMap,
        steps: &BTreeMap<String, serde_json::Value>,
    ) -> Result<Execution, EngineError> {
        self.guard.screen_sql(sql)?;
        let ctx = RefContext::new(params, steps);
        let (positional, binds) = bind_named(sql, &BTreeMap::new(), &ctx)?;

        let mut rows = self
            .query_source
            .execute_read(&positional, &binds)
            .await
            .map_err(|err| {
                log::warn!("read query failed: {:#}", err);
                EngineError::execution("query execution failed")
            })?;

        self.guard
            .enforce_row_ceiling(&mut rows, self.guard.row_ceiling(config));
        let result: Vec<serde_json::Value> =
            rows.into_iter().map(serde_json::Value::Object).collect();
        Ok(Execution {
            result_count: result.len(),
            result: serde_json::Value::Array(result),
            upstream_status: None,
        })
    }

    async fn run_multi_query(
        &self,
        queries: &[NamedQuery],
        config: &LogicConfig,
        params: &ParamMap,
        base_steps: &BTreeMap<String, serde_json::Value>,
    ) -> Result<Execution, EngineError> {
        if queries.is_empty() {
            return Err(EngineError::execution("MULTI_QUERY declares no queries"));
        }

        // Earlier pipeline outputs stay visible to references; only the named
        // query results form the returned mapping.
        let mut visible = base_steps.clone();
        let mut output = serde_json::Map::new();
        let mut total = 0usize;

        for query in queries {
            self.guard.screen_sql(&query.sql)?;

            let mut overrides = BTreeMap::new();
            {
                let ctx = RefContext::new(params, &visible);
                for (bind_name, value) in &query.params {
                    let resolved = resolve_binding(&ctx, value).map_err(|message| {
                        EngineError::execution(format!("query '{}': {}", query.name, message))
                    })?;
                    overrides.insert(bind_name.clone(), resolved);
                }
            }

            let (positional, binds) = {
                let ctx = RefContext::new(params, &visible);
                bind_named(&query.sql, &overrides, &ctx)?
            };

            let allowance = self.guard.step_allowance(config.timeout_secs);
            let mut rows = with_deadline("step", allowance, async {
                self.query_source
                    .execute_read(&positional, &binds)
                    .await
                    .map_err(|err| {
                        log::warn!("read query '{}' failed: {:#}", query.name, err);
                        EngineError::execution(format!("query '{}' failed", query.name))
                    })
            })
            .await?;

            self.guard
                .enforce_row_ceiling(&mut rows, self.guard.row_ceiling(config));
            total += rows.len();
            let value = serde_json::Value::Array(
                rows.into_iter().map(serde_json::Value::Object).collect(),
            );
            visible.insert(query.name.clone(), value.clone());
            output.insert(query.name.clone(), value);
        }

        Ok(Execution {
            result: serde_json::Value::Object(output),
            result_count: total,
            upstream_status: None,
        })
    }

    async fn run_pipeline(
        &self,
        steps: &[PipelineStep],
        config: &LogicConfig,
        params: &ParamMap,
    ) -> Result<Execution, EngineError> {
        if steps.is_empty() {
            return Err(EngineError::execution("PIPELINE declares no steps"));
        }

        let budget = self.guard.pipeline_budget(config);
        let deadline = Instant::now() + budget;
        let mut outputs: BTreeMap<String, serde_json::Value> = BTreeMap::new();
        let mut last: Option<Execution> = None;

        for step in steps {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(EngineError::Timeout {
                    scope: "pipeline",
                    limit_secs: budget.as_secs(),
                });
            }

            // The aggregate budget can only shorten a step's allowance.
            let declared = self.guard.step_allowance(step.timeout_secs.or(config.timeout_secs));
            let (allowance, scope) = if remaining < declared {
                (remaining, "pipeline")
            } else {
                (declared, "step")
            };

            let outcome = with_deadline(
                scope,
                allowance,
                self.run_step(&step.logic, config, params, &outputs),
            )
            .await;

            match outcome {
                Ok(execution) => {
                    outputs.insert(step.output.clone(), execution.result.clone());
                    last = Some(execution);
                }
                Err(err) => {
                    let budget_exhausted =
                        matches!(err, EngineError::Timeout { scope: "pipeline", .. });
                    if step.optional && !budget_exhausted {
                        log::warn!("optional step '{}' failed: {}", step.output, err);
                        outputs.insert(step.output.clone(), serde_json::Value::Null);
                    } else {
                        return Err(err);
                    }
                }
            }
        }

        Ok(last.unwrap_or_else(Execution::empty))
    }

    async fn run_step(
        &self,
        logic: &StepLogic,
        config: &LogicConfig,
        params: &ParamMap,
        outputs: &BTreeMap<String, serde_json::Value>,
    ) -> Result<Execution, EngineError> {
        match logic {
            StepLogic::SingleQuery { sql } => {
                self.run_single_query(sql, config, params, outputs).await
            }
            StepLogic::MultiQuery { queries } => {
                self.run_multi_query(queries, config, params, outputs).await
            }
            StepLogic::ExternalCall { call } => {
                self.run_external_call(call, params, outputs).await
            }
            StepLogic::StaticResponse { body } => Ok(run_static(body, params, outputs)),
        }
    }

    async fn run_external_call(
        &self,
        call: &CallSpec,
        params: &ParamMap,
        steps: &BTreeMap<String, serde_json::Value>,
    ) -> Result<Execution, EngineError> {
        let ctx = RefContext::new(params, steps);
        let request = OutboundRequest {
            method: call.method.clone(),
            url: substitute_inline(&ctx, &call.url),
            headers: call
                .headers
                .iter()
                .map(|(name, value)| (name.clone(), substitute_inline(&ctx, value)))
                .collect(),
            body: call.body.as_ref().map(|body| resolve_template(&ctx, body)),
        };

        let outcome = self.call_source.call(request).await.map_err(|err| {
            log::warn!("outbound call failed: {:#}", err);
            EngineError::execution("outbound call failed")
        })?;

        if !outcome.is_success() {
            log::warn!(
                "upstream returned status {}: {}",
                outcome.status,
                outcome.body
            );
            return Err(EngineError::execution(format!(
                "upstream responded with status {}",
                outcome.status
            )));
        }

        Ok(Execution {
            result_count: count_of(&outcome.body),
            result: outcome.body,
            upstream_status: Some(outcome.status),
        })
    }
}

fn run_static(
    body: &serde_json::Value,
    params: &ParamMap,
    steps: &BTreeMap<String, serde_json::Value>,
) -> Execution {
    let ctx = RefContext::new(params, steps);
    let resolved = resolve_template(&ctx, body);
    Execution {
        result_count: count_of(&resolved),
        result: resolved,
        upstream_status: None,
    }
}

async fn with_deadline<T, F>(
    scope: &'static str,
    limit: Duration,
    future: F,
) -> Result<T, EngineError>
where
    F: Future<Output = Result<T, EngineError>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout {
            scope,
            limit_secs: limit.as_secs(),
        }),
    }
}

/// Rewrite `:name` placeholders to positional `$n` binds. Values come from
/// explicit overrides first, then the validated parameters, then named step
/// outputs. `::` casts and quoted literals are left alone; an unbound
/// placeholder is a definition error.
fn bind_named(
    sql: &str,
    overrides: &BTreeMap<String, serde_json::Value>,
    ctx: &RefContext<'_>,
) -> Result<(String, Vec<serde_json::Value>), EngineError> {
    let mut rewritten = String::with_capacity(sql.len());
    let mut binds: Vec<serde_json::Value> = Vec::new();
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    let mut chars = sql.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if c == '\'' {
            in_string = !in_string;
            rewritten.push(c);
            continue;
        }
        if in_string || c != ':' {
            rewritten.push(c);
            continue;
        }

        match chars.peek() {
            Some(':') => {
                chars.next();
                rewritten.push_str("::");
            }
            Some(next) if next.is_ascii_alphabetic() || *next == '_' => {
                let mut name = String::new();
                while let Some(nc) = chars.peek() {
                    if nc.is_ascii_alphanumeric() || *nc == '_' {
                        name.push(*nc);
                        chars.next();
                    } else {
                        break;
                    }
                }

                let index = match seen.get(&name) {
                    Some(index) => *index,
                    None => {
                        let value = overrides
                            .get(&name)
                            .cloned()
                            .or_else(|| ctx.params.get(&name).map(|p| p.to_json()))
                            .or_else(|| ctx.steps.get(&name).cloned())
                            .ok_or_else(|| {
                                EngineError::execution(format!(
                                    "unbound query parameter :{}",
                                    name
                                ))
                            })?;
                        binds.push(value);
                        let index = binds.len();
                        seen.insert(name, index);
                        index
                    }
                };
                rewritten.push('$');
                rewritten.push_str(&index.to_string());
            }
            _ => rewritten.push(':'),
        }
    }

    Ok((rewritten, binds))
}
