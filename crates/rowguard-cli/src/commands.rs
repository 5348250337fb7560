//! Command execution.

use std::path::Path;

use rowguard_core::{
    BundleArchive, Decision, EngineConfig, Operation, PolicyBundle, PolicyEngine, PolicyError,
};
use rowguard_domain::{parse, RecordId};
use thiserror::Error;
use tracing::info;

use crate::formatter::{BundleSummary, Formatter};
use crate::input::{self, Fixtures};
use crate::{Command, PrincipalArgs, Request};

/// Command errors.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Domain syntax error, rendered against its source.
    #[error("{0}")]
    Domain(String),

    /// Policy load or evaluation failure.
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// Reading an input file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An input file or argument is not valid JSON.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Rendered output and whether the request was denied.
#[derive(Debug)]
pub struct Outcome {
    pub output: String,
    pub denied: bool,
}

impl Outcome {
    fn done(output: String) -> Self {
        Self { output, denied: false }
    }

    fn denied(output: String) -> Self {
        Self { output, denied: true }
    }
}

/// Run one command.
pub fn run(command: Command, formatter: &dyn Formatter) -> Result<Outcome, CommandError> {
    match command {
        Command::Validate { policy } => validate(&policy, formatter),
        Command::Parse { domain, model, policy } => {
            parse_domain(&domain, model.as_deref(), policy.as_deref(), formatter)
        }
        Command::Check { request } => check(&request, formatter),
        Command::Filter { request, records, ids } => filter(&request, &records, &ids, formatter),
        Command::Project { principal, model, records, fields } => {
            project(&principal, &model, &records, &fields, formatter)
        }
        Command::GuardWrite { principal, model, records, record, values } => {
            guard_write(&principal, &model, &records, RecordId(record), &values, formatter)
        }
        Command::Publish { policy, archive, keep } => publish(&policy, &archive, keep, formatter),
        Command::History { archive } => history(&archive, formatter),
    }
}

fn validate(policy: &Path, formatter: &dyn Formatter) -> Result<Outcome, CommandError> {
    let engine = input::load_engine(policy)?;
    let summary = BundleSummary::of(&engine.snapshot());
    Ok(Outcome::done(formatter.format_summary(&summary)))
}

fn parse_domain(
    source: &str,
    model: Option<&str>,
    policy: Option<&Path>,
    formatter: &dyn Formatter,
) -> Result<Outcome, CommandError> {
    let domain = parse(source).map_err(|e| CommandError::Domain(e.format_with_source(source)))?;
    if let (Some(model), Some(policy)) = (model, policy) {
        let engine = input::load_engine(policy)?;
        engine.snapshot().catalog().validate_domain(model, &domain)?;
    }
    Ok(Outcome::done(formatter.format_domain(&domain)))
}

fn check(request: &Request, formatter: &dyn Formatter) -> Result<Outcome, CommandError> {
    let engine = input::load_engine(&request.principal.policy)?;
    let principal = input::principal(&request.principal);
    let decision = engine.check_operation(&principal, &request.model, request.operation);
    let output = formatter.format_decision(&request.model, request.operation, &decision);
    Ok(if decision.is_allowed() {
        Outcome::done(output)
    } else {
        Outcome::denied(output)
    })
}

fn filter(
    request: &Request,
    records: &Path,
    ids: &[i64],
    formatter: &dyn Formatter,
) -> Result<Outcome, CommandError> {
    let engine = input::load_engine(&request.principal.policy)?;
    let principal = input::principal(&request.principal);

    let decision = engine.check_operation(&principal, &request.model, request.operation);
    if !decision.is_allowed() {
        let output = formatter.format_decision(&request.model, request.operation, &decision);
        return Ok(Outcome::denied(output));
    }

    let fixtures = input::load_records(records)?;
    let candidates = candidates(&fixtures, &request.model, ids);
    let allowed = engine.filter_records(
        &principal,
        &request.model,
        request.operation,
        &candidates,
        &fixtures.records,
    )?;
    Ok(Outcome::done(formatter.format_ids(&allowed)))
}

fn project(
    args: &PrincipalArgs,
    model: &str,
    records: &Path,
    fields: &[String],
    formatter: &dyn Formatter,
) -> Result<Outcome, CommandError> {
    let engine = input::load_engine(&args.policy)?;
    let principal = input::principal(args);
    let fixtures = input::load_records(records)?;
    let requested: Vec<&str> = fields.iter().map(String::as_str).collect();

    let result = engine.enforce_read(
        &principal,
        model,
        &fixtures.ids_of(model),
        &requested,
        &fixtures.records,
    );
    match result {
        Ok(rows) => Ok(Outcome::done(formatter.format_rows(&rows))),
        Err(e) if e.is_denial() => Ok(Outcome::denied(formatter.format_denial(&e.to_string()))),
        Err(e) => Err(e.into()),
    }
}

fn guard_write(
    args: &PrincipalArgs,
    model: &str,
    records: &Path,
    record: RecordId,
    values: &str,
    formatter: &dyn Formatter,
) -> Result<Outcome, CommandError> {
    let engine = input::load_engine(&args.policy)?;
    let principal = input::principal(args);
    let fixtures = input::load_records(records)?;
    let values = input::parse_values(values)?;

    match engine.guard_write(&principal, model, record, &values, &fixtures.records) {
        Ok(()) => Ok(Outcome::done(formatter.format_decision(
            model,
            Operation::Write,
            &Decision::Allowed,
        ))),
        Err(e) if e.is_denial() => Ok(Outcome::denied(formatter.format_denial(&e.to_string()))),
        Err(e) => Err(e.into()),
    }
}

fn publish(
    policy: &Path,
    archive: &Path,
    keep: Option<usize>,
    formatter: &dyn Formatter,
) -> Result<Outcome, CommandError> {
    let bundle = PolicyBundle::from_path(policy)?;
    let engine = PolicyEngine::new(EngineConfig::default().with_archive_path(archive))?;
    let generation = engine.reload(&bundle)?;

    if let Some(archive) = engine.archive() {
        if let Some(keep) = keep {
            let removed = archive.prune(keep.max(1))?;
            info!(generation, removed, "pruned archive after publish");
        }
        archive.flush()?;
    }
    Ok(Outcome::done(formatter.format_summary(&BundleSummary::of(&engine.snapshot()))))
}

fn history(archive: &Path, formatter: &dyn Formatter) -> Result<Outcome, CommandError> {
    let archive = BundleArchive::open_path(archive)?;
    let generations = archive.list_generations()?;
    let current = archive.current_generation()?;
    Ok(Outcome::done(formatter.format_generations(current, &generations)))
}

/// Explicit ids win; otherwise every fixture record of the model.
fn candidates(fixtures: &Fixtures, model: &str, ids: &[i64]) -> Vec<RecordId> {
    if ids.is_empty() {
        fixtures.ids_of(model)
    } else {
        ids.iter().copied().map(RecordId).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatter::{JsonFormatter, TextFormatter};
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const POLICY: &str = r#"{
        "models": [
            {"name": "partner", "fields": [{"name": "phone", "kind": "char"}]},
            {"name": "doc", "fields": [
                {"name": "name", "kind": "char"},
                {"name": "owner", "kind": "integer"},
                {"name": "salary", "kind": "float"},
                {"name": "contact", "kind": "many2one", "relation": "partner"}
            ]}
        ],
        "access_rules": [
            {"id": "doc_read", "model": "doc", "read": true},
            {"id": "doc_edit", "model": "doc", "group": "editors", "write": true}
        ],
        "record_rules": [
            {"id": "own", "model": "doc", "operations": ["read", "write"],
             "domain": "[('owner', '=', 42)]"}
        ],
        "field_grants": [
            {"model": "doc", "field": "salary", "read_groups": ["hr"], "write_groups": ["hr"]}
        ]
    }"#;

    const RECORDS: &str = r#"{
        "partner": [{"id": 100, "fields": {"phone": "555"}}],
        "doc": [
            {"id": 1, "fields": {"name": "a", "owner": 42, "salary": 10.0, "contact": {"ref": 100}}},
            {"id": 2, "fields": {"name": "b", "owner": 7, "salary": 20.0, "contact": null}}
        ]
    }"#;

    struct Fixture {
        dir: TempDir,
        policy: PathBuf,
        records: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let policy = dir.path().join("policy.json");
            let records = dir.path().join("records.json");
            std::fs::write(&policy, POLICY).unwrap();
            std::fs::write(&records, RECORDS).unwrap();
            Self { dir, policy, records }
        }

        fn principal(&self, groups: &[&str]) -> PrincipalArgs {
            PrincipalArgs {
                policy: self.policy.clone(),
                principal: "alice".into(),
                groups: groups.iter().map(|g| g.to_string()).collect(),
            }
        }

        fn request(&self, groups: &[&str], operation: Operation) -> Request {
            Request {
                principal: self.principal(groups),
                model: "doc".into(),
                operation,
            }
        }
    }

    #[test]
    fn test_validate_summary() {
        let fx = Fixture::new();
        let outcome = run(Command::Validate { policy: fx.policy.clone() }, &TextFormatter).unwrap();
        assert_eq!(
            outcome.output,
            "generation 1: 2 model(s), 2 access rule(s), 1 record rule(s), 1 field grant(s)"
        );
    }

    #[test]
    fn test_parse_reports_source_excerpt() {
        let err = run(
            Command::Parse { domain: "['&', ('a', '=', 1)]".into(), model: None, policy: None },
            &TextFormatter,
        )
        .unwrap_err();
        assert!(matches!(err, CommandError::Domain(_)));

        let fx = Fixture::new();
        let err = run(
            Command::Parse {
                domain: "[('contact.email', '=', 'x')]".into(),
                model: Some("doc".into()),
                policy: Some(fx.policy.clone()),
            },
            &TextFormatter,
        )
        .unwrap_err();
        assert!(matches!(err, CommandError::Policy(PolicyError::UnknownField { .. })));
    }

    #[test]
    fn test_check_exit_state() {
        let fx = Fixture::new();
        let outcome = run(
            Command::Check { request: fx.request(&["editors"], Operation::Write) },
            &TextFormatter,
        )
        .unwrap();
        assert!(!outcome.denied);

        let outcome = run(
            Command::Check { request: fx.request(&[], Operation::Write) },
            &TextFormatter,
        )
        .unwrap();
        assert!(outcome.denied);
    }

    #[test]
    fn test_filter_defaults_to_model_records() {
        let fx = Fixture::new();
        let outcome = run(
            Command::Filter {
                request: fx.request(&[], Operation::Read),
                records: fx.records.clone(),
                ids: vec![],
            },
            &JsonFormatter,
        )
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&outcome.output).unwrap();
        assert_eq!(value["allowed"], serde_json::json!([1]));
    }

    #[test]
    fn test_project_masks_fields() {
        let fx = Fixture::new();
        let outcome = run(
            Command::Project {
                principal: fx.principal(&[]),
                model: "doc".into(),
                records: fx.records.clone(),
                fields: vec!["name".into(), "salary".into()],
            },
            &TextFormatter,
        )
        .unwrap();
        assert_eq!(outcome.output, "1: name='a'");
    }

    #[test]
    fn test_guard_write_denials() {
        let fx = Fixture::new();
        let attempt = |groups: &[&str], record: i64, values: &str| {
            run(
                Command::GuardWrite {
                    principal: fx.principal(groups),
                    model: "doc".into(),
                    records: fx.records.clone(),
                    record,
                    values: values.into(),
                },
                &TextFormatter,
            )
            .unwrap()
        };

        assert!(!attempt(&["editors"], 1, r#"{"name": "x"}"#).denied);
        // Field grant fails first.
        let outcome = attempt(&["editors"], 1, r#"{"salary": 1.0}"#);
        assert!(outcome.denied);
        assert!(outcome.output.contains("salary"));
        // Row rule.
        assert!(attempt(&["editors"], 2, r#"{"name": "x"}"#).denied);
        // Model grant.
        assert!(attempt(&[], 1, r#"{"name": "x"}"#).denied);
    }

    #[test]
    fn test_publish_and_history() {
        let fx = Fixture::new();
        let archive = fx.dir.path().join("archive");
        for _ in 0..3 {
            run(
                Command::Publish { policy: fx.policy.clone(), archive: archive.clone(), keep: Some(2) },
                &TextFormatter,
            )
            .unwrap();
        }
        let outcome = run(Command::History { archive }, &JsonFormatter).unwrap();
        let value: serde_json::Value = serde_json::from_str(&outcome.output).unwrap();
        assert_eq!(value["current"], serde_json::json!(3));
        assert_eq!(value["generations"], serde_json::json!([2, 3]));
    }
}
