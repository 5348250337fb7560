//! Output formatters for command results.

use clap::ValueEnum;
use rowguard_core::{Decision, Operation, PolicySnapshot, Row};
use rowguard_domain::{DomainExpr, RecordId};
use serde_json::json;

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Counts describing a compiled bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleSummary {
    pub generation: u64,
    pub models: usize,
    pub access_rules: usize,
    pub record_rules: usize,
    pub field_grants: usize,
}

impl BundleSummary {
    pub fn of(snapshot: &PolicySnapshot) -> Self {
        Self {
            generation: snapshot.generation(),
            models: snapshot.catalog().len(),
            access_rules: snapshot.access().len(),
            record_rules: snapshot.record_rules().len(),
            field_grants: snapshot.field_grants().len(),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Format a model-level decision.
    fn format_decision(&self, model: &str, operation: Operation, decision: &Decision) -> String;

    /// Format the ids that passed filtering.
    fn format_ids(&self, ids: &[RecordId]) -> String;

    /// Format projected rows.
    fn format_rows(&self, rows: &[(RecordId, Row)]) -> String;

    /// Format a parsed domain.
    fn format_domain(&self, domain: &DomainExpr) -> String;

    /// Format a bundle summary.
    fn format_summary(&self, summary: &BundleSummary) -> String;

    /// Format the generations of an archive.
    fn format_generations(&self, current: u64, generations: &[u64]) -> String;

    /// Format a denial raised by an enforcing call.
    fn format_denial(&self, reason: &str) -> String;

    /// Format an error message.
    fn format_error(&self, error: &str) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Plain text formatter.
pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn format_decision(&self, model: &str, operation: Operation, decision: &Decision) -> String {
        match decision {
            Decision::Allowed => format!("allowed: {} on '{}'", operation, model),
            Decision::Denied(reason) => format!("denied: {}", reason),
        }
    }

    fn format_ids(&self, ids: &[RecordId]) -> String {
        if ids.is_empty() {
            return "No records".to_string();
        }
        ids.iter().map(RecordId::to_string).collect::<Vec<_>>().join("\n")
    }

    fn format_rows(&self, rows: &[(RecordId, Row)]) -> String {
        if rows.is_empty() {
            return "No records".to_string();
        }
        rows.iter()
            .map(|(id, row)| {
                let fields: Vec<String> = row.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                if fields.is_empty() {
                    format!("{}", id)
                } else {
                    format!("{}: {}", id, fields.join(" "))
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn format_domain(&self, domain: &DomainExpr) -> String {
        let mut paths: Vec<String> = domain.fields().iter().map(|p| p.to_string()).collect();
        paths.dedup();
        if paths.is_empty() {
            domain.to_string()
        } else {
            format!("{}\nfields: {}", domain, paths.join(", "))
        }
    }

    fn format_summary(&self, summary: &BundleSummary) -> String {
        format!(
            "generation {}: {} model(s), {} access rule(s), {} record rule(s), {} field grant(s)",
            summary.generation,
            summary.models,
            summary.access_rules,
            summary.record_rules,
            summary.field_grants
        )
    }

    fn format_generations(&self, current: u64, generations: &[u64]) -> String {
        if generations.is_empty() {
            return "No generations".to_string();
        }
        generations
            .iter()
            .map(|g| {
                if *g == current {
                    format!("{} (current)", g)
                } else {
                    g.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn format_denial(&self, reason: &str) -> String {
        format!("denied: {}", reason)
    }

    fn format_error(&self, error: &str) -> String {
        format!("Error: {}", error)
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl JsonFormatter {
    fn render(value: serde_json::Value) -> String {
        serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
    }
}

impl Formatter for JsonFormatter {
    fn format_decision(&self, model: &str, operation: Operation, decision: &Decision) -> String {
        let reason = match decision {
            Decision::Allowed => serde_json::Value::Null,
            Decision::Denied(reason) => json!(reason.to_string()),
        };
        Self::render(json!({
            "model": model,
            "operation": operation,
            "allowed": decision.is_allowed(),
            "reason": reason,
        }))
    }

    fn format_ids(&self, ids: &[RecordId]) -> String {
        Self::render(json!({ "allowed": ids }))
    }

    fn format_rows(&self, rows: &[(RecordId, Row)]) -> String {
        let rows: Vec<serde_json::Value> = rows
            .iter()
            .map(|(id, row)| json!({ "id": id, "fields": row }))
            .collect();
        Self::render(json!({ "rows": rows }))
    }

    fn format_domain(&self, domain: &DomainExpr) -> String {
        let mut paths: Vec<String> = domain.fields().iter().map(|p| p.to_string()).collect();
        paths.dedup();
        Self::render(json!({ "domain": domain.to_string(), "fields": paths }))
    }

    fn format_summary(&self, summary: &BundleSummary) -> String {
        Self::render(json!({
            "generation": summary.generation,
            "models": summary.models,
            "access_rules": summary.access_rules,
            "record_rules": summary.record_rules,
            "field_grants": summary.field_grants,
        }))
    }

    fn format_generations(&self, current: u64, generations: &[u64]) -> String {
        Self::render(json!({ "current": current, "generations": generations }))
    }

    fn format_denial(&self, reason: &str) -> String {
        Self::render(json!({ "allowed": false, "reason": reason }))
    }

    fn format_error(&self, error: &str) -> String {
        Self::render(json!({ "error": error }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowguard_core::DenyReason;
    use rowguard_domain::{parse, Value};

    fn row() -> Row {
        [("name".to_string(), Value::from("a")), ("price".to_string(), Value::Float(2.5))]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_text_decision() {
        let denied = Decision::Denied(DenyReason::NoAccess {
            model: "doc".into(),
            operation: Operation::Write,
        });
        assert_eq!(
            TextFormatter.format_decision("doc", Operation::Write, &denied),
            "denied: no access rule grants write on 'doc'"
        );
        assert_eq!(
            TextFormatter.format_decision("doc", Operation::Read, &Decision::Allowed),
            "allowed: read on 'doc'"
        );
    }

    #[test]
    fn test_text_rows_and_domain() {
        let text = TextFormatter.format_rows(&[(RecordId(1), row())]);
        assert_eq!(text, "1: name='a' price=2.5");
        assert_eq!(TextFormatter.format_rows(&[]), "No records");

        let domain = parse("['|', ('owner', '=', 42), ('owner', '=', 7)]").unwrap();
        let text = TextFormatter.format_domain(&domain);
        assert!(text.ends_with("fields: owner"));
    }

    #[test]
    fn test_json_outputs_parse_back() {
        let out = JsonFormatter.format_rows(&[(RecordId(1), row())]);
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["rows"][0]["id"], json!(1));
        assert_eq!(value["rows"][0]["fields"]["price"], json!(2.5));

        let out = JsonFormatter.format_decision("doc", Operation::Read, &Decision::Allowed);
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["operation"], json!("read"));
        assert_eq!(value["allowed"], json!(true));
        assert!(value["reason"].is_null());

        let out = JsonFormatter.format_generations(3, &[2, 3]);
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["generations"], json!([2, 3]));
    }

    #[test]
    fn test_denials_and_errors_per_format() {
        let text = create_formatter(OutputFormat::Text);
        assert_eq!(text.format_denial("no access"), "denied: no access");
        assert_eq!(text.format_error("bad bundle"), "Error: bad bundle");

        let json_out = create_formatter(OutputFormat::Json);
        let value: serde_json::Value =
            serde_json::from_str(&json_out.format_denial("no access")).unwrap();
        assert_eq!(value, json!({ "allowed": false, "reason": "no access" }));
        let value: serde_json::Value =
            serde_json::from_str(&json_out.format_error("bad bundle")).unwrap();
        assert_eq!(value["error"], json!("bad bundle"));
    }
}
