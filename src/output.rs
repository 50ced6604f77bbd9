//! Terminal reporting for the CLI front-end (§7 "user-visible behavior").

use crate::executor::ExecutionReport;
use crate::planner::{OperationKind, Plan};
use colored::Colorize;

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg.green());
}

pub fn print_error(msg: &str) {
    println!("{} {}", "✗".red().bold(), msg.red());
}

/// Print the plan listing: one line per operation, symbol matching the
/// Terraform-style convention (`+` create, `~` update, `-` destroy).
pub fn print_plan(plan: &Plan) {
    if plan.is_empty() {
        println!("{}", "No changes. Infrastructure is up-to-date.".green());
        return;
    }

    println!();
    println!("drft will perform the following actions:");
    println!();
    for op in &plan.operations {
        let (icon, colored_id): (&str, colored::ColoredString) = match op.kind {
            OperationKind::Create => ("+", op.id.green()),
            OperationKind::Update => ("~", op.id.yellow()),
            OperationKind::Delete => ("-", op.id.red()),
        };
        println!("  {icon} {colored_id}");
    }
    println!();

    if let Some(diagnostics) = &plan.diagnostics {
        if !diagnostics.unchanged.is_empty() {
            println!("{}", "Unchanged:".dimmed());
            for id in &diagnostics.unchanged {
                println!("  {} {}", "=".dimmed(), id.dimmed());
            }
            println!();
        }
        for (id, diffs) in &diagnostics.field_diffs {
            println!("{} {}:", "~".yellow(), id.bold());
            for diff in diffs {
                println!(
                    "    {} {} = {} -> {}",
                    "~".yellow(),
                    diff.field,
                    diff.current,
                    diff.desired
                );
            }
        }
    }
}

/// Print the JSON form of a plan for `--json`.
pub fn print_plan_json(plan: &Plan) -> serde_json::Result<()> {
    let ops: Vec<serde_json::Value> = plan
        .operations
        .iter()
        .map(|op| {
            serde_json::json!({
                "id": op.id,
                "action": op.kind.to_string(),
            })
        })
        .collect();
    let out = serde_json::json!({ "operations": ops });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

/// Print the per-operation execution report ending in the summary line
/// from §7.
pub fn print_report(report: &ExecutionReport) {
    println!();
    for result in &report.results {
        if result.success {
            println!("  {} {} {}", "✓".green(), result.kind, result.id);
        } else {
            println!(
                "  {} {} {}: {}",
                "✗".red(),
                result.kind,
                result.id,
                result.error.as_deref().unwrap_or("unknown error").red()
            );
        }
    }
    println!();
    println!(
        "Successful: {} / Failed: {} / Total: {}",
        report.succeeded(),
        report.failed(),
        report.results.len()
    );
}
