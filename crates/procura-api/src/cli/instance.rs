//! CLI workflow instance subcommands.
//!
//! Start, resume, decide, and inspect workflow instances against the local
//! database. Every command prints either styled text or, with `--json`, the
//! serialized engine result.

use std::path::Path;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::Value;

use procura_core::workflows::{purchase_order, vendor_onboarding};
use procura_types::approval::BranchDecision;
use procura_types::workflow::{
    BusinessRecord, Checkpoint, InstanceId, WorkflowInstance, WorkflowStatus, WorkflowType,
};

use super::DecisionArgs;
use crate::state::AppState;

/// Output options shared by every instance command.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

// ---------------------------------------------------------------------------
// Start / resume
// ---------------------------------------------------------------------------

pub async fn start(
    state: &AppState,
    workflow_type: WorkflowType,
    id: Option<String>,
    payload: Option<String>,
    payload_file: Option<&Path>,
    out: Output,
) -> Result<()> {
    let payload = match (payload, payload_file) {
        (Some(raw), _) => parse_json_object(&raw, "--payload")?,
        (None, Some(path)) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            parse_json_object(&raw, &path.display().to_string())?
        }
        (None, None) => Value::Object(Default::default()),
    };

    let instance = state
        .engine
        .start(workflow_type, id.map(InstanceId::new), &payload)
        .await?;

    print_instance("Started", &instance, out)
}

pub async fn resume(state: &AppState, id: &str, input: &str, out: Output) -> Result<()> {
    let input = parse_json_object(input, "--input")?;
    let instance = state.engine.resume(&InstanceId::new(id), &input).await?;
    print_instance("Resumed", &instance, out)
}

pub async fn approve_central(
    state: &AppState,
    id: &str,
    decision: &DecisionArgs,
    out: Output,
) -> Result<()> {
    let input = vendor_onboarding::central_decision_input(
        !decision.reject,
        &decision.decided_by,
        decision.comments.as_deref(),
    );
    let instance = state.engine.resume(&InstanceId::new(id), &input).await?;
    print_instance("Central decision recorded for", &instance, out)
}

pub async fn decide_department(
    state: &AppState,
    id: &str,
    branch: &str,
    decision: &DecisionArgs,
    out: Output,
) -> Result<()> {
    let input = vendor_onboarding::department_decision_input(
        branch,
        !decision.reject,
        &decision.decided_by,
        decision.comments.as_deref(),
    );
    let instance = state.engine.resume(&InstanceId::new(id), &input).await?;
    print_instance(&format!("Decision '{branch}' recorded for"), &instance, out)
}

pub async fn approve_po(
    state: &AppState,
    id: &str,
    decision: &DecisionArgs,
    out: Output,
) -> Result<()> {
    let input = purchase_order::level_decision_input(
        !decision.reject,
        &decision.decided_by,
        decision.comments.as_deref(),
    );
    let instance = state.engine.resume(&InstanceId::new(id), &input).await?;
    print_instance("Level decision recorded for", &instance, out)
}

pub async fn reconcile(state: &AppState, id: &str, out: Output) -> Result<()> {
    let instance = state.engine.reconcile(&InstanceId::new(id)).await?;
    print_instance("Reconciled", &instance, out)
}

// ---------------------------------------------------------------------------
// Inspection
// ---------------------------------------------------------------------------

pub async fn status(state: &AppState, id: &str, out: Output) -> Result<()> {
    let id = InstanceId::new(id);
    let instance = state.engine.get_state(&id).await?;
    let record = state.engine.business_record(&id).await.ok();

    if out.json {
        let value = serde_json::json!({
            "instance": instance,
            "record": record,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    print_instance("Instance", &instance, out)?;
    if let Some(record) = record {
        print_record(&record);
    } else {
        println!(
            "  {} Projection missing; run {}",
            style("!").yellow().bold(),
            style(format!("procura reconcile {id}")).dim()
        );
        println!();
    }
    Ok(())
}

pub async fn history(state: &AppState, id: &str, out: Output) -> Result<()> {
    let transitions = state.engine.transitions(&InstanceId::new(id)).await?;

    if out.json {
        println!("{}", serde_json::to_string_pretty(&transitions)?);
        return Ok(());
    }

    if transitions.is_empty() {
        println!();
        println!("  No status changes recorded for '{id}'.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Seq").fg(Color::Cyan),
            Cell::new("From"),
            Cell::new("To"),
            Cell::new("Node"),
            Cell::new("By"),
            Cell::new("Reason"),
            Cell::new("At"),
        ]);

    for t in &transitions {
        table.add_row(vec![
            Cell::new(t.sequence_number),
            Cell::new(t.from_status),
            status_cell(t.to_status),
            Cell::new(&t.node_id),
            Cell::new(t.actor.as_deref().unwrap_or("-")),
            Cell::new(t.reason.as_deref().unwrap_or("")),
            Cell::new(t.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()),
        ]);
    }

    println!();
    println!("  Status history for '{}'", style(id).cyan());
    println!();
    println!("{table}");
    println!();
    Ok(())
}

pub async fn checkpoints(state: &AppState, id: &str, out: Output) -> Result<()> {
    let history = state.engine.history(&InstanceId::new(id)).await?;

    if out.json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Seq").fg(Color::Cyan),
            Cell::new("Parent"),
            Cell::new("Node"),
            Cell::new("Status"),
            Cell::new("Created"),
        ]);

    for c in &history {
        let parent = c
            .parent_sequence_number
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(c.sequence_number),
            Cell::new(parent),
            Cell::new(&c.snapshot.current_node),
            status_cell(c.snapshot.status),
            Cell::new(c.created_at.format("%Y-%m-%d %H:%M:%S").to_string()),
        ]);
    }

    println!();
    println!("  Checkpoints for '{}'", style(id).cyan());
    println!();
    println!("{table}");
    println!();
    Ok(())
}

pub async fn checkpoint(state: &AppState, id: &str, sequence: u64, out: Output) -> Result<()> {
    let checkpoint = state
        .engine
        .checkpoint_at(&InstanceId::new(id), sequence)
        .await?;

    if out.json {
        println!("{}", serde_json::to_string_pretty(&checkpoint)?);
        return Ok(());
    }

    print_checkpoint(&checkpoint)
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn parse_json_object(raw: &str, source: &str) -> Result<Value> {
    let value: Value =
        serde_json::from_str(raw).with_context(|| format!("{source} is not valid JSON"))?;
    if !value.is_object() {
        bail!("{source} must be a JSON object");
    }
    Ok(value)
}

fn status_color(status: WorkflowStatus) -> Color {
    match status {
        WorkflowStatus::Approved => Color::Green,
        WorkflowStatus::Rejected => Color::Red,
        WorkflowStatus::Draft => Color::Grey,
        _ => Color::Yellow,
    }
}

fn status_cell(status: WorkflowStatus) -> Cell {
    Cell::new(status).fg(status_color(status))
}

fn styled_status(status: WorkflowStatus) -> String {
    let styled = match status {
        WorkflowStatus::Approved => style(status.as_str()).green().bold(),
        WorkflowStatus::Rejected => style(status.as_str()).red().bold(),
        _ => style(status.as_str()).yellow(),
    };
    styled.to_string()
}

fn print_instance(action: &str, instance: &WorkflowInstance, out: Output) -> Result<()> {
    if out.json {
        println!("{}", serde_json::to_string_pretty(instance)?);
        return Ok(());
    }
    if out.quiet {
        return Ok(());
    }

    println!();
    println!(
        "  {} {} '{}'",
        style("*").green().bold(),
        action,
        style(&instance.instance_id).cyan()
    );
    println!("  Workflow: {}", instance.workflow_type());
    println!("  Status:   {}", styled_status(instance.status));
    if instance.is_terminal() {
        println!("  Node:     {}", style("(finished)").dim());
    } else {
        println!("  Node:     {} {}", instance.current_node, style("(waiting for input)").dim());
    }
    println!("  Sequence: {}", instance.sequence_number);
    if let Some(err) = &instance.last_error {
        println!("  Error:    {}", style(err).red());
    }
    println!();
    Ok(())
}

fn print_record(record: &BusinessRecord) {
    if let Some(fields) = record.derived.as_object() {
        for (key, value) in fields.iter().filter(|(_, v)| !v.is_null()) {
            println!("  {:<14}{}", format!("{key}:"), value);
        }
    }

    if !record.approvals.is_empty() {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("Approval").fg(Color::Cyan),
                Cell::new("Decision"),
                Cell::new("By"),
                Cell::new("Comments"),
            ]);
        for a in &record.approvals {
            let color = match a.decision {
                BranchDecision::Approved => Color::Green,
                BranchDecision::Rejected => Color::Red,
                BranchDecision::Pending => Color::Yellow,
            };
            table.add_row(vec![
                Cell::new(&a.approval_type),
                Cell::new(a.decision).fg(color),
                Cell::new(a.decided_by.as_deref().unwrap_or("-")),
                Cell::new(a.comments.as_deref().unwrap_or("")),
            ]);
        }
        println!();
        println!("{table}");
    }
    println!();
}

fn print_checkpoint(checkpoint: &Checkpoint) -> Result<()> {
    println!();
    println!(
        "  Checkpoint {} of '{}'",
        style(checkpoint.sequence_number).bold(),
        style(&checkpoint.instance_id).cyan()
    );
    match checkpoint.parent_sequence_number {
        Some(parent) => println!("  Parent:  {parent}"),
        None => println!("  Parent:  {}", style("(initial)").dim()),
    }
    println!("  Node:    {}", checkpoint.snapshot.current_node);
    println!("  Status:  {}", styled_status(checkpoint.snapshot.status));
    println!("  Created: {}", checkpoint.created_at.to_rfc3339());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&checkpoint.snapshot.payload)?
    );
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_json_object_accepts_objects_only() {
        assert!(parse_json_object(r#"{"amount": 10}"#, "--input").is_ok());

        let err = parse_json_object("[1, 2]", "--input").unwrap_err();
        assert!(err.to_string().contains("must be a JSON object"));

        let err = parse_json_object("{oops", "--payload").unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }

    #[test]
    fn status_colors() {
        assert_eq!(status_color(WorkflowStatus::Approved), Color::Green);
        assert_eq!(status_color(WorkflowStatus::Rejected), Color::Red);
        assert_eq!(status_color(WorkflowStatus::PoL2), Color::Yellow);
    }
}
