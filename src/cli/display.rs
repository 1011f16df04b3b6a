//! Display formatting for CLI output
//!
//! SBIO pattern: Pure functions that format data for display

use serde::Serialize;

use super::OutputFormat;
use crate::capacity::{CloudCostReport, TenantSpec};
use crate::ledger::{DeploymentRecord, ImageVersion};
use crate::manifest::ManifestPackage;
use crate::monitor::HealthSummary;
use crate::placement::PlacementReport;
use crate::provisioner::TenantStatusReport;

// ============================================================================
// Table formatting helpers
// ============================================================================

/// Format a simple table with headers and rows
pub fn format_table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    if rows.is_empty() {
        return "No resources found.\n".to_string();
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let mut output = String::new();

    for (i, header) in headers.iter().enumerate() {
        if i > 0 {
            output.push_str("   ");
        }
        output.push_str(&format!(
            "{:width$}",
            header.to_uppercase(),
            width = widths[i]
        ));
    }
    output.push('\n');

    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i > 0 {
                output.push_str("   ");
            }
            if i < widths.len() {
                output.push_str(&format!("{:width$}", cell, width = widths[i]));
            } else {
                output.push_str(cell);
            }
        }
        output.push('\n');
    }

    output
}

/// Encode as JSON or YAML; `None` for [`OutputFormat::Text`]
pub fn format_structured<T: Serialize>(value: &T, format: OutputFormat) -> Option<String> {
    let encoded = match format {
        OutputFormat::Text => return None,
        OutputFormat::Json => serde_json::to_string_pretty(value).map_err(|e| e.to_string()),
        OutputFormat::Yaml => serde_yaml::to_string(value).map_err(|e| e.to_string()),
    };
    Some(encoded.unwrap_or_else(|e| format!("error: failed to encode output: {}\n", e)))
}

// ============================================================================
// Planning display
// ============================================================================

/// Format a tenant spec summary
pub fn format_spec(spec: &TenantSpec) -> String {
    let mut output = String::new();
    let r = &spec.resources;

    output.push_str(&format!("Tenant {} ({})\n", spec.tenant_id, spec.namespace));
    output.push_str(&format!(
        "Preset: {}   GPU tier: {}{}   Profile: {}\n",
        spec.preset,
        spec.gpu_type,
        if r.tier_auto_selected { " (auto)" } else { "" },
        spec.profile_version
    ));
    output.push_str(&format!(
        "Channels: {}   Users: {}   Scale multiplier: {}\n\n",
        spec.total_channels, spec.total_users, r.scale_multiplier
    ));

    output.push_str("Resources:\n");
    output.push_str(&format!(
        "  GPU      {:>6}  (tts {}, nlp {}, aicm {})\n",
        r.gpu.total, r.gpu.tts, r.gpu.nlp, r.gpu.aicm
    ));
    output.push_str(&format!(
        "  CPU      {:>6}  (stt {}, ta {}, qa {}, common {})\n",
        r.cpu.total, r.cpu.stt, r.cpu.ta, r.cpu.qa, r.cpu.common
    ));
    output.push_str(&format!("  Memory   {:>6} GB\n", r.memory.total));
    output.push_str(&format!("  Storage  {:>6} GB\n\n", r.storage.total));

    output.push_str("Servers:\n");
    let rows = spec
        .servers
        .iter()
        .map(|s| {
            vec![
                s.role.to_string(),
                s.quantity.to_string(),
                s.cores.to_string(),
                s.ram_gb.to_string(),
                s.gpu_type
                    .map(|t| format!("{} x{}", t, s.gpu_count))
                    .unwrap_or_else(|| "-".to_string()),
                s.purpose.clone(),
            ]
        })
        .collect();
    output.push_str(&format_table(
        &["ROLE", "QTY", "CORES", "RAM_GB", "GPU", "PURPOSE"],
        rows,
    ));

    output.push_str("\nComponents:\n");
    let rows = spec
        .components
        .iter()
        .map(|c| {
            vec![
                c.component.to_string(),
                c.replicas.to_string(),
                format!("{}m", c.cpu_millis),
                format!("{}Mi", c.memory_mib),
                c.gpus_per_pod.to_string(),
            ]
        })
        .collect();
    output.push_str(&format_table(
        &["COMPONENT", "REPLICAS", "CPU", "MEMORY", "GPUS"],
        rows,
    ));

    output
}

/// Format the file list of a rendered package
pub fn format_package(package: &ManifestPackage) -> String {
    let mut output = String::new();
    if package.degraded {
        output.push_str("WARNING: rendering failed, minimal template used (degraded)\n");
    }
    for name in package.file_names() {
        output.push_str(&format!("  {}\n", name));
    }
    output
}

/// Format per-provider cost estimates
pub fn format_costs(report: &CloudCostReport) -> String {
    let rows = report
        .providers
        .iter()
        .map(|p| {
            vec![
                p.provider.clone(),
                format!("{:.2}", p.monthly_total_usd),
                if p.unmatched.is_empty() {
                    "-".to_string()
                } else {
                    p.unmatched.join(", ")
                },
            ]
        })
        .collect();
    let mut output = format_table(&["PROVIDER", "MONTHLY_USD", "UNMATCHED"], rows);
    if let Some(best) = report.cheapest_complete() {
        output.push_str(&format!(
            "\nCheapest complete: {} (${:.2}/month)\n",
            best.provider, best.monthly_total_usd
        ));
    }
    output
}

/// Format ranked node groups per component
pub fn format_placement(report: &PlacementReport) -> String {
    let mut output = String::new();
    for rec in &report.recommendations {
        output.push_str(&format!(
            "{} (replicas {}) best: {}\n",
            rec.component,
            rec.replicas,
            rec.best().map(|b| b.node_group.as_str()).unwrap_or("none")
        ));
        let rows = rec
            .ranked
            .iter()
            .map(|r| {
                vec![
                    r.node_group.clone(),
                    r.zone.clone(),
                    format!("{:.1}", r.score.total),
                    format!("{:.1}", r.score.resource),
                    format!("{:.1}", r.score.network),
                    format!("{:.1}", r.score.availability),
                    if r.eligible { "yes" } else { "no" }.to_string(),
                ]
            })
            .collect();
        output.push_str(&format_table(
            &["GROUP", "ZONE", "SCORE", "RESOURCE", "NETWORK", "AVAIL", "ELIGIBLE"],
            rows,
        ));
        output.push('\n');
    }
    for warning in &report.warnings {
        output.push_str(&format!("WARNING: {}\n", warning));
    }
    output
}

// ============================================================================
// Cluster display
// ============================================================================

pub fn format_tenant_status(report: &TenantStatusReport) -> String {
    let mut output = format!(
        "Tenant {} ({}): {:?}\n\n",
        report.tenant_id, report.namespace, report.status
    );
    let rows = report
        .services
        .iter()
        .map(|s| {
            vec![
                s.name.clone(),
                format!("{}/{}", s.ready_replicas, s.desired_replicas),
                s.image.clone(),
                s.current_deployment
                    .as_ref()
                    .map(|d| d.status.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect();
    output.push_str(&format_table(&["SERVICE", "READY", "IMAGE", "LAST_DEPLOY"], rows));
    output
}

pub fn format_health(summary: &HealthSummary) -> String {
    let mut output = format!(
        "Health: {}  (healthy {}, warning {}, critical {}, unknown {})\n\n",
        summary.status(),
        summary.counts.healthy,
        summary.counts.warning,
        summary.counts.critical,
        summary.counts.unknown
    );
    let rows = summary
        .deployments
        .iter()
        .map(|d| {
            vec![
                d.namespace.clone(),
                d.service.clone(),
                format!("{}/{}", d.ready, d.desired),
                d.health.to_string(),
                if d.version_mismatch { "DRIFT" } else { "" }.to_string(),
            ]
        })
        .collect();
    output.push_str(&format_table(&["NAMESPACE", "SERVICE", "READY", "HEALTH", ""], rows));
    for (namespace, error) in &summary.namespace_errors {
        output.push_str(&format!("ERROR {}: {}\n", namespace, error));
    }
    output
}

// ============================================================================
// Ledger display
// ============================================================================

pub fn format_images(images: &[ImageVersion]) -> String {
    let rows = images
        .iter()
        .map(|i| {
            vec![
                i.version.clone(),
                i.status.to_string(),
                i.image.clone(),
                i.git_commit.clone().unwrap_or_else(|| "-".to_string()),
                i.recorded_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            ]
        })
        .collect();
    format_table(&["VERSION", "STATUS", "IMAGE", "COMMIT", "RECORDED"], rows)
}

pub fn format_history(records: &[DeploymentRecord]) -> String {
    let rows = records
        .iter()
        .map(|r| {
            vec![
                r.recorded_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                r.service.clone(),
                r.version.clone(),
                r.status.to_string(),
                r.reason.clone().unwrap_or_default(),
            ]
        })
        .collect();
    format_table(&["RECORDED", "SERVICE", "VERSION", "STATUS", "REASON"], rows)
}
