use chrono::Local;
use scanflow_core::{ScanRecord, ScanStatus};
use std::fmt::Write;

const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

/// Base-1024 size with at most two decimals, e.g. `1.5 KB`.
pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut unit = 0;
    while unit + 1 < UNITS.len() && bytes >= 1024u64.pow(unit as u32 + 1) {
        unit += 1;
    }
    let value = bytes as f64 / 1024u64.pow(unit as u32) as f64;
    let fixed = format!("{value:.2}");
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed} {}", UNITS[unit])
}

fn status_cell(record: &ScanRecord) -> String {
    match (record.status(), record.failure()) {
        (ScanStatus::Failed, Some(kind)) => format!("failed ({kind})"),
        (status, _) => status.label().to_string(),
    }
}

/// One line per settled record, for progress output.
pub fn progress_line(record: &ScanRecord) -> String {
    let mut line = format!(
        "[{}] {} ({})",
        status_cell(record),
        record.file_name(),
        format_file_size(record.file_size_bytes())
    );
    if !record.threats().is_empty() {
        let _ = write!(line, ": {}", record.threats().join("; "));
    }
    line
}

pub fn render_table(records: &[ScanRecord]) -> String {
    let rows: Vec<[String; 5]> = records
        .iter()
        .map(|r| {
            [
                status_cell(r),
                r.file_name().to_string(),
                format_file_size(r.file_size_bytes()),
                r.submitted_at()
                    .with_timezone(&Local)
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string(),
                r.scan_id().unwrap_or("-").to_string(),
            ]
        })
        .collect();

    let header = ["STATUS", "FILE", "SIZE", "SUBMITTED", "SCAN ID"];
    let mut widths = header.map(str::len);
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    push_row(&mut out, &header.map(String::from), &widths);
    for (row, record) in rows.iter().zip(records) {
        push_row(&mut out, row, &widths);
        for threat in record.threats() {
            let _ = writeln!(out, "    ! {threat}");
        }
    }
    out
}

fn push_row(out: &mut String, cells: &[String; 5], widths: &[usize; 5]) {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, &w)| format!("{cell:<w$}"))
        .collect::<Vec<_>>()
        .join("  ");
    let _ = writeln!(out, "{}", line.trim_end());
}
