//! Table of planned experiments, shown before a batch and for dry runs.

use exv_core::ExperimentDefinition;

/// Render `experiments` as an aligned text table.
pub fn render_plan(experiments: &[ExperimentDefinition]) -> String {
    let headers = ExperimentDefinition::headers();
    let rows: Vec<[String; 7]> = experiments.iter().map(|e| e.to_row()).collect();

    let mut widths = headers.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let rule = {
        let parts: Vec<String> = widths.iter().map(|w| "─".repeat(w + 2)).collect();
        parts.join("┼")
    };

    let mut out = String::new();
    push_row(&mut out, headers.iter().map(|h| h.to_string()), &widths);
    out.push_str(&rule);
    out.push('\n');
    for row in rows {
        push_row(&mut out, row.into_iter(), &widths);
    }
    out
}

fn push_row(out: &mut String, cells: impl Iterator<Item = String>, widths: &[usize; 7]) {
    let padded: Vec<String> = cells
        .zip(widths)
        .map(|(cell, &width)| format!(" {cell:<width$} "))
        .collect();
    out.push_str(padded.join("│").trim_end());
    out.push('\n');
}
