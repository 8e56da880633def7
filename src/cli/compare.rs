use super::ui;
use crate::core::compare::{self, FolderComparison, PairReport};
use anyhow::Result;
use comfy_table::Cell;
use std::path::Path;
use tracing::warn;

/// Differences listed per pair before the rest are summarized.
const SHOWN_DIFFERENCES: usize = 20;

impl PairReport {
    pub fn display_as_table(&self) -> String {
        let mut output = format!(
            "{} / {}\n",
            ui::style_text(&self.bank, ui::StyleType::Title),
            ui::style_text(&self.fund, ui::StyleType::Title)
        );
        output.push_str(&ui::style_text(
            &format!("{} vs {}\n\n", self.etl_file, self.reference_file),
            ui::StyleType::Subtle,
        ));

        if self.differences.is_empty() {
            output.push_str("No differences\n");
        } else {
            let mut table = ui::new_styled_table();
            table.set_header(vec![
                ui::header_cell("Field"),
                ui::header_cell("Pipeline"),
                ui::header_cell("Reference"),
            ]);
            for diff in self.differences.iter().take(SHOWN_DIFFERENCES) {
                table.add_row(vec![
                    Cell::new(&diff.path),
                    Cell::new(&diff.etl),
                    Cell::new(&diff.reference),
                ]);
            }
            output.push_str(&table.to_string());
            if self.differences.len() > SHOWN_DIFFERENCES {
                output.push_str(&ui::style_text(
                    &format!(
                        "\n... and {} more",
                        self.differences.len() - SHOWN_DIFFERENCES
                    ),
                    ui::StyleType::Subtle,
                ));
            }
            output.push('\n');
        }

        output.push_str(&format!(
            "\n{}: {:.2}% ({} differences over {} fields)",
            ui::style_text("Reliability", ui::StyleType::TotalLabel),
            self.reliability,
            self.differences.len(),
            self.total_fields
        ));
        output
    }
}

fn display_summary(comparison: &FolderComparison) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Bank"),
        ui::header_cell("Fund"),
        ui::header_cell("Fields"),
        ui::header_cell("Differences"),
        ui::header_cell("Reliability"),
    ]);
    for pair in &comparison.pairs {
        table.add_row(vec![
            Cell::new(&pair.bank),
            Cell::new(&pair.fund),
            ui::count_cell(pair.total_fields),
            ui::count_cell(pair.differences.len()),
            ui::reliability_cell(pair.reliability),
        ]);
    }
    for name in &comparison.incomplete {
        table.add_row(vec![
            Cell::new(name),
            Cell::new(""),
            ui::na_cell(true),
            ui::na_cell(true),
            ui::na_cell(true),
        ]);
    }

    let mut output = table.to_string();
    if let Some(average) = comparison.average_reliability() {
        output.push_str(&format!(
            "\n\n{}: {}",
            ui::style_text("Average reliability", ui::StyleType::TotalLabel),
            ui::style_text(&format!("{average:.2}%"), ui::StyleType::TotalValue)
        ));
    }
    output
}

pub fn run(folder: &Path) -> Result<()> {
    let comparison = compare::compare_folder(folder)?;
    if comparison.pairs.is_empty() {
        warn!(folder = %folder.display(), "No file pairs to compare");
    }

    for pair in &comparison.pairs {
        println!("{}", pair.display_as_table());
        ui::print_separator();
    }
    println!("{}", display_summary(&comparison));
    Ok(())
}
