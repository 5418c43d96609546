use comfy_table::{presets, CellAlignment, ContentArrangement, Table};
use serde::Serialize;

use crate::app::GlobalOptions;

/// Print `data` as JSON (if `--json`) or call `display_fn` for the human-readable form.
pub fn print_output<T: Serialize>(
    data: &T,
    opts: &GlobalOptions,
    display_fn: impl FnOnce(&T),
) -> anyhow::Result<()> {
    if opts.json {
        println!("{}", serde_json::to_string_pretty(data)?);
    } else {
        display_fn(data);
    }
    Ok(())
}

/// Column alignment for tabular output.
#[derive(Clone, Copy)]
pub enum Align {
    Left,
    Right,
}

/// Whitespace-aligned columns on top of `comfy-table`, no borders.
pub struct TabWriter {
    table: Table,
    indent: &'static str,
}

impl TabWriter {
    /// A table with `(header, alignment)` columns.
    pub fn new(columns: &[(&str, Align)]) -> Self {
        let mut table = Table::new();
        table
            .load_preset(presets::NOTHING)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(columns.iter().map(|(name, _)| *name));

        // two spaces between columns, none at the outer edges
        let last = columns.len().saturating_sub(1);
        for (i, (_, align)) in columns.iter().enumerate() {
            if let Some(column) = table.column_mut(i) {
                column.set_cell_alignment(match align {
                    Align::Left => CellAlignment::Left,
                    Align::Right => CellAlignment::Right,
                });
                column.set_padding((u16::from(i != 0), u16::from(i != last)));
            }
        }

        Self { table, indent: "" }
    }

    /// Prefix every printed line with `prefix`.
    pub fn indent(mut self, prefix: &'static str) -> Self {
        self.indent = prefix;
        self
    }

    /// Add a row, values in column order.
    pub fn row(&mut self, values: Vec<String>) {
        self.table.add_row(values);
    }

    /// Print the table to stdout.
    pub fn print(&self) {
        for line in self.table.to_string().lines() {
            println!("{}{}", self.indent, line.trim_end());
        }
    }
}
