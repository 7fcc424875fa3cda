//! Output formatting for CLI

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// Tab-separated rows, one per line, headers first
    Plain,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

/// Render `items`; `empty` is shown instead of an empty table.
/// JSON output is always an array so scripts can parse it.
pub fn render_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat, empty: &str) -> String {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(items).unwrap_or_else(|_| "[]".to_string()),
        _ if items.is_empty() => empty.to_string(),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }
            table.to_string()
        }
        OutputFormat::Plain => std::iter::once(T::headers().join("\t"))
            .chain(items.iter().map(|item| item.row().join("\t")))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat, empty: &str) {
    println!("{}", render_list(items, format, empty));
}

/// Print success message
pub fn print_success(message: &str) {
    println!("✅ {}", message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("❌ {}", message);
}

/// Print info message
pub fn print_info(message: &str) {
    println!("ℹ️  {}", message);
}
