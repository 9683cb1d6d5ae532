//! Plain-text rendering of a ladder.

use std::fmt::Write as _;

use super::Ladder;

/// Decimal places shown for every figure in the table.
pub const DISPLAY_DECIMALS: usize = 8;

const HEADERS: [&str; 12] = [
    "#",
    "deviation %",
    "price",
    "quantity",
    "quantity quote",
    "total quantity",
    "total quote",
    "avg price",
    "required price",
    "required %",
    "profit quote",
    "roi %",
];

impl Ladder {
    /// Render the ladder as an aligned text table, base order first.
    pub fn table(&self) -> String {
        let mut rows: Vec<Vec<String>> = Vec::with_capacity(self.len() + 2);
        rows.push(HEADERS.iter().map(|h| h.to_string()).collect());

        rows.push(vec![
            "base".to_string(),
            fmt(0.0),
            fmt(self.entry_price),
            fmt(self.base_order_quantity),
            fmt(self.base_order_quantity_quote),
            fmt(self.base_order_quantity),
            fmt(self.base_order_quantity_quote),
            fmt(self.entry_price),
            fmt(self.base_order_required_price),
            fmt(self.target_profit_percent),
            fmt(self.base_order_profit_quote),
            fmt(0.0),
        ]);

        for level in self.levels() {
            rows.push(vec![
                level.index.to_string(),
                fmt(level.deviation_percent),
                fmt(level.price),
                fmt(level.quantity),
                fmt(level.quantity_quote),
                fmt(level.total_quantity),
                fmt(level.total_quantity_quote),
                fmt(level.weighted_average_price),
                fmt(level.required_price),
                fmt(level.required_change_percent),
                fmt(level.profit_quote),
                fmt(level.roi_percent),
            ]);
        }

        let widths: Vec<usize> = (0..HEADERS.len())
            .map(|col| rows.iter().map(|r| r[col].len()).max().unwrap_or(0))
            .collect();

        let mut out = String::new();
        for row in &rows {
            let line: Vec<String> = row
                .iter()
                .zip(&widths)
                .map(|(cell, w)| format!("{cell:>w$}", w = *w))
                .collect();
            let _ = writeln!(out, "{}", line.join("  ").trim_end());
        }
        out
    }
}

fn fmt(value: f64) -> String {
    format!("{value:.prec$}", prec = DISPLAY_DECIMALS)
}
