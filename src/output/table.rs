#![forbid(unsafe_code)]

use std::io::{self, Write as _};

/// Column-aligned plain-text table for stdout, with a CSV escape hatch.
#[derive(Debug, Default)]
pub struct Table {
    headers: Vec<String>,
    widths: Vec<usize>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let headers: Vec<String> = headers.into_iter().map(Into::into).collect();
        let widths = headers.iter().map(|h| h.chars().count()).collect();
        Self {
            headers,
            widths,
            rows: Vec::new(),
        }
    }

    pub fn row(&mut self, cols: impl IntoIterator<Item = impl Into<String>>) {
        let cols: Vec<String> = cols.into_iter().map(Into::into).collect();
        for (i, cell) in cols.iter().enumerate() {
            let w = cell.chars().count();
            if i >= self.widths.len() {
                self.widths.push(w);
            } else if w > self.widths[i] {
                self.widths[i] = w;
            }
        }
        self.rows.push(cols);
    }

    pub fn print(&self) -> io::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "{}", self.format_line(&self.headers))?;
        for row in &self.rows {
            writeln!(out, "{}", self.format_line(row))?;
        }
        Ok(())
    }

    pub fn write_csv(&self) -> io::Result<()> {
        let mut wtr = csv::Writer::from_writer(io::stdout().lock());
        wtr.write_record(&self.headers)?;
        for row in &self.rows {
            wtr.write_record(row)?;
        }
        wtr.flush()
    }

    fn format_line(&self, cells: &[String]) -> String {
        let mut line = String::new();
        for (i, cell) in cells.iter().enumerate() {
            if i > 0 {
                line.push_str("  ");
            }
            line.push_str(cell);
            if i + 1 < cells.len() {
                let width = self.widths.get(i).copied().unwrap_or(0);
                for _ in cell.chars().count()..width {
                    line.push(' ');
                }
            }
        }
        line
    }
}
