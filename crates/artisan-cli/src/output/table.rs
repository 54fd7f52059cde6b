//! Listing tables.

use comfy_table::presets::NOTHING;
use comfy_table::{Attribute, Cell, Color, ContentArrangement};

/// A borderless listing in the style of `ls` output.
#[derive(Debug)]
pub struct Table {
    inner: comfy_table::Table,
    colors: bool,
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

impl Table {
    /// Empty table.
    pub fn new() -> Self {
        let mut inner = comfy_table::Table::new();
        inner
            .load_preset(NOTHING)
            .set_content_arrangement(ContentArrangement::Dynamic);
        let colors = super::colors_enabled();
        if !colors {
            inner.force_no_tty();
        }
        Self { inner, colors }
    }

    /// Set the header row.
    pub fn headers<I, T>(&mut self, headers: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let colors = self.colors;
        self.inner.set_header(headers.into_iter().map(|h| {
            let cell = Cell::new(Into::<String>::into(h));
            if colors {
                cell.add_attribute(Attribute::Bold)
            } else {
                cell
            }
        }));
    }

    /// Append a plain row.
    pub fn row<I, T>(&mut self, cells: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.inner
            .add_row(cells.into_iter().map(|c| Cell::new(Into::<String>::into(c))));
    }

    /// Append prepared cells.
    pub fn styled_row(&mut self, cells: Vec<Cell>) {
        self.inner.add_row(cells);
    }

    /// Dimmed cell for secondary values.
    pub fn dim_cell(&self, text: &str) -> Cell {
        let cell = Cell::new(text);
        if self.colors {
            cell.fg(Color::DarkGrey)
        } else {
            cell
        }
    }

    /// Highlighted cell for names.
    pub fn name_cell(&self, text: &str) -> Cell {
        let cell = Cell::new(text);
        if self.colors {
            cell.fg(Color::Green)
        } else {
            cell
        }
    }

    /// Rows added so far.
    pub fn len(&self) -> usize {
        self.inner.row_iter().count()
    }

    /// Render to a string.
    pub fn render(&self) -> String {
        self.inner.to_string()
    }

    /// Print to stdout.
    pub fn print(&self) {
        println!("{}", self.render());
    }
}
