use chrono::NaiveDateTime;

/// A single typed cell of a [`Table`] column
#[derive(Clone, Debug, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Timestamp(NaiveDateTime),
    Missing,
}

impl CellValue {
    pub fn text(value: impl Into<String>) -> Self {
        CellValue::Text(value.into())
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, CellValue::Missing)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            CellValue::Timestamp(t) => Some(*t),
            _ => None,
        }
    }
}

/// The kind of a column, derived from the cells it holds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Numeric,
    Timestamp,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<CellValue>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<CellValue>) -> Self {
        Column {
            name: name.into(),
            values,
        }
    }

    /// Numeric if every non-missing cell is a number, timestamp if every
    /// non-missing cell is a timestamp, text otherwise. An all-missing column
    /// counts as text.
    pub fn kind(&self) -> ColumnKind {
        let mut present = self.values.iter().filter(|v| !v.is_missing());
        let Some(first) = present.next() else {
            return ColumnKind::Text;
        };
        let uniform = present.all(|v| std::mem::discriminant(v) == std::mem::discriminant(first));

        match first {
            CellValue::Number(_) if uniform => ColumnKind::Numeric,
            CellValue::Timestamp(_) if uniform => ColumnKind::Timestamp,
            _ => ColumnKind::Text,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.iter().all(CellValue::is_missing)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn missing_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_missing()).count()
    }
}

/// Ordered, column-major table built from one worksheet
///
/// All columns hold the same number of cells once built through
/// [`Table::from_rows`] or [`Table::new`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<Column>,
}

impl Table {
    /// Builds a table from columns, padding short columns with missing cells
    pub fn new(mut columns: Vec<Column>) -> Self {
        let height = columns.iter().map(Column::len).max().unwrap_or(0);
        for column in &mut columns {
            column.values.resize(height, CellValue::Missing);
        }
        Table { columns }
    }

    /// Builds a table from a header and row-major data
    ///
    /// # Arguments
    /// * `names` - Column names, one per column
    /// * `rows` - Data rows; missing trailing cells are treated as missing values,
    ///   cells beyond the header width are dropped
    pub fn from_rows(names: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        let mut columns: Vec<Column> = names
            .into_iter()
            .map(|name| Column::new(name, Vec::with_capacity(rows.len())))
            .collect();

        for row in rows {
            let mut cells = row.into_iter();
            for column in &mut columns {
                column.values.push(cells.next().unwrap_or(CellValue::Missing));
            }
        }

        Table { columns }
    }

    pub fn height(&self) -> usize {
        self.columns.first().map(Column::len).unwrap_or(0)
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Cells of row `index`, in column order
    pub fn row(&self, index: usize) -> Vec<&CellValue> {
        self.columns.iter().map(|c| &c.values[index]).collect()
    }

    pub fn is_row_empty(&self, index: usize) -> bool {
        self.columns.iter().all(|c| c.values[index].is_missing())
    }
}
