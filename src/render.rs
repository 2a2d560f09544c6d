//! Chart-type selection for bot answers.
//!
//! The server proposes a visualization in `chart_spec`; the user may override
//! it per message. Whatever is requested, a result whose declared axis columns
//! are missing from the data is shown as a table.

use crate::models::{ChartKind, ChartOverrides, QueryResult, Row};

/// Charts draw at most this many rows.
pub const CHART_ROW_LIMIT: usize = 50;
/// Tables show at most this many rows.
pub const TABLE_ROW_LIMIT: usize = 10;

/// Override first, then the server hint, then `bar`.
pub fn resolve_chart_type(
    message_index: usize,
    server_default: Option<ChartKind>,
    overrides: &ChartOverrides,
) -> ChartKind {
    overrides
        .get(&message_index)
        .copied()
        .or(server_default)
        .unwrap_or(ChartKind::Bar)
}

/// Finds `name` in the row, exactly or upper-cased. Returns the key that matched.
fn match_column(row: &Row, name: &str) -> Option<String> {
    if row.contains_key(name) {
        return Some(name.to_string());
    }
    let upper = name.to_uppercase();
    row.contains_key(&upper).then_some(upper)
}

/// Resolved axis columns, or `None` when the table fallback applies.
fn resolve_axes(result: &QueryResult) -> Option<(String, String)> {
    let spec = result.chart_spec.as_ref()?;
    let first = result.data.first()?;
    let x = match_column(first, spec.x.as_deref()?)?;
    let y = match_column(first, spec.y.as_deref()?)?;
    Some((x, y))
}

/// The kind actually drawn for a message, after the table fallback.
pub fn effective_chart_type(
    message_index: usize,
    result: &QueryResult,
    overrides: &ChartOverrides,
) -> ChartKind {
    let requested = resolve_chart_type(
        message_index,
        result.chart_spec.as_ref().and_then(|spec| spec.chart),
        overrides,
    );
    if requested != ChartKind::Table && resolve_axes(result).is_none() {
        log::debug!(
            "Message {} declares axes missing from its data, rendering as table",
            message_index
        );
        return ChartKind::Table;
    }
    requested
}

/// Everything a view needs to draw one bot answer.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPlan<'a> {
    pub kind: ChartKind,
    pub x: Option<String>,
    pub y: Option<String>,
    pub title: Option<&'a str>,
    /// Capped for display only; the result keeps every row for downloads.
    pub rows: &'a [Row],
}

pub fn render_plan<'a>(
    message_index: usize,
    result: &'a QueryResult,
    overrides: &ChartOverrides,
) -> RenderPlan<'a> {
    let kind = effective_chart_type(message_index, result, overrides);
    let limit = match kind {
        ChartKind::Table => TABLE_ROW_LIMIT,
        _ => CHART_ROW_LIMIT,
    };
    let (x, y) = match resolve_axes(result) {
        Some((x, y)) => (Some(x), Some(y)),
        None => (None, None),
    };
    RenderPlan {
        kind,
        x,
        y,
        title: result
            .chart_spec
            .as_ref()
            .and_then(|spec| spec.title.as_deref()),
        rows: &result.data[..result.data.len().min(limit)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChartSpec;
    use serde_json::json;

    fn rows(count: usize) -> Vec<Row> {
        (0..count)
            .map(|i| {
                json!({ "month": format!("M{i}"), "sales": i * 100 })
                    .as_object()
                    .unwrap()
                    .clone()
            })
            .collect()
    }

    fn result(chart: Option<ChartKind>, x: &str, y: &str, count: usize) -> QueryResult {
        QueryResult {
            insights: "ok".into(),
            sql: "SELECT month, sales FROM sales".into(),
            data: rows(count),
            chart_spec: Some(ChartSpec {
                chart,
                x: Some(x.into()),
                y: Some(y.into()),
                title: Some("Sales by month".into()),
            }),
            row_count: count,
        }
    }

    #[test]
    fn override_wins_over_server_default() {
        let mut overrides = ChartOverrides::new();
        overrides.insert(3, ChartKind::Pie);
        assert_eq!(resolve_chart_type(3, Some(ChartKind::Line), &overrides), ChartKind::Pie);
        assert_eq!(resolve_chart_type(4, Some(ChartKind::Line), &overrides), ChartKind::Line);
        assert_eq!(resolve_chart_type(4, None, &overrides), ChartKind::Bar);
    }

    #[test]
    fn server_default_kept_when_columns_present() {
        let result = result(Some(ChartKind::Line), "month", "sales", 12);
        assert_eq!(effective_chart_type(1, &result, &ChartOverrides::new()), ChartKind::Line);
    }

    #[test]
    fn missing_columns_force_table_even_with_override() {
        let result = result(Some(ChartKind::Bar), "quarter", "sales", 12);
        let mut overrides = ChartOverrides::new();
        overrides.insert(1, ChartKind::Pie);
        assert_eq!(effective_chart_type(1, &result, &overrides), ChartKind::Table);
    }

    #[test]
    fn upper_cased_column_names_match() {
        let mut result = result(Some(ChartKind::Bar), "month", "sales", 3);
        result.data = vec![json!({ "MONTH": "Jan", "SALES": 10 }).as_object().unwrap().clone()];
        let plan = render_plan(1, &result, &ChartOverrides::new());
        assert_eq!(plan.kind, ChartKind::Bar);
        assert_eq!(plan.x.as_deref(), Some("MONTH"));
        assert_eq!(plan.y.as_deref(), Some("SALES"));
    }

    #[test]
    fn no_spec_or_no_rows_renders_table() {
        let mut result = result(None, "month", "sales", 0);
        assert_eq!(effective_chart_type(1, &result, &ChartOverrides::new()), ChartKind::Table);
        result.chart_spec = None;
        result.data = rows(5);
        assert_eq!(effective_chart_type(1, &result, &ChartOverrides::new()), ChartKind::Table);
    }

    #[test]
    fn row_caps_depend_on_kind() {
        let result = result(Some(ChartKind::Bar), "month", "sales", 120);
        let plan = render_plan(1, &result, &ChartOverrides::new());
        assert_eq!(plan.rows.len(), CHART_ROW_LIMIT);
        assert_eq!(plan.title, Some("Sales by month"));

        let mut overrides = ChartOverrides::new();
        overrides.insert(1, ChartKind::Table);
        let plan = render_plan(1, &result, &overrides);
        assert_eq!(plan.rows.len(), TABLE_ROW_LIMIT);
        assert_eq!(result.data.len(), 120);
    }
}
