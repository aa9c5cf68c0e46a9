//! Grid row extraction

use std::sync::Arc;
use std::time::Duration;

use action_primitives::{
    column_cell_selector, DefaultWaitStrategy, ExecCtx, Readiness, ReplaySettings, WaitStrategy,
};
use cdp_adapter::{FrameTarget, Locator, PageDriver};
use serde::Serialize;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::errors::GridError;
use crate::filters::row_matches;
use crate::infer::infer_column;
use crate::types::{CellValue, ColumnMapping, ColumnType, ExtractDefinition, RowData};

/// One row that survived blank-row skipping and filtering
#[derive(Clone, Debug, Serialize)]
pub struct ExtractedRow {
    /// Position among all rows of the grid, in DOM order
    pub dom_index: usize,
    #[serde(skip)]
    pub locator: Locator,
    pub data: RowData,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ExtractedGrid {
    pub rows: Vec<ExtractedRow>,
    /// Mappings with inferred types filled in
    pub columns: Vec<ColumnMapping>,
    /// Rows seen before filtering
    pub total_rows: usize,
}

pub struct GridExtractor {
    driver: Arc<dyn PageDriver>,
    grid_wait: Duration,
    row_wait: Duration,
    poll_interval: Duration,
}

impl GridExtractor {
    pub fn new(driver: Arc<dyn PageDriver>, settings: &ReplaySettings) -> Self {
        Self {
            driver,
            grid_wait: settings.readiness_timeout,
            row_wait: settings.row_wait,
            poll_interval: settings.poll_interval,
        }
    }

    pub async fn extract(
        &self,
        ctx: &ExecCtx,
        definition: &ExtractDefinition,
        frame: &FrameTarget,
    ) -> Result<ExtractedGrid, GridError> {
        let grid_selector = definition.grid_selector.trim();
        if !grid_selector.is_empty() {
            let grid = Locator::new(grid_selector).in_frame(frame.clone());
            let wait = DefaultWaitStrategy {
                timeout: self.grid_wait,
                poll_interval: self.poll_interval,
            };
            wait.wait_ready(self.driver.as_ref(), ctx, &grid, Readiness::Attached)
                .await
                .map_err(|err| match GridError::from(err) {
                    GridError::Interrupted(msg) => GridError::Interrupted(msg),
                    _ => GridError::ExtractionFailure(format!(
                        "grid '{}' did not appear",
                        grid_selector
                    )),
                })?;
        }

        let (rows, count) = self.locate_rows(ctx, definition, frame).await?;
        info!(rows = %rows, count, "extracting grid rows");

        let mut columns = definition.column_mappings.clone();
        let mut extracted = Vec::new();
        for index in 0..count {
            if ctx.is_cancelled() {
                return Err(GridError::Interrupted("stopped during extraction".to_string()));
            }
            let row = rows.clone().nth(index);
            let data = self.read_row(&row, &columns).await?;
            if data.is_blank() {
                debug!(index, "skipping blank row");
                continue;
            }
            extracted.push(ExtractedRow {
                dom_index: index,
                locator: row,
                data,
            });
        }

        for mapping in columns.iter_mut() {
            if mapping.column_type() != ColumnType::Auto {
                continue;
            }
            let samples: Vec<String> = extracted
                .iter()
                .filter_map(|row| row.data.get(mapping.name()))
                .map(CellValue::as_text)
                .collect();
            let inference = infer_column(&samples);
            debug!(column = mapping.name(), inferred = %inference.column_type, "inferred column type");
            mapping.header.column_type = inference.column_type;
            mapping.header.variables = inference.variables;
        }

        let total_rows = extracted.len();
        let rows: Vec<ExtractedRow> = extracted
            .into_iter()
            .filter(|row| row_matches(&row.data, &definition.filters, &columns))
            .collect();
        info!(kept = rows.len(), total = total_rows, "grid rows filtered");

        Ok(ExtractedGrid {
            rows,
            columns,
            total_rows,
        })
    }

    /// Recorded row selector, else `{grid} tr`
    async fn locate_rows(
        &self,
        ctx: &ExecCtx,
        definition: &ExtractDefinition,
        frame: &FrameTarget,
    ) -> Result<(Locator, usize), GridError> {
        let mut selectors = Vec::new();
        if !definition.row_selector.trim().is_empty() {
            selectors.push(definition.row_selector.trim().to_string());
        }
        if !definition.grid_selector.trim().is_empty() {
            let fallback = format!("{} tr", definition.grid_selector.trim());
            if !selectors.contains(&fallback) {
                selectors.push(fallback);
            }
        }

        for selector in selectors {
            let rows = Locator::new(selector).in_frame(frame.clone());
            let count = self.wait_for_rows(ctx, &rows).await?;
            if count > 0 {
                return Ok((rows, count));
            }
            warn!(rows = %rows, "row selector matched nothing");
        }
        Err(GridError::ExtractionFailure(format!(
            "no rows found for '{}'",
            definition.row_selector
        )))
    }

    async fn wait_for_rows(&self, ctx: &ExecCtx, rows: &Locator) -> Result<usize, GridError> {
        let deadline = Instant::now() + self.row_wait;
        loop {
            if ctx.is_cancelled() {
                return Err(GridError::Interrupted(format!("stopped while waiting for {}", rows)));
            }
            let count = self.driver.count(rows).await?;
            if count > 0 || Instant::now() >= deadline {
                return Ok(count);
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn read_row(&self, row: &Locator, columns: &[ColumnMapping]) -> Result<RowData, GridError> {
        let mut data = RowData::new();
        for mapping in columns {
            let value = match self.cell(row, mapping).await? {
                None => CellValue::Null,
                Some(cell) if mapping.column_type() == ColumnType::Img => {
                    CellValue::Flag(self.driver.count(&cell.child("img")).await? > 0)
                }
                Some(cell) => match self.driver.inner_text(&cell).await? {
                    Some(text) => CellValue::Text(text.trim().to_string()),
                    None => CellValue::Null,
                },
            };
            data.insert(mapping.name(), value);
        }
        Ok(data)
    }

    /// Mapping selector inside the row when it matches, else the column fallback group
    async fn cell(&self, row: &Locator, mapping: &ColumnMapping) -> Result<Option<Locator>, GridError> {
        if let Some(selector) = mapping.selector.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let scoped = row.child(selector);
            if self.driver.count(&scoped).await? > 0 {
                return Ok(Some(scoped.first()));
            }
        }
        let fallback = row.child(column_cell_selector(mapping.column_index));
        if self.driver.count(&fallback).await? > 0 {
            return Ok(Some(fallback.first()));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FilterCriterion;
    use cdp_adapter::fake::{FakeElement, FakePage};
    use tokio_util::sync::CancellationToken;

    fn status_row(name: &str, status: &str) -> FakeElement {
        FakeElement::new(&["#grid tr"])
            .with_child(FakeElement::new(&[column_cell_selector(0).as_str()]).with_text(name))
            .with_child(FakeElement::new(&["td.status"]).with_text(status))
    }

    fn status_grid() -> FakePage {
        FakePage::new().with_element(
            FakeElement::new(&["#grid"])
                .with_child(status_row("alpha", "Yes"))
                .with_child(status_row("beta", "no"))
                .with_child(FakeElement::new(&["#grid tr"]))
                .with_child(status_row("gamma", "true"))
                .with_child(status_row("delta", "off"))
                .with_child(status_row("epsilon", "1")),
        )
    }

    fn definition(filters: Vec<FilterCriterion>) -> ExtractDefinition {
        let mut status = ColumnMapping::new("Status", ColumnType::Auto, 1);
        status.selector = Some("td.status".into());
        ExtractDefinition {
            grid_selector: "#grid".into(),
            row_selector: "#grid tr".into(),
            column_mappings: vec![ColumnMapping::new("Name", ColumnType::Text, 0), status],
            filters,
        }
    }

    fn extractor(page: FakePage) -> GridExtractor {
        GridExtractor::new(Arc::new(page), &ReplaySettings::quick())
    }

    #[tokio::test]
    async fn status_filter_keeps_truthy_rows_in_dom_order() {
        let ctx = ExecCtx::new("grid", CancellationToken::new());
        let grid = extractor(status_grid())
            .extract(
                &ctx,
                &definition(vec![FilterCriterion::new("Status", "is true", "")]),
                &FrameTarget::Main,
            )
            .await
            .unwrap();

        let names: Vec<String> = grid
            .rows
            .iter()
            .map(|row| row.data.get("Name").unwrap().as_text())
            .collect();
        assert_eq!(names, vec!["alpha", "gamma", "epsilon"]);
        let positions: Vec<usize> = grid.rows.iter().map(|row| row.dom_index).collect();
        assert_eq!(positions, vec![0, 3, 5]);
        assert_eq!(grid.rows[1].locator, Locator::new("#grid tr").nth(3));
        assert_eq!(grid.total_rows, 5);
    }

    #[tokio::test]
    async fn auto_columns_are_inferred() {
        let page = FakePage::new()
            .with_element(status_row("a", "yes"))
            .with_element(status_row("b", "no"));
        let mut def = definition(Vec::new());
        def.grid_selector.clear();
        let grid = extractor(page)
            .extract(&ExecCtx::new("g", CancellationToken::new()), &def, &FrameTarget::Main)
            .await
            .unwrap();
        assert_eq!(grid.columns[1].column_type(), ColumnType::Boolean);
        assert_eq!(grid.rows.len(), 2);
    }

    #[tokio::test]
    async fn falls_back_to_grid_rows_then_fails() {
        let mut def = definition(Vec::new());
        def.row_selector = "div.stale-row".into();
        let grid = extractor(status_grid())
            .extract(&ExecCtx::new("g", CancellationToken::new()), &def, &FrameTarget::Main)
            .await
            .unwrap();
        assert_eq!(grid.total_rows, 5);

        let err = extractor(FakePage::new())
            .extract(&ExecCtx::new("g", CancellationToken::new()), &def, &FrameTarget::Main)
            .await
            .unwrap_err();
        assert!(matches!(err, GridError::ExtractionFailure(_)));
    }

    #[tokio::test]
    async fn img_columns_read_presence() {
        let page = FakePage::new().with_element(
            FakeElement::new(&["#grid tr"]).with_child(
                FakeElement::new(&[column_cell_selector(0).as_str()])
                    .with_child(FakeElement::new(&["img"])),
            ),
        );
        let def = ExtractDefinition {
            row_selector: "#grid tr".into(),
            column_mappings: vec![ColumnMapping::new("Logo", ColumnType::Img, 0)],
            ..ExtractDefinition::default()
        };
        let grid = extractor(page)
            .extract(&ExecCtx::new("g", CancellationToken::new()), &def, &FrameTarget::Main)
            .await
            .unwrap();
        assert_eq!(grid.rows[0].data.get("Logo"), Some(&CellValue::Flag(true)));
    }
}
