//! Summary chart generation.
//!
//! After every successful refresh the generator reads the record count, the
//! five highest estimated GDPs and the refresh marker, and hands them to a
//! [`ChartRenderer`] that replaces the single cached PNG. The new image is
//! rendered next to the old one and renamed over it, so a failed render
//! leaves the previous image in place. Nothing here writes to the database.
//!
//! Text is drawn with a font compiled into the binary (`assets/`), so the
//! chart does not depend on fonts installed on the host.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use plotters::coord::Shift;
use plotters::prelude::*;

use crate::error::AppError;
use crate::repository::CountryRepository;

pub const TOP_N: i64 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct ChartBar {
    pub name: String,
    pub estimated_gdp: f64,
}

/// Everything the chart shows, highest GDP first.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryChart {
    pub total_countries: i64,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub bars: Vec<ChartBar>,
}

impl SummaryChart {
    pub fn refreshed_label(&self) -> String {
        match self.last_refreshed_at {
            Some(ts) => ts.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            None => "N/A".to_string(),
        }
    }

    pub fn title(&self) -> String {
        format!("Top {} Countries by Estimated GDP", TOP_N)
    }

    /// Second title line, drawn under [`SummaryChart::title`].
    pub fn subtitle(&self) -> String {
        format!(
            "Total: {} | Refreshed: {}",
            self.total_countries,
            self.refreshed_label()
        )
    }
}

/// Turns a [`SummaryChart`] into an image file at `path`.
pub trait ChartRenderer: Send + Sync {
    fn render(&self, chart: &SummaryChart, path: &Path) -> Result<(), AppError>;
}

/// Family name the bundled font is registered under.
pub const CHART_FONT_FAMILY: &str = "sans-serif";

static CHART_FONT: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");
static CHART_FONT_REGISTERED: OnceLock<bool> = OnceLock::new();

/// Make the bundled font available to plotters. Safe to call repeatedly.
pub fn register_chart_font() -> Result<(), AppError> {
    let registered = *CHART_FONT_REGISTERED.get_or_init(|| {
        plotters::style::register_font(CHART_FONT_FAMILY, FontStyle::Normal, CHART_FONT).is_ok()
    });
    if registered {
        Ok(())
    } else {
        Err(AppError::Summary("Bundled chart font could not be loaded".into()))
    }
}

/// Horizontal bar chart drawn with `plotters` into a PNG.
#[derive(Debug, Clone)]
pub struct PlottersRenderer {
    pub width: u32,
    pub height: u32,
}

impl Default for PlottersRenderer {
    fn default() -> Self {
        Self {
            width: 800,
            height: 500,
        }
    }
}

impl PlottersRenderer {
    /// Draw `chart` onto any plotters drawing area and present it.
    pub fn draw<DB: DrawingBackend>(
        &self,
        chart: &SummaryChart,
        root: &DrawingArea<DB, Shift>,
    ) -> Result<(), AppError> {
        register_chart_font()?;
        let draw_err = |err: String| AppError::Summary(format!("Failed to draw chart: {}", err));

        root.fill(&WHITE).map_err(|e| draw_err(e.to_string()))?;
        let body = root
            .titled(&chart.title(), (CHART_FONT_FAMILY, 22))
            .map_err(|e| draw_err(e.to_string()))?;
        let body = body
            .titled(&chart.subtitle(), (CHART_FONT_FAMILY, 14))
            .map_err(|e| draw_err(e.to_string()))?;

        // Highest GDP goes in the top slot.
        let slots = chart.bars.len().max(1) as i32;
        let labels: Vec<String> = chart.bars.iter().rev().map(|b| b.name.clone()).collect();
        let x_max = chart
            .bars
            .iter()
            .map(|b| b.estimated_gdp)
            .fold(0.0_f64, f64::max);
        let x_max = if x_max > 0.0 { x_max * 1.05 } else { 1.0 };

        let mut plot = ChartBuilder::on(&body)
            .margin(20)
            .x_label_area_size(40)
            .y_label_area_size(140)
            .build_cartesian_2d(0.0..x_max, (0..slots).into_segmented())
            .map_err(|e| draw_err(e.to_string()))?;

        plot.configure_mesh()
            .disable_y_mesh()
            .x_desc("Estimated GDP")
            .label_style((CHART_FONT_FAMILY, 12))
            .x_label_formatter(&|v: &f64| format!("{:.2e}", v))
            .y_labels(slots as usize)
            .y_label_formatter(&|v: &SegmentValue<i32>| match v {
                SegmentValue::CenterOf(slot) => {
                    labels.get(*slot as usize).cloned().unwrap_or_default()
                }
                _ => String::new(),
            })
            .draw()
            .map_err(|e| draw_err(e.to_string()))?;

        let top_slot = chart.bars.len() as i32 - 1;
        plot.draw_series(chart.bars.iter().enumerate().map(|(rank, bar)| {
            let slot = top_slot - rank as i32;
            Rectangle::new(
                [
                    (0.0, SegmentValue::Exact(slot)),
                    (bar.estimated_gdp, SegmentValue::Exact(slot + 1)),
                ],
                BLUE.mix(0.7).filled(),
            )
        }))
        .map_err(|e| draw_err(e.to_string()))?;

        root.present().map_err(|e| draw_err(e.to_string()))?;
        Ok(())
    }
}

impl ChartRenderer for PlottersRenderer {
    fn render(&self, chart: &SummaryChart, path: &Path) -> Result<(), AppError> {
        let root = BitMapBackend::new(path, (self.width, self.height)).into_drawing_area();
        self.draw(chart, &root)
    }
}

/// Sibling of `path` the renderer writes to before it is moved into place.
/// Keeps the extension so the bitmap encoder still picks PNG.
fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "summary.png".to_string());
    path.with_file_name(format!(".staging-{}", name))
}

pub struct SummaryGenerator {
    repository: Arc<CountryRepository>,
    renderer: Arc<dyn ChartRenderer>,
    image_path: PathBuf,
}

impl SummaryGenerator {
    pub fn new(
        repository: Arc<CountryRepository>,
        renderer: Arc<dyn ChartRenderer>,
        image_path: PathBuf,
    ) -> Self {
        Self {
            repository,
            renderer,
            image_path,
        }
    }

    pub fn image_path(&self) -> &Path {
        &self.image_path
    }

    /// Gather the current summary data from the store.
    pub async fn collect(&self) -> Result<SummaryChart, AppError> {
        let total_countries = self.repository.count_countries().await?;
        let last_refreshed_at = self.repository.last_refreshed_at().await?;
        let bars = self
            .repository
            .top_by_gdp(TOP_N)
            .await?
            .into_iter()
            .filter_map(|record| {
                record.estimated_gdp.map(|estimated_gdp| ChartBar {
                    name: record.name,
                    estimated_gdp,
                })
            })
            .collect();

        Ok(SummaryChart {
            total_countries,
            last_refreshed_at,
            bars,
        })
    }

    /// Rebuild the cached image, replacing whatever was there.
    pub async fn generate(&self) -> Result<SummaryChart, AppError> {
        let chart = self.collect().await?;

        if let Some(parent) = self.image_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|err| {
                AppError::Summary(format!("Failed to create {}: {}", parent.display(), err))
            })?;
        }

        let staging = staging_path(&self.image_path);
        let renderer = self.renderer.clone();
        let target = staging.clone();
        let to_render = chart.clone();
        let rendered = tokio::task::spawn_blocking(move || renderer.render(&to_render, &target))
            .await
            .map_err(|err| AppError::Summary(format!("Render task failed: {}", err)))
            .and_then(|result| result);

        if let Err(err) = rendered {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(err);
        }

        tokio::fs::rename(&staging, &self.image_path)
            .await
            .map_err(|err| {
                AppError::Summary(format!(
                    "Failed to move {} into place: {}",
                    staging.display(),
                    err
                ))
            })?;

        tracing::info!(
            path = %self.image_path.display(),
            bars = chart.bars.len(),
            "Summary image regenerated"
        );
        Ok(chart)
    }
}
