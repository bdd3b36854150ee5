//! Chart selection and dashboard layout.
//!
//! Output is purely declarative: every chart carries a [`DataQuery`] naming
//! columns and aggregations, never data.

use serde::{Deserialize, Serialize};
use tabular::{looks_like_identifier, ColumnDescriptor, ColumnType};

use crate::kpi::{Aggregation, KpiSpec};

pub const MAX_CHARTS: usize = 8;
pub const MAX_GAUGES: usize = 2;
pub const DONUT_MAX_CATEGORIES: usize = 5;
pub const BAR_MAX_CATEGORIES: usize = 8;
pub const TREEMAP_MAX_CATEGORIES: usize = 50;
const HISTOGRAM_BINS: u32 = 20;
const FILTER_MAX_CATEGORIES: usize = 20;
const RANGE_FILTER_MIN_UNIQUE: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    KpiCards,
    Line,
    Area,
    Bar,
    Donut,
    Scatter,
    Histogram,
    Box,
    Treemap,
    Gauge,
}

impl ChartType {
    pub fn is_time_series(self) -> bool {
        matches!(self, ChartType::Line | ChartType::Area)
    }

    fn tab(self) -> Tab {
        match self {
            ChartType::KpiCards | ChartType::Line | ChartType::Area | ChartType::Gauge => Tab::Overview,
            ChartType::Bar | ChartType::Donut | ChartType::Scatter | ChartType::Treemap => Tab::Performance,
            ChartType::Histogram | ChartType::Box => Tab::Distribution,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartSize {
    Half,
    Full,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DataQuery {
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<Aggregation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bins: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub chart_type: ChartType,
    pub title: String,
    pub description: String,
    pub x_axis: Option<String>,
    pub y_axis: Option<String>,
    pub data_query: DataQuery,
    pub size: ChartSize,
    /// 1-based display order.
    pub priority: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tab {
    Overview,
    Performance,
    Distribution,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TabLayout {
    pub tab: Tab,
    pub chart_ids: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridRow {
    pub chart_ids: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    DateRange,
    MultiSelect,
    Range,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DashboardFilter {
    pub column: String,
    pub kind: FilterKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DashboardStructure {
    pub title: String,
    pub tabs: Vec<TabLayout>,
    pub grid: Vec<GridRow>,
    pub filters: Vec<DashboardFilter>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DashboardDesign {
    pub charts: Vec<ChartSpec>,
    pub layout: DashboardStructure,
}

/// Sort group; lower renders first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Rank {
    Cards,
    Trend,
    Categorical(usize),
    Other,
}

struct Draft {
    rank: Rank,
    chart: ChartSpec,
}

fn draft(
    rank: Rank,
    chart_type: ChartType,
    title: String,
    description: String,
    x_axis: Option<&str>,
    y_axis: Option<&str>,
    data_query: DataQuery,
) -> Draft {
    let size = if chart_type == ChartType::KpiCards || chart_type.is_time_series() {
        ChartSize::Full
    } else {
        ChartSize::Half
    };
    Draft {
        rank,
        chart: ChartSpec {
            id: String::new(),
            chart_type,
            title,
            description,
            x_axis: x_axis.map(str::to_string),
            y_axis: y_axis.map(str::to_string),
            data_query,
            size,
            priority: 0,
        },
    }
}

fn title(column: &str) -> String {
    crate::kpi::title_case(column)
}

/// Numeric columns ordered by how prominently the KPIs use them.
fn ranked_numeric<'a>(kpis: &[KpiSpec], columns: &'a [ColumnDescriptor]) -> Vec<&'a ColumnDescriptor> {
    let mut numeric: Vec<&ColumnDescriptor> =
        columns
            .iter()
            .filter(|c| c.inferred_type.is_numeric() && !looks_like_identifier(&c.name))
            .collect();
    let first_use = |c: &ColumnDescriptor| {
        kpis.iter()
            .position(|k| k.source_columns.iter().any(|s| *s == c.name))
            .unwrap_or(usize::MAX)
    };
    numeric.sort_by_key(|c| first_use(c));
    numeric
}

/// Choose charts for the KPIs and columns and lay them out.
pub fn design(kpis: &[KpiSpec], columns: &[ColumnDescriptor], dashboard_title: &str) -> DashboardDesign {
    let numeric = ranked_numeric(kpis, columns);
    let primary = numeric.first().copied();
    let secondary = numeric.get(1).copied();

    let datetime = columns.iter().find(|c| c.inferred_type == ColumnType::Datetime);
    let mut categorical: Vec<&ColumnDescriptor> = columns
        .iter()
        .filter(|c| c.inferred_type == ColumnType::Categorical && c.unique_count >= 2)
        .collect();
    categorical.sort_by_key(|c| c.unique_count);

    let mut drafts = Vec::new();

    if !kpis.is_empty() {
        let mut cols: Vec<String> = Vec::new();
        for k in kpis {
            for s in &k.source_columns {
                if !cols.contains(s) {
                    cols.push(s.clone());
                }
            }
        }
        drafts.push(draft(
            Rank::Cards,
            ChartType::KpiCards,
            "Key Metrics".to_string(),
            format!("{} headline KPIs", kpis.len()),
            None,
            None,
            DataQuery {
                columns: cols,
                ..DataQuery::default()
            },
        ));
    }

    if let (Some(dt), Some(p)) = (datetime, primary) {
        drafts.push(draft(
            Rank::Trend,
            ChartType::Line,
            format!("{} Over Time", title(&p.name)),
            format!("Trend of {} by {}", p.name, dt.name),
            Some(dt.name.as_str()),
            Some(p.name.as_str()),
            DataQuery {
                columns: vec![dt.name.clone(), p.name.clone()],
                group_by: vec![dt.name.clone()],
                aggregation: Some(Aggregation::Sum),
                ..DataQuery::default()
            },
        ));
        if let Some(s) = secondary {
            drafts.push(draft(
                Rank::Trend,
                ChartType::Area,
                format!("Cumulative {} Over Time", title(&s.name)),
                format!("Volume of {} by {}", s.name, dt.name),
                Some(dt.name.as_str()),
                Some(s.name.as_str()),
                DataQuery {
                    columns: vec![dt.name.clone(), s.name.clone()],
                    group_by: vec![dt.name.clone()],
                    aggregation: Some(Aggregation::Sum),
                    ..DataQuery::default()
                },
            ));
        }
    }

    for c in categorical.iter().filter(|c| c.unique_count <= BAR_MAX_CATEGORIES) {
        let chart_type = if c.unique_count <= DONUT_MAX_CATEGORIES {
            ChartType::Donut
        } else {
            ChartType::Bar
        };
        let (chart_title, y, query) = match primary {
            Some(p) => (
                format!("{} by {}", title(&p.name), title(&c.name)),
                Some(p.name.as_str()),
                DataQuery {
                    columns: vec![c.name.clone(), p.name.clone()],
                    group_by: vec![c.name.clone()],
                    aggregation: Some(Aggregation::Sum),
                    limit: Some(c.unique_count as u32),
                    ..DataQuery::default()
                },
            ),
            None => (
                format!("Records by {}", title(&c.name)),
                None,
                DataQuery {
                    columns: vec![c.name.clone()],
                    group_by: vec![c.name.clone()],
                    aggregation: Some(Aggregation::Count),
                    limit: Some(c.unique_count as u32),
                    ..DataQuery::default()
                },
            ),
        };
        drafts.push(draft(
            Rank::Categorical(c.unique_count),
            chart_type,
            chart_title,
            format!("Breakdown across {} {} values", c.unique_count, c.name),
            Some(c.name.as_str()),
            y,
            query,
        ));
    }

    for c in categorical
        .iter()
        .filter(|c| c.unique_count > BAR_MAX_CATEGORIES && c.unique_count <= TREEMAP_MAX_CATEGORIES)
    {
        let parent = categorical
            .iter()
            .find(|p| p.unique_count <= BAR_MAX_CATEGORIES && p.name != c.name);
        let mut group_by: Vec<String> = parent.iter().map(|p| p.name.clone()).collect();
        group_by.push(c.name.clone());
        let mut cols = group_by.clone();
        if let Some(p) = primary {
            cols.push(p.name.clone());
        }
        drafts.push(draft(
            Rank::Categorical(c.unique_count),
            ChartType::Treemap,
            format!("{} Hierarchy", title(&c.name)),
            format!("Nested view of {} values", c.name),
            None,
            primary.map(|p| p.name.as_str()),
            DataQuery {
                columns: cols,
                group_by,
                aggregation: Some(if primary.is_some() { Aggregation::Sum } else { Aggregation::Count }),
                ..DataQuery::default()
            },
        ));
    }

    if let (Some(p), Some(s)) = (primary, secondary) {
        drafts.push(draft(
            Rank::Other,
            ChartType::Scatter,
            format!("{} vs {}", title(&p.name), title(&s.name)),
            format!("Relationship between {} and {}", p.name, s.name),
            Some(p.name.as_str()),
            Some(s.name.as_str()),
            DataQuery {
                columns: vec![p.name.clone(), s.name.clone()],
                ..DataQuery::default()
            },
        ));
    }

    if let Some(p) = primary {
        drafts.push(draft(
            Rank::Other,
            ChartType::Histogram,
            format!("{} Distribution", title(&p.name)),
            format!("Frequency of {} values", p.name),
            Some(p.name.as_str()),
            None,
            DataQuery {
                columns: vec![p.name.clone()],
                bins: Some(HISTOGRAM_BINS),
                ..DataQuery::default()
            },
        ));
    }
    if let Some(s) = secondary {
        drafts.push(draft(
            Rank::Other,
            ChartType::Box,
            format!("{} Spread", title(&s.name)),
            format!("Quartiles and outliers of {}", s.name),
            None,
            Some(s.name.as_str()),
            DataQuery {
                columns: vec![s.name.clone()],
                ..DataQuery::default()
            },
        ));
    }

    for k in kpis.iter().filter(|k| k.is_ratio_like()).take(MAX_GAUGES) {
        drafts.push(draft(
            Rank::Other,
            ChartType::Gauge,
            k.name.clone(),
            k.description.clone(),
            None,
            None,
            DataQuery {
                columns: k.source_columns.clone(),
                aggregation: Some(k.aggregation),
                ..DataQuery::default()
            },
        ));
    }

    drafts.sort_by_key(|d| d.rank);

    let cards = drafts.iter().take_while(|d| d.rank == Rank::Cards).count();
    drafts.truncate(cards + MAX_CHARTS);

    let charts: Vec<ChartSpec> = drafts
        .into_iter()
        .enumerate()
        .map(|(i, d)| ChartSpec {
            id: format!("chart_{}", i + 1),
            priority: (i + 1) as u32,
            ..d.chart
        })
        .collect();

    let layout = DashboardStructure {
        title: dashboard_title.to_string(),
        tabs: tabs(&charts),
        grid: grid(&charts),
        filters: filters(columns),
    };
    DashboardDesign { charts, layout }
}

fn tabs(charts: &[ChartSpec]) -> Vec<TabLayout> {
    [Tab::Overview, Tab::Performance, Tab::Distribution]
        .into_iter()
        .filter_map(|tab| {
            let ids: Vec<String> = charts
                .iter()
                .filter(|c| c.chart_type.tab() == tab)
                .map(|c| c.id.clone())
                .collect();
            (!ids.is_empty()).then_some(TabLayout { tab, chart_ids: ids })
        })
        .collect()
}

/// Two columns per row; full-width charts take a row of their own.
fn grid(charts: &[ChartSpec]) -> Vec<GridRow> {
    let mut rows = Vec::new();
    let mut pending: Vec<String> = Vec::new();
    for c in charts {
        match c.size {
            ChartSize::Full => {
                if !pending.is_empty() {
                    rows.push(GridRow { chart_ids: std::mem::take(&mut pending) });
                }
                rows.push(GridRow { chart_ids: vec![c.id.clone()] });
            }
            ChartSize::Half => {
                pending.push(c.id.clone());
                if pending.len() == 2 {
                    rows.push(GridRow { chart_ids: std::mem::take(&mut pending) });
                }
            }
        }
    }
    if !pending.is_empty() {
        rows.push(GridRow { chart_ids: pending });
    }
    rows
}

fn filters(columns: &[ColumnDescriptor]) -> Vec<DashboardFilter> {
    let mut out = Vec::new();
    if let Some(dt) = columns.iter().find(|c| c.inferred_type == ColumnType::Datetime) {
        out.push(DashboardFilter {
            column: dt.name.clone(),
            kind: FilterKind::DateRange,
        });
    }
    for c in columns.iter().filter(|c| {
        c.inferred_type == ColumnType::Categorical
            && (2..=FILTER_MAX_CATEGORIES).contains(&c.unique_count)
    }) {
        out.push(DashboardFilter {
            column: c.name.clone(),
            kind: FilterKind::MultiSelect,
        });
    }
    for c in columns
        .iter()
        .filter(|c| {
            c.inferred_type.is_numeric()
                && !looks_like_identifier(&c.name)
                && c.unique_count > RANGE_FILTER_MIN_UNIQUE
        })
        .take(2)
    {
        out.push(DashboardFilter {
            column: c.name.clone(),
            kind: FilterKind::Range,
        });
    }
    out
}
