use crate::domain::model::{
    AggregationResult, MetricValue, MonthlyReport, ReportRow, ReportSection,
};
use crate::utils::error::{ReportError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum RowSource {
    Metric(String),
    SumOf(Vec<String>),
}

/// 區段中的一列輸出及其數值來源
#[derive(Debug, Clone, PartialEq)]
pub struct RowSpec {
    pub label: String,
    pub source: RowSource,
}

impl RowSpec {
    pub fn metric(label: &str, metric: &str) -> Self {
        Self {
            label: label.to_string(),
            source: RowSource::Metric(metric.to_string()),
        }
    }

    pub fn sum_of(label: &str, metrics: &[&str]) -> Self {
        Self {
            label: label.to_string(),
            source: RowSource::SumOf(metrics.iter().map(|m| m.to_string()).collect()),
        }
    }

    pub fn resolve(&self, result: &AggregationResult) -> MetricValue {
        match &self.source {
            RowSource::Metric(label) => result.get(label).cloned().unwrap_or(MetricValue::Failed),
            RowSource::SumOf(labels) => {
                let values: Vec<MetricValue> = labels
                    .iter()
                    .map(|l| result.get(l).cloned().unwrap_or(MetricValue::Failed))
                    .collect();
                combine(&values)
            }
        }
    }
}

/// Adds the members of a group row.
///
/// Unknown members make the group unknown; manual members are left out unless every
/// member is manual.
pub fn combine(values: &[MetricValue]) -> MetricValue {
    if values.iter().any(MetricValue::is_failed) {
        return MetricValue::Failed;
    }

    let mut count: u64 = 0;
    let mut sum = 0.0;
    let mut any_sum = false;
    let mut any_numeric = false;

    for value in values {
        match value {
            MetricValue::Count(n) => {
                count += n;
                sum += *n as f64;
                any_numeric = true;
            }
            MetricValue::Sum(v) => {
                sum += v;
                any_sum = true;
                any_numeric = true;
            }
            MetricValue::Skipped | MetricValue::Failed => {}
        }
    }

    match (any_numeric, any_sum) {
        (false, _) => MetricValue::Skipped,
        (true, true) => MetricValue::Sum(sum),
        (true, false) => MetricValue::Count(count),
    }
}

/// 單一報表區段的列配置
#[derive(Debug, Clone)]
pub struct SectionLayout {
    pub title: String,
    pub rows: Vec<RowSpec>,
}

/// 將每月彙總結果整理成報表
pub struct ReportAssembler {
    layouts: Vec<SectionLayout>,
    report: MonthlyReport,
}

impl ReportAssembler {
    pub fn new(layouts: Vec<SectionLayout>) -> Self {
        let sections = layouts
            .iter()
            .map(|layout| ReportSection {
                title: layout.title.clone(),
                rows: layout
                    .rows
                    .iter()
                    .map(|row| ReportRow {
                        label: row.label.clone(),
                        values: Vec::new(),
                    })
                    .collect(),
            })
            .collect();

        Self {
            layouts,
            report: MonthlyReport {
                months: Vec::new(),
                sections,
            },
        }
    }

    /// Adds one month column. `results` holds one aggregation result per section, in layout order;
    /// a missing result leaves the section's cells unknown.
    pub fn push_month(&mut self, label: &str, results: &[AggregationResult]) {
        self.report.months.push(label.to_string());
        let empty = AggregationResult::default();

        for (index, (layout, section)) in self
            .layouts
            .iter()
            .zip(self.report.sections.iter_mut())
            .enumerate()
        {
            let result = results.get(index).unwrap_or(&empty);
            for (spec, row) in layout.rows.iter().zip(section.rows.iter_mut()) {
                row.values.push(spec.resolve(result));
            }
        }
    }

    pub fn finish(self) -> MonthlyReport {
        self.report
    }
}

/// Header row, then per section a title row, its metric rows and a blank separator row.
pub fn render_csv(report: &MonthlyReport) -> Result<String> {
    let width = report.months.len() + 1;
    let blank = vec![String::new(); width];
    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header = Vec::with_capacity(width);
    header.push("Metric".to_string());
    header.extend(report.months.iter().cloned());
    writer.write_record(&header)?;

    for section in &report.sections {
        let mut title = blank.clone();
        title[0] = section.title.clone();
        writer.write_record(&title)?;

        for row in &section.rows {
            let mut record = Vec::with_capacity(width);
            record.push(row.label.clone());
            record.extend(row.values.iter().map(|v| v.to_string()));
            writer.write_record(&record)?;
        }

        writer.write_record(&blank)?;
    }

    let data = writer
        .into_inner()
        .map_err(|e| ReportError::IoError(e.into_error()))?;
    String::from_utf8(data).map_err(|e| ReportError::ValidationError {
        message: format!("report is not valid UTF-8: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources(values: Vec<(&str, MetricValue)>) -> AggregationResult {
        AggregationResult::from_entries(
            values
                .into_iter()
                .map(|(label, value)| (label.to_string(), value))
                .collect(),
        )
    }

    #[test]
    fn test_combine_rules() {
        use MetricValue::*;

        assert_eq!(combine(&[Count(2), Count(3)]), Count(5));
        assert_eq!(combine(&[Count(2), Failed]), Failed);
        assert_eq!(combine(&[Count(2), Skipped]), Count(2));
        assert_eq!(combine(&[Skipped, Skipped]), Skipped);
        assert_eq!(combine(&[Sum(1.5), Sum(2.0)]), Sum(3.5));
    }

    #[test]
    fn test_assembler_builds_grouped_rows_per_month() {
        let layout = SectionLayout {
            title: "Traffic".to_string(),
            rows: vec![
                RowSpec::sum_of("Paid online Marketing", &["Paid Social", "Paid Search"]),
                RowSpec::metric("  - Paid Social (META)", "Paid Social"),
                RowSpec::metric("Events", "Events"),
            ],
        };
        let mut assembler = ReportAssembler::new(vec![layout]);

        assembler.push_month(
            "Jan 2025",
            &[sources(vec![
                ("Paid Social", MetricValue::Count(4)),
                ("Paid Search", MetricValue::Count(6)),
                ("Events", MetricValue::Skipped),
            ])],
        );
        assembler.push_month(
            "Feb 2025",
            &[sources(vec![
                ("Paid Social", MetricValue::Count(1)),
                ("Paid Search", MetricValue::Failed),
                ("Events", MetricValue::Skipped),
            ])],
        );

        let report = assembler.finish();
        assert_eq!(report.months, vec!["Jan 2025", "Feb 2025"]);

        let jan = report.month("Jan 2025").unwrap();
        assert_eq!(jan[0], ("Paid online Marketing", &MetricValue::Count(10)));
        assert_eq!(jan[1], ("  - Paid Social (META)", &MetricValue::Count(4)));
        assert_eq!(jan[2], ("Events", &MetricValue::Skipped));

        let feb = report.month("Feb 2025").unwrap();
        assert_eq!(feb[0], ("Paid online Marketing", &MetricValue::Failed));
        assert_eq!(feb[1], ("  - Paid Social (META)", &MetricValue::Count(1)));
    }

    #[test]
    fn test_render_csv_layout() {
        let report = MonthlyReport {
            months: vec!["Jan 2025".to_string(), "Feb 2025".to_string()],
            sections: vec![
                ReportSection {
                    title: "Engagements".to_string(),
                    rows: vec![ReportRow {
                        label: "Sales pipeline".to_string(),
                        values: vec![MetricValue::Count(12), MetricValue::Failed],
                    }],
                },
                ReportSection {
                    title: "Value Partner revenue".to_string(),
                    rows: vec![
                        ReportRow {
                            label: "Amount".to_string(),
                            values: vec![MetricValue::Sum(1500.5), MetricValue::Sum(0.0)],
                        },
                        ReportRow {
                            label: "Events".to_string(),
                            values: vec![MetricValue::Skipped, MetricValue::Skipped],
                        },
                    ],
                },
            ],
        };

        let csv = render_csv(&report).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(
            lines,
            vec![
                "Metric,Jan 2025,Feb 2025",
                "Engagements,,",
                "Sales pipeline,12,",
                ",,",
                "Value Partner revenue,,",
                "Amount,1500.50,0.00",
                "Events,MANUAL,MANUAL",
                ",,",
            ]
        );
    }
}
