/*!
 * Insight generation
 *
 * Short human-readable observations about a result set: the leader, its share
 * of a proportional chart, the KOL split, the spread between first and last
 * rows, and a head-to-head for two-row comparisons.
 */

use crate::data_types::format_number;
use crate::executor::ResultPoint;
use crate::plan::{GroupDimension, QueryPlan, ValueFormat};

/// Message returned when nothing matched
pub const NO_DATA_MESSAGE: &str = "No practitioners match this query.";

/// Derive insights for a result set; never empty
pub fn insights(plan: &QueryPlan, results: &[ResultPoint]) -> Vec<String> {
    let Some(leader) = results.first() else {
        return vec![NO_DATA_MESSAGE.to_string()];
    };

    let (metric_name, format) = match plan.primary_metric() {
        Some(metric) => (metric.name.as_str(), metric.effective_format()),
        None => ("value", ValueFormat::Decimal),
    };
    let total: f64 = results.iter().map(ResultPoint::primary_value).sum();
    let mut out = Vec::new();

    out.push(format!(
        "{} leads with {} {}",
        leader.name,
        display_value(leader.primary_value(), format),
        metric_name
    ));

    if plan.chart_type.is_proportional() && total > 0.0 {
        out.push(format!(
            "{} accounts for {}% of the total",
            leader.name,
            percent_of(leader.primary_value(), total)
        ));
    }

    if plan.group_by == Some(GroupDimension::Kol) && total > 0.0 {
        for row in results {
            out.push(format!("{}: {}% of the total", row.name, percent_of(row.primary_value(), total)));
        }
    }

    if results.len() > 2 {
        if let Some(last) = results.last() {
            let (first_value, last_value) = (leader.primary_value(), last.primary_value());
            if last_value > 0.0 && first_value > 0.0 {
                let ratio = (first_value / last_value).floor();
                if ratio > 1.0 && ratio < 100.0 {
                    out.push(format!("{} is {}x {}", leader.name, ratio as u64, last.name));
                }
            }
        }
    }

    if let [first, second] = results {
        out.push(head_to_head(first, second, format));
    }

    out
}

fn head_to_head(first: &ResultPoint, second: &ResultPoint, format: ValueFormat) -> String {
    let (a, b) = (first.primary_value(), second.primary_value());
    if a == b {
        return format!("{} and {} are tied at {}", first.name, second.name, display_value(a, format));
    }
    let (high, low, high_value, low_value) = if a > b {
        (first, second, a, b)
    } else {
        (second, first, b, a)
    };
    let difference = display_value(high_value - low_value, format);
    if low_value > 0.0 {
        let gap = ((high_value - low_value) / low_value * 100.0).round();
        format!("{} exceeds {} by {} (+{}%)", high.name, low.name, difference, format_number(gap))
    } else {
        format!("{} exceeds {} by {}", high.name, low.name, difference)
    }
}

/// Whole-number percentage of a positive total
fn percent_of(value: f64, total: f64) -> String {
    format_number((value / total * 100.0).round())
}

fn display_value(value: f64, format: ValueFormat) -> String {
    let rounded = (value * 10.0).round() / 10.0;
    match format {
        ValueFormat::Thousands => format!("{}k", format_number(rounded)),
        ValueFormat::Percent => format!("{}%", format_number(rounded)),
        ValueFormat::Decimal => format_number(rounded),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::Field;
    use crate::plan::{ChartType, Metric};

    fn by_city() -> QueryPlan {
        QueryPlan::new("practitioners")
            .group_by(GroupDimension::Field(Field::City))
            .metric(Metric::sum("value", Field::Volume).with_format(ValueFormat::Thousands))
    }

    #[test]
    fn test_empty_results_yield_single_message() {
        assert_eq!(insights(&by_city(), &[]), vec![NO_DATA_MESSAGE.to_string()]);
    }

    #[test]
    fn test_leader_and_ratio() {
        let rows = vec![
            ResultPoint::new("Lyon").with_value("value", 800.0),
            ResultPoint::new("Annecy").with_value("value", 300.0),
            ResultPoint::new("Grenoble").with_value("value", 100.0),
        ];
        let out = insights(&by_city(), &rows);
        assert_eq!(out[0], "Lyon leads with 800k value");
        assert!(out.contains(&"Lyon is 8x Grenoble".to_string()));
    }

    #[test]
    fn test_ratio_skipped_when_last_is_zero_or_too_large() {
        let zero = vec![
            ResultPoint::new("A").with_value("value", 5.0),
            ResultPoint::new("B").with_value("value", 2.0),
            ResultPoint::new("C").with_value("value", 0.0),
        ];
        assert!(!insights(&by_city(), &zero).iter().any(|s| s.contains('x')));

        let huge = vec![
            ResultPoint::new("A").with_value("value", 1000.0),
            ResultPoint::new("B").with_value("value", 50.0),
            ResultPoint::new("C").with_value("value", 1.0),
        ];
        assert!(!insights(&by_city(), &huge).iter().any(|s| s.ends_with(" C")));
    }

    #[test]
    fn test_pie_share() {
        let plan = by_city().chart(ChartType::Pie);
        let rows = vec![
            ResultPoint::new("Lyon").with_value("value", 75.0),
            ResultPoint::new("Grenoble").with_value("value", 25.0),
        ];
        let out = insights(&plan, &rows);
        assert!(out.contains(&"Lyon accounts for 75% of the total".to_string()));
    }

    #[test]
    fn test_kol_split_shares_and_zero_total() {
        let plan = QueryPlan::new("practitioners").group_by(GroupDimension::Kol).metric(Metric::count("count"));
        let rows = vec![
            ResultPoint::new("KOL").with_value("count", 1.0),
            ResultPoint::new("Non-KOL").with_value("count", 3.0),
        ];
        let out = insights(&plan, &rows);
        assert!(out.contains(&"KOL: 25% of the total".to_string()));
        assert!(out.contains(&"Non-KOL: 75% of the total".to_string()));

        let empty = vec![
            ResultPoint::new("KOL").with_value("count", 0.0),
            ResultPoint::new("Non-KOL").with_value("count", 0.0),
        ];
        let out = insights(&plan, &empty);
        assert!(!out.iter().any(|s| s.contains('%')));
    }

    #[test]
    fn test_two_row_comparison() {
        let rows = vec![
            ResultPoint::new("Lyon").with_value("value", 150.0),
            ResultPoint::new("Grenoble").with_value("value", 100.0),
        ];
        let out = insights(&by_city(), &rows);
        assert_eq!(out.last().unwrap(), "Lyon exceeds Grenoble by 50k (+50%)");
    }
}
