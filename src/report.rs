use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::NaiveDate;

use crate::attendance;
use crate::models::{AttendanceRecord, ComponentType};

#[derive(Debug, Clone)]
pub struct ComponentSummary {
    pub component: ComponentType,
    pub sections: usize,
    pub avg_percentage: f64,
}

pub fn summarize_by_component(records: &[AttendanceRecord]) -> Vec<ComponentSummary> {
    let mut map: BTreeMap<ComponentType, (usize, u32)> = BTreeMap::new();

    for record in records.iter().filter(|r| r.total_conducted > 0) {
        let pct = attendance::compute_course_percentage(std::slice::from_ref(record));
        let entry = map.entry(record.component_type()).or_insert((0, 0));
        entry.0 += 1;
        entry.1 += pct;
    }

    let mut summaries: Vec<ComponentSummary> = map
        .into_iter()
        .map(|(component, (sections, total_pct))| ComponentSummary {
            component,
            sections,
            avg_percentage: if sections == 0 {
                0.0
            } else {
                total_pct as f64 / sections as f64
            },
        })
        .collect();

    summaries.sort_by(|a, b| b.sections.cmp(&a.sections));
    summaries
}

pub fn build_report(records: &[AttendanceRecord], target: f64, generated_on: NaiveDate) -> String {
    let mut courses = attendance::aggregate_courses(records);
    courses.sort_by_key(|course| course.overall_percentage);
    let summaries = summarize_by_component(records);

    let mut output = String::new();

    let _ = writeln!(output, "# Attendance Report");
    let _ = writeln!(
        output,
        "Generated on {} (target {:.0}%)",
        generated_on, target
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Component Mix");

    if summaries.is_empty() {
        let _ = writeln!(output, "No conducted sessions recorded.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {}: {} sections (avg {:.1}%)",
                summary.component, summary.sections, summary.avg_percentage
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Courses");

    if courses.is_empty() {
        let _ = writeln!(output, "No attendance records.");
    } else {
        for course in courses.iter() {
            let (present, total) = course.sections.iter().fold((0i64, 0i64), |(p, t), s| {
                (
                    p.saturating_add(s.adjusted_attended()),
                    t.saturating_add(s.total_conducted.max(0)),
                )
            });
            let needed = attendance::sessions_to_reach_target(present, total, target);
            let safe = attendance::safe_sessions_at_target(present, total, target);
            let guidance = match (needed, safe) {
                (Some(needed), Some(safe)) => format!("attend {needed}, can skip {safe}"),
                _ => "no guidance".to_string(),
            };
            let _ = writeln!(
                output,
                "- {} {}: {}% ({})",
                course.course_code, course.course_name, course.overall_percentage, guidance
            );
        }
    }

    let below: Vec<_> = courses
        .iter()
        .filter(|course| f64::from(course.overall_percentage) < target)
        .collect();
    let _ = writeln!(output);
    let _ = writeln!(output, "## Below Target");

    if below.is_empty() {
        let _ = writeln!(output, "Every course is at or above target.");
    } else {
        for course in below {
            let _ = writeln!(
                output,
                "- {} ({}%)",
                course.course_code, course.overall_percentage
            );
        }
    }

    output
}
