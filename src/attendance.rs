use crate::error::InputError;
use crate::models::{AttendanceRecord, CourseAggregate, Guidance};

// Sections never conducted carry no weight. The ratio is clamped to [0, 100]
// before the ceiling is taken.
pub fn compute_course_percentage(sections: &[AttendanceRecord]) -> u32 {
    let mut weighted_attended: i128 = 0;
    let mut weighted_conducted: i128 = 0;

    for section in sections {
        if section.total_conducted <= 0 {
            continue;
        }

        let weight = i128::from(section.component_type().weight());
        weighted_attended += i128::from(section.adjusted_attended()) * weight;
        weighted_conducted += i128::from(section.total_conducted) * weight;
    }

    if weighted_conducted == 0 || weighted_attended <= 0 {
        return 0;
    }
    if weighted_attended >= weighted_conducted {
        return 100;
    }

    // ceiling division; 0 < attended < conducted here
    let scaled = weighted_attended * 100;
    ((scaled + weighted_conducted - 1) / weighted_conducted) as u32
}

pub fn sessions_to_reach_target(present: i64, total: i64, target_pct: f64) -> Option<Guidance> {
    if target_pct >= 100.0 {
        return Some(Guidance::Unbounded);
    }
    if total <= 0 {
        return None;
    }

    let needed = (target_pct * total as f64 - 100.0 * present as f64) / (100.0 - target_pct);
    Some(Guidance::Sessions(needed.ceil().max(0.0) as u64))
}

pub fn safe_sessions_at_target(present: i64, total: i64, target_pct: f64) -> Option<Guidance> {
    if target_pct <= 0.0 {
        return Some(Guidance::Unbounded);
    }
    if total <= 0 {
        return None;
    }

    let available = (100.0 * present as f64 - target_pct * total as f64) / target_pct;
    Some(Guidance::Sessions(available.floor().max(0.0) as u64))
}

pub fn project_percentage(present: i64, total: i64, attend: u32, miss: u32) -> Option<f64> {
    let present = present.saturating_add(i64::from(attend));
    let total = total
        .saturating_add(i64::from(attend))
        .saturating_add(i64::from(miss));
    if total <= 0 {
        return None;
    }
    Some((present as f64 / total as f64 * 100.0).clamp(0.0, 100.0))
}

pub fn aggregate_courses(records: &[AttendanceRecord]) -> Vec<CourseAggregate> {
    let mut courses: Vec<CourseAggregate> = Vec::new();

    for record in records {
        match courses
            .iter_mut()
            .find(|course| course.course_code == record.course_code)
        {
            Some(course) => course.sections.push(record.clone()),
            None => courses.push(CourseAggregate {
                course_code: record.course_code.clone(),
                course_name: record.course_name.clone(),
                sections: vec![record.clone()],
                overall_percentage: 0,
            }),
        }
    }

    for course in courses.iter_mut() {
        course.overall_percentage = compute_course_percentage(&course.sections);
    }

    courses
}

pub fn validate_target(target_pct: f64) -> Result<(), InputError> {
    if !target_pct.is_finite() || !(0.0..=100.0).contains(&target_pct) {
        return Err(InputError::TargetOutOfRange(target_pct));
    }
    Ok(())
}

pub fn validate_counts(present: i64, total: i64) -> Result<(), InputError> {
    if present < 0 {
        return Err(InputError::Negative {
            field: "present",
            value: present,
        });
    }
    if total < 0 {
        return Err(InputError::Negative {
            field: "total",
            value: total,
        });
    }
    if present > total {
        return Err(InputError::PresentExceedsTotal { present, total });
    }
    Ok(())
}

// TCBR may still lift the adjusted count past conducted.
pub fn validate_record(record: &AttendanceRecord) -> Result<(), InputError> {
    for (field, value) in [
        ("totalConducted", record.total_conducted),
        ("totalAttended", record.total_attended),
    ] {
        if value < 0 {
            return Err(InputError::Negative { field, value });
        }
    }
    if record.total_attended > record.total_conducted {
        return Err(InputError::AttendedExceedsConducted {
            course: record.course_code.clone(),
            attended: record.total_attended,
            conducted: record.total_conducted,
        });
    }
    Ok(())
}

pub fn checked_course_percentage(sections: &[AttendanceRecord]) -> Result<u32, InputError> {
    sections.iter().try_for_each(validate_record)?;
    Ok(compute_course_percentage(sections))
}

pub fn checked_sessions_to_reach_target(
    present: i64,
    total: i64,
    target_pct: f64,
) -> Result<Option<Guidance>, InputError> {
    validate_counts(present, total)?;
    validate_target(target_pct)?;
    Ok(sessions_to_reach_target(present, total, target_pct))
}

pub fn checked_safe_sessions_at_target(
    present: i64,
    total: i64,
    target_pct: f64,
) -> Result<Option<Guidance>, InputError> {
    validate_counts(present, total)?;
    validate_target(target_pct)?;
    Ok(safe_sessions_at_target(present, total, target_pct))
}
