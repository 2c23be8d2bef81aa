use std::collections::BTreeSet;

use chrono::{NaiveDate, Weekday};

use crate::models::{SeatingEntry, TimetableEntry};

// `MON`, `Mon` and `Monday` all match
pub fn same_day(a: &str, b: &str) -> bool {
    let prefix = |s: &str| -> String { s.trim().chars().take(3).collect::<String>().to_ascii_lowercase() };
    let (a, b) = (prefix(a), prefix(b));
    !a.is_empty() && a == b
}

pub fn weekday_label(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Mon",
        Weekday::Tue => "Tue",
        Weekday::Wed => "Wed",
        Weekday::Thu => "Thu",
        Weekday::Fri => "Fri",
        Weekday::Sat => "Sat",
        Weekday::Sun => "Sun",
    }
}

pub fn entries_for_day<'a>(timetable: &'a [TimetableEntry], day: &str) -> Vec<&'a TimetableEntry> {
    let mut entries: Vec<&TimetableEntry> = timetable
        .iter()
        .filter(|entry| same_day(&entry.day, day))
        .collect();
    entries.sort_by(|a, b| compare_slots(&a.slot, &b.slot));
    entries
}

/// Slots on `day` where neither timetable has a class. The candidate slots
/// are every slot either timetable uses on any day.
pub fn common_free_slots(mine: &[TimetableEntry], theirs: &[TimetableEntry], day: &str) -> Vec<String> {
    let all_slots: BTreeSet<&str> = mine
        .iter()
        .chain(theirs.iter())
        .map(|entry| entry.slot.as_str())
        .collect();
    let busy: BTreeSet<&str> = mine
        .iter()
        .chain(theirs.iter())
        .filter(|entry| same_day(&entry.day, day))
        .map(|entry| entry.slot.as_str())
        .collect();

    let mut free: Vec<String> = all_slots
        .difference(&busy)
        .map(|slot| slot.to_string())
        .collect();
    free.sort_by(|a, b| compare_slots(a, b));
    free
}

pub fn upcoming_exams(plan: &[SeatingEntry], today: NaiveDate) -> Vec<&SeatingEntry> {
    let mut exams: Vec<&SeatingEntry> = plan.iter().filter(|e| e.exam_date >= today).collect();
    exams.sort_by(|a, b| {
        a.exam_date
            .cmp(&b.exam_date)
            .then_with(|| a.session.cmp(&b.session))
    });
    exams
}

// numeric slots ("2" < "10") sort by value, everything else lexically
fn compare_slots(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.trim().parse::<u32>(), b.trim().parse::<u32>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}
