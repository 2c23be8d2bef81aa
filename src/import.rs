use std::path::Path;

use anyhow::Context;

use crate::models::{AttendanceRecord, TimetableEntry};

#[derive(serde::Deserialize)]
struct CsvRow {
    course_code: String,
    course_name: String,
    ltps: String,
    total_conducted: i64,
    total_attended: i64,
    #[serde(default)]
    tcbr: Option<i64>,
}

/// Reads attendance rows exported from the portal or typed by hand.
pub fn import_attendance_csv(csv_path: &Path) -> anyhow::Result<Vec<AttendanceRecord>> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut records = Vec::new();

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid attendance row {}", line + 1))?;
        records.push(AttendanceRecord {
            course_code: row.course_code.trim().to_string(),
            course_name: row.course_name.trim().to_string(),
            ltps: row.ltps.trim().to_string(),
            total_conducted: row.total_conducted,
            total_attended: row.total_attended,
            tcbr: row.tcbr.unwrap_or(0),
        });
    }

    tracing::info!(count = records.len(), path = %csv_path.display(), "imported attendance");
    Ok(records)
}

pub fn export_timetable_csv(entries: &[TimetableEntry], out: &Path) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(out)
        .with_context(|| format!("failed to create {}", out.display()))?;
    writer.write_record(["day", "slot", "course_code", "section", "room"])?;
    for entry in entries {
        writer.write_record([
            entry.day.as_str(),
            entry.slot.as_str(),
            entry.course_code.as_str(),
            entry.section.as_str(),
            entry.room.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn imports_rows_with_optional_tcbr() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("attendance.csv");
        fs::write(
            &path,
            "course_code,course_name,ltps,total_conducted,total_attended,tcbr\n\
             CS101,Programming,L,20,18,1\n\
             CS101,Programming,P,10,8,\n",
        )?;

        let records = import_attendance_csv(&path)?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].tcbr, 1);
        assert_eq!(records[1].tcbr, 0);
        assert_eq!(records[1].ltps, "P");
        Ok(())
    }

    #[test]
    fn reports_the_bad_row() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("attendance.csv");
        fs::write(
            &path,
            "course_code,course_name,ltps,total_conducted,total_attended,tcbr\n\
             CS101,Programming,L,twenty,18,0\n",
        )?;

        let err = import_attendance_csv(&path).unwrap_err();
        assert!(err.to_string().contains("row 1"));
        Ok(())
    }

    #[test]
    fn exports_timetable_rows() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("timetable.csv");
        let entries = vec![TimetableEntry {
            day: "MON".to_string(),
            slot: "1".to_string(),
            course_code: "CS101".to_string(),
            section: "S-12".to_string(),
            room: "C-301".to_string(),
        }];

        export_timetable_csv(&entries, &path)?;
        let written = fs::read_to_string(&path)?;
        assert_eq!(
            written,
            "day,slot,course_code,section,room\nMON,1,CS101,S-12,C-301\n"
        );
        Ok(())
    }
}
