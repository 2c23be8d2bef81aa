use std::fmt::Write;
use std::path::Path;

use anyhow::{bail, Context};
use chrono::{Datelike, Local};

use crate::attendance;
use crate::client::{Captcha, ErpClient, PortalForm};
use crate::error::ClientError;
use crate::models::{
    AttendanceRecord, CaptchaSession, CourseAggregate, Credentials, Maddy, SeatingEntry,
};
use crate::schedule;
use crate::sequence::{RequestSequence, RequestTicket};
use crate::store::{self, Cache, KeyValueStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SyncKind {
    Timetable,
    Attendance,
    Seating,
    Handouts,
}

// explicit, then stored, then the configured default
pub async fn resolve_target<S: KeyValueStore>(
    cache: &Cache<S>,
    explicit: Option<f64>,
    default: f64,
) -> anyhow::Result<f64> {
    let target = match explicit {
        Some(target) => target,
        None => cache.get(&store::ATTENDANCE_TARGET).await?.unwrap_or(default),
    };
    attendance::validate_target(target)?;
    Ok(target)
}

pub async fn set_target<S: KeyValueStore>(cache: &Cache<S>, target: f64) -> anyhow::Result<()> {
    attendance::validate_target(target)?;
    cache.set(&store::ATTENDANCE_TARGET, &target).await?;
    Ok(())
}

pub async fn save_captcha(
    cache: &Cache<impl KeyValueStore>,
    client: &ErpClient,
    out: &Path,
) -> anyhow::Result<()> {
    let ticket = RequestSequence::new(cache, &store::CAPTCHA_REQUEST)
        .issue()
        .await?;
    let captcha = client.fetch_captcha().await?;
    store_captcha(cache, ticket, captcha, out).await
}

// Nothing is written unless `ticket` is still the newest CAPTCHA request.
pub async fn store_captcha(
    cache: &Cache<impl KeyValueStore>,
    ticket: RequestTicket,
    captcha: Captcha,
    out: &Path,
) -> anyhow::Result<()> {
    let sequence = RequestSequence::new(cache, &store::CAPTCHA_REQUEST);
    let Some(captcha) = sequence.settle(ticket, captcha).await? else {
        return Err(anyhow::Error::new(ClientError::Superseded)
            .context("a newer CAPTCHA was requested; solve that one instead"));
    };

    tracing::debug!(content_type = ?captcha.content_type, "saving captcha image");
    std::fs::write(out, &captcha.image)
        .with_context(|| format!("failed to write {}", out.display()))?;
    cache
        .set(
            &store::CAPTCHA_SESSION,
            &CaptchaSession {
                session_id: captcha.session_id,
            },
        )
        .await?;
    Ok(())
}

pub async fn sync<S: KeyValueStore>(
    cache: &Cache<S>,
    client: &ErpClient,
    kind: SyncKind,
    captcha: &str,
    maddy: Option<&str>,
) -> anyhow::Result<String> {
    if maddy.is_some() && kind != SyncKind::Timetable {
        bail!("only the timetable can be synced for a Maddy");
    }

    let credentials = match maddy {
        Some(name) => find_maddy(cache, name).await?.credentials(),
        None => cache
            .get(&store::CREDENTIALS)
            .await?
            .context("no credentials saved; run `erp-companion credentials` first")?,
    };
    let session = cache
        .get(&store::CAPTCHA_SESSION)
        .await?
        .context("no CAPTCHA session; run `erp-companion captcha` first")?;
    // the backend accepts a CAPTCHA once, whatever the outcome
    cache.remove(&store::CAPTCHA_SESSION).await?;

    let form = PortalForm::new(&credentials, captcha, &session.session_id);
    let sequence = RequestSequence::new(cache, &store::SYNC_REQUEST);
    let ticket = sequence.issue().await?;

    let summary = match kind {
        SyncKind::Timetable => {
            let fetched = client.fetch_timetable(&form).await?;
            let payload = require_current(&sequence, ticket, fetched).await?;
            let count = payload.timetable.len();
            match maddy {
                Some(name) => {
                    let mut maddys = cache.get(&store::MADDYS).await?.unwrap_or_default();
                    if let Some(entry) = maddys.iter_mut().find(|m| m.name == name) {
                        entry.timetable = Some(payload.timetable);
                    }
                    cache.set(&store::MADDYS, &maddys).await?;
                    format!("Synced {count} timetable entries for {name}.")
                }
                None => {
                    cache.set(&store::TIMETABLE, &payload.timetable).await?;
                    cache
                        .set(&store::SUBJECT_MAPPINGS, &payload.subject_mappings)
                        .await?;
                    format!("Synced {count} timetable entries.")
                }
            }
        }
        SyncKind::Attendance => {
            let fetched = client.fetch_attendance(&form).await?;
            let records = require_current(&sequence, ticket, fetched).await?;
            for invalid in records.iter().filter_map(|r| attendance::validate_record(r).err()) {
                tracing::warn!(%invalid, "backend returned inconsistent attendance");
            }
            cache.set(&store::ATTENDANCE, &records).await?;
            format!("Synced {} attendance sections.", records.len())
        }
        SyncKind::Seating => {
            let fetched = client.fetch_seating(&form).await?;
            let payload = require_current(&sequence, ticket, fetched).await?;
            cache.set(&store::SEATING_PLAN, &payload.seating_plan).await?;
            cache.set(&store::EXAM_SLOTS, &payload.exam_slot_details).await?;
            format!("Synced {} exam seats.", payload.seating_plan.len())
        }
        SyncKind::Handouts => {
            let fetched = client.fetch_handouts(&form).await?;
            let handouts = require_current(&sequence, ticket, fetched).await?;
            cache.set(&store::HANDOUTS, &handouts).await?;
            format!("Synced {} handouts.", handouts.len())
        }
    };

    Ok(summary)
}

async fn require_current<S: KeyValueStore, T>(
    sequence: &RequestSequence<'_, S>,
    ticket: RequestTicket,
    value: T,
) -> anyhow::Result<T> {
    match sequence.settle(ticket, value).await? {
        Some(value) => Ok(value),
        None => Err(ClientError::Superseded.into()),
    }
}

// Expired attendance is still shown, with a notice to sync again.
pub async fn load_attendance<S: KeyValueStore>(
    cache: &Cache<S>,
    ttl: chrono::Duration,
) -> anyhow::Result<(Vec<AttendanceRecord>, Option<String>)> {
    let cached = cache
        .get_cached(&store::ATTENDANCE, ttl)
        .await?
        .context("no attendance cached; run `erp-companion sync attendance` first")?;

    let notice = cached.stale.then(|| {
        let minutes = (chrono::Utc::now() - cached.updated_at).num_minutes();
        format!(
            "Attendance last synced {minutes} minutes ago; run `erp-companion sync attendance` to refresh."
        )
    });
    Ok((cached.value, notice))
}

pub fn render_attendance(courses: &[CourseAggregate], target: f64) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "Attendance (target {target:.0}%):");

    for course in courses {
        let _ = writeln!(
            output,
            "{} {}: {}%",
            course.course_code, course.course_name, course.overall_percentage
        );
        for section in &course.sections {
            let _ = writeln!(output, "  {}", section_line(section, target));
        }
    }

    output
}

fn section_line(section: &AttendanceRecord, target: f64) -> String {
    let present = section.adjusted_attended();
    let total = section.total_conducted;
    let needed = attendance::sessions_to_reach_target(present, total, target);
    let safe = attendance::safe_sessions_at_target(present, total, target);

    let guidance = match (needed, safe) {
        (Some(needed), Some(safe)) => format!("attend {needed} more, can skip {safe}"),
        _ => "no sessions yet".to_string(),
    };
    format!(
        "{} {}/{} - {}",
        section.component_type(),
        present,
        total,
        guidance
    )
}

pub fn calculate(
    present: i64,
    total: i64,
    target: f64,
    attend: u32,
    miss: u32,
) -> anyhow::Result<String> {
    let needed = attendance::checked_sessions_to_reach_target(present, total, target)?;
    let safe = attendance::checked_safe_sessions_at_target(present, total, target)?;

    let mut output = String::new();
    match attendance::project_percentage(present, total, 0, 0) {
        Some(current) => {
            let _ = writeln!(output, "Current: {current:.2}% ({present}/{total})");
        }
        None => {
            let _ = writeln!(output, "Current: no sessions conducted yet");
        }
    }

    match (needed, safe) {
        (Some(needed), Some(safe)) => {
            let _ = writeln!(output, "Attend {needed} more to reach {target}%");
            let _ = writeln!(output, "Can skip {safe} and stay at {target}%");
        }
        _ => {
            let _ = writeln!(output, "No guidance available until sessions are conducted");
        }
    }

    if attend > 0 || miss > 0 {
        if let Some(projected) = attendance::project_percentage(present, total, attend, miss) {
            let _ = writeln!(
                output,
                "After attending {attend} and missing {miss}: {projected:.2}%"
            );
        }
    }

    Ok(output)
}

pub async fn show_timetable<S: KeyValueStore>(
    cache: &Cache<S>,
    day: Option<&str>,
    export: Option<&Path>,
) -> anyhow::Result<String> {
    let timetable = cache
        .get(&store::TIMETABLE)
        .await?
        .context("no timetable cached; run `erp-companion sync timetable` first")?;
    let mappings = cache
        .get(&store::SUBJECT_MAPPINGS)
        .await?
        .unwrap_or_default();

    if let Some(path) = export {
        crate::import::export_timetable_csv(&timetable, path)?;
    }

    let day = day
        .map(str::to_string)
        .unwrap_or_else(|| schedule::weekday_label(Local::now().weekday()).to_string());

    let mut output = String::new();
    let entries = schedule::entries_for_day(&timetable, &day);
    if entries.is_empty() {
        let _ = writeln!(output, "No classes on {day}.");
    }
    for entry in entries {
        let name = mappings
            .get(&entry.course_code)
            .map(String::as_str)
            .unwrap_or(entry.course_code.as_str());
        let _ = writeln!(
            output,
            "{:>5}  {} ({}) {} {}",
            entry.slot, entry.course_code, name, entry.section, entry.room
        );
    }
    Ok(output)
}

pub async fn show_seating<S: KeyValueStore>(
    cache: &Cache<S>,
    all: bool,
) -> anyhow::Result<String> {
    let plan: Vec<SeatingEntry> = cache
        .get(&store::SEATING_PLAN)
        .await?
        .context("no seating plan cached; run `erp-companion sync seating` first")?;
    let slots = cache.get(&store::EXAM_SLOTS).await?.unwrap_or_default();

    let exams: Vec<&SeatingEntry> = if all {
        plan.iter().collect()
    } else {
        schedule::upcoming_exams(&plan, Local::now().date_naive())
    };

    let mut output = String::new();
    if exams.is_empty() {
        let _ = writeln!(output, "No upcoming exams.");
    }
    for exam in exams {
        let time = slots
            .iter()
            .find(|slot| slot.session == exam.session)
            .map(|slot| format!(" {}-{}", slot.start, slot.end))
            .unwrap_or_default();
        let _ = writeln!(
            output,
            "{} {}{} {}: room {} seat {}",
            exam.exam_date, exam.session, time, exam.course_code, exam.room, exam.seat
        );
    }
    Ok(output)
}

pub async fn add_maddy<S: KeyValueStore>(
    cache: &Cache<S>,
    name: &str,
    credentials: &Credentials,
) -> anyhow::Result<()> {
    let mut maddys = cache.get(&store::MADDYS).await?.unwrap_or_default();
    if maddys.iter().any(|m| m.name == name) {
        bail!("a Maddy named {name} already exists");
    }
    maddys.push(Maddy::new(name, &credentials.username, &credentials.password));
    cache.set(&store::MADDYS, &maddys).await?;
    Ok(())
}

pub async fn remove_maddy<S: KeyValueStore>(cache: &Cache<S>, name: &str) -> anyhow::Result<()> {
    let mut maddys = cache.get(&store::MADDYS).await?.unwrap_or_default();
    let before = maddys.len();
    maddys.retain(|m| m.name != name);
    if maddys.len() == before {
        bail!("no Maddy named {name}");
    }
    cache.set(&store::MADDYS, &maddys).await?;
    Ok(())
}

pub async fn compare_with_maddy<S: KeyValueStore>(
    cache: &Cache<S>,
    name: &str,
    day: &str,
) -> anyhow::Result<Vec<String>> {
    let mine = cache
        .get(&store::TIMETABLE)
        .await?
        .context("no timetable cached; run `erp-companion sync timetable` first")?;
    let maddy = find_maddy(cache, name).await?;
    let theirs = maddy.timetable.with_context(|| {
        format!("no timetable for {name}; run `erp-companion sync timetable --maddy {name}`")
    })?;
    Ok(schedule::common_free_slots(&mine, &theirs, day))
}

async fn find_maddy<S: KeyValueStore>(cache: &Cache<S>, name: &str) -> anyhow::Result<Maddy> {
    cache
        .get(&store::MADDYS)
        .await?
        .unwrap_or_default()
        .into_iter()
        .find(|m| m.name == name)
        .with_context(|| format!("no Maddy named {name}"))
}

pub async fn import_attendance<S: KeyValueStore>(
    cache: &Cache<S>,
    csv_path: &Path,
) -> anyhow::Result<usize> {
    let records = crate::import::import_attendance_csv(csv_path)?;
    for record in &records {
        attendance::validate_record(record)
            .with_context(|| format!("rejected {}", csv_path.display()))?;
    }
    cache.set(&store::ATTENDANCE, &records).await?;
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use chrono::{Duration, Utc};

    use super::*;
    use crate::models::TimetableEntry;
    use crate::store::{MemoryStore, StoredEntry};

    fn credentials() -> Credentials {
        Credentials {
            username: "2100031234".to_string(),
            password: "secret".to_string(),
        }
    }

    fn entry(day: &str, slot: &str, course: &str) -> TimetableEntry {
        TimetableEntry {
            day: day.to_string(),
            slot: slot.to_string(),
            course_code: course.to_string(),
            section: "S-1".to_string(),
            room: "C-101".to_string(),
        }
    }

    fn captcha(session_id: &str, image: &[u8]) -> Captcha {
        Captcha {
            session_id: session_id.to_string(),
            image: image.to_vec(),
            content_type: Some("image/png".to_string()),
        }
    }

    fn lecture(attended: i64, conducted: i64) -> AttendanceRecord {
        AttendanceRecord {
            course_code: "CS101".to_string(),
            course_name: "Programming".to_string(),
            ltps: "L".to_string(),
            total_conducted: conducted,
            total_attended: attended,
            tcbr: 0,
        }
    }

    #[tokio::test]
    async fn overlapping_captcha_requests_keep_only_the_newest() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let cache = Cache::new(MemoryStore::new());
        let sequence = RequestSequence::new(&cache, &store::CAPTCHA_REQUEST);

        // two `captcha` runs start before either response arrives
        let first = sequence.issue().await?;
        let second = sequence.issue().await?;

        let second_out = dir.path().join("second.png");
        store_captcha(&cache, second, captcha("sess-2", b"second"), &second_out).await?;

        let first_out = dir.path().join("first.png");
        let err = store_captcha(&cache, first, captcha("sess-1", b"first"), &first_out)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ClientError>(),
            Some(ClientError::Superseded)
        ));

        assert!(!first_out.exists());
        assert_eq!(fs::read(&second_out)?, b"second");
        let session = cache.get(&store::CAPTCHA_SESSION).await?.unwrap();
        assert_eq!(session.session_id, "sess-2");
        Ok(())
    }

    #[tokio::test]
    async fn stale_captcha_does_not_clobber_a_newer_session() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let cache = Cache::new(MemoryStore::new());
        let sequence = RequestSequence::new(&cache, &store::CAPTCHA_REQUEST);

        let first = sequence.issue().await?;
        store_captcha(&cache, first, captcha("sess-1", b"first"), &dir.path().join("a.png"))
            .await?;

        let second = sequence.issue().await?;
        store_captcha(&cache, second, captcha("sess-2", b"second"), &dir.path().join("b.png"))
            .await?;
        assert!(
            store_captcha(&cache, first, captcha("sess-1", b"again"), &dir.path().join("c.png"))
                .await
                .is_err()
        );

        let session = cache.get(&store::CAPTCHA_SESSION).await?.unwrap();
        assert_eq!(session.session_id, "sess-2");
        Ok(())
    }

    #[tokio::test]
    async fn expired_attendance_is_shown_with_a_notice() -> anyhow::Result<()> {
        let cache = Cache::new(MemoryStore::new());
        let ttl = Duration::minutes(30);
        assert!(load_attendance(&cache, ttl).await.is_err());

        cache.set(&store::ATTENDANCE, &vec![lecture(18, 20)]).await?;
        let (records, notice) = load_attendance(&cache, ttl).await?;
        assert_eq!(records, vec![lecture(18, 20)]);
        assert_eq!(notice, None);

        let entry = StoredEntry {
            schema_version: store::SCHEMA_VERSION,
            value: serde_json::to_value(vec![lecture(10, 20)])?,
            updated_at: Utc::now() - Duration::minutes(90),
        };
        cache.inner().save(store::ATTENDANCE.name, &entry).await?;
        let (records, notice) = load_attendance(&cache, ttl).await?;
        assert_eq!(records, vec![lecture(10, 20)]);
        let notice = notice.unwrap();
        assert!(notice.starts_with("Attendance last synced 9"));
        assert!(notice.contains("erp-companion sync attendance"));
        Ok(())
    }

    #[tokio::test]
    async fn target_falls_back_to_stored_then_default() -> anyhow::Result<()> {
        let cache = Cache::new(MemoryStore::new());
        assert_eq!(resolve_target(&cache, None, 75.0).await?, 75.0);

        set_target(&cache, 85.0).await?;
        assert_eq!(resolve_target(&cache, None, 75.0).await?, 85.0);
        assert_eq!(resolve_target(&cache, Some(60.0), 75.0).await?, 60.0);

        assert!(set_target(&cache, 120.0).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn maddys_are_added_compared_and_removed() -> anyhow::Result<()> {
        let cache = Cache::new(MemoryStore::new());
        add_maddy(&cache, "Riya", &credentials()).await?;
        assert!(add_maddy(&cache, "Riya", &credentials()).await.is_err());

        cache
            .set(&store::TIMETABLE, &vec![entry("MON", "1", "CS101"), entry("MON", "3", "MA101")])
            .await?;
        assert!(compare_with_maddy(&cache, "Riya", "MON").await.is_err());

        let mut maddys = cache.get(&store::MADDYS).await?.unwrap();
        maddys[0].timetable = Some(vec![entry("MON", "2", "EE101"), entry("TUE", "4", "CH101")]);
        cache.set(&store::MADDYS, &maddys).await?;

        assert_eq!(compare_with_maddy(&cache, "Riya", "Mon").await?, vec!["4"]);

        remove_maddy(&cache, "Riya").await?;
        assert!(remove_maddy(&cache, "Riya").await.is_err());
        assert_eq!(cache.get(&store::MADDYS).await?, Some(vec![]));
        Ok(())
    }

    #[tokio::test]
    async fn import_rejects_over_attended_rows() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let cache = Cache::new(MemoryStore::new());

        let good = dir.path().join("good.csv");
        fs::write(
            &good,
            "course_code,course_name,ltps,total_conducted,total_attended,tcbr\n\
             CS101,Programming,L,20,18,0\n",
        )?;
        assert_eq!(import_attendance(&cache, &good).await?, 1);

        let bad = dir.path().join("bad.csv");
        fs::write(
            &bad,
            "course_code,course_name,ltps,total_conducted,total_attended,tcbr\n\
             CS101,Programming,L,20,25,0\n",
        )?;
        assert!(import_attendance(&cache, &bad).await.is_err());
        assert_eq!(cache.get(&store::ATTENDANCE).await?.map(|r| r.len()), Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn timetable_lists_requested_day_with_subject_names() -> anyhow::Result<()> {
        let cache = Cache::new(MemoryStore::new());
        assert!(show_timetable(&cache, Some("MON"), None).await.is_err());

        cache
            .set(&store::TIMETABLE, &vec![entry("MON", "1", "CS101"), entry("TUE", "2", "MA101")])
            .await?;
        let mut mappings = crate::models::SubjectMappings::new();
        mappings.insert("CS101".to_string(), "Programming".to_string());
        cache.set(&store::SUBJECT_MAPPINGS, &mappings).await?;

        let output = show_timetable(&cache, Some("monday"), None).await?;
        assert!(output.contains("CS101 (Programming)"));
        assert!(!output.contains("MA101"));

        let output = show_timetable(&cache, Some("Sun"), None).await?;
        assert_eq!(output, "No classes on Sun.\n");
        Ok(())
    }

    #[test]
    fn calculator_reports_guidance_and_projection() -> anyhow::Result<()> {
        let output = calculate(18, 20, 75.0, 2, 0)?;
        assert!(output.contains("Current: 90.00% (18/20)"));
        assert!(output.contains("Attend 0 more to reach 75%"));
        assert!(output.contains("Can skip 4 and stay at 75%"));
        assert!(output.contains("After attending 2 and missing 0: 90.91%"));

        assert!(calculate(21, 20, 75.0, 0, 0).is_err());
        Ok(())
    }

    #[test]
    fn attendance_view_shows_sections() {
        let records = vec![
            AttendanceRecord {
                course_code: "CS101".to_string(),
                course_name: "Programming".to_string(),
                ltps: "L".to_string(),
                total_conducted: 20,
                total_attended: 18,
                tcbr: 0,
            },
            AttendanceRecord {
                course_code: "CS101".to_string(),
                course_name: "Programming".to_string(),
                ltps: "P".to_string(),
                total_conducted: 0,
                total_attended: 0,
                tcbr: 0,
            },
        ];
        let courses = attendance::aggregate_courses(&records);
        let output = render_attendance(&courses, 75.0);

        assert!(output.contains("CS101 Programming: 90%"));
        assert!(output.contains("  L 18/20 - attend 0 more, can skip 4"));
        assert!(output.contains("  P 0/0 - no sessions yet"));
    }
}
