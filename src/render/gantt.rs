use std::fmt::Write;

use crate::graph::{ProjectTimeline, TimelineEntry};

/// Gantt task names end at ':' and lines end at newlines.
fn task_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            ':' | ';' | '#' | '\r' | '\n' => ' ',
            other => other,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

fn status_tag(entry: &TimelineEntry) -> &'static str {
    let status = entry.status.as_deref().map(str::to_ascii_uppercase);
    match status.as_deref() {
        Some("COMPLETED") | Some("CLOSED") | Some("DONE") => "done, ",
        Some("ACTIVE") | Some("IN_PROGRESS") => "active, ",
        _ => match entry.health.as_deref() {
            Some(h) if h.eq_ignore_ascii_case("red") => "crit, ",
            _ => "",
        },
    }
}

pub(super) fn gantt(timeline: &ProjectTimeline) -> String {
    let mut out = String::new();
    out.push_str("gantt\n");
    let title = timeline
        .entries
        .iter()
        .chain(&timeline.undated)
        .find(|e| e.depth == 0)
        .map(|e| task_name(&e.name))
        .unwrap_or_else(|| timeline.root_guid.clone());
    let _ = writeln!(out, "    title {}", title);
    out.push_str("    dateFormat YYYY-MM-DD\n");

    // The root and every top-level project open a section.
    let mut section: Option<String> = None;
    for (i, entry) in timeline.entries.iter().enumerate() {
        let Some(start) = entry.start else { continue };
        if entry.depth <= 1 || section.is_none() {
            let name = task_name(&entry.name);
            if section.as_deref() != Some(name.as_str()) {
                let _ = writeln!(out, "    section {}", name);
                section = Some(name);
            }
        }
        let end = match entry.planned_end {
            Some(end) if end >= start => end.format("%Y-%m-%d").to_string(),
            _ => "1d".to_string(),
        };
        let _ = writeln!(
            out,
            "    {} :{}t{}, {}, {}",
            task_name(&entry.name),
            status_tag(entry),
            i,
            start.format("%Y-%m-%d"),
            end
        );
    }

    for entry in &timeline.undated {
        let _ = writeln!(out, "    %% undated: {} ({})", task_name(&entry.name), entry.guid);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    type Ymd = (i32, u32, u32);

    fn entry(guid: &str, name: &str, depth: usize, start: Option<Ymd>, end: Option<Ymd>) -> TimelineEntry {
        let at = |(y, m, d): Ymd| Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap();
        TimelineEntry {
            guid: guid.to_string(),
            name: name.to_string(),
            depth,
            parent_guid: None,
            start: start.map(at),
            planned_end: end.map(at),
            status: None,
            health: None,
        }
    }

    #[test]
    fn test_gantt_text() {
        let mut done = entry("p1", "Inventory: phase 1", 1, Some((2025, 1, 6)), Some((2025, 2, 14)));
        done.status = Some("completed".to_string());
        let timeline = ProjectTimeline {
            root_guid: "p0".to_string(),
            entries: vec![
                entry("p0", "Migration", 0, Some((2025, 1, 6)), Some((2025, 6, 30))),
                done,
                entry("p3", "Cutover", 2, Some((2025, 6, 1)), None),
            ],
            undated: vec![entry("p2", "Comms", 1, None, None)],
        };

        let expected = [
            "gantt",
            "    title Migration",
            "    dateFormat YYYY-MM-DD",
            "    section Migration",
            "    Migration :t0, 2025-01-06, 2025-06-30",
            "    section Inventory  phase 1",
            "    Inventory  phase 1 :done, t1, 2025-01-06, 2025-02-14",
            "    Cutover :t2, 2025-06-01, 1d",
            "    %% undated: Comms (p2)",
            "",
        ]
        .join("\n");
        assert_eq!(gantt(&timeline), expected);
    }

    #[test]
    fn test_gantt_without_dated_root() {
        let mut late = entry("p1", "Late", 1, Some((2025, 3, 1)), Some((2025, 2, 1)));
        late.health = Some("RED".to_string());
        let timeline = ProjectTimeline {
            root_guid: "p0".to_string(),
            entries: vec![late],
            undated: Vec::new(),
        };
        let text = gantt(&timeline);
        assert!(text.contains("    title p0\n"));
        assert!(text.contains("    Late :crit, t0, 2025-03-01, 1d\n"), "{}", text);
    }
}
