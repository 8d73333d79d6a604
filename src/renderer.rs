//! Walks the journal document into the coloured text protocol the shell
//! harness prints to the terminal (`createLog`, §4.5).

use std::io::IsTerminal;

use colored::Colorize;

use crate::timefmt;
use crate::types::Severity;
use crate::xml::Element;

const RULE_WIDTH: usize = 80;
const LABEL_WIDTH: usize = 10;

/// Walk `doc` and produce the full test protocol report. Colour escapes are
/// included only when `buffered` is false and stdout is a TTY — §4.5 and the
/// "renderer dual mode" design note.
pub fn create_log(
    doc: &Element,
    severity_threshold: Severity,
    full_journal: bool,
    buffered: bool,
) -> String {
    let color = !buffered && std::io::stdout().is_terminal();
    let allowed = Severity::upward_closure(severity_threshold);

    let mut out = String::new();
    out.push_str(&head_log("TEST PROTOCOL", color));

    let mut phases_processed = 0u32;
    let mut phases_failed = 0u32;

    for child in doc.children() {
        match child.name() {
            "test_id" => out.push_str(&field_line("Test run ID", child.text(), color)),
            "package" => out.push_str(&field_line("Package", child.text(), color)),
            "testname" => out.push_str(&field_line("Test name", child.text(), color)),
            "pkgdetails" => out.push_str(&field_line("Installed", child.text(), color)),
            "release" => out.push_str(&field_line("Distro", child.text(), color)),
            "starttime" => out.push_str(&field_line("Test started", child.text(), color)),
            "endtime" => out.push_str(&field_line("Test finished", child.text(), color)),
            "arch" => out.push_str(&field_line("Architecture", child.text(), color)),
            "hw_cpu" if full_journal => out.push_str(&field_line("CPUs", child.text(), color)),
            "hw_ram" if full_journal => out.push_str(&field_line("RAM size", child.text(), color)),
            "hw_hdd" if full_journal => out.push_str(&field_line("HDD size", child.text(), color)),
            "beakerlib_rpm" => out.push_str(&field_line("beakerlib RPM", child.text(), color)),
            "beakerlib_redhat_rpm" => {
                out.push_str(&field_line("bl-redhat RPM", child.text(), color))
            }
            "testversion" => out.push_str(&field_line("Test version", child.text(), color)),
            "testbuild" => out.push_str(&field_line("Test built", child.text(), color)),
            "hostname" => out.push_str(&field_line("Hostname", child.text(), color)),
            "plugin" => out.push_str(&field_line("Plugin", child.text(), color)),
            "purpose" => {
                out.push_str(&head_log("Test description", color));
                out.push_str(&wrap(child.text(), RULE_WIDTH));
                out.push('\n');
            }
            "log" => {
                for node in child.children() {
                    match node.name() {
                        "message" => {
                            let severity = node
                                .get_attr("severity")
                                .and_then(|s| s.parse::<Severity>().ok())
                                .unwrap_or(Severity::Log);
                            if allowed.contains(&severity) {
                                out.push_str(&log_line(node.text(), severity.as_str(), color));
                            }
                        }
                        "test" => {
                            out.push_str(&log_line(
                                "Assertion not in phase",
                                "WARNING",
                                color,
                            ));
                            let label = if node.text() == "FAIL" { "FAIL" } else { "PASS" };
                            out.push_str(&log_line(
                                node.get_attr("message").unwrap_or(""),
                                label,
                                color,
                            ));
                        }
                        "metric" => {
                            out.push_str(&log_line(
                                &format!(
                                    "{}: {}",
                                    node.get_attr("name").unwrap_or(""),
                                    node.text()
                                ),
                                "METRIC",
                                color,
                            ));
                        }
                        "phase" => {
                            phases_processed += 1;
                            let (rendered, failed) = render_phase(node, &allowed, color);
                            if failed > 0 {
                                phases_failed += 1;
                            }
                            out.push_str(&rendered);
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    let test_name = doc.first_child("testname").map(Element::text).unwrap_or("");
    out.push_str(&head_log(test_name, color));
    out.push_str(&log_line(
        &format!(
            "Phases: {} good, {} bad",
            phases_processed - phases_failed,
            phases_failed
        ),
        "LOG",
        color,
    ));
    let overall = if phases_failed == 0 { "PASS" } else { "FAIL" };
    out.push_str(&log_line(&format!("RESULT: {test_name}"), overall, color));

    out
}

fn render_phase(phase: &Element, allowed: &[Severity], color: bool) -> (String, u32) {
    let name = phase.get_attr("name").unwrap_or("");
    let result = phase.get_attr("result").unwrap_or("");
    let starttime = phase.get_attr("starttime").unwrap_or("");
    let endtime_attr = phase.get_attr("endtime").unwrap_or("");
    let endtime_owned;
    let endtime = if endtime_attr.is_empty() {
        endtime_owned = timefmt::now();
        endtime_owned.as_str()
    } else {
        endtime_attr
    };

    let mut out = String::new();
    out.push_str(&head_log(name, color));

    let mut passed = 0u32;
    let mut failed = 0u32;
    for node in phase.children() {
        match node.name() {
            "message" => {
                let severity = node
                    .get_attr("severity")
                    .and_then(|s| s.parse::<Severity>().ok())
                    .unwrap_or(Severity::Log);
                if allowed.contains(&severity) {
                    out.push_str(&log_line(node.text(), severity.as_str(), color));
                }
            }
            "test" => {
                let message = node.get_attr("message").unwrap_or("");
                if node.text() == "FAIL" {
                    out.push_str(&log_line(message, "FAIL", color));
                    failed += 1;
                } else {
                    out.push_str(&log_line(message, "PASS", color));
                    passed += 1;
                }
            }
            _ => {}
        }
    }

    let duration = match (timefmt::parse(starttime), timefmt::parse(endtime)) {
        (Some(start), Some(end)) => Some((end - start).num_seconds()),
        _ => None,
    };
    let formatted_duration = match duration {
        Some(secs) => format_duration(secs),
        None => "duration unknown (error when computing)".to_string(),
    };

    out.push_str(&log_line(
        &format!("Duration: {formatted_duration}"),
        "LOG",
        color,
    ));
    out.push_str(&log_line(
        &format!("Assertions: {passed} good, {failed} bad"),
        "LOG",
        color,
    ));
    out.push_str(&log_line(&format!("RESULT: {name}"), result, color));

    (out, failed)
}

fn format_duration(mut secs: i64) -> String {
    let mut out = String::new();
    let hours = secs / 3600;
    if hours > 0 {
        out.push_str(&format!("{hours}h "));
        secs %= 3600;
    }
    let minutes = secs / 60;
    if minutes > 0 {
        out.push_str(&format!("{minutes}m "));
        secs %= 60;
    }
    out.push_str(&format!("{secs}s"));
    out
}

fn field_line(label: &str, value: &str, color: bool) -> String {
    log_line(&format!("{label:<14}: {value}"), "LOG", color)
}

/// `:: [ CENTERED ] :: <line>\n` per line of `message`, coloured when
/// `prefix` names a severity the terminal highlights.
pub(crate) fn log_line(message: &str, prefix: &str, color: bool) -> String {
    let label = center(prefix, LABEL_WIDTH);
    let label = if color {
        match prefix {
            "PASS" => label.green().to_string(),
            "FAIL" => label.red().to_string(),
            "INFO" => label.blue().to_string(),
            "WARNING" => label.yellow().to_string(),
            _ => label,
        }
    } else {
        label
    };

    let mut out = String::new();
    for line in message.split('\n') {
        out.push_str(":: [");
        out.push_str(&label);
        out.push_str("] :: ");
        out.push_str(line);
        out.push('\n');
    }
    out
}

pub(crate) fn head_log(label: &str, color: bool) -> String {
    let rule = ":".repeat(RULE_WIDTH);
    let mut out = String::new();
    out.push('\n');
    out.push_str(&rule);
    out.push('\n');
    out.push_str(&log_line(label, "LOG", color));
    out.push_str(&rule);
    out.push_str("\n\n");
    out
}

/// Centre `s` within `width`, matching Python's `str.center` for the even
/// widths this crate only ever uses (no left/right bias correction needed).
fn center(s: &str, width: usize) -> String {
    let len = s.chars().count();
    if len >= width {
        return s.to_string();
    }
    let margin = width - len;
    let left = margin / 2;
    let right = margin - left;
    format!("{}{s}{}", " ".repeat(left), " ".repeat(right))
}

/// Greedy word wrap at `width` columns, splitting only on literal spaces —
/// embedded newlines in `text` are preserved, matching the original's
/// column-since-last-newline accounting.
fn wrap(text: &str, width: usize) -> String {
    let words: Vec<&str> = text.split(' ').collect();
    let Some((first, rest)) = words.split_first() else {
        return String::new();
    };
    let mut result = first.to_string();
    for word in rest {
        let column = match result.rfind('\n') {
            Some(idx) => result[idx + 1..].chars().count(),
            None => result.chars().count(),
        };
        let word_first_line_len = word.split('\n').next().unwrap_or("").chars().count();
        if column + word_first_line_len >= width {
            result.push('\n');
        } else {
            result.push(' ');
        }
        result.push_str(word);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_matches_python_str_center() {
        assert_eq!(center("PASS", 10), "  PASS  ");
        assert_eq!(center("WARNING", 10), " WARNING  ");
        assert_eq!(center("LOG", 10), "   LOG    ");
    }

    #[test]
    fn wrap_breaks_greedily_on_spaces() {
        let text = "one two three four five";
        let wrapped = wrap(text, 10);
        assert!(wrapped.lines().all(|l| l.chars().count() <= 14));
        assert!(wrapped.contains('\n'));
    }

    #[test]
    fn format_duration_drops_zero_leading_units() {
        assert_eq!(format_duration(5), "5s");
        assert_eq!(format_duration(65), "1m 5s");
        assert_eq!(format_duration(3665), "1h 1m 5s");
        assert_eq!(format_duration(3601), "1h 1s");
    }

    #[test]
    fn create_log_reports_pass_for_all_green_run() {
        let mut doc = Element::new("BEAKER_TEST");
        doc.push_child(Element::new("testname").with_text("/a/b/foo/bar"));
        let log = doc.push_child(Element::new("log"));
        let phase = log.push_child(
            Element::new("phase")
                .with_attr("name", "check")
                .with_attr("result", "PASS")
                .with_attr("type", "FAIL")
                .with_attr("starttime", "2024-01-01 00:00:00 UTC")
                .with_attr("endtime", "2024-01-01 00:00:05 UTC")
                .with_attr("score", "0"),
        );
        phase.push_child(
            Element::new("test")
                .with_attr("message", "eq")
                .with_text("PASS"),
        );

        let rendered = create_log(&doc, Severity::Warning, true, true);
        assert!(rendered.contains("Test name     : /a/b/foo/bar"));
        assert!(rendered.contains("RESULT: check"));
        assert!(rendered.contains("RESULT: /a/b/foo/bar"));
        assert!(!rendered.contains("\u{1b}["));
    }
}
