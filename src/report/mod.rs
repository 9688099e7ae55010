//! The report assembler (§4.C11), grounded on `LeakSani::operator<<` and
//! `formatter.hpp`.

mod fmt_bytes;
mod style;

use fmt_bytes::bytes_to_string;
use style::Style;

use crate::classify::{LeakKindStats, RecordArena};
use crate::config::Config;
use crate::leak_kind::LeakKind;

/// Assembles the full leak report as a single string — a summary line,
/// then grouped direct-leak sections in unreachable → global → tls →
/// reachable order (each followed by its indirect tree if
/// `show_indirects`), then contextual hints.
pub fn assemble(arena: &RecordArena, stats: &LeakKindStats, config: &Config) -> String {
    let mut out = String::new();
    let mut callstack_capped = false;

    write_summary(&mut out, stats, config);
    out.push('\n');

    write_group(&mut out, arena, stats, config, &stats.lost_roots, LeakKind::UnreachableDirect, "lost", &mut callstack_capped);
    write_group(&mut out, arena, stats, config, &stats.global_roots, LeakKind::GlobalDirect, "global", &mut callstack_capped);
    write_group(&mut out, arena, stats, config, &stats.tls_roots, LeakKind::TlsDirect, "thread-local value", &mut callstack_capped);
    if config.show_reachables {
        write_group(&mut out, arena, stats, config, &stats.stack_roots, LeakKind::ReachableDirect, "stack", &mut callstack_capped);
    }

    write_hints(&mut out, stats, config, callstack_capped);
    out
}

/// Prints `report` to stdout or stderr per [`Config::print_cout`].
pub fn print(report: &str, config: &Config) {
    if config.print_cout {
        println!("{report}");
    } else {
        eprintln!("{report}");
    }
}

fn write_summary(out: &mut String, stats: &LeakKindStats, config: &Config) {
    let total = stats.total();
    if total == 0 {
        out.push_str(&style::format(&[Style::Green, Style::Bold], "No leaks detected.\n"));
        return;
    }
    let lost_line = format!(
        "{} leaks detected, totalling {}",
        style::format(&[Style::Red, Style::Bold], &stats.total_lost().to_string()),
        bytes_to_string(stats.lost_bytes() as u64),
    );
    out.push_str(&lost_line);
    out.push('\n');
    if config.show_reachables {
        out.push_str(&format!(
            "{} reachable allocations still alive, totalling {}\n",
            stats.total_reachable(),
            bytes_to_string(stats.reachable_bytes() as u64),
        ));
    }
}

fn write_group(
    out: &mut String,
    arena: &RecordArena,
    stats: &LeakKindStats,
    config: &Config,
    roots: &[usize],
    direct_kind: LeakKind,
    label: &str,
    callstack_capped: &mut bool,
) {
    if roots.is_empty() {
        return;
    }
    let heading = style::format(&[Style::Underlined, Style::Bold], &format!("{} ({} direct)\n", label, roots.len()));
    out.push_str(&heading);

    for &idx in roots.iter().take(config.leak_count_cap) {
        let record = arena.get(idx);
        write_record_line(out, record, config, 0, callstack_capped);
        if config.show_indirects {
            for &child_idx in &record.via_me {
                let child = arena.get(child_idx);
                if child.leak_kind.is_indirect() && !child.suppressed {
                    write_record_line(out, child, config, 1, callstack_capped);
                }
            }
        }
    }
    if roots.len() > config.leak_count_cap {
        out.push_str(&format!(
            "  ... and {} more {label} leaks not shown (raise LSAN_LEAK_COUNT to see them)\n",
            roots.len() - config.leak_count_cap
        ));
    }
    let _ = direct_kind;
    let _ = stats;
    out.push('\n');
}

fn write_record_line(
    out: &mut String,
    record: &crate::record::AllocationRecord,
    config: &Config,
    indent: usize,
    callstack_capped: &mut bool,
) {
    let pad = "  ".repeat(indent + 1);
    out.push_str(&format!(
        "{pad}{} leaked at {:#x} ({})\n",
        record.leak_kind,
        record.pointer(),
        bytes_to_string(record.size() as u64),
    ));
    if config.print_exit_point {
        if record.allocation_stack().depth() >= config.callstack_depth_cap {
            *callstack_capped = true;
        }
        out.push_str(&record.allocation_stack().format(&format!("{pad}  ")));
    }
}

fn write_hints(out: &mut String, stats: &LeakKindStats, config: &Config, callstack_capped: bool) {
    let mut hints = Vec::new();
    if !stats.unsuspended_threads.is_empty() {
        hints.push(format!(
            "{} thread(s) could not be suspended during the scan and were skipped: {:?}",
            stats.unsuspended_threads.len(),
            stats.unsuspended_threads
        ));
    }
    if !stats.resume_failed_threads.is_empty() {
        hints.push(format!(
            "{} thread(s) failed to resume after the scan: {:?}",
            stats.resume_failed_threads.len(),
            stats.resume_failed_threads
        ));
    }
    if !config.show_indirects && stats.total() > 0 {
        hints.push("set LSAN_INDIRECT_LEAKS=true to also show indirectly-leaked allocations".to_string());
    }
    if callstack_capped {
        hints.push(format!(
            "call stacks are capped at {} frames; raise LSAN_CALLSTACK_SIZE if they look truncated",
            config.callstack_depth_cap
        ));
    }
    if !config.print_formatted {
        hints.push("coloured output is disabled because the destination is not a terminal (or LSAN_PRINT_FORMATTED=false)".to_string());
    }
    if hints.is_empty() {
        return;
    }
    out.push_str(&style::format(&[Style::Greyed, Style::Italic], "hints:\n"));
    for hint in hints {
        out.push_str(&format!("  - {hint}\n"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callstack::CallStack;
    use crate::record::AllocationRecord;

    #[test]
    fn no_leaks_prints_clean_summary() {
        let arena = RecordArena::new(Vec::new());
        let stats = LeakKindStats::default();
        let config = Config::default();
        let report = assemble(&arena, &stats, &config);
        assert!(report.contains("No leaks detected"));
    }

    #[test]
    fn lost_section_lists_every_root_up_to_the_cap() {
        let mut record = AllocationRecord::new(0x1000, 8, 1, CallStack::capture(2));
        record.leak_kind = LeakKind::UnreachableDirect;
        let arena = RecordArena::new(vec![record]);
        let mut stats = LeakKindStats::default();
        stats.lost = 1;
        stats.bytes_lost = 8;
        stats.lost_roots = vec![0];
        let config = Config::default();
        let report = assemble(&arena, &stats, &config);
        assert!(report.contains("lost (1 direct)"));
        assert!(report.contains("leaked at 0x1000"));
    }

    #[test]
    fn hints_mention_unsuspended_threads() {
        let arena = RecordArena::new(Vec::new());
        let mut stats = LeakKindStats::default();
        stats.unsuspended_threads = vec![7];
        let config = Config::default();
        let report = assemble(&arena, &stats, &config);
        assert!(report.contains("could not be suspended"));
    }

    #[test]
    fn callstack_cap_hint_only_fires_when_a_formatted_stack_actually_hit_it() {
        let mut record = AllocationRecord::new(0x2000, 8, 1, CallStack::capture(1));
        record.leak_kind = LeakKind::UnreachableDirect;
        let arena = RecordArena::new(vec![record]);
        let mut stats = LeakKindStats::default();
        stats.lost = 1;
        stats.bytes_lost = 8;
        stats.lost_roots = vec![0];

        let mut capped_config = Config::default();
        capped_config.print_exit_point = true;
        capped_config.callstack_depth_cap = 1;
        let report = assemble(&arena, &stats, &capped_config);
        assert!(report.contains("raise LSAN_CALLSTACK_SIZE"), "report was:\n{report}");

        // Same low cap, but exit points are never printed, so no formatted
        // stack ever actually hits it.
        let mut unprinted_config = Config::default();
        unprinted_config.callstack_depth_cap = 1;
        let report = assemble(&arena, &stats, &unprinted_config);
        assert!(!report.contains("LSAN_CALLSTACK_SIZE"), "report was:\n{report}");
    }
}
