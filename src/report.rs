//! Plain-text rendering of the simulation statistics.

use std::fmt;

use crate::stats::{ratio, AccessClasses, CacheReport, GeneralReport};

// width of the longest label, used to line the rates up
const LABEL_WIDTH: usize = 47;
const RATE_WIDTH: usize = 7;
const COUNT_WIDTH: usize = 6;

fn percent(r: f64) -> String {
    if r.is_nan() {
        "nan%".to_string()
    } else {
        format!("{:.2}%", r * 100.0)
    }
}

/// Twelve significant digits, always with a decimal point or an exponent.
fn float(v: f64) -> String {
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    // round first, so the exponent already reflects any carry
    let sci = format!("{:.11e}", v);
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);

    let trim = |s: &str| match s.contains('.') {
        true => s.trim_end_matches('0').trim_end_matches('.').to_string(),
        false => s.to_string(),
    };
    if !(-4..12).contains(&exp) {
        let sign = if exp < 0 { '-' } else { '+' };
        return format!("{}e{}{:02}", trim(mantissa), sign, exp.abs());
    }
    let fixed = trim(&format!("{:.*}", (11 - exp) as usize, v));
    if fixed.contains('.') {
        fixed
    } else {
        fixed + ".0"
    }
}

fn pad(width: usize, text: &str) -> String {
    " ".repeat(width.saturating_sub(text.len()))
}

/// `label: rate    (  num of   den)`, aligned across lines.
pub fn format_line(label: &str, numerator: u64, denominator: u64) -> String {
    let rate = percent(ratio(numerator, denominator));
    // labels longer than LABEL_WIDTH eat into the rate column
    let spaces = (LABEL_WIDTH as isize - label.len() as isize)
        + (RATE_WIDTH as isize - rate.len() as isize);
    let spacer = " ".repeat(spaces.max(0) as usize);
    let (num, den) = (numerator.to_string(), denominator.to_string());
    format!(
        "{}: {}{}({}{} of {}{})",
        label,
        rate,
        spacer,
        pad(COUNT_WIDTH, &num),
        num,
        pad(COUNT_WIDTH, &den),
        den
    )
}

fn write_classes(f: &mut fmt::Formatter<'_>, kind: &str, c: &AccessClasses, accesses: u64) -> fmt::Result {
    writeln!(f, "{}", format_line(&format!("\t{} private line access rate", kind), c.private, accesses))?;
    writeln!(
        f,
        "{}",
        format_line(&format!("\t{} shared read-only line access rate", kind), c.shared_read_only, accesses)
    )?;
    writeln!(
        f,
        "{}",
        format_line(&format!("\t{} shared read-write line access rate", kind), c.shared_read_write, accesses)
    )
}

/// The full report: per-cache statistics, general statistics, latency.
pub struct Report<'a> {
    pub caches: &'a [CacheReport],
    pub general: &'a GeneralReport,
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "-".repeat(21);
        writeln!(f, "{}\nSimulation Statistics\n{}\n", rule, rule)?;

        writeln!(f, "Per Cache Statistics:\n")?;
        for c in self.caches {
            writeln!(f, "Cache {}", c.id)?;
            writeln!(f, "{}", format_line("\tMiss rate", c.misses, c.accesses))?;
            writeln!(f, "{}", format_line("\tRead miss rate", c.read_misses, c.reads))?;
            writeln!(f, "{}", format_line("\tWrite miss rate", c.write_misses, c.writes))?;
            writeln!(f, "{}", format_line("\tCoherence miss rate", c.coherence_misses, c.misses))?;
            write_classes(f, "Dynamic", &c.dynamic, c.accesses)?;
            write_classes(f, "Static", &c.static_, c.accesses)?;
            writeln!(f)?;
        }

        let g = self.general;
        writeln!(f, "General Statistics:\n")?;
        write_classes(f, "Dynamic", &g.dynamic, g.accesses)?;
        write_classes(f, "Static", &g.static_, g.accesses)?;
        let s = &g.sharing;
        writeln!(f, "{}", format_line("\tAddresses addressed by one processor", s.by_one_processor, s.addresses))?;
        writeln!(f, "{}", format_line("\tAddresses addressed by two processors", s.by_two_processors, s.addresses))?;
        writeln!(
            f,
            "{}",
            format_line(
                "\tAddresses addressed by more than two processors",
                s.by_more_than_two_processors,
                s.addresses
            )
        )?;

        let l = &g.latency;
        writeln!(f, "\nLatency Statistics\n")?;
        match l.bottleneck_cache {
            Some(id) => writeln!(f, "\tProgram latency: {} cycles (cache {})", l.max_latency, id)?,
            None => writeln!(f, "\tProgram latency: {} cycles", l.max_latency)?,
        }
        writeln!(f, "\tWrite buffer drains: {}", l.write_buffer_drains)?;
        let average = if l.average_writes_drained.is_nan() {
            "nan".to_string()
        } else {
            format!("{:.2}", l.average_writes_drained)
        };
        writeln!(f, "\tAverage writes drained: {}", average)?;
        writeln!(f, "\tMean latency between writes: {}", float(l.mean_latency_between_writes))?;
        writeln!(f, "\tMedian latency between writes: {}", float(l.median_latency_between_writes))?;
        writeln!(f, "\tWrite buffer snoops: {}", l.write_buffer_snoops)
    }
}
