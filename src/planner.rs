//! # Read Span Planning
//!
//! Groups register definitions of one class into as few read requests as the
//! gateway allows.
//!
//! ## How It Works
//!
//! Definitions are sorted by address and merged greedily. A definition joins
//! the current run when it is *reachable*:
//!
//! - generic profile: `address <= run_end_exclusive + 1`, so one unused
//!   register between two values is read rather than costing a request;
//! - safe profile: `address == run_end_exclusive`, strictly contiguous.
//!
//! Overlapping definitions are always reachable. Each run is then cut into
//! spans no longer than the profile's span limit. Cuts only fall between
//! definitions, so a 32-bit value is never split across two requests.
//!
//! ## Example
//!
//! ```rust
//! use systemair_modbus::{planner, GatewayProfile, RegisterClass, RegisterDefinition};
//!
//! let defs = [
//!     RegisterDefinition::holding("a", 100),
//!     RegisterDefinition::holding("b", 101),
//!     RegisterDefinition::holding("c", 103),
//! ];
//!
//! let spans = planner::plan_spans(&defs, RegisterClass::Holding, &GatewayProfile::generic());
//! assert_eq!(spans.len(), 1);
//! assert_eq!((spans[0].start, spans[0].count), (100, 4));
//! ```

use crate::profile::GatewayProfile;
use crate::register_map::{RegisterClass, RegisterDefinition};

/// One read request worth of registers.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadSpan<'a> {
    pub class: RegisterClass,
    pub start: u16,
    pub count: u16,
    /// Definitions fully contained in `[start, start + count)`.
    pub definitions: Vec<&'a RegisterDefinition>,
}

impl ReadSpan<'_> {
    #[inline]
    pub fn end_exclusive(&self) -> u32 {
        u32::from(self.start) + u32::from(self.count)
    }
}

/// Plan the spans for all definitions of `class`.
pub fn plan_spans<'a, I>(
    definitions: I,
    class: RegisterClass,
    profile: &GatewayProfile,
) -> Vec<ReadSpan<'a>>
where
    I: IntoIterator<Item = &'a RegisterDefinition>,
{
    let mut sorted: Vec<&'a RegisterDefinition> = definitions
        .into_iter()
        .filter(|d| d.class == class)
        .collect();
    if sorted.is_empty() {
        return Vec::new();
    }
    sorted.sort_by_key(|d| d.address);

    let limit = u32::from(profile.span_limit());
    let mut spans = Vec::with_capacity(sorted.len() / 4 + 1);

    for run in merge_runs(&sorted, profile.bridge_gaps) {
        chunk_run(run, class, limit, &mut spans);
    }

    spans
}

/// Plan holding spans followed by input spans.
pub fn plan_all<'a>(
    definitions: &'a [RegisterDefinition],
    profile: &GatewayProfile,
) -> Vec<ReadSpan<'a>> {
    let mut spans = plan_spans(definitions, RegisterClass::Holding, profile);
    spans.extend(plan_spans(definitions, RegisterClass::Input, profile));
    spans
}

/// Split address-sorted definitions into reachable runs.
fn merge_runs<'s, 'a>(
    sorted: &'s [&'a RegisterDefinition],
    bridge_gaps: bool,
) -> Vec<&'s [&'a RegisterDefinition]> {
    let mut runs = Vec::new();
    let mut run_start = 0usize;
    let mut run_end = sorted[0].end_exclusive();

    for (i, def) in sorted.iter().enumerate().skip(1) {
        let addr = u32::from(def.address);
        let reachable = if bridge_gaps {
            addr <= run_end + 1
        } else {
            addr <= run_end
        };

        if reachable {
            run_end = run_end.max(def.end_exclusive());
        } else {
            runs.push(&sorted[run_start..i]);
            run_start = i;
            run_end = def.end_exclusive();
        }
    }
    runs.push(&sorted[run_start..]);

    runs
}

/// Cut one run into spans of at most `limit` registers, between definitions.
fn chunk_run<'a>(
    run: &[&'a RegisterDefinition],
    class: RegisterClass,
    limit: u32,
    out: &mut Vec<ReadSpan<'a>>,
) {
    let mut iter = run.iter();
    let Some(first) = iter.next() else {
        return;
    };

    let mut start = u32::from(first.address);
    let mut end = first.end_exclusive();
    let mut members = vec![*first];

    for def in iter {
        let merged_end = end.max(def.end_exclusive());
        if merged_end - start <= limit {
            end = merged_end;
            members.push(*def);
        } else {
            out.push(span(class, start, end, std::mem::take(&mut members)));
            start = u32::from(def.address);
            end = def.end_exclusive();
            members.push(*def);
        }
    }
    out.push(span(class, start, end, members));
}

fn span<'a>(
    class: RegisterClass,
    start: u32,
    end: u32,
    definitions: Vec<&'a RegisterDefinition>,
) -> ReadSpan<'a> {
    // start comes from a u16 address and end - start <= 125
    ReadSpan {
        class,
        start: start as u16,
        count: (end - start) as u16,
        definitions,
    }
}
