use framebridge_envelope::HeartbeatRecord;
use framebridge_transport::{Clock, SystemClock};
use serde::Serialize;

use crate::cmd::{duration_ms, parse_duration, HeartbeatArgs};
use crate::exit::{CliError, CliResult, DATA_INVALID, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::{print_record, OutputFormat};

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct HeartbeatReport {
    pub now_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_ms: Option<u64>,
    pub limit_ms: u64,
    pub fresh: bool,
    /// What a tab resolving its session would do.
    pub decision: &'static str,
}

/// Exits with [`HEALTH_CHECK_FAILED`] when the record is missing or stale.
pub fn run(args: HeartbeatArgs, format: OutputFormat) -> CliResult<i32> {
    let interval = duration_ms(parse_duration(&args.interval)?);
    let overlap = duration_ms(parse_duration(&args.overlap)?);
    let record = match args.record.as_deref() {
        Some(raw) => Some(HeartbeatRecord::decode(raw.trim()).ok_or_else(|| {
            CliError::new(DATA_INVALID, "heartbeat record must look like {\"time\": <epoch-ms>}")
        })?),
        None => None,
    };
    let now = args.now.unwrap_or_else(|| SystemClock.now_ms());

    let report = evaluate(record, now, interval, overlap);
    let fresh = report.fresh;
    print_record(&report, format);
    Ok(if fresh { SUCCESS } else { HEALTH_CHECK_FAILED })
}

pub fn evaluate(
    record: Option<HeartbeatRecord>,
    now: u64,
    interval_ms: u64,
    overlap_ms: u64,
) -> HeartbeatReport {
    let fresh = record.is_some_and(|record| record.is_fresh(now, interval_ms, overlap_ms));
    HeartbeatReport {
        now_ms: now,
        time: record.map(|record| record.time),
        age_ms: record.map(|record| now.saturating_sub(record.time)),
        limit_ms: interval_ms.saturating_add(overlap_ms),
        fresh,
        decision: if fresh { "reuse" } else { "create" },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_is_inclusive() {
        let record = Some(HeartbeatRecord::new(10_000));
        assert!(evaluate(record, 13_000, 1_000, 2_000).fresh);
        let stale = evaluate(record, 13_001, 1_000, 2_000);
        assert!(!stale.fresh);
        assert_eq!(stale.decision, "create");
        assert_eq!(stale.age_ms, Some(3_001));
    }

    #[test]
    fn record_from_a_fast_clock_means_create() {
        let report = evaluate(Some(HeartbeatRecord::new(60_000)), 10_000, 1_000, 2_000);
        assert!(!report.fresh);
        assert_eq!(report.age_ms, Some(0));
    }

    #[test]
    fn missing_record_means_create() {
        let report = evaluate(None, 5, 1_000, 2_000);
        assert!(!report.fresh);
        assert_eq!(report.time, None);
        assert_eq!(report.limit_ms, 3_000);
    }
}
