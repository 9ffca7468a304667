use std::cell::RefCell;
use std::rc::Rc;

use framebridge_envelope::Payload;
use framebridge_peer::{
    HandlerContext, HandlerTable, OutboundConfig, RequestError, SessionConfig, Simulation,
    SimulationConfig,
};
use framebridge_schema::{sync_validator, TypeChecker, Validation, ValidatorRegistry};
use framebridge_transport::session_origin;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::cmd::{duration_ms, parse_duration, SimulateArgs};
use crate::exit::{peer_error, request_error, transport_error, CliError, CliResult, SUCCESS};
use crate::output::{print_record, print_rows, OutputFormat};

const ECHO_ACTION: &str = "Echo";

#[derive(Debug, Clone, Serialize)]
struct RequestRow {
    round: usize,
    tab: String,
    seq: usize,
    outcome: String,
    /// Session frame that answered.
    frame: Option<String>,
}

#[derive(Debug, Serialize)]
struct SimulationSummary {
    tabs: usize,
    rounds: usize,
    requests: usize,
    completed: usize,
    failed: usize,
    frames_booted: usize,
    delivered: usize,
    dropped: usize,
    owner: Option<String>,
    live_frame: Option<String>,
    heartbeat_ms: Option<u64>,
}

#[derive(Default)]
struct Recorder {
    rows: Vec<RequestRow>,
    first_error: Option<RequestError>,
}

type Rows = Rc<RefCell<Recorder>>;

/// Exits non-zero when any request failed, with the exit code of the first
/// failure.
pub fn run(args: SimulateArgs, format: OutputFormat) -> CliResult<i32> {
    if args.tabs == 0 {
        return Err(CliError::usage("--tabs must be at least 1"));
    }
    let timeout = parse_duration(&args.timeout)?;
    let pause = parse_duration(&args.pause)?;
    session_origin(&args.page_origin, &args.subdomain)
        .map_err(|err| transport_error("cannot derive session origin", err))?;

    let mut sim = Simulation::new(simulation_config(&args, timeout));
    let tabs: Vec<String> = (1..=args.tabs).map(|n| format!("tab-{n}")).collect();
    for tab in &tabs {
        sim.open_tab(tab)
            .map_err(|err| peer_error(&format!("cannot open {tab}"), err))?;
    }

    let rows: Rows = Rc::default();
    run_round(&mut sim, 1, &tabs, args.requests, &rows);
    let mut rounds = 1;

    if args.crash_owner || args.unload_owner {
        if let Some(owner) = owner(&sim) {
            if args.crash_owner {
                info!(tab = %owner, "crashing owner tab");
                sim.crash_tab(&owner);
            } else {
                info!(tab = %owner, "unloading owner tab");
                sim.unload_tab(&owner);
            }
        }
        sim.advance(duration_ms(pause));

        let fresh = format!("tab-{}", args.tabs + 1);
        sim.open_tab(&fresh)
            .map_err(|err| peer_error(&format!("cannot open {fresh}"), err))?;
        rounds += 1;
        run_round(&mut sim, rounds, &[fresh], args.requests, &rows);
    }

    // Anything still pending expires here.
    sim.advance(duration_ms(timeout));

    let Recorder { rows, first_error } = rows.take();
    let completed = rows.iter().filter(|row| row.outcome == "ok").count();
    let failed = rows.len() - completed;
    let stats = sim.stats();

    if args.requests_detail {
        print_rows(&rows, format);
    } else {
        print_record(
            &SimulationSummary {
                tabs: args.tabs,
                rounds,
                requests: rows.len(),
                completed,
                failed,
                frames_booted: stats.frames_booted,
                delivered: stats.delivered,
                dropped: stats.dropped,
                owner: owner(&sim),
                live_frame: sim.live_frame(),
                heartbeat_ms: sim
                    .heartbeat()
                    .and_then(|raw| framebridge_envelope::HeartbeatRecord::decode(&raw))
                    .map(|record| record.time),
            },
            format,
        );
    }

    match first_error {
        Some(err) => {
            let err = request_error("simulated request failed", &err);
            warn!(failed, error = %err, "simulation finished with failures");
            Ok(err.code)
        }
        None => Ok(SUCCESS),
    }
}

fn simulation_config(args: &SimulateArgs, timeout: std::time::Duration) -> SimulationConfig {
    let mut session = SessionConfig::new(args.page_origin.clone());
    session.subdomain = args.subdomain.clone();

    let mut config = SimulationConfig::new(args.page_origin.clone());
    config.session = session;
    config.session_handlers = Rc::new(|frame: &str| {
        let frame = frame.to_string();
        let mut handlers = HandlerTable::new();
        handlers.register(ECHO_ACTION, move |data: Payload, ctx: HandlerContext| {
            let mut reply = data;
            reply.insert("frame".to_string(), Value::String(frame.clone()));
            ctx.reply_success(reply);
        });
        handlers
    });
    config.page_validators = Rc::new(|| {
        let mut validators = ValidatorRegistry::new();
        validators.register(
            ECHO_ACTION,
            sync_validator(|payload: &Payload| {
                if TypeChecker::new().probe(&[(payload.get("frame"), "string")]) {
                    Validation::Accept
                } else {
                    Validation::Reject("frame: expected string".to_string())
                }
            }),
        );
        validators
    });
    config.page_outbound = OutboundConfig {
        default_timeout: timeout,
        ..OutboundConfig::new("page")
    };
    config
}

fn run_round(sim: &mut Simulation, round: usize, tabs: &[String], requests: usize, rows: &Rows) {
    for tab in tabs {
        for seq in 0..requests {
            let mut data = Payload::new();
            data.insert("tab".to_string(), Value::String(tab.clone()));
            data.insert("seq".to_string(), Value::from(seq));

            let rows = Rc::clone(rows);
            let label = tab.clone();
            sim.send(tab, ECHO_ACTION, data, move |outcome| {
                let mut recorder = rows.borrow_mut();
                let (outcome, frame) = match outcome {
                    Ok(payload) => (
                        "ok".to_string(),
                        payload
                            .get("frame")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                    ),
                    Err(err) => {
                        let code = err.code().to_string();
                        recorder.first_error.get_or_insert(err);
                        (code, None)
                    }
                };
                recorder.rows.push(RequestRow {
                    round,
                    tab: label,
                    seq,
                    outcome,
                    frame,
                });
            });
        }
    }
}

fn owner(sim: &Simulation) -> Option<String> {
    sim.tab_ids()
        .into_iter()
        .find(|tab| sim.tab(tab).is_some_and(|zone| zone.coordinator.is_owner()))
        .map(str::to_string)
}
