//! Commodity Headless Simulation Harness
//!
//! Validates the bundled tuning and runs whole-day scenarios through the
//! engine. Runs entirely in-process with no game or networking.
//!
//! Usage:
//!   cargo run -p commodity-simtest
//!   cargo run -p commodity-simtest -- --verbose

use commodity_core::prelude::*;
use commodity_logic::constants::TICKS_PER_HOUR;
use commodity_logic::context::{InteractionSystem, Priority};
use commodity_logic::load_tuning_json;
use commodity_logic::message::ProgressUpdate;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_subscriber::EnvFilter;

// ── Tuning (same JSON the engine tests use) ─────────────────────────────
const TUNING_JSON: &str = include_str!("../../../data/commodity_tuning.json");

const HUNGER: u64 = 1;
const ENERGY: u64 = 2;
const BOREDOM: u64 = 3;

// ── Logging ─────────────────────────────────────────────────────────────

/// Route `log` records through a tracing fmt subscriber on stderr.
/// `--verbose` forces debug output; otherwise `RUST_LOG` applies, defaulting to warnings.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// ── Test harness ────────────────────────────────────────────────────────

struct TestResult {
    name: String,
    passed: bool,
    detail: String,
}

fn check(name: &str, passed: bool, detail: impl Into<String>) -> TestResult {
    TestResult {
        name: name.into(),
        passed,
        detail: detail.into(),
    }
}

fn main() {
    let verbose = std::env::args().any(|a| a == "--verbose");
    init_logging(verbose);
    println!("=== Commodity Simulation Harness ===\n");

    let mut results = Vec::new();

    // 1. Tuning validation
    results.extend(validate_tuning(verbose));

    // 2. Hunger through one day
    results.extend(validate_hunger_day(verbose));

    // 3. Energy distress and failure
    results.extend(validate_energy_failure(verbose));

    // 4. Transient lifecycle
    results.extend(validate_transient_lifecycle(verbose));

    // 5. Save, absence and catch-up
    results.extend(validate_save_catch_up(verbose));

    // 6. Progress messages
    results.extend(validate_progress_messages(verbose));

    // ── Summary ──
    println!();
    let passed = results.iter().filter(|r| r.passed).count();
    let failed = results.iter().filter(|r| !r.passed).count();
    let total = results.len();

    for r in &results {
        let icon = if r.passed { "✓" } else { "✗" };
        if !r.passed || verbose {
            println!("  {} {}: {}", icon, r.name, r.detail);
        }
    }

    println!(
        "\n=== RESULT: {}/{} passed, {} failed ===",
        passed, total, failed
    );

    if failed > 0 {
        std::process::exit(1);
    }
}

fn new_engine() -> Result<CommodityEngine, TestResult> {
    CommodityEngine::from_tuning_json(TUNING_JSON).map_err(|e| {
        let detail = format!("tuning error: {}", e);
        check("engine_from_tuning", false, detail)
    })
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

// ── 1. Tuning ───────────────────────────────────────────────────────────

fn validate_tuning(verbose: bool) -> Vec<TestResult> {
    println!("--- Tuning ---");
    let mut results = Vec::new();

    let raw: serde_json::Value = match serde_json::from_str(TUNING_JSON) {
        Ok(v) => v,
        Err(e) => {
            let detail = format!("JSON parse error: {}", e);
            results.push(check("tuning_parse", false, detail));
            return results;
        }
    };
    let declared = raw["commodities"].as_array().map(|a| a.len()).unwrap_or(0);

    let tuning = match load_tuning_json(TUNING_JSON) {
        Ok(t) => t,
        Err(e) => {
            results.push(check("tuning_load", false, format!("load error: {}", e)));
            return results;
        }
    };

    results.push(check(
        "tuning_all_loaded",
        tuning.len() == declared && declared >= 3,
        format!("{} of {} commodities loaded", tuning.len(), declared),
    ));

    // Bundled tuning must need no fallbacks
    let with_issues: Vec<_> = tuning.iter().filter(|c| !c.issues().is_empty()).collect();
    results.push(check(
        "tuning_no_fallbacks",
        with_issues.is_empty(),
        if with_issues.is_empty() {
            "no tuning issues".to_string()
        } else {
            with_issues
                .iter()
                .map(|c| format!("{}: {}", c.name, c.issues().len()))
                .collect::<Vec<_>>()
                .join(", ")
        },
    ));

    // States start at the minimum and ascend
    let bad_states: Vec<_> = tuning
        .iter()
        .filter(|c| {
            c.states.first().map(|s| s.lower_bound) != Some(c.min_value)
                || c.states.windows(2).any(|w| w[0].lower_bound >= w[1].lower_bound)
        })
        .map(|c| c.name.as_str())
        .collect();
    results.push(check(
        "tuning_states_ascending",
        bad_states.is_empty(),
        if bad_states.is_empty() {
            "every band list starts at min and ascends".to_string()
        } else {
            format!("bad bands: {}", bad_states.join(", "))
        },
    ));

    // Curves stay inside the commodity's range
    let bad_curves: Vec<_> = tuning
        .iter()
        .filter(|c| {
            c.auto_satisfy.as_ref().is_some_and(|curve| {
                curve
                    .points
                    .iter()
                    .any(|p| p.value < c.min_value || p.value > c.max_value)
            })
        })
        .map(|c| c.name.as_str())
        .collect();
    results.push(check(
        "tuning_curves_in_range",
        bad_curves.is_empty(),
        format!("{} curves out of range", bad_curves.len()),
    ));

    if verbose {
        for c in &tuning {
            let bands: Vec<_> = c.states.iter().map(|s| s.name.as_str()).collect();
            println!(
                "  {:8} [{}, {}] rate {} -> {}: {}",
                c.name,
                c.min_value,
                c.max_value,
                c.decay_rate,
                c.convergence_value,
                bands.join(" < ")
            );
        }
    }

    results
}

// ── 2. Hunger Day ───────────────────────────────────────────────────────

fn validate_hunger_day(verbose: bool) -> Vec<TestResult> {
    println!("--- Hunger Day ---");
    let mut results = Vec::new();
    let mut engine = match new_engine() {
        Ok(e) => e,
        Err(r) => return vec![r],
    };
    let sim = engine.spawn_owner(true);
    let Some(hunger) = engine.add_commodity(sim, HUNGER) else {
        return vec![check("hunger_added", false, "hunger tuning missing")];
    };

    // Record every band change by the tick it happened on
    let mut transitions = Vec::new();
    let mut last = engine.state_name(sim, hunger).unwrap_or_default();
    for _ in 0..(4 * TICKS_PER_HOUR) {
        engine.advance(1);
        let now = engine.state_name(sim, hunger).unwrap_or_default();
        if now != last {
            transitions.push((engine.sim_time, now.clone()));
            last = now;
        }
    }
    if verbose {
        for (tick, state) in &transitions {
            println!("  tick {:4}: {}", tick, state);
        }
    }

    let expected = vec![(11, "hungry".to_string()), (71, "starving".to_string())];
    results.push(check(
        "hunger_transitions",
        transitions == expected,
        format!("{:?}", transitions),
    ));

    let value = engine.value(sim, hunger).unwrap_or(f64::NAN);
    results.push(check(
        "hunger_clamped_at_min",
        close(value, -100.0),
        format!("value after 4h = {}", value),
    ));

    let (queued, loot) = engine
        .with_status(sim, |_, _, queue, loot| {
            let queued: Vec<_> = queue
                .queued()
                .iter()
                .map(|q| (q.affordance.clone(), q.priority))
                .collect();
            let loot: Vec<_> = loot.entries().iter().map(|(_, l)| l.clone()).collect();
            (queued, loot)
        })
        .unwrap_or_default();
    results.push(check(
        "hunger_distress_then_failure",
        queued
            == vec![
                ("eat".to_string(), Priority::High),
                ("eat_from_fridge".to_string(), Priority::Critical),
            ],
        format!("{:?}", queued),
    ));
    results.push(check(
        "hunger_loot_on_enter",
        loot == ["loot_stomach_growl", "loot_stomach_cramps"],
        format!("{:?}", loot),
    ));

    // A meal lifts it back to "fine" and clears distress
    engine.set_value(sim, hunger, 90.0);
    let distressed = engine
        .with_status(sim, |_, buffs, _, _| buffs.has("buff_hunger_distress"))
        .unwrap_or(true);
    results.push(check(
        "hunger_meal_recovers",
        !distressed && engine.state_name(sim, hunger).as_deref() == Some("fine"),
        format!(
            "state {:?}, distress {}",
            engine.state_name(sim, hunger),
            distressed
        ),
    ));

    results
}

// ── 3. Energy Failure ───────────────────────────────────────────────────

fn validate_energy_failure(_verbose: bool) -> Vec<TestResult> {
    println!("--- Energy Failure ---");
    let mut results = Vec::new();
    let mut engine = match new_engine() {
        Ok(e) => e,
        Err(r) => return vec![r],
    };
    let sim = engine.spawn_owner(true);
    let Some(energy) = engine.add_commodity(sim, ENERGY) else {
        return vec![check("energy_added", false, "energy tuning missing")];
    };

    // Rested at 80, with its buff above 75
    let rested = engine
        .with_status(sim, |_, buffs, _, _| buffs.has("buff_rested"))
        .unwrap_or(false);
    results.push(check(
        "energy_starts_rested",
        rested,
        "buff_rested applied at 80",
    ));

    // The pass-out affordance fails its preconditions the first time around
    if let Some(mut queue) = engine.interactions_mut(sim) {
        queue.block("pass_out");
    }
    engine.advance(24 * TICKS_PER_HOUR);
    let value = engine.value(sim, energy).unwrap_or(f64::NAN);
    results.push(check(
        "energy_rests_at_zero",
        close(value, 0.0),
        format!("value {}", value),
    ));

    let queued = engine
        .with_status(sim, |_, _, queue, _| {
            queue.queued().iter().map(|q| q.affordance.clone()).collect::<Vec<_>>()
        })
        .unwrap_or_default();
    results.push(check(
        "energy_failure_blocked",
        queued == ["nap"],
        format!("queued {:?}", queued),
    ));

    // Failure is one-way: climbing back up and down again never re-fires
    if let Some(mut queue) = engine.interactions_mut(sim) {
        queue.unblock("pass_out");
    }
    engine.set_value(sim, energy, 50.0);
    engine.advance(24 * TICKS_PER_HOUR);
    let fired_again = engine
        .with_status(sim, |_, _, queue, _| queue.is_running_or_queued("pass_out"))
        .unwrap_or(true);
    results.push(check(
        "energy_failure_one_shot",
        !fired_again,
        "second collapse does not push pass_out",
    ));

    results
}

// ── 4. Transient Lifecycle ──────────────────────────────────────────────

fn validate_transient_lifecycle(_verbose: bool) -> Vec<TestResult> {
    println!("--- Transient Lifecycle ---");
    let mut results = Vec::new();
    let mut engine = match new_engine() {
        Ok(e) => e,
        Err(r) => return vec![r],
    };
    let sim = engine.spawn_owner(true);
    let Some(boredom) = engine.add_commodity(sim, BOREDOM) else {
        return vec![check("boredom_added", false, "boredom tuning missing")];
    };

    engine.advance(TICKS_PER_HOUR);
    let state = engine.state_name(sim, boredom);
    results.push(check(
        "boredom_calms_down",
        state.as_deref() == Some("calm"),
        format!("state after 1h {:?}", state),
    ));

    engine.advance(TICKS_PER_HOUR);
    let gone = !engine.has_commodity(sim, boredom);
    let buffs_left = engine.with_status(sim, |_, buffs, _, _| buffs.len()).unwrap_or(usize::MAX);
    results.push(check(
        "boredom_removed_at_rest",
        gone && buffs_left == 0 && engine.pending_alarms() == 0,
        format!(
            "removed {}, buffs {}, alarms {}",
            gone,
            buffs_left,
            engine.pending_alarms()
        ),
    ));

    // Re-adding starts a fresh instance
    let again = engine.add_commodity(sim, BOREDOM);
    results.push(check(
        "boredom_re_added",
        again.is_some() && again != Some(boredom),
        format!("{:?} after {:?}", again, boredom),
    ));

    results
}

// ── 5. Save & Catch-up ──────────────────────────────────────────────────

fn validate_save_catch_up(_verbose: bool) -> Vec<TestResult> {
    println!("--- Save & Catch-up ---");
    let mut results = Vec::new();
    let mut engine = match new_engine() {
        Ok(e) => e,
        Err(r) => return vec![r],
    };
    let sim = engine.spawn_owner(false);
    let Some(hunger) = engine.add_commodity(sim, HUNGER) else {
        return vec![check("hunger_added", false, "hunger tuning missing")];
    };
    engine.advance(30);

    let mut buffer = Vec::new();
    if let Err(e) = engine.save(&mut buffer) {
        return vec![check("save", false, format!("save failed: {}", e))];
    }
    results.push(check(
        "save_written",
        !buffer.is_empty(),
        format!("{} bytes", buffer.len()),
    ));

    let mut loaded = match new_engine() {
        Ok(e) => e,
        Err(r) => return vec![r],
    };
    let mut rng = StdRng::seed_from_u64(7);
    if let Err(e) = loaded.load(&buffer[..], 8 * TICKS_PER_HOUR, &mut rng) {
        return vec![check("load", false, format!("load failed: {}", e))];
    }
    let owner = loaded.world.iter().next().map(|e| e.entity());
    let value = owner.and_then(|o| loaded.value(o, hunger)).unwrap_or(f64::NAN);
    results.push(check(
        "catch_up_snaps_to_curve",
        (79.0..=80.0).contains(&value),
        format!("hunger {} at 08:00 after 7.5h away", value),
    ));

    results
}

// ── 6. Progress Messages ────────────────────────────────────────────────

fn validate_progress_messages(_verbose: bool) -> Vec<TestResult> {
    println!("--- Progress Messages ---");
    let mut results = Vec::new();
    let mut engine = match new_engine() {
        Ok(e) => e,
        Err(r) => return vec![r],
    };
    let sim = engine.spawn_owner(true);
    let Some(hunger) = engine.add_commodity(sim, HUNGER) else {
        return vec![check("hunger_added", false, "hunger tuning missing")];
    };

    let created = engine.drain_progress();
    results.push(check(
        "progress_one_per_operation",
        created.len() == 1,
        format!("{} messages on create", created.len()),
    ));

    let sizes_ok = created.iter().all(|m| m.bytes.len() == ProgressUpdate::ENCODED_LEN);
    let decoded = created.first().and_then(|m| ProgressUpdate::decode(&m.bytes).ok());
    results.push(check(
        "progress_wire_format",
        sizes_ok && decoded.map(|u| u.commodity_id) == Some(HUNGER),
        format!("{:?}", decoded),
    ));

    // A mutation crossing a band still publishes once
    engine.set_value(sim, hunger, -30.0);
    let crossed = engine.drain_progress();
    let index = crossed.last().map(|m| m.update.commodity_state_index);
    results.push(check(
        "progress_coalesced",
        crossed.len() == 1 && index == Some(0),
        format!("{} messages, state index {:?}", crossed.len(), index),
    ));

    results
}
