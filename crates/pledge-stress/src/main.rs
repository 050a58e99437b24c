use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use pledge::{CheckMode, PromisePool, PromiseState, Rejection, RuntimeConfig, deferred_with};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Scenario {
    Settle,
    Register,
    Pool,
}

impl Scenario {
    const ALL: [Scenario; 3] = [Scenario::Settle, Scenario::Register, Scenario::Pool];

    fn parse(s: &str) -> Result<Vec<Scenario>, String> {
        match s {
            "settle" => Ok(vec![Scenario::Settle]),
            "register" => Ok(vec![Scenario::Register]),
            "pool" => Ok(vec![Scenario::Pool]),
            "all" => Ok(Self::ALL.to_vec()),
            other => Err(format!(
                "invalid scenario '{other}', expected settle, register, pool or all"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Options {
    iterations: usize,
    threads: usize,
    scenarios: Vec<Scenario>,
}

#[derive(Debug, Serialize)]
struct ScenarioReport {
    scenario: Scenario,
    iterations: usize,
    violations: usize,
    elapsed_ms: u64,
}

#[derive(Debug, Serialize)]
struct Report {
    threads: usize,
    passed: bool,
    scenarios: Vec<ScenarioReport>,
}

#[derive(Debug, thiserror::Error)]
enum StressError {
    #[error("{count} violation(s) in scenario {scenario:?}")]
    Violated { scenario: Scenario, count: usize },
    #[error("failed to encode report: {0}")]
    Encode(#[from] serde_json::Error),
}

fn main() {
    pledge::telemetry::init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let options = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) if msg.is_empty() => {
            eprint!("{}", usage());
            process::exit(0);
        }
        Err(msg) => {
            eprintln!("error: {msg}");
            eprintln!();
            eprint!("{}", usage());
            process::exit(2);
        }
    };

    if let Err(e) = run(&options) {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn usage() -> String {
    [
        "Usage: pledge-stress [--iterations N] [--threads N] [--scenario settle|register|pool|all]",
        "",
        "Options:",
        "  --iterations <n>   Rounds per scenario [default: 10000]",
        "  --threads <n>      Concurrent threads per round [default: 4]",
        "  --scenario <name>  Scenario to run [default: all]",
        "",
    ]
    .join("\n")
}

/// `Err("")` means help was requested.
fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut options = Options {
        iterations: 10_000,
        threads: 4,
        scenarios: Scenario::ALL.to_vec(),
    };

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--iterations" => {
                i += 1;
                options.iterations = parse_count(args.get(i), "--iterations")?;
            }
            "--threads" => {
                i += 1;
                options.threads = parse_count(args.get(i), "--threads")?;
            }
            "--scenario" => {
                i += 1;
                options.scenarios =
                    Scenario::parse(args.get(i).ok_or("--scenario requires a value")?)?;
            }
            "--help" | "-h" => return Err("".to_string()),
            arg if arg.starts_with('-') => return Err(format!("unknown flag: {arg}")),
            arg => return Err(format!("unexpected argument: {arg}")),
        }
        i += 1;
    }

    Ok(options)
}

fn parse_count(value: Option<&String>, flag: &str) -> Result<usize, String> {
    let value = value.ok_or_else(|| format!("{flag} requires a value"))?;
    match value.parse::<usize>() {
        Ok(0) => Err(format!("{flag} must be at least 1")),
        Ok(n) => Ok(n),
        Err(_) => Err(format!("{flag} expects a positive integer, got '{value}'")),
    }
}

fn run(options: &Options) -> Result<(), StressError> {
    let mut scenarios = Vec::with_capacity(options.scenarios.len());
    for &scenario in &options.scenarios {
        tracing::info!(?scenario, iterations = options.iterations, threads = options.threads, "Running scenario");
        let started = Instant::now();
        let violations = match scenario {
            Scenario::Settle => settle_race(options.iterations, options.threads),
            Scenario::Register => register_race(options.iterations, options.threads),
            Scenario::Pool => pool_reuse(options.iterations, options.threads),
        };
        if violations > 0 {
            tracing::error!(?scenario, violations, "Property violated");
        }
        scenarios.push(ScenarioReport {
            scenario,
            iterations: options.iterations,
            violations,
            elapsed_ms: started.elapsed().as_millis() as u64,
        });
    }

    let report = Report {
        threads: options.threads,
        passed: scenarios.iter().all(|s| s.violations == 0),
        scenarios,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    match report.scenarios.iter().find(|s| s.violations > 0) {
        Some(failed) => Err(StressError::Violated {
            scenario: failed.scenario,
            count: failed.violations,
        }),
        None => Ok(()),
    }
}

/// Threads race resolve, reject and cancel on one promise. Exactly one call
/// may win, and the single continuation must see the winning state.
fn settle_race(iterations: usize, threads: usize) -> usize {
    let mut violations = 0;
    for _ in 0..iterations {
        let (resolver, promise) = deferred_with::<usize>(CheckMode::Silent);
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(pledge::SpinLock::new(None));
        {
            let calls = Arc::clone(&calls);
            let seen = Arc::clone(&seen);
            promise.on_settled(move |outcome| {
                calls.fetch_add(1, Ordering::SeqCst);
                *seen.lock() = Some(outcome.state());
            });
        }

        let wins = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for t in 0..threads {
                let resolver = &resolver;
                let wins = &wins;
                s.spawn(move || {
                    let won = match t % 3 {
                        0 => resolver.try_resolve(t),
                        1 => resolver.try_reject(Rejection::msg("stress")),
                        _ => resolver.try_cancel(),
                    };
                    if won {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        let state = promise.state();
        let consistent = wins.load(Ordering::SeqCst) == 1
            && calls.load(Ordering::SeqCst) == 1
            && state.is_terminal()
            && *seen.lock() == Some(state);
        if !consistent {
            violations += 1;
        }
    }
    violations
}

/// Registration races completion: every continuation runs exactly once,
/// whether it was queued before the settle or arrived after it.
fn register_race(iterations: usize, threads: usize) -> usize {
    let registrars = threads.saturating_sub(1).max(1);
    let mut violations = 0;
    for _ in 0..iterations {
        let (resolver, promise) = deferred_with::<usize>(CheckMode::Silent);
        let calls = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|s| {
            for _ in 0..registrars {
                let promise = promise.clone();
                let calls = Arc::clone(&calls);
                s.spawn(move || {
                    promise.on_settled(move |outcome| {
                        if outcome.state() == PromiseState::Resolved {
                            calls.fetch_add(1, Ordering::SeqCst);
                        }
                    });
                });
            }
            s.spawn(|| resolver.resolve(1));
        });

        if calls.load(Ordering::SeqCst) != registrars {
            violations += 1;
        }
    }
    violations
}

/// Each thread cycles promises through a shared pool with at most one in
/// flight, so the pool never needs more nodes than there are threads.
fn pool_reuse(iterations: usize, threads: usize) -> usize {
    let config = RuntimeConfig::default()
        .with_checks(CheckMode::Silent)
        .with_pool_capacity(threads);
    let pool = PromisePool::<usize>::new(&config);
    let failures = AtomicUsize::new(0);
    let per_thread = iterations.div_ceil(threads);

    std::thread::scope(|s| {
        for t in 0..threads {
            let pool = &pool;
            let failures = &failures;
            s.spawn(move || {
                for i in 0..per_thread {
                    let Ok((resolver, promise)) = pool.deferred() else {
                        failures.fetch_add(1, Ordering::SeqCst);
                        continue;
                    };
                    if promise.state() != PromiseState::Pending {
                        failures.fetch_add(1, Ordering::SeqCst);
                    }
                    resolver.resolve(t * per_thread + i);
                    if promise.outcome().and_then(|o| o.into_value()) != Some(t * per_thread + i)
                    {
                        failures.fetch_add(1, Ordering::SeqCst);
                    }
                }
            });
        }
    });

    let mut violations = failures.load(Ordering::SeqCst);
    if pool.created() > threads {
        tracing::warn!(created = pool.created(), threads, "Pool grew beyond thread count");
        violations += 1;
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("pledge-stress")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn defaults() {
        let options = parse_args(&args(&[])).unwrap();
        assert_eq!(options.iterations, 10_000);
        assert_eq!(options.threads, 4);
        assert_eq!(options.scenarios, Scenario::ALL.to_vec());
    }

    #[test]
    fn parses_flags() {
        let options = parse_args(&args(&[
            "--iterations",
            "50",
            "--threads",
            "8",
            "--scenario",
            "pool",
        ]))
        .unwrap();
        assert_eq!(
            options,
            Options {
                iterations: 50,
                threads: 8,
                scenarios: vec![Scenario::Pool],
            }
        );
    }

    #[test]
    fn help_is_not_an_error_message() {
        assert_eq!(parse_args(&args(&["--help"])), Err(String::new()));
        assert_eq!(parse_args(&args(&["-h", "--threads", "2"])), Err(String::new()));
        assert!(usage().starts_with("Usage: pledge-stress"));
        assert!(!usage().contains("error"));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_args(&args(&["--threads", "0"])).is_err());
        assert!(parse_args(&args(&["--iterations"])).is_err());
        assert!(parse_args(&args(&["--scenario", "chaos"])).is_err());
        assert!(parse_args(&args(&["--verbose"])).is_err());
        assert!(parse_args(&args(&["extra"])).is_err());
    }

    #[test]
    fn scenarios_hold_at_small_scale() {
        assert_eq!(settle_race(200, 4), 0);
        assert_eq!(register_race(200, 4), 0);
        assert_eq!(pool_reuse(400, 4), 0);
    }

    #[test]
    fn report_shape() {
        let report = Report {
            threads: 2,
            passed: true,
            scenarios: vec![ScenarioReport {
                scenario: Scenario::Register,
                iterations: 10,
                violations: 0,
                elapsed_ms: 3,
            }],
        };
        insta::assert_json_snapshot!(report, @r#"
        {
          "threads": 2,
          "passed": true,
          "scenarios": [
            {
              "scenario": "register",
              "iterations": 10,
              "violations": 0,
              "elapsed_ms": 3
            }
          ]
        }
        "#);
    }
}
