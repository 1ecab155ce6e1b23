// Latency benchmark for pty-backed supervised processes
// Measures spawn-to-cleanup cost and line round-trips through `cat`
// Target: spawn p50 < 50ms, round-trip p50 < 5ms

use gradebox::scheduler::CaseCapture;
use gradebox::{HarnessConfig, ProcessSpec, Stream, SupervisedProcess};
use std::time::{Duration, Instant};

const ITERATIONS: usize = 200;
const WARMUP_ITERATIONS: usize = 20;

struct LatencyStats {
    p50: Duration,
    p95: Duration,
    max: Duration,
    mean: Duration,
}

impl LatencyStats {
    fn from_samples(mut samples: Vec<Duration>) -> Self {
        samples.sort();
        let len = samples.len();
        let sum: Duration = samples.iter().sum();

        Self {
            p50: samples[len / 2],
            p95: samples[(len as f64 * 0.95) as usize],
            max: samples[len - 1],
            mean: sum / len as u32,
        }
    }
}

struct BenchmarkResult {
    scenario: &'static str,
    stats: LatencyStats,
    budget: Duration,
}

impl BenchmarkResult {
    fn passed(&self) -> bool {
        self.stats.p50 < self.budget
    }

    fn print(&self) {
        println!("\n=== {} ===", self.scenario);
        println!("  p50: {:?}", self.stats.p50);
        println!("  p95: {:?}", self.stats.p95);
        println!("  max: {:?}", self.stats.max);
        println!("  mean: {:?}", self.stats.mean);
        if self.passed() {
            println!("PASS (p50 < {:?})", self.budget);
        } else {
            println!("FAIL: p50={:?} (target <{:?})", self.stats.p50, self.budget);
        }
    }
}

fn config() -> HarnessConfig {
    HarnessConfig {
        echo_console: false,
        ..HarnessConfig::default()
    }
}

fn measure<F: FnMut()>(mut op: F) -> LatencyStats {
    for _ in 0..WARMUP_ITERATIONS {
        op();
    }
    let samples = (0..ITERATIONS)
        .map(|_| {
            let start = Instant::now();
            op();
            start.elapsed()
        })
        .collect();
    LatencyStats::from_samples(samples)
}

fn benchmark_spawn_and_cleanup() -> BenchmarkResult {
    let config = config();
    let spec = ProcessSpec::new(["cat"]);
    let stats = measure(|| {
        if let Ok(process) = SupervisedProcess::start(&spec, &config, CaseCapture::detached()) {
            process.cleanup();
        }
    });
    BenchmarkResult {
        scenario: "spawn + cleanup (cat)",
        stats,
        budget: Duration::from_millis(50),
    }
}

fn benchmark_line_roundtrip() -> BenchmarkResult {
    let process = match SupervisedProcess::start(
        &ProcessSpec::new(["cat"]),
        &config(),
        CaseCapture::detached(),
    ) {
        Ok(process) => process,
        Err(e) => {
            eprintln!("cannot start cat: {}", e);
            std::process::exit(1);
        }
    };
    let stats = measure(|| {
        let _ = process.write_line("PING");
        let _ = process.read_line(Stream::Stdout, true);
    });
    process.cleanup();
    BenchmarkResult {
        scenario: "line round-trip (cat)",
        stats,
        budget: Duration::from_millis(5),
    }
}

fn main() {
    println!("=== gradebox pty latency benchmark ===");
    println!("Iterations: {} (after {} warmup)", ITERATIONS, WARMUP_ITERATIONS);

    let results = vec![benchmark_spawn_and_cleanup(), benchmark_line_roundtrip()];
    for result in &results {
        result.print();
    }

    let passed = results.iter().filter(|r| r.passed()).count();
    println!("\n=== Summary ===");
    println!("{}/{} scenarios within budget", passed, results.len());
    std::process::exit(if passed == results.len() { 0 } else { 1 });
}
