//! Benchmarks for the epsilon-greedy select/update cycle.
//! Run with: cargo bench -p linkbandit-rl-engine

use linkbandit_rl_engine::{EpsilonGreedy, UpdateRule};

fn bench_rule(name: &str, rule: UpdateRule, num_arms: usize) {
    let mut policy = EpsilonGreedy::with_seed(num_arms, 0.1, rule, 42).expect("valid policy");

    // Warmup
    for i in 0..1_000 {
        let arm = policy.select();
        policy.update(arm, (i % 13) as f64).expect("pending arm");
    }

    let iterations: u32 = 1_000_000;
    let start = std::time::Instant::now();

    for i in 0..iterations {
        let arm = policy.select();
        policy.update(arm, (i % 13) as f64).expect("pending arm");
    }

    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations;

    println!("=== {} ({} arms) ===", name, num_arms);
    println!("Iterations:  {}", iterations);
    println!("Total time:  {:?}", elapsed);
    println!("Per trial:   {:?}", per_iter);
    println!("Throughput:  {:.0} trials/sec", iterations as f64 / elapsed.as_secs_f64());
}

fn main() {
    bench_rule("Incremental mean", UpdateRule::IncrementalMean, 9);
    bench_rule(
        "Exponential smoothing",
        UpdateRule::ExponentialSmoothing { alpha: 0.2 },
        9,
    );
    bench_rule("Incremental mean", UpdateRule::IncrementalMean, 256);
}
