use moca_infer::compiler::ast::{AstBuilder, BinaryOp, Item, Program};
use moca_infer::compiler::load_program;
use moca_infer::{EngineConfig, analyze};
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Serialize)]
struct BenchmarkResult {
    name: String,
    functions: usize,
    instantiations: usize,
    diagnostics: usize,
    sequential_secs: f64,
    parallel_secs: f64,
}

#[derive(Serialize)]
struct BenchmarkOutput {
    results: Vec<BenchmarkResult>,
}

// Generated programs

/// `fi(x) = f{i-1}(x) + x`, instantiated from `main` with an int.
fn call_chain(n: usize) -> Program {
    let mut b = AstBuilder::new();
    let mut items = Vec::new();
    for i in 0..n {
        let lhs = if i == 0 {
            b.ident("x")
        } else {
            let x = b.ident("x");
            b.call(&format!("f{}", i - 1), vec![x])
        };
        let x = b.ident("x");
        let sum = b.binary(BinaryOp::Add, lhs, x);
        let ret = b.ret(sum);
        items.push(Item::Function(b.function(&format!("f{}", i), &["x"], vec![ret])));
    }
    let one = b.int(1);
    let call = b.call(&format!("f{}", n - 1), vec![one]);
    let ret = b.ret(call);
    items.push(Item::Function(b.function("main", &[], vec![ret])));
    Program { items }
}

/// `n` unrelated generic functions, each called with int and str.
fn many_generics(n: usize) -> Program {
    let mut b = AstBuilder::new();
    let mut items = Vec::new();
    let mut body = Vec::new();
    for i in 0..n {
        let name = format!("twice{}", i);
        let lhs = b.ident("v");
        let rhs = b.ident("v");
        let sum = b.binary(BinaryOp::Add, lhs, rhs);
        let ret = b.ret(sum);
        items.push(Item::Function(b.function(&name, &["v"], vec![ret])));

        let arg = b.int(i as i64);
        let call = b.call(&name, vec![arg]);
        body.push(b.stmt(call));
        let arg = b.string("s");
        let call = b.call(&name, vec![arg]);
        body.push(b.stmt(call));
    }
    items.push(Item::Function(b.function("main", &[], body)));
    Program { items }
}

fn time_analysis(program: &Program, parallel: bool) -> (f64, moca_infer::Analysis) {
    let config = EngineConfig {
        parallel,
        ..EngineConfig::default()
    };
    let start = Instant::now();
    let analysis = analyze(program, &config);
    (start.elapsed().as_secs_f64(), analysis)
}

fn run_benchmark(name: &str, program: &Program) -> BenchmarkResult {
    let (sequential_secs, _) = time_analysis(program, false);
    let (parallel_secs, analysis) = time_analysis(program, true);
    if !analysis.is_success() {
        eprintln!("{}: {} errors", name, analysis.errors().count());
    }
    BenchmarkResult {
        name: name.to_string(),
        functions: analysis.functions.len(),
        instantiations: analysis.cache.len(),
        diagnostics: analysis.diagnostics.len(),
        sequential_secs,
        parallel_secs,
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut results = vec![
        run_benchmark("call_chain_100", &call_chain(100)),
        run_benchmark("call_chain_250", &call_chain(250)),
        run_benchmark("many_generics_1000", &many_generics(1000)),
    ];

    // Programs serialized by a front end, passed as arguments
    for arg in std::env::args().skip(1) {
        let path = Path::new(&arg);
        match load_program(path) {
            Ok(program) => results.push(run_benchmark(&arg, &program)),
            Err(e) => eprintln!("{}: {}", arg, e),
        }
    }

    let output = BenchmarkOutput { results };
    match serde_json::to_string_pretty(&output) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("failed to serialize results: {}", e),
    }
}
