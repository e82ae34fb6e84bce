/// Stack Parsing Benchmarks
///
/// Measures parsing of bcc `trace -UK` output and merging it into a call graph,
/// for saved output of growing size.
use calltree::call_graph::CallGraph;
use calltree::stack_parser::parse_stack;
use calltree::trace_output::load_from_str;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn stack_block(leaf: &str, params: &str) -> String {
    format!(
        "1234    1234    test_application {leaf} {params}\n\
         \x20       b'{leaf}+0x0 [test_application]'\n\
         \x20       b'func4+0x9 [test_application]'\n\
         \x20       b'func6+0x1e [test_application]'\n\
         \x20       b'main+0x1b [test_application]'\n\
         \x20       b'__libc_start_main+0xe7 [libc-2.27.so]'\n"
    )
}

fn trace_output(stacks: usize) -> String {
    (0..stacks)
        .map(|i| match i % 3 {
            0 => stack_block("func1", "b'param1' b'param2'"),
            1 => stack_block("func2", "3"),
            _ => stack_block("func3", ""),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn bench_parse_stack(c: &mut Criterion) {
    let block = stack_block("func1", "b'param1' b'param2'");
    let lines: Vec<&str> = block.lines().collect();

    c.bench_function("parse_stack_single", |b| {
        b.iter(|| parse_stack(black_box(&lines)))
    });
}

fn bench_load_trace_output(c: &mut Criterion) {
    let mut group = c.benchmark_group("load_trace_output");

    for stacks in [10, 100, 1000] {
        let text = trace_output(stacks);
        group.throughput(Throughput::Elements(stacks as u64));
        group.bench_with_input(BenchmarkId::from_parameter(stacks), &text, |b, text| {
            let mut graph = CallGraph::new();
            b.iter(|| load_from_str(black_box(text), &mut graph))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_parse_stack, bench_load_trace_output);
criterion_main!(benches);
