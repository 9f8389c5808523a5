use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use veriscore_core::scoring::{domain_factors, normalize_text, sentence_windows, strip_markup};
use veriscore_core::{extract_domain, ResponseAggregator, ScoringConfig, SnippetVerdict};

fn generate_page(sentences: usize) -> String {
    let body: Vec<String> = (0..sentences)
        .map(|i| format!("Sentence number {} talks about <b>rivers</b> and &amp; lakes", i))
        .collect();
    format!("<html><body><p>{}.</p></body></html>", body.join(". "))
}

fn bench_page_preparation(c: &mut Criterion) {
    let mut group = c.benchmark_group("page_preparation");

    for sentences in [50, 200, 1000].iter() {
        let page = generate_page(*sentences);
        group.throughput(Throughput::Bytes(page.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(sentences), sentences, |b, _| {
            b.iter(|| {
                let text = strip_markup(black_box(&page));
                let normalized = normalize_text(&text);
                let windows = sentence_windows(&text, 3, 200);
                black_box((normalized, windows))
            });
        });
    }
    group.finish();
}

fn bench_combine(c: &mut Criterion) {
    let aggregator = ResponseAggregator::new(&ScoringConfig::default());
    let judged: Vec<(String, SnippetVerdict)> = (0..5)
        .map(|i| {
            let domain = format!("site{}.com", i % 2);
            (
                format!("https://{}/page/{}", domain, i),
                SnippetVerdict::accepted(domain, i == 0, 0.75),
            )
        })
        .collect();

    c.bench_function("combine_five_snippets", |b| {
        b.iter(|| black_box(aggregator.combine(judged.clone())));
    });

    let domains = ["a.com", "b.com", "a.com", "a.com", "c.org"];
    c.bench_function("domain_factors", |b| {
        b.iter(|| black_box(domain_factors(domains.iter().map(|d| Some(*d)))));
    });
}

fn bench_extract_domain(c: &mut Criterion) {
    let urls = [
        "https://www.example.com/a/b?c=d",
        "https://news.bbc.co.uk/story/1",
        "https://192.168.1.10/index.html",
        "https://deep.sub.domain.example.org/path",
    ];

    c.bench_function("extract_domain", |b| {
        b.iter(|| {
            for url in urls.iter() {
                black_box(extract_domain(url));
            }
        });
    });
}

criterion_group!(benches, bench_page_preparation, bench_combine, bench_extract_domain);
criterion_main!(benches);
