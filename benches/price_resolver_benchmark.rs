//! Multi-source resolver throughput on a product page sized like a real one

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use pricewatch_lib::infrastructure::parsing::{MultiSourcePriceResolver, parse_price};

fn product_page() -> String {
    let filler: String = (0..400)
        .map(|i| format!("<li class=\"spec\">Especificação {i}: valor {i},5 cm</li>"))
        .collect();
    format!(
        r#"<html><head>
        <script type="application/ld+json">{{"@type": "Product", "offers": {{"price": "349.00"}}}}</script>
        <script id="__NEXT_DATA__">{{"props": {{"pageProps": {{"product": {{"price": 329.9, "lowPrice": 299.9}}}}}}}}</script>
        <script>window.dataLayer = [{{"valor": 329.90}}];</script>
        </head><body>
        <aside data-test="product-details-info"><p>Cafeteira</p><p>R$ 329,90</p></aside>
        <ul>{filler}</ul>
        </body></html>"#
    )
}

fn resolver_benchmark(c: &mut Criterion) {
    let resolver = MultiSourcePriceResolver::new().expect("default resolver compiles");
    let html = product_page();

    c.bench_function("resolve_html product page", |b| {
        b.iter(|| black_box(resolver.resolve_html(black_box(&html))))
    });

    c.bench_function("parse_price mixed inputs", |b| {
        b.iter(|| {
            for text in ["R$ 1.234,56", "10,50", "por apenas R$ 99,90 à vista", "sem preço"] {
                black_box(parse_price(black_box(text)));
            }
        })
    });
}

criterion_group!(benches, resolver_benchmark);
criterion_main!(benches);
