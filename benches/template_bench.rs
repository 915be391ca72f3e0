//! Quick benchmark to verify template resolution performance

use std::time::Instant;

use serde_json::{json, Map, Value};
use weave::template::TemplateResolver;

fn main() {
    // Setup context with some data
    let mut data = Map::new();
    data.insert("task1".into(), json!("Hello World"));
    data.insert(
        "fetch".into(),
        json!({"doc": {"title": "Report", "tags": ["a", "b", "c"]}, "status": 200}),
    );
    data.insert("analyze".into(), json!({"summary": "Analysis results here"}));

    let mut bindings = Map::new();
    bindings.insert("item".into(), json!({"path": "/tmp/file.txt"}));

    // Test templates of varying complexity
    let templates = vec![
        "Simple text with no templates",
        "${task1}",
        "${fetch.doc.tags[1]}",
        "Output from ${task1}",
        "Multiple ${task1} and ${analyze.summary} references",
        "${analyze.summary} ${fetch.doc.title} ${item.path} ${fetch.status} mixed content",
    ];

    let resolver = TemplateResolver::new(&data, &bindings);

    println!("Template Resolution Performance Test");
    println!("====================================\n");

    // Warm up the token cache
    for template in &templates {
        let _ = resolver.resolve_str(template);
    }

    // Benchmark each template
    for template in &templates {
        let iterations = 100_000;
        let start = Instant::now();

        for _ in 0..iterations {
            let _ = resolver.resolve_str(template);
        }

        let elapsed = start.elapsed();
        let per_op = elapsed / iterations;

        println!("Template: {:60}", format!("\"{}\"", template));
        println!("  Time for {} iterations: {:?}", iterations, elapsed);
        println!("  Per operation: {:?}\n", per_op);
    }

    // Nested parameter structures
    println!("Nested Parameter Resolution");
    println!("===========================\n");

    let params: Value = json!({
        "title": "${fetch.doc.title}",
        "body": {"text": "Summary: ${analyze.summary}", "tags": ["${fetch.doc.tags[0]}", "static"]},
        "target": "${item.path}"
    });

    let iterations = 100_000;
    let start = Instant::now();
    for _ in 0..iterations {
        let _ = resolver.resolve_value(&params);
    }
    let elapsed = start.elapsed();

    println!("  Time for {} iterations: {:?}", iterations, elapsed);
    println!("  Per operation: {:?}", elapsed / iterations);
}
