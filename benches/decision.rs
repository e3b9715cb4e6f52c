use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use warden::{compile, compiler, Manager, MemoryManager, Policy, RawHttpRequest, Request, Warden};

fn policy(id: &str, resource: &str) -> Policy {
    serde_json::from_value(json!({
        "id": id,
        "subjects": ["user:<.+>"],
        "effect": "allow",
        "resources": [resource],
        "actions": ["create", "update"]
    }))
    .unwrap()
}

fn request() -> Request {
    serde_json::from_value(json!({
        "resource": "articles:42",
        "action": "create",
        "subject": ["user:alice"],
        "context": {}
    }))
    .unwrap()
}

fn bench_compiler(c: &mut Criterion) {
    let pattern = "fuac:/policy/realm-svc.<(admin|read|write|delete)>";
    c.bench_function("compile_cold", |b| {
        b.iter(|| compile(black_box(pattern), b'<', b'>').unwrap())
    });
    c.bench_function("compile_cached", |b| {
        b.iter(|| compiler::compiled(black_box(pattern), b'<', b'>').unwrap())
    });
}

fn bench_decisions(c: &mut Criterion) {
    let manager = Arc::new(MemoryManager::new());
    for index in 0..100 {
        manager
            .create(policy(&format!("bench.{index:03}"), "articles:<\\d+>"))
            .unwrap();
    }
    let warden = Warden::new(manager);
    let request = request();
    c.bench_function("is_allowed_100_policies", |b| {
        b.iter(|| warden.is_allowed(black_box(&request)).unwrap())
    });

    let manager = Arc::new(MemoryManager::new());
    let mut guarded = policy("bench.body", "<.*>");
    guarded.actions = vec!["<.*>".to_string()];
    let conditions = json!({
        "body": {
            "type": "BodyArrayMatch",
            "mode": "all",
            "path": ".subjects",
            "matches": "role:admin-<.+>"
        }
    });
    guarded.conditions = serde_json::from_value(conditions).unwrap();
    manager.create(guarded).unwrap();
    let warden = Warden::new(manager);

    let mut request = request();
    request.context.set_raw_request(Arc::new(RawHttpRequest::new(
        vec![("Content-Type".to_string(), "application/json".to_string())],
        br#"{"subjects":["role:admin-read","role:admin-write"]}"#.to_vec(),
    )));
    c.bench_function("is_allowed_body_condition", |b| {
        b.iter(|| warden.is_allowed(black_box(&request)).unwrap())
    });
}

criterion_group!(benches, bench_compiler, bench_decisions);
criterion_main!(benches);
