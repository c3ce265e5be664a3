use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::HashMap;
use ultrafast_models_sdk::models::{CompletionRequest, ProviderConfig, ProviderType};
use ultrafast_models_sdk::strategy::{parse_weights, RoutingStrategyKind, Strategy};

fn bench_provider_config_creation(c: &mut Criterion) {
    c.bench_function("provider_config_creation", |b| {
        b.iter(|| {
            let _config = ProviderConfig::new("primary-openai", ProviderType::OpenAI)
                .with_api_key("test-key")
                .with_weight(70)
                .with_priority(1);
        });
    });
}

fn bench_completion_request_creation(c: &mut Criterion) {
    c.bench_function("completion_request_creation", |b| {
        b.iter(|| {
            let _request = CompletionRequest {
                prompt: "Hello, how are you?".to_string(),
                system_prompt: Some("You are a helpful assistant.".to_string()),
                temperature: 0.7,
                max_tokens: 100,
                ..Default::default()
            };
        });
    });
}

fn bench_weight_parsing(c: &mut Criterion) {
    c.bench_function("parse_weights", |b| {
        b.iter(|| {
            let _weights = parse_weights(black_box("openai:50,anthropic:30,ollama:20"));
        });
    });
}

fn bench_weighted_random_selection(c: &mut Criterion) {
    let mut weights = HashMap::new();
    weights.insert("openai".to_string(), 0.5);
    weights.insert("anthropic".to_string(), 0.3);
    weights.insert("ollama".to_string(), 0.2);
    let strategy = Strategy::new(RoutingStrategyKind::WeightedRandom, weights, None);
    let healthy = vec![
        "openai".to_string(),
        "anthropic".to_string(),
        "ollama".to_string(),
    ];

    c.bench_function("weighted_random_selection", |b| {
        b.iter(|| {
            let _chosen = strategy.select(black_box(&healthy));
        });
    });
}

fn bench_round_robin_selection(c: &mut Criterion) {
    let strategy = Strategy::new(RoutingStrategyKind::RoundRobin, HashMap::new(), None);
    let healthy = vec![
        "openai".to_string(),
        "anthropic".to_string(),
        "ollama".to_string(),
    ];

    c.bench_function("round_robin_selection", |b| {
        b.iter(|| {
            let _chosen = strategy.select(black_box(&healthy));
        });
    });
}

fn bench_serialization(c: &mut Criterion) {
    let request = CompletionRequest {
        prompt: "Hello, how are you?".to_string(),
        system_prompt: Some("You are a helpful assistant.".to_string()),
        temperature: 0.7,
        max_tokens: 100,
        ..Default::default()
    };

    c.bench_function("request_serialization", |b| {
        b.iter(|| {
            let _json = serde_json::to_string(black_box(&request));
        });
    });

    c.bench_function("request_deserialization", |b| {
        let json = serde_json::to_string(&request).unwrap();
        b.iter(|| {
            let _request: CompletionRequest = serde_json::from_str(black_box(&json)).unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_provider_config_creation,
    bench_completion_request_creation,
    bench_weight_parsing,
    bench_weighted_random_selection,
    bench_round_robin_selection,
    bench_serialization
);
criterion_main!(benches);
